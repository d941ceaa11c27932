//! Service configuration
//!
//! | Variable | Default | Meaning |
//! |----------|---------|---------|
//! | DATABASE_URL | required | Postgres connection string |
//! | DATABASE_MAX_CONNECTIONS | 10 | pool size |
//! | NATS_URL | unset | enables event publishing |
//! | PORT | 8083 | HTTP port |
//! | CURRENCY | VND | currency stamped on orders |
//! | SHIPPING_FEE | 30000 | flat shipping fee |
//! | FREE_SHIPPING_THRESHOLD | 500000 | discounted subtotal that ships free, `0` disables |
//! | STORE_MAX_RETRIES | 3 | retries for transient storage failures |

use rust_decimal::Decimal;
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required environment variable {0}")]
    Missing(&'static str),
    #[error("invalid value for {key}: {value}")]
    Invalid { key: &'static str, value: String },
}

/// Knobs the order engine needs at runtime.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub currency: String,
    pub shipping_fee: Decimal,
    pub free_shipping_threshold: Option<Decimal>,
    pub max_retries: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            currency: "VND".to_string(),
            shipping_fee: Decimal::from(30_000),
            free_shipping_threshold: Some(Decimal::from(500_000)),
            max_retries: 3,
        }
    }
}

impl EngineConfig {
    pub fn shipping_fee_for(&self, discounted_subtotal: Decimal) -> Decimal {
        match self.free_shipping_threshold {
            Some(threshold) if discounted_subtotal >= threshold => Decimal::ZERO,
            _ => self.shipping_fee,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub database_max_connections: u32,
    pub nats_url: Option<String>,
    pub port: u16,
    pub engine: EngineConfig,
}

impl Config {
    /// Read configuration from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = EngineConfig::default();
        let threshold: Decimal = parse_or("FREE_SHIPPING_THRESHOLD", Decimal::from(500_000))?;
        Ok(Self {
            database_url: std::env::var("DATABASE_URL").map_err(|_| ConfigError::Missing("DATABASE_URL"))?,
            database_max_connections: parse_or("DATABASE_MAX_CONNECTIONS", 10)?,
            nats_url: std::env::var("NATS_URL").ok().filter(|s| !s.is_empty()),
            port: parse_or("PORT", 8083)?,
            engine: EngineConfig {
                currency: std::env::var("CURRENCY").unwrap_or(defaults.currency),
                shipping_fee: parse_or("SHIPPING_FEE", defaults.shipping_fee)?,
                free_shipping_threshold: (!threshold.is_zero()).then_some(threshold),
                max_retries: parse_or("STORE_MAX_RETRIES", defaults.max_retries)?,
            },
        })
    }
}

fn parse_or<T: FromStr>(key: &'static str, default: T) -> Result<T, ConfigError> {
    match std::env::var(key) {
        Ok(value) => value.trim().parse().map_err(|_| ConfigError::Invalid { key, value }),
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_free_shipping_threshold() {
        let cfg = EngineConfig::default();
        assert_eq!(cfg.shipping_fee_for(Decimal::from(499_999)), Decimal::from(30_000));
        assert_eq!(cfg.shipping_fee_for(Decimal::from(500_000)), Decimal::ZERO);

        let flat = EngineConfig { free_shipping_threshold: None, ..EngineConfig::default() };
        assert_eq!(flat.shipping_fee_for(Decimal::from(9_000_000)), Decimal::from(30_000));
    }
}
