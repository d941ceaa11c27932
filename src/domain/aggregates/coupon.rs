//! Coupon Aggregate

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::domain::value_objects::normalize_code;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiscountType {
    Percentage,
    Fixed,
}

impl DiscountType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Percentage => "percentage",
            Self::Fixed => "fixed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "percentage" => Some(Self::Percentage),
            "fixed" => Some(Self::Fixed),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Coupon {
    pub id: Uuid,
    pub code: String,
    pub discount_type: DiscountType,
    pub discount_value: Decimal,
    pub min_purchase_amount: Decimal,
    /// Cap applied to percentage discounts.
    pub max_discount_amount: Option<Decimal>,
    /// `None` means unlimited.
    pub usage_limit: Option<i64>,
    pub used_count: i64,
    pub valid_from: DateTime<Utc>,
    pub valid_until: DateTime<Utc>,
    pub is_active: bool,
}

impl Coupon {
    pub fn percentage(code: &str, percent: Decimal, valid_from: DateTime<Utc>, valid_until: DateTime<Utc>) -> Self {
        Self::new(code, DiscountType::Percentage, percent, valid_from, valid_until)
    }

    pub fn fixed(code: &str, amount: Decimal, valid_from: DateTime<Utc>, valid_until: DateTime<Utc>) -> Self {
        Self::new(code, DiscountType::Fixed, amount, valid_from, valid_until)
    }

    fn new(code: &str, discount_type: DiscountType, value: Decimal, valid_from: DateTime<Utc>, valid_until: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::now_v7(),
            code: normalize_code(code),
            discount_type,
            discount_value: value,
            min_purchase_amount: Decimal::ZERO,
            max_discount_amount: None,
            usage_limit: None,
            used_count: 0,
            valid_from,
            valid_until,
            is_active: true,
        }
    }

    pub fn with_minimum(mut self, amount: Decimal) -> Self {
        self.min_purchase_amount = amount;
        self
    }

    pub fn with_cap(mut self, amount: Decimal) -> Self {
        self.max_discount_amount = Some(amount);
        self
    }

    pub fn with_usage_limit(mut self, limit: i64) -> Self {
        self.usage_limit = Some(limit);
        self
    }

    pub fn is_exhausted(&self) -> bool {
        self.usage_limit.is_some_and(|limit| self.used_count >= limit)
    }

    /// Check eligibility in a fixed priority order and return the discount.
    pub fn check(&self, subtotal: Decimal, now: DateTime<Utc>) -> Result<Decimal, CouponRejection> {
        if !self.is_active {
            return Err(CouponRejection::Inactive(self.code.clone()));
        }
        if now < self.valid_from {
            return Err(CouponRejection::NotYetValid(self.code.clone()));
        }
        if now > self.valid_until {
            return Err(CouponRejection::Expired(self.code.clone()));
        }
        if self.is_exhausted() {
            return Err(CouponRejection::UsageExhausted(self.code.clone()));
        }
        if subtotal < self.min_purchase_amount {
            return Err(CouponRejection::BelowMinimum {
                code: self.code.clone(),
                minimum: self.min_purchase_amount,
            });
        }
        Ok(self.discount_for(subtotal))
    }

    pub fn discount_for(&self, subtotal: Decimal) -> Decimal {
        match self.discount_type {
            DiscountType::Percentage => {
                let raw = (subtotal * self.discount_value / Decimal::ONE_HUNDRED).round_dp(2);
                match self.max_discount_amount {
                    Some(cap) => raw.min(cap),
                    None => raw,
                }
            }
            DiscountType::Fixed => self.discount_value.min(subtotal),
        }
    }

    /// Count one use against the limit.
    pub fn redeem(&mut self) -> Result<(), CouponRejection> {
        if self.is_exhausted() {
            return Err(CouponRejection::UsageExhausted(self.code.clone()));
        }
        self.used_count += 1;
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CouponRejection {
    #[error("coupon {0} does not exist")]
    NotFound(String),
    #[error("coupon {0} is inactive")]
    Inactive(String),
    #[error("coupon {0} is not valid yet")]
    NotYetValid(String),
    #[error("coupon {0} has expired")]
    Expired(String),
    #[error("coupon {0} has reached its usage limit")]
    UsageExhausted(String),
    #[error("coupon {code} requires a minimum purchase of {minimum}")]
    BelowMinimum { code: String, minimum: Decimal },
}

impl CouponRejection {
    pub fn code(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "coupon_not_found",
            Self::Inactive(_) => "coupon_inactive",
            Self::NotYetValid(_) => "coupon_not_yet_valid",
            Self::Expired(_) => "coupon_expired",
            Self::UsageExhausted(_) => "usage_exhausted",
            Self::BelowMinimum { .. } => "below_minimum",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use rust_decimal_macros::dec;

    fn welcome10() -> Coupon {
        let now = Utc::now();
        Coupon::percentage("welcome10", dec!(10), now - Duration::days(1), now + Duration::days(30))
            .with_minimum(dec!(5000000))
            .with_cap(dec!(2000000))
            .with_usage_limit(1)
    }

    #[test]
    fn test_percentage_is_capped() {
        let c = welcome10();
        assert_eq!(c.code, "WELCOME10");
        assert_eq!(c.check(dec!(20000000), Utc::now()).unwrap(), dec!(2000000));
        assert_eq!(c.check(dec!(30000000), Utc::now()).unwrap(), dec!(2000000));
        assert_eq!(c.check(dec!(6000000), Utc::now()).unwrap(), dec!(600000));
    }

    #[test]
    fn test_fixed_never_exceeds_subtotal() {
        let now = Utc::now();
        let c = Coupon::fixed("FLAT", dec!(100000), now - Duration::hours(1), now + Duration::hours(1));
        assert_eq!(c.discount_for(dec!(250000)), dec!(100000));
        assert_eq!(c.discount_for(dec!(40000)), dec!(40000));
    }

    #[test]
    fn test_rejection_priority() {
        let now = Utc::now();
        let mut c = welcome10();
        c.is_active = false;
        c.valid_until = now - Duration::days(1);
        assert!(matches!(c.check(dec!(1), now), Err(CouponRejection::Inactive(_))));

        c.is_active = true;
        assert!(matches!(c.check(dec!(1), now), Err(CouponRejection::Expired(_))));

        c.valid_from = now + Duration::days(1);
        assert!(matches!(c.check(dec!(1), now), Err(CouponRejection::NotYetValid(_))));

        let mut c = welcome10();
        c.used_count = 1;
        assert!(matches!(c.check(dec!(1), now), Err(CouponRejection::UsageExhausted(_))));

        let c = welcome10();
        assert!(matches!(c.check(dec!(4999999), now), Err(CouponRejection::BelowMinimum { .. })));
    }

    #[test]
    fn test_redeem_respects_limit() {
        let mut c = welcome10();
        c.redeem().unwrap();
        assert_eq!(c.used_count, 1);
        assert_eq!(c.redeem(), Err(CouponRejection::UsageExhausted("WELCOME10".into())));
        assert_eq!(c.used_count, 1);
    }
}
