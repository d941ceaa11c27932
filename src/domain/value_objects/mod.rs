//! Value Objects for checkout

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Vietnamese mobile number: `0` or `+84`/`84` prefix, carrier digit 3/5/7/8/9, eight more digits.
pub static VN_MOBILE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?:\+?84|0)[35789][0-9]{8}$").expect("mobile number pattern is valid")
});

/// Strip the separators people type into phone fields.
pub fn normalize_phone(raw: &str) -> String {
    raw.chars().filter(|c| !matches!(c, ' ' | '.' | '-' | '(' | ')')).collect()
}

/// Canonical form of a coupon code.
pub fn normalize_code(raw: &str) -> String {
    raw.trim().to_uppercase()
}

/// Human-facing order number, e.g. `ORD-20261019-04821377`.
///
/// Not guaranteed unique; stores reject a taken number and placement retries with a new one.
pub fn next_order_number(now: DateTime<Utc>) -> String {
    format!("ORD-{}-{:08}", now.format("%Y%m%d"), rand::random::<u32>() % 100_000_000)
}

/// Who is asking for a mutation.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    #[default]
    Guest,
    Customer,
    Admin,
    System,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Role::Guest => "guest",
            Role::Customer => "customer",
            Role::Admin => "admin",
            Role::System => "system",
        };
        f.write_str(s)
    }
}

/// Identity attached to every engine call and to every history entry it writes.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    pub role: Role,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<Uuid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
}

impl Actor {
    pub fn admin(user_id: Uuid) -> Self {
        Self { role: Role::Admin, user_id: Some(user_id), email: None }
    }

    pub fn customer(user_id: Uuid) -> Self {
        Self { role: Role::Customer, user_id: Some(user_id), email: None }
    }

    pub fn guest(email: Option<String>) -> Self {
        Self { role: Role::Guest, user_id: None, email }
    }

    pub fn system() -> Self {
        Self { role: Role::System, user_id: None, email: None }
    }

    pub fn is_admin(&self) -> bool {
        matches!(self.role, Role::Admin | Role::System)
    }

    /// Short label stored as `cancelled_by`.
    pub fn label(&self) -> String {
        match (&self.user_id, &self.email) {
            (Some(id), _) => format!("{}:{}", self.role, id),
            (None, Some(email)) => format!("{}:{}", self.role, email),
            (None, None) => self.role.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mobile_pattern() {
        for ok in ["0912345678", "+84912345678", "84387654321", "0701234567"] {
            assert!(VN_MOBILE.is_match(ok), "{ok}");
        }
        for bad in ["0212345678", "091234567", "09123456789", "+1912345678", "abc"] {
            assert!(!VN_MOBILE.is_match(bad), "{bad}");
        }
        assert_eq!(normalize_phone("091 234-5678"), "0912345678");
    }

    #[test]
    fn test_order_number_shape() {
        let n = next_order_number(Utc::now());
        assert!(n.starts_with("ORD-"));
        assert_eq!(n.len(), "ORD-20261019-00000000".len());
    }

    #[test]
    fn test_actor_label() {
        assert_eq!(Actor::system().label(), "system");
        assert_eq!(Actor::guest(Some("a@b.vn".into())).label(), "guest:a@b.vn");
        assert!(Actor::system().is_admin());
        assert!(!Actor::customer(Uuid::nil()).is_admin());
    }
}
