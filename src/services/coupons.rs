//! Coupon Ledger
//!
//! Quotes a discount for a subtotal and counts redemptions. The count is
//! only ever moved by a conditional store write, once per order.

use chrono::Utc;
use rust_decimal::Decimal;
use serde::Serialize;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

use crate::domain::aggregates::{Coupon, CouponRejection};
use crate::domain::value_objects::normalize_code;
use crate::store::{CouponRedemption, Store};
use crate::{CommerceError, Result};

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct CouponQuote {
    pub coupon_id: Uuid,
    pub code: String,
    pub discount: Decimal,
    pub final_amount: Decimal,
}

#[derive(Clone)]
pub struct CouponLedger {
    store: Arc<dyn Store>,
}

impl CouponLedger {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    async fn find(&self, code: &str) -> Result<Coupon> {
        let code = normalize_code(code);
        if code.is_empty() {
            return Err(CommerceError::Validation("coupon code is empty".into()));
        }
        self.store
            .coupon_by_code(&code)
            .await?
            .ok_or(CommerceError::Coupon(CouponRejection::NotFound(code)))
    }

    /// Check a code against a subtotal without consuming it.
    pub async fn validate(&self, code: &str, subtotal: Decimal) -> Result<CouponQuote> {
        if subtotal < Decimal::ZERO {
            return Err(CommerceError::Validation("subtotal cannot be negative".into()));
        }
        let coupon = self.find(code).await?;
        let discount = coupon.check(subtotal, Utc::now())?;
        Ok(CouponQuote {
            coupon_id: coupon.id,
            code: coupon.code,
            discount,
            final_amount: subtotal - discount,
        })
    }

    /// Count one use of `code` for `order_id`.
    ///
    /// Returns `false` when this order had already redeemed the coupon, in
    /// which case nothing changes.
    pub async fn redeem(&self, code: &str, order_id: Uuid) -> Result<bool> {
        let coupon = self.find(code).await?;
        let redemption = CouponRedemption { coupon_id: coupon.id, code: coupon.code.clone(), order_id };
        let counted = self.store.redeem_coupon(&redemption).await?;
        if counted {
            info!(code = %coupon.code, %order_id, "coupon redeemed");
        }
        Ok(counted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use chrono::Duration;
    use rust_decimal_macros::dec;

    fn ledger_with(coupon: Coupon) -> (CouponLedger, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        store.insert_coupon(coupon);
        (CouponLedger::new(store.clone()), store)
    }

    fn welcome10() -> Coupon {
        let now = Utc::now();
        Coupon::percentage("WELCOME10", dec!(10), now - Duration::days(1), now + Duration::days(7))
            .with_minimum(dec!(5000000))
            .with_cap(dec!(2000000))
            .with_usage_limit(1)
    }

    #[tokio::test]
    async fn test_validate_quotes_capped_discount() {
        let (ledger, _) = ledger_with(welcome10());
        let quote = ledger.validate(" welcome10 ", dec!(20000000)).await.unwrap();
        assert_eq!(quote.discount, dec!(2000000));
        assert_eq!(quote.final_amount, dec!(18000000));
    }

    #[tokio::test]
    async fn test_unknown_code() {
        let (ledger, _) = ledger_with(welcome10());
        let err = ledger.validate("NOPE", dec!(1)).await.unwrap_err();
        assert_eq!(err.code(), "coupon_not_found");
    }

    #[tokio::test]
    async fn test_redeem_once_per_order_and_respect_limit() {
        let (ledger, store) = ledger_with(welcome10());
        let order_id = Uuid::now_v7();
        assert!(ledger.redeem("WELCOME10", order_id).await.unwrap());
        assert!(!ledger.redeem("WELCOME10", order_id).await.unwrap());
        assert_eq!(store.coupon("WELCOME10").unwrap().used_count, 1);

        let err = ledger.redeem("WELCOME10", Uuid::now_v7()).await.unwrap_err();
        assert!(matches!(err, CommerceError::Coupon(CouponRejection::UsageExhausted(_))));
        assert_eq!(store.coupon("WELCOME10").unwrap().used_count, 1);
    }
}
