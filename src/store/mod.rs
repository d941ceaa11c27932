//! Persistence
//!
//! Reads are plain lookups. Every write is one command that a store applies
//! as a single unit of work: either all of its stock movements, coupon
//! redemption, order row and history entries land, or none do.
//!
//! Stock counters are updated with conditional writes ("add to `reserved`
//! only if `stock - reserved` covers it"), never read-then-write.

pub mod memory;
pub mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

use async_trait::async_trait;
use thiserror::Error;
use uuid::Uuid;

use crate::domain::aggregates::{
    stock_effect, Coupon, Order, OrderStatus, Product, Shipment, StatusHistoryEntry, StockKey, StockMovement,
    TransitionContext, TransitionError,
};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{0} not found")]
    NotFound(String),

    #[error("duplicate {0}")]
    Duplicate(String),

    /// Another order already holds the generated number. A fresh number fixes it.
    #[error("order number {0} is already taken")]
    OrderNumberTaken(String),

    #[error("concurrent modification: {0}")]
    Conflict(String),

    #[error("insufficient stock for {key}: requested {requested}, available {available}")]
    InsufficientStock { key: StockKey, requested: i64, available: i64 },

    #[error("coupon {0} has reached its usage limit")]
    UsageExhausted(String),

    #[error("transient storage failure: {0}")]
    Transient(String),

    #[error("storage backend error: {0}")]
    Backend(String),
}

impl StoreError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient(_) | Self::Conflict(_) | Self::OrderNumberTaken(_))
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Coupon use bound to the order that consumed it.
#[derive(Clone, Debug)]
pub struct CouponRedemption {
    pub coupon_id: Uuid,
    pub code: String,
    pub order_id: Uuid,
}

/// Everything `CreateOrder` writes.
#[derive(Clone, Debug)]
pub struct OrderPlacement {
    /// Carries its initial `pending` history entry.
    pub order: Order,
    pub reservations: Vec<StockMovement>,
    pub coupon: Option<CouponRedemption>,
}

/// A staged mutation of an existing order.
///
/// Applied only if the stored order still has `expected_version`.
#[derive(Clone, Debug)]
pub struct OrderChange {
    pub order: Order,
    pub expected_version: i64,
    pub movements: Vec<StockMovement>,
    pub appended: Vec<StatusHistoryEntry>,
    /// Status before the change, for event fan-out.
    pub previous: OrderStatus,
}

impl OrderChange {
    pub fn begin(current: &Order) -> Self {
        let mut order = current.clone();
        order.version = current.version + 1;
        Self {
            order,
            expected_version: current.version,
            movements: vec![],
            appended: vec![],
            previous: current.status(),
        }
    }

    /// Move the staged order along one edge, queueing the stock effect of that edge.
    pub fn transition(&mut self, to: OrderStatus, ctx: &TransitionContext) -> Result<(), TransitionError> {
        let from = self.order.status();
        let entry = self.order.transition(to, ctx)?;
        if let Some(op) = stock_effect(from, to) {
            self.movements.extend(self.order.stock_movements(op));
        }
        self.appended.push(entry);
        Ok(())
    }

    pub fn changes_status(&self) -> bool {
        !self.appended.is_empty()
    }
}

#[async_trait]
pub trait Store: Send + Sync {
    async fn product(&self, id: Uuid) -> StoreResult<Option<Product>>;

    async fn coupon_by_code(&self, code: &str) -> StoreResult<Option<Coupon>>;

    async fn order(&self, id: Uuid) -> StoreResult<Option<Order>>;

    async fn order_by_number(&self, order_number: &str) -> StoreResult<Option<Order>>;

    async fn orders_for_user(&self, user_id: Uuid) -> StoreResult<Vec<Order>>;

    async fn shipment(&self, id: Uuid) -> StoreResult<Option<Shipment>>;

    /// The non-cancelled shipment of an order, if any.
    async fn active_shipment_for_order(&self, order_id: Uuid) -> StoreResult<Option<Shipment>>;

    /// Reserve stock, redeem the coupon and insert the order, atomically.
    async fn place_order(&self, placement: &OrderPlacement) -> StoreResult<()>;

    /// Apply stock movements, rewrite the order row and append history, atomically.
    async fn apply_order_change(&self, change: &OrderChange) -> StoreResult<()>;

    /// Count one use of a coupon for an order. `Ok(false)` if this order already used it.
    async fn redeem_coupon(&self, redemption: &CouponRedemption) -> StoreResult<bool>;

    /// Insert a shipment together with the order change it causes.
    async fn create_shipment(&self, shipment: &Shipment, change: &OrderChange) -> StoreResult<()>;

    /// Rewrite a shipment stored at `expected_version`, plus the order change it cascades.
    async fn update_shipment(
        &self,
        shipment: &Shipment,
        expected_version: i64,
        change: Option<&OrderChange>,
    ) -> StoreResult<()>;
}
