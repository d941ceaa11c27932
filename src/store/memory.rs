//! In-process store.
//!
//! Every command runs under one mutex, so each is serializable. Commands
//! stage their stock changes on cloned products first and only swap them in
//! once every check has passed.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::hash_map::Entry;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU32, Ordering};
use uuid::Uuid;

use super::{CouponRedemption, OrderChange, OrderPlacement, Store, StoreError, StoreResult};
use crate::domain::aggregates::{
    Coupon, Order, Product, Shipment, StatusHistoryEntry, StockError, StockKey, StockLevel, StockMovement,
};
use crate::domain::value_objects::normalize_code;

#[derive(Default)]
struct Tables {
    products: HashMap<Uuid, Product>,
    coupons: HashMap<Uuid, Coupon>,
    coupon_codes: HashMap<String, Uuid>,
    redemptions: HashSet<(Uuid, Uuid)>,
    /// Rows are kept without history; history lives in `history`.
    orders: HashMap<Uuid, Order>,
    order_numbers: HashMap<String, Uuid>,
    history: HashMap<Uuid, Vec<StatusHistoryEntry>>,
    shipments: HashMap<Uuid, Shipment>,
    tracking_codes: HashSet<String>,
}

#[derive(Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
    injected_failures: AtomicU32,
    injected_collisions: AtomicU32,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_product(&self, product: Product) {
        self.tables.lock().products.insert(product.id, product);
    }

    pub fn insert_coupon(&self, coupon: Coupon) {
        let mut t = self.tables.lock();
        t.coupon_codes.insert(coupon.code.clone(), coupon.id);
        t.coupons.insert(coupon.id, coupon);
    }

    pub fn stock_level(&self, key: &StockKey) -> Option<StockLevel> {
        self.tables.lock().products.get(&key.product_id).and_then(|p| p.stock_level(key))
    }

    pub fn coupon(&self, code: &str) -> Option<Coupon> {
        let t = self.tables.lock();
        t.coupon_codes.get(&normalize_code(code)).and_then(|id| t.coupons.get(id)).cloned()
    }

    /// Make the next `n` write commands fail with a transient error.
    pub fn fail_next_writes(&self, n: u32) {
        self.injected_failures.store(n, Ordering::SeqCst);
    }

    /// The next `n` placements find their order number already in use.
    pub fn collide_next_order_numbers(&self, n: u32) {
        self.injected_collisions.store(n, Ordering::SeqCst);
    }

    fn injected_collision(&self) -> bool {
        self.injected_collisions
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }

    fn injected_failure(&self) -> StoreResult<()> {
        let hit = self
            .injected_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if hit {
            return Err(StoreError::Transient("injected failure".into()));
        }
        Ok(())
    }
}

fn stock_failure(m: &StockMovement, err: StockError) -> StoreError {
    match err {
        StockError::Insufficient { requested, available } => {
            StoreError::InsufficientStock { key: m.key, requested, available }
        }
        other => StoreError::Backend(format!("{:?} on {}: {}", m.op, m.key, other)),
    }
}

impl Tables {
    fn order_with_history(&self, id: &Uuid) -> Option<Order> {
        let mut order = self.orders.get(id)?.clone();
        order.status_history = self.history.get(id).cloned().unwrap_or_default();
        Some(order)
    }

    /// Apply movements to copies of the touched products.
    fn stage(&self, movements: &[StockMovement]) -> StoreResult<Vec<Product>> {
        let mut touched: HashMap<Uuid, Product> = HashMap::new();
        for m in movements {
            let product = match touched.entry(m.key.product_id) {
                Entry::Occupied(e) => e.into_mut(),
                Entry::Vacant(e) => {
                    let p = self
                        .products
                        .get(&m.key.product_id)
                        .cloned()
                        .ok_or_else(|| StoreError::NotFound(format!("product {}", m.key.product_id)))?;
                    e.insert(p)
                }
            };
            let mut level = product
                .stock_level(&m.key)
                .ok_or_else(|| StoreError::NotFound(format!("stock {}", m.key)))?;
            m.op.apply(&mut level, m.quantity).map_err(|e| stock_failure(m, e))?;
            product
                .set_stock_level(&m.key, level)
                .map_err(|e| StoreError::NotFound(e.to_string()))?;
        }
        Ok(touched.into_values().collect())
    }

    fn commit_products(&mut self, staged: Vec<Product>) {
        for p in staged {
            self.products.insert(p.id, p);
        }
    }

    fn check_version(&self, change: &OrderChange) -> StoreResult<()> {
        let current = self
            .orders
            .get(&change.order.id)
            .ok_or_else(|| StoreError::NotFound(format!("order {}", change.order.id)))?;
        if current.version != change.expected_version {
            return Err(StoreError::Conflict(format!(
                "order {} is at version {}, expected {}",
                current.order_number, current.version, change.expected_version
            )));
        }
        Ok(())
    }

    fn write_order(&mut self, order: &Order, appended: &[StatusHistoryEntry]) {
        let mut row = order.clone();
        row.status_history = Vec::new();
        self.order_numbers.insert(row.order_number.clone(), row.id);
        self.history.entry(row.id).or_default().extend_from_slice(appended);
        self.orders.insert(row.id, row);
    }

    /// Count the use on a copy. `None` if this order already redeemed it.
    fn redeemable(&self, redemption: &CouponRedemption) -> StoreResult<Option<Coupon>> {
        if self.redemptions.contains(&(redemption.coupon_id, redemption.order_id)) {
            return Ok(None);
        }
        let mut coupon = self
            .coupons
            .get(&redemption.coupon_id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(format!("coupon {}", redemption.code)))?;
        coupon
            .redeem()
            .map_err(|_| StoreError::UsageExhausted(coupon.code.clone()))?;
        Ok(Some(coupon))
    }

    fn redeem(&mut self, coupon: Coupon, order_id: Uuid) {
        self.redemptions.insert((coupon.id, order_id));
        self.coupons.insert(coupon.id, coupon);
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn product(&self, id: Uuid) -> StoreResult<Option<Product>> {
        Ok(self.tables.lock().products.get(&id).cloned())
    }

    async fn coupon_by_code(&self, code: &str) -> StoreResult<Option<Coupon>> {
        Ok(self.coupon(code))
    }

    async fn order(&self, id: Uuid) -> StoreResult<Option<Order>> {
        Ok(self.tables.lock().order_with_history(&id))
    }

    async fn order_by_number(&self, order_number: &str) -> StoreResult<Option<Order>> {
        let t = self.tables.lock();
        Ok(t.order_numbers.get(order_number).and_then(|id| t.order_with_history(id)))
    }

    async fn orders_for_user(&self, user_id: Uuid) -> StoreResult<Vec<Order>> {
        let t = self.tables.lock();
        let mut orders: Vec<Order> = t
            .orders
            .values()
            .filter(|o| o.user_id == Some(user_id))
            .filter_map(|o| t.order_with_history(&o.id))
            .collect();
        orders.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(orders)
    }

    async fn shipment(&self, id: Uuid) -> StoreResult<Option<Shipment>> {
        Ok(self.tables.lock().shipments.get(&id).cloned())
    }

    async fn active_shipment_for_order(&self, order_id: Uuid) -> StoreResult<Option<Shipment>> {
        let t = self.tables.lock();
        Ok(t.shipments.values().find(|s| s.order_id == order_id && s.is_active()).cloned())
    }

    async fn place_order(&self, placement: &OrderPlacement) -> StoreResult<()> {
        self.injected_failure()?;
        let mut t = self.tables.lock();
        let order = &placement.order;
        if self.injected_collision() {
            t.order_numbers.insert(order.order_number.clone(), Uuid::now_v7());
        }
        if t.order_numbers.contains_key(&order.order_number) {
            return Err(StoreError::OrderNumberTaken(order.order_number.clone()));
        }
        let staged = t.stage(&placement.reservations)?;
        let coupon = match &placement.coupon {
            Some(r) => t.redeemable(r)?,
            None => None,
        };

        t.commit_products(staged);
        if let Some(coupon) = coupon {
            t.redeem(coupon, order.id);
        }
        t.write_order(order, &order.status_history);
        Ok(())
    }

    async fn apply_order_change(&self, change: &OrderChange) -> StoreResult<()> {
        self.injected_failure()?;
        let mut t = self.tables.lock();
        t.check_version(change)?;
        let staged = t.stage(&change.movements)?;
        t.commit_products(staged);
        t.write_order(&change.order, &change.appended);
        Ok(())
    }

    async fn redeem_coupon(&self, redemption: &CouponRedemption) -> StoreResult<bool> {
        self.injected_failure()?;
        let mut t = self.tables.lock();
        match t.redeemable(redemption)? {
            Some(coupon) => {
                t.redeem(coupon, redemption.order_id);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn create_shipment(&self, shipment: &Shipment, change: &OrderChange) -> StoreResult<()> {
        self.injected_failure()?;
        let mut t = self.tables.lock();
        t.check_version(change)?;
        if t.shipments.values().any(|s| s.order_id == shipment.order_id && s.is_active()) {
            return Err(StoreError::Duplicate(format!("shipment for order {}", shipment.order_number)));
        }
        if t.tracking_codes.contains(&shipment.tracking_code) {
            return Err(StoreError::Duplicate(format!("tracking code {}", shipment.tracking_code)));
        }
        let staged = t.stage(&change.movements)?;

        t.commit_products(staged);
        t.write_order(&change.order, &change.appended);
        t.tracking_codes.insert(shipment.tracking_code.clone());
        t.shipments.insert(shipment.id, shipment.clone());
        Ok(())
    }

    async fn update_shipment(
        &self,
        shipment: &Shipment,
        expected_version: i64,
        change: Option<&OrderChange>,
    ) -> StoreResult<()> {
        self.injected_failure()?;
        let mut t = self.tables.lock();
        let current = t
            .shipments
            .get(&shipment.id)
            .ok_or_else(|| StoreError::NotFound(format!("shipment {}", shipment.id)))?;
        if current.version != expected_version {
            return Err(StoreError::Conflict(format!(
                "shipment {} is at version {}, expected {}",
                shipment.tracking_code, current.version, expected_version
            )));
        }
        let staged = match change {
            Some(c) => {
                t.check_version(c)?;
                t.stage(&c.movements)?
            }
            None => Vec::new(),
        };

        t.commit_products(staged);
        if let Some(c) = change {
            t.write_order(&c.order, &c.appended);
        }
        t.shipments.insert(shipment.id, shipment.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::aggregates::{NewOrder, OrderItem, PaymentMethod, ShippingAddress, StockOp};
    use crate::domain::value_objects::Actor;
    use rust_decimal_macros::dec;

    fn placement(key: StockKey, order_number: &str) -> OrderPlacement {
        let order = Order::place(
            NewOrder {
                order_number: order_number.into(),
                user_id: None,
                guest_email: Some("guest@example.vn".into()),
                guest_phone: Some("0912345678".into()),
                contact_email: "guest@example.vn".into(),
                items: vec![OrderItem::new(key, "CUP-1".into(), "Cup".into(), None, 1, dec!(40000))],
                discount_amount: dec!(0),
                shipping_fee: dec!(0),
                currency: "VND".into(),
                shipping_address: ShippingAddress {
                    full_name: "Tran Thi B".into(),
                    phone: "0912345678".into(),
                    address_line: "1 Hai Ba Trung".into(),
                    ..Default::default()
                },
                payment_method: PaymentMethod::Cod,
                coupon: None,
                note: None,
            },
            &Actor::system(),
        )
        .unwrap();
        let reservations = order.stock_movements(StockOp::Reserve);
        OrderPlacement { order, reservations, coupon: None }
    }

    #[tokio::test]
    async fn test_taken_order_number_is_retryable() {
        let store = MemoryStore::new();
        let product = Product::create("CUP-1", "Cup", dec!(40000), 5);
        let key = StockKey::product(product.id);
        store.insert_product(product);

        store.place_order(&placement(key, "ORD-20261019-00000001")).await.unwrap();
        let err = store.place_order(&placement(key, "ORD-20261019-00000001")).await.unwrap_err();
        assert!(matches!(err, StoreError::OrderNumberTaken(_)));
        assert!(err.is_retryable());
        assert_eq!(store.stock_level(&key), Some(StockLevel::new(5, 1)));
    }

    #[test]
    fn test_missing_reservation_is_not_retried() {
        let mut tables = Tables::default();
        let product = Product::create("CUP-1", "Cup", dec!(40000), 5);
        let key = StockKey::product(product.id);
        tables.products.insert(product.id, product);

        for op in [StockOp::Deduct, StockOp::Release] {
            let err = tables.stage(&[StockMovement { key, op, quantity: 2 }]).unwrap_err();
            assert!(matches!(err, StoreError::Backend(_)));
            assert!(!err.is_retryable());
        }
    }
}
