//! Postgres store.
//!
//! Each write command is one transaction. Stock and coupon counters change
//! only through conditional `UPDATE`s whose `WHERE` clause carries the
//! invariant; a zero row count aborts the transaction. Movements are applied
//! in key order so concurrent orders lock rows in the same sequence.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::postgres::{PgConnection, PgPool};
use sqlx::types::Json;
use sqlx::FromRow;
use std::collections::HashMap;
use std::str::FromStr;
use uuid::Uuid;

use super::{CouponRedemption, OrderChange, OrderPlacement, Store, StoreError, StoreResult};
use crate::domain::aggregates::{
    Coupon, DiscountType, Order, OrderItem, Product, ProductStatus, Recipient, Shipment, ShippingAddress,
    StatusHistoryEntry, StockMovement, StockOp, TrackingEvent, UnknownValue, Variant,
};
use crate::domain::value_objects::{normalize_code, Actor};

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::RowNotFound => StoreError::NotFound("row".into()),
            sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
                StoreError::Transient(err.to_string())
            }
            sqlx::Error::Database(db) => match db.code().as_deref() {
                // serialization_failure, deadlock_detected
                Some("40001") | Some("40P01") => StoreError::Transient(db.message().to_string()),
                Some("23505") if db.constraint() == Some("orders_order_number_key") => {
                    StoreError::OrderNumberTaken(db.message().to_string())
                }
                Some("23505") => StoreError::Duplicate(db.constraint().unwrap_or("key").to_string()),
                _ => StoreError::Backend(db.message().to_string()),
            },
            _ => StoreError::Backend(err.to_string()),
        }
    }
}

fn decode<T: FromStr<Err = UnknownValue>>(value: &str) -> StoreResult<T> {
    value.parse().map_err(|e: UnknownValue| StoreError::Backend(e.to_string()))
}

// =============================================================================
// Rows
// =============================================================================

#[derive(FromRow)]
struct ProductRow {
    id: Uuid,
    sku: String,
    name: String,
    price: Decimal,
    stock: i64,
    reserved: i64,
    status: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

#[derive(FromRow)]
struct VariantRow {
    id: Uuid,
    sku: Option<String>,
    name: String,
    price: Option<Decimal>,
    stock: i64,
    reserved: i64,
}

#[derive(FromRow)]
struct CouponRow {
    id: Uuid,
    code: String,
    discount_type: String,
    discount_value: Decimal,
    min_purchase_amount: Decimal,
    max_discount_amount: Option<Decimal>,
    usage_limit: Option<i64>,
    used_count: i64,
    valid_from: DateTime<Utc>,
    valid_until: DateTime<Utc>,
    is_active: bool,
}

impl TryFrom<CouponRow> for Coupon {
    type Error = StoreError;

    fn try_from(r: CouponRow) -> StoreResult<Self> {
        let discount_type = DiscountType::parse(&r.discount_type)
            .ok_or_else(|| StoreError::Backend(format!("unknown discount type {}", r.discount_type)))?;
        Ok(Coupon {
            id: r.id,
            code: r.code,
            discount_type,
            discount_value: r.discount_value,
            min_purchase_amount: r.min_purchase_amount,
            max_discount_amount: r.max_discount_amount,
            usage_limit: r.usage_limit,
            used_count: r.used_count,
            valid_from: r.valid_from,
            valid_until: r.valid_until,
            is_active: r.is_active,
        })
    }
}

#[derive(FromRow)]
struct OrderRow {
    id: Uuid,
    order_number: String,
    user_id: Option<Uuid>,
    guest_email: Option<String>,
    guest_phone: Option<String>,
    contact_email: String,
    items: Json<Vec<OrderItem>>,
    subtotal: Decimal,
    discount_amount: Decimal,
    shipping_fee: Decimal,
    total_amount: Decimal,
    currency: String,
    shipping_address: Json<ShippingAddress>,
    payment_method: String,
    payment_status: String,
    status: String,
    coupon_code: Option<String>,
    coupon_id: Option<Uuid>,
    tracking_number: Option<String>,
    shipping_company: Option<String>,
    note: Option<String>,
    confirmed_at: Option<DateTime<Utc>>,
    paid_at: Option<DateTime<Utc>>,
    shipped_at: Option<DateTime<Utc>>,
    delivered_at: Option<DateTime<Utc>>,
    cancelled_at: Option<DateTime<Utc>>,
    cancellation_reason: Option<String>,
    cancelled_by: Option<String>,
    version: i64,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

#[derive(FromRow)]
struct HistoryRow {
    order_id: Uuid,
    status: String,
    actor: Json<Actor>,
    note: Option<String>,
    tracking_number: Option<String>,
    created_at: DateTime<Utc>,
}

impl HistoryRow {
    fn into_entry(self) -> StoreResult<StatusHistoryEntry> {
        Ok(StatusHistoryEntry {
            status: decode(&self.status)?,
            timestamp: self.created_at,
            actor: self.actor.0,
            note: self.note,
            tracking_number: self.tracking_number,
        })
    }
}

impl OrderRow {
    fn into_order(self, history: Vec<StatusHistoryEntry>) -> StoreResult<Order> {
        Ok(Order {
            id: self.id,
            order_number: self.order_number,
            user_id: self.user_id,
            guest_email: self.guest_email,
            guest_phone: self.guest_phone,
            contact_email: self.contact_email,
            items: self.items.0,
            subtotal: self.subtotal,
            discount_amount: self.discount_amount,
            shipping_fee: self.shipping_fee,
            total_amount: self.total_amount,
            currency: self.currency,
            shipping_address: self.shipping_address.0,
            payment_method: decode(&self.payment_method)?,
            payment_status: decode(&self.payment_status)?,
            status: decode(&self.status)?,
            status_history: history,
            coupon_code: self.coupon_code,
            coupon_id: self.coupon_id,
            tracking_number: self.tracking_number,
            shipping_company: self.shipping_company,
            note: self.note,
            confirmed_at: self.confirmed_at,
            paid_at: self.paid_at,
            shipped_at: self.shipped_at,
            delivered_at: self.delivered_at,
            cancelled_at: self.cancelled_at,
            cancellation_reason: self.cancellation_reason,
            cancelled_by: self.cancelled_by,
            version: self.version,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

#[derive(FromRow)]
struct ShipmentRow {
    id: Uuid,
    order_id: Uuid,
    order_number: String,
    tracking_code: String,
    shipping_provider: String,
    shipping_status: String,
    recipient: Json<Recipient>,
    shipping_fee: Decimal,
    cod_amount: Decimal,
    tracking_history: Json<Vec<TrackingEvent>>,
    version: i64,
    delivered_at: Option<DateTime<Utc>>,
    cancelled_at: Option<DateTime<Utc>>,
    cancel_reason: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<ShipmentRow> for Shipment {
    type Error = StoreError;

    fn try_from(r: ShipmentRow) -> StoreResult<Self> {
        Ok(Shipment {
            id: r.id,
            order_id: r.order_id,
            order_number: r.order_number,
            tracking_code: r.tracking_code,
            shipping_provider: r.shipping_provider,
            shipping_status: decode(&r.shipping_status)?,
            recipient: r.recipient.0,
            shipping_fee: r.shipping_fee,
            cod_amount: r.cod_amount,
            tracking_history: r.tracking_history.0,
            version: r.version,
            delivered_at: r.delivered_at,
            cancelled_at: r.cancelled_at,
            cancel_reason: r.cancel_reason,
            created_at: r.created_at,
            updated_at: r.updated_at,
        })
    }
}

// =============================================================================
// Statement helpers
// =============================================================================

const ORDER_SELECT: &str = "SELECT id, order_number, user_id, guest_email, guest_phone, contact_email, items, \
     subtotal, discount_amount, shipping_fee, total_amount, currency, shipping_address, payment_method, \
     payment_status, status, coupon_code, coupon_id, tracking_number, shipping_company, note, confirmed_at, \
     paid_at, shipped_at, delivered_at, cancelled_at, cancellation_reason, cancelled_by, version, created_at, \
     updated_at FROM orders";

const SHIPMENT_SELECT: &str = "SELECT id, order_id, order_number, tracking_code, shipping_provider, \
     shipping_status, recipient, shipping_fee, cod_amount, tracking_history, version, delivered_at, \
     cancelled_at, cancel_reason, created_at, updated_at FROM shipments";

async fn load_history(conn: &mut PgConnection, order_ids: &[Uuid]) -> StoreResult<HashMap<Uuid, Vec<StatusHistoryEntry>>> {
    let rows = sqlx::query_as::<_, HistoryRow>(
        "SELECT order_id, status, actor, note, tracking_number, created_at FROM order_status_history \
         WHERE order_id = ANY($1) ORDER BY id",
    )
    .bind(order_ids)
    .fetch_all(&mut *conn)
    .await?;
    let mut grouped: HashMap<Uuid, Vec<StatusHistoryEntry>> = HashMap::new();
    for row in rows {
        let order_id = row.order_id;
        grouped.entry(order_id).or_default().push(row.into_entry()?);
    }
    Ok(grouped)
}

async fn assemble(conn: &mut PgConnection, rows: Vec<OrderRow>) -> StoreResult<Vec<Order>> {
    let ids: Vec<Uuid> = rows.iter().map(|r| r.id).collect();
    let mut history = load_history(conn, &ids).await?;
    rows.into_iter()
        .map(|r| {
            let h = history.remove(&r.id).unwrap_or_default();
            r.into_order(h)
        })
        .collect()
}

async fn append_history(conn: &mut PgConnection, order_id: Uuid, entries: &[StatusHistoryEntry]) -> StoreResult<()> {
    for e in entries {
        sqlx::query(
            "INSERT INTO order_status_history (order_id, status, actor, note, tracking_number, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6)",
        )
        .bind(order_id)
        .bind(e.status.as_str())
        .bind(Json(&e.actor))
        .bind(&e.note)
        .bind(&e.tracking_number)
        .bind(e.timestamp)
        .execute(&mut *conn)
        .await?;
    }
    Ok(())
}

/// One conditional counter update. Zero rows means the guard failed.
async fn apply_movement(conn: &mut PgConnection, m: &StockMovement) -> StoreResult<()> {
    let (set, guard) = match m.op {
        StockOp::Reserve => ("reserved = reserved + $2", "stock - reserved >= $2"),
        StockOp::Deduct => ("stock = stock - $2, reserved = reserved - $2", "reserved >= $2"),
        StockOp::Release => ("reserved = reserved - $2", "reserved >= $2"),
        StockOp::Restock => ("stock = stock + $2", "$2 > 0"),
    };
    let done = match m.key.variant_id {
        Some(variant_id) => {
            let sql = format!("UPDATE product_variants SET {set} WHERE id = $1 AND product_id = $3 AND {guard}");
            sqlx::query(&sql)
                .bind(variant_id)
                .bind(m.quantity)
                .bind(m.key.product_id)
                .execute(&mut *conn)
                .await?
        }
        None => {
            let sql = format!("UPDATE products SET {set}, updated_at = NOW() WHERE id = $1 AND {guard}");
            sqlx::query(&sql).bind(m.key.product_id).bind(m.quantity).execute(&mut *conn).await?
        }
    };
    if done.rows_affected() == 1 {
        return Ok(());
    }

    let current: Option<(i64, i64)> = match m.key.variant_id {
        Some(variant_id) => {
            sqlx::query_as("SELECT stock, reserved FROM product_variants WHERE id = $1 AND product_id = $2")
                .bind(variant_id)
                .bind(m.key.product_id)
                .fetch_optional(&mut *conn)
                .await?
        }
        None => {
            sqlx::query_as("SELECT stock, reserved FROM products WHERE id = $1")
                .bind(m.key.product_id)
                .fetch_optional(&mut *conn)
                .await?
        }
    };
    Err(match (current, m.op) {
        (None, _) => StoreError::NotFound(format!("stock {}", m.key)),
        (Some((stock, reserved)), StockOp::Reserve) => StoreError::InsufficientStock {
            key: m.key,
            requested: m.quantity,
            available: stock - reserved,
        },
        (Some((stock, reserved)), op) => StoreError::Backend(format!(
            "{op:?} of {} on {} rejected (stock {stock}, reserved {reserved})",
            m.quantity, m.key
        )),
    })
}

async fn apply_movements(conn: &mut PgConnection, movements: &[StockMovement]) -> StoreResult<()> {
    let mut ordered: Vec<&StockMovement> = movements.iter().collect();
    ordered.sort_by_key(|m| (m.key.product_id, m.key.variant_id));
    for m in ordered {
        apply_movement(conn, m).await?;
    }
    Ok(())
}

/// Returns `false` if this order already holds a redemption of the coupon.
async fn redeem_in(conn: &mut PgConnection, r: &CouponRedemption) -> StoreResult<bool> {
    let inserted = sqlx::query(
        "INSERT INTO coupon_redemptions (coupon_id, order_id) VALUES ($1, $2) ON CONFLICT DO NOTHING",
    )
    .bind(r.coupon_id)
    .bind(r.order_id)
    .execute(&mut *conn)
    .await?;
    if inserted.rows_affected() == 0 {
        return Ok(false);
    }
    let counted = sqlx::query(
        "UPDATE coupons SET used_count = used_count + 1 \
         WHERE id = $1 AND (usage_limit IS NULL OR used_count < usage_limit)",
    )
    .bind(r.coupon_id)
    .execute(&mut *conn)
    .await?;
    if counted.rows_affected() == 0 {
        return Err(StoreError::UsageExhausted(r.code.clone()));
    }
    Ok(true)
}

async fn insert_order(conn: &mut PgConnection, o: &Order) -> StoreResult<()> {
    sqlx::query(
        "INSERT INTO orders (id, order_number, user_id, guest_email, guest_phone, contact_email, items, subtotal, \
         discount_amount, shipping_fee, total_amount, currency, shipping_address, payment_method, payment_status, \
         status, coupon_code, coupon_id, tracking_number, shipping_company, note, confirmed_at, paid_at, shipped_at, \
         delivered_at, cancelled_at, cancellation_reason, cancelled_by, version, created_at, updated_at) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18, $19, $20, $21, \
         $22, $23, $24, $25, $26, $27, $28, $29, $30, $31)",
    )
    .bind(o.id)
    .bind(&o.order_number)
    .bind(o.user_id)
    .bind(&o.guest_email)
    .bind(&o.guest_phone)
    .bind(&o.contact_email)
    .bind(Json(&o.items))
    .bind(o.subtotal)
    .bind(o.discount_amount)
    .bind(o.shipping_fee)
    .bind(o.total_amount)
    .bind(&o.currency)
    .bind(Json(&o.shipping_address))
    .bind(o.payment_method.as_str())
    .bind(o.payment_status.as_str())
    .bind(o.status.as_str())
    .bind(&o.coupon_code)
    .bind(o.coupon_id)
    .bind(&o.tracking_number)
    .bind(&o.shipping_company)
    .bind(&o.note)
    .bind(o.confirmed_at)
    .bind(o.paid_at)
    .bind(o.shipped_at)
    .bind(o.delivered_at)
    .bind(o.cancelled_at)
    .bind(&o.cancellation_reason)
    .bind(&o.cancelled_by)
    .bind(o.version)
    .bind(o.created_at)
    .bind(o.updated_at)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

/// Rewrite the mutable columns if nobody got there first.
async fn update_order(conn: &mut PgConnection, change: &OrderChange) -> StoreResult<()> {
    let o = &change.order;
    let done = sqlx::query(
        "UPDATE orders SET payment_status = $3, status = $4, tracking_number = $5, shipping_company = $6, \
         confirmed_at = $7, paid_at = $8, shipped_at = $9, delivered_at = $10, cancelled_at = $11, \
         cancellation_reason = $12, cancelled_by = $13, version = $14, updated_at = $15 \
         WHERE id = $1 AND version = $2",
    )
    .bind(o.id)
    .bind(change.expected_version)
    .bind(o.payment_status.as_str())
    .bind(o.status.as_str())
    .bind(&o.tracking_number)
    .bind(&o.shipping_company)
    .bind(o.confirmed_at)
    .bind(o.paid_at)
    .bind(o.shipped_at)
    .bind(o.delivered_at)
    .bind(o.cancelled_at)
    .bind(&o.cancellation_reason)
    .bind(&o.cancelled_by)
    .bind(o.version)
    .bind(o.updated_at)
    .execute(&mut *conn)
    .await?;
    if done.rows_affected() == 0 {
        return Err(StoreError::Conflict(format!(
            "order {} changed since version {}",
            o.order_number, change.expected_version
        )));
    }
    Ok(())
}

async fn write_change(conn: &mut PgConnection, change: &OrderChange) -> StoreResult<()> {
    update_order(conn, change).await?;
    apply_movements(conn, &change.movements).await?;
    append_history(conn, change.order.id, &change.appended).await
}

// =============================================================================
// Store
// =============================================================================

#[async_trait]
impl Store for PgStore {
    async fn product(&self, id: Uuid) -> StoreResult<Option<Product>> {
        let mut conn = self.pool.acquire().await?;
        let Some(row) = sqlx::query_as::<_, ProductRow>(
            "SELECT id, sku, name, price, stock, reserved, status, created_at, updated_at FROM products WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?
        else {
            return Ok(None);
        };
        let variants = sqlx::query_as::<_, VariantRow>(
            "SELECT id, sku, name, price, stock, reserved FROM product_variants WHERE product_id = $1 ORDER BY position, id",
        )
        .bind(id)
        .fetch_all(&mut *conn)
        .await?;
        let status = ProductStatus::parse(&row.status)
            .ok_or_else(|| StoreError::Backend(format!("unknown product status {}", row.status)))?;
        Ok(Some(Product {
            id: row.id,
            sku: row.sku,
            name: row.name,
            price: row.price,
            stock: row.stock,
            reserved: row.reserved,
            status,
            variants: variants
                .into_iter()
                .map(|v| Variant { id: v.id, sku: v.sku, name: v.name, price: v.price, stock: v.stock, reserved: v.reserved })
                .collect(),
            created_at: row.created_at,
            updated_at: row.updated_at,
        }))
    }

    async fn coupon_by_code(&self, code: &str) -> StoreResult<Option<Coupon>> {
        sqlx::query_as::<_, CouponRow>(
            "SELECT id, code, discount_type, discount_value, min_purchase_amount, max_discount_amount, usage_limit, \
             used_count, valid_from, valid_until, is_active FROM coupons WHERE code = $1",
        )
        .bind(normalize_code(code))
        .fetch_optional(&self.pool)
        .await?
        .map(Coupon::try_from)
        .transpose()
    }

    async fn order(&self, id: Uuid) -> StoreResult<Option<Order>> {
        let mut conn = self.pool.acquire().await?;
        let rows = sqlx::query_as::<_, OrderRow>(&format!("{ORDER_SELECT} WHERE id = $1"))
            .bind(id)
            .fetch_all(&mut *conn)
            .await?;
        Ok(assemble(&mut conn, rows).await?.pop())
    }

    async fn order_by_number(&self, order_number: &str) -> StoreResult<Option<Order>> {
        let mut conn = self.pool.acquire().await?;
        let rows = sqlx::query_as::<_, OrderRow>(&format!("{ORDER_SELECT} WHERE order_number = $1"))
            .bind(order_number)
            .fetch_all(&mut *conn)
            .await?;
        Ok(assemble(&mut conn, rows).await?.pop())
    }

    async fn orders_for_user(&self, user_id: Uuid) -> StoreResult<Vec<Order>> {
        let mut conn = self.pool.acquire().await?;
        let rows = sqlx::query_as::<_, OrderRow>(&format!("{ORDER_SELECT} WHERE user_id = $1 ORDER BY created_at DESC"))
            .bind(user_id)
            .fetch_all(&mut *conn)
            .await?;
        assemble(&mut conn, rows).await
    }

    async fn shipment(&self, id: Uuid) -> StoreResult<Option<Shipment>> {
        sqlx::query_as::<_, ShipmentRow>(&format!("{SHIPMENT_SELECT} WHERE id = $1"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .map(Shipment::try_from)
            .transpose()
    }

    async fn active_shipment_for_order(&self, order_id: Uuid) -> StoreResult<Option<Shipment>> {
        sqlx::query_as::<_, ShipmentRow>(&format!(
            "{SHIPMENT_SELECT} WHERE order_id = $1 AND shipping_status <> 'cancelled'"
        ))
        .bind(order_id)
        .fetch_optional(&self.pool)
        .await?
        .map(Shipment::try_from)
        .transpose()
    }

    async fn place_order(&self, placement: &OrderPlacement) -> StoreResult<()> {
        let mut tx = self.pool.begin().await?;
        apply_movements(&mut tx, &placement.reservations).await?;
        if let Some(redemption) = &placement.coupon {
            redeem_in(&mut tx, redemption).await?;
        }
        insert_order(&mut tx, &placement.order).await?;
        append_history(&mut tx, placement.order.id, &placement.order.status_history).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn apply_order_change(&self, change: &OrderChange) -> StoreResult<()> {
        let mut tx = self.pool.begin().await?;
        write_change(&mut tx, change).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn redeem_coupon(&self, redemption: &CouponRedemption) -> StoreResult<bool> {
        let mut tx = self.pool.begin().await?;
        let counted = redeem_in(&mut tx, redemption).await?;
        tx.commit().await?;
        Ok(counted)
    }

    async fn create_shipment(&self, s: &Shipment, change: &OrderChange) -> StoreResult<()> {
        let mut tx = self.pool.begin().await?;
        write_change(&mut tx, change).await?;
        sqlx::query(
            "INSERT INTO shipments (id, order_id, order_number, tracking_code, shipping_provider, shipping_status, \
             recipient, shipping_fee, cod_amount, tracking_history, version, delivered_at, cancelled_at, cancel_reason, \
             created_at, updated_at) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16)",
        )
        .bind(s.id)
        .bind(s.order_id)
        .bind(&s.order_number)
        .bind(&s.tracking_code)
        .bind(&s.shipping_provider)
        .bind(s.shipping_status.as_str())
        .bind(Json(&s.recipient))
        .bind(s.shipping_fee)
        .bind(s.cod_amount)
        .bind(Json(&s.tracking_history))
        .bind(s.version)
        .bind(s.delivered_at)
        .bind(s.cancelled_at)
        .bind(&s.cancel_reason)
        .bind(s.created_at)
        .bind(s.updated_at)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(())
    }

    async fn update_shipment(&self, s: &Shipment, expected_version: i64, change: Option<&OrderChange>) -> StoreResult<()> {
        let mut tx = self.pool.begin().await?;
        let done = sqlx::query(
            "UPDATE shipments SET shipping_status = $3, tracking_history = $4, version = $5, delivered_at = $6, \
             cancelled_at = $7, cancel_reason = $8, updated_at = $9 WHERE id = $1 AND version = $2",
        )
        .bind(s.id)
        .bind(expected_version)
        .bind(s.shipping_status.as_str())
        .bind(Json(&s.tracking_history))
        .bind(s.version)
        .bind(s.delivered_at)
        .bind(s.cancelled_at)
        .bind(&s.cancel_reason)
        .bind(s.updated_at)
        .execute(&mut *tx)
        .await?;
        if done.rows_affected() == 0 {
            return Err(StoreError::Conflict(format!(
                "shipment {} changed since version {expected_version}",
                s.tracking_code
            )));
        }
        if let Some(change) = change {
            write_change(&mut tx, change).await?;
        }
        tx.commit().await?;
        Ok(())
    }
}
