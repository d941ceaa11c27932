//! Order Aggregate
//!
//! `Order::transition` is the only code that writes `status`. It checks the
//! transition table, applies the status-linked field changes and appends one
//! history entry per status change.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use uuid::Uuid;
use validator::{Validate, ValidationError};

use crate::domain::aggregates::product::{StockKey, StockMovement, StockOp};
use crate::domain::value_objects::{Actor, Role};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unrecognized {kind}: {value}")]
pub struct UnknownValue {
    pub kind: &'static str,
    pub value: String,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    #[default]
    Pending,
    Confirmed,
    #[serde(alias = "processing")]
    ShippingReady,
    #[serde(alias = "shipped")]
    ShippingCreated,
    Delivering,
    #[serde(alias = "delivered")]
    Completed,
    Cancelled,
    #[serde(alias = "refunded")]
    Returned,
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Confirmed => "confirmed",
            Self::ShippingReady => "shipping_ready",
            Self::ShippingCreated => "shipping_created",
            Self::Delivering => "delivering",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
            Self::Returned => "returned",
        }
    }
}

impl FromStr for OrderStatus {
    type Err = UnknownValue;

    /// Accepts the legacy names written by older deployments.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "confirmed" => Ok(Self::Confirmed),
            "shipping_ready" | "processing" => Ok(Self::ShippingReady),
            "shipping_created" | "shipped" => Ok(Self::ShippingCreated),
            "delivering" => Ok(Self::Delivering),
            "completed" | "delivered" => Ok(Self::Completed),
            "cancelled" => Ok(Self::Cancelled),
            "returned" | "refunded" => Ok(Self::Returned),
            other => Err(UnknownValue { kind: "order status", value: other.to_string() }),
        }
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    Cod,
    BankTransfer,
    Momo,
    Zalopay,
    Vnpay,
    Stripe,
    QrCode,
}

impl PaymentMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Cod => "cod",
            Self::BankTransfer => "bank_transfer",
            Self::Momo => "momo",
            Self::Zalopay => "zalopay",
            Self::Vnpay => "vnpay",
            Self::Stripe => "stripe",
            Self::QrCode => "qr_code",
        }
    }
}

impl FromStr for PaymentMethod {
    type Err = UnknownValue;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "cod" => Ok(Self::Cod),
            "bank_transfer" => Ok(Self::BankTransfer),
            "momo" => Ok(Self::Momo),
            "zalopay" => Ok(Self::Zalopay),
            "vnpay" => Ok(Self::Vnpay),
            "stripe" => Ok(Self::Stripe),
            "qr_code" => Ok(Self::QrCode),
            other => Err(UnknownValue { kind: "payment method", value: other.to_string() }),
        }
    }
}

impl fmt::Display for PaymentMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    #[default]
    Unpaid,
    Paid,
    Cod,
    Failed,
    Refunded,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unpaid => "unpaid",
            Self::Paid => "paid",
            Self::Cod => "cod",
            Self::Failed => "failed",
            Self::Refunded => "refunded",
        }
    }

    /// Paid up front, or collected on delivery: either way the parcel may leave.
    pub fn is_settled(&self) -> bool {
        matches!(self, Self::Paid | Self::Cod)
    }

    pub fn initial_for(method: PaymentMethod) -> Self {
        match method {
            PaymentMethod::Cod => Self::Cod,
            _ => Self::Unpaid,
        }
    }
}

impl FromStr for PaymentStatus {
    type Err = UnknownValue;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "unpaid" | "pending" => Ok(Self::Unpaid),
            "paid" => Ok(Self::Paid),
            "cod" => Ok(Self::Cod),
            "failed" => Ok(Self::Failed),
            "refunded" => Ok(Self::Refunded),
            other => Err(UnknownValue { kind: "payment status", value: other.to_string() }),
        }
    }
}

impl fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Delivery address, snapshotted into the order and never edited afterwards.
///
/// The locality is either coded (`*_code` from the province registry) or free
/// text; one complete form is required.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, Validate)]
#[validate(schema(function = "validate_locality"))]
pub struct ShippingAddress {
    #[validate(length(min = 1, max = 120, message = "recipient name is required"))]
    pub full_name: String,
    #[validate(regex(
        path = "crate::domain::value_objects::VN_MOBILE",
        message = "phone must be a Vietnamese mobile number"
    ))]
    pub phone: String,
    #[validate(length(min = 1, max = 255, message = "street address is required"))]
    pub address_line: String,
    #[serde(default)]
    pub city: Option<String>,
    #[serde(default)]
    pub district: Option<String>,
    #[serde(default)]
    pub ward: Option<String>,
    #[serde(default)]
    pub city_code: Option<i32>,
    #[serde(default)]
    pub district_code: Option<i32>,
    #[serde(default)]
    pub ward_code: Option<i32>,
}

fn validate_locality(address: &ShippingAddress) -> Result<(), ValidationError> {
    if address.full_name.trim().is_empty() || address.address_line.trim().is_empty() {
        return Err(ValidationError::new("blank_address_field"));
    }
    let coded = address.city_code.is_some() && address.district_code.is_some() && address.ward_code.is_some();
    let filled = |v: &Option<String>| v.as_deref().is_some_and(|s| !s.trim().is_empty());
    let named = filled(&address.city) && filled(&address.district) && filled(&address.ward);
    if coded || named {
        Ok(())
    } else {
        Err(ValidationError::new("locality_required"))
    }
}

impl ShippingAddress {
    pub fn one_line(&self) -> String {
        let parts = [&self.ward, &self.district, &self.city];
        let mut out = self.address_line.trim().to_string();
        for part in parts.into_iter().flatten() {
            if !part.trim().is_empty() {
                out.push_str(", ");
                out.push_str(part.trim());
            }
        }
        out
    }
}

/// A line as it was priced when the order was placed.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderItem {
    pub product_id: Uuid,
    pub variant_id: Option<Uuid>,
    pub sku: String,
    pub name: String,
    pub variant_name: Option<String>,
    pub quantity: u32,
    pub unit_price: Decimal,
    pub subtotal: Decimal,
}

impl OrderItem {
    pub fn new(key: StockKey, sku: String, name: String, variant_name: Option<String>, quantity: u32, unit_price: Decimal) -> Self {
        Self {
            product_id: key.product_id,
            variant_id: key.variant_id,
            sku,
            name,
            variant_name,
            quantity,
            unit_price,
            subtotal: unit_price * Decimal::from(quantity),
        }
    }

    pub fn stock_key(&self) -> StockKey {
        StockKey { product_id: self.product_id, variant_id: self.variant_id }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusHistoryEntry {
    pub status: OrderStatus,
    pub timestamp: DateTime<Utc>,
    pub actor: Actor,
    #[serde(default)]
    pub note: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tracking_number: Option<String>,
}

/// Who and why, carried into the history entry a transition writes.
#[derive(Clone, Debug)]
pub struct TransitionContext {
    pub actor: Actor,
    pub note: Option<String>,
    pub at: DateTime<Utc>,
    via_shipment: bool,
    tracking: Option<(String, String)>,
}

impl TransitionContext {
    pub fn new(actor: Actor, note: Option<String>) -> Self {
        Self { actor, note, at: Utc::now(), via_shipment: false, tracking: None }
    }

    pub(crate) fn via_shipment(mut self) -> Self {
        self.via_shipment = true;
        self
    }

    pub(crate) fn with_tracking(mut self, tracking_code: impl Into<String>, provider: impl Into<String>) -> Self {
        self.tracking = Some((tracking_code.into(), provider.into()));
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("cannot move order from {from} to {to}: {reason}")]
pub struct TransitionError {
    pub from: OrderStatus,
    pub to: OrderStatus,
    pub reason: &'static str,
}

enum Guard {
    /// COD, or already paid.
    PaymentCommitted,
    /// Payment status is `paid` or `cod`.
    PaymentSettled,
    /// Only the shipment workflow drives this edge.
    ShipmentGate,
    Open,
}

fn guard(from: OrderStatus, to: OrderStatus) -> Option<Guard> {
    use OrderStatus::*;
    match (from, to) {
        (Pending, Confirmed) => Some(Guard::PaymentCommitted),
        (Confirmed, ShippingReady) => Some(Guard::PaymentSettled),
        (ShippingReady, ShippingCreated) => Some(Guard::ShipmentGate),
        (ShippingCreated | Delivering, ShippingReady) => Some(Guard::ShipmentGate),
        (ShippingCreated, Delivering) => Some(Guard::ShipmentGate),
        (ShippingCreated | Delivering, Completed) => Some(Guard::ShipmentGate),
        (Pending | Confirmed, Cancelled) => Some(Guard::Open),
        (ShippingCreated | Delivering | Completed, Returned) => Some(Guard::Open),
        _ => None,
    }
}

/// Stock counters touched when an order moves along an edge.
pub fn stock_effect(from: OrderStatus, to: OrderStatus) -> Option<StockOp> {
    match (from, to) {
        (OrderStatus::Pending, OrderStatus::Confirmed) => Some(StockOp::Deduct),
        (OrderStatus::Pending, OrderStatus::Cancelled) => Some(StockOp::Release),
        (OrderStatus::Confirmed, OrderStatus::Cancelled) => Some(StockOp::Restock),
        _ => None,
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OrderError {
    #[error("order has no items")]
    NoItems,
    #[error("item quantity must be positive")]
    InvalidQuantity,
    #[error("discount {discount} exceeds subtotal {subtotal}")]
    DiscountExceedsSubtotal { discount: Decimal, subtotal: Decimal },
    #[error("order total must be positive, got {0}")]
    NonPositiveTotal(Decimal),
    #[error("payment status cod is only valid for cash-on-delivery orders")]
    CodMismatch,
}

/// Everything needed to place an order, already priced.
#[derive(Clone, Debug)]
pub struct NewOrder {
    pub order_number: String,
    pub user_id: Option<Uuid>,
    pub guest_email: Option<String>,
    pub guest_phone: Option<String>,
    pub contact_email: String,
    pub items: Vec<OrderItem>,
    pub discount_amount: Decimal,
    pub shipping_fee: Decimal,
    pub currency: String,
    pub shipping_address: ShippingAddress,
    pub payment_method: PaymentMethod,
    pub coupon: Option<(Uuid, String)>,
    pub note: Option<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Order {
    pub id: Uuid,
    pub order_number: String,
    pub user_id: Option<Uuid>,
    pub guest_email: Option<String>,
    pub guest_phone: Option<String>,
    pub contact_email: String,
    pub items: Vec<OrderItem>,
    pub subtotal: Decimal,
    pub discount_amount: Decimal,
    pub shipping_fee: Decimal,
    pub total_amount: Decimal,
    pub currency: String,
    pub shipping_address: ShippingAddress,
    pub payment_method: PaymentMethod,
    pub(crate) payment_status: PaymentStatus,
    pub(crate) status: OrderStatus,
    pub(crate) status_history: Vec<StatusHistoryEntry>,
    pub coupon_code: Option<String>,
    pub coupon_id: Option<Uuid>,
    pub tracking_number: Option<String>,
    pub shipping_company: Option<String>,
    pub note: Option<String>,
    pub confirmed_at: Option<DateTime<Utc>>,
    pub paid_at: Option<DateTime<Utc>>,
    pub shipped_at: Option<DateTime<Utc>>,
    pub delivered_at: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub cancellation_reason: Option<String>,
    pub cancelled_by: Option<String>,
    /// Bumped on every committed change; used for optimistic concurrency.
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Order {
    /// Build a `pending` order from priced lines and record who placed it.
    pub fn place(new: NewOrder, actor: &Actor) -> Result<Self, OrderError> {
        if new.items.is_empty() {
            return Err(OrderError::NoItems);
        }
        if new.items.iter().any(|i| i.quantity == 0) {
            return Err(OrderError::InvalidQuantity);
        }
        let subtotal: Decimal = new.items.iter().map(|i| i.subtotal).sum();
        if new.discount_amount > subtotal {
            return Err(OrderError::DiscountExceedsSubtotal { discount: new.discount_amount, subtotal });
        }
        let total_amount = subtotal - new.discount_amount + new.shipping_fee;
        if total_amount <= Decimal::ZERO {
            return Err(OrderError::NonPositiveTotal(total_amount));
        }

        let now = Utc::now();
        let (coupon_id, coupon_code) = new.coupon.map(|(id, code)| (Some(id), Some(code))).unwrap_or((None, None));
        let history = vec![StatusHistoryEntry {
            status: OrderStatus::Pending,
            timestamp: now,
            actor: actor.clone(),
            note: Some("order placed".to_string()),
            tracking_number: None,
        }];

        Ok(Self {
            id: Uuid::now_v7(),
            order_number: new.order_number,
            user_id: new.user_id,
            guest_email: new.guest_email,
            guest_phone: new.guest_phone,
            contact_email: new.contact_email,
            items: new.items,
            subtotal,
            discount_amount: new.discount_amount,
            shipping_fee: new.shipping_fee,
            total_amount,
            currency: new.currency,
            shipping_address: new.shipping_address,
            payment_method: new.payment_method,
            payment_status: PaymentStatus::initial_for(new.payment_method),
            status: OrderStatus::Pending,
            status_history: history,
            coupon_code,
            coupon_id,
            tracking_number: None,
            shipping_company: None,
            note: new.note,
            confirmed_at: None,
            paid_at: None,
            shipped_at: None,
            delivered_at: None,
            cancelled_at: None,
            cancellation_reason: None,
            cancelled_by: None,
            version: 1,
            created_at: now,
            updated_at: now,
        })
    }

    pub fn status(&self) -> OrderStatus {
        self.status
    }

    pub fn payment_status(&self) -> PaymentStatus {
        self.payment_status
    }

    pub fn history(&self) -> &[StatusHistoryEntry] {
        &self.status_history
    }

    pub fn is_guest(&self) -> bool {
        self.user_id.is_none()
    }

    pub fn totals_balance(&self) -> bool {
        self.total_amount == self.subtotal - self.discount_amount + self.shipping_fee && self.total_amount > Decimal::ZERO
    }

    /// The owning customer, the guest who placed it, or staff.
    pub fn is_accessible_by(&self, actor: &Actor) -> bool {
        if actor.is_admin() {
            return true;
        }
        match (self.user_id, actor.role) {
            (Some(owner), _) => actor.user_id == Some(owner),
            (None, Role::Guest) => match (&self.guest_email, &actor.email) {
                (Some(a), Some(b)) => a.eq_ignore_ascii_case(b),
                _ => false,
            },
            (None, _) => false,
        }
    }

    /// One movement per stock key, quantities of repeated keys summed.
    pub fn stock_movements(&self, op: StockOp) -> Vec<StockMovement> {
        let mut totals: HashMap<StockKey, i64> = HashMap::new();
        let mut order: Vec<StockKey> = Vec::new();
        for item in &self.items {
            let key = item.stock_key();
            let entry = totals.entry(key).or_insert_with(|| {
                order.push(key);
                0
            });
            *entry += i64::from(item.quantity);
        }
        order
            .into_iter()
            .map(|key| StockMovement { key, op, quantity: totals[&key] })
            .collect()
    }

    /// Apply one edge of the state machine.
    pub fn transition(&mut self, to: OrderStatus, ctx: &TransitionContext) -> Result<StatusHistoryEntry, TransitionError> {
        let from = self.status;
        let fail = |reason| TransitionError { from, to, reason };
        let guard = guard(from, to).ok_or_else(|| fail("transition not allowed"))?;
        match guard {
            Guard::PaymentCommitted
                if self.payment_method != PaymentMethod::Cod && self.payment_status != PaymentStatus::Paid =>
            {
                return Err(fail("prepaid orders can only be confirmed once paid"));
            }
            Guard::PaymentSettled if !self.payment_status.is_settled() => {
                return Err(fail("payment is neither paid nor cash on delivery"));
            }
            Guard::ShipmentGate if !ctx.via_shipment => {
                return Err(fail("only the shipment workflow drives this transition"));
            }
            _ => {}
        }

        match to {
            OrderStatus::Confirmed => self.confirmed_at = Some(ctx.at),
            OrderStatus::ShippingCreated => {
                let (code, provider) = ctx.tracking.clone().ok_or_else(|| fail("tracking code is required"))?;
                self.tracking_number = Some(code);
                self.shipping_company = Some(provider);
                self.shipped_at = Some(ctx.at);
            }
            OrderStatus::ShippingReady if from != OrderStatus::Confirmed => {
                self.tracking_number = None;
                self.shipping_company = None;
                self.shipped_at = None;
            }
            OrderStatus::Completed => self.delivered_at = Some(ctx.at),
            OrderStatus::Cancelled => {
                self.cancelled_at = Some(ctx.at);
                self.cancellation_reason = ctx.note.clone();
                self.cancelled_by = Some(ctx.actor.label());
            }
            _ => {}
        }

        self.status = to;
        self.updated_at = ctx.at;
        let entry = StatusHistoryEntry {
            status: to,
            timestamp: ctx.at,
            actor: ctx.actor.clone(),
            note: ctx.note.clone(),
            tracking_number: (to == OrderStatus::ShippingCreated).then(|| self.tracking_number.clone()).flatten(),
        };
        self.status_history.push(entry.clone());
        Ok(entry)
    }

    /// Record a payment outcome. Does not touch `status`.
    pub fn set_payment_status(&mut self, status: PaymentStatus, at: DateTime<Utc>) -> Result<PaymentStatus, OrderError> {
        if status == PaymentStatus::Cod && self.payment_method != PaymentMethod::Cod {
            return Err(OrderError::CodMismatch);
        }
        let previous = self.payment_status;
        if status == PaymentStatus::Paid && self.paid_at.is_none() {
            self.paid_at = Some(at);
        }
        self.payment_status = status;
        self.updated_at = at;
        Ok(previous)
    }
}
