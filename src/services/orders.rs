//! Order Lifecycle Engine
//!
//! Every mutation follows the same shape: load the order, stage the change
//! on a copy with [`OrderChange`], hand the whole change to the store as one
//! command, and only then emit events. Lost races and transient storage
//! failures re-run the whole sequence.

use chrono::Utc;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, instrument};
use uuid::Uuid;
use validator::Validate;

use crate::config::EngineConfig;
use crate::domain::aggregates::{
    NewOrder, Order, OrderItem, OrderStatus, PaymentMethod, PaymentStatus, ProductError, ShippingAddress, StockOp,
    TransitionContext,
};
use crate::domain::value_objects::{next_order_number, normalize_phone, Actor, Role};
use crate::services::contacts::ContactResolver;
use crate::services::coupons::{CouponLedger, CouponQuote};
use crate::services::notify::Notifier;
use crate::services::retry::with_retries;
use crate::store::{CouponRedemption, OrderChange, OrderPlacement, Store};
use crate::{CommerceError, Result};

const MAX_LINE_QUANTITY: u32 = 10_000;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct OrderItemRequest {
    pub product_id: Uuid,
    #[serde(default)]
    pub variant_id: Option<Uuid>,
    pub quantity: u32,
}

#[derive(Clone, Debug, Deserialize, Validate)]
pub struct CreateOrderRequest {
    #[validate(length(min = 1, message = "order must contain at least one item"))]
    pub items: Vec<OrderItemRequest>,
    #[validate]
    pub shipping_address: ShippingAddress,
    pub payment_method: PaymentMethod,
    /// Required for guests; overrides nothing for signed-in customers with an email on file.
    #[validate(email(message = "contact email is not valid"))]
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub coupon_code: Option<String>,
    #[serde(default)]
    pub note: Option<String>,
}

/// Who the order belongs to and where to reach them.
struct Contact {
    user_id: Option<Uuid>,
    email: String,
    guest_phone: Option<String>,
}

#[derive(Clone)]
pub struct OrderService {
    store: Arc<dyn Store>,
    coupons: CouponLedger,
    contacts: Arc<dyn ContactResolver>,
    notifier: Notifier,
    config: EngineConfig,
}

impl OrderService {
    pub fn new(
        store: Arc<dyn Store>,
        contacts: Arc<dyn ContactResolver>,
        notifier: Notifier,
        config: EngineConfig,
    ) -> Self {
        Self {
            coupons: CouponLedger::new(Arc::clone(&store)),
            store,
            contacts,
            notifier,
            config,
        }
    }

    pub fn coupons(&self) -> &CouponLedger {
        &self.coupons
    }

    // =========================================================================
    // Placement
    // =========================================================================

    /// Price the cart, reserve stock, redeem the coupon and persist a
    /// `pending` order, all or nothing.
    #[instrument(skip(self, actor, req), fields(actor = %actor.role, items = req.items.len()))]
    pub async fn create_order(&self, actor: &Actor, mut req: CreateOrderRequest) -> Result<Order> {
        req.shipping_address.phone = normalize_phone(&req.shipping_address.phone);
        req.email = req.email.map(|e| e.trim().to_lowercase()).filter(|e| !e.is_empty());
        req.validate()?;
        if let Some(line) = req.items.iter().find(|i| i.quantity == 0 || i.quantity > MAX_LINE_QUANTITY) {
            return Err(CommerceError::Validation(format!(
                "quantity for product {} must be between 1 and {MAX_LINE_QUANTITY}",
                line.product_id
            )));
        }
        let contact = self.resolve_contact(actor, &req).await?;

        let (req, contact) = (&req, &contact);
        let order = with_retries("create_order", self.config.max_retries, move || async move {
            self.place(actor, req, contact).await
        })
        .await?;

        info!(
            order_id = %order.id,
            order_number = %order.order_number,
            total = %order.total_amount,
            "order placed"
        );
        self.notifier.order_created(&order);
        Ok(order)
    }

    async fn resolve_contact(&self, actor: &Actor, req: &CreateOrderRequest) -> Result<Contact> {
        let user_id = match actor.role {
            Role::Customer | Role::Admin => actor.user_id,
            Role::Guest | Role::System => None,
        };
        let on_file = match user_id {
            Some(id) => self.contacts.email_for(id).await?,
            None => None,
        };
        let email = on_file
            .or_else(|| req.email.clone())
            .or_else(|| actor.email.clone())
            .ok_or(CommerceError::MissingContact)?;
        let guest_phone = match user_id {
            Some(_) => None,
            None => Some(
                req.phone
                    .as_deref()
                    .map(normalize_phone)
                    .unwrap_or_else(|| req.shipping_address.phone.clone()),
            ),
        };
        Ok(Contact { user_id, email, guest_phone })
    }

    async fn place(&self, actor: &Actor, req: &CreateOrderRequest, contact: &Contact) -> Result<Order> {
        let mut items = Vec::with_capacity(req.items.len());
        for line in &req.items {
            let product = self
                .store
                .product(line.product_id)
                .await?
                .ok_or_else(|| CommerceError::NotFound(format!("product {}", line.product_id)))?;
            if !product.is_purchasable() {
                return Err(CommerceError::Validation(format!("product {} is not for sale", product.sku)));
            }
            let key = product.stock_key(line.variant_id).map_err(|e| match e {
                ProductError::VariantNotFound { .. } => CommerceError::NotFound(e.to_string()),
                ProductError::VariantRequired(_) => CommerceError::Validation(e.to_string()),
            })?;
            let sku = line
                .variant_id
                .and_then(|v| product.variant(v))
                .and_then(|v| v.sku.clone())
                .unwrap_or_else(|| product.sku.clone());
            let (name, variant_name) = product.display_name(line.variant_id);
            items.push(OrderItem::new(key, sku, name, variant_name, line.quantity, product.unit_price(line.variant_id)));
        }

        let subtotal: Decimal = items.iter().map(|i| i.subtotal).sum();
        let quote: Option<CouponQuote> = match req.coupon_code.as_deref().map(str::trim) {
            Some(code) if !code.is_empty() => Some(self.coupons.validate(code, subtotal).await?),
            _ => None,
        };
        let discount = quote.as_ref().map_or(Decimal::ZERO, |q| q.discount);

        let order = Order::place(
            NewOrder {
                order_number: next_order_number(Utc::now()),
                user_id: contact.user_id,
                guest_email: contact.user_id.is_none().then(|| contact.email.clone()),
                guest_phone: contact.guest_phone.clone(),
                contact_email: contact.email.clone(),
                items,
                discount_amount: discount,
                shipping_fee: self.config.shipping_fee_for(subtotal - discount),
                currency: self.config.currency.clone(),
                shipping_address: req.shipping_address.clone(),
                payment_method: req.payment_method,
                coupon: quote.as_ref().map(|q| (q.coupon_id, q.code.clone())),
                note: req.note.clone(),
            },
            actor,
        )?;
        let placement = OrderPlacement {
            reservations: order.stock_movements(StockOp::Reserve),
            coupon: quote.map(|q| CouponRedemption { coupon_id: q.coupon_id, code: q.code, order_id: order.id }),
            order,
        };
        self.store.place_order(&placement).await?;
        Ok(placement.order)
    }

    // =========================================================================
    // Reads
    // =========================================================================

    async fn load(&self, order_id: Uuid) -> Result<Order> {
        self.store
            .order(order_id)
            .await?
            .ok_or_else(|| CommerceError::NotFound(format!("order {order_id}")))
    }

    pub async fn get_order(&self, actor: &Actor, order_id: Uuid) -> Result<Order> {
        let order = self.load(order_id).await?;
        if !order.is_accessible_by(actor) {
            return Err(CommerceError::Forbidden(format!("order {}", order.order_number)));
        }
        Ok(order)
    }

    /// Guest lookup by order number and the email used at checkout.
    ///
    /// A wrong email reads as not found so order numbers cannot be enumerated.
    pub async fn get_guest_order(&self, order_number: &str, email: &str) -> Result<Order> {
        let not_found = || CommerceError::NotFound(format!("order {}", order_number.trim()));
        let order = self.store.order_by_number(order_number.trim()).await?.ok_or_else(not_found)?;
        match &order.guest_email {
            Some(guest) if guest.eq_ignore_ascii_case(email.trim()) => Ok(order),
            _ => Err(not_found()),
        }
    }

    pub async fn list_orders_for_user(&self, actor: &Actor, user_id: Uuid) -> Result<Vec<Order>> {
        if !actor.is_admin() && actor.user_id != Some(user_id) {
            return Err(CommerceError::Forbidden("orders of another user".into()));
        }
        Ok(self.store.orders_for_user(user_id).await?)
    }

    // =========================================================================
    // Transitions
    // =========================================================================

    /// Load, stage with `plan`, and write one order change under retry.
    async fn mutate<F>(&self, op: &'static str, order_id: Uuid, plan: F) -> Result<OrderChange>
    where
        F: Fn(&Order) -> Result<OrderChange> + Send + Sync,
    {
        let plan = &plan;
        let change = with_retries(op, self.config.max_retries, move || async move {
            let current = self.load(order_id).await?;
            let change = plan(&current)?;
            self.store.apply_order_change(&change).await?;
            Ok(change)
        })
        .await?;
        if change.changes_status() {
            info!(
                order_id = %change.order.id,
                order_number = %change.order.order_number,
                from = %change.previous,
                to = %change.order.status(),
                "order status changed"
            );
        }
        self.notifier.status_changed(&change);
        Ok(change)
    }

    /// `pending -> confirmed`, deducting reserved stock.
    pub async fn confirm_order(&self, actor: &Actor, order_id: Uuid, note: Option<String>) -> Result<Order> {
        self.update_order_status(actor, order_id, OrderStatus::Confirmed, note).await
    }

    /// Cancel from `pending` or `confirmed`, giving the stock back.
    #[instrument(skip(self, actor, reason), fields(actor = %actor.role))]
    pub async fn cancel_order(&self, actor: &Actor, order_id: Uuid, reason: Option<String>) -> Result<Order> {
        let change = self
            .mutate("cancel_order", order_id, |current| plan_cancel(current, actor, reason.as_deref()))
            .await?;
        Ok(change.order)
    }

    /// Record a payment outcome; a settled payment on a `confirmed` order
    /// moves it to `shipping_ready` in the same write.
    #[instrument(skip(self, actor, note), fields(actor = %actor.role))]
    pub async fn update_payment_status(
        &self,
        actor: &Actor,
        order_id: Uuid,
        status: PaymentStatus,
        note: Option<String>,
    ) -> Result<Order> {
        require_staff(actor, "update payment status")?;
        let change = self
            .mutate("update_payment_status", order_id, |current| {
                let mut change = OrderChange::begin(current);
                change.order.set_payment_status(status, Utc::now())?;
                advance_if_settled(&mut change, actor, note.as_deref())?;
                Ok(change)
            })
            .await?;
        info!(order_number = %change.order.order_number, payment_status = %status, "payment status recorded");
        Ok(change.order)
    }

    /// Staff entry point onto the transition table.
    ///
    /// Shipment creation, delivery and the shipment revert are refused here;
    /// they belong to the shipment workflow.
    #[instrument(skip(self, actor, note), fields(actor = %actor.role))]
    pub async fn update_order_status(
        &self,
        actor: &Actor,
        order_id: Uuid,
        target: OrderStatus,
        note: Option<String>,
    ) -> Result<Order> {
        require_staff(actor, "change order status")?;
        let change = self
            .mutate("update_order_status", order_id, |current| {
                if target == OrderStatus::Cancelled {
                    return plan_cancel(current, actor, note.as_deref());
                }
                let mut change = OrderChange::begin(current);
                change.transition(target, &TransitionContext::new(actor.clone(), note.clone()))?;
                if target == OrderStatus::Confirmed {
                    advance_if_settled(&mut change, actor, None)?;
                }
                Ok(change)
            })
            .await?;
        Ok(change.order)
    }
}

fn require_staff(actor: &Actor, action: &str) -> Result<()> {
    if actor.is_admin() {
        Ok(())
    } else {
        Err(CommerceError::Forbidden(format!("only staff may {action}")))
    }
}

fn plan_cancel(current: &Order, actor: &Actor, reason: Option<&str>) -> Result<OrderChange> {
    if !current.is_accessible_by(actor) {
        return Err(CommerceError::Forbidden(format!("order {}", current.order_number)));
    }
    if !matches!(current.status(), OrderStatus::Pending | OrderStatus::Confirmed) {
        return Err(CommerceError::InvalidState { status: current.status(), action: "cancel" });
    }
    let mut change = OrderChange::begin(current);
    change.transition(OrderStatus::Cancelled, &TransitionContext::new(actor.clone(), reason.map(str::to_string)))?;
    Ok(change)
}

/// `confirmed -> shipping_ready` once payment is paid or cash on delivery.
fn advance_if_settled(change: &mut OrderChange, actor: &Actor, note: Option<&str>) -> Result<()> {
    if change.order.status() == OrderStatus::Confirmed && change.order.payment_status().is_settled() {
        let note = note.map(str::to_string).or_else(|| Some("payment settled".to_string()));
        change.transition(OrderStatus::ShippingReady, &TransitionContext::new(actor.clone(), note))?;
    }
    Ok(())
}
