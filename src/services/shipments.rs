//! Shipment Gate
//!
//! A shipment can only be opened for a paid or cash-on-delivery order that is
//! `shipping_ready`. Courier updates cascade into the order:
//!
//! | courier status | order moves to |
//! |----------------|----------------|
//! | in_transit, delivering | delivering (from shipping_created) |
//! | delivered | completed |
//! | returned | returned |
//! | cancelled (via cancel) | shipping_ready |

use chrono::Utc;
use serde::Deserialize;
use std::sync::Arc;
use tracing::{info, instrument};
use uuid::Uuid;
use validator::Validate;

use crate::config::EngineConfig;
use crate::domain::aggregates::{Order, OrderStatus, Shipment, ShippingStatus, TransitionContext};
use crate::domain::value_objects::Actor;
use crate::services::notify::Notifier;
use crate::services::retry::with_retries;
use crate::store::{OrderChange, Store};
use crate::{CommerceError, Result};

#[derive(Clone, Debug, Deserialize, Validate)]
pub struct CreateShipmentRequest {
    pub order_id: Uuid,
    #[validate(length(min = 1, max = 64, message = "tracking code is required"))]
    pub tracking_code: String,
    #[validate(length(min = 1, max = 64, message = "shipping provider is required"))]
    pub shipping_provider: String,
    #[serde(default)]
    pub note: Option<String>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct TrackingUpdate {
    pub status: ShippingStatus,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub note: Option<String>,
}

#[derive(Clone)]
pub struct ShipmentService {
    store: Arc<dyn Store>,
    notifier: Notifier,
    config: EngineConfig,
}

impl ShipmentService {
    pub fn new(store: Arc<dyn Store>, notifier: Notifier, config: EngineConfig) -> Self {
        Self { store, notifier, config }
    }

    async fn load_order(&self, order_id: Uuid) -> Result<Order> {
        self.store
            .order(order_id)
            .await?
            .ok_or_else(|| CommerceError::NotFound(format!("order {order_id}")))
    }

    async fn load(&self, shipment_id: Uuid) -> Result<Shipment> {
        self.store
            .shipment(shipment_id)
            .await?
            .ok_or_else(|| CommerceError::NotFound(format!("shipment {shipment_id}")))
    }

    /// Open the shipment and move the order to `shipping_created`.
    #[instrument(skip(self, actor, req), fields(order_id = %req.order_id, tracking_code = %req.tracking_code))]
    pub async fn create_shipment(&self, actor: &Actor, mut req: CreateShipmentRequest) -> Result<Shipment> {
        require_staff(actor)?;
        req.tracking_code = req.tracking_code.trim().to_string();
        req.shipping_provider = req.shipping_provider.trim().to_string();
        req.validate()?;

        let req = &req;
        let (shipment, change) = with_retries("create_shipment", self.config.max_retries, move || async move {
            let order = self.load_order(req.order_id).await?;
            if let Some(existing) = self.store.active_shipment_for_order(order.id).await? {
                return Err(CommerceError::AlreadyExists(format!(
                    "shipment {} for order {}",
                    existing.tracking_code, order.order_number
                )));
            }
            if order.status() != OrderStatus::ShippingReady {
                return Err(CommerceError::NotReady(format!(
                    "order {} is {}, not shipping_ready",
                    order.order_number,
                    order.status()
                )));
            }
            if !order.payment_status().is_settled() {
                return Err(CommerceError::NotReady(format!(
                    "order {} payment is {}",
                    order.order_number,
                    order.payment_status()
                )));
            }

            let shipment = Shipment::for_order(&order, &req.tracking_code, &req.shipping_provider, req.note.clone());
            let ctx = TransitionContext::new(actor.clone(), req.note.clone())
                .via_shipment()
                .with_tracking(shipment.tracking_code.clone(), shipment.shipping_provider.clone());
            let mut change = OrderChange::begin(&order);
            change.transition(OrderStatus::ShippingCreated, &ctx)?;
            self.store.create_shipment(&shipment, &change).await?;
            Ok((shipment, change))
        })
        .await?;

        info!(
            shipment_id = %shipment.id,
            order_number = %shipment.order_number,
            provider = %shipment.shipping_provider,
            "shipment created"
        );
        self.notifier.status_changed(&change);
        Ok(shipment)
    }

    /// Append a courier update and cascade it into the order.
    #[instrument(skip(self, actor, update), fields(status = %update.status))]
    pub async fn update_tracking(&self, actor: &Actor, shipment_id: Uuid, update: TrackingUpdate) -> Result<Shipment> {
        require_staff(actor)?;
        let update = &update;
        let (shipment, change) = with_retries("update_tracking", self.config.max_retries, move || async move {
            let mut shipment = self.load(shipment_id).await?;
            let expected = shipment.version;
            shipment.record(update.status, update.location.clone(), update.note.clone(), Utc::now())?;
            shipment.version += 1;

            let order = self.load_order(shipment.order_id).await?;
            let change = match cascade_target(update.status, order.status()) {
                Some(target) => {
                    let note = update
                        .note
                        .clone()
                        .or_else(|| Some(format!("courier reported {}", update.status)));
                    let mut change = OrderChange::begin(&order);
                    change.transition(target, &TransitionContext::new(actor.clone(), note).via_shipment())?;
                    Some(change)
                }
                None => None,
            };
            self.store.update_shipment(&shipment, expected, change.as_ref()).await?;
            Ok((shipment, change))
        })
        .await?;

        info!(shipment_id = %shipment.id, status = %shipment.shipping_status, "tracking updated");
        if let Some(change) = &change {
            self.notifier.status_changed(change);
        }
        Ok(shipment)
    }

    /// Cancel an undelivered shipment and put the order back to `shipping_ready`.
    #[instrument(skip(self, actor, reason))]
    pub async fn cancel_shipment(&self, actor: &Actor, shipment_id: Uuid, reason: Option<String>) -> Result<Shipment> {
        require_staff(actor)?;
        let reason = &reason;
        let (shipment, change) = with_retries("cancel_shipment", self.config.max_retries, move || async move {
            let mut shipment = self.load(shipment_id).await?;
            let expected = shipment.version;
            shipment.cancel(reason.clone(), Utc::now())?;
            shipment.version += 1;

            let order = self.load_order(shipment.order_id).await?;
            let change = if matches!(order.status(), OrderStatus::ShippingCreated | OrderStatus::Delivering) {
                let note = reason.clone().or_else(|| Some("shipment cancelled".to_string()));
                let mut change = OrderChange::begin(&order);
                change.transition(OrderStatus::ShippingReady, &TransitionContext::new(actor.clone(), note).via_shipment())?;
                Some(change)
            } else {
                None
            };
            self.store.update_shipment(&shipment, expected, change.as_ref()).await?;
            Ok((shipment, change))
        })
        .await?;

        info!(shipment_id = %shipment.id, order_number = %shipment.order_number, "shipment cancelled");
        if let Some(change) = &change {
            self.notifier.status_changed(change);
        }
        Ok(shipment)
    }

    pub async fn get_shipment(&self, actor: &Actor, shipment_id: Uuid) -> Result<Shipment> {
        let shipment = self.load(shipment_id).await?;
        let order = self.load_order(shipment.order_id).await?;
        if !order.is_accessible_by(actor) {
            return Err(CommerceError::Forbidden(format!("shipment {}", shipment.tracking_code)));
        }
        Ok(shipment)
    }

    /// The live shipment of an order.
    pub async fn shipment_for_order(&self, actor: &Actor, order_id: Uuid) -> Result<Shipment> {
        let order = self.load_order(order_id).await?;
        if !order.is_accessible_by(actor) {
            return Err(CommerceError::Forbidden(format!("order {}", order.order_number)));
        }
        self.store
            .active_shipment_for_order(order_id)
            .await?
            .ok_or_else(|| CommerceError::NotFound(format!("shipment for order {}", order.order_number)))
    }
}

fn require_staff(actor: &Actor) -> Result<()> {
    if actor.is_admin() {
        Ok(())
    } else {
        Err(CommerceError::Forbidden("only staff may manage shipments".into()))
    }
}

fn cascade_target(courier: ShippingStatus, order: OrderStatus) -> Option<OrderStatus> {
    match (courier, order) {
        (ShippingStatus::InTransit | ShippingStatus::Delivering, OrderStatus::ShippingCreated) => {
            Some(OrderStatus::Delivering)
        }
        (ShippingStatus::Delivered, OrderStatus::ShippingCreated | OrderStatus::Delivering) => {
            Some(OrderStatus::Completed)
        }
        (ShippingStatus::Returned, OrderStatus::ShippingCreated | OrderStatus::Delivering | OrderStatus::Completed) => {
            Some(OrderStatus::Returned)
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cascade_table() {
        use OrderStatus as O;
        use ShippingStatus as S;
        assert_eq!(cascade_target(S::InTransit, O::ShippingCreated), Some(O::Delivering));
        assert_eq!(cascade_target(S::InTransit, O::Delivering), None);
        assert_eq!(cascade_target(S::PickedUp, O::ShippingCreated), None);
        assert_eq!(cascade_target(S::Delivered, O::Delivering), Some(O::Completed));
        assert_eq!(cascade_target(S::Returned, O::ShippingCreated), Some(O::Returned));
        assert_eq!(cascade_target(S::Failed, O::Delivering), None);
    }
}
