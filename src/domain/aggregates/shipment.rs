//! Shipment Aggregate
//!
//! One live shipment per order. Its own status machine feeds the parent order
//! through the shipment service.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use uuid::Uuid;

use crate::domain::aggregates::order::{Order, PaymentStatus, UnknownValue};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShippingStatus {
    #[default]
    Pending,
    PickedUp,
    InTransit,
    Delivering,
    Delivered,
    Failed,
    Returned,
    Cancelled,
}

impl ShippingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::PickedUp => "picked_up",
            Self::InTransit => "in_transit",
            Self::Delivering => "delivering",
            Self::Delivered => "delivered",
            Self::Failed => "failed",
            Self::Returned => "returned",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Delivered | Self::Returned | Self::Cancelled)
    }

    fn can_move_to(&self, next: ShippingStatus) -> bool {
        use ShippingStatus::*;
        match (*self, next) {
            (s, _) if s.is_terminal() => false,
            // location pings
            (InTransit, InTransit) | (Delivering, Delivering) => true,
            (Pending, PickedUp | InTransit | Delivering | Delivered | Failed) => true,
            (PickedUp, InTransit | Delivering | Delivered | Failed | Returned) => true,
            (InTransit, Delivering | Delivered | Failed | Returned) => true,
            (Delivering, Delivered | Failed | Returned) => true,
            (Failed, Delivering | Returned) => true,
            _ => false,
        }
    }
}

impl FromStr for ShippingStatus {
    type Err = UnknownValue;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "picked_up" => Ok(Self::PickedUp),
            "in_transit" => Ok(Self::InTransit),
            "delivering" => Ok(Self::Delivering),
            "delivered" => Ok(Self::Delivered),
            "failed" => Ok(Self::Failed),
            "returned" => Ok(Self::Returned),
            "cancelled" => Ok(Self::Cancelled),
            other => Err(UnknownValue { kind: "shipping status", value: other.to_string() }),
        }
    }
}

impl fmt::Display for ShippingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Recipient {
    pub name: String,
    pub phone: String,
    pub address: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackingEvent {
    pub status: ShippingStatus,
    pub location: Option<String>,
    pub note: Option<String>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Shipment {
    pub id: Uuid,
    pub order_id: Uuid,
    pub order_number: String,
    pub tracking_code: String,
    pub shipping_provider: String,
    pub shipping_status: ShippingStatus,
    pub recipient: Recipient,
    pub shipping_fee: Decimal,
    /// Amount the courier collects at the door.
    pub cod_amount: Decimal,
    pub tracking_history: Vec<TrackingEvent>,
    pub version: i64,
    pub delivered_at: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub cancel_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Shipment {
    pub fn for_order(order: &Order, tracking_code: &str, provider: &str, note: Option<String>) -> Self {
        let now = Utc::now();
        let address = &order.shipping_address;
        let cod_amount = if order.payment_status() == PaymentStatus::Cod {
            order.total_amount
        } else {
            Decimal::ZERO
        };
        Self {
            id: Uuid::now_v7(),
            order_id: order.id,
            order_number: order.order_number.clone(),
            tracking_code: tracking_code.trim().to_string(),
            shipping_provider: provider.trim().to_string(),
            shipping_status: ShippingStatus::Pending,
            recipient: Recipient {
                name: address.full_name.clone(),
                phone: address.phone.clone(),
                address: address.one_line(),
            },
            shipping_fee: order.shipping_fee,
            cod_amount,
            tracking_history: vec![TrackingEvent {
                status: ShippingStatus::Pending,
                location: None,
                note,
                timestamp: now,
            }],
            version: 1,
            delivered_at: None,
            cancelled_at: None,
            cancel_reason: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_active(&self) -> bool {
        self.shipping_status != ShippingStatus::Cancelled
    }

    /// Append a courier update.
    pub fn record(
        &mut self,
        status: ShippingStatus,
        location: Option<String>,
        note: Option<String>,
        at: DateTime<Utc>,
    ) -> Result<(), ShipmentError> {
        if status == ShippingStatus::Cancelled {
            return Err(ShipmentError::UseCancel);
        }
        if !self.shipping_status.can_move_to(status) {
            return Err(ShipmentError::InvalidTransition { from: self.shipping_status, to: status });
        }
        if status == ShippingStatus::Delivered {
            self.delivered_at = Some(at);
        }
        self.shipping_status = status;
        self.tracking_history.push(TrackingEvent { status, location, note, timestamp: at });
        self.updated_at = at;
        Ok(())
    }

    pub fn cancel(&mut self, reason: Option<String>, at: DateTime<Utc>) -> Result<(), ShipmentError> {
        if self.shipping_status.is_terminal() {
            return Err(ShipmentError::InvalidTransition { from: self.shipping_status, to: ShippingStatus::Cancelled });
        }
        self.shipping_status = ShippingStatus::Cancelled;
        self.cancelled_at = Some(at);
        self.cancel_reason = reason.clone();
        self.tracking_history.push(TrackingEvent {
            status: ShippingStatus::Cancelled,
            location: None,
            note: reason,
            timestamp: at,
        });
        self.updated_at = at;
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ShipmentError {
    #[error("shipment cannot move from {from} to {to}")]
    InvalidTransition { from: ShippingStatus, to: ShippingStatus },
    #[error("shipments are cancelled through the cancel operation")]
    UseCancel,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn shipment() -> Shipment {
        let now = Utc::now();
        Shipment {
            id: Uuid::now_v7(),
            order_id: Uuid::now_v7(),
            order_number: "ORD-1".into(),
            tracking_code: "GHN1".into(),
            shipping_provider: "GHN".into(),
            shipping_status: ShippingStatus::Pending,
            recipient: Recipient { name: "A".into(), phone: "0912345678".into(), address: "HN".into() },
            shipping_fee: Decimal::ZERO,
            cod_amount: Decimal::ZERO,
            tracking_history: vec![],
            version: 1,
            delivered_at: None,
            cancelled_at: None,
            cancel_reason: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_tracking_flow() {
        let mut s = shipment();
        let now = Utc::now();
        s.record(ShippingStatus::PickedUp, Some("Hub A".into()), None, now).unwrap();
        s.record(ShippingStatus::InTransit, Some("Hub B".into()), None, now).unwrap();
        s.record(ShippingStatus::InTransit, Some("Hub C".into()), None, now).unwrap();
        s.record(ShippingStatus::Delivered, None, None, now).unwrap();
        assert_eq!(s.tracking_history.len(), 4);
        assert!(s.delivered_at.is_some());
        assert!(s.record(ShippingStatus::Returned, None, None, now).is_err());
        assert!(s.cancel(None, now).is_err());
    }

    #[test]
    fn test_cancel_before_delivery() {
        let mut s = shipment();
        let now = Utc::now();
        assert_eq!(s.record(ShippingStatus::Cancelled, None, None, now), Err(ShipmentError::UseCancel));
        s.record(ShippingStatus::PickedUp, None, None, now).unwrap();
        s.cancel(Some("wrong parcel".into()), now).unwrap();
        assert!(!s.is_active());
        assert_eq!(s.cancel_reason.as_deref(), Some("wrong parcel"));
    }
}
