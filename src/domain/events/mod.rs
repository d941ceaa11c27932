//! Domain events
//!
//! Published after a write commits; consumers (mail, audit) receive a full
//! order snapshot.

use serde::{Deserialize, Serialize};

use crate::domain::aggregates::{Order, OrderStatus};

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OrderEvent {
    OrderCreated {
        order: Box<Order>,
    },
    OrderStatusChanged {
        previous: OrderStatus,
        status: OrderStatus,
        order: Box<Order>,
    },
}

impl OrderEvent {
    pub fn subject(&self) -> &'static str {
        match self {
            Self::OrderCreated { .. } => "orders.created",
            Self::OrderStatusChanged { .. } => "orders.status_changed",
        }
    }

    pub fn order(&self) -> &Order {
        match self {
            Self::OrderCreated { order } | Self::OrderStatusChanged { order, .. } => order,
        }
    }
}
