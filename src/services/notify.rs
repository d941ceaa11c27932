//! Order event fan-out.
//!
//! Events leave after the write has committed. Delivery is best effort: a
//! failed publish is logged and dropped.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

use crate::domain::aggregates::Order;
use crate::domain::events::OrderEvent;
use crate::store::OrderChange;

#[derive(Debug, Error)]
pub enum PublishError {
    #[error("failed to encode event: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("transport error: {0}")]
    Transport(String),
}

#[async_trait]
pub trait EventPublisher: Send + Sync {
    async fn publish(&self, event: &OrderEvent) -> Result<(), PublishError>;
}

/// JSON events on NATS subjects `orders.created` and `orders.status_changed`.
pub struct NatsPublisher {
    client: async_nats::Client,
}

impl NatsPublisher {
    pub fn new(client: async_nats::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl EventPublisher for NatsPublisher {
    async fn publish(&self, event: &OrderEvent) -> Result<(), PublishError> {
        let payload = serde_json::to_vec(event)?;
        self.client
            .publish(event.subject().to_string(), payload.into())
            .await
            .map_err(|e| PublishError::Transport(e.to_string()))
    }
}

pub struct NoopPublisher;

#[async_trait]
impl EventPublisher for NoopPublisher {
    async fn publish(&self, event: &OrderEvent) -> Result<(), PublishError> {
        debug!(subject = event.subject(), order_number = %event.order().order_number, "event publishing disabled");
        Ok(())
    }
}

/// Keeps every event it is handed. `failing()` records and then errors.
#[derive(Default)]
pub struct RecordingPublisher {
    events: Mutex<Vec<OrderEvent>>,
    fail: bool,
}

impl RecordingPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing() -> Self {
        Self { events: Mutex::new(Vec::new()), fail: true }
    }

    pub fn events(&self) -> Vec<OrderEvent> {
        self.events.lock().clone()
    }

    /// Poll until at least `count` events arrived or `within` elapsed.
    pub async fn wait_for(&self, count: usize, within: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + within;
        loop {
            if self.events.lock().len() >= count {
                return true;
            }
            if tokio::time::Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }
}

#[async_trait]
impl EventPublisher for RecordingPublisher {
    async fn publish(&self, event: &OrderEvent) -> Result<(), PublishError> {
        self.events.lock().push(event.clone());
        if self.fail {
            return Err(PublishError::Transport("broker unreachable".into()));
        }
        Ok(())
    }
}

/// Handle the services use to emit events without waiting on delivery.
#[derive(Clone)]
pub struct Notifier {
    publisher: Arc<dyn EventPublisher>,
}

impl Notifier {
    pub fn new(publisher: Arc<dyn EventPublisher>) -> Self {
        Self { publisher }
    }

    pub fn disabled() -> Self {
        Self::new(Arc::new(NoopPublisher))
    }

    pub fn order_created(&self, order: &Order) {
        self.emit(OrderEvent::OrderCreated { order: Box::new(order.clone()) });
    }

    /// Emits only if the change moved the order to another status.
    pub fn status_changed(&self, change: &OrderChange) {
        if !change.changes_status() {
            return;
        }
        self.emit(OrderEvent::OrderStatusChanged {
            previous: change.previous,
            status: change.order.status(),
            order: Box::new(change.order.clone()),
        });
    }

    fn emit(&self, event: OrderEvent) {
        let publisher = Arc::clone(&self.publisher);
        tokio::spawn(async move {
            if let Err(e) = publisher.publish(&event).await {
                warn!(
                    subject = event.subject(),
                    order_number = %event.order().order_number,
                    error = %e,
                    "failed to publish order event"
                );
            }
        });
    }
}
