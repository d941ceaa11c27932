//! Application services: the order lifecycle engine, coupon ledger and
//! shipment gate, plus the collaborators they lean on.

pub mod contacts;
pub mod coupons;
pub mod notify;
pub mod orders;
pub mod retry;
pub mod shipments;

pub use contacts::{ContactResolver, PgContacts, StaticContacts};
pub use coupons::{CouponLedger, CouponQuote};
pub use notify::{EventPublisher, NatsPublisher, NoopPublisher, Notifier, PublishError, RecordingPublisher};
pub use orders::{CreateOrderRequest, OrderItemRequest, OrderService};
pub use shipments::{CreateShipmentRequest, ShipmentService, TrackingUpdate};
