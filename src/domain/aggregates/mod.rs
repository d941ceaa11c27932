//! Aggregates module
pub mod coupon;
pub mod order;
pub mod product;
pub mod shipment;

pub use coupon::{Coupon, CouponRejection, DiscountType};
pub use order::{
    stock_effect, NewOrder, Order, OrderError, OrderItem, OrderStatus, PaymentMethod, PaymentStatus,
    ShippingAddress, StatusHistoryEntry, TransitionContext, TransitionError, UnknownValue,
};
pub use product::{
    Product, ProductError, ProductStatus, StockError, StockKey, StockLevel, StockMovement, StockOp, Variant,
};
pub use shipment::{Recipient, Shipment, ShipmentError, ShippingStatus, TrackingEvent};
