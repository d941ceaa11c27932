//! OpenSASE Checkout
//!
//! Order lifecycle and inventory reservation engine for the OpenSASE commerce
//! stack.
//!
//! ## Features
//! - Order placement with atomic stock reservation and coupon redemption
//! - Explicit order state machine with an append-only status history
//! - Two-phase stock commitment (reserve, deduct, release, restock)
//! - Shipment gate coupling courier tracking to order status
//! - Postgres and in-memory stores behind one `Store` trait

pub mod api;
pub mod config;
pub mod domain;
pub mod services;
pub mod store;

use thiserror::Error;
use uuid::Uuid;

use crate::domain::aggregates::{CouponRejection, OrderError, OrderStatus, ShipmentError, TransitionError};
use crate::store::StoreError;

pub use crate::config::{Config, EngineConfig};
pub use crate::domain::value_objects::{Actor, Role};
pub use crate::services::{CouponLedger, OrderService, ShipmentService};

// =============================================================================
// Error Types
// =============================================================================

#[derive(Error, Debug)]
pub enum CommerceError {
    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Insufficient stock for {product_id}: requested {requested}, available {available}")]
    InsufficientStock {
        product_id: Uuid,
        variant_id: Option<Uuid>,
        requested: i64,
        available: i64,
    },

    #[error("No contact email for this order")]
    MissingContact,

    #[error("Invalid transition from {from} to {to}: {reason}")]
    InvalidTransition {
        from: OrderStatus,
        to: OrderStatus,
        reason: String,
    },

    #[error("Cannot {action} an order in status {status}")]
    InvalidState { status: OrderStatus, action: &'static str },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Permission denied: {0}")]
    Forbidden(String),

    #[error("Not ready for shipment: {0}")]
    NotReady(String),

    #[error("Already exists: {0}")]
    AlreadyExists(String),

    #[error(transparent)]
    Coupon(#[from] CouponRejection),

    #[error("Invalid shipment update: {0}")]
    Shipment(#[from] ShipmentError),

    #[error("Service unavailable: {0}")]
    ServiceUnavailable(String),

    #[error("Storage error: {0}")]
    Storage(StoreError),
}

impl CommerceError {
    /// Stable machine-readable code for API bodies.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation_error",
            Self::InsufficientStock { .. } => "insufficient_stock",
            Self::MissingContact => "missing_contact",
            Self::InvalidTransition { .. } => "invalid_transition",
            Self::InvalidState { .. } => "invalid_state",
            Self::NotFound(_) => "not_found",
            Self::Forbidden(_) => "forbidden",
            Self::NotReady(_) => "not_ready",
            Self::AlreadyExists(_) => "already_exists",
            Self::Coupon(r) => r.code(),
            Self::Shipment(_) => "invalid_shipment_transition",
            Self::ServiceUnavailable(_) => "service_unavailable",
            Self::Storage(_) => "storage_error",
        }
    }

    /// Transient storage failures and lost optimistic races.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Storage(e) if e.is_retryable())
    }
}

impl From<StoreError> for CommerceError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::InsufficientStock { key, requested, available } => Self::InsufficientStock {
                product_id: key.product_id,
                variant_id: key.variant_id,
                requested,
                available,
            },
            StoreError::UsageExhausted(code) => Self::Coupon(CouponRejection::UsageExhausted(code)),
            StoreError::NotFound(what) => Self::NotFound(what),
            StoreError::Duplicate(what) => Self::AlreadyExists(what),
            other => Self::Storage(other),
        }
    }
}

impl From<TransitionError> for CommerceError {
    fn from(err: TransitionError) -> Self {
        Self::InvalidTransition { from: err.from, to: err.to, reason: err.reason.to_string() }
    }
}

impl From<OrderError> for CommerceError {
    fn from(err: OrderError) -> Self {
        Self::Validation(err.to_string())
    }
}

impl From<validator::ValidationErrors> for CommerceError {
    fn from(err: validator::ValidationErrors) -> Self {
        Self::Validation(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, CommerceError>;
