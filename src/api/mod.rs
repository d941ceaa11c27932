//! HTTP surface
//!
//! Identity comes from the gateway in headers (`x-user-id`, `x-user-role`,
//! `x-user-email`); requests without them act as guests.

mod handlers;

use axum::{
    async_trait,
    extract::FromRequestParts,
    http::{request::Parts, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post, put},
    Json, Router,
};
use serde_json::json;
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::error;
use uuid::Uuid;

use crate::config::EngineConfig;
use crate::domain::value_objects::{Actor, Role};
use crate::services::{ContactResolver, CouponLedger, Notifier, OrderService, ShipmentService};
use crate::store::Store;
use crate::CommerceError;

#[derive(Clone)]
pub struct AppState {
    pub orders: OrderService,
    pub shipments: ShipmentService,
    pub coupons: CouponLedger,
}

impl AppState {
    pub fn new(
        store: Arc<dyn Store>,
        contacts: Arc<dyn ContactResolver>,
        notifier: Notifier,
        config: EngineConfig,
    ) -> Self {
        let orders = OrderService::new(Arc::clone(&store), contacts, notifier.clone(), config.clone());
        Self {
            coupons: orders.coupons().clone(),
            shipments: ShipmentService::new(store, notifier, config),
            orders,
        }
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(|| async { Json(json!({"status": "healthy", "service": "opensase-checkout"})) }))
        .route("/api/v1/orders", get(handlers::list_orders).post(handlers::create_order))
        .route("/api/v1/orders/:id", get(handlers::get_order))
        .route("/api/v1/orders/:id/confirm", post(handlers::confirm_order))
        .route("/api/v1/orders/:id/cancel", post(handlers::cancel_order))
        .route("/api/v1/orders/:id/status", put(handlers::update_order_status))
        .route("/api/v1/orders/:id/payment", put(handlers::update_payment_status))
        .route("/api/v1/orders/:id/shipment", get(handlers::order_shipment))
        .route("/api/v1/guest-orders/lookup", post(handlers::guest_order_lookup))
        .route("/api/v1/shipments", post(handlers::create_shipment))
        .route("/api/v1/shipments/:id", get(handlers::get_shipment))
        .route("/api/v1/shipments/:id/tracking", post(handlers::update_tracking))
        .route("/api/v1/shipments/:id/cancel", post(handlers::cancel_shipment))
        .route("/api/v1/coupons/validate", post(handlers::validate_coupon))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

// =============================================================================
// Caller identity
// =============================================================================

/// The caller as asserted by the gateway.
pub struct RequestActor(pub Actor);

fn header<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

#[async_trait]
impl<S> FromRequestParts<S> for RequestActor
where
    S: Send + Sync,
{
    type Rejection = CommerceError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let headers = &parts.headers;
        let user_id = header(headers, "x-user-id")
            .map(|raw| raw.parse::<Uuid>().map_err(|_| CommerceError::Validation("x-user-id is not a uuid".into())))
            .transpose()?;
        let role = match header(headers, "x-user-role") {
            None if user_id.is_some() => Role::Customer,
            None | Some("guest") => Role::Guest,
            Some("customer") => Role::Customer,
            Some("admin") => Role::Admin,
            Some("system") => Role::System,
            Some(other) => return Err(CommerceError::Validation(format!("unknown role {other}"))),
        };
        if role != Role::Guest && role != Role::System && user_id.is_none() {
            return Err(CommerceError::Forbidden(format!("{role} requests need x-user-id")));
        }
        let email = header(headers, "x-user-email").map(str::to_lowercase);
        Ok(Self(Actor { role, user_id, email }))
    }
}

// =============================================================================
// Error mapping
// =============================================================================

impl CommerceError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Validation(_)
            | Self::MissingContact
            | Self::InvalidTransition { .. }
            | Self::InvalidState { .. }
            | Self::Shipment(_) => StatusCode::BAD_REQUEST,
            Self::InsufficientStock { .. } | Self::Coupon(_) | Self::NotReady(_) => StatusCode::UNPROCESSABLE_ENTITY,
            Self::Forbidden(_) => StatusCode::FORBIDDEN,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::AlreadyExists(_) => StatusCode::CONFLICT,
            Self::ServiceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for CommerceError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let message = match &self {
            Self::Storage(e) => {
                error!(error = %e, "storage error");
                "internal storage error".to_string()
            }
            other => other.to_string(),
        };
        (status, Json(json!({ "error": self.code(), "message": message }))).into_response()
    }
}
