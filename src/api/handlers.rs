use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use rust_decimal::Decimal;
use serde::Deserialize;
use uuid::Uuid;

use super::{AppState, RequestActor};
use crate::domain::aggregates::{Order, OrderStatus, PaymentStatus, Shipment};
use crate::services::{CouponQuote, CreateOrderRequest, CreateShipmentRequest, TrackingUpdate};
use crate::{CommerceError, Result};

#[derive(Debug, Deserialize)]
pub struct ListParams {
    pub user_id: Option<Uuid>,
}

#[derive(Debug, Default, Deserialize)]
pub struct NoteBody {
    #[serde(default)]
    pub note: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct CancelBody {
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct StatusBody {
    pub status: String,
    #[serde(default)]
    pub note: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct PaymentBody {
    pub payment_status: String,
    #[serde(default)]
    pub note: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct GuestLookup {
    pub order_number: String,
    pub email: String,
}

#[derive(Debug, Deserialize)]
pub struct CouponCheck {
    pub code: String,
    pub subtotal: Decimal,
}

pub async fn create_order(
    State(s): State<AppState>,
    RequestActor(actor): RequestActor,
    Json(req): Json<CreateOrderRequest>,
) -> Result<(StatusCode, Json<Order>)> {
    let order = s.orders.create_order(&actor, req).await?;
    Ok((StatusCode::CREATED, Json(order)))
}

pub async fn list_orders(
    State(s): State<AppState>,
    RequestActor(actor): RequestActor,
    Query(p): Query<ListParams>,
) -> Result<Json<Vec<Order>>> {
    let user_id = p
        .user_id
        .or(actor.user_id)
        .ok_or_else(|| CommerceError::Validation("user_id is required".into()))?;
    Ok(Json(s.orders.list_orders_for_user(&actor, user_id).await?))
}

pub async fn get_order(
    State(s): State<AppState>,
    RequestActor(actor): RequestActor,
    Path(id): Path<Uuid>,
) -> Result<Json<Order>> {
    Ok(Json(s.orders.get_order(&actor, id).await?))
}

pub async fn confirm_order(
    State(s): State<AppState>,
    RequestActor(actor): RequestActor,
    Path(id): Path<Uuid>,
    body: Option<Json<NoteBody>>,
) -> Result<Json<Order>> {
    let note = body.and_then(|Json(b)| b.note);
    Ok(Json(s.orders.confirm_order(&actor, id, note).await?))
}

pub async fn cancel_order(
    State(s): State<AppState>,
    RequestActor(actor): RequestActor,
    Path(id): Path<Uuid>,
    body: Option<Json<CancelBody>>,
) -> Result<Json<Order>> {
    let reason = body.and_then(|Json(b)| b.reason);
    Ok(Json(s.orders.cancel_order(&actor, id, reason).await?))
}

pub async fn update_order_status(
    State(s): State<AppState>,
    RequestActor(actor): RequestActor,
    Path(id): Path<Uuid>,
    Json(body): Json<StatusBody>,
) -> Result<Json<Order>> {
    let target: OrderStatus = body.status.trim().parse().map_err(|e| CommerceError::Validation(format!("{e}")))?;
    Ok(Json(s.orders.update_order_status(&actor, id, target, body.note).await?))
}

pub async fn update_payment_status(
    State(s): State<AppState>,
    RequestActor(actor): RequestActor,
    Path(id): Path<Uuid>,
    Json(body): Json<PaymentBody>,
) -> Result<Json<Order>> {
    let status: PaymentStatus = body
        .payment_status
        .trim()
        .parse()
        .map_err(|e| CommerceError::Validation(format!("{e}")))?;
    Ok(Json(s.orders.update_payment_status(&actor, id, status, body.note).await?))
}

pub async fn order_shipment(
    State(s): State<AppState>,
    RequestActor(actor): RequestActor,
    Path(id): Path<Uuid>,
) -> Result<Json<Shipment>> {
    Ok(Json(s.shipments.shipment_for_order(&actor, id).await?))
}

pub async fn guest_order_lookup(State(s): State<AppState>, Json(body): Json<GuestLookup>) -> Result<Json<Order>> {
    Ok(Json(s.orders.get_guest_order(&body.order_number, &body.email).await?))
}

pub async fn create_shipment(
    State(s): State<AppState>,
    RequestActor(actor): RequestActor,
    Json(req): Json<CreateShipmentRequest>,
) -> Result<(StatusCode, Json<Shipment>)> {
    let shipment = s.shipments.create_shipment(&actor, req).await?;
    Ok((StatusCode::CREATED, Json(shipment)))
}

pub async fn get_shipment(
    State(s): State<AppState>,
    RequestActor(actor): RequestActor,
    Path(id): Path<Uuid>,
) -> Result<Json<Shipment>> {
    Ok(Json(s.shipments.get_shipment(&actor, id).await?))
}

pub async fn update_tracking(
    State(s): State<AppState>,
    RequestActor(actor): RequestActor,
    Path(id): Path<Uuid>,
    Json(update): Json<TrackingUpdate>,
) -> Result<Json<Shipment>> {
    Ok(Json(s.shipments.update_tracking(&actor, id, update).await?))
}

pub async fn cancel_shipment(
    State(s): State<AppState>,
    RequestActor(actor): RequestActor,
    Path(id): Path<Uuid>,
    body: Option<Json<CancelBody>>,
) -> Result<Json<Shipment>> {
    let reason = body.and_then(|Json(b)| b.reason);
    Ok(Json(s.shipments.cancel_shipment(&actor, id, reason).await?))
}

pub async fn validate_coupon(State(s): State<AppState>, Json(body): Json<CouponCheck>) -> Result<Json<CouponQuote>> {
    Ok(Json(s.coupons.validate(&body.code, body.subtotal).await?))
}
