//! HTTP surface over the in-memory store.

use axum::{
    body::{to_bytes, Body},
    http::{Request, StatusCode},
    Router,
};
use rust_decimal_macros::dec;
use serde_json::{json, Value};
use std::sync::Arc;
use tower::ServiceExt;

use opensase_checkout::api::{router, AppState};
use opensase_checkout::domain::aggregates::{Product, StockKey, StockLevel};
use opensase_checkout::services::{Notifier, StaticContacts};
use opensase_checkout::store::MemoryStore;
use opensase_checkout::EngineConfig;

const ADMIN_ID: &str = "00000000-0000-0000-0000-000000000001";

fn app() -> (Router, Arc<MemoryStore>, StockKey) {
    let store = Arc::new(MemoryStore::new());
    let product = Product::create("HAT-01", "Non La", dec!(90000), 0).with_variant("Natural", None, 3);
    let key = StockKey::variant(product.id, product.variants[0].id);
    store.insert_product(product);
    let state = AppState::new(
        store.clone(),
        Arc::new(StaticContacts::new()),
        Notifier::disabled(),
        EngineConfig::default(),
    );
    (router(state), store, key)
}

async fn call(app: &Router, req: Request<Body>) -> (StatusCode, Value) {
    let res = app.clone().oneshot(req).await.unwrap();
    let status = res.status();
    let bytes = to_bytes(res.into_body(), usize::MAX).await.unwrap();
    let body = if bytes.is_empty() { Value::Null } else { serde_json::from_slice(&bytes).unwrap() };
    (status, body)
}

fn json_request(method: &str, uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn as_admin(mut req: Request<Body>) -> Request<Body> {
    let headers = req.headers_mut();
    headers.insert("x-user-id", ADMIN_ID.parse().unwrap());
    headers.insert("x-user-role", "admin".parse().unwrap());
    req
}

fn order_body(key: &StockKey, quantity: u32) -> Value {
    json!({
        "items": [{ "product_id": key.product_id, "variant_id": key.variant_id, "quantity": quantity }],
        "shipping_address": {
            "full_name": "Le Van C",
            "phone": "0987654321",
            "address_line": "8 Tran Phu",
            "city": "Da Nang",
            "district": "Hai Chau",
            "ward": "Thach Thang"
        },
        "payment_method": "cod",
        "email": "guest@example.vn"
    })
}

#[tokio::test]
async fn test_health() {
    let (app, _, _) = app();
    let (status, body) = call(&app, Request::get("/health").body(Body::empty()).unwrap()).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
}

#[tokio::test]
async fn test_checkout_flow_over_http() {
    let (app, store, key) = app();

    let (status, order) = call(&app, json_request("POST", "/api/v1/orders", order_body(&key, 2))).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(order["status"], "pending");
    assert_eq!(order["payment_status"], "cod");
    let id = order["id"].as_str().unwrap().to_string();
    assert_eq!(store.stock_level(&key), Some(StockLevel::new(3, 2)));

    let (status, body) = call(&app, json_request("POST", "/api/v1/orders", order_body(&key, 2))).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["error"], "insufficient_stock");

    let (status, body) = call(&app, json_request("POST", &format!("/api/v1/orders/{id}/confirm"), json!({}))).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["error"], "forbidden");

    let req = as_admin(json_request("POST", &format!("/api/v1/orders/{id}/confirm"), json!({})));
    let (status, body) = call(&app, req).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "shipping_ready");

    let req = as_admin(json_request(
        "POST",
        "/api/v1/shipments",
        json!({ "order_id": id, "tracking_code": "GHN9", "shipping_provider": "GHN" }),
    ));
    let (status, shipment) = call(&app, req).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(shipment["shipping_status"], "pending");

    let lookup = json!({ "order_number": order["order_number"], "email": "guest@example.vn" });
    let (status, body) = call(&app, json_request("POST", "/api/v1/guest-orders/lookup", lookup)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "shipping_created");
    assert_eq!(body["tracking_number"], "GHN9");
}

#[tokio::test]
async fn test_error_mapping() {
    let (app, _, _) = app();

    let missing = format!("/api/v1/orders/{}", uuid::Uuid::now_v7());
    let (status, body) = call(&app, as_admin(Request::get(missing).body(Body::empty()).unwrap())).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "not_found");

    let req = as_admin(json_request(
        "PUT",
        &format!("/api/v1/orders/{}/status", uuid::Uuid::now_v7()),
        json!({ "status": "teleported" }),
    ));
    let (status, body) = call(&app, req).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "validation_error");

    let check = json!({ "code": "NOPE", "subtotal": 100000 });
    let (status, body) = call(&app, json_request("POST", "/api/v1/coupons/validate", check)).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["error"], "coupon_not_found");
}
