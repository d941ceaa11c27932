//! Contention against a live Postgres. Run with
//! `DATABASE_URL=postgres://... cargo test --test postgres -- --ignored`.

mod common;

use chrono::{Duration, Utc};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use std::env;
use std::sync::Arc;
use uuid::Uuid;

use common::{admin, request};
use opensase_checkout::domain::aggregates::{PaymentMethod, StockKey};
use opensase_checkout::services::{Notifier, OrderService, StaticContacts};
use opensase_checkout::store::PgStore;
use opensase_checkout::{Actor, CommerceError, EngineConfig};

const BUYERS: usize = 16;

async fn connect() -> Option<PgPool> {
    let database_url = env::var("DATABASE_URL").ok()?;
    let pool = PgPoolOptions::new()
        .max_connections(BUYERS as u32)
        .connect(&database_url)
        .await
        .expect("pg pool");
    sqlx::migrate!("./migrations").run(&pool).await.expect("migrations");
    Some(pool)
}

fn service(pool: &PgPool) -> OrderService {
    let config = EngineConfig { max_retries: 8, ..EngineConfig::default() };
    OrderService::new(
        Arc::new(PgStore::new(pool.clone())),
        Arc::new(StaticContacts::new()),
        Notifier::disabled(),
        config,
    )
}

async fn seed_variant(pool: &PgPool, stock: i64) -> StockKey {
    let (product_id, variant_id) = (Uuid::now_v7(), Uuid::now_v7());
    sqlx::query("INSERT INTO products (id, sku, name, price, status) VALUES ($1, $2, 'Ao dai', 1000000, 'active')")
        .bind(product_id)
        .bind(format!("AO-{product_id}"))
        .execute(pool)
        .await
        .expect("product");
    sqlx::query("INSERT INTO product_variants (id, product_id, name, stock) VALUES ($1, $2, 'M', $3)")
        .bind(variant_id)
        .bind(product_id)
        .bind(stock)
        .execute(pool)
        .await
        .expect("variant");
    StockKey::variant(product_id, variant_id)
}

async fn variant_level(pool: &PgPool, key: &StockKey) -> (i64, i64) {
    sqlx::query_as("SELECT stock, reserved FROM product_variants WHERE id = $1")
        .bind(key.variant_id)
        .fetch_one(pool)
        .await
        .expect("variant row")
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
#[ignore]
async fn test_conditional_reserve_does_not_oversell() {
    let Some(pool) = connect().await else { return };
    let orders = service(&pool);
    let key = seed_variant(&pool, 5).await;

    let mut handles = Vec::with_capacity(BUYERS);
    for _ in 0..BUYERS {
        let orders = orders.clone();
        handles.push(tokio::spawn(async move {
            orders
                .create_order(&Actor::guest(None), request(key, 2, PaymentMethod::Cod))
                .await
        }));
    }
    let mut placed = Vec::new();
    for handle in handles {
        match handle.await.unwrap() {
            Ok(order) => placed.push(order),
            Err(CommerceError::InsufficientStock { requested: 2, .. }) => {}
            Err(other) => panic!("unexpected error: {other}"),
        }
    }
    assert_eq!(placed.len(), 2);
    assert_eq!(variant_level(&pool, &key).await, (5, 4));

    let mut handles = Vec::new();
    for (i, order) in placed.into_iter().enumerate() {
        let orders = orders.clone();
        handles.push(tokio::spawn(async move {
            if i % 2 == 0 {
                orders.confirm_order(&admin(), order.id, None).await
            } else {
                orders.cancel_order(&admin(), order.id, None).await
            }
        }));
    }
    for handle in handles {
        handle.await.unwrap().unwrap();
    }
    assert_eq!(variant_level(&pool, &key).await, (3, 0));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
#[ignore]
async fn test_racing_confirms_apply_once() {
    let Some(pool) = connect().await else { return };
    let orders = service(&pool);
    let key = seed_variant(&pool, 4).await;
    let order = orders
        .create_order(&Actor::guest(None), request(key, 3, PaymentMethod::Cod))
        .await
        .unwrap();

    let mut handles = Vec::new();
    for _ in 0..4 {
        let orders = orders.clone();
        let id = order.id;
        handles.push(tokio::spawn(async move { orders.confirm_order(&admin(), id, None).await }));
    }
    let mut confirmed = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => confirmed += 1,
            Err(CommerceError::InvalidTransition { .. }) => {}
            Err(other) => panic!("unexpected error: {other}"),
        }
    }
    assert_eq!(confirmed, 1);
    assert_eq!(variant_level(&pool, &key).await, (1, 0));
    let stored = orders.get_order(&admin(), order.id).await.unwrap();
    assert_eq!(stored.history().len(), 3);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
#[ignore]
async fn test_guarded_coupon_count_is_not_overdrawn() {
    let Some(pool) = connect().await else { return };
    let orders = service(&pool);
    let key = seed_variant(&pool, 100).await;
    let code = format!("FLASH{}", Uuid::now_v7().simple());
    let now = Utc::now();
    sqlx::query(
        "INSERT INTO coupons (id, code, discount_type, discount_value, usage_limit, valid_from, valid_until) \
         VALUES ($1, $2, 'fixed', 100000, 3, $3, $4)",
    )
    .bind(Uuid::now_v7())
    .bind(code.to_uppercase())
    .bind(now - Duration::hours(1))
    .bind(now + Duration::hours(1))
    .execute(&pool)
    .await
    .expect("coupon");

    let mut handles = Vec::new();
    for _ in 0..BUYERS {
        let orders = orders.clone();
        let code = code.clone();
        handles.push(tokio::spawn(async move {
            let mut req = request(key, 1, PaymentMethod::Cod);
            req.coupon_code = Some(code);
            orders.create_order(&Actor::guest(None), req).await
        }));
    }
    let mut redeemed = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => redeemed += 1,
            Err(CommerceError::Coupon(_)) => {}
            Err(other) => panic!("unexpected error: {other}"),
        }
    }
    assert_eq!(redeemed, 3);
    let (used,): (i64,) = sqlx::query_as("SELECT used_count FROM coupons WHERE code = $1")
        .bind(code.to_uppercase())
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(used, 3);
    assert_eq!(variant_level(&pool, &key).await, (100, 3));
}
