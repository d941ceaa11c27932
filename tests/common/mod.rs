//! Shared fixtures: services wired over the in-memory store.

#![allow(dead_code)]

use rust_decimal::Decimal;
use std::sync::Arc;
use uuid::Uuid;

use opensase_checkout::domain::aggregates::{
    Order, PaymentMethod, Product, ShippingAddress, StockKey, StockLevel,
};
use opensase_checkout::services::{
    CreateOrderRequest, Notifier, OrderItemRequest, OrderService, RecordingPublisher, ShipmentService,
    StaticContacts,
};
use opensase_checkout::store::MemoryStore;
use opensase_checkout::{Actor, EngineConfig};

pub struct Harness {
    pub store: Arc<MemoryStore>,
    pub contacts: Arc<StaticContacts>,
    pub events: Arc<RecordingPublisher>,
    pub orders: OrderService,
    pub shipments: ShipmentService,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_publisher(RecordingPublisher::new())
    }

    pub fn with_publisher(publisher: RecordingPublisher) -> Self {
        let store = Arc::new(MemoryStore::new());
        let contacts = Arc::new(StaticContacts::new());
        let events = Arc::new(publisher);
        let notifier = Notifier::new(events.clone());
        let config = EngineConfig::default();
        Self {
            orders: OrderService::new(store.clone(), contacts.clone(), notifier.clone(), config.clone()),
            shipments: ShipmentService::new(store.clone(), notifier, config),
            store,
            contacts,
            events,
        }
    }

    /// A product sold by a single variant `M`; returns its stock key.
    pub fn variant_product(&self, price: Decimal, stock: i64) -> StockKey {
        let product = Product::create("TEE-01", "Basic Tee", price, 0).with_variant("M", None, stock);
        let key = StockKey::variant(product.id, product.variants[0].id);
        self.store.insert_product(product);
        key
    }

    /// A product without variants; returns its stock key.
    pub fn plain_product(&self, price: Decimal, stock: i64) -> StockKey {
        let product = Product::create("MUG-01", "Mug", price, stock);
        let key = StockKey::product(product.id);
        self.store.insert_product(product);
        key
    }

    pub fn level(&self, key: &StockKey) -> StockLevel {
        self.store.stock_level(key).unwrap()
    }

    pub async fn guest_order(&self, key: StockKey, quantity: u32, method: PaymentMethod) -> Order {
        self.orders
            .create_order(&Actor::guest(None), request(key, quantity, method))
            .await
            .unwrap()
    }
}

pub fn admin() -> Actor {
    Actor::admin(Uuid::from_u128(1))
}

pub fn address() -> ShippingAddress {
    ShippingAddress {
        full_name: "Tran Thi B".into(),
        phone: "091 234 5678".into(),
        address_line: "45 Nguyen Hue".into(),
        city: Some("Ho Chi Minh".into()),
        district: Some("Quan 1".into()),
        ward: Some("Ben Nghe".into()),
        ..Default::default()
    }
}

pub fn request(key: StockKey, quantity: u32, method: PaymentMethod) -> CreateOrderRequest {
    CreateOrderRequest {
        items: vec![OrderItemRequest { product_id: key.product_id, variant_id: key.variant_id, quantity }],
        shipping_address: address(),
        payment_method: method,
        email: Some("guest@example.vn".into()),
        phone: None,
        coupon_code: None,
        note: None,
    }
}
