//! Product Aggregate
//!
//! A product owns its sellable stock, either directly or through variants.
//! Every counter pair keeps `0 <= reserved <= stock`.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use uuid::Uuid;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Product {
    pub id: Uuid,
    pub sku: String,
    pub name: String,
    pub price: Decimal,
    /// Used only when the product has no variants.
    pub stock: i64,
    pub reserved: i64,
    pub status: ProductStatus,
    pub variants: Vec<Variant>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Variant {
    pub id: Uuid,
    pub sku: Option<String>,
    pub name: String,
    /// Overrides the product price when set.
    pub price: Option<Decimal>,
    pub stock: i64,
    pub reserved: i64,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProductStatus {
    #[default]
    Draft,
    Active,
    Archived,
}

impl ProductStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::Active => "active",
            Self::Archived => "archived",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "draft" => Some(Self::Draft),
            "active" => Some(Self::Active),
            "archived" => Some(Self::Archived),
            _ => None,
        }
    }
}

/// Identifies one independently lockable stock counter.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StockKey {
    pub product_id: Uuid,
    pub variant_id: Option<Uuid>,
}

impl StockKey {
    pub fn product(product_id: Uuid) -> Self {
        Self { product_id, variant_id: None }
    }

    pub fn variant(product_id: Uuid, variant_id: Uuid) -> Self {
        Self { product_id, variant_id: Some(variant_id) }
    }
}

impl fmt::Display for StockKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.variant_id {
            Some(v) => write!(f, "{}/{}", self.product_id, v),
            None => write!(f, "{}", self.product_id),
        }
    }
}

/// Physical units and provisional holds for one stock key.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockLevel {
    pub stock: i64,
    pub reserved: i64,
}

impl StockLevel {
    pub fn new(stock: i64, reserved: i64) -> Self {
        Self { stock, reserved }
    }

    pub fn available(&self) -> i64 {
        self.stock - self.reserved
    }

    pub fn is_consistent(&self) -> bool {
        0 <= self.reserved && self.reserved <= self.stock
    }

    /// Hold units for an unconfirmed order.
    pub fn reserve(&mut self, qty: i64) -> Result<(), StockError> {
        if qty <= 0 {
            return Err(StockError::InvalidQuantity(qty));
        }
        if self.available() < qty {
            return Err(StockError::Insufficient { requested: qty, available: self.available() });
        }
        self.reserved += qty;
        Ok(())
    }

    /// Turn a hold into a committed sale.
    pub fn deduct(&mut self, qty: i64) -> Result<(), StockError> {
        if qty <= 0 {
            return Err(StockError::InvalidQuantity(qty));
        }
        if self.reserved < qty {
            return Err(StockError::ReservationMissing { requested: qty, reserved: self.reserved });
        }
        self.stock -= qty;
        self.reserved -= qty;
        Ok(())
    }

    /// Drop a hold that never became a sale.
    pub fn release(&mut self, qty: i64) -> Result<(), StockError> {
        if qty <= 0 {
            return Err(StockError::InvalidQuantity(qty));
        }
        if self.reserved < qty {
            return Err(StockError::ReservationMissing { requested: qty, reserved: self.reserved });
        }
        self.reserved -= qty;
        Ok(())
    }

    /// Put sold units back on the shelf.
    pub fn restock(&mut self, qty: i64) -> Result<(), StockError> {
        if qty <= 0 {
            return Err(StockError::InvalidQuantity(qty));
        }
        self.stock += qty;
        Ok(())
    }
}

/// The four counter mutations of the two-phase stock commitment.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StockOp {
    Reserve,
    Deduct,
    Release,
    Restock,
}

impl StockOp {
    pub fn apply(self, level: &mut StockLevel, qty: i64) -> Result<(), StockError> {
        match self {
            Self::Reserve => level.reserve(qty),
            Self::Deduct => level.deduct(qty),
            Self::Release => level.release(qty),
            Self::Restock => level.restock(qty),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockMovement {
    pub key: StockKey,
    pub op: StockOp,
    pub quantity: i64,
}

impl Product {
    pub fn create(sku: impl Into<String>, name: impl Into<String>, price: Decimal, stock: i64) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::now_v7(),
            sku: sku.into().trim().to_uppercase(),
            name: name.into(),
            price,
            stock,
            reserved: 0,
            status: ProductStatus::Active,
            variants: vec![],
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_variant(mut self, name: impl Into<String>, price: Option<Decimal>, stock: i64) -> Self {
        self.variants.push(Variant {
            id: Uuid::now_v7(),
            sku: None,
            name: name.into(),
            price,
            stock,
            reserved: 0,
        });
        self
    }

    pub fn has_variants(&self) -> bool {
        !self.variants.is_empty()
    }

    pub fn is_purchasable(&self) -> bool {
        self.status == ProductStatus::Active
    }

    pub fn variant(&self, variant_id: Uuid) -> Option<&Variant> {
        self.variants.iter().find(|v| v.id == variant_id)
    }

    /// Resolve the stock key an order line should hold against.
    pub fn stock_key(&self, variant_id: Option<Uuid>) -> Result<StockKey, ProductError> {
        match (variant_id, self.has_variants()) {
            (Some(v), true) => self
                .variant(v)
                .map(|_| StockKey::variant(self.id, v))
                .ok_or(ProductError::VariantNotFound { product_id: self.id, variant_id: v }),
            (Some(v), false) => Err(ProductError::VariantNotFound { product_id: self.id, variant_id: v }),
            (None, true) => Err(ProductError::VariantRequired(self.id)),
            (None, false) => Ok(StockKey::product(self.id)),
        }
    }

    /// Live unit price for a line, snapshotted into the order at placement.
    pub fn unit_price(&self, variant_id: Option<Uuid>) -> Decimal {
        variant_id
            .and_then(|v| self.variant(v))
            .and_then(|v| v.price)
            .unwrap_or(self.price)
    }

    pub fn stock_level(&self, key: &StockKey) -> Option<StockLevel> {
        if key.product_id != self.id {
            return None;
        }
        match key.variant_id {
            Some(v) => self.variant(v).map(|v| StockLevel::new(v.stock, v.reserved)),
            None if !self.has_variants() => Some(StockLevel::new(self.stock, self.reserved)),
            None => None,
        }
    }

    /// Write a counter pair back after it was checked and mutated.
    pub fn set_stock_level(&mut self, key: &StockKey, level: StockLevel) -> Result<(), ProductError> {
        match key.variant_id {
            Some(v) => {
                let variant = self
                    .variants
                    .iter_mut()
                    .find(|x| x.id == v)
                    .ok_or(ProductError::VariantNotFound { product_id: self.id, variant_id: v })?;
                variant.stock = level.stock;
                variant.reserved = level.reserved;
            }
            None => {
                self.stock = level.stock;
                self.reserved = level.reserved;
            }
        }
        self.updated_at = Utc::now();
        Ok(())
    }

    pub fn display_name(&self, variant_id: Option<Uuid>) -> (String, Option<String>) {
        let variant = variant_id.and_then(|v| self.variant(v)).map(|v| v.name.clone());
        (self.name.clone(), variant)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StockError {
    #[error("quantity must be positive, got {0}")]
    InvalidQuantity(i64),
    #[error("requested {requested}, only {available} available")]
    Insufficient { requested: i64, available: i64 },
    #[error("requested {requested} from a reservation of {reserved}")]
    ReservationMissing { requested: i64, reserved: i64 },
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProductError {
    #[error("variant {variant_id} not found on product {product_id}")]
    VariantNotFound { product_id: Uuid, variant_id: Uuid },
    #[error("product {0} is sold by variant; a variant id is required")]
    VariantRequired(Uuid),
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_reserve_deduct_release() {
        let mut level = StockLevel::new(5, 0);
        level.reserve(3).unwrap();
        assert_eq!(level, StockLevel::new(5, 3));
        assert_eq!(level.available(), 2);
        assert!(matches!(level.reserve(3), Err(StockError::Insufficient { requested: 3, available: 2 })));
        level.deduct(3).unwrap();
        assert_eq!(level, StockLevel::new(2, 0));
        assert!(level.release(1).is_err());
        level.restock(3).unwrap();
        assert_eq!(level, StockLevel::new(5, 0));
        assert!(level.is_consistent());
    }

    #[test]
    fn test_non_positive_quantity_rejected() {
        let mut level = StockLevel::new(5, 0);
        assert_eq!(level.reserve(0), Err(StockError::InvalidQuantity(0)));
        assert_eq!(level.restock(-1), Err(StockError::InvalidQuantity(-1)));
        assert_eq!(level, StockLevel::new(5, 0));
    }

    #[test]
    fn test_stock_key_resolution() {
        let plain = Product::create("tee-001", "Tee", dec!(150000), 10);
        assert_eq!(plain.sku, "TEE-001");
        assert_eq!(plain.stock_key(None).unwrap(), StockKey::product(plain.id));
        assert!(plain.stock_key(Some(Uuid::now_v7())).is_err());

        let sized = Product::create("tee-002", "Tee", dec!(150000), 0).with_variant("XL", Some(dec!(170000)), 4);
        let v = sized.variants[0].id;
        assert!(matches!(sized.stock_key(None), Err(ProductError::VariantRequired(_))));
        let key = sized.stock_key(Some(v)).unwrap();
        assert_eq!(sized.stock_level(&key), Some(StockLevel::new(4, 0)));
        assert_eq!(sized.unit_price(Some(v)), dec!(170000));
        assert_eq!(sized.unit_price(None), dec!(150000));
    }

    #[test]
    fn test_set_stock_level() {
        let mut p = Product::create("mug", "Mug", dec!(90000), 0).with_variant("Blue", None, 4);
        let key = StockKey::variant(p.id, p.variants[0].id);
        p.set_stock_level(&key, StockLevel::new(4, 2)).unwrap();
        assert_eq!(p.variants[0].reserved, 2);
        assert_eq!(p.unit_price(Some(key.variant_id.unwrap())), dec!(90000));
    }
}
