use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Catalogue identifier of a product. Valid identifiers are positive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProductId(pub i64);

impl ProductId {
    pub fn is_valid(&self) -> bool {
        self.0 > 0
    }

    pub fn get(&self) -> i64 {
        self.0
    }
}

impl fmt::Display for ProductId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for ProductId {
    fn from(v: i64) -> Self {
        ProductId(v)
    }
}

/// One transaction line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawSale {
    pub date: NaiveDate,
    pub product_id: ProductId,
    pub quantity: f64,
    pub unit_price: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProductSnapshot {
    pub product_id: ProductId,
    pub name: String,
    pub base_price: f64,
}

/// Current stock position of a product.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InventorySnapshot {
    pub product_id: ProductId,
    pub stock_level: f64,
    pub last_restock: Option<NaiveDate>,
}

/// A supplier's purchase price, valid from `effective_date` until superseded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceQuote {
    pub quote_id: i64,
    pub supplier_id: i64,
    pub price: f64,
    pub effective_date: NaiveDate,
}
