//! Shared fixtures for the integration suites.
#![allow(dead_code)]

use std::sync::Arc;

use chrono::{Duration, NaiveDate};
use tempfile::TempDir;

use microanalytics_forecast::{
    config::Config,
    domain::{InventorySnapshot, ProductId, ProductSnapshot, RawSale},
    forecast::synthetic,
    repo::InMemorySalesStore,
};

pub fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

/// Config whose cache and comparison results live under `dir`.
pub fn config_in(dir: &TempDir) -> Config {
    let mut cfg = Config::default();
    cfg.cache.root = dir.path().join("model_cache");
    cfg.comparison.results_dir = dir.path().join("model_comparisons");
    cfg
}

/// `days` of recorded sales around ten units a day with a weekly cycle.
pub fn seasonal_sales(product: i64, days: u32, end: NaiveDate) -> Vec<RawSale> {
    synthetic::generate(ProductId(product), days, end, 25.0)
}

/// Store holding catalogue, inventory and `sales` for one product.
pub fn store_with(product: i64, sales: Vec<RawSale>) -> Arc<InMemorySalesStore> {
    let first = sales.first().map(|s| s.date);
    Arc::new(
        InMemorySalesStore::new()
            .with_product(ProductSnapshot {
                product_id: ProductId(product),
                name: format!("Product {product}"),
                base_price: 25.0,
            })
            .with_inventory(InventorySnapshot {
                product_id: ProductId(product),
                stock_level: 150.0,
                last_restock: first.map(|d| d + Duration::days(10)),
            })
            .with_sales(sales),
    )
}
