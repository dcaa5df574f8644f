//! Read-only access to the business data the forecasting core depends on.

use anyhow::Result;
use async_trait::async_trait;

use crate::domain::{InventorySnapshot, PriceQuote, ProductId, ProductSnapshot, RawSale};

pub mod memory;
#[cfg(feature = "db")]
pub mod pg;

pub use memory::InMemorySalesStore;

/// Storage collaborator. The core never writes through this interface.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SalesStore: Send + Sync {
    /// All transaction lines of a product, ordered by date ascending.
    async fn get_sales(&self, product_id: ProductId) -> Result<Vec<RawSale>>;

    async fn get_product(&self, product_id: ProductId) -> Result<Option<ProductSnapshot>>;

    async fn get_inventory(&self, product_id: ProductId) -> Result<Option<InventorySnapshot>>;

    /// Supplier quotes of a product in any order.
    async fn get_supplier_prices(&self, product_id: ProductId) -> Result<Vec<PriceQuote>>;
}
