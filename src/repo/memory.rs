use anyhow::Result;
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;

use super::SalesStore;
use crate::domain::{InventorySnapshot, PriceQuote, ProductId, ProductSnapshot, RawSale};

#[derive(Default)]
struct Tables {
    sales: HashMap<ProductId, Vec<RawSale>>,
    products: HashMap<ProductId, ProductSnapshot>,
    inventory: HashMap<ProductId, InventorySnapshot>,
    quotes: HashMap<ProductId, Vec<PriceQuote>>,
}

/// Process-local store used by tests and by the binary when no database is configured.
#[derive(Default)]
pub struct InMemorySalesStore {
    tables: RwLock<Tables>,
}

impl InMemorySalesStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_product(self, product: ProductSnapshot) -> Self {
        self.tables.write().products.insert(product.product_id, product);
        self
    }

    pub fn with_inventory(self, inventory: InventorySnapshot) -> Self {
        self.tables
            .write()
            .inventory
            .insert(inventory.product_id, inventory);
        self
    }

    pub fn with_sales(self, sales: impl IntoIterator<Item = RawSale>) -> Self {
        for sale in sales {
            self.insert_sale(sale);
        }
        self
    }

    pub fn with_quote(self, product_id: ProductId, quote: PriceQuote) -> Self {
        self.tables
            .write()
            .quotes
            .entry(product_id)
            .or_default()
            .push(quote);
        self
    }

    pub fn insert_sale(&self, sale: RawSale) {
        let mut tables = self.tables.write();
        let rows = tables.sales.entry(sale.product_id).or_default();
        rows.push(sale);
        rows.sort_by_key(|s| s.date);
    }
}

#[async_trait]
impl SalesStore for InMemorySalesStore {
    async fn get_sales(&self, product_id: ProductId) -> Result<Vec<RawSale>> {
        Ok(self
            .tables
            .read()
            .sales
            .get(&product_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn get_product(&self, product_id: ProductId) -> Result<Option<ProductSnapshot>> {
        Ok(self.tables.read().products.get(&product_id).cloned())
    }

    async fn get_inventory(&self, product_id: ProductId) -> Result<Option<InventorySnapshot>> {
        Ok(self.tables.read().inventory.get(&product_id).cloned())
    }

    async fn get_supplier_prices(&self, product_id: ProductId) -> Result<Vec<PriceQuote>> {
        Ok(self
            .tables
            .read()
            .quotes
            .get(&product_id)
            .cloned()
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn sale(day: u32, qty: f64) -> RawSale {
        RawSale {
            date: NaiveDate::from_ymd_opt(2024, 3, day).unwrap(),
            product_id: ProductId(1),
            quantity: qty,
            unit_price: 10.0,
        }
    }

    #[tokio::test]
    async fn test_sales_are_returned_in_date_order() {
        let store = InMemorySalesStore::new().with_sales(vec![sale(3, 1.0), sale(1, 2.0), sale(2, 3.0)]);
        let rows = store.get_sales(ProductId(1)).await.unwrap();
        let days: Vec<u32> = rows.iter().map(|r| chrono::Datelike::day(&r.date)).collect();
        assert_eq!(days, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn test_unknown_product_is_empty() {
        let store = InMemorySalesStore::new();
        assert!(store.get_sales(ProductId(9)).await.unwrap().is_empty());
        assert!(store.get_product(ProductId(9)).await.unwrap().is_none());
        assert!(store.get_inventory(ProductId(9)).await.unwrap().is_none());
    }
}
