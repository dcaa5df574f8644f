#![cfg(feature = "db")]

use anyhow::Result;
use async_trait::async_trait;
use chrono::NaiveDate;
use sqlx::{postgres::PgPoolOptions, PgPool};

use super::SalesStore;
use crate::domain::{InventorySnapshot, PriceQuote, ProductId, ProductSnapshot, RawSale};

/// Reads the MicroAnalytics business schema (transaction, transaction_detail,
/// product, inventory, supplier_price).
pub struct PgSalesStore {
    pool: PgPool,
}

impl PgSalesStore {
    pub async fn connect(url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(url)
            .await?;
        Ok(Self { pool })
    }

    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SalesStore for PgSalesStore {
    async fn get_sales(&self, product_id: ProductId) -> Result<Vec<RawSale>> {
        let rows: Vec<(NaiveDate, f64, f64)> = sqlx::query_as(
            r#"
            SELECT t.fecha::date, td.cantidad::float8, td.precio_unitario::float8
            FROM transaction_detail td
            JOIN "transaction" t ON t.id = td.transaction_id
            WHERE td.product_id = $1
            ORDER BY t.fecha ASC, td.id ASC
            "#,
        )
        .bind(product_id.get())
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|(date, quantity, unit_price)| RawSale {
                date,
                product_id,
                quantity,
                unit_price,
            })
            .collect())
    }

    async fn get_product(&self, product_id: ProductId) -> Result<Option<ProductSnapshot>> {
        let row: Option<(String, Option<f64>)> = sqlx::query_as(
            "SELECT nombre, precio_base::float8 FROM product WHERE id = $1",
        )
        .bind(product_id.get())
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|(name, base_price)| ProductSnapshot {
            product_id,
            name,
            base_price: base_price.unwrap_or(0.0),
        }))
    }

    async fn get_inventory(&self, product_id: ProductId) -> Result<Option<InventorySnapshot>> {
        let row: Option<(Option<f64>, Option<NaiveDate>)> = sqlx::query_as(
            "SELECT stock_actual::float8, ultimo_ingreso::date FROM inventory WHERE product_id = $1",
        )
        .bind(product_id.get())
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|(stock, last_restock)| InventorySnapshot {
            product_id,
            stock_level: stock.unwrap_or(0.0),
            last_restock,
        }))
    }

    async fn get_supplier_prices(&self, product_id: ProductId) -> Result<Vec<PriceQuote>> {
        let rows: Vec<(i64, Option<i64>, f64, NaiveDate)> = sqlx::query_as(
            r#"
            SELECT id::int8, supplier_id::int8, precio::float8, fecha::date
            FROM supplier_price
            WHERE product_id = $1
            ORDER BY fecha DESC, id DESC
            "#,
        )
        .bind(product_id.get())
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|(quote_id, supplier_id, price, effective_date)| PriceQuote {
                quote_id,
                supplier_id: supplier_id.unwrap_or_default(),
                price,
                effective_date,
            })
            .collect())
    }
}
