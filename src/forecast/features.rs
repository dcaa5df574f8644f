//! Feature enrichment
//!
//! Turns the raw transaction history of one product into a date-indexed table
//! of model-ready columns. Every history-derived column of a row is computed
//! from strictly earlier rows only, so the row's own outcome never leaks into
//! its inputs.

use chrono::{Datelike, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use statrs::statistics::Statistics;
use std::{collections::BTreeMap, future::Future, sync::Arc, time::Duration as StdDuration};
use strum::{AsRefStr, Display, EnumIter, EnumString, IntoEnumIterator};
use tracing::{debug, info, warn};

use crate::{
    domain::{InventorySnapshot, PriceQuote, ProductId, RawSale},
    error::{ForecastError, Result},
    forecast::synthetic,
    repo::SalesStore,
};

/// Trailing row windows used by the rolling aggregates.
pub const ROLLING_WINDOWS: [usize; 3] = [7, 30, 90];
const TREND_WINDOW: usize = 30;
const FREQUENCY_WINDOW_DAYS: i64 = 30;

/// Columns of an enriched feature table.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumIter,
    EnumString,
    AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum FeatureColumn {
    /// Units sold on the day (the prediction target).
    Quantity,
    DayOfWeek,
    DayOfMonth,
    Month,
    Quarter,
    Season,
    IsWeekend,
    IsMonthStart,
    IsMonthEnd,
    BasePrice,
    SalePrice,
    SupplierPrice,
    Margin,
    PriceVariation,
    SupplierPriceChange,
    PriceElasticity,
    StockLevel,
    DaysSinceRestock,
    Turnover,
    #[serde(rename = "sales_7d_sum")]
    #[strum(serialize = "sales_7d_sum")]
    Sales7dSum,
    #[serde(rename = "sales_30d_sum")]
    #[strum(serialize = "sales_30d_sum")]
    Sales30dSum,
    #[serde(rename = "sales_90d_sum")]
    #[strum(serialize = "sales_90d_sum")]
    Sales90dSum,
    #[serde(rename = "sales_7d_mean")]
    #[strum(serialize = "sales_7d_mean")]
    Sales7dMean,
    #[serde(rename = "sales_30d_mean")]
    #[strum(serialize = "sales_30d_mean")]
    Sales30dMean,
    #[serde(rename = "sales_90d_mean")]
    #[strum(serialize = "sales_90d_mean")]
    Sales90dMean,
    #[serde(rename = "trend_30d")]
    #[strum(serialize = "trend_30d")]
    Trend30d,
    #[serde(rename = "volatility_30d")]
    #[strum(serialize = "volatility_30d")]
    Volatility30d,
    PurchaseFrequency,
    SeasonalityIndex,
}

/// Broad family of a column, used to pick an imputation strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnKind {
    Target,
    Calendar,
    Price,
    Ratio,
    Inventory,
    Rolling,
}

impl FeatureColumn {
    pub fn kind(&self) -> ColumnKind {
        use FeatureColumn::*;
        match self {
            Quantity => ColumnKind::Target,
            DayOfWeek | DayOfMonth | Month | Quarter | Season | IsWeekend | IsMonthStart
            | IsMonthEnd => ColumnKind::Calendar,
            BasePrice | SalePrice | SupplierPrice => ColumnKind::Price,
            Margin | PriceVariation | SupplierPriceChange | PriceElasticity | Turnover
            | PurchaseFrequency | SeasonalityIndex => ColumnKind::Ratio,
            StockLevel | DaysSinceRestock => ColumnKind::Inventory,
            Sales7dSum | Sales30dSum | Sales90dSum | Sales7dMean | Sales30dMean
            | Sales90dMean | Trend30d | Volatility30d => ColumnKind::Rolling,
        }
    }

    /// Columns without which a table cannot be used for training.
    pub fn required() -> &'static [FeatureColumn] {
        &[
            FeatureColumn::Quantity,
            FeatureColumn::BasePrice,
            FeatureColumn::SalePrice,
            FeatureColumn::StockLevel,
        ]
    }

    pub fn all() -> Vec<FeatureColumn> {
        FeatureColumn::iter().collect()
    }
}

/// Whether a table was built from recorded sales or from the cold-start generator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum DataOrigin {
    Observed,
    Synthetic,
}

/// One enriched (product, date) row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnrichedFeatureRow {
    pub date: NaiveDate,
    pub quantity: f64,
    pub day_of_week: f64,
    pub day_of_month: f64,
    pub month: f64,
    pub quarter: f64,
    pub season: f64,
    pub is_weekend: f64,
    pub is_month_start: f64,
    pub is_month_end: f64,
    pub base_price: f64,
    pub sale_price: f64,
    pub supplier_price: f64,
    pub margin: f64,
    pub price_variation: f64,
    pub supplier_price_change: f64,
    pub price_elasticity: f64,
    pub stock_level: f64,
    pub days_since_restock: f64,
    pub turnover: f64,
    pub sales_7d_sum: f64,
    pub sales_30d_sum: f64,
    pub sales_90d_sum: f64,
    pub sales_7d_mean: f64,
    pub sales_30d_mean: f64,
    pub sales_90d_mean: f64,
    pub trend_30d: f64,
    pub volatility_30d: f64,
    pub purchase_frequency: f64,
    pub seasonality_index: f64,
}

impl EnrichedFeatureRow {
    /// A row for `date` with calendar fields filled and everything else missing.
    pub fn blank(date: NaiveDate) -> Self {
        let mut row = Self {
            date,
            quantity: f64::NAN,
            day_of_week: f64::NAN,
            day_of_month: f64::NAN,
            month: f64::NAN,
            quarter: f64::NAN,
            season: f64::NAN,
            is_weekend: f64::NAN,
            is_month_start: f64::NAN,
            is_month_end: f64::NAN,
            base_price: f64::NAN,
            sale_price: f64::NAN,
            supplier_price: f64::NAN,
            margin: f64::NAN,
            price_variation: f64::NAN,
            supplier_price_change: f64::NAN,
            price_elasticity: f64::NAN,
            stock_level: f64::NAN,
            days_since_restock: f64::NAN,
            turnover: f64::NAN,
            sales_7d_sum: f64::NAN,
            sales_30d_sum: f64::NAN,
            sales_90d_sum: f64::NAN,
            sales_7d_mean: f64::NAN,
            sales_30d_mean: f64::NAN,
            sales_90d_mean: f64::NAN,
            trend_30d: f64::NAN,
            volatility_30d: f64::NAN,
            purchase_frequency: f64::NAN,
            seasonality_index: f64::NAN,
        };
        for (col, value) in calendar_values(date) {
            row.set(col, value);
        }
        row
    }

    pub fn get(&self, column: FeatureColumn) -> f64 {
        use FeatureColumn::*;
        match column {
            Quantity => self.quantity,
            DayOfWeek => self.day_of_week,
            DayOfMonth => self.day_of_month,
            Month => self.month,
            Quarter => self.quarter,
            Season => self.season,
            IsWeekend => self.is_weekend,
            IsMonthStart => self.is_month_start,
            IsMonthEnd => self.is_month_end,
            BasePrice => self.base_price,
            SalePrice => self.sale_price,
            SupplierPrice => self.supplier_price,
            Margin => self.margin,
            PriceVariation => self.price_variation,
            SupplierPriceChange => self.supplier_price_change,
            PriceElasticity => self.price_elasticity,
            StockLevel => self.stock_level,
            DaysSinceRestock => self.days_since_restock,
            Turnover => self.turnover,
            Sales7dSum => self.sales_7d_sum,
            Sales30dSum => self.sales_30d_sum,
            Sales90dSum => self.sales_90d_sum,
            Sales7dMean => self.sales_7d_mean,
            Sales30dMean => self.sales_30d_mean,
            Sales90dMean => self.sales_90d_mean,
            Trend30d => self.trend_30d,
            Volatility30d => self.volatility_30d,
            PurchaseFrequency => self.purchase_frequency,
            SeasonalityIndex => self.seasonality_index,
        }
    }

    pub fn set(&mut self, column: FeatureColumn, value: f64) {
        use FeatureColumn::*;
        let slot = match column {
            Quantity => &mut self.quantity,
            DayOfWeek => &mut self.day_of_week,
            DayOfMonth => &mut self.day_of_month,
            Month => &mut self.month,
            Quarter => &mut self.quarter,
            Season => &mut self.season,
            IsWeekend => &mut self.is_weekend,
            IsMonthStart => &mut self.is_month_start,
            IsMonthEnd => &mut self.is_month_end,
            BasePrice => &mut self.base_price,
            SalePrice => &mut self.sale_price,
            SupplierPrice => &mut self.supplier_price,
            Margin => &mut self.margin,
            PriceVariation => &mut self.price_variation,
            SupplierPriceChange => &mut self.supplier_price_change,
            PriceElasticity => &mut self.price_elasticity,
            StockLevel => &mut self.stock_level,
            DaysSinceRestock => &mut self.days_since_restock,
            Turnover => &mut self.turnover,
            Sales7dSum => &mut self.sales_7d_sum,
            Sales30dSum => &mut self.sales_30d_sum,
            Sales90dSum => &mut self.sales_90d_sum,
            Sales7dMean => &mut self.sales_7d_mean,
            Sales30dMean => &mut self.sales_30d_mean,
            Sales90dMean => &mut self.sales_90d_mean,
            Trend30d => &mut self.trend_30d,
            Volatility30d => &mut self.volatility_30d,
            PurchaseFrequency => &mut self.purchase_frequency,
            SeasonalityIndex => &mut self.seasonality_index,
        };
        *slot = value;
    }
}

/// Column-oriented feature table for one product, rows ordered by date.
///
/// Missing values are stored as `NaN`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeatureTable {
    pub product_id: ProductId,
    pub origin: DataOrigin,
    dates: Vec<NaiveDate>,
    columns: BTreeMap<FeatureColumn, Vec<f64>>,
}

impl FeatureTable {
    /// Empty table with the given dates and no columns yet.
    pub fn with_dates(product_id: ProductId, origin: DataOrigin, dates: Vec<NaiveDate>) -> Self {
        Self {
            product_id,
            origin,
            dates,
            columns: BTreeMap::new(),
        }
    }

    pub fn from_rows(product_id: ProductId, origin: DataOrigin, rows: &[EnrichedFeatureRow]) -> Self {
        let dates = rows.iter().map(|r| r.date).collect();
        let columns = FeatureColumn::iter()
            .map(|col| (col, rows.iter().map(|r| r.get(col)).collect()))
            .collect();
        Self {
            product_id,
            origin,
            dates,
            columns,
        }
    }

    pub fn len(&self) -> usize {
        self.dates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dates.is_empty()
    }

    pub fn is_synthetic(&self) -> bool {
        self.origin == DataOrigin::Synthetic
    }

    pub fn dates(&self) -> &[NaiveDate] {
        &self.dates
    }

    pub fn last_date(&self) -> Option<NaiveDate> {
        self.dates.last().copied()
    }

    pub fn column(&self, column: FeatureColumn) -> Option<&[f64]> {
        self.columns.get(&column).map(Vec::as_slice)
    }

    pub fn column_mut(&mut self, column: FeatureColumn) -> Option<&mut Vec<f64>> {
        self.columns.get_mut(&column)
    }

    pub fn has_column(&self, column: FeatureColumn) -> bool {
        self.columns.contains_key(&column)
    }

    pub fn columns(&self) -> impl Iterator<Item = FeatureColumn> + '_ {
        self.columns.keys().copied()
    }

    pub fn insert_column(&mut self, column: FeatureColumn, values: Vec<f64>) -> Result<()> {
        if values.len() != self.dates.len() {
            return Err(ForecastError::validation(format!(
                "column {} has {} values for {} rows",
                column,
                values.len(),
                self.dates.len()
            )));
        }
        self.columns.insert(column, values);
        Ok(())
    }

    pub fn remove_column(&mut self, column: FeatureColumn) -> Option<Vec<f64>> {
        self.columns.remove(&column)
    }

    /// The target column.
    pub fn target(&self) -> Option<&[f64]> {
        self.column(FeatureColumn::Quantity)
    }

    pub fn row(&self, index: usize) -> Option<EnrichedFeatureRow> {
        let date = *self.dates.get(index)?;
        let mut row = EnrichedFeatureRow::blank(date);
        for col in FeatureColumn::iter() {
            row.set(col, self.columns.get(&col).map_or(f64::NAN, |v| v[index]));
        }
        Some(row)
    }

    pub fn rows(&self) -> Vec<EnrichedFeatureRow> {
        (0..self.len()).filter_map(|i| self.row(i)).collect()
    }

    /// Row-major matrix of the requested columns.
    pub fn matrix(&self, columns: &[FeatureColumn]) -> Result<Vec<Vec<f64>>> {
        let series = columns
            .iter()
            .map(|c| {
                self.column(*c)
                    .ok_or_else(|| ForecastError::validation(format!("missing feature column {c}")))
            })
            .collect::<Result<Vec<_>>>()?;
        Ok((0..self.len())
            .map(|i| series.iter().map(|s| s[i]).collect())
            .collect())
    }

    /// Keep only rows whose mask entry is true.
    pub fn retain_rows(&mut self, keep: &[bool]) {
        let filter = |values: &mut Vec<f64>| {
            let mut i = 0;
            values.retain(|_| {
                let k = keep.get(i).copied().unwrap_or(true);
                i += 1;
                k
            });
        };
        let mut i = 0;
        self.dates.retain(|_| {
            let k = keep.get(i).copied().unwrap_or(true);
            i += 1;
            k
        });
        for values in self.columns.values_mut() {
            filter(values);
        }
    }
}

/// Calendar columns derived from a date.
pub fn calendar_values(date: NaiveDate) -> [(FeatureColumn, f64); 8] {
    let dow = date.weekday().num_days_from_monday();
    let month = date.month();
    let days_in_month = days_in_month(date);
    [
        (FeatureColumn::DayOfWeek, dow as f64),
        (FeatureColumn::DayOfMonth, date.day() as f64),
        (FeatureColumn::Month, month as f64),
        (FeatureColumn::Quarter, ((month - 1) / 3 + 1) as f64),
        (FeatureColumn::Season, season(month) as f64),
        (FeatureColumn::IsWeekend, flag(dow >= 5)),
        (FeatureColumn::IsMonthStart, flag(date.day() <= 3)),
        (FeatureColumn::IsMonthEnd, flag(date.day() + 3 > days_in_month)),
    ]
}

/// 0=winter, 1=spring, 2=summer, 3=autumn (northern hemisphere)
fn season(month: u32) -> u32 {
    match month {
        12 | 1 | 2 => 0,
        3..=5 => 1,
        6..=8 => 2,
        _ => 3,
    }
}

fn days_in_month(date: NaiveDate) -> u32 {
    let (y, m) = if date.month() == 12 {
        (date.year() + 1, 1)
    } else {
        (date.year(), date.month() + 1)
    };
    NaiveDate::from_ymd_opt(y, m, 1)
        .and_then(|first_next| first_next.pred_opt())
        .map_or(31, |last| last.day())
}

fn flag(b: bool) -> f64 {
    if b {
        1.0
    } else {
        0.0
    }
}

/// Product-level inputs joined into every row.
#[derive(Debug, Clone)]
pub struct ProductContext {
    pub base_price: f64,
    pub stock_level: f64,
    pub last_restock: Option<NaiveDate>,
    supplier_prices: SupplierPriceLookup,
}

impl ProductContext {
    pub fn new(
        base_price: f64,
        inventory: Option<&InventorySnapshot>,
        quotes: Vec<PriceQuote>,
    ) -> Self {
        Self {
            base_price,
            stock_level: inventory.map_or(0.0, |i| i.stock_level),
            last_restock: inventory.and_then(|i| i.last_restock),
            supplier_prices: SupplierPriceLookup::new(quotes),
        }
    }
}

/// Point-in-time supplier price lookup.
#[derive(Debug, Clone)]
pub struct SupplierPriceLookup {
    /// Sorted by (effective_date, quote_id) descending.
    quotes: Vec<PriceQuote>,
}

impl SupplierPriceLookup {
    pub fn new(mut quotes: Vec<PriceQuote>) -> Self {
        quotes.sort_by(|a, b| {
            b.effective_date
                .cmp(&a.effective_date)
                .then_with(|| b.quote_id.cmp(&a.quote_id))
        });
        Self { quotes }
    }

    /// Latest quote effective on or before `date`. Dates before the first quote
    /// take the earliest quote; no quotes at all yields 0.
    pub fn price_at(&self, date: NaiveDate) -> f64 {
        self.quotes
            .iter()
            .find(|q| q.effective_date <= date)
            .or_else(|| self.quotes.last())
            .map_or(0.0, |q| q.price)
    }
}

/// Aggregates computed from the history strictly before a target date.
#[derive(Debug, Clone, PartialEq)]
struct HistoryFeatures {
    sums: [f64; 3],
    means: [f64; 3],
    trend: f64,
    volatility: f64,
    purchase_frequency: f64,
    seasonality_index: f64,
    elasticity: f64,
}

fn history_features(
    dates: &[NaiveDate],
    quantities: &[f64],
    prices: &[f64],
    at: NaiveDate,
) -> HistoryFeatures {
    let n = quantities.len();
    let mut sums = [0.0; 3];
    let mut means = [0.0; 3];
    for (k, w) in ROLLING_WINDOWS.iter().enumerate() {
        let window = &quantities[n.saturating_sub(*w)..];
        if !window.is_empty() {
            sums[k] = window.iter().sum();
            means[k] = sums[k] / window.len() as f64;
        }
    }

    let recent = &quantities[n.saturating_sub(TREND_WINDOW)..];
    let trend = slope(recent);
    let volatility = if recent.len() >= 2 {
        recent.iter().population_std_dev()
    } else {
        0.0
    };

    let horizon = at - Duration::days(FREQUENCY_WINDOW_DAYS);
    let sale_days = dates
        .iter()
        .zip(quantities)
        .rev()
        .take_while(|(d, _)| **d >= horizon)
        .filter(|(d, q)| **d < at && **q > 0.0)
        .count();
    let purchase_frequency = sale_days as f64 / FREQUENCY_WINDOW_DAYS as f64;

    HistoryFeatures {
        sums,
        means,
        trend,
        volatility: finite_or_zero(volatility),
        purchase_frequency,
        seasonality_index: seasonality_index(dates, quantities, at.month()),
        elasticity: elasticity(quantities, prices),
    }
}

/// Least-squares slope of `values` against their index.
fn slope(values: &[f64]) -> f64 {
    let n = values.len();
    if n < 2 {
        return 0.0;
    }
    let x_mean = (n - 1) as f64 / 2.0;
    let y_mean = values.iter().sum::<f64>() / n as f64;
    let (num, den) = values.iter().enumerate().fold((0.0, 0.0), |(num, den), (i, y)| {
        let dx = i as f64 - x_mean;
        (num + dx * (y - y_mean), den + dx * dx)
    });
    if den.abs() < 1e-12 {
        0.0
    } else {
        num / den
    }
}

/// Mean demand in `month` relative to overall mean demand, over the given history.
fn seasonality_index(dates: &[NaiveDate], quantities: &[f64], month: u32) -> f64 {
    if quantities.is_empty() {
        return 1.0;
    }
    let global = quantities.iter().sum::<f64>() / quantities.len() as f64;
    let in_month: Vec<f64> = dates
        .iter()
        .zip(quantities)
        .filter(|(d, _)| d.month() == month)
        .map(|(_, q)| *q)
        .collect();
    if global.abs() < f64::EPSILON || in_month.is_empty() {
        return 1.0;
    }
    finite_or(in_month.iter().sum::<f64>() / in_month.len() as f64 / global, 1.0)
}

/// Percent change of quantity over percent change of price between the last two rows.
fn elasticity(quantities: &[f64], prices: &[f64]) -> f64 {
    let n = quantities.len().min(prices.len());
    if n < 2 {
        return 0.0;
    }
    let dq = (quantities[n - 1] - quantities[n - 2]) / quantities[n - 2];
    let dp = (prices[n - 1] - prices[n - 2]) / prices[n - 2];
    finite_or_zero(dq / dp)
}

fn finite_or_zero(v: f64) -> f64 {
    finite_or(v, 0.0)
}

fn finite_or(v: f64, default: f64) -> f64 {
    if v.is_finite() {
        v
    } else {
        default
    }
}

fn ratio_change(value: f64, reference: f64) -> f64 {
    if reference > 0.0 {
        finite_or_zero((value - reference) / reference)
    } else {
        0.0
    }
}

/// One aggregated day of sales.
#[derive(Debug, Clone, Copy)]
struct DailySale {
    date: NaiveDate,
    quantity: f64,
    price: f64,
}

/// Collapse transaction lines to one row per date. The day's price is the
/// quantity-weighted mean unit price (plain mean when nothing was sold).
fn aggregate_daily(sales: &[RawSale]) -> Vec<DailySale> {
    let mut days: BTreeMap<NaiveDate, (f64, f64, f64, usize)> = BTreeMap::new();
    for sale in sales {
        let entry = days.entry(sale.date).or_insert((0.0, 0.0, 0.0, 0));
        entry.0 += sale.quantity;
        entry.1 += sale.quantity * sale.unit_price;
        entry.2 += sale.unit_price;
        entry.3 += 1;
    }
    days.into_iter()
        .map(|(date, (qty, revenue, price_sum, count))| DailySale {
            date,
            quantity: qty,
            price: if qty > 0.0 {
                revenue / qty
            } else {
                price_sum / count as f64
            },
        })
        .collect()
}

/// Build the enriched table from raw sales and product context.
pub fn build_feature_table(
    product_id: ProductId,
    origin: DataOrigin,
    sales: &[RawSale],
    context: &ProductContext,
) -> FeatureTable {
    let daily = aggregate_daily(sales);
    let dates: Vec<NaiveDate> = daily.iter().map(|d| d.date).collect();
    let quantities: Vec<f64> = daily.iter().map(|d| d.quantity).collect();
    let prices: Vec<f64> = daily.iter().map(|d| d.price).collect();

    let mut rows = Vec::with_capacity(daily.len());
    let mut previous_supplier = None;
    for (i, day) in daily.iter().enumerate() {
        let history = history_features(&dates[..i], &quantities[..i], &prices[..i], day.date);
        let supplier_price = context.supplier_prices.price_at(day.date);

        let mut row = EnrichedFeatureRow::blank(day.date);
        row.quantity = day.quantity;
        row.base_price = context.base_price;
        row.sale_price = day.price;
        row.supplier_price = supplier_price;
        row.margin = ratio_change(day.price, supplier_price);
        row.price_variation = ratio_change(day.price, context.base_price);
        row.supplier_price_change =
            previous_supplier.map_or(0.0, |prev| ratio_change(supplier_price, prev));
        row.stock_level = context.stock_level;
        row.days_since_restock = context
            .last_restock
            .map_or(0.0, |d| (day.date - d).num_days().max(0) as f64);
        apply_history(&mut row, &history, context.stock_level);

        previous_supplier = Some(supplier_price);
        rows.push(row);
    }

    FeatureTable::from_rows(product_id, origin, &rows)
}

fn apply_history(row: &mut EnrichedFeatureRow, h: &HistoryFeatures, stock_level: f64) {
    row.sales_7d_sum = h.sums[0];
    row.sales_30d_sum = h.sums[1];
    row.sales_90d_sum = h.sums[2];
    row.sales_7d_mean = h.means[0];
    row.sales_30d_mean = h.means[1];
    row.sales_90d_mean = h.means[2];
    row.trend_30d = h.trend;
    row.volatility_30d = h.volatility;
    row.purchase_frequency = h.purchase_frequency;
    row.seasonality_index = h.seasonality_index;
    row.price_elasticity = h.elasticity;
    row.turnover = if stock_level > 0.0 {
        h.sums[1] / stock_level
    } else {
        0.0
    };
}

/// Inference rows for the `days_ahead` dates following the table.
///
/// Calendar fields come from each future date. History aggregates are the
/// values the day after the last observation would have, held for the whole
/// horizon; prices and stock are held at their last values. The target column
/// is `NaN`.
pub fn build_future_rows(table: &FeatureTable, days_ahead: u32) -> Result<FeatureTable> {
    let last = table
        .len()
        .checked_sub(1)
        .and_then(|i| table.row(i))
        .ok_or_else(|| ForecastError::prediction("cannot extend an empty feature table"))?;
    let quantities = table
        .target()
        .ok_or_else(|| ForecastError::prediction("feature table has no quantity column"))?;
    let prices = table.column(FeatureColumn::SalePrice).unwrap_or(&[]);
    let dates = table.dates();

    let next = last.date + Duration::days(1);
    let held = history_features(dates, quantities, prices, next);

    let rows: Vec<EnrichedFeatureRow> = (0..days_ahead as i64)
        .map(|k| {
            let date = next + Duration::days(k);
            let mut row = EnrichedFeatureRow::blank(date);
            for col in [
                FeatureColumn::BasePrice,
                FeatureColumn::SalePrice,
                FeatureColumn::SupplierPrice,
                FeatureColumn::Margin,
                FeatureColumn::PriceVariation,
                FeatureColumn::StockLevel,
            ] {
                row.set(col, last.get(col));
            }
            row.supplier_price_change = 0.0;
            row.days_since_restock = last.days_since_restock + (k + 1) as f64;
            apply_history(&mut row, &held, last.stock_level);
            row.seasonality_index = seasonality_index(dates, quantities, date.month());
            row
        })
        .collect();

    Ok(FeatureTable::from_rows(table.product_id, table.origin, &rows))
}

/// Feature Enrichment Engine: pulls raw rows from storage and derives the feature table.
pub struct FeatureEnricher {
    store: Arc<dyn SalesStore>,
    storage_timeout: StdDuration,
    synthetic_days: u32,
    anchor_date: Option<NaiveDate>,
}

impl FeatureEnricher {
    pub fn new(store: Arc<dyn SalesStore>) -> Self {
        Self {
            store,
            storage_timeout: StdDuration::from_secs(10),
            synthetic_days: 90,
            anchor_date: None,
        }
    }

    pub fn with_storage_timeout(mut self, timeout: StdDuration) -> Self {
        self.storage_timeout = timeout;
        self
    }

    pub fn with_synthetic_days(mut self, days: u32) -> Self {
        self.synthetic_days = days.max(1);
        self
    }

    /// Fix the last day of generated cold-start history (defaults to yesterday).
    pub fn with_anchor_date(mut self, date: NaiveDate) -> Self {
        self.anchor_date = Some(date);
        self
    }

    pub async fn enrich(&self, product_id: ProductId) -> Result<FeatureTable> {
        if !product_id.is_valid() {
            return Err(ForecastError::validation(format!(
                "product_id must be positive, got {product_id}"
            )));
        }

        let sales = self.fetch("sales", self.store.get_sales(product_id)).await?;
        let product = self.fetch("product", self.store.get_product(product_id)).await?;
        let inventory = self
            .fetch("inventory", self.store.get_inventory(product_id))
            .await?;
        let quotes = self
            .fetch("supplier prices", self.store.get_supplier_prices(product_id))
            .await?;

        let (sales, origin) = if sales.is_empty() {
            let end = self
                .anchor_date
                .unwrap_or_else(|| Utc::now().date_naive() - Duration::days(1));
            let price = product
                .as_ref()
                .map(|p| p.base_price)
                .filter(|p| *p > 0.0)
                .unwrap_or_else(|| synthetic::placeholder_price(product_id));
            warn!(
                product_id = %product_id,
                days = self.synthetic_days,
                "no recorded sales, generating synthetic history"
            );
            (
                synthetic::generate(product_id, self.synthetic_days, end, price),
                DataOrigin::Synthetic,
            )
        } else {
            (sales, DataOrigin::Observed)
        };

        let base_price = match product.as_ref().map(|p| p.base_price).filter(|p| *p > 0.0) {
            Some(p) => p,
            None => {
                debug!(product_id = %product_id, "no catalogue price, using mean sale price");
                sales.iter().map(|s| s.unit_price).mean()
            }
        };

        let context = ProductContext::new(finite_or_zero(base_price), inventory.as_ref(), quotes);
        let table = build_feature_table(product_id, origin, &sales, &context);

        info!(
            product_id = %product_id,
            rows = table.len(),
            origin = %table.origin,
            "feature table built"
        );
        Ok(table)
    }

    async fn fetch<T>(
        &self,
        what: &str,
        call: impl Future<Output = anyhow::Result<T>>,
    ) -> Result<T> {
        match tokio::time::timeout(self.storage_timeout, call).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => {
                warn!(error = %e, what, "storage query failed");
                Err(ForecastError::Database(format!("fetching {what}: {e}")))
            }
            Err(_) => {
                warn!(what, timeout_ms = self.storage_timeout.as_millis() as u64, "storage query timed out");
                Err(ForecastError::Database(format!("fetching {what} timed out")))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ProductSnapshot;
    use crate::repo::MockSalesStore;
    use rstest::rstest;

    fn day(d: i64) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, 1).unwrap() + Duration::days(d)
    }

    fn sale(d: i64, qty: f64, price: f64) -> RawSale {
        RawSale {
            date: day(d),
            product_id: ProductId(1),
            quantity: qty,
            unit_price: price,
        }
    }

    fn quote(id: i64, d: i64, price: f64) -> PriceQuote {
        PriceQuote {
            quote_id: id,
            supplier_id: 1,
            price,
            effective_date: day(d),
        }
    }

    fn context(quotes: Vec<PriceQuote>) -> ProductContext {
        let inventory = InventorySnapshot {
            product_id: ProductId(1),
            stock_level: 50.0,
            last_restock: Some(day(0)),
        };
        ProductContext::new(10.0, Some(&inventory), quotes)
    }

    fn series(n: i64) -> Vec<RawSale> {
        (0..n)
            .map(|d| sale(d, 5.0 + (d % 7) as f64, 10.0 + (d % 3) as f64))
            .collect()
    }

    #[rstest]
    #[case(0)]
    #[case(1)]
    #[case(2)]
    fn test_leading_rows_use_partial_windows(#[case] idx: usize) {
        let table = build_feature_table(ProductId(1), DataOrigin::Observed, &series(10), &context(vec![]));
        let row = table.row(idx).unwrap();
        let prior: f64 = series(10)[..idx].iter().map(|s| s.quantity).sum();
        assert_eq!(row.sales_7d_sum, prior);
    }

    #[test]
    fn test_rolling_windows_exclude_current_row() {
        let sales = series(40);
        let table = build_feature_table(ProductId(1), DataOrigin::Observed, &sales, &context(vec![]));
        let row = table.row(35).unwrap();

        let expected_7: f64 = sales[28..35].iter().map(|s| s.quantity).sum();
        let expected_30: f64 = sales[5..35].iter().map(|s| s.quantity).sum();
        assert_eq!(row.sales_7d_sum, expected_7);
        assert_eq!(row.sales_30d_sum, expected_30);
        assert!((row.sales_7d_mean - expected_7 / 7.0).abs() < 1e-12);
        assert!((row.turnover - expected_30 / 50.0).abs() < 1e-12);
    }

    #[test]
    fn test_no_nulls_after_enrichment() {
        let table = build_feature_table(ProductId(1), DataOrigin::Observed, &series(120), &context(vec![quote(1, 5, 7.0)]));
        for col in FeatureColumn::all() {
            let values = table.column(col).unwrap();
            assert!(values.iter().all(|v| v.is_finite()), "column {col} has non-finite values");
        }
    }

    #[test]
    fn test_same_day_lines_are_aggregated() {
        let sales = vec![sale(0, 2.0, 10.0), sale(0, 6.0, 14.0), sale(1, 1.0, 10.0)];
        let table = build_feature_table(ProductId(1), DataOrigin::Observed, &sales, &context(vec![]));
        assert_eq!(table.len(), 2);
        let first = table.row(0).unwrap();
        assert_eq!(first.quantity, 8.0);
        assert!((first.sale_price - 13.0).abs() < 1e-12);
    }

    #[test]
    fn test_supplier_price_point_in_time_with_tie_break() {
        let lookup = SupplierPriceLookup::new(vec![
            quote(1, 10, 5.0),
            quote(3, 20, 7.0),
            quote(2, 20, 6.0),
        ]);
        assert_eq!(lookup.price_at(day(0)), 5.0, "back-filled from earliest quote");
        assert_eq!(lookup.price_at(day(15)), 5.0);
        assert_eq!(lookup.price_at(day(20)), 7.0, "higher quote id wins on equal dates");
        assert_eq!(lookup.price_at(day(99)), 7.0);
        assert_eq!(SupplierPriceLookup::new(vec![]).price_at(day(0)), 0.0);
    }

    #[test]
    fn test_margin_and_variation_guards() {
        let table = build_feature_table(ProductId(1), DataOrigin::Observed, &[sale(0, 1.0, 12.0)], &context(vec![]));
        let row = table.row(0).unwrap();
        assert_eq!(row.supplier_price, 0.0);
        assert_eq!(row.margin, 0.0);
        assert!((row.price_variation - 0.2).abs() < 1e-12);

        let ctx = ProductContext::new(0.0, None, vec![quote(1, 0, 8.0)]);
        let row = build_feature_table(ProductId(1), DataOrigin::Observed, &[sale(0, 1.0, 12.0)], &ctx)
            .row(0)
            .unwrap();
        assert_eq!(row.price_variation, 0.0);
        assert!((row.margin - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_elasticity_coerces_undefined_to_zero() {
        // Constant price makes the price change zero.
        let sales = vec![sale(0, 1.0, 10.0), sale(1, 2.0, 10.0), sale(2, 3.0, 10.0)];
        let table = build_feature_table(ProductId(1), DataOrigin::Observed, &sales, &context(vec![]));
        assert_eq!(table.row(2).unwrap().price_elasticity, 0.0);

        let sales = vec![sale(0, 10.0, 10.0), sale(1, 5.0, 20.0), sale(2, 3.0, 10.0)];
        let table = build_feature_table(ProductId(1), DataOrigin::Observed, &sales, &context(vec![]));
        assert!((table.row(2).unwrap().price_elasticity - (-0.5)).abs() < 1e-12);
    }

    #[test]
    fn test_calendar_flags() {
        // 2024-03-30 is a Saturday near month end
        let date = NaiveDate::from_ymd_opt(2024, 3, 30).unwrap();
        let row = EnrichedFeatureRow::blank(date);
        assert_eq!(row.day_of_week, 5.0);
        assert_eq!(row.is_weekend, 1.0);
        assert_eq!(row.is_month_end, 1.0);
        assert_eq!(row.is_month_start, 0.0);
        assert_eq!(row.quarter, 1.0);
        assert_eq!(row.season, 1.0);
    }

    #[test]
    fn test_seasonality_defaults_to_one() {
        assert_eq!(seasonality_index(&[], &[], 1), 1.0);
        assert_eq!(seasonality_index(&[day(0)], &[0.0], 1), 1.0);
    }

    #[test]
    fn test_future_rows_hold_history() {
        let table = build_feature_table(ProductId(1), DataOrigin::Observed, &series(60), &context(vec![]));
        let future = build_future_rows(&table, 7).unwrap();
        assert_eq!(future.len(), 7);
        assert_eq!(future.dates()[0], day(60));

        let expected_7: f64 = series(60)[53..].iter().map(|s| s.quantity).sum();
        let sums = future.column(FeatureColumn::Sales7dSum).unwrap();
        assert!(sums.iter().all(|s| *s == expected_7));
        let restock = future.column(FeatureColumn::DaysSinceRestock).unwrap();
        assert_eq!(restock[0], 60.0);
        assert_eq!(restock[6], 66.0);
    }

    #[test]
    fn test_future_rows_require_history() {
        let empty = FeatureTable::with_dates(ProductId(1), DataOrigin::Observed, vec![]);
        assert!(build_future_rows(&empty, 3).is_err());
    }

    #[test]
    fn test_column_names() {
        assert_eq!(FeatureColumn::Sales7dSum.to_string(), "sales_7d_sum");
        assert_eq!(FeatureColumn::DayOfWeek.as_ref(), "day_of_week");
        assert_eq!("trend_30d".parse::<FeatureColumn>().unwrap(), FeatureColumn::Trend30d);
    }

    #[tokio::test]
    async fn test_enrich_without_sales_is_synthetic() {
        let mut store = MockSalesStore::new();
        store.expect_get_sales().returning(|_| Ok(vec![]));
        store.expect_get_product().returning(|_| Ok(None));
        store.expect_get_inventory().returning(|_| Ok(None));
        store.expect_get_supplier_prices().returning(|_| Ok(vec![]));

        let enricher = FeatureEnricher::new(Arc::new(store))
            .with_anchor_date(day(100))
            .with_synthetic_days(90);
        let table = enricher.enrich(ProductId(3)).await.unwrap();

        assert!(table.is_synthetic());
        assert_eq!(table.len(), 90);
        assert_eq!(table.last_date(), Some(day(100)));
    }

    #[tokio::test]
    async fn test_enrich_observed_sales() {
        let mut store = MockSalesStore::new();
        store.expect_get_sales().returning(|_| Ok(series(30)));
        store.expect_get_product().returning(|id| {
            Ok(Some(ProductSnapshot {
                product_id: id,
                name: "Widget".into(),
                base_price: 11.0,
            }))
        });
        store.expect_get_inventory().returning(|_| Ok(None));
        store
            .expect_get_supplier_prices()
            .returning(|_| Ok(vec![quote(1, 0, 6.0)]));

        let table = FeatureEnricher::new(Arc::new(store))
            .enrich(ProductId(1))
            .await
            .unwrap();
        assert_eq!(table.origin, DataOrigin::Observed);
        assert_eq!(table.len(), 30);
        assert!(table.column(FeatureColumn::BasePrice).unwrap().iter().all(|p| *p == 11.0));
        assert!(table.column(FeatureColumn::StockLevel).unwrap().iter().all(|s| *s == 0.0));
    }

    #[tokio::test]
    async fn test_enrich_rejects_invalid_product() {
        let store = MockSalesStore::new();
        let err = FeatureEnricher::new(Arc::new(store))
            .enrich(ProductId(0))
            .await
            .unwrap_err();
        assert!(matches!(err, ForecastError::DataValidation(_)));
    }

    #[tokio::test]
    async fn test_storage_failure_is_database_error() {
        let mut store = MockSalesStore::new();
        store
            .expect_get_sales()
            .returning(|_| Err(anyhow::anyhow!("connection refused")));
        let err = FeatureEnricher::new(Arc::new(store))
            .enrich(ProductId(1))
            .await
            .unwrap_err();
        assert!(err.is_retryable());
    }
}
