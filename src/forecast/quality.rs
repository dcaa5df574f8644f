//! Data quality checks and repair for feature tables.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use strum::IntoEnumIterator;
use tracing::{debug, info, warn};

use super::{
    features::{calendar_values, ColumnKind, FeatureColumn, FeatureTable},
    metrics::quantile,
};
use crate::{
    domain::ProductId,
    error::{ForecastError, Result},
};

/// Missing share above which a column is flagged.
pub const MISSING_WARNING_PERCENT: f64 = 20.0;
/// Consecutive dates further apart than this are reported as a gap.
pub const MAX_GAP_DAYS: i64 = 7;
/// Quantities above this percentile are capped by the cleaner.
pub const WINSOR_PERCENTILE: f64 = 0.95;
const ROLLING_IMPUTE_WINDOW: usize = 7;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MissingStats {
    pub count: usize,
    pub percentage: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutlierReport {
    pub indices: Vec<usize>,
    pub count: usize,
    pub lower_bound: f64,
    pub upper_bound: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DateGap {
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub days_gap: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvalidKind {
    NegativeQuantity,
    NonPositivePrice,
    NegativeStock,
}

/// Outcome of validating one feature table.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IssueReport {
    pub product_id: i64,
    pub rows: usize,
    /// Optional columns that are absent from the table.
    pub missing_columns: Vec<FeatureColumn>,
    pub missing_values: BTreeMap<FeatureColumn, MissingStats>,
    /// IQR outliers in the quantity column.
    pub outliers: Option<OutlierReport>,
    pub data_gaps: Vec<DateGap>,
    pub invalid_values: BTreeMap<InvalidKind, Vec<usize>>,
    pub warnings: Vec<String>,
}

impl IssueReport {
    pub fn has_issues(&self) -> bool {
        self.issue_count() > 0
    }

    pub fn issue_count(&self) -> usize {
        self.missing_columns.len()
            + self.missing_values.len()
            + self.outliers.as_ref().map_or(0, |o| o.count)
            + self.data_gaps.len()
            + self.invalid_values.values().map(Vec::len).sum::<usize>()
    }
}

/// Detects missing, anomalous and logically invalid data.
#[derive(Debug, Clone, Default)]
pub struct DataValidator;

impl DataValidator {
    pub fn new() -> Self {
        Self
    }

    /// Fails only when the table is unusable: no rows or a required column absent.
    pub fn validate(&self, table: &FeatureTable, product_id: ProductId) -> Result<IssueReport> {
        let absent: Vec<String> = FeatureColumn::required()
            .iter()
            .filter(|c| !table.has_column(**c))
            .map(|c| c.to_string())
            .collect();
        if !absent.is_empty() {
            return Err(ForecastError::validation(format!(
                "product {product_id}: missing required columns {}",
                absent.join(", ")
            )));
        }
        if table.is_empty() {
            return Err(ForecastError::validation(format!(
                "product {product_id}: feature table has no rows"
            )));
        }

        let rows = table.len();
        let mut report = IssueReport {
            product_id: product_id.get(),
            rows,
            ..IssueReport::default()
        };

        report.missing_columns = FeatureColumn::iter()
            .filter(|c| !table.has_column(*c))
            .collect();

        for col in table.columns() {
            let values = table.column(col).unwrap_or(&[]);
            let count = values.iter().filter(|v| !v.is_finite()).count();
            if count == 0 {
                continue;
            }
            let percentage = count as f64 / rows as f64 * 100.0;
            if percentage > MISSING_WARNING_PERCENT {
                report
                    .warnings
                    .push(format!("column {col} has {percentage:.1}% missing values"));
            }
            report
                .missing_values
                .insert(col, MissingStats { count, percentage });
        }

        if let Some(quantity) = table.target() {
            report.outliers = detect_outliers(quantity);
        }
        report.data_gaps = detect_gaps(table.dates());
        report.invalid_values = invalid_values(table);

        if report.has_issues() {
            info!(
                product_id = %product_id,
                issues = report.issue_count(),
                gaps = report.data_gaps.len(),
                warnings = report.warnings.len(),
                "data quality issues detected"
            );
        }
        Ok(report)
    }
}

/// IQR rule: below Q1 - 1.5 IQR or above Q3 + 1.5 IQR.
fn detect_outliers(values: &[f64]) -> Option<OutlierReport> {
    let q1 = quantile(values, 0.25)?;
    let q3 = quantile(values, 0.75)?;
    let iqr = q3 - q1;
    let lower_bound = q1 - 1.5 * iqr;
    let upper_bound = q3 + 1.5 * iqr;
    let indices: Vec<usize> = values
        .iter()
        .enumerate()
        .filter(|(_, v)| v.is_finite() && (**v < lower_bound || **v > upper_bound))
        .map(|(i, _)| i)
        .collect();
    if indices.is_empty() {
        return None;
    }
    Some(OutlierReport {
        count: indices.len(),
        indices,
        lower_bound,
        upper_bound,
    })
}

fn detect_gaps(dates: &[NaiveDate]) -> Vec<DateGap> {
    dates
        .windows(2)
        .filter_map(|w| {
            let days_gap = (w[1] - w[0]).num_days();
            (days_gap > MAX_GAP_DAYS).then_some(DateGap {
                start_date: w[0],
                end_date: w[1],
                days_gap,
            })
        })
        .collect()
}

fn invalid_values(table: &FeatureTable) -> BTreeMap<InvalidKind, Vec<usize>> {
    let mut invalid = BTreeMap::new();
    let mut flag = |kind: InvalidKind, columns: &[FeatureColumn], bad: fn(f64) -> bool| {
        let mut indices: Vec<usize> = columns
            .iter()
            .filter_map(|c| table.column(*c))
            .flat_map(|values| {
                values
                    .iter()
                    .enumerate()
                    .filter(move |(_, v)| v.is_finite() && bad(**v))
                    .map(|(i, _)| i)
            })
            .collect();
        indices.sort_unstable();
        indices.dedup();
        if !indices.is_empty() {
            invalid.insert(kind, indices);
        }
    };
    flag(InvalidKind::NegativeQuantity, &[FeatureColumn::Quantity], |v| v < 0.0);
    flag(
        InvalidKind::NonPositivePrice,
        &[FeatureColumn::BasePrice, FeatureColumn::SalePrice],
        |v| v <= 0.0,
    );
    flag(InvalidKind::NegativeStock, &[FeatureColumn::StockLevel], |v| v < 0.0);
    invalid
}

/// Column-specific imputation plus quantity winsorizing.
#[derive(Debug, Clone, Default)]
pub struct DataCleaner {
    validator: DataValidator,
}

impl DataCleaner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Repair a table.
    ///
    /// Counts and stock take the median, prices are forward then backward
    /// filled, rolling aggregates take a trailing 7-row mean and ratios the
    /// column mean. Negative quantities and stock are treated as missing.
    /// Quantities above the 95th percentile are capped. Rows are dropped only
    /// when a required column is still missing after imputation.
    pub fn clean(&self, mut table: FeatureTable, product_id: ProductId) -> Result<FeatureTable> {
        let dates = table.dates().to_vec();
        for col in FeatureColumn::iter().filter(|c| c.kind() == ColumnKind::Calendar) {
            let values = dates.iter().map(|d| calendar_value(*d, col)).collect();
            table.insert_column(col, values)?;
        }

        for col in [FeatureColumn::Quantity, FeatureColumn::StockLevel] {
            if let Some(values) = table.column_mut(col) {
                values.iter_mut().filter(|v| **v < 0.0).for_each(|v| *v = f64::NAN);
            }
        }

        let present: Vec<FeatureColumn> = table.columns().collect();
        for col in present {
            let Some(values) = table.column_mut(col) else {
                continue;
            };
            if values.iter().all(|v| v.is_finite()) {
                continue;
            }
            match col.kind() {
                ColumnKind::Target | ColumnKind::Inventory => {
                    let fill = median(values);
                    fill_with(values, fill)
                }
                ColumnKind::Price => forward_back_fill(values),
                ColumnKind::Rolling => rolling_mean_fill(values, ROLLING_IMPUTE_WINDOW),
                ColumnKind::Ratio => {
                    let fill = mean(values);
                    fill_with(values, fill)
                }
                ColumnKind::Calendar => {}
            }
            if !FeatureColumn::required().contains(&col) && values.iter().any(|v| !v.is_finite()) {
                debug!(product_id = %product_id, column = %col, "column has no usable values, filling with 0");
                fill_with(values, Some(0.0));
            }
        }

        let keep: Vec<bool> = (0..table.len())
            .map(|i| {
                FeatureColumn::required()
                    .iter()
                    .filter_map(|c| table.column(*c))
                    .all(|values| values[i].is_finite())
            })
            .collect();
        let dropped = keep.iter().filter(|k| !**k).count();
        if dropped > 0 {
            warn!(product_id = %product_id, dropped, "dropping rows with unrecoverable required values");
            table.retain_rows(&keep);
        }

        if let Some(values) = table.column_mut(FeatureColumn::Quantity) {
            if let Some(cap) = quantile(values, WINSOR_PERCENTILE) {
                let mut capped = 0usize;
                for v in values.iter_mut().filter(|v| **v > cap) {
                    *v = cap;
                    capped += 1;
                }
                if capped > 0 {
                    debug!(product_id = %product_id, capped, cap, "quantity outliers capped");
                }
            }
        }

        let residual = self.validator.validate(&table, product_id)?;
        if !residual.warnings.is_empty() {
            warn!(
                product_id = %product_id,
                warnings = ?residual.warnings,
                "warnings remain after cleaning"
            );
        }
        Ok(table)
    }
}

fn calendar_value(date: NaiveDate, column: FeatureColumn) -> f64 {
    calendar_values(date)
        .iter()
        .find(|(c, _)| *c == column)
        .map_or(f64::NAN, |(_, v)| *v)
}

fn finite(values: &[f64]) -> impl Iterator<Item = f64> + '_ {
    values.iter().copied().filter(|v| v.is_finite())
}

fn median(values: &[f64]) -> Option<f64> {
    quantile(values, 0.5)
}

fn mean(values: &[f64]) -> Option<f64> {
    let (sum, n) = finite(values).fold((0.0, 0usize), |(s, n), v| (s + v, n + 1));
    (n > 0).then(|| sum / n as f64)
}

fn fill_with(values: &mut [f64], fill: Option<f64>) {
    if let Some(fill) = fill {
        values.iter_mut().filter(|v| !v.is_finite()).for_each(|v| *v = fill);
    }
}

fn forward_back_fill(values: &mut [f64]) {
    let mut last = None;
    for v in values.iter_mut() {
        if v.is_finite() {
            last = Some(*v);
        } else if let Some(prev) = last {
            *v = prev;
        }
    }
    let mut next = None;
    for v in values.iter_mut().rev() {
        if v.is_finite() {
            next = Some(*v);
        } else if let Some(n) = next {
            *v = n;
        }
    }
}

/// Fill each gap with the mean of the finite values in the trailing window ending at it.
fn rolling_mean_fill(values: &mut [f64], window: usize) {
    let original = values.to_vec();
    for (i, v) in values.iter_mut().enumerate() {
        if v.is_finite() {
            continue;
        }
        let start = (i + 1).saturating_sub(window);
        if let Some(m) = mean(&original[start..=i]) {
            *v = m;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::forecast::features::{DataOrigin, EnrichedFeatureRow};
    use chrono::Duration;

    fn date(d: i64) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, 1).unwrap() + Duration::days(d)
    }

    fn table_with(quantities: &[f64], day_step: i64) -> FeatureTable {
        let rows: Vec<EnrichedFeatureRow> = quantities
            .iter()
            .enumerate()
            .map(|(i, q)| {
                let mut row = EnrichedFeatureRow::blank(date(i as i64 * day_step));
                for col in FeatureColumn::iter() {
                    if row.get(col).is_nan() {
                        row.set(col, 1.0);
                    }
                }
                row.quantity = *q;
                row.base_price = 10.0;
                row.sale_price = 10.0;
                row.stock_level = 20.0;
                row
            })
            .collect();
        FeatureTable::from_rows(ProductId(1), DataOrigin::Observed, &rows)
    }

    #[test]
    fn test_clean_table_has_no_issues() {
        let table = table_with(&[5.0, 6.0, 5.0, 7.0, 6.0, 5.0], 1);
        let report = DataValidator::new().validate(&table, ProductId(1)).unwrap();
        assert!(!report.has_issues(), "{report:?}");
        assert_eq!(report.rows, 6);
    }

    #[test]
    fn test_missing_required_column_is_fatal() {
        let mut table = table_with(&[1.0, 2.0], 1);
        table.remove_column(FeatureColumn::StockLevel);
        let err = DataValidator::new().validate(&table, ProductId(1)).unwrap_err();
        assert!(matches!(err, ForecastError::DataValidation(_)));
    }

    #[test]
    fn test_missing_optional_column_is_reported() {
        let mut table = table_with(&[1.0, 2.0], 1);
        table.remove_column(FeatureColumn::Trend30d);
        let report = DataValidator::new().validate(&table, ProductId(1)).unwrap();
        assert_eq!(report.missing_columns, vec![FeatureColumn::Trend30d]);
    }

    #[test]
    fn test_missing_values_warning_threshold() {
        let mut table = table_with(&[1.0, 2.0, 3.0, 4.0, 5.0], 1);
        table.column_mut(FeatureColumn::Margin).unwrap()[0] = f64::NAN;
        let report = DataValidator::new().validate(&table, ProductId(1)).unwrap();
        assert_eq!(report.missing_values[&FeatureColumn::Margin].count, 1);
        assert!(report.warnings.is_empty(), "exactly 20% is not above the threshold");

        table.column_mut(FeatureColumn::Margin).unwrap()[1] = f64::NAN;
        let report = DataValidator::new().validate(&table, ProductId(1)).unwrap();
        assert_eq!(report.warnings.len(), 1);
    }

    #[test]
    fn test_outliers_gaps_and_invalid_values() {
        let mut table = table_with(&[5.0, 6.0, 5.0, 6.0, 5.0, 60.0, -1.0], 1);
        table.column_mut(FeatureColumn::SalePrice).unwrap()[2] = 0.0;
        let report = DataValidator::new().validate(&table, ProductId(1)).unwrap();

        let outliers = report.outliers.unwrap();
        assert!(outliers.indices.contains(&5));
        assert_eq!(report.invalid_values[&InvalidKind::NegativeQuantity], vec![6]);
        assert_eq!(report.invalid_values[&InvalidKind::NonPositivePrice], vec![2]);

        let gappy = table_with(&[1.0, 2.0, 3.0], 10);
        let report = DataValidator::new().validate(&gappy, ProductId(1)).unwrap();
        assert_eq!(report.data_gaps.len(), 2);
        assert_eq!(report.data_gaps[0].days_gap, 10);
    }

    #[test]
    fn test_cleaner_imputes_by_column_kind() {
        let mut table = table_with(&[2.0, f64::NAN, 4.0, 6.0, 8.0], 1);
        {
            let prices = table.column_mut(FeatureColumn::SalePrice).unwrap();
            prices[0] = f64::NAN;
            prices[1] = 12.0;
            prices[3] = f64::NAN;
        }
        {
            let sums = table.column_mut(FeatureColumn::Sales7dSum).unwrap();
            sums.copy_from_slice(&[1.0, 3.0, f64::NAN, 5.0, 7.0]);
        }
        table.column_mut(FeatureColumn::Margin).unwrap()[4] = f64::NAN;

        let cleaned = DataCleaner::new().clean(table, ProductId(1)).unwrap();
        assert_eq!(cleaned.len(), 5, "no rows dropped");

        let qty = cleaned.target().unwrap();
        // median of [2, 4, 6, 8] is 5, then the 95th percentile cap applies to 8
        assert_eq!(qty[1], 5.0);
        assert!(qty[4] < 8.0);

        let prices = cleaned.column(FeatureColumn::SalePrice).unwrap();
        assert_eq!(prices[0], 12.0);
        assert_eq!(prices[3], 10.0);

        let sums = cleaned.column(FeatureColumn::Sales7dSum).unwrap();
        assert_eq!(sums[2], 2.0);

        assert_eq!(cleaned.column(FeatureColumn::Margin).unwrap()[4], 1.0);
    }

    #[test]
    fn test_cleaner_fills_stock_with_median_and_ratios_with_mean() {
        let mut table = table_with(&[3.0, 4.0, 5.0, 4.0, 3.0], 1);
        table
            .column_mut(FeatureColumn::StockLevel)
            .unwrap()
            .copy_from_slice(&[20.0, -5.0, f64::NAN, 30.0, 40.0]);
        table
            .column_mut(FeatureColumn::Turnover)
            .unwrap()
            .copy_from_slice(&[1.0, f64::NAN, 2.0, 3.0, f64::NAN]);

        let cleaned = DataCleaner::new().clean(table, ProductId(1)).unwrap();
        let stock = cleaned.column(FeatureColumn::StockLevel).unwrap();
        assert_eq!(stock, &[20.0, 30.0, 30.0, 30.0, 40.0]);
        let turnover = cleaned.column(FeatureColumn::Turnover).unwrap();
        assert_eq!(turnover[1], 2.0);
        assert_eq!(turnover[4], 2.0);
    }

    #[test]
    fn test_cleaner_caps_at_95th_percentile() {
        let mut quantities: Vec<f64> = (1..=20).map(f64::from).collect();
        quantities.push(500.0);
        let cleaned = DataCleaner::new()
            .clean(table_with(&quantities, 1), ProductId(1))
            .unwrap();
        let cap = quantile(&quantities, WINSOR_PERCENTILE).unwrap();
        let qty = cleaned.target().unwrap();
        assert_eq!(qty.len(), 21);
        assert_eq!(qty[20], cap);
        assert!(qty.iter().all(|q| *q <= cap));
    }

    #[test]
    fn test_cleaner_drops_unrecoverable_rows_only() {
        let mut table = table_with(&[1.0, 2.0, 3.0], 1);
        table
            .column_mut(FeatureColumn::BasePrice)
            .unwrap()
            .iter_mut()
            .for_each(|v| *v = f64::NAN);
        let err = DataCleaner::new().clean(table, ProductId(1)).unwrap_err();
        assert!(matches!(err, ForecastError::DataValidation(_)));
    }

    #[test]
    fn test_report_serializes() {
        let table = table_with(&[1.0, 2.0, 50.0, 1.0, 2.0], 1);
        let report = DataValidator::new().validate(&table, ProductId(1)).unwrap();
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["rows"], 5);
        assert!(json["missing_values"].is_object());
    }
}
