//! Forecast Metrics and Evaluation
//!
//! Accuracy metrics (MAE, RMSE, MAPE, R²), expanding-window time-series
//! cross-validation splits and a few order statistics shared by the
//! data-quality layer.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Actuals closer to zero than this are left out of MAPE.
pub const MAPE_EPSILON: f64 = 1e-6;

/// Forecast accuracy metrics
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForecastMetrics {
    /// Mean Absolute Error
    pub mae: f64,
    /// Root Mean Square Error
    pub rmse: f64,
    /// Mean Absolute Percentage Error (%)
    pub mape: f64,
    /// R² (coefficient of determination)
    pub r2: f64,
    /// Number of samples evaluated
    pub sample_count: usize,
    /// Maximum absolute error observed
    pub max_error: f64,
}

impl ForecastMetrics {
    /// Calculate metrics from actual and predicted values
    pub fn calculate(actual: &[f64], predicted: &[f64]) -> Result<Self, ForecastMetricsError> {
        if actual.len() != predicted.len() {
            return Err(ForecastMetricsError::DimensionMismatch {
                actual: actual.len(),
                predicted: predicted.len(),
            });
        }

        if actual.is_empty() {
            return Err(ForecastMetricsError::EmptyData);
        }

        let n = actual.len();
        let mut abs_errors = Vec::with_capacity(n);
        let mut percentage_errors = Vec::with_capacity(n);

        for (a, p) in actual.iter().zip(predicted.iter()) {
            let error = a - p;
            abs_errors.push(error.abs());

            if a.abs() > MAPE_EPSILON {
                percentage_errors.push((error.abs() / a.abs()) * 100.0);
            }
        }

        let mae = abs_errors.iter().sum::<f64>() / n as f64;

        let sse: f64 = abs_errors.iter().map(|e| e * e).sum();
        let rmse = (sse / n as f64).sqrt();

        let mape = if percentage_errors.is_empty() {
            0.0
        } else {
            percentage_errors.iter().sum::<f64>() / percentage_errors.len() as f64
        };

        let mean_actual = actual.iter().sum::<f64>() / n as f64;
        let total_variance: f64 = actual.iter().map(|a| (a - mean_actual).powi(2)).sum();

        // A constant target carries no variance to explain.
        let r2 = if total_variance > 1e-10 {
            1.0 - (sse / total_variance)
        } else {
            0.0
        };

        let max_error = abs_errors.iter().fold(0.0f64, |a, b| a.max(*b));

        Ok(ForecastMetrics {
            mae,
            rmse,
            mape,
            r2,
            sample_count: n,
            max_error,
        })
    }

    /// Assess forecast quality based on MAPE
    pub fn quality(&self) -> ForecastQuality {
        ForecastQuality::from_mape(self.mape)
    }
}

impl fmt::Display for ForecastMetrics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Metrics: MAE={:.3}, RMSE={:.3}, MAPE={:.2}%, R²={:.3}, Quality={:?}",
            self.mae,
            self.rmse,
            self.mape,
            self.r2,
            self.quality()
        )
    }
}

/// Forecast quality classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ForecastQuality {
    Good,       // MAPE < 10%
    Acceptable, // MAPE 10-20%
    Poor,       // MAPE >= 20%
}

impl ForecastQuality {
    pub fn from_mape(mape: f64) -> Self {
        if mape < 10.0 {
            ForecastQuality::Good
        } else if mape < 20.0 {
            ForecastQuality::Acceptable
        } else {
            ForecastQuality::Poor
        }
    }
}

/// Forecast metrics calculation errors
#[derive(Debug, Clone, thiserror::Error)]
pub enum ForecastMetricsError {
    #[error("Dimension mismatch: actual={actual}, predicted={predicted}")]
    DimensionMismatch { actual: usize, predicted: usize },

    #[error("Empty data provided")]
    EmptyData,
}

/// Expanding-window splitter for time-ordered rows.
///
/// The tail of the series is cut into `n_splits` equal test blocks; each fold
/// trains on every row before its test block. Training rows always precede
/// test rows.
#[derive(Debug, Clone, Copy)]
pub struct TimeSeriesSplit {
    n_splits: usize,
}

impl TimeSeriesSplit {
    pub fn new(n_splits: usize) -> Self {
        Self {
            n_splits: n_splits.max(1),
        }
    }

    /// Fold count actually usable for `data_len` rows: at most `data_len - 1`.
    pub fn effective_splits(&self, data_len: usize) -> usize {
        self.n_splits.min(data_len.saturating_sub(1))
    }

    /// Returns (train_indices, test_indices) per fold; empty when fewer than two rows.
    pub fn split(&self, data_len: usize) -> Vec<(Vec<usize>, Vec<usize>)> {
        let k = self.effective_splits(data_len);
        if k == 0 {
            return Vec::new();
        }

        let test_size = data_len / (k + 1);
        let first_test = data_len - k * test_size;

        (0..k)
            .map(|fold| {
                let test_start = first_test + fold * test_size;
                (
                    (0..test_start).collect(),
                    (test_start..test_start + test_size).collect(),
                )
            })
            .collect()
    }
}

/// Linear-interpolated quantile of already sorted values, `q` in [0, 1].
pub fn quantile_sorted(sorted: &[f64], q: f64) -> Option<f64> {
    if sorted.is_empty() {
        return None;
    }
    let pos = q.clamp(0.0, 1.0) * (sorted.len() - 1) as f64;
    let lo = pos.floor() as usize;
    let hi = pos.ceil() as usize;
    let frac = pos - lo as f64;
    Some(sorted[lo] + (sorted[hi] - sorted[lo]) * frac)
}

/// Quantile of the finite values of `values`.
pub fn quantile(values: &[f64], q: f64) -> Option<f64> {
    let mut finite: Vec<f64> = values.iter().copied().filter(|v| v.is_finite()).collect();
    finite.sort_by(f64::total_cmp);
    quantile_sorted(&finite, q)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn test_perfect_forecast() {
        let actual = vec![1.0, 2.0, 3.0, 4.0, 5.0];
        let predicted = vec![1.0, 2.0, 3.0, 4.0, 5.0];

        let metrics = ForecastMetrics::calculate(&actual, &predicted).unwrap();

        assert_eq!(metrics.mae, 0.0);
        assert_eq!(metrics.rmse, 0.0);
        assert_eq!(metrics.mape, 0.0);
        assert_eq!(metrics.r2, 1.0);
        assert_eq!(metrics.quality(), ForecastQuality::Good);
    }

    #[test]
    fn test_forecast_with_errors() {
        let actual = vec![100.0, 200.0, 300.0, 400.0, 500.0];
        let predicted = vec![110.0, 190.0, 310.0, 390.0, 510.0];

        let metrics = ForecastMetrics::calculate(&actual, &predicted).unwrap();

        assert!((metrics.mae - 10.0).abs() < 1e-9);
        assert!((metrics.rmse - 10.0).abs() < 1e-9);
        assert!(metrics.mape < 10.0);
        assert!(metrics.r2 > 0.95);
        assert_eq!(metrics.max_error, 10.0);
    }

    #[test]
    fn test_zero_actuals_are_excluded_from_mape() {
        let metrics = ForecastMetrics::calculate(&[0.0, 10.0], &[5.0, 11.0]).unwrap();
        assert!((metrics.mape - 10.0).abs() < 1e-9);
        assert!(metrics.mape.is_finite());
    }

    #[test]
    fn test_constant_target_has_zero_r2() {
        let metrics = ForecastMetrics::calculate(&[3.0, 3.0, 3.0], &[2.0, 3.0, 4.0]).unwrap();
        assert_eq!(metrics.r2, 0.0);
    }

    #[test]
    fn test_dimension_mismatch() {
        let result = ForecastMetrics::calculate(&[1.0, 2.0, 3.0], &[1.0, 2.0]);
        assert!(matches!(
            result,
            Err(ForecastMetricsError::DimensionMismatch { actual: 3, predicted: 2 })
        ));
        assert!(ForecastMetrics::calculate(&[], &[]).is_err());
    }

    #[test]
    fn test_time_series_split_expanding() {
        let folds = TimeSeriesSplit::new(5).split(12);
        assert_eq!(folds.len(), 5);
        // test blocks of 12 / 6 = 2 rows at the tail
        assert_eq!(folds[0].0, (0..2).collect::<Vec<_>>());
        assert_eq!(folds[0].1, vec![2, 3]);
        assert_eq!(folds[4].1, vec![10, 11]);
        for (train, test) in &folds {
            assert!(train.iter().max() < test.iter().min());
            assert_eq!(train.len(), test[0]);
        }
    }

    #[rstest]
    #[case(0, 0)]
    #[case(1, 0)]
    #[case(2, 1)]
    #[case(4, 3)]
    #[case(100, 5)]
    fn test_split_degrades_for_short_series(#[case] len: usize, #[case] folds: usize) {
        let split = TimeSeriesSplit::new(5);
        assert_eq!(split.effective_splits(len), folds);
        assert_eq!(split.split(len).len(), folds);
    }

    #[test]
    fn test_quantile_interpolates() {
        let values = [4.0, 1.0, 3.0, 2.0, f64::NAN];
        assert_eq!(quantile(&values, 0.5), Some(2.5));
        assert_eq!(quantile(&values, 0.0), Some(1.0));
        assert_eq!(quantile(&values, 1.0), Some(4.0));
        assert!((quantile(&values, 0.25).unwrap() - 1.75).abs() < 1e-12);
        assert_eq!(quantile(&[], 0.5), None);
    }
}
