//! ML Model Training Pipeline
//!
//! Shared machinery for the regression trainers: candidate hyper-parameters,
//! expanding-window cross-validation, refit on the full table and the reports
//! handed to the comparator.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::{
    models::{Regressor, TrainedModel},
    regression::{fit_ridge, PolynomialExpansion},
    scaler::StandardScaler,
    ModelMetadata, ModelVariant, ValidationMetrics,
};
use crate::{
    error::{ForecastError, Result},
    forecast::{
        features::{FeatureColumn, FeatureTable},
        metrics::{ForecastMetrics, TimeSeriesSplit},
    },
};

/// Ridge penalties searched when there is enough data.
pub const ALPHA_GRID: [f64; 4] = [0.1, 1.0, 10.0, 100.0];
pub const DEFAULT_ALPHA: f64 = 1.0;
/// Hyper-parameter search only runs above this many rows.
pub const GRID_SEARCH_MIN_ROWS: usize = 50;
const GRID_SEARCH_FOLDS: usize = 3;
/// Number of strongest terms reported for polynomial models.
const TOP_TERMS: usize = 20;

/// Training Configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingOptions {
    pub cv_folds: usize,
    /// Version label; defaults to the training timestamp.
    pub version: Option<String>,
}

impl Default for TrainingOptions {
    fn default() -> Self {
        Self {
            cv_folds: 5,
            version: None,
        }
    }
}

/// Per-fold scores of one metric with their mean and population std-dev.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricSummary {
    pub mean: f64,
    pub std: f64,
    pub scores: Vec<f64>,
}

impl MetricSummary {
    pub fn from_scores(scores: Vec<f64>) -> Self {
        if scores.is_empty() {
            return Self {
                mean: 0.0,
                std: 0.0,
                scores,
            };
        }
        let n = scores.len() as f64;
        let mean = scores.iter().sum::<f64>() / n;
        let std = (scores.iter().map(|s| (s - mean).powi(2)).sum::<f64>() / n).sqrt();
        Self { mean, std, scores }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CrossValidationSummary {
    pub r2: MetricSummary,
    pub mae: MetricSummary,
    pub rmse: MetricSummary,
    pub mape: MetricSummary,
    pub folds: usize,
}

impl CrossValidationSummary {
    pub fn from_folds(folds: &[ForecastMetrics]) -> Self {
        let collect = |f: fn(&ForecastMetrics) -> f64| {
            MetricSummary::from_scores(folds.iter().map(f).collect())
        };
        Self {
            r2: collect(|m| m.r2),
            mae: collect(|m| m.mae),
            rmse: collect(|m| m.rmse),
            mape: collect(|m| m.mape),
            folds: folds.len(),
        }
    }

    pub fn means(&self) -> ValidationMetrics {
        ValidationMetrics::new(self.mae.mean, self.rmse.mean, self.mape.mean, self.r2.mean)
    }
}

/// Weight of one input (linear) or one expanded term (polynomial).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureImportance {
    pub feature: String,
    pub coefficient: f64,
    pub importance: f64,
}

/// Hyper-parameters the trainer settled on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Hyperparameters {
    pub alpha: f64,
    pub degree: Option<usize>,
    pub selected_features: Vec<FeatureColumn>,
    pub grid_searched: bool,
}

#[derive(Debug, Clone)]
pub struct TrainingReport {
    pub model: TrainedModel,
    pub cross_validation: CrossValidationSummary,
    pub feature_importance: Vec<FeatureImportance>,
    pub hyperparameters: Hyperparameters,
}

/// Result of a training request. `NoData` must be checked before use.
#[derive(Debug, Clone)]
pub enum TrainingOutcome {
    Trained(Box<TrainingReport>),
    NoData,
}

impl TrainingOutcome {
    pub fn is_trained(&self) -> bool {
        matches!(self, TrainingOutcome::Trained(_))
    }

    pub fn into_report(self) -> Option<TrainingReport> {
        match self {
            TrainingOutcome::Trained(report) => Some(*report),
            TrainingOutcome::NoData => None,
        }
    }
}

/// Common interface of the trainer families.
pub trait Trainer: Send + Sync {
    fn variant(&self) -> ModelVariant;

    /// Cross-validate, then refit on the whole table.
    fn train(&self, table: &FeatureTable, options: &TrainingOptions) -> Result<TrainingOutcome>;

    /// Cross-validated metrics only, without producing an artifact.
    fn cross_validate(&self, table: &FeatureTable, folds: usize) -> Result<Option<CrossValidationSummary>>;
}

/// One hyper-parameter combination.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Candidate {
    pub degree: Option<usize>,
    pub alpha: f64,
}

/// Everything a trainer family varies.
#[derive(Debug, Clone)]
pub struct TrainingPlan {
    pub variant: ModelVariant,
    pub columns: &'static [FeatureColumn],
    /// Keep only the `k` inputs most correlated with the target.
    pub select_k: Option<usize>,
    /// First entry is the default when no search runs.
    pub candidates: Vec<Candidate>,
}

struct FittedPipeline {
    selected: Vec<usize>,
    scaler: StandardScaler,
    regressor: Regressor,
}

impl FittedPipeline {
    fn predict(&self, rows: &[Vec<f64>]) -> Result<Vec<f64>> {
        rows.iter()
            .map(|r| {
                let picked: Vec<f64> = self.selected.iter().map(|j| r[*j]).collect();
                Ok(self.regressor.predict_scaled(&self.scaler.transform_clamped(&picked)?))
            })
            .collect()
    }
}

fn fit_pipeline(
    candidate: Candidate,
    select_k: Option<usize>,
    x: &[Vec<f64>],
    y: &[f64],
) -> Result<FittedPipeline> {
    let width = x.first().map_or(0, Vec::len);
    let selected = match select_k {
        Some(k) => select_k_best(x, y, k),
        None => (0..width).collect(),
    };
    let picked: Vec<Vec<f64>> = x
        .iter()
        .map(|r| selected.iter().map(|j| r[*j]).collect())
        .collect();

    let scaler = StandardScaler::fit(&picked)?;
    let scaled = scaler.transform(&picked)?;
    let regressor = match candidate.degree {
        Some(degree) => {
            let expansion = PolynomialExpansion::new(selected.len(), degree);
            let coefficients = fit_ridge(&expansion.transform(&scaled), y, candidate.alpha)?;
            Regressor::Polynomial {
                expansion,
                coefficients,
            }
        }
        None => Regressor::Linear(fit_ridge(&scaled, y, candidate.alpha)?),
    };
    Ok(FittedPipeline {
        selected,
        scaler,
        regressor,
    })
}

/// Indices of the `k` columns with the largest absolute Pearson correlation
/// to `y`, in their original order. Equivalent to ranking by the univariate
/// regression F statistic. Applies only when there are more than five columns.
pub fn select_k_best(x: &[Vec<f64>], y: &[f64], k: usize) -> Vec<usize> {
    let width = x.first().map_or(0, Vec::len);
    if width <= 5 || k >= width {
        return (0..width).collect();
    }
    let mut scored: Vec<(usize, f64)> = (0..width)
        .map(|j| {
            let col: Vec<f64> = x.iter().map(|r| r[j]).collect();
            (j, pearson(&col, y).abs())
        })
        .collect();
    scored.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)));
    let mut chosen: Vec<usize> = scored.into_iter().take(k).map(|(j, _)| j).collect();
    chosen.sort_unstable();
    chosen
}

fn pearson(a: &[f64], b: &[f64]) -> f64 {
    let n = a.len().min(b.len());
    if n < 2 {
        return 0.0;
    }
    let ma = a.iter().sum::<f64>() / n as f64;
    let mb = b.iter().sum::<f64>() / n as f64;
    let (mut cov, mut va, mut vb) = (0.0, 0.0, 0.0);
    for (x, y) in a.iter().zip(b) {
        cov += (x - ma) * (y - mb);
        va += (x - ma).powi(2);
        vb += (y - mb).powi(2);
    }
    let r = cov / (va.sqrt() * vb.sqrt());
    if r.is_finite() {
        r
    } else {
        0.0
    }
}

fn cross_validate_candidate(
    candidate: Candidate,
    select_k: Option<usize>,
    x: &[Vec<f64>],
    y: &[f64],
    folds: usize,
) -> Result<Vec<ForecastMetrics>> {
    TimeSeriesSplit::new(folds)
        .split(y.len())
        .into_iter()
        .map(|(train, test)| {
            let x_train: Vec<Vec<f64>> = train.iter().map(|i| x[*i].clone()).collect();
            let y_train: Vec<f64> = train.iter().map(|i| y[*i]).collect();
            let x_test: Vec<Vec<f64>> = test.iter().map(|i| x[*i].clone()).collect();
            let y_test: Vec<f64> = test.iter().map(|i| y[*i]).collect();

            let pipeline = fit_pipeline(candidate, select_k, &x_train, &y_train)?;
            let predicted = pipeline.predict(&x_test)?;
            ForecastMetrics::calculate(&y_test, &predicted)
                .map_err(|e| ForecastError::training(e.to_string()))
        })
        .collect()
}

impl TrainingPlan {
    fn design(&self, table: &FeatureTable) -> Result<(Vec<Vec<f64>>, Vec<f64>)> {
        let x = table.matrix(self.columns)?;
        let y = table
            .target()
            .ok_or_else(|| ForecastError::training("feature table has no quantity column"))?
            .to_vec();
        if y.iter().any(|v| !v.is_finite()) || x.iter().flatten().any(|v| !v.is_finite()) {
            return Err(ForecastError::training(
                "feature table contains missing values; clean it before training",
            ));
        }
        Ok((x, y))
    }

    /// Pick the candidate with the best mean R² on an inner 3-fold split.
    fn choose(&self, x: &[Vec<f64>], y: &[f64]) -> (Candidate, bool) {
        let default = self.candidates.first().copied().unwrap_or(Candidate {
            degree: None,
            alpha: DEFAULT_ALPHA,
        });
        if self.candidates.len() < 2 || y.len() <= GRID_SEARCH_MIN_ROWS {
            return (default, false);
        }

        let mut best: Option<(Candidate, f64)> = None;
        for candidate in &self.candidates {
            let score = match cross_validate_candidate(*candidate, self.select_k, x, y, GRID_SEARCH_FOLDS) {
                Ok(folds) if !folds.is_empty() => {
                    folds.iter().map(|m| m.r2).sum::<f64>() / folds.len() as f64
                }
                Ok(_) => continue,
                Err(e) => {
                    debug!(variant = %self.variant, ?candidate, error = %e, "candidate failed in grid search");
                    continue;
                }
            };
            if best.map_or(true, |(_, s)| score > s) {
                best = Some((*candidate, score));
            }
        }
        match best {
            Some((candidate, score)) => {
                debug!(variant = %self.variant, ?candidate, score, "grid search winner");
                (candidate, true)
            }
            None => (default, false),
        }
    }

    pub fn cross_validate(&self, table: &FeatureTable, folds: usize) -> Result<Option<CrossValidationSummary>> {
        if table.len() < 2 {
            return Ok(None);
        }
        let (x, y) = self.design(table)?;
        let (candidate, _) = self.choose(&x, &y);
        let metrics = cross_validate_candidate(candidate, self.select_k, &x, &y, folds)?;
        Ok(Some(CrossValidationSummary::from_folds(&metrics)))
    }

    pub fn train(&self, table: &FeatureTable, options: &TrainingOptions) -> Result<TrainingOutcome> {
        if table.len() < 2 {
            info!(
                product_id = %table.product_id,
                variant = %self.variant,
                rows = table.len(),
                "not enough rows to train"
            );
            return Ok(TrainingOutcome::NoData);
        }

        let (x, y) = self.design(table)?;
        let (candidate, grid_searched) = self.choose(&x, &y);
        let folds = cross_validate_candidate(candidate, self.select_k, &x, &y, options.cv_folds)?;
        let cross_validation = CrossValidationSummary::from_folds(&folds);

        let pipeline = fit_pipeline(candidate, self.select_k, &x, &y)?;
        let selected_features: Vec<FeatureColumn> =
            pipeline.selected.iter().map(|j| self.columns[*j]).collect();
        let feature_importance = importance(&pipeline.regressor, &selected_features);

        let version = options
            .version
            .clone()
            .unwrap_or_else(|| Utc::now().format("%Y%m%d_%H%M%S").to_string());
        let metadata = ModelMetadata {
            model_id: format!("{}_{}_{}", self.variant, table.product_id, version),
            product_id: table.product_id.get(),
            variant: self.variant,
            version,
            trained_at: Utc::now(),
            training_samples: table.len(),
            validation_metrics: cross_validation.means(),
            feature_columns: selected_features.clone(),
            synthetic_data: table.is_synthetic(),
        };

        info!(
            product_id = %table.product_id,
            variant = %self.variant,
            r2 = cross_validation.r2.mean,
            mape = cross_validation.mape.mean,
            folds = cross_validation.folds,
            alpha = candidate.alpha,
            degree = ?candidate.degree,
            "model trained"
        );

        Ok(TrainingOutcome::Trained(Box::new(TrainingReport {
            model: TrainedModel {
                metadata,
                scaler: pipeline.scaler,
                regressor: pipeline.regressor,
            },
            cross_validation,
            feature_importance,
            hyperparameters: Hyperparameters {
                alpha: candidate.alpha,
                degree: candidate.degree,
                selected_features,
                grid_searched,
            },
        })))
    }
}

fn importance(regressor: &Regressor, inputs: &[FeatureColumn]) -> Vec<FeatureImportance> {
    let input_names: Vec<String> = inputs.iter().map(|c| c.to_string()).collect();
    let (names, weights) = match regressor {
        Regressor::Linear(c) => (input_names, c.weights.clone()),
        Regressor::Polynomial {
            expansion,
            coefficients,
        } => (expansion.term_names(&input_names), coefficients.weights.clone()),
    };
    let mut ranked: Vec<FeatureImportance> = names
        .into_iter()
        .zip(weights)
        .map(|(feature, coefficient)| FeatureImportance {
            feature,
            coefficient,
            importance: coefficient.abs(),
        })
        .collect();
    ranked.sort_by(|a, b| b.importance.total_cmp(&a.importance));
    if matches!(regressor, Regressor::Polynomial { .. }) {
        ranked.truncate(TOP_TERMS);
    }
    ranked
}

/// Cleaned table built from generated history, shared by the trainer tests.
#[cfg(test)]
pub(crate) fn fixture_table(product_id: i64, days: u32) -> FeatureTable {
    use crate::{
        domain::ProductId,
        forecast::{
            features::{build_feature_table, DataOrigin, ProductContext},
            quality::DataCleaner,
            synthetic,
        },
    };
    let pid = ProductId(product_id);
    let end = chrono::NaiveDate::from_ymd_opt(2024, 6, 30).unwrap();
    let sales = synthetic::generate(pid, days, end, 25.0);
    let table = build_feature_table(pid, DataOrigin::Observed, &sales, &ProductContext::new(25.0, None, vec![]));
    DataCleaner::new().clean(table, pid).unwrap()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::forecast::metrics::ForecastMetrics;

    #[test]
    fn test_metric_summary() {
        let s = MetricSummary::from_scores(vec![1.0, 3.0]);
        assert_eq!(s.mean, 2.0);
        assert_eq!(s.std, 1.0);
        assert_eq!(MetricSummary::from_scores(vec![]).mean, 0.0);
    }

    #[test]
    fn test_summary_from_folds() {
        let folds = vec![
            ForecastMetrics::calculate(&[1.0, 2.0], &[1.0, 2.0]).unwrap(),
            ForecastMetrics::calculate(&[1.0, 3.0], &[2.0, 2.0]).unwrap(),
        ];
        let summary = CrossValidationSummary::from_folds(&folds);
        assert_eq!(summary.folds, 2);
        assert_eq!(summary.mae.scores, vec![0.0, 1.0]);
        assert_eq!(summary.means().mae, 0.5);
    }

    #[test]
    fn test_select_k_best_keeps_order() {
        // column 3 is the target itself, column 1 its negation, the rest noise-free constants
        let x: Vec<Vec<f64>> = (0..10)
            .map(|i| {
                let t = i as f64;
                vec![1.0, -t, 2.0, t, 0.5 * t + (i % 2) as f64, 3.0, 4.0]
            })
            .collect();
        let y: Vec<f64> = (0..10).map(|i| i as f64).collect();
        assert_eq!(select_k_best(&x, &y, 3), vec![1, 3, 4]);
        assert_eq!(select_k_best(&x[..], &y, 10).len(), 7);

        let narrow: Vec<Vec<f64>> = x.iter().map(|r| r[..4].to_vec()).collect();
        assert_eq!(select_k_best(&narrow, &y, 2), vec![0, 1, 2, 3]);
    }

    #[test]
    fn test_validation_inputs_are_clamped_like_inference() {
        let x: Vec<Vec<f64>> = (0..=10).map(|i| vec![i as f64]).collect();
        let y: Vec<f64> = (0..=10).map(|i| 2.0 * i as f64).collect();
        let pipeline = fit_pipeline(Candidate { degree: None, alpha: 0.0 }, None, &x, &y).unwrap();

        let predicted = pipeline.predict(&[vec![5.0], vec![100.0], vec![-50.0]]).unwrap();
        assert!((predicted[0] - 10.0).abs() < 1e-6);
        assert!((predicted[1] - 20.0).abs() < 1e-6);
        assert!(predicted[2].abs() < 1e-6);
    }

    #[test]
    fn test_pearson_degenerate() {
        assert_eq!(pearson(&[1.0, 1.0, 1.0], &[1.0, 2.0, 3.0]), 0.0);
        assert!((pearson(&[1.0, 2.0, 3.0], &[2.0, 4.0, 6.0]) - 1.0).abs() < 1e-12);
    }
}
