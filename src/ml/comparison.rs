//! Model Comparator / Auto-Selector
//!
//! Every registered variant is trained (or reused from the cache), evaluated
//! by expanding-window cross-validation and ranked by a weighted composite of
//! accuracy and the variant's heuristic profile.

use std::{
    collections::{BTreeMap, HashMap},
    fs,
    path::PathBuf,
    sync::Arc,
};

use chrono::{DateTime, Duration, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::{
    cache::{atomic_write, ModelCache, ModelKey},
    registry::TrainerRegistry,
    training::{CrossValidationSummary, Trainer, TrainingOptions, TrainingOutcome},
    ModelVariant,
};
use crate::{
    config::{ComparisonConfig, ScoreWeights},
    domain::ProductId,
    error::Result,
    forecast::{features::FeatureTable, metrics::ForecastQuality},
};

pub const NO_VALID_MODEL: &str = "No valid model could be evaluated";
pub const NO_DATA: &str = "No data available to compare models";

/// Heuristic, non-measured characteristics reported next to the CV metrics.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PerformanceProfile {
    pub complexity: f64,
    pub interpretability: f64,
    pub robustness: f64,
    pub estimated_training_secs: f64,
}

impl PerformanceProfile {
    pub fn for_variant(variant: ModelVariant, rows: usize) -> Self {
        let profile = variant.profile();
        Self {
            complexity: profile.complexity,
            interpretability: profile.interpretability,
            robustness: profile.robustness,
            estimated_training_secs: variant.estimated_training_secs(rows),
        }
    }
}

/// Outcome of evaluating one variant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VariantEvaluation {
    pub model_name: String,
    pub evaluated: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub validation_metrics: Option<CrossValidationSummary>,
    pub performance: Option<PerformanceProfile>,
    pub evaluated_at: DateTime<Utc>,
    /// Fresh fit in this run rather than a cache hit.
    pub retrained: bool,
    pub cache_id: Option<String>,
}

impl VariantEvaluation {
    fn failed(variant: ModelVariant, error: impl Into<String>) -> Self {
        Self {
            model_name: variant.to_string(),
            evaluated: false,
            error: Some(error.into()),
            validation_metrics: None,
            performance: None,
            evaluated_at: Utc::now(),
            retrained: false,
            cache_id: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankedModel {
    pub model: ModelVariant,
    pub composite_score: f64,
    pub r2: f64,
    pub mape: f64,
    pub interpretability: f64,
    pub robustness: f64,
    pub cache_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComparisonSummary {
    pub models_evaluated: usize,
    pub best_r2: f64,
    pub best_mape: f64,
    pub mean_interpretability: f64,
}

impl Default for ComparisonSummary {
    fn default() -> Self {
        Self {
            models_evaluated: 0,
            best_r2: 0.0,
            best_mape: 100.0,
            mean_interpretability: 0.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComparisonResult {
    #[serde(rename = "producto_id", alias = "product_id")]
    pub product_id: i64,
    pub compared_at: DateTime<Utc>,
    #[serde(rename = "modelos_evaluados")]
    pub evaluations: BTreeMap<String, VariantEvaluation>,
    #[serde(rename = "ranking_modelos")]
    pub ranking: Vec<RankedModel>,
    #[serde(rename = "mejor_modelo")]
    pub best_model: Option<ModelVariant>,
    pub summary: ComparisonSummary,
    #[serde(rename = "recomendaciones")]
    pub recommendations: Vec<String>,
    pub synthetic_data: bool,
}

impl ComparisonResult {
    pub fn best(&self) -> Option<&RankedModel> {
        self.ranking.first()
    }
}

/// `w.r2·R² + w.mape·(1 − min(MAPE,100)/100) + w.interpretability·I + w.robustness·R`
pub fn composite_score(weights: &ScoreWeights, r2: f64, mape: f64, interpretability: f64, robustness: f64) -> f64 {
    weights.r2 * r2
        + weights.mape * (100.0 - mape.min(100.0)) / 100.0
        + weights.interpretability * interpretability
        + weights.robustness * robustness
}

/// Sort by composite score descending, ties by variant name.
pub fn rank(mut entries: Vec<RankedModel>) -> Vec<RankedModel> {
    entries.sort_by(|a, b| {
        b.composite_score
            .total_cmp(&a.composite_score)
            .then_with(|| a.model.as_ref().cmp(b.model.as_ref()))
    });
    entries
}

/// Threshold rules on the winner's accuracy and profile.
pub fn recommendations(best: &RankedModel) -> Vec<String> {
    let accuracy = if best.r2 > 0.8 {
        "Excellent prediction accuracy"
    } else if best.r2 > 0.6 {
        "Good prediction accuracy"
    } else {
        "Moderate prediction accuracy - consider more data or features"
    };
    let error = match ForecastQuality::from_mape(best.mape) {
        ForecastQuality::Good => "Very low percentage error",
        ForecastQuality::Acceptable => "Acceptable percentage error",
        ForecastQuality::Poor => "High percentage error - review data quality",
    };
    let interpretability = if best.interpretability > 0.7 {
        "Model is easy to interpret"
    } else {
        "Complex model - document important decisions"
    };
    vec![accuracy.into(), error.into(), interpretability.into()]
}

/// Trains, evaluates and ranks every registered variant for one product.
#[derive(Clone)]
pub struct ModelComparator {
    registry: TrainerRegistry,
    cache: Arc<ModelCache>,
    config: ComparisonConfig,
}

impl ModelComparator {
    pub fn new(registry: TrainerRegistry, cache: Arc<ModelCache>, config: ComparisonConfig) -> Self {
        Self {
            registry,
            cache,
            config,
        }
    }

    /// Evaluate all variants on `table`. A cached model is reused when
    /// `retrain_if_needed` is false and it is younger than the staleness limit.
    ///
    /// Never fails because of a single variant: failures are recorded in the
    /// result and the remaining variants are still evaluated.
    pub fn compare_all_models(&self, table: &FeatureTable, retrain_if_needed: bool) -> Result<ComparisonResult> {
        let product_id = table.product_id;
        let mut result = ComparisonResult {
            product_id: product_id.get(),
            compared_at: Utc::now(),
            evaluations: BTreeMap::new(),
            ranking: Vec::new(),
            best_model: None,
            summary: ComparisonSummary::default(),
            recommendations: Vec::new(),
            synthetic_data: table.is_synthetic(),
        };
        if table.is_empty() {
            warn!(product_id = %product_id, "empty feature table, nothing to compare");
            result.recommendations.push(NO_DATA.into());
            return Ok(result);
        }

        info!(product_id = %product_id, rows = table.len(), variants = self.registry.len(), "comparing models");
        let version = Utc::now().format("%Y%m%d_%H%M%S").to_string();
        for (name, trainer) in self.registry.iter() {
            let evaluation = self.evaluate(trainer.as_ref(), table, retrain_if_needed, &version);
            if let Some(e) = &evaluation.error {
                warn!(product_id = %product_id, model = name, error = %e, "model evaluation failed");
            }
            result.evaluations.insert(name.to_string(), evaluation);
        }

        self.analyze(&mut result);
        self.persist(&result);
        info!(
            product_id = %product_id,
            best_model = ?result.best_model,
            evaluated = result.summary.models_evaluated,
            "model comparison finished"
        );
        Ok(result)
    }

    fn evaluate(
        &self,
        trainer: &dyn Trainer,
        table: &FeatureTable,
        retrain_if_needed: bool,
        version: &str,
    ) -> VariantEvaluation {
        let variant = trainer.variant();
        let product_id = table.product_id;

        let reusable = if retrain_if_needed {
            None
        } else {
            self.fresh_cached(table, variant)
        };

        let (summary, cache_id, retrained) = match reusable {
            Some(cache_id) => match trainer.cross_validate(table, self.config.cv_folds) {
                Ok(Some(summary)) => (summary, Some(cache_id), false),
                Ok(None) => return VariantEvaluation::failed(variant, "not enough rows to cross-validate"),
                Err(e) => return VariantEvaluation::failed(variant, e.to_string()),
            },
            None => {
                let options = TrainingOptions {
                    cv_folds: self.config.cv_folds,
                    version: Some(version.to_string()),
                };
                let report = match trainer.train(table, &options) {
                    Ok(TrainingOutcome::Trained(report)) => report,
                    Ok(TrainingOutcome::NoData) => {
                        return VariantEvaluation::failed(variant, "not enough rows to train")
                    }
                    Err(e) => return VariantEvaluation::failed(variant, e.to_string()),
                };
                let mut extra = serde_json::Map::new();
                extra.insert("r2".into(), report.cross_validation.r2.mean.into());
                extra.insert("mape".into(), report.cross_validation.mape.mean.into());
                extra.insert("synthetic_data".into(), table.is_synthetic().into());
                let cache_id = match self
                    .cache
                    .cache_model(&report.model, product_id, variant, Some(version), Some(extra))
                {
                    Ok(id) => Some(id),
                    Err(e) => {
                        warn!(product_id = %product_id, model = %variant, error = %e, "could not cache model");
                        None
                    }
                };
                (report.cross_validation, cache_id, true)
            }
        };

        VariantEvaluation {
            model_name: variant.to_string(),
            evaluated: true,
            error: None,
            validation_metrics: Some(summary),
            performance: Some(PerformanceProfile::for_variant(variant, table.len())),
            evaluated_at: Utc::now(),
            retrained,
            cache_id,
        }
    }

    /// Newest cached model of a variant that is younger than the staleness limit
    /// and was trained on data of the same origin as `table`.
    fn fresh_cached(&self, table: &FeatureTable, variant: ModelVariant) -> Option<String> {
        let product_id = table.product_id;
        let key = ModelKey::Product {
            product_id,
            model_type: variant,
            latest: true,
        };
        match self.cache.load_model(key) {
            Ok(Some((model, entry))) => {
                let synthetic = entry
                    .extra
                    .get("synthetic_data")
                    .and_then(|v| v.as_bool())
                    .unwrap_or(model.metadata.synthetic_data);
                if synthetic != table.is_synthetic() || model.metadata.synthetic_data != table.is_synthetic() {
                    debug!(
                        cache_id = %entry.cache_id,
                        cached_synthetic = synthetic,
                        "cached model was trained on data of another origin"
                    );
                    return None;
                }
                if Utc::now() - entry.timestamp >= Duration::days(self.config.staleness_days) {
                    return None;
                }
                debug!(cache_id = %entry.cache_id, "reusing cached model");
                Some(entry.cache_id)
            }
            Ok(None) => None,
            Err(e) => {
                warn!(product_id = %product_id, model = %variant, error = %e, "cache lookup failed");
                None
            }
        }
    }

    fn analyze(&self, result: &mut ComparisonResult) {
        let weights = &self.config.weights;
        let entries: Vec<RankedModel> = result
            .evaluations
            .values()
            .filter(|e| e.evaluated)
            .filter_map(|e| {
                let model: ModelVariant = e.model_name.parse().ok()?;
                let metrics = e.validation_metrics.as_ref()?;
                let performance = e.performance?;
                let (r2, mape) = (metrics.r2.mean, metrics.mape.mean);
                let composite_score =
                    composite_score(weights, r2, mape, performance.interpretability, performance.robustness);
                composite_score.is_finite().then(|| RankedModel {
                    model,
                    composite_score,
                    r2,
                    mape,
                    interpretability: performance.interpretability,
                    robustness: performance.robustness,
                    cache_id: e.cache_id.clone(),
                })
            })
            .collect();

        result.ranking = rank(entries);
        result.summary.models_evaluated = result.ranking.len();

        let Some(best) = result.ranking.first() else {
            result.recommendations.push(NO_VALID_MODEL.into());
            return;
        };
        result.best_model = Some(best.model);
        result.recommendations = recommendations(best);
        if result.synthetic_data {
            result
                .recommendations
                .push("Trained on synthetic history - record real sales to improve forecasts".into());
        }

        let n = result.ranking.len() as f64;
        result.summary.best_r2 = result.ranking.iter().map(|r| r.r2).fold(f64::NEG_INFINITY, f64::max);
        result.summary.best_mape = result.ranking.iter().map(|r| r.mape).fold(f64::INFINITY, f64::min);
        result.summary.mean_interpretability = result.ranking.iter().map(|r| r.interpretability).sum::<f64>() / n;
    }

    fn result_path(&self, product_id: i64, suffix: &str) -> PathBuf {
        self.config
            .results_dir
            .join(format!("comparison_{product_id}_{suffix}.json"))
    }

    /// Write the timestamped and `_latest` copies. Failures are only logged.
    fn persist(&self, result: &ComparisonResult) {
        let write = || -> Result<()> {
            fs::create_dir_all(&self.config.results_dir)?;
            let bytes = serde_json::to_vec_pretty(result)?;
            let stamp = result.compared_at.format("%Y%m%d_%H%M%S").to_string();
            atomic_write(&self.result_path(result.product_id, &stamp), &bytes)?;
            atomic_write(&self.result_path(result.product_id, "latest"), &bytes)?;
            Ok(())
        };
        if let Err(e) = write() {
            warn!(product_id = result.product_id, error = %e, "could not persist comparison result");
        }
    }

    /// Last persisted comparison of a product, if any.
    pub fn load_latest(&self, product_id: ProductId) -> Result<Option<ComparisonResult>> {
        let path = self.result_path(product_id.get(), "latest");
        match fs::read(&path) {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

impl std::fmt::Debug for ModelComparator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelComparator")
            .field("registry", &self.registry)
            .field("cache", &self.cache)
            .finish()
    }
}

/// The variant chosen for a product.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelSelection {
    pub product_id: i64,
    pub variant: ModelVariant,
    pub cache_id: Option<String>,
    pub composite_score: f64,
    pub r2: f64,
    pub synthetic_data: bool,
    pub selected_at: DateTime<Utc>,
}

impl ModelSelection {
    fn from_result(result: &ComparisonResult) -> Option<Self> {
        result.best().map(|best| Self {
            product_id: result.product_id,
            variant: best.model,
            cache_id: best.cache_id.clone(),
            composite_score: best.composite_score,
            r2: best.r2,
            synthetic_data: result.synthetic_data,
            selected_at: result.compared_at,
        })
    }
}

/// Picks and remembers the best variant per product.
#[derive(Debug)]
pub struct AutoModelSelector {
    comparator: ModelComparator,
    selections: RwLock<HashMap<i64, ModelSelection>>,
}

impl AutoModelSelector {
    pub fn new(comparator: ModelComparator) -> Self {
        Self {
            comparator,
            selections: RwLock::new(HashMap::new()),
        }
    }

    pub fn comparator(&self) -> &ModelComparator {
        &self.comparator
    }

    /// Best variant for the table's product, from memory unless `force_retrain`
    /// or the remembered choice is stale. `None` when no variant evaluates.
    pub fn select_best(&self, table: &FeatureTable, force_retrain: bool) -> Result<Option<ModelSelection>> {
        let pid = table.product_id.get();
        if !force_retrain {
            if let Some(selection) = self.remembered(pid) {
                if selection.synthetic_data == table.is_synthetic() {
                    debug!(product_id = pid, model = %selection.variant, "using remembered selection");
                    return Ok(Some(selection));
                }
            }
        }

        let result = self.comparator.compare_all_models(table, force_retrain)?;
        Ok(self.record(&result))
    }

    /// Remember the winner of an externally run comparison.
    pub fn record(&self, result: &ComparisonResult) -> Option<ModelSelection> {
        let selection = ModelSelection::from_result(result);
        let mut selections = self.selections.write();
        match &selection {
            Some(s) => {
                selections.insert(result.product_id, s.clone());
            }
            None => {
                selections.remove(&result.product_id);
            }
        }
        selection
    }

    /// Best variant known without touching data: memory first, then the persisted result.
    pub fn last_known(&self, product_id: ProductId) -> Result<Option<ModelVariant>> {
        if let Some(selection) = self.remembered(product_id.get()) {
            return Ok(Some(selection.variant));
        }
        Ok(self
            .comparator
            .load_latest(product_id)?
            .and_then(|result| result.best_model))
    }

    pub fn forget(&self, product_id: ProductId) {
        self.selections.write().remove(&product_id.get());
    }

    fn remembered(&self, product_id: i64) -> Option<ModelSelection> {
        let staleness = Duration::days(self.comparator.config.staleness_days);
        self.selections
            .read()
            .get(&product_id)
            .filter(|s| Utc::now() - s.selected_at < staleness)
            .cloned()
    }
}
