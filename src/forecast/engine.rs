//! Prediction Facade
//!
//! enrich → clean → select model → build future rows → predict, with a
//! naive-mean fallback whenever no fitted model can be used.

use std::sync::Arc;

use chrono::{DateTime, NaiveDate, Utc};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use strum::Display;
use tracing::{debug, info, warn};

use super::{
    features::{build_future_rows, DataOrigin, FeatureEnricher, FeatureTable},
    quality::{DataCleaner, DataValidator},
};
use crate::{
    config::ForecastConfig,
    domain::ProductId,
    error::{ForecastError, Result},
    ml::{
        cache::{ModelCache, ModelKey},
        comparison::{AutoModelSelector, ModelSelection, NO_VALID_MODEL},
        models::{DemandModel, NaiveMeanModel},
    },
};

/// Observations averaged by the fallback forecaster.
pub const NAIVE_WINDOW: usize = 30;
pub const MAX_CONFIDENCE: f64 = 0.95;
/// Ceiling for fallback forecasts and forecasts from synthetic history.
pub const LOW_CONFIDENCE_CAP: f64 = 0.4;
/// History length at which the data-volume factor saturates.
const FULL_VOLUME_ROWS: f64 = 90.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ForecastStatus {
    Ok,
    Fallback,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForecastResponse {
    pub product_id: i64,
    pub days_ahead: u32,
    pub dates: Vec<NaiveDate>,
    pub predictions: Vec<f64>,
    pub model_used: String,
    pub model_cache_id: Option<String>,
    pub confidence: f64,
    pub status: ForecastStatus,
    pub synthetic_data: bool,
    pub cached: bool,
    pub generated_at: DateTime<Utc>,
    pub message: Option<String>,
}

/// Cross-validated R² scaled by how much history backs it.
pub fn model_confidence(r2: f64, rows: usize, synthetic: bool) -> f64 {
    let accuracy = 0.5 + 0.5 * r2.clamp(0.0, 1.0);
    let volume = 0.6 + 0.4 * (rows as f64 / FULL_VOLUME_ROWS).min(1.0);
    let confidence = (accuracy * volume).min(MAX_CONFIDENCE);
    if synthetic {
        confidence.min(LOW_CONFIDENCE_CAP)
    } else {
        confidence
    }
}

pub fn fallback_confidence(rows: usize) -> f64 {
    (0.2 + 0.2 * (rows as f64 / NAIVE_WINDOW as f64).min(1.0)).min(LOW_CONFIDENCE_CAP)
}

/// Key of the prediction cache: the request plus the history it was computed from.
#[derive(Debug, Serialize)]
struct PredictionKey {
    product_id: i64,
    days_ahead: u32,
    last_date: Option<NaiveDate>,
    origin: DataOrigin,
}

/// Demand forecasting entry point.
pub struct DemandForecaster {
    enricher: FeatureEnricher,
    validator: DataValidator,
    cleaner: DataCleaner,
    selector: Arc<AutoModelSelector>,
    cache: Arc<ModelCache>,
    config: ForecastConfig,
}

impl DemandForecaster {
    pub fn new(
        enricher: FeatureEnricher,
        selector: Arc<AutoModelSelector>,
        cache: Arc<ModelCache>,
        config: ForecastConfig,
    ) -> Self {
        Self {
            enricher,
            validator: DataValidator::new(),
            cleaner: DataCleaner::new(),
            selector,
            cache,
            config,
        }
    }

    pub fn validate_request(&self, product_id: ProductId, days_ahead: u32) -> Result<()> {
        if !product_id.is_valid() {
            return Err(ForecastError::validation(format!(
                "product_id must be positive, got {product_id}"
            )));
        }
        if days_ahead == 0 || days_ahead > self.config.max_days_ahead {
            return Err(ForecastError::validation(format!(
                "days_ahead must be between 1 and {}, got {days_ahead}",
                self.config.max_days_ahead
            )));
        }
        Ok(())
    }

    /// Enriched and cleaned history of a product.
    pub async fn prepare(&self, product_id: ProductId) -> Result<FeatureTable> {
        let table = self.enricher.enrich(product_id).await?;
        let report = self.validator.validate(&table, product_id)?;
        if report.has_issues() {
            debug!(product_id = %product_id, issues = report.issue_count(), "raw table has quality issues");
        }
        self.cleaner.clean(table, product_id)
    }

    /// Forecast `days_ahead` daily quantities. All predictions are non-negative.
    pub async fn predict(&self, product_id: ProductId, days_ahead: u32, use_cache: bool) -> Result<ForecastResponse> {
        self.validate_request(product_id, days_ahead)?;
        let table = self.prepare(product_id).await?;

        let input_hash = ModelCache::input_hash(&PredictionKey {
            product_id: product_id.get(),
            days_ahead,
            last_date: table.last_date(),
            origin: table.origin,
        })?;
        if use_cache {
            match self.cache.load_prediction::<ForecastResponse>(product_id, &input_hash) {
                Ok(Some(mut hit)) => {
                    debug!(product_id = %product_id, "serving cached prediction");
                    hit.cached = true;
                    return Ok(hit);
                }
                Ok(None) => {}
                Err(e) => warn!(product_id = %product_id, error = %e, "prediction cache lookup failed"),
            }
        }

        let selector = Arc::clone(&self.selector);
        let cache = Arc::clone(&self.cache);
        let response = tokio::task::spawn_blocking(move || {
            forecast_blocking(&selector, &cache, &table, days_ahead, !use_cache)
        })
        .await
        .map_err(|e| ForecastError::prediction(format!("forecast task failed: {e}")))??;

        if let Err(e) = self.cache.cache_prediction(
            &response,
            product_id,
            &input_hash,
            response.model_cache_id.as_deref(),
        ) {
            warn!(product_id = %product_id, error = %e, "could not cache prediction");
        }

        info!(
            product_id = %product_id,
            model = %response.model_used,
            confidence = response.confidence,
            status = %response.status,
            days_ahead,
            "prediction issued"
        );
        Ok(response)
    }

    /// Independent forecasts for several products, run concurrently.
    pub async fn predict_many(
        &self,
        requests: &[(ProductId, u32)],
        use_cache: bool,
    ) -> Vec<Result<ForecastResponse>> {
        join_all(
            requests
                .iter()
                .map(|(product_id, days)| self.predict(*product_id, *days, use_cache)),
        )
        .await
    }
}

impl std::fmt::Debug for DemandForecaster {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DemandForecaster")
            .field("cache", &self.cache)
            .field("config", &self.config)
            .finish()
    }
}

enum Failure {
    /// Nothing to predict with; a second comparison would not help.
    NoModel(String),
    /// A model was chosen but could not be loaded or applied.
    Unusable(String),
}

fn forecast_blocking(
    selector: &AutoModelSelector,
    cache: &ModelCache,
    table: &FeatureTable,
    days_ahead: u32,
    force_retrain: bool,
) -> Result<ForecastResponse> {
    let future = build_future_rows(table, days_ahead)?;

    let mut attempt = forecast_with_best(selector, cache, table, &future, force_retrain);
    if let Err(Failure::Unusable(reason)) = &attempt {
        if !force_retrain {
            debug!(product_id = %table.product_id, reason = %reason, "retrying with a fresh comparison");
            selector.forget(table.product_id);
            attempt = forecast_with_best(selector, cache, table, &future, true);
        }
    }

    match attempt {
        Ok(response) => Ok(response),
        Err(Failure::NoModel(reason) | Failure::Unusable(reason)) => {
            warn!(product_id = %table.product_id, reason = %reason, "falling back to naive mean forecast");
            naive_response(table, &future, reason)
        }
    }
}

fn forecast_with_best(
    selector: &AutoModelSelector,
    cache: &ModelCache,
    table: &FeatureTable,
    future: &FeatureTable,
    force_retrain: bool,
) -> std::result::Result<ForecastResponse, Failure> {
    let selection = selector
        .select_best(table, force_retrain)
        .map_err(|e| Failure::NoModel(format!("model selection failed: {e}")))?
        .ok_or_else(|| Failure::NoModel(NO_VALID_MODEL.to_string()))?;
    match apply_selection(cache, &selection, future) {
        Ok(Some(predictions)) => Ok(model_response(table, future, &selection, predictions)),
        Ok(None) => Err(Failure::Unusable(format!(
            "model {} is not available in the cache",
            selection.variant
        ))),
        Err(e) => Err(Failure::Unusable(e.to_string())),
    }
}

/// Load the selected model and predict the future rows. `None` if the model is gone.
fn apply_selection(cache: &ModelCache, selection: &ModelSelection, future: &FeatureTable) -> Result<Option<Vec<f64>>> {
    let Some(cache_id) = selection.cache_id.as_deref() else {
        return Ok(None);
    };
    let Some((model, _)) = cache.load_model(ModelKey::Id(cache_id))? else {
        return Ok(None);
    };
    let predictions = model.predict(future)?;
    Ok(Some(predictions.into_iter().map(|p| p.max(0.0)).collect()))
}

fn model_response(
    table: &FeatureTable,
    future: &FeatureTable,
    selection: &ModelSelection,
    predictions: Vec<f64>,
) -> ForecastResponse {
    ForecastResponse {
        product_id: table.product_id.get(),
        days_ahead: future.len() as u32,
        dates: future.dates().to_vec(),
        predictions,
        model_used: selection.variant.to_string(),
        model_cache_id: selection.cache_id.clone(),
        confidence: model_confidence(selection.r2, table.len(), table.is_synthetic()),
        status: ForecastStatus::Ok,
        synthetic_data: table.is_synthetic(),
        cached: false,
        generated_at: Utc::now(),
        message: table
            .is_synthetic()
            .then(|| "No sales history recorded; forecast is based on synthetic data".to_string()),
    }
}

fn naive_response(table: &FeatureTable, future: &FeatureTable, reason: String) -> Result<ForecastResponse> {
    let history = table.target().unwrap_or(&[]);
    let model = NaiveMeanModel::from_history(NAIVE_WINDOW, history);
    let predictions = model
        .predict(future)?
        .into_iter()
        .map(|p| p.max(0.0))
        .collect();
    Ok(ForecastResponse {
        product_id: table.product_id.get(),
        days_ahead: future.len() as u32,
        dates: future.dates().to_vec(),
        predictions,
        model_used: model.name(),
        model_cache_id: None,
        confidence: fallback_confidence(model.historical_values.len()),
        status: ForecastStatus::Fallback,
        synthetic_data: table.is_synthetic(),
        cached: false,
        generated_at: Utc::now(),
        message: Some(reason),
    })
}
