pub mod cache;
pub mod comparison;
pub mod error;
pub mod health;
pub mod predict;
pub mod response;
pub mod v1;

use std::{sync::Arc, time::Duration};

use axum::{http::StatusCode, Router};
use tower::ServiceBuilder;
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};

use crate::{
    config::Config,
    error::Result,
    forecast::{DemandForecaster, FeatureEnricher},
    ml::{
        cache::ModelCache,
        comparison::{AutoModelSelector, ModelComparator},
        registry::TrainerRegistry,
    },
    repo::SalesStore,
};

/// Shared handler state.
#[derive(Clone)]
pub struct AppState {
    pub forecaster: Arc<DemandForecaster>,
    pub selector: Arc<AutoModelSelector>,
    pub cache: Arc<ModelCache>,
}

impl AppState {
    /// Wire cache, comparator, selector and facade around a storage collaborator.
    pub fn build(cfg: &Config, store: Arc<dyn SalesStore>) -> Result<Self> {
        let cache = Arc::new(ModelCache::open(cfg.cache.clone())?);
        let comparator = ModelComparator::new(
            TrainerRegistry::with_defaults(),
            Arc::clone(&cache),
            cfg.comparison.clone(),
        );
        let selector = Arc::new(AutoModelSelector::new(comparator));
        let enricher = FeatureEnricher::new(store)
            .with_storage_timeout(Duration::from_secs(cfg.forecast.storage_timeout_secs))
            .with_synthetic_days(cfg.forecast.synthetic_history_days);
        let forecaster = Arc::new(DemandForecaster::new(
            enricher,
            Arc::clone(&selector),
            Arc::clone(&cache),
            cfg.forecast.clone(),
        ));
        Ok(Self {
            forecaster,
            selector,
            cache,
        })
    }
}

pub fn router(state: AppState, cfg: &Config) -> Router {
    Router::new()
        .nest("/api/v1", v1::router(state))
        .layer(
            ServiceBuilder::new()
                .layer(axum::extract::DefaultBodyLimit::max(64 * 1024))
                .layer(TimeoutLayer::with_status_code(
                    StatusCode::REQUEST_TIMEOUT,
                    Duration::from_secs(cfg.server.request_timeout_secs),
                )),
        )
        .layer(TraceLayer::new_for_http())
}
