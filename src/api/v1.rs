use axum::{
    routing::{delete, get, post},
    Router,
};

use super::{cache, comparison, health, predict, AppState};

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/predict", post(predict::predict))
        .route("/models/comparison/:product_id", get(comparison::get_comparison))
        .route("/cache/stats/:product_id", get(cache::get_cache_stats))
        .route("/cache/:product_id", delete(cache::clear_product_cache))
        .route("/health", get(health::health_check))
        .with_state(state)
}
