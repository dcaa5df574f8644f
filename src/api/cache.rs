use axum::extract::{Path, State};
use serde::Serialize;

use super::{error::ApiError, response::ApiResponse, AppState};
use crate::{
    domain::ProductId,
    ml::cache::{CacheStats, CleanupReport},
};

#[derive(Debug, Serialize)]
pub struct CacheStatsResponse {
    pub product_id: i64,
    pub cache_stats: CacheStats,
}

#[derive(Debug, Serialize)]
pub struct ClearCacheResponse {
    pub message: String,
    pub product_id: i64,
    pub removed: CleanupReport,
}

fn product(id: i64) -> Result<ProductId, ApiError> {
    let product_id = ProductId(id);
    if product_id.is_valid() {
        Ok(product_id)
    } else {
        Err(ApiError::BadRequest(format!("product_id must be positive, got {id}")))
    }
}

/// GET /api/v1/cache/stats/:product_id
pub async fn get_cache_stats(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<ApiResponse<CacheStatsResponse>, ApiError> {
    let product_id = product(id)?;
    let cache_stats = state.cache.get_cache_stats(Some(product_id))?;
    Ok(ApiResponse::success(CacheStatsResponse {
        product_id: id,
        cache_stats,
    }))
}

/// DELETE /api/v1/cache/:product_id
pub async fn clear_product_cache(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<ApiResponse<ClearCacheResponse>, ApiError> {
    let product_id = product(id)?;
    let removed = state.cache.invalidate_product(product_id)?;
    state.selector.forget(product_id);
    Ok(ApiResponse::success(ClearCacheResponse {
        message: format!("Cache cleared for product {product_id}"),
        product_id: id,
        removed,
    }))
}
