use axum::extract::{Path, Query, State};
use serde::Deserialize;
use tracing::info;

use super::{error::ApiError, response::ApiResponse, AppState};
use crate::{domain::ProductId, ml::comparison::ComparisonResult};

#[derive(Debug, Default, Deserialize)]
pub struct ComparisonQuery {
    #[serde(default)]
    pub force_retrain: bool,
}

/// GET /api/v1/models/comparison/:product_id
pub async fn get_comparison(
    State(state): State<AppState>,
    Path(product_id): Path<i64>,
    Query(query): Query<ComparisonQuery>,
) -> Result<ApiResponse<ComparisonResult>, ApiError> {
    let product_id = ProductId(product_id);
    if !product_id.is_valid() {
        return Err(ApiError::BadRequest(format!("product_id must be positive, got {product_id}")));
    }

    let table = state.forecaster.prepare(product_id).await?;
    let selector = state.selector.clone();
    let force_retrain = query.force_retrain;
    let result = tokio::task::spawn_blocking(move || {
        let result = selector.comparator().compare_all_models(&table, force_retrain)?;
        selector.record(&result);
        Ok::<_, crate::ForecastError>(result)
    })
    .await??;

    info!(product_id = %product_id, best_model = ?result.best_model, "comparison served");
    Ok(ApiResponse::success(result))
}
