use std::time::Instant;

use axum::{extract::State, Json};
use serde::{Deserialize, Serialize};
use validator::Validate;

use super::{error::ApiError, response::ApiResponse, AppState};
use crate::{domain::ProductId, forecast::ForecastResponse};

fn default_days_ahead() -> u32 {
    7
}

fn default_use_cache() -> bool {
    true
}

#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
pub struct PredictRequest {
    #[validate(range(min = 1))]
    pub product_id: i64,
    /// Upper bound is `forecast.max_days_ahead`, enforced by the forecaster.
    #[serde(default = "default_days_ahead")]
    #[validate(range(min = 1))]
    pub days_ahead: u32,
    #[serde(default = "default_use_cache")]
    pub use_cache: bool,
}

/// POST /api/v1/predict
pub async fn predict(
    State(state): State<AppState>,
    Json(req): Json<PredictRequest>,
) -> Result<ApiResponse<ForecastResponse>, ApiError> {
    req.validate()?;
    let start = Instant::now();
    let response = state
        .forecaster
        .predict(ProductId(req.product_id), req.days_ahead, req.use_cache)
        .await?;
    Ok(ApiResponse::success(response).with_duration(start.elapsed().as_millis() as u64))
}
