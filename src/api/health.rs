use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use serde::Serialize;

use super::AppState;

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    status: String,
    version: &'static str,
    timestamp: chrono::DateTime<chrono::Utc>,
    cache: ComponentHealth,
}

/// Health status of a component
#[derive(Debug, Serialize)]
pub struct ComponentHealth {
    status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    total_size_mb: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

/// GET /api/v1/health
pub async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    let cache = match state.cache.get_cache_stats(None) {
        Ok(stats) => ComponentHealth {
            status: stats.cache_health.to_string(),
            total_size_mb: Some(stats.cache_total_size_mb),
            error: None,
        },
        Err(e) => ComponentHealth {
            status: "unavailable".to_string(),
            total_size_mb: None,
            error: Some(e.to_string()),
        },
    };

    let healthy = cache.error.is_none();
    let response = HealthResponse {
        status: if healthy { "healthy" } else { "degraded" }.to_string(),
        version: env!("CARGO_PKG_VERSION"),
        timestamp: chrono::Utc::now(),
        cache,
    };
    let status_code = if healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    tracing::debug!(healthy, "Health check completed");

    (status_code, Json(response))
}

#[cfg(test)]
mod tests {
    use crate::ml::cache::CacheHealth;

    #[test]
    fn test_cache_health_labels() {
        assert_eq!(CacheHealth::NeedsCleanup.to_string(), "needs_cleanup");
        assert_eq!(CacheHealth::Good.to_string(), "good");
    }
}
