//! HTTP surface tests
//!
//! Requests go through the full router (body limit, timeout and trace layers)
//! with `tower::ServiceExt::oneshot`.

mod common;

use axum::{
    body::{to_bytes, Body},
    http::{Method, Request, StatusCode},
    Router,
};
use serde_json::{json, Value};
use tempfile::TempDir;
use tower::ServiceExt;

use common::{config_in, date, seasonal_sales, store_with};
use microanalytics_forecast::api::{router, AppState};

fn app(dir: &TempDir, product: i64) -> Router {
    let cfg = config_in(dir);
    let store = store_with(product, seasonal_sales(product, 100, date(2024, 5, 31)));
    let state = AppState::build(&cfg, store).unwrap();
    router(state, &cfg)
}

async fn send(app: &Router, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let request = Request::builder().method(method).uri(uri);
    let request = match body {
        Some(body) => request
            .header("content-type", "application/json")
            .body(Body::from(body.to_string())),
        None => request.body(Body::empty()),
    }
    .unwrap();

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, serde_json::from_slice(&bytes).unwrap())
}

#[tokio::test]
async fn test_health() {
    let dir = TempDir::new().unwrap();
    let app = app(&dir, 1);

    let (status, body) = send(&app, Method::GET, "/api/v1/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["cache"]["status"], "good");
}

#[tokio::test]
async fn test_predict_then_cache_hit() {
    let dir = TempDir::new().unwrap();
    let app = app(&dir, 2);
    let request = json!({"product_id": 2, "days_ahead": 5});

    let (status, body) = send(&app, Method::POST, "/api/v1/predict", Some(request.clone())).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    let data = &body["data"];
    assert_eq!(data["product_id"], 2);
    assert_eq!(data["predictions"].as_array().unwrap().len(), 5);
    assert_eq!(data["dates"][0], "2024-06-01");
    assert_eq!(data["cached"], false);
    assert!(body["metadata"]["duration_ms"].is_u64());

    let (_, again) = send(&app, Method::POST, "/api/v1/predict", Some(request)).await;
    assert_eq!(again["data"]["cached"], true);
    assert_eq!(again["data"]["predictions"], data["predictions"]);
}

#[tokio::test]
async fn test_predict_rejects_out_of_range_horizon() {
    let dir = TempDir::new().unwrap();
    let app = app(&dir, 3);

    let (status, body) = send(
        &app,
        Method::POST,
        "/api/v1/predict",
        Some(json!({"product_id": 3, "days_ahead": 400})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["success"], false);
    assert_eq!(body["error"], "ValidationError");

    let (status, _) = send(
        &app,
        Method::POST,
        "/api/v1/predict",
        Some(json!({"product_id": 0})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_horizon_limit_follows_configuration() {
    let dir = TempDir::new().unwrap();
    let mut cfg = config_in(&dir);
    cfg.forecast.max_days_ahead = 30;
    let store = store_with(6, seasonal_sales(6, 100, date(2024, 5, 31)));
    let app = router(AppState::build(&cfg, store).unwrap(), &cfg);

    let (status, body) = send(
        &app,
        Method::POST,
        "/api/v1/predict",
        Some(json!({"product_id": 6, "days_ahead": 31})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "ValidationError");

    let (status, body) = send(
        &app,
        Method::POST,
        "/api/v1/predict",
        Some(json!({"product_id": 6, "days_ahead": 30})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["predictions"].as_array().unwrap().len(), 30);
}

#[tokio::test]
async fn test_comparison_endpoint() {
    let dir = TempDir::new().unwrap();
    let app = app(&dir, 4);

    let (status, body) = send(&app, Method::GET, "/api/v1/models/comparison/4?force_retrain=true", None).await;
    assert_eq!(status, StatusCode::OK);
    let data = &body["data"];
    assert_eq!(data["producto_id"], 4);
    assert!(data["mejor_modelo"].is_string());
    assert!(!data["ranking_modelos"].as_array().unwrap().is_empty());
    assert_eq!(data["modelos_evaluados"].as_object().unwrap().len(), 5);
    assert!(!data["recomendaciones"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn test_cache_stats_and_clear() {
    let dir = TempDir::new().unwrap();
    let app = app(&dir, 6);

    send(&app, Method::POST, "/api/v1/predict", Some(json!({"product_id": 6}))).await;

    let (status, body) = send(&app, Method::GET, "/api/v1/cache/stats/6", None).await;
    assert_eq!(status, StatusCode::OK);
    let stats = &body["data"]["cache_stats"];
    assert!(stats["models"]["count"].as_u64().unwrap() >= 1);
    assert_eq!(stats["predictions"]["count"], 1);
    assert_eq!(stats["max_cache_size_mb"], 500.0);

    let (status, body) = send(&app, Method::DELETE, "/api/v1/cache/6", None).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["data"]["removed"]["models_removed"].as_u64().unwrap() >= 1);

    let (_, body) = send(&app, Method::GET, "/api/v1/cache/stats/6", None).await;
    assert_eq!(body["data"]["cache_stats"]["models"]["count"], 0);
    assert_eq!(body["data"]["cache_stats"]["predictions"]["count"], 0);

    let (status, _) = send(&app, Method::DELETE, "/api/v1/cache/0", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}
