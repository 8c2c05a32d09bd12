//! Health and telemetry endpoints
use axum::{
    extract::State,
    http::{header, StatusCode},
    response::IntoResponse,
    Json,
};
use serde::{Deserialize, Serialize};

use crate::metrics::MetricsSnapshot;
use crate::shared_state::AppState;

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ResetResponse {
    pub status: String,
}

pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
    })
}

/// Current counters, with the average latency rounded to 4 decimals
pub async fn metrics(State(state): State<AppState>) -> Json<MetricsSnapshot> {
    let mut snapshot = state.metrics.snapshot();
    snapshot.average_response_time = (snapshot.average_response_time * 10_000.0).round() / 10_000.0;
    Json(snapshot)
}

pub async fn reset_metrics(State(state): State<AppState>) -> Json<ResetResponse> {
    state.metrics.reset();
    Json(ResetResponse {
        status: "reset".to_string(),
    })
}

/// Prometheus text exposition
pub async fn prometheus_metrics() -> impl IntoResponse {
    match crate::metrics::gather_text() {
        Ok(body) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            body,
        ),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
            format!("failed to encode metrics: {}", e),
        ),
    }
}
