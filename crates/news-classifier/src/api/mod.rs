//! API module - HTTP interface over the registry, the engine and the metrics

pub mod admin_api;
pub mod model_api;
pub mod predict_api;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};

use crate::error::{ClassifierError, ErrorKind};

// Re-export API handlers
pub use admin_api::{health, metrics, prometheus_metrics, reset_metrics};
pub use model_api::{labels, list_models, LabelsQuery, LabelsResponse, ModelsResponse};
pub use predict_api::{predict, predict_batch, PredictBatchIn, PredictIn, PredictOut};

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub detail: String,
}

/// A handler failure, already mapped to its status code
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub detail: String,
}

impl ApiError {
    pub fn bad_request(detail: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            detail: detail.into(),
        }
    }

    /// Map a core error. Unknown models keep their message; load and
    /// inference failures are answered with `fallback` only.
    pub fn from_classifier(err: ClassifierError, fallback: &str) -> Self {
        match err.kind() {
            ErrorKind::NotFound => Self {
                status: StatusCode::NOT_FOUND,
                detail: err.to_string(),
            },
            ErrorKind::Config => Self::bad_request(err.to_string()),
            ErrorKind::Load | ErrorKind::Inference => Self {
                status: StatusCode::INTERNAL_SERVER_ERROR,
                detail: fallback.to_string(),
            },
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(ErrorResponse { detail: self.detail })).into_response()
    }
}
