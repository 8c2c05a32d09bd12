// Prediction API: single and batch classification through the registry.
// Forward passes run on the blocking pool, one permit each. A request that
// never reaches the success branch (error or cancellation) is timed as failed.
use axum::extract::{Json, State};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info};

use super::ApiError;
use crate::error::{ClassifierError, Result};
use crate::inference::{self, InferenceResult};
use crate::shared_state::AppState;

#[derive(Debug, Deserialize)]
pub struct PredictIn {
    pub text: String,
    #[serde(default)]
    pub model: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct PredictBatchIn {
    pub texts: Vec<String>,
    #[serde(default)]
    pub model: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictOut {
    pub label: String,
    pub score: f32,
    pub probs: Vec<f32>,
}

impl From<InferenceResult> for PredictOut {
    fn from(result: InferenceResult) -> Self {
        Self {
            label: result.label,
            score: result.score,
            probs: result.probs,
        }
    }
}

/// Classify one text with the requested (or default) model
pub async fn predict(
    State(state): State<AppState>,
    Json(req): Json<PredictIn>,
) -> std::result::Result<Json<PredictOut>, ApiError> {
    let model_name = state.resolve_model_name(req.model.as_deref()).to_string();
    debug!("Predict request for '{}' ({} chars)", model_name, req.text.len());

    let handle = state
        .registry
        .get_model(&model_name)
        .await
        .map_err(|e| ApiError::from_classifier(e, "Prediction failed"))?;

    let mut timer = state.metrics.start_timer(model_name.as_str());
    let text = req.text;
    let outcome = run_inference(&state, move || inference::predict_one(&handle, &text)).await;
    match &outcome {
        Ok(_) => timer.mark_succeeded(),
        Err(e) => error!("Prediction with '{}' failed: {}", model_name, e),
    }
    drop(timer);

    outcome
        .map(|result| Json(result.into()))
        .map_err(|e| ApiError::from_classifier(e, "Prediction failed"))
}

/// Classify up to `MAX_BATCH_SIZE` texts in one forward pass
pub async fn predict_batch(
    State(state): State<AppState>,
    Json(req): Json<PredictBatchIn>,
) -> std::result::Result<Json<Vec<PredictOut>>, ApiError> {
    let limit = state.config.max_batch_size;
    if req.texts.len() > limit {
        return Err(ApiError::bad_request(format!("Too many texts (max {})", limit)));
    }

    let model_name = state.resolve_model_name(req.model.as_deref()).to_string();
    let handle = state
        .registry
        .get_model(&model_name)
        .await
        .map_err(|e| ApiError::from_classifier(e, "Batch prediction failed"))?;

    info!("Batch predict of {} texts with '{}'", req.texts.len(), model_name);

    let mut timer = state.metrics.start_timer(model_name.as_str());
    let texts = req.texts;
    let outcome = run_inference(&state, move || inference::predict_batch(&handle, texts.as_slice())).await;
    match &outcome {
        Ok(_) => timer.mark_succeeded(),
        Err(e) => error!("Batch prediction with '{}' failed: {}", model_name, e),
    }
    drop(timer);

    outcome
        .map(|results| Json(results.into_iter().map(PredictOut::from).collect()))
        .map_err(|e| ApiError::from_classifier(e, "Batch prediction failed"))
}

/// Run a CPU-bound inference closure on the blocking pool once a permit is free
async fn run_inference<T, F>(state: &AppState, job: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    let permit = state
        .inference_permits
        .clone()
        .acquire_owned()
        .await
        .map_err(|_| ClassifierError::inference("inference permits closed"))?;

    tokio::task::spawn_blocking(move || {
        let _permit = permit;
        job()
    })
    .await
    .map_err(|e| ClassifierError::inference(format!("inference task failed: {}", e)))?
}
