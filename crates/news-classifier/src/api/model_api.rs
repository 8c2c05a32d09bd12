// Model catalog API
use axum::extract::{Json, Query, State};
use serde::{Deserialize, Serialize};

use super::ApiError;
use crate::shared_state::AppState;

#[derive(Debug, Serialize, Deserialize)]
pub struct ModelsResponse {
    pub models: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct LabelsQuery {
    pub model: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct LabelsResponse {
    pub labels: Vec<String>,
    pub model: String,
}

/// Registered model names, sorted. Does not load anything.
pub async fn list_models(State(state): State<AppState>) -> Json<ModelsResponse> {
    Json(ModelsResponse {
        models: state.registry.list_models().into_iter().collect(),
    })
}

/// Label names of a model in class-index order; loads the model if needed
pub async fn labels(
    State(state): State<AppState>,
    Query(query): Query<LabelsQuery>,
) -> Result<Json<LabelsResponse>, ApiError> {
    let model = state.resolve_model_name(query.model.as_deref()).to_string();
    let labels = state
        .registry
        .labels(&model)
        .await
        .map_err(|e| ApiError::from_classifier(e, "Internal server error"))?;

    Ok(Json(LabelsResponse { labels, model }))
}
