use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use validator::Validate;

use crate::{
    error::AnalysisError,
    extractors::ValidatedQuery,
    models::{feature::FeatureVector, plan::GenerationPlan},
    services::{feature_pipeline::SetProcessingSummary, AppState},
};

const RETRY_MESSAGE: &str = "processing incomplete, retry";

#[derive(Debug, Default, Deserialize, Validate)]
pub struct ProcessSetParams {
    #[validate(range(min = 1, max = 100))]
    pub plan_total_items: Option<u32>,
}

#[derive(Debug, Serialize)]
pub struct AttemptFeaturesResponse {
    pub attempt_id: String,
    pub problem_set_id: String,
    pub model_version: String,
    pub features: FeatureVector,
    pub computed_at: DateTime<Utc>,
}

/// POST /api/v1/attempts/{id}/features
pub(crate) async fn compute_attempt_features(
    State(state): State<Arc<AppState>>,
    Path(attempt_id): Path<String>,
) -> Result<Json<AttemptFeaturesResponse>, ApiError> {
    let attempt_id = require_id(&attempt_id, "attempt_id")?;
    let cancel = state.shutdown.child_token();

    let row = state
        .pipeline
        .compute_attempt_features(attempt_id, &cancel)
        .await?;

    Ok(Json(AttemptFeaturesResponse {
        attempt_id: attempt_id.to_string(),
        problem_set_id: row.problem_set_id,
        model_version: row.model_version,
        features: row.features,
        computed_at: row.computed_at,
    }))
}

/// POST /api/v1/problem-sets/{id}/features
pub(crate) async fn process_problem_set(
    State(state): State<Arc<AppState>>,
    Path(problem_set_id): Path<String>,
    ValidatedQuery(params): ValidatedQuery<ProcessSetParams>,
) -> Result<Json<SetProcessingSummary>, ApiError> {
    let problem_set_id = require_id(&problem_set_id, "problem_set_id")?;
    let cancel = state.shutdown.child_token();

    let summary = state
        .pipeline
        .process_problem_set(problem_set_id, params.plan_total_items, &cancel)
        .await?;

    Ok(Json(summary))
}

/// GET /api/v1/problem-sets/{id}/plan
pub(crate) async fn get_plan(
    State(state): State<Arc<AppState>>,
    Path(problem_set_id): Path<String>,
) -> Result<Json<GenerationPlan>, ApiError> {
    let problem_set_id = require_id(&problem_set_id, "problem_set_id")?;

    let plan = state
        .pipeline
        .load_plan(problem_set_id)
        .await?
        .ok_or_else(|| ApiError::not_found("No active plan for this problem set"))?;

    Ok(Json(plan))
}

#[derive(Debug)]
pub(crate) enum ApiError {
    BadRequest(String),
    NotFound(String),
    Unavailable(String),
    Internal(String),
}

impl ApiError {
    fn bad_request(message: impl Into<String>) -> Self {
        ApiError::BadRequest(message.into())
    }

    fn not_found(message: impl Into<String>) -> Self {
        ApiError::NotFound(message.into())
    }
}

impl From<AnalysisError> for ApiError {
    fn from(err: AnalysisError) -> Self {
        match err {
            AnalysisError::NotFound { .. } => ApiError::NotFound(err.to_string()),
            AnalysisError::MalformedEvent(_) => ApiError::BadRequest(err.to_string()),
            AnalysisError::Store(_) | AnalysisError::ExternalService(_) | AnalysisError::Cancelled => {
                tracing::error!(error = %err, "Feature processing failed");
                ApiError::Unavailable(RETRY_MESSAGE.to_string())
            }
            AnalysisError::Config(_) => {
                tracing::error!(error = %err, "Feature processing misconfigured");
                ApiError::Internal(RETRY_MESSAGE.to_string())
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let (status, message) = match self {
            ApiError::BadRequest(message) => (StatusCode::BAD_REQUEST, message),
            ApiError::NotFound(message) => (StatusCode::NOT_FOUND, message),
            ApiError::Unavailable(message) => (StatusCode::SERVICE_UNAVAILABLE, message),
            ApiError::Internal(message) => (StatusCode::INTERNAL_SERVER_ERROR, message),
        };

        (
            status,
            Json(json!({
                "message": message,
                "status": status.as_u16()
            })),
        )
            .into_response()
    }
}

fn require_id<'a>(value: &'a str, field: &str) -> Result<&'a str, ApiError> {
    let trimmed = value.trim();
    if trimmed.is_empty() || trimmed.len() > 64 {
        return Err(ApiError::bad_request(format!("Invalid {}", field)));
    }
    Ok(trimmed)
}
