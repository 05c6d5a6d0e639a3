// src/handlers/generate.rs
//! Generation endpoints.

use axum::{
    extract::{Extension, Path},
    http::StatusCode,
    response::{IntoResponse, Json},
    routing::post,
    Router,
};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;

use super::ApiError;
use crate::models::auth::CallerIdentity;
use crate::models::generation::{MediaInput, RawParams};
use crate::orchestrator::{FailureKind, OrchestrationResult};
use crate::AppState;

/// HTTP status for an orchestration outcome.
pub fn status_for(result: &OrchestrationResult) -> StatusCode {
    match result {
        OrchestrationResult::Succeeded { .. } => StatusCode::OK,
        OrchestrationResult::Failed { kind, .. } => match kind {
            FailureKind::Validation => StatusCode::UNPROCESSABLE_ENTITY,
            FailureKind::External => StatusCode::BAD_GATEWAY,
            FailureKind::Timeout => StatusCode::GATEWAY_TIMEOUT,
            FailureKind::Store => StatusCode::SERVICE_UNAVAILABLE,
        },
    }
}

/// POST /api/generate - Run one generation and record it
pub async fn generate(
    Extension(state): Extension<Arc<AppState>>,
    Extension(caller): Extension<CallerIdentity>,
    Json(params): Json<RawParams>,
) -> impl IntoResponse {
    let result = state.orchestrator.generate(&caller.user_id, params).await;
    (status_for(&result), Json(result))
}

/// POST /api/history/:id/replay - Run a past generation again
pub async fn replay(
    Path(record_id): Path<String>,
    Extension(state): Extension<Arc<AppState>>,
    Extension(caller): Extension<CallerIdentity>,
) -> Result<impl IntoResponse, ApiError> {
    let result = state.orchestrator.replay(&caller.user_id, &record_id).await?;
    Ok((status_for(&result), Json(result)))
}

#[derive(Debug, Deserialize)]
pub struct PromptFromImageRequest {
    pub image: MediaInput,
    #[serde(default)]
    pub instructions: Option<String>,
}

/// POST /api/prompt-from-image - Draft a prompt from a reference image
pub async fn prompt_from_image(
    Extension(state): Extension<Arc<AppState>>,
    Extension(caller): Extension<CallerIdentity>,
    Json(body): Json<PromptFromImageRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let prompt = state
        .orchestrator
        .describe_image(&body.image, body.instructions.as_deref())
        .await?;
    tracing::debug!(user_id = %caller.user_id, chars = prompt.len(), "prompt drafted from image");
    Ok(Json(json!({ "prompt": prompt })))
}

pub fn generate_routes() -> Router {
    Router::new()
        .route("/api/generate", post(generate))
        .route("/api/prompt-from-image", post(prompt_from_image))
        .route("/api/history/:id/replay", post(replay))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::MediaError;

    #[test]
    fn test_failure_kinds_map_to_distinct_statuses() {
        let failed = |kind| OrchestrationResult::Failed {
            record_id: None,
            kind,
            reason: "x".into(),
        };
        assert_eq!(status_for(&failed(FailureKind::Validation)), StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(status_for(&failed(FailureKind::External)), StatusCode::BAD_GATEWAY);
        assert_eq!(status_for(&failed(FailureKind::Timeout)), StatusCode::GATEWAY_TIMEOUT);
        assert_eq!(status_for(&failed(FailureKind::Store)), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(
            status_for(&OrchestrationResult::Succeeded {
                record_id: "r".into(),
                artifacts: vec![]
            }),
            StatusCode::OK
        );
    }

    #[test]
    fn test_media_errors_map_to_api_errors() {
        let invalid = ApiError::from(MediaError::from(crate::error::ValidationError::invalid("image", "bad")));
        assert!(matches!(invalid, ApiError::Unprocessable(_)));
        let outage = ApiError::from(MediaError::Transient("connection reset".into()));
        assert!(matches!(outage, ApiError::BadGateway(_)));
    }
}
