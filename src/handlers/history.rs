// src/handlers/history.rs
//! History browsing and reconciliation endpoints.

use axum::{
    extract::{Extension, Path, Query},
    response::{IntoResponse, Json},
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use super::ApiError;
use crate::models::auth::CallerIdentity;
use crate::models::history::GenerationRecord;
use crate::storage::public_url;
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    pub page_token: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct RecordResponse {
    #[serde(flatten)]
    pub record: GenerationRecord,
    /// Browser URLs for `record.artifacts`, same order.
    pub public_urls: Vec<String>,
}

impl From<GenerationRecord> for RecordResponse {
    fn from(record: GenerationRecord) -> Self {
        let public_urls = record
            .artifacts
            .iter()
            .map(|uri| public_url(uri).unwrap_or_else(|| uri.clone()))
            .collect();
        Self { record, public_urls }
    }
}

/// GET /api/history - One page of the caller's history, newest first
pub async fn list_history(
    Query(query): Query<HistoryQuery>,
    Extension(state): Extension<Arc<AppState>>,
    Extension(caller): Extension<CallerIdentity>,
) -> Result<impl IntoResponse, ApiError> {
    let token = query.page_token.as_deref().filter(|t| !t.is_empty());
    let page = state.orchestrator.history(&caller.user_id, token).await?;
    Ok(Json(page))
}

/// GET /api/history/:id - One record with browser URLs
pub async fn get_record(
    Path(record_id): Path<String>,
    Extension(state): Extension<Arc<AppState>>,
    Extension(caller): Extension<CallerIdentity>,
) -> Result<impl IntoResponse, ApiError> {
    let record = state.history.get(&caller.user_id, &record_id).await?;
    Ok(Json(RecordResponse::from(record)))
}

/// POST /api/history/resume - Settle long-running operations left pending
pub async fn resume_pending(
    Extension(state): Extension<Arc<AppState>>,
    Extension(caller): Extension<CallerIdentity>,
) -> Result<impl IntoResponse, ApiError> {
    let summary = state.orchestrator.resume_pending(&caller.user_id).await?;
    Ok(Json(summary))
}

pub fn history_routes() -> Router {
    Router::new()
        .route("/api/history", get(list_history))
        .route("/api/history/resume", post(resume_pending))
        .route("/api/history/:id", get(get_record))
}
