// src/lib.rs
//! Generative-media studio backend: Vertex AI generation with per-user history.

pub mod config;
pub mod db;
pub mod error;
pub mod google_auth;
pub mod handlers;
pub mod history;
pub mod media;
pub mod middleware;
pub mod models;
pub mod orchestrator;
pub mod retry;
pub mod storage;

use axum::{routing::get, Extension, Router};
use std::sync::Arc;
use tower_http::cors::CorsLayer;

use crate::history::HistoryStore;
use crate::orchestrator::Orchestrator;

pub struct AppState {
    pub orchestrator: Orchestrator,
    pub history: Arc<dyn HistoryStore>,
    pub default_user_id: Option<String>,
    pub store_backend: &'static str, // "postgres" or "memory"
}

/// All routes. Everything except `/api/status` requires a caller identity.
pub fn build_router(state: Arc<AppState>) -> Router {
    let user_routes = Router::new()
        .merge(handlers::generate::generate_routes())
        .merge(handlers::history::history_routes())
        .route_layer(axum::middleware::from_fn(middleware::identity::identity_middleware));

    Router::new()
        .merge(user_routes)
        .route("/api/status", get(handlers::api_status))
        .layer(axum::middleware::from_fn(middleware::logging::request_logging_middleware))
        .layer(CorsLayer::permissive())
        .layer(Extension(state))
}
