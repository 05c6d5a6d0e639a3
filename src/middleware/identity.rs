use crate::models::auth::{CallerIdentity, ErrorResponse};
use crate::AppState;
use axum::{
    extract::{Extension, Request},
    http::{HeaderMap, StatusCode},
    middleware::Next,
    response::{IntoResponse, Json, Response},
};
use std::sync::Arc;

/// Set by Identity-Aware Proxy in front of the service.
pub const IAP_EMAIL_HEADER: &str = "x-goog-authenticated-user-email";

const IAP_PREFIX: &str = "accounts.google.com:";

/// Resolves the caller from the IAP header, falling back to the configured
/// default user for local runs.
pub async fn identity_middleware(
    Extension(state): Extension<Arc<AppState>>,
    headers: HeaderMap,
    mut request: Request,
    next: Next,
) -> Result<Response, impl IntoResponse> {
    let user_id = match caller_from_headers(&headers) {
        Some(user_id) => user_id,
        None => match &state.default_user_id {
            Some(default) => default.clone(),
            None => {
                tracing::warn!("request without an authenticated user");
                return Err((
                    StatusCode::UNAUTHORIZED,
                    Json(ErrorResponse::new("No authenticated user on the request")),
                ));
            }
        },
    };

    request.extensions_mut().insert(CallerIdentity { user_id });
    Ok(next.run(request).await)
}

/// `accounts.google.com:ana@example.com` becomes `ana@example.com`.
pub fn caller_from_headers(headers: &HeaderMap) -> Option<String> {
    let raw = headers.get(IAP_EMAIL_HEADER)?.to_str().ok()?.trim();
    let email = raw.strip_prefix(IAP_PREFIX).unwrap_or(raw).trim();
    if email.is_empty() {
        None
    } else {
        Some(email.to_string())
    }
}
