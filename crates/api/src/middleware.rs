use std::sync::Arc;

use axum::{
    extract::State,
    http::HeaderMap,
    middleware::Next,
    response::{IntoResponse, Response},
};
use tracing::debug;

use khata_auth::{AccountError, AccountService};

use crate::app::errors::ApiError;
use crate::context::AuthContext;

#[derive(Clone)]
pub struct AuthState {
    pub service: Arc<AccountService>,
}

/// Require a valid bearer token and attach an [`AuthContext`].
pub async fn auth_middleware(
    State(state): State<AuthState>,
    mut req: axum::http::Request<axum::body::Body>,
    next: Next,
) -> Response {
    let Some(token) = extract_bearer(req.headers()) else {
        return ApiError::from(AccountError::Unauthenticated).into_response();
    };

    let claims = match state.service.tokens().verify(token, state.service.now()) {
        Ok(claims) => claims,
        Err(err) => {
            debug!(error = %err, "rejected bearer token");
            return ApiError::from(AccountError::Unauthenticated).into_response();
        }
    };

    req.extensions_mut().insert(AuthContext::from_claims(claims));
    next.run(req).await
}

fn extract_bearer(headers: &HeaderMap) -> Option<&str> {
    let header = headers.get(axum::http::header::AUTHORIZATION)?;
    let token = header.to_str().ok()?.strip_prefix("Bearer ")?.trim();
    if token.is_empty() {
        return None;
    }
    Some(token)
}
