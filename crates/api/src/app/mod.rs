//! HTTP application wiring (Axum router + service wiring).
//!
//! - `services.rs`: store, transport and account service construction
//! - `routes/`: HTTP routes + handlers (one file per area)
//! - `dto.rs`: request DTOs and extraction helpers
//! - `errors.rs`: the response envelope

use std::sync::Arc;

use axum::{Extension, Router, routing::get};
use tower::ServiceBuilder;

use khata_auth::AccountService;

use crate::middleware;

pub mod dto;
pub mod errors;
pub mod routes;
pub mod services;

/// Build the full HTTP router around an account service.
pub fn build_app(service: Arc<AccountService>) -> Router {
    let auth_state = middleware::AuthState {
        service: service.clone(),
    };

    // Protected routes: require a valid bearer token.
    let protected = routes::protected_router().layer(
        ServiceBuilder::new().layer(axum::middleware::from_fn_with_state(
            auth_state,
            middleware::auth_middleware,
        )),
    );

    Router::new()
        .route("/health", get(routes::system::health))
        .merge(routes::auth::router())
        .merge(protected)
        .layer(Extension(service))
}
