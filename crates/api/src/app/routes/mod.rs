use axum::Router;

pub mod auth;
pub mod businesses;
pub mod system;
pub mod users;

/// Router for all endpoints that need an authenticated caller.
pub fn protected_router() -> Router {
    Router::new()
        .merge(auth::protected_router())
        .nest("/users", users::router())
        .nest("/businesses", businesses::router())
}
