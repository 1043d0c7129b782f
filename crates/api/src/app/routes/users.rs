use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Extension, rejection::JsonRejection},
    http::StatusCode,
    response::Response,
    routing::{get, patch},
};

use khata_auth::AccountService;

use crate::app::dto::{self, AvatarRequest};
use crate::app::errors::{ApiError, json_ok};
use crate::context::AuthContext;

pub fn router() -> Router {
    Router::new()
        .route("/me", get(me))
        .route("/me/avatar", patch(update_avatar))
}

async fn me(
    Extension(service): Extension<Arc<AccountService>>,
    Extension(auth): Extension<AuthContext>,
) -> Result<Response, ApiError> {
    let profile = service.profile(auth.user_id()).await?;
    Ok(json_ok(StatusCode::OK, "Profile", profile))
}

async fn update_avatar(
    Extension(service): Extension<Arc<AccountService>>,
    Extension(auth): Extension<AuthContext>,
    payload: Result<Json<AvatarRequest>, JsonRejection>,
) -> Result<Response, ApiError> {
    let AvatarRequest { avatar } = dto::body(payload)?;
    let profile = service.update_avatar(auth.user_id(), avatar).await?;
    Ok(json_ok(StatusCode::OK, "Avatar updated", profile))
}
