use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Extension, Path, rejection::JsonRejection},
    http::{HeaderMap, StatusCode},
    response::Response,
    routing::{get, post},
};
use serde_json::json;

use khata_auth::{AccountService, CreateBusinessInput, InviteInput, parse_business_id};

use crate::app::dto;
use crate::app::errors::{ApiError, json_ok};
use crate::context::AuthContext;

pub fn router() -> Router {
    Router::new()
        .route("/", get(list).post(create))
        .route("/:id/select", post(select))
        .route("/:id/invitations", post(invite))
}

async fn create(
    Extension(service): Extension<Arc<AccountService>>,
    Extension(auth): Extension<AuthContext>,
    payload: Result<Json<CreateBusinessInput>, JsonRejection>,
) -> Result<Response, ApiError> {
    let business = service
        .create_business(auth.user_id(), dto::body(payload)?)
        .await?;
    Ok(json_ok(
        StatusCode::CREATED,
        "Business created",
        business.snapshot(),
    ))
}

async fn list(
    Extension(service): Extension<Arc<AccountService>>,
    Extension(auth): Extension<AuthContext>,
) -> Result<Response, ApiError> {
    let businesses = service.list_businesses(auth.user_id()).await?;
    Ok(json_ok(StatusCode::OK, "Businesses", businesses))
}

async fn select(
    Extension(service): Extension<Arc<AccountService>>,
    Extension(auth): Extension<AuthContext>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    let business_id = parse_business_id(&id)?;
    let outcome = service
        .select_business(auth.user_id(), business_id, dto::client_info(&headers))
        .await?;
    Ok(json_ok(StatusCode::OK, "Business selected", outcome))
}

async fn invite(
    Extension(service): Extension<Arc<AccountService>>,
    Extension(auth): Extension<AuthContext>,
    Path(id): Path<String>,
    payload: Result<Json<InviteInput>, JsonRejection>,
) -> Result<Response, ApiError> {
    let business_id = parse_business_id(&id)?;
    let invitation = service
        .invite_user(auth.user_id(), business_id, dto::body(payload)?)
        .await?;
    // The hash only travels in the invitation link.
    Ok(json_ok(
        StatusCode::CREATED,
        "Invitation sent",
        json!({
            "id": invitation.id,
            "business_id": invitation.business_id,
            "email": invitation.email,
            "expires_at": invitation.expires_at,
        }),
    ))
}
