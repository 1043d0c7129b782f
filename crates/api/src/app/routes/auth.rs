use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Extension, rejection::JsonRejection},
    http::{HeaderMap, StatusCode},
    response::Response,
    routing::post,
};
use serde_json::json;

use khata_auth::{
    AccountService, ChangePasswordInput, LoginInput, Profile, RegisterInput, ResetPasswordInput,
    VerifyInput,
};

use crate::app::dto::{self, EmailRequest};
use crate::app::errors::{ApiError, json_ok};
use crate::context::AuthContext;

/// Public account endpoints.
pub fn router() -> Router {
    Router::new()
        .route("/auth/register", post(register))
        .route("/auth/login", post(login))
        .route("/auth/verify/email", post(verify_email))
        .route("/auth/verify/phone", post(verify_phone))
        .route("/auth/verify/email/send", post(send_email_verification))
        .route("/auth/verify/phone/send", post(send_phone_verification))
        .route("/auth/password/forgot", post(forgot_password))
        .route("/auth/password/reset", post(reset_password))
}

/// Account endpoints behind the auth middleware.
pub fn protected_router() -> Router {
    Router::new().route("/auth/password/change", post(change_password))
}

pub async fn register(
    Extension(service): Extension<Arc<AccountService>>,
    payload: Result<Json<RegisterInput>, JsonRejection>,
) -> Result<Response, ApiError> {
    let user = service.register(dto::body(payload)?).await?;
    Ok(json_ok(
        StatusCode::CREATED,
        "Registration successful, verify your email and phone",
        Profile::from(user),
    ))
}

pub async fn login(
    Extension(service): Extension<Arc<AccountService>>,
    headers: HeaderMap,
    payload: Result<Json<LoginInput>, JsonRejection>,
) -> Result<Response, ApiError> {
    let outcome = service
        .login(dto::body(payload)?, dto::client_info(&headers))
        .await?;
    Ok(json_ok(StatusCode::OK, "Login successful", outcome))
}

pub async fn verify_email(
    Extension(service): Extension<Arc<AccountService>>,
    payload: Result<Json<VerifyInput>, JsonRejection>,
) -> Result<Response, ApiError> {
    let user = service.verify_email(dto::body(payload)?).await?;
    Ok(json_ok(StatusCode::OK, "Email verified", Profile::from(user)))
}

pub async fn verify_phone(
    Extension(service): Extension<Arc<AccountService>>,
    payload: Result<Json<VerifyInput>, JsonRejection>,
) -> Result<Response, ApiError> {
    let user = service.verify_phone(dto::body(payload)?).await?;
    Ok(json_ok(StatusCode::OK, "Phone verified", Profile::from(user)))
}

pub async fn send_email_verification(
    Extension(service): Extension<Arc<AccountService>>,
    payload: Result<Json<EmailRequest>, JsonRejection>,
) -> Result<Response, ApiError> {
    let EmailRequest { email } = dto::body(payload)?;
    service.send_email_verification(&email).await?;
    Ok(json_ok(StatusCode::OK, "Verification code sent", json!({})))
}

pub async fn send_phone_verification(
    Extension(service): Extension<Arc<AccountService>>,
    payload: Result<Json<EmailRequest>, JsonRejection>,
) -> Result<Response, ApiError> {
    let EmailRequest { email } = dto::body(payload)?;
    service.send_phone_verification(&email).await?;
    Ok(json_ok(StatusCode::OK, "Verification code sent", json!({})))
}

pub async fn forgot_password(
    Extension(service): Extension<Arc<AccountService>>,
    payload: Result<Json<EmailRequest>, JsonRejection>,
) -> Result<Response, ApiError> {
    let EmailRequest { email } = dto::body(payload)?;
    service.forgot_password(&email).await?;
    Ok(json_ok(StatusCode::OK, "Password reset code sent", json!({})))
}

pub async fn reset_password(
    Extension(service): Extension<Arc<AccountService>>,
    payload: Result<Json<ResetPasswordInput>, JsonRejection>,
) -> Result<Response, ApiError> {
    service.reset_password(dto::body(payload)?).await?;
    Ok(json_ok(StatusCode::OK, "Password reset", json!({})))
}

pub async fn change_password(
    Extension(service): Extension<Arc<AccountService>>,
    Extension(auth): Extension<AuthContext>,
    payload: Result<Json<ChangePasswordInput>, JsonRejection>,
) -> Result<Response, ApiError> {
    service
        .change_password(auth.user_id(), dto::body(payload)?)
        .await?;
    Ok(json_ok(StatusCode::OK, "Password changed", json!({})))
}
