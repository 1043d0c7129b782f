//! Request DTOs not covered by the account service's own inputs.

use axum::Json;
use axum::extract::rejection::JsonRejection;
use axum::http::HeaderMap;
use serde::Deserialize;

use khata_auth::ClientInfo;

use super::errors::ApiError;

#[derive(Debug, Clone, Deserialize)]
pub struct EmailRequest {
    pub email: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AvatarRequest {
    #[serde(default)]
    pub avatar: Option<String>,
}

/// Unwrap a JSON body, turning extractor rejections into the error envelope.
pub fn body<T>(payload: Result<Json<T>, JsonRejection>) -> Result<T, ApiError> {
    payload
        .map(|Json(value)| value)
        .map_err(|rejection| ApiError::MalformedBody(rejection.body_text()))
}

/// Caller address and agent as seen through the proxy headers.
pub fn client_info(headers: &HeaderMap) -> ClientInfo {
    let header = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
    };
    let ip = header("x-forwarded-for")
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .or_else(|| header("x-real-ip"))
        .unwrap_or("unknown");

    ClientInfo {
        ip: ip.to_string(),
        user_agent: header("user-agent").unwrap_or("unknown").to_string(),
    }
}
