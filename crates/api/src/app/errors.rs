//! Consistent JSON responses: `{message, data, error}`.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use serde_json::json;
use tracing::error;

use khata_auth::AccountError;
use khata_core::FieldError;

/// Error body: `{code, short, message, fields?}`.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorBody {
    pub code: &'static str,
    pub short: &'static str,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fields: Option<Vec<FieldError>>,
}

#[derive(Debug)]
pub enum ApiError {
    Account(AccountError),
    /// Body could not be read as the expected JSON.
    MalformedBody(String),
}

impl From<AccountError> for ApiError {
    fn from(value: AccountError) -> Self {
        Self::Account(value)
    }
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Account(err) => {
                StatusCode::from_u16(err.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
            }
            ApiError::MalformedBody(_) => StatusCode::BAD_REQUEST,
        }
    }

    pub fn body(&self) -> ErrorBody {
        match self {
            ApiError::Account(err) => ErrorBody {
                code: err.code(),
                short: err.short(),
                message: err.message().to_string(),
                fields: match err {
                    AccountError::Validation(errors) => Some(errors.fields().to_vec()),
                    _ => None,
                },
            },
            ApiError::MalformedBody(detail) => ErrorBody {
                code: "request_001",
                short: "request.malformed",
                message: detail.clone(),
                fields: None,
            },
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if let ApiError::Account(AccountError::Internal(detail)) = &self {
            error!(detail = %detail, "request failed");
        }
        let status = self.status();
        let body = self.body();
        (
            status,
            axum::Json(json!({
                "message": body.message,
                "data": null,
                "error": body,
            })),
        )
            .into_response()
    }
}

/// Success envelope.
pub fn json_ok<T: Serialize>(status: StatusCode, message: &str, data: T) -> Response {
    (
        status,
        axum::Json(json!({
            "message": message,
            "data": data,
            "error": null,
        })),
    )
        .into_response()
}
