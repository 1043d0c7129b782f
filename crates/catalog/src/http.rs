//! Axum surface of the catalog service.
//!
//! - `GET  /health`
//! - `GET  /product-categories?page=&limit=`
//! - `POST /product-categories`
//! - `PUT  /product-categories/:id`
//!
//! Responses use the shared `{message, data, error}` envelope.

use std::sync::Arc;

use axum::{
    Extension, Json, Router,
    extract::{Path, Query, State, rejection::JsonRejection, rejection::QueryRejection},
    http::{HeaderMap, StatusCode, header::AUTHORIZATION},
    middleware::Next,
    response::{IntoResponse, Response},
    routing::{get, put},
};
use serde::Serialize;
use serde_json::json;
use tracing::{debug, error};

use khata_auth::TokenIssuer;
use khata_core::{Clock, FieldError, ProductCategoryId};

use crate::error::CategoryError;
use crate::model::{CategoryInput, PageQuery};
use crate::service::{Caller, CategoryService};

#[derive(Debug)]
pub enum HttpError {
    Category(CategoryError),
    /// Body or query could not be read as the expected shape.
    MalformedRequest(String),
}

impl From<CategoryError> for HttpError {
    fn from(value: CategoryError) -> Self {
        Self::Category(value)
    }
}

#[derive(Debug, Clone, Serialize)]
struct ErrorBody {
    code: &'static str,
    short: &'static str,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    fields: Option<Vec<FieldError>>,
}

impl HttpError {
    fn status(&self) -> StatusCode {
        match self {
            HttpError::Category(err) => {
                StatusCode::from_u16(err.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
            }
            HttpError::MalformedRequest(_) => StatusCode::BAD_REQUEST,
        }
    }

    fn body(&self) -> ErrorBody {
        match self {
            HttpError::Category(err) => ErrorBody {
                code: err.code(),
                short: err.short(),
                message: err.message().to_string(),
                fields: match err {
                    CategoryError::Validation(errors) => Some(errors.fields().to_vec()),
                    _ => None,
                },
            },
            HttpError::MalformedRequest(detail) => ErrorBody {
                code: "request_001",
                short: "request.malformed",
                message: detail.clone(),
                fields: None,
            },
        }
    }
}

impl IntoResponse for HttpError {
    fn into_response(self) -> Response {
        if let HttpError::Category(CategoryError::Internal(detail)) = &self {
            error!(detail = %detail, "request failed");
        }
        let status = self.status();
        let body = self.body();
        (
            status,
            Json(json!({
                "message": body.message,
                "data": null,
                "error": body,
            })),
        )
            .into_response()
    }
}

fn json_ok<T: Serialize>(status: StatusCode, message: &str, data: T) -> Response {
    (
        status,
        Json(json!({
            "message": message,
            "data": data,
            "error": null,
        })),
    )
        .into_response()
}

#[derive(Clone)]
pub struct AuthState {
    pub tokens: Arc<TokenIssuer>,
    pub service: Arc<CategoryService>,
}

/// Build the router around a category service and the token verifier.
pub fn build_app(service: Arc<CategoryService>, tokens: Arc<TokenIssuer>) -> Router {
    let auth_state = AuthState {
        tokens,
        service: service.clone(),
    };

    let protected = Router::new()
        .route("/product-categories", get(list).post(create))
        .route("/product-categories/:id", put(update))
        .layer(axum::middleware::from_fn_with_state(auth_state, auth_middleware));

    Router::new()
        .route("/health", get(health))
        .merge(protected)
        .layer(Extension(service))
}

async fn health() -> Response {
    json_ok(StatusCode::OK, "ok", json!({ "status": "ok" }))
}

/// Require a valid bearer token and attach the [`Caller`].
async fn auth_middleware(
    State(state): State<AuthState>,
    mut req: axum::http::Request<axum::body::Body>,
    next: Next,
) -> Response {
    let Some(token) = extract_bearer(req.headers()) else {
        return HttpError::from(CategoryError::Unauthenticated).into_response();
    };
    let claims = match state.tokens.verify(token, state.service.clock().now()) {
        Ok(claims) => claims,
        Err(err) => {
            debug!(error = %err, "rejected bearer token");
            return HttpError::from(CategoryError::Unauthenticated).into_response();
        }
    };
    req.extensions_mut().insert(Caller::from(&claims));
    next.run(req).await
}

fn extract_bearer(headers: &HeaderMap) -> Option<&str> {
    let token = headers
        .get(AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")?
        .trim();
    (!token.is_empty()).then_some(token)
}

fn body<T>(payload: Result<Json<T>, JsonRejection>) -> Result<T, HttpError> {
    payload
        .map(|Json(value)| value)
        .map_err(|rejection| HttpError::MalformedRequest(rejection.body_text()))
}

async fn list(
    Extension(service): Extension<Arc<CategoryService>>,
    Extension(caller): Extension<Caller>,
    query: Result<Query<PageQuery>, QueryRejection>,
) -> Result<Response, HttpError> {
    let Query(query) = query.map_err(|r| HttpError::MalformedRequest(r.body_text()))?;
    let categories = service.list(caller, query).await?;
    Ok(json_ok(StatusCode::OK, "Product categories", categories))
}

async fn create(
    Extension(service): Extension<Arc<CategoryService>>,
    Extension(caller): Extension<Caller>,
    payload: Result<Json<CategoryInput>, JsonRejection>,
) -> Result<Response, HttpError> {
    let category = service.create(caller, body(payload)?).await?;
    Ok(json_ok(StatusCode::CREATED, "Product category created", category))
}

async fn update(
    Extension(service): Extension<Arc<CategoryService>>,
    Extension(caller): Extension<Caller>,
    Path(id): Path<String>,
    payload: Result<Json<CategoryInput>, JsonRejection>,
) -> Result<Response, HttpError> {
    let id: ProductCategoryId = id
        .parse()
        .map_err(|_| HttpError::from(CategoryError::InvalidCategoryId))?;
    let category = service.update(caller, id, body(payload)?).await?;
    Ok(json_ok(StatusCode::OK, "Product category updated", category))
}
