use axum::http::StatusCode;
use axum::response::Response;
use serde_json::json;

use crate::app::errors::json_ok;

pub async fn health() -> Response {
    json_ok(StatusCode::OK, "ok", json!({ "status": "up" }))
}
