use axum::http::StatusCode;
use axum::response::Response;
use serde_json::json;

use crate::app::{dto, errors};

pub async fn health() -> Response {
    dto::ok(json!({ "status": "ok" }))
}

pub async fn not_found() -> Response {
    errors::json_error(StatusCode::NOT_FOUND, "not_found", "no such route")
}
