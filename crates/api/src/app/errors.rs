use axum::extract::rejection::{JsonRejection, PathRejection, QueryRejection};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::{Value as JsonValue, json};

use taller_core::DomainError;
use taller_infra::command_dispatcher::DispatchError;

/// Error side of every handler; rendered as `{ success: false, error, message, details? }`.
#[derive(Debug)]
pub enum ApiError {
    Dispatch(DispatchError),
    /// Malformed body, query or path.
    BadRequest(String),
    /// The blocking worker running the operation died.
    Internal(String),
}

impl From<DispatchError> for ApiError {
    fn from(value: DispatchError) -> Self {
        ApiError::Dispatch(value)
    }
}

impl From<DomainError> for ApiError {
    fn from(value: DomainError) -> Self {
        ApiError::Dispatch(value.into())
    }
}

impl From<JsonRejection> for ApiError {
    fn from(value: JsonRejection) -> Self {
        ApiError::BadRequest(value.body_text())
    }
}

impl From<QueryRejection> for ApiError {
    fn from(value: QueryRejection) -> Self {
        ApiError::BadRequest(value.body_text())
    }
}

impl From<PathRejection> for ApiError {
    fn from(value: PathRejection) -> Self {
        ApiError::BadRequest(value.body_text())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::Dispatch(e) => dispatch_error_to_response(e),
            ApiError::BadRequest(msg) => json_error(StatusCode::BAD_REQUEST, "validation_error", msg),
            ApiError::Internal(msg) => {
                json_error(StatusCode::INTERNAL_SERVER_ERROR, "internal_error", msg)
            }
        }
    }
}

pub fn dispatch_error_to_response(err: DispatchError) -> Response {
    let message = err.to_string();
    match err {
        DispatchError::Validation(_) => {
            json_error(StatusCode::BAD_REQUEST, "validation_error", message)
        }
        DispatchError::InsufficientStock {
            item,
            warehouse,
            requested,
            available,
        } => error_body(
            StatusCode::UNPROCESSABLE_ENTITY,
            "insufficient_stock",
            message,
            Some(json!({
                "item": item,
                "warehouse": warehouse,
                "requested": requested,
                "available": available,
            })),
        ),
        DispatchError::InvalidTransition(_) => {
            json_error(StatusCode::CONFLICT, "invalid_transition", message)
        }
        DispatchError::NotFound(_) => json_error(StatusCode::NOT_FOUND, "not_found", message),
        DispatchError::Conflict(_) => json_error(StatusCode::CONFLICT, "conflict", message),
        DispatchError::Concurrency(_) => {
            json_error(StatusCode::CONFLICT, "concurrency_conflict", message)
        }
        DispatchError::LockTimeout(_) => {
            json_error(StatusCode::SERVICE_UNAVAILABLE, "lock_timeout", message)
        }
        DispatchError::InvariantViolation(_) => {
            json_error(StatusCode::UNPROCESSABLE_ENTITY, "invariant_violation", message)
        }
        DispatchError::Deserialize(_) => {
            json_error(StatusCode::INTERNAL_SERVER_ERROR, "deserialize_error", message)
        }
        DispatchError::Projection(_) => {
            json_error(StatusCode::INTERNAL_SERVER_ERROR, "projection_error", message)
        }
        DispatchError::Store(_) => {
            json_error(StatusCode::INTERNAL_SERVER_ERROR, "store_error", message)
        }
    }
}

pub fn json_error(status: StatusCode, code: &'static str, message: impl Into<String>) -> Response {
    error_body(status, code, message.into(), None)
}

fn error_body(
    status: StatusCode,
    code: &'static str,
    message: String,
    details: Option<JsonValue>,
) -> Response {
    let mut body = json!({
        "success": false,
        "error": code,
        "message": message,
    });
    if let (Some(details), Some(obj)) = (details, body.as_object_mut()) {
        obj.insert("details".to_string(), details);
    }
    (status, axum::Json(body)).into_response()
}
