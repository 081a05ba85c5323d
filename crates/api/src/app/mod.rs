//! HTTP API application wiring (Axum router + service wiring).
//!
//! - `services.rs`: runs ledger and order operations off the async workers
//! - `routes/`: HTTP routes + handlers (one file per resource)
//! - `dto.rs`: request/query DTOs, pagination and the response envelope
//! - `errors.rs`: the one place errors become HTTP responses

use std::sync::Arc;

use axum::{routing::get, Extension, Router};
use tower::ServiceBuilder;

use crate::middleware;

pub mod dto;
pub mod errors;
pub mod routes;
pub mod services;

use services::AppServices;

/// Build the full HTTP router (public entrypoint used by `main.rs` and the tests).
pub fn build_app(services: AppServices) -> Router {
    Router::new()
        .route("/health", get(routes::system::health))
        .nest("/inventory", routes::router())
        .fallback(routes::system::not_found)
        .layer(
            ServiceBuilder::new()
                .layer(axum::middleware::from_fn(middleware::log_requests))
                .layer(Extension(Arc::new(services))),
        )
}
