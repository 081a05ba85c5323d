use std::time::Instant;

use axum::{extract::Request, middleware::Next, response::Response};
use tracing::{info, warn};

/// Log method, path, status and latency of every request.
pub async fn log_requests(req: Request, next: Next) -> Response {
    let method = req.method().clone();
    let path = req.uri().path().to_owned();
    let started = Instant::now();

    let res = next.run(req).await;

    let status = res.status().as_u16();
    let latency_ms = started.elapsed().as_millis() as u64;
    if res.status().is_server_error() {
        warn!(%method, %path, status, latency_ms, "request failed");
    } else {
        info!(%method, %path, status, latency_ms, "request");
    }
    res
}
