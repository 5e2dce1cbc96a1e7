//! Liveness probe.

use axum::http::StatusCode;

/// `GET /health`: 200 while the process is serving.
///
/// Skips identity and the rate limiter, and touches no storage, so a slow
/// database never fails the probe.
#[allow(clippy::unused_async)]
pub async fn health_check() -> (StatusCode, &'static str) {
    (StatusCode::OK, "ok")
}
