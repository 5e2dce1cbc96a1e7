//! Prometheus metrics for the helpdesk server.
//!
//! The engine crates record through the `metrics` facade; this module
//! installs the Prometheus recorder behind it and serves the scrape
//! endpoint.

use axum::{Router, extract::State, routing::get};
use metrics::describe_counter;
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

/// Install the Prometheus recorder and describe every engine metric.
///
/// # Errors
///
/// Fails if a global recorder is already installed.
pub fn install_recorder() -> anyhow::Result<PrometheusHandle> {
    let handle = PrometheusBuilder::new()
        .install_recorder()
        .map_err(|e| anyhow::anyhow!("Failed to install metrics recorder: {e}"))?;
    register_metrics();
    Ok(handle)
}

/// Router exposing `GET /metrics` in the Prometheus text format.
pub fn metrics_router(handle: PrometheusHandle) -> Router {
    Router::new()
        .route("/metrics", get(render))
        .with_state(handle)
}

async fn render(State(handle): State<PrometheusHandle>) -> String {
    handle.render()
}

/// Register all metric descriptions.
fn register_metrics() {
    // Tickets
    describe_counter!("tickets.created", "Tickets opened");
    describe_counter!(
        "tickets.stale_updates",
        "Mutations rejected because the ticket changed underneath them"
    );
    describe_counter!("audit.entries", "Timeline entries written, by action");

    // Idempotency
    describe_counter!(
        "idempotency.replays",
        "Requests answered from a stored idempotent response"
    );
    describe_counter!(
        "idempotency.lost_races",
        "Idempotency reservations that lapsed before their response was stored"
    );
    describe_counter!(
        "idempotency.store_failures",
        "Idempotent responses that could not be persisted"
    );
    describe_counter!(
        "idempotency.in_progress",
        "Requests refused because their key was held by a request in flight"
    );
    describe_counter!("idempotency.purged", "Expired idempotency records deleted");

    // Admission and storage
    describe_counter!("rate_limit.rejected", "Requests rejected by the rate limiter");
    describe_counter!(
        "storage.timeouts",
        "Storage calls abandoned after the configured timeout, by operation"
    );
}
