//! Router configuration.

use crate::handlers::{health_check, tickets, users};
use crate::middleware::{correlation_id_layer, identity_layer};
use crate::state::AppState;
use axum::{
    Router, middleware,
    routing::{get, patch},
};
use helpdesk_core::store::Backend;
use tower_http::trace::TraceLayer;

/// Build the complete Axum router.
///
/// - `/health`: liveness, no identity, no rate limit
/// - everything else: identity resolution and rate limiting first, then
///   the handler
///
/// Every response carries `X-Correlation-ID`.
pub fn build_router<B: Backend>(state: AppState<B>) -> Router {
    let api_routes = Router::new()
        .route(
            "/tickets",
            get(tickets::list_tickets::<B>).post(tickets::create_ticket::<B>),
        )
        .route("/tickets/breached", get(tickets::list_breached::<B>))
        .route(
            "/tickets/:id",
            get(tickets::get_ticket::<B>)
                .patch(tickets::update_ticket::<B>)
                .put(tickets::update_ticket::<B>),
        )
        .route(
            "/tickets/:id/comments",
            get(tickets::list_comments::<B>).post(tickets::add_comment::<B>),
        )
        .route("/tickets/:id/timeline", get(tickets::timeline::<B>))
        .route("/tickets/:id/assign", patch(tickets::assign_ticket::<B>))
        .route("/users/agents", get(users::list_agents::<B>))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            identity_layer::<B>,
        ));

    Router::new()
        // Health checks (no authentication)
        .route("/health", get(health_check))
        .merge(api_routes)
        .layer(correlation_id_layer())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
