//! Request middleware.
//!
//! - [`correlation_id_layer`] tags each request with a correlation ID, runs
//!   it inside an `http_request` span and echoes the ID in
//!   `X-Correlation-ID`
//! - [`identity_layer`] resolves the gateway's `X-User-Id` to an
//!   [`Identity`](helpdesk_core::Identity) and applies the rate limit
//!
//! # Example
//!
//! ```ignore
//! let api = Router::new()
//!     .route("/tickets", get(list_tickets))
//!     .route_layer(middleware::from_fn_with_state(state.clone(), identity_layer));
//!
//! let app = api.layer(correlation_id_layer());
//! ```

use crate::error::AppError;
use crate::state::AppState;
use axum::{
    extract::{Request, State},
    http::HeaderValue,
    middleware::Next,
    response::Response,
};
use helpdesk_core::UserId;
use helpdesk_core::store::Backend;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use tower::{Layer, Service};
use tracing::Instrument;
use uuid::Uuid;

/// Request and response header holding the correlation ID.
pub const CORRELATION_ID_HEADER: &str = "X-Correlation-ID";

/// Header carrying the authenticated user id, set by the upstream gateway.
pub const USER_ID_HEADER: &str = "X-User-Id";

/// Layer attaching a correlation ID to every request and response.
///
/// A valid UUID in the request's `X-Correlation-ID` is kept; anything else
/// is replaced by a fresh one. The ID is also stored in the request
/// extensions for [`CorrelationId`](crate::extractors::CorrelationId).
#[must_use]
pub const fn correlation_id_layer() -> CorrelationIdLayer {
    CorrelationIdLayer
}

/// See [`correlation_id_layer`].
#[derive(Clone, Debug)]
pub struct CorrelationIdLayer;

impl<S> Layer<S> for CorrelationIdLayer {
    type Service = CorrelationIdMiddleware<S>;

    fn layer(&self, inner: S) -> Self::Service {
        CorrelationIdMiddleware { inner }
    }
}

/// Service produced by [`CorrelationIdLayer`].
#[derive(Clone, Debug)]
pub struct CorrelationIdMiddleware<S> {
    inner: S,
}

fn incoming_correlation_id(req: &Request) -> Option<Uuid> {
    let raw = req.headers().get(CORRELATION_ID_HEADER)?.to_str().ok()?;
    Uuid::parse_str(raw.trim()).ok()
}

impl<S> Service<Request> for CorrelationIdMiddleware<S>
where
    S: Service<Request, Response = Response> + Send + 'static,
    S::Future: Send + 'static,
{
    type Response = Response;
    type Error = S::Error;
    type Future = Pin<Box<dyn Future<Output = Result<Response, S::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, mut req: Request) -> Self::Future {
        let correlation_id = incoming_correlation_id(&req).unwrap_or_else(Uuid::new_v4);
        req.extensions_mut().insert(correlation_id);

        // `user_id` is recorded by `identity_layer` once the caller is known.
        let span = tracing::info_span!(
            "http_request",
            correlation_id = %correlation_id,
            method = %req.method(),
            path = %req.uri().path(),
            user_id = tracing::field::Empty,
        );
        let header = HeaderValue::from_str(&correlation_id.to_string()).ok();
        let inner = self.inner.call(req);

        Box::pin(async move {
            let mut response = inner.instrument(span).await?;
            if let Some(header) = header {
                response.headers_mut().insert(CORRELATION_ID_HEADER, header);
            }
            Ok(response)
        })
    }
}

/// Resolve the caller and enforce the rate limit.
///
/// Requests without `X-User-Id` pass through unauthenticated and are not
/// rate limited; handlers that need an identity reject them through the
/// [`Caller`](crate::extractors::Caller) extractor. A malformed or unknown
/// id is rejected here with 401 and does not count against any window.
///
/// # Errors
///
/// - 401 `UNAUTHORIZED` for a malformed or unknown user id
/// - 429 `RATE_LIMIT` when the caller is over the limit
/// - storage errors from the directory or window store
pub async fn identity_layer<B: Backend>(
    State(state): State<AppState<B>>,
    mut request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let Some(raw) = request.headers().get(USER_ID_HEADER) else {
        return Ok(next.run(request).await);
    };

    let user_id = raw
        .to_str()
        .ok()
        .and_then(|s| Uuid::parse_str(s.trim()).ok())
        .map(UserId::from_uuid)
        .ok_or_else(|| AppError::unauthorized("Malformed X-User-Id header"))?;

    let identity = state.service.identify(user_id).await?;
    tracing::Span::current().record("user_id", tracing::field::display(user_id));

    state
        .service
        .rate_limiter()
        .check(Some(user_id), state.service.now())
        .await?;

    request.extensions_mut().insert(identity);
    Ok(next.run(request).await)
}
