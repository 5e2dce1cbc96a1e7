//! Axum HTTP surface for the helpdesk ticket engine.
//!
//! # Request Flow
//!
//! 1. **Correlation layer** tags the request and opens its tracing span
//! 2. **Identity layer** resolves `X-User-Id` and applies the rate limit
//! 3. **Extractors** pull the caller, `Idempotency-Key` and body
//! 4. **Handler** calls the [`TicketService`](helpdesk_engine::TicketService)
//! 5. **Errors** become the `{"error": {"code", "message"}}` envelope
//!
//! # Example
//!
//! ```ignore
//! use helpdesk_web::{build_router, AppState};
//!
//! let app = build_router(AppState::new(service));
//! let listener = tokio::net::TcpListener::bind("0.0.0.0:8080").await?;
//! axum::serve(listener, app).await?;
//! ```

#![allow(clippy::module_name_repetitions)]

pub mod error;
pub mod extractors;
pub mod handlers;
pub mod middleware;
pub mod router;
pub mod state;

// Re-export key types for convenience
pub use error::AppError;
pub use extractors::{Caller, CorrelationId, IDEMPOTENCY_KEY_HEADER, IdempotencyKeyHeader};
pub use middleware::{CORRELATION_ID_HEADER, USER_ID_HEADER, correlation_id_layer};
pub use router::build_router;
pub use state::AppState;

/// Result type alias for web handlers.
pub type WebResult<T> = Result<T, AppError>;
