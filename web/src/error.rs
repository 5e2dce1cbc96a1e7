//! Error types for web handlers.
//!
//! [`AppError`] bridges [`HelpdeskError`] and HTTP responses. Every error is
//! rendered as the same envelope:
//!
//! ```json
//! { "error": { "code": "STALE_UPDATE", "message": "..." } }
//! ```

use axum::{
    Json,
    extract::rejection::{JsonRejection, PathRejection, QueryRejection},
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use helpdesk_core::HelpdeskError;
use serde::Serialize;
use std::fmt;
use std::time::Duration;

/// Application error type for web handlers.
///
/// Server errors keep their internal cause in `source` for logging; the
/// client only ever sees `code` and `message`.
#[derive(Debug)]
pub struct AppError {
    /// HTTP status code
    status: StatusCode,
    /// Error message (user-facing)
    message: String,
    /// Error code (for client error handling)
    code: String,
    /// Sent as `Retry-After` when set
    retry_after: Option<Duration>,
    /// Internal error (for logging, not exposed to client)
    source: Option<anyhow::Error>,
}

impl AppError {
    /// Create a new application error.
    #[must_use]
    pub fn new(status: StatusCode, code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
            code: code.into(),
            retry_after: None,
            source: None,
        }
    }

    /// Attach the internal cause.
    #[must_use]
    pub fn with_source(mut self, source: anyhow::Error) -> Self {
        self.source = Some(source);
        self
    }

    /// Ask the client to wait before retrying.
    #[must_use]
    pub const fn with_retry_after(mut self, retry_after: Duration) -> Self {
        self.retry_after = Some(retry_after);
        self
    }

    /// Create a 400 `VALIDATION_ERROR`.
    #[must_use]
    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "VALIDATION_ERROR", message)
    }

    /// Create a 401 `UNAUTHORIZED`.
    #[must_use]
    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, "UNAUTHORIZED", message)
    }

    /// HTTP status of the response.
    #[must_use]
    pub const fn status(&self) -> StatusCode {
        self.status
    }

    /// Machine-readable error code.
    #[must_use]
    pub fn code(&self) -> &str {
        &self.code
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)
    }
}

impl std::error::Error for AppError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_ref()
            .map(|e| e.as_ref() as &(dyn std::error::Error + 'static))
    }
}

impl From<HelpdeskError> for AppError {
    fn from(err: HelpdeskError) -> Self {
        let code = err.code();
        match &err {
            HelpdeskError::Validation(message) => {
                Self::new(StatusCode::BAD_REQUEST, code, message.clone())
            }
            HelpdeskError::Unauthenticated => Self::unauthorized(err.to_string()),
            HelpdeskError::Forbidden(message) => {
                Self::new(StatusCode::FORBIDDEN, code, message.clone())
            }
            HelpdeskError::NotFound { .. } => {
                Self::new(StatusCode::NOT_FOUND, code, err.to_string())
            }
            HelpdeskError::StaleUpdate { .. } => Self::new(
                StatusCode::CONFLICT,
                code,
                "Ticket was modified by someone else; reload it and retry",
            ),
            HelpdeskError::IdempotencyInProgress { .. } => {
                Self::new(StatusCode::CONFLICT, code, err.to_string())
                    .with_retry_after(Duration::from_secs(1))
            }
            HelpdeskError::RateLimited { retry_after } => {
                Self::new(StatusCode::TOO_MANY_REQUESTS, code, "Too many requests")
                    .with_retry_after(*retry_after)
            }
            HelpdeskError::Timeout(_) => Self::new(
                StatusCode::SERVICE_UNAVAILABLE,
                code,
                "Storage is not responding, retry later",
            )
            .with_source(anyhow::Error::new(err)),
            HelpdeskError::Storage(_) => Self::new(
                StatusCode::INTERNAL_SERVER_ERROR,
                code,
                "An internal error occurred",
            )
            .with_source(anyhow::Error::new(err)),
        }
    }
}

impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        Self::validation(rejection.body_text())
    }
}

impl From<PathRejection> for AppError {
    fn from(rejection: PathRejection) -> Self {
        Self::validation(rejection.body_text())
    }
}

impl From<QueryRejection> for AppError {
    fn from(rejection: QueryRejection) -> Self {
        Self::validation(rejection.body_text())
    }
}

/// Error envelope (JSON).
#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: ErrorBody,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    /// Error code (for client error handling).
    code: String,
    /// Human-readable error message.
    message: String,
}

/// Whole seconds, rounded up so clients never retry early.
fn retry_after_secs(retry_after: Duration) -> u64 {
    let secs = retry_after.as_secs();
    if retry_after.subsec_nanos() > 0 {
        secs + 1
    } else {
        secs.max(1)
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        // Log internal errors
        if self.status.is_server_error() {
            if let Some(source) = &self.source {
                tracing::error!(
                    status = %self.status,
                    code = %self.code,
                    message = %self.message,
                    error = %source,
                    "Internal server error"
                );
            } else {
                tracing::error!(
                    status = %self.status,
                    code = %self.code,
                    message = %self.message,
                    "Internal server error"
                );
            }
        }

        let body = ErrorResponse {
            error: ErrorBody {
                code: self.code,
                message: self.message,
            },
        };

        let mut response = (self.status, Json(body)).into_response();
        if let Some(retry_after) = self.retry_after {
            response.headers_mut().insert(
                header::RETRY_AFTER,
                HeaderValue::from(retry_after_secs(retry_after)),
            );
        }
        response
    }
}
