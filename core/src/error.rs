//! Error taxonomy for the ticket engine.

use crate::types::TicketId;
use std::time::Duration;
use thiserror::Error;

/// Result type alias for engine operations.
pub type Result<T> = std::result::Result<T, HelpdeskError>;

/// Every way a ticket engine operation can fail.
///
/// Each variant maps to one stable error code (see [`HelpdeskError::code`])
/// that the HTTP layer exposes in its error envelope.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum HelpdeskError {
    /// Malformed or unacceptable input.
    #[error("Validation failed: {0}")]
    Validation(String),

    /// No authenticated identity, or one the directory does not know.
    #[error("Authentication required")]
    Unauthenticated,

    /// The caller's role or ownership does not permit the action.
    #[error("Forbidden: {0}")]
    Forbidden(String),

    /// A referenced entity does not exist (or is hidden from the caller).
    #[error("{resource} {id} not found")]
    NotFound {
        /// Kind of entity, e.g. "Ticket"
        resource: &'static str,
        /// Identifier that was looked up
        id: String,
    },

    /// The client's version token no longer matches the stored ticket.
    #[error("Stale update: ticket {ticket_id} is at version {current_version}")]
    StaleUpdate {
        /// Ticket that was being updated
        ticket_id: TicketId,
        /// Version currently stored
        current_version: u64,
    },

    /// Another request with the same idempotency key is still running.
    #[error("A request with idempotency key {key} is already in progress")]
    IdempotencyInProgress {
        /// The contested key
        key: String,
    },

    /// The caller exceeded the request rate limit.
    #[error("Too many requests, retry after {retry_after:?}")]
    RateLimited {
        /// How long until a slot frees up
        retry_after: Duration,
    },

    /// A storage call did not finish in time. Safe to retry.
    #[error("Storage operation timed out after {0:?}")]
    Timeout(Duration),

    /// The storage backend failed.
    #[error("Storage failure: {0}")]
    Storage(String),
}

impl HelpdeskError {
    /// Create a validation error.
    #[must_use]
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    /// Create a forbidden error.
    #[must_use]
    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::Forbidden(message.into())
    }

    /// Create a not-found error.
    #[must_use]
    pub fn not_found(resource: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            resource,
            id: id.to_string(),
        }
    }

    /// Create a storage error with context.
    #[must_use]
    pub fn storage(context: &str, err: impl std::fmt::Display) -> Self {
        Self::Storage(format!("{context}: {err}"))
    }

    /// Stable machine-readable code for this error.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::Validation(_) => "VALIDATION_ERROR",
            Self::Unauthenticated => "UNAUTHORIZED",
            Self::Forbidden(_) => "FORBIDDEN",
            Self::NotFound { .. } => "NOT_FOUND",
            Self::StaleUpdate { .. } => "STALE_UPDATE",
            Self::IdempotencyInProgress { .. } => "IDEMPOTENCY_IN_PROGRESS",
            Self::RateLimited { .. } => "RATE_LIMIT",
            Self::Timeout(_) => "TIMEOUT",
            Self::Storage(_) => "STORAGE_FAILURE",
        }
    }

    /// Whether repeating the identical request later may succeed.
    ///
    /// A stale update is not retryable as-is: the client has to re-read the
    /// ticket and resubmit with a fresh token.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::IdempotencyInProgress { .. } | Self::RateLimited { .. } | Self::Timeout(_)
        )
    }
}
