//! Engine tuning knobs.

use std::time::Duration;

/// Configuration for a [`TicketService`](crate::TicketService).
///
/// # Default Values
///
/// - `rate_limit_requests`: 60
/// - `rate_limit_window`: 60 seconds
/// - `idempotency_ttl`: 24 hours
/// - `storage_timeout`: 5 seconds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineConfig {
    /// Requests admitted per identity inside one window
    pub rate_limit_requests: u32,
    /// Length of the sliding window
    pub rate_limit_window: Duration,
    /// How long an idempotency record is honoured
    pub idempotency_ttl: Duration,
    /// Upper bound on any single storage call
    pub storage_timeout: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            rate_limit_requests: 60,
            rate_limit_window: Duration::from_secs(60),
            idempotency_ttl: Duration::from_secs(24 * 60 * 60),
            storage_timeout: Duration::from_secs(5),
        }
    }
}

impl EngineConfig {
    /// Set the per-window request limit.
    #[must_use]
    pub const fn with_rate_limit(mut self, requests: u32, window: Duration) -> Self {
        self.rate_limit_requests = requests;
        self.rate_limit_window = window;
        self
    }

    /// Set the idempotency record lifetime.
    #[must_use]
    pub const fn with_idempotency_ttl(mut self, ttl: Duration) -> Self {
        self.idempotency_ttl = ttl;
        self
    }

    /// Set the storage call timeout.
    #[must_use]
    pub const fn with_storage_timeout(mut self, timeout: Duration) -> Self {
        self.storage_timeout = timeout;
        self
    }
}
