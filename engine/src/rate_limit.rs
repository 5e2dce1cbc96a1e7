//! Per-identity request throttling.
//!
//! Sliding window over the last [`EngineConfig::rate_limit_window`]
//! (default 60 requests per 60 seconds). The whole prune, count and record
//! step runs atomically inside the [`RateWindowStore`]. Callers without an
//! identity are not throttled.
//!
//! [`EngineConfig::rate_limit_window`]: crate::EngineConfig::rate_limit_window

use crate::timeout::StorageGuard;
use chrono::{DateTime, Utc};
use helpdesk_core::error::{HelpdeskError, Result};
use helpdesk_core::store::RateWindowStore;
use helpdesk_core::UserId;
use std::time::Duration;

/// Result of an admission check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// Go ahead
    Allowed,
    /// Over the limit
    Rejected {
        /// Time until the oldest request in the window ages out
        retry_after: Duration,
    },
}

/// Sliding-window rate limiter.
#[derive(Debug, Clone)]
pub struct RateLimiter<W> {
    store: W,
    limit: u32,
    window: Duration,
    guard: StorageGuard,
}

impl<W: RateWindowStore> RateLimiter<W> {
    /// Allow `limit` requests per `window` for each identity.
    #[must_use]
    pub const fn new(store: W, limit: u32, window: Duration, guard: StorageGuard) -> Self {
        Self {
            store,
            limit,
            window,
            guard,
        }
    }

    /// Window key for a user.
    #[must_use]
    pub fn key(user_id: UserId) -> String {
        format!("rate:{user_id}")
    }

    /// Run one admission attempt for `user_id` at `now`.
    ///
    /// # Errors
    ///
    /// Returns [`HelpdeskError::Storage`] or [`HelpdeskError::Timeout`] if
    /// the window store fails.
    pub async fn admit(&self, user_id: Option<UserId>, now: DateTime<Utc>) -> Result<Admission> {
        let Some(user_id) = user_id else {
            return Ok(Admission::Allowed);
        };
        let key = Self::key(user_id);
        let decision = self
            .guard
            .run(
                "rate_window_admit",
                self.store.admit(&key, now, self.window, self.limit),
            )
            .await?;

        if decision.admitted {
            return Ok(Admission::Allowed);
        }

        let retry_after = decision.retry_after(now, self.window);
        tracing::warn!(
            user_id = %user_id,
            count = decision.count,
            limit = self.limit,
            retry_after_ms = u64::try_from(retry_after.as_millis()).unwrap_or(u64::MAX),
            "Rate limit exceeded"
        );
        metrics::counter!("rate_limit.rejected").increment(1);
        Ok(Admission::Rejected { retry_after })
    }

    /// Like [`admit`](Self::admit), turning a rejection into an error.
    ///
    /// # Errors
    ///
    /// Returns [`HelpdeskError::RateLimited`] when over the limit, or a
    /// storage error from the window store.
    pub async fn check(&self, user_id: Option<UserId>, now: DateTime<Utc>) -> Result<()> {
        match self.admit(user_id, now).await? {
            Admission::Allowed => Ok(()),
            Admission::Rejected { retry_after } => Err(HelpdeskError::RateLimited { retry_after }),
        }
    }
}
