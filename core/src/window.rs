//! Sliding-window request counter.
//!
//! Each caller owns a list of admission timestamps. On every request the
//! entries older than the window are discarded, the rest are counted, and the
//! request is admitted only while the count is below the limit. Rejected
//! requests are not recorded.

use chrono::{DateTime, Utc};
use std::collections::VecDeque;
use std::time::Duration;

/// Outcome of one admission attempt.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct WindowDecision {
    /// Whether the request was admitted and recorded
    pub admitted: bool,
    /// Entries inside the window after the attempt
    pub count: u32,
    /// Oldest entry still inside the window
    pub oldest: Option<DateTime<Utc>>,
}

impl WindowDecision {
    /// How long until the oldest entry leaves the window.
    ///
    /// Zero for admitted requests.
    #[must_use]
    pub fn retry_after(&self, now: DateTime<Utc>, window: Duration) -> Duration {
        if self.admitted {
            return Duration::ZERO;
        }
        let Some(oldest) = self.oldest else {
            return Duration::ZERO;
        };
        let Ok(window) = chrono::Duration::from_std(window) else {
            return Duration::ZERO;
        };
        (oldest + window - now).to_std().unwrap_or(Duration::ZERO)
    }
}

/// Lower bound (exclusive) of the window ending at `now`.
///
/// Entries at or before the cutoff are expired.
#[must_use]
pub fn cutoff(now: DateTime<Utc>, window: Duration) -> Option<DateTime<Utc>> {
    chrono::Duration::from_std(window)
        .ok()
        .and_then(|w| now.checked_sub_signed(w))
}

/// One caller's window of admitted request timestamps.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RateWindow {
    entries: VecDeque<DateTime<Utc>>,
}

impl RateWindow {
    /// Create an empty window.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            entries: VecDeque::new(),
        }
    }

    /// Number of recorded entries, expired or not.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether nothing is recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drop expired entries, then admit and record the request if fewer than
    /// `limit` entries remain.
    pub fn admit(&mut self, now: DateTime<Utc>, window: Duration, limit: u32) -> WindowDecision {
        if let Some(cutoff) = cutoff(now, window) {
            while self.entries.front().is_some_and(|t| *t <= cutoff) {
                self.entries.pop_front();
            }
        }

        let count = u32::try_from(self.entries.len()).unwrap_or(u32::MAX);
        let admitted = count < limit;
        if admitted {
            self.entries.push_back(now);
        }

        WindowDecision {
            admitted,
            count: if admitted { count + 1 } else { count },
            oldest: self.entries.front().copied(),
        }
    }
}
