//! SLA policy: how long a ticket may stay unresolved.
//!
//! [`deadline`] is evaluated exactly once, when a ticket is created, and the
//! result is frozen on the ticket. [`remaining`] is a derived view over that
//! frozen deadline and keeps no state.

use crate::types::Priority;
use chrono::{DateTime, Duration, Utc};
use std::fmt;

/// Resolution window granted to a priority.
#[must_use]
pub fn window(priority: Priority) -> Duration {
    match priority {
        Priority::High => Duration::hours(24),
        Priority::Medium => Duration::hours(48),
        Priority::Low => Duration::hours(72),
    }
}

/// Deadline for a ticket of `priority` opened at `now`.
#[must_use]
pub fn deadline(priority: Priority, now: DateTime<Utc>) -> DateTime<Utc> {
    now + window(priority)
}

/// Whether a deadline has passed at `now`.
#[must_use]
pub fn is_breached(deadline: DateTime<Utc>, now: DateTime<Utc>) -> bool {
    deadline < now
}

/// Time left before a deadline.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SlaRemaining {
    /// Deadline still ahead
    Remaining {
        /// Whole hours left
        hours: i64,
        /// Minutes left past the whole hours
        minutes: i64,
    },
    /// Deadline has passed
    Breached,
}

impl fmt::Display for SlaRemaining {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Remaining { hours, minutes } => write!(f, "{hours}h {minutes}m"),
            Self::Breached => f.write_str("Breached"),
        }
    }
}

/// Time left until `deadline` as seen at `now`.
#[must_use]
pub fn remaining(deadline: DateTime<Utc>, now: DateTime<Utc>) -> SlaRemaining {
    if is_breached(deadline, now) {
        return SlaRemaining::Breached;
    }
    let left = deadline - now;
    SlaRemaining::Remaining {
        hours: left.num_hours(),
        minutes: left.num_minutes() % 60,
    }
}
