//! # Helpdesk Testing
//!
//! Testing utilities for the helpdesk ticket engine.
//!
//! This crate provides:
//! - Deterministic clocks ([`FixedClock`], [`ManualClock`])
//! - In-memory implementations of every store trait, with fault injection
//! - A ready-made cast of users and an in-memory backend
//! - proptest strategies for domain types
//!
//! ## Example
//!
//! ```ignore
//! use helpdesk_testing::{fixtures::TestUsers, test_clock};
//!
//! #[tokio::test]
//! async fn opens_a_ticket() {
//!     let users = TestUsers::new();
//!     let backend = users.backend();
//!     let service = TicketService::new(backend, Arc::new(test_clock()), EngineConfig::default());
//!     let ticket = service.create(&users.user.identity(), new_ticket).await.unwrap();
//!     assert_eq!(ticket.version, 1);
//! }
//! ```

use chrono::{DateTime, Utc};
use helpdesk_core::environment::Clock;

pub mod fixtures;
pub mod stores;

/// Mock implementations of environment traits.
pub mod mocks {
    use super::{Clock, DateTime, Utc};
    use std::sync::{Arc, Mutex, PoisonError};

    /// Fixed clock for deterministic tests
    ///
    /// Always returns the same time, making tests reproducible.
    ///
    /// # Example
    ///
    /// ```
    /// use helpdesk_testing::mocks::FixedClock;
    /// use helpdesk_core::environment::Clock;
    /// use chrono::Utc;
    ///
    /// let clock = FixedClock::new(Utc::now());
    /// assert_eq!(clock.now(), clock.now());
    /// ```
    #[derive(Debug, Clone)]
    pub struct FixedClock {
        time: DateTime<Utc>,
    }

    impl FixedClock {
        /// Create a new fixed clock with the given time
        #[must_use]
        pub const fn new(time: DateTime<Utc>) -> Self {
            Self { time }
        }
    }

    impl Clock for FixedClock {
        fn now(&self) -> DateTime<Utc> {
            self.time
        }
    }

    /// Create a default fixed clock for tests (2025-01-01 00:00:00 UTC)
    #[must_use]
    pub fn test_clock() -> FixedClock {
        FixedClock::new(DateTime::<Utc>::from_timestamp(1_735_689_600, 0).unwrap_or_default())
    }

    /// Clock that only moves when told to.
    ///
    /// Clones share the same time, so a test can hand one clone to the
    /// service and keep another to advance it.
    #[derive(Debug, Clone)]
    pub struct ManualClock {
        time: Arc<Mutex<DateTime<Utc>>>,
    }

    impl ManualClock {
        /// Start at `time`.
        #[must_use]
        pub fn new(time: DateTime<Utc>) -> Self {
            Self {
                time: Arc::new(Mutex::new(time)),
            }
        }

        /// Start at 2025-01-01 00:00:00 UTC.
        #[must_use]
        pub fn at_test_epoch() -> Self {
            Self::new(test_clock().now())
        }

        /// Move the clock forward (or back, for a negative delta).
        pub fn advance(&self, delta: chrono::Duration) {
            let mut time = self.time.lock().unwrap_or_else(PoisonError::into_inner);
            *time += delta;
        }

        /// Jump to `time`.
        pub fn set(&self, time: DateTime<Utc>) {
            *self.time.lock().unwrap_or_else(PoisonError::into_inner) = time;
        }
    }

    impl Clock for ManualClock {
        fn now(&self) -> DateTime<Utc> {
            *self.time.lock().unwrap_or_else(PoisonError::into_inner)
        }
    }
}

/// Property-based testing utilities using proptest.
pub mod properties {
    use helpdesk_core::{NewTicket, Priority, Status, TicketPatch};
    use proptest::prelude::*;

    /// Any priority.
    pub fn arb_priority() -> impl Strategy<Value = Priority> {
        prop_oneof![Just(Priority::Low), Just(Priority::Medium), Just(Priority::High)]
    }

    /// Any status.
    pub fn arb_status() -> impl Strategy<Value = Status> {
        prop_oneof![Just(Status::Open), Just(Status::InProgress), Just(Status::Closed)]
    }

    /// A valid ticket submission.
    pub fn arb_new_ticket() -> impl Strategy<Value = NewTicket> {
        ("[a-zA-Z][a-zA-Z0-9 ]{0,40}", "[a-zA-Z][a-zA-Z0-9 .]{0,80}", arb_priority()).prop_map(
            |(title, description, priority)| NewTicket {
                title,
                description,
                priority,
            },
        )
    }

    /// A valid, non-empty patch.
    pub fn arb_patch() -> impl Strategy<Value = TicketPatch> {
        (
            proptest::option::of("[a-zA-Z][a-zA-Z0-9 ]{0,40}"),
            proptest::option::of(arb_priority()),
            proptest::option::of(arb_status()),
        )
            .prop_map(|(title, priority, status)| TicketPatch {
                title,
                description: None,
                priority,
                status,
            })
            .prop_filter("patch must change something", |patch| !patch.is_empty())
    }
}

/// Install a test tracing subscriber once; later calls are no-ops.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_test_writer()
        .try_init();
}

// Re-export commonly used items
pub use fixtures::{InMemoryBackend, TestUsers};
pub use mocks::{FixedClock, ManualClock, test_clock};
pub use stores::{
    Faults, InMemoryIdempotencyStore, InMemoryRateWindowStore, InMemoryTicketStore,
    InMemoryUserDirectory,
};
