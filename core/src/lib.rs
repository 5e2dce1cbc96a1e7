//! # Helpdesk Core
//!
//! Domain types, pure policies and storage traits for the helpdesk ticket
//! engine.
//!
//! ## Contents
//!
//! - [`types`]: tickets, comments, users, timeline entries, idempotency records
//! - [`sla`]: priority-driven deadlines and the remaining-time view
//! - [`access`]: who may see and mutate which ticket
//! - [`window`]: the sliding-window request counter
//! - [`store`]: the traits storage backends implement
//! - [`environment`]: injected dependencies such as the clock
//!
//! Nothing in this crate performs I/O. The orchestration lives in
//! `helpdesk-engine`.

pub mod access;
pub mod error;
pub mod sla;
pub mod store;
pub mod types;
pub mod window;

// Re-export commonly used types
pub use chrono::{DateTime, Utc};
pub use error::{HelpdeskError, Result};
pub use types::*;

/// Injected dependencies.
///
/// All time reads go through [`Clock`](environment::Clock) so tests can pin
/// or advance it.
pub mod environment {
    use chrono::{DateTime, SubsecRound, Utc};

    /// Clock trait - abstracts time operations for testability
    ///
    /// # Examples
    ///
    /// ```ignore
    /// // Test - fixed time for deterministic tests
    /// struct FixedClock { time: DateTime<Utc> }
    /// impl Clock for FixedClock {
    ///     fn now(&self) -> DateTime<Utc> {
    ///         self.time
    ///     }
    /// }
    /// ```
    pub trait Clock: Send + Sync {
        /// Get the current time
        fn now(&self) -> DateTime<Utc>;
    }

    /// Wall clock.
    ///
    /// Truncated to microseconds, the precision Postgres stores, so a
    /// timestamp read back compares equal to the one written.
    #[derive(Clone, Copy, Debug, Default)]
    pub struct SystemClock;

    impl Clock for SystemClock {
        fn now(&self) -> DateTime<Utc> {
            Utc::now().trunc_subsecs(6)
        }
    }

}
