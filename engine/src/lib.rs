//! # Helpdesk Engine
//!
//! The ticket lifecycle engine: creation and mutation of support tickets
//! under concurrent access.
//!
//! - [`ConcurrencyController`]: optimistic locking on the ticket version
//! - [`IdempotencyCache`]: exactly-once effect for retried writes
//! - [`RateLimiter`]: per-identity sliding-window admission
//! - [`AuditRecorder`]: timeline entries committed with each mutation
//! - [`TicketService`]: orchestrates all of the above
//!
//! Storage is abstracted behind the traits in [`helpdesk_core::store`]; every
//! storage call is bounded by [`EngineConfig::storage_timeout`].
//!
//! ## Example
//!
//! ```ignore
//! use helpdesk_engine::{EngineConfig, TicketService};
//! use helpdesk_core::environment::SystemClock;
//!
//! let service = TicketService::new(backend, Arc::new(SystemClock), EngineConfig::default());
//! let ticket = service.create(&identity, new_ticket).await?;
//! let ticket = service
//!     .update(&identity, ticket.id, Some(VersionToken::Version(ticket.version)), patch)
//!     .await?;
//! ```

pub mod audit;
pub mod concurrency;
pub mod config;
pub mod idempotency;
pub mod rate_limit;
pub mod service;
pub mod timeout;

pub use audit::AuditRecorder;
pub use concurrency::ConcurrencyController;
pub use config::EngineConfig;
pub use idempotency::IdempotencyCache;
pub use rate_limit::{Admission, RateLimiter};
pub use service::TicketService;
pub use timeout::StorageGuard;
