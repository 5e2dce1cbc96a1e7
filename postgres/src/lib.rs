//! `PostgreSQL` storage for the helpdesk ticket engine.
//!
//! This crate implements the durable store traits from `helpdesk-core` on
//! sqlx:
//!
//! - [`PostgresTicketStore`]: tickets, comments and the timeline, with
//!   version compare-and-swap and transactional audit entries
//! - [`PostgresIdempotencyStore`]: `(user, key)` records with TTL
//! - [`PostgresUserDirectory`]: users and roles
//!
//! # Example
//!
//! ```ignore
//! use helpdesk_postgres::{migrate, PostgresTicketStore};
//!
//! async fn example() -> Result<(), Box<dyn std::error::Error>> {
//!     let pool = sqlx::PgPool::connect("postgres://localhost/helpdesk").await?;
//!     migrate(&pool).await?;
//!     let tickets = PostgresTicketStore::new(pool);
//!     Ok(())
//! }
//! ```

mod idempotency;
mod tickets;
mod users;

pub use idempotency::PostgresIdempotencyStore;
pub use tickets::PostgresTicketStore;
pub use users::PostgresUserDirectory;

use helpdesk_core::error::{HelpdeskError, Result};
use sqlx::PgPool;

/// Apply the bundled schema migrations.
///
/// # Errors
///
/// Returns [`HelpdeskError::Storage`] if a migration fails.
pub async fn migrate(pool: &PgPool) -> Result<()> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .map_err(|e| HelpdeskError::storage("Migration failed", e))?;
    tracing::info!("Database migrations applied");
    Ok(())
}
