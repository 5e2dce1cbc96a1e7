//! Storage traits.
//!
//! The engine talks to storage only through these traits. Postgres and Redis
//! implementations live in their own crates; in-memory implementations for
//! tests live in `helpdesk-testing`.
//!
//! # Atomicity
//!
//! Every ticket or comment write takes the [`NewTimelineEntry`] that
//! describes it and must commit both together or neither. A mutation
//! without its audit record (or the reverse) is never observable.

use crate::error::Result;
use crate::types::{
    Comment, CommentId, IdempotencyRecord, NewTimelineEntry, Reservation, Role, Ticket, TicketId,
    TimelineEntry, User, UserId,
};
use crate::window::WindowDecision;
use chrono::{DateTime, Utc};
use std::time::Duration;

/// Persistent store for tickets, comments and their timeline.
pub trait TicketStore: Send + Sync {
    /// Insert a freshly created ticket together with its `created` entry.
    ///
    /// # Errors
    ///
    /// Returns [`crate::HelpdeskError::Storage`] if the write fails.
    fn insert_ticket(
        &self,
        ticket: &Ticket,
        entry: &NewTimelineEntry,
    ) -> impl std::future::Future<Output = Result<()>> + Send;

    /// Fetch a ticket by ID.
    ///
    /// # Errors
    ///
    /// Returns [`crate::HelpdeskError::Storage`] if the read fails.
    fn get_ticket(
        &self,
        id: TicketId,
    ) -> impl std::future::Future<Output = Result<Option<Ticket>>> + Send;

    /// All tickets, newest first, optionally narrowed to those whose title,
    /// description or any comment text contains `search` (case-insensitive).
    ///
    /// # Errors
    ///
    /// Returns [`crate::HelpdeskError::Storage`] if the read fails.
    fn list_tickets(
        &self,
        search: Option<&str>,
    ) -> impl std::future::Future<Output = Result<Vec<Ticket>>> + Send;

    /// Tickets that are not closed and whose deadline is before `now`,
    /// newest first.
    ///
    /// # Errors
    ///
    /// Returns [`crate::HelpdeskError::Storage`] if the read fails.
    fn list_breached(
        &self,
        now: DateTime<Utc>,
    ) -> impl std::future::Future<Output = Result<Vec<Ticket>>> + Send;

    /// Replace the ticket if and only if its stored version still equals
    /// `expected_version`, writing `entry` in the same transaction.
    ///
    /// `updated` must carry `expected_version + 1`.
    ///
    /// # Returns
    ///
    /// The stored ticket on success, `None` if the version moved on (or the
    /// ticket vanished) in the meantime.
    ///
    /// # Errors
    ///
    /// Returns [`crate::HelpdeskError::Storage`] if the write fails.
    fn compare_and_update(
        &self,
        expected_version: u64,
        updated: &Ticket,
        entry: &NewTimelineEntry,
    ) -> impl std::future::Future<Output = Result<Option<Ticket>>> + Send;

    /// Insert a comment together with its `comment_added` entry.
    ///
    /// # Errors
    ///
    /// Returns [`crate::HelpdeskError::Storage`] if the write fails.
    fn insert_comment(
        &self,
        comment: &Comment,
        entry: &NewTimelineEntry,
    ) -> impl std::future::Future<Output = Result<()>> + Send;

    /// Fetch a comment by ID.
    ///
    /// # Errors
    ///
    /// Returns [`crate::HelpdeskError::Storage`] if the read fails.
    fn get_comment(
        &self,
        id: CommentId,
    ) -> impl std::future::Future<Output = Result<Option<Comment>>> + Send;

    /// Comments on a ticket, oldest first.
    ///
    /// # Errors
    ///
    /// Returns [`crate::HelpdeskError::Storage`] if the read fails.
    fn list_comments(
        &self,
        ticket_id: TicketId,
    ) -> impl std::future::Future<Output = Result<Vec<Comment>>> + Send;

    /// Timeline of a ticket, oldest first, ties broken by insertion order.
    ///
    /// # Errors
    ///
    /// Returns [`crate::HelpdeskError::Storage`] if the read fails.
    fn list_timeline(
        &self,
        ticket_id: TicketId,
    ) -> impl std::future::Future<Output = Result<Vec<TimelineEntry>>> + Send;
}

/// Store for idempotency records, keyed by `(user_id, key)`.
///
/// A key is claimed with [`reserve`](IdempotencyStore::reserve) before the
/// mutation runs, then either [`complete`](IdempotencyStore::complete)d with
/// the response or [`release`](IdempotencyStore::release)d. A reservation
/// and a completion are matched on `created_at`.
pub trait IdempotencyStore: Send + Sync {
    /// Store the pending `record` unless a live record already exists for
    /// the same `(user_id, key)`. An expired record is replaced. Check and
    /// insert must be atomic with respect to concurrent calls on the key.
    ///
    /// # Returns
    ///
    /// [`Reservation::Acquired`] if this call stored the reservation,
    /// otherwise the state of the live record that blocked it.
    ///
    /// # Errors
    ///
    /// Returns [`crate::HelpdeskError::Storage`] if the write fails.
    fn reserve(
        &self,
        record: &IdempotencyRecord,
    ) -> impl std::future::Future<Output = Result<Reservation>> + Send;

    /// Fill in the response of the reservation `record` was made from.
    ///
    /// # Returns
    ///
    /// `false` if that reservation no longer exists (its lease ran out and
    /// it was purged or taken over).
    ///
    /// # Errors
    ///
    /// Returns [`crate::HelpdeskError::Storage`] if the write fails.
    fn complete(
        &self,
        record: &IdempotencyRecord,
    ) -> impl std::future::Future<Output = Result<bool>> + Send;

    /// Drop the reservation `record` describes if it is still pending.
    ///
    /// # Errors
    ///
    /// Returns [`crate::HelpdeskError::Storage`] if the delete fails.
    fn release(
        &self,
        record: &IdempotencyRecord,
    ) -> impl std::future::Future<Output = Result<()>> + Send;

    /// Delete records that expired at or before `now`.
    ///
    /// # Returns
    ///
    /// Number of records deleted.
    ///
    /// # Errors
    ///
    /// Returns [`crate::HelpdeskError::Storage`] if the delete fails.
    fn purge_expired(
        &self,
        now: DateTime<Utc>,
    ) -> impl std::future::Future<Output = Result<u64>> + Send;
}

/// Shared sliding-window counters.
///
/// Implementations must make the prune, count and record steps of one
/// [`admit`](RateWindowStore::admit) call atomic with respect to concurrent
/// calls on the same key.
pub trait RateWindowStore: Send + Sync {
    /// Run one admission attempt against the window for `key`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::HelpdeskError::Storage`] if the store is unreachable.
    fn admit(
        &self,
        key: &str,
        now: DateTime<Utc>,
        window: Duration,
        limit: u32,
    ) -> impl std::future::Future<Output = Result<WindowDecision>> + Send;
}

/// Read-only view of registered users.
pub trait UserDirectory: Send + Sync {
    /// Fetch a user by ID.
    ///
    /// # Errors
    ///
    /// Returns [`crate::HelpdeskError::Storage`] if the read fails.
    fn get_user(
        &self,
        id: UserId,
    ) -> impl std::future::Future<Output = Result<Option<User>>> + Send;

    /// All users holding `role`, ordered by username.
    ///
    /// # Errors
    ///
    /// Returns [`crate::HelpdeskError::Storage`] if the read fails.
    fn list_by_role(
        &self,
        role: Role,
    ) -> impl std::future::Future<Output = Result<Vec<User>>> + Send;
}

/// The full set of stores a ticket service runs on.
pub trait Backend: Send + Sync + 'static {
    /// Ticket store
    type Tickets: TicketStore + Clone + 'static;
    /// Idempotency store
    type Idempotency: IdempotencyStore + Clone + 'static;
    /// User directory
    type Users: UserDirectory + Clone + 'static;
    /// Rate window store
    type Windows: RateWindowStore + Clone + 'static;

    /// Ticket store
    fn tickets(&self) -> &Self::Tickets;
    /// Idempotency store
    fn idempotency(&self) -> &Self::Idempotency;
    /// User directory
    fn users(&self) -> &Self::Users;
    /// Rate window store
    fn windows(&self) -> &Self::Windows;
}

/// A [`Backend`] assembled from four independent stores.
#[derive(Clone, Debug)]
pub struct Stores<T, I, U, W> {
    /// Ticket store
    pub tickets: T,
    /// Idempotency store
    pub idempotency: I,
    /// User directory
    pub users: U,
    /// Rate window store
    pub windows: W,
}

impl<T, I, U, W> Stores<T, I, U, W> {
    /// Bundle the stores.
    #[must_use]
    pub const fn new(tickets: T, idempotency: I, users: U, windows: W) -> Self {
        Self {
            tickets,
            idempotency,
            users,
            windows,
        }
    }
}

impl<T, I, U, W> Backend for Stores<T, I, U, W>
where
    T: TicketStore + Clone + 'static,
    I: IdempotencyStore + Clone + 'static,
    U: UserDirectory + Clone + 'static,
    W: RateWindowStore + Clone + 'static,
{
    type Tickets = T;
    type Idempotency = I;
    type Users = U;
    type Windows = W;

    fn tickets(&self) -> &T {
        &self.tickets
    }

    fn idempotency(&self) -> &I {
        &self.idempotency
    }

    fn users(&self) -> &U {
        &self.users
    }

    fn windows(&self) -> &W {
        &self.windows
    }
}
