//! Optimistic locking for ticket mutations.
//!
//! The client sends back the version token it last saw. The controller
//! re-reads the stored ticket, refuses on any mismatch, and otherwise writes
//! the mutation with a compare-and-swap on `version`. Losers of a race get
//! [`HelpdeskError::StaleUpdate`]; nothing is retried here.

use crate::timeout::StorageGuard;
use chrono::{DateTime, TimeDelta, Utc};
use helpdesk_core::error::{HelpdeskError, Result};
use helpdesk_core::store::TicketStore;
use helpdesk_core::{NewTimelineEntry, Ticket, TicketId, VersionToken};

/// Guards ticket writes with a version compare-and-swap.
#[derive(Debug, Clone)]
pub struct ConcurrencyController<T> {
    store: T,
    guard: StorageGuard,
}

impl<T: TicketStore> ConcurrencyController<T> {
    /// Create a controller over `store`.
    #[must_use]
    pub const fn new(store: T, guard: StorageGuard) -> Self {
        Self { store, guard }
    }

    /// Apply `mutation` to ticket `id` if `token` still describes it.
    ///
    /// `mutation` receives the stored ticket and a draft of the next state
    /// (version bumped by one, `updated_at` moved past the stored one, to
    /// `now` unless the clock has not advanced). It edits the draft
    /// and returns it together with the audit entry to commit alongside.
    /// Identity, creator, creation time, SLA deadline and the bumped version
    /// are restored on the draft afterwards, whatever the mutation did.
    ///
    /// # Errors
    ///
    /// - [`HelpdeskError::NotFound`] if the ticket does not exist
    /// - [`HelpdeskError::StaleUpdate`] if the token does not match, or the
    ///   version moved between the read and the write
    /// - whatever `mutation` returns
    /// - [`HelpdeskError::Storage`] / [`HelpdeskError::Timeout`] from the store
    pub async fn try_update<F>(
        &self,
        id: TicketId,
        token: &VersionToken,
        now: DateTime<Utc>,
        mutation: F,
    ) -> Result<(Ticket, NewTimelineEntry)>
    where
        F: FnOnce(&Ticket, Ticket) -> Result<(Ticket, NewTimelineEntry)> + Send,
    {
        let current = self
            .guard
            .run("get_ticket", self.store.get_ticket(id))
            .await?
            .ok_or_else(|| HelpdeskError::not_found("Ticket", id))?;

        if !token.matches(&current) {
            return Err(Self::stale(&current, token));
        }

        let updated_at = Self::next_updated_at(&current, now);
        let mut draft = current.clone();
        draft.version = current.version + 1;
        draft.updated_at = updated_at;

        let (mut next, entry) = mutation(&current, draft)?;
        next.id = current.id;
        next.created_by = current.created_by;
        next.created_at = current.created_at;
        next.sla_deadline = current.sla_deadline;
        next.version = current.version + 1;
        next.updated_at = updated_at;

        let stored = self
            .guard
            .run(
                "compare_and_update",
                self.store.compare_and_update(current.version, &next, &entry),
            )
            .await?;

        match stored {
            Some(ticket) => {
                tracing::debug!(
                    ticket_id = %ticket.id,
                    version = ticket.version,
                    "Ticket updated"
                );
                Ok((ticket, entry))
            }
            None => Err(Self::stale(&current, token)),
        }
    }

    /// Strictly after the stored `updated_at`, even within one microsecond,
    /// so an `updated_at` token never matches a newer state.
    fn next_updated_at(current: &Ticket, now: DateTime<Utc>) -> DateTime<Utc> {
        now.max(current.updated_at + TimeDelta::microseconds(1))
    }

    fn stale(current: &Ticket, token: &VersionToken) -> HelpdeskError {
        tracing::warn!(
            ticket_id = %current.id,
            observed = %token,
            current_version = current.version,
            "Stale ticket update rejected"
        );
        metrics::counter!("tickets.stale_updates").increment(1);
        HelpdeskError::StaleUpdate {
            ticket_id: current.id,
            current_version: current.version,
        }
    }
}
