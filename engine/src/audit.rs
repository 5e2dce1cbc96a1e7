//! Audit trail recorder.
//!
//! Builds the timeline entry describing a mutation. The entry is handed to
//! the store together with the mutation itself, so both commit in one
//! transaction or not at all; nothing here writes on its own.

use chrono::{DateTime, Utc};
use helpdesk_core::{Comment, Identity, NewTimelineEntry, Ticket, TicketId, UserId};
use serde_json::json;

/// Action tags written to the timeline.
pub mod actions {
    /// Ticket opened
    pub const CREATED: &str = "created";
    /// Ticket fields edited
    pub const UPDATED: &str = "updated";
    /// Comment posted
    pub const COMMENT_ADDED: &str = "comment_added";
    /// Assignee changed
    pub const ASSIGNED: &str = "assigned";
}

/// Characters of comment text copied into the audit snapshot.
pub const COMMENT_EXCERPT_LEN: usize = 50;

/// Produces timeline entries for ticket mutations.
#[derive(Debug, Clone, Copy, Default)]
pub struct AuditRecorder;

impl AuditRecorder {
    /// Create a recorder.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Generic entry for `ticket_id`.
    #[must_use]
    pub fn record(
        &self,
        ticket_id: TicketId,
        action: &str,
        metadata: serde_json::Value,
        at: DateTime<Utc>,
    ) -> NewTimelineEntry {
        NewTimelineEntry {
            ticket_id,
            action: action.to_string(),
            metadata,
            created_at: at,
        }
    }

    /// Entry for a newly opened ticket.
    #[must_use]
    pub fn created(&self, actor: &Identity, ticket: &Ticket) -> NewTimelineEntry {
        self.record(
            ticket.id,
            actions::CREATED,
            json!({
                "user": actor.user_id,
                "priority": ticket.priority,
                "status": ticket.status,
            }),
            ticket.created_at,
        )
    }

    /// Entry for an edit. `updated` is the ticket as it will be stored.
    #[must_use]
    pub fn updated(&self, actor: &Identity, updated: &Ticket, changed: &[&str]) -> NewTimelineEntry {
        self.record(
            updated.id,
            actions::UPDATED,
            json!({
                "user": actor.user_id,
                "version": updated.version,
                "changed": changed,
                "status": updated.status,
                "priority": updated.priority,
                "assignee": updated.assignee,
            }),
            updated.updated_at,
        )
    }

    /// Entry for a new comment.
    #[must_use]
    pub fn comment_added(&self, actor: &Identity, comment: &Comment) -> NewTimelineEntry {
        let excerpt: String = comment.text.chars().take(COMMENT_EXCERPT_LEN).collect();
        self.record(
            comment.ticket_id,
            actions::COMMENT_ADDED,
            json!({
                "user": actor.user_id,
                "comment_id": comment.id,
                "text": excerpt,
            }),
            comment.created_at,
        )
    }

    /// Entry for a reassignment. `updated` is the ticket as it will be stored.
    #[must_use]
    pub fn assigned(
        &self,
        actor: &Identity,
        updated: &Ticket,
        previous_assignee: Option<UserId>,
    ) -> NewTimelineEntry {
        self.record(
            updated.id,
            actions::ASSIGNED,
            json!({
                "user": actor.user_id,
                "assignee": updated.assignee,
                "previous_assignee": previous_assignee,
                "version": updated.version,
            }),
            updated.updated_at,
        )
    }

    /// Note that `entry` was committed.
    pub fn committed(&self, entry: &NewTimelineEntry) {
        metrics::counter!("audit.entries", "action" => entry.action.clone()).increment(1);
        tracing::debug!(
            ticket_id = %entry.ticket_id,
            action = %entry.action,
            "Audit entry committed"
        );
    }
}
