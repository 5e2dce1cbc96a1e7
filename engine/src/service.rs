//! Ticket service: the orchestrator.
//!
//! Every mutating operation runs the same pipeline:
//!
//! ```text
//! Rate Limiter → Idempotency Cache → Access Policy → Concurrency Controller
//!     → mutation + audit entry (one transaction) → Idempotency Cache
//! ```
//!
//! The rate limiter runs in the HTTP middleware before any handler, and the
//! idempotency steps wrap an operation through [`TicketService::idempotent`].
//! The operations below cover the remaining steps.

use crate::audit::AuditRecorder;
use crate::concurrency::ConcurrencyController;
use crate::config::EngineConfig;
use crate::idempotency::{Claim, IdempotencyCache};
use crate::rate_limit::RateLimiter;
use crate::timeout::StorageGuard;
use chrono::{DateTime, SubsecRound, Utc};
use helpdesk_core::access::{self, MutationKind};
use helpdesk_core::environment::Clock;
use helpdesk_core::error::{HelpdeskError, Result};
use helpdesk_core::sla;
use helpdesk_core::store::{Backend, TicketStore, UserDirectory};
use helpdesk_core::{
    Comment, CommentId, IdempotencyKey, Identity, NewComment, NewTicket, Role, Status,
    StoredResponse, Ticket, TicketId, TicketPatch, TimelineEntry, User, UserId, VersionToken,
};
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;

/// Orchestrates ticket operations over a [`Backend`].
pub struct TicketService<B: Backend> {
    backend: B,
    clock: Arc<dyn Clock>,
    config: EngineConfig,
    guard: StorageGuard,
    audit: AuditRecorder,
    controller: ConcurrencyController<B::Tickets>,
    idempotency: IdempotencyCache<B::Idempotency>,
    limiter: RateLimiter<B::Windows>,
}

impl<B: Backend> std::fmt::Debug for TicketService<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TicketService")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl<B: Backend> TicketService<B> {
    /// Build a service over `backend`.
    #[must_use]
    pub fn new(backend: B, clock: Arc<dyn Clock>, config: EngineConfig) -> Self {
        let guard = StorageGuard::new(config.storage_timeout);
        let controller = ConcurrencyController::new(backend.tickets().clone(), guard);
        let idempotency =
            IdempotencyCache::new(backend.idempotency().clone(), config.idempotency_ttl, guard);
        let limiter = RateLimiter::new(
            backend.windows().clone(),
            config.rate_limit_requests,
            config.rate_limit_window,
            guard,
        );
        Self {
            backend,
            clock,
            config,
            guard,
            audit: AuditRecorder::new(),
            controller,
            idempotency,
            limiter,
        }
    }

    /// The engine configuration.
    #[must_use]
    pub const fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// The rate limiter guarding this service.
    #[must_use]
    pub const fn rate_limiter(&self) -> &RateLimiter<B::Windows> {
        &self.limiter
    }

    /// Current time, at storage precision.
    #[must_use]
    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now().trunc_subsecs(6)
    }

    // ========================================================================
    // Identity
    // ========================================================================

    /// Resolve a user id to an identity via the user directory.
    ///
    /// # Errors
    ///
    /// Returns [`HelpdeskError::Unauthenticated`] for an unknown user.
    pub async fn identify(&self, user_id: UserId) -> Result<Identity> {
        self.guard
            .run("get_user", self.backend.users().get_user(user_id))
            .await?
            .map(|user| user.identity())
            .ok_or(HelpdeskError::Unauthenticated)
    }

    // ========================================================================
    // Idempotency pipeline
    // ========================================================================

    /// Run `op` at most once per `(identity, key)`.
    ///
    /// With a key, the key is reserved before `op` is polled. A key that
    /// already has a response returns it and drops `op` unpolled; a key held
    /// by a request still in flight is refused. Otherwise `op` runs; on
    /// success its value is serialized once, stored under the key and
    /// returned as `status`. A failed `op` releases the key and stores
    /// nothing.
    ///
    /// # Errors
    ///
    /// - whatever `op` returns
    /// - [`HelpdeskError::IdempotencyInProgress`] if another request holds
    ///   the key
    /// - a storage error from the reservation
    pub async fn idempotent<T, F>(
        &self,
        identity: &Identity,
        key: Option<&IdempotencyKey>,
        status: u16,
        op: F,
    ) -> Result<StoredResponse>
    where
        T: Serialize,
        F: Future<Output = Result<T>>,
    {
        let reservation = match self
            .idempotency
            .before_mutate(identity.user_id, key, self.now())
            .await?
        {
            Claim::Replay(prior) => return Ok(prior),
            Claim::Proceed(reservation) => reservation,
        };

        let produced = op.await.and_then(|value| {
            serde_json::to_string(&value)
                .map_err(|e| HelpdeskError::storage("Failed to serialize response", e))
        });
        let body = match produced {
            Ok(body) => body,
            Err(e) => {
                self.idempotency.abandon(reservation.as_ref()).await;
                return Err(e);
            }
        };
        let response = StoredResponse { status, body };

        self.idempotency
            .after_mutate(reservation.as_ref(), &response)
            .await;
        Ok(response)
    }

    /// Delete expired idempotency records.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the delete fails.
    pub async fn purge_expired_idempotency(&self) -> Result<u64> {
        self.idempotency.purge_expired(self.now()).await
    }

    // ========================================================================
    // Mutations
    // ========================================================================

    /// Open a ticket on behalf of `identity`.
    ///
    /// The SLA deadline is fixed here from the priority and never changes.
    ///
    /// # Errors
    ///
    /// - [`HelpdeskError::Validation`] for a bad title or description
    /// - storage errors
    pub async fn create(&self, identity: &Identity, fields: NewTicket) -> Result<Ticket> {
        fields.validate()?;
        let now = self.now();
        let ticket = Ticket {
            id: TicketId::new(),
            title: fields.title.trim().to_string(),
            description: fields.description,
            priority: fields.priority,
            status: Status::Open,
            created_by: identity.user_id,
            assignee: None,
            sla_deadline: sla::deadline(fields.priority, now),
            version: 1,
            created_at: now,
            updated_at: now,
        };
        let entry = self.audit.created(identity, &ticket);

        self.guard
            .run(
                "insert_ticket",
                self.backend.tickets().insert_ticket(&ticket, &entry),
            )
            .await?;
        self.audit.committed(&entry);

        tracing::info!(
            ticket_id = %ticket.id,
            user_id = %identity.user_id,
            priority = %ticket.priority,
            "Ticket created"
        );
        Ok(ticket)
    }

    /// Edit a ticket's fields, guarded by the client's version token.
    ///
    /// # Errors
    ///
    /// - [`HelpdeskError::Validation`] without a token, or for an empty or
    ///   invalid patch
    /// - [`HelpdeskError::NotFound`] if the ticket does not exist
    /// - [`HelpdeskError::Forbidden`] if the caller may not edit it
    /// - [`HelpdeskError::StaleUpdate`] if the token is out of date
    pub async fn update(
        &self,
        identity: &Identity,
        ticket_id: TicketId,
        token: Option<VersionToken>,
        patch: TicketPatch,
    ) -> Result<Ticket> {
        let token = token.ok_or_else(|| {
            HelpdeskError::validation("A version token (version or updated_at) is required")
        })?;
        patch.validate()?;

        let current = self.load(ticket_id).await?;
        access::authorize_mutation(identity, &current, MutationKind::Update)
            .into_result("You may not modify this ticket")?;

        let changed = patch.changed_fields();
        let (ticket, entry) = self
            .controller
            .try_update(ticket_id, &token, self.now(), |_, mut next| {
                patch.apply_to(&mut next);
                let entry = self.audit.updated(identity, &next, &changed);
                Ok((next, entry))
            })
            .await?;
        self.audit.committed(&entry);

        tracing::info!(
            ticket_id = %ticket.id,
            user_id = %identity.user_id,
            version = ticket.version,
            changed = ?changed,
            "Ticket updated"
        );
        Ok(ticket)
    }

    /// Comment on a ticket, optionally replying to an earlier comment.
    ///
    /// Comments do not change the ticket's version.
    ///
    /// # Errors
    ///
    /// - [`HelpdeskError::Validation`] for blank text or a parent on another
    ///   ticket
    /// - [`HelpdeskError::NotFound`] if the ticket or parent does not exist
    /// - [`HelpdeskError::Forbidden`] if the caller may not comment
    pub async fn add_comment(
        &self,
        identity: &Identity,
        ticket_id: TicketId,
        fields: NewComment,
    ) -> Result<Comment> {
        fields.validate()?;

        let ticket = self.load(ticket_id).await?;
        access::authorize_mutation(identity, &ticket, MutationKind::Comment)
            .into_result("You may not comment on this ticket")?;

        if let Some(parent_id) = fields.parent {
            self.check_parent(ticket_id, parent_id).await?;
        }

        let comment = Comment {
            id: CommentId::new(),
            ticket_id,
            author: identity.user_id,
            text: fields.text,
            parent: fields.parent,
            created_at: self.now(),
        };
        let entry = self.audit.comment_added(identity, &comment);

        self.guard
            .run(
                "insert_comment",
                self.backend.tickets().insert_comment(&comment, &entry),
            )
            .await?;
        self.audit.committed(&entry);

        tracing::info!(
            ticket_id = %ticket_id,
            comment_id = %comment.id,
            user_id = %identity.user_id,
            "Comment added"
        );
        Ok(comment)
    }

    /// Hand a ticket to an agent. Admins only.
    ///
    /// # Errors
    ///
    /// - [`HelpdeskError::Forbidden`] if the caller is not an admin
    /// - [`HelpdeskError::NotFound`] if the ticket or user does not exist
    /// - [`HelpdeskError::Validation`] if the user is not an agent
    /// - [`HelpdeskError::StaleUpdate`] if the ticket changed concurrently
    pub async fn assign(
        &self,
        identity: &Identity,
        ticket_id: TicketId,
        agent_id: UserId,
    ) -> Result<Ticket> {
        if !identity.is_admin() {
            return Err(HelpdeskError::forbidden("Only admins can assign tickets"));
        }

        let current = self.load(ticket_id).await?;
        access::authorize_mutation(identity, &current, MutationKind::Assign)
            .into_result("Only admins can assign tickets")?;

        let agent = self
            .guard
            .run("get_user", self.backend.users().get_user(agent_id))
            .await?
            .ok_or_else(|| HelpdeskError::not_found("User", agent_id))?;
        if agent.role != Role::Agent {
            return Err(HelpdeskError::validation(format!(
                "User {agent_id} is not an agent"
            )));
        }

        let token = VersionToken::Version(current.version);
        let (ticket, entry) = self
            .controller
            .try_update(ticket_id, &token, self.now(), |before, mut next| {
                next.assignee = Some(agent.id);
                let entry = self.audit.assigned(identity, &next, before.assignee);
                Ok((next, entry))
            })
            .await?;
        self.audit.committed(&entry);

        tracing::info!(
            ticket_id = %ticket.id,
            assignee = %agent.id,
            version = ticket.version,
            "Ticket assigned"
        );
        Ok(ticket)
    }

    // ========================================================================
    // Queries
    // ========================================================================

    /// Fetch one ticket.
    ///
    /// # Errors
    ///
    /// Returns [`HelpdeskError::NotFound`] if it does not exist or is hidden
    /// from the caller.
    pub async fn get(&self, identity: &Identity, ticket_id: TicketId) -> Result<Ticket> {
        let ticket = self.load(ticket_id).await?;
        if access::is_visible(identity, &ticket) {
            Ok(ticket)
        } else {
            Err(HelpdeskError::not_found("Ticket", ticket_id))
        }
    }

    /// Tickets visible to the caller, newest first, optionally narrowed by a
    /// case-insensitive search over title, description and comments.
    ///
    /// # Errors
    ///
    /// Storage errors only.
    pub async fn list(&self, identity: &Identity, search: Option<&str>) -> Result<Vec<Ticket>> {
        let search = access::search_term(search);
        let tickets = self
            .guard
            .run("list_tickets", self.backend.tickets().list_tickets(search))
            .await?;
        Ok(Self::visible(identity, tickets))
    }

    /// Visible tickets past their deadline and not closed.
    ///
    /// # Errors
    ///
    /// Storage errors only.
    pub async fn list_breached(&self, identity: &Identity) -> Result<Vec<Ticket>> {
        let tickets = self
            .guard
            .run(
                "list_breached",
                self.backend.tickets().list_breached(self.now()),
            )
            .await?;
        Ok(Self::visible(identity, tickets))
    }

    /// Comments on a visible ticket, oldest first.
    ///
    /// # Errors
    ///
    /// Returns [`HelpdeskError::NotFound`] if the ticket does not exist or
    /// is hidden from the caller.
    pub async fn comments(&self, identity: &Identity, ticket_id: TicketId) -> Result<Vec<Comment>> {
        self.get(identity, ticket_id).await?;
        self.guard
            .run(
                "list_comments",
                self.backend.tickets().list_comments(ticket_id),
            )
            .await
    }

    /// Audit trail of a visible ticket, oldest first.
    ///
    /// # Errors
    ///
    /// Returns [`HelpdeskError::NotFound`] if the ticket does not exist or
    /// is hidden from the caller.
    pub async fn timeline(
        &self,
        identity: &Identity,
        ticket_id: TicketId,
    ) -> Result<Vec<TimelineEntry>> {
        self.get(identity, ticket_id).await?;
        self.guard
            .run(
                "list_timeline",
                self.backend.tickets().list_timeline(ticket_id),
            )
            .await
    }

    /// Every agent. Admins only.
    ///
    /// # Errors
    ///
    /// Returns [`HelpdeskError::Forbidden`] for non-admins.
    pub async fn list_agents(&self, identity: &Identity) -> Result<Vec<User>> {
        access::authorize_list_agents(identity).into_result("Only admins can list agents")?;
        self.guard
            .run(
                "list_by_role",
                self.backend.users().list_by_role(Role::Agent),
            )
            .await
    }

    // ========================================================================
    // Helpers
    // ========================================================================

    async fn load(&self, ticket_id: TicketId) -> Result<Ticket> {
        self.guard
            .run("get_ticket", self.backend.tickets().get_ticket(ticket_id))
            .await?
            .ok_or_else(|| HelpdeskError::not_found("Ticket", ticket_id))
    }

    async fn check_parent(&self, ticket_id: TicketId, parent_id: CommentId) -> Result<()> {
        let parent = self
            .guard
            .run("get_comment", self.backend.tickets().get_comment(parent_id))
            .await?
            .ok_or_else(|| HelpdeskError::not_found("Comment", parent_id))?;
        if parent.ticket_id != ticket_id {
            return Err(HelpdeskError::validation(
                "Parent comment belongs to a different ticket",
            ));
        }
        Ok(())
    }

    fn visible(identity: &Identity, tickets: Vec<Ticket>) -> Vec<Ticket> {
        tickets
            .into_iter()
            .filter(|t| access::is_visible(identity, t))
            .collect()
    }
}
