//! `PostgreSQL` ticket store.
//!
//! Every write runs in a transaction that also appends the timeline entry,
//! so a mutation and its audit record commit together or not at all.
//! Updates are a compare-and-swap on `version`:
//!
//! ```sql
//! UPDATE tickets SET ... WHERE id = $1 AND version = $2 RETURNING ...
//! ```
//!
//! Zero matched rows means someone else won the race.

use chrono::{DateTime, Utc};
use helpdesk_core::error::{HelpdeskError, Result};
use helpdesk_core::store::TicketStore;
use helpdesk_core::{
    Comment, CommentId, NewTimelineEntry, Priority, Status, Ticket, TicketId, TimelineEntry,
    UserId,
};
use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;

const TICKET_COLUMNS: &str = "id, title, description, priority, status, created_by, assignee, \
     sla_deadline, version, created_at, updated_at";

#[derive(sqlx::FromRow)]
struct TicketRow {
    id: Uuid,
    title: String,
    description: String,
    priority: String,
    status: String,
    created_by: Uuid,
    assignee: Option<Uuid>,
    sla_deadline: DateTime<Utc>,
    version: i64,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<TicketRow> for Ticket {
    type Error = HelpdeskError;

    fn try_from(row: TicketRow) -> Result<Self> {
        Ok(Self {
            id: TicketId::from_uuid(row.id),
            title: row.title,
            description: row.description,
            priority: Priority::parse(&row.priority)
                .map_err(|e| HelpdeskError::storage("Corrupt ticket row", e))?,
            status: Status::parse(&row.status)
                .map_err(|e| HelpdeskError::storage("Corrupt ticket row", e))?,
            created_by: UserId::from_uuid(row.created_by),
            assignee: row.assignee.map(UserId::from_uuid),
            sla_deadline: row.sla_deadline,
            version: u64::try_from(row.version)
                .map_err(|e| HelpdeskError::storage("Corrupt ticket version", e))?,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct CommentRow {
    id: Uuid,
    ticket_id: Uuid,
    author: Uuid,
    text: String,
    parent_id: Option<Uuid>,
    created_at: DateTime<Utc>,
}

impl From<CommentRow> for Comment {
    fn from(row: CommentRow) -> Self {
        Self {
            id: CommentId::from_uuid(row.id),
            ticket_id: TicketId::from_uuid(row.ticket_id),
            author: UserId::from_uuid(row.author),
            text: row.text,
            parent: row.parent_id.map(CommentId::from_uuid),
            created_at: row.created_at,
        }
    }
}

#[derive(sqlx::FromRow)]
struct TimelineRow {
    id: i64,
    ticket_id: Uuid,
    action: String,
    metadata: serde_json::Value,
    created_at: DateTime<Utc>,
}

impl From<TimelineRow> for TimelineEntry {
    fn from(row: TimelineRow) -> Self {
        Self {
            id: row.id,
            ticket_id: TicketId::from_uuid(row.ticket_id),
            action: row.action,
            metadata: row.metadata,
            created_at: row.created_at,
        }
    }
}

fn to_db_version(version: u64) -> Result<i64> {
    i64::try_from(version).map_err(|e| HelpdeskError::storage("Version out of range", e))
}

/// `PostgreSQL`-backed [`TicketStore`].
#[derive(Clone, Debug)]
pub struct PostgresTicketStore {
    pool: PgPool,
}

impl PostgresTicketStore {
    /// Create a store over an existing pool.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn begin(&self) -> Result<Transaction<'static, Postgres>> {
        self.pool
            .begin()
            .await
            .map_err(|e| HelpdeskError::storage("Failed to begin transaction", e))
    }

    async fn append_entry(
        tx: &mut Transaction<'static, Postgres>,
        entry: &NewTimelineEntry,
    ) -> Result<i64> {
        let (id,): (i64,) = sqlx::query_as(
            r"
            INSERT INTO timeline_entries (ticket_id, action, metadata, created_at)
            VALUES ($1, $2, $3, $4)
            RETURNING id
            ",
        )
        .bind(entry.ticket_id.as_uuid())
        .bind(&entry.action)
        .bind(&entry.metadata)
        .bind(entry.created_at)
        .fetch_one(&mut **tx)
        .await
        .map_err(|e| HelpdeskError::storage("Failed to append timeline entry", e))?;
        Ok(id)
    }

    async fn commit(tx: Transaction<'static, Postgres>) -> Result<()> {
        tx.commit()
            .await
            .map_err(|e| HelpdeskError::storage("Failed to commit transaction", e))
    }
}

impl TicketStore for PostgresTicketStore {
    async fn insert_ticket(&self, ticket: &Ticket, entry: &NewTimelineEntry) -> Result<()> {
        let mut tx = self.begin().await?;

        sqlx::query(
            r"
            INSERT INTO tickets (
                id, title, description, priority, status, created_by, assignee,
                sla_deadline, version, created_at, updated_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            ",
        )
        .bind(ticket.id.as_uuid())
        .bind(&ticket.title)
        .bind(&ticket.description)
        .bind(ticket.priority.as_str())
        .bind(ticket.status.as_str())
        .bind(ticket.created_by.as_uuid())
        .bind(ticket.assignee.map(|a| *a.as_uuid()))
        .bind(ticket.sla_deadline)
        .bind(to_db_version(ticket.version)?)
        .bind(ticket.created_at)
        .bind(ticket.updated_at)
        .execute(&mut *tx)
        .await
        .map_err(|e| HelpdeskError::storage("Failed to insert ticket", e))?;

        Self::append_entry(&mut tx, entry).await?;
        Self::commit(tx).await?;

        metrics::counter!("tickets.created").increment(1);
        Ok(())
    }

    async fn get_ticket(&self, id: TicketId) -> Result<Option<Ticket>> {
        let row: Option<TicketRow> =
            sqlx::query_as(&format!("SELECT {TICKET_COLUMNS} FROM tickets WHERE id = $1"))
                .bind(id.as_uuid())
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| HelpdeskError::storage("Failed to load ticket", e))?;
        row.map(Ticket::try_from).transpose()
    }

    async fn list_tickets(&self, search: Option<&str>) -> Result<Vec<Ticket>> {
        let rows: Vec<TicketRow> = sqlx::query_as(&format!(
            r"
            SELECT {TICKET_COLUMNS}
            FROM tickets t
            WHERE $1::text IS NULL
               OR strpos(lower(t.title), lower($1)) > 0
               OR strpos(lower(t.description), lower($1)) > 0
               OR EXISTS (
                    SELECT 1 FROM comments c
                    WHERE c.ticket_id = t.id
                      AND strpos(lower(c.text), lower($1)) > 0
               )
            ORDER BY t.created_at DESC, t.seq DESC
            "
        ))
        .bind(search)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| HelpdeskError::storage("Failed to list tickets", e))?;
        rows.into_iter().map(Ticket::try_from).collect()
    }

    async fn list_breached(&self, now: DateTime<Utc>) -> Result<Vec<Ticket>> {
        let rows: Vec<TicketRow> = sqlx::query_as(&format!(
            r"
            SELECT {TICKET_COLUMNS}
            FROM tickets
            WHERE status <> 'closed' AND sla_deadline < $1
            ORDER BY created_at DESC, seq DESC
            "
        ))
        .bind(now)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| HelpdeskError::storage("Failed to list breached tickets", e))?;
        rows.into_iter().map(Ticket::try_from).collect()
    }

    async fn compare_and_update(
        &self,
        expected_version: u64,
        updated: &Ticket,
        entry: &NewTimelineEntry,
    ) -> Result<Option<Ticket>> {
        let mut tx = self.begin().await?;

        let row: Option<TicketRow> = sqlx::query_as(&format!(
            r"
            UPDATE tickets
            SET title = $3, description = $4, priority = $5, status = $6,
                assignee = $7, version = $8, updated_at = $9
            WHERE id = $1 AND version = $2
            RETURNING {TICKET_COLUMNS}
            "
        ))
        .bind(updated.id.as_uuid())
        .bind(to_db_version(expected_version)?)
        .bind(&updated.title)
        .bind(&updated.description)
        .bind(updated.priority.as_str())
        .bind(updated.status.as_str())
        .bind(updated.assignee.map(|a| *a.as_uuid()))
        .bind(to_db_version(updated.version)?)
        .bind(updated.updated_at)
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| HelpdeskError::storage("Failed to update ticket", e))?;

        let Some(row) = row else {
            // Dropping the transaction rolls it back.
            tracing::debug!(
                ticket_id = %updated.id,
                expected_version,
                "Version compare-and-swap matched no rows"
            );
            return Ok(None);
        };

        Self::append_entry(&mut tx, entry).await?;
        Self::commit(tx).await?;
        Ticket::try_from(row).map(Some)
    }

    async fn insert_comment(&self, comment: &Comment, entry: &NewTimelineEntry) -> Result<()> {
        let mut tx = self.begin().await?;

        sqlx::query(
            r"
            INSERT INTO comments (id, ticket_id, author, text, parent_id, created_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            ",
        )
        .bind(comment.id.as_uuid())
        .bind(comment.ticket_id.as_uuid())
        .bind(comment.author.as_uuid())
        .bind(&comment.text)
        .bind(comment.parent.map(|p| *p.as_uuid()))
        .bind(comment.created_at)
        .execute(&mut *tx)
        .await
        .map_err(|e| HelpdeskError::storage("Failed to insert comment", e))?;

        Self::append_entry(&mut tx, entry).await?;
        Self::commit(tx).await
    }

    async fn get_comment(&self, id: CommentId) -> Result<Option<Comment>> {
        let row: Option<CommentRow> = sqlx::query_as(
            r"
            SELECT id, ticket_id, author, text, parent_id, created_at
            FROM comments
            WHERE id = $1
            ",
        )
        .bind(id.as_uuid())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| HelpdeskError::storage("Failed to load comment", e))?;
        Ok(row.map(Comment::from))
    }

    async fn list_comments(&self, ticket_id: TicketId) -> Result<Vec<Comment>> {
        let rows: Vec<CommentRow> = sqlx::query_as(
            r"
            SELECT id, ticket_id, author, text, parent_id, created_at
            FROM comments
            WHERE ticket_id = $1
            ORDER BY created_at ASC, seq ASC
            ",
        )
        .bind(ticket_id.as_uuid())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| HelpdeskError::storage("Failed to list comments", e))?;
        Ok(rows.into_iter().map(Comment::from).collect())
    }

    async fn list_timeline(&self, ticket_id: TicketId) -> Result<Vec<TimelineEntry>> {
        let rows: Vec<TimelineRow> = sqlx::query_as(
            r"
            SELECT id, ticket_id, action, metadata, created_at
            FROM timeline_entries
            WHERE ticket_id = $1
            ORDER BY created_at ASC, id ASC
            ",
        )
        .bind(ticket_id.as_uuid())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| HelpdeskError::storage("Failed to load timeline", e))?;
        Ok(rows.into_iter().map(TimelineEntry::from).collect())
    }
}
