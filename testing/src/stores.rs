//! In-memory store implementations.
//!
//! Each store keeps its state behind an `Arc<Mutex<_>>`, so clones share
//! data and a single lock makes every multi-step write atomic. Stores take a
//! [`Faults`] handle that lets tests inject write failures and latency.

use chrono::{DateTime, Utc};
use helpdesk_core::access::matches_search;
use helpdesk_core::error::{HelpdeskError, Result};
use helpdesk_core::sla;
use helpdesk_core::store::{IdempotencyStore, RateWindowStore, TicketStore, UserDirectory};
use helpdesk_core::window::{RateWindow, WindowDecision};
use helpdesk_core::{
    Comment, CommentId, IdempotencyRecord, NewTimelineEntry, Reservation, Role, Ticket, TicketId,
    TimelineEntry, User, UserId,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

fn lock<T>(mutex: &Mutex<T>) -> Result<MutexGuard<'_, T>> {
    mutex
        .lock()
        .map_err(|_| HelpdeskError::Storage("Mutex lock failed".into()))
}

// ============================================================================
// Fault injection
// ============================================================================

/// Switches for simulating a misbehaving backend.
///
/// Clones share state, so the same handle can be given to several stores.
#[derive(Debug, Clone, Default)]
pub struct Faults {
    fail_writes: Arc<AtomicBool>,
    fail_reads: Arc<AtomicBool>,
    delay_ms: Arc<AtomicU64>,
}

impl Faults {
    /// No faults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every write fail with a storage error.
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Make every read fail with a storage error.
    pub fn set_fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    /// Delay every call by `delay`.
    pub fn set_delay(&self, delay: Duration) {
        let millis = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
        self.delay_ms.store(millis, Ordering::SeqCst);
    }

    async fn before_read(&self) -> Result<()> {
        self.pause().await;
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(HelpdeskError::Storage("injected read failure".into()));
        }
        Ok(())
    }

    async fn before_write(&self) -> Result<()> {
        self.pause().await;
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(HelpdeskError::Storage("injected write failure".into()));
        }
        Ok(())
    }

    async fn pause(&self) {
        let millis = self.delay_ms.load(Ordering::SeqCst);
        if millis > 0 {
            tokio::time::sleep(Duration::from_millis(millis)).await;
        }
    }
}

// ============================================================================
// Tickets
// ============================================================================

#[derive(Debug, Default)]
struct TicketTables {
    tickets: HashMap<TicketId, (u64, Ticket)>,
    comments: Vec<Comment>,
    timeline: Vec<TimelineEntry>,
    next_seq: u64,
    next_entry_id: i64,
}

impl TicketTables {
    fn append(&mut self, entry: &NewTimelineEntry) {
        self.next_entry_id += 1;
        self.timeline
            .push(TimelineEntry::committed(self.next_entry_id, entry.clone()));
    }

    fn newest_first(&self, mut keep: impl FnMut(&Ticket) -> bool) -> Vec<Ticket> {
        let mut rows: Vec<&(u64, Ticket)> =
            self.tickets.values().filter(|(_, t)| keep(t)).collect();
        rows.sort_by(|(seq_a, a), (seq_b, b)| {
            b.created_at.cmp(&a.created_at).then(seq_b.cmp(seq_a))
        });
        rows.into_iter().map(|(_, t)| t.clone()).collect()
    }
}

/// In-memory [`TicketStore`].
#[derive(Debug, Clone, Default)]
pub struct InMemoryTicketStore {
    tables: Arc<Mutex<TicketTables>>,
    faults: Faults,
}

impl InMemoryTicketStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty store wired to `faults`.
    #[must_use]
    pub fn with_faults(faults: Faults) -> Self {
        Self {
            tables: Arc::default(),
            faults,
        }
    }

    /// Number of stored tickets.
    ///
    /// # Errors
    ///
    /// Returns [`HelpdeskError::Storage`] if the lock is poisoned.
    pub fn ticket_count(&self) -> Result<usize> {
        Ok(lock(&self.tables)?.tickets.len())
    }

    /// Number of stored timeline entries across all tickets.
    ///
    /// # Errors
    ///
    /// Returns [`HelpdeskError::Storage`] if the lock is poisoned.
    pub fn timeline_len(&self) -> Result<usize> {
        Ok(lock(&self.tables)?.timeline.len())
    }
}

impl TicketStore for InMemoryTicketStore {
    async fn insert_ticket(&self, ticket: &Ticket, entry: &NewTimelineEntry) -> Result<()> {
        self.faults.before_write().await?;
        let mut tables = lock(&self.tables)?;
        if tables.tickets.contains_key(&ticket.id) {
            return Err(HelpdeskError::Storage(format!(
                "duplicate ticket id {}",
                ticket.id
            )));
        }
        tables.next_seq += 1;
        let seq = tables.next_seq;
        tables.tickets.insert(ticket.id, (seq, ticket.clone()));
        tables.append(entry);
        Ok(())
    }

    async fn get_ticket(&self, id: TicketId) -> Result<Option<Ticket>> {
        self.faults.before_read().await?;
        let tables = lock(&self.tables)?;
        Ok(tables.tickets.get(&id).map(|(_, t)| t.clone()))
    }

    async fn list_tickets(&self, search: Option<&str>) -> Result<Vec<Ticket>> {
        self.faults.before_read().await?;
        let tables = lock(&self.tables)?;
        Ok(tables.newest_first(|ticket| {
            search.is_none_or(|query| {
                let comments = tables
                    .comments
                    .iter()
                    .filter(|c| c.ticket_id == ticket.id)
                    .map(|c| c.text.as_str());
                matches_search(
                    query,
                    [ticket.title.as_str(), ticket.description.as_str()]
                        .into_iter()
                        .chain(comments),
                )
            })
        }))
    }

    async fn list_breached(&self, now: DateTime<Utc>) -> Result<Vec<Ticket>> {
        self.faults.before_read().await?;
        let tables = lock(&self.tables)?;
        Ok(tables.newest_first(|t| !t.is_closed() && sla::is_breached(t.sla_deadline, now)))
    }

    async fn compare_and_update(
        &self,
        expected_version: u64,
        updated: &Ticket,
        entry: &NewTimelineEntry,
    ) -> Result<Option<Ticket>> {
        self.faults.before_write().await?;
        let mut tables = lock(&self.tables)?;
        let Some((_, current)) = tables.tickets.get_mut(&updated.id) else {
            return Ok(None);
        };
        if current.version != expected_version {
            return Ok(None);
        }
        *current = updated.clone();
        let stored = current.clone();
        tables.append(entry);
        Ok(Some(stored))
    }

    async fn insert_comment(&self, comment: &Comment, entry: &NewTimelineEntry) -> Result<()> {
        self.faults.before_write().await?;
        let mut tables = lock(&self.tables)?;
        if !tables.tickets.contains_key(&comment.ticket_id) {
            return Err(HelpdeskError::not_found("Ticket", comment.ticket_id));
        }
        tables.comments.push(comment.clone());
        tables.append(entry);
        Ok(())
    }

    async fn get_comment(&self, id: CommentId) -> Result<Option<Comment>> {
        self.faults.before_read().await?;
        let tables = lock(&self.tables)?;
        Ok(tables.comments.iter().find(|c| c.id == id).cloned())
    }

    async fn list_comments(&self, ticket_id: TicketId) -> Result<Vec<Comment>> {
        self.faults.before_read().await?;
        let tables = lock(&self.tables)?;
        // Stable sort keeps insertion order for equal timestamps.
        let mut comments: Vec<Comment> = tables
            .comments
            .iter()
            .filter(|c| c.ticket_id == ticket_id)
            .cloned()
            .collect();
        comments.sort_by_key(|c| c.created_at);
        Ok(comments)
    }

    async fn list_timeline(&self, ticket_id: TicketId) -> Result<Vec<TimelineEntry>> {
        self.faults.before_read().await?;
        let tables = lock(&self.tables)?;
        let mut entries: Vec<TimelineEntry> = tables
            .timeline
            .iter()
            .filter(|e| e.ticket_id == ticket_id)
            .cloned()
            .collect();
        entries.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(entries)
    }
}

// ============================================================================
// Idempotency
// ============================================================================

/// In-memory [`IdempotencyStore`].
#[derive(Debug, Clone, Default)]
pub struct InMemoryIdempotencyStore {
    records: Arc<Mutex<HashMap<(UserId, String), IdempotencyRecord>>>,
    faults: Faults,
}

impl InMemoryIdempotencyStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty store wired to `faults`.
    #[must_use]
    pub fn with_faults(faults: Faults) -> Self {
        Self {
            records: Arc::default(),
            faults,
        }
    }

    /// Number of stored records, live or expired.
    ///
    /// # Errors
    ///
    /// Returns [`HelpdeskError::Storage`] if the lock is poisoned.
    pub fn len(&self) -> Result<usize> {
        Ok(lock(&self.records)?.len())
    }

    /// Whether no record is stored.
    ///
    /// # Errors
    ///
    /// Returns [`HelpdeskError::Storage`] if the lock is poisoned.
    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }
}

impl IdempotencyStore for InMemoryIdempotencyStore {
    async fn reserve(&self, record: &IdempotencyRecord) -> Result<Reservation> {
        self.faults.before_write().await?;
        let mut records = lock(&self.records)?;
        let slot = (record.user_id, record.key.as_str().to_string());
        if let Some(existing) = records
            .get(&slot)
            .filter(|existing| existing.is_live(record.created_at))
        {
            return Ok(existing
                .response
                .clone()
                .map_or(Reservation::InProgress, Reservation::Completed));
        }
        records.insert(slot, record.clone());
        Ok(Reservation::Acquired)
    }

    async fn complete(&self, record: &IdempotencyRecord) -> Result<bool> {
        self.faults.before_write().await?;
        let mut records = lock(&self.records)?;
        let slot = (record.user_id, record.key.as_str().to_string());
        match records.get_mut(&slot) {
            Some(existing) if existing.is_pending() && existing.created_at == record.created_at => {
                *existing = record.clone();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn release(&self, record: &IdempotencyRecord) -> Result<()> {
        self.faults.before_write().await?;
        let mut records = lock(&self.records)?;
        let slot = (record.user_id, record.key.as_str().to_string());
        if records
            .get(&slot)
            .is_some_and(|existing| existing.is_pending() && existing.created_at == record.created_at)
        {
            records.remove(&slot);
        }
        Ok(())
    }

    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<u64> {
        self.faults.before_write().await?;
        let mut records = lock(&self.records)?;
        let before = records.len();
        records.retain(|_, r| r.is_live(now));
        Ok(u64::try_from(before - records.len()).unwrap_or(u64::MAX))
    }
}

// ============================================================================
// Rate windows
// ============================================================================

/// In-memory [`RateWindowStore`].
#[derive(Debug, Clone, Default)]
pub struct InMemoryRateWindowStore {
    windows: Arc<Mutex<HashMap<String, RateWindow>>>,
    faults: Faults,
}

impl InMemoryRateWindowStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty store wired to `faults`.
    #[must_use]
    pub fn with_faults(faults: Faults) -> Self {
        Self {
            windows: Arc::default(),
            faults,
        }
    }

    /// Forget every window.
    ///
    /// # Errors
    ///
    /// Returns [`HelpdeskError::Storage`] if the lock is poisoned.
    pub fn reset(&self) -> Result<()> {
        lock(&self.windows)?.clear();
        Ok(())
    }
}

impl RateWindowStore for InMemoryRateWindowStore {
    async fn admit(
        &self,
        key: &str,
        now: DateTime<Utc>,
        window: Duration,
        limit: u32,
    ) -> Result<WindowDecision> {
        self.faults.before_write().await?;
        let mut windows = lock(&self.windows)?;
        let decision = windows
            .entry(key.to_string())
            .or_default()
            .admit(now, window, limit);
        tracing::debug!(
            key = %key,
            count = decision.count,
            admitted = decision.admitted,
            "In-memory rate window check"
        );
        Ok(decision)
    }
}

// ============================================================================
// Users
// ============================================================================

/// In-memory [`UserDirectory`].
#[derive(Debug, Clone, Default)]
pub struct InMemoryUserDirectory {
    users: Arc<Mutex<HashMap<UserId, User>>>,
    faults: Faults,
}

impl InMemoryUserDirectory {
    /// Create an empty directory.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a directory holding `users`.
    #[must_use]
    pub fn with_users(users: impl IntoIterator<Item = User>) -> Self {
        Self {
            users: Arc::new(Mutex::new(users.into_iter().map(|u| (u.id, u)).collect())),
            faults: Faults::default(),
        }
    }

    /// Wire the directory to `faults`.
    #[must_use]
    pub fn with_faults(mut self, faults: Faults) -> Self {
        self.faults = faults;
        self
    }

    /// Register a user.
    ///
    /// # Errors
    ///
    /// Returns [`HelpdeskError::Storage`] if the lock is poisoned.
    pub fn insert(&self, user: User) -> Result<()> {
        lock(&self.users)?.insert(user.id, user);
        Ok(())
    }
}

impl UserDirectory for InMemoryUserDirectory {
    async fn get_user(&self, id: UserId) -> Result<Option<User>> {
        self.faults.before_read().await?;
        Ok(lock(&self.users)?.get(&id).cloned())
    }

    async fn list_by_role(&self, role: Role) -> Result<Vec<User>> {
        self.faults.before_read().await?;
        let mut users: Vec<User> = lock(&self.users)?
            .values()
            .filter(|u| u.role == role)
            .cloned()
            .collect();
        users.sort_by(|a, b| a.username.cmp(&b.username));
        Ok(users)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::test_clock;
    use helpdesk_core::environment::Clock;
    use helpdesk_core::{IdempotencyKey, Priority, Status, StoredResponse};

    fn ticket(at: DateTime<Utc>) -> Ticket {
        Ticket {
            id: TicketId::new(),
            title: "Laptop".to_string(),
            description: "Battery swollen".to_string(),
            priority: Priority::High,
            status: Status::Open,
            created_by: UserId::new(),
            assignee: None,
            sla_deadline: sla::deadline(Priority::High, at),
            version: 1,
            created_at: at,
            updated_at: at,
        }
    }

    fn entry(ticket: &Ticket, action: &str) -> NewTimelineEntry {
        NewTimelineEntry {
            ticket_id: ticket.id,
            action: action.to_string(),
            metadata: serde_json::Value::Null,
            created_at: ticket.updated_at,
        }
    }

    #[tokio::test]
    async fn compare_and_update_rejects_wrong_version() {
        let store = InMemoryTicketStore::new();
        let original = ticket(test_clock().now());
        store
            .insert_ticket(&original, &entry(&original, "created"))
            .await
            .unwrap();

        let mut next = original.clone();
        next.version = 2;
        assert!(
            store
                .compare_and_update(7, &next, &entry(&next, "updated"))
                .await
                .unwrap()
                .is_none()
        );
        assert!(
            store
                .compare_and_update(1, &next, &entry(&next, "updated"))
                .await
                .unwrap()
                .is_some()
        );
        assert_eq!(store.timeline_len().unwrap(), 2);
    }

    #[tokio::test]
    async fn failed_write_leaves_no_trace() {
        let faults = Faults::new();
        let store = InMemoryTicketStore::with_faults(faults.clone());
        let t = ticket(test_clock().now());
        faults.set_fail_writes(true);

        assert!(store.insert_ticket(&t, &entry(&t, "created")).await.is_err());
        assert_eq!(store.ticket_count().unwrap(), 0);
        assert_eq!(store.timeline_len().unwrap(), 0);
    }

    #[tokio::test]
    async fn listing_is_newest_first() {
        let store = InMemoryTicketStore::new();
        let older = ticket(test_clock().now());
        let newer = ticket(test_clock().now() + chrono::Duration::minutes(1));
        store.insert_ticket(&older, &entry(&older, "created")).await.unwrap();
        store.insert_ticket(&newer, &entry(&newer, "created")).await.unwrap();

        let listed = store.list_tickets(None).await.unwrap();
        assert_eq!(listed[0].id, newer.id);
        assert_eq!(listed[1].id, older.id);
    }

    #[tokio::test]
    async fn idempotency_reservation_lifecycle() {
        let store = InMemoryIdempotencyStore::new();
        let now = test_clock().now();
        let user_id = UserId::new();
        let key = IdempotencyKey::parse("k1").unwrap();
        let pending = IdempotencyRecord::pending(
            user_id,
            key.clone(),
            now,
            now + chrono::Duration::seconds(60),
        );
        let response = StoredResponse {
            status: 201,
            body: "first".to_string(),
        };

        assert_eq!(store.reserve(&pending).await.unwrap(), Reservation::Acquired);
        assert_eq!(store.reserve(&pending).await.unwrap(), Reservation::InProgress);

        let done = pending.completed(response.clone(), now + chrono::Duration::hours(24));
        assert!(store.complete(&done).await.unwrap());
        // Completing twice finds no pending reservation.
        assert!(!store.complete(&done).await.unwrap());
        assert_eq!(
            store.reserve(&pending).await.unwrap(),
            Reservation::Completed(response)
        );

        let later = now + chrono::Duration::hours(25);
        assert_eq!(store.purge_expired(later).await.unwrap(), 1);
        assert!(store.is_empty().unwrap());
    }

    #[tokio::test]
    async fn released_or_lapsed_reservations_free_the_key() {
        let store = InMemoryIdempotencyStore::new();
        let now = test_clock().now();
        let user_id = UserId::new();
        let key = IdempotencyKey::parse("k2").unwrap();
        let lease = chrono::Duration::seconds(60);
        let first = IdempotencyRecord::pending(user_id, key.clone(), now, now + lease);

        assert_eq!(store.reserve(&first).await.unwrap(), Reservation::Acquired);
        store.release(&first).await.unwrap();
        assert!(store.is_empty().unwrap());

        assert_eq!(store.reserve(&first).await.unwrap(), Reservation::Acquired);
        let after_lease = now + chrono::Duration::seconds(61);
        let second = IdempotencyRecord::pending(user_id, key, after_lease, after_lease + lease);
        assert_eq!(store.reserve(&second).await.unwrap(), Reservation::Acquired);

        // The first holder can neither complete nor release the new reservation.
        let late = first.completed(
            StoredResponse {
                status: 201,
                body: "late".to_string(),
            },
            now + chrono::Duration::hours(24),
        );
        assert!(!store.complete(&late).await.unwrap());
        store.release(&first).await.unwrap();
        assert_eq!(store.reserve(&second).await.unwrap(), Reservation::InProgress);
    }
}
