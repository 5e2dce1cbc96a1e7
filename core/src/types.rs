//! Domain types for the helpdesk ticket engine.
//!
//! Identifiers, users and roles, tickets, comments, timeline entries and
//! idempotency records. Everything here is plain data: the policies that
//! act on it live in [`crate::sla`], [`crate::access`] and [`crate::window`].

use crate::error::{HelpdeskError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

// ============================================================================
// Identifiers
// ============================================================================

/// Unique identifier for a user (agent, admin or end user).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(Uuid);

impl UserId {
    /// Creates a new random `UserId`
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Create a `UserId` from a `Uuid`
    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Get the inner UUID
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for UserId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unique identifier for a ticket
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TicketId(Uuid);

impl TicketId {
    /// Creates a new random `TicketId`
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Create a `TicketId` from a `Uuid`
    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Get the inner UUID
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for TicketId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TicketId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unique identifier for a comment
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CommentId(Uuid);

impl CommentId {
    /// Creates a new random `CommentId`
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Create a `CommentId` from a `Uuid`
    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Get the inner UUID
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for CommentId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for CommentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ============================================================================
// Users and roles
// ============================================================================

/// Role of a user. Determines what the access policy lets them see and do.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// End user: sees only tickets they created.
    #[default]
    User,
    /// Support agent: sees tickets they created or are assigned to.
    Agent,
    /// Administrator: unrestricted.
    Admin,
}

impl Role {
    /// Convert role to its storage representation.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Agent => "agent",
            Self::Admin => "admin",
        }
    }

    /// Parse role from its storage representation.
    ///
    /// # Errors
    ///
    /// Returns [`HelpdeskError::Validation`] if the string is not a known role.
    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "user" => Ok(Self::User),
            "agent" => Ok(Self::Agent),
            "admin" => Ok(Self::Admin),
            _ => Err(HelpdeskError::validation(format!("Invalid role: {s}"))),
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A registered user, as known to the user directory.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    /// User ID
    pub id: UserId,
    /// Display name
    pub username: String,
    /// Email address (unique)
    pub email: String,
    /// Role
    pub role: Role,
}

impl User {
    /// The identity this user acts under.
    #[must_use]
    pub const fn identity(&self) -> Identity {
        Identity::new(self.id, self.role)
    }
}

/// The authenticated caller of an engine operation.
///
/// Authentication happens outside the engine; by the time an `Identity`
/// exists the role has been resolved from the user directory.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Identity {
    /// Who is calling
    pub user_id: UserId,
    /// Their role
    pub role: Role,
}

impl Identity {
    /// Create a new identity.
    #[must_use]
    pub const fn new(user_id: UserId, role: Role) -> Self {
        Self { user_id, role }
    }

    /// Whether this identity has the admin role.
    #[must_use]
    pub const fn is_admin(&self) -> bool {
        matches!(self.role, Role::Admin)
    }
}

// ============================================================================
// Tickets
// ============================================================================

/// Ticket priority. Drives the SLA deadline.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    /// 72 hour SLA
    #[default]
    Low,
    /// 48 hour SLA
    Medium,
    /// 24 hour SLA
    High,
}

impl Priority {
    /// Convert priority to its storage representation.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        }
    }

    /// Parse priority from its storage representation.
    ///
    /// # Errors
    ///
    /// Returns [`HelpdeskError::Validation`] if the string is not a known priority.
    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "low" => Ok(Self::Low),
            "medium" => Ok(Self::Medium),
            "high" => Ok(Self::High),
            _ => Err(HelpdeskError::validation(format!("Invalid priority: {s}"))),
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Ticket lifecycle status. Tickets are never deleted, only closed.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    /// Newly created
    #[default]
    Open,
    /// Being worked on
    InProgress,
    /// Resolved
    Closed,
}

impl Status {
    /// Convert status to its storage representation.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::InProgress => "in_progress",
            Self::Closed => "closed",
        }
    }

    /// Parse status from its storage representation.
    ///
    /// # Errors
    ///
    /// Returns [`HelpdeskError::Validation`] if the string is not a known status.
    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "open" => Ok(Self::Open),
            "in_progress" => Ok(Self::InProgress),
            "closed" => Ok(Self::Closed),
            _ => Err(HelpdeskError::validation(format!("Invalid status: {s}"))),
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A support ticket.
///
/// # Invariants
///
/// - `sla_deadline` is set once at creation and never recomputed.
/// - `version` starts at 1 and grows by exactly 1 per successful mutation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ticket {
    /// Ticket ID
    pub id: TicketId,
    /// Short summary
    pub title: String,
    /// Full description
    pub description: String,
    /// Priority
    pub priority: Priority,
    /// Lifecycle status
    pub status: Status,
    /// Who opened the ticket
    pub created_by: UserId,
    /// Agent working the ticket, if any
    pub assignee: Option<UserId>,
    /// Resolution deadline, frozen at creation
    pub sla_deadline: DateTime<Utc>,
    /// Optimistic concurrency version
    pub version: u64,
    /// Creation time
    pub created_at: DateTime<Utc>,
    /// Last mutation time
    pub updated_at: DateTime<Utc>,
}

impl Ticket {
    /// Whether the ticket is closed.
    #[must_use]
    pub const fn is_closed(&self) -> bool {
        matches!(self.status, Status::Closed)
    }
}

/// Fields supplied when opening a ticket.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewTicket {
    /// Short summary
    pub title: String,
    /// Full description
    pub description: String,
    /// Priority (defaults to low)
    #[serde(default)]
    pub priority: Priority,
}

impl NewTicket {
    /// Check the fields are acceptable for a new ticket.
    ///
    /// # Errors
    ///
    /// Returns [`HelpdeskError::Validation`] for an empty or over-long title
    /// or an empty description.
    pub fn validate(&self) -> Result<()> {
        validate_title(&self.title)?;
        validate_description(&self.description)
    }
}

/// Partial update of a ticket's editable fields.
///
/// `None` leaves a field untouched. Creator, SLA deadline and assignee are
/// not editable through this path.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TicketPatch {
    /// New title
    #[serde(default)]
    pub title: Option<String>,
    /// New description
    #[serde(default)]
    pub description: Option<String>,
    /// New priority (does not move the SLA deadline)
    #[serde(default)]
    pub priority: Option<Priority>,
    /// New status
    #[serde(default)]
    pub status: Option<Status>,
}

impl TicketPatch {
    /// Whether the patch touches no field at all.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.title.is_none()
            && self.description.is_none()
            && self.priority.is_none()
            && self.status.is_none()
    }

    /// Names of the fields this patch sets.
    #[must_use]
    pub fn changed_fields(&self) -> Vec<&'static str> {
        let mut fields = Vec::with_capacity(4);
        if self.title.is_some() {
            fields.push("title");
        }
        if self.description.is_some() {
            fields.push("description");
        }
        if self.priority.is_some() {
            fields.push("priority");
        }
        if self.status.is_some() {
            fields.push("status");
        }
        fields
    }

    /// Check the patch is non-empty and every supplied field is valid.
    ///
    /// # Errors
    ///
    /// Returns [`HelpdeskError::Validation`] if nothing would change or a
    /// supplied title/description is invalid.
    pub fn validate(&self) -> Result<()> {
        if self.is_empty() {
            return Err(HelpdeskError::validation("Update must change at least one field"));
        }
        if let Some(title) = &self.title {
            validate_title(title)?;
        }
        if let Some(description) = &self.description {
            validate_description(description)?;
        }
        Ok(())
    }

    /// Write the supplied fields onto `ticket`.
    pub fn apply_to(&self, ticket: &mut Ticket) {
        if let Some(title) = &self.title {
            ticket.title = title.trim().to_string();
        }
        if let Some(description) = &self.description {
            ticket.description.clone_from(description);
        }
        if let Some(priority) = self.priority {
            ticket.priority = priority;
        }
        if let Some(status) = self.status {
            ticket.status = status;
        }
    }
}

/// Maximum title length, in characters.
pub const MAX_TITLE_LEN: usize = 255;

fn validate_title(title: &str) -> Result<()> {
    let trimmed = title.trim();
    if trimmed.is_empty() {
        return Err(HelpdeskError::validation("Title must not be empty"));
    }
    if trimmed.chars().count() > MAX_TITLE_LEN {
        return Err(HelpdeskError::validation(format!(
            "Title must be at most {MAX_TITLE_LEN} characters"
        )));
    }
    Ok(())
}

fn validate_description(description: &str) -> Result<()> {
    if description.trim().is_empty() {
        return Err(HelpdeskError::validation("Description must not be empty"));
    }
    Ok(())
}

/// The state of a ticket a client last observed.
///
/// Clients send it back with an update; a mismatch with the stored ticket
/// means someone else changed it in between.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VersionToken {
    /// The ticket's `version` counter
    Version(u64),
    /// The ticket's `updated_at` timestamp
    UpdatedAt(DateTime<Utc>),
}

impl VersionToken {
    /// Pick a token from what a client supplied. `version` wins over
    /// `updated_at` when both are present.
    #[must_use]
    pub fn from_parts(version: Option<u64>, updated_at: Option<DateTime<Utc>>) -> Option<Self> {
        version
            .map(Self::Version)
            .or_else(|| updated_at.map(Self::UpdatedAt))
    }

    /// Whether this token describes the current state of `ticket`.
    #[must_use]
    pub fn matches(&self, ticket: &Ticket) -> bool {
        match self {
            Self::Version(version) => *version == ticket.version,
            Self::UpdatedAt(updated_at) => *updated_at == ticket.updated_at,
        }
    }
}

impl fmt::Display for VersionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Version(version) => write!(f, "version {version}"),
            Self::UpdatedAt(updated_at) => write!(f, "updated_at {}", updated_at.to_rfc3339()),
        }
    }
}

// ============================================================================
// Comments
// ============================================================================

/// A comment on a ticket, optionally replying to another comment on the
/// same ticket.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Comment {
    /// Comment ID
    pub id: CommentId,
    /// Ticket the comment belongs to
    pub ticket_id: TicketId,
    /// Author
    pub author: UserId,
    /// Body
    pub text: String,
    /// Comment this one replies to
    pub parent: Option<CommentId>,
    /// Creation time
    pub created_at: DateTime<Utc>,
}

/// Fields supplied when commenting.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewComment {
    /// Body
    pub text: String,
    /// Comment being replied to
    #[serde(default)]
    pub parent: Option<CommentId>,
}

impl NewComment {
    /// Check the comment body is not blank.
    ///
    /// # Errors
    ///
    /// Returns [`HelpdeskError::Validation`] for blank text.
    pub fn validate(&self) -> Result<()> {
        if self.text.trim().is_empty() {
            return Err(HelpdeskError::validation("Comment text must not be empty"));
        }
        Ok(())
    }
}

// ============================================================================
// Timeline (audit trail)
// ============================================================================

/// An audit record about to be written alongside the mutation it describes.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NewTimelineEntry {
    /// Ticket the entry belongs to
    pub ticket_id: TicketId,
    /// Action tag, e.g. `created`
    pub action: String,
    /// Snapshot of the action
    pub metadata: serde_json::Value,
    /// When the action happened
    pub created_at: DateTime<Utc>,
}

/// A committed, immutable audit record.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TimelineEntry {
    /// Insertion sequence, breaks ties between equal timestamps
    pub id: i64,
    /// Ticket the entry belongs to
    pub ticket_id: TicketId,
    /// Action tag, e.g. `created`
    pub action: String,
    /// Snapshot of the action
    pub metadata: serde_json::Value,
    /// When the action happened
    pub created_at: DateTime<Utc>,
}

impl TimelineEntry {
    /// Attach a sequence number to a pending entry.
    #[must_use]
    pub fn committed(id: i64, entry: NewTimelineEntry) -> Self {
        Self {
            id,
            ticket_id: entry.ticket_id,
            action: entry.action,
            metadata: entry.metadata,
            created_at: entry.created_at,
        }
    }
}

// ============================================================================
// Idempotency
// ============================================================================

/// Maximum idempotency key length, in characters.
pub const MAX_IDEMPOTENCY_KEY_LEN: usize = 255;

/// A client-supplied key deduplicating a mutating request.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IdempotencyKey(String);

impl IdempotencyKey {
    /// Validate and wrap a raw key.
    ///
    /// # Errors
    ///
    /// Returns [`HelpdeskError::Validation`] if the key is blank or longer
    /// than [`MAX_IDEMPOTENCY_KEY_LEN`] characters.
    pub fn parse(raw: &str) -> Result<Self> {
        let key = raw.trim();
        if key.is_empty() {
            return Err(HelpdeskError::validation("Idempotency-Key must not be empty"));
        }
        if key.chars().count() > MAX_IDEMPOTENCY_KEY_LEN {
            return Err(HelpdeskError::validation(format!(
                "Idempotency-Key must be at most {MAX_IDEMPOTENCY_KEY_LEN} characters"
            )));
        }
        Ok(Self(key.to_string()))
    }

    /// The key as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for IdempotencyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The response produced the first time an idempotency key was used.
///
/// `body` holds the exact serialized bytes so replays are byte-identical.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredResponse {
    /// HTTP status code
    pub status: u16,
    /// Serialized JSON body
    pub body: String,
}

/// A stored idempotency record, unique per `(user_id, key)`.
///
/// A record without a response is a reservation: the first request is still
/// running its mutation. Reservations expire after a short lease so a
/// request that died mid-flight does not lock the key for the whole TTL.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdempotencyRecord {
    /// Caller the key belongs to
    pub user_id: UserId,
    /// Client key
    pub key: IdempotencyKey,
    /// First response, `None` while the first request is in flight
    pub response: Option<StoredResponse>,
    /// When the key was reserved; identifies the reservation
    pub created_at: DateTime<Utc>,
    /// When the record stops being honoured
    pub expires_at: DateTime<Utc>,
}

impl IdempotencyRecord {
    /// A reservation for `(user_id, key)` held until `lease_until`.
    #[must_use]
    pub const fn pending(
        user_id: UserId,
        key: IdempotencyKey,
        now: DateTime<Utc>,
        lease_until: DateTime<Utc>,
    ) -> Self {
        Self {
            user_id,
            key,
            response: None,
            created_at: now,
            expires_at: lease_until,
        }
    }

    /// This reservation completed with `response`, honoured until `expires_at`.
    #[must_use]
    pub fn completed(&self, response: StoredResponse, expires_at: DateTime<Utc>) -> Self {
        Self {
            response: Some(response),
            expires_at,
            ..self.clone()
        }
    }

    /// Whether the record is still honoured at `now`.
    #[must_use]
    pub fn is_live(&self, now: DateTime<Utc>) -> bool {
        now < self.expires_at
    }

    /// Whether the first request is still running.
    #[must_use]
    pub const fn is_pending(&self) -> bool {
        self.response.is_none()
    }
}

/// Outcome of trying to reserve an idempotency key.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Reservation {
    /// The caller holds the key and must complete or release it.
    Acquired,
    /// Another request holds a live reservation on the key.
    InProgress,
    /// The key was already used; this is the response to replay.
    Completed(StoredResponse),
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn ticket() -> Ticket {
        let at = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
        Ticket {
            id: TicketId::new(),
            title: "Printer on fire".to_string(),
            description: "Third floor".to_string(),
            priority: Priority::High,
            status: Status::Open,
            created_by: UserId::new(),
            assignee: None,
            sla_deadline: at,
            version: 3,
            created_at: at,
            updated_at: at,
        }
    }

    #[test]
    fn enums_round_trip_through_storage_strings() {
        for role in [Role::User, Role::Agent, Role::Admin] {
            assert_eq!(Role::parse(role.as_str()).unwrap(), role);
        }
        for status in [Status::Open, Status::InProgress, Status::Closed] {
            assert_eq!(Status::parse(status.as_str()).unwrap(), status);
        }
        assert!(Priority::parse("urgent").is_err());
    }

    #[test]
    fn status_serializes_snake_case() {
        let json = serde_json::to_string(&Status::InProgress).unwrap();
        assert_eq!(json, "\"in_progress\"");
    }

    #[test]
    fn new_ticket_defaults_to_low_priority() {
        let parsed: NewTicket =
            serde_json::from_str(r#"{"title":"t","description":"d"}"#).unwrap();
        assert_eq!(parsed.priority, Priority::Low);
    }

    #[test]
    fn title_validation() {
        let mut new = NewTicket {
            title: "   ".to_string(),
            description: "d".to_string(),
            priority: Priority::Low,
        };
        assert!(new.validate().is_err());

        new.title = "x".repeat(MAX_TITLE_LEN + 1);
        assert!(new.validate().is_err());

        new.title = "x".repeat(MAX_TITLE_LEN);
        assert!(new.validate().is_ok());
    }

    #[test]
    fn empty_patch_is_rejected() {
        assert!(TicketPatch::default().validate().is_err());
    }

    #[test]
    fn patch_applies_only_supplied_fields() {
        let mut t = ticket();
        let original = t.clone();
        let patch = TicketPatch {
            status: Some(Status::Closed),
            ..TicketPatch::default()
        };

        patch.apply_to(&mut t);

        assert_eq!(t.status, Status::Closed);
        assert_eq!(t.title, original.title);
        assert_eq!(t.sla_deadline, original.sla_deadline);
        assert_eq!(patch.changed_fields(), vec!["status"]);
    }

    #[test]
    fn version_token_prefers_version() {
        let t = ticket();
        let token = VersionToken::from_parts(Some(3), Some(t.updated_at + chrono::Duration::hours(1)));
        assert_eq!(token, Some(VersionToken::Version(3)));
        assert!(token.unwrap().matches(&t));
        assert!(VersionToken::from_parts(None, None).is_none());
    }

    #[test]
    fn updated_at_token_compares_exactly() {
        let t = ticket();
        assert!(VersionToken::UpdatedAt(t.updated_at).matches(&t));
        assert!(!VersionToken::UpdatedAt(t.updated_at + chrono::Duration::microseconds(1)).matches(&t));
    }

    #[test]
    fn idempotency_key_bounds() {
        assert!(IdempotencyKey::parse("").is_err());
        assert!(IdempotencyKey::parse(&"k".repeat(MAX_IDEMPOTENCY_KEY_LEN + 1)).is_err());
        assert_eq!(IdempotencyKey::parse(" abc ").unwrap().as_str(), "abc");
    }
}
