//! A standard cast of users and an in-memory backend holding them.

use crate::stores::{
    Faults, InMemoryIdempotencyStore, InMemoryRateWindowStore, InMemoryTicketStore,
    InMemoryUserDirectory,
};
use helpdesk_core::store::Stores;
use helpdesk_core::{Identity, Role, User, UserId};

/// Backend made of in-memory stores.
pub type InMemoryBackend = Stores<
    InMemoryTicketStore,
    InMemoryIdempotencyStore,
    InMemoryUserDirectory,
    InMemoryRateWindowStore,
>;

/// Five users covering every role, two of each non-admin role.
#[derive(Debug, Clone)]
pub struct TestUsers {
    /// `admin`
    pub admin: User,
    /// `alice`, an agent
    pub agent: User,
    /// `bob`, an agent
    pub other_agent: User,
    /// `carol`, an end user
    pub user: User,
    /// `dave`, an end user
    pub other_user: User,
}

fn user(username: &str, role: Role) -> User {
    User {
        id: UserId::new(),
        username: username.to_string(),
        email: format!("{username}@example.com"),
        role,
    }
}

impl TestUsers {
    /// Fresh users with random IDs.
    #[must_use]
    pub fn new() -> Self {
        Self {
            admin: user("admin", Role::Admin),
            agent: user("alice", Role::Agent),
            other_agent: user("bob", Role::Agent),
            user: user("carol", Role::User),
            other_user: user("dave", Role::User),
        }
    }

    /// Every user.
    #[must_use]
    pub fn all(&self) -> Vec<User> {
        vec![
            self.admin.clone(),
            self.agent.clone(),
            self.other_agent.clone(),
            self.user.clone(),
            self.other_user.clone(),
        ]
    }

    /// Identity of the admin.
    #[must_use]
    pub const fn admin_id(&self) -> Identity {
        self.admin.identity()
    }

    /// A directory holding every user.
    #[must_use]
    pub fn directory(&self) -> InMemoryUserDirectory {
        InMemoryUserDirectory::with_users(self.all())
    }

    /// An empty backend whose directory holds every user.
    #[must_use]
    pub fn backend(&self) -> InMemoryBackend {
        self.backend_with_faults(&Faults::new())
    }

    /// Like [`backend`](Self::backend), with every store wired to `faults`.
    #[must_use]
    pub fn backend_with_faults(&self, faults: &Faults) -> InMemoryBackend {
        Stores::new(
            InMemoryTicketStore::with_faults(faults.clone()),
            InMemoryIdempotencyStore::with_faults(faults.clone()),
            self.directory().with_faults(faults.clone()),
            InMemoryRateWindowStore::with_faults(faults.clone()),
        )
    }
}

impl Default for TestUsers {
    fn default() -> Self {
        Self::new()
    }
}
