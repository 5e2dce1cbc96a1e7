//! `PostgreSQL` user directory.

use helpdesk_core::error::{HelpdeskError, Result};
use helpdesk_core::store::UserDirectory;
use helpdesk_core::{Role, User, UserId};
use sqlx::PgPool;
use uuid::Uuid;

#[derive(sqlx::FromRow)]
struct UserRow {
    id: Uuid,
    username: String,
    email: String,
    role: String,
}

impl TryFrom<UserRow> for User {
    type Error = HelpdeskError;

    fn try_from(row: UserRow) -> Result<Self> {
        Ok(Self {
            id: UserId::from_uuid(row.id),
            username: row.username,
            email: row.email,
            role: Role::parse(&row.role).map_err(|e| HelpdeskError::storage("Corrupt user row", e))?,
        })
    }
}

/// `PostgreSQL`-backed [`UserDirectory`].
///
/// Accounts are provisioned by the identity provider; [`upsert_user`]
/// mirrors them into the local table.
///
/// [`upsert_user`]: PostgresUserDirectory::upsert_user
#[derive(Clone, Debug)]
pub struct PostgresUserDirectory {
    pool: PgPool,
}

impl PostgresUserDirectory {
    /// Create a directory over an existing pool.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Insert a user, or refresh the name, email and role of an existing one.
    ///
    /// # Errors
    ///
    /// Returns [`HelpdeskError::Storage`] if the write fails.
    pub async fn upsert_user(&self, user: &User) -> Result<()> {
        sqlx::query(
            r"
            INSERT INTO users (id, username, email, role)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (id) DO UPDATE
            SET username = EXCLUDED.username, email = EXCLUDED.email, role = EXCLUDED.role
            ",
        )
        .bind(user.id.as_uuid())
        .bind(&user.username)
        .bind(&user.email)
        .bind(user.role.as_str())
        .execute(&self.pool)
        .await
        .map_err(|e| HelpdeskError::storage("Failed to upsert user", e))?;
        Ok(())
    }
}

impl UserDirectory for PostgresUserDirectory {
    async fn get_user(&self, id: UserId) -> Result<Option<User>> {
        let row: Option<UserRow> =
            sqlx::query_as("SELECT id, username, email, role FROM users WHERE id = $1")
                .bind(id.as_uuid())
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| HelpdeskError::storage("Failed to load user", e))?;
        row.map(User::try_from).transpose()
    }

    async fn list_by_role(&self, role: Role) -> Result<Vec<User>> {
        let rows: Vec<UserRow> = sqlx::query_as(
            "SELECT id, username, email, role FROM users WHERE role = $1 ORDER BY username",
        )
        .bind(role.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| HelpdeskError::storage("Failed to list users", e))?;
        rows.into_iter().map(User::try_from).collect()
    }
}
