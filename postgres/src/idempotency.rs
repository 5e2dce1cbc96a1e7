//! `PostgreSQL` idempotency store.
//!
//! Records are unique per `(user_id, key)`. A reservation is a single
//! `INSERT ... ON CONFLICT` statement, so concurrent first uses of a key
//! race inside the database and exactly one of them gets the row. An
//! expired row (a finished record past its TTL or a lapsed reservation) is
//! overwritten in place by the next reservation.

use chrono::{DateTime, Utc};
use helpdesk_core::error::{HelpdeskError, Result};
use helpdesk_core::store::IdempotencyStore;
use helpdesk_core::{IdempotencyRecord, Reservation, StoredResponse};
use sqlx::PgPool;

/// `PostgreSQL`-backed [`IdempotencyStore`].
#[derive(Clone, Debug)]
pub struct PostgresIdempotencyStore {
    pool: PgPool,
}

impl PostgresIdempotencyStore {
    /// Create a store over an existing pool.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

impl IdempotencyStore for PostgresIdempotencyStore {
    async fn reserve(&self, record: &IdempotencyRecord) -> Result<Reservation> {
        let inserted = sqlx::query(
            r"
            INSERT INTO idempotency_keys (user_id, key, status_code, body, created_at, expires_at)
            VALUES ($1, $2, NULL, NULL, $3, $4)
            ON CONFLICT (user_id, key) DO UPDATE
            SET status_code = NULL,
                body = NULL,
                created_at = EXCLUDED.created_at,
                expires_at = EXCLUDED.expires_at
            WHERE idempotency_keys.expires_at <= EXCLUDED.created_at
            ",
        )
        .bind(record.user_id.as_uuid())
        .bind(record.key.as_str())
        .bind(record.created_at)
        .bind(record.expires_at)
        .execute(&self.pool)
        .await
        .map_err(|e| HelpdeskError::storage("Failed to reserve idempotency key", e))?;

        if inserted.rows_affected() == 1 {
            return Ok(Reservation::Acquired);
        }

        let existing: Option<(Option<i32>, Option<String>)> = sqlx::query_as(
            r"
            SELECT status_code, body
            FROM idempotency_keys
            WHERE user_id = $1 AND key = $2
            ",
        )
        .bind(record.user_id.as_uuid())
        .bind(record.key.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| HelpdeskError::storage("Failed to read idempotency key", e))?;

        // A row released between the two statements reads as still in
        // flight; the client's retry will reserve it.
        match existing {
            Some((Some(status), Some(body))) => {
                let status = u16::try_from(status)
                    .map_err(|e| HelpdeskError::storage("Corrupt idempotency status", e))?;
                Ok(Reservation::Completed(StoredResponse { status, body }))
            }
            _ => Ok(Reservation::InProgress),
        }
    }

    async fn complete(&self, record: &IdempotencyRecord) -> Result<bool> {
        let Some(response) = &record.response else {
            return Err(HelpdeskError::Storage(
                "Cannot complete an idempotency record without a response".into(),
            ));
        };
        let result = sqlx::query(
            r"
            UPDATE idempotency_keys
            SET status_code = $3, body = $4, expires_at = $5
            WHERE user_id = $1 AND key = $2 AND created_at = $6 AND status_code IS NULL
            ",
        )
        .bind(record.user_id.as_uuid())
        .bind(record.key.as_str())
        .bind(i32::from(response.status))
        .bind(&response.body)
        .bind(record.expires_at)
        .bind(record.created_at)
        .execute(&self.pool)
        .await
        .map_err(|e| HelpdeskError::storage("Failed to store idempotency response", e))?;

        Ok(result.rows_affected() == 1)
    }

    async fn release(&self, record: &IdempotencyRecord) -> Result<()> {
        sqlx::query(
            r"
            DELETE FROM idempotency_keys
            WHERE user_id = $1 AND key = $2 AND created_at = $3 AND status_code IS NULL
            ",
        )
        .bind(record.user_id.as_uuid())
        .bind(record.key.as_str())
        .bind(record.created_at)
        .execute(&self.pool)
        .await
        .map_err(|e| HelpdeskError::storage("Failed to release idempotency key", e))?;
        Ok(())
    }

    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query("DELETE FROM idempotency_keys WHERE expires_at <= $1")
            .bind(now)
            .execute(&self.pool)
            .await
            .map_err(|e| HelpdeskError::storage("Failed to purge idempotency keys", e))?;

        let purged = result.rows_affected();
        metrics::counter!("idempotency.purged").increment(purged);
        Ok(purged)
    }
}
