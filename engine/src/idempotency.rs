//! Idempotency cache for mutating requests.
//!
//! A request carrying a key reserves `(user, key)` before the mutation runs.
//! If a finished record exists its response is replayed verbatim and the
//! mutation never runs. If another request holds the reservation, this one
//! is turned away with a retryable error. Otherwise the mutation runs and
//! the reservation is completed with its response, or released if it failed.
//!
//! Completing is best effort: the mutation has already committed, so a
//! failed write is logged and the fresh response is still returned. The
//! reservation then lapses after [`PENDING_LEASE`].

use crate::timeout::StorageGuard;
use chrono::{DateTime, Utc};
use helpdesk_core::error::{HelpdeskError, Result};
use helpdesk_core::store::IdempotencyStore;
use helpdesk_core::{IdempotencyKey, IdempotencyRecord, Reservation, StoredResponse, UserId};
use std::time::Duration;

/// How long a reservation blocks its key if the request holding it never
/// completes or releases it.
pub const PENDING_LEASE: Duration = Duration::from_secs(60);

/// What to do with a mutating request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Claim {
    /// Answer with this stored response; do not run the mutation.
    Replay(StoredResponse),
    /// Run the mutation. Carries the reservation when a key was given.
    Proceed(Option<IdempotencyRecord>),
}

/// Deduplicates mutating requests per `(user, key)`.
#[derive(Debug, Clone)]
pub struct IdempotencyCache<I> {
    store: I,
    ttl: Duration,
    guard: StorageGuard,
}

fn after(now: DateTime<Utc>, span: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(span)
        .ok()
        .and_then(|span| now.checked_add_signed(span))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

impl<I: IdempotencyStore> IdempotencyCache<I> {
    /// Create a cache over `store` keeping records for `ttl`.
    #[must_use]
    pub fn new(store: I, ttl: Duration, guard: StorageGuard) -> Self {
        Self {
            store,
            ttl,
            guard,
        }
    }

    /// Reserve `key` for `user_id`, or find the response to replay.
    ///
    /// Without a key the cache is not engaged and the mutation proceeds.
    ///
    /// # Errors
    ///
    /// - [`HelpdeskError::IdempotencyInProgress`] if another request holds
    ///   the key
    /// - [`HelpdeskError::Storage`] or [`HelpdeskError::Timeout`] if the
    ///   reservation fails
    pub async fn before_mutate(
        &self,
        user_id: UserId,
        key: Option<&IdempotencyKey>,
        now: DateTime<Utc>,
    ) -> Result<Claim> {
        let Some(key) = key else {
            return Ok(Claim::Proceed(None));
        };
        let pending = IdempotencyRecord::pending(user_id, key.clone(), now, after(now, PENDING_LEASE));
        match self
            .guard
            .run("idempotency_reserve", self.store.reserve(&pending))
            .await?
        {
            Reservation::Acquired => Ok(Claim::Proceed(Some(pending))),
            Reservation::Completed(prior) => {
                tracing::info!(user_id = %user_id, key = %key, "Replaying idempotent response");
                metrics::counter!("idempotency.replays").increment(1);
                Ok(Claim::Replay(prior))
            }
            Reservation::InProgress => {
                tracing::info!(
                    user_id = %user_id,
                    key = %key,
                    "Idempotency key held by a request still in flight"
                );
                metrics::counter!("idempotency.in_progress").increment(1);
                Err(HelpdeskError::IdempotencyInProgress {
                    key: key.to_string(),
                })
            }
        }
    }

    /// Store `response` under the reservation. A no-op without one.
    pub async fn after_mutate(
        &self,
        reservation: Option<&IdempotencyRecord>,
        response: &StoredResponse,
    ) {
        let Some(pending) = reservation else {
            return;
        };
        let record = pending.completed(response.clone(), after(pending.created_at, self.ttl));
        match self
            .guard
            .run("idempotency_complete", self.store.complete(&record))
            .await
        {
            Ok(true) => {
                tracing::debug!(user_id = %record.user_id, key = %record.key, "Stored idempotent response");
            }
            Ok(false) => {
                tracing::warn!(
                    user_id = %record.user_id,
                    key = %record.key,
                    "Idempotency reservation lapsed before the response was stored"
                );
                metrics::counter!("idempotency.lost_races").increment(1);
            }
            Err(e) => {
                tracing::error!(
                    user_id = %record.user_id,
                    key = %record.key,
                    error = %e,
                    "Failed to store idempotent response"
                );
                metrics::counter!("idempotency.store_failures").increment(1);
            }
        }
    }

    /// Give the key back after a failed mutation so a retry can run it.
    pub async fn abandon(&self, reservation: Option<&IdempotencyRecord>) {
        let Some(pending) = reservation else {
            return;
        };
        if let Err(e) = self
            .guard
            .run("idempotency_release", self.store.release(pending))
            .await
        {
            tracing::warn!(
                user_id = %pending.user_id,
                key = %pending.key,
                error = %e,
                "Failed to release idempotency reservation"
            );
        }
    }

    /// Drop records that expired at or before `now`.
    ///
    /// # Errors
    ///
    /// Returns [`HelpdeskError::Storage`] or [`HelpdeskError::Timeout`] if
    /// the delete fails.
    pub async fn purge_expired(&self, now: DateTime<Utc>) -> Result<u64> {
        let purged = self
            .guard
            .run("idempotency_purge", self.store.purge_expired(now))
            .await?;
        if purged > 0 {
            tracing::info!(purged, "Purged expired idempotency records");
        }
        Ok(purged)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;
    use helpdesk_core::environment::Clock;
    use helpdesk_testing::{Faults, InMemoryIdempotencyStore, test_clock};

    fn cache(store: InMemoryIdempotencyStore) -> IdempotencyCache<InMemoryIdempotencyStore> {
        IdempotencyCache::new(
            store,
            Duration::from_secs(3600),
            StorageGuard::new(Duration::from_secs(1)),
        )
    }

    fn response(body: &str) -> StoredResponse {
        StoredResponse {
            status: 201,
            body: body.to_string(),
        }
    }

    fn reservation(claim: Claim) -> IdempotencyRecord {
        match claim {
            Claim::Proceed(Some(pending)) => pending,
            other => panic!("expected a reservation, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn no_key_means_not_engaged() {
        let store = InMemoryIdempotencyStore::new();
        let cache = cache(store.clone());
        let now = test_clock().now();

        assert_eq!(
            cache.before_mutate(UserId::new(), None, now).await.unwrap(),
            Claim::Proceed(None)
        );
        cache.after_mutate(None, &response("{}")).await;
        assert!(store.is_empty().unwrap());
    }

    #[tokio::test]
    async fn stored_response_is_replayed_until_expiry() {
        let cache = cache(InMemoryIdempotencyStore::new());
        let user = UserId::new();
        let key = IdempotencyKey::parse("retry-1").unwrap();
        let now = test_clock().now();

        let pending = reservation(cache.before_mutate(user, Some(&key), now).await.unwrap());
        cache.after_mutate(Some(&pending), &response("{\"a\":1}")).await;

        assert_eq!(
            cache.before_mutate(user, Some(&key), now).await.unwrap(),
            Claim::Replay(response("{\"a\":1}"))
        );

        // Keys are scoped per user.
        assert!(matches!(
            cache.before_mutate(UserId::new(), Some(&key), now).await.unwrap(),
            Claim::Proceed(Some(_))
        ));

        let expired = now + chrono::Duration::hours(2);
        assert!(matches!(
            cache.before_mutate(user, Some(&key), expired).await.unwrap(),
            Claim::Proceed(Some(_))
        ));
    }

    #[tokio::test]
    async fn held_key_turns_concurrent_requests_away() {
        let cache = cache(InMemoryIdempotencyStore::new());
        let user = UserId::new();
        let key = IdempotencyKey::parse("once").unwrap();
        let now = test_clock().now();

        let pending = reservation(cache.before_mutate(user, Some(&key), now).await.unwrap());
        let err = cache.before_mutate(user, Some(&key), now).await.unwrap_err();
        assert_eq!(err.code(), "IDEMPOTENCY_IN_PROGRESS");
        assert!(err.is_retryable());

        // A released key can be taken again.
        cache.abandon(Some(&pending)).await;
        assert!(matches!(
            cache.before_mutate(user, Some(&key), now).await.unwrap(),
            Claim::Proceed(Some(_))
        ));
    }

    #[tokio::test]
    async fn abandoned_lease_lapses() {
        let cache = cache(InMemoryIdempotencyStore::new());
        let user = UserId::new();
        let key = IdempotencyKey::parse("crashed").unwrap();
        let now = test_clock().now();

        reservation(cache.before_mutate(user, Some(&key), now).await.unwrap());
        let after_lease = now + chrono::Duration::from_std(PENDING_LEASE).unwrap();
        assert!(matches!(
            cache.before_mutate(user, Some(&key), after_lease).await.unwrap(),
            Claim::Proceed(Some(_))
        ));
    }

    #[tokio::test]
    async fn store_failure_is_not_fatal() {
        let faults = Faults::new();
        let cache = cache(InMemoryIdempotencyStore::with_faults(faults.clone()));
        let key = IdempotencyKey::parse("k").unwrap();
        let pending = reservation(
            cache
                .before_mutate(UserId::new(), Some(&key), test_clock().now())
                .await
                .unwrap(),
        );
        faults.set_fail_writes(true);

        // Neither call returns an error or panics.
        cache.after_mutate(Some(&pending), &response("{}")).await;
        cache.abandon(Some(&pending)).await;
    }
}
