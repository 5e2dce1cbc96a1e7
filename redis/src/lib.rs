//! Redis-backed rate limit windows.
//!
//! Shares one sliding window per caller across every server instance.
//!
//! # Algorithm
//!
//! Each caller's window is a sorted set scored by admission time in
//! milliseconds. A single Lua script, executed atomically by Redis:
//!
//! 1. Removes entries at or before `now - window` (`ZREMRANGEBYSCORE`)
//! 2. Counts what remains (`ZCARD`)
//! 3. Records the request (`ZADD`) only when the count is below the limit
//! 4. Refreshes the key TTL to the window length (`PEXPIRE`)
//!
//! Rejected requests never enter the set, so a caller hammering a full
//! window does not extend their own lockout.

use chrono::{DateTime, Utc};
use helpdesk_core::error::{HelpdeskError, Result};
use helpdesk_core::store::RateWindowStore;
use helpdesk_core::window::WindowDecision;
use redis::Client;
use redis::aio::ConnectionManager;
use std::time::Duration;

const ADMIT_SCRIPT: &str = r"
local key = KEYS[1]
local now = tonumber(ARGV[1])
local window = tonumber(ARGV[2])
local limit = tonumber(ARGV[3])

redis.call('ZREMRANGEBYSCORE', key, '-inf', now - window)
local count = redis.call('ZCARD', key)
local admitted = 0
if count < limit then
    redis.call('ZADD', key, now, ARGV[4])
    count = count + 1
    admitted = 1
end
redis.call('PEXPIRE', key, window)

local oldest = redis.call('ZRANGE', key, 0, 0, 'WITHSCORES')
local oldest_ms = -1
if oldest[2] then
    oldest_ms = tonumber(oldest[2])
end
return {admitted, count, oldest_ms}
";

/// [`RateWindowStore`] on Redis sorted sets.
#[derive(Clone)]
pub struct RedisRateWindowStore {
    conn_manager: ConnectionManager,
    script: redis::Script,
}

impl std::fmt::Debug for RedisRateWindowStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisRateWindowStore").finish_non_exhaustive()
    }
}

impl RedisRateWindowStore {
    /// Wrap an existing connection manager.
    #[must_use]
    pub fn new(conn_manager: ConnectionManager) -> Self {
        Self {
            conn_manager,
            script: redis::Script::new(ADMIT_SCRIPT),
        }
    }

    /// Connect to Redis at `redis_url`.
    ///
    /// # Errors
    ///
    /// Returns [`HelpdeskError::Storage`] if the client cannot be created or
    /// the first connection fails.
    pub async fn connect(redis_url: &str) -> Result<Self> {
        let client = Client::open(redis_url)
            .map_err(|e| HelpdeskError::storage("Failed to create Redis client", e))?;
        let conn_manager = ConnectionManager::new(client)
            .await
            .map_err(|e| HelpdeskError::storage("Failed to connect to Redis", e))?;
        Ok(Self::new(conn_manager))
    }

    fn window_key(key: &str) -> String {
        format!("helpdesk:{key}")
    }
}

impl RateWindowStore for RedisRateWindowStore {
    async fn admit(
        &self,
        key: &str,
        now: DateTime<Utc>,
        window: Duration,
        limit: u32,
    ) -> Result<WindowDecision> {
        let mut conn = self.conn_manager.clone();
        let now_ms = now.timestamp_millis();
        let window_ms = i64::try_from(window.as_millis())
            .map_err(|e| HelpdeskError::storage("Rate limit window out of range", e))?;
        let member = format!("{now_ms}-{}", uuid::Uuid::new_v4());

        let (admitted, count, oldest_ms): (i64, i64, i64) = self
            .script
            .key(Self::window_key(key))
            .arg(now_ms)
            .arg(window_ms)
            .arg(limit)
            .arg(member)
            .invoke_async(&mut conn)
            .await
            .map_err(|e| {
                tracing::error!(error = %e, key = %key, "Redis rate limit script failed");
                HelpdeskError::storage("Failed to check rate limit", e)
            })?;

        let count = u32::try_from(count)
            .map_err(|e| HelpdeskError::storage("Corrupt rate limit count", e))?;
        let oldest = if oldest_ms < 0 {
            None
        } else {
            DateTime::from_timestamp_millis(oldest_ms)
        };

        tracing::debug!(key = %key, admitted = admitted == 1, count, limit, "Rate limit window checked");

        Ok(WindowDecision {
            admitted: admitted == 1,
            count,
            oldest,
        })
    }
}
