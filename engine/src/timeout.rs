//! Bounded storage calls.

use helpdesk_core::error::{HelpdeskError, Result};
use std::future::Future;
use std::time::Duration;

/// Puts a deadline on storage futures.
///
/// An elapsed deadline becomes [`HelpdeskError::Timeout`], which callers may
/// retry. The inner future is dropped, so a write that did not reach its
/// commit point is rolled back by the store.
#[derive(Debug, Clone, Copy)]
pub struct StorageGuard {
    limit: Duration,
}

impl StorageGuard {
    /// Guard calls with `limit`.
    #[must_use]
    pub const fn new(limit: Duration) -> Self {
        Self { limit }
    }

    /// The configured limit.
    #[must_use]
    pub const fn limit(&self) -> Duration {
        self.limit
    }

    /// Await `call`, giving up after the configured limit.
    ///
    /// # Errors
    ///
    /// Returns [`HelpdeskError::Timeout`] if the limit elapses, otherwise
    /// whatever `call` returns.
    pub async fn run<T, F>(&self, operation: &'static str, call: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        match tokio::time::timeout(self.limit, call).await {
            Ok(result) => result,
            Err(_) => {
                tracing::warn!(
                    operation,
                    timeout_ms = u64::try_from(self.limit.as_millis()).unwrap_or(u64::MAX),
                    "Storage call timed out"
                );
                metrics::counter!("storage.timeouts", "operation" => operation).increment(1);
                Err(HelpdeskError::Timeout(self.limit))
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn slow_call_times_out() {
        let guard = StorageGuard::new(Duration::from_millis(50));
        let result: Result<()> = guard
            .run("slow", async {
                tokio::time::sleep(Duration::from_secs(1)).await;
                Ok(())
            })
            .await;
        assert_eq!(result, Err(HelpdeskError::Timeout(Duration::from_millis(50))));
        assert!(result.unwrap_err().is_retryable());
    }

    #[tokio::test]
    async fn fast_call_passes_through() {
        let guard = StorageGuard::new(Duration::from_secs(1));
        assert_eq!(guard.run("fast", async { Ok(7) }).await.unwrap(), 7);

        let failed: Result<()> = guard
            .run("failing", async { Err(HelpdeskError::Storage("down".into())) })
            .await;
        assert!(matches!(failed, Err(HelpdeskError::Storage(_))));
    }
}
