//! Timeout + single bounded retry around any suspension point
//!
//! Every external call (inference, retrieval backends, rerank) goes through
//! [`call_with_retry`]. Each attempt is bounded by a timeout, transient
//! failures get exactly one retry after a jittered backoff, and the caller's
//! cancellation token aborts both the attempt and the backoff sleep.

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::{Error, Result};

/// Retry and timeout settings for external calls
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Upper bound on a single attempt
    pub attempt_timeout_ms: u64,
    /// Base delay before the retry
    pub backoff_ms: u64,
    /// Cap on the delay, including server-suggested waits
    pub max_backoff_ms: u64,
    /// Total attempts, including the first
    pub max_attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempt_timeout_ms: 10_000,
            backoff_ms: 200,
            max_backoff_ms: 2_000,
            max_attempts: 2,
        }
    }
}

impl RetryPolicy {
    pub fn attempt_timeout(&self) -> Duration {
        Duration::from_millis(self.attempt_timeout_ms)
    }

    /// Policy with a different per-attempt timeout
    pub fn with_attempt_timeout(mut self, timeout: Duration) -> Self {
        self.attempt_timeout_ms = timeout.as_millis() as u64;
        self
    }

    /// Delay before attempt `attempt + 1`
    pub fn backoff_for(&self, attempt: u32, error: &Error) -> Duration {
        let base = self
            .backoff_ms
            .saturating_mul(2u64.saturating_pow(attempt.saturating_sub(1)));
        let suggested = match error {
            Error::RateLimited(secs) => secs.saturating_mul(1000),
            _ => 0,
        };
        let delay = base.max(suggested).min(self.max_backoff_ms);

        // up to 10% jitter
        let jitter = delay / 10;
        let jitter = if jitter > 0 {
            rand::thread_rng().gen_range(0..=jitter)
        } else {
            0
        };
        Duration::from_millis(delay + jitter)
    }
}

/// Run `op` with a per-attempt timeout and one retry on transient errors.
///
/// Returns [`Error::Cancelled`] as soon as `token` fires.
pub async fn call_with_retry<T, F, Fut>(
    policy: &RetryPolicy,
    token: &CancellationToken,
    label: &str,
    mut op: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 0;

    loop {
        attempt += 1;

        let result = tokio::select! {
            _ = token.cancelled() => return Err(Error::Cancelled),
            outcome = tokio::time::timeout(policy.attempt_timeout(), op()) => match outcome {
                Ok(result) => result,
                Err(_) => Err(Error::BackendTimeout(format!(
                    "{} exceeded {} ms",
                    label, policy.attempt_timeout_ms
                ))),
            },
        };

        match result {
            Ok(value) => {
                if attempt > 1 {
                    debug!(call = label, attempt = attempt, "Call succeeded after retry");
                }
                return Ok(value);
            }
            Err(e) if e.is_retryable() && attempt < max_attempts => {
                let backoff = policy.backoff_for(attempt, &e);
                warn!(
                    call = label,
                    attempt = attempt,
                    wait_ms = backoff.as_millis() as u64,
                    error = %e,
                    "Transient failure, retrying after backoff"
                );
                tokio::select! {
                    _ = token.cancelled() => return Err(Error::Cancelled),
                    _ = tokio::time::sleep(backoff) => {}
                }
            }
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast_policy() -> RetryPolicy {
        RetryPolicy {
            attempt_timeout_ms: 50,
            backoff_ms: 1,
            max_backoff_ms: 5,
            max_attempts: 2,
        }
    }

    #[tokio::test]
    async fn test_retries_once_then_succeeds() {
        let calls = Arc::new(AtomicU32::new(0));
        let token = CancellationToken::new();
        let c = calls.clone();
        let result = call_with_retry(&fast_policy(), &token, "flaky", || {
            let c = c.clone();
            async move {
                if c.fetch_add(1, Ordering::SeqCst) == 0 {
                    Err(Error::BackendUnavailable("first".into()))
                } else {
                    Ok(42)
                }
            }
        })
        .await;
        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_gives_up_after_second_failure() {
        let calls = Arc::new(AtomicU32::new(0));
        let token = CancellationToken::new();
        let c = calls.clone();
        let result: Result<()> = call_with_retry(&fast_policy(), &token, "down", || {
            let c = c.clone();
            async move {
                c.fetch_add(1, Ordering::SeqCst);
                Err(Error::BackendUnavailable("down".into()))
            }
        })
        .await;
        assert!(matches!(result, Err(Error::BackendUnavailable(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_validation_errors_not_retried() {
        let calls = Arc::new(AtomicU32::new(0));
        let token = CancellationToken::new();
        let c = calls.clone();
        let result: Result<()> = call_with_retry(&fast_policy(), &token, "bad", || {
            let c = c.clone();
            async move {
                c.fetch_add(1, Ordering::SeqCst);
                Err(Error::Validation("nope".into()))
            }
        })
        .await;
        assert!(matches!(result, Err(Error::Validation(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_slow_attempt_times_out() {
        let token = CancellationToken::new();
        let result: Result<()> = call_with_retry(&fast_policy(), &token, "slow", || async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(())
        })
        .await;
        assert!(matches!(result, Err(Error::BackendTimeout(_))));
    }

    #[tokio::test]
    async fn test_cancelled_token_short_circuits() {
        let token = CancellationToken::new();
        token.cancel();
        let result: Result<()> = call_with_retry(&fast_policy(), &token, "cancelled", || async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(())
        })
        .await;
        assert!(matches!(result, Err(Error::Cancelled)));
    }

    #[test]
    fn test_backoff_is_capped() {
        let policy = fast_policy();
        let delay = policy.backoff_for(1, &Error::RateLimited(60));
        assert!(delay <= Duration::from_millis(policy.max_backoff_ms * 11 / 10 + 1));
    }
}
