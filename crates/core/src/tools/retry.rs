//! Per-call timeout plus retry with exponential backoff for capability calls.

use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RetryPolicy {
    /// Total attempts including the first
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    /// Deadline for a single attempt
    pub call_timeout_secs: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 500,
            max_delay_ms: 8_000,
            call_timeout_secs: 60,
        }
    }
}

impl RetryPolicy {
    /// Backoff before retry number `attempt` (0-based): base * 2^attempt, capped
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1u64 << attempt.min(16);
        Duration::from_millis(
            self.base_delay_ms
                .saturating_mul(factor)
                .min(self.max_delay_ms),
        )
    }
}

/// Errors that know whether another attempt may succeed
pub trait Retryable: Sized {
    fn is_retryable(&self) -> bool;

    /// The error to report when an attempt exceeds its deadline
    fn timed_out(after_secs: u64) -> Self;
}

/// Run `op` until it succeeds, fails permanently, or attempts run out.
/// Each attempt gets its own timeout, which counts as a retryable failure.
pub async fn with_retry<T, E, F, Fut>(policy: &RetryPolicy, label: &str, mut op: F) -> Result<T, E>
where
    E: Retryable + std::fmt::Display,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let attempts = policy.max_attempts.max(1);
    let deadline = Duration::from_secs(policy.call_timeout_secs);
    let mut attempt = 0;

    loop {
        let result = match tokio::time::timeout(deadline, op()).await {
            Ok(result) => result,
            Err(_) => Err(E::timed_out(policy.call_timeout_secs)),
        };

        match result {
            Ok(value) => return Ok(value),
            Err(err) if err.is_retryable() && attempt + 1 < attempts => {
                let wait = policy.backoff(attempt);
                tracing::info!(
                    call = label,
                    attempt = attempt + 1,
                    max_attempts = attempts,
                    backoff_ms = wait.as_millis() as u64,
                    error = %err,
                    "Retrying after transient error"
                );
                tokio::time::sleep(wait).await;
                attempt += 1;
            }
            Err(err) => {
                tracing::warn!(
                    call = label,
                    attempts = attempt + 1,
                    error = %err,
                    "Giving up"
                );
                return Err(err);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RetrievalError;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            base_delay_ms: 0,
            max_delay_ms: 0,
            call_timeout_secs: 5,
        }
    }

    #[test]
    fn test_backoff_is_capped() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.backoff(0), Duration::from_millis(500));
        assert_eq!(policy.backoff(2), Duration::from_millis(2_000));
        assert_eq!(policy.backoff(10), Duration::from_millis(8_000));
    }

    #[tokio::test]
    async fn test_gives_up_after_max_attempts() {
        let calls = AtomicU32::new(0);
        let result: Result<(), RetrievalError> = with_retry(&fast(), "search", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(RetrievalError::Transient("503".into())) }
        })
        .await;

        assert_eq!(result, Err(RetrievalError::Transient("503".into())));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_recovers_after_transient_failure() {
        let calls = AtomicU32::new(0);
        let result = with_retry(&fast(), "search", || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n == 0 {
                    Err(RetrievalError::Transient("reset".into()))
                } else {
                    Ok(n)
                }
            }
        })
        .await;
        assert_eq!(tokio_test::assert_ok!(result), 1);
    }

    #[tokio::test]
    async fn test_permanent_error_is_not_retried() {
        let calls = AtomicU32::new(0);
        let result: Result<(), RetrievalError> = with_retry(&fast(), "search", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(RetrievalError::Rejected("blocked".into())) }
        })
        .await;
        let err = tokio_test::assert_err!(result);
        assert!(matches!(err, RetrievalError::Rejected(_)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_counts_as_retryable() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy {
            max_attempts: 2,
            call_timeout_secs: 1,
            ..fast()
        };
        let result: Result<(), RetrievalError> = with_retry(&policy, "search", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async {
                tokio::time::sleep(Duration::from_secs(10)).await;
                Ok(())
            }
        })
        .await;
        assert_eq!(result, Err(RetrievalError::Timeout(1)));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
