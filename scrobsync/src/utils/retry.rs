//! Retry with exponential backoff
//!
//! Used by the outbound relay (remote transport failures) and by listen
//! persistence (transient SQLite lock contention).
//!
//! **Algorithm:**
//! 1. Attempt operation
//! 2. If successful, return result
//! 3. If the error is retryable and attempts remain: log WARN, back off, retry
//! 4. If the error is retryable and the budget is spent: log ERROR, give up
//! 5. Any other error is returned immediately
//!
//! Delays start at `initial_delay` and double after each failure, capped at
//! `max_delay`. Cancellation interrupts both the operation and the backoff.

use scrobsync_common::config::RelayConfig;
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Attempt budget and delay curve
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    /// Total attempts including the first one
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
}

impl BackoffPolicy {
    /// Policy for SQLite `database is locked` errors
    pub const DATABASE_LOCK: BackoffPolicy = BackoffPolicy {
        max_attempts: 8,
        initial_delay: Duration::from_millis(10),
        max_delay: Duration::from_millis(1000),
    };

    /// Delay to wait after the given failed attempt (1-based)
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        self.initial_delay
            .saturating_mul(1u32 << exponent)
            .min(self.max_delay)
    }
}

impl From<&RelayConfig> for BackoffPolicy {
    fn from(config: &RelayConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            initial_delay: Duration::from_millis(config.initial_backoff_ms),
            max_delay: Duration::from_millis(config.max_backoff_ms),
        }
    }
}

/// Why a retried operation did not succeed
#[derive(Debug)]
pub enum RetryError<E> {
    /// Every attempt failed with a retryable error
    Exhausted { attempts: u32, last: E },
    /// Non-retryable error, returned on first occurrence
    Fatal(E),
    /// Cancellation token fired
    Cancelled,
}

impl<E> RetryError<E> {
    /// Underlying error, if the operation actually ran and failed
    pub fn into_inner(self) -> Option<E> {
        match self {
            RetryError::Exhausted { last, .. } => Some(last),
            RetryError::Fatal(err) => Some(err),
            RetryError::Cancelled => None,
        }
    }
}

/// Retry `operation` according to `policy`
///
/// # Arguments
/// * `operation_name` - Name for logging (e.g., "submit listen")
/// * `policy` - Attempt budget and backoff curve
/// * `cancel` - Aborts the in-flight attempt or the pending backoff
/// * `is_retryable` - Decides whether an error deserves another attempt
/// * `operation` - Closure producing one attempt
pub async fn retry_with_backoff<F, Fut, T, E, R>(
    operation_name: &str,
    policy: &BackoffPolicy,
    cancel: &CancellationToken,
    is_retryable: R,
    mut operation: F,
) -> Result<T, RetryError<E>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    R: Fn(&E) -> bool,
    E: std::fmt::Display,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 0;

    loop {
        attempt += 1;

        if attempt > 1 {
            tracing::debug!(operation = operation_name, attempt, "Retrying operation");
        }

        let outcome = tokio::select! {
            _ = cancel.cancelled() => return Err(RetryError::Cancelled),
            outcome = operation() => outcome,
        };

        let err = match outcome {
            Ok(result) => {
                if attempt > 1 {
                    tracing::debug!(
                        operation = operation_name,
                        attempt,
                        "Operation succeeded after retry"
                    );
                }
                return Ok(result);
            }
            Err(err) => err,
        };

        if !is_retryable(&err) {
            return Err(RetryError::Fatal(err));
        }

        if attempt >= max_attempts {
            tracing::error!(
                operation = operation_name,
                attempt,
                error = %err,
                "Operation failed: retry budget exhausted"
            );
            return Err(RetryError::Exhausted {
                attempts: attempt,
                last: err,
            });
        }

        let backoff = policy.delay_after(attempt);
        tracing::warn!(
            operation = operation_name,
            attempt,
            backoff_ms = backoff.as_millis() as u64,
            error = %err,
            "Operation failed, will retry after backoff"
        );

        tokio::select! {
            _ = cancel.cancelled() => return Err(RetryError::Cancelled),
            _ = tokio::time::sleep(backoff) => {}
        }
    }
}

/// Retry a database write while SQLite reports lock contention
pub async fn retry_on_lock<F, Fut, T>(operation_name: &str, operation: F) -> scrobsync_common::Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = scrobsync_common::Result<T>>,
{
    let never_cancelled = CancellationToken::new();

    retry_with_backoff(
        operation_name,
        &BackoffPolicy::DATABASE_LOCK,
        &never_cancelled,
        scrobsync_common::Error::is_database_locked,
        operation,
    )
    .await
    .map_err(|err| {
        err.into_inner().unwrap_or_else(|| {
            scrobsync_common::Error::Internal(format!("{} cancelled", operation_name))
        })
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast_policy(max_attempts: u32) -> BackoffPolicy {
        BackoffPolicy {
            max_attempts,
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(4),
        }
    }

    #[test]
    fn test_delay_doubles_and_caps() {
        let policy = BackoffPolicy {
            max_attempts: 10,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(1000),
        };
        assert_eq!(policy.delay_after(1), Duration::from_millis(100));
        assert_eq!(policy.delay_after(2), Duration::from_millis(200));
        assert_eq!(policy.delay_after(4), Duration::from_millis(800));
        assert_eq!(policy.delay_after(5), Duration::from_millis(1000));
        assert_eq!(policy.delay_after(60), Duration::from_millis(1000));
    }

    #[test]
    fn test_policy_from_relay_config() {
        let config = RelayConfig {
            max_attempts: 0,
            initial_backoff_ms: 5,
            max_backoff_ms: 50,
            ..RelayConfig::default()
        };
        let policy = BackoffPolicy::from(&config);
        assert_eq!(policy.max_attempts, 1);
        assert_eq!(policy.initial_delay, Duration::from_millis(5));
    }

    #[tokio::test]
    async fn test_succeeds_first_attempt() {
        let result = retry_with_backoff(
            "test_op",
            &fast_policy(3),
            &CancellationToken::new(),
            |_: &String| true,
            || async { Ok::<i32, String>(42) },
        )
        .await;

        assert_eq!(result.unwrap(), 42);
    }

    #[tokio::test]
    async fn test_succeeds_after_retryable_errors() {
        let attempts = AtomicU32::new(0);

        let result = retry_with_backoff(
            "test_op",
            &fast_policy(5),
            &CancellationToken::new(),
            |_: &String| true,
            || {
                let n = attempts.fetch_add(1, Ordering::SeqCst) + 1;
                async move {
                    if n < 3 {
                        Err("transient".to_string())
                    } else {
                        Ok(n)
                    }
                }
            },
        )
        .await;

        assert_eq!(result.unwrap(), 3);
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_exhausts_attempt_budget() {
        let attempts = AtomicU32::new(0);

        let result = retry_with_backoff(
            "test_op",
            &fast_policy(4),
            &CancellationToken::new(),
            |_: &String| true,
            || {
                attempts.fetch_add(1, Ordering::SeqCst);
                async { Err::<(), String>("down".to_string()) }
            },
        )
        .await;

        match result {
            Err(RetryError::Exhausted { attempts: n, last }) => {
                assert_eq!(n, 4);
                assert_eq!(last, "down");
            }
            other => panic!("unexpected outcome: {:?}", other),
        }
        assert_eq!(attempts.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_non_retryable_error_fails_immediately() {
        let attempts = AtomicU32::new(0);

        let result = retry_with_backoff(
            "test_op",
            &fast_policy(5),
            &CancellationToken::new(),
            |_: &String| false,
            || {
                attempts.fetch_add(1, Ordering::SeqCst);
                async { Err::<(), String>("bad request".to_string()) }
            },
        )
        .await;

        assert!(matches!(result, Err(RetryError::Fatal(_))));
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_cancellation_interrupts_backoff() {
        let cancel = CancellationToken::new();
        let policy = BackoffPolicy {
            max_attempts: 5,
            initial_delay: Duration::from_secs(3600),
            max_delay: Duration::from_secs(3600),
        };

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.cancel();
        });

        let result = retry_with_backoff(
            "test_op",
            &policy,
            &cancel,
            |_: &String| true,
            || async { Err::<(), String>("down".to_string()) },
        )
        .await;

        assert!(matches!(result, Err(RetryError::Cancelled)));
    }

    #[tokio::test]
    async fn test_retry_on_lock_passes_other_errors_through() {
        let attempts = AtomicU32::new(0);

        let result: scrobsync_common::Result<()> = retry_on_lock("test_op", || {
            attempts.fetch_add(1, Ordering::SeqCst);
            async { Err(scrobsync_common::Error::Internal("other error".to_string())) }
        })
        .await;

        assert!(matches!(result, Err(scrobsync_common::Error::Internal(_))));
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }
}
