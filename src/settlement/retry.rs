//! Bounded retry for transient database conflicts.
//!
//! Settlement transactions contend on the platform wallet row; deadlock and
//! serialization failures are retried a bounded number of times. Business
//! failures (missing purchase, invalid state, insufficient hold) are
//! permanent for the invocation and are never retried.

use std::future::Future;
use std::time::Duration;

use tracing::warn;

use crate::error::{AppError, AppResult, SettlementError};

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff: Duration::from_millis(50),
        }
    }
}

/// Transient errors are worth re-running the whole transaction for:
/// PostgreSQL serialization failures (40001), deadlocks (40P01), and pool
/// acquisition timeouts.
pub fn is_transient(error: &AppError) -> bool {
    match error {
        AppError::Database(sqlx::Error::Database(db)) => {
            matches!(db.code().as_deref(), Some("40001") | Some("40P01"))
        }
        AppError::Database(sqlx::Error::PoolTimedOut) => true,
        _ => false,
    }
}

/// Run `operation` until it succeeds, fails permanently, or exhausts the
/// policy. Exhaustion surfaces as `ConcurrencyConflict` so callers can tell
/// "retry later" apart from a real settlement failure.
pub async fn with_retry<T, F, Fut>(
    operation: &str,
    policy: &RetryPolicy,
    mut run: F,
) -> AppResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = AppResult<T>>,
{
    let mut attempt: u32 = 0;
    loop {
        attempt += 1;
        match run().await {
            Ok(value) => return Ok(value),
            Err(error) if is_transient(&error) => {
                if attempt >= policy.max_attempts {
                    return Err(SettlementError::ConcurrencyConflict {
                        attempts: attempt,
                        message: error.to_string(),
                    }
                    .into());
                }
                warn!(
                    "Transient conflict in {} (attempt {}/{}): {}",
                    operation, attempt, policy.max_attempts, error
                );
                tokio::time::sleep(policy.backoff * attempt).await;
            }
            Err(error) => return Err(error),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[test]
    fn business_failures_are_not_transient() {
        assert!(!is_transient(&AppError::NotFound("purchase".into())));
        assert!(!is_transient(&AppError::InvalidInput("amount".into())));
        assert!(!is_transient(&AppError::Settlement(
            SettlementError::InvalidState {
                entity: "Purchase",
                current: "Pending".into(),
                expected: "Completed".into(),
            }
        )));
    }

    #[test]
    fn pool_timeout_is_transient() {
        assert!(is_transient(&AppError::Database(sqlx::Error::PoolTimedOut)));
    }

    #[tokio::test]
    async fn permanent_failure_runs_exactly_once() {
        let calls = Cell::new(0u32);
        let result: AppResult<()> = with_retry("test", &RetryPolicy::default(), || {
            calls.set(calls.get() + 1);
            async { Err(AppError::NotFound("purchase".into())) }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(calls.get(), 1);
    }

    #[tokio::test]
    async fn transient_failure_retries_until_exhaustion() {
        let policy = RetryPolicy {
            max_attempts: 3,
            backoff: Duration::from_millis(1),
        };
        let calls = Cell::new(0u32);
        let result: AppResult<()> = with_retry("test", &policy, || {
            calls.set(calls.get() + 1);
            async { Err(AppError::Database(sqlx::Error::PoolTimedOut)) }
        })
        .await;

        assert_eq!(calls.get(), 3);
        assert!(matches!(
            result,
            Err(AppError::Settlement(
                SettlementError::ConcurrencyConflict { attempts: 3, .. }
            ))
        ));
    }

    #[tokio::test]
    async fn transient_failure_recovers() {
        let policy = RetryPolicy {
            max_attempts: 3,
            backoff: Duration::from_millis(1),
        };
        let calls = Cell::new(0u32);
        let result = with_retry("test", &policy, || {
            calls.set(calls.get() + 1);
            let attempt = calls.get();
            async move {
                if attempt < 2 {
                    Err(AppError::Database(sqlx::Error::PoolTimedOut))
                } else {
                    Ok(attempt)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 2);
    }
}
