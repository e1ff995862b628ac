//! Exponential backoff with jitter for retriable collaborator calls
//! (`spec.md` §7 "Transient" taxonomy entry). Used by both the
//! dispatcher's exchange submission step and the OCO manager's
//! sibling-cancel step, each with its own attempt budget — the spec's
//! Open Question notes those budgets need not match.

use rand::Rng;
use std::time::Duration;
use tracing::warn;

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_backoff: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_backoff: Duration) -> Self {
        Self {
            max_attempts,
            base_backoff,
        }
    }

    fn backoff_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = attempt.min(10);
        let scaled = self.base_backoff.as_millis() as u64 * 2u64.saturating_pow(exponent);
        let jitter_ms = rand::rng().random_range(0..=scaled.max(1) / 4 + 1);
        Duration::from_millis(scaled + jitter_ms)
    }
}

/// Outcome classification a retry loop needs from the wrapped operation:
/// retriable errors get backed off and retried, terminal ones stop
/// immediately (`spec.md` §4.3 step 9).
pub trait Retriable {
    fn is_retriable(&self) -> bool;
}

impl Retriable for crate::domain::errors::GatewayError {
    fn is_retriable(&self) -> bool {
        self.is_retriable()
    }
}

/// Runs `op` up to `policy.max_attempts` times, sleeping with
/// exponential backoff + jitter between retriable failures. Returns the
/// last error once the budget is exhausted.
pub async fn retry_with_backoff<F, Fut, T, E>(
    policy: RetryPolicy,
    label: &str,
    mut op: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, E>>,
    E: Retriable,
{
    let mut attempt = 0;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_retriable() && attempt + 1 < policy.max_attempts => {
                let backoff = policy.backoff_for_attempt(attempt);
                warn!(
                    op = label,
                    attempt = attempt + 1,
                    max_attempts = policy.max_attempts,
                    backoff_ms = backoff.as_millis() as u64,
                    "retrying after transient failure"
                );
                tokio::time::sleep(backoff).await;
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[derive(Debug)]
    struct Flaky(bool);
    impl Retriable for Flaky {
        fn is_retriable(&self) -> bool {
            self.0
        }
    }

    #[tokio::test]
    async fn succeeds_after_transient_failures() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy::new(5, Duration::from_millis(1));

        let result: Result<u32, Flaky> = retry_with_backoff(policy, "test", || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(Flaky(true))
                } else {
                    Ok(n)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 2);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn terminal_failure_does_not_retry() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy::new(5, Duration::from_millis(1));

        let result: Result<u32, Flaky> = retry_with_backoff(policy, "test", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(Flaky(false)) }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn exhausts_attempt_budget() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy::new(3, Duration::from_millis(1));

        let result: Result<u32, Flaky> = retry_with_backoff(policy, "test", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(Flaky(true)) }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }
}
