use std::future::Future;
use std::time::Duration;

use rand::Rng;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::error::ClientError;

/// Exponential backoff with jitter and a bounded number of attempts.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub initial_delay: Duration,
    pub max_delay: Duration,
    /// Total tries including the first one.
    pub max_attempts: u32,
    /// Fraction of the delay randomly added or removed, in `0.0..=1.0`.
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(8),
            max_attempts: 5,
            jitter: 0.2,
        }
    }
}

#[derive(Debug, Error)]
pub enum RetryError {
    #[error("cancelled")]
    Cancelled,
    #[error(transparent)]
    Client(#[from] ClientError),
}

impl RetryPolicy {
    /// Delay before retry number `failures` (1 for the first retry).
    pub fn delay_for(&self, failures: u32) -> Duration {
        let exponent = failures.saturating_sub(1).min(16);
        let base = self
            .initial_delay
            .saturating_mul(1u32 << exponent)
            .min(self.max_delay);
        let jitter = self.jitter.clamp(0.0, 1.0);
        if jitter == 0.0 || base.is_zero() {
            return base;
        }
        let factor = 1.0 + rand::thread_rng().gen_range(-jitter..=jitter);
        base.mul_f64(factor).min(self.max_delay)
    }

    /// Whether another try is allowed after `failures` consecutive failures.
    pub fn allows_retry(&self, failures: u32) -> bool {
        failures < self.max_attempts.max(1)
    }

    /// Runs `operation` until it succeeds, fails with a non-retryable error, runs
    /// out of attempts, or `cancel` fires.
    pub async fn retry<T, F, Fut>(
        &self,
        operation: &'static str,
        cancel: &CancellationToken,
        mut call: F,
    ) -> Result<T, RetryError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ClientError>>,
    {
        let mut failures = 0u32;
        loop {
            let result = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(RetryError::Cancelled),
                result = call() => result,
            };
            let err = match result {
                Ok(value) => return Ok(value),
                Err(err) => err,
            };
            failures += 1;
            if !err.is_retryable() || !self.allows_retry(failures) {
                return Err(err.into());
            }
            let delay = self.delay_for(failures);
            warn!(
                operation,
                attempt = failures,
                max_attempts = self.max_attempts,
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "signaling call failed; retrying"
            );
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(RetryError::Cancelled),
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(4),
            max_attempts,
            jitter: 0.0,
        }
    }

    fn network_error() -> ClientError {
        ClientError::Network {
            operation: "test",
            reason: "connection refused".into(),
        }
    }

    #[test_timeout::timeout]
    fn delay_doubles_until_capped() {
        let policy = RetryPolicy {
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(350),
            max_attempts: 5,
            jitter: 0.0,
        };
        assert_eq!(policy.delay_for(1), Duration::from_millis(100));
        assert_eq!(policy.delay_for(2), Duration::from_millis(200));
        assert_eq!(policy.delay_for(3), Duration::from_millis(350));
        assert_eq!(policy.delay_for(40), Duration::from_millis(350));
    }

    #[test_timeout::timeout]
    fn jitter_stays_within_bounds() {
        let policy = RetryPolicy {
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(1),
            max_attempts: 5,
            jitter: 0.5,
        };
        for _ in 0..50 {
            let delay = policy.delay_for(1);
            assert!(delay >= Duration::from_millis(50) && delay <= Duration::from_millis(150));
        }
    }

    #[test_timeout::tokio_timeout_test]
    async fn transient_failures_are_retried() {
        let calls = AtomicU32::new(0);
        let cancel = CancellationToken::new();
        let value = policy(5)
            .retry("test", &cancel, || async {
                if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(network_error())
                } else {
                    Ok(7)
                }
            })
            .await
            .unwrap();
        assert_eq!(value, 7);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[test_timeout::tokio_timeout_test]
    async fn attempts_are_bounded() {
        let calls = AtomicU32::new(0);
        let cancel = CancellationToken::new();
        let result: Result<(), _> = policy(3)
            .retry("test", &cancel, || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(network_error())
            })
            .await;
        assert!(matches!(result, Err(RetryError::Client(ClientError::Network { .. }))));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[test_timeout::tokio_timeout_test]
    async fn terminal_errors_are_not_retried() {
        let calls = AtomicU32::new(0);
        let cancel = CancellationToken::new();
        let result: Result<(), _> = policy(5)
            .retry("test", &cancel, || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(ClientError::Decode {
                    operation: "test",
                    reason: "bad json".into(),
                })
            })
            .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test_timeout::tokio_timeout_test]
    async fn cancellation_stops_retrying() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let result: Result<(), _> = policy(5)
            .retry("test", &cancel, || async { Err(network_error()) })
            .await;
        assert!(matches!(result, Err(RetryError::Cancelled)));
    }
}
