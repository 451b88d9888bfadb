use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;

use crate::config::RetryConfig;
use crate::error::EngineError;

/// Decides whether and when a failed operation is attempted again.
pub trait RetryStrategy: Send + Sync {
    fn should_retry(&self, error: &EngineError) -> bool;

    /// Delay before retry number `attempt` (1-based).
    fn delay(&self, attempt: u32) -> Duration;

    /// Upper bound on retries regardless of what a caller requests.
    fn max_retries(&self) -> u32;
}

/// Retries connection-class failures with exponentially growing, capped delays.
#[derive(Debug, Clone)]
pub struct ExponentialBackoff {
    base_delay_ms: u64,
    max_delay_ms: u64,
    multiplier: f64,
    max_retries: u32,
}

impl ExponentialBackoff {
    #[must_use]
    pub fn new(config: &RetryConfig) -> Self {
        Self {
            base_delay_ms: config.base_delay_ms,
            max_delay_ms: config.max_delay_ms,
            multiplier: config.multiplier.max(1.0),
            max_retries: config.max_retries,
        }
    }
}

impl Default for ExponentialBackoff {
    fn default() -> Self {
        Self::new(&RetryConfig::default())
    }
}

impl RetryStrategy for ExponentialBackoff {
    fn should_retry(&self, error: &EngineError) -> bool {
        error.is_transient()
    }

    #[allow(
        clippy::cast_precision_loss,
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss
    )]
    fn delay(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt.saturating_sub(1)).unwrap_or(i32::MAX);
        let ms = (self.base_delay_ms as f64 * self.multiplier.powi(exponent))
            .min(self.max_delay_ms as f64);
        Duration::from_millis(ms as u64)
    }

    fn max_retries(&self) -> u32 {
        self.max_retries
    }
}

/// Run `operation`, re-running it while the strategy allows.
///
/// `retries` is the number of extra attempts requested by the caller,
/// capped at [`RetryStrategy::max_retries`].
///
/// # Errors
///
/// Returns the last error once retries are exhausted or the error is not
/// retryable.
pub async fn execute_with_retry<T, F, Fut>(
    strategy: &dyn RetryStrategy,
    retries: u32,
    operation_name: &str,
    operation: F,
) -> Result<T, EngineError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, EngineError>>,
{
    retry_loop(strategy, retries, operation_name, None, operation).await
}

/// Like [`execute_with_retry`], but no attempt starts at or after `deadline`.
///
/// A retry whose backoff would end past the deadline is not scheduled.
///
/// # Errors
///
/// Returns the last error once retries are exhausted, the error is not
/// retryable, or the deadline leaves no room for another attempt.
pub async fn execute_with_retry_until<T, F, Fut>(
    strategy: &dyn RetryStrategy,
    retries: u32,
    operation_name: &str,
    deadline: Instant,
    operation: F,
) -> Result<T, EngineError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, EngineError>>,
{
    retry_loop(strategy, retries, operation_name, Some(deadline), operation).await
}

async fn retry_loop<T, F, Fut>(
    strategy: &dyn RetryStrategy,
    retries: u32,
    operation_name: &str,
    deadline: Option<Instant>,
    mut operation: F,
) -> Result<T, EngineError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, EngineError>>,
{
    let retries = retries.min(strategy.max_retries());
    let mut attempt = 0u32;
    loop {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(e) if attempt < retries && strategy.should_retry(&e) => {
                attempt += 1;
                let delay = strategy.delay(attempt);
                if deadline.is_some_and(|d| Instant::now() + delay >= d) {
                    tracing::debug!(
                        operation = operation_name,
                        attempt,
                        error = %e,
                        "deadline leaves no room for another attempt"
                    );
                    return Err(e);
                }
                tracing::warn!(
                    operation = operation_name,
                    attempt,
                    retries,
                    delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                    error = %e,
                    "retrying after transient failure"
                );
                tokio::time::sleep(delay).await;
            }
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;
    use crate::error::DriverError;

    fn backoff() -> ExponentialBackoff {
        ExponentialBackoff::new(&RetryConfig {
            max_retries: 3,
            base_delay_ms: 100,
            max_delay_ms: 350,
            multiplier: 2.0,
        })
    }

    #[test]
    fn delays_grow_and_cap() {
        let b = backoff();
        assert_eq!(b.delay(1), Duration::from_millis(100));
        assert_eq!(b.delay(2), Duration::from_millis(200));
        assert_eq!(b.delay(3), Duration::from_millis(350));
        assert_eq!(b.delay(40), Duration::from_millis(350));
    }

    #[test]
    fn only_transient_errors_retry() {
        let b = backoff();
        assert!(b.should_retry(&EngineError::Timeout(Duration::from_secs(1))));
        assert!(b.should_retry(&EngineError::Driver(DriverError::new(-1, "connection reset"))));
        assert!(!b.should_retry(&EngineError::Driver(DriverError::new(-1004, "syntax error"))));
    }

    #[tokio::test(start_paused = true)]
    async fn retries_until_success() {
        let calls = AtomicU32::new(0);
        let out = execute_with_retry(&backoff(), 3, "test", || async {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            if n < 2 {
                Err(EngineError::Other("network unreachable".into()))
            } else {
                Ok(n)
            }
        })
        .await
        .unwrap();
        assert_eq!(out, 2);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn gives_up_after_bound() {
        let calls = AtomicU32::new(0);
        let err = execute_with_retry(&backoff(), 2, "test", || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err::<(), _>(EngineError::Other("connection refused".into()))
        })
        .await
        .unwrap_err();
        assert!(err.to_string().contains("refused"));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn requested_retries_capped_by_strategy() {
        let calls = AtomicU32::new(0);
        let _ = execute_with_retry(&backoff(), 10, "test", || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err::<(), _>(EngineError::Other("timed out".into()))
        })
        .await;
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn permanent_error_fails_fast() {
        let calls = AtomicU32::new(0);
        let _ = execute_with_retry(&backoff(), 3, "test", || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err::<(), _>(EngineError::Rejected("TRUNCATE is not allowed".into()))
        })
        .await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn no_attempt_scheduled_past_deadline() {
        let calls = AtomicU32::new(0);
        let start = Instant::now();
        let err = execute_with_retry_until(
            &backoff(),
            3,
            "test",
            start + Duration::from_millis(250),
            || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(EngineError::Other("connection refused".into()))
            },
        )
        .await
        .unwrap_err();
        // 0ms, then 100ms; the 200ms backoff would end at 300ms.
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert!(err.to_string().contains("refused"));
        assert!(start.elapsed() < Duration::from_millis(250));
    }
}
