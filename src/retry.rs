//! Retrying provider requests that fail for transient reasons.
//!
//! Only errors that [`ProviderError::is_retryable`] accepts (rate limits,
//! server errors and transport failures) are retried. Anything else goes
//! straight back to the caller, which fails the job.

use crate::provider::ProviderError;
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, warn};

/// How often one provider request is tried and how long to wait in between.
///
/// The wait doubles after every failed attempt, starting at `base_delay` and
/// capped at `max_delay`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total tries, including the first. Zero is treated as one.
    pub attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl RetryPolicy {
    pub fn new(attempts: u32, base_delay: Duration) -> Self {
        Self {
            attempts,
            base_delay,
            max_delay: Duration::from_secs(5),
        }
    }

    pub fn with_attempts(mut self, attempts: u32) -> Self {
        self.attempts = attempts;
        self
    }

    pub fn with_max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay = max_delay;
        self
    }

    /// Wait before retry number `retry` (1 for the first retry)
    fn backoff(&self, retry: u32) -> Duration {
        let factor = 1u32
            .checked_shl(retry.saturating_sub(1))
            .unwrap_or(u32::MAX);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }
}

impl Default for RetryPolicy {
    /// Three tries, waiting 1s then 2s
    fn default() -> Self {
        Self::new(3, Duration::from_secs(1))
    }
}

/// Run `call` until it succeeds, fails with an error that is not
/// retryable, or runs out of attempts. `chunk` only labels the log lines.
///
/// # Returns
/// The first success, or the last error
pub async fn retry_provider_call<T, F, Fut>(
    policy: &RetryPolicy,
    chunk: usize,
    mut call: F,
) -> Result<T, ProviderError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ProviderError>>,
{
    let attempts = policy.attempts.max(1);
    let mut attempt = 1;

    loop {
        match call().await {
            Ok(value) => {
                if attempt > 1 {
                    debug!(chunk, attempt, "Provider request succeeded after retry");
                }
                return Ok(value);
            }
            Err(e) if !e.is_retryable() => {
                debug!(chunk, kind = e.kind(), "Provider error is not retryable: {}", e);
                return Err(e);
            }
            Err(e) if attempt >= attempts => {
                warn!(
                    chunk,
                    attempts,
                    kind = e.kind(),
                    "Provider request failed, giving up: {}",
                    e
                );
                return Err(e);
            }
            Err(e) => {
                let delay = policy.backoff(attempt);
                warn!(
                    chunk,
                    attempt,
                    kind = e.kind(),
                    ?delay,
                    "Provider request failed, retrying: {}",
                    e
                );
                sleep(delay).await;
                attempt += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn http(status: u16) -> ProviderError {
        ProviderError::Http {
            status,
            body: String::new(),
        }
    }

    fn fast(attempts: u32) -> RetryPolicy {
        RetryPolicy::new(attempts, Duration::from_millis(5))
    }

    /// Fails with `errors` in order, then answers with the attempt number
    async fn scripted(
        policy: RetryPolicy,
        errors: Vec<ProviderError>,
    ) -> (Result<u32, ProviderError>, u32) {
        let calls = AtomicU32::new(0);
        let errors = std::sync::Mutex::new(errors.into_iter());
        let result = retry_provider_call(&policy, 0, || {
            let attempt = calls.fetch_add(1, Ordering::SeqCst) + 1;
            let next = errors.lock().unwrap().next();
            async move {
                match next {
                    Some(e) => Err(e),
                    None => Ok(attempt),
                }
            }
        })
        .await;
        (result, calls.load(Ordering::SeqCst))
    }

    // ==================== Backoff Tests ====================

    #[test]
    fn test_default_policy() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.attempts, 3);
        assert_eq!(policy.backoff(1), Duration::from_secs(1));
        assert_eq!(policy.backoff(2), Duration::from_secs(2));
    }

    #[test]
    fn test_backoff_is_capped() {
        let policy = RetryPolicy::new(10, Duration::from_secs(1)).with_max_delay(Duration::from_secs(3));
        assert_eq!(policy.backoff(3), Duration::from_secs(3));
        assert_eq!(policy.backoff(40), Duration::from_secs(3));
    }

    // ==================== Retry Tests ====================

    #[tokio::test]
    async fn test_rate_limit_and_server_errors_are_retried() {
        let (result, calls) = scripted(fast(3), vec![http(429), http(503)]).await;
        assert_eq!(result.unwrap(), 3);
        assert_eq!(calls, 3);
    }

    #[tokio::test]
    async fn test_client_error_fails_immediately() {
        let (result, calls) = scripted(fast(3), vec![http(403)]).await;
        assert!(matches!(result, Err(ProviderError::Http { status: 403, .. })));
        assert_eq!(calls, 1);
    }

    #[tokio::test]
    async fn test_decode_error_fails_immediately() {
        let (result, calls) =
            scripted(fast(3), vec![ProviderError::Decode("not json".to_string())]).await;
        assert_eq!(result.unwrap_err().kind(), "ProviderDecodeError");
        assert_eq!(calls, 1);
    }

    #[tokio::test]
    async fn test_gives_up_after_last_attempt() {
        let (result, calls) = scripted(fast(2), vec![http(500), http(502), http(504)]).await;
        assert!(matches!(result, Err(ProviderError::Http { status: 502, .. })));
        assert_eq!(calls, 2);
    }

    #[tokio::test]
    async fn test_zero_attempts_tries_once() {
        let (result, calls) = scripted(fast(0), vec![http(500)]).await;
        assert!(result.is_err());
        assert_eq!(calls, 1);
    }
}
