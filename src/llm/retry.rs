use std::future::Future;

use serde::{Deserialize, Serialize};
use tokio::time::{Duration, sleep};
use tracing::{debug, error, warn};

use crate::error::ProviderError;

const DEFAULT_MAX_ATTEMPTS: u32 = 20;
const DEFAULT_DELAY_MS: u64 = 3000;

/// Retry configuration
///
/// Every retry waits the same `delay`; there is no exponential growth.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Total number of attempts, including the first one
    pub max_attempts: u32,
    /// Delay between attempts
    #[serde(rename = "delay_ms", with = "millis")]
    pub delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            delay: Duration::from_millis(DEFAULT_DELAY_MS),
        }
    }
}

impl RetryConfig {
    pub fn new(max_attempts: u32, delay_ms: u64) -> Self {
        Self {
            max_attempts,
            delay: Duration::from_millis(delay_ms),
        }
    }
}

mod millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use tokio::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_millis)
    }
}

/// Retry an async provider call on transient failures with a fixed delay.
///
/// Non-transient errors are returned immediately. Once `max_attempts` transient
/// failures have been seen, the last one is returned unchanged.
pub async fn retry_transient<F, Fut, T>(
    config: &RetryConfig,
    operation_name: &str,
    mut operation: F,
) -> Result<T, ProviderError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ProviderError>>,
{
    let max_attempts = config.max_attempts.max(1);
    let mut attempt = 0;

    loop {
        attempt += 1;

        match operation().await {
            Ok(result) => {
                if attempt > 1 {
                    debug!(
                        operation = operation_name,
                        attempt, "operation succeeded after retry"
                    );
                }
                return Ok(result);
            }
            Err(e) if !e.is_transient() => return Err(e),
            Err(e) => {
                warn!(
                    operation = operation_name,
                    attempt,
                    max_attempts,
                    kind = e.kind(),
                    error = %e,
                    "calling llm failed, retrying"
                );

                if attempt >= max_attempts {
                    error!(
                        operation = operation_name,
                        attempts = attempt,
                        "llm call retry limit reached"
                    );
                    return Err(e);
                }

                sleep(config.delay).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast(max_attempts: u32) -> RetryConfig {
        RetryConfig::new(max_attempts, 0)
    }

    #[test]
    fn test_default_config() {
        let config = RetryConfig::default();
        assert_eq!(config.max_attempts, 20);
        assert_eq!(config.delay, Duration::from_secs(3));
    }

    #[tokio::test]
    async fn test_success_after_transient_failures() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let result = retry_transient(&fast(5), "test", || async move {
            let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
            if n < 3 {
                Err(ProviderError::RateLimit(format!("attempt {n}")))
            } else {
                Ok(n)
            }
        })
        .await;

        assert_eq!(result.unwrap(), 3);
        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_exhaustion_returns_last_error() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let result: Result<(), _> = retry_transient(&fast(4), "test", || async move {
            let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
            Err(ProviderError::Connection(format!("attempt {n}")))
        })
        .await;

        let err = result.unwrap_err();
        assert!(matches!(err, ProviderError::Connection(ref m) if m == "attempt 4"));
        assert_eq!(counter.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_fatal_error_not_retried() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let result: Result<(), _> = retry_transient(&fast(5), "test", || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(ProviderError::Other(anyhow::anyhow!("invalid api key")))
        })
        .await;

        assert!(!result.unwrap_err().is_transient());
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_zero_attempts_still_tries_once() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let result = retry_transient(&fast(0), "test", || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok::<_, ProviderError>("ok")
        })
        .await;

        assert_eq!(result.unwrap(), "ok");
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fixed_delay_between_attempts() {
        let start = tokio::time::Instant::now();
        let config = RetryConfig::new(3, 1000);
        let result: Result<(), _> = retry_transient(&config, "test", || async {
            Err(ProviderError::Timeout("slow".into()))
        })
        .await;

        assert!(result.is_err());
        // two sleeps of one second each, none after the final attempt
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_secs(2));
        assert!(elapsed < Duration::from_secs(3));
    }
}
