use log::debug;
use rand::random;
use serde::Deserialize;
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;

use crate::error::{AgentError, Result};

/// Configuration for retry behavior
#[derive(Debug, Clone, Deserialize)]
pub struct RetryConfig {
    /// Maximum number of attempts, including the first
    #[serde(default = "default_max_attempts")]
    pub max_attempts: usize,

    /// Initial delay before first retry in milliseconds
    #[serde(default = "default_initial_delay")]
    pub initial_delay_ms: u64,

    /// Multiplier for exponential backoff
    #[serde(default = "default_backoff_factor")]
    pub backoff_factor: f64,

    /// Maximum delay in milliseconds
    #[serde(default = "default_max_delay")]
    pub max_delay_ms: u64,

    /// Whether to add jitter to delays
    #[serde(default = "default_jitter")]
    pub jitter: bool,
}

fn default_max_attempts() -> usize {
    5
}

fn default_initial_delay() -> u64 {
    100
}

fn default_backoff_factor() -> f64 {
    2.0
}

fn default_max_delay() -> u64 {
    30_000
}

fn default_jitter() -> bool {
    true
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_delay_ms: default_initial_delay(),
            backoff_factor: default_backoff_factor(),
            max_delay_ms: default_max_delay(),
            jitter: default_jitter(),
        }
    }
}

impl RetryConfig {
    /// Delay before the next retry, given the delay used for the previous one
    pub fn next_delay(&self, previous: Duration) -> Duration {
        let next_ms = (previous.as_millis() as f64 * self.backoff_factor) as u64;
        let capped = next_ms.min(self.max_delay_ms);
        if self.jitter {
            Duration::from_millis(capped + random::<u64>() % 100)
        } else {
            Duration::from_millis(capped)
        }
    }

    pub fn initial_delay(&self) -> Duration {
        Duration::from_millis(self.initial_delay_ms)
    }
}

/// Execute a fallible async operation with retry and exponential backoff.
///
/// `retryable` classifies failures: a non-retryable error short-circuits the
/// loop immediately. Exhausting the attempt budget yields a single terminal
/// error carrying the last failure, not one per attempt.
pub async fn execute_with_retry<F, Fut, T>(
    operation: F,
    config: &RetryConfig,
    retryable: impl Fn(&AgentError) -> bool,
    context: &str,
) -> Result<T>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempts = 0;
    let mut delay = config.initial_delay();

    loop {
        match operation().await {
            Ok(result) => return Ok(result),
            Err(err) if !retryable(&err) => return Err(err),
            Err(err) => {
                attempts += 1;

                if attempts >= config.max_attempts {
                    return Err(AgentError::Other(format!(
                        "{} failed after {} attempts: {}",
                        context, attempts, err
                    )));
                }

                // Individual attempts stay quiet; the caller reports the
                // terminal outcome once.
                debug!(
                    "{} (attempt {}/{}): {}",
                    context, attempts, config.max_attempts, err
                );

                sleep(delay).await;
                delay = config.next_delay(delay);
                debug!("Retrying {} after {:?} delay", context, delay);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn no_jitter() -> RetryConfig {
        RetryConfig {
            max_attempts: 4,
            initial_delay_ms: 100,
            backoff_factor: 2.0,
            max_delay_ms: 1_000,
            jitter: false,
        }
    }

    #[test]
    fn test_backoff_strictly_increases_until_cap() {
        let config = no_jitter();
        let first = config.initial_delay();
        let second = config.next_delay(first);
        let third = config.next_delay(second);
        assert!(second > first);
        assert!(third > second);
        // 800ms doubles past the cap
        assert_eq!(
            config.next_delay(Duration::from_millis(800)),
            Duration::from_millis(1_000)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_exhaustion_reports_once() {
        let config = no_jitter();
        let calls = AtomicUsize::new(0);

        let result: Result<()> = execute_with_retry(
            || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(AgentError::WriteTransient("unreachable".to_string())) }
            },
            &config,
            AgentError::is_transient_write,
            "test write",
        )
        .await;

        assert_eq!(calls.load(Ordering::SeqCst), 4);
        let err = result.unwrap_err();
        assert!(err.to_string().contains("after 4 attempts"));
    }

    #[tokio::test]
    async fn test_fatal_error_short_circuits() {
        let calls = AtomicUsize::new(0);

        let result: Result<()> = execute_with_retry(
            || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(AgentError::WriteFatal("rejected".to_string())) }
            },
            &no_jitter(),
            AgentError::is_transient_write,
            "test write",
        )
        .await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(matches!(result, Err(AgentError::WriteFatal(_))));
    }

    #[tokio::test]
    async fn test_success_passes_through() {
        let result = execute_with_retry(
            || async { Ok::<_, AgentError>(7) },
            &no_jitter(),
            AgentError::is_transient_write,
            "test",
        )
        .await;
        assert_eq!(result.unwrap(), 7);
    }
}
