//! Bounded retry with exponential backoff (spec §4.11).

use std::future::Future;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub backoff_multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(10),
            backoff_multiplier: 2.0,
        }
    }
}

fn delay_for_attempt(config: &RetryConfig, attempt: u32) -> Duration {
    let exp = config.backoff_multiplier.powi(attempt as i32 - 1);
    let millis = (config.initial_delay.as_millis() as f64 * exp).min(config.max_delay.as_millis() as f64);
    Duration::from_millis(millis as u64)
}

pub struct RetryPolicy<L = crate::logger::NoopLogger> {
    config: RetryConfig,
    logger: L,
}

impl RetryPolicy<crate::logger::NoopLogger> {
    pub fn new(config: RetryConfig) -> Self {
        Self { config, logger: crate::logger::NoopLogger }
    }
}

impl<L: crate::logger::Logger> RetryPolicy<L> {
    pub fn with_logger(config: RetryConfig, logger: L) -> Self {
        Self { config, logger }
    }

    /// Runs `op` up to `max_attempts` times. `should_retry` classifies
    /// an attempt's failure (`true` = worth retrying). The final
    /// failure is rethrown unchanged. A success after >=1 retry is
    /// logged (spec §4.11).
    pub async fn execute<T, E, F, Fut, R>(&self, should_retry: R, mut op: F) -> Result<T, E>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        R: Fn(&E, u32) -> bool,
    {
        let mut attempt = 1;
        loop {
            match op(attempt).await {
                Ok(value) => {
                    if attempt > 1 {
                        self.logger.info(&format!("operation succeeded after {attempt} attempts"), None);
                    }
                    return Ok(value);
                }
                Err(err) => {
                    if attempt >= self.config.max_attempts || !should_retry(&err, attempt) {
                        return Err(err);
                    }
                    let delay = delay_for_attempt(&self.config, attempt);
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}

/// Pattern-match classification against an error's rendered message,
/// for callers without a custom predicate (spec §4.11).
pub fn message_matches_any(message: &str, patterns: &[&str]) -> bool {
    patterns.iter().any(|p| message.contains(p))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn retries_up_to_max_attempts_then_rethrows_last_error() {
        let policy = RetryPolicy::new(RetryConfig {
            max_attempts: 3,
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
            backoff_multiplier: 2.0,
        });
        let calls = AtomicU32::new(0);
        let result: Result<(), &str> = policy
            .execute(
                |_, _| true,
                |_attempt| {
                    calls.fetch_add(1, Ordering::SeqCst);
                    async { Err("fail") }
                },
            )
            .await;
        assert_eq!(result, Err("fail"));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn succeeds_on_third_attempt_after_two_failures() {
        let policy = RetryPolicy::new(RetryConfig {
            max_attempts: 5,
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
            backoff_multiplier: 2.0,
        });
        let result = policy
            .execute(
                |_: &&str, _| true,
                |attempt| async move { if attempt < 3 { Err("fail") } else { Ok(attempt) } },
            )
            .await;
        assert_eq!(result, Ok(3));
    }

    #[tokio::test]
    async fn predicate_false_stops_retrying_immediately() {
        let policy = RetryPolicy::new(RetryConfig::default());
        let calls = AtomicU32::new(0);
        let result: Result<(), &str> = policy
            .execute(
                |_, _| false,
                |_| {
                    calls.fetch_add(1, Ordering::SeqCst);
                    async { Err("non-retryable") }
                },
            )
            .await;
        assert_eq!(result, Err("non-retryable"));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn delay_caps_at_max_delay() {
        let config = RetryConfig {
            max_attempts: 10,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(500),
            backoff_multiplier: 2.0,
        };
        assert_eq!(delay_for_attempt(&config, 1), Duration::from_millis(100));
        assert_eq!(delay_for_attempt(&config, 2), Duration::from_millis(200));
        assert_eq!(delay_for_attempt(&config, 10), Duration::from_millis(500));
    }
}
