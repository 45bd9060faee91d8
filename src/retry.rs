//! Retry policy with exponential backoff and jitter (C5a).

use crate::types::MetricsEvent;
use crate::{Error, Result};
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;

/// `maxAttempts`, `initialDelay`, `maxDelay`, `backoffMultiplier`, `jitterFactor`.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub backoff_multiplier: f64,
    pub jitter_factor: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            backoff_multiplier: 2.0,
            jitter_factor: 0.1,
        }
    }
}

impl RetryPolicy {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts;
        self
    }

    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    pub fn with_backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = multiplier;
        self
    }

    pub fn with_jitter_factor(mut self, jitter: f64) -> Self {
        self.jitter_factor = jitter.clamp(0.0, 1.0);
        self
    }

    /// `attempt` is 1-based (the attempt about to be retried after).
    fn delay_for(&self, attempt: u32) -> Duration {
        let base_ms = self.initial_delay.as_millis() as f64;
        let exponential = base_ms * self.backoff_multiplier.powi(attempt as i32 - 1);
        let capped = exponential.min(self.max_delay.as_millis() as f64);
        let jitter = self.jitter_factor * (2.0 * rand::random::<f64>() - 1.0);
        let final_delay = (capped * (1.0 + jitter)).max(0.0);
        Duration::from_millis(final_delay as u64)
    }

    /// False once `attempt >= max_attempts`, or for any non-retryable error.
    pub fn should_retry(&self, error: &Error, attempt: u32) -> bool {
        attempt < self.max_attempts && error.is_retryable()
    }
}

/// Runs `operation`, retrying on retryable errors per `policy`. `on_retry` is
/// invoked with a `RetryAttempt` metrics event before each backoff sleep, so
/// the caller can forward it onto the metrics bus without this module owning
/// a dependency on the collector.
pub async fn retry_with_backoff<F, Fut, T>(
    policy: &RetryPolicy,
    mut operation: F,
    mut on_retry: impl FnMut(MetricsEvent),
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = 0u32;
    loop {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(err) => {
                attempt += 1;
                if !policy.should_retry(&err, attempt) {
                    return Err(err);
                }
                let delay = policy.delay_for(attempt);
                on_retry(MetricsEvent::RetryAttempt {
                    timestamp_ms: 0,
                    request_id: None,
                    attempt,
                    max: policy.max_attempts,
                    delay_ms: delay.as_millis() as u64,
                    reason: err.to_string(),
                });
                sleep(delay).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_policy_builder() {
        let policy = RetryPolicy::new()
            .with_max_attempts(5)
            .with_initial_delay(Duration::from_millis(500))
            .with_max_delay(Duration::from_secs(30))
            .with_backoff_multiplier(1.5)
            .with_jitter_factor(0.2);

        assert_eq!(policy.max_attempts, 5);
        assert_eq!(policy.initial_delay, Duration::from_millis(500));
        assert_eq!(policy.backoff_multiplier, 1.5);
    }

    #[test]
    fn test_delay_grows_exponentially() {
        let policy = RetryPolicy::new()
            .with_initial_delay(Duration::from_secs(1))
            .with_backoff_multiplier(2.0)
            .with_jitter_factor(0.0);

        assert!(policy.delay_for(2) > policy.delay_for(1));
        assert!(policy.delay_for(3) > policy.delay_for(2));
    }

    #[test]
    fn test_delay_is_capped() {
        let policy = RetryPolicy::new()
            .with_initial_delay(Duration::from_secs(1))
            .with_max_delay(Duration::from_secs(5))
            .with_backoff_multiplier(10.0)
            .with_jitter_factor(0.0);
        assert_eq!(policy.delay_for(5), Duration::from_secs(5));
    }

    #[test]
    fn test_should_retry_respects_error_retryability_and_attempt_cap() {
        let policy = RetryPolicy::new().with_max_attempts(2);
        assert!(policy.should_retry(&Error::timeout("t"), 1));
        assert!(!policy.should_retry(&Error::timeout("t"), 2));
        assert!(!policy.should_retry(&Error::validation("v"), 1));
    }

    #[tokio::test]
    async fn test_retry_idempotence_on_first_success() {
        let policy = RetryPolicy::new().with_max_attempts(3);
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_clone = calls.clone();
        let mut retries_seen = 0;

        let result: Result<i32> = retry_with_backoff(
            &policy,
            move || {
                calls_clone.fetch_add(1, Ordering::SeqCst);
                async { Ok(42) }
            },
            |_| retries_seen += 1,
        )
        .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(retries_seen, 0);
    }

    #[tokio::test]
    async fn test_retry_succeeds_after_transient_failures() {
        let policy = RetryPolicy::new()
            .with_max_attempts(3)
            .with_initial_delay(Duration::from_millis(1));
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_clone = calls.clone();

        let result: Result<i32> = retry_with_backoff(
            &policy,
            move || {
                let count = calls_clone.fetch_add(1, Ordering::SeqCst) + 1;
                async move {
                    if count < 3 {
                        Err(Error::timeout("slow"))
                    } else {
                        Ok(42)
                    }
                }
            },
            |_| {},
        )
        .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_retry_does_not_retry_non_retryable_errors() {
        let policy = RetryPolicy::new().with_max_attempts(5);
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_clone = calls.clone();

        let result: Result<i32> = retry_with_backoff(
            &policy,
            move || {
                calls_clone.fetch_add(1, Ordering::SeqCst);
                async { Err(Error::validation("bad")) }
            },
            |_| {},
        )
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
