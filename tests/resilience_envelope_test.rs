//! Composes the circuit breaker with retry-with-backoff the way a dispatcher
//! turn does: check the breaker before each attempt, run the operation,
//! record the outcome back into the breaker, and let the retry policy decide
//! whether to try again. No module under test owns this composition itself.

use genui_engine::retry::{retry_with_backoff, RetryPolicy};
use genui_engine::{CircuitBreaker, CircuitBreakerConfig, CircuitBreakerState, Error, MetricsEvent};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

async fn call_with_breaker(
    breaker: &CircuitBreaker,
    policy: &RetryPolicy,
    attempts: Arc<AtomicUsize>,
    fail_until: usize,
    events: &mut Vec<MetricsEvent>,
) -> Result<&'static str, Error> {
    retry_with_backoff(
        policy,
        || {
            let breaker = breaker;
            let attempts = attempts.clone();
            async move {
                let mut emit = |_: MetricsEvent| {};
                breaker.check_state(&mut emit).await?;

                let count = attempts.fetch_add(1, Ordering::SeqCst) + 1;
                if count <= fail_until {
                    breaker.record_failure(&mut emit).await;
                    Err(Error::server("upstream 500"))
                } else {
                    breaker.record_success(&mut emit).await;
                    Ok("ok")
                }
            }
        },
        |event| events.push(event),
    )
    .await
}

#[tokio::test]
async fn retry_recovers_from_transient_failures_while_breaker_stays_closed() {
    let breaker = CircuitBreaker::new(
        "upstream",
        CircuitBreakerConfig {
            failure_threshold: 5,
            ..CircuitBreakerConfig::default()
        },
    );
    let policy = RetryPolicy::new()
        .with_max_attempts(3)
        .with_initial_delay(Duration::from_millis(1));
    let attempts = Arc::new(AtomicUsize::new(0));
    let mut events = Vec::new();

    let result = call_with_breaker(&breaker, &policy, attempts.clone(), 2, &mut events).await;

    assert_eq!(result.unwrap(), "ok");
    assert_eq!(attempts.load(Ordering::SeqCst), 3);
    assert_eq!(breaker.state().await, CircuitBreakerState::Closed);
    assert_eq!(events.len(), 2, "one RetryAttempt event per failed attempt");
    assert!(events.iter().all(|e| matches!(e, MetricsEvent::RetryAttempt { .. })));
}

#[tokio::test]
async fn repeated_failures_trip_the_breaker_and_further_attempts_are_rejected_without_calling_through() {
    let breaker = CircuitBreaker::new(
        "upstream",
        CircuitBreakerConfig {
            failure_threshold: 2,
            recovery_timeout: Duration::from_secs(30),
            half_open_success_threshold: 1,
        },
    );
    let policy = RetryPolicy::new()
        .with_max_attempts(4)
        .with_initial_delay(Duration::from_millis(1));
    let attempts = Arc::new(AtomicUsize::new(0));
    let mut events = Vec::new();

    // Every call fails, so the breaker trips after its second recorded failure
    // and the retry policy's later attempts observe CircuitOpen instead of
    // re-invoking the operation's failing body.
    let result = call_with_breaker(&breaker, &policy, attempts.clone(), usize::MAX, &mut events).await;

    assert!(result.is_err());
    assert_eq!(breaker.state().await, CircuitBreakerState::Open);
    // Only the first two attempts actually ran the operation; once the breaker
    // opened, check_state short-circuits before the counter is incremented.
    assert_eq!(attempts.load(Ordering::SeqCst), 2);
    assert!(matches!(result.unwrap_err(), Error::CircuitOpen { .. }));
}
