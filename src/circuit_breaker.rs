//! Three-state circuit breaker (C5b): closed / open / half-open.
//!
//! State transitions follow a fixed table keyed by `failure_threshold` (F),
//! `recovery_timeout` (T), and `half_open_success_threshold` (S). The breaker
//! is single-writer: `check_state`/`record_success`/`record_failure` are
//! serialized under one lock, the same `Arc<Mutex<...>>` idiom used for the
//! rate-limiter windows.

use crate::types::{CircuitBreakerState as State, MetricsEvent};
use crate::Error;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    pub failure_threshold: u32,
    pub recovery_timeout: Duration,
    pub half_open_success_threshold: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            recovery_timeout: Duration::from_secs(30),
            half_open_success_threshold: 2,
        }
    }
}

#[derive(Debug)]
struct Inner {
    state: State,
    consecutive_failures: u32,
    half_open_successes: u32,
    recovery_deadline: Option<Instant>,
}

/// A single named circuit breaker guarding one route or endpoint.
pub struct CircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    inner: Arc<Mutex<Inner>>,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self {
            name: name.into(),
            config,
            inner: Arc::new(Mutex::new(Inner {
                state: State::Closed,
                consecutive_failures: 0,
                half_open_successes: 0,
                recovery_deadline: None,
            })),
        }
    }

    pub async fn state(&self) -> State {
        self.inner.lock().await.state
    }

    /// Must be called before issuing the underlying request. Transitions
    /// `open -> half_open` once the recovery deadline has passed; otherwise
    /// returns `Err(Error::CircuitOpen)` while still open.
    pub async fn check_state(&self, emit: &mut (dyn FnMut(MetricsEvent) + Send)) -> Result<(), Error> {
        let mut inner = self.inner.lock().await;
        match inner.state {
            State::Closed | State::HalfOpen => Ok(()),
            State::Open => {
                let deadline = inner.recovery_deadline.unwrap_or_else(Instant::now);
                if Instant::now() >= deadline {
                    let from = inner.state;
                    inner.state = State::HalfOpen;
                    inner.half_open_successes = 0;
                    emit(state_change_event(&self.name, from, State::HalfOpen));
                    Ok(())
                } else {
                    let recovery_time_ms = deadline.saturating_duration_since(Instant::now()).as_millis() as u64;
                    Err(Error::circuit_open(recovery_time_ms))
                }
            }
        }
    }

    pub async fn record_success(&self, emit: &mut (dyn FnMut(MetricsEvent) + Send)) {
        let mut inner = self.inner.lock().await;
        match inner.state {
            State::Closed => {
                inner.consecutive_failures = 0;
            }
            State::HalfOpen => {
                inner.half_open_successes += 1;
                if inner.half_open_successes >= self.config.half_open_success_threshold {
                    let from = inner.state;
                    inner.state = State::Closed;
                    inner.consecutive_failures = 0;
                    inner.half_open_successes = 0;
                    inner.recovery_deadline = None;
                    emit(state_change_event(&self.name, from, State::Closed));
                }
            }
            State::Open => {}
        }
    }

    pub async fn record_failure(&self, emit: &mut (dyn FnMut(MetricsEvent) + Send)) {
        let mut inner = self.inner.lock().await;
        match inner.state {
            State::Closed => {
                inner.consecutive_failures += 1;
                if inner.consecutive_failures >= self.config.failure_threshold {
                    let from = inner.state;
                    inner.state = State::Open;
                    inner.recovery_deadline = Some(Instant::now() + self.config.recovery_timeout);
                    emit(state_change_event(&self.name, from, State::Open));
                }
            }
            State::HalfOpen => {
                let from = inner.state;
                inner.state = State::Open;
                inner.recovery_deadline = Some(Instant::now() + self.config.recovery_timeout);
                inner.half_open_successes = 0;
                emit(state_change_event(&self.name, from, State::Open));
            }
            State::Open => {}
        }
    }
}

fn state_change_event(name: &str, from: State, to: State) -> MetricsEvent {
    MetricsEvent::CircuitBreakerStateChange {
        timestamp_ms: 0,
        request_id: None,
        name: name.to_string(),
        from,
        to,
    }
}
