//! Rate limiting and request deduplication (C4).

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, Notify};
use tokio::time::sleep;

// ============================================================================
// PROACTIVE RATE LIMITER
// ============================================================================

#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    pub requests_per_minute: u32,
    pub requests_per_day: u32,
    pub tokens_per_minute: u32,
    pub enabled: bool,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            requests_per_minute: 60,
            requests_per_day: 10_000,
            tokens_per_minute: 100_000,
            enabled: true,
        }
    }
}

#[derive(Debug, Default)]
struct Windows {
    requests: Vec<Instant>,
    tokens: Vec<(Instant, u32)>,
    daily_count: u32,
    daily_reset_at: Option<Instant>,
}

/// Sliding-window per-minute/per-day request admission, plus a parallel
/// token-budget window. Single-writer: admissions and cleanups run under one
/// lock.
pub struct ProactiveRateLimiter {
    config: RateLimitConfig,
    windows: Mutex<Windows>,
}

impl ProactiveRateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            config,
            windows: Mutex::new(Windows::default()),
        }
    }

    fn cleanup(windows: &mut Windows, now: Instant) {
        let minute_ago = now - Duration::from_secs(60);
        windows.requests.retain(|&t| t > minute_ago);
        windows.tokens.retain(|&(t, _)| t > minute_ago);

        match windows.daily_reset_at {
            Some(reset) if now >= reset => {
                windows.daily_count = 0;
                windows.daily_reset_at = Some(next_utc_midnight(now));
            }
            None => windows.daily_reset_at = Some(next_utc_midnight(now)),
            _ => {}
        }
    }

    fn wait_time_locked(&self, windows: &mut Windows, estimated_tokens: u32, now: Instant) -> Duration {
        Self::cleanup(windows, now);

        if windows.daily_count >= self.config.requests_per_day {
            return Duration::from_secs(24 * 60 * 60);
        }

        if windows.requests.len() as u32 >= self.config.requests_per_minute {
            if let Some(&oldest) = windows.requests.first() {
                let release = oldest + Duration::from_secs(60);
                return release.saturating_duration_since(now);
            }
        }

        let tokens_in_window: u32 = windows.tokens.iter().map(|(_, n)| n).sum();
        if !windows.tokens.is_empty()
            && tokens_in_window.saturating_add(estimated_tokens) > self.config.tokens_per_minute
        {
            if let Some(&(oldest, _)) = windows.tokens.first() {
                let release = oldest + Duration::from_secs(60);
                return release.saturating_duration_since(now);
            }
        }

        Duration::ZERO
    }

    /// Non-blocking: the wait time `execute` would currently observe.
    pub async fn wait_time(&self, estimated_tokens: u32) -> Duration {
        if !self.config.enabled {
            return Duration::ZERO;
        }
        let mut windows = self.windows.lock().await;
        self.wait_time_locked(&mut windows, estimated_tokens, Instant::now())
    }

    pub async fn can_proceed(&self, estimated_tokens: u32) -> bool {
        self.wait_time(estimated_tokens).await.is_zero()
    }

    pub async fn remaining_requests_per_minute(&self) -> u32 {
        let mut windows = self.windows.lock().await;
        Self::cleanup(&mut windows, Instant::now());
        self.config
            .requests_per_minute
            .saturating_sub(windows.requests.len() as u32)
    }

    /// If disabled, runs `op` immediately. Otherwise waits out the admission
    /// delay, records the (timestamp, estimated-token) entry, then runs `op`.
    pub async fn execute<F, Fut, T>(&self, estimated_tokens: u32, op: F) -> T
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        if !self.config.enabled {
            return op().await;
        }

        let wait = {
            let mut windows = self.windows.lock().await;
            self.wait_time_locked(&mut windows, estimated_tokens, Instant::now())
        };
        if !wait.is_zero() {
            sleep(wait).await;
        }

        {
            let mut windows = self.windows.lock().await;
            let now = Instant::now();
            Self::cleanup(&mut windows, now);
            windows.requests.push(now);
            windows.tokens.push((now, estimated_tokens));
            windows.daily_count += 1;
        }

        op().await
    }

    /// Fills the request window with synthetic entries matching server
    /// pressure, so the next admission check respects `retry_after`.
    pub async fn record_server_rate_limit(&self, retry_after: Duration) {
        let mut windows = self.windows.lock().await;
        let now = Instant::now();
        Self::cleanup(&mut windows, now);
        let synthetic_count = self.config.requests_per_minute;
        let synthetic_start = now - Duration::from_secs(60) + retry_after.min(Duration::from_secs(60));
        windows.requests = vec![synthetic_start; synthetic_count as usize];
    }
}

fn next_utc_midnight(now: Instant) -> Instant {
    // No wall-clock epoch is threaded through this module; approximate the
    // "reset at UTC midnight" cadence with a fixed 24h window from first use.
    now + Duration::from_secs(24 * 60 * 60)
}

// ============================================================================
// REACTIVE RATE-LIMIT GATE
// ============================================================================

struct GateState {
    open_until: Option<Instant>,
}

/// Reactive gate used when the server returns 429: while set, new calls queue
/// and drain in FIFO once the timer fires.
pub struct RateLimitGate {
    state: Mutex<GateState>,
    notify: Notify,
}

impl Default for RateLimitGate {
    fn default() -> Self {
        Self::new()
    }
}

impl RateLimitGate {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(GateState { open_until: None }),
            notify: Notify::new(),
        }
    }

    /// `retry_after`: `None` defaults to 60s.
    pub async fn set(&self, retry_after: Option<Duration>) {
        let delay = retry_after.unwrap_or(Duration::from_secs(60));
        {
            let mut state = self.state.lock().await;
            state.open_until = Some(Instant::now() + delay);
        }
        let state_ref = &self.state;
        let notify_ref = &self.notify;
        sleep(delay).await;
        {
            let mut state = state_ref.lock().await;
            state.open_until = None;
        }
        notify_ref.notify_waiters();
    }

    /// Waits until the gate is clear, then runs `op`. Queued callers drain in
    /// FIFO order on timer fire; one call's failure does not block others.
    pub async fn wait_then<F, Fut, T>(&self, op: F) -> T
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        loop {
            let open_until = self.state.lock().await.open_until;
            match open_until {
                None => return op().await,
                Some(deadline) if Instant::now() >= deadline => return op().await,
                Some(_) => self.notify.notified().await,
            }
        }
    }
}

// ============================================================================
// REQUEST DEDUPLICATOR
// ============================================================================

struct DedupEntry<T> {
    shared: Arc<tokio::sync::Mutex<Option<T>>>,
    notify: Arc<Notify>,
    expires_at: Instant,
}

/// Keyed deduplication of in-flight operations. Two concurrent `execute`
/// calls sharing a key coalesce into one `op` invocation.
pub struct RequestDeduplicator<T: Clone + Send + 'static> {
    window: Duration,
    max_size: usize,
    inflight: Mutex<HashMap<String, DedupEntry<T>>>,
}

impl<T: Clone + Send + 'static> RequestDeduplicator<T> {
    pub fn new(window: Duration, max_size: usize) -> Self {
        Self {
            window,
            max_size,
            inflight: Mutex::new(HashMap::new()),
        }
    }

    fn evict_expired_and_oldest(map: &mut HashMap<String, DedupEntry<T>>, max_size: usize) {
        let now = Instant::now();
        map.retain(|_, e| e.expires_at > now);
        while map.len() >= max_size {
            if let Some(oldest_key) = map
                .iter()
                .min_by_key(|(_, e)| e.expires_at)
                .map(|(k, _)| k.clone())
            {
                map.remove(&oldest_key);
            } else {
                break;
            }
        }
    }

    /// If a live entry exists for `key`, awaits and returns its result
    /// (without re-running `op`). Otherwise runs `op` and registers the
    /// result for the window's duration.
    pub async fn execute<F, Fut>(&self, key: String, op: F) -> T
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        let existing = {
            let map = self.inflight.lock().await;
            map.get(&key).map(|e| (e.shared.clone(), e.notify.clone()))
        };

        if let Some((shared, notify)) = existing {
            loop {
                if let Some(value) = shared.lock().await.clone() {
                    return value;
                }
                notify.notified().await;
            }
        }

        let shared = Arc::new(tokio::sync::Mutex::new(None));
        let notify = Arc::new(Notify::new());
        {
            let mut map = self.inflight.lock().await;
            Self::evict_expired_and_oldest(&mut map, self.max_size);
            map.insert(
                key.clone(),
                DedupEntry {
                    shared: shared.clone(),
                    notify: notify.clone(),
                    expires_at: Instant::now() + self.window,
                },
            );
        }

        let result = op().await;
        *shared.lock().await = Some(result.clone());
        notify.notify_waiters();
        result
    }
}

/// Stable hash of `{messages, model, max_tokens}` used as a dedup key.
pub fn dedup_key(messages_json: &str, model: &str, max_tokens: u32) -> String {
    use std::collections::hash_map::DefaultHasher;
    use std::hash::{Hash, Hasher};
    let mut hasher = DefaultHasher::new();
    messages_json.hash(&mut hasher);
    model.hash(&mut hasher);
    max_tokens.hash(&mut hasher);
    format!("{:x}", hasher.finish())
}
