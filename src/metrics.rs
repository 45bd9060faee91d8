//! Metrics collector and adapter contract (C6).
//!
//! A process-wide broadcast bus: every subscriber observes every event (fan-out,
//! not first-responder-wins), generalized from the teacher's hook-registry shape
//! into `tokio::sync::broadcast`.

use crate::types::MetricsEvent;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{broadcast, Mutex};

const DEFAULT_CHANNEL_CAPACITY: usize = 1024;
const LATENCY_RESERVOIR_SIZE: usize = 1000;

/// Rolling counters and a latency reservoir, computed from the event stream.
#[derive(Debug, Clone, Default)]
pub struct Stats {
    pub total_requests: u64,
    pub success_count: u64,
    pub failure_count: u64,
    pub rate_limit_count: u64,
    pub breaker_open_count: u64,
    pub stream_inactivity_count: u64,
}

impl Stats {
    pub fn success_rate(&self) -> f64 {
        if self.total_requests == 0 {
            0.0
        } else {
            self.success_count as f64 / self.total_requests as f64
        }
    }
}

#[derive(Debug, Default)]
struct Aggregate {
    stats: Stats,
    latencies_ms: VecDeque<u64>,
}

/// Accepts typed `MetricsEvent`s and forwards them to subscribers; when
/// aggregation is enabled, also maintains rolling counters and a latency
/// reservoir for percentile queries.
pub struct MetricsCollector {
    sender: broadcast::Sender<MetricsEvent>,
    aggregate: Arc<Mutex<Aggregate>>,
    aggregation_enabled: bool,
}

impl MetricsCollector {
    pub fn new(aggregation_enabled: bool) -> Self {
        let (sender, _) = broadcast::channel(DEFAULT_CHANNEL_CAPACITY);
        Self {
            sender,
            aggregate: Arc::new(Mutex::new(Aggregate::default())),
            aggregation_enabled,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<MetricsEvent> {
        self.sender.subscribe()
    }

    /// Broadcasts `event`. A producer must never block on a slow subscriber;
    /// `send` only fails when there are no receivers, which is not an error
    /// here.
    pub async fn emit(&self, event: MetricsEvent) {
        if self.aggregation_enabled {
            self.aggregate(&event).await;
        }
        let _ = self.sender.send(event);
    }

    async fn aggregate(&self, event: &MetricsEvent) {
        let mut agg = self.aggregate.lock().await;
        match event {
            MetricsEvent::RequestStart { .. } => agg.stats.total_requests += 1,
            MetricsEvent::RequestSuccess { duration_ms, .. } => {
                agg.stats.success_count += 1;
                push_latency(&mut agg.latencies_ms, *duration_ms);
            }
            MetricsEvent::RequestFailure { .. } => agg.stats.failure_count += 1,
            MetricsEvent::CircuitBreakerStateChange { to, .. } => {
                if *to == crate::types::CircuitBreakerState::Open {
                    agg.stats.breaker_open_count += 1;
                }
            }
            MetricsEvent::RateLimit { .. } => agg.stats.rate_limit_count += 1,
            MetricsEvent::StreamInactivity { .. } => agg.stats.stream_inactivity_count += 1,
            MetricsEvent::Latency { duration_ms, .. } => {
                push_latency(&mut agg.latencies_ms, *duration_ms);
            }
            MetricsEvent::RetryAttempt { .. } => {}
        }
    }

    pub async fn stats(&self) -> Stats {
        self.aggregate.lock().await.stats.clone()
    }

    /// `p` in `[0.0, 1.0]`; interpolation-free nearest-rank percentile.
    pub async fn latency_percentile(&self, p: f64) -> Option<u64> {
        let agg = self.aggregate.lock().await;
        if agg.latencies_ms.is_empty() {
            return None;
        }
        let mut sorted: Vec<u64> = agg.latencies_ms.iter().copied().collect();
        sorted.sort_unstable();
        let rank = ((p.clamp(0.0, 1.0) * sorted.len() as f64).ceil() as usize)
            .saturating_sub(1)
            .min(sorted.len() - 1);
        Some(sorted[rank])
    }
}

fn push_latency(reservoir: &mut VecDeque<u64>, value: u64) {
    if reservoir.len() >= LATENCY_RESERVOIR_SIZE {
        reservoir.pop_front();
    }
    reservoir.push_back(value);
}

/// A platform-neutral rendering of one `MetricsEvent`, ready for a sink.
#[derive(Debug, Clone)]
pub struct AdapterEvent {
    pub service_name: String,
    pub environment: String,
    pub tags: Vec<(String, String)>,
    pub payload: serde_json::Value,
}

/// Subscribes to the bus, formats each event, and delivers it to a
/// user-supplied sink. Uncaught panics/errors inside a sink must not kill the
/// producer — adapters run on their own spawned task.
#[async_trait::async_trait]
pub trait MetricsAdapter: Send + Sync {
    async fn handle(&self, event: AdapterEvent);
}

/// Formats a raw `MetricsEvent` into the adapter-neutral shape every adapter
/// consumes.
pub fn format_event(event: &MetricsEvent, service_name: &str, environment: &str) -> AdapterEvent {
    AdapterEvent {
        service_name: service_name.to_string(),
        environment: environment.to_string(),
        tags: Vec::new(),
        payload: serde_json::to_value(event).unwrap_or(serde_json::Value::Null),
    }
}

/// Prints each event to stdout via `log::info!`; a reference adapter, not a
/// production sink.
pub struct ConsoleAdapter;

#[async_trait::async_trait]
impl MetricsAdapter for ConsoleAdapter {
    async fn handle(&self, event: AdapterEvent) {
        log::info!("metrics[{}/{}]: {}", event.service_name, event.environment, event.payload);
    }
}

/// Wraps another adapter, buffering up to `capacity` events or `flush_interval`,
/// whichever comes first, with a manual `flush`.
pub struct BatchingAdapter {
    inner: Arc<dyn MetricsAdapter>,
    capacity: usize,
    flush_interval: Duration,
    buffer: Mutex<Vec<AdapterEvent>>,
    last_flush: Mutex<Instant>,
}

impl BatchingAdapter {
    pub fn new(inner: Arc<dyn MetricsAdapter>, capacity: usize, flush_interval: Duration) -> Self {
        Self {
            inner,
            capacity,
            flush_interval,
            buffer: Mutex::new(Vec::new()),
            last_flush: Mutex::new(Instant::now()),
        }
    }

    pub async fn flush(&self) {
        let events: Vec<AdapterEvent> = {
            let mut buf = self.buffer.lock().await;
            std::mem::take(&mut *buf)
        };
        *self.last_flush.lock().await = Instant::now();
        for event in events {
            self.inner.handle(event).await;
        }
    }
}

#[async_trait::async_trait]
impl MetricsAdapter for BatchingAdapter {
    async fn handle(&self, event: AdapterEvent) {
        let should_flush = {
            let mut buf = self.buffer.lock().await;
            buf.push(event);
            buf.len() >= self.capacity || self.last_flush.lock().await.elapsed() >= self.flush_interval
        };
        if should_flush {
            self.flush().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::Mutex as TokioMutex;

    #[tokio::test]
    async fn test_fan_out_every_subscriber_sees_every_event() {
        let collector = MetricsCollector::new(true);
        let mut r1 = collector.subscribe();
        let mut r2 = collector.subscribe();

        collector
            .emit(MetricsEvent::RequestStart {
                timestamp_ms: 1,
                request_id: None,
            })
            .await;

        assert!(matches!(r1.recv().await.unwrap(), MetricsEvent::RequestStart { .. }));
        assert!(matches!(r2.recv().await.unwrap(), MetricsEvent::RequestStart { .. }));
    }

    #[tokio::test]
    async fn test_stats_aggregation() {
        let collector = MetricsCollector::new(true);
        collector
            .emit(MetricsEvent::RequestStart {
                timestamp_ms: 0,
                request_id: None,
            })
            .await;
        collector
            .emit(MetricsEvent::RequestSuccess {
                timestamp_ms: 1,
                request_id: None,
                duration_ms: 100,
            })
            .await;
        let stats = collector.stats().await;
        assert_eq!(stats.total_requests, 1);
        assert_eq!(stats.success_count, 1);
        assert_eq!(stats.success_rate(), 1.0);
    }

    #[tokio::test]
    async fn test_latency_percentiles() {
        let collector = MetricsCollector::new(true);
        for ms in [10, 20, 30, 40, 50] {
            collector
                .emit(MetricsEvent::Latency {
                    timestamp_ms: 0,
                    request_id: None,
                    operation: "op".to_string(),
                    duration_ms: ms,
                })
                .await;
        }
        assert_eq!(collector.latency_percentile(0.5).await, Some(30));
        assert_eq!(collector.latency_percentile(1.0).await, Some(50));
    }

    struct RecordingAdapter(Arc<TokioMutex<Vec<AdapterEvent>>>);

    #[async_trait::async_trait]
    impl MetricsAdapter for RecordingAdapter {
        async fn handle(&self, event: AdapterEvent) {
            self.0.lock().await.push(event);
        }
    }

    #[tokio::test]
    async fn test_batching_adapter_flushes_at_capacity() {
        let recorded = Arc::new(TokioMutex::new(Vec::new()));
        let inner = Arc::new(RecordingAdapter(recorded.clone()));
        let batching = BatchingAdapter::new(inner, 2, Duration::from_secs(60));

        batching
            .handle(format_event(
                &MetricsEvent::RequestStart {
                    timestamp_ms: 0,
                    request_id: None,
                },
                "svc",
                "test",
            ))
            .await;
        assert!(recorded.lock().await.is_empty());

        batching
            .handle(format_event(
                &MetricsEvent::RequestStart {
                    timestamp_ms: 1,
                    request_id: None,
                },
                "svc",
                "test",
            ))
            .await;
        assert_eq!(recorded.lock().await.len(), 2);
    }

    #[tokio::test]
    async fn test_batching_adapter_manual_flush() {
        let recorded = Arc::new(TokioMutex::new(Vec::new()));
        let inner = Arc::new(RecordingAdapter(recorded.clone()));
        let batching = BatchingAdapter::new(inner, 10, Duration::from_secs(60));
        batching
            .handle(format_event(
                &MetricsEvent::RequestStart {
                    timestamp_ms: 0,
                    request_id: None,
                },
                "svc",
                "test",
            ))
            .await;
        assert!(recorded.lock().await.is_empty());
        batching.flush().await;
        assert_eq!(recorded.lock().await.len(), 1);
    }

    #[tokio::test]
    async fn test_batching_adapter_flushes_after_interval_even_under_capacity() {
        let recorded = Arc::new(TokioMutex::new(Vec::new()));
        let inner = Arc::new(RecordingAdapter(recorded.clone()));
        let batching = BatchingAdapter::new(inner, 100, Duration::from_millis(20));

        batching
            .handle(format_event(
                &MetricsEvent::RequestStart {
                    timestamp_ms: 0,
                    request_id: None,
                },
                "svc",
                "test",
            ))
            .await;
        assert!(recorded.lock().await.is_empty());

        tokio::time::sleep(Duration::from_millis(25)).await;
        batching
            .handle(format_event(
                &MetricsEvent::RequestStart {
                    timestamp_ms: 1,
                    request_id: None,
                },
                "svc",
                "test",
            ))
            .await;
        assert_eq!(recorded.lock().await.len(), 2);
    }
}
