//! Request dispatcher (C8).
//!
//! Builds the wire request, enforces single-in-flight, wraps the resilience
//! envelope (rate limit -> dedup gate -> breaker -> retry) around opening a
//! streaming connection, and tees the parsed stream into three
//! application-visible channels: widgets, text, errors.

use crate::catalog::CatalogIndex;
use crate::circuit_breaker::CircuitBreaker;
use crate::config::{Config, DispatchMode};
use crate::converter::{self, AppMessage};
use crate::interceptor::{LoadToolsInput, SearchCatalogInput, ToolUseInterceptor};
use crate::metrics::MetricsCollector;
use crate::rate_limit::{dedup_key, ProactiveRateLimiter, RateLimitGate, RequestDeduplicator};
use crate::retry::{self, RetryPolicy};
use crate::stream_parser::StreamParser;
use crate::types::{ApiRequest, MetricsEvent, StreamEvent, ToolSchema, WidgetMessage, WireContent};
use crate::{Error, Result};
use eventsource_stream::Eventsource;
use futures::stream::{BoxStream, StreamExt};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::broadcast;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_stream::wrappers::BroadcastStream;

const ANTHROPIC_API_URL: &str = "https://api.anthropic.com/v1/messages";
const ANTHROPIC_VERSION: &str = "2023-06-01";
const MAX_INTERCEPT_TURNS: u32 = 8;
const DEDUP_FANOUT_CAPACITY: usize = 256;

fn object_schema(properties: serde_json::Value, required: &[&str]) -> HashMap<String, serde_json::Value> {
    let mut map = HashMap::new();
    map.insert("type".to_string(), serde_json::Value::String("object".to_string()));
    map.insert("properties".to_string(), properties);
    if !required.is_empty() {
        map.insert(
            "required".to_string(),
            serde_json::Value::Array(required.iter().map(|r| serde_json::Value::String(r.to_string())).collect()),
        );
    }
    map
}

/// The four fixed UI control tools every request advertises.
pub fn control_tool_schemas() -> Vec<ToolSchema> {
    vec![
        ToolSchema::new(
            "begin_rendering",
            "Begin rendering a new UI surface",
            object_schema(
                serde_json::json!({
                    "surfaceId": {"type": "string", "description": "Unique identifier for the surface"},
                    "parentSurfaceId": {"type": "string", "description": "Optional parent surface id"},
                    "rootId": {"type": "string", "description": "Root node id, defaults to 'root'"},
                    "metadata": {"type": "object", "description": "Optional metadata map"},
                }),
                &["surfaceId"],
            ),
            vec!["surfaceId".to_string()],
        ),
        ToolSchema::new(
            "surface_update",
            "Replace or append widgets on an existing surface",
            object_schema(
                serde_json::json!({
                    "surfaceId": {"type": "string", "description": "Target surface id"},
                    "widgets": {"type": "array", "description": "Ordered list of widget nodes"},
                    "append": {"type": "boolean", "description": "Append instead of replace"},
                }),
                &["surfaceId", "widgets"],
            ),
            vec!["surfaceId".to_string(), "widgets".to_string()],
        ),
        ToolSchema::new(
            "data_model_update",
            "Update bound data values",
            object_schema(
                serde_json::json!({
                    "updates": {"type": "object", "description": "Map of path to new value"},
                    "scope": {"type": "string", "description": "Optional data scope"},
                }),
                &["updates"],
            ),
            vec!["updates".to_string()],
        ),
        ToolSchema::new(
            "delete_surface",
            "Delete a previously rendered surface",
            object_schema(
                serde_json::json!({
                    "surfaceId": {"type": "string", "description": "Surface to delete"},
                    "cascade": {"type": "boolean", "description": "Delete descendant surfaces too"},
                }),
                &["surfaceId"],
            ),
            vec!["surfaceId".to_string()],
        ),
    ]
}

/// The two catalog-search tools, advertised only in search mode.
pub fn search_tool_schemas() -> Vec<ToolSchema> {
    vec![
        ToolSchema::new(
            "search_catalog",
            "Search the widget catalog by free-text query",
            object_schema(
                serde_json::json!({
                    "query": {"type": "string", "description": "Free-text search query"},
                    "categories": {"type": "array", "description": "Optional category filter"},
                    "max_results": {"type": "number", "description": "Maximum results to return, default 10"},
                }),
                &["query"],
            ),
            vec!["query".to_string()],
        ),
        ToolSchema::new(
            "load_tools",
            "Load one or more widget tool schemas by name for use this session",
            object_schema(
                serde_json::json!({
                    "tool_names": {"type": "array", "description": "Names of tools to load"},
                }),
                &["tool_names"],
            ),
            vec!["tool_names".to_string()],
        ),
    ]
}

/// Output of one dispatched request: three independently drainable streams.
pub struct DispatchOutput {
    pub widgets: UnboundedReceiver<WidgetMessage>,
    pub text: UnboundedReceiver<String>,
    pub errors: UnboundedReceiver<Error>,
}

/// Rough token estimate (chars / 4) used for the proactive rate limiter's
/// token-budget window; the engine never sees the upstream's actual usage
/// count, so this estimate is what gets recorded.
fn estimate_tokens(request: &ApiRequest) -> u32 {
    let mut chars = request.system.as_ref().map(String::len).unwrap_or(0);
    for message in &request.messages {
        chars += match &message.content {
            WireContent::Text(text) => text.len(),
            WireContent::Blocks(parts) => serde_json::to_string(parts).map(|s| s.len()).unwrap_or(0),
        };
    }
    ((chars / 4) as u32).max(1)
}

type FrameItem = Result<serde_json::Value>;
type FramingStream = BoxStream<'static, FrameItem>;

/// What the dedup cache actually stores: either a broadcast sender every
/// coalesced caller can subscribe to for its own full-fidelity view of the
/// one live stream, or the error the single upstream attempt failed with.
type DedupOutcome = Result<broadcast::Sender<FrameItem>>;

/// Direct/Proxy resilience-wrapped request pipeline.
pub struct Dispatcher {
    config: Config,
    http_client: reqwest::Client,
    in_flight: Arc<AtomicBool>,
    circuit_breaker: CircuitBreaker,
    retry_policy: RetryPolicy,
    rate_limiter: ProactiveRateLimiter,
    gate: RateLimitGate,
    deduplicator: RequestDeduplicator<DedupOutcome>,
    metrics: Arc<MetricsCollector>,
    catalog: Arc<Mutex<CatalogIndex>>,
    interceptor: Arc<ToolUseInterceptor>,
    loaded_schemas: Mutex<Vec<ToolSchema>>,
}

impl Dispatcher {
    pub fn new(config: Config) -> Result<Self> {
        let http_client = reqwest::Client::builder().timeout(config.timeout).build()?;
        let circuit_breaker = CircuitBreaker::new("dispatcher", config.circuit_breaker_config.clone());
        let retry_policy = RetryPolicy::new().with_max_attempts(config.retry_attempts.max(1));
        let rate_limiter = ProactiveRateLimiter::new(config.rate_limit_config.clone());
        let deduplicator = RequestDeduplicator::new(
            config.deduplication_config.window,
            config.deduplication_config.max_cache_size,
        );
        let catalog = Arc::new(Mutex::new(CatalogIndex::new()));
        let interceptor = Arc::new(ToolUseInterceptor::new(catalog.clone(), config.max_loaded_tools_per_session));

        Ok(Self {
            config,
            http_client,
            in_flight: Arc::new(AtomicBool::new(false)),
            circuit_breaker,
            retry_policy,
            rate_limiter,
            gate: RateLimitGate::new(),
            deduplicator,
            metrics: Arc::new(MetricsCollector::new(true)),
            catalog,
            interceptor,
            loaded_schemas: Mutex::new(Vec::new()),
        })
    }

    pub fn metrics(&self) -> Arc<MetricsCollector> {
        self.metrics.clone()
    }

    /// Registers the embedder's full widget catalog so C7/C2 can search it.
    pub async fn register_catalog_tools(&self, schemas: Vec<ToolSchema>) {
        let mut catalog = self.catalog.lock().unwrap();
        for schema in schemas {
            catalog.add(schema);
        }
    }

    /// Control tools plus whatever widget tools are currently effective: the
    /// two search tools plus any loaded-so-far widget schemas in search mode,
    /// or the full catalog otherwise.
    pub async fn tools(&self) -> Vec<ToolSchema> {
        let mut tools = control_tool_schemas();
        if self.config.enable_tool_search {
            tools.extend(search_tool_schemas());
            tools.extend(self.loaded_schemas.lock().unwrap().iter().cloned());
        } else {
            let catalog = self.catalog.lock().unwrap();
            let names = catalog.all_names().to_vec();
            tools.extend(catalog.get_by_names(&names).into_iter().map(|item| item.schema.clone()));
        }
        tools
    }

    /// Releases the in-flight guard. Any in-progress HTTP body is dropped
    /// with the stream task when its channels are no longer polled.
    pub fn dispose(&self) {
        self.in_flight.store(false, Ordering::SeqCst);
    }

    /// Fails with `Error::InFlight` if another request is already running on
    /// this dispatcher. Otherwise spawns the drive loop and returns
    /// immediately with the three output channels.
    pub fn send_request(self: &Arc<Self>, history: Vec<AppMessage>) -> Result<DispatchOutput> {
        if self.in_flight.compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst).is_err() {
            return Err(Error::InFlight);
        }

        let (widgets_tx, widgets_rx) = mpsc::unbounded_channel();
        let (text_tx, text_rx) = mpsc::unbounded_channel();
        let (errors_tx, errors_rx) = mpsc::unbounded_channel();

        let dispatcher = self.clone();
        let disposer = dispatcher.clone();
        tokio::spawn(async move {
            dispatcher.drive(history, widgets_tx, text_tx, errors_tx).await;
            disposer.in_flight.store(false, Ordering::SeqCst);
        });

        Ok(DispatchOutput {
            widgets: widgets_rx,
            text: text_rx,
            errors: errors_rx,
        })
    }

    async fn drive(
        self: Arc<Self>,
        mut conversation: Vec<AppMessage>,
        widgets_tx: UnboundedSender<WidgetMessage>,
        text_tx: UnboundedSender<String>,
        errors_tx: UnboundedSender<Error>,
    ) {
        for _ in 0..MAX_INTERCEPT_TURNS {
            let request = match self.build_request(&conversation).await {
                Ok(r) => r,
                Err(e) => {
                    let _ = errors_tx.send(e);
                    return;
                }
            };

            let stream = match self.open_with_envelope(request).await {
                Ok(s) => s,
                Err(e) => {
                    let _ = errors_tx.send(e);
                    return;
                }
            };

            let pending_calls = self.consume_stream(stream, &widgets_tx, &text_tx, &errors_tx).await;

            if pending_calls.is_empty() {
                return;
            }

            let mut answered_any = false;
            for (tool_use_id, name, input) in pending_calls {
                let input_for_history = input.clone();
                if let Some(result) = self.handle_intercepted_call(&name, input).await {
                    conversation.push(AppMessage {
                        role: converter::AppRole::Assistant,
                        text: None,
                        tool_use: Some((tool_use_id.clone(), name, input_for_history)),
                        tool_result: None,
                        image_source: None,
                    });
                    conversation.push(AppMessage::tool_result(tool_use_id, result));
                    answered_any = true;
                }
            }

            if !answered_any {
                return;
            }
        }

        let _ = errors_tx.send(Error::other("exceeded maximum tool-interception turns for one request"));
    }

    async fn handle_intercepted_call(&self, name: &str, input: serde_json::Value) -> Option<serde_json::Value> {
        match name {
            "search_catalog" => {
                let parsed: SearchCatalogInput = serde_json::from_value(input).ok()?;
                let result = self.interceptor.search_catalog(parsed);
                serde_json::to_value(result).ok()
            }
            "load_tools" => {
                let parsed: LoadToolsInput = serde_json::from_value(input).ok()?;
                let mut loaded_schemas = self.loaded_schemas.lock().unwrap();
                let result = self.interceptor.load_tools(parsed, |schemas| loaded_schemas.extend(schemas));
                serde_json::to_value(result).ok()
            }
            _ => None,
        }
    }

    async fn build_request(&self, history: &[AppMessage]) -> Result<ApiRequest> {
        let system = converter::extract_system_context(history);
        let windowed = if self.config.include_history {
            converter::prune(history, self.config.max_history_messages.unwrap_or(usize::MAX))
        } else {
            history.last().map(std::slice::from_ref).unwrap_or(&[])
        };
        let messages = converter::to_wire_history(windowed);
        if messages.is_empty() {
            return Err(Error::validation("no messages to send"));
        }

        Ok(ApiRequest {
            messages,
            max_tokens: self.config.max_tokens,
            system,
            tools: Some(self.tools().await),
            model: self.config.model.clone(),
            temperature: self.config.temperature,
            top_p: self.config.top_p,
            top_k: self.config.top_k,
            stop_sequences: self.config.stop_sequences.clone(),
            stream: true,
        })
    }

    /// Wraps opening the stream with the full resilience envelope: proactive
    /// rate limiting, the dedup gate, the reactive 429 gate, the circuit
    /// breaker, and retry with backoff. Emits the request-lifecycle metrics
    /// (`RequestStart`/`RequestSuccess`/`RequestFailure`/`Latency`) that
    /// `MetricsCollector::stats()` aggregates.
    async fn open_with_envelope(&self, request: ApiRequest) -> Result<FramingStream> {
        let estimated_tokens = estimate_tokens(&request);
        let started_at = Instant::now();
        self.metrics
            .emit(MetricsEvent::RequestStart { timestamp_ms: 0, request_id: None })
            .await;

        let proactive_wait = self.rate_limiter.wait_time(estimated_tokens).await;
        if !proactive_wait.is_zero() {
            self.metrics
                .emit(MetricsEvent::RateLimit {
                    timestamp_ms: 0,
                    request_id: None,
                    wait_time_ms: proactive_wait.as_millis() as u64,
                    scope: "proactive".to_string(),
                })
                .await;
        }

        let key = self.dedup_key_for(&request);
        let outcome: DedupOutcome = self
            .rate_limiter
            .execute(estimated_tokens, || async move {
                self.deduplicator.execute(key, || self.open_and_fan_out(&request)).await
            })
            .await;

        let duration_ms = started_at.elapsed().as_millis() as u64;
        match &outcome {
            Ok(_) => {
                self.metrics
                    .emit(MetricsEvent::RequestSuccess { timestamp_ms: 0, request_id: None, duration_ms })
                    .await;
            }
            Err(e) => {
                self.metrics
                    .emit(MetricsEvent::RequestFailure {
                        timestamp_ms: 0,
                        request_id: None,
                        error_class: e.class().to_string(),
                        retryable: e.is_retryable(),
                    })
                    .await;
            }
        }
        self.metrics
            .emit(MetricsEvent::Latency {
                timestamp_ms: 0,
                request_id: None,
                operation: "open_with_envelope".to_string(),
                duration_ms,
            })
            .await;

        let sender = outcome?;
        Ok(BroadcastStream::new(sender.subscribe())
            .map(|item| match item {
                Ok(frame) => frame,
                Err(BroadcastStreamRecvError::Lagged(skipped)) => {
                    Err(Error::stream(format!("dedup fan-out lagged by {skipped} frame(s)")))
                }
            })
            .boxed())
    }

    /// Hash of the fields that make two requests interchangeable for dedup
    /// purposes. `hash_messages` trades full message-content fidelity for a
    /// cheap message-count proxy when the caller doesn't need it.
    fn dedup_key_for(&self, request: &ApiRequest) -> String {
        let messages_repr = if self.config.deduplication_config.hash_messages {
            serde_json::to_string(&request.messages).unwrap_or_default()
        } else {
            request.messages.len().to_string()
        };
        dedup_key(&messages_repr, request.model.as_deref().unwrap_or(""), request.max_tokens)
    }

    /// Runs one gated/retried/breaker-guarded attempt and, on success, drains
    /// the resulting stream into a broadcast channel so every caller
    /// coalesced onto this dedup entry gets its own full view of the frames.
    async fn open_and_fan_out(&self, request: &ApiRequest) -> DedupOutcome {
        let mut stream = self.gate.wait_then(|| self.attempt_once(request)).await?;
        let (tx, _rx) = broadcast::channel(DEDUP_FANOUT_CAPACITY);
        let fan_tx = tx.clone();
        tokio::spawn(async move {
            while let Some(item) = stream.next().await {
                if fan_tx.send(item).is_err() {
                    break;
                }
            }
        });
        Ok(tx)
    }

    /// One circuit-breaker-guarded, retried attempt to open the stream.
    /// `retry_with_backoff`'s callback and the breaker's `check_state`/
    /// `record_*` all take synchronous `FnMut(MetricsEvent)` callbacks, so
    /// each stage buffers its events locally and this drains them onto the
    /// async metrics bus right after.
    async fn attempt_once(&self, request: &ApiRequest) -> Result<FramingStream> {
        let mut pending = Vec::new();

        if !self.config.disable_circuit_breaker {
            let check = {
                let mut emit = |e: MetricsEvent| pending.push(e);
                self.circuit_breaker.check_state(&mut emit).await
            };
            self.drain_metrics(&mut pending).await;
            check?;
        }

        let attempt_result = retry::retry_with_backoff(
            &self.retry_policy,
            || open_stream_once(&self.http_client, &self.config, request),
            |e| pending.push(e),
        )
        .await;
        self.drain_metrics(&mut pending).await;

        if !self.config.disable_circuit_breaker {
            {
                let mut emit = |e: MetricsEvent| pending.push(e);
                match &attempt_result {
                    Ok(_) => self.circuit_breaker.record_success(&mut emit).await,
                    Err(_) => self.circuit_breaker.record_failure(&mut emit).await,
                }
            }
            self.drain_metrics(&mut pending).await;
        }

        if let Err(Error::RateLimit { retry_after, .. }) = &attempt_result {
            let delay = retry_after.map(Duration::from_secs).unwrap_or(Duration::from_secs(60));
            self.rate_limiter.record_server_rate_limit(delay).await;
            self.gate.set(Some(delay)).await;
        }

        attempt_result
    }

    async fn drain_metrics(&self, pending: &mut Vec<MetricsEvent>) {
        for event in pending.drain(..) {
            self.metrics.emit(event).await;
        }
    }

    async fn consume_stream(
        &self,
        mut framing: FramingStream,
        widgets_tx: &UnboundedSender<WidgetMessage>,
        text_tx: &UnboundedSender<String>,
        errors_tx: &UnboundedSender<Error>,
    ) -> Vec<(String, String, serde_json::Value)> {
        let mut parser = StreamParser::new();
        let timeout = self.config.stream_inactivity_timeout;

        loop {
            let next = tokio::time::timeout(timeout, framing.next()).await;
            let event = match next {
                Ok(Some(Ok(value))) => value,
                Ok(Some(Err(e))) => {
                    let _ = errors_tx.send(e);
                    continue;
                }
                Ok(None) => break,
                Err(_) => {
                    self.metrics
                        .emit(MetricsEvent::StreamInactivity {
                            timestamp_ms: 0,
                            request_id: None,
                            timeout_ms: timeout.as_millis() as u64,
                        })
                        .await;
                    let _ = errors_tx.send(Error::timeout("stream inactivity timeout exceeded"));
                    break;
                }
            };

            let mut terminal = false;
            for stream_event in parser.feed(&event) {
                match stream_event {
                    StreamEvent::TextDelta { text } => {
                        let _ = text_tx.send(text);
                    }
                    StreamEvent::WidgetMessageEvent { message } => {
                        let _ = widgets_tx.send(message);
                    }
                    StreamEvent::Error {
                        kind,
                        message,
                        retryable: _,
                        http_status,
                        retry_after,
                    } => {
                        let err = match http_status {
                            Some(status) => Error::from_status(status, message, None),
                            None => Error::stream(format!("{kind}: {message}")),
                        };
                        let err = match retry_after {
                            Some(ra) => Error::rate_limit(err.to_string(), Some(ra)),
                            None => err,
                        };
                        let _ = errors_tx.send(err);
                    }
                    StreamEvent::Complete => terminal = true,
                    StreamEvent::RawDelta { .. } | StreamEvent::Thinking { .. } => {}
                }
            }
            if terminal {
                break;
            }
        }

        parser.take_other_tool_calls()
    }
}

async fn open_stream_once(client: &reqwest::Client, config: &Config, request: &ApiRequest) -> Result<FramingStream> {
    let (url, mut builder) = match &config.mode {
        DispatchMode::Direct { api_key } => {
            let builder = client
                .post(ANTHROPIC_API_URL)
                .header("x-api-key", api_key)
                .header("anthropic-version", ANTHROPIC_VERSION);
            (ANTHROPIC_API_URL.to_string(), builder)
        }
        DispatchMode::Proxy { endpoint, auth_token } => {
            let mut builder = client.post(endpoint);
            if let Some(token) = auth_token {
                builder = builder.header("Authorization", format!("Bearer {token}"));
            }
            (endpoint.clone(), builder)
        }
    };
    builder = builder
        .header("Content-Type", "application/json")
        .header("Accept", "text/event-stream")
        .json(request);

    let response = builder.send().await?;
    if !response.status().is_success() {
        let status = response.status().as_u16();
        let retry_after = response
            .headers()
            .get("retry-after")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<u64>().ok());
        let body = response.text().await.unwrap_or_default();
        return Err(Error::from_status(status, body, retry_after));
    }
    log::debug!("opened stream to {url}");

    let framing = response
        .bytes_stream()
        .eventsource()
        .filter_map(|event| async move {
            match event {
                Ok(ev) if ev.data == "[DONE]" || ev.data.trim().is_empty() => None,
                Ok(ev) => match serde_json::from_str::<serde_json::Value>(&ev.data) {
                    Ok(value) => Some(Ok(value)),
                    Err(e) => Some(Err(Error::stream(format!("malformed SSE payload: {e}")))),
                },
                Err(e) => Some(Err(Error::stream(format!("SSE framing error: {e}")))),
            }
        })
        .boxed();

    Ok(framing)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_control_tool_schemas_are_the_fixed_four() {
        let tools = control_tool_schemas();
        let names: Vec<&str> = tools.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(
            names,
            vec!["begin_rendering", "surface_update", "data_model_update", "delete_surface"]
        );
        assert_eq!(tools[0].required, vec!["surfaceId".to_string()]);
    }

    #[test]
    fn test_search_tool_schemas_are_the_fixed_two() {
        let tools = search_tool_schemas();
        let names: Vec<&str> = tools.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, vec!["search_catalog", "load_tools"]);
    }

    #[test]
    fn test_estimate_tokens_is_nonzero_for_nonempty_request() {
        let request = ApiRequest {
            messages: vec![crate::types::WireMessage::text(crate::types::WireRole::User, "hello there")],
            max_tokens: 100,
            system: None,
            tools: None,
            model: None,
            temperature: None,
            top_p: None,
            top_k: None,
            stop_sequences: None,
            stream: true,
        };
        assert!(estimate_tokens(&request) >= 1);
    }

    fn sample_request(text: &str) -> ApiRequest {
        ApiRequest {
            messages: vec![crate::types::WireMessage::text(crate::types::WireRole::User, text)],
            max_tokens: 100,
            system: None,
            tools: None,
            model: Some("claude".to_string()),
            temperature: None,
            top_p: None,
            top_k: None,
            stop_sequences: None,
            stream: true,
        }
    }

    #[tokio::test]
    async fn test_dedup_key_for_distinguishes_message_content_by_default() {
        let config = Config::builder(DispatchMode::Direct { api_key: "k".to_string() })
            .build()
            .unwrap();
        let dispatcher = Dispatcher::new(config).unwrap();
        let a = dispatcher.dedup_key_for(&sample_request("hello"));
        let b = dispatcher.dedup_key_for(&sample_request("goodbye"));
        let a_again = dispatcher.dedup_key_for(&sample_request("hello"));
        assert_ne!(a, b);
        assert_eq!(a, a_again);
    }

    #[tokio::test]
    async fn test_dedup_key_for_collapses_to_message_count_when_hashing_disabled() {
        let config = Config::builder(DispatchMode::Direct { api_key: "k".to_string() })
            .deduplication_config(crate::config::DeduplicationConfig {
                hash_messages: false,
                ..Default::default()
            })
            .build()
            .unwrap();
        let dispatcher = Dispatcher::new(config).unwrap();
        let a = dispatcher.dedup_key_for(&sample_request("hello"));
        let b = dispatcher.dedup_key_for(&sample_request("goodbye"));
        assert_eq!(a, b, "same message count should collapse to the same key when content hashing is off");
    }

    #[tokio::test]
    async fn test_second_concurrent_send_request_fails_in_flight() {
        let config = Config::builder(DispatchMode::Direct { api_key: "k".to_string() })
            .build()
            .unwrap();
        let dispatcher = Arc::new(Dispatcher::new(config).unwrap());
        dispatcher.in_flight.store(true, Ordering::SeqCst);
        let result = dispatcher.send_request(vec![AppMessage::user_text("hi")]);
        assert!(matches!(result, Err(Error::InFlight)));
    }

    #[tokio::test]
    async fn test_dispose_clears_in_flight_guard() {
        let config = Config::builder(DispatchMode::Direct { api_key: "k".to_string() })
            .build()
            .unwrap();
        let dispatcher = Dispatcher::new(config).unwrap();
        dispatcher.in_flight.store(true, Ordering::SeqCst);
        dispatcher.dispose();
        assert!(!dispatcher.in_flight.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_tools_in_non_search_mode_includes_registered_catalog() {
        let config = Config::builder(DispatchMode::Direct { api_key: "k".to_string() })
            .build()
            .unwrap();
        let dispatcher = Dispatcher::new(config).unwrap();
        dispatcher
            .register_catalog_tools(vec![ToolSchema::new("date_picker", "pick a date", HashMap::new(), vec![])])
            .await;
        let tools = dispatcher.tools().await;
        assert!(tools.iter().any(|t| t.name == "date_picker"));
        assert_eq!(tools.len(), control_tool_schemas().len() + 1);
    }

    #[tokio::test]
    async fn test_tools_in_search_mode_advertises_search_tools_not_full_catalog() {
        let config = Config::builder(DispatchMode::Direct { api_key: "k".to_string() })
            .enable_tool_search(true)
            .build()
            .unwrap();
        let dispatcher = Dispatcher::new(config).unwrap();
        dispatcher
            .register_catalog_tools(vec![ToolSchema::new("date_picker", "pick a date", HashMap::new(), vec![])])
            .await;
        let tools = dispatcher.tools().await;
        assert!(tools.iter().any(|t| t.name == "search_catalog"));
        assert!(tools.iter().any(|t| t.name == "load_tools"));
        assert!(!tools.iter().any(|t| t.name == "date_picker"));
    }
}
