//! # genui-engine
//!
//! A streaming generative-UI engine for LLM chat endpoints: the model is given
//! a small set of UI-construction tools (`begin_rendering`, `surface_update`,
//! `data_model_update`, `delete_surface`), and this crate turns its streamed
//! tool calls into widget-tree updates as they arrive, rather than waiting for
//! the full response.
//!
//! ## Overview
//!
//! A large widget catalog would blow the context window if sent on every
//! request, so the engine can instead advertise two search tools
//! (`search_catalog`, `load_tools`) and resolve the model's catalog lookups
//! locally without a round trip to the application. Around the network call
//! itself sits a resilience envelope: a proactive token-budget rate limiter, a
//! reactive 429 gate, a circuit breaker, and retry with backoff.
//!
//! ## Key Features
//!
//! - **Incremental streaming**: widget messages and text deltas are emitted as
//!   the model's tool-call JSON arrives, not after the stream closes.
//! - **Catalog search**: advertise two tools instead of hundreds of widget
//!   schemas, with local keyword search and on-demand schema loading.
//! - **Resilience envelope**: rate limiting, circuit breaking, and retry with
//!   jittered backoff wrap every upstream call.
//! - **Two dispatch modes**: call Anthropic directly, or route through a proxy.
//! - **Typed metrics bus**: every resilience-envelope transition and stream
//!   event is broadcast to any number of subscribers.
//!
//! ## Example
//!
//! ```rust,no_run
//! use genui_engine::{Config, DispatchMode, Dispatcher, AppMessage};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::builder(DispatchMode::Direct { api_key: "sk-ant-...".into() })
//!         .model("claude-sonnet-4-5")
//!         .build()?;
//!
//!     let dispatcher = Arc::new(Dispatcher::new(config)?);
//!     let mut output = dispatcher.send_request(vec![AppMessage::user_text("Build me a form")])?;
//!
//!     while let Some(widget) = output.widgets.recv().await {
//!         println!("{widget:?}");
//!     }
//!
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! - **types**: value types for tool schemas, widget trees, stream events, and
//!   the wire request/config shapes.
//! - **catalog**: keyword extraction, inverted index, and relevance-scored
//!   search over the widget catalog.
//! - **stream_parser**: incremental accumulation of the upstream's
//!   content-block streaming frames into `StreamEvent`s.
//! - **rate_limit**: proactive sliding-window admission, the reactive 429
//!   gate, and content-hash request deduplication.
//! - **retry**: exponential backoff with jitter.
//! - **circuit_breaker**: closed/open/half-open failure gating.
//! - **metrics**: a typed event bus with a pluggable adapter trait.
//! - **interceptor**: local resolution of the catalog-search tools without a
//!   round trip to the application.
//! - **converter**: application message history to/from the wire format.
//! - **config**: the validate-on-build `Config`/`ConfigBuilder` pair.
//! - **error**: the `Error` enum and `Result<T>` alias used throughout.
//! - **dispatcher**: ties the above together into one resilient, streaming
//!   request pipeline.

// ============================================================================
// MODULE DECLARATIONS
// ============================================================================
// These modules are private (internal implementation details) unless
// explicitly re-exported through `pub use` statements below.

/// Inverted-index keyword search over the widget catalog.
/// Provides `CatalogIndex`, relevance scoring, and the tokenizer helpers the
/// index is built on.
mod catalog;

/// Circuit breaker for the upstream connection: closed/open/half-open state
/// with a cooldown before probing recovery.
mod circuit_breaker;

/// Engine configuration: the validate-on-build `Config`/`ConfigBuilder` pair
/// and the `Direct`/`Proxy` dispatch modes.
mod config;

/// Application chat history to/from the wire format, plus history pruning and
/// the `WidgetMessage` to `SurfaceMessage` conversion.
mod converter;

/// Error types and conversions for comprehensive error handling throughout
/// the engine. Defines the `Error` enum and `Result<T>` type alias used
/// across all public APIs.
mod error;

/// Local resolution of the `search_catalog`/`load_tools` tool calls, so the
/// application never has to round-trip a catalog lookup back to the model.
mod interceptor;

/// Typed metrics event bus with a pluggable adapter trait for forwarding to
/// an observability backend.
mod metrics;

/// Proactive sliding-window rate limiting, the reactive 429 gate, and
/// content-hash request deduplication.
mod rate_limit;

/// Exponential backoff with jitter for retrying transient upstream failures.
pub mod retry;

/// Incremental parser for the upstream's content-block streaming frames.
mod stream_parser;

/// Core value types: tool schemas, widget trees, parsed messages, stream
/// events, and the wire request/config shapes.
mod types;

/// The request dispatcher: builds the wire request, enforces single-in-flight,
/// wraps the resilience envelope around opening a streaming connection, and
/// tees the parsed stream into widget/text/error channels.
mod dispatcher;

// ============================================================================
// PUBLIC EXPORTS
// ============================================================================
// These items form the public API of the crate. Everything else is internal.

// --- Dispatcher ---

pub use dispatcher::{Dispatcher, DispatchOutput, control_tool_schemas, search_tool_schemas};

// --- Configuration ---

pub use config::{Config, ConfigBuilder, DeduplicationConfig, DispatchMode};

// --- Error Handling ---

pub use error::{Error, Result};

// --- Message Conversion ---

pub use converter::{AppMessage, AppRole, SurfaceMessage, widget_message_to_surface};

// --- Catalog ---

pub use catalog::{CatalogIndex, SearchHit};

// --- Stream Parsing ---

pub use stream_parser::StreamParser;

// --- Core Types ---

pub use types::{
    ApiRequest, Component, DataBinding, DataBindingEntry, GLOBAL_SCOPE, IndexedCatalogItem,
    ParseResult, StreamEvent, ToolName, ToolSchema, WidgetChild, WidgetMessage, WidgetNode,
    WidgetRef, WireContent, WireContentPart, WireMessage, WireRole,
};

// --- Resilience Envelope ---

pub use circuit_breaker::{CircuitBreaker, CircuitBreakerConfig};
pub use types::CircuitBreakerState;
pub use rate_limit::{ProactiveRateLimiter, RateLimitConfig, RateLimitGate, RequestDeduplicator};
pub use retry::RetryPolicy;

// --- Metrics ---

pub use metrics::{AdapterEvent, BatchingAdapter, ConsoleAdapter, MetricsAdapter, MetricsCollector, Stats, format_event};
pub use types::MetricsEvent;

// --- Tool-Use Interception ---

pub use interceptor::{LoadToolsInput, LoadToolsResult, SearchCatalogInput, SearchCatalogResult, ToolUseInterceptor};

// ============================================================================
// CONVENIENCE PRELUDE
// ============================================================================

/// Convenience module containing the most commonly used types and functions.
/// Import with `use genui_engine::prelude::*;` to get everything you need for
/// typical usage.
///
/// This includes:
/// - Configuration: `Config`, `ConfigBuilder`, `DispatchMode`
/// - Dispatch: `Dispatcher`, `DispatchOutput`
/// - Messages: `AppMessage`, `AppRole`, `SurfaceMessage`
/// - Types: `WidgetMessage`, `WidgetNode`, `ToolSchema`
/// - Errors: `Error`, `Result`
pub mod prelude {
    pub use crate::{
        AppMessage, AppRole, Config, ConfigBuilder, DispatchMode, DispatchOutput, Dispatcher,
        Error, Result, SurfaceMessage, ToolSchema, WidgetMessage, WidgetNode,
    };
}
