//! Error types for the generative-UI streaming engine

use std::sync::Arc;
use thiserror::Error;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the engine.
///
/// Variants correspond to the error taxonomy in the design: each carries enough
/// context for the resilience envelope (retry policy, circuit breaker) to decide
/// whether to retry, and for the dispatcher to route it to the error stream.
/// `Clone` so one resolved attempt can be fanned out to every caller coalesced
/// onto it by the request deduplicator.
#[derive(Error, Debug, Clone)]
pub enum Error {
    /// Transport-level I/O failure (connection reset, DNS, TLS, etc.)
    #[error("network error: {0}")]
    Network(Arc<reqwest::Error>),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(Arc<serde_json::Error>),

    /// Per-request wall-clock or stream-inactivity timeout
    #[error("timeout: {0}")]
    Timeout(String),

    /// 401/403 from the upstream endpoint
    #[error("authentication error: {0}")]
    Authentication(String),

    /// 429 from the upstream endpoint
    #[error("rate limited: {message}")]
    RateLimit {
        message: String,
        retry_after: Option<u64>,
    },

    /// 400/422/other non-retryable 4xx
    #[error("validation error: {0}")]
    Validation(String),

    /// 5xx from the upstream endpoint
    #[error("server error: {0}")]
    Server(String),

    /// Malformed framing event or partial JSON that failed to decode
    #[error("stream error: {0}")]
    Stream(String),

    /// The circuit breaker for this route is open
    #[error("circuit open, recovery at {recovery_time_ms}ms (monotonic)")]
    CircuitOpen { recovery_time_ms: u64 },

    /// A catalog ToolSchema could not be converted to the wire tool format
    #[error("tool conversion error: {0}")]
    ToolConversion(String),

    /// A tool_use block's accumulated JSON failed to parse
    #[error("message parse error: {0}")]
    MessageParse(String),

    /// Invalid configuration
    #[error("invalid configuration: {0}")]
    Config(String),

    /// Another request is already in flight on this dispatcher
    #[error("a request is already in flight")]
    InFlight,

    /// The operation was cancelled via dispose()/interrupt()
    #[error("operation cancelled")]
    Cancelled,

    /// Other/uncategorized errors
    #[error("error: {0}")]
    Other(String),
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        Error::Network(Arc::new(e))
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Json(Arc::new(e))
    }
}

impl Error {
    pub fn timeout(msg: impl Into<String>) -> Self {
        Error::Timeout(msg.into())
    }

    pub fn authentication(msg: impl Into<String>) -> Self {
        Error::Authentication(msg.into())
    }

    pub fn rate_limit(msg: impl Into<String>, retry_after: Option<u64>) -> Self {
        Error::RateLimit {
            message: msg.into(),
            retry_after,
        }
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Error::Validation(msg.into())
    }

    pub fn server(msg: impl Into<String>) -> Self {
        Error::Server(msg.into())
    }

    pub fn stream(msg: impl Into<String>) -> Self {
        Error::Stream(msg.into())
    }

    pub fn circuit_open(recovery_time_ms: u64) -> Self {
        Error::CircuitOpen { recovery_time_ms }
    }

    pub fn tool_conversion(msg: impl Into<String>) -> Self {
        Error::ToolConversion(msg.into())
    }

    pub fn message_parse(msg: impl Into<String>) -> Self {
        Error::MessageParse(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Error::Config(msg.into())
    }

    pub fn other(msg: impl Into<String>) -> Self {
        Error::Other(msg.into())
    }

    /// Classify an HTTP status code into the matching error variant (error
    /// routing). `retry_after` carries a `Retry-After` header value already
    /// parsed by the caller; only the 429 case uses it.
    pub fn from_status(status: u16, body: impl Into<String>, retry_after: Option<u64>) -> Self {
        let body = body.into();
        match status {
            401 | 403 => Error::authentication(body),
            429 => Error::rate_limit(body, retry_after),
            400 | 422 => Error::validation(body),
            500..=599 => Error::server(body),
            _ => Error::validation(body),
        }
    }

    /// Whether the resilience envelope should consider retrying this error.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::Network(_)
                | Error::Timeout(_)
                | Error::Server(_)
                | Error::RateLimit { .. }
                | Error::CircuitOpen { .. }
        )
    }

    /// `Some(seconds)` if this error carries a server-advised retry delay.
    pub fn retry_after(&self) -> Option<u64> {
        match self {
            Error::RateLimit { retry_after, .. } => *retry_after,
            _ => None,
        }
    }

    /// Stable variant name for metrics reporting, independent of the
    /// human-readable `Display` message.
    pub fn class(&self) -> &'static str {
        match self {
            Error::Network(_) => "network",
            Error::Json(_) => "json",
            Error::Timeout(_) => "timeout",
            Error::Authentication(_) => "authentication",
            Error::RateLimit { .. } => "rate_limit",
            Error::Validation(_) => "validation",
            Error::Server(_) => "server",
            Error::Stream(_) => "stream",
            Error::CircuitOpen { .. } => "circuit_open",
            Error::ToolConversion(_) => "tool_conversion",
            Error::MessageParse(_) => "message_parse",
            Error::Config(_) => "config",
            Error::InFlight => "in_flight",
            Error::Cancelled => "cancelled",
            Error::Other(_) => "other",
        }
    }
}
