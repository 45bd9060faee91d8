//! Core value types for the generative-UI streaming engine.
//!
//! Tool schemas, widget trees, parsed messages, stream events, and the wire
//! request/config shapes are all immutable value types with `serde` round-trip
//! support. Sum types (`WidgetMessage`, `StreamEvent`, `MetricsEvent`) are modeled
//! as tagged enums with exhaustive matching, never as a discriminator field plus
//! subtype fan-out.

use crate::Error;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

// ============================================================================
// NEWTYPE WRAPPERS
// ============================================================================

/// Validated, non-empty tool schema name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ToolName(String);

impl ToolName {
    pub fn new(name: impl Into<String>) -> crate::Result<Self> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(Error::validation("tool name cannot be empty or whitespace"));
        }
        Ok(ToolName(name))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ToolName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ============================================================================
// C1: TOOL SCHEMA & MESSAGE MODEL
// ============================================================================

/// Immutable description of a tool the model may invoke, created at
/// catalog-build time and destroyed with the catalog.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolSchema {
    pub name: String,
    pub description: String,
    pub input_schema: HashMap<String, serde_json::Value>,
    pub required: Vec<String>,
}

impl ToolSchema {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        input_schema: HashMap<String, serde_json::Value>,
        required: Vec<String>,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            input_schema,
            required,
        }
    }
}

/// Either a fully-declared widget subtree or a reference to a previously
/// declared id (the `_ref` placeholder type, resolved at render time by the
/// external UI layer).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum WidgetChild {
    Node(WidgetNode),
    Ref(WidgetRef),
}

/// Reserved placeholder node: a string child reference decodes into this.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WidgetRef {
    #[serde(rename = "type")]
    pub kind: String,
    pub id: String,
}

impl WidgetRef {
    pub const TYPE: &'static str = "_ref";

    pub fn new(id: impl Into<String>) -> Self {
        Self {
            kind: Self::TYPE.to_string(),
            id: id.into(),
        }
    }
}

/// Either a single data-binding path or a map from property name to
/// path/mode record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DataBinding {
    Path(String),
    Map(HashMap<String, DataBindingEntry>),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataBindingEntry {
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mode: Option<String>,
}

/// A node in a widget tree. Owns its children exclusively.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WidgetNode {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub properties: HashMap<String, serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub children: Option<Vec<WidgetChild>>,
    #[serde(rename = "dataBinding", default, skip_serializing_if = "Option::is_none")]
    pub data_binding: Option<DataBinding>,
}

impl WidgetNode {
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            id: None,
            properties: HashMap::new(),
            children: None,
            data_binding: None,
        }
    }

    /// Decode a raw JSON widget value, accepting object children and string
    /// reference children; anything else is a format error.
    pub fn from_value(value: &serde_json::Value) -> crate::Result<Self> {
        let obj = value
            .as_object()
            .ok_or_else(|| Error::message_parse("widget node must be a JSON object"))?;

        let kind = obj
            .get("type")
            .and_then(|v| v.as_str())
            .ok_or_else(|| Error::message_parse("widget node missing required 'type'"))?
            .to_string();

        let id = obj
            .get("id")
            .and_then(|v| v.as_str())
            .map(|s| s.to_string());

        let properties = obj
            .get("properties")
            .and_then(|v| v.as_object())
            .map(|m| m.clone().into_iter().collect())
            .unwrap_or_default();

        let children = match obj.get("children") {
            None | Some(serde_json::Value::Null) => None,
            Some(serde_json::Value::Array(items)) => {
                let mut out = Vec::with_capacity(items.len());
                for item in items {
                    out.push(match item {
                        serde_json::Value::String(id) => WidgetChild::Ref(WidgetRef::new(id)),
                        serde_json::Value::Object(_) => WidgetChild::Node(Self::from_value(item)?),
                        _ => {
                            return Err(Error::message_parse(
                                "widget child must be an object or a string reference",
                            ));
                        }
                    });
                }
                Some(out)
            }
            Some(_) => {
                return Err(Error::message_parse("widget 'children' must be an array"));
            }
        };

        let data_binding = match obj.get("dataBinding") {
            None | Some(serde_json::Value::Null) => None,
            Some(v) => Some(
                serde_json::from_value(v.clone())
                    .map_err(|e| Error::message_parse(format!("invalid dataBinding: {e}")))?,
            ),
        };

        Ok(Self {
            kind,
            id,
            properties,
            children,
            data_binding,
        })
    }
}

/// One of the four UI surface mutation messages the model emits via its
/// control tools. A sum type with exhaustive matching, never subtype fan-out.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum WidgetMessage {
    BeginRendering {
        surface_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        parent_surface_id: Option<String>,
        #[serde(default = "default_root_id")]
        root_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        metadata: Option<HashMap<String, serde_json::Value>>,
    },
    SurfaceUpdate {
        surface_id: String,
        widgets: Vec<WidgetNode>,
        #[serde(default)]
        append: bool,
    },
    DataModelUpdate {
        updates: HashMap<String, serde_json::Value>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        scope: Option<String>,
    },
    DeleteSurface {
        surface_id: String,
        #[serde(default = "default_cascade")]
        cascade: bool,
    },
}

fn default_root_id() -> String {
    "root".to_string()
}

fn default_cascade() -> bool {
    true
}

/// Reserved identifier used when a `DataModelUpdate` carries no explicit scope.
pub const GLOBAL_SCOPE: &str = "__global__";

/// Accumulated output of one streamed model turn.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ParseResult {
    pub widgets: Vec<WidgetMessage>,
    pub text: String,
    pub has_tool_use: bool,
}

impl ParseResult {
    pub fn is_empty(&self) -> bool {
        self.widgets.is_empty() && self.text.is_empty()
    }
}

/// One emitted event from the incremental stream parser.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    TextDelta {
        text: String,
    },
    WidgetMessageEvent {
        message: WidgetMessage,
    },
    RawDelta {
        raw: serde_json::Value,
    },
    Thinking {
        content: String,
        is_complete: bool,
    },
    Complete,
    Error {
        kind: String,
        message: String,
        retryable: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        http_status: Option<u16>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        retry_after: Option<u64>,
    },
}

// ============================================================================
// C2 DATA MODEL (types only; see catalog.rs for the index)
// ============================================================================

/// A `ToolSchema` plus its sorted, deduplicated, deterministic keyword set.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexedCatalogItem {
    pub schema: ToolSchema,
    pub keywords: Vec<String>,
}

// ============================================================================
// WIRE MESSAGES (ApiRequest)
// ============================================================================

/// Role of a wire message, matching the Anthropic-style content-block framing
/// this engine speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WireRole {
    User,
    Assistant,
}

/// One content part of a wire message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WireContentPart {
    Text {
        text: String,
    },
    ToolUse {
        id: String,
        name: String,
        input: serde_json::Value,
    },
    ToolResult {
        tool_use_id: String,
        content: serde_json::Value,
    },
    Image {
        source: serde_json::Value,
    },
}

/// Either a bare string (text-only messages) or a content-block list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum WireContent {
    Text(String),
    Blocks(Vec<WireContentPart>),
}

/// One message in the ordered wire history sent to the LLM endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireMessage {
    pub role: WireRole,
    pub content: WireContent,
}

impl WireMessage {
    pub fn text(role: WireRole, text: impl Into<String>) -> Self {
        Self {
            role,
            content: WireContent::Text(text.into()),
        }
    }

    pub fn blocks(role: WireRole, parts: Vec<WireContentPart>) -> Self {
        Self {
            role,
            content: WireContent::Blocks(parts),
        }
    }
}

/// A fully-built request, ready to be dispatched in Direct or Proxy mode.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiRequest {
    pub messages: Vec<WireMessage>,
    pub max_tokens: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<ToolSchema>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_k: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop_sequences: Option<Vec<String>>,
    #[serde(default = "default_true")]
    pub stream: bool,
}

fn default_true() -> bool {
    true
}

// ============================================================================
// C5: CIRCUIT BREAKER STATE
// ============================================================================

/// The three states a named circuit breaker can be in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitBreakerState {
    Closed,
    Open,
    HalfOpen,
}

impl std::fmt::Display for CircuitBreakerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            CircuitBreakerState::Closed => "closed",
            CircuitBreakerState::Open => "open",
            CircuitBreakerState::HalfOpen => "half_open",
        };
        write!(f, "{s}")
    }
}

// ============================================================================
// C6: METRICS EVENTS
// ============================================================================

/// A single observation emitted onto the metrics bus. Every variant carries a
/// monotonic timestamp (milliseconds since an arbitrary epoch for this
/// process) and an optional request id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MetricsEvent {
    RequestStart {
        timestamp_ms: u64,
        request_id: Option<String>,
    },
    RequestSuccess {
        timestamp_ms: u64,
        request_id: Option<String>,
        duration_ms: u64,
    },
    RequestFailure {
        timestamp_ms: u64,
        request_id: Option<String>,
        error_class: String,
        retryable: bool,
    },
    CircuitBreakerStateChange {
        timestamp_ms: u64,
        request_id: Option<String>,
        name: String,
        from: CircuitBreakerState,
        to: CircuitBreakerState,
    },
    RetryAttempt {
        timestamp_ms: u64,
        request_id: Option<String>,
        attempt: u32,
        max: u32,
        delay_ms: u64,
        reason: String,
    },
    RateLimit {
        timestamp_ms: u64,
        request_id: Option<String>,
        wait_time_ms: u64,
        scope: String,
    },
    Latency {
        timestamp_ms: u64,
        request_id: Option<String>,
        operation: String,
        duration_ms: u64,
    },
    StreamInactivity {
        timestamp_ms: u64,
        request_id: Option<String>,
        timeout_ms: u64,
    },
}

// ============================================================================
// APPLICATION-FACING SURFACE TYPE (C9 output)
// ============================================================================

/// The application's surface-update representation a `WidgetNode` converts
/// into: an opaque id, a property map keyed by widget type, and children.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Component {
    pub id: String,
    pub properties: HashMap<String, serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub children: Option<Vec<Component>>,
}
