//! Incremental stream parser (C3).
//!
//! Consumes a lazy sequence of framing events — each a JSON object with a
//! `type` field — and emits a lazy sequence of [`StreamEvent`]s. Per-block-index
//! state (tool name, accumulating JSON buffer, thinking-block membership) is
//! scoped to one call and discarded as soon as each block closes.

use crate::types::{StreamEvent, WidgetMessage};
use std::collections::{HashMap, HashSet};

/// Parses framing events into `StreamEvent`s, reconstructing per-block JSON
/// from fragments as it goes.
#[derive(Debug, Default)]
pub struct StreamParser {
    tool_names: HashMap<i64, String>,
    tool_ids: HashMap<i64, String>,
    tool_buffers: HashMap<i64, String>,
    thinking_blocks: HashSet<i64>,
    other_tool_calls: Vec<(String, String, serde_json::Value)>,
}

impl StreamParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drains completed tool_use calls whose name isn't one of the four
    /// control tools (e.g. `search_catalog`/`load_tools`), as
    /// `(tool_use_id, name, input)`, for a caller sitting above this parser to
    /// dispatch and answer with a tool_result. Not surfaced as a `StreamEvent`
    /// since that union is closed to the six framing-level kinds.
    pub fn take_other_tool_calls(&mut self) -> Vec<(String, String, serde_json::Value)> {
        std::mem::take(&mut self.other_tool_calls)
    }

    /// Feeds one framing event and returns the `StreamEvent`s it produces (zero
    /// or more; e.g. a `text_delta` yields both `TextDelta` and `RawDelta`).
    pub fn feed(&mut self, event: &serde_json::Value) -> Vec<StreamEvent> {
        let event_type = event.get("type").and_then(|v| v.as_str()).unwrap_or("");
        match event_type {
            "content_block_start" => self.on_block_start(event),
            "content_block_delta" => self.on_block_delta(event),
            "content_block_stop" => self.on_block_stop(event),
            "message_stop" => vec![StreamEvent::Complete],
            "error" => vec![self.on_error(event)],
            _ => Vec::new(),
        }
    }

    fn on_block_start(&mut self, event: &serde_json::Value) -> Vec<StreamEvent> {
        let Some(index) = block_index(event) else {
            return Vec::new();
        };
        let Some(block) = event.get("content_block") else {
            return Vec::new();
        };
        // Duplicate start for the same index resets: last-write-wins on name,
        // fresh buffer.
        self.tool_names.remove(&index);
        self.tool_ids.remove(&index);
        self.tool_buffers.remove(&index);
        self.thinking_blocks.remove(&index);

        match block.get("type").and_then(|v| v.as_str()) {
            Some("tool_use") => {
                if let Some(name) = block.get("name").and_then(|v| v.as_str()) {
                    self.tool_names.insert(index, name.to_string());
                }
                if let Some(id) = block.get("id").and_then(|v| v.as_str()) {
                    self.tool_ids.insert(index, id.to_string());
                }
                self.tool_buffers.insert(index, String::new());
            }
            Some("thinking") => {
                self.thinking_blocks.insert(index);
            }
            _ => {}
        }
        Vec::new()
    }

    fn on_block_delta(&mut self, event: &serde_json::Value) -> Vec<StreamEvent> {
        let Some(index) = block_index(event) else {
            return Vec::new();
        };
        let Some(delta) = event.get("delta") else {
            return Vec::new();
        };
        let delta_type = delta.get("type").and_then(|v| v.as_str()).unwrap_or("");

        match delta_type {
            "text_delta" => {
                let text = delta
                    .get("text")
                    .and_then(|v| v.as_str())
                    .unwrap_or("")
                    .to_string();
                vec![
                    StreamEvent::TextDelta { text },
                    StreamEvent::RawDelta { raw: delta.clone() },
                ]
            }
            "input_json_delta" => {
                if let Some(buf) = self.tool_buffers.get_mut(&index) {
                    if let Some(partial) = delta.get("partial_json").and_then(|v| v.as_str()) {
                        buf.push_str(partial);
                    }
                }
                vec![StreamEvent::RawDelta { raw: delta.clone() }]
            }
            "thinking_delta" => {
                let content = delta
                    .get("thinking")
                    .or_else(|| delta.get("content"))
                    .and_then(|v| v.as_str())
                    .unwrap_or("")
                    .to_string();
                vec![
                    StreamEvent::Thinking {
                        content,
                        is_complete: false,
                    },
                    StreamEvent::RawDelta { raw: delta.clone() },
                ]
            }
            _ => vec![StreamEvent::RawDelta { raw: delta.clone() }],
        }
    }

    fn on_block_stop(&mut self, event: &serde_json::Value) -> Vec<StreamEvent> {
        let Some(index) = block_index(event) else {
            return Vec::new();
        };
        let mut out = Vec::new();

        if self.thinking_blocks.remove(&index) {
            out.push(StreamEvent::Thinking {
                content: String::new(),
                is_complete: true,
            });
        }

        let tool_id = self.tool_ids.remove(&index);
        if let Some(name) = self.tool_names.remove(&index) {
            if let Some(buffer) = self.tool_buffers.remove(&index) {
                if !buffer.is_empty() {
                    match serde_json::from_str::<serde_json::Value>(&buffer) {
                        Ok(value) => match dispatch_tool(&name, value.clone()) {
                            Some(message) => out.push(StreamEvent::WidgetMessageEvent { message }),
                            None => self
                                .other_tool_calls
                                .push((tool_id.unwrap_or_default(), name, value)),
                        },
                        Err(e) => {
                            log::debug!("discarding unparseable tool_use buffer for '{name}': {e}");
                        }
                    }
                }
            }
        } else {
            self.tool_buffers.remove(&index);
        }

        out
    }

    fn on_error(&self, event: &serde_json::Value) -> StreamEvent {
        let error = event.get("error").unwrap_or(event);
        let kind = error
            .get("type")
            .and_then(|v| v.as_str())
            .unwrap_or("unknown")
            .to_string();
        let message = error
            .get("message")
            .and_then(|v| v.as_str())
            .unwrap_or("stream error")
            .to_string();
        let retryable = matches!(
            kind.as_str(),
            "overloaded_error" | "api_error" | "timeout_error"
        );
        StreamEvent::Error {
            kind,
            message,
            retryable,
            http_status: event.get("http_status").and_then(|v| v.as_u64()).map(|n| n as u16),
            retry_after: event.get("retry_after").and_then(|v| v.as_u64()),
        }
    }
}

fn block_index(event: &serde_json::Value) -> Option<i64> {
    event.get("index").and_then(|v| v.as_i64())
}

/// Converts a completed tool_use block's decoded JSON into a `WidgetMessage`
/// if `name` is one of the four fixed control tools. Any other name (e.g. a
/// search tool) is not dispatched here; see the interceptor.
fn dispatch_tool(name: &str, input: serde_json::Value) -> Option<WidgetMessage> {
    match name {
        "begin_rendering" | "surface_update" | "data_model_update" | "delete_surface" => {
            serde_json::from_value(tag_for(name, input))
                .map_err(|e| log::debug!("discarding malformed '{name}' payload: {e}"))
                .ok()
        }
        _ => None,
    }
}

fn tag_for(name: &str, mut input: serde_json::Value) -> serde_json::Value {
    if let serde_json::Value::Object(map) = &mut input {
        map.insert("type".to_string(), serde_json::Value::String(name.to_string()));
    }
    input
}
