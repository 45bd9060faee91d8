//! Message converter and adapter (C9).
//!
//! Converts application chat history into ordered wire messages, prunes the
//! history window, and converts parsed `WidgetMessage`s back into the
//! application's surface-update representation.

use crate::types::{
    Component, WidgetChild, WidgetMessage, WidgetNode, WireContent, WireContentPart, WireMessage,
    WireRole, GLOBAL_SCOPE,
};
use std::collections::HashMap;

/// One application chat message, role-tagged, possibly carrying tool
/// calls/results or an image in addition to text.
#[derive(Debug, Clone)]
pub struct AppMessage {
    pub role: AppRole,
    pub text: Option<String>,
    pub tool_use: Option<(String, String, serde_json::Value)>,
    pub tool_result: Option<(String, serde_json::Value)>,
    pub image_source: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppRole {
    User,
    Assistant,
    /// Internal/system-context messages are skipped by `to_wire`; use
    /// `extract_system_context` instead.
    System,
}

impl AppMessage {
    pub fn user_text(text: impl Into<String>) -> Self {
        Self {
            role: AppRole::User,
            text: Some(text.into()),
            tool_use: None,
            tool_result: None,
            image_source: None,
        }
    }

    pub fn assistant_text(text: impl Into<String>) -> Self {
        Self {
            role: AppRole::Assistant,
            text: Some(text.into()),
            tool_use: None,
            tool_result: None,
            image_source: None,
        }
    }

    pub fn system(text: impl Into<String>) -> Self {
        Self {
            role: AppRole::System,
            text: Some(text.into()),
            tool_use: None,
            tool_result: None,
            image_source: None,
        }
    }

    pub fn tool_result(tool_use_id: impl Into<String>, content: serde_json::Value) -> Self {
        Self {
            role: AppRole::User,
            text: None,
            tool_use: None,
            tool_result: Some((tool_use_id.into(), content)),
            image_source: None,
        }
    }

    fn is_plain_text(&self) -> bool {
        self.tool_use.is_none() && self.tool_result.is_none() && self.image_source.is_none()
    }
}

/// Converts one application message into its wire representation. Internal
/// system-context messages are skipped here.
pub fn to_wire(message: &AppMessage) -> Option<WireMessage> {
    match message.role {
        AppRole::System => None,
        AppRole::User | AppRole::Assistant => {
            let role = match message.role {
                AppRole::User => WireRole::User,
                AppRole::Assistant => WireRole::Assistant,
                AppRole::System => unreachable!(),
            };

            // Tool-result messages always become a user-role message with a
            // tool_result block, regardless of the original role.
            if let Some((tool_use_id, content)) = &message.tool_result {
                return Some(WireMessage::blocks(
                    WireRole::User,
                    vec![WireContentPart::ToolResult {
                        tool_use_id: tool_use_id.clone(),
                        content: content.clone(),
                    }],
                ));
            }

            if message.is_plain_text() {
                return Some(WireMessage::text(role, message.text.clone().unwrap_or_default()));
            }

            let mut parts = Vec::new();
            if let Some(text) = &message.text {
                parts.push(WireContentPart::Text { text: text.clone() });
            }
            if let Some((id, name, input)) = &message.tool_use {
                parts.push(WireContentPart::ToolUse {
                    id: id.clone(),
                    name: name.clone(),
                    input: input.clone(),
                });
            }
            if let Some(source) = &message.image_source {
                parts.push(WireContentPart::Image { source: source.clone() });
            }
            Some(WireMessage::blocks(role, parts))
        }
    }
}

/// Converts a whole history, skipping system-context messages.
pub fn to_wire_history(messages: &[AppMessage]) -> Vec<WireMessage> {
    messages.iter().filter_map(to_wire).collect()
}

/// Concatenates system-role message text, for use as the request's
/// `system` instruction.
pub fn extract_system_context(messages: &[AppMessage]) -> Option<String> {
    let joined: Vec<&str> = messages
        .iter()
        .filter(|m| m.role == AppRole::System)
        .filter_map(|m| m.text.as_deref())
        .collect();
    if joined.is_empty() {
        None
    } else {
        Some(joined.join("\n"))
    }
}

/// Keeps the most recent `max_messages`, then adjusts the start of the kept
/// slice so it begins with a user message (pair preservation).
pub fn prune(messages: &[AppMessage], max_messages: usize) -> &[AppMessage] {
    if messages.len() <= max_messages {
        return messages;
    }
    let start = messages.len() - max_messages;
    let mut adjusted = start;
    while adjusted < messages.len() && messages[adjusted].role != AppRole::User {
        adjusted += 1;
    }
    &messages[adjusted..]
}

/// Converts one `WidgetNode` into the application's `Component` shape:
/// identity is the node's own id or a freshly generated opaque one, property
/// map is keyed by widget type.
pub fn node_to_component(node: &WidgetNode, next_id: &mut impl FnMut() -> String) -> Component {
    let id = node.id.clone().unwrap_or_else(|| next_id());
    let mut properties = HashMap::new();
    properties.insert(
        node.kind.clone(),
        serde_json::to_value(&node.properties).unwrap_or(serde_json::Value::Null),
    );

    let children = node.children.as_ref().map(|children| {
        children
            .iter()
            .map(|child| match child {
                WidgetChild::Node(n) => node_to_component(n, next_id),
                WidgetChild::Ref(r) => Component {
                    id: r.id.clone(),
                    properties: HashMap::new(),
                    children: None,
                },
            })
            .collect()
    });

    Component { id, properties, children }
}

/// The application-facing counterpart to one `WidgetMessage`.
#[derive(Debug, Clone)]
pub enum SurfaceMessage {
    BeginRendering {
        surface_id: String,
        parent_surface_id: Option<String>,
        root_id: String,
    },
    SurfaceUpdate {
        surface_id: String,
        components: Vec<Component>,
        append: bool,
    },
    DataModelUpdate {
        scope: String,
        updates: HashMap<String, serde_json::Value>,
    },
    DeleteSurface {
        surface_id: String,
        cascade: bool,
    },
}

pub fn widget_message_to_surface(
    message: &WidgetMessage,
    next_id: &mut impl FnMut() -> String,
) -> SurfaceMessage {
    match message {
        WidgetMessage::BeginRendering {
            surface_id,
            parent_surface_id,
            root_id,
            ..
        } => SurfaceMessage::BeginRendering {
            surface_id: surface_id.clone(),
            parent_surface_id: parent_surface_id.clone(),
            root_id: root_id.clone(),
        },
        WidgetMessage::SurfaceUpdate {
            surface_id,
            widgets,
            append,
        } => SurfaceMessage::SurfaceUpdate {
            surface_id: surface_id.clone(),
            components: widgets.iter().map(|w| node_to_component(w, next_id)).collect(),
            append: *append,
        },
        WidgetMessage::DataModelUpdate { updates, scope } => SurfaceMessage::DataModelUpdate {
            scope: scope.clone().unwrap_or_else(|| GLOBAL_SCOPE.to_string()),
            updates: updates.clone(),
        },
        WidgetMessage::DeleteSurface { surface_id, cascade } => SurfaceMessage::DeleteSurface {
            surface_id: surface_id.clone(),
            cascade: *cascade,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn counting_id(counter: &mut u32) -> String {
        *counter += 1;
        format!("generated-{counter}")
    }

    #[test]
    fn test_plain_text_message_becomes_string_content() {
        let msg = AppMessage::user_text("hello");
        let wire = to_wire(&msg).unwrap();
        assert_eq!(wire.role, WireRole::User);
        assert_eq!(wire.content, WireContent::Text("hello".to_string()));
    }

    #[test]
    fn test_system_message_is_skipped() {
        let msg = AppMessage::system("be nice");
        assert!(to_wire(&msg).is_none());
    }

    #[test]
    fn test_tool_result_becomes_user_role_block() {
        let msg = AppMessage::tool_result("call_1", json!({"ok": true}));
        let wire = to_wire(&msg).unwrap();
        assert_eq!(wire.role, WireRole::User);
        match wire.content {
            WireContent::Blocks(parts) => {
                assert_eq!(parts.len(), 1);
                assert!(matches!(parts[0], WireContentPart::ToolResult { .. }));
            }
            _ => panic!("expected block content"),
        }
    }

    #[test]
    fn test_extract_system_context_joins_system_messages() {
        let messages = vec![
            AppMessage::system("rule one"),
            AppMessage::user_text("hi"),
            AppMessage::system("rule two"),
        ];
        assert_eq!(extract_system_context(&messages).unwrap(), "rule one\nrule two");
    }

    #[test]
    fn test_prune_keeps_recent_suffix_starting_at_user() {
        let messages = vec![
            AppMessage::user_text("u1"),
            AppMessage::assistant_text("a1"),
            AppMessage::user_text("u2"),
            AppMessage::assistant_text("a2"),
            AppMessage::user_text("u3"),
        ];
        let pruned = prune(&messages, 3);
        assert_eq!(pruned.len(), 3);
        assert_eq!(pruned[0].role, AppRole::User);
    }

    #[test]
    fn test_prune_noop_when_under_bound() {
        let messages = vec![AppMessage::user_text("u1")];
        assert_eq!(prune(&messages, 5).len(), 1);
    }

    #[test]
    fn test_widget_node_to_component_shape() {
        let mut counter = 0u32;
        let mut node = WidgetNode::new("button");
        node.properties.insert("label".to_string(), json!("Go"));
        let component = node_to_component(&node, &mut || counting_id(&mut counter));
        assert!(component.properties.contains_key("button"));
        assert_eq!(component.id, "generated-1");
    }

    #[test]
    fn test_data_model_update_default_scope() {
        let mut counter = 0u32;
        let msg = WidgetMessage::DataModelUpdate {
            updates: HashMap::new(),
            scope: None,
        };
        match widget_message_to_surface(&msg, &mut || counting_id(&mut counter)) {
            SurfaceMessage::DataModelUpdate { scope, .. } => assert_eq!(scope, GLOBAL_SCOPE),
            _ => panic!("expected DataModelUpdate"),
        }
    }
}
