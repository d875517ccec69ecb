//! Conversation message shapes, tool-call primitives, and the timeline
//! that records how text runs and tool blocks interleaved during a turn.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Internal tool call format (provider-agnostic).
/// Every adapter converts provider-specific tool calls to/from this.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    pub call_id: String,
    pub tool_name: String,
    pub arguments: Value,
}

/// Tool definition exposed to the LLM.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    /// JSON Schema for the tool's parameters.
    pub parameters: Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ContentPart {
    #[serde(rename = "text")]
    Text { text: String },
    #[serde(rename = "tool_use")]
    ToolUse {
        id: String,
        name: String,
        input: Value,
    },
    #[serde(rename = "tool_result")]
    ToolResult {
        tool_use_id: String,
        content: String,
        #[serde(default)]
        is_error: bool,
    },
}

/// A message on the provider wire (what adapters serialize).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: Vec<ContentPart>,
}

impl Message {
    pub fn system(text: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: vec![ContentPart::Text { text: text.into() }],
        }
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: vec![ContentPart::Text { text: text.into() }],
        }
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: vec![ContentPart::Text { text: text.into() }],
        }
    }

    /// Assistant message carrying the tool calls the model requested.
    pub fn assistant_tool_calls(text: &str, calls: &[ToolCall]) -> Self {
        let mut content = Vec::new();
        if !text.is_empty() {
            content.push(ContentPart::Text { text: text.into() });
        }
        for tc in calls {
            content.push(ContentPart::ToolUse {
                id: tc.call_id.clone(),
                name: tc.tool_name.clone(),
                input: tc.arguments.clone(),
            });
        }
        Self {
            role: Role::Assistant,
            content,
        }
    }

    pub fn tool_result(
        tool_use_id: impl Into<String>,
        content: impl Into<String>,
        is_error: bool,
    ) -> Self {
        Self {
            role: Role::Tool,
            content: vec![ContentPart::ToolResult {
                tool_use_id: tool_use_id.into(),
                content: content.into(),
                is_error,
            }],
        }
    }

    /// Join all text parts with `"\n"`, skipping non-text parts.
    pub fn extract_all_text(&self) -> String {
        join_text_parts(&self.content)
    }
}

/// Join the text parts of a content list with `"\n"`.
pub fn join_text_parts(parts: &[ContentPart]) -> String {
    parts
        .iter()
        .filter_map(|p| match p {
            ContentPart::Text { text } => Some(text.as_str()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("\n")
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Timeline
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// One entry in the interleaved turn timeline. `order` is a global,
/// monotonically increasing position across both entry kinds so clients
/// can replay text runs and tool blocks exactly as streamed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TimelineEntry {
    TextRun {
        order: u32,
        text: String,
    },
    ToolCall {
        order: u32,
        name: String,
        ok: bool,
        summary: String,
    },
}

impl TimelineEntry {
    pub fn order(&self) -> u32 {
        match self {
            TimelineEntry::TextRun { order, .. } => *order,
            TimelineEntry::ToolCall { order, .. } => *order,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn join_text_skips_tool_parts() {
        let parts = vec![
            ContentPart::Text {
                text: "line one".into(),
            },
            ContentPart::ToolUse {
                id: "c1".into(),
                name: "shell".into(),
                input: serde_json::json!({}),
            },
            ContentPart::Text {
                text: "line two".into(),
            },
        ];
        assert_eq!(join_text_parts(&parts), "line one\nline two");
    }

    #[test]
    fn assistant_tool_calls_orders_text_first() {
        let calls = vec![ToolCall {
            call_id: "c1".into(),
            tool_name: "shell".into(),
            arguments: serde_json::json!({"items": []}),
        }];
        let msg = Message::assistant_tool_calls("thinking", &calls);
        assert_eq!(msg.content.len(), 2);
        assert!(matches!(msg.content[0], ContentPart::Text { .. }));
        assert!(matches!(msg.content[1], ContentPart::ToolUse { .. }));
    }

    #[test]
    fn timeline_entry_roundtrip() {
        let entries = vec![
            TimelineEntry::TextRun {
                order: 0,
                text: "hello".into(),
            },
            TimelineEntry::ToolCall {
                order: 1,
                name: "shell".into(),
                ok: true,
                summary: "/home".into(),
            },
        ];
        let json = serde_json::to_string(&entries).unwrap();
        let back: Vec<TimelineEntry> = serde_json::from_str(&json).unwrap();
        assert_eq!(back, entries);
        assert_eq!(back[1].order(), 1);
    }
}
