//! Canonical event stream emitted back to the client.
//!
//! Every backend's response, streamed or not, is expressed through these
//! events before serialization. The framing contract:
//!
//! ```text
//! message_start
//!   (content_block_start / content_block_delta* / content_block_stop)+
//! message_delta(stop_reason, usage)
//! message_stop
//! ```
//!
//! Block indices are dense and start at 0. Every started block is stopped
//! before `message_delta`.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Terminal classification of a completion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    EndTurn,
    ToolUse,
}

/// Token usage snapshot. Zero when the backend reported nothing.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub input_tokens: u64,
    pub output_tokens: u64,
}

/// The message envelope carried by `message_start`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageShell {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub role: String,
    pub model: String,
    pub content: Vec<Value>,
    pub stop_reason: Option<StopReason>,
    pub stop_sequence: Option<String>,
    pub usage: Usage,
}

impl MessageShell {
    /// A fresh, empty assistant message for `message_start`.
    #[must_use]
    pub fn start(id: String, model: String) -> Self {
        Self {
            id,
            kind: "message".to_string(),
            role: "assistant".to_string(),
            model,
            content: Vec::new(),
            stop_reason: None,
            stop_sequence: None,
            usage: Usage::default(),
        }
    }
}

/// The `delta` object inside `message_delta`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageDeltaBody {
    pub stop_reason: StopReason,
    pub stop_sequence: Option<String>,
}

/// Block payload for `content_block_start`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BlockStart {
    Text { text: String },
    ToolUse { id: String, name: String, input: Value },
}

impl BlockStart {
    /// An empty text block; deltas fill it in.
    #[must_use]
    pub fn text() -> Self {
        Self::Text {
            text: String::new(),
        }
    }

    /// A tool-use block opening with empty input; `input_json_delta`
    /// fragments carry the arguments.
    #[must_use]
    pub fn tool_use(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self::ToolUse {
            id: id.into(),
            name: name.into(),
            input: Value::Object(serde_json::Map::new()),
        }
    }

    #[must_use]
    pub const fn is_tool_use(&self) -> bool {
        matches!(self, Self::ToolUse { .. })
    }
}

/// Delta payload for `content_block_delta`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BlockDelta {
    TextDelta { text: String },
    InputJsonDelta { partial_json: String },
}

/// One canonical stream event, serialized in the Messages wire shape.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    MessageStart {
        message: MessageShell,
    },
    ContentBlockStart {
        index: usize,
        content_block: BlockStart,
    },
    ContentBlockDelta {
        index: usize,
        delta: BlockDelta,
    },
    ContentBlockStop {
        index: usize,
    },
    MessageDelta {
        delta: MessageDeltaBody,
        usage: Usage,
    },
    MessageStop,
}

impl StreamEvent {
    /// The `event:` line name used when framing as server-sent events.
    #[must_use]
    pub const fn event_name(&self) -> &'static str {
        match self {
            Self::MessageStart { .. } => "message_start",
            Self::ContentBlockStart { .. } => "content_block_start",
            Self::ContentBlockDelta { .. } => "content_block_delta",
            Self::ContentBlockStop { .. } => "content_block_stop",
            Self::MessageDelta { .. } => "message_delta",
            Self::MessageStop => "message_stop",
        }
    }
}

/// A fully-aggregated (non-streaming) canonical response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageResponse {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub role: String,
    pub model: String,
    pub content: Vec<ResponseBlock>,
    pub stop_reason: StopReason,
    pub stop_sequence: Option<String>,
    pub usage: Usage,
}

/// A completed content block in an aggregated response.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ResponseBlock {
    Text { text: String },
    ToolUse { id: String, name: String, input: Value },
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn message_start_serializes_to_wire_shape() {
        let event = StreamEvent::MessageStart {
            message: MessageShell::start("msg_1".to_string(), "gpt-5.1-codex".to_string()),
        };
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["type"], "message_start");
        assert_eq!(value["message"]["type"], "message");
        assert_eq!(value["message"]["role"], "assistant");
        assert_eq!(value["message"]["content"], json!([]));
        assert_eq!(value["message"]["stop_reason"], Value::Null);
    }

    #[test]
    fn content_block_events_carry_tagged_payloads() {
        let start = StreamEvent::ContentBlockStart {
            index: 0,
            content_block: BlockStart::tool_use("c1", "Bash"),
        };
        let value = serde_json::to_value(&start).unwrap();
        assert_eq!(value["content_block"]["type"], "tool_use");
        assert_eq!(value["content_block"]["id"], "c1");
        assert_eq!(value["content_block"]["input"], json!({}));

        let delta = StreamEvent::ContentBlockDelta {
            index: 0,
            delta: BlockDelta::InputJsonDelta {
                partial_json: "{\"cmd\":".to_string(),
            },
        };
        let value = serde_json::to_value(&delta).unwrap();
        assert_eq!(value["delta"]["type"], "input_json_delta");
        assert_eq!(value["delta"]["partial_json"], "{\"cmd\":");
    }

    #[test]
    fn message_delta_carries_stop_reason_and_usage() {
        let event = StreamEvent::MessageDelta {
            delta: MessageDeltaBody {
                stop_reason: StopReason::ToolUse,
                stop_sequence: None,
            },
            usage: Usage {
                input_tokens: 3,
                output_tokens: 7,
            },
        };
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["delta"]["stop_reason"], "tool_use");
        assert_eq!(value["usage"]["output_tokens"], 7);
    }

    #[test]
    fn event_names_match_wire_types() {
        let event = StreamEvent::MessageStop;
        assert_eq!(event.event_name(), "message_stop");
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["type"], "message_stop");
    }
}
