//! Non-streaming aggregation: fold a canonical event stream into one
//! complete `MessageResponse`.

use crossbar_types::{
    BlockDelta, BlockStart, MessageResponse, ResponseBlock, StopReason, StreamEvent, Usage,
};
use serde_json::Value;

enum Building {
    Text(String),
    ToolUse { id: String, name: String, args: String },
}

/// Collect a finished event sequence into the aggregated response shape.
///
/// Assumes the sequence satisfies the framing contract (the adapters
/// guarantee it); unknown orderings degrade to empty content rather than
/// panicking.
#[must_use]
pub fn collect_response(events: &[StreamEvent]) -> MessageResponse {
    let mut id = String::new();
    let mut model = String::new();
    let mut usage = Usage::default();
    let mut stop_reason = StopReason::EndTurn;
    let mut building: Vec<Building> = Vec::new();

    for event in events {
        match event {
            StreamEvent::MessageStart { message } => {
                id = message.id.clone();
                model = message.model.clone();
            }
            StreamEvent::ContentBlockStart {
                index,
                content_block,
            } => {
                // Indices are dense; fill any gap defensively.
                while building.len() <= *index {
                    building.push(Building::Text(String::new()));
                }
                building[*index] = match content_block {
                    BlockStart::Text { text } => Building::Text(text.clone()),
                    BlockStart::ToolUse { id, name, .. } => Building::ToolUse {
                        id: id.clone(),
                        name: name.clone(),
                        args: String::new(),
                    },
                };
            }
            StreamEvent::ContentBlockDelta { index, delta } => {
                let Some(block) = building.get_mut(*index) else {
                    continue;
                };
                match (block, delta) {
                    (Building::Text(text), BlockDelta::TextDelta { text: fragment }) => {
                        text.push_str(fragment);
                    }
                    (
                        Building::ToolUse { args, .. },
                        BlockDelta::InputJsonDelta { partial_json },
                    ) => {
                        args.push_str(partial_json);
                    }
                    _ => {}
                }
            }
            StreamEvent::MessageDelta { delta, usage: u } => {
                stop_reason = delta.stop_reason;
                usage = *u;
            }
            StreamEvent::ContentBlockStop { .. } | StreamEvent::MessageStop => {}
        }
    }

    let content = building
        .into_iter()
        .map(|block| match block {
            Building::Text(text) => ResponseBlock::Text { text },
            Building::ToolUse { id, name, args } => {
                let input: Value = if args.trim().is_empty() {
                    Value::Object(serde_json::Map::new())
                } else {
                    serde_json::from_str(&args).unwrap_or(Value::String(args))
                };
                ResponseBlock::ToolUse { id, name, input }
            }
        })
        .collect();

    MessageResponse {
        id,
        kind: "message".to_string(),
        role: "assistant".to_string(),
        model,
        content,
        stop_reason,
        stop_sequence: None,
        usage,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbar_types::{MessageDeltaBody, MessageShell};

    #[test]
    fn aggregates_text_and_tool_blocks() {
        let events = vec![
            StreamEvent::MessageStart {
                message: MessageShell::start("msg_9".to_string(), "gpt-5.1-codex".to_string()),
            },
            StreamEvent::ContentBlockStart {
                index: 0,
                content_block: BlockStart::text(),
            },
            StreamEvent::ContentBlockDelta {
                index: 0,
                delta: BlockDelta::TextDelta {
                    text: "let me check".to_string(),
                },
            },
            StreamEvent::ContentBlockStop { index: 0 },
            StreamEvent::ContentBlockStart {
                index: 1,
                content_block: BlockStart::tool_use("c1", "Bash"),
            },
            StreamEvent::ContentBlockDelta {
                index: 1,
                delta: BlockDelta::InputJsonDelta {
                    partial_json: "{\"cmd\":".to_string(),
                },
            },
            StreamEvent::ContentBlockDelta {
                index: 1,
                delta: BlockDelta::InputJsonDelta {
                    partial_json: "\"ls\"}".to_string(),
                },
            },
            StreamEvent::ContentBlockStop { index: 1 },
            StreamEvent::MessageDelta {
                delta: MessageDeltaBody {
                    stop_reason: StopReason::ToolUse,
                    stop_sequence: None,
                },
                usage: Usage {
                    input_tokens: 10,
                    output_tokens: 20,
                },
            },
            StreamEvent::MessageStop,
        ];

        let response = collect_response(&events);
        assert_eq!(response.id, "msg_9");
        assert_eq!(response.model, "gpt-5.1-codex");
        assert_eq!(response.stop_reason, StopReason::ToolUse);
        assert_eq!(response.usage.output_tokens, 20);
        assert_eq!(response.content.len(), 2);
        assert!(matches!(
            &response.content[0],
            ResponseBlock::Text { text } if text == "let me check"
        ));
        match &response.content[1] {
            ResponseBlock::ToolUse { id, name, input } => {
                assert_eq!(id, "c1");
                assert_eq!(name, "Bash");
                assert_eq!(input["cmd"], "ls");
            }
            other => panic!("expected tool_use, got {other:?}"),
        }
    }

    #[test]
    fn empty_tool_args_become_empty_object() {
        let events = vec![
            StreamEvent::MessageStart {
                message: MessageShell::start("m".to_string(), "x".to_string()),
            },
            StreamEvent::ContentBlockStart {
                index: 0,
                content_block: BlockStart::tool_use("c", "Read"),
            },
            StreamEvent::ContentBlockStop { index: 0 },
            StreamEvent::MessageDelta {
                delta: MessageDeltaBody {
                    stop_reason: StopReason::ToolUse,
                    stop_sequence: None,
                },
                usage: Usage::default(),
            },
            StreamEvent::MessageStop,
        ];
        let response = collect_response(&events);
        match &response.content[0] {
            ResponseBlock::ToolUse { input, .. } => {
                assert_eq!(input, &serde_json::json!({}));
            }
            other => panic!("expected tool_use, got {other:?}"),
        }
    }
}
