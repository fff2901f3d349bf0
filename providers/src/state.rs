//! The shared block-framing state machine.
//!
//! Every streaming adapter funnels its wire events through a `BlockTracker`,
//! which owns the canonical framing contract: `message_start` exactly once,
//! dense 0-based block indices, every started block stopped before
//! `message_delta`, and the stop reason derived from whether any tool-use
//! block opened.

use std::collections::HashMap;

use crossbar_types::{
    BlockDelta, BlockStart, MessageDeltaBody, MessageShell, StopReason, StreamEvent, Usage,
};

struct ToolBlock {
    index: usize,
    closed: bool,
}

/// Per-request framing state.
pub struct BlockTracker {
    model: String,
    started: bool,
    text_index: Option<usize>,
    tool_blocks: HashMap<String, ToolBlock>,
    /// Insertion order, for the "most recent tool block" delta fallback.
    tool_order: Vec<String>,
    next_index: usize,
    has_tool_use: bool,
    input_tokens: u64,
    output_tokens: u64,
    finished: bool,
}

impl BlockTracker {
    #[must_use]
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            started: false,
            text_index: None,
            tool_blocks: HashMap::new(),
            tool_order: Vec::new(),
            next_index: 0,
            has_tool_use: false,
            input_tokens: 0,
            output_tokens: 0,
            finished: false,
        }
    }

    /// Whether anything was emitted yet (used for cancellation refunds).
    #[must_use]
    pub const fn produced_output(&self) -> bool {
        self.started
    }

    fn ensure_started(&mut self, out: &mut Vec<StreamEvent>) {
        if self.started {
            return;
        }
        self.started = true;
        let id = format!("msg_{}", uuid::Uuid::new_v4().simple());
        out.push(StreamEvent::MessageStart {
            message: MessageShell::start(id, self.model.clone()),
        });
    }

    fn ensure_text_block(&mut self, out: &mut Vec<StreamEvent>) {
        if self.text_index.is_some() {
            return;
        }
        let index = self.next_index;
        self.next_index += 1;
        self.text_index = Some(index);
        out.push(StreamEvent::ContentBlockStart {
            index,
            content_block: BlockStart::text(),
        });
    }

    fn close_text_block(&mut self, out: &mut Vec<StreamEvent>) {
        if let Some(index) = self.text_index.take() {
            out.push(StreamEvent::ContentBlockStop { index });
        }
    }

    /// A fragment of text content.
    #[must_use]
    pub fn text_delta(&mut self, text: &str) -> Vec<StreamEvent> {
        let mut out = Vec::new();
        self.ensure_started(&mut out);
        self.ensure_text_block(&mut out);
        out.push(StreamEvent::ContentBlockDelta {
            index: self.text_index.expect("text block open"),
            delta: BlockDelta::TextDelta {
                text: text.to_string(),
            },
        });
        out
    }

    /// A new tool call. Closes any open text block first, then opens a
    /// tool-use block at the next index.
    #[must_use]
    pub fn open_tool_block(&mut self, item_id: &str, call_id: &str, name: &str) -> Vec<StreamEvent> {
        let mut out = Vec::new();
        self.ensure_started(&mut out);
        self.close_text_block(&mut out);

        let index = self.next_index;
        self.next_index += 1;
        self.has_tool_use = true;
        self.tool_blocks.insert(
            item_id.to_string(),
            ToolBlock {
                index,
                closed: false,
            },
        );
        self.tool_order.push(item_id.to_string());

        out.push(StreamEvent::ContentBlockStart {
            index,
            content_block: BlockStart::tool_use(call_id, name),
        });
        out
    }

    /// A fragment of tool arguments. Resolves the block by item id, falling
    /// back to the most recently opened tool block when the wire event
    /// carries no id.
    #[must_use]
    pub fn tool_args_delta(&mut self, item_id: Option<&str>, fragment: &str) -> Vec<StreamEvent> {
        let index = match item_id.and_then(|id| self.tool_blocks.get(id)) {
            Some(block) if !block.closed => Some(block.index),
            _ => self
                .tool_order
                .iter()
                .rev()
                .filter_map(|id| self.tool_blocks.get(id))
                .find(|block| !block.closed)
                .map(|block| block.index),
        };
        let Some(index) = index else {
            tracing::warn!("Dropping tool-argument fragment with no open tool block");
            return Vec::new();
        };
        vec![StreamEvent::ContentBlockDelta {
            index,
            delta: BlockDelta::InputJsonDelta {
                partial_json: fragment.to_string(),
            },
        }]
    }

    pub fn set_input_tokens(&mut self, tokens: u64) {
        self.input_tokens = tokens;
    }

    pub fn set_output_tokens(&mut self, tokens: u64) {
        self.output_tokens = tokens;
    }

    /// End of stream: satisfy the contract no matter what the backend did.
    ///
    /// An empty stream still yields `message_start` plus an empty text block
    /// pair; open blocks are closed; `message_delta` carries the derived
    /// stop reason and the usage snapshot.
    #[must_use]
    pub fn finish(&mut self) -> Vec<StreamEvent> {
        if self.finished {
            return Vec::new();
        }
        self.finished = true;

        let mut out = Vec::new();
        if !self.started {
            self.ensure_started(&mut out);
            self.ensure_text_block(&mut out);
        }
        self.close_text_block(&mut out);
        for id in &self.tool_order {
            if let Some(block) = self.tool_blocks.get_mut(id)
                && !block.closed
            {
                block.closed = true;
                out.push(StreamEvent::ContentBlockStop { index: block.index });
            }
        }

        let stop_reason = if self.has_tool_use {
            StopReason::ToolUse
        } else {
            StopReason::EndTurn
        };
        out.push(StreamEvent::MessageDelta {
            delta: MessageDeltaBody {
                stop_reason,
                stop_sequence: None,
            },
            usage: Usage {
                input_tokens: self.input_tokens,
                output_tokens: self.output_tokens,
            },
        });
        out.push(StreamEvent::MessageStop);
        out
    }
}
