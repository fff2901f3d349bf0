//! Canonical Messages request model.
//!
//! The accepted wire shape mirrors the Anthropic Messages API: a model name,
//! an ordered conversation of user/assistant messages whose content is either
//! a bare string or a sequence of tagged blocks, an optional system prompt,
//! and optional tool declarations. Content blocks form a real sum type;
//! adapters pattern-match instead of probing stringly-typed JSON.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A complete canonical Messages request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessagesRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system: Option<SystemPrompt>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<ToolDecl>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_choice: Option<ToolChoice>,
    #[serde(default)]
    pub stream: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop_sequences: Option<Vec<String>>,
}

impl MessagesRequest {
    /// Remove every `cache_control` marker from the request in place.
    ///
    /// Runs before any adapter sees the conversation; no backend payload may
    /// carry the canonical caching hints.
    pub fn strip_cache_control(&mut self) {
        if let Some(SystemPrompt::Blocks(blocks)) = &mut self.system {
            for block in blocks {
                block.clear_cache_control();
            }
        }
        for message in &mut self.messages {
            if let MessageContent::Blocks(blocks) = &mut message.content {
                for block in blocks {
                    block.clear_cache_control();
                }
            }
        }
    }

    /// The system prompt flattened to a single string, if present and
    /// non-empty.
    #[must_use]
    pub fn system_text(&self) -> Option<String> {
        let text = self.system.as_ref()?.flattened();
        if text.trim().is_empty() { None } else { Some(text) }
    }
}

/// Conversation roles accepted on input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }
}

/// One turn of the conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: MessageContent,
}

impl ChatMessage {
    /// View the content as a block slice, promoting a bare string to a
    /// single text block.
    #[must_use]
    pub fn blocks(&self) -> Vec<ContentBlock> {
        self.content.to_blocks()
    }
}

/// Message content: either a bare string or tagged blocks.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Blocks(Vec<ContentBlock>),
}

impl MessageContent {
    #[must_use]
    pub fn to_blocks(&self) -> Vec<ContentBlock> {
        match self {
            Self::Text(text) => vec![ContentBlock::Text {
                text: text.clone(),
                cache_control: None,
            }],
            Self::Blocks(blocks) => blocks.clone(),
        }
    }
}

/// The system prompt: a string or a sequence of text blocks.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SystemPrompt {
    Text(String),
    Blocks(Vec<ContentBlock>),
}

impl SystemPrompt {
    /// Concatenate to a single string. Non-text blocks contribute nothing.
    #[must_use]
    pub fn flattened(&self) -> String {
        match self {
            Self::Text(text) => text.clone(),
            Self::Blocks(blocks) => {
                let parts: Vec<&str> = blocks
                    .iter()
                    .filter_map(|block| match block {
                        ContentBlock::Text { text, .. } => Some(text.as_str()),
                        _ => None,
                    })
                    .collect();
                parts.join("\n\n")
            }
        }
    }
}

/// A tagged content block.
///
/// `thinking` is carried opaquely: its body is whatever the client sent and
/// is never forwarded upstream.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    Text {
        text: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        cache_control: Option<Value>,
    },
    ToolUse {
        id: String,
        name: String,
        input: Value,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        cache_control: Option<Value>,
    },
    ToolResult {
        tool_use_id: String,
        #[serde(default)]
        content: ToolResultContent,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        is_error: Option<bool>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        cache_control: Option<Value>,
    },
    Thinking {
        #[serde(flatten)]
        body: serde_json::Map<String, Value>,
    },
}

impl ContentBlock {
    pub(crate) fn clear_cache_control(&mut self) {
        match self {
            Self::Text { cache_control, .. }
            | Self::ToolUse { cache_control, .. }
            | Self::ToolResult { cache_control, .. } => *cache_control = None,
            Self::Thinking { body } => {
                body.remove("cache_control");
            }
        }
    }
}

/// Tool-result content: a string or nested blocks.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ToolResultContent {
    Text(String),
    Blocks(Vec<ContentBlock>),
}

impl Default for ToolResultContent {
    fn default() -> Self {
        Self::Text(String::new())
    }
}

impl ToolResultContent {
    /// Flatten to the single string backends accept as tool output.
    #[must_use]
    pub fn flattened(&self) -> String {
        match self {
            Self::Text(text) => text.clone(),
            Self::Blocks(blocks) => {
                let parts: Vec<&str> = blocks
                    .iter()
                    .filter_map(|block| match block {
                        ContentBlock::Text { text, .. } => Some(text.as_str()),
                        _ => None,
                    })
                    .collect();
                parts.join("\n")
            }
        }
    }
}

/// A declared tool the model may call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDecl {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub input_schema: Value,
}

/// Canonical tool-choice directive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ToolChoice {
    Auto,
    None,
    Any,
    Tool { name: String },
}
