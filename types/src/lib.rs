//! Canonical data model for Crossbar.
//!
//! This crate contains the Anthropic-style Messages request shape, the
//! canonical event stream emitted back to the client, model-family routing,
//! and the proxy error taxonomy. Pure data: no IO, no async, minimal
//! dependencies, usable from every layer.

// Pedantic lint configuration - these are intentional design choices
#![allow(clippy::missing_errors_doc)]

mod error;
mod events;
mod family;
mod message;

pub use error::ProxyError;
pub use events::{
    BlockDelta, BlockStart, MessageDeltaBody, MessageResponse, MessageShell, ResponseBlock,
    StopReason, StreamEvent, Usage,
};
pub use family::ModelFamily;
pub use message::{
    ChatMessage, ContentBlock, MessageContent, MessagesRequest, Role, SystemPrompt, ToolChoice,
    ToolDecl, ToolResultContent,
};
