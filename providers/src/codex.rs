//! ChatGPT Codex backend (Responses wire format).
//!
//! Streaming is mandatory on this endpoint; non-streaming canonical requests
//! are still streamed internally and aggregated by the dispatcher.

use serde::Deserialize;
use serde_json::{Value, json};
use std::collections::HashSet;

use crossbar_config::profile;
use crossbar_types::{
    ContentBlock, MessagesRequest, ModelFamily, Role, StreamEvent, ToolChoice,
};

use crate::request::{AGENT_TOOL_NAMES, WEB_SEARCH_TOOL, prepare, system_with_preamble};
use crate::schema::sanitize_parameters;
use crate::sse::{BackendStream, ParseAction, StreamAdapter};
use crate::state::BlockTracker;
use crate::{BackendError, error_from_response, http_client};

// ============================================================================
// Typed wire events
// ============================================================================

mod wire {
    use super::Deserialize;

    /// Responses SSE event, tagged by `type`. Unknown types are ignored for
    /// forward compatibility.
    #[derive(Debug, Deserialize)]
    #[serde(tag = "type")]
    pub enum Event {
        #[serde(rename = "response.output_item.added")]
        OutputItemAdded {
            item_id: Option<String>,
            #[serde(alias = "output_item")]
            item: Option<OutputItem>,
        },
        #[serde(rename = "response.output_text.delta")]
        OutputTextDelta {
            item_id: Option<String>,
            delta: Option<String>,
        },
        #[serde(rename = "response.refusal.delta")]
        RefusalDelta {
            item_id: Option<String>,
            delta: Option<String>,
        },
        #[serde(rename = "response.function_call_arguments.delta")]
        FunctionCallArgumentsDelta {
            item_id: Option<String>,
            call_id: Option<String>,
            delta: Option<String>,
        },
        #[serde(rename = "response.function_call_arguments.done")]
        FunctionCallArgumentsDone {
            item_id: Option<String>,
            call_id: Option<String>,
            arguments: Option<String>,
        },
        #[serde(rename = "response.completed")]
        Completed { response: Option<ResponseInfo> },
        #[serde(rename = "response.failed")]
        Failed {
            response: Option<ResponseInfo>,
            error: Option<ErrorInfo>,
        },
        #[serde(rename = "error")]
        Error { error: Option<ErrorInfo> },
        #[serde(other)]
        Unknown,
    }

    #[derive(Debug, Deserialize)]
    #[serde(tag = "type")]
    pub enum OutputItem {
        #[serde(rename = "function_call")]
        FunctionCall {
            id: Option<String>,
            call_id: Option<String>,
            name: Option<String>,
            arguments: Option<String>,
        },
        #[serde(rename = "web_search_call")]
        WebSearchCall { id: Option<String> },
        #[serde(other)]
        Unknown,
    }

    #[derive(Debug, Deserialize)]
    pub struct ResponseInfo {
        pub usage: Option<Usage>,
        pub error: Option<ErrorInfo>,
    }

    #[derive(Debug, Deserialize, Default)]
    pub struct Usage {
        #[serde(default)]
        pub input_tokens: u64,
        #[serde(default)]
        pub output_tokens: u64,
    }

    #[derive(Debug, Deserialize)]
    pub struct ErrorInfo {
        pub message: Option<String>,
    }
}

// ============================================================================
// Streaming adapter
// ============================================================================

struct CodexParser {
    tracker: BlockTracker,
    /// Item keys that already streamed argument deltas; `.done` only emits
    /// when nothing streamed.
    args_seen: HashSet<String>,
    /// Web-search lifecycle items: suppressed, never canonical output.
    web_search_items: HashSet<String>,
}

impl CodexParser {
    fn new(model: &str) -> Self {
        Self {
            tracker: BlockTracker::new(model),
            args_seen: HashSet::new(),
            web_search_items: HashSet::new(),
        }
    }

    fn item_key(item_id: Option<&str>, id: Option<&str>, call_id: Option<&str>) -> Option<String> {
        item_id
            .or(id)
            .or(call_id)
            .map(std::string::ToString::to_string)
    }
}

impl StreamAdapter for CodexParser {
    fn on_payload(&mut self, payload: &Value) -> ParseAction {
        let event: wire::Event = match serde_json::from_value(payload.clone()) {
            Ok(event) => event,
            Err(e) => {
                tracing::warn!(%e, "Failed to parse Responses SSE event");
                return ParseAction::Continue;
            }
        };

        match event {
            wire::Event::OutputItemAdded { item_id, item } => match item {
                Some(wire::OutputItem::FunctionCall {
                    id,
                    call_id,
                    name,
                    arguments,
                }) => {
                    let key = Self::item_key(item_id.as_deref(), id.as_deref(), call_id.as_deref());
                    let (Some(key), Some(name)) = (key, name.filter(|n| !n.trim().is_empty()))
                    else {
                        return ParseAction::Error(BackendError::Stream(
                            "function_call item missing id or name".to_string(),
                        ));
                    };
                    let call_id = call_id.or(id).unwrap_or_else(|| key.clone());
                    let mut events = self.tracker.open_tool_block(&key, &call_id, &name);
                    if let Some(args) = arguments.filter(|a| !a.is_empty()) {
                        events.extend(self.tracker.tool_args_delta(Some(&key), &args));
                        self.args_seen.insert(key);
                    }
                    ParseAction::Emit(events)
                }
                Some(wire::OutputItem::WebSearchCall { id }) => {
                    if let Some(id) = id {
                        self.web_search_items.insert(id);
                    }
                    if let Some(item_id) = item_id {
                        self.web_search_items.insert(item_id);
                    }
                    ParseAction::Continue
                }
                _ => ParseAction::Continue,
            },

            wire::Event::OutputTextDelta { delta, .. }
            | wire::Event::RefusalDelta { delta, .. } => match delta {
                Some(delta) => ParseAction::Emit(self.tracker.text_delta(&delta)),
                None => ParseAction::Continue,
            },

            wire::Event::FunctionCallArgumentsDelta {
                item_id,
                call_id,
                delta,
            } => {
                let key = Self::item_key(item_id.as_deref(), None, call_id.as_deref());
                if let Some(key) = &key
                    && self.web_search_items.contains(key)
                {
                    return ParseAction::Continue;
                }
                match delta {
                    Some(delta) => {
                        if let Some(key) = key {
                            self.args_seen.insert(key.clone());
                            ParseAction::Emit(self.tracker.tool_args_delta(Some(&key), &delta))
                        } else {
                            ParseAction::Emit(self.tracker.tool_args_delta(None, &delta))
                        }
                    }
                    None => ParseAction::Continue,
                }
            }

            wire::Event::FunctionCallArgumentsDone {
                item_id,
                call_id,
                arguments,
            } => {
                // Finalization marker; the full string is a fallback for
                // streams that never sent deltas.
                let key = Self::item_key(item_id.as_deref(), None, call_id.as_deref());
                if let Some(key) = &key
                    && self.web_search_items.contains(key)
                {
                    return ParseAction::Continue;
                }
                let already_streamed = key.as_ref().is_some_and(|k| self.args_seen.contains(k));
                match arguments.filter(|a| !a.is_empty()) {
                    Some(args) if !already_streamed => {
                        if let Some(key) = &key {
                            self.args_seen.insert(key.clone());
                        }
                        ParseAction::Emit(self.tracker.tool_args_delta(key.as_deref(), &args))
                    }
                    _ => ParseAction::Continue,
                }
            }

            wire::Event::Completed { response } => {
                if let Some(usage) = response.and_then(|r| r.usage) {
                    self.tracker.set_input_tokens(usage.input_tokens);
                    self.tracker.set_output_tokens(usage.output_tokens);
                }
                ParseAction::Continue
            }

            wire::Event::Failed { response, error } => {
                let message = error
                    .and_then(|e| e.message)
                    .or_else(|| response.and_then(|r| r.error).and_then(|e| e.message))
                    .unwrap_or_else(|| "response failed".to_string());
                ParseAction::Error(BackendError::Stream(message))
            }

            wire::Event::Error { error } => {
                let message = error
                    .and_then(|e| e.message)
                    .unwrap_or_else(|| "unknown stream error".to_string());
                ParseAction::Error(BackendError::Stream(message))
            }

            wire::Event::Unknown => ParseAction::Continue,
        }
    }

    fn finish(&mut self) -> Vec<StreamEvent> {
        self.tracker.finish()
    }

    fn produced_output(&self) -> bool {
        self.tracker.produced_output()
    }
}

// ============================================================================
// Request adapter
// ============================================================================

fn tool_choice_value(choice: &ToolChoice) -> Value {
    match choice {
        ToolChoice::Auto => json!("auto"),
        ToolChoice::None => json!("none"),
        ToolChoice::Any => json!("required"),
        ToolChoice::Tool { name } => json!({ "type": "function", "name": name }),
    }
}

/// Build the Responses payload from a canonical request.
#[must_use]
pub fn build_payload(request: &MessagesRequest) -> Value {
    let prepared = prepare(request);

    // WebSearch runs inside the backend: its declaration becomes the
    // built-in web_search tool and its conversation traces disappear.
    let mut web_search_ids: HashSet<String> = HashSet::new();
    for message in &prepared.messages {
        for block in message.blocks() {
            if let ContentBlock::ToolUse { id, name, .. } = &block
                && name == WEB_SEARCH_TOOL
            {
                web_search_ids.insert(id.clone());
            }
        }
    }

    let mut input: Vec<Value> = Vec::new();
    for message in &prepared.messages {
        for block in message.blocks() {
            match &block {
                ContentBlock::Text { text, .. } => {
                    let content_type = match message.role {
                        Role::User => "input_text",
                        Role::Assistant => "output_text",
                    };
                    input.push(json!({
                        "type": "message",
                        "role": message.role.as_str(),
                        "content": [{ "type": content_type, "text": text }]
                    }));
                }
                ContentBlock::ToolUse { id, name, input: args, .. } => {
                    if web_search_ids.contains(id) {
                        continue;
                    }
                    let arguments =
                        serde_json::to_string(args).unwrap_or_else(|_| "{}".to_string());
                    input.push(json!({
                        "type": "function_call",
                        "call_id": id,
                        "name": name,
                        "arguments": arguments
                    }));
                }
                ContentBlock::ToolResult {
                    tool_use_id,
                    content,
                    ..
                } => {
                    if web_search_ids.contains(tool_use_id) {
                        continue;
                    }
                    input.push(json!({
                        "type": "function_call_output",
                        "call_id": tool_use_id,
                        "output": content.flattened()
                    }));
                }
                ContentBlock::Thinking { .. } => {}
            }
        }
    }

    let mut body = serde_json::Map::new();
    body.insert(
        "model".to_string(),
        json!(ModelFamily::Codex.upstream_model(&prepared.model)),
    );
    body.insert("input".to_string(), Value::Array(input));
    body.insert(
        "instructions".to_string(),
        json!(system_with_preamble(&prepared)),
    );
    // The endpoint rejects non-streaming calls.
    body.insert("stream".to_string(), json!(true));
    body.insert("store".to_string(), json!(false));

    if let Some(tools) = &prepared.tools
        && !tools.is_empty()
    {
        let mut wire_tools: Vec<Value> = Vec::new();
        for tool in tools {
            if tool.name == WEB_SEARCH_TOOL {
                wire_tools.push(json!({ "type": "web_search" }));
            } else if AGENT_TOOL_NAMES.contains(&tool.name.as_str()) {
                continue;
            } else {
                wire_tools.push(json!({
                    "type": "function",
                    "name": tool.name,
                    "description": tool.description,
                    "parameters": sanitize_parameters(&tool.input_schema)
                }));
            }
        }
        if !wire_tools.is_empty() {
            body.insert("tools".to_string(), Value::Array(wire_tools));
        }
    }
    if let Some(choice) = &prepared.tool_choice {
        body.insert("tool_choice".to_string(), tool_choice_value(choice));
    }
    if let Some(max_tokens) = prepared.max_tokens {
        body.insert("max_output_tokens".to_string(), json!(max_tokens));
    }
    if let Some(temperature) = prepared.temperature {
        body.insert("temperature".to_string(), json!(temperature));
    }
    if let Some(top_p) = prepared.top_p {
        body.insert("top_p".to_string(), json!(top_p));
    }

    Value::Object(body)
}

// ============================================================================
// Backend
// ============================================================================

/// The Responses backend endpoint.
pub struct CodexBackend {
    pub endpoint: String,
}

impl Default for CodexBackend {
    fn default() -> Self {
        Self {
            endpoint: profile(ModelFamily::Codex).endpoint.to_string(),
        }
    }
}

impl CodexBackend {
    /// Post the request; fail fast on a non-2xx so the orchestrator can
    /// rotate accounts before anything streams.
    pub async fn start(
        &self,
        request: &MessagesRequest,
        access_token: &str,
    ) -> Result<BackendStream, BackendError> {
        let body = build_payload(request);
        let response = http_client()
            .post(&self.endpoint)
            .bearer_auth(access_token)
            .header("content-type", "application/json")
            .header("accept", "text/event-stream")
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(error_from_response(response).await);
        }

        Ok(BackendStream::Sse {
            response,
            adapter: Box::new(CodexParser::new(&request.model)),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbar_types::{BlockDelta, BlockStart, StopReason};

    fn request_from(value: Value) -> MessagesRequest {
        serde_json::from_value(value).expect("valid request")
    }

    fn drive(parser: &mut CodexParser, payloads: &[Value]) -> Vec<StreamEvent> {
        let mut events = Vec::new();
        for payload in payloads {
            match parser.on_payload(payload) {
                ParseAction::Emit(batch) => events.extend(batch),
                ParseAction::Continue => {}
                ParseAction::Error(e) => panic!("unexpected stream error: {e}"),
            }
        }
        events.extend(parser.finish());
        events
    }

    // ------------------------------------------------------------------------
    // Payload building
    // ------------------------------------------------------------------------

    #[test]
    fn text_turns_map_to_typed_message_items() {
        let request = request_from(json!({
            "model": "gpt-5.1-codex",
            "messages": [
                {"role": "user", "content": "hi"},
                {"role": "assistant", "content": "hello"}
            ]
        }));
        let body = build_payload(&request);
        let input = body["input"].as_array().unwrap();
        assert_eq!(input[0]["content"][0]["type"], "input_text");
        assert_eq!(input[1]["content"][0]["type"], "output_text");
        assert_eq!(body["stream"], json!(true));
    }

    #[test]
    fn tool_use_and_result_become_function_call_items() {
        let request = request_from(json!({
            "model": "gpt-5.1-codex",
            "messages": [
                {"role": "assistant", "content": [
                    {"type": "tool_use", "id": "c1", "name": "Bash", "input": {"cmd": "ls"}}
                ]},
                {"role": "user", "content": [
                    {"type": "tool_result", "tool_use_id": "c1",
                     "content": [{"type": "text", "text": "file1"}]}
                ]}
            ]
        }));
        let body = build_payload(&request);
        let input = body["input"].as_array().unwrap();
        assert_eq!(input[0]["type"], "function_call");
        assert_eq!(input[0]["call_id"], "c1");
        // Arguments are the JSON string of the canonical input.
        let args: Value = serde_json::from_str(input[0]["arguments"].as_str().unwrap()).unwrap();
        assert_eq!(args["cmd"], "ls");
        assert_eq!(input[1]["type"], "function_call_output");
        assert_eq!(input[1]["output"], "file1");
    }

    #[test]
    fn thinking_blocks_are_dropped() {
        let request = request_from(json!({
            "model": "gpt-5.1-codex",
            "messages": [{"role": "assistant", "content": [
                {"type": "thinking", "thinking": "private"},
                {"type": "text", "text": "public"}
            ]}]
        }));
        let body = build_payload(&request);
        let input = body["input"].as_array().unwrap();
        assert_eq!(input.len(), 1);
        assert_eq!(input[0]["content"][0]["text"], "public");
    }

    #[test]
    fn web_search_rewiring_replaces_tool_and_removes_traces() {
        let request = request_from(json!({
            "model": "gpt-5.1-codex",
            "tools": [
                {"name": "WebSearch", "description": "search", "input_schema": {"type": "object"}},
                {"name": "Bash", "description": "run", "input_schema": {"type": "object",
                    "properties": {"cmd": {"type": "string"}}, "required": ["cmd"]}}
            ],
            "messages": [
                {"role": "assistant", "content": [
                    {"type": "tool_use", "id": "ws1", "name": "WebSearch",
                     "input": {"query": "rust"}}
                ]},
                {"role": "user", "content": [
                    {"type": "tool_result", "tool_use_id": "ws1", "content": "results"}
                ]},
                {"role": "user", "content": "summarize"}
            ]
        }));
        let body = build_payload(&request);

        let tools = body["tools"].as_array().unwrap();
        assert!(tools.iter().any(|t| t["type"] == "web_search"));
        let bash = tools.iter().find(|t| t["name"] == "Bash").unwrap();
        assert_eq!(bash["type"], "function");
        assert!(bash["parameters"]["properties"]["cmd"].is_object());

        // The WebSearch call and its result vanish from the conversation.
        let input = body["input"].as_array().unwrap();
        assert_eq!(input.len(), 1);
        assert_eq!(input[0]["content"][0]["text"], "summarize");
    }

    #[test]
    fn agent_spawning_tools_are_dropped() {
        let request = request_from(json!({
            "model": "gpt-5.1-codex",
            "tools": [
                {"name": "Task", "description": "", "input_schema": {}},
                {"name": "computer", "description": "", "input_schema": {}},
                {"name": "Read", "description": "", "input_schema": {}}
            ],
            "messages": []
        }));
        let body = build_payload(&request);
        let tools = body["tools"].as_array().unwrap();
        assert_eq!(tools.len(), 1);
        assert_eq!(tools[0]["name"], "Read");
    }

    #[test]
    fn tool_choice_translates() {
        for (canonical, expected) in [
            (json!({"type": "auto"}), json!("auto")),
            (json!({"type": "none"}), json!("none")),
            (json!({"type": "any"}), json!("required")),
            (
                json!({"type": "tool", "name": "Bash"}),
                json!({"type": "function", "name": "Bash"}),
            ),
        ] {
            let request = request_from(json!({
                "model": "gpt-5.1-codex",
                "tool_choice": canonical,
                "messages": []
            }));
            assert_eq!(build_payload(&request)["tool_choice"], expected);
        }
    }

    #[test]
    fn cache_control_never_reaches_the_wire() {
        let request = request_from(json!({
            "model": "gpt-5.1-codex",
            "system": [{"type": "text", "text": "sys", "cache_control": {"type": "ephemeral"}}],
            "messages": [{"role": "user", "content": [
                {"type": "text", "text": "hi", "cache_control": {"type": "ephemeral"}}
            ]}]
        }));
        let raw = build_payload(&request).to_string();
        assert!(!raw.contains("cache_control"));
    }

    #[test]
    fn instructions_carry_the_agent_preamble() {
        let request = request_from(json!({
            "model": "gpt-5.1-codex",
            "system": "Project rules.",
            "messages": []
        }));
        let body = build_payload(&request);
        let instructions = body["instructions"].as_str().unwrap();
        assert!(instructions.contains("autonomous coding agent"));
        assert!(instructions.ends_with("Project rules."));
    }

    // ------------------------------------------------------------------------
    // Streaming (scenarios S1 and S2)
    // ------------------------------------------------------------------------

    #[test]
    fn single_turn_text_stream_matches_canonical_sequence() {
        let mut parser = CodexParser::new("gpt-5.1-codex");
        let events = drive(
            &mut parser,
            &[
                json!({"type": "response.output_text.delta", "delta": "hello"}),
                json!({"type": "response.completed",
                       "response": {"usage": {"input_tokens": 1, "output_tokens": 1}}}),
            ],
        );

        assert_eq!(events.len(), 6);
        assert!(matches!(&events[0], StreamEvent::MessageStart { .. }));
        assert!(matches!(
            &events[1],
            StreamEvent::ContentBlockStart { index: 0, content_block: BlockStart::Text { .. } }
        ));
        assert!(matches!(
            &events[2],
            StreamEvent::ContentBlockDelta {
                index: 0,
                delta: BlockDelta::TextDelta { text }
            } if text == "hello"
        ));
        assert!(matches!(&events[3], StreamEvent::ContentBlockStop { index: 0 }));
        match &events[4] {
            StreamEvent::MessageDelta { delta, usage } => {
                assert_eq!(delta.stop_reason, StopReason::EndTurn);
                assert_eq!(usage.input_tokens, 1);
                assert_eq!(usage.output_tokens, 1);
            }
            other => panic!("expected message_delta, got {other:?}"),
        }
        assert!(matches!(&events[5], StreamEvent::MessageStop));
    }

    #[test]
    fn tool_call_stream_matches_canonical_sequence() {
        let mut parser = CodexParser::new("gpt-5.1-codex");
        let events = drive(
            &mut parser,
            &[
                json!({"type": "response.output_item.added",
                       "item": {"type": "function_call", "id": "i1", "call_id": "c1",
                                "name": "Bash"}}),
                json!({"type": "response.function_call_arguments.delta",
                       "item_id": "i1", "delta": "{\"cmd\":"}),
                json!({"type": "response.function_call_arguments.delta",
                       "item_id": "i1", "delta": "\"ls\"}"}),
                json!({"type": "response.function_call_arguments.done",
                       "item_id": "i1", "arguments": "{\"cmd\":\"ls\"}"}),
                json!({"type": "response.completed", "response": {}}),
            ],
        );

        match &events[1] {
            StreamEvent::ContentBlockStart {
                index: 0,
                content_block: BlockStart::ToolUse { id, name, .. },
            } => {
                assert_eq!(id, "c1");
                assert_eq!(name, "Bash");
            }
            other => panic!("expected tool_use start, got {other:?}"),
        }

        let fragments: Vec<&str> = events
            .iter()
            .filter_map(|event| match event {
                StreamEvent::ContentBlockDelta {
                    delta: BlockDelta::InputJsonDelta { partial_json },
                    ..
                } => Some(partial_json.as_str()),
                _ => None,
            })
            .collect();
        // Two streamed fragments; `.done` stays silent because deltas flowed.
        assert_eq!(fragments, vec!["{\"cmd\":", "\"ls\"}"]);
        let rebuilt: Value = serde_json::from_str(&fragments.concat()).unwrap();
        assert_eq!(rebuilt["cmd"], "ls");

        let stop_reason = events
            .iter()
            .find_map(|event| match event {
                StreamEvent::MessageDelta { delta, .. } => Some(delta.stop_reason),
                _ => None,
            })
            .unwrap();
        assert_eq!(stop_reason, StopReason::ToolUse);
    }

    #[test]
    fn arguments_done_is_the_fallback_when_no_deltas_streamed() {
        let mut parser = CodexParser::new("gpt-5.1-codex");
        let events = drive(
            &mut parser,
            &[
                json!({"type": "response.output_item.added",
                       "item": {"type": "function_call", "id": "i1", "call_id": "c1",
                                "name": "Read"}}),
                json!({"type": "response.function_call_arguments.done",
                       "item_id": "i1", "arguments": "{\"path\":\"x\"}"}),
            ],
        );
        let fragments: Vec<&str> = events
            .iter()
            .filter_map(|event| match event {
                StreamEvent::ContentBlockDelta {
                    delta: BlockDelta::InputJsonDelta { partial_json },
                    ..
                } => Some(partial_json.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(fragments, vec!["{\"path\":\"x\"}"]);
    }

    #[test]
    fn web_search_items_are_suppressed() {
        let mut parser = CodexParser::new("gpt-5.1-codex");
        let events = drive(
            &mut parser,
            &[
                json!({"type": "response.output_item.added",
                       "item": {"type": "web_search_call", "id": "ws1"}}),
                json!({"type": "response.output_text.delta", "delta": "found it"}),
            ],
        );
        // Only the text produces canonical output.
        let tool_starts = events
            .iter()
            .filter(|event| {
                matches!(
                    event,
                    StreamEvent::ContentBlockStart {
                        content_block: BlockStart::ToolUse { .. },
                        ..
                    }
                )
            })
            .count();
        assert_eq!(tool_starts, 0);
        let stop_reason = events
            .iter()
            .find_map(|event| match event {
                StreamEvent::MessageDelta { delta, .. } => Some(delta.stop_reason),
                _ => None,
            })
            .unwrap();
        assert_eq!(stop_reason, StopReason::EndTurn);
    }

    #[test]
    fn stream_error_event_aborts_with_message() {
        let mut parser = CodexParser::new("gpt-5.1-codex");
        match parser.on_payload(&json!({
            "type": "error",
            "error": {"message": "quota exceeded"}
        })) {
            ParseAction::Error(BackendError::Stream(message)) => {
                assert!(message.contains("quota exceeded"));
            }
            _ => panic!("expected stream error"),
        }
    }
}
