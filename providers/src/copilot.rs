//! GitHub Copilot backend (Chat-Completions wire format).
//!
//! Authentication is two-stage: the pooled credential is a long-lived OAuth
//! token, exchanged at the token-mint endpoint for a short-lived bearer that
//! the completions endpoint actually accepts.

use chrono::{DateTime, TimeZone, Utc};
use serde::Deserialize;
use serde_json::{Value, json};
use std::collections::HashMap;

use crossbar_config::profile;
use crossbar_types::{ContentBlock, MessagesRequest, ModelFamily, StreamEvent, ToolChoice};

use crate::request::prepare;
use crate::schema::sanitize_parameters;
use crate::sse::{BackendStream, ParseAction, StreamAdapter};
use crate::state::BlockTracker;
use crate::{BackendError, error_from_response, http_client};

const EDITOR_VERSION: &str = "vscode/1.99.0";
const INTEGRATION_ID: &str = "vscode-chat";

// ============================================================================
// Token mint
// ============================================================================

/// A short-lived completions bearer derived from the long-lived token.
#[derive(Debug, Clone)]
pub struct MintedBearer {
    pub bearer: String,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
struct MintResponse {
    token: String,
    #[serde(default)]
    expires_at: Option<i64>,
}

// ============================================================================
// Streaming adapter
// ============================================================================

struct CopilotParser {
    tracker: BlockTracker,
    /// Wire `tool_calls[].index` -> tracker item key.
    call_keys: HashMap<u64, String>,
}

impl CopilotParser {
    fn new(model: &str) -> Self {
        Self {
            tracker: BlockTracker::new(model),
            call_keys: HashMap::new(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct Chunk {
    #[serde(default)]
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Option<ChunkUsage>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    #[serde(default)]
    delta: Option<Delta>,
}

#[derive(Debug, Deserialize)]
struct Delta {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Vec<ToolCallDelta>,
}

#[derive(Debug, Deserialize)]
struct ToolCallDelta {
    #[serde(default)]
    index: u64,
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    function: Option<FunctionDelta>,
}

#[derive(Debug, Deserialize)]
struct FunctionDelta {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    arguments: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChunkUsage {
    #[serde(default)]
    prompt_tokens: u64,
    #[serde(default)]
    completion_tokens: u64,
}

impl StreamAdapter for CopilotParser {
    fn on_payload(&mut self, payload: &Value) -> ParseAction {
        let chunk: Chunk = match serde_json::from_value(payload.clone()) {
            Ok(chunk) => chunk,
            Err(e) => {
                tracing::warn!(%e, "Failed to parse Chat-Completions chunk");
                return ParseAction::Continue;
            }
        };

        let mut events = Vec::new();
        for choice in chunk.choices {
            let Some(delta) = choice.delta else { continue };
            if let Some(content) = delta.content
                && !content.is_empty()
            {
                events.extend(self.tracker.text_delta(&content));
            }
            for call in delta.tool_calls {
                // A new index means a new tool call, even if text already
                // streamed; the tracker closes the text block first.
                if !self.call_keys.contains_key(&call.index) {
                    let key = format!("tc-{}", call.index);
                    let id = call
                        .id
                        .clone()
                        .unwrap_or_else(|| format!("call_{}", uuid::Uuid::new_v4().simple()));
                    let name = call
                        .function
                        .as_ref()
                        .and_then(|f| f.name.clone())
                        .unwrap_or_default();
                    events.extend(self.tracker.open_tool_block(&key, &id, &name));
                    self.call_keys.insert(call.index, key);
                }
                if let Some(arguments) = call.function.and_then(|f| f.arguments)
                    && !arguments.is_empty()
                {
                    let key = self.call_keys.get(&call.index).cloned();
                    events.extend(self.tracker.tool_args_delta(key.as_deref(), &arguments));
                }
            }
        }
        if let Some(usage) = chunk.usage {
            self.tracker.set_input_tokens(usage.prompt_tokens);
            self.tracker.set_output_tokens(usage.completion_tokens);
        }

        if events.is_empty() {
            ParseAction::Continue
        } else {
            ParseAction::Emit(events)
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
        ToolChoice::Tool { name } => {
            json!({ "type": "function", "function": { "name": name } })
        }
    }
}

/// Build the Chat-Completions payload from a canonical request.
#[must_use]
pub fn build_payload(request: &MessagesRequest) -> Value {
    let prepared = prepare(request);
    let mut messages: Vec<Value> = Vec::new();

    if let Some(system) = prepared.system_text() {
        messages.push(json!({ "role": "system", "content": system }));
    }

    for message in &prepared.messages {
        let mut text_parts: Vec<String> = Vec::new();
        let mut tool_calls: Vec<Value> = Vec::new();
        let mut tool_results: Vec<Value> = Vec::new();

        for block in message.blocks() {
            match &block {
                ContentBlock::Text { text, .. } => text_parts.push(text.clone()),
                ContentBlock::ToolUse { id, name, input, .. } => {
                    tool_calls.push(json!({
                        "id": id,
                        "type": "function",
                        "function": {
                            "name": name,
                            "arguments": serde_json::to_string(input)
                                .unwrap_or_else(|_| "{}".to_string())
                        }
                    }));
                }
                ContentBlock::ToolResult {
                    tool_use_id,
                    content,
                    ..
                } => {
                    tool_results.push(json!({
                        "role": "tool",
                        "tool_call_id": tool_use_id,
                        "content": content.flattened()
                    }));
                }
                ContentBlock::Thinking { .. } => {}
            }
        }

        if !text_parts.is_empty() || !tool_calls.is_empty() {
            let mut entry = serde_json::Map::new();
            entry.insert("role".to_string(), json!(message.role.as_str()));
            entry.insert(
                "content".to_string(),
                if text_parts.is_empty() {
                    Value::Null
                } else {
                    json!(text_parts.join("\n"))
                },
            );
            if !tool_calls.is_empty() {
                entry.insert("tool_calls".to_string(), Value::Array(tool_calls));
            }
            messages.push(Value::Object(entry));
        }
        messages.extend(tool_results);
    }

    let mut body = serde_json::Map::new();
    body.insert(
        "model".to_string(),
        json!(ModelFamily::Copilot.upstream_model(&prepared.model)),
    );
    body.insert("messages".to_string(), Value::Array(messages));
    body.insert("stream".to_string(), json!(true));

    if let Some(tools) = &prepared.tools
        && !tools.is_empty()
    {
        let wire_tools: Vec<Value> = tools
            .iter()
            .map(|tool| {
                json!({
                    "type": "function",
                    "function": {
                        "name": tool.name,
                        "description": tool.description,
                        "parameters": sanitize_parameters(&tool.input_schema)
                    }
                })
            })
            .collect();
        body.insert("tools".to_string(), Value::Array(wire_tools));
    }
    if let Some(choice) = &prepared.tool_choice {
        body.insert("tool_choice".to_string(), tool_choice_value(choice));
    }
    if let Some(max_tokens) = prepared.max_tokens {
        body.insert("max_tokens".to_string(), json!(max_tokens));
    }
    if let Some(temperature) = prepared.temperature {
        body.insert("temperature".to_string(), json!(temperature));
    }
    if let Some(top_p) = prepared.top_p {
        body.insert("top_p".to_string(), json!(top_p));
    }
    if let Some(stop) = &prepared.stop_sequences {
        body.insert("stop".to_string(), json!(stop));
    }

    Value::Object(body)
}

// ============================================================================
// Backend
// ============================================================================

/// The Copilot completions endpoint plus its token mint.
pub struct CopilotBackend {
    pub endpoint: String,
    pub mint_endpoint: String,
}

impl Default for CopilotBackend {
    fn default() -> Self {
        let profile = profile(ModelFamily::Copilot);
        Self {
            endpoint: profile.endpoint.to_string(),
            mint_endpoint: profile
                .token_mint_endpoint
                .expect("copilot profile declares a mint endpoint")
                .to_string(),
        }
    }
}

impl CopilotBackend {
    /// Exchange the long-lived OAuth token for a short-lived bearer.
    pub async fn mint_bearer(&self, oauth_token: &str) -> Result<MintedBearer, BackendError> {
        let response = http_client()
            .get(&self.mint_endpoint)
            .header("authorization", format!("token {oauth_token}"))
            .header("editor-version", EDITOR_VERSION)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(error_from_response(response).await);
        }
        let parsed: MintResponse = response
            .json()
            .await
            .map_err(|e| BackendError::Stream(format!("token mint response: {e}")))?;
        let expires_at = parsed
            .expires_at
            .and_then(|secs| Utc.timestamp_opt(secs, 0).single())
            .unwrap_or_else(|| Utc::now() + chrono::Duration::minutes(25));
        Ok(MintedBearer {
            bearer: parsed.token,
            expires_at,
        })
    }

    pub async fn start(
        &self,
        request: &MessagesRequest,
        bearer: &str,
    ) -> Result<BackendStream, BackendError> {
        let body = build_payload(request);
        let response = http_client()
            .post(&self.endpoint)
            .bearer_auth(bearer)
            .header("content-type", "application/json")
            .header("accept", "text/event-stream")
            .header("editor-version", EDITOR_VERSION)
            .header("copilot-integration-id", INTEGRATION_ID)
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(error_from_response(response).await);
        }

        Ok(BackendStream::Sse {
            response,
            adapter: Box::new(CopilotParser::new(&request.model)),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbar_types::{BlockDelta, BlockStart, StopReason};
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn request_from(value: Value) -> MessagesRequest {
        serde_json::from_value(value).expect("valid request")
    }

    fn drive(parser: &mut CopilotParser, payloads: &[Value]) -> Vec<StreamEvent> {
        let mut events = Vec::new();
        for payload in payloads {
            if let ParseAction::Emit(batch) = parser.on_payload(payload) {
                events.extend(batch);
            }
        }
        events.extend(parser.finish());
        events
    }

    #[test]
    fn maps_roles_and_tool_plumbing() {
        let request = request_from(json!({
            "model": "gh/gpt-4o",
            "system": "be terse",
            "messages": [
                {"role": "user", "content": "list files"},
                {"role": "assistant", "content": [
                    {"type": "text", "text": "running"},
                    {"type": "tool_use", "id": "c1", "name": "Bash", "input": {"cmd": "ls"}}
                ]},
                {"role": "user", "content": [
                    {"type": "tool_result", "tool_use_id": "c1", "content": "file1"}
                ]}
            ]
        }));
        let body = build_payload(&request);
        assert_eq!(body["model"], "gpt-4o");

        let messages = body["messages"].as_array().unwrap();
        assert_eq!(messages[0]["role"], "system");
        assert_eq!(messages[1]["role"], "user");
        assert_eq!(messages[2]["role"], "assistant");
        assert_eq!(messages[2]["tool_calls"][0]["id"], "c1");
        assert_eq!(
            messages[2]["tool_calls"][0]["function"]["name"],
            "Bash"
        );
        assert_eq!(messages[3]["role"], "tool");
        assert_eq!(messages[3]["tool_call_id"], "c1");
        assert_eq!(messages[3]["content"], "file1");
    }

    #[test]
    fn tool_only_assistant_turn_has_null_content() {
        let request = request_from(json!({
            "model": "gh/gpt-4o",
            "messages": [{"role": "assistant", "content": [
                {"type": "tool_use", "id": "c1", "name": "Read", "input": {}}
            ]}]
        }));
        let body = build_payload(&request);
        let messages = body["messages"].as_array().unwrap();
        assert!(messages[0]["content"].is_null());
        assert_eq!(messages[0]["tool_calls"].as_array().unwrap().len(), 1);
    }

    #[test]
    fn text_block_closes_before_late_tool_call() {
        let mut parser = CopilotParser::new("gh/gpt-4o");
        let events = drive(
            &mut parser,
            &[
                json!({"choices": [{"delta": {"content": "let me check"}}]}),
                json!({"choices": [{"delta": {"tool_calls": [
                    {"index": 0, "id": "c9", "function": {"name": "Bash"}}
                ]}}]}),
                json!({"choices": [{"delta": {"tool_calls": [
                    {"index": 0, "function": {"arguments": "{\"cmd\":\"ls\"}"}}
                ]}}]}),
            ],
        );

        let stop_0 = events
            .iter()
            .position(|e| matches!(e, StreamEvent::ContentBlockStop { index: 0 }))
            .expect("text block closes");
        let start_1 = events
            .iter()
            .position(|e| {
                matches!(
                    e,
                    StreamEvent::ContentBlockStart {
                        index: 1,
                        content_block: BlockStart::ToolUse { .. }
                    }
                )
            })
            .expect("tool block opens");
        assert!(stop_0 < start_1, "text must close before tool-use starts");

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
    fn usage_chunk_lands_in_message_delta() {
        let mut parser = CopilotParser::new("gh/gpt-4o");
        let events = drive(
            &mut parser,
            &[
                json!({"choices": [{"delta": {"content": "hi"}}]}),
                json!({"choices": [], "usage": {"prompt_tokens": 9, "completion_tokens": 4}}),
            ],
        );
        match events
            .iter()
            .find(|e| matches!(e, StreamEvent::MessageDelta { .. }))
        {
            Some(StreamEvent::MessageDelta { usage, .. }) => {
                assert_eq!(usage.input_tokens, 9);
                assert_eq!(usage.output_tokens, 4);
            }
            _ => panic!("message_delta missing"),
        }
    }

    #[test]
    fn multiple_tool_indices_open_distinct_blocks() {
        let mut parser = CopilotParser::new("gh/gpt-4o");
        let events = drive(
            &mut parser,
            &[json!({"choices": [{"delta": {"tool_calls": [
                {"index": 0, "id": "a", "function": {"name": "Read",
                    "arguments": "{\"f\":1}"}},
                {"index": 1, "id": "b", "function": {"name": "Bash",
                    "arguments": "{\"c\":2}"}}
            ]}}]})],
        );
        let starts: Vec<usize> = events
            .iter()
            .filter_map(|event| match event {
                StreamEvent::ContentBlockStart { index, .. } => Some(*index),
                _ => None,
            })
            .collect();
        assert_eq!(starts, vec![0, 1]);

        let fragments: Vec<(usize, &str)> = events
            .iter()
            .filter_map(|event| match event {
                StreamEvent::ContentBlockDelta {
                    index,
                    delta: BlockDelta::InputJsonDelta { partial_json },
                } => Some((*index, partial_json.as_str())),
                _ => None,
            })
            .collect();
        assert_eq!(fragments, vec![(0, "{\"f\":1}"), (1, "{\"c\":2}")]);
    }

    #[tokio::test]
    async fn mint_exchanges_oauth_token_for_bearer() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/copilot_internal/v2/token"))
            .and(header("authorization", "token gho_longlived"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "token": "short-lived-bearer",
                "expires_at": 4_102_444_800i64
            })))
            .expect(1)
            .mount(&server)
            .await;

        let backend = CopilotBackend {
            endpoint: format!("{}/chat/completions", server.uri()),
            mint_endpoint: format!("{}/copilot_internal/v2/token", server.uri()),
        };
        let minted = backend.mint_bearer("gho_longlived").await.unwrap();
        assert_eq!(minted.bearer, "short-lived-bearer");
        assert!(minted.expires_at > Utc::now());
    }

    #[tokio::test]
    async fn mint_rejection_carries_status() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/copilot_internal/v2/token"))
            .respond_with(ResponseTemplate::new(401).set_body_string("bad credentials"))
            .mount(&server)
            .await;

        let backend = CopilotBackend {
            endpoint: format!("{}/chat/completions", server.uri()),
            mint_endpoint: format!("{}/copilot_internal/v2/token", server.uri()),
        };
        match backend.mint_bearer("gho_revoked").await {
            Err(BackendError::Http { status: 401, .. }) => {}
            other => panic!("expected 401, got {other:?}"),
        }
    }
}
