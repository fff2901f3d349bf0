//! Google cloud-code backend.
//!
//! Serves both `claude-*` and `gemini-*` models behind one envelope: the
//! canonical conversation becomes `contents` with `user`/`model` roles and
//! typed parts. Tool calls arrive complete (never argument-streamed), and
//! responses may carry quota telemetry which feeds the pool's quota tracker.

use serde::Deserialize;
use serde_json::{Map, Value, json};
use std::collections::HashMap;

use crossbar_config::profile;
use crossbar_types::{ContentBlock, MessagesRequest, ModelFamily, Role, StreamEvent};

use crate::request::prepare;
use crate::schema::sanitize_parameters;
use crate::sse::{BackendStream, ParseAction, StreamAdapter};
use crate::state::BlockTracker;
use crate::{BackendError, SendReport, error_from_response, http_client};

// ============================================================================
// Streaming adapter
// ============================================================================

#[derive(Debug, Deserialize)]
struct Chunk {
    #[serde(default)]
    response: Option<Inner>,
    #[serde(default)]
    candidates: Option<Vec<Candidate>>,
    #[serde(default, rename = "usageMetadata")]
    usage_metadata: Option<UsageMetadata>,
    #[serde(default, rename = "quotaInfo")]
    quota_info: Option<QuotaInfo>,
}

#[derive(Debug, Deserialize)]
struct Inner {
    #[serde(default)]
    candidates: Option<Vec<Candidate>>,
    #[serde(default, rename = "usageMetadata")]
    usage_metadata: Option<UsageMetadata>,
    #[serde(default, rename = "quotaInfo")]
    quota_info: Option<QuotaInfo>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    #[serde(default)]
    content: Option<Content>,
}

#[derive(Debug, Deserialize)]
struct Content {
    #[serde(default)]
    parts: Option<Vec<Part>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Part {
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    thought: bool,
    #[serde(default)]
    function_call: Option<FunctionCall>,
}

#[derive(Debug, Deserialize)]
struct FunctionCall {
    name: Option<String>,
    args: Option<Value>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct UsageMetadata {
    #[serde(default)]
    prompt_token_count: u64,
    #[serde(default)]
    candidates_token_count: u64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct QuotaInfo {
    remaining_fraction: Option<f64>,
}

struct CloudCodeParser {
    tracker: BlockTracker,
    quota_fraction: Option<f64>,
}

impl CloudCodeParser {
    fn new(model: &str) -> Self {
        Self {
            tracker: BlockTracker::new(model),
            quota_fraction: None,
        }
    }
}

impl StreamAdapter for CloudCodeParser {
    fn on_payload(&mut self, payload: &Value) -> ParseAction {
        let chunk: Chunk = match serde_json::from_value(payload.clone()) {
            Ok(chunk) => chunk,
            Err(e) => {
                tracing::warn!(%e, "Failed to parse cloud-code chunk");
                return ParseAction::Continue;
            }
        };

        // The envelope sometimes nests under `response`.
        let (candidates, usage, quota) = match chunk.response {
            Some(inner) => (inner.candidates, inner.usage_metadata, inner.quota_info),
            None => (chunk.candidates, chunk.usage_metadata, chunk.quota_info),
        };

        if let Some(usage) = usage {
            self.tracker.set_input_tokens(usage.prompt_token_count);
            self.tracker.set_output_tokens(usage.candidates_token_count);
        }
        if let Some(fraction) = quota.and_then(|q| q.remaining_fraction) {
            self.quota_fraction = Some(fraction.clamp(0.0, 1.0));
        }

        let mut events = Vec::new();
        for candidate in candidates.unwrap_or_default() {
            let parts = candidate.content.and_then(|c| c.parts).unwrap_or_default();
            for part in parts {
                if part.thought {
                    continue;
                }
                if let Some(text) = part.text
                    && !text.is_empty()
                {
                    events.extend(self.tracker.text_delta(&text));
                }
                if let Some(call) = part.function_call {
                    let Some(name) = call.name.filter(|n| !n.is_empty()) else {
                        continue;
                    };
                    let call_id = format!("toolu_{}", uuid::Uuid::new_v4().simple());
                    let args = call.args.unwrap_or_else(|| Value::Object(Map::new()));
                    events.extend(self.tracker.open_tool_block(&call_id, &call_id, &name));
                    let serialized =
                        serde_json::to_string(&args).unwrap_or_else(|_| "{}".to_string());
                    events.extend(self.tracker.tool_args_delta(Some(&call_id), &serialized));
                }
            }
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

    fn report(&self) -> SendReport {
        SendReport {
            quota_fraction: self.quota_fraction,
        }
    }
}

// ============================================================================
// Request adapter
// ============================================================================

/// Build the cloud-code envelope from a canonical request.
#[must_use]
pub fn build_payload(request: &MessagesRequest) -> Value {
    let prepared = prepare(request);

    // functionResponse parts are keyed by tool *name*; recover it from the
    // tool_use block the result answers.
    let mut tool_names: HashMap<String, String> = HashMap::new();
    for message in &prepared.messages {
        for block in message.blocks() {
            if let ContentBlock::ToolUse { id, name, .. } = &block {
                tool_names.insert(id.clone(), name.clone());
            }
        }
    }

    let mut contents: Vec<Value> = Vec::new();
    for message in &prepared.messages {
        let role = match message.role {
            Role::User => "user",
            Role::Assistant => "model",
        };
        let mut parts: Vec<Value> = Vec::new();
        for block in message.blocks() {
            match &block {
                ContentBlock::Text { text, .. } => {
                    parts.push(json!({ "text": text }));
                }
                ContentBlock::ToolUse { name, input, .. } => {
                    parts.push(json!({
                        "functionCall": { "name": name, "args": input }
                    }));
                }
                ContentBlock::ToolResult {
                    tool_use_id,
                    content,
                    ..
                } => {
                    let name = tool_names
                        .get(tool_use_id)
                        .cloned()
                        .unwrap_or_else(|| "tool".to_string());
                    parts.push(json!({
                        "functionResponse": {
                            "name": name,
                            "response": { "result": content.flattened() }
                        }
                    }));
                }
                ContentBlock::Thinking { .. } => {}
            }
        }
        if !parts.is_empty() {
            contents.push(json!({ "role": role, "parts": parts }));
        }
    }

    let mut inner = serde_json::Map::new();
    inner.insert("contents".to_string(), Value::Array(contents));

    if let Some(system) = prepared.system_text() {
        inner.insert(
            "systemInstruction".to_string(),
            json!({ "parts": [{ "text": system }] }),
        );
    }

    if let Some(tools) = &prepared.tools
        && !tools.is_empty()
    {
        let declarations: Vec<Value> = tools
            .iter()
            .map(|tool| {
                json!({
                    "name": tool.name,
                    "description": tool.description,
                    "parameters": sanitize_parameters(&tool.input_schema)
                })
            })
            .collect();
        inner.insert(
            "tools".to_string(),
            json!([{ "functionDeclarations": declarations }]),
        );
    }

    let mut generation = serde_json::Map::new();
    if let Some(max_tokens) = prepared.max_tokens {
        generation.insert("maxOutputTokens".to_string(), json!(max_tokens));
    }
    if let Some(temperature) = prepared.temperature {
        generation.insert("temperature".to_string(), json!(temperature));
    }
    if let Some(top_p) = prepared.top_p {
        generation.insert("topP".to_string(), json!(top_p));
    }
    if let Some(stop) = &prepared.stop_sequences {
        generation.insert("stopSequences".to_string(), json!(stop));
    }
    if !generation.is_empty() {
        inner.insert("generationConfig".to_string(), Value::Object(generation));
    }

    json!({
        "model": ModelFamily::CloudCode.upstream_model(&prepared.model),
        "request": Value::Object(inner)
    })
}

// ============================================================================
// Backend
// ============================================================================

/// The cloud-code streaming endpoint.
pub struct CloudCodeBackend {
    pub endpoint: String,
}

impl Default for CloudCodeBackend {
    fn default() -> Self {
        Self {
            endpoint: profile(ModelFamily::CloudCode).endpoint.to_string(),
        }
    }
}

impl CloudCodeBackend {
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
            adapter: Box::new(CloudCodeParser::new(&request.model)),
        })
    }
}
