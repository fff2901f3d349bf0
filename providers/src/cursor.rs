//! Cursor backend (length-prefixed binary frames).
//!
//! The chat RPC takes a framed body instead of JSON: each frame is a flag
//! byte, a 4-byte big-endian length, and a payload that is gzipped when the
//! flag says so. Responses use the same framing; each decoded payload is a
//! small JSON event (`text` / `toolCall` / `error`). Client identity rides
//! in headers: a scrambled timestamp checksum bound to the machine id, a
//! SHA-256 client key, and fresh UUIDs per call.

use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use serde::Deserialize;
use serde_json::{Value, json};
use sha2::{Digest, Sha256};
use std::io::{Read, Write};

use crossbar_config::profile;
use crossbar_types::{ContentBlock, MessagesRequest, ModelFamily, StreamEvent};

use crate::request::{SYSTEM_INSTRUCTIONS_HEADER, prepare};
use crate::schema::sanitize_parameters;
use crate::sse::{BackendStream, ParseAction, StreamAdapter};
use crate::state::BlockTracker;
use crate::{BackendError, error_from_response, http_client};

const FLAG_PLAIN: u8 = 0x00;
const FLAG_GZIP: u8 = 0x01;
/// Compress request payloads past this size.
const GZIP_THRESHOLD: usize = 1024;

// ============================================================================
// Frame codec
// ============================================================================

/// Encode one frame: flag byte + 4-byte big-endian length + payload.
fn encode_frame(flag: u8, payload: &[u8]) -> Vec<u8> {
    let mut frame = Vec::with_capacity(5 + payload.len());
    frame.push(flag);
    frame.extend_from_slice(&(payload.len() as u32).to_be_bytes());
    frame.extend_from_slice(payload);
    frame
}

/// Encode a request body as a single frame, gzipping large payloads.
pub(crate) fn encode_body(payload: &[u8]) -> Vec<u8> {
    if payload.len() > GZIP_THRESHOLD {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        if encoder.write_all(payload).is_ok()
            && let Ok(compressed) = encoder.finish()
        {
            return encode_frame(FLAG_GZIP, &compressed);
        }
    }
    encode_frame(FLAG_PLAIN, payload)
}

/// Pull the next complete frame's payload off the buffer, gunzipping when
/// flagged (0x01/0x02/0x03 all mean gzip). `None` means more bytes needed.
pub(crate) fn drain_frame(buffer: &mut Vec<u8>) -> Result<Option<Vec<u8>>, BackendError> {
    if buffer.len() < 5 {
        return Ok(None);
    }
    let flag = buffer[0];
    let len = u32::from_be_bytes([buffer[1], buffer[2], buffer[3], buffer[4]]) as usize;
    if buffer.len() < 5 + len {
        return Ok(None);
    }
    let payload: Vec<u8> = buffer[5..5 + len].to_vec();
    buffer.drain(..5 + len);

    if matches!(flag, 0x01..=0x03) {
        let mut decoder = GzDecoder::new(payload.as_slice());
        let mut decompressed = Vec::new();
        decoder
            .read_to_end(&mut decompressed)
            .map_err(|e| BackendError::Stream(format!("bad gzip frame: {e}")))?;
        Ok(Some(decompressed))
    } else {
        Ok(Some(payload))
    }
}

// ============================================================================
// Client identity
// ============================================================================

/// XOR-scramble under a rolling key; the key absorbs each scrambled byte.
fn scramble(bytes: &mut [u8]) {
    let mut key: u8 = 165;
    for byte in bytes.iter_mut() {
        *byte ^= key;
        key = key.wrapping_add(*byte).wrapping_mul(3);
    }
}

/// The `X-Cursor-Checksum` value: scrambled timestamp, base64url, then the
/// machine identifier.
#[must_use]
pub fn checksum_header(machine_id: &str, now_millis: u64) -> String {
    // Coarse timestamp: half-hour buckets keep the value stable across the
    // requests of one session.
    let bucket = now_millis / 1_000 / 1_800;
    let mut bytes = [
        (bucket >> 40) as u8,
        (bucket >> 32) as u8,
        (bucket >> 24) as u8,
        (bucket >> 16) as u8,
        (bucket >> 8) as u8,
        bucket as u8,
    ];
    scramble(&mut bytes);
    format!("{}{}", URL_SAFE_NO_PAD.encode(bytes), machine_id)
}

/// `x-client-key`: SHA-256 of the API token, hex.
#[must_use]
pub fn client_key(api_token: &str) -> String {
    let digest = Sha256::digest(api_token.as_bytes());
    digest.iter().fold(String::new(), |mut out, byte| {
        use std::fmt::Write as _;
        let _ = write!(out, "{byte:02x}");
        out
    })
}

// ============================================================================
// Streaming adapter
// ============================================================================

/// One decoded frame payload.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FrameEvent {
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    tool_call: Option<FrameToolCall>,
    #[serde(default)]
    error: Option<FrameError>,
}

#[derive(Debug, Deserialize)]
struct FrameToolCall {
    #[serde(default)]
    id: Option<String>,
    name: Option<String>,
    #[serde(default)]
    args: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct FrameError {
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

impl FrameError {
    /// Map the embedded error onto an HTTP status the orchestrator already
    /// knows how to classify.
    fn status(&self) -> u16 {
        match self.code.as_deref().unwrap_or("") {
            "unauthenticated" | "permission_denied" => 401,
            "resource_exhausted" | "rate_limited" => 429,
            _ => 502,
        }
    }
}

struct CursorParser {
    tracker: BlockTracker,
}

impl CursorParser {
    fn new(model: &str) -> Self {
        Self {
            tracker: BlockTracker::new(model),
        }
    }
}

impl StreamAdapter for CursorParser {
    fn on_payload(&mut self, payload: &Value) -> ParseAction {
        // Only JSON objects carrying an `error` key are classified; anything
        // else structured passes through untouched.
        let event: FrameEvent = match serde_json::from_value(payload.clone()) {
            Ok(event) => event,
            Err(e) => {
                tracing::warn!(%e, "Failed to parse Cursor frame event");
                return ParseAction::Continue;
            }
        };

        if let Some(error) = event.error {
            let status = error.status();
            let body = error.message.unwrap_or_else(|| "upstream error".to_string());
            return ParseAction::Error(BackendError::Http {
                status,
                body,
                retry_after: None,
            });
        }

        let mut events = Vec::new();
        if let Some(text) = event.text
            && !text.is_empty()
        {
            events.extend(self.tracker.text_delta(&text));
        }
        if let Some(call) = event.tool_call {
            let Some(name) = call.name.filter(|n| !n.is_empty()) else {
                return ParseAction::Continue;
            };
            let call_id = call
                .id
                .unwrap_or_else(|| format!("toolu_{}", uuid::Uuid::new_v4().simple()));
            let args = call.args.unwrap_or_else(|| json!({}));
            events.extend(self.tracker.open_tool_block(&call_id, &call_id, &name));
            let serialized = serde_json::to_string(&args).unwrap_or_else(|_| "{}".to_string());
            events.extend(self.tracker.tool_args_delta(Some(&call_id), &serialized));
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

/// The canonical intermediate the frame encoder serializes.
#[must_use]
pub fn build_intermediate(request: &MessagesRequest) -> Value {
    let prepared = prepare(request);

    let mut messages: Vec<Value> = Vec::new();
    // No system slot on this wire: fold the prompt into a leading user turn.
    if let Some(system) = prepared.system_text() {
        messages.push(json!({
            "role": "user",
            "text": format!("{SYSTEM_INSTRUCTIONS_HEADER}\n{system}")
        }));
    }
    for message in &prepared.messages {
        let mut text_parts: Vec<String> = Vec::new();
        let mut tool_calls: Vec<Value> = Vec::new();
        for block in message.blocks() {
            match &block {
                ContentBlock::Text { text, .. } => text_parts.push(text.clone()),
                ContentBlock::ToolUse { id, name, input, .. } => {
                    tool_calls.push(json!({ "id": id, "name": name, "args": input }));
                }
                ContentBlock::ToolResult {
                    tool_use_id,
                    content,
                    ..
                } => {
                    text_parts.push(format!(
                        "[Tool result {tool_use_id}]\n{}",
                        content.flattened()
                    ));
                }
                ContentBlock::Thinking { .. } => {}
            }
        }
        if text_parts.is_empty() && tool_calls.is_empty() {
            continue;
        }
        let mut entry = serde_json::Map::new();
        entry.insert("role".to_string(), json!(message.role.as_str()));
        if !text_parts.is_empty() {
            entry.insert("text".to_string(), json!(text_parts.join("\n")));
        }
        if !tool_calls.is_empty() {
            entry.insert("toolCalls".to_string(), Value::Array(tool_calls));
        }
        messages.push(Value::Object(entry));
    }

    let tools: Vec<Value> = prepared
        .tools
        .iter()
        .flatten()
        .map(|tool| {
            json!({
                "name": tool.name,
                "description": tool.description,
                "parameters": sanitize_parameters(&tool.input_schema)
            })
        })
        .collect();

    json!({
        "model": ModelFamily::Cursor.upstream_model(&prepared.model),
        "messages": messages,
        "tools": tools,
        "reasoningEffort": "medium"
    })
}

// ============================================================================
// Backend
// ============================================================================

/// The Cursor chat RPC endpoint.
pub struct CursorBackend {
    pub endpoint: String,
}

impl Default for CursorBackend {
    fn default() -> Self {
        Self {
            endpoint: profile(ModelFamily::Cursor).endpoint.to_string(),
        }
    }
}

impl CursorBackend {
    pub async fn start(
        &self,
        request: &MessagesRequest,
        api_token: &str,
        machine_id: &str,
        ghost_mode: bool,
    ) -> Result<BackendStream, BackendError> {
        let intermediate = build_intermediate(request);
        let body = encode_body(intermediate.to_string().as_bytes());
        let now_millis = chrono::Utc::now().timestamp_millis().max(0) as u64;

        let mut builder = http_client()
            .post(&self.endpoint)
            .bearer_auth(api_token)
            .header("content-type", "application/octet-stream")
            .header("x-cursor-checksum", checksum_header(machine_id, now_millis))
            .header("x-client-key", client_key(api_token))
            .header("x-request-id", uuid::Uuid::new_v4().to_string())
            .header("x-session-id", uuid::Uuid::new_v4().to_string())
            .header("x-cursor-config-version", uuid::Uuid::new_v4().to_string())
            .header("x-amzn-trace-id", format!("Root={}", uuid::Uuid::new_v4()));
        if ghost_mode {
            builder = builder.header("x-ghost-mode", "true");
        }

        let response = builder.body(body).send().await?;
        if !response.status().is_success() {
            return Err(error_from_response(response).await);
        }

        Ok(BackendStream::Frames {
            response,
            adapter: Box::new(CursorParser::new(&request.model)),
        })
    }
}
