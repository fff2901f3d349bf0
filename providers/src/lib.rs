//! Backend protocol adapters.
//!
//! This crate handles HTTP communication with the four upstream backends,
//! translating the canonical Messages request into each wire format and each
//! backend's streamed response into canonical events. Streaming is
//! two-phase: `start` posts the request and fails fast on a non-2xx status
//! (so the orchestrator can rotate accounts), `pump` drives the accepted
//! stream into a channel with back-pressure.

use std::sync::OnceLock;
use std::time::Duration;

use thiserror::Error;

mod cloudcode;
mod codex;
mod copilot;
mod cursor;
mod request;
mod schema;
mod sse;
mod state;

pub use cloudcode::CloudCodeBackend;
pub use codex::CodexBackend;
pub use copilot::{CopilotBackend, MintedBearer};
pub use cursor::CursorBackend;
pub use request::SYSTEM_PREAMBLE;
pub use schema::{sanitize_parameters, sanitize_schema};
pub use sse::{BackendStream, ParseAction, StreamAdapter, StreamOutcome};
pub use state::BlockTracker;

// ============================================================================
// Shared HTTP client
// ============================================================================

/// Connection timeout for backend requests.
const CONNECT_TIMEOUT_SECS: u64 = 30;

/// Maximum bytes for the stream parse buffer before aborting (4 MiB).
/// Prevents memory exhaustion from malicious/misbehaving servers.
pub(crate) const MAX_STREAM_BUFFER_BYTES: usize = 4 * 1024 * 1024;

/// Maximum bytes for error body reads (32 KiB).
pub(crate) const MAX_ERROR_BODY_BYTES: usize = 32 * 1024;

/// Shared HTTP client for all backend requests.
///
/// - Connection timeout: 30 seconds
/// - No total timeout (streams can run for extended periods)
/// - Redirects disabled (backend endpoints should never redirect)
pub fn http_client() -> &'static reqwest::Client {
    static CLIENT: OnceLock<reqwest::Client> = OnceLock::new();
    CLIENT.get_or_init(|| {
        reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(CONNECT_TIMEOUT_SECS))
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .expect("build shared HTTP client")
    })
}

// ============================================================================
// Errors
// ============================================================================

/// A backend call failure, carrying the status hint the orchestrator
/// classifies on.
#[derive(Debug, Error)]
pub enum BackendError {
    /// Non-2xx from the backend (or an embedded status-coded error in a
    /// 200-framed body). `retry_after` is the parsed `Retry-After` header
    /// when the backend sent one.
    #[error("backend returned {status}: {body}")]
    Http {
        status: u16,
        body: String,
        retry_after: Option<Duration>,
    },

    /// Network-level failure.
    #[error("transport error: {0}")]
    Transport(String),

    /// The accepted stream misbehaved (oversized buffer, invalid framing).
    #[error("stream error: {0}")]
    Stream(String),
}

impl From<reqwest::Error> for BackendError {
    fn from(e: reqwest::Error) -> Self {
        Self::Transport(e.to_string())
    }
}

impl BackendError {
    #[must_use]
    pub const fn status(&self) -> Option<u16> {
        match self {
            Self::Http { status, .. } => Some(*status),
            _ => None,
        }
    }
}

/// Post-stream report: what the backend told us beyond the content.
#[derive(Debug, Clone, Copy, Default)]
pub struct SendReport {
    /// Remaining free-quota fraction, for backends with quota telemetry.
    pub quota_fraction: Option<f64>,
}

// ============================================================================
// Response helpers
// ============================================================================

/// Parse a `Retry-After` header value (integer seconds).
#[must_use]
pub fn parse_retry_after(headers: &reqwest::header::HeaderMap) -> Option<Duration> {
    let value = headers.get("retry-after")?.to_str().ok()?;
    let secs: u64 = value.trim().parse().ok()?;
    (secs > 0).then(|| Duration::from_secs(secs))
}

/// Read an HTTP error response body with a size cap.
pub(crate) async fn read_capped_error_body(response: reqwest::Response) -> String {
    use futures_util::StreamExt;
    let mut body = Vec::new();
    let mut stream = response.bytes_stream();
    while let Some(chunk) = stream.next().await {
        let Ok(chunk) = chunk else { break };
        body.extend_from_slice(&chunk);
        if body.len() > MAX_ERROR_BODY_BYTES {
            body.truncate(MAX_ERROR_BODY_BYTES);
            let text = String::from_utf8_lossy(&body);
            return format!("{text}...(truncated)");
        }
    }
    String::from_utf8_lossy(&body).into_owned()
}

/// Turn a non-2xx response into a `BackendError::Http`, preserving the
/// Retry-After hint and a capped body.
pub(crate) async fn error_from_response(response: reqwest::Response) -> BackendError {
    let status = response.status().as_u16();
    let retry_after = parse_retry_after(response.headers());
    let body = read_capped_error_body(response).await;
    BackendError::Http {
        status,
        body,
        retry_after,
    }
}
