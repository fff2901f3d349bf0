//! Shared streaming machinery.
//!
//! Both wire shapes end in the same place: a byte stream is framed (SSE
//! events or length-prefixed frames), each payload parses to JSON, and a
//! per-backend [`StreamAdapter`] maps it onto canonical events. Back-pressure
//! from the client propagates to the backend socket because the pump only
//! polls more bytes after the bounded channel accepts the previous events.

use futures_util::StreamExt;
use serde_json::Value;
use tokio::sync::mpsc;

use crossbar_types::StreamEvent;

use crate::{BackendError, MAX_STREAM_BUFFER_BYTES, SendReport, cursor};

/// What an adapter wants done with one parsed payload.
pub enum ParseAction {
    /// Nothing to emit.
    Continue,
    /// Forward these canonical events.
    Emit(Vec<StreamEvent>),
    /// Abort the stream with a classified error.
    Error(BackendError),
}

/// One backend's wire-event -> canonical-event translator.
///
/// Implementations own a [`crate::BlockTracker`] and defer all framing
/// decisions to it; the trait only sees parsed JSON payloads.
pub trait StreamAdapter: Send {
    fn on_payload(&mut self, payload: &Value) -> ParseAction;

    /// Stream end: close open blocks and emit the terminal events.
    fn finish(&mut self) -> Vec<StreamEvent>;

    /// Whether any canonical event was produced (for cancellation refunds).
    fn produced_output(&self) -> bool;

    /// Post-stream telemetry (quota, for backends that report it).
    fn report(&self) -> SendReport {
        SendReport::default()
    }
}

/// How a pumped stream ended.
#[derive(Debug, Clone, Copy)]
pub struct StreamOutcome {
    pub report: SendReport,
    pub produced_output: bool,
    /// The client went away mid-stream; the backend call was dropped.
    pub cancelled: bool,
}

/// An accepted (2xx) backend response, ready to pump.
pub enum BackendStream {
    /// `text/event-stream` framing.
    Sse {
        response: reqwest::Response,
        adapter: Box<dyn StreamAdapter>,
    },
    /// Length-prefixed (optionally gzipped) binary frames.
    Frames {
        response: reqwest::Response,
        adapter: Box<dyn StreamAdapter>,
    },
}

impl BackendStream {
    /// Drive the response through the adapter into `tx`.
    ///
    /// A closed receiver is cancellation, not an error: the pump stops,
    /// dropping the response (and with it the backend socket).
    pub async fn pump(
        self,
        tx: &mpsc::Sender<StreamEvent>,
    ) -> Result<StreamOutcome, BackendError> {
        match self {
            Self::Sse { response, adapter } => pump_sse(response, adapter, tx).await,
            Self::Frames { response, adapter } => pump_frames(response, adapter, tx).await,
        }
    }
}

/// Forward events; `false` means the receiver is gone.
async fn forward(tx: &mpsc::Sender<StreamEvent>, events: Vec<StreamEvent>) -> bool {
    for event in events {
        if tx.send(event).await.is_err() {
            return false;
        }
    }
    true
}

async fn pump_sse(
    response: reqwest::Response,
    mut adapter: Box<dyn StreamAdapter>,
    tx: &mpsc::Sender<StreamEvent>,
) -> Result<StreamOutcome, BackendError> {
    let mut stream = response.bytes_stream();
    let mut buffer: Vec<u8> = Vec::new();

    'read: while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(BackendError::from)?;
        buffer.extend_from_slice(&chunk);
        if buffer.len() > MAX_STREAM_BUFFER_BYTES {
            return Err(BackendError::Stream(
                "SSE buffer exceeded maximum size (4 MiB)".to_string(),
            ));
        }

        while let Some(event) = drain_next_sse_event(&mut buffer) {
            if event.is_empty() {
                continue;
            }
            let Ok(event) = std::str::from_utf8(&event) else {
                tracing::warn!("Skipping invalid UTF-8 SSE event");
                continue;
            };
            let Some(data) = extract_sse_data(event) else {
                continue;
            };
            if data == "[DONE]" {
                break 'read;
            }
            // Malformed payloads are ignored, not fatal.
            let Ok(json) = serde_json::from_str::<Value>(&data) else {
                continue;
            };
            match adapter.on_payload(&json) {
                ParseAction::Continue => {}
                ParseAction::Emit(events) => {
                    if !forward(tx, events).await {
                        return Ok(cancelled_outcome(&*adapter));
                    }
                }
                ParseAction::Error(e) => return Err(e),
            }
        }
    }

    let finish = adapter.finish();
    if !forward(tx, finish).await {
        return Ok(cancelled_outcome(&*adapter));
    }
    Ok(StreamOutcome {
        report: adapter.report(),
        produced_output: adapter.produced_output(),
        cancelled: false,
    })
}

async fn pump_frames(
    response: reqwest::Response,
    mut adapter: Box<dyn StreamAdapter>,
    tx: &mpsc::Sender<StreamEvent>,
) -> Result<StreamOutcome, BackendError> {
    let mut stream = response.bytes_stream();
    let mut buffer: Vec<u8> = Vec::new();

    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(BackendError::from)?;
        buffer.extend_from_slice(&chunk);
        if buffer.len() > MAX_STREAM_BUFFER_BYTES {
            return Err(BackendError::Stream(
                "frame buffer exceeded maximum size (4 MiB)".to_string(),
            ));
        }

        while let Some(payload) = cursor::drain_frame(&mut buffer)? {
            let Ok(json) = serde_json::from_slice::<Value>(&payload) else {
                tracing::warn!("Skipping undecodable frame payload");
                continue;
            };
            match adapter.on_payload(&json) {
                ParseAction::Continue => {}
                ParseAction::Emit(events) => {
                    if !forward(tx, events).await {
                        return Ok(cancelled_outcome(&*adapter));
                    }
                }
                ParseAction::Error(e) => return Err(e),
            }
        }
    }

    let finish = adapter.finish();
    if !forward(tx, finish).await {
        return Ok(cancelled_outcome(&*adapter));
    }
    Ok(StreamOutcome {
        report: adapter.report(),
        produced_output: adapter.produced_output(),
        cancelled: false,
    })
}

fn cancelled_outcome(adapter: &dyn StreamAdapter) -> StreamOutcome {
    StreamOutcome {
        report: adapter.report(),
        produced_output: adapter.produced_output(),
        cancelled: true,
    }
}

// ============================================================================
// SSE framing
// ============================================================================

fn find_sse_event_boundary(buffer: &[u8]) -> Option<(usize, usize)> {
    let lf = buffer.windows(2).position(|w| w == b"\n\n");
    let crlf = buffer.windows(4).position(|w| w == b"\r\n\r\n");
    match (lf, crlf) {
        (Some(a), Some(b)) => Some(if a <= b { (a, 2) } else { (b, 4) }),
        (Some(a), None) => Some((a, 2)),
        (None, Some(b)) => Some((b, 4)),
        (None, None) => None,
    }
}

pub(crate) fn drain_next_sse_event(buffer: &mut Vec<u8>) -> Option<Vec<u8>> {
    let (pos, delim_len) = find_sse_event_boundary(buffer)?;
    let event = buffer[..pos].to_vec();
    buffer.drain(..pos + delim_len);
    Some(event)
}

/// Join the `data:` lines of one SSE event.
pub(crate) fn extract_sse_data(event: &str) -> Option<String> {
    let mut data = String::new();
    let mut found = false;

    for line in event.lines() {
        let line = line.strip_suffix('\r').unwrap_or(line);

        if let Some(mut rest) = line.strip_prefix("data:") {
            if let Some(stripped) = rest.strip_prefix(' ') {
                rest = stripped;
            }

            if found {
                data.push('\n');
            }
            data.push_str(rest);
            found = true;
        }
    }

    if found { Some(data) } else { None }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn drains_lf_and_crlf_delimited_events() {
        let mut buffer = b"data: one\n\ndata: two\r\n\r\nrest".to_vec();
        assert_eq!(drain_next_sse_event(&mut buffer).unwrap(), b"data: one");
        assert_eq!(drain_next_sse_event(&mut buffer).unwrap(), b"data: two");
        assert!(drain_next_sse_event(&mut buffer).is_none());
        assert_eq!(buffer, b"rest");
    }

    #[test]
    fn extracts_multi_line_data() {
        let event = "event: delta\ndata: {\"a\":\ndata: 1}";
        assert_eq!(extract_sse_data(event).as_deref(), Some("{\"a\":\n1}"));
    }

    #[test]
    fn events_without_data_yield_none() {
        assert_eq!(extract_sse_data(": keepalive"), None);
        assert_eq!(extract_sse_data("event: ping"), None);
    }
}
