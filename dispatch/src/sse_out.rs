//! Client-side SSE serialization of canonical events.

use crossbar_types::StreamEvent;

/// One canonical event as a `text/event-stream` record: an `event:` line
/// naming the type, a `data:` line with the JSON body, and a blank line.
#[must_use]
pub fn event_to_sse(event: &StreamEvent) -> String {
    let data = serde_json::to_string(event).expect("canonical events serialize");
    format!("event: {}\ndata: {}\n\n", event.event_name(), data)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbar_types::{MessageShell, StreamEvent};

    #[test]
    fn frames_event_and_data_lines() {
        let event = StreamEvent::MessageStart {
            message: MessageShell::start("msg_1".to_string(), "gpt-5.1-codex".to_string()),
        };
        let sse = event_to_sse(&event);
        let mut lines = sse.lines();
        assert_eq!(lines.next(), Some("event: message_start"));
        let data = lines.next().unwrap().strip_prefix("data: ").unwrap();
        let parsed: serde_json::Value = serde_json::from_str(data).unwrap();
        assert_eq!(parsed["type"], "message_start");
        assert!(sse.ends_with("\n\n"));
    }

    #[test]
    fn message_stop_is_minimal() {
        let sse = event_to_sse(&StreamEvent::MessageStop);
        assert_eq!(sse, "event: message_stop\ndata: {\"type\":\"message_stop\"}\n\n");
    }
}
