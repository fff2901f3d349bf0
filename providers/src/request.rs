//! Pre-processing shared by every request adapter.

use crossbar_types::MessagesRequest;

/// Canned preamble for backends that expect their own agent products on the
/// other end of the wire.
pub const SYSTEM_PREAMBLE: &str = "You are an autonomous coding agent. You operate \
inside a developer's terminal session, use the provided tools to inspect and modify \
the project, and keep working until the task is done.";

/// Header used when a backend has no system slot at all and the prompt is
/// folded into the first user message.
pub const SYSTEM_INSTRUCTIONS_HEADER: &str = "[System Instructions]";

/// Tool names that spawn sub-agents on the client side; no backend executes
/// them, so their declarations never go upstream.
pub const AGENT_TOOL_NAMES: &[&str] = &["Task", "dispatch_agent", "computer", "browser"];

/// The built-in web-search tool, rewired per backend.
pub const WEB_SEARCH_TOOL: &str = "WebSearch";

/// Clone the request and apply the adapter-independent normalizations:
/// strip every `cache_control` marker.
#[must_use]
pub fn prepare(request: &MessagesRequest) -> MessagesRequest {
    let mut prepared = request.clone();
    prepared.strip_cache_control();
    prepared
}

/// System prompt with the autonomous-agent preamble prefixed.
#[must_use]
pub fn system_with_preamble(request: &MessagesRequest) -> String {
    match request.system_text() {
        Some(text) => format!("{SYSTEM_PREAMBLE}\n\n{text}"),
        None => SYSTEM_PREAMBLE.to_string(),
    }
}
