//! The dispatch/retry orchestrator.
//!
//! Routes each canonical request to a backend family, drives the
//! select-attempt-classify loop against that family's account pool, and
//! exposes the streaming and aggregated entry points the host HTTP layer
//! calls. The orchestrator is the sole authority on retrying, marking
//! accounts, and surfacing errors; adapters only report what happened.

mod aggregate;
mod classify;
mod orchestrator;
mod sse_out;

pub use aggregate::collect_response;
pub use classify::rate_limit_wait;
pub use orchestrator::Dispatcher;
pub use sse_out::event_to_sse;

/// Union of every backend's advertised models, vendor-prefixed where the
/// router requires it.
#[must_use]
pub fn list_models() -> Vec<&'static str> {
    crossbar_types::ModelFamily::all()
        .iter()
        .flat_map(|family| crossbar_config::profile(*family).models.iter().copied())
        .collect()
}
