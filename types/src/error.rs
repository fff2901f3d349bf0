//! Proxy error taxonomy.
//!
//! Upstream failures are classified values driving the retry loop, not
//! exceptions. The orchestrator is the sole authority on whether an error
//! retries, marks an account, or surfaces; these are the kinds it surfaces.

use serde_json::{Value, json};
use thiserror::Error;

use crate::ModelFamily;

/// A classified, client-facing proxy error.
#[derive(Debug, Clone, Error)]
pub enum ProxyError {
    /// No accounts configured for the selected backend.
    #[error("no accounts configured for backend {family}")]
    ConfigMissing { family: ModelFamily },

    /// Every account is cooling and the earliest reset is too far away to
    /// block the client on.
    #[error("all {family} accounts are rate limited; resets in ~{reset_mins} min")]
    Unavailable {
        family: ModelFamily,
        reset_mins: u64,
    },

    /// Authentication rejected by the backend on every usable account.
    #[error("{family} rejected authentication: {detail}")]
    Unauthorized { family: ModelFamily, detail: String },

    /// Rate limited on every attempt within the budget.
    #[error("{family} rate limited after {attempts} attempts")]
    RateLimited { family: ModelFamily, attempts: u32 },

    /// Other non-2xx from the backend, surfaced verbatim.
    #[error("upstream error {status}: {body}")]
    Upstream { status: u16, body: String },

    /// Network-level failure after exhausting the attempt budget.
    #[error("transport error: {detail}")]
    Transport { detail: String },

    /// Malformed canonical request; no backend was contacted.
    #[error("{0}")]
    ContractViolation(String),

    /// The attempt budget ran out without a success.
    #[error("request failed after {attempts} attempts: {last}")]
    Exhausted { attempts: u32, last: String },
}

impl ProxyError {
    /// HTTP status the host should answer with.
    #[must_use]
    pub const fn status_code(&self) -> u16 {
        match self {
            Self::ConfigMissing { .. } | Self::Unavailable { .. } => 503,
            Self::Unauthorized { .. } => 401,
            Self::RateLimited { .. } => 429,
            Self::Upstream { status, .. } => *status,
            Self::Transport { .. } | Self::Exhausted { .. } => 502,
            Self::ContractViolation(_) => 400,
        }
    }

    /// The canonical error-body shape
    /// (`{"type":"error","error":{"type":..,"message":..}}`).
    #[must_use]
    pub fn to_error_body(&self) -> Value {
        let kind = match self {
            Self::ConfigMissing { .. } | Self::Unavailable { .. } => "overloaded_error",
            Self::Unauthorized { .. } => "authentication_error",
            Self::RateLimited { .. } => "rate_limit_error",
            Self::ContractViolation(_) => "invalid_request_error",
            Self::Upstream { .. } | Self::Transport { .. } | Self::Exhausted { .. } => "api_error",
        };
        let message = match self {
            // RESOURCE_EXHAUSTED marker lets the client render the reset
            // time instead of hanging on a long cooldown.
            Self::Unavailable { reset_mins, .. } => {
                format!("RESOURCE_EXHAUSTED: {self} (retry after {reset_mins} min)")
            }
            other => other.to_string(),
        };
        json!({
            "type": "error",
            "error": { "type": kind, "message": message }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_codes_follow_taxonomy() {
        assert_eq!(
            ProxyError::ConfigMissing {
                family: ModelFamily::Codex
            }
            .status_code(),
            503
        );
        assert_eq!(
            ProxyError::ContractViolation("unknown model".into()).status_code(),
            400
        );
        assert_eq!(
            ProxyError::Upstream {
                status: 418,
                body: "teapot".into()
            }
            .status_code(),
            418
        );
    }

    #[test]
    fn unavailable_body_carries_resource_exhausted_hint() {
        let err = ProxyError::Unavailable {
            family: ModelFamily::CloudCode,
            reset_mins: 2,
        };
        let body = err.to_error_body();
        let message = body["error"]["message"].as_str().unwrap();
        assert!(message.starts_with("RESOURCE_EXHAUSTED"));
        assert!(message.contains("2 min"));
        assert_eq!(body["error"]["type"], "overloaded_error");
    }
}
