//! Upstream-error classification helpers.
//!
//! A 429's cooldown comes from, in order: the `Retry-After` header, the
//! body's `resets_in_seconds` / `resets_at` fields, then the configured
//! default.

use std::time::Duration;

use chrono::{DateTime, Utc};
use crossbar_providers::BackendError;
use serde_json::Value;

/// Cooldown to apply for a rate-limit error.
#[must_use]
pub fn rate_limit_wait(error: &BackendError, default: Duration) -> Duration {
    let BackendError::Http {
        body, retry_after, ..
    } = error
    else {
        return default;
    };
    if let Some(retry_after) = retry_after {
        return *retry_after;
    }
    body_reset_hint(body, Utc::now()).unwrap_or(default)
}

/// Parse `resets_in_seconds` / `resets_at` from an error body. Both the
/// top level and an `error` envelope are searched.
fn body_reset_hint(body: &str, now: DateTime<Utc>) -> Option<Duration> {
    let value: Value = serde_json::from_str(body).ok()?;
    let scopes = [&value, value.get("error").unwrap_or(&Value::Null)];

    for scope in scopes {
        if let Some(secs) = scope.get("resets_in_seconds").and_then(Value::as_u64) {
            return Some(Duration::from_secs(secs));
        }
        if let Some(at) = scope.get("resets_at").and_then(Value::as_i64) {
            let reset = DateTime::<Utc>::from_timestamp(at, 0)?;
            let delta = (reset - now).num_seconds().max(0) as u64;
            return Some(Duration::from_secs(delta));
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    const DEFAULT: Duration = Duration::from_secs(60);

    fn http_429(body: &str, retry_after: Option<Duration>) -> BackendError {
        BackendError::Http {
            status: 429,
            body: body.to_string(),
            retry_after,
        }
    }

    #[test]
    fn header_wins() {
        let error = http_429(
            "{\"error\":{\"resets_in_seconds\":30}}",
            Some(Duration::from_secs(42)),
        );
        assert_eq!(rate_limit_wait(&error, DEFAULT), Duration::from_secs(42));
    }

    #[test]
    fn body_resets_in_seconds_when_no_header() {
        let error = http_429("{\"error\":{\"resets_in_seconds\":30}}", None);
        assert_eq!(rate_limit_wait(&error, DEFAULT), Duration::from_secs(30));
    }

    #[test]
    fn body_resets_at_absolute_timestamp() {
        let reset_at = (Utc::now() + chrono::Duration::seconds(90)).timestamp();
        let error = http_429(&format!("{{\"resets_at\":{reset_at}}}"), None);
        let wait = rate_limit_wait(&error, DEFAULT);
        assert!(wait >= Duration::from_secs(85) && wait <= Duration::from_secs(90));
    }

    #[test]
    fn default_when_no_hint_anywhere() {
        assert_eq!(
            rate_limit_wait(&http_429("plain text", None), DEFAULT),
            DEFAULT
        );
        assert_eq!(rate_limit_wait(&http_429("{}", None), DEFAULT), DEFAULT);
        assert_eq!(
            rate_limit_wait(&BackendError::Transport("reset".to_string()), DEFAULT),
            DEFAULT
        );
    }

    #[test]
    fn past_resets_at_clamps_to_zero() {
        let reset_at = (Utc::now() - chrono::Duration::seconds(30)).timestamp();
        let error = http_429(&format!("{{\"resets_at\":{reset_at}}}"), None);
        assert_eq!(rate_limit_wait(&error, DEFAULT), Duration::from_secs(0));
    }
}
