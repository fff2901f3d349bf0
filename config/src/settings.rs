//! The flat settings record.
//!
//! Every knob Crossbar understands lives here as a named field; there is no
//! ad-hoc key/value bag. Values come from the TOML file, then environment
//! variables override, then defaults fill the rest.

use std::path::{Path, PathBuf};

use serde::Deserialize;

/// Runtime settings for the proxy host.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Settings {
    /// Port the host HTTP server binds.
    pub port: u16,
    /// Interface the host HTTP server binds.
    pub host: String,
    /// Optional shared secret clients must present; `None` disables auth.
    pub api_key: Option<String>,
    /// Verbose diagnostics for local development.
    pub dev_mode: bool,
    /// Cooldown applied on 429 when the backend gives no reset hint.
    pub default_cooldown_ms: u64,
    /// Hard cap on a single request, in seconds. `None` means no cap.
    pub request_timeout_secs: Option<u64>,
    /// Port the OAuth callback listener binds during account login.
    pub oauth_callback_port: u16,
    /// Directory holding per-backend account state files.
    pub state_dir: Option<PathBuf>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            port: 8787,
            host: "127.0.0.1".to_string(),
            api_key: None,
            dev_mode: false,
            default_cooldown_ms: 60_000,
            request_timeout_secs: None,
            oauth_callback_port: 7878,
            state_dir: None,
        }
    }
}

impl Settings {
    /// Load settings from a TOML file, then apply environment overrides.
    ///
    /// A missing file is not an error (defaults apply); a malformed file is.
    pub fn load(path: &Path) -> Result<Self, toml::de::Error> {
        let mut settings = match std::fs::read_to_string(path) {
            Ok(raw) => toml::from_str(&raw)?,
            Err(e) => {
                tracing::debug!(path = %path.display(), "No settings file ({e}); using defaults");
                Self::default()
            }
        };
        settings.apply_env_overrides();
        Ok(settings)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(port) = std::env::var("CROSSBAR_PORT")
            && let Ok(port) = port.parse()
        {
            self.port = port;
        }
        if let Ok(host) = std::env::var("CROSSBAR_HOST")
            && !host.trim().is_empty()
        {
            self.host = host;
        }
        if let Ok(key) = std::env::var("CROSSBAR_API_KEY")
            && !key.trim().is_empty()
        {
            self.api_key = Some(key);
        }
        if let Ok(dev) = std::env::var("CROSSBAR_DEV_MODE") {
            self.dev_mode = matches!(dev.trim(), "1" | "true" | "yes");
        }
        if let Ok(ms) = std::env::var("CROSSBAR_COOLDOWN_MS")
            && let Ok(ms) = ms.parse()
        {
            self.default_cooldown_ms = ms;
        }
    }
}
