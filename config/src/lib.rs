//! Configuration for Crossbar.
//!
//! Two halves: the user-editable [`Settings`] record (TOML file plus
//! environment overrides), and the fixed per-backend profiles (endpoints,
//! OAuth client identity, model lists) that are constants of the design.

mod backends;
mod settings;

pub use backends::{BackendProfile, OAuthProfile, profile};
pub use settings::Settings;

use std::path::PathBuf;

/// Location of the settings file (`<config dir>/crossbar/config.toml`).
#[must_use]
pub fn config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("crossbar").join("config.toml"))
}

/// Directory holding per-backend account state files.
#[must_use]
pub fn state_dir() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("crossbar"))
}
