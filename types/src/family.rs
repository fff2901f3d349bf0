//! Model-family routing.
//!
//! Each canonical request names a model; the model's prefix decides which
//! backend family serves it. Unknown prefixes are a contract violation, not
//! a guess.

use serde::{Deserialize, Serialize};

/// Backend families, one per upstream wire protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelFamily {
    /// Length-prefixed binary frames over the Cursor chat RPC.
    Cursor,
    /// GitHub Copilot Chat-Completions endpoint.
    Copilot,
    /// Google cloud-code endpoint (serves both claude-* and gemini-* models).
    CloudCode,
    /// ChatGPT Codex Responses endpoint.
    Codex,
}

impl ModelFamily {
    /// Route a canonical model name to its backend family.
    ///
    /// Prefix table:
    /// - `cu/` or `cursor/` -> Cursor
    /// - `gh/` or `github/` -> Copilot
    /// - `claude-*` or `gemini-*` -> CloudCode
    /// - `gpt-5*` or anything containing `codex` -> Codex
    #[must_use]
    pub fn route(model: &str) -> Option<Self> {
        let lower = model.trim().to_ascii_lowercase();
        if lower.starts_with("cu/") || lower.starts_with("cursor/") {
            Some(Self::Cursor)
        } else if lower.starts_with("gh/") || lower.starts_with("github/") {
            Some(Self::Copilot)
        } else if lower.starts_with("claude-") || lower.starts_with("gemini-") {
            Some(Self::CloudCode)
        } else if lower.starts_with("gpt-5") || lower.contains("codex") {
            Some(Self::Codex)
        } else {
            None
        }
    }

    /// Strip the vendor prefix a client uses for routing, yielding the model
    /// name the backend expects (`cu/gpt-4o` -> `gpt-4o`).
    #[must_use]
    pub fn upstream_model<'a>(&self, model: &'a str) -> &'a str {
        let model = model.trim();
        for prefix in self.vendor_prefixes() {
            if let Some(rest) = model.strip_prefix(prefix) {
                return rest;
            }
        }
        model
    }

    /// Prefixes recognized (and stripped) for this family.
    #[must_use]
    pub fn vendor_prefixes(&self) -> &'static [&'static str] {
        match self {
            Self::Cursor => &["cu/", "cursor/"],
            Self::Copilot => &["gh/", "github/"],
            Self::CloudCode | Self::Codex => &[],
        }
    }

    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Cursor => "cursor",
            Self::Copilot => "copilot",
            Self::CloudCode => "cloud-code",
            Self::Codex => "codex",
        }
    }

    /// All families, in routing-table order.
    #[must_use]
    pub const fn all() -> &'static [ModelFamily] {
        &[
            ModelFamily::Cursor,
            ModelFamily::Copilot,
            ModelFamily::CloudCode,
            ModelFamily::Codex,
        ]
    }
}

impl std::fmt::Display for ModelFamily {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
