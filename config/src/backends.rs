//! Fixed per-backend profiles.
//!
//! Endpoints, OAuth client identity, and advertised model lists are design
//! constants, not runtime-tunable settings. Vendor-prefixed model names here
//! are exactly what `GET /v1/models` advertises and what the router matches.

use crossbar_types::ModelFamily;

/// OAuth client identity for backends authenticated by authorization-code
/// or refresh-token grants.
#[derive(Debug, Clone, Copy)]
pub struct OAuthProfile {
    pub client_id: &'static str,
    pub auth_url: &'static str,
    pub token_url: &'static str,
    pub scope: &'static str,
    /// Extra query parameters appended to the authorize URL.
    pub extra_auth_params: &'static [(&'static str, &'static str)],
}

/// Everything fixed about one backend.
#[derive(Debug, Clone, Copy)]
pub struct BackendProfile {
    pub family: ModelFamily,
    /// Message-generation endpoint.
    pub endpoint: &'static str,
    /// Token-mint endpoint for backends deriving short-lived bearers.
    pub token_mint_endpoint: Option<&'static str>,
    pub oauth: Option<OAuthProfile>,
    /// Models advertised for this backend, vendor-prefixed where required.
    pub models: &'static [&'static str],
}

const CLOUD_CODE: BackendProfile = BackendProfile {
    family: ModelFamily::CloudCode,
    endpoint:
        "https://daily-cloudcode-pa.sandbox.googleapis.com/v1internal:streamGenerateContent?alt=sse",
    token_mint_endpoint: None,
    oauth: Some(OAuthProfile {
        client_id: "681255809395-oo8ft2oprdrnp9e3aqf6av3hmdib135j.apps.googleusercontent.com",
        auth_url: "https://accounts.google.com/o/oauth2/v2/auth",
        token_url: "https://oauth2.googleapis.com/token",
        scope: "https://www.googleapis.com/auth/cloud-platform \
                https://www.googleapis.com/auth/userinfo.email \
                https://www.googleapis.com/auth/userinfo.profile",
        extra_auth_params: &[("access_type", "offline"), ("prompt", "consent")],
    }),
    models: &[
        "claude-sonnet-4-5",
        "claude-opus-4-5",
        "claude-haiku-4-5",
        "gemini-2.5-pro",
        "gemini-2.5-flash",
    ],
};

const CODEX: BackendProfile = BackendProfile {
    family: ModelFamily::Codex,
    endpoint: "https://chatgpt.com/backend-api/codex/responses",
    token_mint_endpoint: None,
    oauth: Some(OAuthProfile {
        client_id: "app_EMoamEEZ73f0CkXaXp7hrann",
        auth_url: "https://auth.openai.com/oauth/authorize",
        token_url: "https://auth.openai.com/oauth/token",
        scope: "openid profile email offline_access",
        extra_auth_params: &[("id_token_add_organizations", "true")],
    }),
    models: &["gpt-5.1-codex", "gpt-5.1-codex-mini", "gpt-5.1"],
};

const COPILOT: BackendProfile = BackendProfile {
    family: ModelFamily::Copilot,
    endpoint: "https://api.githubcopilot.com/chat/completions",
    token_mint_endpoint: Some("https://api.github.com/copilot_internal/v2/token"),
    oauth: None,
    models: &[
        "gh/gpt-4o",
        "gh/gpt-4.1",
        "gh/o3-mini",
        "gh/claude-sonnet-4",
        "gh/gemini-2.5-pro",
    ],
};

const CURSOR: BackendProfile = BackendProfile {
    family: ModelFamily::Cursor,
    endpoint: "https://api2.cursor.sh/aiserver.v1.AiService/StreamChat",
    token_mint_endpoint: None,
    oauth: None,
    models: &[
        "cu/gpt-4o",
        "cu/claude-4-sonnet",
        "cu/claude-4-opus",
        "cu/deepseek-v3",
    ],
};

/// The profile for a family.
#[must_use]
pub const fn profile(family: ModelFamily) -> &'static BackendProfile {
    match family {
        ModelFamily::Cursor => &CURSOR,
        ModelFamily::Copilot => &COPILOT,
        ModelFamily::CloudCode => &CLOUD_CODE,
        ModelFamily::Codex => &CODEX,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_family_has_a_profile() {
        for family in ModelFamily::all() {
            let profile = profile(*family);
            assert_eq!(profile.family, *family);
            assert!(profile.endpoint.starts_with("https://"));
            assert!(!profile.models.is_empty());
        }
    }

    #[test]
    fn advertised_models_route_back_to_their_family() {
        for family in ModelFamily::all() {
            for model in profile(*family).models {
                assert_eq!(
                    ModelFamily::route(model),
                    Some(*family),
                    "{model} must route to {family}"
                );
            }
        }
    }

    #[test]
    fn oauth_backends_declare_client_identity() {
        for family in [ModelFamily::CloudCode, ModelFamily::Codex] {
            let oauth = profile(family).oauth.expect("oauth profile");
            assert!(!oauth.client_id.is_empty());
            assert!(oauth.auth_url.starts_with("https://"));
            assert!(oauth.token_url.starts_with("https://"));
        }
    }

    #[test]
    fn copilot_declares_token_mint() {
        assert!(
            profile(ModelFamily::Copilot)
                .token_mint_endpoint
                .is_some()
        );
    }
}
