//! Token-endpoint client: code exchange and refresh grants.

use std::time::Duration;

use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::{DateTime, Utc};
use crossbar_config::OAuthProfile;
use serde::Deserialize;
use url::Url;

use crate::{OAuthError, PkceChallenge};

const CONNECT_TIMEOUT_SECS: u64 = 30;

/// Tokens returned by the authorization server.
///
/// `refresh_token` is `None` when the server omitted one (common on the
/// refresh grant); callers keep the token they already hold.
#[derive(Debug, Clone)]
pub struct TokenSet {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub expires_at: DateTime<Utc>,
    pub claims: Option<IdClaims>,
}

/// Claims decoded from an id_token payload (unverified).
#[derive(Debug, Clone, Deserialize)]
pub struct IdClaims {
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub sub: Option<String>,
}

impl IdClaims {
    /// Decode the payload segment of a JWT without signature verification.
    /// Good enough for deriving a display identity; never used for trust.
    pub fn decode(id_token: &str) -> Result<Self, OAuthError> {
        let payload = id_token
            .split('.')
            .nth(1)
            .ok_or(OAuthError::MalformedIdToken)?;
        let bytes = URL_SAFE_NO_PAD
            .decode(payload.trim_end_matches('='))
            .map_err(|_| OAuthError::MalformedIdToken)?;
        serde_json::from_slice(&bytes).map_err(|_| OAuthError::MalformedIdToken)
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    expires_in: Option<u64>,
    #[serde(default)]
    id_token: Option<String>,
}

/// Client for one backend's authorization server.
#[derive(Debug, Clone)]
pub struct OAuthClient {
    http: reqwest::Client,
    client_id: String,
    auth_url: String,
    token_url: String,
    scope: String,
    extra_auth_params: Vec<(String, String)>,
    callback_port: u16,
}

impl OAuthClient {
    /// Build from a backend's fixed OAuth profile.
    #[must_use]
    pub fn from_profile(profile: &OAuthProfile, callback_port: u16) -> Self {
        Self::new(
            profile.client_id,
            profile.auth_url,
            profile.token_url,
            profile.scope,
            profile
                .extra_auth_params
                .iter()
                .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
                .collect(),
            callback_port,
        )
    }

    #[must_use]
    pub fn new(
        client_id: impl Into<String>,
        auth_url: impl Into<String>,
        token_url: impl Into<String>,
        scope: impl Into<String>,
        extra_auth_params: Vec<(String, String)>,
        callback_port: u16,
    ) -> Self {
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(CONNECT_TIMEOUT_SECS))
            .build()
            .expect("build OAuth HTTP client");
        Self {
            http,
            client_id: client_id.into(),
            auth_url: auth_url.into(),
            token_url: token_url.into(),
            scope: scope.into(),
            extra_auth_params,
            callback_port,
        }
    }

    #[must_use]
    pub fn redirect_uri(&self) -> String {
        format!("http://127.0.0.1:{}/auth/callback", self.callback_port)
    }

    #[must_use]
    pub const fn callback_port(&self) -> u16 {
        self.callback_port
    }

    /// Pin the redirect port after the listener has actually bound.
    pub(crate) fn set_callback_port(&mut self, port: u16) {
        self.callback_port = port;
    }

    /// Build the authorize URL the operator opens in a browser.
    #[must_use]
    pub fn authorize_url(&self, pkce: &PkceChallenge, state: &str) -> String {
        let mut url = Url::parse(&self.auth_url).expect("fixed auth URL is valid");
        {
            let mut query = url.query_pairs_mut();
            query
                .append_pair("response_type", "code")
                .append_pair("client_id", &self.client_id)
                .append_pair("scope", &self.scope)
                .append_pair("redirect_uri", &self.redirect_uri())
                .append_pair("code_challenge", &pkce.challenge)
                .append_pair("code_challenge_method", "S256")
                .append_pair("state", state);
            for (key, value) in &self.extra_auth_params {
                query.append_pair(key, value);
            }
        }
        url.into()
    }

    /// Exchange an authorization code for tokens
    /// (`grant_type=authorization_code` + PKCE verifier).
    pub async fn exchange_code(&self, code: &str, verifier: &str) -> Result<TokenSet, OAuthError> {
        let params = [
            ("grant_type", "authorization_code"),
            ("client_id", &self.client_id),
            ("code", code),
            ("redirect_uri", &self.redirect_uri()),
            ("code_verifier", verifier),
        ];
        self.token_request(&params).await
    }

    /// Refresh an access token (`grant_type=refresh_token`).
    pub async fn refresh(&self, refresh_token: &str) -> Result<TokenSet, OAuthError> {
        let params = [
            ("grant_type", "refresh_token"),
            ("client_id", &self.client_id),
            ("refresh_token", refresh_token),
        ];
        self.token_request(&params).await
    }

    async fn token_request(&self, params: &[(&str, &str)]) -> Result<TokenSet, OAuthError> {
        let response = self
            .http
            .post(&self.token_url)
            .form(params)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(OAuthError::Http {
                status: status.as_u16(),
                body,
            });
        }

        let parsed: TokenResponse = response.json().await?;
        let expires_at =
            Utc::now() + chrono::Duration::seconds(parsed.expires_in.unwrap_or(3600) as i64);
        let claims = parsed.id_token.as_deref().and_then(|token| {
            IdClaims::decode(token)
                .map_err(|e| tracing::warn!("Ignoring undecodable id_token: {e}"))
                .ok()
        });

        Ok(TokenSet {
            access_token: parsed.access_token,
            refresh_token: parsed.refresh_token,
            expires_at,
            claims,
        })
    }
}
