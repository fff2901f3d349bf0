//! The orchestrated authorization-code flow.
//!
//! The host presents the authorize URL (browser launching is its business);
//! this type owns everything else: PKCE material, the state parameter, the
//! callback listener, and the final code exchange.

use std::time::Duration;

use crate::{CALLBACK_TIMEOUT, CallbackServer, OAuthClient, OAuthError, PkceChallenge, TokenSet};

/// An in-progress login: listener bound, URL ready to present.
pub struct LoginFlow {
    client: OAuthClient,
    pkce: PkceChallenge,
    state: String,
    server: CallbackServer,
}

impl LoginFlow {
    /// Bind the callback listener and prepare the flow. The client's
    /// redirect URI is pinned to the actually-bound port.
    pub async fn begin(mut client: OAuthClient) -> Result<Self, OAuthError> {
        let server = CallbackServer::bind(client.callback_port()).await?;
        client.set_callback_port(server.port()?);
        Ok(Self {
            client,
            pkce: PkceChallenge::generate(),
            state: crate::random_state(),
            server,
        })
    }

    /// The URL the operator opens in a browser.
    #[must_use]
    pub fn authorize_url(&self) -> String {
        self.client.authorize_url(&self.pkce, &self.state)
    }

    /// Wait for the redirect, validate state, exchange the code.
    pub async fn finish(self) -> Result<TokenSet, OAuthError> {
        self.finish_within(CALLBACK_TIMEOUT).await
    }

    pub async fn finish_within(self, timeout: Duration) -> Result<TokenSet, OAuthError> {
        let code = self.server.wait_for_code(&self.state, timeout).await?;
        self.client.exchange_code(&code, &self.pkce.verifier).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_string_contains, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn full_flow_from_url_to_tokens() {
        let token_server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .and(body_string_contains("grant_type=authorization_code"))
            .and(body_string_contains("code=authcode-1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "access_token": "at-1",
                "refresh_token": "rt-1",
                "expires_in": 3600
            })))
            .expect(1)
            .mount(&token_server)
            .await;

        let client = OAuthClient::new(
            "client-1",
            "https://example.com/authorize",
            format!("{}/token", token_server.uri()),
            "openid",
            Vec::new(),
            0,
        );
        let flow = LoginFlow::begin(client).await.unwrap();
        let url = flow.authorize_url();
        let state = url::Url::parse(&url)
            .unwrap()
            .query_pairs()
            .find(|(k, _)| k == "state")
            .map(|(_, v)| v.into_owned())
            .unwrap();
        let port = url::Url::parse(&url)
            .unwrap()
            .query_pairs()
            .find(|(k, _)| k == "redirect_uri")
            .map(|(_, v)| {
                url::Url::parse(&v)
                    .unwrap()
                    .port()
                    .expect("redirect has a port")
            })
            .unwrap();

        // The browser redirect, simulated.
        let redirect = tokio::spawn(async move {
            reqwest::get(format!(
                "http://127.0.0.1:{port}/auth/callback?code=authcode-1&state={state}"
            ))
            .await
        });

        let tokens = flow
            .finish_within(Duration::from_secs(5))
            .await
            .expect("flow completes");
        assert_eq!(tokens.access_token, "at-1");
        assert_eq!(tokens.refresh_token.as_deref(), Some("rt-1"));
        redirect.await.unwrap().unwrap();
    }
}
