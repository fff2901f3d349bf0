//! Localhost callback listener for the authorization-code flow.
//!
//! A deliberately tiny HTTP/1.1 responder: it exists to catch exactly one
//! redirect on `/auth/callback`, hand the code back, and tell the browser it
//! can close. Anything else is a 404.

use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use url::Url;

use crate::OAuthError;

/// Wall-clock budget from authorize-URL emission to code receipt.
pub const CALLBACK_TIMEOUT: Duration = Duration::from_secs(300);

const SUCCESS_BODY: &str = "<html><body><h3>Authentication complete.</h3>\
<p>You may close this window.</p></body></html>";

/// A bound callback listener.
pub struct CallbackServer {
    listener: TcpListener,
}

impl CallbackServer {
    /// Bind the fixed callback port (or port 0 for tests).
    pub async fn bind(port: u16) -> Result<Self, OAuthError> {
        let listener = TcpListener::bind(("127.0.0.1", port)).await?;
        Ok(Self { listener })
    }

    /// The actual bound port (differs from the requested one when 0).
    pub fn port(&self) -> Result<u16, OAuthError> {
        Ok(self.listener.local_addr()?.port())
    }

    /// Serve until `/auth/callback` delivers a code, then return it.
    ///
    /// Validates `state` against `expected_state`; a mismatch aborts the
    /// flow. A browser-side denial (`error` query parameter) aborts too.
    pub async fn wait_for_code(
        self,
        expected_state: &str,
        timeout: Duration,
    ) -> Result<String, OAuthError> {
        tokio::time::timeout(timeout, self.accept_loop(expected_state))
            .await
            .map_err(|_| OAuthError::Timeout)?
    }

    async fn accept_loop(self, expected_state: &str) -> Result<String, OAuthError> {
        loop {
            let (stream, _) = self.listener.accept().await?;
            match handle_connection(stream, expected_state).await {
                Ok(Some(code)) => return Ok(code),
                // Not the callback path (favicon, probes); keep listening.
                Ok(None) => {}
                Err(e) => return Err(e),
            }
        }
    }
}

async fn handle_connection(
    mut stream: TcpStream,
    expected_state: &str,
) -> Result<Option<String>, OAuthError> {
    let mut buf = vec![0u8; 4096];
    let n = stream.read(&mut buf).await?;
    let request = String::from_utf8_lossy(&buf[..n]);

    let Some(target) = request_target(&request) else {
        respond(&mut stream, 404, "not found").await?;
        return Ok(None);
    };

    let url = Url::parse(&format!("http://127.0.0.1{target}"))
        .map_err(|_| OAuthError::Denied("unparseable callback request".to_string()))?;

    if url.path() != "/auth/callback" {
        respond(&mut stream, 404, "not found").await?;
        return Ok(None);
    }

    let mut code = None;
    let mut state = None;
    let mut denial = None;
    for (key, value) in url.query_pairs() {
        match key.as_ref() {
            "code" => code = Some(value.into_owned()),
            "state" => state = Some(value.into_owned()),
            "error" => denial = Some(value.into_owned()),
            _ => {}
        }
    }

    if let Some(reason) = denial {
        respond(&mut stream, 200, SUCCESS_BODY).await?;
        return Err(OAuthError::Denied(reason));
    }

    if state.as_deref() != Some(expected_state) {
        respond(&mut stream, 400, "state mismatch").await?;
        return Err(OAuthError::StateMismatch);
    }

    let Some(code) = code else {
        respond(&mut stream, 400, "missing code").await?;
        return Err(OAuthError::Denied("callback carried no code".to_string()));
    };

    respond(&mut stream, 200, SUCCESS_BODY).await?;
    Ok(Some(code))
}

/// Pull the request-target out of `GET <target> HTTP/1.1`.
fn request_target(request: &str) -> Option<&str> {
    let line = request.lines().next()?;
    let mut parts = line.split_whitespace();
    let method = parts.next()?;
    if method != "GET" {
        return None;
    }
    parts.next()
}

async fn respond(stream: &mut TcpStream, status: u16, body: &str) -> Result<(), OAuthError> {
    let reason = match status {
        200 => "OK",
        400 => "Bad Request",
        _ => "Not Found",
    };
    let response = format!(
        "HTTP/1.1 {status} {reason}\r\nContent-Type: text/html; charset=utf-8\r\n\
         Content-Length: {}\r\nConnection: close\r\n\r\n{body}",
        body.len()
    );
    stream.write_all(response.as_bytes()).await?;
    stream.shutdown().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn get(port: u16, path_and_query: &str) -> (u16, String) {
        let response = reqwest::get(format!("http://127.0.0.1:{port}{path_and_query}"))
            .await
            .expect("request");
        let status = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();
        (status, body)
    }

    #[tokio::test]
    async fn delivers_code_when_state_matches() {
        let server = CallbackServer::bind(0).await.unwrap();
        let port = server.port().unwrap();

        let waiter = tokio::spawn(async move {
            server
                .wait_for_code("expected", Duration::from_secs(5))
                .await
        });

        let (status, body) = get(port, "/auth/callback?code=abc123&state=expected").await;
        assert_eq!(status, 200);
        assert!(body.contains("close this window"));

        assert_eq!(waiter.await.unwrap().unwrap(), "abc123");
    }

    #[tokio::test]
    async fn rejects_state_mismatch() {
        let server = CallbackServer::bind(0).await.unwrap();
        let port = server.port().unwrap();

        let waiter = tokio::spawn(async move {
            server
                .wait_for_code("expected", Duration::from_secs(5))
                .await
        });

        let (status, _) = get(port, "/auth/callback?code=abc&state=tampered").await;
        assert_eq!(status, 400);
        assert!(matches!(
            waiter.await.unwrap(),
            Err(OAuthError::StateMismatch)
        ));
    }

    #[tokio::test]
    async fn non_callback_paths_get_404_and_flow_continues() {
        let server = CallbackServer::bind(0).await.unwrap();
        let port = server.port().unwrap();

        let waiter = tokio::spawn(async move {
            server
                .wait_for_code("expected", Duration::from_secs(5))
                .await
        });

        let (status, _) = get(port, "/favicon.ico").await;
        assert_eq!(status, 404);

        let (status, _) = get(port, "/auth/callback?code=later&state=expected").await;
        assert_eq!(status, 200);
        assert_eq!(waiter.await.unwrap().unwrap(), "later");
    }

    #[tokio::test]
    async fn times_out_without_a_callback() {
        let server = CallbackServer::bind(0).await.unwrap();
        let result = server
            .wait_for_code("expected", Duration::from_millis(50))
            .await;
        assert!(matches!(result, Err(OAuthError::Timeout)));
    }
}
