//! OAuth token lifecycle for Crossbar's OAuth-authenticated backends.
//!
//! Implements the authorization-code grant with PKCE (S256) against each
//! backend's fixed public client id, a localhost callback listener for code
//! receipt, and the refresh-token grant used on the request critical path.
//! ID-token claims are decoded (payload only, unverified) to derive stable
//! account identifiers.

mod callback;
mod client;
mod flow;
mod pkce;

pub use callback::{CALLBACK_TIMEOUT, CallbackServer};
pub use client::{IdClaims, OAuthClient, TokenSet};
pub use flow::LoginFlow;
pub use pkce::{PkceChallenge, random_state};

use thiserror::Error;

/// Errors from the OAuth flows.
///
/// A non-2xx refresh is deliberately non-fatal: the caller decides whether
/// to latch the account invalid.
#[derive(Debug, Error)]
pub enum OAuthError {
    #[error("token endpoint returned {status}: {body}")]
    Http { status: u16, body: String },

    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("authorization state mismatch")]
    StateMismatch,

    #[error("authorization was denied: {0}")]
    Denied(String),

    #[error("timed out waiting for the authorization callback")]
    Timeout,

    #[error("callback listener error: {0}")]
    Listener(#[from] std::io::Error),

    #[error("malformed id_token")]
    MalformedIdToken,
}
