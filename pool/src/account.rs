//! The account record: one credential set usable against one backend.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::trackers::{HealthTracker, QuotaTracker, TokenBucket};

/// Backend-dependent credential material, flattened into the persisted
/// account object and discriminated by field presence.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Credentials {
    /// Cursor: a long-lived API token plus client identity.
    #[serde(rename_all = "camelCase")]
    Cursor {
        api_token: String,
        machine_id: String,
        #[serde(default)]
        ghost_mode: bool,
    },
    /// Copilot: a long-lived OAuth token from which short-lived bearers are
    /// minted on demand.
    #[serde(rename_all = "camelCase")]
    Copilot {
        oauth_token: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        bearer: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        bearer_expires_at: Option<DateTime<Utc>>,
    },
    /// OAuth backends (cloud-code, codex): refresh token plus the current
    /// access token and its expiry.
    #[serde(rename_all = "camelCase")]
    OAuth {
        refresh_token: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        access_token: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        expires_at: Option<DateTime<Utc>>,
    },
}

/// Exactly one of four lifecycle states at any instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AccountStatus {
    Available,
    Cooling,
    Invalid,
    Disabled,
}

/// In-memory tracker state. Never persisted; fresh on every load.
#[derive(Debug, Clone, Default)]
pub struct Trackers {
    pub health: HealthTracker,
    pub bucket: TokenBucket,
    pub quota: QuotaTracker,
}

fn default_true() -> bool {
    true
}

/// One account in a backend pool.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Account {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(flatten)]
    pub credentials: Credentials,
    pub added_at: DateTime<Utc>,
    #[serde(default)]
    pub last_used: Option<DateTime<Utc>>,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default, rename = "isInvalid")]
    pub invalid: bool,
    #[serde(default)]
    pub invalid_reason: Option<String>,
    #[serde(default)]
    pub cooldown_until: Option<DateTime<Utc>>,
    #[serde(skip)]
    pub trackers: Trackers,
}

impl Account {
    #[must_use]
    pub fn new(
        id: impl Into<String>,
        email: Option<String>,
        credentials: Credentials,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: id.into(),
            email,
            credentials,
            added_at: now,
            last_used: None,
            enabled: true,
            invalid: false,
            invalid_reason: None,
            cooldown_until: None,
            trackers: Trackers {
                health: HealthTracker::new(now),
                bucket: TokenBucket::new(now),
                quota: QuotaTracker::default(),
            },
        }
    }

    /// Build an OAuth account from a completed login.
    ///
    /// The id prefers the id-token email, then the subject, then a
    /// synthetic identifier; the email claim is kept for display.
    #[must_use]
    pub fn from_oauth_tokens(tokens: &crossbar_oauth::TokenSet, now: DateTime<Utc>) -> Self {
        let email = tokens.claims.as_ref().and_then(|c| c.email.clone());
        let id = email
            .clone()
            .or_else(|| tokens.claims.as_ref().and_then(|c| c.sub.clone()))
            .unwrap_or_else(|| format!("account-{}", uuid::Uuid::new_v4().simple()));
        Self::new(
            id,
            email,
            Credentials::OAuth {
                refresh_token: tokens.refresh_token.clone().unwrap_or_default(),
                access_token: Some(tokens.access_token.clone()),
                expires_at: Some(tokens.expires_at),
            },
            now,
        )
    }

    #[must_use]
    pub fn status(&self, now: DateTime<Utc>) -> AccountStatus {
        if self.invalid {
            AccountStatus::Invalid
        } else if !self.enabled {
            AccountStatus::Disabled
        } else if self.cooling(now) {
            AccountStatus::Cooling
        } else {
            AccountStatus::Available
        }
    }

    /// enabled ∧ ¬invalid ∧ cooldown passed.
    #[must_use]
    pub fn is_available(&self, now: DateTime<Utc>) -> bool {
        self.status(now) == AccountStatus::Available
    }

    #[must_use]
    pub fn cooling(&self, now: DateTime<Utc>) -> bool {
        self.cooldown_until.is_some_and(|until| until > now)
    }
}
