//! The account pool: selection, lifecycle marks, and token access.
//!
//! One pool per backend family. Every mutation runs under a single pool-wide
//! async mutex; token-bucket consumption happens inside that critical section
//! so two concurrent selectors can never both win the last token. OAuth
//! refresh holds a per-account lock instead, so concurrent requests on one
//! account share a single refresh while other accounts proceed untouched.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use crossbar_oauth::{OAuthClient, OAuthError};
use crossbar_types::ModelFamily;
use thiserror::Error;
use tokio::sync::Mutex;

use crate::account::{Account, AccountStatus, Credentials};
use crate::store::{PoolFile, StoreWriter};
use crate::strategy::{self, PickOutcome};

/// Refresh when the access token has less than this left.
const REFRESH_MARGIN: chrono::Duration = chrono::Duration::minutes(5);

#[derive(Debug, Error)]
pub enum PoolError {
    #[error("unknown account {0}")]
    UnknownAccount(String),

    #[error("account {id} does not hold {expected} credentials")]
    CredentialKind { id: String, expected: &'static str },

    #[error("token refresh failed: {0}")]
    Refresh(#[from] OAuthError),
}

/// Outcome of `select`: a credential to use, a wait, or a dead end.
#[derive(Debug, Clone)]
pub enum Selection {
    Selected(SelectedAccount),
    /// Nothing usable right now; earliest recovery across the pool.
    Wait(Duration),
    /// Only operator action (add/enable/clear accounts) can help.
    NoneUsable,
}

/// Snapshot handed to the dispatcher. Owns its data; no references into the
/// pool's interior.
#[derive(Debug, Clone)]
pub struct SelectedAccount {
    pub id: String,
    pub email: Option<String>,
    pub credentials: Credentials,
}

/// Introspection snapshot for `/health` and `/account-limits`.
#[derive(Debug, Clone, serde::Serialize)]
pub struct PoolSnapshot {
    pub family: ModelFamily,
    pub active_index: usize,
    pub accounts: Vec<AccountSnapshot>,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct AccountSnapshot {
    pub id: String,
    pub email: Option<String>,
    pub status: AccountStatus,
    pub health: f64,
    pub bucket_level: f64,
    pub cooldown_remaining_secs: Option<u64>,
    pub invalid_reason: Option<String>,
    pub last_used: Option<DateTime<Utc>>,
}

struct PoolState {
    accounts: Vec<Account>,
    active_index: usize,
}

/// One backend family's credential pool.
pub struct AccountPool {
    family: ModelFamily,
    state: Mutex<PoolState>,
    writer: StoreWriter,
    refresh_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl AccountPool {
    /// Load persisted state (or start empty) and spawn the writer task.
    /// Must run inside a tokio runtime.
    #[must_use]
    pub fn load(family: ModelFamily, path: PathBuf) -> Self {
        let file = PoolFile::load(&path);
        let active_index = if file.accounts.is_empty() {
            0
        } else {
            file.active_index % file.accounts.len()
        };
        tracing::debug!(
            family = %family,
            accounts = file.accounts.len(),
            "Loaded account pool"
        );
        Self {
            family,
            state: Mutex::new(PoolState {
                accounts: file.accounts,
                active_index,
            }),
            writer: StoreWriter::spawn(path),
            refresh_locks: Mutex::new(HashMap::new()),
        }
    }

    #[must_use]
    pub const fn family(&self) -> ModelFamily {
        self.family
    }

    pub async fn len(&self) -> usize {
        self.state.lock().await.accounts.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Add (or replace, by id) an account and persist.
    pub async fn add_account(&self, account: Account) {
        let mut state = self.state.lock().await;
        if let Some(existing) = state.accounts.iter_mut().find(|a| a.id == account.id) {
            *existing = account;
        } else {
            state.accounts.push(account);
        }
        self.persist(&state);
    }

    /// Graded-filter + score selection. Consumes one pacing token atomically
    /// with the pick; a winning candidate whose bucket cannot cover the
    /// token degrades to `Wait` so concurrent selectors split exactly the
    /// tokens that exist.
    pub async fn select(&self, model: &str) -> Selection {
        let now = Utc::now();
        let mut state = self.state.lock().await;
        let active_index = state.active_index;
        match strategy::pick(&state.accounts, model, active_index, now) {
            PickOutcome::Index { index, level } => {
                let len = state.accounts.len();
                let account = &mut state.accounts[index];
                if !account.trackers.bucket.consume(now) {
                    let wait = strategy::earliest_recovery(&state.accounts, now)
                        .unwrap_or_else(chrono::Duration::zero);
                    return Selection::Wait(clamp_wait(wait));
                }
                tracing::debug!(
                    family = %self.family,
                    account = %account.id,
                    ?level,
                    "Selected account"
                );
                account.last_used = Some(now);
                let selected = SelectedAccount {
                    id: account.id.clone(),
                    email: account.email.clone(),
                    credentials: account.credentials.clone(),
                };
                state.active_index = (index + 1) % len;
                self.persist(&state);
                Selection::Selected(selected)
            }
            PickOutcome::Wait(wait) => Selection::Wait(clamp_wait(wait)),
            PickOutcome::NoneUsable => Selection::NoneUsable,
        }
    }

    /// 429 handling: start the cooldown, ding health, decay quota for
    /// backends that never report telemetry.
    pub async fn mark_rate_limited(&self, id: &str, model: Option<&str>, wait: Duration) {
        let now = Utc::now();
        let mut state = self.state.lock().await;
        let Some(account) = state.accounts.iter_mut().find(|a| a.id == id) else {
            return;
        };
        account.cooldown_until =
            Some(now + chrono::Duration::milliseconds(wait.as_millis() as i64));
        account.trackers.health.record_rate_limit(now);
        if let Some(model) = model {
            account.trackers.quota.decay_on_rate_limit(model, now);
        }
        tracing::warn!(
            family = %self.family,
            account = %id,
            wait_secs = wait.as_secs(),
            "Account rate limited; cooling down"
        );
        self.persist(&state);
    }

    /// 401/403 handling: latch invalid. Only an operator clears it.
    pub async fn mark_invalid(&self, id: &str, reason: &str) {
        let mut state = self.state.lock().await;
        let Some(account) = state.accounts.iter_mut().find(|a| a.id == id) else {
            return;
        };
        account.invalid = true;
        account.invalid_reason = Some(reason.to_string());
        tracing::warn!(family = %self.family, account = %id, reason, "Account marked invalid");
        self.persist(&state);
    }

    pub async fn record_success(&self, id: &str) {
        let mut state = self.state.lock().await;
        if let Some(account) = state.accounts.iter_mut().find(|a| a.id == id) {
            account.trackers.health.record_success(Utc::now());
        }
    }

    pub async fn record_failure(&self, id: &str) {
        let mut state = self.state.lock().await;
        if let Some(account) = state.accounts.iter_mut().find(|a| a.id == id) {
            account.trackers.health.record_failure(Utc::now());
        }
    }

    /// Return the pacing token after a cancellation that produced no output.
    pub async fn refund_token(&self, id: &str) {
        let mut state = self.state.lock().await;
        if let Some(account) = state.accounts.iter_mut().find(|a| a.id == id) {
            account.trackers.bucket.refund(Utc::now());
        }
    }

    /// Record backend-reported quota telemetry.
    pub async fn record_quota(&self, id: &str, model: &str, fraction: f64) {
        let mut state = self.state.lock().await;
        if let Some(account) = state.accounts.iter_mut().find(|a| a.id == id) {
            account.trackers.quota.record(model, fraction, Utc::now());
        }
    }

    /// Operator hook: clear latched invalid state and cooldowns everywhere.
    pub async fn clear_penalties(&self) {
        let mut state = self.state.lock().await;
        for account in &mut state.accounts {
            account.invalid = false;
            account.invalid_reason = None;
            account.cooldown_until = None;
        }
        self.persist(&state);
    }

    /// Current access token for an OAuth account, refreshing when it expires
    /// within the margin. Concurrent callers on the same account share one
    /// refresh; a rejected refresh latches the account invalid.
    pub async fn token_for(&self, id: &str, oauth: &OAuthClient) -> Result<String, PoolError> {
        self.oauth_token(id, oauth, false).await
    }

    /// Operator hook: refresh now, regardless of expiry.
    pub async fn force_refresh(&self, id: &str, oauth: &OAuthClient) -> Result<String, PoolError> {
        self.oauth_token(id, oauth, true).await
    }

    async fn oauth_token(
        &self,
        id: &str,
        oauth: &OAuthClient,
        force: bool,
    ) -> Result<String, PoolError> {
        let account_lock = self.account_lock(id).await;
        let _guard = account_lock.lock().await;

        // Re-check under the account lock: another caller may have already
        // refreshed while we waited.
        let refresh_token = {
            let state = self.state.lock().await;
            let account = state
                .accounts
                .iter()
                .find(|a| a.id == id)
                .ok_or_else(|| PoolError::UnknownAccount(id.to_string()))?;
            let Credentials::OAuth {
                refresh_token,
                access_token,
                expires_at,
            } = &account.credentials
            else {
                return Err(PoolError::CredentialKind {
                    id: id.to_string(),
                    expected: "oauth",
                });
            };
            if !force
                && let Some(token) = access_token
                && let Some(expires_at) = expires_at
                && *expires_at - Utc::now() >= REFRESH_MARGIN
            {
                return Ok(token.clone());
            }
            refresh_token.clone()
        };

        match oauth.refresh(&refresh_token).await {
            Ok(tokens) => {
                let access = tokens.access_token.clone();
                let mut state = self.state.lock().await;
                if let Some(account) = state.accounts.iter_mut().find(|a| a.id == id)
                    && let Credentials::OAuth {
                        refresh_token,
                        access_token,
                        expires_at,
                    } = &mut account.credentials
                {
                    *access_token = Some(tokens.access_token);
                    *expires_at = Some(tokens.expires_at);
                    // Keep the old refresh token when the grant omits one.
                    if let Some(new_refresh) = tokens.refresh_token {
                        *refresh_token = new_refresh;
                    }
                }
                self.persist(&state);
                Ok(access)
            }
            Err(OAuthError::Http { status, body }) => {
                // The authorization server rejected us; this credential is
                // dead until the operator re-authenticates.
                self.mark_invalid(id, &format!("token refresh rejected ({status})"))
                    .await;
                Err(PoolError::Refresh(OAuthError::Http { status, body }))
            }
            Err(e) => Err(PoolError::Refresh(e)),
        }
    }

    /// Store a freshly-minted Copilot bearer.
    pub async fn set_copilot_bearer(
        &self,
        id: &str,
        new_bearer: String,
        expires_at: DateTime<Utc>,
    ) {
        let mut state = self.state.lock().await;
        if let Some(account) = state.accounts.iter_mut().find(|a| a.id == id)
            && let Credentials::Copilot {
                bearer,
                bearer_expires_at,
                ..
            } = &mut account.credentials
        {
            *bearer = Some(new_bearer);
            *bearer_expires_at = Some(expires_at);
        }
        self.persist(&state);
    }

    pub async fn snapshot(&self) -> PoolSnapshot {
        let now = Utc::now();
        let state = self.state.lock().await;
        PoolSnapshot {
            family: self.family,
            active_index: state.active_index,
            accounts: state
                .accounts
                .iter()
                .map(|account| AccountSnapshot {
                    id: account.id.clone(),
                    email: account.email.clone(),
                    status: account.status(now),
                    health: account.trackers.health.score(now),
                    bucket_level: account.trackers.bucket.level(now),
                    cooldown_remaining_secs: account
                        .cooldown_until
                        .filter(|until| *until > now)
                        .map(|until| (until - now).num_seconds().max(0) as u64),
                    invalid_reason: account.invalid_reason.clone(),
                    last_used: account.last_used,
                })
                .collect(),
        }
    }

    async fn account_lock(&self, id: &str) -> Arc<Mutex<()>> {
        let mut locks = self.refresh_locks.lock().await;
        locks
            .entry(id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    fn persist(&self, state: &PoolState) {
        self.writer.enqueue(PoolFile {
            accounts: state.accounts.clone(),
            active_index: state.active_index,
        });
    }
}

fn clamp_wait(wait: chrono::Duration) -> Duration {
    Duration::from_millis(wait.num_milliseconds().max(0) as u64)
}
