//! The dispatcher: one instance owns every backend's pool and drives the
//! attempt loop.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::mpsc;

use crossbar_config::{Settings, profile};
use crossbar_oauth::OAuthClient;
use crossbar_pool::{AccountPool, Credentials, PoolSnapshot, SelectedAccount, Selection};
use crossbar_providers::{
    BackendError, BackendStream, CloudCodeBackend, CodexBackend, CopilotBackend, CursorBackend,
    StreamOutcome,
};
use crossbar_types::{MessageResponse, MessagesRequest, ModelFamily, ProxyError, StreamEvent};

use crate::aggregate::collect_response;
use crate::classify::rate_limit_wait;

const EVENT_CHANNEL_CAPACITY: usize = 64;
/// A computed wait beyond this aborts immediately instead of blocking the
/// client.
const WAIT_ABORT_THRESHOLD: Duration = Duration::from_secs(60);
/// Slack added on top of a computed wait before re-selecting.
const WAIT_SLACK: Duration = Duration::from_millis(500);
/// Re-mint the Copilot bearer when it has less than this left.
const BEARER_MARGIN: chrono::Duration = chrono::Duration::minutes(2);

enum AttemptError {
    /// Credential acquisition failed; the pool already latched the account.
    Auth(String),
    /// The backend call itself failed.
    Backend(BackendError),
}

/// Routes requests, rotates accounts, classifies failures.
pub struct Dispatcher {
    pools: HashMap<ModelFamily, Arc<AccountPool>>,
    oauth: HashMap<ModelFamily, OAuthClient>,
    pub codex: CodexBackend,
    pub copilot: CopilotBackend,
    pub cloudcode: CloudCodeBackend,
    pub cursor: CursorBackend,
    default_cooldown: Duration,
    request_timeout: Option<Duration>,
}

impl Dispatcher {
    /// Build pools (one state file per family under the state directory)
    /// and OAuth clients from the fixed backend profiles.
    #[must_use]
    pub fn new(settings: &Settings) -> Self {
        let state_dir: PathBuf = settings
            .state_dir
            .clone()
            .or_else(crossbar_config::state_dir)
            .unwrap_or_else(|| PathBuf::from("."));

        let mut pools = HashMap::new();
        let mut oauth = HashMap::new();
        for family in ModelFamily::all() {
            let path = state_dir.join(format!("{}.json", family.as_str()));
            pools.insert(*family, Arc::new(AccountPool::load(*family, path)));
            if let Some(oauth_profile) = profile(*family).oauth {
                oauth.insert(
                    *family,
                    OAuthClient::from_profile(&oauth_profile, settings.oauth_callback_port),
                );
            }
        }

        Self {
            pools,
            oauth,
            codex: CodexBackend::default(),
            copilot: CopilotBackend::default(),
            cloudcode: CloudCodeBackend::default(),
            cursor: CursorBackend::default(),
            default_cooldown: Duration::from_millis(settings.default_cooldown_ms),
            request_timeout: settings.request_timeout_secs.map(Duration::from_secs),
        }
    }

    /// The pool serving one backend family.
    #[must_use]
    pub fn pool(&self, family: ModelFamily) -> &Arc<AccountPool> {
        &self.pools[&family]
    }

    /// Pool introspection for `/health` and `/account-limits`.
    pub async fn snapshots(&self) -> Vec<PoolSnapshot> {
        let mut snapshots = Vec::new();
        for family in ModelFamily::all() {
            snapshots.push(self.pools[family].snapshot().await);
        }
        snapshots
    }

    /// Operator hook: clear latched invalid state and cooldowns everywhere.
    pub async fn clear_caches(&self) {
        for pool in self.pools.values() {
            pool.clear_penalties().await;
        }
    }

    /// Operator hook: force a token refresh for one account.
    pub async fn refresh_account(&self, family: ModelFamily, id: &str) -> Result<(), ProxyError> {
        match self.oauth.get(&family) {
            Some(oauth) => self.pools[&family]
                .force_refresh(id, oauth)
                .await
                .map(|_| ())
                .map_err(|e| ProxyError::Unauthorized {
                    family,
                    detail: e.to_string(),
                }),
            None => Err(ProxyError::ContractViolation(format!(
                "{family} accounts do not hold refreshable tokens"
            ))),
        }
    }

    /// Streaming entry point: returns a receiver of canonical events once a
    /// backend has accepted the request. Rotation and retries all happen
    /// before the first event is observable.
    pub async fn dispatch_streaming(
        &self,
        request: MessagesRequest,
    ) -> Result<mpsc::Receiver<StreamEvent>, ProxyError> {
        let (family, account, stream) = self.acquire(&request).await?;
        let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);

        let pool = self.pools[&family].clone();
        let model = request.model.clone();
        let default_cooldown = self.default_cooldown;
        let timeout = self.request_timeout;
        tokio::spawn(async move {
            let result = match timeout {
                Some(limit) => match tokio::time::timeout(limit, stream.pump(&tx)).await {
                    Ok(result) => result,
                    Err(_) => {
                        tracing::warn!(account = %account.id, "Request exceeded hard timeout");
                        pool.record_failure(&account.id).await;
                        return;
                    }
                },
                None => stream.pump(&tx).await,
            };
            settle(&pool, &account.id, &model, result, default_cooldown).await;
        });

        Ok(rx)
    }

    /// Non-streaming entry point: streams internally, aggregates into one
    /// canonical response.
    pub async fn dispatch_collect(
        &self,
        request: MessagesRequest,
    ) -> Result<MessageResponse, ProxyError> {
        let (family, account, stream) = self.acquire(&request).await?;
        let pool = self.pools[&family].clone();

        let (tx, mut rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let pump = async move {
            let result = stream.pump(&tx).await;
            drop(tx);
            result
        };
        let drain = async {
            let mut events = Vec::new();
            while let Some(event) = rx.recv().await {
                events.push(event);
            }
            events
        };

        let joined = async { tokio::join!(pump, drain) };
        let (result, events) = match self.request_timeout {
            Some(limit) => match tokio::time::timeout(limit, joined).await {
                Ok(joined) => joined,
                Err(_) => {
                    pool.record_failure(&account.id).await;
                    return Err(ProxyError::Transport {
                        detail: "request exceeded the configured timeout".to_string(),
                    });
                }
            },
            None => joined.await,
        };

        match result {
            Ok(outcome) => {
                settle(
                    &pool,
                    &account.id,
                    &request.model,
                    Ok(outcome),
                    self.default_cooldown,
                )
                .await;
                Ok(collect_response(&events))
            }
            Err(e) => Err(classify_and_mark(
                &pool,
                family,
                &account.id,
                &request.model,
                e,
                self.default_cooldown,
            )
            .await),
        }
    }

    /// The attempt loop: select, authenticate, start. Ends with an accepted
    /// stream or a classified error.
    async fn acquire(
        &self,
        request: &MessagesRequest,
    ) -> Result<(ModelFamily, SelectedAccount, BackendStream), ProxyError> {
        let Some(family) = ModelFamily::route(&request.model) else {
            return Err(ProxyError::ContractViolation(format!(
                "unknown model family for {:?}",
                request.model
            )));
        };
        let pool = &self.pools[&family];
        let pool_size = pool.len().await;
        if pool_size == 0 {
            return Err(ProxyError::ConfigMissing { family });
        }

        let max_attempts = (pool_size as u32 + 1).max(3);
        let mut attempts = 0u32;
        let mut last: Option<ProxyError> = None;

        loop {
            if attempts >= max_attempts {
                return Err(last.unwrap_or(ProxyError::Exhausted {
                    attempts,
                    last: "no usable account".to_string(),
                }));
            }

            match pool.select(&request.model).await {
                Selection::Wait(wait) => {
                    if wait > WAIT_ABORT_THRESHOLD {
                        return Err(ProxyError::Unavailable {
                            family,
                            reset_mins: wait.as_secs().div_ceil(60).max(1),
                        });
                    }
                    tracing::debug!(family = %family, wait_ms = wait.as_millis(), "Pool busy; waiting");
                    tokio::time::sleep(wait + WAIT_SLACK).await;
                    // Waiting does not consume an attempt.
                }
                Selection::NoneUsable => {
                    return Err(last.unwrap_or(ProxyError::Unauthorized {
                        family,
                        detail: "all accounts are invalid or disabled".to_string(),
                    }));
                }
                Selection::Selected(account) => {
                    attempts += 1;
                    match self.start_attempt(family, &account, request).await {
                        Ok(stream) => return Ok((family, account, stream)),
                        Err(AttemptError::Auth(detail)) => {
                            tracing::warn!(family = %family, account = %account.id, %detail,
                                "Credential acquisition failed");
                            last = Some(ProxyError::Unauthorized { family, detail });
                        }
                        Err(AttemptError::Backend(e)) => {
                            let mut classified = classify_and_mark(
                                pool,
                                family,
                                &account.id,
                                &request.model,
                                e,
                                self.default_cooldown,
                            )
                            .await;
                            if let ProxyError::RateLimited {
                                attempts: seen, ..
                            } = &mut classified
                            {
                                *seen = attempts;
                            }
                            last = Some(classified);
                        }
                    }
                }
            }
        }
    }

    async fn start_attempt(
        &self,
        family: ModelFamily,
        account: &SelectedAccount,
        request: &MessagesRequest,
    ) -> Result<BackendStream, AttemptError> {
        let pool = &self.pools[&family];
        match family {
            ModelFamily::Codex => {
                let token = self.oauth_token(family, &account.id).await?;
                self.codex
                    .start(request, &token)
                    .await
                    .map_err(AttemptError::Backend)
            }
            ModelFamily::CloudCode => {
                let token = self.oauth_token(family, &account.id).await?;
                self.cloudcode
                    .start(request, &token)
                    .await
                    .map_err(AttemptError::Backend)
            }
            ModelFamily::Copilot => {
                let Credentials::Copilot {
                    oauth_token,
                    bearer,
                    bearer_expires_at,
                } = &account.credentials
                else {
                    return Err(AttemptError::Auth(
                        "account does not hold copilot credentials".to_string(),
                    ));
                };
                let bearer = match (bearer, bearer_expires_at) {
                    (Some(bearer), Some(expires_at))
                        if *expires_at - Utc::now() >= BEARER_MARGIN =>
                    {
                        bearer.clone()
                    }
                    _ => {
                        let minted = match self.copilot.mint_bearer(oauth_token).await {
                            Ok(minted) => minted,
                            Err(e) => {
                                if matches!(e.status(), Some(401 | 403)) {
                                    pool.mark_invalid(
                                        &account.id,
                                        "token mint rejected the long-lived token",
                                    )
                                    .await;
                                    return Err(AttemptError::Auth(e.to_string()));
                                }
                                return Err(AttemptError::Backend(e));
                            }
                        };
                        pool.set_copilot_bearer(
                            &account.id,
                            minted.bearer.clone(),
                            minted.expires_at,
                        )
                        .await;
                        minted.bearer
                    }
                };
                self.copilot
                    .start(request, &bearer)
                    .await
                    .map_err(AttemptError::Backend)
            }
            ModelFamily::Cursor => {
                let Credentials::Cursor {
                    api_token,
                    machine_id,
                    ghost_mode,
                } = &account.credentials
                else {
                    return Err(AttemptError::Auth(
                        "account does not hold cursor credentials".to_string(),
                    ));
                };
                self.cursor
                    .start(request, api_token, machine_id, *ghost_mode)
                    .await
                    .map_err(AttemptError::Backend)
            }
        }
    }

    async fn oauth_token(&self, family: ModelFamily, id: &str) -> Result<String, AttemptError> {
        let oauth = self
            .oauth
            .get(&family)
            .expect("oauth families carry a client");
        self.pools[&family]
            .token_for(id, oauth)
            .await
            .map_err(|e| AttemptError::Auth(e.to_string()))
    }
}

/// Post-stream bookkeeping for a pump that ran to completion (or was
/// cancelled).
async fn settle(
    pool: &AccountPool,
    account_id: &str,
    model: &str,
    result: Result<StreamOutcome, BackendError>,
    default_cooldown: Duration,
) {
    match result {
        Ok(outcome) => {
            if outcome.cancelled && !outcome.produced_output {
                // The client vanished before anything streamed; give the
                // pacing token back.
                pool.refund_token(account_id).await;
            } else {
                pool.record_success(account_id).await;
            }
            if let Some(fraction) = outcome.report.quota_fraction {
                pool.record_quota(account_id, model, fraction).await;
            }
        }
        Err(e) => {
            tracing::warn!(account = %account_id, error = %e, "Stream failed mid-flight");
            match e.status() {
                Some(401 | 403) => {
                    pool.mark_invalid(account_id, "authentication rejected mid-stream")
                        .await;
                }
                Some(429) => {
                    let wait = rate_limit_wait(&e, default_cooldown);
                    pool.mark_rate_limited(account_id, Some(model), wait).await;
                }
                _ => pool.record_failure(account_id).await,
            }
        }
    }
}

/// Classify a failed attempt, mutate the pool accordingly, and produce the
/// error that surfaces if the budget runs out here.
async fn classify_and_mark(
    pool: &AccountPool,
    family: ModelFamily,
    account_id: &str,
    model: &str,
    error: BackendError,
    default_cooldown: Duration,
) -> ProxyError {
    match &error {
        BackendError::Http { status, body, .. } => match *status {
            401 | 403 => {
                pool.mark_invalid(account_id, &format!("{status} from backend"))
                    .await;
                ProxyError::Unauthorized {
                    family,
                    detail: body.clone(),
                }
            }
            429 => {
                let wait = rate_limit_wait(&error, default_cooldown);
                pool.mark_rate_limited(account_id, Some(model), wait).await;
                ProxyError::RateLimited {
                    family,
                    attempts: 1,
                }
            }
            status => {
                pool.record_failure(account_id).await;
                ProxyError::Upstream {
                    status,
                    body: body.clone(),
                }
            }
        },
        BackendError::Transport(detail) | BackendError::Stream(detail) => {
            pool.record_failure(account_id).await;
            ProxyError::Transport {
                detail: detail.clone(),
            }
        }
    }
}
