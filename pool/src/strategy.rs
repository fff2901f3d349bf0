//! Hybrid selection: graded filtering then composite scoring.
//!
//! Pure functions over an account slice; the pool calls these under its
//! mutex. Keeping the strategy free of locks and clocks makes the level
//! predicates and the scoring formula directly testable.

use chrono::{DateTime, Duration, Utc};

use crate::account::Account;

/// The four fallback levels, consulted in order. The first level with a
/// non-empty candidate set wins; later levels are never consulted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterLevel {
    /// active ∧ healthy ∧ has-token ∧ quota-ok
    Strict,
    /// active ∧ has-token ∧ quota-ok
    IgnoreHealth,
    /// active ∧ healthy ∧ quota-ok
    IgnoreTokens,
    /// active
    LastResort,
}

impl FilterLevel {
    pub const ALL: [FilterLevel; 4] = [
        FilterLevel::Strict,
        FilterLevel::IgnoreHealth,
        FilterLevel::IgnoreTokens,
        FilterLevel::LastResort,
    ];

    /// Whether `account` belongs to this level's candidate set.
    #[must_use]
    pub fn admits(self, account: &Account, model: &str, now: DateTime<Utc>) -> bool {
        if !account.is_available(now) {
            return false;
        }
        let trackers = &account.trackers;
        let healthy = trackers.health.is_usable(now);
        let has_token = trackers.bucket.has_token(now);
        let quota_ok = trackers.quota.is_ok(model, now);
        match self {
            Self::Strict => healthy && has_token && quota_ok,
            Self::IgnoreHealth => has_token && quota_ok,
            Self::IgnoreTokens => healthy && quota_ok,
            Self::LastResort => true,
        }
    }
}

// Fixed weights of the composite formula.
const WEIGHT_HEALTH: f64 = 2.0;
const WEIGHT_TOKENS: f64 = 5.0;
const WEIGHT_QUOTA: f64 = 3.0;
const WEIGHT_LRU: f64 = 0.1;
const LRU_CAP_MINUTES: f64 = 100.0;

/// Composite score for one candidate.
///
/// `2·health + 5·(100·bucket/50) + 3·(100·quota) + 0.1·lru`, where `lru`
/// is minutes since last use capped at 100 (never-used counts as 100).
#[must_use]
pub fn score(account: &Account, model: &str, now: DateTime<Utc>) -> f64 {
    let trackers = &account.trackers;
    let health = trackers.health.score(now);
    let tokens = 100.0 * trackers.bucket.level(now) / crate::trackers::TOKEN_BUCKET_CAPACITY;
    let quota = trackers.quota.score_component(model, now);
    let lru = account.last_used.map_or(LRU_CAP_MINUTES, |used| {
        ((now - used).num_seconds().max(0) as f64 / 60.0).min(LRU_CAP_MINUTES)
    });
    WEIGHT_HEALTH * health + WEIGHT_TOKENS * tokens + WEIGHT_QUOTA * quota + WEIGHT_LRU * lru
}

/// Result of a pick over the account slice.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PickOutcome {
    /// Index of the winning account, plus the level that admitted it.
    Index { index: usize, level: FilterLevel },
    /// Nothing selectable now; earliest time something frees up.
    Wait(Duration),
    /// Nothing will free up without operator action (or the pool is empty).
    NoneUsable,
}

/// Run graded filtering + scoring. Ties break by rotation order starting at
/// `active_index`; the pool advances that cursor after a successful pick.
#[must_use]
pub fn pick(
    accounts: &[Account],
    model: &str,
    active_index: usize,
    now: DateTime<Utc>,
) -> PickOutcome {
    if accounts.is_empty() {
        return PickOutcome::NoneUsable;
    }

    // Rotation order: active_index, active_index+1, ... wrapping.
    let rotation: Vec<usize> = (0..accounts.len())
        .map(|offset| (active_index + offset) % accounts.len())
        .collect();

    for level in FilterLevel::ALL {
        let mut best: Option<(usize, f64)> = None;
        for &index in &rotation {
            let account = &accounts[index];
            if !level.admits(account, model, now) {
                continue;
            }
            let candidate_score = score(account, model, now);
            let better = match best {
                None => true,
                // Strict inequality: earlier rotation position wins ties.
                Some((_, best_score)) => candidate_score > best_score,
            };
            if better {
                best = Some((index, candidate_score));
            }
        }
        if let Some((index, _)) = best {
            return PickOutcome::Index { index, level };
        }
    }

    // Nothing admitted anywhere: report the earliest recovery.
    match earliest_recovery(accounts, now) {
        Some(wait) => PickOutcome::Wait(wait),
        None => PickOutcome::NoneUsable,
    }
}

/// Earliest time anything frees up: the nearest cooldown expiry or token
/// refill across enabled, non-invalid accounts. `None` when only operator
/// action can help.
#[must_use]
pub fn earliest_recovery(accounts: &[Account], now: DateTime<Utc>) -> Option<Duration> {
    let mut wait: Option<Duration> = None;
    for account in accounts {
        let candidate = if account.invalid || !account.enabled {
            continue;
        } else if account.cooling(now) {
            account.cooldown_until.map(|until| until - now)
        } else if !account.trackers.bucket.has_token(now) {
            Some(account.trackers.bucket.time_until_token(now))
        } else {
            None
        };
        if let Some(candidate) = candidate {
            wait = Some(match wait {
                Some(current) if current <= candidate => current,
                _ => candidate,
            });
        }
    }
    wait
}
