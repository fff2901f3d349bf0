//! Per-account statistics with time-based recovery.
//!
//! Every method takes the current time explicitly; callers own the clock.
//! That keeps the arithmetic deterministic and the tests free of sleeps.

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};

// ============================================================================
// Health
// ============================================================================

pub const HEALTH_INITIAL: f64 = 70.0;
pub const HEALTH_MAX: f64 = 100.0;
pub const HEALTH_MIN_USABLE: f64 = 50.0;
const HEALTH_RECOVERY_PER_HOUR: f64 = 10.0;
const HEALTH_SUCCESS_DELTA: f64 = 1.0;
const HEALTH_RATE_LIMIT_DELTA: f64 = -10.0;
const HEALTH_FAILURE_DELTA: f64 = -20.0;

/// Reliability estimate in [0, 100] with passive hourly recovery.
///
/// Recovery is applied on read: the stored score only changes on events, so
/// an untouched account climbs back toward usable without any timer driving
/// it.
#[derive(Debug, Clone)]
pub struct HealthTracker {
    score: f64,
    last_touch: DateTime<Utc>,
}

impl Default for HealthTracker {
    fn default() -> Self {
        Self::new(Utc::now())
    }
}

impl HealthTracker {
    #[must_use]
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            score: HEALTH_INITIAL,
            last_touch: now,
        }
    }

    /// Current score with recovery applied: `floor(hours idle) * 10`, capped.
    #[must_use]
    pub fn score(&self, now: DateTime<Utc>) -> f64 {
        let idle_hours = (now - self.last_touch).num_hours().max(0) as f64;
        (self.score + idle_hours * HEALTH_RECOVERY_PER_HOUR).clamp(0.0, HEALTH_MAX)
    }

    #[must_use]
    pub fn is_usable(&self, now: DateTime<Utc>) -> bool {
        self.score(now) >= HEALTH_MIN_USABLE
    }

    pub fn record_success(&mut self, now: DateTime<Utc>) {
        self.apply(HEALTH_SUCCESS_DELTA, now);
    }

    pub fn record_rate_limit(&mut self, now: DateTime<Utc>) {
        self.apply(HEALTH_RATE_LIMIT_DELTA, now);
    }

    pub fn record_failure(&mut self, now: DateTime<Utc>) {
        self.apply(HEALTH_FAILURE_DELTA, now);
    }

    fn apply(&mut self, delta: f64, now: DateTime<Utc>) {
        self.score = (self.score(now) + delta).clamp(0.0, HEALTH_MAX);
        self.last_touch = now;
    }
}

// ============================================================================
// Token bucket
// ============================================================================

pub const TOKEN_BUCKET_CAPACITY: f64 = 50.0;
const TOKEN_REFILL_PER_MINUTE: f64 = 6.0;

/// Client-side request pacing, independent of upstream 429s.
///
/// Bursting through a pool of fresh accounts is what gets them banned; the
/// bucket throttles each account even while the backend is still happy.
#[derive(Debug, Clone)]
pub struct TokenBucket {
    level: f64,
    last_refill: DateTime<Utc>,
}

impl Default for TokenBucket {
    fn default() -> Self {
        Self::new(Utc::now())
    }
}

impl TokenBucket {
    #[must_use]
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            level: TOKEN_BUCKET_CAPACITY,
            last_refill: now,
        }
    }

    /// Current level after refill at 6 tokens/minute, capped at 50.
    #[must_use]
    pub fn level(&self, now: DateTime<Utc>) -> f64 {
        let elapsed_min = (now - self.last_refill).num_milliseconds().max(0) as f64 / 60_000.0;
        (self.level + elapsed_min * TOKEN_REFILL_PER_MINUTE).min(TOKEN_BUCKET_CAPACITY)
    }

    #[must_use]
    pub fn has_token(&self, now: DateTime<Utc>) -> bool {
        self.level(now) >= 1.0
    }

    /// Take one token; `false` when the bucket is below 1.
    pub fn consume(&mut self, now: DateTime<Utc>) -> bool {
        self.settle(now);
        if self.level < 1.0 {
            return false;
        }
        self.level -= 1.0;
        true
    }

    /// Return a token (cancellation before any output), capped at capacity.
    pub fn refund(&mut self, now: DateTime<Utc>) {
        self.settle(now);
        self.level = (self.level + 1.0).min(TOKEN_BUCKET_CAPACITY);
    }

    /// Time until one full token is available; zero when it already is.
    #[must_use]
    pub fn time_until_token(&self, now: DateTime<Utc>) -> Duration {
        let level = self.level(now);
        if level >= 1.0 {
            return Duration::zero();
        }
        let missing = 1.0 - level;
        let millis = (missing / TOKEN_REFILL_PER_MINUTE * 60_000.0).ceil() as i64;
        Duration::milliseconds(millis)
    }

    fn settle(&mut self, now: DateTime<Utc>) {
        self.level = self.level(now);
        self.last_refill = now;
    }
}

// ============================================================================
// Quota
// ============================================================================

pub const QUOTA_LOW: f64 = 0.10;
pub const QUOTA_CRITICAL: f64 = 0.05;
const QUOTA_STALENESS: Duration = Duration::minutes(5);
/// Scoring contribution when quota is unknown (out of 100).
const QUOTA_UNKNOWN_SCORE: f64 = 50.0;

/// Observed free-fraction per model, with a freshness horizon.
///
/// Backends with quota telemetry update this directly; the rest only decay
/// it heuristically on 429.
#[derive(Debug, Clone, Default)]
pub struct QuotaTracker {
    per_model: HashMap<String, (f64, DateTime<Utc>)>,
}

impl QuotaTracker {
    /// Fresh observed fraction, or `None` when unknown/stale.
    #[must_use]
    pub fn fraction(&self, model: &str, now: DateTime<Utc>) -> Option<f64> {
        let (fraction, updated) = self.per_model.get(model)?;
        if now - *updated > QUOTA_STALENESS {
            return None;
        }
        Some(*fraction)
    }

    /// Above the critical floor, or unknown.
    #[must_use]
    pub fn is_ok(&self, model: &str, now: DateTime<Utc>) -> bool {
        self.fraction(model, now)
            .is_none_or(|fraction| fraction > QUOTA_CRITICAL)
    }

    /// Scoring contribution in [0, 100]; unknown scores 50.
    #[must_use]
    pub fn score_component(&self, model: &str, now: DateTime<Utc>) -> f64 {
        self.fraction(model, now)
            .map_or(QUOTA_UNKNOWN_SCORE, |fraction| fraction * 100.0)
    }

    /// Record backend-reported telemetry.
    pub fn record(&mut self, model: &str, fraction: f64, now: DateTime<Utc>) {
        self.per_model
            .insert(model.to_string(), (fraction.clamp(0.0, 1.0), now));
    }

    /// Heuristic decay on 429 for telemetry-less backends: halve the last
    /// known fraction (assume full when unknown).
    pub fn decay_on_rate_limit(&mut self, model: &str, now: DateTime<Utc>) {
        let current = self.fraction(model, now).unwrap_or(1.0);
        self.record(model, current * 0.5, now);
    }
}
