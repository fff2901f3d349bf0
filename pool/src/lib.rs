//! Per-backend account pools.
//!
//! Each backend family owns one pool of credentials. A pool tracks per-account
//! health, client-side token-bucket pacing, and observed quota; selection runs
//! a four-level graded filter over the accounts and scores the survivors with
//! a fixed composite formula. State persists as one whole-file JSON document
//! per backend, rewritten through a serialized writer task.
//!
//! Trackers are plain fields of the account record; the pool owns accounts by
//! value and hands out snapshots, never references into its interior.

mod account;
mod pool;
mod store;
mod strategy;
mod trackers;

pub use account::{Account, AccountStatus, Credentials, Trackers};
pub use pool::{AccountPool, AccountSnapshot, PoolError, PoolSnapshot, SelectedAccount, Selection};
pub use store::PoolFile;
pub use strategy::{FilterLevel, PickOutcome, earliest_recovery, pick, score};
pub use trackers::{
    HEALTH_INITIAL, HEALTH_MIN_USABLE, HealthTracker, QUOTA_CRITICAL, QUOTA_LOW, QuotaTracker,
    TOKEN_BUCKET_CAPACITY, TokenBucket,
};
