//! Per-principal request throttling.
//!
//! Each key gets `max_requests` within any sliding window of the last
//! `window_ms`; a request stops counting `window_ms` after it was admitted. [`RateLimitStore`] has a process-local
//! implementation ([`InMemoryRateLimitStore`]) and one backed by the shared
//! database ([`SqliteRateLimitStore`]) for deployments with several
//! instances.

mod memory;
mod sqlite;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::db::DatabaseError;
use crate::error::{CoreError, Result};

pub use memory::InMemoryRateLimitStore;
pub use sqlite::SqliteRateLimitStore;

/// Default budget for the execute bucket.
pub const DEFAULT_EXECUTE_MAX_REQUESTS: u32 = 10;
pub const DEFAULT_EXECUTE_WINDOW_MS: u64 = 60_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitRule {
    pub max_requests: u32,
    pub window_ms: u64,
}

impl Default for RateLimitRule {
    fn default() -> Self {
        Self {
            max_requests: DEFAULT_EXECUTE_MAX_REQUESTS,
            window_ms: DEFAULT_EXECUTE_WINDOW_MS,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateDecision {
    pub allowed: bool,
    /// Requests left in the current window after this one.
    pub remaining: u32,
    /// When the oldest request in the window stops counting.
    pub reset_at: DateTime<Utc>,
}

impl RateDecision {
    /// Milliseconds until a slot frees up, never negative.
    pub fn retry_after_ms(&self, now: DateTime<Utc>) -> u64 {
        u64::try_from((self.reset_at - now).num_milliseconds()).unwrap_or(0)
    }
}

pub trait RateLimitStore: Send + Sync {
    /// Records one request for `key` if the rule allows it.
    fn check_and_increment(
        &self,
        key: &str,
        rule: &RateLimitRule,
        now: DateTime<Utc>,
    ) -> std::result::Result<RateDecision, DatabaseError>;

    /// Forgets all state for `key`.
    fn reset(&self, key: &str) -> std::result::Result<(), DatabaseError>;
}

/// Bucket key for execute calls by `principal_id`.
pub fn execute_key(principal_id: &str) -> String {
    format!("execute:{}", principal_id)
}

/// Counts a request and turns a rejection into [`CoreError::RateLimited`].
pub fn enforce(
    store: &dyn RateLimitStore,
    key: &str,
    rule: &RateLimitRule,
    now: DateTime<Utc>,
) -> Result<RateDecision> {
    let decision = store.check_and_increment(key, rule, now)?;
    if decision.allowed {
        return Ok(decision);
    }

    let retry_after_ms = decision.retry_after_ms(now);
    tracing::warn!(key, retry_after_ms, "Rate limit exceeded");
    Err(CoreError::RateLimited {
        key: key.to_string(),
        reset_at: decision.reset_at,
        retry_after_ms,
    })
}
