use chrono::{DateTime, Utc};

use super::{RateDecision, RateLimitRule, RateLimitStore};
use crate::db::{rate_limit_repo, Database, DatabaseError};
use crate::time::{epoch_millis, from_epoch_millis};

/// Limiter whose hit log lives in the `rate_limit_hits` table, so every
/// process sharing the database shares the budget.
#[derive(Clone)]
pub struct SqliteRateLimitStore {
    db: Database,
}

impl SqliteRateLimitStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Removes hits that have left their window.
    pub fn purge_expired(&self, now: DateTime<Utc>) -> Result<usize, DatabaseError> {
        rate_limit_repo::purge_expired(&self.db, epoch_millis(now))
    }
}

impl RateLimitStore for SqliteRateLimitStore {
    fn check_and_increment(
        &self,
        key: &str,
        rule: &RateLimitRule,
        now: DateTime<Utc>,
    ) -> Result<RateDecision, DatabaseError> {
        let window_ms = i64::try_from(rule.window_ms).unwrap_or(i64::MAX);
        let hit = rate_limit_repo::hit(
            &self.db,
            key,
            rule.max_requests,
            window_ms,
            epoch_millis(now),
        )?;
        Ok(RateDecision {
            allowed: hit.allowed,
            remaining: rule.max_requests.saturating_sub(hit.count),
            reset_at: from_epoch_millis(hit.reset_at_ms),
        })
    }

    fn reset(&self, key: &str) -> Result<(), DatabaseError> {
        rate_limit_repo::delete(&self.db, key)
    }
}
