use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use chrono::{DateTime, Utc};

use super::{RateDecision, RateLimitRule, RateLimitStore};
use crate::db::DatabaseError;
use crate::time::{epoch_millis, from_epoch_millis};

/// Timestamps of the admitted requests still inside the window, oldest first.
#[derive(Debug)]
struct Bucket {
    hits: VecDeque<i64>,
    window_ms: i64,
}

impl Bucket {
    fn expire(&mut self, now_ms: i64) {
        let cutoff = now_ms.saturating_sub(self.window_ms);
        while self.hits.front().is_some_and(|&t| t <= cutoff) {
            self.hits.pop_front();
        }
    }
}

/// Process-local limiter. Hit logs are lost on restart and are not shared
/// between instances.
#[derive(Debug, Default)]
pub struct InMemoryRateLimitStore {
    buckets: Mutex<HashMap<String, Bucket>>,
}

impl InMemoryRateLimitStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drops buckets with no request left inside their window.
    pub fn cleanup_expired(&self, now: DateTime<Utc>) {
        let now_ms = epoch_millis(now);
        let mut buckets = self.buckets.lock().unwrap_or_else(|p| p.into_inner());
        buckets.retain(|_, b| {
            b.expire(now_ms);
            !b.hits.is_empty()
        });
    }
}

impl RateLimitStore for InMemoryRateLimitStore {
    fn check_and_increment(
        &self,
        key: &str,
        rule: &RateLimitRule,
        now: DateTime<Utc>,
    ) -> Result<RateDecision, DatabaseError> {
        let now_ms = epoch_millis(now);
        let window_ms = i64::try_from(rule.window_ms).unwrap_or(i64::MAX);
        let mut buckets = self.buckets.lock().unwrap_or_else(|p| p.into_inner());

        let bucket = buckets.entry(key.to_string()).or_insert(Bucket {
            hits: VecDeque::new(),
            window_ms,
        });
        bucket.window_ms = window_ms;
        bucket.expire(now_ms);

        let allowed = bucket.hits.len() < rule.max_requests as usize;
        if allowed {
            bucket.hits.push_back(now_ms);
        }

        let oldest = bucket.hits.front().copied().unwrap_or(now_ms);
        let used = u32::try_from(bucket.hits.len()).unwrap_or(u32::MAX);
        Ok(RateDecision {
            allowed,
            remaining: rule.max_requests.saturating_sub(used),
            reset_at: from_epoch_millis(oldest.saturating_add(window_ms)),
        })
    }

    fn reset(&self, key: &str) -> Result<(), DatabaseError> {
        self.buckets
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .remove(key);
        Ok(())
    }
}
