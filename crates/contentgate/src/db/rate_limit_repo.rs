//! Shared rate-limit hit log. One row per admitted request.

use rusqlite::params;

use super::{Database, DatabaseError};

/// Log state after a hit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Hit {
    pub allowed: bool,
    /// Requests inside the window, including this one if admitted.
    pub count: u32,
    /// When the oldest request in the window stops counting.
    pub reset_at_ms: i64,
}

/// Counts one request against `key` over the `window_ms` ending at
/// `now_ms`. A rejected request is not logged. Expiry, count and insert
/// happen in one transaction.
pub fn hit(
    db: &Database,
    key: &str,
    max_requests: u32,
    window_ms: i64,
    now_ms: i64,
) -> Result<Hit, DatabaseError> {
    db.with_tx(|conn| {
        conn.execute(
            "DELETE FROM rate_limit_hits WHERE key = ?1 AND hit_at_ms <= ?2",
            params![key, now_ms.saturating_sub(window_ms)],
        )?;
        let (count, oldest): (u32, Option<i64>) = conn.query_row(
            "SELECT COUNT(*), MIN(hit_at_ms) FROM rate_limit_hits WHERE key = ?1",
            params![key],
            |r| Ok((r.get(0)?, r.get(1)?)),
        )?;

        let allowed = count < max_requests;
        if allowed {
            conn.execute(
                "INSERT INTO rate_limit_hits (key, hit_at_ms, window_ms) VALUES (?1, ?2, ?3)",
                params![key, now_ms, window_ms],
            )?;
        }

        let count = if allowed { count + 1 } else { count };
        let oldest = oldest.map_or(now_ms, |t| t.min(now_ms));
        Ok(Hit {
            allowed,
            count,
            reset_at_ms: oldest.saturating_add(window_ms),
        })
    })
}

pub fn delete(db: &Database, key: &str) -> Result<(), DatabaseError> {
    db.with_conn(|conn| {
        conn.execute("DELETE FROM rate_limit_hits WHERE key = ?1", params![key])?;
        Ok(())
    })
}

/// Drops hits that no longer fall inside their window at `now_ms`.
pub fn purge_expired(db: &Database, now_ms: i64) -> Result<usize, DatabaseError> {
    db.with_conn(|conn| {
        Ok(conn.execute(
            "DELETE FROM rate_limit_hits WHERE hit_at_ms + window_ms <= ?1",
            params![now_ms],
        )?)
    })
}
