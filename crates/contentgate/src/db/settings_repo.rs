//! Singleton settings: the scheduler configuration row and named system
//! flags such as the SAFE_MODE kill-switch.

use rusqlite::{params, OptionalExtension};

use super::{Database, DatabaseError};

pub const SAFE_MODE_FLAG: &str = "SAFE_MODE";

/// Raw scheduler configuration. List and map columns hold JSON.
#[derive(Debug, Clone, PartialEq)]
pub struct SchedulerConfigRow {
    pub enabled: bool,
    pub daily_quota: i64,
    pub run_windows: String,
    pub timezone: String,
    pub content_mix: String,
    pub updated_at: String,
}

pub fn get_scheduler_config(db: &Database) -> Result<Option<SchedulerConfigRow>, DatabaseError> {
    db.with_conn(|conn| {
        let row = conn
            .query_row(
                "SELECT enabled, daily_quota, run_windows, timezone, content_mix, updated_at
                 FROM scheduler_config WHERE id = 1",
                [],
                |r| {
                    Ok(SchedulerConfigRow {
                        enabled: r.get::<_, i64>(0)? != 0,
                        daily_quota: r.get(1)?,
                        run_windows: r.get(2)?,
                        timezone: r.get(3)?,
                        content_mix: r.get(4)?,
                        updated_at: r.get(5)?,
                    })
                },
            )
            .optional()?;
        Ok(row)
    })
}

/// Replaces the scheduler configuration.
pub fn put_scheduler_config(db: &Database, row: &SchedulerConfigRow) -> Result<(), DatabaseError> {
    db.with_conn(|conn| {
        conn.execute(
            "INSERT INTO scheduler_config (id, enabled, daily_quota, run_windows, timezone, content_mix, updated_at)
             VALUES (1, ?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT(id) DO UPDATE SET
                enabled = excluded.enabled,
                daily_quota = excluded.daily_quota,
                run_windows = excluded.run_windows,
                timezone = excluded.timezone,
                content_mix = excluded.content_mix,
                updated_at = excluded.updated_at",
            params![
                row.enabled as i64,
                row.daily_quota,
                row.run_windows,
                row.timezone,
                row.content_mix,
                row.updated_at,
            ],
        )?;
        Ok(())
    })
}

/// Writes the configuration only if none exists yet. Returns whether it
/// was written.
pub fn seed_scheduler_config(db: &Database, row: &SchedulerConfigRow) -> Result<bool, DatabaseError> {
    db.with_conn(|conn| {
        let changed = conn.execute(
            "INSERT OR IGNORE INTO scheduler_config
             (id, enabled, daily_quota, run_windows, timezone, content_mix, updated_at)
             VALUES (1, ?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                row.enabled as i64,
                row.daily_quota,
                row.run_windows,
                row.timezone,
                row.content_mix,
                row.updated_at,
            ],
        )?;
        Ok(changed == 1)
    })
}

pub fn get_flag(db: &Database, name: &str) -> Result<Option<String>, DatabaseError> {
    db.with_conn(|conn| {
        let value = conn
            .query_row(
                "SELECT value FROM system_flags WHERE name = ?1",
                params![name],
                |r| r.get(0),
            )
            .optional()?;
        Ok(value)
    })
}

pub fn set_flag(db: &Database, name: &str, value: &str, now: &str) -> Result<(), DatabaseError> {
    db.with_conn(|conn| {
        conn.execute(
            "INSERT INTO system_flags (name, value, updated_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(name) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
            params![name, value, now],
        )?;
        Ok(())
    })
}

/// Sets a flag only if it has never been set.
pub fn seed_flag(db: &Database, name: &str, value: &str, now: &str) -> Result<bool, DatabaseError> {
    db.with_conn(|conn| {
        let changed = conn.execute(
            "INSERT OR IGNORE INTO system_flags (name, value, updated_at) VALUES (?1, ?2, ?3)",
            params![name, value, now],
        )?;
        Ok(changed == 1)
    })
}

/// Current SAFE_MODE state. An unset flag reads as off.
pub fn safe_mode(db: &Database) -> Result<bool, DatabaseError> {
    Ok(get_flag(db, SAFE_MODE_FLAG)?.as_deref() == Some("true"))
}

pub fn set_safe_mode(db: &Database, enabled: bool, now: &str) -> Result<(), DatabaseError> {
    set_flag(db, SAFE_MODE_FLAG, if enabled { "true" } else { "false" }, now)
}
