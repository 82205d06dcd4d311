//! Daily quota and run-window enforcement.
//!
//! The persisted [`SchedulerConfig`] decides how many content units may be
//! flagged READY_TO_PUBLISH per local day and at which times of day.

pub mod enforcer;
pub mod mix;
pub mod window;

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::db::settings_repo::{self, SchedulerConfigRow};
use crate::db::{Database, DatabaseError};
use crate::error::{CoreError, Result};
use crate::time::{format_timestamp, parse_timezone};

pub use enforcer::{check_at, CheckOutcome, CheckResult, CheckSummary};
pub use window::RunWindow;

/// Singleton scheduler configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SchedulerConfig {
    pub enabled: bool,
    pub daily_quota: u32,
    /// `"HH:MM-HH:MM"` entries in `timezone` local time.
    pub run_windows: Vec<String>,
    /// IANA timezone name.
    pub timezone: String,
    /// Relative weight per content type. Empty means plain due order.
    #[serde(default)]
    pub content_mix: BTreeMap<String, u32>,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            daily_quota: 10,
            run_windows: vec!["09:00-21:00".to_string()],
            timezone: "UTC".to_string(),
            content_mix: BTreeMap::new(),
        }
    }
}

impl SchedulerConfig {
    /// Rejects values the enforcer cannot work with. Malformed windows are
    /// allowed through; they are skipped at check time.
    pub fn validate(&self) -> Result<()> {
        if parse_timezone(&self.timezone).is_none() {
            return Err(CoreError::InvalidInput(format!(
                "unknown timezone '{}'",
                self.timezone
            )));
        }
        if self.content_mix.keys().any(|k| k.trim().is_empty()) {
            return Err(CoreError::InvalidInput(
                "content mix keys must not be empty".into(),
            ));
        }
        Ok(())
    }

    fn to_row(&self, now: DateTime<Utc>) -> std::result::Result<SchedulerConfigRow, DatabaseError> {
        Ok(SchedulerConfigRow {
            enabled: self.enabled,
            daily_quota: i64::from(self.daily_quota),
            run_windows: serde_json::to_string(&self.run_windows)?,
            timezone: self.timezone.clone(),
            content_mix: serde_json::to_string(&self.content_mix)?,
            updated_at: format_timestamp(now),
        })
    }

    fn from_row(row: SchedulerConfigRow) -> std::result::Result<Self, DatabaseError> {
        let corrupt = |reason: String| DatabaseError::corrupt("scheduler_config", "1", reason);
        Ok(Self {
            enabled: row.enabled,
            daily_quota: u32::try_from(row.daily_quota)
                .map_err(|_| corrupt(format!("bad daily_quota {}", row.daily_quota)))?,
            run_windows: serde_json::from_str(&row.run_windows)
                .map_err(|e| corrupt(format!("bad run_windows: {}", e)))?,
            timezone: row.timezone,
            content_mix: serde_json::from_str(&row.content_mix)
                .map_err(|e| corrupt(format!("bad content_mix: {}", e)))?,
        })
    }
}

/// The stored configuration, or the default if none was ever written.
pub fn load(db: &Database) -> Result<SchedulerConfig> {
    match settings_repo::get_scheduler_config(db)? {
        Some(row) => Ok(SchedulerConfig::from_row(row)?),
        None => Ok(SchedulerConfig::default()),
    }
}

/// Validates and replaces the stored configuration.
pub fn save(db: &Database, config: &SchedulerConfig, now: DateTime<Utc>) -> Result<()> {
    config.validate()?;
    settings_repo::put_scheduler_config(db, &config.to_row(now)?)?;
    tracing::info!(
        enabled = config.enabled,
        daily_quota = config.daily_quota,
        timezone = %config.timezone,
        "Scheduler config updated"
    );
    Ok(())
}

/// Stores `config` only if no configuration exists yet.
pub fn seed(db: &Database, config: &SchedulerConfig, now: DateTime<Utc>) -> Result<bool> {
    config.validate()?;
    Ok(settings_repo::seed_scheduler_config(db, &config.to_row(now)?)?)
}
