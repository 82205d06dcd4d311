use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::db::default_database_path;
use crate::quota::SchedulerConfig;
use crate::rate_limit::{RateLimitRule, DEFAULT_EXECUTE_MAX_REQUESTS, DEFAULT_EXECUTE_WINDOW_MS};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoreConfig {
    pub version: String,
    #[serde(default)]
    pub database: DatabaseConfig,
    /// Initial kill-switch value, applied only on first open.
    #[serde(default)]
    pub safe_mode: bool,
    #[serde(default)]
    pub rate_limits: RateLimitsConfig,
    #[serde(default)]
    pub jobs: JobsConfig,
    #[serde(default)]
    pub execution: ExecutionConfig,
    #[serde(default)]
    pub scheduler: SchedulerSeed,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            version: "1.0".to_string(),
            database: DatabaseConfig::default(),
            safe_mode: false,
            rate_limits: RateLimitsConfig::default(),
            jobs: JobsConfig::default(),
            execution: ExecutionConfig::default(),
            scheduler: SchedulerSeed::default(),
            logging: LoggingConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Falls back to `~/.contentgate/data/contentgate.db`.
    #[serde(default)]
    pub path: Option<PathBuf>,
}

impl DatabaseConfig {
    pub fn resolved_path(&self) -> Option<PathBuf> {
        self.path.clone().or_else(default_database_path)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RateLimitsConfig {
    #[serde(default)]
    pub execute: RateRuleConfig,
    /// Keep counters in the database so every instance shares them.
    #[serde(default)]
    pub shared: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateRuleConfig {
    #[serde(default = "default_max_requests")]
    pub max_requests: u32,
    #[serde(default = "default_window_ms")]
    pub window_ms: u64,
}

fn default_max_requests() -> u32 {
    DEFAULT_EXECUTE_MAX_REQUESTS
}

fn default_window_ms() -> u64 {
    DEFAULT_EXECUTE_WINDOW_MS
}

impl Default for RateRuleConfig {
    fn default() -> Self {
        Self {
            max_requests: DEFAULT_EXECUTE_MAX_REQUESTS,
            window_ms: DEFAULT_EXECUTE_WINDOW_MS,
        }
    }
}

impl From<&RateRuleConfig> for RateLimitRule {
    fn from(cfg: &RateRuleConfig) -> Self {
        RateLimitRule {
            max_requests: cfg.max_requests,
            window_ms: cfg.window_ms,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobsConfig {
    /// RUNNING jobs older than this may be reset by an admin.
    #[serde(default = "default_stale_job_minutes")]
    pub stale_job_minutes: u64,
}

fn default_stale_job_minutes() -> u64 {
    60
}

impl Default for JobsConfig {
    fn default() -> Self {
        Self {
            stale_job_minutes: default_stale_job_minutes(),
        }
    }
}

/// Upper bound keeps the minute count inside chrono's range.
const MAX_MINUTES: u64 = 100 * 365 * 24 * 60;

fn minutes(value: u64) -> chrono::Duration {
    chrono::Duration::minutes(i64::try_from(value.min(MAX_MINUTES)).unwrap_or(0))
}

impl JobsConfig {
    pub fn stale_after(&self) -> chrono::Duration {
        minutes(self.stale_job_minutes)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionConfig {
    /// An execution claim older than this is treated as abandoned and may
    /// be taken over by the next caller.
    #[serde(default = "default_claim_timeout_minutes")]
    pub claim_timeout_minutes: u64,
}

fn default_claim_timeout_minutes() -> u64 {
    15
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            claim_timeout_minutes: default_claim_timeout_minutes(),
        }
    }
}

impl ExecutionConfig {
    pub fn claim_timeout(&self) -> chrono::Duration {
        minutes(self.claim_timeout_minutes)
    }
}

/// Scheduler settings written to the store the first time it is opened.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerSeed {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_daily_quota")]
    pub daily_quota: u32,
    #[serde(default = "default_run_windows")]
    pub run_windows: Vec<String>,
    #[serde(default = "default_timezone")]
    pub timezone: String,
    #[serde(default)]
    pub content_mix: BTreeMap<String, u32>,
}

fn default_true() -> bool {
    true
}

fn default_daily_quota() -> u32 {
    10
}

fn default_run_windows() -> Vec<String> {
    vec!["09:00-21:00".to_string()]
}

fn default_timezone() -> String {
    "UTC".to_string()
}

impl Default for SchedulerSeed {
    fn default() -> Self {
        Self {
            enabled: true,
            daily_quota: default_daily_quota(),
            run_windows: default_run_windows(),
            timezone: default_timezone(),
            content_mix: BTreeMap::new(),
        }
    }
}

impl From<&SchedulerSeed> for SchedulerConfig {
    fn from(seed: &SchedulerSeed) -> Self {
        SchedulerConfig {
            enabled: seed.enabled,
            daily_quota: seed.daily_quota,
            run_windows: seed.run_windows.clone(),
            timezone: seed.timezone.clone(),
            content_mix: seed.content_mix.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default filter directive; `RUST_LOG` takes precedence.
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Emit JSON lines instead of human-readable output.
    #[serde(default)]
    pub json: bool,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}
