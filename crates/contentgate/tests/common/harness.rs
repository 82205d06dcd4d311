//! Test harness for isolated test execution.
//!
//! The `TestHarness` struct provides:
//! - A temporary directory holding a file-backed SQLite database
//! - A `ControlPlane` wired to that database with a clock the test moves
//! - Extra handles on the same database file for concurrency tests

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Duration, TimeZone, Utc};
use tempfile::TempDir;

use contentgate::{ControlPlane, CoreConfig, Database, HandlerRegistry};

use super::builders::ConfigBuilder;

/// Test harness providing an isolated store and a controllable clock.
pub struct TestHarness {
    /// Temporary directory containing the database file.
    temp_dir: TempDir,
    /// Path to the database file within temp_dir.
    pub db_path: PathBuf,
    /// Current time as seen by the control plane.
    clock: Arc<Mutex<DateTime<Utc>>>,
    config: CoreConfig,
    pub plane: ControlPlane,
}

impl TestHarness {
    /// Create a new test harness with default config and no action handlers.
    pub fn new() -> Self {
        Self::with(ConfigBuilder::new().build(), HandlerRegistry::new())
    }

    pub fn with_config(config: CoreConfig) -> Self {
        Self::with(config, HandlerRegistry::new())
    }

    pub fn with_handlers(handlers: HandlerRegistry) -> Self {
        Self::with(ConfigBuilder::new().build(), handlers)
    }

    pub fn with(mut config: CoreConfig, handlers: HandlerRegistry) -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let db_path = temp_dir.path().join("data").join("contentgate.db");
        config.database.path = Some(db_path.clone());

        let clock = Arc::new(Mutex::new(default_start()));
        let plane = ControlPlane::open(config.clone(), handlers)
            .expect("Failed to open control plane")
            .with_clock(clock_fn(&clock));

        Self {
            temp_dir,
            db_path,
            clock,
            config,
            plane,
        }
    }

    /// Get the base temp directory path.
    pub fn temp_path(&self) -> &Path {
        self.temp_dir.path()
    }

    pub fn now(&self) -> DateTime<Utc> {
        *self.clock.lock().unwrap()
    }

    pub fn set_time(&self, at: DateTime<Utc>) {
        *self.clock.lock().unwrap() = at;
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.clock.lock().unwrap();
        *now += by;
    }

    /// Another connection on the same database file.
    pub fn second_database(&self) -> Database {
        Database::open(&self.db_path).expect("Failed to open second connection")
    }

    /// A control plane on its own connection, sharing this harness's clock.
    pub fn second_plane(&self, handlers: HandlerRegistry) -> ControlPlane {
        ControlPlane::new(self.second_database(), self.config.clone(), handlers)
            .expect("Failed to build second control plane")
            .with_clock(clock_fn(&self.clock))
    }
}

impl Default for TestHarness {
    fn default() -> Self {
        Self::new()
    }
}

/// Monday 2026-03-02 12:00 UTC, inside the default 09:00-21:00 window.
pub fn default_start() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 2, 12, 0, 0).unwrap()
}

fn clock_fn(clock: &Arc<Mutex<DateTime<Utc>>>) -> contentgate::Clock {
    let clock = Arc::clone(clock);
    Arc::new(move || *clock.lock().unwrap())
}
