//! Builder patterns for creating test data programmatically.

#![allow(dead_code)]

use std::collections::BTreeMap;

use contentgate::gate::NewAction;
use contentgate::publishing::NewContent;
use contentgate::{ActionApproval, ControlPlane, CoreConfig, Principal, Role, ScheduledContent};

pub fn owner() -> Principal {
    Principal::new("owner-1", Role::Owner)
}

pub fn admin() -> Principal {
    Principal::new("admin-1", Role::Admin)
}

pub fn operator() -> Principal {
    Principal::new("operator-1", Role::Operator)
}

pub fn viewer() -> Principal {
    Principal::new("viewer-1", Role::Viewer)
}

/// Builder for creating `CoreConfig` instances.
pub struct ConfigBuilder {
    config: CoreConfig,
}

impl ConfigBuilder {
    /// Defaults: SAFE_MODE off, 10 executions per minute, quota 10 in
    /// 09:00-21:00 UTC.
    pub fn new() -> Self {
        Self {
            config: CoreConfig::default(),
        }
    }

    pub fn safe_mode(mut self, enabled: bool) -> Self {
        self.config.safe_mode = enabled;
        self
    }

    pub fn execute_limit(mut self, max_requests: u32, window_ms: u64) -> Self {
        self.config.rate_limits.execute.max_requests = max_requests;
        self.config.rate_limits.execute.window_ms = window_ms;
        self
    }

    pub fn shared_rate_limits(mut self, shared: bool) -> Self {
        self.config.rate_limits.shared = shared;
        self
    }

    pub fn daily_quota(mut self, quota: u32) -> Self {
        self.config.scheduler.daily_quota = quota;
        self
    }

    pub fn run_windows(mut self, windows: &[&str]) -> Self {
        self.config.scheduler.run_windows = windows.iter().map(|w| w.to_string()).collect();
        self
    }

    pub fn timezone(mut self, tz: &str) -> Self {
        self.config.scheduler.timezone = tz.to_string();
        self
    }

    pub fn content_mix(mut self, mix: &[(&str, u32)]) -> Self {
        self.config.scheduler.content_mix = mix
            .iter()
            .map(|(k, v)| (k.to_string(), *v))
            .collect::<BTreeMap<_, _>>();
        self
    }

    pub fn stale_job_minutes(mut self, minutes: u64) -> Self {
        self.config.jobs.stale_job_minutes = minutes;
        self
    }

    pub fn claim_timeout_minutes(mut self, minutes: u64) -> Self {
        self.config.execution.claim_timeout_minutes = minutes;
        self
    }

    pub fn build(self) -> CoreConfig {
        self.config
    }
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Creates content and schedules it as due immediately.
pub fn scheduled_content(plane: &ControlPlane, content_type: &str, title: &str) -> ScheduledContent {
    let p = operator();
    let created = plane
        .create_content(
            Some(&p),
            NewContent {
                content_type: content_type.to_string(),
                title: title.to_string(),
                document: format!("# {}\n\nBody.", title),
            },
        )
        .expect("create content");
    plane
        .schedule_content(Some(&p), &created.id, None)
        .expect("schedule content")
}

/// Proposes a PROMOTE/marketing action and approves it.
pub fn approved_action(plane: &ControlPlane, target: &str) -> ActionApproval {
    let a = admin();
    let proposed = plane
        .propose_action(
            Some(&a),
            NewAction {
                action: "PROMOTE".to_string(),
                category: "marketing".to_string(),
                target_id: target.to_string(),
                payload: serde_json::json!({ "channel": "newsletter" }),
            },
        )
        .expect("propose action");
    plane
        .approve_action(Some(&a), &proposed.id)
        .expect("approve action")
}
