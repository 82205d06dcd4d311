//! The request-facing surface: every operation checks the caller, performs
//! one state change against the store, and broadcasts what changed.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::broadcast::{EntityKind, EventBroadcaster, LifecycleEvent};
use crate::config::CoreConfig;
use crate::db::{settings_repo, Database};
use crate::error::{ConfigError, CoreError, Result};
use crate::gate::auth::{
    principal_label, require_authenticated, require_permission, require_role, Permission,
    Principal, Role,
};
use crate::gate::{
    approval, list_attempts, ActionApproval, ApprovalStatus, ExecutionAttempt, ExecutionGate,
    ExecutionReceipt, HandlerRegistry, NewAction,
};
use crate::history::{self, SchedulerRun};
use crate::lifecycle::{
    job, schedule, Job, JobFilter, JobStatus, JobType, Lifecycle, NewJob, Schedule,
    ScheduleKeyword,
};
use crate::publishing::{self, ContentStatus, NewContent, PublishOutcome, ScheduledContent};
use crate::queue::{QueueTask, WorkQueue};
use crate::quota::{self, CheckOutcome, SchedulerConfig};
use crate::rate_limit::{InMemoryRateLimitStore, RateLimitStore, SqliteRateLimitStore};
use crate::time::format_timestamp;

/// Source of "now" for every operation.
pub type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

/// Inbound request to enqueue a job.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobRequest {
    #[serde(rename = "type")]
    pub job_type: String,
    #[serde(default)]
    pub params: serde_json::Value,
    #[serde(default)]
    pub scheduled_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub priority: i64,
}

impl JobRequest {
    pub fn new(job_type: impl Into<String>) -> Self {
        Self {
            job_type: job_type.into(),
            params: serde_json::Value::Null,
            scheduled_at: None,
            priority: 0,
        }
    }
}

#[derive(Clone)]
pub struct ControlPlane {
    db: Database,
    queue: WorkQueue,
    gate: ExecutionGate,
    events: EventBroadcaster,
    config: Arc<CoreConfig>,
    clock: Clock,
}

impl ControlPlane {
    /// Opens the configured database and wires everything to it.
    pub fn open(config: CoreConfig, handlers: HandlerRegistry) -> Result<Self> {
        let path = config
            .database
            .resolved_path()
            .ok_or_else(|| ConfigError::Validation {
                message: "database.path is not set and no home directory was found".to_string(),
            })?;
        let db = Database::open(&path)?;
        Self::new(db, config, handlers)
    }

    /// Wires an already-open database. Seeds the kill-switch and scheduler
    /// config if this store has never seen them.
    pub fn new(db: Database, config: CoreConfig, handlers: HandlerRegistry) -> Result<Self> {
        let now = Utc::now();
        let ts = format_timestamp(now);
        let safe_mode = if config.safe_mode { "true" } else { "false" };
        if settings_repo::seed_flag(&db, settings_repo::SAFE_MODE_FLAG, safe_mode, &ts)? {
            log::info!("Seeded SAFE_MODE={}", safe_mode);
        }
        if quota::seed(&db, &SchedulerConfig::from(&config.scheduler), now)? {
            log::info!("Seeded scheduler config");
        }

        let rate_limiter: Arc<dyn RateLimitStore> = if config.rate_limits.shared {
            Arc::new(SqliteRateLimitStore::new(db.clone()))
        } else {
            Arc::new(InMemoryRateLimitStore::new())
        };
        let gate = ExecutionGate::new(
            db.clone(),
            rate_limiter,
            (&config.rate_limits.execute).into(),
            Arc::new(handlers),
        )
        .with_claim_timeout(config.execution.claim_timeout());

        Ok(Self {
            queue: WorkQueue::new(db.clone()),
            db,
            gate,
            events: EventBroadcaster::default(),
            config: Arc::new(config),
            clock: Arc::new(Utc::now),
        })
    }

    /// Replaces the clock.
    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    pub fn now(&self) -> DateTime<Utc> {
        (self.clock)()
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    pub fn config(&self) -> &CoreConfig {
        &self.config
    }

    pub fn events(&self) -> &EventBroadcaster {
        &self.events
    }

    fn emit(&self, event: LifecycleEvent, principal: &Principal) {
        self.events.send(event.by(&principal.id));
    }

    // ---- jobs ----

    pub fn enqueue_job(&self, principal: Option<&Principal>, request: JobRequest) -> Result<Job> {
        let p = require_role(principal, Role::Operator, "enqueue jobs")?;
        let job_type = JobType::parse(&request.job_type).ok_or_else(|| {
            CoreError::InvalidInput(format!("unknown job type '{}'", request.job_type))
        })?;

        let mut new_job = NewJob::new(job_type, p.id.clone()).priority(request.priority);
        if !request.params.is_null() {
            new_job = new_job.with_params(request.params);
        }
        if let Some(at) = request.scheduled_at {
            new_job = new_job.scheduled_at(at);
        }

        let now = self.now();
        let created = job::create(&self.db, new_job, now)?;
        self.emit(
            LifecycleEvent::created(EntityKind::Job, &created.id, created.status.as_str(), now),
            p,
        );
        Ok(created)
    }

    pub fn get_job(&self, principal: Option<&Principal>, id: &str) -> Result<Job> {
        require_authenticated(principal)?;
        job::get(&self.db, id)
    }

    pub fn list_jobs(&self, principal: Option<&Principal>, filter: &JobFilter) -> Result<(Vec<Job>, u64)> {
        require_authenticated(principal)?;
        job::list(&self.db, filter)
    }

    /// Claims a PENDING job for execution.
    pub fn run_job(&self, principal: Option<&Principal>, id: &str) -> Result<Job> {
        let p = require_role(principal, Role::Admin, "run jobs")?;
        self.ensure_safe_mode_off(p, "run_job")?;
        let now = self.now();
        let ran = job::run(&self.db, id, now)?;
        self.job_event(&ran, JobStatus::Pending, p, now);
        Ok(ran)
    }

    pub fn complete_job(
        &self,
        principal: Option<&Principal>,
        id: &str,
        result: Option<serde_json::Value>,
    ) -> Result<Job> {
        let p = require_role(principal, Role::Operator, "report job results")?;
        let now = self.now();
        let done = job::complete(&self.db, id, result, now)?;
        self.job_event(&done, JobStatus::Running, p, now);
        Ok(done)
    }

    pub fn fail_job(&self, principal: Option<&Principal>, id: &str, error: &str) -> Result<Job> {
        let p = require_role(principal, Role::Operator, "report job results")?;
        let now = self.now();
        let failed = job::fail(&self.db, id, error, now)?;
        self.job_event(&failed, JobStatus::Running, p, now);
        Ok(failed)
    }

    pub fn retry_job(&self, principal: Option<&Principal>, id: &str) -> Result<Job> {
        let p = require_role(principal, Role::Admin, "retry jobs")?;
        let now = self.now();
        let retried = job::retry(&self.db, id, now)?;
        self.job_event(&retried, JobStatus::Failed, p, now);
        Ok(retried)
    }

    pub fn skip_job(&self, principal: Option<&Principal>, id: &str) -> Result<Job> {
        let p = require_role(principal, Role::Admin, "skip jobs")?;
        let now = self.now();
        let before = job::get(&self.db, id)?.status;
        let skipped = job::skip(&self.db, id, now)?;
        self.job_event(&skipped, before, p, now);
        Ok(skipped)
    }

    /// Returns a RUNNING job older than `jobs.stale_job_minutes` to PENDING.
    pub fn reset_stale_job(&self, principal: Option<&Principal>, id: &str) -> Result<Job> {
        let p = require_role(principal, Role::Admin, "reset stale jobs")?;
        let now = self.now();
        let reset = job::reset_stale(&self.db, id, self.config.jobs.stale_after(), now)?;
        self.job_event(&reset, JobStatus::Running, p, now);
        Ok(reset)
    }

    pub fn find_stale_jobs(&self, principal: Option<&Principal>) -> Result<Vec<Job>> {
        require_role(principal, Role::Admin, "list stale jobs")?;
        job::find_stale(&self.db, self.config.jobs.stale_after(), self.now())
    }

    fn job_event(&self, job: &Job, from: JobStatus, principal: &Principal, now: DateTime<Utc>) {
        self.emit(
            LifecycleEvent::transition(EntityKind::Job, &job.id, from.as_str(), job.status.as_str(), now),
            principal,
        );
    }

    // ---- work queue ----

    pub fn peek_queue(&self, principal: Option<&Principal>, limit: u64) -> Result<Vec<QueueTask>> {
        require_role(principal, Role::Admin, "inspect the work queue")?;
        Ok(self.queue.peek(limit))
    }

    /// Hands the head task for `engine` to a polling engine.
    pub fn take_next_task(&self, principal: Option<&Principal>, engine: &str) -> Result<Option<QueueTask>> {
        require_role(principal, Role::Operator, "take queued tasks")?;
        self.queue.take_next(engine)
    }

    pub fn clear_queue(&self, principal: Option<&Principal>) -> Result<usize> {
        let p = require_role(principal, Role::Admin, "clear the work queue")?;
        let removed = self.queue.clear()?;
        tracing::warn!(principal = %p.id, removed, "Work queue cleared by request");
        Ok(removed)
    }

    pub fn queue_len(&self) -> u64 {
        self.queue.len()
    }

    // ---- schedules ----

    pub fn create_schedule(
        &self,
        principal: Option<&Principal>,
        name: &str,
        keywords: &[String],
    ) -> Result<Schedule> {
        let p = require_permission(principal, Permission::ManageContent, "create schedules")?;
        let now = self.now();
        let created = schedule::create(&self.db, name, keywords, &p.id, now)?;
        self.emit(
            LifecycleEvent::created(EntityKind::Schedule, &created.id, created.status.as_str(), now),
            p,
        );
        Ok(created)
    }

    pub fn get_schedule(&self, principal: Option<&Principal>, id: &str) -> Result<Schedule> {
        require_authenticated(principal)?;
        schedule::get(&self.db, id)
    }

    pub fn list_schedules(&self, principal: Option<&Principal>, limit: u64) -> Result<Vec<Schedule>> {
        require_authenticated(principal)?;
        schedule::list(&self.db, limit)
    }

    pub fn pause_schedule(&self, principal: Option<&Principal>, id: &str) -> Result<Schedule> {
        self.schedule_op(principal, id, schedule::pause)
    }

    pub fn resume_schedule(&self, principal: Option<&Principal>, id: &str) -> Result<Schedule> {
        self.schedule_op(principal, id, schedule::resume)
    }

    pub fn cancel_schedule(&self, principal: Option<&Principal>, id: &str) -> Result<Schedule> {
        self.schedule_op(principal, id, schedule::cancel)
    }

    pub fn complete_schedule(&self, principal: Option<&Principal>, id: &str) -> Result<Schedule> {
        self.schedule_op(principal, id, schedule::complete)
    }

    fn schedule_op(
        &self,
        principal: Option<&Principal>,
        id: &str,
        op: fn(&Database, &str, DateTime<Utc>) -> Result<Schedule>,
    ) -> Result<Schedule> {
        let p = require_authenticated(principal)?;
        let now = self.now();
        let before = schedule::get(&self.db, id)?.status;
        let after = op(&self.db, id, now)?;
        self.emit(
            LifecycleEvent::transition(
                EntityKind::Schedule,
                id,
                before.as_str(),
                after.status.as_str(),
                now,
            ),
            p,
        );
        Ok(after)
    }

    pub fn claim_next_keyword(
        &self,
        principal: Option<&Principal>,
        schedule_id: &str,
    ) -> Result<Option<ScheduleKeyword>> {
        let p = require_role(principal, Role::Operator, "claim keywords")?;
        let now = self.now();
        let claimed = schedule::claim_next_keyword(&self.db, schedule_id, now)?;
        if let Some(kw) = &claimed {
            self.keyword_event(kw, "PENDING", p, now);
        }
        Ok(claimed)
    }

    pub fn mark_keyword_done(&self, principal: Option<&Principal>, keyword_id: &str) -> Result<ScheduleKeyword> {
        let p = require_role(principal, Role::Operator, "report keyword results")?;
        let now = self.now();
        let kw = schedule::mark_keyword_done(&self.db, keyword_id, now)?;
        self.keyword_event(&kw, "PROCESSING", p, now);
        Ok(kw)
    }

    pub fn mark_keyword_failed(
        &self,
        principal: Option<&Principal>,
        keyword_id: &str,
        error: &str,
    ) -> Result<ScheduleKeyword> {
        let p = require_role(principal, Role::Operator, "report keyword results")?;
        let now = self.now();
        let kw = schedule::mark_keyword_failed(&self.db, keyword_id, error, now)?;
        self.keyword_event(&kw, "PROCESSING", p, now);
        Ok(kw)
    }

    pub fn retry_keyword(&self, principal: Option<&Principal>, keyword_id: &str) -> Result<ScheduleKeyword> {
        let p = require_role(principal, Role::Operator, "retry keywords")?;
        let now = self.now();
        let kw = schedule::retry_keyword(&self.db, keyword_id, now)?;
        self.keyword_event(&kw, "FAILED", p, now);
        Ok(kw)
    }

    fn keyword_event(&self, kw: &ScheduleKeyword, from: &str, principal: &Principal, now: DateTime<Utc>) {
        self.emit(
            LifecycleEvent::transition(EntityKind::Keyword, &kw.id, from, kw.status.as_str(), now),
            principal,
        );
    }

    // ---- content & scheduler ----

    pub fn create_content(&self, principal: Option<&Principal>, new: NewContent) -> Result<ScheduledContent> {
        let p = require_permission(principal, Permission::ManageContent, "create content")?;
        let now = self.now();
        let created = publishing::create(&self.db, new, now)?;
        self.emit(
            LifecycleEvent::created(EntityKind::Content, &created.id, created.status.as_str(), now),
            p,
        );
        Ok(created)
    }

    pub fn get_content(&self, principal: Option<&Principal>, id: &str) -> Result<ScheduledContent> {
        require_authenticated(principal)?;
        publishing::get(&self.db, id)
    }

    pub fn list_content(
        &self,
        principal: Option<&Principal>,
        status: Option<ContentStatus>,
        limit: u64,
    ) -> Result<Vec<ScheduledContent>> {
        require_authenticated(principal)?;
        publishing::list(&self.db, status, limit)
    }

    pub fn schedule_content(
        &self,
        principal: Option<&Principal>,
        id: &str,
        scheduled_for: Option<DateTime<Utc>>,
    ) -> Result<ScheduledContent> {
        let p = require_permission(principal, Permission::ManageContent, "schedule content")?;
        let now = self.now();
        let scheduled = publishing::schedule(&self.db, id, scheduled_for, now)?;
        self.emit(
            LifecycleEvent::transition(
                EntityKind::Content,
                id,
                ContentStatus::Draft.as_str(),
                scheduled.status.as_str(),
                now,
            ),
            p,
        );
        Ok(scheduled)
    }

    pub fn update_content_document(
        &self,
        principal: Option<&Principal>,
        id: &str,
        document: &str,
    ) -> Result<ScheduledContent> {
        require_permission(principal, Permission::ManageContent, "edit content")?;
        publishing::update_document(&self.db, id, document, self.now())
    }

    /// Publishes READY_TO_PUBLISH content. Publishing twice is a no-op.
    pub fn publish_content(&self, principal: Option<&Principal>, id: &str) -> Result<PublishOutcome> {
        let p = require_permission(principal, Permission::ManageContent, "publish content")?;
        let now = self.now();
        let outcome = publishing::publish(&self.db, id, now)?;
        if let PublishOutcome::Published(content) = &outcome {
            self.emit(
                LifecycleEvent::transition(
                    EntityKind::Content,
                    id,
                    ContentStatus::ReadyToPublish.as_str(),
                    content.status.as_str(),
                    now,
                ),
                p,
            );
        }
        Ok(outcome)
    }

    pub fn archive_content(&self, principal: Option<&Principal>, id: &str) -> Result<ScheduledContent> {
        let p = require_permission(principal, Permission::ManageContent, "archive content")?;
        let now = self.now();
        let before = publishing::get(&self.db, id)?.status;
        let archived = publishing::archive(&self.db, id, now)?;
        self.emit(
            LifecycleEvent::transition(
                EntityKind::Content,
                id,
                before.as_str(),
                archived.status.as_str(),
                now,
            ),
            p,
        );
        Ok(archived)
    }

    /// Flags due content READY_TO_PUBLISH within quota and run windows.
    pub fn scheduler_check(&self, principal: Option<&Principal>) -> Result<CheckOutcome> {
        let p = require_permission(principal, Permission::ManageContent, "run the scheduler check")?;
        let now = self.now();
        let outcome = quota::check_at(&self.db, now)?;
        for id in &outcome.summary.flagged {
            self.emit(
                LifecycleEvent::transition(
                    EntityKind::Content,
                    id,
                    ContentStatus::Scheduled.as_str(),
                    ContentStatus::ReadyToPublish.as_str(),
                    now,
                ),
                p,
            );
        }
        Ok(outcome)
    }

    pub fn get_scheduler_config(&self, principal: Option<&Principal>) -> Result<SchedulerConfig> {
        require_role(principal, Role::Admin, "read the scheduler config")?;
        quota::load(&self.db)
    }

    pub fn update_scheduler_config(
        &self,
        principal: Option<&Principal>,
        config: &SchedulerConfig,
    ) -> Result<SchedulerConfig> {
        let p = require_role(principal, Role::Admin, "update the scheduler config")?;
        quota::save(&self.db, config, self.now())?;
        tracing::info!(principal = %p.id, "Scheduler config replaced");
        quota::load(&self.db)
    }

    pub fn list_runs(&self, principal: Option<&Principal>, limit: u64) -> Result<Vec<SchedulerRun>> {
        require_authenticated(principal)?;
        history::list_recent(&self.db, limit)
    }

    // ---- approvals & execution ----

    pub fn propose_action(&self, principal: Option<&Principal>, new: NewAction) -> Result<ActionApproval> {
        let p = require_role(principal, Role::Admin, "propose actions")?;
        let now = self.now();
        let proposed = approval::propose(&self.db, new, &p.id, now)?;
        self.emit(
            LifecycleEvent::created(EntityKind::Approval, &proposed.id, proposed.status.as_str(), now),
            p,
        );
        Ok(proposed)
    }

    pub fn approve_action(&self, principal: Option<&Principal>, id: &str) -> Result<ActionApproval> {
        let p = require_role(principal, Role::Admin, "approve actions")?;
        let now = self.now();
        let decided = approval::approve(&self.db, id, &p.id, now)?;
        self.approval_event(&decided, p, now);
        Ok(decided)
    }

    pub fn reject_action(&self, principal: Option<&Principal>, id: &str) -> Result<ActionApproval> {
        let p = require_role(principal, Role::Admin, "reject actions")?;
        let now = self.now();
        let decided = approval::reject(&self.db, id, &p.id, now)?;
        self.approval_event(&decided, p, now);
        Ok(decided)
    }

    fn approval_event(&self, ap: &ActionApproval, principal: &Principal, now: DateTime<Utc>) {
        let from = match ap.status {
            ApprovalStatus::Executed => ApprovalStatus::Approved,
            _ => ApprovalStatus::Pending,
        };
        self.emit(
            LifecycleEvent::transition(EntityKind::Approval, &ap.id, from.as_str(), ap.status.as_str(), now),
            principal,
        );
    }

    pub fn get_action(&self, principal: Option<&Principal>, id: &str) -> Result<ActionApproval> {
        require_authenticated(principal)?;
        approval::get(&self.db, id)
    }

    pub fn list_actions(
        &self,
        principal: Option<&Principal>,
        status: Option<ApprovalStatus>,
        limit: u64,
    ) -> Result<Vec<ActionApproval>> {
        require_authenticated(principal)?;
        approval::list(&self.db, status, limit)
    }

    /// Runs an approved action through the execution gate.
    pub fn execute_action(&self, principal: Option<&Principal>, id: &str) -> Result<ExecutionReceipt> {
        let now = self.now();
        let receipt = self.gate.execute(principal, id, now)?;
        self.events.send(
            LifecycleEvent::transition(
                EntityKind::Approval,
                id,
                ApprovalStatus::Approved.as_str(),
                receipt.approval.status.as_str(),
                now,
            )
            .by(principal_label(principal)),
        );
        Ok(receipt)
    }

    /// Drops a stuck execution claim. Owner only; audited like an execution.
    pub fn release_execution_claim(
        &self,
        principal: Option<&Principal>,
        id: &str,
    ) -> Result<ActionApproval> {
        self.gate.release_claim(principal, id, self.now())
    }

    pub fn list_execution_attempts(
        &self,
        principal: Option<&Principal>,
        approval_id: &str,
    ) -> Result<Vec<ExecutionAttempt>> {
        require_role(principal, Role::Admin, "read the execution audit")?;
        list_attempts(&self.db, approval_id)
    }

    // ---- kill-switch ----

    pub fn safe_mode(&self) -> Result<bool> {
        Ok(settings_repo::safe_mode(&self.db)?)
    }

    pub fn set_safe_mode(&self, principal: Option<&Principal>, enabled: bool) -> Result<bool> {
        let p = require_role(principal, Role::Owner, "toggle SAFE_MODE")?;
        let now = self.now();
        let before = settings_repo::safe_mode(&self.db)?;
        settings_repo::set_safe_mode(&self.db, enabled, &format_timestamp(now))?;
        if before != enabled {
            tracing::warn!(principal = %p.id, enabled, "SAFE_MODE changed");
            self.emit(
                LifecycleEvent::transition(
                    EntityKind::SystemFlag,
                    settings_repo::SAFE_MODE_FLAG,
                    flag_str(before),
                    flag_str(enabled),
                    now,
                ),
                p,
            );
        }
        Ok(enabled)
    }

    fn ensure_safe_mode_off(&self, principal: &Principal, operation: &str) -> Result<()> {
        if settings_repo::safe_mode(&self.db)? {
            tracing::warn!(principal = %principal.id, operation, "Blocked by SAFE_MODE");
            return Err(CoreError::SafeModeActive);
        }
        Ok(())
    }
}

fn flag_str(value: bool) -> &'static str {
    if value {
        "true"
    } else {
        "false"
    }
}

impl std::fmt::Debug for ControlPlane {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ControlPlane")
            .field("gate", &self.gate)
            .field("events", &self.events)
            .finish_non_exhaustive()
    }
}
