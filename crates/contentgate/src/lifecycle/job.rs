//! Job lifecycle: a single unit of work for the external content engine.
//!
//! ```text
//! PENDING ──run──▶ RUNNING ──complete──▶ COMPLETED
//!    │                │
//!    │                └────fail────▶ FAILED ──retry──▶ PENDING
//!    └─────skip─────▶ SKIPPED ◀──skip──┘
//! ```
//!
//! Every transition is a single conditional `UPDATE`; a transition that
//! loses a race is diagnosed by re-reading the row afterwards.

use chrono::{DateTime, Duration, Utc};
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{validate_transition, Lifecycle};
use crate::db::job_repo::{self, JobRow, JobRowFilter};
use crate::db::queue_repo::{self, NewTaskRow};
use crate::db::{Database, DatabaseError};
use crate::error::{CoreError, Result};
use crate::time::{format_timestamp, parse_timestamp};

/// Engine that receives the queue task created alongside every job.
pub const DEFAULT_ENGINE: &str = "content-engine";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobType {
    Generate,
    Refresh,
    Optimize,
}

impl JobType {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobType::Generate => "GENERATE",
            JobType::Refresh => "REFRESH",
            JobType::Optimize => "OPTIMIZE",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "GENERATE" => Some(JobType::Generate),
            "REFRESH" => Some(JobType::Refresh),
            "OPTIMIZE" => Some(JobType::Optimize),
            _ => None,
        }
    }
}

impl std::fmt::Display for JobType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Skipped,
}

impl JobStatus {
    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|st| st.as_str() == s)
    }
}

impl Lifecycle for JobStatus {
    const ALL: &'static [Self] = &[
        JobStatus::Pending,
        JobStatus::Running,
        JobStatus::Completed,
        JobStatus::Failed,
        JobStatus::Skipped,
    ];

    fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "PENDING",
            JobStatus::Running => "RUNNING",
            JobStatus::Completed => "COMPLETED",
            JobStatus::Failed => "FAILED",
            JobStatus::Skipped => "SKIPPED",
        }
    }

    fn can_transition_to(&self, target: JobStatus) -> bool {
        use JobStatus::*;
        matches!(
            (self, target),
            (Pending, Running)
                | (Pending, Skipped)
                | (Running, Completed)
                | (Running, Failed)
                | (Failed, Pending)
                | (Failed, Skipped)
        )
    }

    fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Skipped)
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A job as seen by callers.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    pub id: String,
    #[serde(rename = "type")]
    pub job_type: JobType,
    pub status: JobStatus,
    pub requested_by: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scheduled_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    pub params: serde_json::Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Priority of the job's queue task.
    pub priority: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Job {
    /// Decodes a stored row. Unknown enum values or unparseable columns
    /// are reported as a corrupt row rather than guessed at.
    pub fn from_row(row: JobRow) -> std::result::Result<Self, DatabaseError> {
        const TABLE: &str = "jobs";
        let id = row.id;

        let job_type = JobType::parse(&row.job_type).ok_or_else(|| {
            DatabaseError::corrupt(TABLE, &id, format!("unknown job type '{}'", row.job_type))
        })?;
        let status = JobStatus::parse(&row.status).ok_or_else(|| {
            DatabaseError::corrupt(TABLE, &id, format!("unknown status '{}'", row.status))
        })?;
        let ts = |value: Option<String>, column: &str| -> std::result::Result<_, DatabaseError> {
            match value {
                None => Ok(None),
                Some(s) => parse_timestamp(&s).map(Some).ok_or_else(|| {
                    DatabaseError::corrupt(TABLE, &id, format!("bad {} '{}'", column, s))
                }),
            }
        };

        let scheduled_at = ts(row.scheduled_at, "scheduled_at")?;
        let started_at = ts(row.started_at, "started_at")?;
        let finished_at = ts(row.finished_at, "finished_at")?;
        let created_at = ts(Some(row.created_at), "created_at")?.unwrap_or_default();
        let updated_at = ts(Some(row.updated_at), "updated_at")?.unwrap_or_default();

        let params = serde_json::from_str(&row.params)
            .map_err(|e| DatabaseError::corrupt(TABLE, &id, format!("bad params: {}", e)))?;
        let result = match row.result {
            Some(r) => Some(
                serde_json::from_str(&r)
                    .map_err(|e| DatabaseError::corrupt(TABLE, &id, format!("bad result: {}", e)))?,
            ),
            None => None,
        };

        Ok(Job {
            id,
            job_type,
            status,
            requested_by: row.requested_by,
            scheduled_at,
            started_at,
            finished_at,
            params,
            result,
            error: row.error,
            priority: row.priority,
            created_at,
            updated_at,
        })
    }
}

/// Input for [`create`].
#[derive(Debug, Clone)]
pub struct NewJob {
    pub job_type: JobType,
    pub requested_by: String,
    pub params: serde_json::Value,
    pub scheduled_at: Option<DateTime<Utc>>,
    /// Priority of the queue task created for this job.
    pub priority: i64,
}

impl NewJob {
    pub fn new(job_type: JobType, requested_by: impl Into<String>) -> Self {
        Self {
            job_type,
            requested_by: requested_by.into(),
            params: serde_json::json!({}),
            scheduled_at: None,
            priority: 0,
        }
    }

    pub fn with_params(mut self, params: serde_json::Value) -> Self {
        self.params = params;
        self
    }

    pub fn scheduled_at(mut self, at: DateTime<Utc>) -> Self {
        self.scheduled_at = Some(at);
        self
    }

    pub fn priority(mut self, priority: i64) -> Self {
        self.priority = priority;
        self
    }
}

/// Listing filter.
#[derive(Debug, Default, Clone)]
pub struct JobFilter {
    pub status: Option<JobStatus>,
    pub job_type: Option<JobType>,
    pub requested_by: Option<String>,
    pub limit: Option<u64>,
    pub offset: Option<u64>,
}

/// Creates a PENDING job and enqueues its engine task in one transaction.
pub fn create(db: &Database, new_job: NewJob, now: DateTime<Utc>) -> Result<Job> {
    let id = Uuid::new_v4().to_string();
    let now_str = format_timestamp(now);
    let params = serde_json::to_string(&new_job.params).map_err(DatabaseError::from)?;

    let row = JobRow {
        id: id.clone(),
        job_type: new_job.job_type.as_str().to_string(),
        status: JobStatus::Pending.as_str().to_string(),
        requested_by: new_job.requested_by.clone(),
        scheduled_at: new_job.scheduled_at.map(format_timestamp),
        started_at: None,
        finished_at: None,
        params,
        result: None,
        error: None,
        priority: new_job.priority,
        created_at: now_str.clone(),
        updated_at: now_str.clone(),
    };

    db.with_tx(|conn| {
        job_repo::insert_with(conn, &row)?;
        enqueue_with(
            conn,
            &id,
            new_job.job_type,
            &new_job.params,
            new_job.priority,
            &now_str,
        )
    })?;

    tracing::info!(
        job_id = %id,
        job_type = %new_job.job_type,
        requested_by = %new_job.requested_by,
        "Job created"
    );

    get(db, &id)
}

pub fn get(db: &Database, id: &str) -> Result<Job> {
    let row = job_repo::find_by_id(db, id)?.ok_or_else(|| CoreError::not_found("job", id))?;
    Ok(Job::from_row(row)?)
}

/// Lists jobs newest first, with the total count matching the filter.
pub fn list(db: &Database, filter: &JobFilter) -> Result<(Vec<Job>, u64)> {
    let row_filter = JobRowFilter {
        status: filter.status.map(|s| s.as_str().to_string()),
        job_type: filter.job_type.map(|t| t.as_str().to_string()),
        requested_by: filter.requested_by.clone(),
        limit: filter.limit,
        offset: filter.offset,
    };
    let (rows, total) = job_repo::query(db, &row_filter)?;
    let jobs = rows
        .into_iter()
        .map(Job::from_row)
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok((jobs, total))
}

/// PENDING -> RUNNING. At most one caller wins; the others get a
/// `Conflict` naming the job as RUNNING.
pub fn run(db: &Database, id: &str, now: DateTime<Utc>) -> Result<Job> {
    let current = get(db, id)?;
    precheck_run(&current, now)?;

    let changed = job_repo::claim(db, id, &format_timestamp(now))?;
    if changed == 0 {
        return Err(diagnose(db, id, JobStatus::Running, now));
    }

    tracing::info!(job_id = %id, "Job claimed");
    get(db, id)
}

fn precheck_run(job: &Job, now: DateTime<Utc>) -> Result<()> {
    if job.status == JobStatus::Running {
        return Err(conflict(job, "already claimed by another caller"));
    }
    validate_transition(job.status, JobStatus::Running)?;
    if let Some(at) = job.scheduled_at {
        if at > now {
            return Err(CoreError::NotReady {
                id: job.id.clone(),
                scheduled_at: at,
            });
        }
    }
    Ok(())
}

/// RUNNING -> COMPLETED.
pub fn complete(
    db: &Database,
    id: &str,
    result: Option<serde_json::Value>,
    now: DateTime<Utc>,
) -> Result<Job> {
    let current = get(db, id)?;
    validate_transition(current.status, JobStatus::Completed)?;

    let result = result
        .map(|r| serde_json::to_string(&r))
        .transpose()
        .map_err(DatabaseError::from)?;
    let changed = job_repo::finish(
        db,
        id,
        JobStatus::Completed.as_str(),
        result.as_deref(),
        None,
        &format_timestamp(now),
    )?;
    if changed == 0 {
        return Err(diagnose(db, id, JobStatus::Completed, now));
    }

    tracing::info!(job_id = %id, "Job completed");
    get(db, id)
}

/// RUNNING -> FAILED, recording the engine's error message.
pub fn fail(db: &Database, id: &str, error: &str, now: DateTime<Utc>) -> Result<Job> {
    let current = get(db, id)?;
    validate_transition(current.status, JobStatus::Failed)?;

    let changed = job_repo::finish(
        db,
        id,
        JobStatus::Failed.as_str(),
        None,
        Some(error),
        &format_timestamp(now),
    )?;
    if changed == 0 {
        return Err(diagnose(db, id, JobStatus::Failed, now));
    }

    tracing::warn!(job_id = %id, error = %error, "Job failed");
    get(db, id)
}

/// FAILED -> PENDING. Clears the error and both attempt timestamps and
/// puts the job's task back on the queue.
pub fn retry(db: &Database, id: &str, now: DateTime<Utc>) -> Result<Job> {
    let current = get(db, id)?;
    validate_transition(current.status, JobStatus::Pending)?;

    let now_str = format_timestamp(now);
    let changed = db.with_tx(|conn| {
        let changed = job_repo::reset_failed_with(conn, id, &now_str)?;
        if changed == 1 {
            requeue_with(conn, &current, &now_str)?;
        }
        Ok(changed)
    })?;
    if changed == 0 {
        return Err(diagnose(db, id, JobStatus::Pending, now));
    }

    tracing::info!(job_id = %id, "Job reset for retry");
    get(db, id)
}

/// PENDING | FAILED -> SKIPPED. The job's queued task, if any, is dropped.
pub fn skip(db: &Database, id: &str, now: DateTime<Utc>) -> Result<Job> {
    let current = get(db, id)?;
    validate_transition(current.status, JobStatus::Skipped)?;

    let changed = db.with_tx(|conn| {
        let changed = job_repo::skip_with(conn, id, &format_timestamp(now))?;
        if changed == 1 {
            queue_repo::delete_with(conn, id)?;
        }
        Ok(changed)
    })?;
    if changed == 0 {
        return Err(diagnose(db, id, JobStatus::Skipped, now));
    }

    tracing::info!(job_id = %id, "Job skipped");
    get(db, id)
}

/// Force-resets a RUNNING job that has been running for at least
/// `stale_after` back to PENDING and re-enqueues its task.
pub fn reset_stale(
    db: &Database,
    id: &str,
    stale_after: Duration,
    now: DateTime<Utc>,
) -> Result<Job> {
    let current = get(db, id)?;
    if current.status != JobStatus::Running {
        return Err(CoreError::InvalidTransition {
            from: current.status.as_str().to_string(),
            to: JobStatus::Pending.as_str().to_string(),
            reason: "only a RUNNING job can be reset as stale".to_string(),
        });
    }

    let cutoff = format_timestamp(now - stale_after);
    let now_str = format_timestamp(now);
    let changed = db.with_tx(|conn| {
        let changed = job_repo::reset_stale_with(conn, id, &cutoff, &now_str)?;
        if changed == 1 {
            requeue_with(conn, &current, &now_str)?;
        }
        Ok(changed)
    })?;
    if changed == 0 {
        let current = get(db, id)?;
        let reason = if current.status == JobStatus::Running {
            format!("job has been running for less than {} minutes", stale_after.num_minutes())
        } else {
            "only a RUNNING job can be reset as stale".to_string()
        };
        return Err(CoreError::InvalidTransition {
            from: current.status.as_str().to_string(),
            to: JobStatus::Pending.as_str().to_string(),
            reason,
        });
    }

    tracing::warn!(job_id = %id, "Stale job reset to PENDING");
    get(db, id)
}

/// RUNNING jobs started at or before `now - stale_after`, oldest first.
pub fn find_stale(db: &Database, stale_after: Duration, now: DateTime<Utc>) -> Result<Vec<Job>> {
    let cutoff = format_timestamp(now - stale_after);
    job_repo::find_stale_ids(db, &cutoff)?
        .iter()
        .map(|id| get(db, id))
        .collect()
}

fn enqueue_with(
    conn: &Connection,
    id: &str,
    job_type: JobType,
    params: &serde_json::Value,
    priority: i64,
    now: &str,
) -> std::result::Result<(), DatabaseError> {
    let task_params = serde_json::to_string(&serde_json::json!({
        "jobId": id,
        "params": params,
    }))?;
    queue_repo::insert_with(
        conn,
        &NewTaskRow {
            id,
            engine: DEFAULT_ENGINE,
            task_type: job_type.as_str(),
            params: &task_params,
            priority,
            created_at: now,
        },
    )?;
    Ok(())
}

/// Replaces any task still queued for `job` with a fresh one at the back
/// of its priority band.
fn requeue_with(conn: &Connection, job: &Job, now: &str) -> std::result::Result<(), DatabaseError> {
    queue_repo::delete_with(conn, &job.id)?;
    enqueue_with(conn, &job.id, job.job_type, &job.params, job.priority, now)
}

/// Explains why a conditional update touched no row.
fn diagnose(db: &Database, id: &str, target: JobStatus, now: DateTime<Utc>) -> CoreError {
    let current = match get(db, id) {
        Ok(job) => job,
        Err(e) => return e,
    };
    if target == JobStatus::Running {
        if let Err(e) = precheck_run(&current, now) {
            return e;
        }
    }
    match validate_transition(current.status, target) {
        Err(e) => e.into(),
        Ok(()) => conflict(&current, "concurrent update, try again"),
    }
}

fn conflict(job: &Job, reason: &str) -> CoreError {
    CoreError::Conflict {
        kind: "job",
        id: job.id.clone(),
        current: job.status.as_str().to_string(),
        reason: reason.to_string(),
    }
}
