//! Schedules and their keyword sub-tasks.
//!
//! A schedule's persisted status never drives decisions directly: it is
//! first mapped onto [`WorkflowStatus`] and every pause/resume/cancel goes
//! through that table. Keyword status changes never touch the schedule.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::workflow::{can_cancel, can_pause, can_resume, WorkflowStatus};
use super::{validate_transition, Lifecycle};
use crate::db::schedule_repo::{self, KeywordClaim, KeywordRow, ScheduleRow};
use crate::db::{Database, DatabaseError};
use crate::error::{CoreError, Result};
use crate::time::{format_timestamp, parse_timestamp};

/// Persisted schedule status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ScheduleStatus {
    Active,
    Paused,
    Completed,
    Cancelled,
}

impl ScheduleStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScheduleStatus::Active => "ACTIVE",
            ScheduleStatus::Paused => "PAUSED",
            ScheduleStatus::Completed => "COMPLETED",
            ScheduleStatus::Cancelled => "CANCELLED",
        }
    }

    /// Decodes a stored status. Rows written before COMPLETED and
    /// CANCELLED were split hold `FINISHED`, which reads as COMPLETED.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "ACTIVE" => Some(ScheduleStatus::Active),
            "PAUSED" => Some(ScheduleStatus::Paused),
            "COMPLETED" | "FINISHED" => Some(ScheduleStatus::Completed),
            "CANCELLED" => Some(ScheduleStatus::Cancelled),
            _ => None,
        }
    }

    pub fn workflow_status(&self) -> WorkflowStatus {
        match self {
            ScheduleStatus::Active => WorkflowStatus::Scheduled,
            ScheduleStatus::Paused => WorkflowStatus::Paused,
            ScheduleStatus::Completed => WorkflowStatus::Completed,
            ScheduleStatus::Cancelled => WorkflowStatus::Cancelled,
        }
    }

    /// Inverse of [`workflow_status`](Self::workflow_status) for the states
    /// a schedule can be moved into.
    pub fn from_workflow(status: WorkflowStatus) -> Option<Self> {
        match status {
            WorkflowStatus::Scheduled => Some(ScheduleStatus::Active),
            WorkflowStatus::Paused => Some(ScheduleStatus::Paused),
            WorkflowStatus::Completed => Some(ScheduleStatus::Completed),
            WorkflowStatus::Cancelled => Some(ScheduleStatus::Cancelled),
            WorkflowStatus::Running | WorkflowStatus::Failed => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.workflow_status().is_terminal()
    }
}

impl std::fmt::Display for ScheduleStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum KeywordStatus {
    Pending,
    Processing,
    Done,
    Failed,
}

impl KeywordStatus {
    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|st| st.as_str() == s)
    }
}

impl Lifecycle for KeywordStatus {
    const ALL: &'static [Self] = &[
        KeywordStatus::Pending,
        KeywordStatus::Processing,
        KeywordStatus::Done,
        KeywordStatus::Failed,
    ];

    fn as_str(&self) -> &'static str {
        match self {
            KeywordStatus::Pending => "PENDING",
            KeywordStatus::Processing => "PROCESSING",
            KeywordStatus::Done => "DONE",
            KeywordStatus::Failed => "FAILED",
        }
    }

    fn can_transition_to(&self, target: KeywordStatus) -> bool {
        use KeywordStatus::*;
        matches!(
            (self, target),
            (Pending, Processing) | (Processing, Done) | (Processing, Failed) | (Failed, Pending)
        )
    }

    fn is_terminal(&self) -> bool {
        matches!(self, KeywordStatus::Done)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ScheduleKeyword {
    pub id: String,
    pub schedule_id: String,
    pub position: i64,
    pub keyword: String,
    pub status: KeywordStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl ScheduleKeyword {
    fn from_row(row: KeywordRow) -> std::result::Result<Self, DatabaseError> {
        let status = KeywordStatus::parse(&row.status).ok_or_else(|| {
            DatabaseError::corrupt(
                "schedule_keywords",
                &row.id,
                format!("unknown status '{}'", row.status),
            )
        })?;
        let updated_at = parse_timestamp(&row.updated_at).ok_or_else(|| {
            DatabaseError::corrupt("schedule_keywords", &row.id, "bad updated_at")
        })?;
        Ok(Self {
            id: row.id,
            schedule_id: row.schedule_id,
            position: row.position,
            keyword: row.keyword,
            status,
            error: row.error,
            updated_at,
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Schedule {
    pub id: String,
    pub name: String,
    pub status: ScheduleStatus,
    /// Derived from `status`; what pause/resume/cancel decisions use.
    pub workflow_status: WorkflowStatus,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub keywords: Vec<ScheduleKeyword>,
}

impl Schedule {
    fn from_rows(
        row: ScheduleRow,
        keywords: Vec<KeywordRow>,
    ) -> std::result::Result<Self, DatabaseError> {
        let status = ScheduleStatus::parse(&row.status).ok_or_else(|| {
            DatabaseError::corrupt("schedules", &row.id, format!("unknown status '{}'", row.status))
        })?;
        let created_at = parse_timestamp(&row.created_at)
            .ok_or_else(|| DatabaseError::corrupt("schedules", &row.id, "bad created_at"))?;
        let updated_at = parse_timestamp(&row.updated_at)
            .ok_or_else(|| DatabaseError::corrupt("schedules", &row.id, "bad updated_at"))?;
        let keywords = keywords
            .into_iter()
            .map(ScheduleKeyword::from_row)
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(Self {
            id: row.id,
            name: row.name,
            status,
            workflow_status: status.workflow_status(),
            created_by: row.created_by,
            created_at,
            updated_at,
            keywords,
        })
    }
}

/// Creates an ACTIVE schedule with one PENDING keyword per entry.
pub fn create(
    db: &Database,
    name: &str,
    keywords: &[String],
    created_by: &str,
    now: DateTime<Utc>,
) -> Result<Schedule> {
    if name.trim().is_empty() {
        return Err(CoreError::InvalidInput("schedule name must not be empty".into()));
    }
    if keywords.iter().any(|k| k.trim().is_empty()) {
        return Err(CoreError::InvalidInput("keywords must not be empty".into()));
    }

    let id = Uuid::new_v4().to_string();
    let now_str = format_timestamp(now);
    let row = ScheduleRow {
        id: id.clone(),
        name: name.to_string(),
        status: ScheduleStatus::Active.as_str().to_string(),
        created_by: created_by.to_string(),
        created_at: now_str.clone(),
        updated_at: now_str.clone(),
    };
    let keyword_rows: Vec<KeywordRow> = keywords
        .iter()
        .enumerate()
        .map(|(position, keyword)| KeywordRow {
            id: Uuid::new_v4().to_string(),
            schedule_id: id.clone(),
            position: position as i64,
            keyword: keyword.trim().to_string(),
            status: KeywordStatus::Pending.as_str().to_string(),
            error: None,
            updated_at: now_str.clone(),
        })
        .collect();

    schedule_repo::insert(db, &row, &keyword_rows)?;
    tracing::info!(schedule_id = %id, keywords = keyword_rows.len(), "Schedule created");
    get(db, &id)
}

pub fn get(db: &Database, id: &str) -> Result<Schedule> {
    let row = schedule_repo::find_by_id(db, id)?
        .ok_or_else(|| CoreError::not_found("schedule", id))?;
    let keywords = schedule_repo::keywords_for(db, id)?;
    Ok(Schedule::from_rows(row, keywords)?)
}

pub fn list(db: &Database, limit: u64) -> Result<Vec<Schedule>> {
    schedule_repo::list(db, limit)?
        .into_iter()
        .map(|row| {
            let keywords = schedule_repo::keywords_for(db, &row.id)?;
            Ok(Schedule::from_rows(row, keywords)?)
        })
        .collect()
}

pub fn pause(db: &Database, id: &str, now: DateTime<Utc>) -> Result<Schedule> {
    transition(db, id, "pause", can_pause, WorkflowStatus::Paused, now)
}

pub fn resume(db: &Database, id: &str, now: DateTime<Utc>) -> Result<Schedule> {
    transition(db, id, "resume", can_resume, WorkflowStatus::Scheduled, now)
}

pub fn cancel(db: &Database, id: &str, now: DateTime<Utc>) -> Result<Schedule> {
    transition(db, id, "cancel", can_cancel, WorkflowStatus::Cancelled, now)
}

/// Marks a schedule as finished normally.
pub fn complete(db: &Database, id: &str, now: DateTime<Utc>) -> Result<Schedule> {
    transition(
        db,
        id,
        "complete",
        |s| s.can_transition_to(WorkflowStatus::Completed),
        WorkflowStatus::Completed,
        now,
    )
}

fn transition(
    db: &Database,
    id: &str,
    operation: &str,
    capability: impl Fn(WorkflowStatus) -> bool,
    target: WorkflowStatus,
    now: DateTime<Utc>,
) -> Result<Schedule> {
    let current = get(db, id)?;
    let from = current.workflow_status;

    if !capability(from) {
        validate_transition(from, target)?;
        return Err(CoreError::InvalidTransition {
            from: from.as_str().to_string(),
            to: target.as_str().to_string(),
            reason: format!("cannot {} a schedule that is {}", operation, from),
        });
    }
    validate_transition(from, target)?;

    let to = ScheduleStatus::from_workflow(target).ok_or_else(|| {
        CoreError::InvalidInput(format!("{} is not a persisted schedule state", target))
    })?;

    let changed = schedule_repo::update_status(
        db,
        id,
        current.status.as_str(),
        to.as_str(),
        &format_timestamp(now),
    )?;
    if changed == 0 {
        let latest = get(db, id)?;
        validate_transition(latest.workflow_status, target)?;
        return Err(CoreError::Conflict {
            kind: "schedule",
            id: id.to_string(),
            current: latest.status.as_str().to_string(),
            reason: "concurrent update, try again".to_string(),
        });
    }

    tracing::info!(schedule_id = %id, from = %current.status, to = %to, "Schedule {}", operation);
    get(db, id)
}

fn get_keyword(db: &Database, keyword_id: &str) -> Result<ScheduleKeyword> {
    let row = schedule_repo::find_keyword(db, keyword_id)?
        .ok_or_else(|| CoreError::not_found("keyword", keyword_id))?;
    Ok(ScheduleKeyword::from_row(row)?)
}

/// Claims the next PENDING keyword of an ACTIVE schedule. `None` when
/// every keyword has been claimed.
pub fn claim_next_keyword(
    db: &Database,
    schedule_id: &str,
    now: DateTime<Utc>,
) -> Result<Option<ScheduleKeyword>> {
    match schedule_repo::claim_next_keyword(db, schedule_id, &format_timestamp(now))? {
        KeywordClaim::Claimed(row) => {
            let kw = ScheduleKeyword::from_row(row)?;
            tracing::info!(schedule_id, keyword_id = %kw.id, keyword = %kw.keyword, "Keyword claimed");
            Ok(Some(kw))
        }
        KeywordClaim::NoneLeft => Ok(None),
        KeywordClaim::ScheduleMissing => Err(CoreError::not_found("schedule", schedule_id)),
        KeywordClaim::ScheduleInactive(status) => Err(CoreError::InvalidTransition {
            from: KeywordStatus::Pending.as_str().to_string(),
            to: KeywordStatus::Processing.as_str().to_string(),
            reason: format!("schedule is {}; keywords are claimed only while ACTIVE", status),
        }),
    }
}

pub fn mark_keyword_done(db: &Database, keyword_id: &str, now: DateTime<Utc>) -> Result<ScheduleKeyword> {
    keyword_transition(db, keyword_id, KeywordStatus::Done, None, now)
}

pub fn mark_keyword_failed(
    db: &Database,
    keyword_id: &str,
    error: &str,
    now: DateTime<Utc>,
) -> Result<ScheduleKeyword> {
    keyword_transition(db, keyword_id, KeywordStatus::Failed, Some(error), now)
}

/// FAILED -> PENDING, clearing the error.
pub fn retry_keyword(db: &Database, keyword_id: &str, now: DateTime<Utc>) -> Result<ScheduleKeyword> {
    keyword_transition(db, keyword_id, KeywordStatus::Pending, None, now)
}

fn keyword_transition(
    db: &Database,
    keyword_id: &str,
    target: KeywordStatus,
    error: Option<&str>,
    now: DateTime<Utc>,
) -> Result<ScheduleKeyword> {
    let current = get_keyword(db, keyword_id)?;
    validate_transition(current.status, target)?;

    let changed = schedule_repo::update_keyword_status(
        db,
        keyword_id,
        current.status.as_str(),
        target.as_str(),
        error,
        &format_timestamp(now),
    )?;
    if changed == 0 {
        let latest = get_keyword(db, keyword_id)?;
        validate_transition(latest.status, target)?;
        return Err(CoreError::Conflict {
            kind: "keyword",
            id: keyword_id.to_string(),
            current: latest.status.as_str().to_string(),
            reason: "concurrent update, try again".to_string(),
        });
    }

    tracing::info!(keyword_id, from = %current.status.as_str(), to = %target.as_str(), "Keyword updated");
    get_keyword(db, keyword_id)
}
