//! Scheduler run history: one append-only record per scheduler check.

use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::Connection;
use serde::{Deserialize, Serialize};

use crate::db::run_repo::{self, RunRow};
use crate::db::{Database, DatabaseError};
use crate::error::{CoreError, Result};
use crate::time::{format_date, format_timestamp, parse_timestamp};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Running,
    Success,
    Failed,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Running => "running",
            RunStatus::Success => "success",
            RunStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "running" => Some(RunStatus::Running),
            "success" => Some(RunStatus::Success),
            "failed" => Some(RunStatus::Failed),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SchedulerRun {
    pub run_id: String,
    pub date: NaiveDate,
    pub status: RunStatus,
    pub planned_count: u32,
    pub executed_count: u32,
    pub started_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    pub log: String,
}

impl SchedulerRun {
    fn from_row(row: RunRow) -> std::result::Result<Self, DatabaseError> {
        let bad = |what: &str| DatabaseError::corrupt("scheduler_runs", &row.run_id, what.to_string());
        let date = NaiveDate::parse_from_str(&row.date, "%Y-%m-%d").map_err(|_| bad("bad date"))?;
        let status = RunStatus::parse(&row.status).ok_or_else(|| bad("unknown status"))?;
        let started_at = parse_timestamp(&row.started_at).ok_or_else(|| bad("bad started_at"))?;
        let finished_at = match row.finished_at.as_deref() {
            Some(s) => Some(parse_timestamp(s).ok_or_else(|| bad("bad finished_at"))?),
            None => None,
        };
        Ok(Self {
            date,
            status,
            planned_count: u32::try_from(row.planned_count).unwrap_or(0),
            executed_count: u32::try_from(row.executed_count).unwrap_or(0),
            started_at,
            finished_at,
            log: row.log,
            run_id: row.run_id,
        })
    }

    /// A finished run, stamped with `now` as both start and finish time.
    pub fn finished(
        run_id: &str,
        date: NaiveDate,
        status: RunStatus,
        log: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            run_id: run_id.to_string(),
            date,
            status,
            planned_count: 0,
            executed_count: 0,
            started_at: now,
            finished_at: Some(now),
            log: log.into(),
        }
    }

    pub fn with_counts(mut self, planned: u32, executed: u32) -> Self {
        self.planned_count = planned;
        self.executed_count = executed;
        self
    }

    fn to_row(&self) -> RunRow {
        RunRow {
            run_id: self.run_id.clone(),
            date: format_date(self.date),
            status: self.status.as_str().to_string(),
            planned_count: i64::from(self.planned_count),
            executed_count: i64::from(self.executed_count),
            started_at: format_timestamp(self.started_at),
            finished_at: self.finished_at.map(format_timestamp),
            log: self.log.clone(),
        }
    }
}

/// Appends `run` on a connection that may be inside a transaction.
pub(crate) fn record_with(conn: &Connection, run: &SchedulerRun) -> std::result::Result<(), DatabaseError> {
    run_repo::insert_with(conn, &run.to_row())
}

/// Appends `run` to the history.
pub fn record(db: &Database, run: &SchedulerRun) -> Result<()> {
    if run.status == RunStatus::Running || run.finished_at.is_none() {
        return Err(CoreError::InvalidInput(
            "only finished runs are recorded".into(),
        ));
    }
    db.with_conn(|conn| record_with(conn, run))?;
    Ok(())
}

pub fn get(db: &Database, run_id: &str) -> Result<SchedulerRun> {
    let row = run_repo::find_by_id(db, run_id)?
        .ok_or_else(|| CoreError::not_found("scheduler run", run_id))?;
    Ok(SchedulerRun::from_row(row)?)
}

pub fn list_recent(db: &Database, limit: u64) -> Result<Vec<SchedulerRun>> {
    run_repo::list_recent(db, limit)?
        .into_iter()
        .map(|row| Ok(SchedulerRun::from_row(row)?))
        .collect()
}

/// Content units executed on `date` across all runs.
pub fn executed_on(db: &Database, date: NaiveDate) -> Result<u32> {
    Ok(db.with_conn(|conn| executed_on_with(conn, date))?)
}

pub(crate) fn executed_on_with(conn: &Connection, date: NaiveDate) -> std::result::Result<u32, DatabaseError> {
    let total = run_repo::executed_on_with(conn, &format_date(date))?;
    Ok(u32::try_from(total).unwrap_or(u32::MAX))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_record_and_sum() {
        let db = Database::open_in_memory().unwrap();
        let now = Utc.with_ymd_and_hms(2026, 6, 1, 9, 0, 0).unwrap();
        let date = now.date_naive();

        let run = SchedulerRun::finished("r1", date, RunStatus::Success, "ok", now).with_counts(4, 3);
        record(&db, &run).unwrap();
        record(
            &db,
            &SchedulerRun::finished("r2", date, RunStatus::Failed, "disk full", now),
        )
        .unwrap();

        let stored = get(&db, "r1").unwrap();
        assert_eq!(stored, run);
        assert_eq!(executed_on(&db, date).unwrap(), 3);
        assert!(record(&db, &run).is_err());
    }

    #[test]
    fn test_running_run_rejected() {
        let db = Database::open_in_memory().unwrap();
        let now = Utc.with_ymd_and_hms(2026, 6, 1, 9, 0, 0).unwrap();
        let run = SchedulerRun::finished("r1", now.date_naive(), RunStatus::Running, "", now);
        assert!(matches!(record(&db, &run), Err(CoreError::InvalidInput(_))));
    }

    #[test]
    fn test_list_recent() {
        let db = Database::open_in_memory().unwrap();
        let first = Utc.with_ymd_and_hms(2026, 6, 1, 9, 0, 0).unwrap();
        let second = Utc.with_ymd_and_hms(2026, 6, 2, 9, 0, 0).unwrap();
        for (id, at) in [("first", first), ("latest", second)] {
            let run = SchedulerRun::finished(id, at.date_naive(), RunStatus::Success, "", at);
            record(&db, &run).unwrap();
        }

        let runs = list_recent(&db, 1).unwrap();
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].run_id, "latest");
    }
}
