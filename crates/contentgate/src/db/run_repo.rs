//! Scheduler run history repository. Rows are only ever appended.

use rusqlite::{params, Connection, OptionalExtension, Row};

use super::{Database, DatabaseError};

#[derive(Debug, Clone, PartialEq)]
pub struct RunRow {
    pub run_id: String,
    pub date: String,
    pub status: String,
    pub planned_count: i64,
    pub executed_count: i64,
    pub started_at: String,
    pub finished_at: Option<String>,
    pub log: String,
}

impl RunRow {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            run_id: row.get("run_id")?,
            date: row.get("date")?,
            status: row.get("status")?,
            planned_count: row.get("planned_count")?,
            executed_count: row.get("executed_count")?,
            started_at: row.get("started_at")?,
            finished_at: row.get("finished_at")?,
            log: row.get("log")?,
        })
    }
}

pub(crate) fn insert_with(conn: &Connection, run: &RunRow) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT INTO scheduler_runs
         (run_id, date, status, planned_count, executed_count, started_at, finished_at, log)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        params![
            run.run_id,
            run.date,
            run.status,
            run.planned_count,
            run.executed_count,
            run.started_at,
            run.finished_at,
            run.log,
        ],
    )?;
    Ok(())
}

pub fn insert(db: &Database, run: &RunRow) -> Result<(), DatabaseError> {
    db.with_conn(|conn| insert_with(conn, run))
}

pub fn find_by_id(db: &Database, run_id: &str) -> Result<Option<RunRow>, DatabaseError> {
    db.with_conn(|conn| {
        let row = conn
            .query_row(
                "SELECT * FROM scheduler_runs WHERE run_id = ?1",
                params![run_id],
                RunRow::from_row,
            )
            .optional()?;
        Ok(row)
    })
}

/// Most recent runs first.
pub fn list_recent(db: &Database, limit: u64) -> Result<Vec<RunRow>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare(
            "SELECT * FROM scheduler_runs ORDER BY started_at DESC, run_id ASC LIMIT ?1",
        )?;
        let rows = stmt
            .query_map(params![limit as i64], RunRow::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    })
}

/// Sum of `executed_count` over every run recorded for `date`.
pub(crate) fn executed_on_with(conn: &Connection, date: &str) -> Result<i64, DatabaseError> {
    let total: i64 = conn.query_row(
        "SELECT COALESCE(SUM(executed_count), 0) FROM scheduler_runs WHERE date = ?1",
        params![date],
        |r| r.get(0),
    )?;
    Ok(total)
}

pub fn executed_on(db: &Database, date: &str) -> Result<i64, DatabaseError> {
    db.with_conn(|conn| executed_on_with(conn, date))
}
