//! Job repository: CRUD and conditional state updates for the `jobs` table.
//!
//! State-changing functions return the number of rows they touched. Each
//! is a single `UPDATE ... WHERE status = ...` statement, so a return value
//! of `0` means the precondition did not hold at write time.

use rusqlite::{params, Connection, Row};

use super::{Database, DatabaseError};

/// A raw job row from the database.
#[derive(Debug, Clone)]
pub struct JobRow {
    pub id: String,
    pub job_type: String,
    pub status: String,
    pub requested_by: String,
    pub scheduled_at: Option<String>,
    pub started_at: Option<String>,
    pub finished_at: Option<String>,
    pub params: String,
    pub result: Option<String>,
    pub error: Option<String>,
    pub priority: i64,
    pub created_at: String,
    pub updated_at: String,
}

impl JobRow {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            id: row.get("id")?,
            job_type: row.get("job_type")?,
            status: row.get("status")?,
            requested_by: row.get("requested_by")?,
            scheduled_at: row.get("scheduled_at")?,
            started_at: row.get("started_at")?,
            finished_at: row.get("finished_at")?,
            params: row.get("params")?,
            result: row.get("result")?,
            error: row.get("error")?,
            priority: row.get("priority")?,
            created_at: row.get("created_at")?,
            updated_at: row.get("updated_at")?,
        })
    }
}

/// Query filter parameters for job listing.
#[derive(Debug, Default, Clone)]
pub struct JobRowFilter {
    pub status: Option<String>,
    pub job_type: Option<String>,
    pub requested_by: Option<String>,
    pub limit: Option<u64>,
    pub offset: Option<u64>,
}

pub(crate) fn insert_with(conn: &Connection, job: &JobRow) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT INTO jobs (id, job_type, status, requested_by, scheduled_at, started_at,
         finished_at, params, result, error, priority, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
        params![
            job.id,
            job.job_type,
            job.status,
            job.requested_by,
            job.scheduled_at,
            job.started_at,
            job.finished_at,
            job.params,
            job.result,
            job.error,
            job.priority,
            job.created_at,
            job.updated_at,
        ],
    )?;
    Ok(())
}

/// Inserts a new job row.
pub fn insert(db: &Database, job: &JobRow) -> Result<(), DatabaseError> {
    db.with_conn(|conn| insert_with(conn, job))
}

/// Finds a job by its ID.
pub fn find_by_id(db: &Database, id: &str) -> Result<Option<JobRow>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare("SELECT * FROM jobs WHERE id = ?1")?;
        let mut rows = stmt.query_map(params![id], JobRow::from_row)?;
        match rows.next() {
            Some(Ok(row)) => Ok(Some(row)),
            Some(Err(e)) => Err(DatabaseError::Sqlite(e)),
            None => Ok(None),
        }
    })
}

/// Queries jobs with filters, returning (rows, total_count). Newest first.
pub fn query(db: &Database, filter: &JobRowFilter) -> Result<(Vec<JobRow>, u64), DatabaseError> {
    db.with_conn(|conn| {
        let mut conditions = Vec::new();
        let mut param_values: Vec<Box<dyn rusqlite::types::ToSql>> = Vec::new();

        if let Some(ref status) = filter.status {
            conditions.push(format!("status = ?{}", param_values.len() + 1));
            param_values.push(Box::new(status.clone()));
        }
        if let Some(ref job_type) = filter.job_type {
            conditions.push(format!("job_type = ?{}", param_values.len() + 1));
            param_values.push(Box::new(job_type.clone()));
        }
        if let Some(ref requested_by) = filter.requested_by {
            conditions.push(format!("requested_by = ?{}", param_values.len() + 1));
            param_values.push(Box::new(requested_by.clone()));
        }

        let where_clause = if conditions.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", conditions.join(" AND "))
        };

        let count_sql = format!("SELECT COUNT(*) FROM jobs {}", where_clause);
        let params_ref: Vec<&dyn rusqlite::types::ToSql> =
            param_values.iter().map(|p| p.as_ref()).collect();
        let total: u64 = conn.query_row(&count_sql, params_ref.as_slice(), |r| r.get(0))?;

        let limit = filter.limit.unwrap_or(100) as i64;
        let offset = filter.offset.unwrap_or(0) as i64;
        param_values.push(Box::new(limit));
        param_values.push(Box::new(offset));
        let query_sql = format!(
            "SELECT * FROM jobs {} ORDER BY created_at DESC, id ASC LIMIT ?{} OFFSET ?{}",
            where_clause,
            param_values.len() - 1,
            param_values.len()
        );

        let params_ref: Vec<&dyn rusqlite::types::ToSql> =
            param_values.iter().map(|p| p.as_ref()).collect();
        let mut stmt = conn.prepare(&query_sql)?;
        let rows: Vec<JobRow> = stmt
            .query_map(params_ref.as_slice(), JobRow::from_row)?
            .collect::<Result<Vec<_>, _>>()?;

        Ok((rows, total))
    })
}

/// Counts jobs with the given status.
pub fn count_by_status(db: &Database, status: &str) -> Result<u64, DatabaseError> {
    db.with_conn(|conn| {
        let count: u64 = conn.query_row(
            "SELECT COUNT(*) FROM jobs WHERE status = ?1",
            params![status],
            |r| r.get(0),
        )?;
        Ok(count)
    })
}

/// PENDING -> RUNNING, only if the job is due at `now`.
pub fn claim(db: &Database, id: &str, now: &str) -> Result<usize, DatabaseError> {
    db.with_conn(|conn| {
        let changed = conn.execute(
            "UPDATE jobs SET status = 'RUNNING', started_at = ?2, updated_at = ?2
             WHERE id = ?1 AND status = 'PENDING'
               AND (scheduled_at IS NULL OR scheduled_at <= ?2)",
            params![id, now],
        )?;
        Ok(changed)
    })
}

/// RUNNING -> COMPLETED | FAILED.
pub fn finish(
    db: &Database,
    id: &str,
    status: &str,
    result: Option<&str>,
    error: Option<&str>,
    now: &str,
) -> Result<usize, DatabaseError> {
    db.with_conn(|conn| {
        let changed = conn.execute(
            "UPDATE jobs SET status = ?2, result = ?3, error = ?4, finished_at = ?5, updated_at = ?5
             WHERE id = ?1 AND status = 'RUNNING'",
            params![id, status, result, error, now],
        )?;
        Ok(changed)
    })
}

/// FAILED -> PENDING, clearing everything the previous attempt recorded.
pub(crate) fn reset_failed_with(conn: &Connection, id: &str, now: &str) -> Result<usize, DatabaseError> {
    let changed = conn.execute(
        "UPDATE jobs SET status = 'PENDING', error = NULL, result = NULL,
         started_at = NULL, finished_at = NULL, updated_at = ?2
         WHERE id = ?1 AND status = 'FAILED'",
        params![id, now],
    )?;
    Ok(changed)
}

pub fn reset_failed(db: &Database, id: &str, now: &str) -> Result<usize, DatabaseError> {
    db.with_conn(|conn| reset_failed_with(conn, id, now))
}

/// PENDING | FAILED -> SKIPPED.
pub(crate) fn skip_with(conn: &Connection, id: &str, now: &str) -> Result<usize, DatabaseError> {
    let changed = conn.execute(
        "UPDATE jobs SET status = 'SKIPPED', finished_at = ?2, updated_at = ?2
         WHERE id = ?1 AND status IN ('PENDING', 'FAILED')",
        params![id, now],
    )?;
    Ok(changed)
}

pub fn skip(db: &Database, id: &str, now: &str) -> Result<usize, DatabaseError> {
    db.with_conn(|conn| skip_with(conn, id, now))
}

/// RUNNING -> PENDING for a job whose `started_at` is at or before `cutoff`.
pub(crate) fn reset_stale_with(
    conn: &Connection,
    id: &str,
    cutoff: &str,
    now: &str,
) -> Result<usize, DatabaseError> {
    let changed = conn.execute(
        "UPDATE jobs SET status = 'PENDING', started_at = NULL, updated_at = ?3
         WHERE id = ?1 AND status = 'RUNNING' AND started_at <= ?2",
        params![id, cutoff, now],
    )?;
    Ok(changed)
}

pub fn reset_stale(db: &Database, id: &str, cutoff: &str, now: &str) -> Result<usize, DatabaseError> {
    db.with_conn(|conn| reset_stale_with(conn, id, cutoff, now))
}

/// IDs of RUNNING jobs whose `started_at` is at or before `cutoff`.
pub fn find_stale_ids(db: &Database, cutoff: &str) -> Result<Vec<String>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare(
            "SELECT id FROM jobs WHERE status = 'RUNNING' AND started_at <= ?1
             ORDER BY started_at ASC",
        )?;
        let ids = stmt
            .query_map(params![cutoff], |r| r.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(ids)
    })
}
