//! Append-only log of execution attempts.

use rusqlite::{params, Row};

use super::{Database, DatabaseError};

#[derive(Debug, Clone, PartialEq)]
pub struct AttemptRow {
    pub seq: i64,
    pub approval_id: String,
    pub principal_id: String,
    pub outcome: String,
    pub detail: Option<String>,
    pub attempted_at: String,
}

impl AttemptRow {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            seq: row.get("seq")?,
            approval_id: row.get("approval_id")?,
            principal_id: row.get("principal_id")?,
            outcome: row.get("outcome")?,
            detail: row.get("detail")?,
            attempted_at: row.get("attempted_at")?,
        })
    }
}

pub fn insert(
    db: &Database,
    approval_id: &str,
    principal_id: &str,
    outcome: &str,
    detail: Option<&str>,
    attempted_at: &str,
) -> Result<i64, DatabaseError> {
    db.with_conn(|conn| {
        conn.execute(
            "INSERT INTO execution_attempts (approval_id, principal_id, outcome, detail, attempted_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![approval_id, principal_id, outcome, detail, attempted_at],
        )?;
        Ok(conn.last_insert_rowid())
    })
}

/// Attempts for one approval in the order they happened.
pub fn list_for(db: &Database, approval_id: &str) -> Result<Vec<AttemptRow>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn
            .prepare("SELECT * FROM execution_attempts WHERE approval_id = ?1 ORDER BY seq ASC")?;
        let rows = stmt
            .query_map(params![approval_id], AttemptRow::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    })
}
