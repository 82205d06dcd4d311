//! Work queue repository.
//!
//! Rows are ordered by `priority DESC, created_at ASC, seq ASC`. `seq` is
//! an autoincrement column, so two tasks created in the same millisecond
//! keep their insertion order.

use rusqlite::{params, Connection, OptionalExtension, Row};

use super::{Database, DatabaseError};

const ORDER_BY: &str = "ORDER BY priority DESC, created_at ASC, seq ASC";

/// A raw queue row.
#[derive(Debug, Clone)]
pub struct QueueRow {
    pub seq: i64,
    pub id: String,
    pub engine: String,
    pub task_type: String,
    pub params: String,
    pub priority: i64,
    pub created_at: String,
}

impl QueueRow {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            seq: row.get("seq")?,
            id: row.get("id")?,
            engine: row.get("engine")?,
            task_type: row.get("task_type")?,
            params: row.get("params")?,
            priority: row.get("priority")?,
            created_at: row.get("created_at")?,
        })
    }
}

/// Insert parameters for a queue task.
#[derive(Debug, Clone, Copy)]
pub struct NewTaskRow<'a> {
    pub id: &'a str,
    pub engine: &'a str,
    pub task_type: &'a str,
    pub params: &'a str,
    pub priority: i64,
    pub created_at: &'a str,
}

/// Inserts a task, returning its sequence number.
pub(crate) fn insert_with(conn: &Connection, task: &NewTaskRow<'_>) -> Result<i64, DatabaseError> {
    conn.execute(
        "INSERT INTO work_queue (id, engine, task_type, params, priority, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            task.id,
            task.engine,
            task.task_type,
            task.params,
            task.priority,
            task.created_at,
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

pub fn insert(db: &Database, task: &NewTaskRow<'_>) -> Result<i64, DatabaseError> {
    db.with_conn(|conn| insert_with(conn, task))
}

/// Deletes the task with the given id. Returns the number removed.
pub(crate) fn delete_with(conn: &Connection, id: &str) -> Result<usize, DatabaseError> {
    Ok(conn.execute("DELETE FROM work_queue WHERE id = ?1", params![id])?)
}

/// Returns up to `limit` tasks in queue order.
pub fn peek(db: &Database, limit: u64) -> Result<Vec<QueueRow>, DatabaseError> {
    db.with_conn(|conn| {
        let sql = format!("SELECT * FROM work_queue {} LIMIT ?1", ORDER_BY);
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params![limit as i64], QueueRow::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    })
}

/// Removes and returns the head task for `engine`.
pub fn take_next(db: &Database, engine: &str) -> Result<Option<QueueRow>, DatabaseError> {
    db.with_tx(|conn| {
        let sql = format!("SELECT * FROM work_queue WHERE engine = ?1 {} LIMIT 1", ORDER_BY);
        let head = conn
            .query_row(&sql, params![engine], QueueRow::from_row)
            .optional()?;
        if let Some(ref row) = head {
            conn.execute("DELETE FROM work_queue WHERE seq = ?1", params![row.seq])?;
        }
        Ok(head)
    })
}

/// Deletes every task. Returns the number removed.
pub fn clear(db: &Database) -> Result<usize, DatabaseError> {
    db.with_conn(|conn| Ok(conn.execute("DELETE FROM work_queue", [])?))
}

pub fn count(db: &Database) -> Result<u64, DatabaseError> {
    db.with_conn(|conn| {
        let count: u64 = conn.query_row("SELECT COUNT(*) FROM work_queue", [], |r| r.get(0))?;
        Ok(count)
    })
}
