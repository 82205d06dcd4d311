//! Schedule and schedule-keyword repository.

use rusqlite::{params, Connection, OptionalExtension, Row};

use super::{Database, DatabaseError};

/// A raw schedule row.
#[derive(Debug, Clone)]
pub struct ScheduleRow {
    pub id: String,
    pub name: String,
    pub status: String,
    pub created_by: String,
    pub created_at: String,
    pub updated_at: String,
}

impl ScheduleRow {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            id: row.get("id")?,
            name: row.get("name")?,
            status: row.get("status")?,
            created_by: row.get("created_by")?,
            created_at: row.get("created_at")?,
            updated_at: row.get("updated_at")?,
        })
    }
}

/// A raw keyword row.
#[derive(Debug, Clone)]
pub struct KeywordRow {
    pub id: String,
    pub schedule_id: String,
    pub position: i64,
    pub keyword: String,
    pub status: String,
    pub error: Option<String>,
    pub updated_at: String,
}

impl KeywordRow {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            id: row.get("id")?,
            schedule_id: row.get("schedule_id")?,
            position: row.get("position")?,
            keyword: row.get("keyword")?,
            status: row.get("status")?,
            error: row.get("error")?,
            updated_at: row.get("updated_at")?,
        })
    }
}

/// Inserts a schedule together with its keywords.
pub fn insert(
    db: &Database,
    schedule: &ScheduleRow,
    keywords: &[KeywordRow],
) -> Result<(), DatabaseError> {
    db.with_tx(|conn| {
        conn.execute(
            "INSERT INTO schedules (id, name, status, created_by, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                schedule.id,
                schedule.name,
                schedule.status,
                schedule.created_by,
                schedule.created_at,
                schedule.updated_at,
            ],
        )?;
        for kw in keywords {
            insert_keyword_with(conn, kw)?;
        }
        Ok(())
    })
}

fn insert_keyword_with(conn: &Connection, kw: &KeywordRow) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT INTO schedule_keywords (id, schedule_id, position, keyword, status, error, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            kw.id,
            kw.schedule_id,
            kw.position,
            kw.keyword,
            kw.status,
            kw.error,
            kw.updated_at,
        ],
    )?;
    Ok(())
}

pub fn find_by_id(db: &Database, id: &str) -> Result<Option<ScheduleRow>, DatabaseError> {
    db.with_conn(|conn| {
        let row = conn
            .query_row(
                "SELECT * FROM schedules WHERE id = ?1",
                params![id],
                ScheduleRow::from_row,
            )
            .optional()?;
        Ok(row)
    })
}

/// All schedules, newest first.
pub fn list(db: &Database, limit: u64) -> Result<Vec<ScheduleRow>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt =
            conn.prepare("SELECT * FROM schedules ORDER BY created_at DESC, id ASC LIMIT ?1")?;
        let rows = stmt
            .query_map(params![limit as i64], ScheduleRow::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    })
}

/// Keywords of a schedule in position order.
pub fn keywords_for(db: &Database, schedule_id: &str) -> Result<Vec<KeywordRow>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare(
            "SELECT * FROM schedule_keywords WHERE schedule_id = ?1 ORDER BY position ASC",
        )?;
        let rows = stmt
            .query_map(params![schedule_id], KeywordRow::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    })
}

pub fn find_keyword(db: &Database, id: &str) -> Result<Option<KeywordRow>, DatabaseError> {
    db.with_conn(|conn| {
        let row = conn
            .query_row(
                "SELECT * FROM schedule_keywords WHERE id = ?1",
                params![id],
                KeywordRow::from_row,
            )
            .optional()?;
        Ok(row)
    })
}

/// Conditional schedule status change. Returns rows affected.
pub fn update_status(
    db: &Database,
    id: &str,
    from: &str,
    to: &str,
    now: &str,
) -> Result<usize, DatabaseError> {
    db.with_conn(|conn| {
        let changed = conn.execute(
            "UPDATE schedules SET status = ?3, updated_at = ?4 WHERE id = ?1 AND status = ?2",
            params![id, from, to, now],
        )?;
        Ok(changed)
    })
}

/// Outcome of a keyword claim attempt.
#[derive(Debug)]
pub enum KeywordClaim {
    Claimed(KeywordRow),
    /// The schedule is not ACTIVE; carries its current status.
    ScheduleInactive(String),
    NoneLeft,
    ScheduleMissing,
}

/// Moves the lowest-position PENDING keyword of an ACTIVE schedule to
/// PROCESSING.
pub fn claim_next_keyword(
    db: &Database,
    schedule_id: &str,
    now: &str,
) -> Result<KeywordClaim, DatabaseError> {
    db.with_tx(|conn| {
        let status: Option<String> = conn
            .query_row(
                "SELECT status FROM schedules WHERE id = ?1",
                params![schedule_id],
                |r| r.get(0),
            )
            .optional()?;
        match status {
            None => return Ok(KeywordClaim::ScheduleMissing),
            Some(s) if s != "ACTIVE" => return Ok(KeywordClaim::ScheduleInactive(s)),
            Some(_) => {}
        }

        let next = conn
            .query_row(
                "SELECT * FROM schedule_keywords
                 WHERE schedule_id = ?1 AND status = 'PENDING'
                 ORDER BY position ASC LIMIT 1",
                params![schedule_id],
                KeywordRow::from_row,
            )
            .optional()?;
        let Some(mut kw) = next else {
            return Ok(KeywordClaim::NoneLeft);
        };

        conn.execute(
            "UPDATE schedule_keywords SET status = 'PROCESSING', updated_at = ?2
             WHERE id = ?1 AND status = 'PENDING'",
            params![kw.id, now],
        )?;
        kw.status = "PROCESSING".to_string();
        kw.updated_at = now.to_string();
        Ok(KeywordClaim::Claimed(kw))
    })
}

/// Conditional keyword status change. `error` replaces the stored error.
pub fn update_keyword_status(
    db: &Database,
    id: &str,
    from: &str,
    to: &str,
    error: Option<&str>,
    now: &str,
) -> Result<usize, DatabaseError> {
    db.with_conn(|conn| {
        let changed = conn.execute(
            "UPDATE schedule_keywords SET status = ?3, error = ?4, updated_at = ?5
             WHERE id = ?1 AND status = ?2",
            params![id, from, to, error, now],
        )?;
        Ok(changed)
    })
}
