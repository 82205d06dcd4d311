//! Scheduled content repository.

use rusqlite::{params, Connection, OptionalExtension, Row};

use super::{Database, DatabaseError};

#[derive(Debug, Clone)]
pub struct ContentRow {
    pub id: String,
    pub content_type: String,
    pub title: String,
    pub document: String,
    pub status: String,
    pub scheduled_for: Option<String>,
    pub ready_at: Option<String>,
    pub published_at: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl ContentRow {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            id: row.get("id")?,
            content_type: row.get("content_type")?,
            title: row.get("title")?,
            document: row.get("document")?,
            status: row.get("status")?,
            scheduled_for: row.get("scheduled_for")?,
            ready_at: row.get("ready_at")?,
            published_at: row.get("published_at")?,
            created_at: row.get("created_at")?,
            updated_at: row.get("updated_at")?,
        })
    }
}

pub fn insert(db: &Database, content: &ContentRow) -> Result<(), DatabaseError> {
    db.with_conn(|conn| {
        conn.execute(
            "INSERT INTO scheduled_content (id, content_type, title, document, status,
             scheduled_for, ready_at, published_at, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                content.id,
                content.content_type,
                content.title,
                content.document,
                content.status,
                content.scheduled_for,
                content.ready_at,
                content.published_at,
                content.created_at,
                content.updated_at,
            ],
        )?;
        Ok(())
    })
}

pub fn find_by_id(db: &Database, id: &str) -> Result<Option<ContentRow>, DatabaseError> {
    db.with_conn(|conn| {
        let row = conn
            .query_row(
                "SELECT * FROM scheduled_content WHERE id = ?1",
                params![id],
                ContentRow::from_row,
            )
            .optional()?;
        Ok(row)
    })
}

/// Content with the given status, oldest first. `None` lists everything.
pub fn list(db: &Database, status: Option<&str>, limit: u64) -> Result<Vec<ContentRow>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare(
            "SELECT * FROM scheduled_content
             WHERE (?1 IS NULL OR status = ?1)
             ORDER BY created_at ASC, id ASC LIMIT ?2",
        )?;
        let rows = stmt
            .query_map(params![status, limit as i64], ContentRow::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    })
}

/// SCHEDULED content due at `now` (or with no due time), in due order.
pub(crate) fn due_candidates_with(conn: &Connection, now: &str) -> Result<Vec<ContentRow>, DatabaseError> {
    let mut stmt = conn.prepare(
        "SELECT * FROM scheduled_content
         WHERE status = 'SCHEDULED' AND (scheduled_for IS NULL OR scheduled_for <= ?1)
         ORDER BY COALESCE(scheduled_for, created_at) ASC, created_at ASC, id ASC",
    )?;
    let rows = stmt
        .query_map(params![now], ContentRow::from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn due_candidates(db: &Database, now: &str) -> Result<Vec<ContentRow>, DatabaseError> {
    db.with_conn(|conn| due_candidates_with(conn, now))
}

/// Conditional status change without side columns. Returns rows affected.
pub fn update_status(
    db: &Database,
    id: &str,
    from: &str,
    to: &str,
    now: &str,
) -> Result<usize, DatabaseError> {
    db.with_conn(|conn| {
        let changed = conn.execute(
            "UPDATE scheduled_content SET status = ?3, updated_at = ?4
             WHERE id = ?1 AND status = ?2",
            params![id, from, to, now],
        )?;
        Ok(changed)
    })
}

/// DRAFT -> SCHEDULED with a due time.
pub fn schedule(
    db: &Database,
    id: &str,
    scheduled_for: Option<&str>,
    now: &str,
) -> Result<usize, DatabaseError> {
    db.with_conn(|conn| {
        let changed = conn.execute(
            "UPDATE scheduled_content SET status = 'SCHEDULED', scheduled_for = ?2, updated_at = ?3
             WHERE id = ?1 AND status = 'DRAFT'",
            params![id, scheduled_for, now],
        )?;
        Ok(changed)
    })
}

/// SCHEDULED -> READY_TO_PUBLISH.
pub(crate) fn mark_ready_with(conn: &Connection, id: &str, now: &str) -> Result<usize, DatabaseError> {
    let changed = conn.execute(
        "UPDATE scheduled_content SET status = 'READY_TO_PUBLISH', ready_at = ?2, updated_at = ?2
         WHERE id = ?1 AND status = 'SCHEDULED'",
        params![id, now],
    )?;
    Ok(changed)
}

pub fn mark_ready(db: &Database, id: &str, now: &str) -> Result<usize, DatabaseError> {
    db.with_conn(|conn| mark_ready_with(conn, id, now))
}

/// READY_TO_PUBLISH -> PUBLISHED, only with a non-empty document.
pub fn publish(db: &Database, id: &str, now: &str) -> Result<usize, DatabaseError> {
    db.with_conn(|conn| {
        let changed = conn.execute(
            "UPDATE scheduled_content SET status = 'PUBLISHED', published_at = ?2, updated_at = ?2
             WHERE id = ?1 AND status = 'READY_TO_PUBLISH' AND TRIM(document) != ''
               AND published_at IS NULL",
            params![id, now],
        )?;
        Ok(changed)
    })
}

/// Replaces the document of content that is not yet published or archived.
pub fn update_document(db: &Database, id: &str, document: &str, now: &str) -> Result<usize, DatabaseError> {
    db.with_conn(|conn| {
        let changed = conn.execute(
            "UPDATE scheduled_content SET document = ?2, updated_at = ?3
             WHERE id = ?1 AND status IN ('DRAFT', 'SCHEDULED', 'READY_TO_PUBLISH')",
            params![id, document, now],
        )?;
        Ok(changed)
    })
}
