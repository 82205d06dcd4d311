//! Action approval repository.
//!
//! Execution is a two-step write: a claim that only one caller can take,
//! then a finalize conditioned on that claim and on `executed_at IS NULL`.

use rusqlite::{params, OptionalExtension, Row};

use super::{Database, DatabaseError};

#[derive(Debug, Clone)]
pub struct ApprovalRow {
    pub id: String,
    pub action: String,
    pub category: String,
    pub target_id: String,
    pub payload: String,
    pub status: String,
    pub proposed_by: String,
    pub decided_by: Option<String>,
    pub decided_at: Option<String>,
    pub execution_claim: Option<String>,
    pub claimed_at: Option<String>,
    pub executed_at: Option<String>,
    pub executed_by: Option<String>,
    pub result: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl ApprovalRow {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            id: row.get("id")?,
            action: row.get("action")?,
            category: row.get("category")?,
            target_id: row.get("target_id")?,
            payload: row.get("payload")?,
            status: row.get("status")?,
            proposed_by: row.get("proposed_by")?,
            decided_by: row.get("decided_by")?,
            decided_at: row.get("decided_at")?,
            execution_claim: row.get("execution_claim")?,
            claimed_at: row.get("claimed_at")?,
            executed_at: row.get("executed_at")?,
            executed_by: row.get("executed_by")?,
            result: row.get("result")?,
            created_at: row.get("created_at")?,
            updated_at: row.get("updated_at")?,
        })
    }
}

pub fn insert(db: &Database, row: &ApprovalRow) -> Result<(), DatabaseError> {
    db.with_conn(|conn| {
        conn.execute(
            "INSERT INTO action_approvals (id, action, category, target_id, payload, status,
             proposed_by, decided_by, decided_at, execution_claim, claimed_at, executed_at,
             executed_by, result, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)",
            params![
                row.id,
                row.action,
                row.category,
                row.target_id,
                row.payload,
                row.status,
                row.proposed_by,
                row.decided_by,
                row.decided_at,
                row.execution_claim,
                row.claimed_at,
                row.executed_at,
                row.executed_by,
                row.result,
                row.created_at,
                row.updated_at,
            ],
        )?;
        Ok(())
    })
}

pub fn find_by_id(db: &Database, id: &str) -> Result<Option<ApprovalRow>, DatabaseError> {
    db.with_conn(|conn| {
        let row = conn
            .query_row(
                "SELECT * FROM action_approvals WHERE id = ?1",
                params![id],
                ApprovalRow::from_row,
            )
            .optional()?;
        Ok(row)
    })
}

/// Approvals, newest first, optionally filtered by status.
pub fn list(db: &Database, status: Option<&str>, limit: u64) -> Result<Vec<ApprovalRow>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare(
            "SELECT * FROM action_approvals WHERE (?1 IS NULL OR status = ?1)
             ORDER BY created_at DESC, id ASC LIMIT ?2",
        )?;
        let rows = stmt
            .query_map(params![status, limit as i64], ApprovalRow::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    })
}

/// PENDING -> APPROVED | REJECTED.
pub fn decide(
    db: &Database,
    id: &str,
    to: &str,
    decided_by: &str,
    now: &str,
) -> Result<usize, DatabaseError> {
    db.with_conn(|conn| {
        let changed = conn.execute(
            "UPDATE action_approvals SET status = ?2, decided_by = ?3, decided_at = ?4, updated_at = ?4
             WHERE id = ?1 AND status = 'PENDING'",
            params![id, to, decided_by, now],
        )?;
        Ok(changed)
    })
}

/// Takes the execution claim. Succeeds for at most one caller. A claim
/// taken at or before `expired_before` counts as abandoned and is replaced.
pub fn claim_execution(
    db: &Database,
    id: &str,
    token: &str,
    now: &str,
    expired_before: &str,
) -> Result<usize, DatabaseError> {
    db.with_conn(|conn| {
        let changed = conn.execute(
            "UPDATE action_approvals SET execution_claim = ?2, claimed_at = ?3, updated_at = ?3
             WHERE id = ?1 AND status = 'APPROVED' AND executed_at IS NULL
               AND (execution_claim IS NULL OR claimed_at IS NULL OR claimed_at <= ?4)",
            params![id, token, now, expired_before],
        )?;
        Ok(changed)
    })
}

/// Gives up a claim after a failed handler.
pub fn release_claim(db: &Database, id: &str, token: &str, now: &str) -> Result<usize, DatabaseError> {
    db.with_conn(|conn| {
        let changed = conn.execute(
            "UPDATE action_approvals SET execution_claim = NULL, claimed_at = NULL, updated_at = ?3
             WHERE id = ?1 AND execution_claim = ?2 AND executed_at IS NULL",
            params![id, token, now],
        )?;
        Ok(changed)
    })
}

/// Drops whatever claim is held on an unexecuted approval.
pub fn clear_claim(db: &Database, id: &str, now: &str) -> Result<usize, DatabaseError> {
    db.with_conn(|conn| {
        let changed = conn.execute(
            "UPDATE action_approvals SET execution_claim = NULL, claimed_at = NULL, updated_at = ?2
             WHERE id = ?1 AND execution_claim IS NOT NULL AND executed_at IS NULL",
            params![id, now],
        )?;
        Ok(changed)
    })
}

/// APPROVED -> EXECUTED for the claim holder. `executed_at` is written once.
pub fn finalize(
    db: &Database,
    id: &str,
    token: &str,
    executed_by: &str,
    result: &str,
    now: &str,
) -> Result<usize, DatabaseError> {
    db.with_conn(|conn| {
        let changed = conn.execute(
            "UPDATE action_approvals
             SET status = 'EXECUTED', executed_at = ?5, executed_by = ?3, result = ?4, updated_at = ?5
             WHERE id = ?1 AND execution_claim = ?2 AND executed_at IS NULL",
            params![id, token, executed_by, result, now],
        )?;
        Ok(changed)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const TS: &str = "2026-01-01T00:00:00.000Z";
    const LATER: &str = "2026-01-01T00:20:00.000Z";
    const NO_EXPIRY: &str = "1970-01-01T00:00:00.000Z";

    fn approved(id: &str) -> ApprovalRow {
        ApprovalRow {
            id: id.to_string(),
            action: "PROMOTE".to_string(),
            category: "marketing".to_string(),
            target_id: "p1".to_string(),
            payload: "{}".to_string(),
            status: "APPROVED".to_string(),
            proposed_by: "admin".to_string(),
            decided_by: Some("admin".to_string()),
            decided_at: Some(TS.to_string()),
            execution_claim: None,
            claimed_at: None,
            executed_at: None,
            executed_by: None,
            result: None,
            created_at: TS.to_string(),
            updated_at: TS.to_string(),
        }
    }

    #[test]
    fn test_claim_is_exclusive() {
        let db = Database::open_in_memory().unwrap();
        insert(&db, &approved("a1")).unwrap();

        assert_eq!(claim_execution(&db, "a1", "t1", TS, NO_EXPIRY).unwrap(), 1);
        assert_eq!(claim_execution(&db, "a1", "t2", TS, NO_EXPIRY).unwrap(), 0);
    }

    #[test]
    fn test_release_then_reclaim() {
        let db = Database::open_in_memory().unwrap();
        insert(&db, &approved("a1")).unwrap();
        claim_execution(&db, "a1", "t1", TS, NO_EXPIRY).unwrap();

        assert_eq!(release_claim(&db, "a1", "other", TS).unwrap(), 0);
        assert_eq!(release_claim(&db, "a1", "t1", TS).unwrap(), 1);
        assert_eq!(claim_execution(&db, "a1", "t2", TS, NO_EXPIRY).unwrap(), 1);
    }

    #[test]
    fn test_expired_claim_is_replaced() {
        let db = Database::open_in_memory().unwrap();
        insert(&db, &approved("a1")).unwrap();
        claim_execution(&db, "a1", "t1", TS, NO_EXPIRY).unwrap();

        assert_eq!(claim_execution(&db, "a1", "t2", LATER, NO_EXPIRY).unwrap(), 0);
        assert_eq!(claim_execution(&db, "a1", "t2", LATER, TS).unwrap(), 1);

        let row = find_by_id(&db, "a1").unwrap().unwrap();
        assert_eq!(row.execution_claim.as_deref(), Some("t2"));
        assert_eq!(row.claimed_at.as_deref(), Some(LATER));
        assert_eq!(finalize(&db, "a1", "t1", "o", "{}", LATER).unwrap(), 0);
    }

    #[test]
    fn test_clear_claim() {
        let db = Database::open_in_memory().unwrap();
        insert(&db, &approved("a1")).unwrap();
        assert_eq!(clear_claim(&db, "a1", TS).unwrap(), 0);

        claim_execution(&db, "a1", "t1", TS, NO_EXPIRY).unwrap();
        assert_eq!(clear_claim(&db, "a1", LATER).unwrap(), 1);
        let row = find_by_id(&db, "a1").unwrap().unwrap();
        assert!(row.execution_claim.is_none());
        assert!(row.claimed_at.is_none());
    }

    #[test]
    fn test_finalize_once() {
        let db = Database::open_in_memory().unwrap();
        insert(&db, &approved("a1")).unwrap();
        claim_execution(&db, "a1", "t1", TS, NO_EXPIRY).unwrap();

        assert_eq!(finalize(&db, "a1", "t2", "o", "{}", TS).unwrap(), 0);
        assert_eq!(finalize(&db, "a1", "t1", "o", "{}", TS).unwrap(), 1);
        assert_eq!(finalize(&db, "a1", "t1", "o", "{}", TS).unwrap(), 0);

        let row = find_by_id(&db, "a1").unwrap().unwrap();
        assert_eq!(row.status, "EXECUTED");
        assert_eq!(row.executed_at.as_deref(), Some(TS));
        assert_eq!(row.executed_by.as_deref(), Some("o"));
        assert_eq!(release_claim(&db, "a1", "t1", TS).unwrap(), 0);
    }

    #[test]
    fn test_decide_only_pending() {
        let db = Database::open_in_memory().unwrap();
        let mut row = approved("a1");
        row.status = "PENDING".to_string();
        insert(&db, &row).unwrap();

        assert_eq!(decide(&db, "a1", "REJECTED", "admin", TS).unwrap(), 1);
        assert_eq!(decide(&db, "a1", "APPROVED", "admin", TS).unwrap(), 0);
        assert_eq!(list(&db, Some("REJECTED"), 10).unwrap().len(), 1);
    }
}
