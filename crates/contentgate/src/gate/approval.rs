//! Proposed irreversible actions and their sign-off.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::db::approval_repo::{self, ApprovalRow};
use crate::db::{Database, DatabaseError};
use crate::error::{CoreError, Result};
use crate::lifecycle::{validate_transition, Lifecycle};
use crate::time::{format_timestamp, parse_timestamp};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ApprovalStatus {
    Pending,
    Approved,
    Rejected,
    Executed,
}

impl ApprovalStatus {
    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|st| st.as_str() == s)
    }
}

impl Lifecycle for ApprovalStatus {
    const ALL: &'static [Self] = &[
        ApprovalStatus::Pending,
        ApprovalStatus::Approved,
        ApprovalStatus::Rejected,
        ApprovalStatus::Executed,
    ];

    fn as_str(&self) -> &'static str {
        match self {
            ApprovalStatus::Pending => "PENDING",
            ApprovalStatus::Approved => "APPROVED",
            ApprovalStatus::Rejected => "REJECTED",
            ApprovalStatus::Executed => "EXECUTED",
        }
    }

    fn can_transition_to(&self, target: ApprovalStatus) -> bool {
        use ApprovalStatus::*;
        matches!(
            (self, target),
            (Pending, Approved) | (Pending, Rejected) | (Approved, Executed)
        )
    }

    fn is_terminal(&self) -> bool {
        matches!(self, ApprovalStatus::Rejected | ApprovalStatus::Executed)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ActionApproval {
    pub id: String,
    /// Engine action kind, e.g. `PROMOTE`, `OPTIMIZE`, `REVIEW`.
    pub action: String,
    pub category: String,
    pub target_id: String,
    pub payload: serde_json::Value,
    pub status: ApprovalStatus,
    pub proposed_by: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub decided_by: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub decided_at: Option<DateTime<Utc>>,
    /// A caller currently holds the execution claim.
    pub execution_in_progress: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub claimed_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub executed_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub executed_by: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ActionApproval {
    pub(crate) fn from_row(row: ApprovalRow) -> std::result::Result<Self, DatabaseError> {
        const TABLE: &str = "action_approvals";
        let id = row.id;
        let status = ApprovalStatus::parse(&row.status).ok_or_else(|| {
            DatabaseError::corrupt(TABLE, &id, format!("unknown status '{}'", row.status))
        })?;
        let ts = |v: Option<String>, column: &str| match v {
            None => Ok(None),
            Some(s) => parse_timestamp(&s)
                .map(Some)
                .ok_or_else(|| DatabaseError::corrupt(TABLE, &id, format!("bad {}", column))),
        };
        let json = |s: &str, column: &str| {
            serde_json::from_str::<serde_json::Value>(s)
                .map_err(|e| DatabaseError::corrupt(TABLE, &id, format!("bad {}: {}", column, e)))
        };

        let payload = json(&row.payload, "payload")?;
        let result = match row.result.as_deref() {
            Some(r) => Some(json(r, "result")?),
            None => None,
        };
        let decided_at = ts(row.decided_at, "decided_at")?;
        let executed_at = ts(row.executed_at, "executed_at")?;
        let claimed_at = ts(row.claimed_at, "claimed_at")?;
        let created_at = ts(Some(row.created_at), "created_at")?.unwrap_or_default();
        let updated_at = ts(Some(row.updated_at), "updated_at")?.unwrap_or_default();

        Ok(Self {
            id,
            action: row.action,
            category: row.category,
            target_id: row.target_id,
            payload,
            status,
            proposed_by: row.proposed_by,
            decided_by: row.decided_by,
            decided_at,
            execution_in_progress: row.execution_claim.is_some() && executed_at.is_none(),
            claimed_at: claimed_at.filter(|_| executed_at.is_none()),
            executed_at,
            executed_by: row.executed_by,
            result,
            created_at,
            updated_at,
        })
    }
}

impl ActionApproval {
    /// Whether the execution claim is held and younger than `timeout`.
    pub fn claim_is_live(&self, now: DateTime<Utc>, timeout: Duration) -> bool {
        self.execution_in_progress && self.claimed_at.map_or(true, |at| at + timeout > now)
    }
}

/// Input for [`propose`].
#[derive(Debug, Clone)]
pub struct NewAction {
    pub action: String,
    pub category: String,
    pub target_id: String,
    pub payload: serde_json::Value,
}

pub fn propose(
    db: &Database,
    new: NewAction,
    proposed_by: &str,
    now: DateTime<Utc>,
) -> Result<ActionApproval> {
    if new.action.trim().is_empty() || new.category.trim().is_empty() {
        return Err(CoreError::InvalidInput(
            "action and category must not be empty".into(),
        ));
    }
    let id = Uuid::new_v4().to_string();
    let now = format_timestamp(now);
    approval_repo::insert(
        db,
        &ApprovalRow {
            id: id.clone(),
            action: new.action,
            category: new.category,
            target_id: new.target_id,
            payload: serde_json::to_string(&new.payload).map_err(DatabaseError::from)?,
            status: ApprovalStatus::Pending.as_str().to_string(),
            proposed_by: proposed_by.to_string(),
            decided_by: None,
            decided_at: None,
            execution_claim: None,
            claimed_at: None,
            executed_at: None,
            executed_by: None,
            result: None,
            created_at: now.clone(),
            updated_at: now,
        },
    )?;
    tracing::info!(approval_id = %id, proposed_by, "Action proposed");
    get(db, &id)
}

pub fn approve(db: &Database, id: &str, decided_by: &str, now: DateTime<Utc>) -> Result<ActionApproval> {
    decide(db, id, ApprovalStatus::Approved, decided_by, now)
}

pub fn reject(db: &Database, id: &str, decided_by: &str, now: DateTime<Utc>) -> Result<ActionApproval> {
    decide(db, id, ApprovalStatus::Rejected, decided_by, now)
}

fn decide(
    db: &Database,
    id: &str,
    to: ApprovalStatus,
    decided_by: &str,
    now: DateTime<Utc>,
) -> Result<ActionApproval> {
    let current = get(db, id)?;
    validate_transition(current.status, to)?;

    let changed = approval_repo::decide(db, id, to.as_str(), decided_by, &format_timestamp(now))?;
    if changed == 0 {
        let latest = get(db, id)?;
        validate_transition(latest.status, to)?;
        return Err(CoreError::InvalidTransition {
            from: latest.status.as_str().to_string(),
            to: to.as_str().to_string(),
            reason: "concurrent update, try again".to_string(),
        });
    }
    tracing::info!(approval_id = %id, decided_by, status = to.as_str(), "Action decided");
    get(db, id)
}

pub fn get(db: &Database, id: &str) -> Result<ActionApproval> {
    let row = approval_repo::find_by_id(db, id)?
        .ok_or_else(|| CoreError::not_found("approval", id))?;
    Ok(ActionApproval::from_row(row)?)
}

pub fn find(db: &Database, id: &str) -> Result<Option<ActionApproval>> {
    match approval_repo::find_by_id(db, id)? {
        Some(row) => Ok(Some(ActionApproval::from_row(row)?)),
        None => Ok(None),
    }
}

pub fn list(db: &Database, status: Option<ApprovalStatus>, limit: u64) -> Result<Vec<ActionApproval>> {
    approval_repo::list(db, status.as_ref().map(|s| s.as_str()), limit)?
        .into_iter()
        .map(|row| Ok(ActionApproval::from_row(row)?))
        .collect()
}
