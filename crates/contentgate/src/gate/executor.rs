//! Runs approved actions through the guard chain and dispatches them at most
//! once.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use uuid::Uuid;

use super::approval::{self, ActionApproval, ApprovalStatus};
use super::auth::{principal_label, require_authenticated, require_role, Principal, Role};
use super::guards::{GuardStep, GUARD_CHAIN};
use super::handlers::{ActionContext, HandlerRegistry};
use crate::db::{approval_repo, attempt_repo, settings_repo, Database, DatabaseError};
use crate::error::{CoreError, Result};
use crate::lifecycle::Lifecycle;
use crate::rate_limit::{self, RateLimitRule, RateLimitStore};
use crate::time::{format_timestamp, parse_timestamp};

/// Audit outcome recorded for a successful execution.
pub const OUTCOME_EXECUTED: &str = "executed";

/// Audit outcome recorded when an owner drops a stuck claim.
pub const OUTCOME_CLAIM_RELEASED: &str = "claim_released";

const DEFAULT_CLAIM_TIMEOUT_MINUTES: i64 = 15;

/// Result of a successful [`ExecutionGate::execute`].
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionReceipt {
    pub approval: ActionApproval,
    pub result: serde_json::Value,
}

/// One row of the execution audit trail.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionAttempt {
    pub seq: i64,
    pub approval_id: String,
    pub principal_id: String,
    pub outcome: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    pub attempted_at: DateTime<Utc>,
}

impl ExecutionAttempt {
    fn from_row(row: attempt_repo::AttemptRow) -> std::result::Result<Self, DatabaseError> {
        let attempted_at = parse_timestamp(&row.attempted_at).ok_or_else(|| {
            DatabaseError::corrupt(
                "execution_attempts",
                &row.seq.to_string(),
                "bad attempted_at",
            )
        })?;
        Ok(Self {
            seq: row.seq,
            approval_id: row.approval_id,
            principal_id: row.principal_id,
            outcome: row.outcome,
            detail: row.detail,
            attempted_at,
        })
    }
}

/// Attempts for one approval, oldest first.
pub fn list_attempts(db: &Database, approval_id: &str) -> Result<Vec<ExecutionAttempt>> {
    attempt_repo::list_for(db, approval_id)?
        .into_iter()
        .map(|row| Ok(ExecutionAttempt::from_row(row)?))
        .collect()
}

#[derive(Clone)]
pub struct ExecutionGate {
    db: Database,
    rate_limiter: Arc<dyn RateLimitStore>,
    rule: RateLimitRule,
    handlers: Arc<HandlerRegistry>,
    claim_timeout: Duration,
}

impl ExecutionGate {
    pub fn new(
        db: Database,
        rate_limiter: Arc<dyn RateLimitStore>,
        rule: RateLimitRule,
        handlers: Arc<HandlerRegistry>,
    ) -> Self {
        Self {
            db,
            rate_limiter,
            rule,
            handlers,
            claim_timeout: Duration::minutes(DEFAULT_CLAIM_TIMEOUT_MINUTES),
        }
    }

    /// Age after which an unfinished execution claim may be taken over.
    pub fn with_claim_timeout(mut self, timeout: Duration) -> Self {
        self.claim_timeout = timeout;
        self
    }

    pub fn rule(&self) -> RateLimitRule {
        self.rule
    }

    /// Executes `approval_id` on behalf of `principal`.
    ///
    /// Every call, including rejected ones, leaves an audit row.
    pub fn execute(
        &self,
        principal: Option<&Principal>,
        approval_id: &str,
        now: DateTime<Utc>,
    ) -> Result<ExecutionReceipt> {
        let label = principal_label(principal);
        let span = tracing::info_span!("gate.execute", approval_id, principal = label);
        let _guard = span.enter();

        let outcome = self.execute_inner(principal, approval_id, now);
        match &outcome {
            Ok(receipt) => {
                let detail = receipt.result.to_string();
                self.audit(approval_id, label, OUTCOME_EXECUTED, Some(&detail), now);
            }
            Err(err) => {
                tracing::warn!(error = %err, code = err.code(), "Execution rejected");
                self.audit(approval_id, label, err.code(), Some(&err.to_string()), now);
            }
        }
        outcome
    }

    fn execute_inner(
        &self,
        principal: Option<&Principal>,
        approval_id: &str,
        now: DateTime<Utc>,
    ) -> Result<ExecutionReceipt> {
        let (principal, approval) = self.run_guards(principal, approval_id, now)?;

        let token = Uuid::new_v4().to_string();
        let ts = format_timestamp(now);
        let expired_before = format_timestamp(now - self.claim_timeout);
        if approval_repo::claim_execution(&self.db, approval_id, &token, &ts, &expired_before)? == 0 {
            return Err(self.claim_conflict(approval_id, now)?);
        }
        if approval.execution_in_progress {
            tracing::warn!(
                claimed_at = ?approval.claimed_at,
                "Took over an execution claim older than {} minutes",
                self.claim_timeout.num_minutes()
            );
        }

        let ctx = ActionContext {
            approval: &approval,
            principal,
            now,
        };
        let result = match self.handlers.dispatch(&ctx) {
            Ok(value) => value,
            Err(source) => {
                self.release(approval_id, &token, &ts);
                tracing::error!(error = %source, "Action handler failed");
                return Err(CoreError::ExecutionFailed {
                    id: approval_id.to_string(),
                    source,
                });
            }
        };

        let stored = serde_json::to_string(&result).map_err(DatabaseError::from)?;
        let finalized =
            approval_repo::finalize(&self.db, approval_id, &token, &principal.id, &stored, &ts)?;
        if finalized == 0 {
            // Only the claim holder can get here, so a lost finalize means the
            // row changed underneath us.
            return Err(CoreError::AlreadyExecuted {
                id: approval_id.to_string(),
                detail: None,
            });
        }

        tracing::info!(action = %approval.action, category = %approval.category, "Action executed");
        Ok(ExecutionReceipt {
            approval: approval::get(&self.db, approval_id)?,
            result,
        })
    }

    /// Evaluates [`GUARD_CHAIN`] in order and stops at the first failure.
    fn run_guards<'p>(
        &self,
        principal: Option<&'p Principal>,
        approval_id: &str,
        now: DateTime<Utc>,
    ) -> Result<(&'p Principal, ActionApproval)> {
        let mut loaded: Option<ActionApproval> = None;

        for step in GUARD_CHAIN {
            match step {
                GuardStep::Authenticated => {
                    require_authenticated(principal)?;
                }
                GuardStep::HighestRole => {
                    require_role(principal, Role::HIGHEST, "execute approved actions")?;
                }
                GuardStep::SafeModeOff => {
                    if settings_repo::safe_mode(&self.db)? {
                        return Err(CoreError::SafeModeActive);
                    }
                }
                GuardStep::ApprovalExists => {
                    loaded = Some(
                        approval::find(&self.db, approval_id)?
                            .ok_or_else(|| CoreError::not_found("approval", approval_id))?,
                    );
                }
                GuardStep::StatusApproved => {
                    let ap = expect_loaded(&loaded, approval_id)?;
                    // An executed row falls through to the idempotency guard.
                    if ap.status != ApprovalStatus::Approved && ap.executed_at.is_none() {
                        return Err(CoreError::InvalidState {
                            id: approval_id.to_string(),
                            current: ap.status.as_str().to_string(),
                        });
                    }
                }
                GuardStep::NotYetExecuted => {
                    let ap = expect_loaded(&loaded, approval_id)?;
                    if ap.executed_at.is_some() {
                        return Err(CoreError::AlreadyExecuted {
                            id: approval_id.to_string(),
                            detail: None,
                        });
                    }
                    if ap.claim_is_live(now, self.claim_timeout) {
                        return Err(in_progress(approval_id));
                    }
                }
                GuardStep::RateLimit => {
                    let p = require_authenticated(principal)?;
                    rate_limit::enforce(
                        self.rate_limiter.as_ref(),
                        &rate_limit::execute_key(&p.id),
                        &self.rule,
                        now,
                    )?;
                }
            }
        }

        let principal = require_authenticated(principal)?;
        let approval = loaded.ok_or_else(|| CoreError::not_found("approval", approval_id))?;
        Ok((principal, approval))
    }

    /// Drops the execution claim on `approval_id` so it can be executed
    /// again. Meant for a claim whose holder died; the highest role only.
    /// Every call, including rejected ones, leaves an audit row.
    pub fn release_claim(
        &self,
        principal: Option<&Principal>,
        approval_id: &str,
        now: DateTime<Utc>,
    ) -> Result<ActionApproval> {
        let label = principal_label(principal);
        let span = tracing::info_span!("gate.release_claim", approval_id, principal = label);
        let _guard = span.enter();

        match self.release_claim_inner(principal, approval_id, now) {
            Ok((approval, claimed_at)) => {
                let detail = match claimed_at {
                    Some(at) => format!("claim taken at {}", format_timestamp(at)),
                    None => "claim without timestamp".to_string(),
                };
                tracing::warn!(%detail, "Execution claim released");
                self.audit(approval_id, label, OUTCOME_CLAIM_RELEASED, Some(&detail), now);
                Ok(approval)
            }
            Err(err) => {
                tracing::warn!(error = %err, code = err.code(), "Claim release rejected");
                self.audit(approval_id, label, err.code(), Some(&err.to_string()), now);
                Err(err)
            }
        }
    }

    fn release_claim_inner(
        &self,
        principal: Option<&Principal>,
        approval_id: &str,
        now: DateTime<Utc>,
    ) -> Result<(ActionApproval, Option<DateTime<Utc>>)> {
        require_role(principal, Role::HIGHEST, "release execution claims")?;
        let current = approval::get(&self.db, approval_id)?;
        let unclaimed = |ap: &ActionApproval| {
            if ap.executed_at.is_some() {
                CoreError::AlreadyExecuted {
                    id: approval_id.to_string(),
                    detail: None,
                }
            } else {
                CoreError::InvalidInput(format!(
                    "approval '{}' holds no execution claim",
                    approval_id
                ))
            }
        };
        if !current.execution_in_progress {
            return Err(unclaimed(&current));
        }

        if approval_repo::clear_claim(&self.db, approval_id, &format_timestamp(now))? == 0 {
            return Err(unclaimed(&approval::get(&self.db, approval_id)?));
        }
        Ok((approval::get(&self.db, approval_id)?, current.claimed_at))
    }

    /// Explains why the claim update touched no row.
    fn claim_conflict(&self, approval_id: &str, now: DateTime<Utc>) -> Result<CoreError> {
        let latest = approval::get(&self.db, approval_id)?;
        Ok(if latest.executed_at.is_some() {
            CoreError::AlreadyExecuted {
                id: approval_id.to_string(),
                detail: None,
            }
        } else if latest.claim_is_live(now, self.claim_timeout) {
            in_progress(approval_id)
        } else {
            CoreError::InvalidState {
                id: approval_id.to_string(),
                current: latest.status.as_str().to_string(),
            }
        })
    }

    fn release(&self, approval_id: &str, token: &str, ts: &str) {
        if let Err(e) = approval_repo::release_claim(&self.db, approval_id, token, ts) {
            tracing::error!(error = %e, "Failed to release execution claim");
        }
    }

    fn audit(
        &self,
        approval_id: &str,
        principal_id: &str,
        outcome: &str,
        detail: Option<&str>,
        now: DateTime<Utc>,
    ) {
        let ts = format_timestamp(now);
        if let Err(e) = attempt_repo::insert(&self.db, approval_id, principal_id, outcome, detail, &ts)
        {
            tracing::error!(error = %e, outcome, "Failed to record execution attempt");
        }
    }
}

impl std::fmt::Debug for ExecutionGate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionGate")
            .field("rule", &self.rule)
            .field("handlers", &self.handlers)
            .finish_non_exhaustive()
    }
}

fn expect_loaded<'a>(
    loaded: &'a Option<ActionApproval>,
    approval_id: &str,
) -> Result<&'a ActionApproval> {
    loaded
        .as_ref()
        .ok_or_else(|| CoreError::not_found("approval", approval_id))
}

fn in_progress(approval_id: &str) -> CoreError {
    CoreError::AlreadyExecuted {
        id: approval_id.to_string(),
        detail: Some("execution in progress".to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gate::approval::NewAction;
    use crate::gate::handlers::HandlerError;
    use crate::rate_limit::InMemoryRateLimitStore;
    use chrono::TimeZone;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap()
    }

    fn owner() -> Principal {
        Principal::new("owner-1", Role::Owner)
    }

    fn gate_with(db: &Database, handlers: HandlerRegistry, max_requests: u32) -> ExecutionGate {
        ExecutionGate::new(
            db.clone(),
            Arc::new(InMemoryRateLimitStore::new()),
            RateLimitRule {
                max_requests,
                window_ms: 60_000,
            },
            Arc::new(handlers),
        )
    }

    fn approved(db: &Database) -> ActionApproval {
        let ap = approval::propose(
            db,
            NewAction {
                action: "PROMOTE".into(),
                category: "marketing".into(),
                target_id: "product-1".into(),
                payload: serde_json::json!({}),
            },
            "admin",
            now(),
        )
        .unwrap();
        approval::approve(db, &ap.id, "admin", now()).unwrap()
    }

    fn counting_registry(calls: Arc<AtomicUsize>) -> HandlerRegistry {
        let mut registry = HandlerRegistry::new();
        registry.register_fn("PROMOTE", "marketing", move |ctx| {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok(serde_json::json!({ "target": ctx.approval.target_id }))
        });
        registry
    }

    #[test]
    fn test_execute_once() {
        let db = Database::open_in_memory().unwrap();
        let calls = Arc::new(AtomicUsize::new(0));
        let gate = gate_with(&db, counting_registry(calls.clone()), 10);
        let ap = approved(&db);

        let receipt = gate.execute(Some(&owner()), &ap.id, now()).unwrap();
        assert_eq!(receipt.approval.status, ApprovalStatus::Executed);
        assert_eq!(receipt.approval.executed_at, Some(now()));
        assert_eq!(receipt.result["target"], "product-1");

        let err = gate.execute(Some(&owner()), &ap.id, now()).unwrap_err();
        assert!(matches!(err, CoreError::AlreadyExecuted { .. }));
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        let attempts = list_attempts(&db, &ap.id).unwrap();
        let outcomes: Vec<&str> = attempts.iter().map(|a| a.outcome.as_str()).collect();
        assert_eq!(outcomes, vec!["executed", "already_executed"]);
    }

    #[test]
    fn test_guard_order() {
        let db = Database::open_in_memory().unwrap();
        let gate = gate_with(&db, HandlerRegistry::new(), 10);
        let admin = Principal::new("admin-1", Role::Admin);

        // Unknown approval: authentication and role are checked first.
        assert_eq!(gate.execute(None, "nope", now()).unwrap_err().code(), "unauthorized");
        assert_eq!(
            gate.execute(Some(&admin), "nope", now()).unwrap_err().code(),
            "forbidden"
        );

        settings_repo::set_safe_mode(&db, true, &format_timestamp(now())).unwrap();
        assert_eq!(
            gate.execute(Some(&owner()), "nope", now()).unwrap_err().code(),
            "safe_mode_active"
        );
        settings_repo::set_safe_mode(&db, false, &format_timestamp(now())).unwrap();
        assert_eq!(
            gate.execute(Some(&owner()), "nope", now()).unwrap_err().code(),
            "not_found"
        );

        let attempts = list_attempts(&db, "nope").unwrap();
        assert_eq!(attempts.len(), 4);
        assert_eq!(attempts[0].principal_id, "anonymous");
    }

    #[test]
    fn test_pending_is_invalid_state() {
        let db = Database::open_in_memory().unwrap();
        let gate = gate_with(&db, HandlerRegistry::new(), 10);
        let ap = approval::propose(
            &db,
            NewAction {
                action: "REVIEW".into(),
                category: "seo".into(),
                target_id: "p".into(),
                payload: serde_json::json!(null),
            },
            "admin",
            now(),
        )
        .unwrap();

        let err = gate.execute(Some(&owner()), &ap.id, now()).unwrap_err();
        assert_eq!(err.http_status(), 400);
        assert!(err.to_string().contains("is PENDING"));
    }

    #[test]
    fn test_handler_failure_keeps_approval_executable() {
        let db = Database::open_in_memory().unwrap();
        let fail = Arc::new(std::sync::atomic::AtomicBool::new(true));
        let flag = fail.clone();
        let mut registry = HandlerRegistry::new();
        registry.register_fn("PROMOTE", "marketing", move |_ctx| {
            if flag.load(Ordering::SeqCst) {
                Err(HandlerError::Failed("upstream timeout".into()))
            } else {
                Ok(serde_json::json!({"ok": true}))
            }
        });
        let gate = gate_with(&db, registry, 10);
        let ap = approved(&db);

        let err = gate.execute(Some(&owner()), &ap.id, now()).unwrap_err();
        assert_eq!(err.http_status(), 500);
        let current = approval::get(&db, &ap.id).unwrap();
        assert_eq!(current.status, ApprovalStatus::Approved);
        assert!(current.executed_at.is_none());
        assert!(!current.execution_in_progress);

        fail.store(false, Ordering::SeqCst);
        let receipt = gate.execute(Some(&owner()), &ap.id, now()).unwrap();
        assert_eq!(receipt.approval.status, ApprovalStatus::Executed);
    }

    #[test]
    fn test_missing_handler_is_execution_failure() {
        let db = Database::open_in_memory().unwrap();
        let gate = gate_with(&db, HandlerRegistry::new(), 10);
        let ap = approved(&db);

        let err = gate.execute(Some(&owner()), &ap.id, now()).unwrap_err();
        assert_eq!(err.code(), "execution_failed");
        assert!(approval::get(&db, &ap.id).unwrap().executed_at.is_none());
    }

    #[test]
    fn test_rate_limit_is_last_guard() {
        let db = Database::open_in_memory().unwrap();
        let calls = Arc::new(AtomicUsize::new(0));
        let gate = gate_with(&db, counting_registry(calls), 1);
        let first = approved(&db);
        let second = approved(&db);

        // Rejections before the rate limit step do not consume budget.
        gate.execute(Some(&owner()), "missing", now()).unwrap_err();
        gate.execute(Some(&owner()), &first.id, now()).unwrap();

        let err = gate.execute(Some(&owner()), &second.id, now()).unwrap_err();
        assert_eq!(err.http_status(), 429);
        assert_eq!(err.retry_after_header().as_deref(), Some("60"));
        assert!(approval::get(&db, &second.id).unwrap().executed_at.is_none());
    }

    #[test]
    fn test_held_claim_reports_in_progress() {
        let db = Database::open_in_memory().unwrap();
        let gate = gate_with(&db, HandlerRegistry::new(), 10);
        let ap = approved(&db);
        hold_claim(&db, &ap.id, now());

        let err = gate.execute(Some(&owner()), &ap.id, now()).unwrap_err();
        assert_eq!(
            err.to_string(),
            format!("Approval '{}' has already been executed (execution in progress)", ap.id)
        );
    }

    fn hold_claim(db: &Database, id: &str, at: DateTime<Utc>) {
        let ts = format_timestamp(at);
        assert_eq!(approval_repo::claim_execution(db, id, "other", &ts, &ts).unwrap(), 1);
    }

    #[test]
    fn test_abandoned_claim_is_taken_over() {
        let db = Database::open_in_memory().unwrap();
        let calls = Arc::new(AtomicUsize::new(0));
        let gate = gate_with(&db, counting_registry(calls.clone()), 10)
            .with_claim_timeout(Duration::minutes(10));
        let ap = approved(&db);
        hold_claim(&db, &ap.id, now());

        let err = gate
            .execute(Some(&owner()), &ap.id, now() + Duration::minutes(9))
            .unwrap_err();
        assert_eq!(err.http_status(), 409);
        assert_eq!(calls.load(Ordering::SeqCst), 0);

        let later = now() + Duration::minutes(10);
        let receipt = gate.execute(Some(&owner()), &ap.id, later).unwrap();
        assert_eq!(receipt.approval.executed_at, Some(later));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_release_claim_is_owner_only_and_audited() {
        let db = Database::open_in_memory().unwrap();
        let gate = gate_with(&db, counting_registry(Arc::new(AtomicUsize::new(0))), 10);
        let ap = approved(&db);
        let admin = Principal::new("admin-1", Role::Admin);

        let err = gate.release_claim(Some(&owner()), &ap.id, now()).unwrap_err();
        assert_eq!(err.http_status(), 400);

        hold_claim(&db, &ap.id, now());
        let err = gate.release_claim(Some(&admin), &ap.id, now()).unwrap_err();
        assert_eq!(err.http_status(), 403);
        assert!(approval::get(&db, &ap.id).unwrap().execution_in_progress);

        let released = gate.release_claim(Some(&owner()), &ap.id, now()).unwrap();
        assert!(!released.execution_in_progress);
        assert!(released.claimed_at.is_none());
        gate.execute(Some(&owner()), &ap.id, now()).unwrap();

        let err = gate.release_claim(Some(&owner()), &ap.id, now()).unwrap_err();
        assert!(matches!(err, CoreError::AlreadyExecuted { .. }));

        let outcomes: Vec<String> = list_attempts(&db, &ap.id)
            .unwrap()
            .into_iter()
            .map(|a| a.outcome)
            .collect();
        assert_eq!(
            outcomes,
            vec!["invalid_input", "forbidden", "claim_released", "executed", "already_executed"]
        );
    }
}
