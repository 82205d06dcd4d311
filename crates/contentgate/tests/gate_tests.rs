//! Execution gate behavior as seen through the control plane.

mod common;

use chrono::Duration;
use common::*;

use contentgate::gate::{GuardStep, HandlerError};
use contentgate::{ApprovalStatus, CoreError, HandlerRegistry, GUARD_CHAIN};

fn promote_handlers() -> HandlerRegistry {
    let mut registry = HandlerRegistry::new();
    registry.register_fn("PROMOTE", "marketing", |ctx| {
        Ok(serde_json::json!({
            "promoted": ctx.approval.target_id,
            "by": ctx.principal.id,
        }))
    });
    registry
}

#[test]
fn test_guard_chain_is_fixed() {
    assert_eq!(GUARD_CHAIN[0], GuardStep::Authenticated);
    assert_eq!(GUARD_CHAIN[2], GuardStep::SafeModeOff);
    assert_eq!(GUARD_CHAIN[6], GuardStep::RateLimit);
}

#[test]
fn test_execute_happy_path() {
    let h = TestHarness::with_handlers(promote_handlers());
    let ap = approved_action(&h.plane, "product-1");

    let receipt = h.plane.execute_action(Some(&owner()), &ap.id).unwrap();
    assert_eq!(receipt.result["promoted"], "product-1");
    assert_eq!(receipt.result["by"], "owner-1");
    assert_eq!(receipt.approval.status, ApprovalStatus::Executed);
    assert_eq!(receipt.approval.executed_at, Some(h.now()));

    let err = h.plane.execute_action(Some(&owner()), &ap.id).unwrap_err();
    assert_eq!(err.http_status(), 409);
}

#[test]
fn test_rejections_in_guard_order() {
    let h = TestHarness::with_handlers(promote_handlers());
    let ap = approved_action(&h.plane, "product-2");

    // Every later guard would also fail for an anonymous caller.
    h.plane.set_safe_mode(Some(&owner()), true).unwrap();
    assert!(matches!(
        h.plane.execute_action(None, "missing").unwrap_err(),
        CoreError::Unauthorized
    ));
    assert!(matches!(
        h.plane.execute_action(Some(&admin()), "missing").unwrap_err(),
        CoreError::Forbidden { .. }
    ));
    let err = h.plane.execute_action(Some(&owner()), "missing").unwrap_err();
    assert!(matches!(err, CoreError::SafeModeActive));
    assert_eq!(err.http_status(), 403);

    h.plane.set_safe_mode(Some(&owner()), false).unwrap();
    assert!(matches!(
        h.plane.execute_action(Some(&owner()), "missing").unwrap_err(),
        CoreError::NotFound { .. }
    ));
    assert!(h.plane.execute_action(Some(&owner()), &ap.id).is_ok());

    let attempts = h.plane.list_execution_attempts(Some(&admin()), "missing").unwrap();
    let outcomes: Vec<&str> = attempts.iter().map(|a| a.outcome.as_str()).collect();
    assert_eq!(
        outcomes,
        vec!["unauthorized", "forbidden", "safe_mode_active", "not_found"]
    );
    assert_eq!(attempts[0].principal_id, "anonymous");
    assert_eq!(attempts[1].principal_id, "admin-1");
}

#[test]
fn test_rejected_approval_is_invalid_state() {
    let h = TestHarness::with_handlers(promote_handlers());
    let ap = approved_action(&h.plane, "product-3");
    let proposed = h
        .plane
        .propose_action(
            Some(&admin()),
            contentgate::NewAction {
                action: "PROMOTE".into(),
                category: "marketing".into(),
                target_id: "product-4".into(),
                payload: serde_json::json!({}),
            },
        )
        .unwrap();
    h.plane.reject_action(Some(&admin()), &proposed.id).unwrap();

    let err = h.plane.execute_action(Some(&owner()), &proposed.id).unwrap_err();
    assert!(matches!(err, CoreError::InvalidState { ref current, .. } if current == "REJECTED"));
    assert_eq!(err.http_status(), 400);

    // The approved one is unaffected.
    assert_eq!(
        h.plane.get_action(Some(&viewer()), &ap.id).unwrap().status,
        ApprovalStatus::Approved
    );
}

#[test]
fn test_rate_limited_with_retry_after() {
    let h = TestHarness::with(
        ConfigBuilder::new().execute_limit(2, 60_000).build(),
        promote_handlers(),
    );
    let approvals: Vec<_> = (0..3)
        .map(|i| approved_action(&h.plane, &format!("product-{i}")))
        .collect();

    h.plane.execute_action(Some(&owner()), &approvals[0].id).unwrap();
    h.advance(Duration::seconds(20));
    h.plane.execute_action(Some(&owner()), &approvals[1].id).unwrap();

    let err = h.plane.execute_action(Some(&owner()), &approvals[2].id).unwrap_err();
    assert_eq!(err.http_status(), 429);
    assert_eq!(err.retry_after(), Some(std::time::Duration::from_secs(40)));
    assert_eq!(err.retry_after_header().as_deref(), Some("40"));
    let untouched = h.plane.get_action(Some(&viewer()), &approvals[2].id).unwrap();
    assert!(untouched.executed_at.is_none());

    h.advance(Duration::seconds(40));
    assert!(h.plane.execute_action(Some(&owner()), &approvals[2].id).is_ok());
}

#[test]
fn test_shared_rate_limit_spans_instances() {
    let h = TestHarness::with(
        ConfigBuilder::new()
            .execute_limit(1, 60_000)
            .shared_rate_limits(true)
            .build(),
        promote_handlers(),
    );
    let other = h.second_plane(promote_handlers());
    let first = approved_action(&h.plane, "p1");
    let second = approved_action(&h.plane, "p2");

    h.plane.execute_action(Some(&owner()), &first.id).unwrap();
    let err = other.execute_action(Some(&owner()), &second.id).unwrap_err();
    assert!(matches!(err, CoreError::RateLimited { .. }));
}

#[test]
fn test_handler_failure_leaves_approval_executable() {
    let mut registry = HandlerRegistry::new();
    registry.register_fn("PROMOTE", "marketing", |_ctx| {
        Err(HandlerError::Failed("ad network unavailable".into()))
    });
    let h = TestHarness::with_handlers(registry);
    let ap = approved_action(&h.plane, "product-9");

    let err = h.plane.execute_action(Some(&owner()), &ap.id).unwrap_err();
    assert_eq!(err.http_status(), 500);
    assert!(err.to_string().contains("ad network unavailable"));

    let stored = h.plane.get_action(Some(&viewer()), &ap.id).unwrap();
    assert_eq!(stored.status, ApprovalStatus::Approved);
    assert!(stored.executed_at.is_none());
    assert!(!stored.execution_in_progress);
}

#[test]
fn test_approval_decisions_need_admin() {
    let h = TestHarness::new();
    let err = h
        .plane
        .propose_action(
            Some(&operator()),
            contentgate::NewAction {
                action: "REVIEW".into(),
                category: "seo".into(),
                target_id: "page-1".into(),
                payload: serde_json::json!(null),
            },
        )
        .unwrap_err();
    assert_eq!(err.http_status(), 403);
}

fn strand_claim(h: &TestHarness, approval_id: &str) {
    let ts = contentgate::time::format_timestamp(h.now());
    let taken = contentgate::db::approval_repo::claim_execution(
        &h.second_database(),
        approval_id,
        "crashed-worker",
        &ts,
        &ts,
    )
    .unwrap();
    assert_eq!(taken, 1);
}

#[test]
fn test_stranded_claim_expires_after_timeout() {
    let h = TestHarness::with(
        ConfigBuilder::new().claim_timeout_minutes(20).build(),
        promote_handlers(),
    );
    let ap = approved_action(&h.plane, "product-8");
    strand_claim(&h, &ap.id);

    let stuck = h.plane.get_action(Some(&viewer()), &ap.id).unwrap();
    assert!(stuck.execution_in_progress);
    assert_eq!(stuck.claimed_at, Some(h.now()));

    h.advance(Duration::minutes(19));
    let err = h.plane.execute_action(Some(&owner()), &ap.id).unwrap_err();
    assert_eq!(err.http_status(), 409);

    h.advance(Duration::minutes(1));
    let receipt = h.plane.execute_action(Some(&owner()), &ap.id).unwrap();
    assert_eq!(receipt.approval.status, ApprovalStatus::Executed);
    assert_eq!(receipt.approval.executed_by.as_deref(), Some("owner-1"));
}

#[test]
fn test_owner_releases_stranded_claim() {
    let h = TestHarness::with_handlers(promote_handlers());
    let ap = approved_action(&h.plane, "product-9");
    strand_claim(&h, &ap.id);
    assert_eq!(
        h.plane.execute_action(Some(&owner()), &ap.id).unwrap_err().http_status(),
        409
    );

    let err = h.plane.release_execution_claim(Some(&admin()), &ap.id).unwrap_err();
    assert_eq!(err.http_status(), 403);
    assert_eq!(
        h.plane.release_execution_claim(None, &ap.id).unwrap_err().http_status(),
        401
    );

    let released = h.plane.release_execution_claim(Some(&owner()), &ap.id).unwrap();
    assert!(!released.execution_in_progress);
    assert_eq!(released.status, ApprovalStatus::Approved);

    h.plane.execute_action(Some(&owner()), &ap.id).unwrap();

    let attempts = h.plane.list_execution_attempts(Some(&admin()), &ap.id).unwrap();
    let released_row = attempts
        .iter()
        .find(|a| a.outcome == "claim_released")
        .expect("release is audited");
    assert_eq!(released_row.principal_id, "owner-1");
    assert!(released_row.detail.as_deref().unwrap().starts_with("claim taken at"));
    assert_eq!(attempts.last().unwrap().outcome, "executed");
}
