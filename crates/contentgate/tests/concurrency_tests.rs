//! Racing callers against one database file, each on its own connection.

mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;

use common::*;

use contentgate::{ContentStatus, ControlPlane, CoreError, HandlerRegistry, JobRequest, JobStatus};

fn counting_handlers(calls: &Arc<AtomicUsize>) -> HandlerRegistry {
    let calls = Arc::clone(calls);
    let mut registry = HandlerRegistry::new();
    registry.register_fn("PROMOTE", "marketing", move |ctx| {
        calls.fetch_add(1, Ordering::SeqCst);
        Ok(serde_json::json!({ "promoted": ctx.approval.target_id }))
    });
    registry
}

/// Runs `f` on two planes at once and returns both results.
fn race<T, F>(planes: [ControlPlane; 2], f: F) -> Vec<T>
where
    T: Send + 'static,
    F: Fn(&ControlPlane) -> T + Send + Sync + 'static,
{
    let barrier = Arc::new(Barrier::new(2));
    let f = Arc::new(f);
    let handles: Vec<_> = planes
        .into_iter()
        .map(|plane| {
            let barrier = Arc::clone(&barrier);
            let f = Arc::clone(&f);
            thread::spawn(move || {
                barrier.wait();
                f(&plane)
            })
        })
        .collect();
    handles.into_iter().map(|h| h.join().unwrap()).collect()
}

#[test]
fn test_concurrent_run_single_winner() {
    let h = TestHarness::new();
    let job = h.plane.enqueue_job(Some(&operator()), JobRequest::new("GENERATE")).unwrap();

    let id = job.id.clone();
    let results = race(
        [h.plane.clone(), h.second_plane(HandlerRegistry::new())],
        move |cp| cp.run_job(Some(&admin()), &id),
    );

    let wins = results.iter().filter(|r| r.is_ok()).count();
    assert_eq!(wins, 1);
    let loser = results.into_iter().find_map(|r| r.err()).unwrap();
    match loser {
        CoreError::Conflict { ref id, ref current, .. } => {
            assert_eq!(id, &job.id);
            assert_eq!(current, "RUNNING");
        }
        ref other => panic!("unexpected error: {other:?}"),
    }
    assert_eq!(loser.http_status(), 409);
    assert_eq!(h.plane.get_job(Some(&viewer()), &job.id).unwrap().status, JobStatus::Running);
}

#[test]
fn test_concurrent_run_on_cloned_handles() {
    let h = TestHarness::new();
    let job = h.plane.enqueue_job(Some(&operator()), JobRequest::new("REFRESH")).unwrap();

    let id = job.id.clone();
    let results = race([h.plane.clone(), h.plane.clone()], move |cp| {
        cp.run_job(Some(&admin()), &id)
    });
    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
}

#[test]
fn test_concurrent_execute_single_effect() {
    let calls = Arc::new(AtomicUsize::new(0));
    let h = TestHarness::with_handlers(counting_handlers(&calls));
    let ap = approved_action(&h.plane, "product-7");

    let id = ap.id.clone();
    let results = race(
        [h.plane.clone(), h.second_plane(counting_handlers(&calls))],
        move |cp| cp.execute_action(Some(&owner()), &id),
    );

    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    let loser = results.into_iter().find_map(|r| r.err()).unwrap();
    assert!(matches!(loser, CoreError::AlreadyExecuted { .. }), "got {loser:?}");
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    let stored = h.plane.get_action(Some(&viewer()), &ap.id).unwrap();
    assert!(stored.executed_at.is_some());
    assert_eq!(stored.executed_by.as_deref(), Some("owner-1"));

    let attempts = h.plane.list_execution_attempts(Some(&admin()), &ap.id).unwrap();
    assert_eq!(attempts.len(), 2);
    assert_eq!(attempts.iter().filter(|a| a.outcome == "executed").count(), 1);
}

#[test]
fn test_concurrent_keyword_claims_are_distinct() {
    let h = TestHarness::new();
    let keywords = vec!["matcha".to_string(), "sencha".to_string()];
    let sched = h.plane.create_schedule(Some(&operator()), "teas", &keywords).unwrap();

    let id = sched.id.clone();
    let results = race(
        [h.plane.clone(), h.second_plane(HandlerRegistry::new())],
        move |cp| cp.claim_next_keyword(Some(&operator()), &id),
    );

    let mut claimed: Vec<String> = results
        .into_iter()
        .map(|r| r.unwrap().unwrap().keyword)
        .collect();
    claimed.sort();
    assert_eq!(claimed, keywords);
    assert!(h.plane.claim_next_keyword(Some(&operator()), &sched.id).unwrap().is_none());
}

#[test]
fn test_concurrent_checks_share_daily_quota() {
    let h = TestHarness::with_config(ConfigBuilder::new().daily_quota(2).build());
    for i in 0..4 {
        scheduled_content(&h.plane, "article", &format!("Post {i}"));
    }

    let results = race(
        [h.plane.clone(), h.second_plane(HandlerRegistry::new())],
        |cp| cp.scheduler_check(Some(&operator())),
    );

    let flagged: usize = results
        .into_iter()
        .map(|r| r.unwrap().summary.flagged.len())
        .sum();
    assert_eq!(flagged, 2);

    let ready = h
        .plane
        .list_content(Some(&viewer()), Some(ContentStatus::ReadyToPublish), 10)
        .unwrap();
    assert_eq!(ready.len(), 2);
}
