//! The scheduler check: flags due content READY_TO_PUBLISH within the
//! day's quota and the configured run windows. It never publishes.

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use chrono_tz::Tz;
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::mix;
use super::window::{in_any_window, parse_windows};
use super::SchedulerConfig;
use crate::db::content_repo;
use crate::db::{Database, DatabaseError};
use crate::error::{ConfigError, Result};
use crate::history::{self, RunStatus, SchedulerRun};
use crate::time::{format_date, format_timestamp, local_date, parse_timezone};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckResult {
    Flagged,
    NothingDue,
    OutsideWindow,
    QuotaExhausted,
    Disabled,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckSummary {
    pub run_id: String,
    pub date: NaiveDate,
    pub local_time: NaiveTime,
    pub daily_quota: u32,
    pub executed_today: u32,
    pub remaining: u32,
    pub due_count: u32,
    pub planned_count: u32,
    pub flagged: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckOutcome {
    pub result: CheckResult,
    pub summary: CheckSummary,
}

/// Runs one scheduler check at `now` and records it in the run history.
///
/// The quota read, every READY_TO_PUBLISH flag and the run record commit
/// together in one immediate transaction, so concurrent checks from any
/// process serialize on the database write lock. A check that fails leaves
/// no content flagged and is recorded as a failed run.
pub fn check_at(db: &Database, now: DateTime<Utc>) -> Result<CheckOutcome> {
    let config = super::load(db)?;
    let tz = parse_timezone(&config.timezone)
        .ok_or_else(|| ConfigError::UnknownTimezone(config.timezone.clone()))?;
    let today = local_date(now, tz);
    let run_id = Uuid::new_v4().to_string();

    let span = tracing::info_span!("scheduler.check", date = %format_date(today), run_id = %run_id);
    let _enter = span.enter();

    let committed = db.with_tx(|conn| {
        let outcome = evaluate(conn, &config, tz, today, now, &run_id)?;
        let log = describe(&outcome);
        let run = SchedulerRun::finished(&run_id, today, RunStatus::Success, log.as_str(), now)
            .with_counts(
                outcome.summary.planned_count,
                outcome.summary.flagged.len() as u32,
            );
        history::record_with(conn, &run)?;
        Ok((outcome, log))
    });

    match committed {
        Ok((outcome, log)) => {
            tracing::info!(result = ?outcome.result, "{}", log);
            Ok(outcome)
        }
        Err(e) => {
            tracing::error!(error = %e, "Scheduler check failed");
            let failed = SchedulerRun::finished(&run_id, today, RunStatus::Failed, e.to_string(), now);
            if let Err(record_err) = history::record(db, &failed) {
                tracing::warn!(error = %record_err, "Could not record failed run");
            }
            Err(e.into())
        }
    }
}

fn evaluate(
    conn: &Connection,
    config: &SchedulerConfig,
    tz: Tz,
    today: NaiveDate,
    now: DateTime<Utc>,
    run_id: &str,
) -> std::result::Result<CheckOutcome, DatabaseError> {
    let local_time = now.with_timezone(&tz).time();
    let executed_today = history::executed_on_with(conn, today)?;
    let remaining = config.daily_quota.saturating_sub(executed_today);

    let mut summary = CheckSummary {
        run_id: run_id.to_string(),
        date: today,
        local_time,
        daily_quota: config.daily_quota,
        executed_today,
        remaining,
        due_count: 0,
        planned_count: 0,
        flagged: Vec::new(),
    };

    if !config.enabled {
        return Ok(CheckOutcome {
            result: CheckResult::Disabled,
            summary,
        });
    }
    if remaining == 0 {
        return Ok(CheckOutcome {
            result: CheckResult::QuotaExhausted,
            summary,
        });
    }
    let windows = parse_windows(&config.run_windows);
    if !in_any_window(&windows, local_time) {
        return Ok(CheckOutcome {
            result: CheckResult::OutsideWindow,
            summary,
        });
    }

    let now_str = format_timestamp(now);
    let candidates = content_repo::due_candidates_with(conn, &now_str)?;
    summary.due_count = candidates.len() as u32;
    if candidates.is_empty() {
        return Ok(CheckOutcome {
            result: CheckResult::NothingDue,
            summary,
        });
    }

    let types: Vec<&str> = candidates.iter().map(|c| c.content_type.as_str()).collect();
    let picked = mix::select(remaining, &types, &config.content_mix);
    summary.planned_count = picked.len() as u32;

    for idx in picked {
        let content = &candidates[idx];
        if content_repo::mark_ready_with(conn, &content.id, &now_str)? == 1 {
            tracing::info!(content_id = %content.id, content_type = %content.content_type, "Content ready to publish");
            summary.flagged.push(content.id.clone());
        } else {
            log::debug!("Content {} changed status before it could be flagged", content.id);
        }
    }

    Ok(CheckOutcome {
        result: CheckResult::Flagged,
        summary,
    })
}

fn describe(outcome: &CheckOutcome) -> String {
    let s = &outcome.summary;
    match outcome.result {
        CheckResult::Disabled => "scheduler disabled".to_string(),
        CheckResult::QuotaExhausted => format!(
            "daily quota exhausted ({} of {} used)",
            s.executed_today, s.daily_quota
        ),
        CheckResult::OutsideWindow => format!("{} is outside every run window", s.local_time.format("%H:%M")),
        CheckResult::NothingDue => "no scheduled content is due".to_string(),
        CheckResult::Flagged => format!(
            "flagged {} of {} due items ({} of {} quota used before this run)",
            s.flagged.len(),
            s.due_count,
            s.executed_today,
            s.daily_quota
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::publishing::{self, ContentStatus, NewContent};
    use crate::quota;
    use chrono::TimeZone;

    fn at(h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 6, 10, h, m, 0).unwrap()
    }

    fn scheduled(db: &Database, content_type: &str) -> String {
        let c = publishing::create(
            db,
            NewContent {
                content_type: content_type.into(),
                title: "t".into(),
                document: "body".into(),
            },
            at(0, 0),
        )
        .unwrap();
        publishing::schedule(db, &c.id, None, at(0, 0)).unwrap();
        c.id
    }

    fn configure(db: &Database, quota_per_day: u32, windows: &[&str]) {
        quota::save(
            db,
            &SchedulerConfig {
                enabled: true,
                daily_quota: quota_per_day,
                run_windows: windows.iter().map(|w| w.to_string()).collect(),
                timezone: "UTC".into(),
                content_mix: Default::default(),
            },
            at(0, 0),
        )
        .unwrap();
    }

    #[test]
    fn test_window_boundary() {
        let db = Database::open_in_memory().unwrap();
        configure(&db, 10, &["09:00-21:00"]);
        let id = scheduled(&db, "article");

        let early = check_at(&db, at(8, 59)).unwrap();
        assert_eq!(early.result, CheckResult::OutsideWindow);
        assert_eq!(publishing::get(&db, &id).unwrap().status, ContentStatus::Scheduled);

        let open = check_at(&db, at(9, 0)).unwrap();
        assert_eq!(open.result, CheckResult::Flagged);
        assert_eq!(open.summary.flagged, vec![id.clone()]);
        assert_eq!(publishing::get(&db, &id).unwrap().status, ContentStatus::ReadyToPublish);
    }

    #[test]
    fn test_quota_caps_flagging_across_runs() {
        let db = Database::open_in_memory().unwrap();
        configure(&db, 2, &["00:00-24:00"]);
        for _ in 0..3 {
            scheduled(&db, "article");
        }

        let first = check_at(&db, at(10, 0)).unwrap();
        assert_eq!(first.summary.flagged.len(), 2);

        let second = check_at(&db, at(11, 0)).unwrap();
        assert_eq!(second.result, CheckResult::QuotaExhausted);
        assert!(second.summary.flagged.is_empty());

        let ready = publishing::list(&db, Some(ContentStatus::ReadyToPublish), 10).unwrap();
        assert_eq!(ready.len(), 2);
    }

    const FAIL_SECOND_FLAG: &str = "CREATE TRIGGER fail_second_flag
        BEFORE UPDATE OF status ON scheduled_content
        WHEN NEW.status = 'READY_TO_PUBLISH'
         AND (SELECT COUNT(*) FROM scheduled_content WHERE status = 'READY_TO_PUBLISH') >= 1
        BEGIN SELECT RAISE(ABORT, 'disk full'); END;";

    #[test]
    fn test_failed_check_rolls_back_flags() {
        let db = Database::open_in_memory().unwrap();
        configure(&db, 2, &["00:00-24:00"]);
        for _ in 0..4 {
            scheduled(&db, "article");
        }
        db.with_conn(|conn| Ok(conn.execute_batch(FAIL_SECOND_FLAG)?)).unwrap();

        let err = check_at(&db, at(10, 0)).unwrap_err();
        assert!(err.to_string().contains("disk full"), "{err}");
        assert!(publishing::list(&db, Some(ContentStatus::ReadyToPublish), 10)
            .unwrap()
            .is_empty());

        let runs = history::list_recent(&db, 5).unwrap();
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].status, RunStatus::Failed);
        assert_eq!(runs[0].executed_count, 0);

        db.with_conn(|conn| Ok(conn.execute_batch("DROP TRIGGER fail_second_flag;")?))
            .unwrap();
        assert_eq!(check_at(&db, at(10, 5)).unwrap().summary.flagged.len(), 2);
        assert_eq!(check_at(&db, at(10, 10)).unwrap().result, CheckResult::QuotaExhausted);
        assert_eq!(
            publishing::list(&db, Some(ContentStatus::ReadyToPublish), 10).unwrap().len(),
            2
        );
    }

    #[test]
    fn test_zero_quota_and_empty_windows() {
        let db = Database::open_in_memory().unwrap();
        scheduled(&db, "article");

        configure(&db, 0, &["00:00-24:00"]);
        assert_eq!(check_at(&db, at(12, 0)).unwrap().result, CheckResult::QuotaExhausted);

        configure(&db, 5, &[]);
        assert_eq!(check_at(&db, at(12, 0)).unwrap().result, CheckResult::OutsideWindow);

        configure(&db, 5, &["bogus"]);
        assert_eq!(check_at(&db, at(12, 0)).unwrap().result, CheckResult::OutsideWindow);
    }

    #[test]
    fn test_disabled_records_run_only() {
        let db = Database::open_in_memory().unwrap();
        quota::save(
            &db,
            &SchedulerConfig {
                enabled: false,
                ..Default::default()
            },
            at(0, 0),
        )
        .unwrap();
        let id = scheduled(&db, "article");

        let outcome = check_at(&db, at(12, 0)).unwrap();
        assert_eq!(outcome.result, CheckResult::Disabled);
        assert_eq!(publishing::get(&db, &id).unwrap().status, ContentStatus::Scheduled);

        let runs = history::list_recent(&db, 5).unwrap();
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].status, RunStatus::Success);
        assert_eq!(runs[0].log, "scheduler disabled");
    }

    #[test]
    fn test_nothing_due() {
        let db = Database::open_in_memory().unwrap();
        configure(&db, 5, &["00:00-24:00"]);
        let outcome = check_at(&db, at(12, 0)).unwrap();
        assert_eq!(outcome.result, CheckResult::NothingDue);
        assert_eq!(history::executed_on(&db, at(12, 0).date_naive()).unwrap(), 0);
    }

    #[test]
    fn test_local_day_uses_timezone() {
        let db = Database::open_in_memory().unwrap();
        quota::save(
            &db,
            &SchedulerConfig {
                enabled: true,
                daily_quota: 1,
                run_windows: vec!["00:00-24:00".into()],
                timezone: "Asia/Tokyo".into(),
                content_mix: Default::default(),
            },
            at(0, 0),
        )
        .unwrap();
        scheduled(&db, "article");
        scheduled(&db, "article");

        // 14:00 UTC is 23:00 in Tokyo; 15:30 UTC is the next Tokyo day.
        assert_eq!(check_at(&db, at(14, 0)).unwrap().summary.flagged.len(), 1);
        let next_day = check_at(&db, at(15, 30)).unwrap();
        assert_eq!(next_day.summary.executed_today, 0);
        assert_eq!(next_day.summary.flagged.len(), 1);
    }
}
