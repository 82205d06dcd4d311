//! Scheduled content and the manual publish step.
//!
//! The quota enforcer only ever moves content from SCHEDULED to
//! READY_TO_PUBLISH. Publishing is a separate, explicit call that is safe
//! to repeat: a second publish of the same item reports
//! [`PublishOutcome::AlreadyPublished`] and changes nothing.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::db::content_repo::{self, ContentRow};
use crate::db::{Database, DatabaseError};
use crate::error::{CoreError, Result};
use crate::lifecycle::{validate_transition, Lifecycle};
use crate::time::{format_timestamp, parse_timestamp};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ContentStatus {
    Draft,
    Scheduled,
    ReadyToPublish,
    Published,
    Archived,
}

impl ContentStatus {
    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|st| st.as_str() == s)
    }
}

impl Lifecycle for ContentStatus {
    const ALL: &'static [Self] = &[
        ContentStatus::Draft,
        ContentStatus::Scheduled,
        ContentStatus::ReadyToPublish,
        ContentStatus::Published,
        ContentStatus::Archived,
    ];

    fn as_str(&self) -> &'static str {
        match self {
            ContentStatus::Draft => "DRAFT",
            ContentStatus::Scheduled => "SCHEDULED",
            ContentStatus::ReadyToPublish => "READY_TO_PUBLISH",
            ContentStatus::Published => "PUBLISHED",
            ContentStatus::Archived => "ARCHIVED",
        }
    }

    fn can_transition_to(&self, target: ContentStatus) -> bool {
        use ContentStatus::*;
        matches!(
            (self, target),
            (Draft, Scheduled)
                | (Scheduled, ReadyToPublish)
                | (ReadyToPublish, Published)
                | (Draft, Archived)
                | (Scheduled, Archived)
                | (ReadyToPublish, Archived)
                | (Published, Archived)
        )
    }

    fn is_terminal(&self) -> bool {
        matches!(self, ContentStatus::Archived)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ScheduledContent {
    pub id: String,
    pub content_type: String,
    pub title: String,
    pub document: String,
    pub status: ContentStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scheduled_for: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ready_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub published_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ScheduledContent {
    pub(crate) fn from_row(row: ContentRow) -> std::result::Result<Self, DatabaseError> {
        let id = row.id;
        let status = ContentStatus::parse(&row.status).ok_or_else(|| {
            DatabaseError::corrupt("scheduled_content", &id, format!("unknown status '{}'", row.status))
        })?;
        let opt = |v: Option<String>, column: &str| match v {
            None => Ok(None),
            Some(s) => parse_timestamp(&s)
                .map(Some)
                .ok_or_else(|| DatabaseError::corrupt("scheduled_content", &id, format!("bad {}", column))),
        };
        let scheduled_for = opt(row.scheduled_for, "scheduled_for")?;
        let ready_at = opt(row.ready_at, "ready_at")?;
        let published_at = opt(row.published_at, "published_at")?;
        let created_at = opt(Some(row.created_at), "created_at")?.unwrap_or_default();
        let updated_at = opt(Some(row.updated_at), "updated_at")?.unwrap_or_default();

        Ok(Self {
            id,
            content_type: row.content_type,
            title: row.title,
            document: row.document,
            status,
            scheduled_for,
            ready_at,
            published_at,
            created_at,
            updated_at,
        })
    }
}

/// Input for [`create`].
#[derive(Debug, Clone)]
pub struct NewContent {
    pub content_type: String,
    pub title: String,
    pub document: String,
}

/// Result of a publish call.
#[derive(Debug, Clone, PartialEq)]
pub enum PublishOutcome {
    Published(ScheduledContent),
    AlreadyPublished(ScheduledContent),
}

impl PublishOutcome {
    pub fn content(&self) -> &ScheduledContent {
        match self {
            PublishOutcome::Published(c) | PublishOutcome::AlreadyPublished(c) => c,
        }
    }
}

pub fn create(db: &Database, new: NewContent, now: DateTime<Utc>) -> Result<ScheduledContent> {
    if new.content_type.trim().is_empty() {
        return Err(CoreError::InvalidInput("content type must not be empty".into()));
    }
    if new.title.trim().is_empty() {
        return Err(CoreError::InvalidInput("title must not be empty".into()));
    }

    let id = Uuid::new_v4().to_string();
    let now = format_timestamp(now);
    content_repo::insert(
        db,
        &ContentRow {
            id: id.clone(),
            content_type: new.content_type,
            title: new.title,
            document: new.document,
            status: ContentStatus::Draft.as_str().to_string(),
            scheduled_for: None,
            ready_at: None,
            published_at: None,
            created_at: now.clone(),
            updated_at: now,
        },
    )?;
    get(db, &id)
}

pub fn get(db: &Database, id: &str) -> Result<ScheduledContent> {
    let row = content_repo::find_by_id(db, id)?.ok_or_else(|| CoreError::not_found("content", id))?;
    Ok(ScheduledContent::from_row(row)?)
}

pub fn list(db: &Database, status: Option<ContentStatus>, limit: u64) -> Result<Vec<ScheduledContent>> {
    content_repo::list(db, status.as_ref().map(|s| s.as_str()), limit)?
        .into_iter()
        .map(|row| Ok(ScheduledContent::from_row(row)?))
        .collect()
}

/// DRAFT -> SCHEDULED. `scheduled_for = None` means due immediately.
pub fn schedule(
    db: &Database,
    id: &str,
    scheduled_for: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
) -> Result<ScheduledContent> {
    let current = get(db, id)?;
    validate_transition(current.status, ContentStatus::Scheduled)?;

    let changed = content_repo::schedule(
        db,
        id,
        scheduled_for.map(format_timestamp).as_deref(),
        &format_timestamp(now),
    )?;
    if changed == 0 {
        return Err(conflict(db, id, ContentStatus::Scheduled));
    }
    tracing::info!(content_id = %id, "Content scheduled");
    get(db, id)
}

/// Replaces the document of unpublished content.
pub fn update_document(
    db: &Database,
    id: &str,
    document: &str,
    now: DateTime<Utc>,
) -> Result<ScheduledContent> {
    let changed = content_repo::update_document(db, id, document, &format_timestamp(now))?;
    if changed == 0 {
        let current = get(db, id)?;
        return Err(CoreError::InvalidInput(format!(
            "content '{}' is {} and can no longer be edited",
            id,
            current.status.as_str()
        )));
    }
    get(db, id)
}

/// Publishes READY_TO_PUBLISH content with a non-empty document.
pub fn publish(db: &Database, id: &str, now: DateTime<Utc>) -> Result<PublishOutcome> {
    let current = get(db, id)?;
    if current.status == ContentStatus::Published {
        return Ok(PublishOutcome::AlreadyPublished(current));
    }
    if current.document.trim().is_empty() {
        return Err(CoreError::InvalidInput(format!(
            "content '{}' has an empty document",
            id
        )));
    }
    validate_transition(current.status, ContentStatus::Published)?;

    let changed = content_repo::publish(db, id, &format_timestamp(now))?;
    if changed == 0 {
        let latest = get(db, id)?;
        if latest.status == ContentStatus::Published {
            return Ok(PublishOutcome::AlreadyPublished(latest));
        }
        return Err(conflict(db, id, ContentStatus::Published));
    }

    tracing::info!(content_id = %id, "Content published");
    Ok(PublishOutcome::Published(get(db, id)?))
}

pub fn archive(db: &Database, id: &str, now: DateTime<Utc>) -> Result<ScheduledContent> {
    let current = get(db, id)?;
    validate_transition(current.status, ContentStatus::Archived)?;

    let changed = content_repo::update_status(
        db,
        id,
        current.status.as_str(),
        ContentStatus::Archived.as_str(),
        &format_timestamp(now),
    )?;
    if changed == 0 {
        return Err(conflict(db, id, ContentStatus::Archived));
    }
    get(db, id)
}

fn conflict(db: &Database, id: &str, target: ContentStatus) -> CoreError {
    match get(db, id) {
        Ok(latest) => match validate_transition(latest.status, target) {
            Err(e) => e.into(),
            Ok(()) => CoreError::InvalidTransition {
                from: latest.status.as_str().to_string(),
                to: target.as_str().to_string(),
                reason: "concurrent update, try again".to_string(),
            },
        },
        Err(e) => e,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 5, 5, 10, 0, 0).unwrap()
    }

    fn draft(db: &Database, document: &str) -> ScheduledContent {
        create(
            db,
            NewContent {
                content_type: "article".into(),
                title: "Brewing guide".into(),
                document: document.into(),
            },
            now(),
        )
        .unwrap()
    }

    fn make_ready(db: &Database, id: &str) {
        schedule(db, id, None, now()).unwrap();
        assert_eq!(content_repo::mark_ready(db, id, &format_timestamp(now())).unwrap(), 1);
    }

    #[test]
    fn test_publish_is_idempotent() {
        let db = Database::open_in_memory().unwrap();
        let c = draft(&db, "# Brewing");
        make_ready(&db, &c.id);

        let first = publish(&db, &c.id, now()).unwrap();
        assert!(matches!(first, PublishOutcome::Published(_)));
        assert_eq!(first.content().published_at, Some(now()));

        let second = publish(&db, &c.id, now()).unwrap();
        assert!(matches!(second, PublishOutcome::AlreadyPublished(_)));
    }

    #[test]
    fn test_publish_requires_ready_status() {
        let db = Database::open_in_memory().unwrap();
        let c = draft(&db, "# Brewing");
        schedule(&db, &c.id, None, now()).unwrap();

        let err = publish(&db, &c.id, now()).unwrap_err();
        match err {
            CoreError::InvalidTransition { reason, .. } => {
                assert_eq!(reason, "allowed only from READY_TO_PUBLISH");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_publish_requires_document() {
        let db = Database::open_in_memory().unwrap();
        let c = draft(&db, "");
        make_ready(&db, &c.id);

        let err = publish(&db, &c.id, now()).unwrap_err();
        assert!(matches!(err, CoreError::InvalidInput(_)));
        assert_eq!(get(&db, &c.id).unwrap().status, ContentStatus::ReadyToPublish);
    }

    #[test]
    fn test_archived_cannot_be_edited() {
        let db = Database::open_in_memory().unwrap();
        let c = draft(&db, "text");
        archive(&db, &c.id, now()).unwrap();

        assert!(update_document(&db, &c.id, "new", now()).is_err());
        assert!(archive(&db, &c.id, now()).is_err());
    }

    #[test]
    fn test_schedule_twice_rejected() {
        let db = Database::open_in_memory().unwrap();
        let c = draft(&db, "text");
        let scheduled = schedule(&db, &c.id, Some(now()), now()).unwrap();
        assert_eq!(scheduled.scheduled_for, Some(now()));
        assert!(schedule(&db, &c.id, None, now()).is_err());
    }
}
