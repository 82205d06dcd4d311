//! Priority work queue polled by external engines.
//!
//! The queue is advisory: reads that fail (or hit a row that cannot be
//! decoded) degrade to an empty result with a warning, while writes always
//! surface their error. The `jobs` table, not the queue, is the record of
//! which jobs exist.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::db::queue_repo::{self, NewTaskRow, QueueRow};
use crate::db::{Database, DatabaseError};
use crate::error::Result;
use crate::time::{format_timestamp, parse_timestamp};

/// A task waiting for an engine.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct QueueTask {
    pub id: String,
    pub engine: String,
    pub task_type: String,
    pub params: serde_json::Value,
    pub priority: i64,
    pub created_at: DateTime<Utc>,
}

impl QueueTask {
    fn from_row(row: QueueRow) -> std::result::Result<Self, DatabaseError> {
        let params = serde_json::from_str(&row.params).map_err(|e| {
            DatabaseError::corrupt("work_queue", &row.id, format!("bad params: {}", e))
        })?;
        let created_at = parse_timestamp(&row.created_at).ok_or_else(|| {
            DatabaseError::corrupt(
                "work_queue",
                &row.id,
                format!("bad created_at '{}'", row.created_at),
            )
        })?;
        Ok(Self {
            id: row.id,
            engine: row.engine,
            task_type: row.task_type,
            params,
            priority: row.priority,
            created_at,
        })
    }
}

#[derive(Clone)]
pub struct WorkQueue {
    db: Database,
}

impl WorkQueue {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Appends a task and returns its id.
    pub fn enqueue(
        &self,
        engine: &str,
        task_type: &str,
        params: &serde_json::Value,
        priority: i64,
        now: DateTime<Utc>,
    ) -> Result<String> {
        let id = Uuid::new_v4().to_string();
        let params = serde_json::to_string(params).map_err(DatabaseError::from)?;
        let created_at = format_timestamp(now);

        let seq = queue_repo::insert(
            &self.db,
            &NewTaskRow {
                id: &id,
                engine,
                task_type,
                params: &params,
                priority,
                created_at: &created_at,
            },
        )?;

        tracing::debug!(task_id = %id, engine, task_type, priority, seq, "Task enqueued");
        Ok(id)
    }

    /// Up to `limit` tasks in queue order. Callers must not re-sort.
    pub fn peek(&self, limit: u64) -> Vec<QueueTask> {
        let rows = match queue_repo::peek(&self.db, limit) {
            Ok(rows) => rows,
            Err(e) => {
                tracing::warn!(error = %e, "Queue read failed, returning empty list");
                return Vec::new();
            }
        };

        match rows
            .into_iter()
            .map(QueueTask::from_row)
            .collect::<std::result::Result<Vec<_>, _>>()
        {
            Ok(tasks) => tasks,
            Err(e) => {
                tracing::warn!(error = %e, "Queue contains an unreadable task, returning empty list");
                Vec::new()
            }
        }
    }

    /// Atomically removes and returns the head task for `engine`.
    pub fn take_next(&self, engine: &str) -> Result<Option<QueueTask>> {
        match queue_repo::take_next(&self.db, engine)? {
            Some(row) => {
                let task = QueueTask::from_row(row)?;
                tracing::debug!(task_id = %task.id, engine, "Task dequeued");
                Ok(Some(task))
            }
            None => Ok(None),
        }
    }

    pub fn clear(&self) -> Result<usize> {
        let removed = queue_repo::clear(&self.db)?;
        tracing::info!(removed, "Work queue cleared");
        Ok(removed)
    }

    pub fn len(&self) -> u64 {
        queue_repo::count(&self.db).unwrap_or_else(|e| {
            tracing::warn!(error = %e, "Queue count failed, reporting 0");
            0
        })
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
