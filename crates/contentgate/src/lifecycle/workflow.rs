//! Abstract workflow status shared by pause/resume/cancel decisions.
//!
//! Persisted schedule statuses are mapped onto this vocabulary by
//! [`crate::lifecycle::schedule::ScheduleStatus::workflow_status`], so all
//! schedule transitions go through the single table below.

use serde::{Deserialize, Serialize};

use super::Lifecycle;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WorkflowStatus {
    Scheduled,
    Running,
    Paused,
    Failed,
    Completed,
    Cancelled,
}

impl Lifecycle for WorkflowStatus {
    const ALL: &'static [Self] = &[
        WorkflowStatus::Scheduled,
        WorkflowStatus::Running,
        WorkflowStatus::Paused,
        WorkflowStatus::Failed,
        WorkflowStatus::Completed,
        WorkflowStatus::Cancelled,
    ];

    fn as_str(&self) -> &'static str {
        match self {
            WorkflowStatus::Scheduled => "SCHEDULED",
            WorkflowStatus::Running => "RUNNING",
            WorkflowStatus::Paused => "PAUSED",
            WorkflowStatus::Failed => "FAILED",
            WorkflowStatus::Completed => "COMPLETED",
            WorkflowStatus::Cancelled => "CANCELLED",
        }
    }

    fn can_transition_to(&self, target: WorkflowStatus) -> bool {
        use WorkflowStatus::*;
        matches!(
            (self, target),
            (Scheduled, Running)
                | (Scheduled, Paused)
                | (Scheduled, Completed)
                | (Scheduled, Cancelled)
                | (Running, Paused)
                | (Running, Completed)
                | (Running, Failed)
                | (Running, Cancelled)
                | (Paused, Scheduled)
                | (Paused, Cancelled)
                | (Failed, Scheduled)
                | (Failed, Cancelled)
        )
    }

    fn is_terminal(&self) -> bool {
        matches!(self, WorkflowStatus::Completed | WorkflowStatus::Cancelled)
    }
}

impl std::fmt::Display for WorkflowStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

pub fn can_pause(status: WorkflowStatus) -> bool {
    matches!(status, WorkflowStatus::Scheduled | WorkflowStatus::Running)
}

pub fn can_resume(status: WorkflowStatus) -> bool {
    status == WorkflowStatus::Paused
}

pub fn can_cancel(status: WorkflowStatus) -> bool {
    !status.is_terminal()
}
