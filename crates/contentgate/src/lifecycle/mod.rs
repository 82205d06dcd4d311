//! State machines for jobs, schedules and schedule keywords.
//!
//! Every status enum implements [`Lifecycle`], which gives it a transition
//! table and a terminal-state predicate. [`validate_transition`] is the one
//! place that turns a disallowed move into a [`TransitionError`] carrying a
//! human-readable reason.

use std::fmt;

pub mod job;
pub mod schedule;
pub mod workflow;

pub use job::{Job, JobFilter, JobStatus, JobType, NewJob};
pub use schedule::{KeywordStatus, Schedule, ScheduleKeyword, ScheduleStatus};
pub use workflow::{can_cancel, can_pause, can_resume, WorkflowStatus};

/// A status enum with a fixed transition table.
pub trait Lifecycle: Copy + Eq + fmt::Debug + 'static {
    /// Every variant, in declaration order.
    const ALL: &'static [Self];

    /// The persisted / displayed name (`SCREAMING_SNAKE_CASE`).
    fn as_str(&self) -> &'static str;

    /// Whether `self -> target` is in the transition table.
    fn can_transition_to(&self, target: Self) -> bool;

    /// Terminal states have no outgoing transitions.
    fn is_terminal(&self) -> bool;

    /// States from which `target` can be reached.
    fn sources_of(target: Self) -> Vec<Self> {
        Self::ALL
            .iter()
            .copied()
            .filter(|s| s.can_transition_to(target))
            .collect()
    }
}

/// A rejected state transition.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("cannot move from {from} to {to}: {reason}")]
pub struct TransitionError {
    pub from: &'static str,
    pub to: &'static str,
    pub reason: String,
}

/// Validates `from -> to` against the status type's transition table.
pub fn validate_transition<S: Lifecycle>(from: S, to: S) -> Result<(), TransitionError> {
    if from.can_transition_to(to) {
        return Ok(());
    }

    let reason = if from == to {
        format!("already {}", from.as_str())
    } else if from.is_terminal() {
        format!("{} is a terminal state", from.as_str())
    } else {
        let sources = S::sources_of(to);
        if sources.is_empty() {
            format!("{} cannot be entered by a transition", to.as_str())
        } else {
            let names: Vec<&str> = sources.iter().map(|s| s.as_str()).collect();
            format!("allowed only from {}", names.join(" or "))
        }
    };

    Err(TransitionError {
        from: from.as_str(),
        to: to.as_str(),
        reason,
    })
}
