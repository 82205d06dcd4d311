//! The ordered checks every execution attempt passes before dispatch.

use serde::Serialize;

/// One step of the guard chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum GuardStep {
    Authenticated,
    HighestRole,
    SafeModeOff,
    ApprovalExists,
    StatusApproved,
    NotYetExecuted,
    RateLimit,
}

/// Evaluated strictly in this order; the first failure wins.
pub const GUARD_CHAIN: [GuardStep; 7] = [
    GuardStep::Authenticated,
    GuardStep::HighestRole,
    GuardStep::SafeModeOff,
    GuardStep::ApprovalExists,
    GuardStep::StatusApproved,
    GuardStep::NotYetExecuted,
    GuardStep::RateLimit,
];

impl GuardStep {
    pub fn name(&self) -> &'static str {
        match self {
            GuardStep::Authenticated => "authenticated",
            GuardStep::HighestRole => "highest_role",
            GuardStep::SafeModeOff => "safe_mode_off",
            GuardStep::ApprovalExists => "approval_exists",
            GuardStep::StatusApproved => "status_approved",
            GuardStep::NotYetExecuted => "not_yet_executed",
            GuardStep::RateLimit => "rate_limit",
        }
    }

    /// Whether the step needs the approval row loaded.
    pub fn needs_approval(&self) -> bool {
        matches!(
            self,
            GuardStep::ApprovalExists | GuardStep::StatusApproved | GuardStep::NotYetExecuted
        )
    }
}

impl std::fmt::Display for GuardStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}
