//! Human-approved irreversible actions and the gate that runs them.

pub mod approval;
pub mod auth;
pub mod executor;
pub mod guards;
pub mod handlers;

pub use approval::{ActionApproval, ApprovalStatus, NewAction};
pub use auth::{Permission, Principal, Role};
pub use executor::{list_attempts, ExecutionAttempt, ExecutionGate, ExecutionReceipt};
pub use guards::{GuardStep, GUARD_CHAIN};
pub use handlers::{ActionContext, ActionHandler, HandlerError, HandlerRegistry};
