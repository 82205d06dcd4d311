pub mod broadcast;
pub mod config;
pub mod control;
pub mod db;
pub mod error;
pub mod gate;
pub mod history;
pub mod lifecycle;
pub mod publishing;
pub mod queue;
pub mod quota;
pub mod rate_limit;
pub mod telemetry;
pub mod time;

pub use broadcast::{EntityKind, EventBroadcaster, LifecycleEvent};
pub use config::{load_config, load_config_from_str, CoreConfig};
pub use control::{Clock, ControlPlane, JobRequest};
pub use db::{Database, DatabaseError};
pub use error::{ConfigError, CoreError, Result};
pub use gate::{
    ActionApproval, ActionContext, ActionHandler, ApprovalStatus, ExecutionGate, HandlerError,
    HandlerRegistry, NewAction, Permission, Principal, Role, GUARD_CHAIN,
};
pub use lifecycle::{
    validate_transition, Job, JobStatus, JobType, Lifecycle, Schedule, ScheduleStatus,
    TransitionError, WorkflowStatus,
};
pub use publishing::{ContentStatus, PublishOutcome, ScheduledContent};
pub use queue::{QueueTask, WorkQueue};
pub use quota::{CheckOutcome, SchedulerConfig};
pub use rate_limit::{RateLimitRule, RateLimitStore};
pub use telemetry::init_logging;
