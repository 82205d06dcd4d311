use std::path::PathBuf;
use std::time::Duration;

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::gate::auth::Role;
use crate::gate::handlers::HandlerError;
use crate::lifecycle::TransitionError;

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Authentication required")]
    Unauthorized,

    #[error("Principal '{principal}' ({role}) is not allowed to {operation}: requires {required}")]
    Forbidden {
        principal: String,
        role: Role,
        operation: &'static str,
        required: String,
    },

    #[error("SAFE_MODE is active; side-effecting actions are blocked")]
    SafeModeActive,

    #[error("{kind} '{id}' not found")]
    NotFound { kind: &'static str, id: String },

    #[error("Invalid transition from {from} to {to}: {reason}")]
    InvalidTransition {
        from: String,
        to: String,
        reason: String,
    },

    #[error("{kind} '{id}' is {current}: {reason}")]
    Conflict {
        kind: &'static str,
        id: String,
        current: String,
        reason: String,
    },

    #[error("Approval '{id}' is {current}; execution requires APPROVED")]
    InvalidState { id: String, current: String },

    #[error("Approval '{id}' has already been executed{}", detail_suffix(.detail))]
    AlreadyExecuted { id: String, detail: Option<String> },

    #[error("Rate limit exceeded for '{key}'; retry after {}s", retry_display(.retry_after_ms))]
    RateLimited {
        key: String,
        reset_at: DateTime<Utc>,
        retry_after_ms: u64,
    },

    #[error("Job '{id}' is not ready until {scheduled_at}")]
    NotReady {
        id: String,
        scheduled_at: DateTime<Utc>,
    },

    #[error("Execution of approval '{id}' failed: {source}")]
    ExecutionFailed {
        id: String,
        #[source]
        source: HandlerError,
    },

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Database error: {0}")]
    Database(#[from] crate::db::DatabaseError),
}

fn detail_suffix(detail: &Option<String>) -> String {
    detail
        .as_ref()
        .map(|d| format!(" ({})", d))
        .unwrap_or_default()
}

fn retry_secs(ms: u64) -> u64 {
    ms.div_ceil(1000)
}

fn retry_display(ms: &u64) -> u64 {
    retry_secs(*ms)
}

impl From<TransitionError> for CoreError {
    fn from(err: TransitionError) -> Self {
        CoreError::InvalidTransition {
            from: err.from.to_string(),
            to: err.to.to_string(),
            reason: err.reason,
        }
    }
}

impl CoreError {
    pub(crate) fn not_found(kind: &'static str, id: &str) -> Self {
        CoreError::NotFound {
            kind,
            id: id.to_string(),
        }
    }

    /// HTTP status an outer API layer should answer with.
    pub fn http_status(&self) -> u16 {
        match self {
            CoreError::Unauthorized => 401,
            CoreError::Forbidden { .. } | CoreError::SafeModeActive => 403,
            CoreError::NotFound { .. } => 404,
            CoreError::InvalidTransition { .. } => 400,
            CoreError::Conflict { .. } => 409,
            CoreError::InvalidState { .. } | CoreError::NotReady { .. } => 400,
            CoreError::InvalidInput(_) => 400,
            CoreError::AlreadyExecuted { .. } => 409,
            CoreError::RateLimited { .. } => 429,
            CoreError::ExecutionFailed { .. } | CoreError::Config(_) | CoreError::Database(_) => {
                500
            }
        }
    }

    /// Delay a rate-limited caller should wait before retrying.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            CoreError::RateLimited { retry_after_ms, .. } => {
                Some(Duration::from_millis(*retry_after_ms))
            }
            _ => None,
        }
    }

    /// Value for a `Retry-After` header (whole seconds, rounded up).
    pub fn retry_after_header(&self) -> Option<String> {
        match self {
            CoreError::RateLimited { retry_after_ms, .. } => {
                Some(retry_secs(*retry_after_ms).max(1).to_string())
            }
            _ => None,
        }
    }

    /// Short machine-readable code, used for audit rows.
    pub fn code(&self) -> &'static str {
        match self {
            CoreError::Unauthorized => "unauthorized",
            CoreError::Forbidden { .. } => "forbidden",
            CoreError::SafeModeActive => "safe_mode_active",
            CoreError::NotFound { .. } => "not_found",
            CoreError::InvalidTransition { .. } => "invalid_transition",
            CoreError::Conflict { .. } => "conflict",
            CoreError::InvalidState { .. } => "invalid_state",
            CoreError::AlreadyExecuted { .. } => "already_executed",
            CoreError::RateLimited { .. } => "rate_limited",
            CoreError::NotReady { .. } => "not_ready",
            CoreError::ExecutionFailed { .. } => "execution_failed",
            CoreError::InvalidInput(_) => "invalid_input",
            CoreError::Config(_) => "config",
            CoreError::Database(_) => "database",
        }
    }
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config YAML: {0}")]
    ParseYaml(#[from] serde_yaml::Error),

    #[error("Config validation failed: {message}")]
    Validation { message: String },

    #[error("Unknown timezone '{0}'")]
    UnknownTimezone(String),

    #[error("Logging setup failed: {0}")]
    Logging(String),
}

pub type Result<T> = std::result::Result<T, CoreError>;
