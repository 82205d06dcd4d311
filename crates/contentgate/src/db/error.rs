//! Database error types.

use std::path::PathBuf;
use thiserror::Error;

/// Errors from database operations.
#[derive(Error, Debug)]
pub enum DatabaseError {
    /// SQLite error from rusqlite.
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// IO error when creating directories or files.
    #[error("IO error for path '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A migration failed to apply.
    #[error("Migration failed at version {version}: {reason}")]
    Migration { version: u32, reason: String },

    /// A stored row could not be decoded into its domain type.
    #[error("Corrupt {table} row '{id}': {reason}")]
    CorruptRow {
        table: &'static str,
        id: String,
        reason: String,
    },

    /// A JSON column could not be encoded.
    #[error("JSON encoding error: {0}")]
    Json(#[from] serde_json::Error),

    /// The database lock was poisoned.
    #[error("Database lock poisoned")]
    LockPoisoned,
}

impl DatabaseError {
    pub(crate) fn corrupt(table: &'static str, id: &str, reason: impl Into<String>) -> Self {
        DatabaseError::CorruptRow {
            table,
            id: id.to_string(),
            reason: reason.into(),
        }
    }
}
