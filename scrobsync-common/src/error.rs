//! Common error types for scrobsync

use thiserror::Error;

/// Common result type for scrobsync operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors shared by the listen store, the catalog and configuration loading
#[derive(Error, Debug)]
pub enum Error {
    /// Local storage error (wraps sqlx::Error)
    ///
    /// Fatal for the current operation: a listen that cannot be persisted
    /// must be reported to the caller, never dropped silently.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// I/O operation error (wraps std::io::Error)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration loading or validation error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Requested entity not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Invalid caller input (bad range, unknown enum tag in storage, ...)
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// True when SQLite reported lock contention (`SQLITE_BUSY`)
    pub fn is_database_locked(&self) -> bool {
        match self {
            Error::Database(db_err) => db_err.to_string().contains("database is locked"),
            _ => false,
        }
    }
}
