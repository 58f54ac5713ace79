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

    /// The database lock was poisoned.
    #[error("Database lock poisoned")]
    LockPoisoned,

    /// Query parameters out of range.
    #[error("Invalid query: {0}")]
    InvalidQuery(String),
}

/// Errors from a [`BatchStore`](super::BatchStore) write cycle.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("No transaction in progress")]
    NoTransaction,

    #[error("A transaction is already in progress")]
    TransactionInProgress,

    /// The backend refused the write; used by non-SQLite stores.
    #[error("Write rejected: {0}")]
    Rejected(String),
}
