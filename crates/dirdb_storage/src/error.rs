//! Error types for storage operations.

use std::io;
use thiserror::Error;

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors that can occur during storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The store file is corrupted.
    #[error("storage corrupted: {0}")]
    Corrupted(String),

    /// An insert found the key already present.
    #[error("key already exists")]
    KeyExists,

    /// The key is not present.
    #[error("key not found")]
    KeyNotFound,

    /// The operation requires a lock that is not held.
    #[error("database lock not held: {0}")]
    NotLocked(&'static str),

    /// An exclusive lock was requested while only a shared lock is held.
    #[error("cannot upgrade a shared database lock to exclusive")]
    LockUpgrade,

    /// The store was opened read-only.
    #[error("store is read-only")]
    ReadOnly,

    /// Commit or cancel without an open transaction.
    #[error("no transaction in progress")]
    NoTransaction,
}

impl StorageError {
    /// Creates a corruption error.
    pub fn corrupted(message: impl Into<String>) -> Self {
        Self::Corrupted(message.into())
    }
}
