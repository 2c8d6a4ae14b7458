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

    /// A conditional put found a different version than expected.
    #[error("precondition failed for {space}/{key}: expected {expected}, found {actual:?}")]
    PreconditionFailed {
        /// Key space.
        space: String,
        /// Record key.
        key: String,
        /// Human readable form of the precondition.
        expected: String,
        /// Version actually stored, if any.
        actual: Option<u64>,
    },

    /// The journal file is corrupted.
    #[error("storage corrupted: {0}")]
    Corrupted(String),

    /// Another process holds the journal file.
    #[error("storage is locked by another process: {0}")]
    Locked(String),

    /// A journal record could not be encoded.
    #[error("encoding error: {0}")]
    Encoding(String),
}

impl StorageError {
    /// Returns true if this error came from a failed compare-and-set.
    pub fn is_precondition_failure(&self) -> bool {
        matches!(self, StorageError::PreconditionFailed { .. })
    }
}
