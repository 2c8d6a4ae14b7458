//! Error types for the sync engine.

use rowsync_protocol::{Conflict, DataETag, IllegalTransition, ProtocolError};
use rowsync_storage::StorageError;
use thiserror::Error;

/// Result type for engine operations.
pub type EngineResult<T> = Result<T, EngineError>;

/// Errors that can occur in the sync engine.
#[derive(Error, Debug)]
pub enum EngineError {
    /// Table, row or changeset does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// The identity lacks the permission for the action.
    #[error("permission denied: user {user_id} may not {action}")]
    PermissionDenied {
        /// Calling user.
        user_id: String,
        /// What was attempted.
        action: String,
    },

    /// The client's row ETag is stale.
    #[error("row {} is in conflict", .0.row_id)]
    Conflict(Box<Conflict>),

    /// A cursor or request no longer matches the table.
    #[error("inconsistent state: {0}")]
    InconsistentState(String),

    /// A column name is undefined or not a valid identifier.
    #[error("bad column name: {0}")]
    BadColumnName(String),

    /// The table lock could not be acquired.
    #[error("timed out acquiring lock for table {table_id} after {tries} tries")]
    TaskLockTimeout {
        /// Table whose lock was contended.
        table_id: String,
        /// Attempts made.
        tries: u32,
    },

    /// An internal ordering guarantee could not be upheld.
    #[error("invariant violation: {0}")]
    InvariantViolation(String),

    /// The requested lifecycle transition is not allowed.
    #[error(transparent)]
    IllegalStateTransition(#[from] IllegalTransition),

    /// A bulk write named a table dataETag that is no longer current.
    #[error("table dataETag mismatch: request has {requested:?}, table is at {current}")]
    TableDataETagMismatch {
        /// dataETag the caller supplied.
        requested: Option<DataETag>,
        /// The table's current dataETag.
        current: DataETag,
    },

    /// Storage backend failure.
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// A persisted record could not be encoded or decoded.
    #[error("codec error: {0}")]
    Codec(String),
}

impl EngineError {
    /// Creates a permission-denied error.
    pub fn denied(user_id: impl Into<String>, action: impl Into<String>) -> Self {
        Self::PermissionDenied {
            user_id: user_id.into(),
            action: action.into(),
        }
    }

    /// Creates a conflict error.
    pub fn conflict(conflict: Conflict) -> Self {
        Self::Conflict(Box::new(conflict))
    }

    /// Returns true if repeating the same request may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            EngineError::TaskLockTimeout { .. } | EngineError::InconsistentState(_)
        )
    }

    /// Returns true if the client must reconcile with the server first.
    pub fn requires_reconcile(&self) -> bool {
        matches!(
            self,
            EngineError::Conflict(_) | EngineError::TableDataETagMismatch { .. }
        )
    }

    /// Returns true if the caller was refused access.
    pub fn is_denied(&self) -> bool {
        matches!(self, EngineError::PermissionDenied { .. })
    }

    /// Returns the conflict record, if this is a conflict.
    pub fn as_conflict(&self) -> Option<&Conflict> {
        match self {
            EngineError::Conflict(conflict) => Some(conflict),
            _ => None,
        }
    }
}

impl From<ProtocolError> for EngineError {
    fn from(err: ProtocolError) -> Self {
        EngineError::Codec(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rowsync_protocol::{Row, RowEvent, SyncState};

    #[test]
    fn classification() {
        let timeout = EngineError::TaskLockTimeout {
            table_id: "t".into(),
            tries: 5,
        };
        assert!(timeout.is_retryable());
        assert!(!timeout.requires_reconcile());

        let conflict = EngineError::conflict(Conflict {
            row_id: "r1".into(),
            client_row_etag: None,
            client_row: None,
            server_row: Row::new("r1"),
        });
        assert!(conflict.requires_reconcile());
        assert!(conflict.as_conflict().is_some());

        assert!(EngineError::denied("bob", "read row r1").is_denied());
        assert!(!EngineError::NotFound("t".into()).is_retryable());
    }

    #[test]
    fn illegal_transition_converts() {
        let err: EngineError = SyncState::Deleted
            .apply(RowEvent::Update)
            .unwrap_err()
            .into();
        assert!(matches!(err, EngineError::IllegalStateTransition(_)));
        assert!(err.to_string().contains("illegal state transition"));
    }
}
