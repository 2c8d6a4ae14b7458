//! Error types for the sync server.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use rowsync_engine::EngineError;
use rowsync_protocol::{ErrorBody, ErrorKind, PROTOCOL_VERSION, VERSION_HEADER};
use rowsync_storage::StorageError;
use thiserror::Error;

/// Result type for server operations.
pub type ServerResult<T> = Result<T, ServerError>;

/// Errors that can occur in the sync server.
#[derive(Error, Debug)]
pub enum ServerError {
    /// Invalid request format.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// The request named no user.
    #[error("missing user header")]
    MissingIdentity,

    /// Protocol version mismatch.
    #[error("protocol version mismatch: {0}")]
    ProtocolMismatch(String),

    /// Engine failure.
    #[error(transparent)]
    Engine(#[from] EngineError),

    /// Store could not be opened.
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// Internal server error.
    #[error("internal error: {0}")]
    Internal(String),

    /// I/O error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl ServerError {
    /// Returns true if this is a client error (4xx).
    pub fn is_client_error(&self) -> bool {
        self.status().is_client_error()
    }

    /// Returns true if this is a server error (5xx).
    pub fn is_server_error(&self) -> bool {
        self.status().is_server_error()
    }

    /// HTTP status for the error.
    pub fn status(&self) -> StatusCode {
        match self {
            ServerError::InvalidRequest(_) | ServerError::ProtocolMismatch(_) => {
                StatusCode::BAD_REQUEST
            }
            ServerError::MissingIdentity => StatusCode::UNAUTHORIZED,
            ServerError::Engine(e) => match e {
                EngineError::NotFound(_) => StatusCode::NOT_FOUND,
                EngineError::PermissionDenied { .. } => StatusCode::FORBIDDEN,
                EngineError::Conflict(_)
                | EngineError::TableDataETagMismatch { .. }
                | EngineError::IllegalStateTransition(_) => StatusCode::CONFLICT,
                EngineError::InconsistentState(_) => StatusCode::GONE,
                EngineError::BadColumnName(_) => StatusCode::BAD_REQUEST,
                EngineError::TaskLockTimeout { .. } => StatusCode::SERVICE_UNAVAILABLE,
                EngineError::InvariantViolation(_)
                | EngineError::Storage(_)
                | EngineError::Codec(_) => StatusCode::INTERNAL_SERVER_ERROR,
            },
            ServerError::Storage(_) | ServerError::Internal(_) | ServerError::Io(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Wire error class for the error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            ServerError::InvalidRequest(_) | ServerError::ProtocolMismatch(_) => {
                ErrorKind::BadRequest
            }
            ServerError::MissingIdentity => ErrorKind::PermissionDenied,
            ServerError::Engine(e) => match e {
                EngineError::NotFound(_) => ErrorKind::NotFound,
                EngineError::PermissionDenied { .. } => ErrorKind::PermissionDenied,
                EngineError::Conflict(_) | EngineError::IllegalStateTransition(_) => {
                    ErrorKind::Conflict
                }
                EngineError::TableDataETagMismatch { .. } => ErrorKind::TableDataETagMismatch,
                EngineError::InconsistentState(_) => ErrorKind::InconsistentState,
                EngineError::BadColumnName(_) => ErrorKind::BadColumnName,
                EngineError::TaskLockTimeout { .. } => ErrorKind::TaskLockTimeout,
                EngineError::InvariantViolation(_)
                | EngineError::Storage(_)
                | EngineError::Codec(_) => ErrorKind::Internal,
            },
            ServerError::Storage(_) | ServerError::Internal(_) | ServerError::Io(_) => {
                ErrorKind::Internal
            }
        }
    }

    /// Converts the error into its JSON body.
    pub fn to_body(&self) -> ErrorBody {
        let conflict = match self {
            ServerError::Engine(e) => e.as_conflict().cloned(),
            _ => None,
        };
        let message = if self.is_server_error() {
            "internal server error".to_string()
        } else {
            self.to_string()
        };
        ErrorBody {
            kind: self.kind(),
            message,
            conflict,
        }
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        } else {
            tracing::debug!(error = %self, %status, "request rejected");
        }
        (
            status,
            [(VERSION_HEADER, PROTOCOL_VERSION)],
            Json(self.to_body()),
        )
            .into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rowsync_protocol::{Conflict, DataETag, Row, RowETag};

    #[test]
    fn error_classification() {
        assert!(ServerError::InvalidRequest("bad".into()).is_client_error());
        assert!(ServerError::Internal("oops".into()).is_server_error());
        assert!(!ServerError::InvalidRequest("bad".into()).is_server_error());
    }

    #[test]
    fn engine_errors_map_to_statuses() {
        let cases = [
            (EngineError::NotFound("t".into()), StatusCode::NOT_FOUND),
            (EngineError::denied("u", "read"), StatusCode::FORBIDDEN),
            (
                EngineError::InconsistentState("cursor".into()),
                StatusCode::GONE,
            ),
            (
                EngineError::BadColumnName("x".into()),
                StatusCode::BAD_REQUEST,
            ),
            (
                EngineError::TaskLockTimeout {
                    table_id: "t".into(),
                    tries: 5,
                },
                StatusCode::SERVICE_UNAVAILABLE,
            ),
            (
                EngineError::TableDataETagMismatch {
                    requested: None,
                    current: DataETag::new("d1"),
                },
                StatusCode::CONFLICT,
            ),
            (
                EngineError::InvariantViolation("clock".into()),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];
        for (engine, status) in cases {
            assert_eq!(ServerError::from(engine).status(), status);
        }
    }

    #[test]
    fn conflict_body_carries_record() {
        let err = ServerError::from(EngineError::conflict(Conflict {
            row_id: "r1".into(),
            client_row_etag: Some(RowETag::new("old")),
            client_row: None,
            server_row: Row::new("r1").with_row_etag(RowETag::new("new")),
        }));
        let body = err.to_body();
        assert_eq!(body.kind, ErrorKind::Conflict);
        assert_eq!(body.conflict.unwrap().server_row_etag(), Some(&RowETag::new("new")));
    }

    #[test]
    fn server_errors_hide_detail() {
        let body = ServerError::Internal("secret path".into()).to_body();
        assert_eq!(body.kind, ErrorKind::Internal);
        assert!(!body.message.contains("secret"));
    }
}
