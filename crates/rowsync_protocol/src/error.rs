//! Error types for protocol decoding.

use thiserror::Error;

/// Result type for protocol operations.
pub type ProtocolResult<T> = Result<T, ProtocolError>;

/// Errors raised while decoding protocol values.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// The cursor is not valid base64 or not a cursor body.
    #[error("malformed cursor: {0}")]
    MalformedCursor(String),

    /// The cursor was produced by an unknown cursor format.
    #[error("unsupported cursor format version {found}, expected {expected}")]
    UnsupportedCursorVersion {
        /// Version found in the cursor.
        found: u8,
        /// Version this build understands.
        expected: u8,
    },

    /// A value could not be encoded.
    #[error("encoding error: {0}")]
    Encoding(String),
}
