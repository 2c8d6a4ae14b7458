//! # rowsync protocol
//!
//! Sync protocol types for rowsync.
//!
//! This crate provides:
//! - `DataETag` / `RowETag` version tags
//! - `Row` and its `RowFilterScope` access metadata
//! - The row lifecycle state machine (`SyncState`, `RowEvent`)
//! - Versioned, websafe pagination cursors
//! - Request and response messages for the diff protocol
//! - `Conflict` records returned when a write is rejected
//!
//! This is a pure protocol crate with no I/O operations.

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

mod conflict;
mod cursor;
mod error;
mod etag;
mod lifecycle;
mod messages;
mod row;
mod scope;

pub use conflict::{Conflict, ConflictResolution};
pub use cursor::{Cursor, CursorKind, Position, CURSOR_FORMAT_VERSION};
pub use error::{ProtocolError, ProtocolResult};
pub use etag::{DataETag, RowETag, SchemaETag};
pub use lifecycle::{IllegalTransition, Outcome, RowEvent, SyncState};
pub use messages::{
    ChangeSetList, ChangeSetRowsRequest, ChangeSetsSinceRequest, ColumnDefinition, ErrorBody,
    ErrorKind, OutcomeKind, ResolveRequest, RowList, RowOutcome, RowOutcomeList,
    RowResourceList, RowsSinceRequest, TableResource, ETAG_HEADER, PROTOCOL_VERSION,
    USER_HEADER, VERSION_HEADER,
};
pub use row::{Access, Row, RowFilterScope, SavepointType};
pub use scope::{Scope, ScopeAccess};
