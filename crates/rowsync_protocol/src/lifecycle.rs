//! Row lifecycle state machine.
//!
//! ```text
//!             update                 delete
//!   new_row ─────────► new_row   new_row ─────► (removed)
//!   synced  ─────────► changed   synced/changed ─► deleted
//!   changed ─────────► changed
//!   any ──conflict──► in_conflict ──keep local──► new_row | changed
//!                                 ──accept remote─► synced
//!   new_row/changed ──acknowledged──► synced | synced_pending_files
//!   synced_pending_files ──files confirmed──► synced
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Synchronization status of a row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncState {
    /// Quiescent: every client that synced has this version.
    Synced,
    /// Created since the last acknowledged sync.
    NewRow,
    /// Modified since the last acknowledged sync.
    Changed,
    /// Tombstone of a previously synced row.
    Deleted,
    /// A stale write collided with this row.
    InConflict,
    /// Synced, but referenced files are not yet confirmed present.
    SyncedPendingFiles,
}

impl SyncState {
    /// State of a freshly inserted row.
    pub fn initial() -> Self {
        SyncState::NewRow
    }

    /// Returns the wire name of the state.
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncState::Synced => "synced",
            SyncState::NewRow => "new_row",
            SyncState::Changed => "changed",
            SyncState::Deleted => "deleted",
            SyncState::InConflict => "in_conflict",
            SyncState::SyncedPendingFiles => "synced_pending_files",
        }
    }

    /// Returns every state.
    pub fn all() -> [SyncState; 6] {
        [
            SyncState::Synced,
            SyncState::NewRow,
            SyncState::Changed,
            SyncState::Deleted,
            SyncState::InConflict,
            SyncState::SyncedPendingFiles,
        ]
    }

    /// Applies `event` to this state.
    ///
    /// # Errors
    ///
    /// Returns [`IllegalTransition`] for any pair not in the transition table.
    pub fn apply(self, event: RowEvent) -> Result<Outcome, IllegalTransition> {
        use SyncState::*;

        let next = match (self, event) {
            (Synced, RowEvent::Update) => Changed,
            (Changed, RowEvent::Update) => Changed,
            (NewRow, RowEvent::Update) => NewRow,

            (Synced | Changed, RowEvent::Delete) => Deleted,
            (NewRow, RowEvent::Delete) => return Ok(Outcome::Purge),

            (_, RowEvent::ConflictDetected) => InConflict,

            (InConflict, RowEvent::KeepLocal { prior: NewRow }) => NewRow,
            (InConflict, RowEvent::KeepLocal { .. }) => Changed,
            (InConflict, RowEvent::AcceptRemote) => Synced,

            (SyncedPendingFiles, RowEvent::FilesConfirmed) => Synced,

            (NewRow | Changed, RowEvent::SyncAcknowledged { files_pending: false }) => Synced,
            (NewRow | Changed, RowEvent::SyncAcknowledged { files_pending: true }) => {
                SyncedPendingFiles
            }

            (from, event) => return Err(IllegalTransition { from, event }),
        };
        Ok(Outcome::State(next))
    }
}

impl Default for SyncState {
    fn default() -> Self {
        SyncState::initial()
    }
}

impl fmt::Display for SyncState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Something that happens to a row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RowEvent {
    /// The row's content was modified.
    Update,
    /// The row was deleted.
    Delete,
    /// A write carrying a stale row ETag was rejected.
    ConflictDetected,
    /// The conflict was resolved in favour of the client's version.
    KeepLocal {
        /// State the row held before the conflict.
        prior: SyncState,
    },
    /// The conflict was resolved in favour of the server's version.
    AcceptRemote,
    /// Every referenced file is now present.
    FilesConfirmed,
    /// A client reported that it has observed the row's current version.
    SyncAcknowledged {
        /// True if referenced files are still missing.
        files_pending: bool,
    },
}

impl fmt::Display for RowEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RowEvent::Update => f.write_str("update"),
            RowEvent::Delete => f.write_str("delete"),
            RowEvent::ConflictDetected => f.write_str("conflict detected"),
            RowEvent::KeepLocal { .. } => f.write_str("resolve keep local"),
            RowEvent::AcceptRemote => f.write_str("resolve accept remote"),
            RowEvent::FilesConfirmed => f.write_str("files confirmed"),
            RowEvent::SyncAcknowledged { .. } => f.write_str("sync acknowledged"),
        }
    }
}

/// Result of a legal transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// The row moves to (or stays in) this state.
    State(SyncState),
    /// The row is removed without a tombstone.
    Purge,
}

/// A transition that is not in the lifecycle table.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("illegal state transition: {event} from {from}")]
pub struct IllegalTransition {
    /// State the row was in.
    pub from: SyncState,
    /// Event that was rejected.
    pub event: RowEvent,
}
