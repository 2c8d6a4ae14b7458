//! Conflict Detector: compares the rowETag a client assumed with the one
//! stored.

use crate::record::StoredRow;
use rowsync_protocol::{Conflict, Row, RowETag};

/// What to do with an incoming write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteCheck {
    /// No row with this id exists; insert it.
    Insert,
    /// The client saw the current version; apply the write.
    Apply,
    /// The client's content already matches the stored row; return it
    /// without writing.
    Unchanged(Box<Row>),
    /// The client's view is stale.
    Conflict(Box<Conflict>),
}

/// Decides how to treat `incoming` given the stored row.
///
/// A write against an existing row applies only if it carries the stored
/// rowETag. A write with no rowETag against an existing row is a conflict
/// (the client believes it is inserting). A stale write whose content is
/// identical to the stored row is a retry of a write that already landed.
pub fn check_write(stored: Option<&StoredRow>, incoming: &Row) -> WriteCheck {
    let Some(stored) = stored else {
        return WriteCheck::Insert;
    };
    if incoming.row_etag.is_some() && incoming.row_etag == stored.row.row_etag {
        return WriteCheck::Apply;
    }
    if incoming.has_same_content(&stored.row) {
        return WriteCheck::Unchanged(Box::new(stored.row.clone()));
    }
    WriteCheck::Conflict(Box::new(Conflict {
        row_id: stored.row.row_id.clone(),
        client_row_etag: incoming.row_etag.clone(),
        client_row: Some(incoming.clone()),
        server_row: stored.row.clone(),
    }))
}

/// Decides whether a delete carrying `client_row_etag` may proceed.
///
/// Returns the conflict to report when the tag is stale.
pub fn check_delete(stored: &StoredRow, client_row_etag: Option<&RowETag>) -> Option<Conflict> {
    if client_row_etag.is_some() && client_row_etag == stored.row.row_etag.as_ref() {
        return None;
    }
    Some(Conflict {
        row_id: stored.row.row_id.clone(),
        client_row_etag: client_row_etag.cloned(),
        client_row: None,
        server_row: stored.row.clone(),
    })
}
