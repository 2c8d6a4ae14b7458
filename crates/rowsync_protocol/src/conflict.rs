//! Conflict records.

use crate::etag::RowETag;
use crate::row::Row;
use serde::{Deserialize, Serialize};

/// A write that was rejected because the client's row ETag is stale.
///
/// Carries both sides so the client can reconcile.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Conflict {
    /// Row that conflicted.
    pub row_id: String,
    /// Row ETag the client presented.
    #[serde(rename = "clientRowETag")]
    pub client_row_etag: Option<RowETag>,
    /// The client's attempted version; `None` for a delete.
    pub client_row: Option<Row>,
    /// The server's current version.
    pub server_row: Row,
}

impl Conflict {
    /// Returns the server's current row ETag.
    pub fn server_row_etag(&self) -> Option<&RowETag> {
        self.server_row.row_etag.as_ref()
    }
}

/// How a client chose to resolve a conflict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConflictResolution {
    /// Overwrite the server's version with the client's.
    KeepLocal,
    /// Discard the client's version.
    AcceptRemote,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conflict_json_shape() {
        let conflict = Conflict {
            row_id: "r1".into(),
            client_row_etag: Some(RowETag::new("old")),
            client_row: None,
            server_row: Row::new("r1").with_row_etag(RowETag::new("new")),
        };
        let json = serde_json::to_value(&conflict).unwrap();
        assert_eq!(json["clientRowETag"], "old");
        assert!(json["clientRow"].is_null());
        assert_eq!(json["serverRow"]["rowId"], "r1");
        assert_eq!(conflict.server_row_etag().map(|e| e.as_str()), Some("new"));
    }

    #[test]
    fn resolution_wire_names() {
        assert_eq!(
            serde_json::to_string(&ConflictResolution::KeepLocal).unwrap(),
            "\"KEEP_LOCAL\""
        );
    }
}
