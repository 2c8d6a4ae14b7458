//! Protocol messages for the diff API.
//!
//! Every message is JSON with camelCase field names.

use crate::conflict::{Conflict, ConflictResolution};
use crate::etag::{DataETag, SchemaETag};
use crate::row::Row;
use serde::{Deserialize, Serialize};

/// Protocol version advertised on every response.
pub const PROTOCOL_VERSION: &str = "1.0";

/// Header carrying [`PROTOCOL_VERSION`].
pub const VERSION_HEADER: &str = "X-Rowsync-Version";

/// Header identifying the calling user.
pub const USER_HEADER: &str = "X-Rowsync-User";

/// Header carrying the table's current dataETag.
pub const ETAG_HEADER: &str = "ETag";

/// Request for rows changed since a dataETag.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RowsSinceRequest {
    /// Lower bound (exclusive); `None` means from the beginning.
    #[serde(default, rename = "dataETag")]
    pub data_etag: Option<DataETag>,
    /// Websafe cursor from a previous page.
    #[serde(default)]
    pub cursor: Option<String>,
    /// Maximum rows per page.
    #[serde(default)]
    pub fetch_limit: Option<usize>,
}

/// Request for changesets committed since a point.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeSetsSinceRequest {
    /// Lower bound (exclusive) by dataETag.
    #[serde(default, rename = "dataETag")]
    pub data_etag: Option<DataETag>,
    /// Lower bound (exclusive) by commit sequence.
    #[serde(default)]
    pub sequence_value: Option<u64>,
}

/// Request for the rows touched by one changeset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeSetRowsRequest {
    /// The changeset's dataETag.
    #[serde(rename = "dataETag")]
    pub data_etag: DataETag,
    /// Only include rows whose current version is still this changeset's.
    #[serde(default)]
    pub active_only: bool,
    /// Websafe cursor from a previous page.
    #[serde(default)]
    pub cursor: Option<String>,
    /// Maximum rows per page.
    #[serde(default)]
    pub fetch_limit: Option<usize>,
}

/// One page of rows.
///
/// `websafe_refetch_cursor` re-reads this page; `websafe_resume_cursor`
/// continues after it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RowResourceList {
    /// Rows in this page.
    pub rows: Vec<Row>,
    /// Table dataETag the page was computed against.
    #[serde(rename = "dataETag")]
    pub data_etag: Option<DataETag>,
    /// Cursor that refetches this page.
    pub websafe_refetch_cursor: Option<String>,
    /// Cursor that continues after this page.
    pub websafe_resume_cursor: Option<String>,
    /// True if more rows follow.
    pub has_more: bool,
}

/// Changesets committed after a point.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeSetList {
    /// Changeset dataETags in ascending order.
    #[serde(rename = "dataETags")]
    pub data_etags: Vec<DataETag>,
    /// Table dataETag at the time of the request.
    #[serde(rename = "dataETag")]
    pub data_etag: Option<DataETag>,
    /// Commit sequence of the table at the time of the request.
    pub sequence_value: u64,
}

/// A list of rows with the table's current dataETag.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RowList {
    /// Rows.
    pub rows: Vec<Row>,
    /// Table dataETag.
    #[serde(rename = "dataETag")]
    pub data_etag: Option<DataETag>,
}

/// Outcome class for one row of a bulk write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OutcomeKind {
    /// The write was applied.
    Success,
    /// The row ETag was stale.
    InConflict,
    /// The caller may not write this row.
    Denied,
    /// The row was rejected for another reason.
    Failed,
}

/// Per-row result of a bulk write.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RowOutcome {
    /// Outcome class.
    pub outcome: OutcomeKind,
    /// Row as stored (success) or the server's current row (conflict).
    pub row: Row,
    /// Conflict detail when `outcome` is `IN_CONFLICT`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conflict: Option<Conflict>,
    /// Human-readable reason when the row was not applied.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl RowOutcome {
    /// Creates a success outcome.
    pub fn success(row: Row) -> Self {
        Self {
            outcome: OutcomeKind::Success,
            row,
            conflict: None,
            message: None,
        }
    }

    /// Creates a conflict outcome.
    pub fn in_conflict(conflict: Conflict) -> Self {
        Self {
            outcome: OutcomeKind::InConflict,
            row: conflict.server_row.clone(),
            conflict: Some(conflict),
            message: None,
        }
    }

    /// Creates a denied or failed outcome for the submitted row.
    pub fn rejected(kind: OutcomeKind, row: Row, message: impl Into<String>) -> Self {
        Self {
            outcome: kind,
            row,
            conflict: None,
            message: Some(message.into()),
        }
    }

    /// Returns true if the row was applied.
    pub fn is_success(&self) -> bool {
        self.outcome == OutcomeKind::Success
    }
}

/// Result of a bulk write.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RowOutcomeList {
    /// Per-row outcomes in submission order.
    pub rows: Vec<RowOutcome>,
    /// Table dataETag after the write.
    #[serde(rename = "dataETag")]
    pub data_etag: Option<DataETag>,
}

/// Body of a conflict-resolution request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolveRequest {
    /// Chosen resolution.
    pub resolution: ConflictResolution,
    /// The client's version, required for `KEEP_LOCAL`.
    #[serde(default)]
    pub row: Option<Row>,
}

/// Error classes reported to clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    /// Table, row or changeset does not exist.
    NotFound,
    /// Caller lacks permission.
    PermissionDenied,
    /// Row ETag was stale.
    Conflict,
    /// The table changed under a cursor or request; reconcile and retry.
    InconsistentState,
    /// A column name is invalid.
    BadColumnName,
    /// The table lock could not be taken; retry later.
    TaskLockTimeout,
    /// The request's table dataETag no longer matches.
    #[serde(rename = "TABLE_DATA_ETAG_MISMATCH")]
    TableDataETagMismatch,
    /// The request was malformed.
    BadRequest,
    /// Any other failure.
    Internal,
}

/// JSON error body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorBody {
    /// Error class.
    pub kind: ErrorKind,
    /// Human-readable message.
    pub message: String,
    /// Conflict detail for `CONFLICT`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conflict: Option<Conflict>,
}

/// A column of a table's schema.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ColumnDefinition {
    /// Column name.
    pub name: String,
    /// Declared element type (free-form, e.g. `string`, `integer`).
    #[serde(default = "default_element_type")]
    pub element_type: String,
}

fn default_element_type() -> String {
    "string".to_string()
}

impl ColumnDefinition {
    /// Creates a string column.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            element_type: default_element_type(),
        }
    }

    /// Sets the element type.
    pub fn with_element_type(mut self, element_type: impl Into<String>) -> Self {
        self.element_type = element_type.into();
        self
    }
}

/// Description of a table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TableResource {
    /// Table identifier.
    pub table_id: String,
    /// Schema version tag.
    #[serde(rename = "schemaETag")]
    pub schema_etag: SchemaETag,
    /// Current dataETag; `None` for a table that never committed.
    #[serde(rename = "dataETag")]
    pub data_etag: Option<DataETag>,
    /// Column definitions.
    pub columns: Vec<ColumnDefinition>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rows_since_request_defaults() {
        let req: RowsSinceRequest = serde_json::from_str("{}").unwrap();
        assert_eq!(req, RowsSinceRequest::default());
        let req: RowsSinceRequest =
            serde_json::from_str(r#"{"dataETag":"t1","fetchLimit":5}"#).unwrap();
        assert_eq!(req.data_etag, Some(DataETag::new("t1")));
        assert_eq!(req.fetch_limit, Some(5));
    }

    #[test]
    fn row_outcome_wire_shape() {
        let outcome = RowOutcome::rejected(OutcomeKind::Denied, Row::new("r1"), "no");
        let json = serde_json::to_value(&outcome).unwrap();
        assert_eq!(json["outcome"], "DENIED");
        assert_eq!(json["message"], "no");
        assert!(json.get("conflict").is_none());
        assert!(!outcome.is_success());
    }

    #[test]
    fn page_wire_shape() {
        let page = RowResourceList {
            rows: vec![],
            data_etag: Some(DataETag::new("t9")),
            websafe_refetch_cursor: Some("abc".into()),
            websafe_resume_cursor: None,
            has_more: false,
        };
        let json = serde_json::to_value(&page).unwrap();
        assert_eq!(json["dataETag"], "t9");
        assert_eq!(json["websafeRefetchCursor"], "abc");
        assert_eq!(json["hasMore"], false);
    }

    #[test]
    fn error_kind_names() {
        assert_eq!(
            serde_json::to_string(&ErrorKind::TableDataETagMismatch).unwrap(),
            "\"TABLE_DATA_ETAG_MISMATCH\""
        );
    }
}
