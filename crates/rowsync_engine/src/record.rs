//! Persisted records and their storage layout.
//!
//! Every table uses four spaces:
//!
//! | space | key | value |
//! |---|---|---|
//! | `tables` | tableId | [`TableEntry`] |
//! | `rows/{tableId}` | rowId | [`StoredRow`] |
//! | `log/{tableId}` | `{sequence:020}/{rowId}` | [`LogEntry`] |
//! | `changesets/{tableId}` | dataETag | [`ChangeSetRecord`] |
//!
//! Records are CBOR.

use crate::error::{EngineError, EngineResult};
use rowsync_protocol::{ColumnDefinition, DataETag, Row, RowETag, SchemaETag, SyncState};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Space holding table entries.
pub const TABLES_SPACE: &str = "tables";

/// Space holding the current rows of a table.
pub fn rows_space(table_id: &str) -> String {
    format!("rows/{table_id}")
}

/// Space holding the changeset log of a table.
pub fn log_space(table_id: &str) -> String {
    format!("log/{table_id}")
}

/// Space holding the changeset index of a table.
pub fn changesets_space(table_id: &str) -> String {
    format!("changesets/{table_id}")
}

/// Log key prefix for every entry of one changeset.
pub fn log_prefix(sequence_value: u64) -> String {
    format!("{sequence_value:020}/")
}

/// Log key of one row mutation.
pub fn log_key(sequence_value: u64, row_id: &str) -> String {
    format!("{sequence_value:020}/{row_id}")
}

/// Splits a log key into `(sequence, row id)`.
pub fn parse_log_key(key: &str) -> EngineResult<(u64, &str)> {
    let (seq, row_id) = key
        .split_once('/')
        .ok_or_else(|| EngineError::Codec(format!("bad log key {key:?}")))?;
    let seq = seq
        .parse::<u64>()
        .map_err(|e| EngineError::Codec(format!("bad log key {key:?}: {e}")))?;
    Ok((seq, row_id))
}

/// Serializes a record.
pub fn encode<T: Serialize>(value: &T) -> EngineResult<Vec<u8>> {
    let mut buf = Vec::new();
    ciborium::ser::into_writer(value, &mut buf).map_err(|e| EngineError::Codec(e.to_string()))?;
    Ok(buf)
}

/// Deserializes a record.
pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> EngineResult<T> {
    ciborium::de::from_reader(bytes).map_err(|e| EngineError::Codec(e.to_string()))
}

/// Persistent state of a table.
///
/// # Invariants
///
/// - `pending_data_etag` is set only between the start and the promotion of
///   a commit; a value found at the start of a write names a commit that
///   never finished.
/// - `last_sequence` counts promoted changesets; a pending changeset uses
///   `last_sequence + 1`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableEntry {
    /// Table identifier.
    pub table_id: String,
    /// Schema version tag.
    pub schema_etag: SchemaETag,
    /// Column definitions, in declaration order.
    pub columns: Vec<ColumnDefinition>,
    /// dataETag minted when the table was created.
    pub initial_data_etag: DataETag,
    /// Current dataETag.
    pub data_etag: DataETag,
    /// dataETag of a commit in flight.
    pub pending_data_etag: Option<DataETag>,
    /// Sequence value of the last promoted changeset.
    pub last_sequence: u64,
}

impl TableEntry {
    /// Sequence value the next commit will use.
    pub fn pending_sequence(&self) -> u64 {
        self.last_sequence + 1
    }

    /// Returns true if `name` is a defined column.
    pub fn has_column(&self, name: &str) -> bool {
        self.columns.iter().any(|c| c.name == name)
    }
}

/// A row as held in the row space.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredRow {
    /// The row, with server-assigned fields filled in.
    pub row: Row,
    /// Sequence value of the changeset that last modified the row.
    pub sequence_value: u64,
    /// rowETag of the revision this one replaced.
    pub previous_row_etag: Option<RowETag>,
    /// State held before the row entered `in_conflict`.
    pub pre_conflict_state: Option<SyncState>,
    /// Attachments confirmed present.
    pub confirmed_files: BTreeSet<String>,
}

impl StoredRow {
    /// Returns true if some referenced file is not yet confirmed.
    pub fn files_pending(&self) -> bool {
        self.row
            .file_attachments
            .iter()
            .any(|f| !self.confirmed_files.contains(f))
    }

    /// Returns true if the row is a tombstone.
    pub fn is_deleted(&self) -> bool {
        self.row.deleted
    }
}

/// One row mutation in the changeset log.
///
/// `before` is the row-space record the mutation replaced, kept so an
/// unfinished commit can be rolled back exactly.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    /// dataETag of the changeset.
    pub data_etag: DataETag,
    /// The row as written by this mutation.
    pub after: StoredRow,
    /// The row before this mutation; `None` for an insert.
    pub before: Option<StoredRow>,
    /// True if the mutation removed the row outright.
    pub purged: bool,
}

/// Index entry for one changeset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeSetRecord {
    /// Sequence value of the changeset.
    pub sequence_value: u64,
    /// Rows the changeset touched.
    pub row_ids: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log_keys_sort_by_sequence_then_row() {
        let a = log_key(9, "zz");
        let b = log_key(10, "aa");
        let c = log_key(10, "ab");
        assert!(a < b);
        assert!(b < c);
        assert!(b.starts_with(&log_prefix(10)));
    }

    #[test]
    fn log_keys_parse_back() {
        let key = log_key(42, "row/with/slashes");
        let (seq, row) = parse_log_key(&key).unwrap();
        assert_eq!(seq, 42);
        assert_eq!(row, "row/with/slashes");
        assert!(parse_log_key("garbage").is_err());
    }

    #[test]
    fn stored_row_survives_cbor() {
        let stored = StoredRow {
            row: Row::new("r1").with_value("name", "x").with_attachment("a.jpg"),
            sequence_value: 3,
            previous_row_etag: Some(RowETag::new("e0")),
            pre_conflict_state: Some(SyncState::NewRow),
            confirmed_files: BTreeSet::new(),
        };
        let back: StoredRow = decode(&encode(&stored).unwrap()).unwrap();
        assert_eq!(back, stored);
        assert!(back.files_pending());
    }
}
