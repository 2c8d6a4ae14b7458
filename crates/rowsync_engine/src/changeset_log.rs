//! Changeset Log: append-only record of committed row mutations.
//!
//! The log is keyed by `(sequence value, row id)`, so a range scan walks
//! mutations in commit order. A separate index maps each changeset's
//! dataETag to its sequence value and the rows it touched.
//!
//! # Invariants
//!
//! - Sequence values are assigned in commit order; the table's
//!   `last_sequence` is the highest promoted one.
//! - Entries with a sequence above `last_sequence` belong to an unfinished
//!   commit and are invisible to readers.
//! - The table's initial dataETag is indexed at sequence 0 and owns no
//!   entries.

use crate::error::{EngineError, EngineResult};
use crate::record::{
    changesets_space, decode, encode, log_key, log_prefix, log_space, parse_log_key,
    ChangeSetRecord, LogEntry, TableEntry,
};
use rowsync_protocol::{ChangeSetList, DataETag};
use rowsync_storage::{KeyRange, Precondition, StorageBackend};
use std::ops::Bound;

/// The changeset log of one table.
pub struct ChangeSetLog<'a> {
    backend: &'a dyn StorageBackend,
    table_id: String,
    log: String,
    index: String,
}

impl<'a> ChangeSetLog<'a> {
    /// Opens the log of `table_id`.
    pub fn new(backend: &'a dyn StorageBackend, table_id: &str) -> Self {
        Self {
            backend,
            table_id: table_id.to_string(),
            log: log_space(table_id),
            index: changesets_space(table_id),
        }
    }

    /// Indexes the table's initial dataETag at sequence 0.
    pub fn record_initial(&self, data_etag: &DataETag) -> EngineResult<()> {
        let record = ChangeSetRecord {
            sequence_value: 0,
            row_ids: Vec::new(),
        };
        self.backend.put(
            &self.index,
            data_etag.as_str(),
            &encode(&record)?,
            Precondition::Any,
        )?;
        Ok(())
    }

    /// Records one changeset.
    ///
    /// The index entry is written first so that a partially written
    /// changeset can always be found and rolled back.
    pub fn append(
        &self,
        data_etag: &DataETag,
        sequence_value: u64,
        entries: &[LogEntry],
    ) -> EngineResult<()> {
        let record = ChangeSetRecord {
            sequence_value,
            row_ids: entries.iter().map(|e| e.after.row.row_id.clone()).collect(),
        };
        self.backend.put(
            &self.index,
            data_etag.as_str(),
            &encode(&record)?,
            Precondition::Absent,
        )?;

        for entry in entries {
            let key = log_key(sequence_value, &entry.after.row.row_id);
            self.backend
                .put(&self.log, &key, &encode(entry)?, Precondition::Absent)?;
        }
        tracing::debug!(
            table = %self.table_id,
            data_etag = %data_etag,
            sequence_value,
            rows = entries.len(),
            "changeset appended"
        );
        Ok(())
    }

    /// Returns the index record of `data_etag`, including pending ones.
    pub fn record(&self, data_etag: &DataETag) -> EngineResult<Option<ChangeSetRecord>> {
        match self.backend.get(&self.index, data_etag.as_str())? {
            Some(versioned) => Ok(Some(decode(&versioned.value)?)),
            None => Ok(None),
        }
    }

    /// Returns the sequence value of a promoted changeset.
    ///
    /// `None` for an unknown or unfinished changeset.
    pub fn sequence_for(
        &self,
        table: &TableEntry,
        data_etag: &DataETag,
    ) -> EngineResult<Option<u64>> {
        Ok(self
            .record(data_etag)?
            .map(|r| r.sequence_value)
            .filter(|seq| *seq <= table.last_sequence))
    }

    /// Lists changesets committed strictly after a reference point.
    ///
    /// With both a dataETag and a sequence value, the later point wins.
    /// With neither, every changeset is listed.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if `data_etag` names no promoted changeset.
    pub fn change_sets_since(
        &self,
        table: &TableEntry,
        data_etag: Option<&DataETag>,
        sequence_value: Option<u64>,
    ) -> EngineResult<ChangeSetList> {
        let by_etag = match data_etag {
            Some(tag) => Some(self.sequence_for(table, tag)?.ok_or_else(|| {
                EngineError::NotFound(format!("changeset {tag} in table {}", self.table_id))
            })?),
            None => None,
        };
        let since = by_etag.max(sequence_value).unwrap_or(0);

        let mut data_etags = Vec::new();
        for (key, versioned) in self.backend.scan(&self.index, &KeyRange::all(), None)? {
            let record: ChangeSetRecord = decode(&versioned.value)?;
            if record.sequence_value > since && record.sequence_value <= table.last_sequence {
                data_etags.push(DataETag::new(key));
            }
        }

        Ok(ChangeSetList {
            data_etags,
            data_etag: Some(table.data_etag.clone()),
            sequence_value: table.last_sequence,
        })
    }

    /// Reads one log entry.
    pub fn entry(&self, sequence_value: u64, row_id: &str) -> EngineResult<Option<LogEntry>> {
        match self.backend.get(&self.log, &log_key(sequence_value, row_id))? {
            Some(versioned) => Ok(Some(decode(&versioned.value)?)),
            None => Ok(None),
        }
    }

    /// Scans log entries in `(sequence, row id)` order.
    pub fn scan(
        &self,
        range: &KeyRange,
        limit: Option<usize>,
    ) -> EngineResult<Vec<(String, LogEntry)>> {
        self.backend
            .scan(&self.log, range, limit)?
            .into_iter()
            .map(|(key, versioned)| Ok((key, decode(&versioned.value)?)))
            .collect()
    }

    /// Key range covering every entry of one changeset.
    pub fn changeset_range(sequence_value: u64) -> KeyRange {
        KeyRange::prefix(log_prefix(sequence_value))
    }

    /// Key range covering entries with sequence in `(after, through]`.
    pub fn sequence_range(after: u64, through: u64) -> KeyRange {
        KeyRange {
            start: Bound::Included(log_prefix(after.saturating_add(1))),
            end: Bound::Excluded(log_prefix(through.saturating_add(1))),
        }
    }

    /// Returns the row mutations of a promoted changeset.
    ///
    /// With `active_only`, mutations superseded by a later changeset are
    /// suppressed.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for an unknown or unfinished changeset.
    pub fn rows_of(
        &self,
        table: &TableEntry,
        data_etag: &DataETag,
        active_only: bool,
        rows: &crate::rows::RowStore<'_>,
    ) -> EngineResult<Vec<LogEntry>> {
        let sequence_value = self.sequence_for(table, data_etag)?.ok_or_else(|| {
            EngineError::NotFound(format!("changeset {data_etag} in table {}", self.table_id))
        })?;

        let mut out = Vec::new();
        for (key, entry) in self.scan(&Self::changeset_range(sequence_value), None)? {
            let (_, row_id) = parse_log_key(&key)?;
            if active_only && !is_active(rows, table, row_id, sequence_value)? {
                continue;
            }
            out.push(entry);
        }
        Ok(out)
    }

    /// Removes every trace of the changeset at `sequence_value`.
    ///
    /// Returns the removed entries so the caller can restore rows.
    pub fn remove_changeset(
        &self,
        data_etag: &DataETag,
        sequence_value: u64,
    ) -> EngineResult<Vec<LogEntry>> {
        let entries = self.scan(&Self::changeset_range(sequence_value), None)?;
        let mut removed = Vec::with_capacity(entries.len());
        for (key, entry) in entries {
            self.backend.delete(&self.log, &key)?;
            removed.push(entry);
        }
        self.backend.delete(&self.index, data_etag.as_str())?;
        Ok(removed)
    }
}

/// Returns true if the committed version of `row_id` was written by the
/// changeset at `sequence_value`.
pub fn is_active(
    rows: &crate::rows::RowStore<'_>,
    table: &TableEntry,
    row_id: &str,
    sequence_value: u64,
) -> EngineResult<bool> {
    Ok(rows
        .committed(row_id, table)?
        .is_some_and(|stored| stored.sequence_value == sequence_value))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::StoredRow;
    use crate::rows::RowStore;
    use rowsync_protocol::{ColumnDefinition, Row, SchemaETag};
    use rowsync_storage::InMemoryBackend;
    use std::collections::BTreeSet;

    fn table(last_sequence: u64) -> TableEntry {
        TableEntry {
            table_id: "t".into(),
            schema_etag: SchemaETag::new("s"),
            columns: vec![ColumnDefinition::new("name")],
            initial_data_etag: DataETag::new("d0"),
            data_etag: DataETag::new(format!("d{last_sequence}")),
            pending_data_etag: None,
            last_sequence,
        }
    }

    fn entry(tag: &str, seq: u64, row_id: &str) -> LogEntry {
        LogEntry {
            data_etag: DataETag::new(tag),
            after: StoredRow {
                row: Row::new(row_id),
                sequence_value: seq,
                previous_row_etag: None,
                pre_conflict_state: None,
                confirmed_files: BTreeSet::new(),
            },
            before: None,
            purged: false,
        }
    }

    fn seeded(backend: &InMemoryBackend) -> ChangeSetLog<'_> {
        let log = ChangeSetLog::new(backend, "t");
        log.record_initial(&DataETag::new("d0")).unwrap();
        log.append(&DataETag::new("d1"), 1, &[entry("d1", 1, "a"), entry("d1", 1, "b")])
            .unwrap();
        log.append(&DataETag::new("d2"), 2, &[entry("d2", 2, "a")])
            .unwrap();
        log.append(&DataETag::new("d3"), 3, &[entry("d3", 3, "c")])
            .unwrap();
        log
    }

    fn etags(list: &ChangeSetList) -> Vec<&str> {
        list.data_etags.iter().map(|t| t.as_str()).collect()
    }

    #[test]
    fn change_sets_since_reference_points() {
        let backend = InMemoryBackend::new();
        let log = seeded(&backend);
        let t = table(3);

        assert_eq!(etags(&log.change_sets_since(&t, None, None).unwrap()), ["d1", "d2", "d3"]);
        let since_d0 = log
            .change_sets_since(&t, Some(&DataETag::new("d0")), None)
            .unwrap();
        assert_eq!(etags(&since_d0), ["d1", "d2", "d3"]);
        assert_eq!(since_d0.sequence_value, 3);

        let since_d1 = log
            .change_sets_since(&t, Some(&DataETag::new("d1")), None)
            .unwrap();
        assert_eq!(etags(&since_d1), ["d2", "d3"]);

        // later reference point wins
        let both = log
            .change_sets_since(&t, Some(&DataETag::new("d1")), Some(2))
            .unwrap();
        assert_eq!(etags(&both), ["d3"]);
        let both = log
            .change_sets_since(&t, Some(&DataETag::new("d2")), Some(1))
            .unwrap();
        assert_eq!(etags(&both), ["d3"]);
    }

    #[test]
    fn unknown_and_pending_changesets_are_not_found() {
        let backend = InMemoryBackend::new();
        let log = seeded(&backend);
        let t = table(2);

        assert!(matches!(
            log.change_sets_since(&t, Some(&DataETag::new("nope")), None),
            Err(EngineError::NotFound(_))
        ));
        // d3 is above last_sequence, so it is not yet visible
        assert!(log.sequence_for(&t, &DataETag::new("d3")).unwrap().is_none());
        assert_eq!(etags(&log.change_sets_since(&t, None, None).unwrap()), ["d1", "d2"]);
    }

    #[test]
    fn rows_of_active_only() {
        let backend = InMemoryBackend::new();
        let log = seeded(&backend);
        let t = table(3);
        let rows = RowStore::new(&backend, "t");
        for (row_id, seq) in [("a", 2), ("b", 1), ("c", 3)] {
            rows.put(&entry("x", seq, row_id).after).unwrap();
        }

        let all = log.rows_of(&t, &DataETag::new("d1"), false, &rows).unwrap();
        assert_eq!(all.len(), 2);
        let active = log.rows_of(&t, &DataETag::new("d1"), true, &rows).unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].after.row.row_id, "b");
    }

    #[test]
    fn remove_changeset_clears_entries_and_index() {
        let backend = InMemoryBackend::new();
        let log = seeded(&backend);
        let removed = log.remove_changeset(&DataETag::new("d1"), 1).unwrap();
        assert_eq!(removed.len(), 2);
        assert!(log.record(&DataETag::new("d1")).unwrap().is_none());
        assert!(log.entry(1, "a").unwrap().is_none());
        assert!(log.entry(2, "a").unwrap().is_some());
    }
}
