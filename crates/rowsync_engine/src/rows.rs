//! Current-row store.

use crate::error::EngineResult;
use crate::record::{decode, encode, log_key, log_space, rows_space, LogEntry, StoredRow, TableEntry};
use rowsync_storage::{KeyRange, Precondition, StorageBackend};

/// The current version of every row of one table.
pub struct RowStore<'a> {
    backend: &'a dyn StorageBackend,
    space: String,
    log_space: String,
}

impl<'a> RowStore<'a> {
    /// Opens the row store of `table_id`.
    pub fn new(backend: &'a dyn StorageBackend, table_id: &str) -> Self {
        Self {
            backend,
            space: rows_space(table_id),
            log_space: log_space(table_id),
        }
    }

    /// Reads the stored record of `row_id`, including uncommitted writes.
    pub fn get(&self, row_id: &str) -> EngineResult<Option<StoredRow>> {
        match self.backend.get(&self.space, row_id)? {
            Some(versioned) => Ok(Some(decode(&versioned.value)?)),
            None => Ok(None),
        }
    }

    /// Reads `row_id` as of the table's last promoted commit.
    ///
    /// A record written by a commit that has not been promoted is replaced
    /// by the record it overwrote.
    pub fn committed(&self, row_id: &str, table: &TableEntry) -> EngineResult<Option<StoredRow>> {
        let current = self.get(row_id)?;
        if table.pending_data_etag.is_none() {
            return Ok(current);
        }
        match current {
            Some(stored) if stored.sequence_value <= table.last_sequence => Ok(Some(stored)),
            _ => {
                let key = log_key(table.pending_sequence(), row_id);
                match self.backend.get(&self.log_space, &key)? {
                    Some(versioned) => {
                        let entry: LogEntry = decode(&versioned.value)?;
                        Ok(entry.before)
                    }
                    None => Ok(None),
                }
            }
        }
    }

    /// Writes `stored` as the current version of its row.
    pub fn put(&self, stored: &StoredRow) -> EngineResult<()> {
        let bytes = encode(stored)?;
        self.backend
            .put(&self.space, &stored.row.row_id, &bytes, Precondition::Any)?;
        Ok(())
    }

    /// Removes `row_id`. Returns true if it existed.
    pub fn remove(&self, row_id: &str) -> EngineResult<bool> {
        Ok(self.backend.delete(&self.space, row_id)?)
    }

    /// Restores a row to `before`, or removes it when `before` is `None`.
    pub fn restore(&self, row_id: &str, before: Option<&StoredRow>) -> EngineResult<()> {
        match before {
            Some(stored) => self.put(stored),
            None => self.remove(row_id).map(|_| ()),
        }
    }

    /// Returns up to `limit` records in row id order, starting after
    /// `after`.
    pub fn scan(&self, after: Option<&str>, limit: usize) -> EngineResult<Vec<StoredRow>> {
        let mut range = KeyRange::all();
        if let Some(after) = after {
            range = range.starting_after(after);
        }
        self.backend
            .scan(&self.space, &range, Some(limit))?
            .into_iter()
            .map(|(_, versioned)| decode(&versioned.value))
            .collect()
    }

    /// Returns every record, including uncommitted writes.
    pub fn all(&self) -> EngineResult<Vec<StoredRow>> {
        self.backend
            .scan(&self.space, &KeyRange::all(), None)?
            .into_iter()
            .map(|(_, versioned)| decode(&versioned.value))
            .collect()
    }
}
