//! Diff Resolver: what changed since a dataETag, one page at a time.
//!
//! Pages are ordered by `(modification sequence, row id)` for
//! [`rows_since`](DiffResolver::rows_since), by row id within one changeset
//! for [`change_set_rows`](DiffResolver::change_set_rows), and by row id for
//! [`rows`](DiffResolver::rows). Every page returns a refetch cursor that
//! replays it and a resume cursor that continues after it.
//!
//! # Invariants
//!
//! - A row appears in `rows_since` only at its latest committed
//!   modification, so an exhaustive pagination yields each row once even
//!   when rows change between pages.
//! - Rows the identity may not read are skipped; they never count toward
//!   the fetch limit.
//! - No locks are taken.

use crate::changeset_log::{is_active, ChangeSetLog};
use crate::error::{EngineError, EngineResult};
use crate::permissions::{Identity, TablePermission};
use crate::record::{log_key, parse_log_key, StoredRow, TableEntry};
use crate::rows::RowStore;
use rowsync_protocol::{
    ChangeSetList, Cursor, CursorKind, DataETag, Position, Row, RowResourceList,
};
use rowsync_storage::StorageBackend;

/// Computes diffs for one table.
pub struct DiffResolver<'a> {
    log: ChangeSetLog<'a>,
    rows: RowStore<'a>,
    table: &'a TableEntry,
}

impl<'a> DiffResolver<'a> {
    /// Creates a resolver over `table` as read at the start of the request.
    pub fn new(backend: &'a dyn StorageBackend, table: &'a TableEntry) -> Self {
        Self {
            log: ChangeSetLog::new(backend, &table.table_id),
            rows: RowStore::new(backend, &table.table_id),
            table,
        }
    }

    /// Rows whose last modification is strictly after `data_etag`.
    ///
    /// `None` lists from the beginning. A dataETag the table never issued
    /// also lists from the beginning, which is always a superset.
    ///
    /// # Errors
    ///
    /// Returns `InconsistentState` for a cursor that does not belong to this
    /// request or this table's history.
    pub fn rows_since(
        &self,
        identity: &Identity,
        data_etag: Option<&DataETag>,
        cursor: Option<&str>,
        fetch_limit: usize,
    ) -> EngineResult<RowResourceList> {
        let anchor = data_etag.map(|t| t.to_string());
        let start = self.start_cursor(CursorKind::RowsSince, anchor, cursor)?;

        let since = match data_etag {
            None => 0,
            Some(tag) => match self.log.sequence_for(self.table, tag)? {
                Some(seq) => seq,
                None => {
                    tracing::warn!(
                        table = %self.table.table_id,
                        data_etag = %tag,
                        "unknown dataETag, listing rows from the beginning"
                    );
                    0
                }
            },
        };

        let mut range = ChangeSetLog::sequence_range(since, self.table.last_sequence);
        if let Some(after) = &start.after {
            range = range.starting_after(log_key(after.sequence_value, &after.row_id));
        }

        let (rows, has_more) = collect_page(
            fetch_limit,
            |after, chunk| {
                let mut range = range.clone();
                if let Some(after) = after {
                    range = range.starting_after(after);
                }
                self.log.scan(&range, Some(chunk))
            },
            |key, _entry| {
                let (seq, row_id) = parse_log_key(key)?;
                let Some(current) = self.rows.committed(row_id, self.table)? else {
                    return Ok(None);
                };
                if current.sequence_value != seq {
                    return Ok(None);
                }
                Ok(self.visible(identity, current).map(|row| (Position::new(seq, row_id), row)))
            },
        )?;

        tracing::debug!(
            table = %self.table.table_id,
            since,
            rows = rows.len(),
            has_more,
            "rows since"
        );
        self.page(start, rows, has_more)
    }

    /// Changesets committed after a reference point.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for an unknown dataETag.
    pub fn change_sets_since(
        &self,
        data_etag: Option<&DataETag>,
        sequence_value: Option<u64>,
    ) -> EngineResult<ChangeSetList> {
        self.log
            .change_sets_since(self.table, data_etag, sequence_value)
    }

    /// Rows touched by the changeset `data_etag`, ordered by row id.
    ///
    /// With `active_only`, rows modified again by a later changeset are
    /// skipped; otherwise superseded rows are returned as they were written
    /// by this changeset.
    ///
    /// # Errors
    ///
    /// - `NotFound` for an unknown changeset
    /// - `InconsistentState` for a foreign or stale cursor
    pub fn change_set_rows(
        &self,
        identity: &Identity,
        data_etag: &DataETag,
        active_only: bool,
        cursor: Option<&str>,
        fetch_limit: usize,
    ) -> EngineResult<RowResourceList> {
        let sequence_value = self.log.sequence_for(self.table, data_etag)?.ok_or_else(|| {
            EngineError::NotFound(format!(
                "changeset {data_etag} in table {}",
                self.table.table_id
            ))
        })?;
        let start = self.start_cursor(
            CursorKind::ChangeSetRows,
            Some(data_etag.to_string()),
            cursor,
        )?;

        let mut range = ChangeSetLog::changeset_range(sequence_value);
        if let Some(after) = &start.after {
            range = range.starting_after(log_key(after.sequence_value, &after.row_id));
        }

        let (rows, has_more) = collect_page(
            fetch_limit,
            |after, chunk| {
                let mut range = range.clone();
                if let Some(after) = after {
                    range = range.starting_after(after);
                }
                self.log.scan(&range, Some(chunk))
            },
            |key, entry| {
                let (_, row_id) = parse_log_key(key)?;
                let active = is_active(&self.rows, self.table, row_id, sequence_value)?;
                if active_only && !active {
                    return Ok(None);
                }
                let stored = if active {
                    match self.rows.committed(row_id, self.table)? {
                        Some(current) => current,
                        None => entry.after,
                    }
                } else {
                    entry.after
                };
                Ok(self
                    .visible(identity, stored)
                    .map(|row| (Position::new(sequence_value, row_id), row)))
            },
        )?;

        self.page(start, rows, has_more)
    }

    /// Every live row of the table, ordered by row id.
    ///
    /// # Errors
    ///
    /// Returns `InconsistentState` for a foreign cursor.
    pub fn rows(
        &self,
        identity: &Identity,
        cursor: Option<&str>,
        fetch_limit: usize,
    ) -> EngineResult<RowResourceList> {
        let start = self.start_cursor(CursorKind::AllRows, None, cursor)?;
        let first = start.after.as_ref().map(|p| p.row_id.clone());

        let (rows, has_more) = collect_page(
            fetch_limit,
            |after, chunk| {
                let after = after.or(first.as_deref());
                let batch = self.rows.scan(after, chunk)?;
                Ok(batch
                    .into_iter()
                    .map(|stored| (stored.row.row_id.clone(), stored))
                    .collect())
            },
            |row_id, stored| {
                let stored = if stored.sequence_value > self.table.last_sequence {
                    match self.rows.committed(row_id, self.table)? {
                        Some(committed) => committed,
                        None => return Ok(None),
                    }
                } else {
                    stored
                };
                if stored.is_deleted() {
                    return Ok(None);
                }
                Ok(self
                    .visible(identity, stored)
                    .map(|row| (Position::new(0, row_id), row)))
            },
        )?;

        self.page(start, rows, has_more)
    }

    fn visible(&self, identity: &Identity, stored: StoredRow) -> Option<Row> {
        let row = stored.row;
        identity
            .has_filter_scope(TablePermission::ReadRow, &row.row_id, row.scope())
            .then_some(row)
    }

    fn start_cursor(
        &self,
        kind: CursorKind,
        anchor: Option<String>,
        encoded: Option<&str>,
    ) -> EngineResult<Cursor> {
        let Some(encoded) = encoded.filter(|c| !c.is_empty()) else {
            return Ok(Cursor::start(kind, anchor));
        };
        let cursor = Cursor::decode(encoded)
            .map_err(|e| EngineError::InconsistentState(format!("unusable cursor: {e}")))?;
        if cursor.kind != kind || cursor.anchor != anchor {
            return Err(EngineError::InconsistentState(
                "cursor belongs to a different request".to_string(),
            ));
        }
        if let Some(after) = &cursor.after {
            if after.sequence_value > self.table.last_sequence {
                return Err(EngineError::InconsistentState(format!(
                    "cursor position {} is ahead of table {}",
                    after.sequence_value, self.table.table_id
                )));
            }
        }
        Ok(cursor)
    }

    fn page(
        &self,
        start: Cursor,
        rows: Vec<(Position, Row)>,
        has_more: bool,
    ) -> EngineResult<RowResourceList> {
        let resume = match rows.last() {
            Some((position, _)) => start.resume_after(position.clone()),
            None => start.clone(),
        };
        Ok(RowResourceList {
            rows: rows.into_iter().map(|(_, row)| row).collect(),
            data_etag: Some(self.table.data_etag.clone()),
            websafe_refetch_cursor: Some(start.encode()?),
            websafe_resume_cursor: Some(resume.encode()?),
            has_more,
        })
    }
}

/// Pulls keyed items in chunks until `limit` admitted items are found.
///
/// Returns the admitted items and whether at least one more exists.
fn collect_page<T>(
    limit: usize,
    mut fetch: impl FnMut(Option<&str>, usize) -> EngineResult<Vec<(String, T)>>,
    mut admit: impl FnMut(&str, T) -> EngineResult<Option<(Position, Row)>>,
) -> EngineResult<(Vec<(Position, Row)>, bool)> {
    let chunk = (limit + 1).max(32);
    let mut after: Option<String> = None;
    let mut out = Vec::new();

    loop {
        let batch = fetch(after.as_deref(), chunk)?;
        let exhausted = batch.len() < chunk;
        for (key, item) in batch {
            let hit = admit(&key, item)?;
            after = Some(key);
            if let Some(hit) = hit {
                if out.len() == limit {
                    return Ok((out, true));
                }
                out.push(hit);
            }
        }
        if exhausted {
            return Ok((out, false));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn keyed(n: usize) -> Vec<(String, usize)> {
        (0..n).map(|i| (format!("{i:04}"), i)).collect()
    }

    fn fetch_from(
        items: &[(String, usize)],
    ) -> impl FnMut(Option<&str>, usize) -> EngineResult<Vec<(String, usize)>> + '_ {
        move |after, chunk| {
            Ok(items
                .iter()
                .filter(|(k, _)| after.map_or(true, |a| k.as_str() > a))
                .take(chunk)
                .cloned()
                .collect())
        }
    }

    fn admit_even(key: &str, value: usize) -> EngineResult<Option<(Position, Row)>> {
        Ok((value % 2 == 0).then(|| (Position::new(value as u64, key), Row::new(key))))
    }

    #[test]
    fn collect_page_skips_rejected_items() {
        let items = keyed(100);
        let (page, more) = collect_page(10, fetch_from(&items), admit_even).unwrap();
        assert_eq!(page.len(), 10);
        assert!(more);
        assert_eq!(page[9].0.sequence_value, 18);
    }

    #[test]
    fn collect_page_reports_exhaustion() {
        let items = keyed(20);
        let (page, more) = collect_page(10, fetch_from(&items), admit_even).unwrap();
        assert_eq!(page.len(), 10);
        assert!(!more);

        let (page, more) = collect_page(50, fetch_from(&items), admit_even).unwrap();
        assert_eq!(page.len(), 10);
        assert!(!more);
    }

    #[test]
    fn collect_page_spans_chunks() {
        let items = keyed(500);
        let (page, more) = collect_page(100, fetch_from(&items), admit_even).unwrap();
        assert_eq!(page.len(), 100);
        assert!(more);
    }
}
