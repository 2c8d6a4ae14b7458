//! A minimal client replica that follows a table through the diff API.

use rowsync_engine::{DataManager, EngineResult};
use rowsync_protocol::{DataETag, Row};
use std::collections::BTreeMap;

/// Local copy of the rows a client has pulled.
#[derive(Debug, Default)]
pub struct Replica {
    rows: BTreeMap<String, Row>,
    data_etag: Option<DataETag>,
    pages: usize,
}

impl Replica {
    /// Creates an empty replica that has never synchronized.
    pub fn new() -> Self {
        Self::default()
    }

    /// The table dataETag the replica last caught up to.
    pub fn data_etag(&self) -> Option<&DataETag> {
        self.data_etag.as_ref()
    }

    /// Number of diff pages fetched so far.
    pub fn pages(&self) -> usize {
        self.pages
    }

    /// Live rows, keyed by row id.
    pub fn rows(&self) -> &BTreeMap<String, Row> {
        &self.rows
    }

    /// Pulls every row changed since the last sync, `fetch_limit` rows at a
    /// time. Returns the number of rows received.
    ///
    /// # Errors
    ///
    /// Returns any error from the diff query.
    pub fn pull(&mut self, data: &DataManager<'_>, fetch_limit: usize) -> EngineResult<usize> {
        let since = self.data_etag.clone();
        let mut cursor: Option<String> = None;
        let mut received = 0;

        loop {
            let page = data.rows_since(since.as_ref(), cursor.as_deref(), Some(fetch_limit))?;
            self.pages += 1;
            received += page.rows.len();
            for row in page.rows {
                if row.deleted {
                    self.rows.remove(&row.row_id);
                } else {
                    self.rows.insert(row.row_id.clone(), row);
                }
            }

            if !page.has_more {
                if page.data_etag.is_some() {
                    self.data_etag = page.data_etag;
                }
                return Ok(received);
            }
            cursor = page.websafe_resume_cursor;
        }
    }

    /// Pulls, then acknowledges everything pulled so the server keeps
    /// tombstones for rows this replica holds.
    ///
    /// # Errors
    ///
    /// Returns any error from the diff query or the acknowledgement.
    pub fn sync(&mut self, data: &DataManager<'_>, fetch_limit: usize) -> EngineResult<usize> {
        let received = self.pull(data, fetch_limit)?;
        if let Some(through) = &self.data_etag {
            data.acknowledge_synced(through)?;
        }
        Ok(received)
    }
}

/// Reads every live row of a table through the paginated row listing.
///
/// # Errors
///
/// Returns any error from the listing.
pub fn live_rows(data: &DataManager<'_>, fetch_limit: usize) -> EngineResult<BTreeMap<String, Row>> {
    let mut rows = BTreeMap::new();
    let mut cursor: Option<String> = None;
    loop {
        let page = data.get_rows(cursor.as_deref(), Some(fetch_limit))?;
        for row in page.rows {
            rows.insert(row.row_id.clone(), row);
        }
        if !page.has_more {
            return Ok(rows);
        }
        cursor = page.websafe_resume_cursor;
    }
}

/// True when both maps hold the same rows at the same revisions.
///
/// Sync state is ignored: acknowledgement and conflict marking change it
/// without committing a changeset.
pub fn same_revisions(left: &BTreeMap<String, Row>, right: &BTreeMap<String, Row>) -> bool {
    left.len() == right.len()
        && left.iter().zip(right).all(|((lk, lv), (rk, rv))| {
            lk == rk && lv.row_etag == rv.row_etag && lv.values == rv.values
        })
}
