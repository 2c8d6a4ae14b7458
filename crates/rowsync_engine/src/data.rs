//! Row reads and writes for one table on behalf of one identity.
//!
//! # Commit protocol
//!
//! Every write runs under the table lock:
//!
//! 1. Roll back any unfinished commit left by a crashed writer.
//! 2. Re-read the rows involved, run the gate and the conflict detector.
//! 3. Mint the next dataETag and record it as the table's pending tag.
//! 4. Append the changeset to the log (each entry keeps the row it replaced).
//! 5. Write the rows.
//! 6. Promote the pending tag to the table's dataETag.
//!
//! Readers take no lock and ignore anything written by a commit that has
//! not reached step 6.

use crate::changeset_log::ChangeSetLog;
use crate::conflict::{check_delete, check_write, WriteCheck};
use crate::diff::DiffResolver;
use crate::engine::SyncEngine;
use crate::error::{EngineError, EngineResult};
use crate::notify::TableChanged;
use crate::permissions::{Identity, TablePermission};
use crate::record::{encode, LogEntry, StoredRow, TableEntry, TABLES_SPACE};
use crate::rows::RowStore;
use crate::table::table_resource;
use rowsync_protocol::{
    ChangeSetList, Conflict, ConflictResolution, DataETag, Outcome, OutcomeKind, Row, RowETag,
    RowEvent, RowFilterScope, RowOutcome, RowOutcomeList, RowResourceList, SyncState,
    TableResource,
};
use rowsync_storage::Precondition;
use std::collections::{BTreeSet, HashSet};

/// A row mutation staged for the next commit.
struct Mutation {
    before: Option<StoredRow>,
    after: StoredRow,
    purge: bool,
}

/// Result of checking one incoming row.
enum Plan {
    Write(Mutation),
    Unchanged(Row),
    Conflict(Conflict),
}

/// Row access to one table for one identity.
pub struct DataManager<'a> {
    engine: &'a SyncEngine,
    table_id: String,
    identity: Identity,
}

impl<'a> DataManager<'a> {
    pub(crate) fn new(engine: &'a SyncEngine, table_id: &str, identity: Identity) -> Self {
        Self {
            engine,
            table_id: table_id.to_string(),
            identity,
        }
    }

    /// The identity requests are made for.
    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    /// The table's id.
    pub fn table_id(&self) -> &str {
        &self.table_id
    }

    fn rows(&self) -> RowStore<'_> {
        RowStore::new(self.engine.backend(), &self.table_id)
    }

    fn log(&self) -> ChangeSetLog<'_> {
        ChangeSetLog::new(self.engine.backend(), &self.table_id)
    }

    fn load(&self) -> EngineResult<TableEntry> {
        Ok(self.engine.load_table(&self.table_id)?.0)
    }

    // ---------------------------------------------------------------- reads

    /// Describes the table.
    ///
    /// # Errors
    ///
    /// `PermissionDenied` without read access.
    pub fn table(&self) -> EngineResult<TableResource> {
        self.identity.check_permission(TablePermission::ReadTable)?;
        Ok(table_resource(&self.load()?))
    }

    /// The table's current dataETag.
    ///
    /// # Errors
    ///
    /// Returns an error if the table cannot be read.
    pub fn data_etag(&self) -> EngineResult<DataETag> {
        Ok(self.load()?.data_etag)
    }

    /// Reads one live row.
    ///
    /// # Errors
    ///
    /// - `NotFound` for an unknown or deleted row
    /// - `PermissionDenied` if the gate refuses the row
    pub fn get_row(&self, row_id: &str) -> EngineResult<Row> {
        self.identity.check_permission(TablePermission::ReadRow)?;
        let table = self.load()?;
        let stored = self
            .rows()
            .committed(row_id, &table)?
            .filter(|s| !s.is_deleted())
            .ok_or_else(|| self.row_not_found(row_id))?;
        self.identity.check_filter_scope(
            TablePermission::ReadRow,
            row_id,
            stored.row.scope(),
        )?;
        Ok(stored.row)
    }

    /// Reads a page of live rows, ordered by row id.
    ///
    /// # Errors
    ///
    /// `PermissionDenied` without read access; `InconsistentState` for a
    /// foreign cursor.
    pub fn get_rows(
        &self,
        cursor: Option<&str>,
        fetch_limit: Option<usize>,
    ) -> EngineResult<RowResourceList> {
        self.identity.check_permission(TablePermission::ReadRow)?;
        let table = self.load()?;
        let limit = self.engine.config().fetch_limit(fetch_limit);
        DiffResolver::new(self.engine.backend(), &table).rows(&self.identity, cursor, limit)
    }

    /// Rows modified after `data_etag`.
    ///
    /// # Errors
    ///
    /// `PermissionDenied` without read access; `InconsistentState` for a
    /// stale or foreign cursor.
    pub fn rows_since(
        &self,
        data_etag: Option<&DataETag>,
        cursor: Option<&str>,
        fetch_limit: Option<usize>,
    ) -> EngineResult<RowResourceList> {
        self.identity.check_permission(TablePermission::ReadRow)?;
        let table = self.load()?;
        let limit = self.engine.config().fetch_limit(fetch_limit);
        DiffResolver::new(self.engine.backend(), &table).rows_since(
            &self.identity,
            data_etag,
            cursor,
            limit,
        )
    }

    /// Changesets committed after a reference point.
    ///
    /// # Errors
    ///
    /// `PermissionDenied` without read access; `NotFound` for an unknown
    /// dataETag.
    pub fn change_sets_since(
        &self,
        data_etag: Option<&DataETag>,
        sequence_value: Option<u64>,
    ) -> EngineResult<ChangeSetList> {
        self.identity.check_permission(TablePermission::ReadTable)?;
        let table = self.load()?;
        DiffResolver::new(self.engine.backend(), &table).change_sets_since(data_etag, sequence_value)
    }

    /// Rows touched by one changeset.
    ///
    /// # Errors
    ///
    /// `PermissionDenied` without read access; `NotFound` for an unknown
    /// changeset; `InconsistentState` for a foreign cursor.
    pub fn change_set_rows(
        &self,
        data_etag: &DataETag,
        active_only: bool,
        cursor: Option<&str>,
        fetch_limit: Option<usize>,
    ) -> EngineResult<RowResourceList> {
        self.identity.check_permission(TablePermission::ReadRow)?;
        let table = self.load()?;
        let limit = self.engine.config().fetch_limit(fetch_limit);
        DiffResolver::new(self.engine.backend(), &table).change_set_rows(
            &self.identity,
            data_etag,
            active_only,
            cursor,
            limit,
        )
    }

    // --------------------------------------------------------------- writes

    /// Inserts or updates one row.
    ///
    /// A row carrying `deleted = true` is deleted.
    ///
    /// # Errors
    ///
    /// - `BadColumnName` for a value outside the table's columns
    /// - `PermissionDenied` if the gate refuses the row
    /// - `Conflict` if the row's rowETag is stale (the row is left
    ///   `in_conflict`)
    /// - `IllegalStateTransition` if the row's state forbids the write
    /// - `TaskLockTimeout` if the table lock is contended
    pub fn insert_or_update_row(&self, row: Row) -> EngineResult<Row> {
        self.identity.check_permission(TablePermission::WriteRow)?;
        let schema = self.load()?;
        self.validate_columns(&schema, &row)?;

        self.with_lock(|table, version| {
            let rows = self.rows();
            let stored = rows.get(&row.row_id)?;
            match self.plan(stored, row)? {
                Plan::Unchanged(current) => Ok(current),
                Plan::Conflict(conflict) => {
                    let conflict = self.mark_in_conflict(&rows, conflict)?;
                    Err(EngineError::conflict(conflict))
                }
                Plan::Write(mutation) => {
                    let mut mutations = vec![mutation];
                    self.commit(table, version, &mut mutations)?;
                    Ok(mutations.remove(0).after.row)
                }
            }
        })
    }

    /// Applies a batch of rows as one changeset.
    ///
    /// `data_etag` must be the table's current dataETag. Rows that are
    /// denied, conflicting or otherwise rejected are reported individually
    /// and do not stop the rest of the batch.
    ///
    /// # Errors
    ///
    /// - `TableDataETagMismatch` if `data_etag` is not current
    /// - `BadColumnName` if any row names an undefined column
    /// - `TaskLockTimeout` if the table lock is contended
    pub fn insert_or_update_rows(
        &self,
        rows: Vec<Row>,
        data_etag: Option<&DataETag>,
    ) -> EngineResult<RowOutcomeList> {
        self.identity.check_permission(TablePermission::WriteRow)?;
        let schema = self.load()?;
        for row in &rows {
            self.validate_columns(&schema, row)?;
        }

        self.with_lock(|table, version| {
            if data_etag != Some(&table.data_etag) {
                return Err(EngineError::TableDataETagMismatch {
                    requested: data_etag.cloned(),
                    current: table.data_etag.clone(),
                });
            }

            let store = self.rows();
            let mut seen = HashSet::new();
            let mut outcomes: Vec<Option<RowOutcome>> = Vec::with_capacity(rows.len());
            let mut staged: Vec<(usize, Mutation)> = Vec::new();

            for (index, row) in rows.into_iter().enumerate() {
                if !seen.insert(row.row_id.clone()) {
                    outcomes.push(Some(RowOutcome::rejected(
                        OutcomeKind::Failed,
                        row,
                        "row appears more than once in the request",
                    )));
                    continue;
                }
                let stored = store.get(&row.row_id)?;
                let submitted = row.clone();
                let outcome = match self.plan(stored, row) {
                    Ok(Plan::Write(mutation)) => {
                        staged.push((index, mutation));
                        None
                    }
                    Ok(Plan::Unchanged(current)) => Some(RowOutcome::success(current)),
                    Ok(Plan::Conflict(conflict)) => {
                        let conflict = self.mark_in_conflict(&store, conflict)?;
                        Some(RowOutcome::in_conflict(conflict))
                    }
                    Err(e @ EngineError::PermissionDenied { .. }) => Some(RowOutcome::rejected(
                        OutcomeKind::Denied,
                        submitted,
                        e.to_string(),
                    )),
                    Err(
                        e @ (EngineError::IllegalStateTransition(_) | EngineError::NotFound(_)),
                    ) => Some(RowOutcome::rejected(
                        OutcomeKind::Failed,
                        submitted,
                        e.to_string(),
                    )),
                    Err(e) => return Err(e),
                };
                outcomes.push(outcome);
            }

            let (indices, mut mutations): (Vec<usize>, Vec<Mutation>) =
                staged.into_iter().unzip();
            self.commit(table, version, &mut mutations)?;
            for (index, mutation) in indices.into_iter().zip(mutations) {
                outcomes[index] = Some(RowOutcome::success(mutation.after.row));
            }

            Ok(RowOutcomeList {
                rows: outcomes.into_iter().flatten().collect(),
                data_etag: Some(table.data_etag.clone()),
            })
        })
    }

    /// Deletes a row, leaving a tombstone unless it was never synced.
    ///
    /// Returns the table's dataETag after the delete.
    ///
    /// # Errors
    ///
    /// - `NotFound` for an unknown row
    /// - `PermissionDenied` if the gate refuses the row
    /// - `Conflict` if `row_etag` is stale (the row is left `in_conflict`)
    /// - `IllegalStateTransition` if the row's state forbids deletion
    pub fn delete_row(&self, row_id: &str, row_etag: Option<&RowETag>) -> EngineResult<DataETag> {
        self.identity.check_permission(TablePermission::DeleteRow)?;

        self.with_lock(|table, version| {
            let rows = self.rows();
            let stored = rows
                .get(row_id)?
                .ok_or_else(|| self.row_not_found(row_id))?;
            self.check_row_access(&stored, TablePermission::DeleteRow)?;

            if let Some(conflict) = check_delete(&stored, row_etag) {
                let conflict = self.mark_in_conflict(&rows, conflict)?;
                return Err(EngineError::conflict(conflict));
            }

            let mut mutations = vec![self.deletion(stored)?];
            self.commit(table, version, &mut mutations)?;
            Ok(table.data_etag.clone())
        })
    }

    /// Marks every new or changed row this identity can see, up to and
    /// including the changeset `through`, as observed by a client.
    ///
    /// Returns the number of rows acknowledged.
    ///
    /// # Errors
    ///
    /// `NotFound` if `through` names no committed changeset.
    pub fn acknowledge_synced(&self, through: &DataETag) -> EngineResult<usize> {
        self.identity.check_permission(TablePermission::ReadRow)?;

        self.with_lock(|table, _| {
            let limit = self
                .log()
                .sequence_for(table, through)?
                .ok_or_else(|| EngineError::NotFound(format!("changeset {through}")))?;

            let rows = self.rows();
            let mut acknowledged = 0;
            for mut stored in rows.all()? {
                let eligible = stored.sequence_value <= limit
                    && matches!(stored.row.sync_state, SyncState::NewRow | SyncState::Changed)
                    && self.identity.has_filter_scope(
                        TablePermission::ReadRow,
                        &stored.row.row_id,
                        stored.row.scope(),
                    );
                if !eligible {
                    continue;
                }
                let event = RowEvent::SyncAcknowledged {
                    files_pending: stored.files_pending(),
                };
                stored.row.sync_state = next_state(stored.row.sync_state, event)?;
                rows.put(&stored)?;
                acknowledged += 1;
            }

            tracing::debug!(table = %self.table_id, through = %through, acknowledged, "rows acknowledged");
            Ok(acknowledged)
        })
    }

    /// Records that `files` referenced by a row are present.
    ///
    /// A `synced_pending_files` row becomes `synced` once every referenced
    /// file is confirmed.
    ///
    /// # Errors
    ///
    /// `NotFound` for an unknown row; `PermissionDenied` if the gate
    /// refuses the row.
    pub fn confirm_files(&self, row_id: &str, files: &[String]) -> EngineResult<Row> {
        self.identity.check_permission(TablePermission::WriteRow)?;

        self.with_lock(|_, _| {
            let rows = self.rows();
            let mut stored = rows
                .get(row_id)?
                .ok_or_else(|| self.row_not_found(row_id))?;
            self.check_row_access(&stored, TablePermission::WriteRow)?;

            stored.confirmed_files.extend(files.iter().cloned());
            if stored.row.sync_state == SyncState::SyncedPendingFiles && !stored.files_pending() {
                stored.row.sync_state = next_state(stored.row.sync_state, RowEvent::FilesConfirmed)?;
            }
            rows.put(&stored)?;
            Ok(stored.row)
        })
    }

    /// Resolves a row left `in_conflict`.
    ///
    /// `AcceptRemote` keeps the server's version and marks it synced.
    /// `KeepLocal` writes `client_row` over it as a new revision.
    ///
    /// # Errors
    ///
    /// - `IllegalStateTransition` if the row is not in conflict
    /// - `InconsistentState` if `KeepLocal` has no usable client row
    /// - `BadColumnName` for a client value outside the table's columns
    pub fn resolve_conflict(
        &self,
        row_id: &str,
        resolution: ConflictResolution,
        client_row: Option<Row>,
    ) -> EngineResult<Row> {
        self.identity.check_permission(TablePermission::WriteRow)?;
        if let Some(client) = &client_row {
            if client.row_id != row_id {
                return Err(EngineError::InconsistentState(format!(
                    "client row {} does not match {row_id}",
                    client.row_id
                )));
            }
            let schema = self.load()?;
            self.validate_columns(&schema, client)?;
        }

        self.with_lock(|table, version| {
            let rows = self.rows();
            let mut stored = rows
                .get(row_id)?
                .ok_or_else(|| self.row_not_found(row_id))?;
            self.check_row_access(&stored, TablePermission::WriteRow)?;

            match resolution {
                ConflictResolution::AcceptRemote => {
                    stored.row.sync_state =
                        next_state(stored.row.sync_state, RowEvent::AcceptRemote)?;
                    stored.pre_conflict_state = None;
                    rows.put(&stored)?;
                    tracing::debug!(table = %self.table_id, row = row_id, "conflict resolved, server wins");
                    Ok(stored.row)
                }
                ConflictResolution::KeepLocal => {
                    let prior = stored.pre_conflict_state.unwrap_or(SyncState::Changed);
                    let state =
                        next_state(stored.row.sync_state, RowEvent::KeepLocal { prior })?;
                    let client = client_row.ok_or_else(|| {
                        EngineError::InconsistentState(
                            "keeping the local version requires the client row".to_string(),
                        )
                    })?;
                    if client.deleted {
                        return Err(EngineError::InconsistentState(
                            "resolve the conflict before deleting the row".to_string(),
                        ));
                    }

                    let mut after = stored.clone();
                    self.overwrite_content(&mut after.row, &client);
                    after.row.sync_state = state;
                    after.pre_conflict_state = None;

                    let mut mutations = vec![Mutation {
                        before: Some(stored),
                        after,
                        purge: false,
                    }];
                    self.commit(table, version, &mut mutations)?;
                    tracing::debug!(table = %self.table_id, row = row_id, "conflict resolved, client wins");
                    Ok(mutations.remove(0).after.row)
                }
            }
        })
    }

    /// Removes tombstones whose deletion was committed up to and including
    /// `through`.
    ///
    /// Clients that have not synced past `through` will not learn of these
    /// deletions. Returns the number of tombstones removed.
    ///
    /// # Errors
    ///
    /// `PermissionDenied` without unfiltered delete; `NotFound` if
    /// `through` names no committed changeset.
    pub fn purge_tombstones(&self, through: &DataETag) -> EngineResult<usize> {
        self.identity
            .check_permission(TablePermission::UnfilteredDelete)?;

        self.with_lock(|table, _| {
            let limit = self
                .log()
                .sequence_for(table, through)?
                .ok_or_else(|| EngineError::NotFound(format!("changeset {through}")))?;

            let rows = self.rows();
            let mut purged = 0;
            for stored in rows.all()? {
                if stored.is_deleted()
                    && stored.row.sync_state != SyncState::InConflict
                    && stored.sequence_value <= limit
                {
                    rows.remove(&stored.row.row_id)?;
                    purged += 1;
                }
            }
            self.engine.backend().flush()?;

            tracing::info!(table = %self.table_id, through = %through, purged, "tombstones purged");
            Ok(purged)
        })
    }

    // -------------------------------------------------------------- helpers

    fn row_not_found(&self, row_id: &str) -> EngineError {
        EngineError::NotFound(format!("row {row_id} in table {}", self.table_id))
    }

    fn validate_columns(&self, table: &TableEntry, row: &Row) -> EngineResult<()> {
        for column in row.values.keys() {
            if !table.has_column(column) {
                return Err(EngineError::BadColumnName(format!(
                    "{column:?} is not a column of table {}",
                    self.table_id
                )));
            }
        }
        Ok(())
    }

    /// Read access plus the given write permission, against the stored scope.
    fn check_row_access(&self, stored: &StoredRow, permission: TablePermission) -> EngineResult<()> {
        let row = &stored.row;
        self.identity
            .check_filter_scope(TablePermission::ReadRow, &row.row_id, row.scope())?;
        self.identity
            .check_filter_scope(permission, &row.row_id, row.scope())
    }

    /// Runs the gate, the conflict detector and the lifecycle for one
    /// incoming row.
    ///
    /// A row without a filter scope keeps the stored one, or on insert gets
    /// full default access owned by the caller. Every written scope must
    /// itself grant the caller write access.
    fn plan(&self, stored: Option<StoredRow>, mut incoming: Row) -> EngineResult<Plan> {
        match &stored {
            Some(existing) => {
                let permission = if incoming.deleted {
                    TablePermission::DeleteRow
                } else {
                    TablePermission::WriteRow
                };
                self.check_row_access(existing, permission)?;
                if incoming.filter_scope.is_none() {
                    incoming.filter_scope = existing.row.filter_scope.clone();
                } else if incoming.filter_scope != existing.row.filter_scope {
                    self.identity.check_filter_scope(
                        TablePermission::WriteRow,
                        &incoming.row_id,
                        incoming.scope(),
                    )?;
                }
            }
            None => {
                let scope = incoming.filter_scope.get_or_insert_with(|| {
                    RowFilterScope::created_by(self.identity.user_id())
                });
                self.identity
                    .check_filter_scope(TablePermission::WriteRow, &incoming.row_id, scope)?;
            }
        }

        match check_write(stored.as_ref(), &incoming) {
            WriteCheck::Unchanged(current) => Ok(Plan::Unchanged(*current)),
            WriteCheck::Conflict(conflict) => Ok(Plan::Conflict(*conflict)),
            WriteCheck::Insert => {
                if incoming.deleted {
                    return Err(self.row_not_found(&incoming.row_id));
                }
                let mut row = Row::new(incoming.row_id.clone());
                self.overwrite_content(&mut row, &incoming);
                row.sync_state = SyncState::initial();
                row.create_user = Some(self.identity.user_id().to_string());
                Ok(Plan::Write(Mutation {
                    before: None,
                    after: StoredRow {
                        row,
                        sequence_value: 0,
                        previous_row_etag: None,
                        pre_conflict_state: None,
                        confirmed_files: BTreeSet::new(),
                    },
                    purge: false,
                }))
            }
            WriteCheck::Apply => {
                let Some(stored) = stored else {
                    return Err(self.row_not_found(&incoming.row_id));
                };
                if incoming.deleted {
                    return Ok(Plan::Write(self.deletion(stored)?));
                }
                let state = next_state(stored.row.sync_state, RowEvent::Update)?;
                let mut after = stored.clone();
                self.overwrite_content(&mut after.row, &incoming);
                after.row.sync_state = state;
                Ok(Plan::Write(Mutation {
                    before: Some(stored),
                    after,
                    purge: false,
                }))
            }
        }
    }

    /// Builds the mutation that deletes `stored`.
    fn deletion(&self, stored: StoredRow) -> EngineResult<Mutation> {
        let outcome = stored.row.sync_state.apply(RowEvent::Delete)?;
        let mut after = stored.clone();
        after.row.deleted = true;
        after.row.last_update_user = Some(self.identity.user_id().to_string());
        let purge = match outcome {
            Outcome::State(state) => {
                after.row.sync_state = state;
                false
            }
            Outcome::Purge => true,
        };
        Ok(Mutation {
            before: Some(stored),
            after,
            purge,
        })
    }

    /// Copies the client-controlled fields of `incoming` onto `target`.
    fn overwrite_content(&self, target: &mut Row, incoming: &Row) {
        target.filter_scope = incoming.filter_scope.clone();
        target.savepoint_type = incoming.savepoint_type;
        target.savepoint_timestamp = incoming.savepoint_timestamp.clone();
        target.savepoint_creator = incoming.savepoint_creator.clone();
        target.form_id = incoming.form_id.clone();
        target.locale = incoming.locale.clone();
        target.values = incoming.values.clone();
        target.file_attachments = incoming.file_attachments.clone();
        target.deleted = false;
        target.last_update_user = Some(self.identity.user_id().to_string());
    }

    /// Moves the stored row to `in_conflict` and returns the conflict with
    /// the updated server row.
    fn mark_in_conflict(&self, rows: &RowStore<'_>, mut conflict: Conflict) -> EngineResult<Conflict> {
        let Some(mut stored) = rows.get(&conflict.row_id)? else {
            return Ok(conflict);
        };
        let state = stored.row.sync_state;
        stored.row.sync_state = next_state(state, RowEvent::ConflictDetected)?;
        if state != SyncState::InConflict {
            stored.pre_conflict_state = Some(state);
        }
        rows.put(&stored)?;

        tracing::debug!(
            table = %self.table_id,
            row = %conflict.row_id,
            client_row_etag = ?conflict.client_row_etag,
            "write rejected, row in conflict"
        );
        conflict.server_row = stored.row;
        Ok(conflict)
    }

    /// Runs `f` under the table lock after rolling back any unfinished
    /// commit.
    fn with_lock<T>(
        &self,
        f: impl FnOnce(&mut TableEntry, u64) -> EngineResult<T>,
    ) -> EngineResult<T> {
        let _guard = self.engine.lock().acquire(&self.table_id)?;
        let (mut table, version) = self.engine.load_table(&self.table_id)?;
        let version = self.roll_back_pending(&mut table, version)?;
        f(&mut table, version)
    }

    fn save_table(&self, table: &TableEntry, version: u64) -> EngineResult<u64> {
        Ok(self.engine.backend().put(
            TABLES_SPACE,
            &table.table_id,
            &encode(table)?,
            Precondition::Version(version),
        )?)
    }

    /// Undoes a commit that never reached promotion.
    fn roll_back_pending(&self, table: &mut TableEntry, version: u64) -> EngineResult<u64> {
        let Some(pending) = table.pending_data_etag.clone() else {
            return Ok(version);
        };
        let sequence_value = table.pending_sequence();
        let log = self.log();
        let rows = self.rows();

        let entries = log.scan(&ChangeSetLog::changeset_range(sequence_value), None)?;
        for (_, entry) in &entries {
            rows.restore(&entry.after.row.row_id, entry.before.as_ref())?;
        }
        log.remove_changeset(&pending, sequence_value)?;

        table.pending_data_etag = None;
        let version = self.save_table(table, version)?;
        self.engine.backend().flush()?;

        tracing::warn!(
            table = %self.table_id,
            data_etag = %pending,
            rows = entries.len(),
            "rolled back unfinished commit"
        );
        Ok(version)
    }

    /// Commits `mutations` as one changeset, filling in the server-assigned
    /// fields of each `after` row.
    ///
    /// Does nothing for an empty batch.
    fn commit(
        &self,
        table: &mut TableEntry,
        version: u64,
        mutations: &mut [Mutation],
    ) -> EngineResult<()> {
        if mutations.is_empty() {
            return Ok(());
        }

        let versions = self.engine.versions();
        let data_etag = versions.next_data_etag(Some(&table.data_etag))?;
        let sequence_value = table.pending_sequence();

        table.pending_data_etag = Some(data_etag.clone());
        let version = self.save_table(table, version)?;

        let mut entries = Vec::with_capacity(mutations.len());
        for mutation in mutations.iter_mut() {
            let after = &mut mutation.after;
            after.previous_row_etag = mutation.before.as_ref().and_then(|b| b.row.row_etag.clone());
            after.row.row_etag = Some(versions.next_row_etag());
            after.row.data_etag_at_modification = Some(data_etag.clone());
            after.sequence_value = sequence_value;
            entries.push(LogEntry {
                data_etag: data_etag.clone(),
                after: after.clone(),
                before: mutation.before.clone(),
                purged: mutation.purge,
            });
        }
        self.log().append(&data_etag, sequence_value, &entries)?;

        let rows = self.rows();
        for mutation in mutations.iter() {
            if mutation.purge {
                rows.remove(&mutation.after.row.row_id)?;
            } else {
                rows.put(&mutation.after)?;
            }
        }

        table.data_etag = data_etag.clone();
        table.last_sequence = sequence_value;
        table.pending_data_etag = None;
        self.save_table(table, version)?;
        self.engine.backend().flush()?;

        tracing::info!(
            table = %self.table_id,
            data_etag = %data_etag,
            sequence_value,
            rows = mutations.len(),
            user = self.identity.user_id(),
            "changeset committed"
        );
        self.engine.queue().enqueue(TableChanged {
            table_id: self.table_id.clone(),
            data_etag,
        });
        Ok(())
    }
}

fn next_state(state: SyncState, event: RowEvent) -> EngineResult<SyncState> {
    match state.apply(event)? {
        Outcome::State(next) => Ok(next),
        Outcome::Purge => Err(EngineError::InvariantViolation(format!(
            "{event} from {state} cannot purge here"
        ))),
    }
}
