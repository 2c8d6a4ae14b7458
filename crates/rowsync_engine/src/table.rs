//! Table administration.

use crate::changeset_log::ChangeSetLog;
use crate::engine::SyncEngine;
use crate::error::{EngineError, EngineResult};
use crate::permissions::{Identity, TablePermission};
use crate::record::{
    changesets_space, decode, encode, log_space, rows_space, TableEntry, TABLES_SPACE,
};
use rowsync_protocol::{ColumnDefinition, SchemaETag, TableResource};
use rowsync_storage::{KeyRange, Precondition};
use std::collections::HashSet;
use uuid::Uuid;

/// Row fields a column may not shadow.
const RESERVED_NAMES: &[&str] = &[
    "rowId",
    "rowETag",
    "dataETagAtModification",
    "deleted",
    "syncState",
    "createUser",
    "lastUpdateUser",
    "filterScope",
    "savepointType",
    "savepointTimestamp",
    "savepointCreator",
    "formId",
    "locale",
    "fileAttachments",
];

/// Fails unless `name` is an identifier: an ASCII letter followed by ASCII
/// letters, digits or underscores.
fn check_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(first) if first.is_ascii_alphabetic() => {
            chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        }
        _ => false,
    }
}

/// Validates a column name.
///
/// # Errors
///
/// Returns `BadColumnName` for a non-identifier or a reserved row field name.
pub fn validate_column_name(name: &str) -> EngineResult<()> {
    if !check_identifier(name) {
        return Err(EngineError::BadColumnName(format!(
            "{name:?} is not a valid identifier"
        )));
    }
    if RESERVED_NAMES.iter().any(|r| r.eq_ignore_ascii_case(name)) {
        return Err(EngineError::BadColumnName(format!("{name:?} is reserved")));
    }
    Ok(())
}

/// Converts a table entry into its public description.
pub fn table_resource(entry: &TableEntry) -> TableResource {
    TableResource {
        table_id: entry.table_id.clone(),
        schema_etag: entry.schema_etag.clone(),
        data_etag: Some(entry.data_etag.clone()),
        columns: entry.columns.clone(),
    }
}

/// Creates, lists and deletes tables.
pub struct TableManager<'a> {
    engine: &'a SyncEngine,
    identity: &'a Identity,
}

impl<'a> TableManager<'a> {
    pub(crate) fn new(engine: &'a SyncEngine, identity: &'a Identity) -> Self {
        Self { engine, identity }
    }

    /// Creates a table.
    ///
    /// Creating a table that already exists with the same columns returns
    /// the existing table.
    ///
    /// # Errors
    ///
    /// - `PermissionDenied` without the admin permission
    /// - `BadColumnName` for an invalid table id or column name
    /// - `InconsistentState` if the table exists with other columns
    pub fn create_table(
        &self,
        table_id: &str,
        columns: Vec<ColumnDefinition>,
    ) -> EngineResult<TableResource> {
        self.identity.check_permission(TablePermission::Admin)?;
        if !check_identifier(table_id) {
            return Err(EngineError::BadColumnName(format!(
                "table id {table_id:?} is not a valid identifier"
            )));
        }
        let mut seen = HashSet::new();
        for column in &columns {
            validate_column_name(&column.name)?;
            if !seen.insert(column.name.as_str()) {
                return Err(EngineError::BadColumnName(format!(
                    "column {:?} is defined twice",
                    column.name
                )));
            }
        }

        let _guard = self.engine.lock().acquire(table_id)?;
        match self.engine.load_table(table_id) {
            Ok((existing, _)) if existing.columns == columns => {
                return Ok(table_resource(&existing));
            }
            Ok(_) => {
                return Err(EngineError::InconsistentState(format!(
                    "table {table_id} already exists with a different schema"
                )));
            }
            Err(EngineError::NotFound(_)) => {}
            Err(e) => return Err(e),
        }

        let initial = self.engine.versions().next_data_etag(None)?;
        let entry = TableEntry {
            table_id: table_id.to_string(),
            schema_etag: SchemaETag::new(Uuid::new_v4().to_string()),
            columns,
            initial_data_etag: initial.clone(),
            data_etag: initial.clone(),
            pending_data_etag: None,
            last_sequence: 0,
        };

        let backend = self.engine.backend();
        ChangeSetLog::new(backend, table_id).record_initial(&initial)?;
        backend.put(
            TABLES_SPACE,
            table_id,
            &encode(&entry)?,
            Precondition::Absent,
        )?;
        backend.flush()?;

        tracing::info!(table = table_id, data_etag = %initial, "table created");
        Ok(table_resource(&entry))
    }

    /// Describes a table.
    ///
    /// # Errors
    ///
    /// `PermissionDenied` without read access; `NotFound` for an unknown table.
    pub fn get_table(&self, table_id: &str) -> EngineResult<TableResource> {
        self.identity.check_permission(TablePermission::ReadTable)?;
        let (entry, _) = self.engine.load_table(table_id)?;
        Ok(table_resource(&entry))
    }

    /// Describes every table, ordered by table id.
    ///
    /// # Errors
    ///
    /// `PermissionDenied` without read access.
    pub fn list_tables(&self) -> EngineResult<Vec<TableResource>> {
        self.identity.check_permission(TablePermission::ReadTable)?;
        self.engine
            .backend()
            .scan(TABLES_SPACE, &KeyRange::all(), None)?
            .into_iter()
            .map(|(_, versioned)| decode::<TableEntry>(&versioned.value).map(|e| table_resource(&e)))
            .collect()
    }

    /// Deletes a table with its rows and history.
    ///
    /// # Errors
    ///
    /// `PermissionDenied` without the admin permission; `NotFound` for an
    /// unknown table.
    pub fn delete_table(&self, table_id: &str) -> EngineResult<()> {
        self.identity.check_permission(TablePermission::Admin)?;
        let _guard = self.engine.lock().acquire(table_id)?;
        self.engine.load_table(table_id)?;

        let backend = self.engine.backend();
        // the entry goes first so no request sees a half-deleted table
        backend.delete(TABLES_SPACE, table_id)?;
        for space in [rows_space(table_id), log_space(table_id), changesets_space(table_id)] {
            for (key, _) in backend.scan(&space, &KeyRange::all(), None)? {
                backend.delete(&space, &key)?;
            }
        }
        backend.flush()?;

        tracing::info!(table = table_id, "table deleted");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn column_names() {
        assert!(validate_column_name("name").is_ok());
        assert!(validate_column_name("a_1").is_ok());
        assert!(validate_column_name("1abc").is_err());
        assert!(validate_column_name("_private").is_err());
        assert!(validate_column_name("has space").is_err());
        assert!(validate_column_name("").is_err());
        assert!(validate_column_name("rowId").is_err());
        assert!(validate_column_name("ROWETAG").is_err());
    }
}
