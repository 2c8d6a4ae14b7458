//! Property-based test generators using proptest.

use proptest::prelude::*;
use rowsync_engine::{DataManager, EngineResult};
use rowsync_protocol::{Access, Row, RowETag, RowFilterScope};

/// Strategy for generating row ids from a small pool, so that operations
/// collide on the same rows.
pub fn row_id_strategy(pool: usize) -> impl Strategy<Value = String> {
    (0..pool.max(1)).prop_map(|i| format!("r{i}"))
}

/// Strategy for generating valid column names.
pub fn column_name_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[a-z][a-z0-9_]{0,15}")
        .expect("Invalid regex")
        .prop_filter("reserved", |s| {
            rowsync_engine::validate_column_name(s).is_ok()
        })
}

/// Strategy for generating short column values.
pub fn value_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[a-zA-Z0-9 ]{0,12}").expect("Invalid regex")
}

/// Strategy for generating default access levels.
pub fn access_strategy() -> impl Strategy<Value = Access> {
    prop_oneof![
        Just(Access::Full),
        Just(Access::Modify),
        Just(Access::ReadOnly),
        Just(Access::Hidden),
    ]
}

/// Strategy for generating filter scopes over a fixed set of users and
/// groups.
pub fn filter_scope_strategy() -> impl Strategy<Value = RowFilterScope> {
    let principal = |names: &'static [&'static str]| {
        prop::option::of(prop::sample::select(names).prop_map(str::to_string))
    };
    (
        access_strategy(),
        principal(&["alice", "bob"]),
        principal(&["field", "office"]),
        principal(&["field", "office"]),
    )
        .prop_map(|(access, owner, read_only, modify)| RowFilterScope {
            default_access: access,
            row_owner: owner,
            group_read_only: read_only,
            group_modify: modify,
            group_privileged: None,
        })
}

/// One step applied to a table by a client.
#[derive(Debug, Clone)]
pub enum RowOperation {
    /// Insert or update a row with a name value, using the current rowETag.
    Upsert {
        /// Row id
        row_id: String,
        /// New name
        name: String,
    },
    /// Delete a row, using the current rowETag.
    Delete {
        /// Row id
        row_id: String,
    },
    /// Write a row with a rowETag that is no longer current.
    StaleWrite {
        /// Row id
        row_id: String,
    },
    /// Acknowledge everything committed so far.
    Acknowledge,
}

/// Strategy for generating a single row operation.
pub fn row_operation_strategy(pool: usize) -> impl Strategy<Value = RowOperation> {
    prop_oneof![
        4 => (row_id_strategy(pool), value_strategy())
            .prop_map(|(row_id, name)| RowOperation::Upsert { row_id, name }),
        2 => row_id_strategy(pool).prop_map(|row_id| RowOperation::Delete { row_id }),
        1 => row_id_strategy(pool).prop_map(|row_id| RowOperation::StaleWrite { row_id }),
        1 => Just(RowOperation::Acknowledge),
    ]
}

/// Strategy for generating a sequence of row operations.
pub fn row_operations_strategy(
    pool: usize,
    max_len: usize,
) -> impl Strategy<Value = Vec<RowOperation>> {
    prop::collection::vec(row_operation_strategy(pool), 1..max_len.max(2))
}

/// Applies `op` to a table as a well-behaved client would: reads the row
/// first and sends its current rowETag.
///
/// Rejections (conflicts, illegal transitions, unknown rows) are returned
/// to the caller; random sequences hit them routinely.
pub fn apply_operation(data: &DataManager<'_>, op: &RowOperation) -> EngineResult<()> {
    match op {
        RowOperation::Upsert { row_id, name } => {
            let mut row = Row::new(row_id.as_str()).with_value("name", name.as_str());
            if let Ok(current) = data.get_row(row_id) {
                row.row_etag = current.row_etag;
            }
            data.insert_or_update_row(row).map(|_| ())
        }
        RowOperation::Delete { row_id } => {
            let current = data.get_row(row_id)?;
            data.delete_row(row_id, current.row_etag.as_ref()).map(|_| ())
        }
        RowOperation::StaleWrite { row_id } => {
            let row = Row::new(row_id.as_str())
                .with_value("name", "stale")
                .with_row_etag(RowETag::new("stale"));
            data.insert_or_update_row(row).map(|_| ())
        }
        RowOperation::Acknowledge => {
            let through = data.data_etag()?;
            data.acknowledge_synced(&through).map(|_| ())
        }
    }
}
