//! Rows and their access metadata.

use crate::etag::{DataETag, RowETag};
use crate::lifecycle::SyncState;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Access granted to everyone by a row's filter scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Access {
    /// Anyone may read, modify and delete.
    Full,
    /// Anyone may read and modify.
    Modify,
    /// Anyone may read.
    ReadOnly,
    /// Nobody is granted access by default.
    Hidden,
}

/// Per-row access-control metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RowFilterScope {
    /// Access granted to every identity.
    pub default_access: Access,
    /// User that owns the row.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub row_owner: Option<String>,
    /// Group whose members may read the row.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_read_only: Option<String>,
    /// Group whose members may read and modify the row.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_modify: Option<String>,
    /// Group whose members have full access to the row.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_privileged: Option<String>,
}

impl RowFilterScope {
    /// The empty scope: grants nobody.
    pub fn empty() -> Self {
        Self {
            default_access: Access::Hidden,
            row_owner: None,
            group_read_only: None,
            group_modify: None,
            group_privileged: None,
        }
    }

    /// A scope that grants full access to everyone.
    pub fn public() -> Self {
        Self {
            default_access: Access::Full,
            ..Self::empty()
        }
    }

    /// A hidden scope owned by `owner`.
    pub fn owned_by(owner: impl Into<String>) -> Self {
        Self {
            row_owner: Some(owner.into()),
            ..Self::empty()
        }
    }

    /// The scope given to a row inserted without one: full default access,
    /// owned by its creator.
    pub fn created_by(creator: impl Into<String>) -> Self {
        Self {
            row_owner: Some(creator.into()),
            ..Self::public()
        }
    }

    /// Sets the default access.
    pub fn with_default_access(mut self, access: Access) -> Self {
        self.default_access = access;
        self
    }

    /// Sets the read-only group.
    pub fn with_group_read_only(mut self, group: impl Into<String>) -> Self {
        self.group_read_only = Some(group.into());
        self
    }

    /// Sets the modify group.
    pub fn with_group_modify(mut self, group: impl Into<String>) -> Self {
        self.group_modify = Some(group.into());
        self
    }

    /// Sets the privileged group.
    pub fn with_group_privileged(mut self, group: impl Into<String>) -> Self {
        self.group_privileged = Some(group.into());
        self
    }

    /// Returns true if the scope grants nobody.
    pub fn is_empty(&self) -> bool {
        *self == Self::empty()
    }
}

impl Default for RowFilterScope {
    fn default() -> Self {
        Self::empty()
    }
}

static EMPTY_SCOPE: RowFilterScope = RowFilterScope {
    default_access: Access::Hidden,
    row_owner: None,
    group_read_only: None,
    group_modify: None,
    group_privileged: None,
};

/// How a form savepoint was taken.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SavepointType {
    /// The form was finalized.
    Complete,
    /// The form was saved as a draft.
    Incomplete,
}

/// A row of a synchronized table.
///
/// Clients send rows with the `rowETag` they last observed (or none for a
/// new row). The server fills in `rowETag`, `dataETagAtModification` and
/// `syncState` on every row it returns.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Row {
    /// Row identifier, unique within its table.
    pub row_id: String,
    /// Version stamp of this row.
    #[serde(default, rename = "rowETag")]
    pub row_etag: Option<RowETag>,
    /// Table dataETag current when this row last changed.
    #[serde(default, rename = "dataETagAtModification")]
    pub data_etag_at_modification: Option<DataETag>,
    /// True for a tombstone.
    #[serde(default)]
    pub deleted: bool,
    /// Lifecycle state as held by the server.
    #[serde(default = "SyncState::initial")]
    pub sync_state: SyncState,
    /// User that created the row.
    #[serde(default)]
    pub create_user: Option<String>,
    /// User that last modified the row.
    #[serde(default)]
    pub last_update_user: Option<String>,
    /// Access-control metadata. Unset on a client row that leaves the
    /// choice to the server; always set on rows the server returns.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filter_scope: Option<RowFilterScope>,
    /// Savepoint type of the form that produced the row.
    #[serde(default)]
    pub savepoint_type: Option<SavepointType>,
    /// Savepoint timestamp (ISO-8601).
    #[serde(default)]
    pub savepoint_timestamp: Option<String>,
    /// Savepoint creator.
    #[serde(default)]
    pub savepoint_creator: Option<String>,
    /// Form identifier.
    #[serde(default)]
    pub form_id: Option<String>,
    /// Locale of the form.
    #[serde(default)]
    pub locale: Option<String>,
    /// Column values keyed by column name.
    #[serde(default)]
    pub values: BTreeMap<String, Option<String>>,
    /// Names of files the row references.
    #[serde(default)]
    pub file_attachments: Vec<String>,
}

impl Row {
    /// Creates a new row with no values.
    pub fn new(row_id: impl Into<String>) -> Self {
        Self {
            row_id: row_id.into(),
            row_etag: None,
            data_etag_at_modification: None,
            deleted: false,
            sync_state: SyncState::initial(),
            create_user: None,
            last_update_user: None,
            filter_scope: None,
            savepoint_type: None,
            savepoint_timestamp: None,
            savepoint_creator: None,
            form_id: None,
            locale: None,
            values: BTreeMap::new(),
            file_attachments: Vec::new(),
        }
    }

    /// Sets a column value.
    pub fn with_value(mut self, column: impl Into<String>, value: impl Into<String>) -> Self {
        self.values.insert(column.into(), Some(value.into()));
        self
    }

    /// Sets the observed row ETag.
    pub fn with_row_etag(mut self, etag: RowETag) -> Self {
        self.row_etag = Some(etag);
        self
    }

    /// Sets the filter scope.
    pub fn with_filter_scope(mut self, scope: RowFilterScope) -> Self {
        self.filter_scope = Some(scope);
        self
    }

    /// The filter scope the gate evaluates; an unset scope grants nobody.
    pub fn scope(&self) -> &RowFilterScope {
        self.filter_scope.as_ref().unwrap_or(&EMPTY_SCOPE)
    }

    /// Adds a referenced file.
    pub fn with_attachment(mut self, name: impl Into<String>) -> Self {
        self.file_attachments.push(name.into());
        self
    }

    /// Returns true if `other` carries the same client-controlled content.
    ///
    /// Server-assigned fields (etags, sync state, users) are ignored.
    pub fn has_same_content(&self, other: &Row) -> bool {
        self.row_id == other.row_id
            && self.deleted == other.deleted
            && self.filter_scope == other.filter_scope
            && self.savepoint_type == other.savepoint_type
            && self.savepoint_timestamp == other.savepoint_timestamp
            && self.savepoint_creator == other.savepoint_creator
            && self.form_id == other.form_id
            && self.locale == other.locale
            && self.values == other.values
            && self.file_attachments == other.file_attachments
    }
}
