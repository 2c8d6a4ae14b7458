//! Row Visibility Gate and table-level permissions.
//!
//! Permissions are resolved once per request into an [`Identity`]: the
//! caller's user id, group memberships and table permissions. The gate then
//! answers per-row questions from that snapshot without further lookups.

use crate::error::{EngineError, EngineResult};
use parking_lot::RwLock;
use rowsync_protocol::{RowFilterScope, Scope, ScopeAccess};
use std::collections::{BTreeSet, HashMap};
use std::fmt;

/// A table-level permission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum TablePermission {
    /// Read table metadata and changesets.
    ReadTable,
    /// Read rows the row scope grants.
    ReadRow,
    /// Insert and modify rows the row scope grants.
    WriteRow,
    /// Delete rows the row scope grants.
    DeleteRow,
    /// Read every row regardless of scope.
    UnfilteredRead,
    /// Modify every row regardless of scope.
    UnfilteredWrite,
    /// Delete every row regardless of scope.
    UnfilteredDelete,
    /// Create and delete tables.
    Admin,
}

impl TablePermission {
    /// Returns the unfiltered counterpart of a row permission.
    pub fn unfiltered(self) -> Option<TablePermission> {
        match self {
            TablePermission::ReadRow => Some(TablePermission::UnfilteredRead),
            TablePermission::WriteRow => Some(TablePermission::UnfilteredWrite),
            TablePermission::DeleteRow => Some(TablePermission::UnfilteredDelete),
            _ => None,
        }
    }

    fn scope_access(self) -> ScopeAccess {
        match self {
            TablePermission::ReadRow | TablePermission::ReadTable | TablePermission::UnfilteredRead => {
                ScopeAccess::Read
            }
            _ => ScopeAccess::Write,
        }
    }
}

impl fmt::Display for TablePermission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TablePermission::ReadTable => "read table",
            TablePermission::ReadRow => "read row",
            TablePermission::WriteRow => "write row",
            TablePermission::DeleteRow => "delete row",
            TablePermission::UnfilteredRead => "read any row",
            TablePermission::UnfilteredWrite => "write any row",
            TablePermission::UnfilteredDelete => "delete any row",
            TablePermission::Admin => "administer tables",
        };
        f.write_str(name)
    }
}

/// Named bundles of permissions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Role {
    /// Read-only access to rows the scope grants.
    Reader,
    /// Synchronize rows the scope grants.
    Synchronize,
    /// Synchronize every row.
    SuperUser,
    /// Everything, including table administration.
    Administer,
}

impl Role {
    /// Permissions granted by the role.
    pub fn permissions(self) -> BTreeSet<TablePermission> {
        use TablePermission::*;
        let list: &[TablePermission] = match self {
            Role::Reader => &[ReadTable, ReadRow],
            Role::Synchronize => &[ReadTable, ReadRow, WriteRow, DeleteRow],
            Role::SuperUser => &[
                ReadTable,
                ReadRow,
                WriteRow,
                DeleteRow,
                UnfilteredRead,
                UnfilteredWrite,
                UnfilteredDelete,
            ],
            Role::Administer => &[
                ReadTable,
                ReadRow,
                WriteRow,
                DeleteRow,
                UnfilteredRead,
                UnfilteredWrite,
                UnfilteredDelete,
                Admin,
            ],
        };
        list.iter().copied().collect()
    }
}

/// Capabilities of one caller, captured for the duration of a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    user_id: String,
    groups: BTreeSet<String>,
    permissions: BTreeSet<TablePermission>,
}

impl Identity {
    /// Creates an identity with no groups and no permissions.
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            groups: BTreeSet::new(),
            permissions: BTreeSet::new(),
        }
    }

    /// Adds a group membership.
    pub fn with_group(mut self, group: impl Into<String>) -> Self {
        self.groups.insert(group.into());
        self
    }

    /// Adds a permission.
    pub fn with_permission(mut self, permission: TablePermission) -> Self {
        self.permissions.insert(permission);
        self
    }

    /// Adds every permission of a role.
    pub fn with_role(mut self, role: Role) -> Self {
        self.permissions.extend(role.permissions());
        self
    }

    /// The caller's user id.
    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    /// The caller's groups.
    pub fn groups(&self) -> &BTreeSet<String> {
        &self.groups
    }

    /// Returns true if the caller holds `permission` at the table level.
    pub fn has(&self, permission: TablePermission) -> bool {
        self.permissions.contains(&permission)
            || self.permissions.contains(&TablePermission::Admin)
    }

    /// Fails unless the caller holds `permission`.
    ///
    /// # Errors
    ///
    /// Returns `PermissionDenied` naming the permission.
    pub fn check_permission(&self, permission: TablePermission) -> EngineResult<()> {
        if self.has(permission) {
            Ok(())
        } else {
            Err(EngineError::denied(&self.user_id, permission.to_string()))
        }
    }

    /// Returns true if `scope` names this caller.
    pub fn matches(&self, scope: &Scope) -> bool {
        match scope {
            Scope::Default => true,
            Scope::User(user) => *user == self.user_id,
            Scope::Group(group) => self.groups.contains(group),
        }
    }

    /// The gate: may this caller exercise `permission` on a row with
    /// `filter_scope`?
    ///
    /// True if the caller holds the unfiltered form of the permission, or
    /// if one of the scopes the row grants for that kind of access names
    /// the caller. An empty scope grants nobody.
    pub fn has_filter_scope(
        &self,
        permission: TablePermission,
        row_id: &str,
        filter_scope: &RowFilterScope,
    ) -> bool {
        if let Some(unfiltered) = permission.unfiltered() {
            if self.has(unfiltered) {
                return true;
            }
        }
        let granted = filter_scope
            .scopes_for(permission.scope_access())
            .iter()
            .any(|scope| self.matches(scope));
        if !granted {
            tracing::trace!(user = %self.user_id, row = row_id, %permission, "row scope denies");
        }
        granted
    }

    /// Fails unless the gate admits the caller.
    ///
    /// # Errors
    ///
    /// Returns `PermissionDenied` naming the row.
    pub fn check_filter_scope(
        &self,
        permission: TablePermission,
        row_id: &str,
        filter_scope: &RowFilterScope,
    ) -> EngineResult<()> {
        if self.has_filter_scope(permission, row_id, filter_scope) {
            Ok(())
        } else {
            Err(EngineError::denied(
                &self.user_id,
                format!("{permission} {row_id}"),
            ))
        }
    }
}

/// Resolves a caller into an [`Identity`].
pub trait PermissionResolver: Send + Sync {
    /// Resolves `user_id`'s capabilities for `table_id`.
    ///
    /// # Errors
    ///
    /// Returns an error if the caller's grants cannot be loaded.
    fn resolve(&self, user_id: &str, table_id: &str) -> EngineResult<Identity>;
}

/// Key of a grant: `None` applies to every table.
type GrantKey = (Option<String>, Scope);

/// In-process access-control list: roles granted to scopes, globally or on
/// one table, plus group memberships.
///
/// A caller's roles on a table are the union of the global grants and the
/// grants made on that table.
#[derive(Debug, Default)]
pub struct AclTable {
    grants: RwLock<HashMap<GrantKey, BTreeSet<Role>>>,
    members: RwLock<HashMap<String, BTreeSet<String>>>,
}

impl AclTable {
    /// Creates an empty table; nobody has any permission.
    pub fn new() -> Self {
        Self::default()
    }

    /// Grants `role` to everyone named by `scope`, on every table.
    pub fn grant(&self, scope: Scope, role: Role) {
        self.grants.write().entry((None, scope)).or_default().insert(role);
    }

    /// Grants `role` to everyone named by `scope`, on `table_id` only.
    pub fn grant_on(&self, table_id: impl Into<String>, scope: Scope, role: Role) {
        self.grants
            .write()
            .entry((Some(table_id.into()), scope))
            .or_default()
            .insert(role);
    }

    /// Withdraws a grant made with [`grant`](Self::grant) (`table_id` of
    /// `None`) or [`grant_on`](Self::grant_on). Returns whether it existed.
    pub fn revoke(&self, table_id: Option<&str>, scope: &Scope, role: Role) -> bool {
        let key = (table_id.map(str::to_string), scope.clone());
        let mut grants = self.grants.write();
        let Some(roles) = grants.get_mut(&key) else {
            return false;
        };
        let removed = roles.remove(&role);
        if roles.is_empty() {
            grants.remove(&key);
        }
        removed
    }

    /// Roles granted to `scope` on `table_id`, or globally for `None`.
    pub fn roles(&self, table_id: Option<&str>, scope: &Scope) -> BTreeSet<Role> {
        let key = (table_id.map(str::to_string), scope.clone());
        self.grants.read().get(&key).cloned().unwrap_or_default()
    }

    /// Adds `user_id` to `group`.
    pub fn add_member(&self, user_id: impl Into<String>, group: impl Into<String>) {
        self.members
            .write()
            .entry(user_id.into())
            .or_default()
            .insert(group.into());
    }

    /// Builder form of [`grant`](Self::grant).
    pub fn with_grant(self, scope: Scope, role: Role) -> Self {
        self.grant(scope, role);
        self
    }

    /// Builder form of [`grant_on`](Self::grant_on).
    pub fn with_table_grant(self, table_id: impl Into<String>, scope: Scope, role: Role) -> Self {
        self.grant_on(table_id, scope, role);
        self
    }

    /// Builder form of [`add_member`](Self::add_member).
    pub fn with_member(self, user_id: impl Into<String>, group: impl Into<String>) -> Self {
        self.add_member(user_id, group);
        self
    }
}

impl PermissionResolver for AclTable {
    fn resolve(&self, user_id: &str, table_id: &str) -> EngineResult<Identity> {
        let mut identity = Identity::new(user_id);
        if let Some(groups) = self.members.read().get(user_id) {
            for group in groups {
                identity = identity.with_group(group.clone());
            }
        }

        let grants = self.grants.read();
        for ((table, scope), roles) in grants.iter() {
            let applies = table.is_none() || table.as_deref() == Some(table_id);
            if applies && identity.matches(scope) {
                for role in roles {
                    identity = identity.with_role(*role);
                }
            }
        }
        Ok(identity)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rowsync_protocol::Access;

    fn member() -> Identity {
        Identity::new("alice")
            .with_group("editors")
            .with_role(Role::Synchronize)
    }

    #[test]
    fn default_scope_grants_everyone() {
        let scope = RowFilterScope::public();
        assert!(member().has_filter_scope(TablePermission::ReadRow, "r1", &scope));
        assert!(member().has_filter_scope(TablePermission::WriteRow, "r1", &scope));
    }

    #[test]
    fn empty_scope_grants_only_unfiltered() {
        let scope = RowFilterScope::empty();
        assert!(!member().has_filter_scope(TablePermission::ReadRow, "r1", &scope));

        let super_user = Identity::new("root").with_role(Role::SuperUser);
        assert!(super_user.has_filter_scope(TablePermission::ReadRow, "r1", &scope));
        assert!(super_user.has_filter_scope(TablePermission::DeleteRow, "r1", &scope));
    }

    #[test]
    fn user_and_group_scopes() {
        let owned = RowFilterScope::owned_by("alice");
        assert!(member().has_filter_scope(TablePermission::WriteRow, "r1", &owned));
        let other = Identity::new("bob").with_role(Role::Synchronize);
        assert!(!other.has_filter_scope(TablePermission::ReadRow, "r1", &owned));

        let group_read = RowFilterScope::empty().with_group_read_only("editors");
        assert!(member().has_filter_scope(TablePermission::ReadRow, "r1", &group_read));
        assert!(!member().has_filter_scope(TablePermission::WriteRow, "r1", &group_read));
    }

    #[test]
    fn read_only_default() {
        let scope = RowFilterScope::empty().with_default_access(Access::ReadOnly);
        assert!(member().has_filter_scope(TablePermission::ReadRow, "r1", &scope));
        assert!(!member().has_filter_scope(TablePermission::DeleteRow, "r1", &scope));
        assert!(member()
            .check_filter_scope(TablePermission::DeleteRow, "r1", &scope)
            .unwrap_err()
            .is_denied());
    }

    #[test]
    fn acl_resolves_grants_and_groups() {
        let acl = AclTable::new()
            .with_grant(Scope::Default, Role::Reader)
            .with_grant(Scope::Group("editors".into()), Role::Synchronize)
            .with_grant(Scope::User("root".into()), Role::Administer)
            .with_member("alice", "editors");

        let alice = acl.resolve("alice", "t1").unwrap();
        assert!(alice.has(TablePermission::WriteRow));
        assert!(alice.groups().contains("editors"));
        assert!(!alice.has(TablePermission::UnfilteredRead));

        let bob = acl.resolve("bob", "t1").unwrap();
        assert!(bob.has(TablePermission::ReadRow));
        assert!(!bob.has(TablePermission::WriteRow));
        assert!(bob.check_permission(TablePermission::WriteRow).is_err());

        let root = acl.resolve("root", "t1").unwrap();
        assert!(root.has(TablePermission::Admin));
        assert!(root.has(TablePermission::UnfilteredDelete));
    }

    #[test]
    fn grants_can_be_limited_to_one_table() {
        let acl = AclTable::new()
            .with_grant(Scope::Default, Role::Reader)
            .with_table_grant("surveys", Scope::User("alice".into()), Role::Synchronize)
            .with_table_grant("audit", Scope::User("alice".into()), Role::SuperUser);

        let surveys = acl.resolve("alice", "surveys").unwrap();
        assert!(surveys.has(TablePermission::WriteRow));
        assert!(!surveys.has(TablePermission::UnfilteredRead));

        let audit = acl.resolve("alice", "audit").unwrap();
        assert!(audit.has(TablePermission::UnfilteredRead));

        let other = acl.resolve("alice", "people").unwrap();
        assert!(other.has(TablePermission::ReadRow));
        assert!(!other.has(TablePermission::WriteRow));

        let bob = acl.resolve("bob", "surveys").unwrap();
        assert!(!bob.has(TablePermission::WriteRow));
    }

    #[test]
    fn revoked_grants_stop_applying() {
        let alice = Scope::User("alice".into());
        let acl = AclTable::new()
            .with_grant(Scope::Default, Role::Reader)
            .with_table_grant("surveys", alice.clone(), Role::Synchronize);
        assert_eq!(
            acl.roles(Some("surveys"), &alice),
            BTreeSet::from([Role::Synchronize])
        );

        assert!(acl.revoke(Some("surveys"), &alice, Role::Synchronize));
        assert!(!acl.revoke(Some("surveys"), &alice, Role::Synchronize));
        assert!(acl.roles(Some("surveys"), &alice).is_empty());
        assert!(!acl.resolve("alice", "surveys").unwrap().has(TablePermission::WriteRow));

        // a table grant does not revoke the global one
        assert!(!acl.revoke(Some("surveys"), &Scope::Default, Role::Reader));
        assert!(acl.resolve("alice", "surveys").unwrap().has(TablePermission::ReadRow));
        assert!(acl.revoke(None, &Scope::Default, Role::Reader));
        assert!(!acl.resolve("alice", "surveys").unwrap().has(TablePermission::ReadRow));
    }
}
