//! Access scopes derived from a row's filter scope.

use crate::row::{Access, RowFilterScope};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A grant of access to a class of principals.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Scope {
    /// Every identity.
    Default,
    /// A single user.
    User(String),
    /// Every member of a group.
    Group(String),
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scope::Default => f.write_str("DEFAULT"),
            Scope::User(user) => write!(f, "USER:{user}"),
            Scope::Group(group) => write!(f, "GROUP:{group}"),
        }
    }
}

/// Kind of access being asked for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScopeAccess {
    /// Reading the row.
    Read,
    /// Modifying or deleting the row.
    Write,
}

impl RowFilterScope {
    /// Returns the scopes that grant `access` to this row.
    ///
    /// An empty list means nobody is granted the access.
    pub fn scopes_for(&self, access: ScopeAccess) -> Vec<Scope> {
        let mut scopes = Vec::new();

        let default_grants = match (self.default_access, access) {
            (Access::Full | Access::Modify, _) => true,
            (Access::ReadOnly, ScopeAccess::Read) => true,
            (Access::ReadOnly, ScopeAccess::Write) | (Access::Hidden, _) => false,
        };
        if default_grants {
            scopes.push(Scope::Default);
        }

        if let Some(owner) = &self.row_owner {
            scopes.push(Scope::User(owner.clone()));
        }
        if let Some(group) = &self.group_privileged {
            scopes.push(Scope::Group(group.clone()));
        }
        if let Some(group) = &self.group_modify {
            scopes.push(Scope::Group(group.clone()));
        }
        if access == ScopeAccess::Read {
            if let Some(group) = &self.group_read_only {
                scopes.push(Scope::Group(group.clone()));
            }
        }

        scopes.sort();
        scopes.dedup();
        scopes
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_access_mapping() {
        let full = RowFilterScope::public();
        assert_eq!(full.scopes_for(ScopeAccess::Read), vec![Scope::Default]);
        assert_eq!(full.scopes_for(ScopeAccess::Write), vec![Scope::Default]);

        let modify = RowFilterScope::empty().with_default_access(Access::Modify);
        assert_eq!(modify.scopes_for(ScopeAccess::Write), vec![Scope::Default]);

        let read_only = RowFilterScope::empty().with_default_access(Access::ReadOnly);
        assert_eq!(read_only.scopes_for(ScopeAccess::Read), vec![Scope::Default]);
        assert!(read_only.scopes_for(ScopeAccess::Write).is_empty());
    }

    #[test]
    fn empty_scope_grants_nothing() {
        let scope = RowFilterScope::empty();
        assert!(scope.scopes_for(ScopeAccess::Read).is_empty());
        assert!(scope.scopes_for(ScopeAccess::Write).is_empty());
    }

    #[test]
    fn owner_and_groups() {
        let scope = RowFilterScope::owned_by("alice")
            .with_group_read_only("viewers")
            .with_group_modify("editors")
            .with_group_privileged("admins");

        let read = scope.scopes_for(ScopeAccess::Read);
        assert!(read.contains(&Scope::User("alice".into())));
        assert!(read.contains(&Scope::Group("viewers".into())));
        assert!(read.contains(&Scope::Group("editors".into())));
        assert!(read.contains(&Scope::Group("admins".into())));
        assert!(!read.contains(&Scope::Default));

        let write = scope.scopes_for(ScopeAccess::Write);
        assert!(write.contains(&Scope::User("alice".into())));
        assert!(write.contains(&Scope::Group("editors".into())));
        assert!(write.contains(&Scope::Group("admins".into())));
        assert!(!write.contains(&Scope::Group("viewers".into())));
    }

    #[test]
    fn duplicate_groups_collapse() {
        let scope = RowFilterScope::empty()
            .with_group_modify("team")
            .with_group_privileged("team");
        assert_eq!(
            scope.scopes_for(ScopeAccess::Write),
            vec![Scope::Group("team".into())]
        );
    }
}
