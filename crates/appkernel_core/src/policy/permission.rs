//! Permission descriptors and accumulated permission sets.

use indexmap::IndexSet;
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};

/// Kind string of the wildcard permission that implies every other one.
pub const PERMISSION_KIND_ALL: &str = "all";

/// One `{kind, target, actions}` permission descriptor.
///
/// `target` and `actions` are optional; an absent target covers every target
/// of the kind, and `actions` is a comma-separated list.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Permission {
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actions: Option<String>,
}

impl Permission {
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            target: None,
            actions: None,
        }
    }

    pub fn with_target(mut self, target: impl Into<String>) -> Self {
        self.target = Some(target.into());
        self
    }

    pub fn with_actions(mut self, actions: impl Into<String>) -> Self {
        self.actions = Some(actions.into());
        self
    }

    /// The wildcard permission.
    pub fn all() -> Self {
        Self::new(PERMISSION_KIND_ALL)
    }

    pub fn is_all(&self) -> bool {
        self.kind == PERMISSION_KIND_ALL
    }

    /// Returns whether holding `self` is enough to perform `requested`.
    ///
    /// Target rules: `*` covers everything, `dir/*` covers direct children,
    /// `dir/-` and `dir/**` cover the whole subtree, anything else must be
    /// equal. Every requested action must be granted (`*` grants all).
    pub fn implies(&self, requested: &Permission) -> bool {
        if self.is_all() {
            return true;
        }
        self.kind == requested.kind
            && target_implies(self.target.as_deref(), requested.target.as_deref())
            && actions_implies(self.actions.as_deref(), requested.actions.as_deref())
    }
}

impl Display for Permission {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.kind)?;
        if let Some(target) = &self.target {
            write!(f, " \"{target}\"")?;
        }
        if let Some(actions) = &self.actions {
            write!(f, " [{actions}]")?;
        }
        Ok(())
    }
}

fn target_implies(granted: Option<&str>, requested: Option<&str>) -> bool {
    let (granted, requested) = match (granted, requested) {
        (None, _) => return true,
        (Some(_), None) => return false,
        (Some(granted), Some(requested)) => (granted, requested),
    };
    if granted == "*" || granted == requested {
        return true;
    }
    if let Some(prefix) = granted
        .strip_suffix("/-")
        .or_else(|| granted.strip_suffix("/**"))
    {
        return requested
            .strip_prefix(prefix)
            .is_some_and(|rest| rest.starts_with('/'));
    }
    if let Some(prefix) = granted.strip_suffix("/*") {
        return requested
            .strip_prefix(prefix)
            .and_then(|rest| rest.strip_prefix('/'))
            .is_some_and(|child| !child.is_empty() && !child.contains('/'));
    }
    false
}

fn actions_implies(granted: Option<&str>, requested: Option<&str>) -> bool {
    let Some(requested) = requested else {
        return true;
    };
    let Some(granted) = granted else {
        return false;
    };
    let granted: Vec<&str> = split_actions(granted).collect();
    if granted.contains(&"*") {
        return true;
    }
    split_actions(requested).all(|action| granted.contains(&action))
}

fn split_actions(actions: &str) -> impl Iterator<Item = &str> {
    actions
        .split(',')
        .map(str::trim)
        .filter(|action| !action.is_empty())
}

/// Insertion-ordered, deduplicated permission collection.
///
/// Equality is order-independent.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PermissionSet {
    entries: IndexSet<Permission>,
}

impl PermissionSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// A set holding only the wildcard permission.
    pub fn unrestricted() -> Self {
        let mut set = Self::new();
        set.add(Permission::all());
        set
    }

    /// Appends a permission; returns `false` when an equal one is present.
    pub fn add(&mut self, permission: Permission) -> bool {
        self.entries.insert(permission)
    }

    pub fn contains(&self, permission: &Permission) -> bool {
        self.entries.contains(permission)
    }

    /// Returns whether any held permission implies `requested`.
    pub fn implies(&self, requested: &Permission) -> bool {
        self.entries.iter().any(|held| held.implies(requested))
    }

    pub fn iter(&self) -> impl Iterator<Item = &Permission> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Extend<Permission> for PermissionSet {
    fn extend<T: IntoIterator<Item = Permission>>(&mut self, iter: T) {
        for permission in iter {
            self.add(permission);
        }
    }
}

impl FromIterator<Permission> for PermissionSet {
    fn from_iter<T: IntoIterator<Item = Permission>>(iter: T) -> Self {
        let mut set = Self::new();
        set.extend(iter);
        set
    }
}
