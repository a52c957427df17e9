//! Isolated loading domains.
//!
//! # Responsibility
//! - Hold the ordered, deduplicated archive list of one application.
//! - Bind that list to the grant resolver deciding what its code may do.
//!
//! # Invariants
//! - A `LoadingDomain` is immutable once built and shared through `Arc`.
//! - Resource lookup consults the domain itself before its parent.
//! - Resource locations are absolute; relative query paths resolve against
//!   the working directory.
//!
//! # See also
//! - `assembler` for construction and extension resolution.

pub mod assembler;

use crate::extension::{Extension, InspectError};
use crate::paths::{absolute_location, PathError};
use crate::policy::{GrantResolver, Origin, Permission, PermissionSet};
use std::fmt::{Display, Formatter};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;

pub use assembler::{Classpath, ClasspathEntry, DomainAssembler, RootSet};

pub type DomainResult<T> = Result<T, DomainError>;

/// A required extension no candidate archive provides.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnresolvedExtension {
    pub archive: PathBuf,
    pub extension: Extension,
}

impl Display for UnresolvedExtension {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "`{}` requires {}",
            self.archive.display(),
            self.extension
        )
    }
}

fn join_unresolved(unresolved: &[UnresolvedExtension]) -> String {
    unresolved
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

#[derive(Debug, Error)]
pub enum DomainError {
    #[error("invalid root `{root}`: {reason}")]
    InvalidRoot { root: PathBuf, reason: String },
    #[error(transparent)]
    InvalidPath(#[from] PathError),
    #[error("unsatisfied extensions: {}", join_unresolved(.unresolved))]
    UnsatisfiedExtension { unresolved: Vec<UnresolvedExtension> },
    #[error("cannot inspect `{archive}`: {source}")]
    InvalidManifest {
        archive: PathBuf,
        #[source]
        source: InspectError,
    },
    #[error("`{0}` is not a resource of this domain")]
    UnknownResource(PathBuf),
    #[error("`{resource}` is not granted {permission}")]
    AccessDenied {
        resource: String,
        permission: Permission,
    },
}

/// One archive of a loading domain together with its origin.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DomainResource {
    pub path: PathBuf,
    pub origin: Origin,
}

impl DomainResource {
    pub fn location(&self) -> &str {
        self.origin.location()
    }
}

/// Ordered resources plus the policy that governs them.
#[derive(Debug)]
pub struct LoadingDomain {
    name: String,
    resources: Vec<DomainResource>,
    grants: Arc<GrantResolver>,
    parent: Option<Arc<LoadingDomain>>,
}

impl LoadingDomain {
    pub(crate) fn new(
        name: String,
        resources: Vec<DomainResource>,
        grants: Arc<GrantResolver>,
        parent: Option<Arc<LoadingDomain>>,
    ) -> Self {
        Self {
            name,
            resources,
            grants,
            parent,
        }
    }

    pub fn name(&self) -> &str {
        self.name.as_str()
    }

    pub fn resources(&self) -> &[DomainResource] {
        &self.resources
    }

    pub fn parent(&self) -> Option<&Arc<LoadingDomain>> {
        self.parent.as_ref()
    }

    pub fn grants(&self) -> &Arc<GrantResolver> {
        &self.grants
    }

    /// Whether `path` belongs to this domain (parents are not consulted).
    pub fn contains(&self, path: &Path) -> bool {
        self.own_resource(path).is_some()
    }

    pub fn origin_of(&self, path: &Path) -> Option<&Origin> {
        self.own_resource(path).map(|resource| &resource.origin)
    }

    /// Finds a resource whose location ends with `name`, searching this
    /// domain first and then its ancestors.
    pub fn find_resource(&self, name: &str) -> Option<&DomainResource> {
        let suffix = format!("/{}", name.trim_start_matches('/'));
        self.resources
            .iter()
            .find(|resource| resource.location().ends_with(&suffix))
            .or_else(|| {
                self.parent
                    .as_deref()
                    .and_then(|parent| parent.find_resource(name))
            })
    }

    /// Permission set of the archive at `path`.
    ///
    /// Archives inherited from a parent are resolved by that parent's policy.
    pub fn permissions_for(&self, path: &Path) -> DomainResult<Arc<PermissionSet>> {
        if let Some(resource) = self.own_resource(path) {
            return Ok(self.grants.resolve_permissions(&resource.origin));
        }
        match self.parent.as_deref() {
            Some(parent) => parent.permissions_for(path),
            None => Err(DomainError::UnknownResource(path.to_path_buf())),
        }
    }

    /// Fails with `AccessDenied` unless the archive at `path` holds a
    /// permission implying `permission`.
    pub fn check_permission(&self, path: &Path, permission: &Permission) -> DomainResult<()> {
        if self.permissions_for(path)?.implies(permission) {
            Ok(())
        } else {
            Err(DomainError::AccessDenied {
                resource: path.display().to_string(),
                permission: permission.clone(),
            })
        }
    }

    fn own_resource(&self, path: &Path) -> Option<&DomainResource> {
        let location = absolute_location(path).ok()?;
        self.resources
            .iter()
            .find(|resource| resource.location() == location)
    }
}
