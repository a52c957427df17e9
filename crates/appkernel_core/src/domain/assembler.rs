//! Builds loading domains from file roots and extension declarations.

use crate::domain::{DomainError, DomainResource, DomainResult, LoadingDomain, UnresolvedExtension};
use crate::extension::inspector::is_sidecar;
use crate::extension::{ArchiveInspector, ArchiveManifest, Extension, ExtensionIndex};
use crate::paths::{absolute_location, normalize_path, PathMatcher};
use crate::policy::{GrantResolver, Origin};
use log::{debug, error, info};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use walkdir::WalkDir;

/// Base (installed application) and work (per-install scratch) roots.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RootSet {
    pub base: PathBuf,
    pub work: PathBuf,
}

impl RootSet {
    pub fn new(base: impl Into<PathBuf>, work: impl Into<PathBuf>) -> Self {
        Self {
            base: base.into(),
            work: work.into(),
        }
    }

    /// Selects the files matching `includes` and no `excludes` below both
    /// roots, base first. A location seen in the base root shadows the same
    /// location in the work root.
    ///
    /// # Errors
    /// - `InvalidRoot` when a root is missing, not a directory or unlistable.
    /// - `InvalidPath` when a pattern climbs above an absolute root.
    pub fn resolve_classpath<S: AsRef<str>>(
        &self,
        includes: &[S],
        excludes: &[S],
    ) -> DomainResult<Classpath> {
        let mut seen = HashSet::new();
        let mut entries = Vec::new();
        for root in [&self.base, &self.work] {
            for (path, location) in scan_root(root, includes, excludes)? {
                if seen.insert(location.clone()) {
                    entries.push(ClasspathEntry { path, location });
                }
            }
        }
        Ok(Classpath { entries })
    }
}

/// One selected file and its absolute location.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClasspathEntry {
    pub path: PathBuf,
    pub location: String,
}

/// Ordered files selected from a `RootSet`, before extension resolution.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Classpath {
    entries: Vec<ClasspathEntry>,
}

impl Classpath {
    pub fn entries(&self) -> &[ClasspathEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

struct Candidate {
    path: PathBuf,
    location: String,
    manifest: ArchiveManifest,
}

impl Candidate {
    fn provides(&self, required: &Extension) -> bool {
        self.manifest.provides(required)
    }
}

/// Composes roots, policy and archive inspection into domain construction.
pub struct DomainAssembler {
    roots: RootSet,
    grants: Arc<GrantResolver>,
    inspector: Arc<dyn ArchiveInspector>,
}

impl DomainAssembler {
    pub fn new(
        roots: RootSet,
        grants: Arc<GrantResolver>,
        inspector: Arc<dyn ArchiveInspector>,
    ) -> Self {
        Self {
            roots,
            grants,
            inspector,
        }
    }

    pub fn roots(&self) -> &RootSet {
        &self.roots
    }

    /// Scans both roots, closes over extension requirements and returns the
    /// immutable domain.
    ///
    /// # Errors
    /// - Those of `RootSet::resolve_classpath` and `build_domain_from`.
    pub fn build_domain<S: AsRef<str>>(
        &self,
        name: &str,
        includes: &[S],
        excludes: &[S],
        extensions: &ExtensionIndex,
        parent: Option<Arc<LoadingDomain>>,
    ) -> DomainResult<Arc<LoadingDomain>> {
        let classpath = self.roots.resolve_classpath(includes, excludes)?;
        self.build_domain_from(name, &classpath, extensions, parent)
    }

    /// Closes `classpath` over extension requirements and returns the
    /// immutable domain.
    ///
    /// # Errors
    /// - `InvalidPath` when a package location cannot be resolved.
    /// - `InvalidManifest` when an archive's metadata cannot be read.
    /// - `UnsatisfiedExtension` naming every unresolved requirement.
    pub fn build_domain_from(
        &self,
        name: &str,
        classpath: &Classpath,
        extensions: &ExtensionIndex,
        parent: Option<Arc<LoadingDomain>>,
    ) -> DomainResult<Arc<LoadingDomain>> {
        let started_at = Instant::now();
        info!("event=domain_build module=domain status=start domain={name}");

        match self.assemble(name, classpath, extensions, parent) {
            Ok(domain) => {
                info!(
                    "event=domain_build module=domain status=ok domain={} resources={} duration_ms={}",
                    name,
                    domain.resources().len(),
                    started_at.elapsed().as_millis()
                );
                Ok(Arc::new(domain))
            }
            Err(err) => {
                error!(
                    "event=domain_build module=domain status=error domain={} duration_ms={} error={}",
                    name,
                    started_at.elapsed().as_millis(),
                    err
                );
                Err(err)
            }
        }
    }

    fn assemble(
        &self,
        name: &str,
        classpath: &Classpath,
        extensions: &ExtensionIndex,
        parent: Option<Arc<LoadingDomain>>,
    ) -> DomainResult<LoadingDomain> {
        let mut seen = HashSet::new();
        let mut candidates = Vec::new();
        for entry in classpath.entries() {
            seen.insert(entry.location.clone());
            candidates.push(Candidate {
                path: entry.path.clone(),
                location: entry.location.clone(),
                manifest: self.inspect(&entry.path)?,
            });
        }
        let scanned = candidates.len();

        let mut cursor = 0;
        while cursor < candidates.len() {
            let wanted: Vec<Extension> = candidates[cursor]
                .manifest
                .required
                .iter()
                .chain(&candidates[cursor].manifest.optional)
                .cloned()
                .collect();
            for required in wanted {
                if candidates.iter().any(|candidate| candidate.provides(&required)) {
                    continue;
                }
                let Some(package) = extensions.find_compatible(&required) else {
                    continue;
                };
                let location = absolute_location(&package.location)?;
                if seen.insert(location.clone()) {
                    debug!(
                        "event=extension_resolve module=domain status=ok extension={} package={}",
                        required.name, location
                    );
                    candidates.push(Candidate {
                        path: package.location.clone(),
                        location,
                        manifest: package.manifest.clone(),
                    });
                }
            }
            cursor += 1;
        }

        let unresolved: Vec<UnresolvedExtension> = candidates
            .iter()
            .flat_map(|candidate| {
                candidate
                    .manifest
                    .required
                    .iter()
                    .filter(|required| !candidates.iter().any(|other| other.provides(required)))
                    .map(|required| UnresolvedExtension {
                        archive: candidate.path.clone(),
                        extension: required.clone(),
                    })
            })
            .collect();
        if !unresolved.is_empty() {
            return Err(DomainError::UnsatisfiedExtension { unresolved });
        }

        debug!(
            "event=domain_resources module=domain status=ok domain={} scanned={} from_extensions={}",
            name,
            scanned,
            candidates.len() - scanned
        );

        let resources = candidates
            .into_iter()
            .map(|candidate| DomainResource {
                path: candidate.path,
                origin: Origin::new(candidate.location, candidate.manifest.signers),
            })
            .collect();
        Ok(LoadingDomain::new(
            name.to_string(),
            resources,
            Arc::clone(&self.grants),
            parent,
        ))
    }

    fn inspect(&self, path: &Path) -> DomainResult<ArchiveManifest> {
        self.inspector
            .inspect(path)
            .map_err(|source| DomainError::InvalidManifest {
                archive: path.to_path_buf(),
                source,
            })
    }
}

fn scan_root<S: AsRef<str>>(
    root: &Path,
    includes: &[S],
    excludes: &[S],
) -> DomainResult<Vec<(PathBuf, String)>> {
    if !root.is_dir() {
        return Err(DomainError::InvalidRoot {
            root: root.to_path_buf(),
            reason: "not an existing directory".to_string(),
        });
    }
    let base = absolute_location(root)?;
    let root = PathBuf::from(&base);
    let matcher = PathMatcher::new(&base, includes, excludes)?;

    let mut selected = Vec::new();
    for entry in WalkDir::new(&root).sort_by_file_name() {
        let entry = entry.map_err(|err| DomainError::InvalidRoot {
            root: root.clone(),
            reason: err.to_string(),
        })?;
        if !entry.file_type().is_file() || is_sidecar(entry.path()) {
            continue;
        }
        let location = normalize_path(entry.path())?;
        if matcher.matches(&location) {
            selected.push((entry.into_path(), location));
        }
    }
    Ok(selected)
}
