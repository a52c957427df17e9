//! Optional packages available to every loading domain of one pipeline.

use crate::extension::inspector::{is_sidecar, ArchiveInspector, InspectError};
use crate::extension::manifest::{ArchiveManifest, Extension};
use crate::paths::absolute_location;
use log::{debug, info};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Archive outside the application that may satisfy extension requirements.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OptionalPackage {
    pub location: PathBuf,
    pub manifest: ArchiveManifest,
}

impl OptionalPackage {
    pub fn provides(&self, required: &Extension) -> bool {
        self.manifest.provides(required)
    }
}

/// Explicit set of installed optional packages.
///
/// Owned by the caller and passed into domain assembly; there is no
/// process-wide package registry.
#[derive(Debug, Clone, Default)]
pub struct ExtensionIndex {
    packages: Vec<OptionalPackage>,
}

impl ExtensionIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, location: impl Into<PathBuf>, manifest: ArchiveManifest) {
        self.packages.push(OptionalPackage {
            location: location.into(),
            manifest,
        });
    }

    pub fn with_package(mut self, location: impl Into<PathBuf>, manifest: ArchiveManifest) -> Self {
        self.add(location, manifest);
        self
    }

    /// Indexes every archive below `dir`.
    ///
    /// Sidecar manifests are not archives and are skipped. A missing
    /// directory yields an empty index. Symbolic links are followed and
    /// package locations are absolute.
    ///
    /// # Errors
    /// - `Walk` when a directory below `dir` cannot be listed.
    /// - `Io`/`Manifest` when an archive's manifest cannot be read.
    pub fn scan(dir: &Path, inspector: &dyn ArchiveInspector) -> Result<Self, InspectError> {
        let mut index = Self::new();
        if !dir.is_dir() {
            debug!(
                "event=extension_scan module=extension status=skip dir={}",
                dir.display()
            );
            return Ok(index);
        }
        let dir = absolute_location(dir)
            .map(PathBuf::from)
            .map_err(|err| InspectError::Io {
                path: dir.to_path_buf(),
                source: std::io::Error::new(std::io::ErrorKind::InvalidInput, err),
            })?;

        for entry in WalkDir::new(&dir).follow_links(true).sort_by_file_name() {
            let entry = entry.map_err(|source| InspectError::Walk {
                dir: dir.clone(),
                source,
            })?;
            if !entry.file_type().is_file() || is_sidecar(entry.path()) {
                continue;
            }
            let manifest = inspector.inspect(entry.path())?;
            index.add(entry.into_path(), manifest);
        }

        info!(
            "event=extension_scan module=extension status=ok dir={} packages={}",
            dir.display(),
            index.len()
        );
        Ok(index)
    }

    pub fn packages(&self) -> &[OptionalPackage] {
        &self.packages
    }

    /// First package offering an extension compatible with `required`.
    pub fn find_compatible(&self, required: &Extension) -> Option<&OptionalPackage> {
        self.packages.iter().find(|package| package.provides(required))
    }

    pub fn len(&self) -> usize {
        self.packages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.packages.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::ExtensionIndex;
    use crate::extension::inspector::{InspectError, ManifestFileInspector};
    use crate::extension::manifest::Extension;
    use std::fs;

    #[test]
    fn scan_indexes_archives_and_skips_sidecars() {
        let dir = tempfile::tempdir().expect("tempdir");
        fs::write(dir.path().join("codec.jar"), b"PK").expect("write");
        fs::write(
            dir.path().join("codec.jar.manifest"),
            "Extension-Name: com.acme.codec\nSpecification-Version: 2.1\n",
        )
        .expect("write");
        fs::write(dir.path().join("plain.jar"), b"PK").expect("write");

        let index = ExtensionIndex::scan(dir.path(), &ManifestFileInspector).expect("scan");
        assert_eq!(index.len(), 2);

        let wanted = Extension::new("com.acme.codec")
            .with_specification_version("2.0".parse().expect("version"));
        let found = index.find_compatible(&wanted).expect("compatible package");
        assert!(found.location.ends_with("codec.jar"));
        assert!(found.location.is_absolute());

        let too_new = Extension::new("com.acme.codec")
            .with_specification_version("3".parse().expect("version"));
        assert!(index.find_compatible(&too_new).is_none());
    }

    #[test]
    fn missing_directory_is_empty() {
        let dir = tempfile::tempdir().expect("tempdir");
        let index =
            ExtensionIndex::scan(&dir.path().join("absent"), &ManifestFileInspector).expect("scan");
        assert!(index.is_empty());
    }

    #[cfg(unix)]
    #[test]
    fn unlistable_subdirectory_fails_the_scan() {
        let dir = tempfile::tempdir().expect("tempdir");
        fs::create_dir_all(dir.path().join("vendor")).expect("mkdir");
        fs::write(dir.path().join("vendor/codec.jar"), b"PK").expect("write");
        std::os::unix::fs::symlink(dir.path(), dir.path().join("vendor/loop")).expect("symlink");

        let err = ExtensionIndex::scan(dir.path(), &ManifestFileInspector)
            .expect_err("loop below the package dir");
        assert!(matches!(err, InspectError::Walk { .. }));
    }
}
