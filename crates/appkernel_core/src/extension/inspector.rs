//! Reads extension metadata from archives on disk.

use crate::extension::manifest::{parse_manifest, ArchiveManifest, ManifestError};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Manifest path inside an exploded archive directory.
pub const MANIFEST_ENTRY: &str = "META-INF/MANIFEST.MF";
/// Extension of the sidecar manifest placed next to a packed archive.
pub const SIDECAR_EXTENSION: &str = "manifest";

#[derive(Debug, Error)]
pub enum InspectError {
    #[error("failed to read manifest `{path}`: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("cannot list optional packages below `{dir}`: {source}")]
    Walk {
        dir: PathBuf,
        #[source]
        source: walkdir::Error,
    },
    #[error("invalid manifest `{path}`: {source}")]
    Manifest {
        path: PathBuf,
        #[source]
        source: ManifestError,
    },
}

/// Capability to extract extension metadata from one archive.
pub trait ArchiveInspector: Send + Sync {
    fn inspect(&self, archive: &Path) -> Result<ArchiveManifest, InspectError>;
}

/// Inspector backed by JAR-style manifest text files.
///
/// Directories are read from `META-INF/MANIFEST.MF`; files from a sibling
/// `<archive>.manifest`. An archive without a manifest declares nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct ManifestFileInspector;

impl ManifestFileInspector {
    pub fn manifest_path(archive: &Path) -> PathBuf {
        if archive.is_dir() {
            archive.join(MANIFEST_ENTRY)
        } else {
            sidecar_path(archive)
        }
    }
}

impl ArchiveInspector for ManifestFileInspector {
    fn inspect(&self, archive: &Path) -> Result<ArchiveManifest, InspectError> {
        let path = Self::manifest_path(archive);
        let text = match std::fs::read_to_string(&path) {
            Ok(text) => text,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Ok(ArchiveManifest::default())
            }
            Err(source) => return Err(InspectError::Io { path, source }),
        };
        parse_manifest(&text).map_err(|source| InspectError::Manifest { path, source })
    }
}

/// Returns whether `path` is a sidecar manifest rather than an archive.
pub fn is_sidecar(path: &Path) -> bool {
    path.extension()
        .is_some_and(|extension| extension == SIDECAR_EXTENSION)
}

fn sidecar_path(archive: &Path) -> PathBuf {
    let mut name = archive.as_os_str().to_os_string();
    name.push(".");
    name.push(SIDECAR_EXTENSION);
    PathBuf::from(name)
}

#[cfg(test)]
mod tests {
    use super::{is_sidecar, ArchiveInspector, InspectError, ManifestFileInspector};
    use std::fs;
    use std::path::Path;

    #[test]
    fn reads_sidecar_manifest() {
        let dir = tempfile::tempdir().expect("tempdir");
        let archive = dir.path().join("codec.jar");
        fs::write(&archive, b"PK").expect("write archive");
        fs::write(
            dir.path().join("codec.jar.manifest"),
            "Extension-Name: com.acme.codec\nSpecification-Version: 2.0\n",
        )
        .expect("write manifest");

        let manifest = ManifestFileInspector.inspect(&archive).expect("inspect");
        assert_eq!(manifest.available[0].name, "com.acme.codec");
    }

    #[test]
    fn reads_exploded_archive_manifest() {
        let dir = tempfile::tempdir().expect("tempdir");
        let archive = dir.path().join("billing");
        fs::create_dir_all(archive.join("META-INF")).expect("mkdir");
        fs::write(
            archive.join("META-INF/MANIFEST.MF"),
            "Extension-List: codec\ncodec-Extension-Name: com.acme.codec\n",
        )
        .expect("write manifest");

        let manifest = ManifestFileInspector.inspect(&archive).expect("inspect");
        assert_eq!(manifest.required[0].name, "com.acme.codec");
    }

    #[test]
    fn missing_manifest_declares_nothing() {
        let dir = tempfile::tempdir().expect("tempdir");
        let manifest = ManifestFileInspector
            .inspect(&dir.path().join("plain.jar"))
            .expect("inspect");
        assert!(manifest.available.is_empty());
        assert!(manifest.required.is_empty());
    }

    #[test]
    fn invalid_manifest_names_the_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let archive = dir.path().join("bad.jar");
        fs::write(dir.path().join("bad.jar.manifest"), "garbage\n").expect("write");
        let err = ManifestFileInspector.inspect(&archive).expect_err("invalid");
        assert!(matches!(err, InspectError::Manifest { .. }));
    }

    #[test]
    fn sidecar_detection() {
        assert!(is_sidecar(Path::new("lib/a.jar.manifest")));
        assert!(!is_sidecar(Path::new("lib/a.jar")));
    }
}
