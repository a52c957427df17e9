//! Installation of application directories.

use crate::descriptor::{
    locate_descriptor, ASSEMBLY_DESCRIPTOR, CONFIG_DESCRIPTOR, ENVIRONMENT_DESCRIPTOR,
};
use crate::paths::{absolute_location, PathError};
use log::info;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::io::Read;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;
use uuid::Uuid;
use walkdir::WalkDir;

/// Directory holding an application's descriptors.
pub const CONF_DIR: &str = "conf";
/// Directory holding an application's archives.
pub const LIB_DIR: &str = "lib";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileDigest {
    pub path: PathBuf,
    pub sha256: String,
}

/// Result of installing one application.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Installation {
    pub source: PathBuf,
    pub directory: PathBuf,
    pub work_directory: PathBuf,
    #[serde(default)]
    pub config: Option<PathBuf>,
    pub assembly: PathBuf,
    #[serde(default)]
    pub environment: Option<PathBuf>,
    #[serde(default)]
    pub resources: Vec<PathBuf>,
    #[serde(default)]
    pub digests: Vec<FileDigest>,
    pub timestamp_ms: u64,
}

impl Installation {
    /// Whether both installation directories still exist.
    pub fn is_present(&self) -> bool {
        self.directory.is_dir() && self.work_directory.is_dir()
    }
}

#[derive(Debug, Error)]
pub enum InstallError {
    #[error("application source `{0}` is not a directory")]
    NotADirectory(PathBuf),
    #[error("application `{source_dir}` has no {descriptor} descriptor in `conf/`")]
    MissingDescriptor {
        source_dir: PathBuf,
        descriptor: &'static str,
    },
    #[error("cannot resolve location `{path}`: {source}")]
    Location {
        path: PathBuf,
        #[source]
        source: PathError,
    },
    #[error("I/O failure on `{path}`: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Installs and removes applications.
pub trait Installer: Send + Sync {
    fn install(&self, name: &str, location: &Path) -> Result<Installation, InstallError>;
    fn uninstall(&self, installation: &Installation) -> Result<(), InstallError>;
}

/// Installs exploded application directories in place.
///
/// Each install gets a fresh work directory `<work_root>/<name>-<uuid>`;
/// uninstall removes only that work directory.
#[derive(Debug, Clone)]
pub struct DirectoryInstaller {
    work_root: PathBuf,
}

impl DirectoryInstaller {
    pub fn new(work_root: impl Into<PathBuf>) -> Self {
        Self {
            work_root: work_root.into(),
        }
    }

    pub fn work_root(&self) -> &Path {
        &self.work_root
    }
}

impl Installer for DirectoryInstaller {
    fn install(&self, name: &str, location: &Path) -> Result<Installation, InstallError> {
        if !location.is_dir() {
            return Err(InstallError::NotADirectory(location.to_path_buf()));
        }
        let location = resolve_location(location)?;
        let location = location.as_path();
        let conf = location.join(CONF_DIR);
        let assembly = locate_descriptor(&conf, ASSEMBLY_DESCRIPTOR).ok_or_else(|| {
            InstallError::MissingDescriptor {
                source_dir: location.to_path_buf(),
                descriptor: ASSEMBLY_DESCRIPTOR,
            }
        })?;

        let resources = list_resources(&location.join(LIB_DIR))?;
        let digests = resources
            .iter()
            .map(|path| {
                Ok(FileDigest {
                    path: path.clone(),
                    sha256: sha256_file(path)?,
                })
            })
            .collect::<Result<Vec<_>, InstallError>>()?;

        let work_directory = resolve_location(&self.work_root)?
            .join(format!("{name}-{}", Uuid::new_v4().simple()));
        std::fs::create_dir_all(&work_directory).map_err(|source| InstallError::Io {
            path: work_directory.clone(),
            source,
        })?;

        info!(
            "event=app_install module=deploy status=ok unit={} resources={} work_dir={}",
            name,
            resources.len(),
            work_directory.display()
        );
        Ok(Installation {
            source: location.to_path_buf(),
            directory: location.to_path_buf(),
            work_directory,
            config: locate_descriptor(&conf, CONFIG_DESCRIPTOR),
            assembly,
            environment: locate_descriptor(&conf, ENVIRONMENT_DESCRIPTOR),
            resources,
            digests,
            timestamp_ms: now_ms(),
        })
    }

    fn uninstall(&self, installation: &Installation) -> Result<(), InstallError> {
        let work = &installation.work_directory;
        if work.exists() {
            std::fs::remove_dir_all(work).map_err(|source| InstallError::Io {
                path: work.clone(),
                source,
            })?;
        }
        info!(
            "event=app_uninstall module=deploy status=ok work_dir={}",
            work.display()
        );
        Ok(())
    }
}

/// Absolute, normalized form of an application location; installation
/// records and archive origins are keyed on it.
pub fn resolve_location(location: &Path) -> Result<PathBuf, InstallError> {
    absolute_location(location)
        .map(PathBuf::from)
        .map_err(|source| InstallError::Location {
            path: location.to_path_buf(),
            source,
        })
}

fn list_resources(lib: &Path) -> Result<Vec<PathBuf>, InstallError> {
    if !lib.is_dir() {
        return Ok(Vec::new());
    }
    let mut resources = Vec::new();
    for entry in WalkDir::new(lib).sort_by_file_name() {
        let entry = entry.map_err(|err| InstallError::Io {
            path: lib.to_path_buf(),
            source: err.into(),
        })?;
        if entry.file_type().is_file() {
            resources.push(entry.into_path());
        }
    }
    Ok(resources)
}

fn sha256_file(path: &Path) -> Result<String, InstallError> {
    let io_error = |source| InstallError::Io {
        path: path.to_path_buf(),
        source,
    };
    let mut file = std::fs::File::open(path).map_err(io_error)?;
    let mut hasher = Sha256::new();
    let mut buffer = [0u8; 8192];
    loop {
        let read = file.read(&mut buffer).map_err(io_error)?;
        if read == 0 {
            break;
        }
        hasher.update(&buffer[..read]);
    }
    Ok(hex::encode(hasher.finalize()))
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |elapsed| elapsed.as_millis() as u64)
}

#[cfg(test)]
mod tests {
    use super::{DirectoryInstaller, InstallError, Installer};
    use std::fs;
    use std::path::Path;

    #[test]
    fn installs_exploded_directory_with_digests() {
        let app = tempfile::tempdir().expect("app");
        let work = tempfile::tempdir().expect("work");
        fs::create_dir_all(app.path().join("conf")).expect("mkdir");
        fs::create_dir_all(app.path().join("lib")).expect("mkdir");
        fs::write(app.path().join("conf/assembly.toml"), "").expect("write");
        fs::write(app.path().join("lib/a.jar"), b"abc").expect("write");

        let installer = DirectoryInstaller::new(work.path());
        let installation = installer.install("billing", app.path()).expect("install");
        assert!(installation.is_present());
        assert!(installation.environment.is_none());
        assert_eq!(installation.resources.len(), 1);
        assert_eq!(
            installation.digests[0].sha256,
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );

        installer.uninstall(&installation).expect("uninstall");
        assert!(!installation.work_directory.exists());
        assert!(app.path().join("lib/a.jar").exists());
    }

    #[test]
    fn missing_assembly_descriptor_is_rejected() {
        let app = tempfile::tempdir().expect("app");
        let work = tempfile::tempdir().expect("work");
        let err = DirectoryInstaller::new(work.path())
            .install("billing", app.path())
            .expect_err("no descriptor");
        assert!(matches!(err, InstallError::MissingDescriptor { .. }));
    }

    #[test]
    fn relative_locations_are_recorded_absolute() {
        let app = tempfile::tempdir().expect("app");
        let work = tempfile::tempdir().expect("work");
        fs::create_dir_all(app.path().join("conf")).expect("mkdir");
        fs::write(app.path().join("conf/assembly.toml"), "").expect("write");

        let cwd = std::env::current_dir().expect("cwd");
        let depth = cwd.components().count() - 1;
        let relative = Path::new(&"../".repeat(depth)).join(
            app.path()
                .strip_prefix("/")
                .expect("tempdir is absolute"),
        );

        let installation = DirectoryInstaller::new(work.path())
            .install("billing", &relative)
            .expect("install");
        assert_eq!(installation.source, app.path());
        assert_eq!(installation.directory, app.path());
        assert!(installation.work_directory.is_absolute());
    }
}
