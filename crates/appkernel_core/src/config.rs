//! Kernel configuration file.
//!
//! ```toml
//! home_dir = "/srv/appkernel"
//! work_dir = "work"
//! extensions_dir = "ext"
//! log_level = "info"
//! recorder_db = "state/installations.sqlite3"
//! deployment_timeout_ms = 5000
//!
//! [properties]
//! region = "eu-west"
//! ```
//!
//! Relative paths are resolved against the directory of the file they were
//! loaded from.

use crate::expand::MacroContext;
use crate::logging::default_log_level;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Macro key bound to the kernel home directory.
pub const KERNEL_HOME_KEY: &str = "kernel.home";
/// Macro key bound to the kernel work directory.
pub const KERNEL_WORK_KEY: &str = "kernel.work";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config `{path}`: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config: {0}")]
    Parse(#[from] toml::de::Error),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct KernelConfig {
    pub home_dir: PathBuf,
    pub work_dir: PathBuf,
    pub extensions_dir: Option<PathBuf>,
    pub log_level: String,
    pub log_dir: Option<PathBuf>,
    /// SQLite file for installation records; in-memory records when absent.
    pub recorder_db: Option<PathBuf>,
    pub deployment_timeout_ms: Option<u64>,
    pub properties: BTreeMap<String, String>,
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self {
            home_dir: PathBuf::from("."),
            work_dir: PathBuf::from("work"),
            extensions_dir: None,
            log_level: default_log_level().to_string(),
            log_dir: None,
            recorder_db: None,
            deployment_timeout_ms: None,
            properties: BTreeMap::new(),
        }
    }
}

impl KernelConfig {
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }

    /// Loads a TOML file and anchors its relative paths at the file's
    /// directory.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::from_toml_str(&text)?;
        let base = path
            .parent()
            .filter(|parent| !parent.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        Ok(config.anchored_at(base))
    }

    /// Resolves every relative path against `base`.
    pub fn anchored_at(mut self, base: &Path) -> Self {
        let anchor = |path: &mut PathBuf| {
            if path.is_relative() {
                *path = base.join(&*path);
            }
        };
        anchor(&mut self.home_dir);
        anchor(&mut self.work_dir);
        for path in [
            self.extensions_dir.as_mut(),
            self.log_dir.as_mut(),
            self.recorder_db.as_mut(),
        ]
        .into_iter()
        .flatten()
        {
            anchor(path);
        }
        self
    }

    pub fn deployment_timeout(&self) -> Option<Duration> {
        self.deployment_timeout_ms.map(Duration::from_millis)
    }

    /// Properties plus the kernel directories, for `${...}` expansion.
    pub fn macro_context(&self) -> MacroContext {
        let mut context: MacroContext = self
            .properties
            .iter()
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect();
        context.insert(KERNEL_HOME_KEY, self.home_dir.to_string_lossy().into_owned());
        context.insert(KERNEL_WORK_KEY, self.work_dir.to_string_lossy().into_owned());
        context
    }
}

#[cfg(test)]
mod tests {
    use super::{ConfigError, KernelConfig, KERNEL_HOME_KEY};
    use crate::expand::expand;
    use std::fs;
    use std::path::Path;
    use std::time::Duration;

    #[test]
    fn defaults_fill_missing_fields() {
        let config = KernelConfig::from_toml_str("deployment_timeout_ms = 250\n").expect("parse");
        assert_eq!(config.work_dir, Path::new("work"));
        assert_eq!(config.deployment_timeout(), Some(Duration::from_millis(250)));
        assert!(config.recorder_db.is_none());
    }

    #[test]
    fn load_anchors_relative_paths_at_the_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("kernel.toml");
        fs::write(
            &path,
            "home_dir = \"/srv/kernel\"\nwork_dir = \"scratch\"\nrecorder_db = \"state/db.sqlite3\"\n\n[properties]\nregion = \"eu\"\n",
        )
        .expect("write");

        let config = KernelConfig::load(&path).expect("load");
        assert_eq!(config.home_dir, Path::new("/srv/kernel"));
        assert_eq!(config.work_dir, dir.path().join("scratch"));
        assert_eq!(
            config.recorder_db.as_deref(),
            Some(dir.path().join("state/db.sqlite3").as_path())
        );

        let context = config.macro_context();
        assert!(context.contains_key(KERNEL_HOME_KEY));
        assert_eq!(
            expand("${region}:${kernel.home}", &context, true).expect("expand"),
            "eu:/srv/kernel"
        );
    }

    #[test]
    fn invalid_toml_is_reported() {
        let err = KernelConfig::from_toml_str("work_dir = [").expect_err("invalid");
        assert!(matches!(err, ConfigError::Parse(_)));
    }
}
