//! Application descriptors: serde data shapes and format-tagged parsing.
//!
//! # Responsibility
//! - Parse JSON or TOML documents into assembly, environment and
//!   configuration descriptors.
//! - Report parse failures as a tagged `ParseError` so callers branch on the
//!   result instead of retrying formats blindly.
//!
//! # Invariants
//! - The format is chosen from the file extension before any bytes are read.
//! - Parsing never panics on malformed input.

use crate::assembly::AssemblyDescriptor;
use crate::policy::PolicyDescriptor;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Stem of the assembly descriptor inside `conf/`.
pub const ASSEMBLY_DESCRIPTOR: &str = "assembly";
/// Stem of the environment descriptor inside `conf/`.
pub const ENVIRONMENT_DESCRIPTOR: &str = "environment";
/// Stem of the configuration descriptor inside `conf/`.
pub const CONFIG_DESCRIPTOR: &str = "config";

const DEFAULT_CLASSPATH_INCLUDE: &str = "lib/**";

/// Supported descriptor encodings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DescriptorFormat {
    Json,
    Toml,
}

impl DescriptorFormat {
    pub const ALL: [DescriptorFormat; 2] = [DescriptorFormat::Json, DescriptorFormat::Toml];

    pub fn extension(self) -> &'static str {
        match self {
            Self::Json => "json",
            Self::Toml => "toml",
        }
    }

    pub fn from_path(path: &Path) -> Option<Self> {
        let extension = path.extension()?.to_str()?.to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|format| format.extension() == extension)
    }
}

#[derive(Debug, Error)]
pub enum ParseError {
    #[error("unsupported descriptor format for `{0}`")]
    UnsupportedFormat(PathBuf),
    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid TOML: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("descriptor is not valid UTF-8: {0}")]
    Encoding(#[from] std::str::Utf8Error),
    #[error("failed to read `{path}`: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid descriptor `{path}`: {source}")]
    InFile {
        path: PathBuf,
        #[source]
        source: Box<ParseError>,
    },
}

/// Parses `bytes` in the given format.
pub fn try_parse<T: DeserializeOwned>(
    format: DescriptorFormat,
    bytes: &[u8],
) -> Result<T, ParseError> {
    match format {
        DescriptorFormat::Json => Ok(serde_json::from_slice(bytes)?),
        DescriptorFormat::Toml => Ok(toml::from_str(std::str::from_utf8(bytes)?)?),
    }
}

/// Reads and parses a descriptor file, picking the format from its extension.
pub fn load_descriptor<T: DeserializeOwned>(path: &Path) -> Result<T, ParseError> {
    let format = DescriptorFormat::from_path(path)
        .ok_or_else(|| ParseError::UnsupportedFormat(path.to_path_buf()))?;
    let bytes = std::fs::read(path).map_err(|source| ParseError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    try_parse(format, &bytes).map_err(|source| ParseError::InFile {
        path: path.to_path_buf(),
        source: Box::new(source),
    })
}

/// Finds `<stem>.json` or `<stem>.toml` in `dir`, in that order.
pub fn locate_descriptor(dir: &Path, stem: &str) -> Option<PathBuf> {
    DescriptorFormat::ALL
        .into_iter()
        .map(|format| dir.join(format!("{stem}.{}", format.extension())))
        .find(|candidate| candidate.is_file())
}

/// Per-component configuration fragments keyed by component or listener name.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConfigDescriptor {
    pub entries: BTreeMap<String, serde_json::Value>,
}

impl ConfigDescriptor {
    pub fn with_entry(mut self, name: impl Into<String>, value: serde_json::Value) -> Self {
        self.entries.insert(name.into(), value);
        self
    }

    pub fn get(&self, name: &str) -> Option<&serde_json::Value> {
        self.entries.get(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Include/exclude globs selecting the archives of a loading domain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClasspathDescriptor {
    pub includes: Vec<String>,
    pub excludes: Vec<String>,
}

impl Default for ClasspathDescriptor {
    fn default() -> Self {
        Self {
            includes: vec![DEFAULT_CLASSPATH_INCLUDE.to_string()],
            excludes: Vec::new(),
        }
    }
}

/// Environment of one application: classpath, policy and extra macro
/// properties.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EnvironmentDescriptor {
    pub classpath: ClasspathDescriptor,
    pub policy: PolicyDescriptor,
    pub properties: BTreeMap<String, String>,
}

/// Every descriptor of one installed application.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ApplicationDescriptors {
    pub assembly: AssemblyDescriptor,
    pub environment: EnvironmentDescriptor,
    pub config: ConfigDescriptor,
}

impl ApplicationDescriptors {
    /// Loads the assembly descriptor plus the optional environment and
    /// configuration descriptors; absent ones fall back to defaults.
    pub fn load(
        assembly: &Path,
        environment: Option<&Path>,
        config: Option<&Path>,
    ) -> Result<Self, ParseError> {
        Ok(Self {
            assembly: load_descriptor(assembly)?,
            environment: environment
                .map(load_descriptor)
                .transpose()?
                .unwrap_or_default(),
            config: config.map(load_descriptor).transpose()?.unwrap_or_default(),
        })
    }

    /// Loads descriptors found by stem in `conf_dir`.
    pub fn load_dir(conf_dir: &Path) -> Result<Self, ParseError> {
        let assembly = locate_descriptor(conf_dir, ASSEMBLY_DESCRIPTOR).ok_or_else(|| {
            ParseError::Io {
                path: conf_dir.join(format!("{ASSEMBLY_DESCRIPTOR}.{{json,toml}}")),
                source: std::io::Error::from(std::io::ErrorKind::NotFound),
            }
        })?;
        Self::load(
            &assembly,
            locate_descriptor(conf_dir, ENVIRONMENT_DESCRIPTOR).as_deref(),
            locate_descriptor(conf_dir, CONFIG_DESCRIPTOR).as_deref(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::{
        locate_descriptor, try_parse, ApplicationDescriptors, DescriptorFormat,
        EnvironmentDescriptor, ParseError,
    };
    use std::fs;
    use std::path::Path;

    #[test]
    fn format_follows_extension() {
        assert_eq!(
            DescriptorFormat::from_path(Path::new("conf/a.JSON")),
            Some(DescriptorFormat::Json)
        );
        assert_eq!(
            DescriptorFormat::from_path(Path::new("conf/a.toml")),
            Some(DescriptorFormat::Toml)
        );
        assert_eq!(DescriptorFormat::from_path(Path::new("conf/a.xml")), None);
    }

    #[test]
    fn try_parse_reports_tagged_failures() {
        let err = try_parse::<EnvironmentDescriptor>(DescriptorFormat::Json, b"{ nope")
            .expect_err("bad json");
        assert!(matches!(err, ParseError::Json(_)));

        let err = try_parse::<EnvironmentDescriptor>(DescriptorFormat::Toml, &[0xff, 0xfe])
            .expect_err("bad utf8");
        assert!(matches!(err, ParseError::Encoding(_)));
    }

    #[test]
    fn environment_defaults_include_lib_tree() {
        let env: EnvironmentDescriptor =
            try_parse(DescriptorFormat::Toml, b"[properties]\nregion = \"eu\"\n").expect("parse");
        assert_eq!(env.classpath.includes, vec!["lib/**".to_string()]);
        assert!(env.policy.grants.is_empty());
        assert_eq!(env.properties.get("region").map(String::as_str), Some("eu"));
    }

    #[test]
    fn load_dir_prefers_json_and_defaults_optional_documents() {
        let dir = tempfile::tempdir().expect("tempdir");
        fs::write(dir.path().join("assembly.json"), r#"{"components": []}"#).expect("write");
        fs::write(dir.path().join("assembly.toml"), "not = [valid").expect("write");

        assert!(locate_descriptor(dir.path(), "assembly")
            .expect("located")
            .ends_with("assembly.json"));
        let descriptors = ApplicationDescriptors::load_dir(dir.path()).expect("load");
        assert!(descriptors.assembly.components.is_empty());
        assert!(descriptors.config.is_empty());
    }

    #[test]
    fn load_dir_without_assembly_fails() {
        let dir = tempfile::tempdir().expect("tempdir");
        let err = ApplicationDescriptors::load_dir(dir.path()).expect_err("missing");
        assert!(matches!(err, ParseError::Io { .. }));
    }
}
