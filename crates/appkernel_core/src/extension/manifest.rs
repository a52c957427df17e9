//! Extension declarations and archive manifest parsing.
//!
//! Archives describe the optional packages they offer and need with
//! JAR-style manifest attributes:
//!
//! ```text
//! Extension-Name: com.acme.billing
//! Specification-Version: 1.2
//! Implementation-Vendor-Id: com.acme
//! Extension-List: codec
//! codec-Extension-Name: com.acme.codec
//! codec-Specification-Version: 2.0
//! Optional-Extension-List: metrics
//! metrics-Extension-Name: com.acme.metrics
//! Signer-Identities: sha256:ab12
//! ```
//!
//! Only the main section (up to the first blank line) is read. Lines starting
//! with a single space continue the previous attribute.

use crate::extension::version::DeweyDecimal;
use crate::policy::SignerIdentity;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};
use thiserror::Error;

pub const EXTENSION_NAME: &str = "Extension-Name";
pub const SPECIFICATION_VENDOR: &str = "Specification-Vendor";
pub const SPECIFICATION_VERSION: &str = "Specification-Version";
pub const IMPLEMENTATION_VENDOR: &str = "Implementation-Vendor";
pub const IMPLEMENTATION_VENDOR_ID: &str = "Implementation-Vendor-Id";
pub const IMPLEMENTATION_VERSION: &str = "Implementation-Version";
pub const EXTENSION_LIST: &str = "Extension-List";
pub const OPTIONAL_EXTENSION_LIST: &str = "Optional-Extension-List";
pub const SIGNER_IDENTITIES: &str = "Signer-Identities";

static HEADER_LINE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^([A-Za-z0-9][A-Za-z0-9_-]*):\s?(.*)$").expect("header regex is valid")
});

/// Named, versioned optional package.
///
/// Used only to match "available" against "required" declarations, never as
/// an identity.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Extension {
    pub name: String,
    #[serde(default)]
    pub specification_vendor: Option<String>,
    #[serde(default)]
    pub specification_version: Option<DeweyDecimal>,
    #[serde(default)]
    pub implementation_vendor: Option<String>,
    #[serde(default)]
    pub implementation_vendor_id: Option<String>,
    #[serde(default)]
    pub implementation_version: Option<DeweyDecimal>,
}

/// Outcome of matching an available extension against a requirement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Compatibility {
    Compatible,
    RequireSpecificationUpgrade,
    RequireVendorSwitch,
    RequireImplementationUpgrade,
    Incompatible,
}

impl Extension {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn with_specification_version(mut self, version: DeweyDecimal) -> Self {
        self.specification_version = Some(version);
        self
    }

    pub fn with_implementation_vendor_id(mut self, vendor_id: impl Into<String>) -> Self {
        self.implementation_vendor_id = Some(vendor_id.into());
        self
    }

    pub fn with_implementation_version(mut self, version: DeweyDecimal) -> Self {
        self.implementation_version = Some(version);
        self
    }

    /// Checks whether this available extension satisfies `required`.
    pub fn compatibility_with(&self, required: &Extension) -> Compatibility {
        if self.name != required.name {
            return Compatibility::Incompatible;
        }

        if let Some(wanted) = &required.specification_version {
            if !self
                .specification_version
                .as_ref()
                .is_some_and(|offered| offered.is_at_least(wanted))
            {
                return Compatibility::RequireSpecificationUpgrade;
            }
        }

        if let Some(wanted) = &required.implementation_vendor_id {
            if self.implementation_vendor_id.as_ref() != Some(wanted) {
                return Compatibility::RequireVendorSwitch;
            }
        }

        if let Some(wanted) = &required.implementation_version {
            if !self
                .implementation_version
                .as_ref()
                .is_some_and(|offered| offered.is_at_least(wanted))
            {
                return Compatibility::RequireImplementationUpgrade;
            }
        }

        Compatibility::Compatible
    }

    pub fn is_compatible_with(&self, required: &Extension) -> bool {
        self.compatibility_with(required) == Compatibility::Compatible
    }
}

impl Display for Extension {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name)?;
        let mut details = Vec::new();
        if let Some(vendor) = &self.specification_vendor {
            details.push(format!("specification vendor {vendor}"));
        }
        if let Some(version) = &self.specification_version {
            details.push(format!("specification version {version}"));
        }
        if let Some(vendor) = self
            .implementation_vendor_id
            .as_ref()
            .or(self.implementation_vendor.as_ref())
        {
            details.push(format!("implementation vendor {vendor}"));
        }
        if let Some(version) = &self.implementation_version {
            details.push(format!("implementation version {version}"));
        }
        if !details.is_empty() {
            write!(f, " ({})", details.join(", "))?;
        }
        Ok(())
    }
}

/// Extension metadata carried by one archive.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ArchiveManifest {
    pub available: Vec<Extension>,
    pub required: Vec<Extension>,
    pub optional: Vec<Extension>,
    pub signers: Vec<SignerIdentity>,
}

impl ArchiveManifest {
    /// Returns whether any available extension satisfies `required`.
    pub fn provides(&self, required: &Extension) -> bool {
        self.available
            .iter()
            .any(|offered| offered.is_compatible_with(required))
    }
}

/// Manifest parse failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ManifestError {
    #[error("manifest line {line} is not an attribute: `{content}`")]
    MalformedLine { line: usize, content: String },
    #[error("manifest is missing attribute `{0}`")]
    MissingAttribute(String),
    #[error("manifest attribute `{attribute}` has invalid version `{value}`")]
    InvalidVersion { attribute: String, value: String },
}

/// Parses the main section of a JAR-style manifest.
pub fn parse_manifest(text: &str) -> Result<ArchiveManifest, ManifestError> {
    let attributes = parse_main_attributes(text)?;

    let available = if attributes.contains_key(EXTENSION_NAME) {
        vec![read_extension(&attributes, "")?]
    } else {
        Vec::new()
    };

    Ok(ArchiveManifest {
        available,
        required: read_extension_list(&attributes, EXTENSION_LIST)?,
        optional: read_extension_list(&attributes, OPTIONAL_EXTENSION_LIST)?,
        signers: attributes
            .get(SIGNER_IDENTITIES)
            .map(|raw| {
                raw.split(',')
                    .map(str::trim)
                    .filter(|value| !value.is_empty())
                    .map(SignerIdentity::new)
                    .collect()
            })
            .unwrap_or_default(),
    })
}

fn parse_main_attributes(text: &str) -> Result<BTreeMap<String, String>, ManifestError> {
    let mut attributes = BTreeMap::new();
    let mut current: Option<(String, String)> = None;

    for (index, raw_line) in text.lines().enumerate() {
        let line = raw_line.trim_end_matches('\r');
        if line.is_empty() {
            break;
        }
        if let Some(continuation) = line.strip_prefix(' ') {
            match current.as_mut() {
                Some((_, value)) => value.push_str(continuation),
                None => {
                    return Err(ManifestError::MalformedLine {
                        line: index + 1,
                        content: line.to_string(),
                    })
                }
            }
            continue;
        }

        let captures = HEADER_LINE
            .captures(line)
            .ok_or_else(|| ManifestError::MalformedLine {
                line: index + 1,
                content: line.to_string(),
            })?;
        if let Some((name, value)) = current.take() {
            attributes.insert(name, value);
        }
        current = Some((captures[1].to_string(), captures[2].trim().to_string()));
    }

    if let Some((name, value)) = current {
        attributes.insert(name, value);
    }
    Ok(attributes)
}

fn read_extension_list(
    attributes: &BTreeMap<String, String>,
    list_attribute: &str,
) -> Result<Vec<Extension>, ManifestError> {
    let Some(list) = attributes.get(list_attribute) else {
        return Ok(Vec::new());
    };
    list.split_whitespace()
        .map(|alias| read_extension(attributes, &format!("{alias}-")))
        .collect()
}

fn read_extension(
    attributes: &BTreeMap<String, String>,
    prefix: &str,
) -> Result<Extension, ManifestError> {
    let text = |name: &str| attributes.get(&format!("{prefix}{name}")).cloned();
    let version = |name: &str| -> Result<Option<DeweyDecimal>, ManifestError> {
        let attribute = format!("{prefix}{name}");
        attributes
            .get(&attribute)
            .map(|value| {
                value.parse().map_err(|_| ManifestError::InvalidVersion {
                    attribute: attribute.clone(),
                    value: value.clone(),
                })
            })
            .transpose()
    };

    let name = text(EXTENSION_NAME)
        .ok_or_else(|| ManifestError::MissingAttribute(format!("{prefix}{EXTENSION_NAME}")))?;
    Ok(Extension {
        name,
        specification_vendor: text(SPECIFICATION_VENDOR),
        specification_version: version(SPECIFICATION_VERSION)?,
        implementation_vendor: text(IMPLEMENTATION_VENDOR),
        implementation_vendor_id: text(IMPLEMENTATION_VENDOR_ID),
        implementation_version: version(IMPLEMENTATION_VERSION)?,
    })
}
