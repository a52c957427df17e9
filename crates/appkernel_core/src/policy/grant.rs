//! Declarative grant rules and the policy descriptor that carries them.

use crate::policy::permission::Permission;
use serde::{Deserialize, Serialize};

/// One grant rule.
///
/// ```toml
/// [[policy.grants]]
/// name = "blocks"
/// signed_by = "fred, barney"
/// key_store = "corp"
/// code_base = "${app.home}/lib/**"
/// permissions = [{ kind = "file", target = "/tmp/-", actions = "read,write" }]
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Grant {
    pub name: String,
    /// Comma-separated signer aliases; every alias must sign the origin.
    #[serde(default)]
    pub signed_by: Option<String>,
    /// Keystore used for `signed_by`; defaults to `default`.
    #[serde(default)]
    pub key_store: Option<String>,
    /// Origin pattern, macro-expanded, relative patterns anchored at the app home.
    #[serde(default)]
    pub code_base: Option<String>,
    #[serde(default)]
    pub permissions: Vec<Permission>,
}

impl Grant {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn signed_by(mut self, aliases: impl Into<String>) -> Self {
        self.signed_by = Some(aliases.into());
        self
    }

    pub fn key_store(mut self, name: impl Into<String>) -> Self {
        self.key_store = Some(name.into());
        self
    }

    pub fn code_base(mut self, pattern: impl Into<String>) -> Self {
        self.code_base = Some(pattern.into());
        self
    }

    pub fn permit(mut self, permission: Permission) -> Self {
        self.permissions.push(permission);
        self
    }

    /// Trimmed, non-empty signer aliases in declaration order.
    pub fn signer_aliases(&self) -> Vec<&str> {
        self.signed_by
            .as_deref()
            .map(|raw| {
                raw.split(',')
                    .map(str::trim)
                    .filter(|alias| !alias.is_empty())
                    .collect()
            })
            .unwrap_or_default()
    }
}

/// Keystore declaration inside a policy descriptor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyStoreDeclaration {
    pub name: String,
    /// Alias table file (JSON or TOML); macro-expanded, relative to app home.
    pub location: String,
}

/// Security policy section of the environment descriptor.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyDescriptor {
    /// Grants read access to a fixed set of platform properties to every origin.
    #[serde(default)]
    pub include_baseline: bool,
    #[serde(default)]
    pub key_stores: Vec<KeyStoreDeclaration>,
    #[serde(default)]
    pub grants: Vec<Grant>,
}
