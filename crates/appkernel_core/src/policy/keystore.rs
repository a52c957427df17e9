//! Keystore abstraction used to turn grant signer aliases into identities.
//!
//! # Invariants
//! - Keystores are loaded eagerly while the policy is built; a missing or
//!   unreadable keystore never surfaces at resolution time.

use crate::descriptor::{load_descriptor, ParseError};
use crate::policy::origin::SignerIdentity;
use std::collections::BTreeMap;
use std::fmt::Debug;
use std::path::Path;
use std::sync::Arc;

/// Keystore name used when a grant names signers but no keystore.
pub const DEFAULT_KEY_STORE: &str = "default";

/// Alias lookup capability.
pub trait KeyStore: Send + Sync + Debug {
    fn name(&self) -> &str;
    fn identity(&self, alias: &str) -> Option<SignerIdentity>;
}

/// Keystore held entirely in memory.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MemoryKeyStore {
    name: String,
    entries: BTreeMap<String, SignerIdentity>,
}

impl MemoryKeyStore {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            entries: BTreeMap::new(),
        }
    }

    pub fn with_entry(mut self, alias: impl Into<String>, identity: impl Into<String>) -> Self {
        self.insert(alias, identity);
        self
    }

    pub fn insert(&mut self, alias: impl Into<String>, identity: impl Into<String>) {
        self.entries
            .insert(alias.into(), SignerIdentity::new(identity));
    }

    /// Loads an `alias -> identity` table from a JSON or TOML file.
    pub fn from_file(name: impl Into<String>, path: &Path) -> Result<Self, ParseError> {
        let table: BTreeMap<String, String> = load_descriptor(path)?;
        let mut store = Self::new(name);
        for (alias, identity) in table {
            store.insert(alias, identity);
        }
        Ok(store)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl KeyStore for MemoryKeyStore {
    fn name(&self) -> &str {
        self.name.as_str()
    }

    fn identity(&self, alias: &str) -> Option<SignerIdentity> {
        self.entries.get(alias).cloned()
    }
}

/// Named keystores available to one policy.
#[derive(Debug, Clone, Default)]
pub struct KeyStoreSet {
    stores: BTreeMap<String, Arc<dyn KeyStore>>,
}

impl KeyStoreSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, store: Arc<dyn KeyStore>) {
        self.stores.insert(store.name().to_string(), store);
    }

    pub fn with_store(mut self, store: impl KeyStore + 'static) -> Self {
        self.insert(Arc::new(store));
        self
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn KeyStore>> {
        self.stores.get(name)
    }

    pub fn len(&self) -> usize {
        self.stores.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stores.is_empty()
    }
}
