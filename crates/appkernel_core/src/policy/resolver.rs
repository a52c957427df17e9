//! Grant resolution: origin + signers -> permission set.

use crate::expand::{expand, has_tokens, MacroContext};
use crate::paths::{is_absolute, normalize_path, PathMatcher};
use crate::policy::grant::{Grant, PolicyDescriptor};
use crate::policy::keystore::{KeyStoreSet, MemoryKeyStore, DEFAULT_KEY_STORE};
use crate::policy::origin::{Origin, SignerIdentity};
use crate::policy::permission::{Permission, PermissionSet};
use crate::policy::{PolicyError, PolicyResult};
use log::{debug, info};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

const BASELINE_PROPERTIES: &[&str] = &[
    "os.name",
    "os.arch",
    "os.version",
    "file.separator",
    "path.separator",
    "line.separator",
];

#[derive(Debug)]
struct CompiledGrant {
    name: String,
    signers: Vec<SignerIdentity>,
    code_base: Option<PathMatcher>,
    permissions: Vec<Permission>,
}

impl CompiledGrant {
    fn applies_to(&self, origin: &Origin) -> bool {
        let signed = self
            .signers
            .iter()
            .all(|identity| origin.is_signed_by(identity));
        signed
            && self
                .code_base
                .as_ref()
                .map_or(true, |matcher| matcher.matches(origin.location()))
    }
}

/// Computes and caches permission sets for code origins.
///
/// With no grants configured every origin receives the wildcard permission.
#[derive(Debug)]
pub struct GrantResolver {
    grants: Vec<CompiledGrant>,
    baseline: PermissionSet,
    cache: Mutex<HashMap<Origin, Arc<PermissionSet>>>,
}

impl GrantResolver {
    /// Compiles grants against keystores and an expansion context.
    ///
    /// `home` anchors relative code-base patterns.
    ///
    /// # Errors
    /// - `UnknownKeyStore` / `UnknownAlias` / `EmptySignerList` for bad signer filters.
    /// - `Template` when a code base or permission target cannot be expanded.
    /// - `InvalidCodeBase` when a pattern cannot be normalized or compiled.
    pub fn new(
        grants: &[Grant],
        key_stores: &KeyStoreSet,
        context: &MacroContext,
        home: &str,
    ) -> PolicyResult<Self> {
        let compiled = grants
            .iter()
            .map(|grant| compile_grant(grant, key_stores, context, home))
            .collect::<PolicyResult<Vec<_>>>()?;

        if compiled.is_empty() {
            info!("event=policy_configure module=policy status=ok mode=unrestricted grants=0");
        } else {
            info!(
                "event=policy_configure module=policy status=ok mode=granted grants={}",
                compiled.len()
            );
        }

        Ok(Self {
            grants: compiled,
            baseline: PermissionSet::new(),
            cache: Mutex::new(HashMap::new()),
        })
    }

    /// Builds a resolver from an environment policy section.
    ///
    /// Keystore locations are expanded and resolved relative to `home`.
    pub fn from_descriptor(
        descriptor: &PolicyDescriptor,
        home: &Path,
        context: &MacroContext,
    ) -> PolicyResult<Self> {
        let mut key_stores = KeyStoreSet::new();
        for declaration in &descriptor.key_stores {
            let location = expand_value(
                &declaration.location,
                context,
                &format!("keystore `{}`", declaration.name),
            )?;
            let path = if is_absolute(&location) {
                PathBuf::from(&location)
            } else {
                home.join(&location)
            };
            let store = MemoryKeyStore::from_file(declaration.name.clone(), &path).map_err(
                |source| PolicyError::KeyStoreLoad {
                    name: declaration.name.clone(),
                    location: location.clone(),
                    source,
                },
            )?;
            key_stores.insert(Arc::new(store));
        }

        let resolver = Self::new(
            &descriptor.grants,
            &key_stores,
            context,
            &normalize_path(home)?,
        )?;
        Ok(if descriptor.include_baseline {
            resolver.with_baseline()
        } else {
            resolver
        })
    }

    /// A resolver without grants; every origin is unrestricted.
    pub fn unrestricted() -> Self {
        Self {
            grants: Vec::new(),
            baseline: PermissionSet::new(),
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Adds read access to platform properties for every origin.
    pub fn with_baseline(mut self) -> Self {
        self.baseline = BASELINE_PROPERTIES
            .iter()
            .map(|name| {
                Permission::new("property")
                    .with_target(*name)
                    .with_actions("read")
            })
            .collect();
        self
    }

    pub fn is_unrestricted(&self) -> bool {
        self.grants.is_empty()
    }

    pub fn grant_names(&self) -> Vec<&str> {
        self.grants.iter().map(|grant| grant.name.as_str()).collect()
    }

    /// Returns the permission set for `origin`, computing it on first use.
    pub fn resolve_permissions(&self, origin: &Origin) -> Arc<PermissionSet> {
        if let Some(cached) = self.cache.lock().get(origin) {
            return Arc::clone(cached);
        }

        let computed = Arc::new(self.compute(origin));
        debug!(
            "event=policy_resolve module=policy status=ok origin={} permissions={}",
            origin.location(),
            computed.len()
        );
        Arc::clone(
            self.cache
                .lock()
                .entry(origin.clone())
                .or_insert(computed),
        )
    }

    pub fn cached_origins(&self) -> usize {
        self.cache.lock().len()
    }

    fn compute(&self, origin: &Origin) -> PermissionSet {
        if self.grants.is_empty() {
            return PermissionSet::unrestricted();
        }

        let mut permissions = self.baseline.clone();
        for grant in self.grants.iter().filter(|grant| grant.applies_to(origin)) {
            permissions.extend(grant.permissions.iter().cloned());
        }
        permissions
    }
}

fn compile_grant(
    grant: &Grant,
    key_stores: &KeyStoreSet,
    context: &MacroContext,
    home: &str,
) -> PolicyResult<CompiledGrant> {
    let owner = format!("grant `{}`", grant.name);
    let signers = resolve_signers(grant, key_stores)?;

    let code_base = match &grant.code_base {
        Some(pattern) => {
            let expanded = expand_value(pattern, context, &owner)?;
            let matcher = PathMatcher::new(home, &[expanded], &[]).map_err(|source| {
                PolicyError::InvalidCodeBase {
                    grant: grant.name.clone(),
                    source,
                }
            })?;
            Some(matcher)
        }
        None => None,
    };

    let permissions = grant
        .permissions
        .iter()
        .map(|permission| {
            let mut expanded = permission.clone();
            if let Some(target) = &permission.target {
                expanded.target = Some(expand_value(target, context, &owner)?);
            }
            Ok(expanded)
        })
        .collect::<PolicyResult<Vec<_>>>()?;

    Ok(CompiledGrant {
        name: grant.name.clone(),
        signers,
        code_base,
        permissions,
    })
}

fn resolve_signers(grant: &Grant, key_stores: &KeyStoreSet) -> PolicyResult<Vec<SignerIdentity>> {
    if grant.signed_by.is_none() {
        return Ok(Vec::new());
    }
    let aliases = grant.signer_aliases();
    if aliases.is_empty() {
        return Err(PolicyError::EmptySignerList {
            grant: grant.name.clone(),
        });
    }

    let store_name = grant.key_store.as_deref().unwrap_or(DEFAULT_KEY_STORE);
    let store = key_stores
        .get(store_name)
        .ok_or_else(|| PolicyError::UnknownKeyStore {
            grant: grant.name.clone(),
            key_store: store_name.to_string(),
        })?;

    let mut identities = Vec::with_capacity(aliases.len());
    for alias in aliases {
        let identity = store
            .identity(alias)
            .ok_or_else(|| PolicyError::UnknownAlias {
                grant: grant.name.clone(),
                alias: alias.to_string(),
                key_store: store_name.to_string(),
            })?;
        if !identities.contains(&identity) {
            identities.push(identity);
        }
    }
    Ok(identities)
}

fn expand_value(value: &str, context: &MacroContext, owner: &str) -> PolicyResult<String> {
    if !has_tokens(value) {
        return Ok(value.to_string());
    }
    expand(value, context, true).map_err(|source| PolicyError::Template {
        owner: owner.to_string(),
        value: value.to_string(),
        source,
    })
}
