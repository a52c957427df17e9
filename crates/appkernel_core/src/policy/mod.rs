//! Capability policy: grants, keystores, origins and permission resolution.
//!
//! # Responsibility
//! - Validate grant configuration eagerly while a loading domain is built.
//! - Compute the permission set of a code origin from matching grants.
//!
//! # Invariants
//! - Resolution is a pure function of `Origin`; results are cached per origin.
//! - Configuration errors never surface at resolution time.

pub mod grant;
pub mod keystore;
pub mod origin;
pub mod permission;
pub mod resolver;

use crate::descriptor::ParseError;
use crate::expand::ExpandError;
use crate::paths::PathError;
use thiserror::Error;

pub use grant::{Grant, KeyStoreDeclaration, PolicyDescriptor};
pub use keystore::{KeyStore, KeyStoreSet, MemoryKeyStore, DEFAULT_KEY_STORE};
pub use origin::{Origin, SignerIdentity};
pub use permission::{Permission, PermissionSet, PERMISSION_KIND_ALL};
pub use resolver::GrantResolver;

pub type PolicyResult<T> = Result<T, PolicyError>;

/// Invalid grant, keystore or signer configuration.
#[derive(Debug, Error)]
pub enum PolicyError {
    #[error("grant `{grant}` references unknown keystore `{key_store}`")]
    UnknownKeyStore { grant: String, key_store: String },
    #[error("grant `{grant}` references alias `{alias}` missing from keystore `{key_store}`")]
    UnknownAlias {
        grant: String,
        alias: String,
        key_store: String,
    },
    #[error("grant `{grant}` declares signed_by without any alias")]
    EmptySignerList { grant: String },
    #[error("failed to load keystore `{name}` from `{location}`: {source}")]
    KeyStoreLoad {
        name: String,
        location: String,
        #[source]
        source: ParseError,
    },
    #[error("cannot expand `{value}` in {owner}: {source}")]
    Template {
        owner: String,
        value: String,
        #[source]
        source: ExpandError,
    },
    #[error("grant `{grant}` has an invalid code base: {source}")]
    InvalidCodeBase {
        grant: String,
        #[source]
        source: PathError,
    },
    #[error(transparent)]
    Path(#[from] PathError),
}
