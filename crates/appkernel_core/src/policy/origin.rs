//! Code origins: where a loadable unit came from and who signed it.

use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};

/// Opaque signer identifier, e.g. a certificate fingerprint.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SignerIdentity(String);

impl SignerIdentity {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

impl Display for SignerIdentity {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Normalized location plus ordered signer identities.
///
/// Immutable once computed; used as the permission cache key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Origin {
    location: String,
    signers: Vec<SignerIdentity>,
}

impl Origin {
    pub fn new(location: impl Into<String>, signers: Vec<SignerIdentity>) -> Self {
        Self {
            location: location.into(),
            signers,
        }
    }

    pub fn unsigned(location: impl Into<String>) -> Self {
        Self::new(location, Vec::new())
    }

    pub fn location(&self) -> &str {
        self.location.as_str()
    }

    pub fn signers(&self) -> &[SignerIdentity] {
        &self.signers
    }

    pub fn is_signed_by(&self, identity: &SignerIdentity) -> bool {
        self.signers.contains(identity)
    }
}

impl Display for Origin {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.location)?;
        if !self.signers.is_empty() {
            let names: Vec<&str> = self.signers.iter().map(SignerIdentity::as_str).collect();
            write!(f, " signed by [{}]", names.join(", "))?;
        }
        Ok(())
    }
}
