//! Optional packages (extensions) declared by archives.
//!
//! # Responsibility
//! - Parse the available/required/optional extension declarations of an
//!   archive.
//! - Decide whether an available extension satisfies a requirement.
//! - Hold the explicit index of installed optional packages.
//!
//! # See also
//! - `crate::domain` for transitive extension resolution.

pub mod index;
pub mod inspector;
pub mod manifest;
pub mod version;

pub use index::{ExtensionIndex, OptionalPackage};
pub use inspector::{ArchiveInspector, InspectError, ManifestFileInspector};
pub use manifest::{parse_manifest, ArchiveManifest, Compatibility, Extension, ManifestError};
pub use version::{DeweyDecimal, VersionParseError};
