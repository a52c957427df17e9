//! Application kernel: deploys component applications into isolated loading
//! domains and drives each one through a lifecycle state machine.

pub mod assembly;
pub mod config;
pub mod db;
pub mod deploy;
pub mod descriptor;
pub mod domain;
pub mod expand;
pub mod extension;
pub mod kernel;
pub mod logging;
pub mod paths;
pub mod policy;

pub use assembly::{
    Component, ComponentContext, ComponentError, ComponentGraph, ComponentRegistry, Deployable,
};
pub use config::{ConfigError, KernelConfig};
pub use deploy::{DeploymentError, DeploymentPipeline, DeploymentStage};
pub use domain::{DomainAssembler, DomainError, LoadingDomain, RootSet};
pub use expand::{expand, expand_nested, ExpandError, MacroContext};
pub use extension::{ExtensionIndex, ManifestFileInspector};
pub use kernel::{Kernel, KernelError, KernelListener, KernelState, StateChangeEvent};
pub use logging::{default_log_level, init_logging, logging_status, LoggingError};
pub use policy::{GrantResolver, Origin, Permission, PermissionSet};

/// Returns the core crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
