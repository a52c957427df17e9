//! Application deployment.
//!
//! # Responsibility
//! - Install application directories and remember installations.
//! - Turn an installed application into a started kernel in ordered stages.
//! - Hold per-component configuration for running units.

pub mod installer;
pub mod pipeline;
pub mod recorder;
pub mod repository;
pub mod unit;

pub use installer::{
    DirectoryInstaller, FileDigest, InstallError, Installation, Installer, CONF_DIR, LIB_DIR,
};
pub use pipeline::{
    DeploymentError, DeploymentPipeline, DeploymentResult, DeploymentStage, SetupError,
    StageFailure, APP_HOME_KEY, APP_NAME_KEY, APP_WORK_KEY,
};
pub use recorder::{
    DeploymentRecorder, MemoryDeploymentRecorder, RecorderError, SqliteDeploymentRecorder,
};
pub use repository::ConfigurationRepository;
pub use unit::DeploymentUnit;
