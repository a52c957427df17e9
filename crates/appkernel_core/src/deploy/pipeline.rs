//! Staged deployment of applications into running kernels.
//!
//! # Invariants
//! - A failed `deploy` registers nothing and leaves an already running unit
//!   of the same name untouched.
//! - A fresh installation made by a failed `deploy` is uninstalled and its
//!   record cleared.

use crate::assembly::{
    assemble_nodes, verify_assembly, AssemblyError, ComponentError, ComponentGraph,
    ComponentRegistry, Deployable, GraphError, ListenerContext, VerifyError,
};
use crate::config::KernelConfig;
use crate::deploy::installer::{
    resolve_location, DirectoryInstaller, InstallError, Installation, Installer,
};
use crate::deploy::recorder::{
    DeploymentRecorder, MemoryDeploymentRecorder, RecorderError, SqliteDeploymentRecorder,
};
use crate::deploy::repository::ConfigurationRepository;
use crate::deploy::unit::DeploymentUnit;
use crate::descriptor::{ApplicationDescriptors, EnvironmentDescriptor, ParseError};
use crate::domain::{DomainAssembler, DomainError, RootSet};
use crate::expand::MacroContext;
use crate::extension::{ArchiveInspector, ExtensionIndex, InspectError, ManifestFileInspector};
use crate::kernel::{Kernel, KernelError, KernelListener, KernelState};
use crate::policy::{GrantResolver, PolicyError};
use log::{debug, error, info, warn};
use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;

/// Macro key bound to the unit name.
pub const APP_NAME_KEY: &str = "app.name";
/// Macro key bound to the installed application directory.
pub const APP_HOME_KEY: &str = "app.home";
/// Macro key bound to the installation's work directory.
pub const APP_WORK_KEY: &str = "app.work";

pub type DeploymentResult<T> = Result<T, DeploymentError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum DeploymentStage {
    Installed,
    ClasspathResolved,
    DomainBuilt,
    Assembled,
    Verified,
    ConfigurationApplied,
    Ready,
}

impl DeploymentStage {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Installed => "installed",
            Self::ClasspathResolved => "classpath_resolved",
            Self::DomainBuilt => "domain_built",
            Self::Assembled => "assembled",
            Self::Verified => "verified",
            Self::ConfigurationApplied => "configuration_applied",
            Self::Ready => "ready",
        }
    }
}

impl Display for DeploymentStage {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Cause of a failed stage.
#[derive(Debug, Error)]
pub enum StageFailure {
    #[error(transparent)]
    Install(#[from] InstallError),
    #[error(transparent)]
    Recorder(#[from] RecorderError),
    #[error(transparent)]
    Descriptor(#[from] ParseError),
    #[error(transparent)]
    Policy(#[from] PolicyError),
    #[error(transparent)]
    Domain(#[from] DomainError),
    #[error(transparent)]
    Assembly(#[from] AssemblyError),
    #[error(transparent)]
    Verify(#[from] VerifyError),
    #[error(transparent)]
    Graph(#[from] GraphError),
    #[error(transparent)]
    Listener(#[from] ComponentError),
    #[error(transparent)]
    Kernel(#[from] KernelError),
}

#[derive(Debug, Error)]
pub enum DeploymentError {
    #[error("unit `{0}` is already deployed")]
    AlreadyDeployed(String),
    #[error("unit `{0}` is not deployed")]
    NotDeployed(String),
    #[error("deployment of `{unit}` failed at stage {stage}: {source}")]
    Stage {
        unit: String,
        stage: DeploymentStage,
        #[source]
        source: StageFailure,
    },
    #[error("failed to uninstall `{unit}`: {source}")]
    Uninstall {
        unit: String,
        #[source]
        source: InstallError,
    },
    #[error("failed to update the installation record of `{unit}`: {source}")]
    Recorder {
        unit: String,
        #[source]
        source: RecorderError,
    },
}

impl DeploymentError {
    /// Stage that failed, for stage errors.
    pub fn stage(&self) -> Option<DeploymentStage> {
        match self {
            Self::Stage { stage, .. } => Some(*stage),
            _ => None,
        }
    }
}

/// Failures while building a pipeline from a kernel configuration.
#[derive(Debug, Error)]
pub enum SetupError {
    #[error(transparent)]
    Recorder(#[from] RecorderError),
    #[error("failed to index extensions: {0}")]
    Extensions(#[from] InspectError),
}

fn at_stage<E: Into<StageFailure>>(
    unit: &str,
    stage: DeploymentStage,
) -> impl FnOnce(E) -> DeploymentError + '_ {
    move |err| DeploymentError::Stage {
        unit: unit.to_string(),
        stage,
        source: err.into(),
    }
}

struct DeployedUnit {
    unit: Arc<DeploymentUnit>,
    kernel: Kernel,
}

/// Deploys applications and owns the kernels of the deployed units.
pub struct DeploymentPipeline {
    installer: Arc<dyn Installer>,
    recorder: Arc<dyn DeploymentRecorder>,
    registry: Arc<ComponentRegistry>,
    inspector: Arc<dyn ArchiveInspector>,
    extensions: ExtensionIndex,
    configuration: Arc<ConfigurationRepository>,
    context: MacroContext,
    deployment_timeout: Option<Duration>,
    observers: Vec<Arc<dyn KernelListener>>,
    deployed: BTreeMap<String, DeployedUnit>,
}

impl DeploymentPipeline {
    pub fn new(
        installer: Arc<dyn Installer>,
        recorder: Arc<dyn DeploymentRecorder>,
        registry: ComponentRegistry,
    ) -> Self {
        Self {
            installer,
            recorder,
            registry: Arc::new(registry),
            inspector: Arc::new(ManifestFileInspector),
            extensions: ExtensionIndex::new(),
            configuration: Arc::new(ConfigurationRepository::new()),
            context: MacroContext::new(),
            deployment_timeout: None,
            observers: Vec::new(),
            deployed: BTreeMap::new(),
        }
    }

    /// Builds a pipeline with the directory installer, the configured
    /// recorder and the optional packages below `extensions_dir`.
    pub fn from_config(config: &KernelConfig, registry: ComponentRegistry) -> Result<Self, SetupError> {
        let recorder: Arc<dyn DeploymentRecorder> = match &config.recorder_db {
            Some(path) => Arc::new(SqliteDeploymentRecorder::open(path)?),
            None => Arc::new(MemoryDeploymentRecorder::new()),
        };
        let inspector = ManifestFileInspector;
        let extensions = match &config.extensions_dir {
            Some(dir) => ExtensionIndex::scan(dir, &inspector)?,
            None => ExtensionIndex::new(),
        };

        Ok(Self::new(
            Arc::new(DirectoryInstaller::new(&config.work_dir)),
            recorder,
            registry,
        )
        .with_extensions(extensions)
        .with_context(config.macro_context())
        .with_deployment_timeout(config.deployment_timeout()))
    }

    pub fn with_inspector(mut self, inspector: Arc<dyn ArchiveInspector>) -> Self {
        self.inspector = inspector;
        self
    }

    pub fn with_extensions(mut self, extensions: ExtensionIndex) -> Self {
        self.extensions = extensions;
        self
    }

    pub fn with_context(mut self, context: MacroContext) -> Self {
        self.context = context;
        self
    }

    pub fn with_deployment_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.deployment_timeout = timeout;
        self
    }

    /// Registers a listener on the kernel of every unit deployed afterwards.
    pub fn add_observer(&mut self, listener: Arc<dyn KernelListener>) {
        self.observers.push(listener);
    }

    pub fn configuration(&self) -> &Arc<ConfigurationRepository> {
        &self.configuration
    }

    pub fn deployed_names(&self) -> Vec<String> {
        self.deployed.keys().cloned().collect()
    }

    pub fn unit(&self, name: &str) -> Option<Arc<DeploymentUnit>> {
        self.deployed
            .get(name)
            .map(|deployed| Arc::clone(&deployed.unit))
    }

    pub fn kernel(&self, name: &str) -> Option<&Kernel> {
        self.deployed.get(name).map(|deployed| &deployed.kernel)
    }

    pub fn kernel_state(&self, name: &str) -> Option<KernelState> {
        self.kernel(name).map(Kernel::state)
    }

    /// Runs every stage for `name` and starts its kernel.
    ///
    /// # Errors
    /// - `AlreadyDeployed` before any stage runs.
    /// - `Stage` naming the first failing stage and its cause.
    pub fn deploy(&mut self, name: &str, location: &Path) -> DeploymentResult<()> {
        if self.deployed.contains_key(name) {
            return Err(DeploymentError::AlreadyDeployed(name.to_string()));
        }
        let started_at = Instant::now();
        info!(
            "event=deploy module=deploy status=start unit={} source={}",
            name,
            location.display()
        );

        let (installation, fresh) = self.install(name, location)?;
        match self.prepare(name, installation.clone()) {
            Ok(deployed) => {
                self.deployed.insert(name.to_string(), deployed);
                info!(
                    "event=deploy module=deploy status=ok unit={} duration_ms={}",
                    name,
                    started_at.elapsed().as_millis()
                );
                Ok(())
            }
            Err(err) => {
                error!(
                    "event=deploy module=deploy status=error unit={} stage={} duration_ms={} error={}",
                    name,
                    err.stage().map_or("none", DeploymentStage::as_str),
                    started_at.elapsed().as_millis(),
                    err
                );
                self.configuration.remove_unit(name);
                if fresh {
                    self.rollback(name, &installation);
                }
                Err(err)
            }
        }
    }

    /// Stops and removes a unit, its configuration and its installation.
    pub fn undeploy(&mut self, name: &str) -> DeploymentResult<()> {
        let deployed = self
            .deployed
            .remove(name)
            .ok_or_else(|| DeploymentError::NotDeployed(name.to_string()))?;
        deployed.kernel.dispose();
        self.configuration.remove_unit(name);

        self.installer
            .uninstall(deployed.unit.installation())
            .map_err(|source| DeploymentError::Uninstall {
                unit: name.to_string(),
                source,
            })?;
        self.recorder
            .record_installation(name, None)
            .map_err(|source| DeploymentError::Recorder {
                unit: name.to_string(),
                source,
            })?;
        info!("event=undeploy module=deploy status=ok unit={name}");
        Ok(())
    }

    /// Undeploys `name` and deploys it again from its original source.
    pub fn redeploy(&mut self, name: &str) -> DeploymentResult<()> {
        let source = self
            .deployed
            .get(name)
            .map(|deployed| deployed.unit.installation().source.clone())
            .ok_or_else(|| DeploymentError::NotDeployed(name.to_string()))?;
        self.undeploy(name)?;
        self.deploy(name, &source)
    }

    /// Disposes every kernel; installation records are kept for reuse.
    pub fn dispose(&mut self) {
        let deployed = std::mem::take(&mut self.deployed);
        for (name, unit) in deployed.into_iter().rev() {
            unit.kernel.dispose();
            self.configuration.remove_unit(&name);
        }
        info!("event=pipeline_dispose module=deploy status=ok");
    }

    fn install(&self, name: &str, location: &Path) -> DeploymentResult<(Installation, bool)> {
        let location =
            resolve_location(location).map_err(at_stage(name, DeploymentStage::Installed))?;
        let location = location.as_path();
        if let Some(recorded) = self.recorder.fetch_installation(name) {
            if recorded.is_present() && recorded.source == location {
                info!(
                    "event=app_install module=deploy status=reused unit={} work_dir={}",
                    name,
                    recorded.work_directory.display()
                );
                return Ok((recorded, false));
            }
            debug!("event=app_install module=deploy status=stale unit={name}");
            if recorded.work_directory.exists() {
                if let Err(err) = self.installer.uninstall(&recorded) {
                    warn!(
                        "event=app_uninstall module=deploy status=error unit={} error={}",
                        name, err
                    );
                }
            }
        }

        let installation = self
            .installer
            .install(name, location)
            .map_err(at_stage(name, DeploymentStage::Installed))?;
        if let Err(err) = self.recorder.record_installation(name, Some(&installation)) {
            self.rollback(name, &installation);
            return Err(at_stage(name, DeploymentStage::Installed)(err));
        }
        Ok((installation, true))
    }

    fn prepare(&self, name: &str, installation: Installation) -> DeploymentResult<DeployedUnit> {
        use DeploymentStage::*;

        let descriptors = ApplicationDescriptors::load(
            &installation.assembly,
            installation.environment.as_deref(),
            installation.config.as_deref(),
        )
        .map_err(at_stage(name, Installed))?;
        stage_done(name, Installed);

        let roots = RootSet::new(&installation.directory, &installation.work_directory);
        let classpath = &descriptors.environment.classpath;
        let resolved = roots
            .resolve_classpath(&classpath.includes, &classpath.excludes)
            .map_err(at_stage(name, ClasspathResolved))?;
        stage_done(name, ClasspathResolved);

        let context = self.unit_context(name, &installation, &descriptors.environment);
        let grants = GrantResolver::from_descriptor(
            &descriptors.environment.policy,
            &installation.directory,
            &context,
        )
        .map_err(at_stage(name, DomainBuilt))?;
        let domain = DomainAssembler::new(roots, Arc::new(grants), Arc::clone(&self.inspector))
            .build_domain_from(name, &resolved, &self.extensions, None)
            .map_err(at_stage(name, DomainBuilt))?;
        stage_done(name, DomainBuilt);

        let nodes = assemble_nodes(&descriptors.assembly).map_err(at_stage(name, Assembled))?;
        stage_done(name, Assembled);

        verify_assembly(
            name,
            &nodes,
            &descriptors.assembly.listeners,
            &descriptors.config,
            Some(&self.registry),
        )
        .map_err(at_stage(name, Verified))?;
        stage_done(name, Verified);

        for (component, fragment) in &descriptors.config.entries {
            self.configuration.store(name, component, fragment.clone());
        }
        stage_done(name, ConfigurationApplied);

        let graph = ComponentGraph::new(
            name,
            nodes,
            domain,
            Arc::clone(&self.registry),
            Arc::clone(&self.configuration),
        )
        .map_err(at_stage(name, Ready))?
        .with_deployment_timeout(self.deployment_timeout);
        let listeners = descriptors.assembly.listeners.clone();
        let unit = Arc::new(DeploymentUnit::new(
            name,
            installation,
            graph,
            listeners,
            descriptors.config,
        ));

        let deployable: Arc<dyn Deployable> = unit.clone();
        let kernel = Kernel::new(name, deployable).map_err(at_stage(name, Ready))?;
        for observer in &self.observers {
            kernel.add_listener(Arc::clone(observer));
        }
        for declaration in unit.listeners() {
            let factory = self
                .registry
                .listener_factory(&declaration.implementation)
                .ok_or_else(|| {
                    ComponentError::Failed(format!(
                        "no listener factory for `{}`",
                        declaration.implementation
                    ))
                })
                .map_err(at_stage(name, Ready))?;
            let listener = factory
                .create(&ListenerContext {
                    unit: name.to_string(),
                    name: declaration.name.clone(),
                    configuration: self.configuration.get(name, &declaration.name),
                })
                .map_err(at_stage(name, Ready))?;
            kernel.add_listener(listener);
        }

        kernel.startup().map_err(at_stage(name, Ready))?;
        stage_done(name, Ready);
        Ok(DeployedUnit { unit, kernel })
    }

    fn unit_context(
        &self,
        name: &str,
        installation: &Installation,
        environment: &EnvironmentDescriptor,
    ) -> MacroContext {
        let mut unit_context: MacroContext = environment
            .properties
            .iter()
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect();
        unit_context.insert(APP_NAME_KEY, name);
        unit_context.insert(
            APP_HOME_KEY,
            installation.directory.to_string_lossy().into_owned(),
        );
        unit_context.insert(
            APP_WORK_KEY,
            installation.work_directory.to_string_lossy().into_owned(),
        );
        self.context.merged(&unit_context)
    }

    fn rollback(&self, name: &str, installation: &Installation) {
        if let Err(err) = self.installer.uninstall(installation) {
            warn!(
                "event=deploy_rollback module=deploy status=error unit={} error={}",
                name, err
            );
        }
        if let Err(err) = self.recorder.record_installation(name, None) {
            warn!(
                "event=deploy_rollback module=deploy status=error unit={} error={}",
                name, err
            );
        }
        info!("event=deploy_rollback module=deploy status=ok unit={name}");
    }
}

fn stage_done(name: &str, stage: DeploymentStage) {
    debug!("event=deploy_stage module=deploy status=ok unit={name} stage={stage}");
}
