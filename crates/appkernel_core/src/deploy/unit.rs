//! A deployed application handed to the kernel.

use crate::assembly::{ComponentGraph, Deployable, GraphError, ListenerDeclaration};
use crate::deploy::installer::Installation;
use crate::descriptor::ConfigDescriptor;
use crate::domain::LoadingDomain;
use std::sync::Arc;
use uuid::Uuid;

/// Installed, verified and configured application.
pub struct DeploymentUnit {
    name: String,
    id: Uuid,
    installation: Installation,
    domain: Arc<LoadingDomain>,
    graph: ComponentGraph,
    listeners: Vec<ListenerDeclaration>,
    configuration: ConfigDescriptor,
}

impl DeploymentUnit {
    pub fn new(
        name: impl Into<String>,
        installation: Installation,
        graph: ComponentGraph,
        listeners: Vec<ListenerDeclaration>,
        configuration: ConfigDescriptor,
    ) -> Self {
        Self {
            name: name.into(),
            id: Uuid::new_v4(),
            installation,
            domain: Arc::clone(graph.domain()),
            graph,
            listeners,
            configuration,
        }
    }

    pub fn name(&self) -> &str {
        self.name.as_str()
    }

    /// Identifier of this deployment; changes on every redeploy.
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn installation(&self) -> &Installation {
        &self.installation
    }

    pub fn domain(&self) -> &Arc<LoadingDomain> {
        &self.domain
    }

    pub fn graph(&self) -> &ComponentGraph {
        &self.graph
    }

    pub fn listeners(&self) -> &[ListenerDeclaration] {
        &self.listeners
    }

    pub fn configuration(&self) -> &ConfigDescriptor {
        &self.configuration
    }
}

impl Deployable for DeploymentUnit {
    fn assemble(&self) -> Result<(), GraphError> {
        self.graph.assemble()
    }

    fn commission(&self) -> Result<(), GraphError> {
        self.graph.commission()
    }

    fn decommission(&self) -> Result<(), GraphError> {
        self.graph.decommission()
    }
}
