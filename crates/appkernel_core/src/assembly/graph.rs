//! Runtime component graph driven by the kernel.
//!
//! # Invariants
//! - Components are instantiated and started providers-first and stopped in
//!   the reverse of their start order.
//! - A failed commission leaves no component running.

use crate::assembly::component::{Component, ComponentContext, ComponentError, ComponentRegistry};
use crate::assembly::model::{ActivationPolicy, ComponentNode};
use crate::assembly::verify::{topological_order, VerifyError};
use crate::deploy::ConfigurationRepository;
use crate::domain::LoadingDomain;
use log::{error, info, warn};
use parking_lot::Mutex;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;

/// Operations the kernel runs while moving a unit through its lifecycle.
pub trait Deployable: Send + Sync {
    fn assemble(&self) -> Result<(), GraphError>;
    fn commission(&self) -> Result<(), GraphError>;
    fn decommission(&self) -> Result<(), GraphError>;
}

#[derive(Debug, Error)]
pub enum GraphError {
    #[error(transparent)]
    Verify(#[from] VerifyError),
    #[error("component `{0}` is not part of this graph")]
    UnknownComponent(String),
    #[error("component graph is not assembled")]
    NotAssembled,
    #[error("no factory for implementation `{implementation}` of component `{component}`")]
    UnknownImplementation {
        component: String,
        implementation: String,
    },
    #[error("failed to instantiate component `{component}`: {source}")]
    Instantiate {
        component: String,
        #[source]
        source: ComponentError,
    },
    #[error("failed to start component `{component}`: {source}")]
    Start {
        component: String,
        #[source]
        source: ComponentError,
    },
    #[error("failed to stop component `{component}`: {source}")]
    Stop {
        component: String,
        #[source]
        source: ComponentError,
    },
}

#[derive(Default)]
struct GraphRuntime {
    assembled: bool,
    instances: Vec<Option<Arc<dyn Component>>>,
    started: Vec<usize>,
}

/// Verified component nodes of one unit and their live instances.
pub struct ComponentGraph {
    unit: String,
    nodes: Vec<ComponentNode>,
    order: Vec<usize>,
    index: HashMap<String, usize>,
    domain: Arc<LoadingDomain>,
    registry: Arc<ComponentRegistry>,
    configuration: Arc<ConfigurationRepository>,
    deployment_timeout: Option<Duration>,
    runtime: Mutex<GraphRuntime>,
}

impl ComponentGraph {
    /// # Errors
    /// - `Verify` when the nodes contain a dependency cycle.
    pub fn new(
        unit: impl Into<String>,
        nodes: Vec<ComponentNode>,
        domain: Arc<LoadingDomain>,
        registry: Arc<ComponentRegistry>,
        configuration: Arc<ConfigurationRepository>,
    ) -> Result<Self, GraphError> {
        let order = topological_order(&nodes)?;
        let index = nodes
            .iter()
            .enumerate()
            .map(|(position, node)| (node.name.clone(), position))
            .collect();
        Ok(Self {
            unit: unit.into(),
            nodes,
            order,
            index,
            domain,
            registry,
            configuration,
            deployment_timeout: None,
            runtime: Mutex::new(GraphRuntime::default()),
        })
    }

    /// Start durations above `timeout` are reported; nothing is aborted.
    pub fn with_deployment_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.deployment_timeout = timeout;
        self
    }

    pub fn unit(&self) -> &str {
        self.unit.as_str()
    }

    pub fn nodes(&self) -> &[ComponentNode] {
        &self.nodes
    }

    pub fn domain(&self) -> &Arc<LoadingDomain> {
        &self.domain
    }

    pub fn is_assembled(&self) -> bool {
        self.runtime.lock().assembled
    }

    /// Names of running components in start order.
    pub fn started_components(&self) -> Vec<String> {
        self.runtime
            .lock()
            .started
            .iter()
            .map(|&position| self.nodes[position].name.clone())
            .collect()
    }

    pub fn component(&self, name: &str) -> Option<Arc<dyn Component>> {
        let position = *self.index.get(name)?;
        self.runtime
            .lock()
            .instances
            .get(position)
            .and_then(Clone::clone)
    }

    /// Starts a lazy component together with everything it depends on.
    pub fn activate(&self, name: &str) -> Result<(), GraphError> {
        let position = *self
            .index
            .get(name)
            .ok_or_else(|| GraphError::UnknownComponent(name.to_string()))?;
        let mut runtime = self.runtime.lock();
        if !runtime.assembled {
            return Err(GraphError::NotAssembled);
        }
        let wanted = self.closure([position]);
        self.start_all(&mut runtime, &wanted)
    }

    fn closure(&self, roots: impl IntoIterator<Item = usize>) -> BTreeSet<usize> {
        let mut wanted = BTreeSet::new();
        let mut pending: Vec<usize> = roots.into_iter().collect();
        while let Some(position) = pending.pop() {
            if !wanted.insert(position) {
                continue;
            }
            pending.extend(
                self.nodes[position]
                    .providers()
                    .filter_map(|provider| self.index.get(provider).copied()),
            );
        }
        wanted
    }

    fn start_all(
        &self,
        runtime: &mut GraphRuntime,
        wanted: &BTreeSet<usize>,
    ) -> Result<(), GraphError> {
        for &position in &self.order {
            if !wanted.contains(&position) || runtime.started.contains(&position) {
                continue;
            }
            let node = &self.nodes[position];
            let instance = runtime.instances[position]
                .clone()
                .ok_or(GraphError::NotAssembled)?;

            let started_at = Instant::now();
            instance.start().map_err(|source| GraphError::Start {
                component: node.name.clone(),
                source,
            })?;
            let elapsed = started_at.elapsed();
            if self
                .deployment_timeout
                .is_some_and(|timeout| elapsed > timeout)
            {
                warn!(
                    "event=component_start module=assembly status=slow unit={} component={} duration_ms={}",
                    self.unit,
                    node.name,
                    elapsed.as_millis()
                );
            } else {
                info!(
                    "event=component_start module=assembly status=ok unit={} component={} duration_ms={}",
                    self.unit,
                    node.name,
                    elapsed.as_millis()
                );
            }
            runtime.started.push(position);
        }
        Ok(())
    }

    fn stop_all(&self, runtime: &mut GraphRuntime) -> Result<(), GraphError> {
        let mut first_error = None;
        while let Some(position) = runtime.started.pop() {
            let node = &self.nodes[position];
            let Some(instance) = runtime.instances[position].clone() else {
                continue;
            };
            if let Err(source) = instance.stop() {
                error!(
                    "event=component_stop module=assembly status=error unit={} component={} error={}",
                    self.unit, node.name, source
                );
                first_error.get_or_insert(GraphError::Stop {
                    component: node.name.clone(),
                    source,
                });
            } else {
                info!(
                    "event=component_stop module=assembly status=ok unit={} component={}",
                    self.unit, node.name
                );
            }
        }
        first_error.map_or(Ok(()), Err)
    }
}

impl Deployable for ComponentGraph {
    fn assemble(&self) -> Result<(), GraphError> {
        let mut instances: Vec<Option<Arc<dyn Component>>> = vec![None; self.nodes.len()];
        for &position in &self.order {
            let node = &self.nodes[position];
            let factory = self
                .registry
                .component_factory(&node.implementation)
                .ok_or_else(|| GraphError::UnknownImplementation {
                    component: node.name.clone(),
                    implementation: node.implementation.clone(),
                })?;

            let dependencies: BTreeMap<String, Arc<dyn Component>> = node
                .dependencies
                .iter()
                .filter_map(|dependency| {
                    let provider = self.index.get(dependency.provider.as_deref()?)?;
                    let instance = instances[*provider].clone()?;
                    Some((dependency.role.clone(), instance))
                })
                .collect();
            let context = ComponentContext {
                unit: self.unit.clone(),
                node: node.clone(),
                configuration: self.configuration.get(&self.unit, &node.name),
                domain: Arc::clone(&self.domain),
                dependencies,
            };
            let instance = factory
                .create(&context)
                .map_err(|source| GraphError::Instantiate {
                    component: node.name.clone(),
                    source,
                })?;
            instances[position] = Some(instance);
        }

        let mut runtime = self.runtime.lock();
        runtime.instances = instances;
        runtime.started.clear();
        runtime.assembled = true;
        info!(
            "event=graph_assemble module=assembly status=ok unit={} components={}",
            self.unit,
            self.nodes.len()
        );
        Ok(())
    }

    fn commission(&self) -> Result<(), GraphError> {
        let mut runtime = self.runtime.lock();
        if !runtime.assembled {
            return Err(GraphError::NotAssembled);
        }
        let eager = self.closure(
            self.nodes
                .iter()
                .enumerate()
                .filter(|(_, node)| node.activation == ActivationPolicy::Eager)
                .map(|(position, _)| position),
        );

        if let Err(err) = self.start_all(&mut runtime, &eager) {
            if let Err(rollback) = self.stop_all(&mut runtime) {
                warn!(
                    "event=graph_commission module=assembly status=rollback_error unit={} error={}",
                    self.unit, rollback
                );
            }
            return Err(err);
        }
        Ok(())
    }

    fn decommission(&self) -> Result<(), GraphError> {
        let mut runtime = self.runtime.lock();
        let result = self.stop_all(&mut runtime);
        runtime.instances.clear();
        runtime.assembled = false;
        result
    }
}
