//! Component and listener capabilities plus the implementation registry.

use crate::assembly::model::ComponentNode;
use crate::domain::LoadingDomain;
use crate::kernel::KernelListener;
use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ComponentError {
    #[error("invalid configuration: {0}")]
    Configuration(String),
    #[error("{0}")]
    Failed(String),
}

/// Lifecycle capability of a deployed component.
pub trait Component: Send + Sync {
    fn start(&self) -> Result<(), ComponentError> {
        Ok(())
    }

    fn stop(&self) -> Result<(), ComponentError> {
        Ok(())
    }
}

/// Everything a factory may consult when instantiating one node.
pub struct ComponentContext {
    pub unit: String,
    pub node: ComponentNode,
    pub configuration: Option<serde_json::Value>,
    pub domain: Arc<LoadingDomain>,
    /// Provider instances keyed by dependency role.
    pub dependencies: BTreeMap<String, Arc<dyn Component>>,
}

impl ComponentContext {
    pub fn dependency(&self, role: &str) -> Option<&Arc<dyn Component>> {
        self.dependencies.get(role)
    }
}

pub trait ComponentFactory: Send + Sync {
    fn create(&self, context: &ComponentContext) -> Result<Arc<dyn Component>, ComponentError>;
}

impl<F> ComponentFactory for F
where
    F: Fn(&ComponentContext) -> Result<Arc<dyn Component>, ComponentError> + Send + Sync,
{
    fn create(&self, context: &ComponentContext) -> Result<Arc<dyn Component>, ComponentError> {
        self(context)
    }
}

pub struct ListenerContext {
    pub unit: String,
    pub name: String,
    pub configuration: Option<serde_json::Value>,
}

pub trait ListenerFactory: Send + Sync {
    fn create(&self, context: &ListenerContext) -> Result<Arc<dyn KernelListener>, ComponentError>;
}

impl<F> ListenerFactory for F
where
    F: Fn(&ListenerContext) -> Result<Arc<dyn KernelListener>, ComponentError> + Send + Sync,
{
    fn create(&self, context: &ListenerContext) -> Result<Arc<dyn KernelListener>, ComponentError> {
        self(context)
    }
}

/// Implementation names mapped to factories.
#[derive(Clone, Default)]
pub struct ComponentRegistry {
    components: BTreeMap<String, Arc<dyn ComponentFactory>>,
    listeners: BTreeMap<String, Arc<dyn ListenerFactory>>,
}

impl ComponentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a constructor for components of type `C`.
    pub fn register<C, F>(&mut self, implementation: impl Into<String>, constructor: F) -> &mut Self
    where
        C: Component + 'static,
        F: Fn(&ComponentContext) -> Result<C, ComponentError> + Send + Sync + 'static,
    {
        let factory = move |context: &ComponentContext| -> Result<Arc<dyn Component>, ComponentError> {
            let component: Arc<dyn Component> = Arc::new(constructor(context)?);
            Ok(component)
        };
        self.register_factory(implementation, Arc::new(factory))
    }

    pub fn register_factory(
        &mut self,
        implementation: impl Into<String>,
        factory: Arc<dyn ComponentFactory>,
    ) -> &mut Self {
        self.components.insert(implementation.into(), factory);
        self
    }

    /// Registers a constructor for listeners of type `L`.
    pub fn register_listener<L, F>(
        &mut self,
        implementation: impl Into<String>,
        constructor: F,
    ) -> &mut Self
    where
        L: KernelListener + 'static,
        F: Fn(&ListenerContext) -> Result<L, ComponentError> + Send + Sync + 'static,
    {
        let factory =
            move |context: &ListenerContext| -> Result<Arc<dyn KernelListener>, ComponentError> {
                let listener: Arc<dyn KernelListener> = Arc::new(constructor(context)?);
                Ok(listener)
            };
        self.listeners
            .insert(implementation.into(), Arc::new(factory));
        self
    }

    pub fn component_factory(&self, implementation: &str) -> Option<&Arc<dyn ComponentFactory>> {
        self.components.get(implementation)
    }

    pub fn listener_factory(&self, implementation: &str) -> Option<&Arc<dyn ListenerFactory>> {
        self.listeners.get(implementation)
    }

    pub fn contains_component(&self, implementation: &str) -> bool {
        self.components.contains_key(implementation)
    }

    pub fn contains_listener(&self, implementation: &str) -> bool {
        self.listeners.contains_key(implementation)
    }
}

impl std::fmt::Debug for ComponentRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ComponentRegistry")
            .field("components", &self.components.keys().collect::<Vec<_>>())
            .field("listeners", &self.listeners.keys().collect::<Vec<_>>())
            .finish()
    }
}
