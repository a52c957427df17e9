//! Assembly descriptor shapes and the resolved component node model.

use serde::{Deserialize, Serialize};

/// When a component is started relative to its unit.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActivationPolicy {
    #[default]
    Eager,
    Lazy,
}

/// How long an instantiated component is retained.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CollectionPolicy {
    #[default]
    Strong,
    Weak,
    Liberal,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DependencyDeclaration {
    pub role: String,
    #[serde(default)]
    pub provider: Option<String>,
    #[serde(default)]
    pub optional: bool,
}

impl DependencyDeclaration {
    pub fn new(role: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            provider: None,
            optional: false,
        }
    }

    pub fn from_provider(mut self, provider: impl Into<String>) -> Self {
        self.provider = Some(provider.into());
        self
    }

    pub fn optional(mut self) -> Self {
        self.optional = true;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComponentDeclaration {
    pub name: String,
    pub implementation: String,
    #[serde(default)]
    pub provides: Vec<String>,
    #[serde(default)]
    pub dependencies: Vec<DependencyDeclaration>,
    #[serde(default)]
    pub activation: ActivationPolicy,
    #[serde(default)]
    pub collection: CollectionPolicy,
}

impl ComponentDeclaration {
    pub fn new(name: impl Into<String>, implementation: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            implementation: implementation.into(),
            provides: Vec::new(),
            dependencies: Vec::new(),
            activation: ActivationPolicy::default(),
            collection: CollectionPolicy::default(),
        }
    }

    pub fn provides(mut self, role: impl Into<String>) -> Self {
        self.provides.push(role.into());
        self
    }

    pub fn depends_on(mut self, dependency: DependencyDeclaration) -> Self {
        self.dependencies.push(dependency);
        self
    }

    pub fn lazy(mut self) -> Self {
        self.activation = ActivationPolicy::Lazy;
        self
    }
}

/// Observer of a unit's kernel state, instantiated through the registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListenerDeclaration {
    pub name: String,
    pub implementation: String,
}

impl ListenerDeclaration {
    pub fn new(name: impl Into<String>, implementation: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            implementation: implementation.into(),
        }
    }
}

/// Components and listeners of one application.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AssemblyDescriptor {
    pub components: Vec<ComponentDeclaration>,
    pub listeners: Vec<ListenerDeclaration>,
}

/// Dependency after provider resolution; `provider` is `None` only for an
/// optional dependency nobody provides.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedDependency {
    pub role: String,
    pub provider: Option<String>,
    pub optional: bool,
}

/// A component with every dependency bound to a sibling.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComponentNode {
    pub name: String,
    pub implementation: String,
    pub provides: Vec<String>,
    pub dependencies: Vec<ResolvedDependency>,
    pub activation: ActivationPolicy,
    pub collection: CollectionPolicy,
}

impl ComponentNode {
    pub fn provides_role(&self, role: &str) -> bool {
        self.provides.iter().any(|provided| provided == role)
    }

    /// Names of the siblings this node depends on.
    pub fn providers(&self) -> impl Iterator<Item = &str> {
        self.dependencies
            .iter()
            .filter_map(|dependency| dependency.provider.as_deref())
    }
}
