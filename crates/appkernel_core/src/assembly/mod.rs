//! Component assembly: descriptor model, provider binding, verification and
//! the runtime graph.
//!
//! # Responsibility
//! - Turn an assembly descriptor into component nodes with bound providers.
//! - Reject structurally invalid units before anything is instantiated.
//! - Instantiate, start and stop components in dependency order.
//!
//! # Invariants
//! - Only verified, acyclic node sets become a `ComponentGraph`.

pub mod builder;
pub mod component;
pub mod graph;
pub mod model;
pub mod verify;

pub use builder::{assemble_nodes, AssemblyError};
pub use component::{
    Component, ComponentContext, ComponentError, ComponentFactory, ComponentRegistry,
    ListenerContext, ListenerFactory,
};
pub use graph::{ComponentGraph, Deployable, GraphError};
pub use model::{
    ActivationPolicy, AssemblyDescriptor, CollectionPolicy, ComponentDeclaration, ComponentNode,
    DependencyDeclaration, ListenerDeclaration, ResolvedDependency,
};
pub use verify::{topological_order, verify_assembly, VerifyError};
