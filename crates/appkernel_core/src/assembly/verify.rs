//! Structural verification of an assembled unit.
//!
//! # Invariants
//! - A verified graph is acyclic and `topological_order` succeeds on it.
//! - Every configuration entry names a declared component or listener.

use crate::assembly::component::ComponentRegistry;
use crate::assembly::model::{ComponentNode, ListenerDeclaration};
use crate::descriptor::ConfigDescriptor;
use log::info;
use std::collections::{BTreeSet, HashMap};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VerifyError {
    #[error("dependency cycle: {}", .path.join(" -> "))]
    Cycle { path: Vec<String> },
    #[error("configuration entry `{0}` matches no component or listener")]
    ExtraConfiguration(String),
    #[error("invalid {kind} name `{name}`: use letters, digits and `-`")]
    InvalidName { kind: &'static str, name: String },
    #[error("name `{0}` is declared more than once")]
    DuplicateName(String),
    #[error("component `{component}` declares role `{role}` more than once")]
    DuplicateRole { component: String, role: String },
    #[error("{kind} `{name}` uses unknown implementation `{implementation}`")]
    UnknownImplementation {
        kind: &'static str,
        name: String,
        implementation: String,
    },
}

/// Checks names, roles, cycles and configuration coverage of one unit.
///
/// `registry` additionally checks that every implementation is registered.
pub fn verify_assembly(
    unit: &str,
    nodes: &[ComponentNode],
    listeners: &[ListenerDeclaration],
    config: &ConfigDescriptor,
    registry: Option<&ComponentRegistry>,
) -> Result<(), VerifyError> {
    check_name("unit", unit)?;

    let mut names = BTreeSet::new();
    let declared = nodes
        .iter()
        .map(|node| ("component", node.name.as_str()))
        .chain(listeners.iter().map(|listener| ("listener", listener.name.as_str())));
    for (kind, name) in declared {
        check_name(kind, name)?;
        if !names.insert(name) {
            return Err(VerifyError::DuplicateName(name.to_string()));
        }
    }

    for node in nodes {
        let mut roles = BTreeSet::new();
        for dependency in &node.dependencies {
            if !roles.insert(dependency.role.as_str()) {
                return Err(VerifyError::DuplicateRole {
                    component: node.name.clone(),
                    role: dependency.role.clone(),
                });
            }
        }
    }

    if let Some(registry) = registry {
        for node in nodes {
            if !registry.contains_component(&node.implementation) {
                return Err(VerifyError::UnknownImplementation {
                    kind: "component",
                    name: node.name.clone(),
                    implementation: node.implementation.clone(),
                });
            }
        }
        for listener in listeners {
            if !registry.contains_listener(&listener.implementation) {
                return Err(VerifyError::UnknownImplementation {
                    kind: "listener",
                    name: listener.name.clone(),
                    implementation: listener.implementation.clone(),
                });
            }
        }
    }

    topological_order(nodes)?;

    if let Some(extra) = config.names().find(|name| !names.contains(name)) {
        return Err(VerifyError::ExtraConfiguration(extra.to_string()));
    }

    info!(
        "event=assembly_verify module=assembly status=ok unit={} components={} listeners={}",
        unit,
        nodes.len(),
        listeners.len()
    );
    Ok(())
}

/// Node indices ordered so that every provider precedes its dependents.
///
/// # Errors
/// - `Cycle` with the offending path, first node repeated at the end.
pub fn topological_order(nodes: &[ComponentNode]) -> Result<Vec<usize>, VerifyError> {
    #[derive(Clone, Copy, PartialEq, Eq)]
    enum Mark {
        Unvisited,
        InProgress,
        Done,
    }

    let index: HashMap<&str, usize> = nodes
        .iter()
        .enumerate()
        .map(|(position, node)| (node.name.as_str(), position))
        .collect();
    let mut marks = vec![Mark::Unvisited; nodes.len()];
    let mut order = Vec::with_capacity(nodes.len());
    let mut stack: Vec<usize> = Vec::new();

    fn visit(
        current: usize,
        nodes: &[ComponentNode],
        index: &HashMap<&str, usize>,
        marks: &mut [Mark],
        stack: &mut Vec<usize>,
        order: &mut Vec<usize>,
    ) -> Result<(), VerifyError> {
        match marks[current] {
            Mark::Done => return Ok(()),
            Mark::InProgress => {
                let start = stack
                    .iter()
                    .position(|&entry| entry == current)
                    .unwrap_or_default();
                let mut path: Vec<String> = stack[start..]
                    .iter()
                    .map(|&entry| nodes[entry].name.clone())
                    .collect();
                path.push(nodes[current].name.clone());
                return Err(VerifyError::Cycle { path });
            }
            Mark::Unvisited => {}
        }

        marks[current] = Mark::InProgress;
        stack.push(current);
        for provider in nodes[current].providers() {
            if let Some(&next) = index.get(provider) {
                visit(next, nodes, index, marks, stack, order)?;
            }
        }
        stack.pop();
        marks[current] = Mark::Done;
        order.push(current);
        Ok(())
    }

    for start in 0..nodes.len() {
        visit(start, nodes, &index, &mut marks, &mut stack, &mut order)?;
    }
    Ok(order)
}

fn check_name(kind: &'static str, name: &str) -> Result<(), VerifyError> {
    let valid = !name.is_empty()
        && name
            .chars()
            .all(|character| character.is_ascii_alphanumeric() || character == '-');
    if valid {
        Ok(())
    } else {
        Err(VerifyError::InvalidName {
            kind,
            name: name.to_string(),
        })
    }
}
