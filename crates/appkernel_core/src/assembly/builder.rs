//! Binds declared dependency roles to sibling providers.

use crate::assembly::model::{
    AssemblyDescriptor, ComponentDeclaration, ComponentNode, DependencyDeclaration,
    ResolvedDependency,
};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AssemblyError {
    #[error("component `{component}` depends on role `{role}` but no sibling provides it")]
    MissingProvider { component: String, role: String },
    #[error("component `{component}` names provider `{provider}` for role `{role}`, which is not declared")]
    UnknownProvider {
        component: String,
        role: String,
        provider: String,
    },
    #[error("provider `{provider}` named by `{component}` does not provide role `{role}`")]
    RoleNotProvided {
        component: String,
        role: String,
        provider: String,
    },
    #[error("component `{component}` depends on role `{role}` provided by several siblings: {}", .candidates.join(", "))]
    AmbiguousProvider {
        component: String,
        role: String,
        candidates: Vec<String>,
    },
}

/// Resolves every component declaration into a node.
///
/// A named provider must be a sibling providing the role. An unnamed role
/// must be provided by exactly one other sibling. Optional dependencies may
/// stay unbound when no sibling provides them.
pub fn assemble_nodes(descriptor: &AssemblyDescriptor) -> Result<Vec<ComponentNode>, AssemblyError> {
    descriptor
        .components
        .iter()
        .map(|component| {
            let dependencies = component
                .dependencies
                .iter()
                .map(|dependency| resolve(component, dependency, &descriptor.components))
                .collect::<Result<Vec<_>, _>>()?;
            Ok(ComponentNode {
                name: component.name.clone(),
                implementation: component.implementation.clone(),
                provides: component.provides.clone(),
                dependencies,
                activation: component.activation,
                collection: component.collection,
            })
        })
        .collect()
}

fn resolve(
    component: &ComponentDeclaration,
    dependency: &DependencyDeclaration,
    siblings: &[ComponentDeclaration],
) -> Result<ResolvedDependency, AssemblyError> {
    let bound = |provider: Option<String>| ResolvedDependency {
        role: dependency.role.clone(),
        provider,
        optional: dependency.optional,
    };

    if let Some(name) = &dependency.provider {
        let Some(provider) = siblings.iter().find(|sibling| &sibling.name == name) else {
            if dependency.optional {
                return Ok(bound(None));
            }
            return Err(AssemblyError::UnknownProvider {
                component: component.name.clone(),
                role: dependency.role.clone(),
                provider: name.clone(),
            });
        };
        if !provider.provides.contains(&dependency.role) {
            return Err(AssemblyError::RoleNotProvided {
                component: component.name.clone(),
                role: dependency.role.clone(),
                provider: name.clone(),
            });
        }
        return Ok(bound(Some(name.clone())));
    }

    let candidates: Vec<String> = siblings
        .iter()
        .filter(|sibling| sibling.name != component.name)
        .filter(|sibling| sibling.provides.contains(&dependency.role))
        .map(|sibling| sibling.name.clone())
        .collect();
    match candidates.as_slice() {
        [] if dependency.optional => Ok(bound(None)),
        [] => Err(AssemblyError::MissingProvider {
            component: component.name.clone(),
            role: dependency.role.clone(),
        }),
        [only] => Ok(bound(Some(only.clone()))),
        _ => Err(AssemblyError::AmbiguousProvider {
            component: component.name.clone(),
            role: dependency.role.clone(),
            candidates,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::{assemble_nodes, AssemblyError};
    use crate::assembly::model::{AssemblyDescriptor, ComponentDeclaration, DependencyDeclaration};

    fn descriptor(components: Vec<ComponentDeclaration>) -> AssemblyDescriptor {
        AssemblyDescriptor {
            components,
            listeners: Vec::new(),
        }
    }

    #[test]
    fn binds_unnamed_roles_to_the_single_provider() {
        let nodes = assemble_nodes(&descriptor(vec![
            ComponentDeclaration::new("store", "demo.store").provides("storage"),
            ComponentDeclaration::new("api", "demo.api")
                .depends_on(DependencyDeclaration::new("storage")),
        ]))
        .expect("assemble");
        assert_eq!(nodes[1].dependencies[0].provider.as_deref(), Some("store"));
    }

    #[test]
    fn missing_provider_is_named() {
        let err = assemble_nodes(&descriptor(vec![ComponentDeclaration::new("api", "demo.api")
            .depends_on(DependencyDeclaration::new("storage"))]))
        .expect_err("missing");
        assert_eq!(
            err,
            AssemblyError::MissingProvider {
                component: "api".to_string(),
                role: "storage".to_string(),
            }
        );
    }

    #[test]
    fn named_provider_must_exist_and_provide_the_role() {
        let err = assemble_nodes(&descriptor(vec![
            ComponentDeclaration::new("store", "demo.store").provides("cache"),
            ComponentDeclaration::new("api", "demo.api")
                .depends_on(DependencyDeclaration::new("storage").from_provider("store")),
        ]))
        .expect_err("wrong role");
        assert!(matches!(err, AssemblyError::RoleNotProvided { .. }));

        let err = assemble_nodes(&descriptor(vec![ComponentDeclaration::new("api", "demo.api")
            .depends_on(DependencyDeclaration::new("storage").from_provider("ghost"))]))
        .expect_err("unknown");
        assert!(matches!(err, AssemblyError::UnknownProvider { provider, .. } if provider == "ghost"));
    }

    #[test]
    fn ambiguous_providers_need_a_name() {
        let components = vec![
            ComponentDeclaration::new("primary", "demo.store").provides("storage"),
            ComponentDeclaration::new("replica", "demo.store").provides("storage"),
            ComponentDeclaration::new("api", "demo.api")
                .depends_on(DependencyDeclaration::new("storage")),
        ];
        let err = assemble_nodes(&descriptor(components.clone())).expect_err("ambiguous");
        assert!(matches!(err, AssemblyError::AmbiguousProvider { ref candidates, .. } if candidates.len() == 2));

        let mut named = components;
        named[2] = ComponentDeclaration::new("api", "demo.api")
            .depends_on(DependencyDeclaration::new("storage").from_provider("replica"));
        let nodes = assemble_nodes(&descriptor(named)).expect("named provider");
        assert_eq!(nodes[2].dependencies[0].provider.as_deref(), Some("replica"));
    }

    #[test]
    fn optional_dependencies_may_stay_unbound() {
        let nodes = assemble_nodes(&descriptor(vec![ComponentDeclaration::new("api", "demo.api")
            .depends_on(DependencyDeclaration::new("metrics").optional())]))
        .expect("assemble");
        assert_eq!(nodes[0].dependencies[0].provider, None);
    }
}
