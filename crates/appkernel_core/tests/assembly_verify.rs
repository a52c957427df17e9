use appkernel_core::assembly::{
    assemble_nodes, topological_order, verify_assembly, AssemblyDescriptor, AssemblyError,
    ComponentDeclaration, ComponentNode, DependencyDeclaration, ListenerDeclaration, VerifyError,
};
use appkernel_core::descriptor::{try_parse, ConfigDescriptor, DescriptorFormat, ParseError};
use serde_json::json;

fn names_in_order(nodes: &[ComponentNode]) -> Vec<&str> {
    topological_order(nodes)
        .expect("acyclic")
        .into_iter()
        .map(|position| nodes[position].name.as_str())
        .collect()
}

fn cyclic(with_back_edge: bool) -> AssemblyDescriptor {
    let mut b = ComponentDeclaration::new("b", "impl.b").provides("store");
    if with_back_edge {
        b = b.depends_on(DependencyDeclaration::new("api"));
    }
    AssemblyDescriptor {
        components: vec![
            ComponentDeclaration::new("a", "impl.a")
                .provides("api")
                .depends_on(DependencyDeclaration::new("store")),
            b,
        ],
        listeners: Vec::new(),
    }
}

#[test]
fn a_cycle_fails_and_removing_the_back_edge_verifies() {
    let nodes = assemble_nodes(&cyclic(true)).expect("roles resolve");
    let err = verify_assembly("unit", &nodes, &[], &ConfigDescriptor::default(), None)
        .expect_err("cycle");
    assert_eq!(
        err,
        VerifyError::Cycle {
            path: vec!["a".to_string(), "b".to_string(), "a".to_string()]
        }
    );

    let nodes = assemble_nodes(&cyclic(false)).expect("roles resolve");
    verify_assembly("unit", &nodes, &[], &ConfigDescriptor::default(), None).expect("acyclic");
    assert_eq!(names_in_order(&nodes), vec!["b", "a"]);
}

#[test]
fn providers_must_exist_and_be_unambiguous() {
    let missing = AssemblyDescriptor {
        components: vec![ComponentDeclaration::new("web", "impl.web")
            .depends_on(DependencyDeclaration::new("store"))],
        listeners: Vec::new(),
    };
    assert!(matches!(
        assemble_nodes(&missing),
        Err(AssemblyError::MissingProvider { role, .. }) if role == "store"
    ));

    let ambiguous = AssemblyDescriptor {
        components: vec![
            ComponentDeclaration::new("web", "impl.web")
                .depends_on(DependencyDeclaration::new("store")),
            ComponentDeclaration::new("pg", "impl.pg").provides("store"),
            ComponentDeclaration::new("mem", "impl.mem").provides("store"),
        ],
        listeners: Vec::new(),
    };
    assert!(matches!(
        assemble_nodes(&ambiguous),
        Err(AssemblyError::AmbiguousProvider { candidates, .. }) if candidates.len() == 2
    ));

    let named = AssemblyDescriptor {
        components: vec![
            ComponentDeclaration::new("web", "impl.web")
                .depends_on(DependencyDeclaration::new("store").from_provider("mem")),
            ComponentDeclaration::new("pg", "impl.pg").provides("store"),
            ComponentDeclaration::new("mem", "impl.mem").provides("store"),
        ],
        listeners: Vec::new(),
    };
    let nodes = assemble_nodes(&named).expect("named provider");
    assert_eq!(nodes[0].providers().collect::<Vec<_>>(), vec!["mem"]);

    let wrong_role = AssemblyDescriptor {
        components: vec![
            ComponentDeclaration::new("web", "impl.web")
                .depends_on(DependencyDeclaration::new("cache").from_provider("pg")),
            ComponentDeclaration::new("pg", "impl.pg").provides("store"),
        ],
        listeners: Vec::new(),
    };
    assert!(matches!(
        assemble_nodes(&wrong_role),
        Err(AssemblyError::RoleNotProvided { .. })
    ));
}

#[test]
fn optional_dependency_without_provider_stays_unbound() {
    let descriptor = AssemblyDescriptor {
        components: vec![ComponentDeclaration::new("web", "impl.web")
            .depends_on(DependencyDeclaration::new("metrics").optional())],
        listeners: Vec::new(),
    };
    let nodes = assemble_nodes(&descriptor).expect("optional");
    assert_eq!(nodes[0].dependencies[0].provider, None);
    verify_assembly("unit", &nodes, &[], &ConfigDescriptor::default(), None).expect("verify");
}

#[test]
fn configuration_must_name_a_declared_component_or_listener() {
    let nodes = assemble_nodes(&cyclic(false)).expect("nodes");
    let listeners = [ListenerDeclaration::new("audit", "impl.audit")];

    let covered = ConfigDescriptor::default()
        .with_entry("a", json!({ "port": 8080 }))
        .with_entry("audit", json!({ "level": "info" }));
    verify_assembly("unit", &nodes, &listeners, &covered, None).expect("covered");

    let extra = covered.with_entry("ghost", json!({}));
    assert_eq!(
        verify_assembly("unit", &nodes, &listeners, &extra, None),
        Err(VerifyError::ExtraConfiguration("ghost".to_string()))
    );
}

#[test]
fn names_are_validated_and_unique() {
    let nodes = assemble_nodes(&cyclic(false)).expect("nodes");
    let config = ConfigDescriptor::default();

    assert!(matches!(
        verify_assembly("bad unit", &nodes, &[], &config, None),
        Err(VerifyError::InvalidName { kind: "unit", .. })
    ));
    let clash = [ListenerDeclaration::new("a", "impl.audit")];
    assert_eq!(
        verify_assembly("unit", &nodes, &clash, &config, None),
        Err(VerifyError::DuplicateName("a".to_string()))
    );

    let repeated = AssemblyDescriptor {
        components: vec![
            ComponentDeclaration::new("web", "impl.web")
                .depends_on(DependencyDeclaration::new("store"))
                .depends_on(DependencyDeclaration::new("store")),
            ComponentDeclaration::new("pg", "impl.pg").provides("store"),
        ],
        listeners: Vec::new(),
    };
    let nodes = assemble_nodes(&repeated).expect("nodes");
    assert!(matches!(
        verify_assembly("unit", &nodes, &[], &config, None),
        Err(VerifyError::DuplicateRole { .. })
    ));
}

#[test]
fn assembly_descriptor_parses_from_toml_and_json() {
    let toml = br#"
[[components]]
name = "web"
implementation = "impl.web"
activation = "lazy"
dependencies = [{ role = "store" }]

[[components]]
name = "pg"
implementation = "impl.pg"
provides = ["store"]
collection = "weak"

[[listeners]]
name = "audit"
implementation = "impl.audit"
"#;
    let from_toml: AssemblyDescriptor =
        try_parse(DescriptorFormat::Toml, toml).expect("toml descriptor");

    let json = serde_json::to_vec(&from_toml).expect("encode");
    let from_json: AssemblyDescriptor =
        try_parse(DescriptorFormat::Json, &json).expect("json descriptor");
    assert_eq!(from_toml, from_json);

    let nodes = assemble_nodes(&from_toml).expect("nodes");
    assert_eq!(names_in_order(&nodes), vec!["pg", "web"]);

    let err = try_parse::<AssemblyDescriptor>(DescriptorFormat::Json, toml).expect_err("not json");
    assert!(matches!(err, ParseError::Json(_)));
}
