use appkernel_core::assembly::{
    Component, ComponentError, ComponentRegistry, ListenerContext, VerifyError,
};
use appkernel_core::config::KernelConfig;
use appkernel_core::deploy::{
    DeploymentError, DeploymentPipeline, DeploymentRecorder, DeploymentStage, DirectoryInstaller,
    MemoryDeploymentRecorder, SqliteDeploymentRecorder, StageFailure,
};
use appkernel_core::domain::DomainError;
use appkernel_core::extension::{ExtensionIndex, ManifestFileInspector};
use appkernel_core::kernel::{KernelListener, KernelState, ListenerError, StateChangeEvent};
use appkernel_core::policy::Permission;
use parking_lot::Mutex;
use serde_json::json;
use std::fs;
use std::sync::Arc;
use tempfile::TempDir;

type Log = Arc<Mutex<Vec<String>>>;

const ASSEMBLY: &str = r#"
[[components]]
name = "web"
implementation = "test.service"
dependencies = [{ role = "store" }]

[[components]]
name = "db"
implementation = "test.service"
provides = ["store"]

[[listeners]]
name = "audit"
implementation = "test.audit"
"#;

const CONFIG: &str = r#"
[web]
port = 8080

[audit]
label = "ops"
"#;

const ENVIRONMENT: &str = r#"
[classpath]
includes = ["lib/*.jar"]

[[policy.grants]]
name = "libs"
code_base = "${app.home}/lib/*.jar"
permissions = [{ kind = "file", target = "${app.work}/-", actions = "read,write" }]
"#;

struct Service {
    name: String,
    broken: bool,
    log: Log,
}

impl Component for Service {
    fn start(&self) -> Result<(), ComponentError> {
        if self.broken {
            return Err(ComponentError::Failed(format!("{} cannot bind", self.name)));
        }
        self.log.lock().push(format!("start {}", self.name));
        Ok(())
    }

    fn stop(&self) -> Result<(), ComponentError> {
        self.log.lock().push(format!("stop {}", self.name));
        Ok(())
    }
}

struct Audit {
    label: String,
    log: Log,
}

impl KernelListener for Audit {
    fn on_state_changed(&self, event: &StateChangeEvent) -> Result<(), ListenerError> {
        self.log
            .lock()
            .push(format!("{} {} {}", self.label, event.unit, event.new_state));
        Ok(())
    }
}

struct Fixture {
    log: Log,
    audit: Log,
    work: TempDir,
}

impl Fixture {
    fn new() -> Self {
        Self {
            log: Arc::new(Mutex::new(Vec::new())),
            audit: Arc::new(Mutex::new(Vec::new())),
            work: tempfile::tempdir().expect("work"),
        }
    }

    fn registry(&self) -> ComponentRegistry {
        let mut registry = ComponentRegistry::new();
        for (implementation, broken) in [("test.service", false), ("test.broken", true)] {
            let log = Arc::clone(&self.log);
            registry.register(implementation, move |context| {
                if let Some(configuration) = &context.configuration {
                    log.lock()
                        .push(format!("configure {} {}", context.node.name, configuration));
                }
                Ok(Service {
                    name: context.node.name.clone(),
                    broken,
                    log: Arc::clone(&log),
                })
            });
        }
        let audit = Arc::clone(&self.audit);
        registry.register_listener("test.audit", move |context: &ListenerContext| {
            let label = context
                .configuration
                .as_ref()
                .and_then(|configuration| configuration.get("label"))
                .and_then(|label| label.as_str())
                .unwrap_or("none")
                .to_string();
            Ok(Audit {
                label,
                log: Arc::clone(&audit),
            })
        });
        registry
    }

    fn pipeline(&self, recorder: Arc<dyn DeploymentRecorder>) -> DeploymentPipeline {
        DeploymentPipeline::new(
            Arc::new(DirectoryInstaller::new(self.work.path())),
            recorder,
            self.registry(),
        )
    }

    fn work_dirs(&self) -> usize {
        fs::read_dir(self.work.path()).expect("work root").count()
    }

    fn log(&self) -> Vec<String> {
        self.log.lock().clone()
    }
}

fn application(assembly: &str, config: Option<&str>, environment: Option<&str>) -> TempDir {
    let app = tempfile::tempdir().expect("app");
    fs::create_dir_all(app.path().join("conf")).expect("mkdir");
    fs::create_dir_all(app.path().join("lib")).expect("mkdir");
    fs::write(app.path().join("conf/assembly.toml"), assembly).expect("assembly");
    if let Some(config) = config {
        fs::write(app.path().join("conf/config.toml"), config).expect("config");
    }
    if let Some(environment) = environment {
        fs::write(app.path().join("conf/environment.toml"), environment).expect("environment");
    }
    fs::write(app.path().join("lib/a.jar"), b"PK").expect("archive");
    app
}

#[test]
fn deploy_starts_the_unit_and_undeploy_removes_it() {
    let fixture = Fixture::new();
    let recorder = Arc::new(MemoryDeploymentRecorder::new());
    let mut pipeline = fixture.pipeline(recorder.clone());
    let app = application(ASSEMBLY, Some(CONFIG), Some(ENVIRONMENT));

    pipeline.deploy("billing", app.path()).expect("deploy");
    assert_eq!(pipeline.kernel_state("billing"), Some(KernelState::Started));
    assert_eq!(pipeline.deployed_names(), vec!["billing".to_string()]);
    assert_eq!(
        fixture.log(),
        vec![
            r#"configure web {"port":8080}"#,
            "start db",
            "start web"
        ]
    );
    assert_eq!(
        pipeline.configuration().get("billing", "web"),
        Some(json!({ "port": 8080 }))
    );

    let unit = pipeline.unit("billing").expect("unit");
    let work_dir = unit.installation().work_directory.clone();
    assert!(work_dir.is_dir());
    assert!(recorder.fetch_installation("billing").is_some());
    let archive = app.path().join("lib/a.jar");
    let scratch = Permission::new("file")
        .with_target(format!("{}/cache/index", work_dir.display()))
        .with_actions("write");
    unit.domain()
        .check_permission(&archive, &scratch)
        .expect("archive may write below its work directory");
    assert!(unit
        .domain()
        .check_permission(&archive, &Permission::new("file").with_target("/etc/passwd"))
        .is_err());

    pipeline.undeploy("billing").expect("undeploy");
    assert!(!work_dir.exists());
    assert!(recorder.fetch_installation("billing").is_none());
    assert!(pipeline.configuration().components("billing").is_empty());
    assert!(pipeline.deployed_names().is_empty());
    assert_eq!(&fixture.log()[3..], &["stop web", "stop db"]);
    assert!(fixture
        .audit
        .lock()
        .contains(&"ops billing started".to_string()));
    assert!(matches!(
        pipeline.undeploy("billing"),
        Err(DeploymentError::NotDeployed(_))
    ));
}

#[test]
fn deploying_a_running_name_leaves_it_untouched() {
    let fixture = Fixture::new();
    let mut pipeline = fixture.pipeline(Arc::new(MemoryDeploymentRecorder::new()));
    let app = application(ASSEMBLY, Some(CONFIG), None);

    pipeline.deploy("billing", app.path()).expect("deploy");
    let first = pipeline.unit("billing").expect("unit").id();
    let err = pipeline
        .deploy("billing", app.path())
        .expect_err("already deployed");
    assert!(matches!(err, DeploymentError::AlreadyDeployed(name) if name == "billing"));
    assert_eq!(pipeline.unit("billing").expect("unit").id(), first);
    assert_eq!(pipeline.kernel_state("billing"), Some(KernelState::Started));
    assert_eq!(fixture.work_dirs(), 1);
    pipeline.dispose();
}

#[test]
fn verification_failure_rolls_back_a_fresh_install() {
    let fixture = Fixture::new();
    let recorder = Arc::new(MemoryDeploymentRecorder::new());
    let mut pipeline = fixture.pipeline(recorder.clone());
    let config = format!("{CONFIG}\n[ghost]\nenabled = true\n");
    let app = application(ASSEMBLY, Some(&config), None);

    let err = pipeline
        .deploy("billing", app.path())
        .expect_err("unknown configuration entry");
    assert_eq!(err.stage(), Some(DeploymentStage::Verified));
    match err {
        DeploymentError::Stage {
            source: StageFailure::Verify(VerifyError::ExtraConfiguration(name)),
            ..
        } => assert_eq!(name, "ghost"),
        other => panic!("unexpected error: {other}"),
    }
    assert!(recorder.fetch_installation("billing").is_none());
    assert_eq!(fixture.work_dirs(), 0);
    assert!(pipeline.deployed_names().is_empty());
    assert!(fixture.log().is_empty());
}

#[test]
fn unreadable_descriptor_fails_the_install_stage() {
    let fixture = Fixture::new();
    let recorder = Arc::new(MemoryDeploymentRecorder::new());
    let mut pipeline = fixture.pipeline(recorder.clone());
    let app = application(ASSEMBLY, Some(CONFIG), Some("[classpath\nincludes = "));

    let err = pipeline
        .deploy("billing", app.path())
        .expect_err("broken environment descriptor");
    assert_eq!(err.stage(), Some(DeploymentStage::Installed));
    assert!(matches!(
        err,
        DeploymentError::Stage {
            source: StageFailure::Descriptor(_),
            ..
        }
    ));
    assert!(recorder.fetch_installation("billing").is_none());
    assert_eq!(fixture.work_dirs(), 0);
}

#[test]
fn classpath_escaping_the_roots_fails_before_the_domain_is_built() {
    let fixture = Fixture::new();
    let mut pipeline = fixture.pipeline(Arc::new(MemoryDeploymentRecorder::new()));
    let app = application(ASSEMBLY, Some(CONFIG), None);
    let escape = "../".repeat(app.path().components().count() + 1);
    let environment = format!("[classpath]\nincludes = [\"{escape}etc/*\"]\n");
    fs::write(app.path().join("conf/environment.toml"), environment).expect("environment");

    let err = pipeline
        .deploy("billing", app.path())
        .expect_err("pattern climbs above the base root");
    assert_eq!(err.stage(), Some(DeploymentStage::ClasspathResolved));
    assert!(matches!(
        err,
        DeploymentError::Stage {
            source: StageFailure::Domain(DomainError::InvalidPath(_)),
            ..
        }
    ));
    assert_eq!(fixture.work_dirs(), 0);
}

#[test]
fn startup_failure_is_reported_at_the_ready_stage() {
    let fixture = Fixture::new();
    let recorder = Arc::new(MemoryDeploymentRecorder::new());
    let mut pipeline = fixture.pipeline(recorder.clone());
    let assembly = ASSEMBLY.replacen("test.service", "test.broken", 1);
    let app = application(&assembly, Some(CONFIG), None);

    let err = pipeline.deploy("billing", app.path()).expect_err("web fails");
    assert_eq!(err.stage(), Some(DeploymentStage::Ready));
    assert!(matches!(
        err,
        DeploymentError::Stage {
            source: StageFailure::Kernel(_),
            ..
        }
    ));
    assert_eq!(
        fixture.log(),
        vec![r#"configure web {"port":8080}"#, "start db", "stop db"]
    );
    assert!(pipeline.configuration().components("billing").is_empty());
    assert!(recorder.fetch_installation("billing").is_none());
    assert_eq!(fixture.work_dirs(), 0);
}

#[test]
fn unsatisfied_extension_fails_until_the_index_provides_it() {
    let fixture = Fixture::new();
    let app = application(ASSEMBLY, None, None);
    fs::write(
        app.path().join("lib/a.jar.manifest"),
        "Extension-List: codec\ncodec-Extension-Name: com.acme.codec\n",
    )
    .expect("manifest");

    let mut pipeline = fixture.pipeline(Arc::new(MemoryDeploymentRecorder::new()));
    let err = pipeline.deploy("billing", app.path()).expect_err("codec missing");
    assert_eq!(err.stage(), Some(DeploymentStage::DomainBuilt));
    assert!(matches!(
        err,
        DeploymentError::Stage {
            source: StageFailure::Domain(DomainError::UnsatisfiedExtension { .. }),
            ..
        }
    ));

    let packages = tempfile::tempdir().expect("packages");
    fs::write(packages.path().join("codec.jar"), b"PK").expect("archive");
    fs::write(
        packages.path().join("codec.jar.manifest"),
        "Extension-Name: com.acme.codec\n",
    )
    .expect("manifest");
    let index = ExtensionIndex::scan(packages.path(), &ManifestFileInspector).expect("index");
    let mut pipeline = pipeline.with_extensions(index);
    pipeline.deploy("billing", app.path()).expect("codec provided");
    let unit = pipeline.unit("billing").expect("unit");
    assert!(unit.domain().find_resource("codec.jar").is_some());
    pipeline.dispose();
}

#[test]
fn recorded_installation_is_reused_after_dispose() {
    let fixture = Fixture::new();
    let recorder: Arc<dyn DeploymentRecorder> = Arc::new(MemoryDeploymentRecorder::new());
    let app = application(ASSEMBLY, Some(CONFIG), None);

    let mut first = fixture.pipeline(Arc::clone(&recorder));
    first.deploy("billing", app.path()).expect("deploy");
    let work_dir = first
        .unit("billing")
        .expect("unit")
        .installation()
        .work_directory
        .clone();
    first.dispose();
    assert_eq!(first.kernel_state("billing"), None);
    assert!(work_dir.is_dir());

    let mut second = fixture.pipeline(Arc::clone(&recorder));
    second.deploy("billing", app.path()).expect("redeploy from record");
    assert_eq!(
        second
            .unit("billing")
            .expect("unit")
            .installation()
            .work_directory,
        work_dir
    );
    assert_eq!(fixture.work_dirs(), 1);
    second.dispose();
}

#[test]
fn redeploy_installs_a_fresh_unit() {
    let fixture = Fixture::new();
    let mut pipeline = fixture.pipeline(Arc::new(MemoryDeploymentRecorder::new()));
    let app = application(ASSEMBLY, Some(CONFIG), None);

    pipeline.deploy("billing", app.path()).expect("deploy");
    let before = pipeline.unit("billing").expect("unit");
    pipeline.redeploy("billing").expect("redeploy");
    let after = pipeline.unit("billing").expect("unit");

    assert_ne!(before.id(), after.id());
    assert_ne!(
        before.installation().work_directory,
        after.installation().work_directory
    );
    assert!(!before.installation().work_directory.exists());
    assert_eq!(pipeline.kernel_state("billing"), Some(KernelState::Started));
    assert!(matches!(
        pipeline.redeploy("unknown"),
        Err(DeploymentError::NotDeployed(_))
    ));
    pipeline.dispose();
}

#[test]
fn pipeline_from_config_records_installations_in_sqlite() {
    let fixture = Fixture::new();
    let state = tempfile::tempdir().expect("state");
    let db_path = state.path().join("db/installations.sqlite3");
    let config = KernelConfig {
        work_dir: fixture.work.path().to_path_buf(),
        recorder_db: Some(db_path.clone()),
        ..KernelConfig::default()
    };
    let app = application(ASSEMBLY, Some(CONFIG), None);

    let mut pipeline =
        DeploymentPipeline::from_config(&config, fixture.registry()).expect("pipeline");
    pipeline.deploy("billing", app.path()).expect("deploy");

    let reader = SqliteDeploymentRecorder::open(&db_path).expect("open");
    assert_eq!(
        reader.recorded_names().expect("names"),
        vec!["billing".to_string()]
    );
    let recorded = reader.fetch_installation("billing").expect("record");
    assert_eq!(recorded.source, app.path());
    assert_eq!(recorded.resources.len(), 1);
    pipeline.dispose();
}

#[test]
fn observers_see_every_deployed_kernel() {
    let fixture = Fixture::new();
    let mut pipeline = fixture.pipeline(Arc::new(MemoryDeploymentRecorder::new()));
    let seen: Log = Arc::new(Mutex::new(Vec::new()));
    pipeline.add_observer(Arc::new(Audit {
        label: "observer".to_string(),
        log: Arc::clone(&seen),
    }));

    let billing = application(ASSEMBLY, None, None);
    let orders = application(ASSEMBLY, None, None);
    pipeline.deploy("billing", billing.path()).expect("billing");
    pipeline.deploy("orders", orders.path()).expect("orders");
    pipeline.dispose();

    let seen = seen.lock().clone();
    for unit in ["billing", "orders"] {
        assert!(seen.contains(&format!("observer {unit} started")));
        assert!(seen.contains(&format!("observer {unit} stopped")));
    }
}
