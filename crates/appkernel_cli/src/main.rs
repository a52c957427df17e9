//! Command-line front end for the application kernel.
//!
//! # Responsibility
//! - Deploy one application directory and report its kernel states.
//! - Check an application's descriptors without starting anything.

use appkernel_core::assembly::{
    assemble_nodes, topological_order, verify_assembly, Component, ComponentError,
    ComponentRegistry, ListenerContext,
};
use appkernel_core::descriptor::ApplicationDescriptors;
use appkernel_core::{
    core_version, init_logging, DeploymentPipeline, KernelConfig, KernelListener,
    StateChangeEvent,
};
use clap::{Parser, Subcommand};
use log::info;
use std::error::Error;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

/// Implementation name of the built-in state-printing listener.
const PRINT_LISTENER: &str = "appkernel.print";
/// Implementation name of the built-in component that only logs.
const NOOP_COMPONENT: &str = "appkernel.noop";

#[derive(Debug, Parser)]
#[command(name = "appkernel", about = "Deploy component applications into a kernel")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Deploy an application, hold it running, then dispose it.
    Deploy {
        /// Kernel configuration file (TOML).
        #[arg(long)]
        config: Option<PathBuf>,
        /// How long the unit stays started before disposal.
        #[arg(long, default_value_t = 0)]
        hold_ms: u64,
        name: String,
        directory: PathBuf,
    },
    /// Validate an application's descriptors and print its start order.
    Check { name: String, directory: PathBuf },
    /// Print the kernel version.
    Version,
}

struct PrintListener {
    label: String,
}

impl KernelListener for PrintListener {
    fn on_state_changed(
        &self,
        event: &StateChangeEvent,
    ) -> Result<(), appkernel_core::kernel::ListenerError> {
        println!(
            "[{}] {} #{}: {} -> {}",
            self.label, event.unit, event.sequence, event.old_state, event.new_state
        );
        Ok(())
    }
}

struct NoopComponent {
    name: String,
}

impl Component for NoopComponent {
    fn start(&self) -> Result<(), ComponentError> {
        info!("event=component_start module=cli status=ok component={}", self.name);
        Ok(())
    }

    fn stop(&self) -> Result<(), ComponentError> {
        info!("event=component_stop module=cli status=ok component={}", self.name);
        Ok(())
    }
}

fn builtin_registry() -> ComponentRegistry {
    let mut registry = ComponentRegistry::new();
    registry.register(NOOP_COMPONENT, |context| {
        Ok(NoopComponent {
            name: context.node.name.clone(),
        })
    });
    registry.register_listener(PRINT_LISTENER, |context: &ListenerContext| {
        Ok(PrintListener {
            label: context.name.clone(),
        })
    });
    registry
}

fn deploy(
    config: Option<&Path>,
    hold: Duration,
    name: &str,
    directory: &Path,
) -> Result<(), Box<dyn Error>> {
    let config = match config {
        Some(path) => KernelConfig::load(path)?,
        None => KernelConfig::default().anchored_at(&std::env::current_dir()?),
    };
    if let Some(log_dir) = &config.log_dir {
        init_logging(&config.log_level, log_dir)?;
    }

    let mut pipeline = DeploymentPipeline::from_config(&config, builtin_registry())?;
    pipeline.add_observer(Arc::new(PrintListener {
        label: "kernel".to_string(),
    }));
    pipeline.deploy(name, directory)?;
    if let Some(unit) = pipeline.unit(name) {
        println!(
            "deployed {} ({}) components={}",
            unit.name(),
            unit.id(),
            unit.graph().started_components().join(",")
        );
    }
    std::thread::sleep(hold);
    pipeline.dispose();
    Ok(())
}

fn check(name: &str, directory: &Path) -> Result<(), Box<dyn Error>> {
    let descriptors = ApplicationDescriptors::load_dir(&directory.join("conf"))?;
    let nodes = assemble_nodes(&descriptors.assembly)?;
    let registry = builtin_registry();
    verify_assembly(
        name,
        &nodes,
        &descriptors.assembly.listeners,
        &descriptors.config,
        None,
    )?;
    for position in topological_order(&nodes)? {
        let node = &nodes[position];
        let marker = if registry.contains_component(&node.implementation) {
            " (built-in)"
        } else {
            ""
        };
        println!("{} {}{}", node.name, node.implementation, marker);
    }
    Ok(())
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    let result = match &cli.command {
        Command::Deploy {
            config,
            hold_ms,
            name,
            directory,
        } => deploy(
            config.as_deref(),
            Duration::from_millis(*hold_ms),
            name,
            directory,
        ),
        Command::Check { name, directory } => check(name, directory),
        Command::Version => {
            println!("appkernel {}", core_version());
            Ok(())
        }
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {err}");
            ExitCode::FAILURE
        }
    }
}
