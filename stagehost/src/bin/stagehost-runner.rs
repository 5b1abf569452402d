//! Runs a pipeline file without a server.

use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use stagehost::config::{ServiceConfig, CONFIG_ENV};
use stagehost::messages::{MessageBus, TracingListener};
use stagehost::observability::init_tracing;
use stagehost::runner::{application_dir, bootstrap_loader, RunStatus, Runner};

/// Preflights and executes a pipeline JSON file
#[derive(Parser)]
#[command(name = "stagehost-runner", version, about)]
struct Cli {
    /// Pipeline file (.json)
    pipeline: PathBuf,
    /// Settings file (TOML); only [logging] and [plugins] are used
    #[arg(short, long)]
    config: Option<PathBuf>,
    /// Additional plugin directories
    #[arg(long = "plugin-path")]
    plugin_paths: Vec<PathBuf>,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let mut config = cli
        .config
        .or_else(|| std::env::var_os(CONFIG_ENV).map(PathBuf::from))
        .map(ServiceConfig::load_or_default)
        .unwrap_or_default();
    config.plugins.paths.extend(cli.plugin_paths);
    let _guard = init_tracing(&config.logging);

    let loader = match bootstrap_loader(&application_dir(), &config.plugins) {
        Ok((loader, _)) => loader,
        Err(e) => {
            eprintln!("Failed to register core stages: {e}");
            return ExitCode::from(u8::try_from(RunStatus::BuildFailed.exit_code()).unwrap_or(1));
        }
    };

    let bus = Arc::new(MessageBus::new());
    bus.subscribe(Arc::new(TracingListener::default()));

    let outcome = Runner::new(Arc::clone(loader.registry())).run_file(&cli.pipeline, bus);
    if outcome.status == RunStatus::Success {
        println!("{outcome}");
    } else {
        eprintln!("{outcome}");
    }
    ExitCode::from(u8::try_from(outcome.status.exit_code()).unwrap_or(1))
}
