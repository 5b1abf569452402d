//! HTTP execution service.

use anyhow::Context;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;

use stagehost::config::{ServiceConfig, CONFIG_ENV};
use stagehost::observability::init_tracing;
use stagehost::runner::{application_dir, bootstrap_loader};
use stagehost::service::{build_router, AppState};

/// Serves pipeline execution and stage discovery over HTTP
#[derive(Parser)]
#[command(name = "stagehost-server", version, about)]
struct Cli {
    /// Settings file (TOML). Falls back to $STAGEHOST_CONFIG, then built-in defaults.
    #[arg(short, long)]
    config: Option<PathBuf>,
    /// Override the listen host
    #[arg(long)]
    host: Option<String>,
    /// Override the listen port
    #[arg(short, long)]
    port: Option<u16>,
    /// Override the document root
    #[arg(long)]
    docroot: Option<PathBuf>,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config_path = cli
        .config
        .or_else(|| std::env::var_os(CONFIG_ENV).map(PathBuf::from));
    let mut config = match &config_path {
        Some(path) => ServiceConfig::load(path).context("Cannot start without its settings file")?,
        None => ServiceConfig::default(),
    };
    if let Some(host) = cli.host {
        config.listener.host = host;
    }
    if let Some(port) = cli.port {
        config.listener.port = port;
    }
    if let Some(docroot) = cli.docroot {
        config.docroot.path = Some(docroot);
    }

    let _guard = init_tracing(&config.logging);
    if let Some(path) = &config_path {
        tracing::info!(path = %path.display(), "Settings loaded");
    }

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(config.listener.min_threads.max(1))
        .max_blocking_threads(config.listener.max_threads.max(1))
        .enable_all()
        .build()
        .context("Failed to start the async runtime")?;
    runtime.block_on(serve(config))
}

async fn serve(config: ServiceConfig) -> anyhow::Result<()> {
    let (loader, report) = bootstrap_loader(&application_dir(), &config.plugins)?;
    if !report.is_clean() {
        tracing::warn!(failed = report.errors.len(), "Some modules failed to load");
    }

    let sweep_interval = config.sessions.sweep_interval();
    let address = config.listener.address();
    let state = Arc::new(AppState::new(config, loader));
    let sweeper = state.sessions.spawn_sweeper(sweep_interval);
    let app = build_router(state);

    let listener = tokio::net::TcpListener::bind(&address)
        .await
        .with_context(|| format!("Failed to bind {address}"))?;
    tracing::info!("listening on {}", listener.local_addr()?);
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!("Failed to listen for shutdown signal: {e}");
            }
        })
        .await?;

    sweeper.abort();
    tracing::info!("Server stopped");
    Ok(())
}
