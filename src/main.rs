//! Thin admin entrypoint (§1 Non-goals: CLI entrypoints, REST/MCP handler
//! registration are external collaborators). This binary only bootstraps
//! the process and exposes the handful of operator commands needed to run
//! and inspect a tenant's worker: everything else is a library call made
//! by the collaborator that owns the real request surface.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde_json::json;
use sibyl::{worker, App};
use sibyl_common::config::SibylConfig;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "sibyl")]
#[command(version, about = "Multi-tenant knowledge-and-agent platform")]
struct Cli {
    /// Path to a sibyl.toml config file; falls back to defaults + env vars.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the agent orchestrator's health-check loop and the background
    /// job worker until interrupted.
    Serve {
        #[arg(long)]
        organization_id: String,
        #[arg(long)]
        project_id: String,
        #[arg(long)]
        repo_path: PathBuf,
        /// Consumer name this process claims jobs under; defaults to the
        /// hostname so multiple workers don't collide.
        #[arg(long)]
        consumer: Option<String>,
    },
    /// Report graph connectivity for a tenant.
    Health {
        #[arg(long)]
        organization_id: String,
    },
    /// Print entity counts by type for a tenant.
    Stats {
        #[arg(long)]
        organization_id: String,
    },
    /// Recreate the graph's vector and full-text indexes for a tenant.
    RebuildIndex {
        #[arg(long)]
        organization_id: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = SibylConfig::load(cli.config.as_deref()).context("failed to load configuration")?;
    if cli.verbose {
        config = config.with_verbose(true);
    }
    init_tracing(config.verbose);

    let app = Arc::new(App::bootstrap(config).await.context("failed to bootstrap sibyl")?);

    match cli.command {
        Commands::Serve { organization_id, project_id, repo_path, consumer } => {
            serve(app, organization_id, project_id, repo_path, consumer).await
        }
        Commands::Health { organization_id } => admin(&app, &organization_id, "health").await,
        Commands::Stats { organization_id } => admin(&app, &organization_id, "stats").await,
        Commands::RebuildIndex { organization_id } => admin(&app, &organization_id, "rebuild_index").await,
    }
}

fn init_tracing(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt().with_env_filter(filter).json().init();
}

async fn admin(app: &App, organization_id: &str, action: &str) -> Result<()> {
    let dispatcher = app.dispatcher(organization_id);
    let result = dispatcher.manage(action, organization_id, json!({})).await?;
    println!("{}", serde_json::to_string_pretty(&result.data)?);
    Ok(())
}

async fn serve(app: Arc<App>, organization_id: String, project_id: String, repo_path: PathBuf, consumer: Option<String>) -> Result<()> {
    let consumer = consumer.unwrap_or_else(|| {
        hostname_or_default().unwrap_or_else(|| format!("worker-{}", std::process::id()))
    });

    let runtime = sibyl_agent::mock_runtime();
    let orchestrator = Arc::new(app.orchestrator(runtime, organization_id, project_id, repo_path));
    orchestrator.start().await.context("failed to start agent orchestrator")?;

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    let worker_handle = tokio::spawn(worker::run(app.clone(), consumer, shutdown_rx));

    tokio::signal::ctrl_c().await.context("failed to listen for shutdown signal")?;
    tracing::info!("shutdown signal received");

    shutdown_tx.send(true).ok();
    worker_handle.await.context("job worker task panicked")?;
    orchestrator.stop().await.context("failed to stop agent orchestrator")?;
    Ok(())
}

fn hostname_or_default() -> Option<String> {
    std::env::var("HOSTNAME").ok().filter(|s| !s.is_empty())
}
