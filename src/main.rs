//! Fleetwright CLI entry point.

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use fleetwright::api::{self, AppState};
use fleetwright::domain::ports::NullActivityStatusSource;
use fleetwright::infrastructure::config::{ConfigLoader, EngineConfig};
use fleetwright::infrastructure::logging::Logger;
use fleetwright::infrastructure::{BroadcastEventBus, RedisStateStore};
use fleetwright::services::{Scheduler, WorkflowRegistry};

#[derive(Parser)]
#[command(name = "fleetwright")]
#[command(about = "DAG-driven workflow engine for bulk fleet configuration", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the HTTP server (plan/confirm/graph/status/stream/cancel/delete surface)
    Serve {
        /// Bind address
        #[arg(long, default_value = "0.0.0.0")]
        host: String,

        /// Bind port
        #[arg(short, long, default_value_t = 8080)]
        port: u16,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = ConfigLoader::load().context("failed to load configuration")?;
    let _logger = Logger::init(&config.logging).context("failed to initialize logging")?;

    match cli.command {
        Commands::Serve { host, port } => serve(config, host, port).await,
    }
}

/// Boots the HTTP surface with an empty [`WorkflowRegistry`] and a
/// [`NullActivityStatusSource`]. Registering real workflows, phase
/// executors, and an upstream-backed activity source is the embedding
/// application's job (spec §1: phase bodies and the upstream client are out
/// of scope here) — this binary exists to exercise the engine end to end,
/// not to ship a complete fleet-automation product on its own.
async fn serve(config: EngineConfig, host: String, port: u16) -> Result<()> {
    let state_store =
        Arc::new(RedisStateStore::connect(&config.redis_url, config.job_ttl_s, config.job_lock_ttl_s, config.unit_lock_ttl_s).await?);
    let event_bus = BroadcastEventBus::new();
    let registry = Arc::new(WorkflowRegistry::new());
    let activity_source = Arc::new(NullActivityStatusSource::new());

    let scheduler = Arc::new(Scheduler::new(
        registry.clone(),
        state_store.clone(),
        Arc::new(event_bus.clone()),
        activity_source,
        config.clone(),
    ));

    let app_state = AppState { scheduler, state_store, registry, event_bus, config };
    let app = api::router(app_state);

    let addr = format!("{host}:{port}");
    let listener = tokio::net::TcpListener::bind(&addr).await.with_context(|| format!("failed to bind to {addr}"))?;
    tracing::info!(%addr, "fleetwright listening");

    axum::serve(listener, app).await.context("server error")?;
    Ok(())
}
