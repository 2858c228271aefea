//! syncd — the SyncGrid daemon.
//!
//! Single binary that assembles all SyncGrid subsystems:
//! - State store (redb)
//! - Status controller (one reconcile loop per sync target)
//! - Object sync controller (quarantine and eviction sweeps)
//! - REST API (registration, heartbeats, discovery, object transitions)
//!
//! # Usage
//!
//! ```text
//! syncd run --config /etc/syncgrid/syncd.toml --data-dir /var/lib/syncgrid
//! syncd print-config > syncd.toml
//! ```

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand, ValueEnum};
use tokio::sync::watch;
use tracing::{info, warn};

use syncgrid_api::ApiState;
use syncgrid_core::SyncdConfig;
use syncgrid_reconciler::{StatusController, StatusReconciler};
use syncgrid_state::StateStore;
use syncgrid_sync::ObjectSyncController;

#[derive(Parser)]
#[command(name = "syncd", about = "SyncGrid daemon")]
struct Cli {
    /// Log output format.
    #[arg(long, value_enum, default_value = "text", global = true)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Clone, Copy, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
enum Command {
    /// Run the control plane (all subsystems in one process).
    Run {
        /// Path to syncd.toml. Built-in defaults are used when omitted.
        #[arg(long)]
        config: Option<PathBuf>,

        /// Data directory for persistent state.
        #[arg(long, default_value = "/var/lib/syncgrid")]
        data_dir: PathBuf,

        /// Port to listen on (overrides `[api] port`).
        #[arg(long)]
        port: Option<u16>,
    },

    /// Print the effective configuration as TOML.
    PrintConfig {
        #[arg(long)]
        config: Option<PathBuf>,
    },
}

fn init_tracing(format: LogFormat) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info,syncd=debug,syncgrid=debug"));

    match format {
        LogFormat::Text => tracing_subscriber::fmt().with_env_filter(filter).init(),
        LogFormat::Json => tracing_subscriber::fmt().json().with_env_filter(filter).init(),
    }
}

fn load_config(path: Option<&PathBuf>) -> anyhow::Result<SyncdConfig> {
    match path {
        Some(path) => {
            let config = SyncdConfig::from_file(path)?;
            info!(path = ?path, "configuration loaded");
            Ok(config)
        }
        None => Ok(SyncdConfig::default()),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_format);

    match cli.command {
        Command::Run { config, data_dir, port } => {
            let config = load_config(config.as_ref())?;
            run(config, data_dir, port).await
        }
        Command::PrintConfig { config } => {
            let config = load_config(config.as_ref())?;
            print!("{}", config.to_toml_string()?);
            Ok(())
        }
    }
}

async fn run(config: SyncdConfig, data_dir: PathBuf, port: Option<u16>) -> anyhow::Result<()> {
    info!("SyncGrid daemon starting");

    // Ensure data directory exists.
    std::fs::create_dir_all(&data_dir)?;
    let db_path = config.store_path(&data_dir);

    // ── Initialize subsystems ──────────────────────────────────

    let store = StateStore::open(&db_path)?;
    info!(path = ?db_path, "state store opened");

    let settings = config.reconciler_settings();
    if settings.backoff_base > settings.backoff_max {
        warn!(
            base_ms = settings.backoff_base.as_millis() as u64,
            max_ms = settings.backoff_max.as_millis() as u64,
            "backoff_base exceeds backoff_max; delays are capped at backoff_max"
        );
    }
    let max_conflict_retries = settings.max_conflict_retries;
    info!(
        poll_ms = settings.poll_interval.as_millis() as u64,
        heartbeat_threshold_ms = settings.heartbeat_threshold.as_millis() as u64,
        external_url = %settings.external_url,
        "status reconciler configured"
    );

    let status_controller = Arc::new(StatusController::new(
        store.clone(),
        StatusReconciler::new(store.clone(), settings),
    ));
    let object_controller = ObjectSyncController::new(store.clone(), max_conflict_retries);
    let object_poll_interval = config.object_poll_interval();

    // ── Shutdown signal ────────────────────────────────────────

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let status_shutdown = shutdown_rx.clone();
    let object_shutdown = shutdown_rx;

    // ── Start background tasks ─────────────────────────────────

    let status_handle = {
        let controller = Arc::clone(&status_controller);
        tokio::spawn(async move {
            controller.run(status_shutdown).await;
        })
    };

    let object_handle = {
        let controller = object_controller.clone();
        tokio::spawn(async move {
            controller.run(object_poll_interval, object_shutdown).await;
        })
    };

    // ── Start API server ───────────────────────────────────────

    let router = syncgrid_api::router(ApiState::with_objects(store, object_controller));
    let addr = SocketAddr::from(([0, 0, 0, 0], port.unwrap_or_else(|| config.port())));

    info!(%addr, "API server starting");

    let listener = tokio::net::TcpListener::bind(addr).await?;

    // Graceful shutdown on Ctrl-C.
    let server = axum::serve(listener, router).with_graceful_shutdown(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "failed to listen for ctrl-c; shutting down");
        }
        info!("shutdown signal received");
        let _ = shutdown_tx.send(true);
    });

    server.await?;

    // Wait for background tasks.
    let _ = status_handle.await;
    let _ = object_handle.await;

    info!("SyncGrid daemon stopped");
    Ok(())
}
