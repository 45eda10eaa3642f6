//! guardiand — the Guardian-IO daemon.
//!
//! Single binary that assembles the workspace:
//! - State store (redb) with its change feed
//! - Live map view, mounted for the lifetime of the server
//! - REST API + realtime websocket + dashboard
//!
//! # Usage
//!
//! ```text
//! guardiand --config /etc/guardian/guardian.toml serve --port 8443
//! guardiand seed --data-dir /var/lib/guardian
//! ```

mod seed;

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use guardian_core::GuardianConfig;
use guardian_core::config::LoggingConfig;
use guardian_live::map::{LayerEngine, MapEngine};
use guardian_live::view::{EngineFactory, LiveMapView, ViewConfig};
use guardian_live::MapStyle;
use guardian_state::StateStore;
use tracing::{error, info, warn};

const DEFAULT_FILTER: &str = "info,guardiand=debug,guardian=debug";
const DB_FILE: &str = "guardian.redb";

#[derive(Parser)]
#[command(name = "guardiand", about = "Guardian-IO daemon")]
struct Cli {
    /// Path to guardian.toml. Built-in defaults are used when absent.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Serve the API, dashboard and live map.
    Serve {
        /// Port to listen on (overrides `[server] port`).
        #[arg(long)]
        port: Option<u16>,

        /// Data directory for persistent state (overrides `[server] data_dir`).
        #[arg(long)]
        data_dir: Option<PathBuf>,

        /// Log format: "pretty" or "json" (overrides `[logging] format`).
        #[arg(long)]
        log_format: Option<String>,
    },

    /// Load demo supply-chain nodes, routes, metrics and risk zones.
    Seed {
        #[arg(long)]
        data_dir: Option<PathBuf>,
    },

    /// Print the effective configuration as TOML.
    PrintConfig,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let mut config = load_config(cli.config.as_deref())?;

    match cli.command {
        Command::Serve {
            port,
            data_dir,
            log_format,
        } => {
            if let Some(port) = port {
                config.server.port = port;
            }
            if let Some(dir) = data_dir {
                config.server.data_dir = dir;
            }
            if let Some(format) = log_format {
                config.logging.format = format;
            }
            init_tracing(&config.logging);
            run_server(config).await
        }
        Command::Seed { data_dir } => {
            if let Some(dir) = data_dir {
                config.server.data_dir = dir;
            }
            init_tracing(&config.logging);
            let store = open_store(&config.server.data_dir)?;
            let report = seed::seed_demo_data(&store)?;
            info!(
                inserted = report.inserted,
                skipped = report.skipped,
                "demo data loaded"
            );
            Ok(())
        }
        Command::PrintConfig => {
            print!("{}", config.to_toml_string()?);
            Ok(())
        }
    }
}

fn load_config(path: Option<&Path>) -> anyhow::Result<GuardianConfig> {
    match path {
        Some(path) => GuardianConfig::from_file(path)
            .with_context(|| format!("loading {}", path.display())),
        None => Ok(GuardianConfig::default()),
    }
}

fn init_tracing(logging: &LoggingConfig) {
    let filter = logging
        .filter
        .as_deref()
        .and_then(|f| tracing_subscriber::EnvFilter::try_new(f).ok())
        .or_else(|| tracing_subscriber::EnvFilter::try_from_default_env().ok())
        .unwrap_or_else(|| tracing_subscriber::EnvFilter::new(DEFAULT_FILTER));

    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if logging.format == "json" {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn open_store(data_dir: &Path) -> anyhow::Result<StateStore> {
    std::fs::create_dir_all(data_dir)
        .with_context(|| format!("creating {}", data_dir.display()))?;
    let db_path = data_dir.join(DB_FILE);
    let store = StateStore::open(&db_path)?;
    info!(path = ?db_path, "state store opened");
    Ok(store)
}

async fn run_server(config: GuardianConfig) -> anyhow::Result<()> {
    info!("Guardian-IO daemon starting");

    // ── Initialize subsystems ──────────────────────────────────

    let store = open_store(&config.server.data_dir)?;

    let map_token = config.map_token();
    if map_token.is_none() {
        warn!(
            env = guardian_core::config::MAP_TOKEN_ENV,
            "no map access token configured, the risk map will be unavailable"
        );
    }
    let map_style = MapStyle::from_config(&config.map, map_token);

    // Live view.
    let engine = LayerEngine::new();
    let engine_factory: EngineFactory =
        Arc::new(move || Box::new(engine.clone()) as Box<dyn MapEngine>);
    let view = LiveMapView::new(
        Arc::new(store.clone()),
        Arc::new(store.clone()),
        engine_factory,
        ViewConfig::from_config(&config),
    );
    let live = Arc::new(view.mount());
    info!(generation = live.generation(), "live view mounted");

    // ── Start API server ───────────────────────────────────────

    let router = guardian_api::build_router(store, Some(live.clone()), map_style);
    let addr = SocketAddr::from(([0, 0, 0, 0], config.server.port));

    info!(%addr, "API server starting");

    let listener = tokio::net::TcpListener::bind(addr).await?;

    // Graceful shutdown on Ctrl-C.
    let server = axum::serve(listener, router).with_graceful_shutdown(async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "failed to listen for shutdown signal");
            std::future::pending::<()>().await;
        }
        info!("shutdown signal received");
    });

    server.await?;

    live.unmount();
    info!("Guardian-IO daemon stopped");
    Ok(())
}
