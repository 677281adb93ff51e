//! BLP Monitor entry point.
//!
//! Provides `start`, `levels`, and `check-config` subcommands for running
//! the reference monitor, printing the clearance scale, or validating a
//! configuration file.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::info;

use blp_monitor::config::{MonitorConfig, StoreBackend};
use blp_monitor::kernel::{Dispatcher, PolicyEngine, Registry};
use blp_monitor::logging;
use blp_monitor::server::Server;
use blp_monitor::store::sqlite::SqliteStore;
use blp_monitor::store::{hydrate, InMemoryStore, LabelStore};

/// BLP Monitor: Bell–LaPadula access control reference monitor.
#[derive(Parser)]
#[command(name = "blp-monitor", version, about)]
struct Cli {
    /// Subcommand to execute.
    #[command(subcommand)]
    command: Command,
}

/// Available CLI subcommands.
#[derive(Subcommand)]
enum Command {
    /// Run the monitor and serve requests until Ctrl-C.
    Start {
        /// Config file (defaults to `$BLP_CONFIG_PATH` or `./blp-monitor.toml`).
        #[arg(long)]
        config: Option<PathBuf>,
    },
    /// Print the configured clearance scale.
    Levels {
        /// Config file.
        #[arg(long)]
        config: Option<PathBuf>,
    },
    /// Load and validate the configuration, then print the effective settings.
    CheckConfig {
        /// Config file.
        #[arg(long)]
        config: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Command::Start { config } => handle_start(config).await,
        Command::Levels { config } => handle_levels(config),
        Command::CheckConfig { config } => handle_check_config(config),
    }
}

/// Run the monitor.
async fn handle_start(config_path: Option<PathBuf>) -> anyhow::Result<()> {
    let config =
        MonitorConfig::load(config_path.as_deref()).context("failed to load configuration")?;

    let _logging_guard = match &config.logging.dir {
        Some(dir) => Some(logging::init_production(dir, &config.logging.level)?),
        None => {
            logging::init_cli(&config.logging.level);
            None
        }
    };

    let settings = config.policy_settings()?;
    info!(
        mode = %settings.mode,
        write_rule = %settings.write_rule,
        categories = settings.categories,
        levels = settings.scale.len(),
        "blp monitor starting"
    );

    let store: Arc<dyn LabelStore> = match config.store.backend {
        StoreBackend::Memory => Arc::new(InMemoryStore::new()),
        StoreBackend::Sqlite => {
            let path = config.store.resolved_path()?;
            info!(path = %path.display(), "opening label store");
            Arc::new(
                SqliteStore::open(&path)
                    .await
                    .with_context(|| format!("failed to open {}", path.display()))?,
            )
        }
    };

    let engine = PolicyEngine::new(Arc::new(Registry::new()), settings);
    let snapshot = store.load().await.context("failed to load stored labels")?;
    hydrate(&engine, snapshot);

    let listener = tokio::net::TcpListener::bind(config.listen_addr())
        .await
        .with_context(|| format!("failed to bind {}", config.listen_addr()))?;

    let server = Arc::new(Server::new(
        Dispatcher::new(engine),
        store,
        config.server.max_line_bytes,
    ));
    server
        .serve(listener, async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "failed to listen for ctrl-c");
            }
        })
        .await
        .context("server failed")?;

    info!("blp monitor stopped");
    Ok(())
}

/// Print the clearance scale, lowest level first.
fn handle_levels(config_path: Option<PathBuf>) -> anyhow::Result<()> {
    logging::init_cli("warn");
    let config =
        MonitorConfig::load(config_path.as_deref()).context("failed to load configuration")?;
    let settings = config.policy_settings()?;
    for (level, name) in settings.scale.iter() {
        println!("{level}\t{name}");
    }
    Ok(())
}

/// Validate the configuration and print what would be used.
fn handle_check_config(config_path: Option<PathBuf>) -> anyhow::Result<()> {
    logging::init_cli("warn");
    let config =
        MonitorConfig::load(config_path.as_deref()).context("failed to load configuration")?;
    let settings = config.policy_settings()?;

    println!("mode:        {}", settings.mode);
    println!("write rule:  {}", settings.write_rule);
    println!("categories:  {}", settings.categories);
    println!("levels:      {}", config.kernel.levels.join(", "));
    println!("listen:      {}", config.listen_addr());
    match config.store.backend {
        StoreBackend::Memory => println!("store:       memory"),
        StoreBackend::Sqlite => {
            println!("store:       sqlite ({})", config.store.resolved_path()?.display());
        }
    }
    println!("config OK");
    Ok(())
}
