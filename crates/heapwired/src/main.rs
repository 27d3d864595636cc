//! heapwired — telemetry and heap-snapshot transfer daemon.
//!
//! `serve` runs the instrumented-process side with demo producers;
//! `attach` runs the tool side and writes received snapshots to disk.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use heapwire_core::config::HeapwireConfig;

mod client;
mod demo;
mod net;
mod server;
mod sink;
mod transfer;

#[derive(Parser)]
#[command(name = "heapwired", about = "Heap telemetry and snapshot transfer daemon")]
struct Cli {
    /// Configuration file (default: $XDG_CONFIG_HOME/heapwire/config.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve statistics and snapshots from this process
    Serve,

    /// Connect to a server and receive its statistics and snapshots
    Attach {
        /// Request a snapshot every N seconds
        #[arg(long, value_name = "SECS")]
        snapshot_every: Option<u64>,
    },

    /// Print the effective configuration
    Config {
        /// Write the default configuration file if none exists
        #[arg(long)]
        write: bool,
    },
}

fn load_config(path: Option<&PathBuf>) -> HeapwireConfig {
    let loaded = match path {
        Some(path) => HeapwireConfig::load_from(path),
        None => HeapwireConfig::load(),
    };
    loaded.unwrap_or_else(|e| {
        tracing::warn!(error = %e, "failed to load config, using defaults");
        HeapwireConfig::default()
    })
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if cli.verbose {
            EnvFilter::new("debug")
        } else {
            EnvFilter::new("info")
        }
    });
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(filter)
        .init();

    let config = load_config(cli.config.as_ref());

    let (shutdown_tx, _) = tokio::sync::broadcast::channel::<()>(1);
    {
        let shutdown = shutdown_tx.clone();
        tokio::spawn(async move {
            tokio::signal::ctrl_c().await.ok();
            tracing::info!("shutdown signal received");
            let _ = shutdown.send(());
        });
    }

    match cli.command {
        Commands::Serve => {
            tracing::info!("heapwired serve starting");
            server::run(config, shutdown_tx.subscribe()).await
        }
        Commands::Attach { snapshot_every } => {
            tracing::info!("heapwired attach starting");
            let options = client::AttachOptions {
                snapshot_every: snapshot_every.filter(|s| *s > 0).map(Duration::from_secs),
            };
            client::run(config, options, shutdown_tx.subscribe()).await
        }
        Commands::Config { write } => {
            if write {
                let path = HeapwireConfig::write_default_if_missing()
                    .context("failed to write default config")?;
                println!("# {}", path.display());
            }
            let text = toml::to_string_pretty(&config).context("failed to serialize config")?;
            print!("{text}");
            Ok(())
        }
    }
}
