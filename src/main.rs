//! multicopy: mirrors open positions from source trading accounts onto
//! target accounts, keeping opens, closes, and stop-level edits in sync.

mod config;
mod error;
mod models;
mod orchestrator;
mod sync;
mod venue;

use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

use crate::config::AppConfig;
use crate::orchestrator::Orchestrator;
use crate::venue::{PooledVenue, SimVenue};

static FILE_GUARD: OnceLock<WorkerGuard> = OnceLock::new();

/// Position mirroring CLI.
#[derive(Parser)]
#[command(name = "multicopy")]
#[command(about = "Mirror open positions between trading accounts", long_about = None)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, default_value = "config.json")]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Append logs to this file in addition to the console
    #[arg(long)]
    log_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a configuration template and exit
    Init,

    /// Load and validate the configuration
    Check,

    /// Start mirroring all configured pairs
    Run,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_tracing(&cli.log_level, cli.log_file.as_deref())?;

    match cli.command {
        Commands::Init => {
            if cli.config.exists() {
                anyhow::bail!("refusing to overwrite existing {}", cli.config.display());
            }
            AppConfig::template().write(&cli.config)?;
            println!(
                "Template written to {}. Fill in the accounts before running.",
                cli.config.display()
            );
        }

        Commands::Check => {
            let config = AppConfig::load(&cli.config)?;
            println!("{} pair(s) configured:", config.copy_pairs.len());
            for pair in &config.copy_pairs {
                println!(
                    "  {:<12} {} -> {}  (interval {} ms, multiplier {})",
                    pair.id,
                    pair.source.key(),
                    pair.target.key(),
                    pair.settings.sync_interval_ms,
                    pair.settings.volume_multiplier,
                );
            }
        }

        Commands::Run => {
            let config = AppConfig::load(&cli.config)?;
            run(config).await;
        }
    }

    Ok(())
}

async fn run(config: AppConfig) {
    // The simulated venue is the built-in backend; real venue connectors
    // implement `VenueTransport` and slot in here unchanged.
    let transport = Arc::new(SimVenue::new());
    let venue = Arc::new(PooledVenue::new(transport));

    tokio::spawn(venue.pool().run_janitor());

    let orchestrator = Orchestrator::new(config, venue);
    orchestrator.run().await;
}

/// Console layer plus an optional non-blocking file layer, so log writes
/// never stall a reconciliation cycle.
fn init_tracing(filter: &str, log_file: Option<&Path>) -> Result<()> {
    let console = fmt::layer()
        .with_target(false)
        .with_filter(EnvFilter::new(filter));

    if let Some(path) = log_file {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("failed to open log file {}", path.display()))?;
        let (writer, guard) = tracing_appender::non_blocking(file);
        let _ = FILE_GUARD.set(guard);
        let file_layer = fmt::layer()
            .with_ansi(false)
            .with_writer(writer)
            .with_filter(EnvFilter::new(filter));
        tracing_subscriber::registry()
            .with(console)
            .with(file_layer)
            .try_init()?;
    } else {
        tracing_subscriber::registry().with(console).try_init()?;
    }

    Ok(())
}
