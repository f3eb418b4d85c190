//! ARBOR CLI
//!
//! Runs transaction scenarios against the in-memory simulated cluster.

#![warn(missing_docs)]
#![warn(clippy::all)]

mod scenario;

use arbor_core::ClientConfig;
use clap::{Parser, Subcommand};
use color_eyre::Result;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "arbor")]
#[command(about = "ARBOR - transactional client for tree-structured clusters", long_about = None)]
struct Cli {
    /// Client configuration file (JSON); defaults apply to missing fields
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Nested transactions, a commit and a scope cancellation
    Demo,
    /// Tablet writes through a flaky cluster
    Chaos {
        /// Seed of the failure model
        #[arg(long, default_value_t = 42)]
        seed: u64,
        /// Fault probability per call
        #[arg(long, default_value_t = 0.3)]
        probability: f64,
        /// Rows to write, one tablet transaction each
        #[arg(long, default_value_t = 100)]
        rows: usize,
    },
    /// Print the effective configuration
    Config,
}

fn load_config(path: Option<&PathBuf>) -> Result<ClientConfig> {
    match path {
        Some(path) => {
            let text = std::fs::read_to_string(path)?;
            Ok(ClientConfig::from_json_str(&text)?)
        }
        None => Ok(ClientConfig::new()),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("arbor=info")),
        )
        .init();

    let config = load_config(cli.config.as_ref())?;
    match cli.command {
        Commands::Demo => scenario::demo(config).await,
        Commands::Chaos {
            seed,
            probability,
            rows,
        } => scenario::chaos(config, seed, probability, rows).await,
        Commands::Config => {
            println!("{}", serde_json::to_string_pretty(&config)?);
            Ok(())
        }
    }
}
