//! burstcap CLI
//!
//! Command-line front end for the capture engine.
//!
//! # Usage
//!
//! ```bash
//! burstcap run --backend sim --sim-frames 10000 --limit 10000
//! burstcap run --backend af-packet --iface eth0 --cores 2 --batch-size 32
//! burstcap run --config capture.json --stats-json
//! burstcap check
//! ```

use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod commands;
mod output;

#[derive(Parser)]
#[command(name = "burstcap")]
#[command(version)]
#[command(about = "Polling packet capture", long_about = None)]
struct Cli {
    /// Debug logging (overridden by RUST_LOG)
    #[arg(long, short, global = true)]
    verbose: bool,

    /// Output format
    #[arg(long, short, global = true, default_value = "text")]
    format: output::OutputFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Capture until interrupted or a limit is reached
    Run(commands::run::RunArgs),
    /// Check the host environment for capture
    Check,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| default_level.into()),
        ))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    tracing::debug!("burstcap v{}", env!("CARGO_PKG_VERSION"));

    match cli.command {
        Commands::Run(args) => commands::run::execute(args, cli.format),
        Commands::Check => commands::check::execute(cli.format),
    }
}
