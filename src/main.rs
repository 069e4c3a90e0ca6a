//! Lattice CLI entry point

use clap::Parser;
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod commands;

#[derive(Parser)]
#[command(name = "lattice")]
#[command(about = "Continuous source-graph synchronization for TypeScript/JavaScript/CSS projects", long_about = None)]
struct Cli {
    /// Root directory of the codebase to monitor (defaults to current directory)
    #[arg(default_value = ".")]
    root: PathBuf,

    /// Graph sink driver
    #[arg(long, default_value = "memory")]
    sink: String,

    /// Enable batch processing
    #[arg(long)]
    enable_batch: bool,

    /// Batch size
    #[arg(long, default_value = "50")]
    batch_size: usize,

    /// Batch flush interval in seconds
    #[arg(long, default_value = "10")]
    batch_interval: u64,

    /// Apply only entity-level deltas to the sink
    #[arg(long)]
    enable_diff: bool,

    /// Poll the git working copy for changes
    #[arg(long)]
    enable_git: bool,

    /// Keep per-file embedding chunks
    #[arg(long)]
    embeddings: bool,

    /// Control API port (0 disables the API server)
    #[arg(long, default_value = "8080")]
    api_port: u16,

    /// Host to bind the control API to
    #[arg(long, default_value = "127.0.0.1")]
    host: String,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let log_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(log_level))
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("lattice v{}", env!("CARGO_PKG_VERSION"));
    commands::serve(cli).await
}
