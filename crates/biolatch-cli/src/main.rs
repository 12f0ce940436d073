//! Biolatch CLI - Main entry point
//!
//! Inspects and clears the device trust tier, and runs simulated concurrent
//! unlocks to show the serialization at work.

use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod commands;

use commands::Cli;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let default_filter = if cli.verbose {
        "biolatch_core=debug,biolatch=debug"
    } else {
        "biolatch_core=info,biolatch=info"
    };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    commands::run(cli).await
}
