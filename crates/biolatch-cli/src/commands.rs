//! CLI command implementations

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;

use biolatch_core::{
    BiolatchConfig, ExclusiveLock, FileStore, MemoryStore, RecencyCache, RecencyStatus,
    SimulatedCeremony, UnlockFacade,
};

/// Biolatch CLI - serialized biometric unlock tooling
#[derive(Parser)]
#[command(name = "biolatch")]
#[command(about = "Inspect device trust and exercise serialized biometric unlocks")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Path to configuration file
    #[arg(long, env = "BIOLATCH_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Show the device trust window
    Status {
        /// Print as JSON
        #[arg(long)]
        json: bool,
    },

    /// Record a successful verification in the device tier now
    Trust,

    /// Forget device trust (the session tier lives only inside each process)
    Clear,

    /// Run concurrent unlocks against a simulated ceremony
    Simulate {
        /// Number of concurrent callers
        #[arg(short = 'n', long, default_value_t = 3)]
        callers: usize,

        /// Duration of each simulated ceremony in milliseconds
        #[arg(long, default_value_t = 250)]
        ceremony_ms: u64,

        /// Cancel every Nth ceremony
        #[arg(long)]
        fail_every: Option<usize>,

        /// Name shown in the prompt (defaults to the configured one)
        #[arg(long)]
        display_name: Option<String>,
    },
}

/// Run the CLI
pub async fn run(cli: Cli) -> Result<()> {
    let config_path = cli.config.unwrap_or_else(BiolatchConfig::default_path);
    let config = BiolatchConfig::load_or_default(&config_path)
        .with_context(|| format!("Failed to load config from {}", config_path.display()))?;

    match cli.command {
        Commands::Status { json } => {
            let status = open_cache(&config)?.status();
            if json {
                println!("{}", serde_json::to_string_pretty(&status)?);
            } else {
                print_status(&config, &status);
            }
        }

        Commands::Trust => {
            let cache = open_cache(&config)?;
            cache.mark_long_success();
            if cache.is_long_expired() {
                anyhow::bail!(
                    "Could not record device trust at {}",
                    config.store_path.display()
                );
            }
            println!("Device trusted for {} days", config.long_ttl_days);
        }

        Commands::Clear => {
            let cache = open_cache(&config)?;
            cache.clear_long();
            if cache.status().long_verified_at.is_some() {
                anyhow::bail!(
                    "Could not clear device trust at {}",
                    config.store_path.display()
                );
            }
            println!("Device trust cleared");
        }

        Commands::Simulate {
            callers,
            ceremony_ms,
            fail_every,
            display_name,
        } => {
            let display_name = display_name.unwrap_or_else(|| config.display_name.clone());
            simulate(&config, callers, ceremony_ms, fail_every, display_name).await?;
        }
    }

    Ok(())
}

fn open_cache(config: &BiolatchConfig) -> Result<RecencyCache> {
    let device = FileStore::open(&config.store_path).with_context(|| {
        format!(
            "Failed to open device store at {}",
            config.store_path.display()
        )
    })?;
    Ok(RecencyCache::new(Arc::new(MemoryStore::new()), Arc::new(device))
        .with_ttl(config.ttl())
        .with_future_stamps_rejected(config.reject_future_stamps))
}

fn print_status(config: &BiolatchConfig, status: &RecencyStatus) {
    println!("Device store: {}", config.store_path.display());
    match status.long_verified_at {
        Some(at) => println!("Last verified: {}", at.to_rfc3339()),
        None => println!("Last verified: never"),
    }
    match status.long_remaining {
        Some(left) if !status.long_expired => {
            println!("Trusted: Yes ({} days left)", left.as_secs() / 86_400)
        }
        _ => println!("Trusted: No"),
    }
    println!(
        "Session window: {}s (not shared between processes)",
        config.short_ttl_secs
    );
}

async fn simulate(
    config: &BiolatchConfig,
    callers: usize,
    ceremony_ms: u64,
    fail_every: Option<usize>,
    display_name: String,
) -> Result<()> {
    let mut ceremony = SimulatedCeremony::new(Duration::from_millis(ceremony_ms));
    if let Some(n) = fail_every {
        ceremony = ceremony.failing_every(n);
    }
    let ceremony = Arc::new(ceremony);
    let facade = Arc::new(
        UnlockFacade::new(Arc::new(ExclusiveLock::new()), ceremony.clone())
            .with_acquire_timeout(config.acquire_timeout()),
    );

    info!(callers, ceremony_ms, "starting simulated unlocks");
    let started = Instant::now();
    let display_name = Arc::new(display_name);

    let handles: Vec<_> = (1..=callers)
        .map(|caller| {
            let facade = Arc::clone(&facade);
            let display_name = Arc::clone(&display_name);
            tokio::spawn(async move {
                let requested = Instant::now();
                let result = facade
                    .ensure_biometric_unlock_serialized(Some(display_name.as_str()))
                    .await;
                (caller, requested.elapsed(), result)
            })
        })
        .collect();

    for handle in handles {
        let (caller, took, result) = handle.await.context("Simulated caller panicked")?;
        match result {
            Ok(outcome) if outcome.verified => println!(
                "caller {caller}: verified ({}) after {took:?}",
                outcome.credential_id.unwrap_or_default()
            ),
            Ok(outcome) => println!(
                "caller {caller}: not verified ({}) after {took:?}",
                outcome.detail.unwrap_or_default()
            ),
            Err(e) => println!("caller {caller}: failed: {e} after {took:?}"),
        }
    }

    println!(
        "{} ceremonies in {:?} (peak concurrency {})",
        ceremony.calls(),
        started.elapsed(),
        ceremony.peak_in_flight()
    );
    Ok(())
}
