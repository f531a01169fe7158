//! FleetSync command-line tool.
//!
//! Usage:
//!   fleetsync plan --snapshots snapshots.json [--config engine.toml]
//!   fleetsync simulate --fleet fleet.json [--area 1] [--job-id nightly-42]
//!
//! Results go to stdout as JSON; logs go to stderr.

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use fleetsync_cli::{FleetFixture, load_config, load_snapshots, plan_snapshots, simulate};
use fleetsync_types::AreaId;
use serde::Serialize;
use tracing::{Level, info};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[derive(Parser, Debug)]
#[command(name = "fleetsync")]
#[command(about = "Reconcile biometric records across terminal fleets")]
#[command(version)]
struct Args {
    /// Enable verbose debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Plan a round from recorded device snapshots (no device I/O)
    Plan {
        /// JSON array of device snapshots
        #[arg(long)]
        snapshots: PathBuf,

        /// Engine settings (TOML)
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
    /// Run a full round against simulated terminals
    Simulate {
        /// Fleet fixture (JSON)
        #[arg(long)]
        fleet: PathBuf,

        /// Engine settings (TOML)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Area to sync when the fleet spans several
        #[arg(long)]
        area: Option<u32>,

        /// Print a job execution record under this id
        #[arg(long)]
        job_id: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(args.verbose);

    match args.command {
        Command::Plan { snapshots, config } => {
            let config = load_config(config.as_deref())?;
            let snapshots = load_snapshots(&snapshots)?;
            info!("Loaded {} snapshots", snapshots.len());
            print_json(&plan_snapshots(&snapshots, &config))
        }
        Command::Simulate {
            fleet,
            config,
            area,
            job_id,
        } => {
            let config = load_config(config.as_deref())?;
            let fixture = FleetFixture::load(&fleet)?;
            let result = simulate(&fixture, config, area.map(AreaId)).await?;
            match job_id {
                Some(job_id) => print_json(&result.to_job_record(job_id, "fleet-sync")?),
                None => print_json(&result),
            }
        }
    }
}

/// RUST_LOG wins over --verbose when set.
fn init_logging(verbose: bool) {
    let builder = FmtSubscriber::builder()
        .with_target(false)
        .with_writer(std::io::stderr)
        .compact();
    if std::env::var_os("RUST_LOG").is_some() {
        builder.with_env_filter(EnvFilter::from_default_env()).init();
    } else {
        let log_level = if verbose { Level::DEBUG } else { Level::INFO };
        builder.with_max_level(log_level).init();
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
