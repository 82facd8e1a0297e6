//! CLI for regscope
//!
//! Drives the profiler session engine against the simulated device:
//! - run: replay a JSON session script
//! - stress: race reservations from many sessions at once

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

mod commands;
mod output;

#[derive(Parser)]
#[command(name = "regscope")]
#[command(about = "regscope - GPU profiler session engine", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Replay a session script against the simulated device
    Run(commands::run::RunArgs),

    /// Race PM resource reservations from concurrent sessions
    Stress(commands::stress::StressArgs),
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run(args) => {
            init_tracing(args.verbose, args.json_logs);
            commands::run::run(args)
        }
        Commands::Stress(args) => {
            init_tracing(args.verbose, args.json_logs);
            commands::stress::run(args).await
        }
    }
}

fn init_tracing(verbose: bool, json: bool) {
    let filter = if verbose {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug"))
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    let registry = tracing_subscriber::registry().with(filter);
    if json {
        // One JSON object per event, audit records included
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_target(true))
            .init();
    }
}
