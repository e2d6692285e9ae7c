use std::time::Duration;

use clap::{command, Parser, Subcommand};
use hookwire_cli::{run_helper, run_selftest};
use hookwire_core::BusConfig;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the hook-helper side of the bus over stdio.
    ///
    /// Protocol configuration arrives in-band as a Configure envelope,
    /// never as flags.
    Helper,

    /// Spawn a helper child and round-trip traffic through it
    Selftest(SelftestArgs),
}

#[derive(Parser)]
struct SelftestArgs {
    /// Virtual keys the host policy swallows
    #[arg(long, value_delimiter = ',', default_value = "27")]
    swallow_keys: Vec<u32>,

    /// Reply window in milliseconds
    #[arg(long, default_value_t = 500)]
    timeout_ms: u64,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let default_filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| default_filter.into()))
        // stdout carries frames in helper mode; logs go to stderr.
        .with(fmt::layer().with_writer(std::io::stderr))
        .init();

    let result = match cli.command {
        Commands::Helper => run_helper(BusConfig::default()).await,
        Commands::Selftest(args) => {
            run_selftest(args.swallow_keys, Duration::from_millis(args.timeout_ms)).await
        }
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}
