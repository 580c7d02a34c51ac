//! # misync
//!
//! Command line runner for misync masters and devices.
//!
//! ## Commands
//!
//! - `master`: Drive the modules listed in the configuration
//! - `device`: Run a module endpoint described by `[device]`
//! - `check-config`: Validate a configuration file
//!
//! ## Example
//!
//! ```bash
//! # Validate the configuration
//! misync --config misync.toml check-config
//!
//! # Start a device in one terminal
//! misync --config heater.toml device
//!
//! # And the master in another
//! misync --config misync.toml master
//! ```

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use misync_client::Config;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

mod commands;
mod sinks;
mod store;
mod udp;

use commands::{check, device, master};

/// Command line runner for misync masters and devices.
#[derive(Parser, Debug)]
#[command(name = "misync")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Configuration file
    #[arg(long, short, global = true, default_value = "misync.toml")]
    config: PathBuf,

    /// Log at debug level (RUST_LOG overrides)
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Drive the configured modules
    Master,

    /// Run the module described by the [device] section
    Device,

    /// Validate the configuration and print a summary
    CheckConfig,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(if cli.verbose { "debug" } else { "info" })
    });
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let config = Config::from_file(&cli.config)
        .with_context(|| format!("Failed to load {}", cli.config.display()))?;

    match cli.command {
        Commands::Master => master::run(&config).await?,
        Commands::Device => device::run(&config).await?,
        Commands::CheckConfig => check::run(&config)?,
    }

    Ok(())
}
