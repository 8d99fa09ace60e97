//! Sluice - log routing daemon
//!
//! # Usage
//!
//! ```bash
//! # Run the daemon (default)
//! sluice --config /etc/sluice/sluice.toml
//!
//! # Build the store tree from a config and report problems
//! sluice check --config /etc/sluice/sluice.toml
//! ```

mod cmd;
mod handler;
mod tail;

use std::path::Path;

use anyhow::Result;
use clap::{Parser, Subcommand};
use sluice_config::{Config, LogFormat};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Sluice - log routing daemon
#[derive(Parser, Debug)]
#[command(name = "sluice")]
#[command(version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,

    /// Path to configuration file (error if specified but not found)
    #[arg(short, long, global = true)]
    config: Option<std::path::PathBuf>,

    /// Log level (trace, debug, info, warn, error). Overrides config file.
    #[arg(short, long, global = true)]
    log_level: Option<String>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the daemon
    Serve,

    /// Build the store tree and print its status
    Check,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let (directive, format) = resolve_log_config(cli.log_level.as_deref(), cli.config.as_deref());

    match cli.command {
        Some(Command::Check) => {
            // Check prints to stdout; only warnings go to the log
            init_logging("warn", format)?;
            cmd::check::run(cli.config)
        }
        Some(Command::Serve) | None => {
            init_logging(&directive, format)?;
            cmd::serve::run(cli.config).await
        }
    }
}

/// Resolve the log filter: CLI level > config file > "info"
fn resolve_log_config(cli_level: Option<&str>, config_path: Option<&Path>) -> (String, LogFormat) {
    let log = config_path
        .filter(|path| path.exists())
        .and_then(|path| Config::from_file(path).ok())
        .map(|config| config.log)
        .unwrap_or_default();

    let directive = match cli_level {
        Some(level) => level.to_string(),
        None => log.directive(),
    };
    (directive, log.format)
}

/// Initialize the tracing subscriber for logging
fn init_logging(directive: &str, format: LogFormat) -> Result<()> {
    let filter = EnvFilter::try_new(directive)
        .or_else(|_| EnvFilter::try_new("info"))
        .map_err(|e| anyhow::anyhow!("invalid log level: {}", e))?;

    let (console, json) = match format {
        LogFormat::Console => (Some(fmt::layer().with_target(true).with_thread_ids(false)), None),
        LogFormat::Json => (None, Some(fmt::layer().json().with_target(true))),
    };

    tracing_subscriber::registry()
        .with(console)
        .with(json)
        .with(filter)
        .init();

    Ok(())
}
