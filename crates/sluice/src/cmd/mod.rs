//! CLI commands

pub mod check;
pub mod serve;

use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use sluice_config::Config;
use tracing::info;

/// Config locations tried when `--config` is not given
const DEFAULT_CONFIG_PATHS: &[&str] = &["/etc/sluice/sluice.toml", "sluice.toml"];

/// Load the config named on the command line, or the first default that exists
///
/// There is no built-in fallback: without a `[store]` block there is nothing
/// to route to.
pub fn load_config(path: Option<PathBuf>) -> Result<Config> {
    match path {
        Some(path) => {
            if !path.exists() {
                bail!("config file not found: {}", path.display());
            }
            Config::from_file(&path)
                .with_context(|| format!("failed to load configuration from {}", path.display()))
        }
        None => {
            for candidate in DEFAULT_CONFIG_PATHS.iter().map(PathBuf::from) {
                if candidate.exists() {
                    info!(config = %candidate.display(), "using config file");
                    return Config::from_file(&candidate).context("failed to load configuration");
                }
            }
            bail!(
                "no config file found (tried {}); pass one with --config",
                DEFAULT_CONFIG_PATHS.join(", ")
            )
        }
    }
}
