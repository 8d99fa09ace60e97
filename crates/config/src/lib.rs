//! Sluice Configuration
//!
//! TOML-based configuration loading with sensible defaults. Everything except
//! the root `[store]` block is optional.
//!
//! # Parsing
//!
//! ```
//! use sluice_config::Config;
//! use std::str::FromStr;
//!
//! let config = Config::from_str("[store]\ntype = \"null\"").unwrap();
//! assert_eq!(config.store.store_type().as_deref(), Some("null"));
//! ```
//!
//! # Example Config
//!
//! ```toml
//! [global]
//! check_interval_secs = 1
//!
//! [log]
//! level = "info"
//!
//! [[sources]]
//! type = "tail"
//! category = "apache"
//! file = "/var/log/apache2/access.log"
//!
//! [store]
//! type = "buffer"
//!
//! [store.primary]
//! type = "network"
//! remote_host = "agg1"
//! remote_port = 1463
//!
//! [store.secondary]
//! type = "file"
//! file_path = "/var/spool/sluice"
//! base_filename = "apache"
//! ```

mod error;
mod global;
mod logging;
mod services;
mod sources;
mod store_conf;

use std::fs;
use std::path::Path;
use std::str::FromStr;

pub use error::{ConfigError, Result};
pub use global::GlobalConfig;
pub use logging::{LogConfig, LogFormat, LogLevel};
pub use services::ServicesConfig;
pub use sources::{SourceConfig, TailSourceConfig};
pub use store_conf::StoreConf;

use serde::Deserialize;

/// Store type tags the factory understands
pub const KNOWN_STORE_TYPES: &[&str] = &[
    "file",
    "buffer",
    "network",
    "bucket",
    "thriftfile",
    "null",
    "multi",
    "category",
    "multifile",
    "thriftmultifile",
];

/// Check whether `store_type` names a buildable store
pub fn is_known_store_type(store_type: &str) -> bool {
    KNOWN_STORE_TYPES.contains(&store_type)
}

/// Main configuration structure
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Timing settings
    pub global: GlobalConfig,

    /// Daemon logging
    pub log: LogConfig,

    /// Static service table for `smc_service` lookups
    pub services: ServicesConfig,

    /// Entry sources
    pub sources: Vec<SourceConfig>,

    /// Root store block
    pub store: StoreConf,
}

impl Config {
    /// Load configuration from a TOML file
    ///
    /// # Errors
    ///
    /// Returns error if the file cannot be read, is not valid TOML, or fails
    /// validation.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path).map_err(|e| ConfigError::IoError {
            path: path.display().to_string(),
            source: e,
        })?;

        Self::from_str(&contents)
    }

    fn parse(s: &str) -> Result<Self> {
        let config: Config = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    ///
    /// Checks for:
    /// - a root store with a known `type`
    /// - every source has a category and a file
    ///
    /// Store-specific settings are checked when the store is configured.
    fn validate(&self) -> Result<()> {
        if self.store.keys().next().is_none() {
            return Err(ConfigError::MissingStore);
        }
        let store_type = self
            .store
            .store_type()
            .ok_or_else(|| ConfigError::missing_field("store", "root", "type"))?;
        if !is_known_store_type(&store_type) {
            return Err(ConfigError::invalid_value(
                "store",
                "root",
                "type",
                format!("unknown store type '{}'", store_type),
            ));
        }

        for (i, source) in self.sources.iter().enumerate() {
            let name = format!("{}[{}]", source.type_name(), i);
            match source {
                SourceConfig::Tail(tail) => {
                    if tail.category.is_empty() {
                        return Err(ConfigError::missing_field("source", name, "category"));
                    }
                    if tail.file.as_os_str().is_empty() {
                        return Err(ConfigError::missing_field("source", name, "file"));
                    }
                }
            }
        }

        Ok(())
    }
}

impl FromStr for Config {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}
