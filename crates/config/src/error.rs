//! Configuration error types

use std::io;
use thiserror::Error;

/// Result type for configuration operations
pub type Result<T> = std::result::Result<T, ConfigError>;

/// Errors that can occur when loading or validating configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read configuration file
    #[error("failed to read config file '{path}': {source}")]
    IoError {
        /// Path to the file
        path: String,
        /// Underlying IO error
        #[source]
        source: io::Error,
    },

    /// Failed to parse TOML
    #[error("failed to parse config: {0}")]
    ParseError(#[from] toml::de::Error),

    /// No root store block
    #[error("no [store] section - a root store must be configured")]
    MissingStore,

    /// Validation error - required field missing
    #[error("{component} '{name}' is missing required field '{field}'")]
    MissingField {
        /// Component type (e.g., "store", "source")
        component: &'static str,
        /// Name of the component
        name: String,
        /// Missing field name
        field: &'static str,
    },

    /// Validation error - invalid value
    #[error("{component} '{name}' has invalid {field}: {message}")]
    InvalidValue {
        /// Component type
        component: &'static str,
        /// Name of the component
        name: String,
        /// Field name
        field: &'static str,
        /// Error message
        message: String,
    },
}

impl ConfigError {
    /// Create a MissingField error
    pub fn missing_field(
        component: &'static str,
        name: impl Into<String>,
        field: &'static str,
    ) -> Self {
        Self::MissingField {
            component,
            name: name.into(),
            field,
        }
    }

    /// Create an InvalidValue error
    pub fn invalid_value(
        component: &'static str,
        name: impl Into<String>,
        field: &'static str,
        message: impl Into<String>,
    ) -> Self {
        Self::InvalidValue {
            component,
            name: name.into(),
            field,
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_store_error() {
        let err = ConfigError::MissingStore;
        assert!(err.to_string().contains("[store]"));
    }

    #[test]
    fn test_missing_field_error() {
        let err = ConfigError::missing_field("source", "tail[0]", "file");
        assert!(err.to_string().contains("source"));
        assert!(err.to_string().contains("tail[0]"));
        assert!(err.to_string().contains("file"));
    }

    #[test]
    fn test_invalid_value_error() {
        let err = ConfigError::invalid_value("store", "root", "type", "unknown store type 'disk'");
        assert!(err.to_string().contains("root"));
        assert!(err.to_string().contains("unknown store type 'disk'"));
    }

    #[test]
    fn test_io_error_keeps_path() {
        let err = ConfigError::IoError {
            path: "/etc/sluice.toml".into(),
            source: io::Error::new(io::ErrorKind::NotFound, "gone"),
        };
        assert!(err.to_string().contains("/etc/sluice.toml"));
    }
}
