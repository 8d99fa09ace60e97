//! Source configuration
//!
//! Sources feed entries into the root store. Only file tailing is built in;
//! the network listener lives outside this daemon.

use std::path::PathBuf;

use serde::Deserialize;

/// One `[[sources]]` entry, tagged by `type`
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum SourceConfig {
    /// Follow a file by name, one entry per line
    Tail(TailSourceConfig),
}

impl SourceConfig {
    /// Category every entry from this source is filed under
    pub fn category(&self) -> &str {
        match self {
            Self::Tail(tail) => &tail.category,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Tail(_) => "tail",
        }
    }
}

/// Tail source configuration
///
/// ```toml
/// [[sources]]
/// type = "tail"
/// category = "apache"
/// file = "/var/log/apache2/access.log"
/// ```
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct TailSourceConfig {
    /// Category for every line read
    #[serde(default)]
    pub category: String,

    /// File to follow
    #[serde(default)]
    pub file: PathBuf,

    /// How often to poll for new data (milliseconds)
    /// Default: 250
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Read the existing contents instead of starting at the end
    /// Default: false
    #[serde(default)]
    pub from_start: bool,
}

fn default_poll_interval_ms() -> u64 {
    250
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Deserialize)]
    struct Wrapper {
        sources: Vec<SourceConfig>,
    }

    #[test]
    fn test_tail_source_defaults() {
        let toml = r#"
[[sources]]
type = "tail"
category = "apache"
file = "/var/log/access.log"
"#;
        let wrapper: Wrapper = toml::from_str(toml).unwrap();
        assert_eq!(wrapper.sources.len(), 1);
        let SourceConfig::Tail(tail) = &wrapper.sources[0];
        assert_eq!(tail.category, "apache");
        assert_eq!(tail.file, PathBuf::from("/var/log/access.log"));
        assert_eq!(tail.poll_interval_ms, 250);
        assert!(!tail.from_start);
        assert_eq!(wrapper.sources[0].type_name(), "tail");
    }

    #[test]
    fn test_unknown_source_type_rejected() {
        let toml = r#"
[[sources]]
type = "syslog"
category = "x"
"#;
        assert!(toml::from_str::<Wrapper>(toml).is_err());
    }
}
