//! Global daemon settings

use std::time::Duration;

use serde::Deserialize;

/// Daemon-wide timing settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GlobalConfig {
    /// Seconds between `periodic_check` ticks on the store tree
    /// Default: 1
    pub check_interval_secs: u64,

    /// Seconds to wait for sources to stop before flushing anyway
    /// Default: 5
    pub shutdown_timeout_secs: u64,

    /// Seconds between stats log lines; 0 disables
    /// Default: 60
    pub stats_interval_secs: u64,
}

impl Default for GlobalConfig {
    fn default() -> Self {
        Self {
            check_interval_secs: 1,
            shutdown_timeout_secs: 5,
            stats_interval_secs: 60,
        }
    }
}

impl GlobalConfig {
    /// Check interval as a duration (never zero)
    pub fn check_interval(&self) -> Duration {
        Duration::from_secs(self.check_interval_secs.max(1))
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }

    /// Stats interval, or `None` when stats logging is off
    pub fn stats_interval(&self) -> Option<Duration> {
        (self.stats_interval_secs > 0).then(|| Duration::from_secs(self.stats_interval_secs))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = GlobalConfig::default();
        assert_eq!(config.check_interval(), Duration::from_secs(1));
        assert_eq!(config.shutdown_timeout(), Duration::from_secs(5));
        assert_eq!(config.stats_interval(), Some(Duration::from_secs(60)));
    }

    #[test]
    fn test_zero_check_interval_clamped() {
        let config: GlobalConfig = toml::from_str("check_interval_secs = 0").unwrap();
        assert_eq!(config.check_interval(), Duration::from_secs(1));
    }

    #[test]
    fn test_stats_disabled() {
        let config: GlobalConfig = toml::from_str("stats_interval_secs = 0").unwrap();
        assert_eq!(config.stats_interval(), None);
    }
}
