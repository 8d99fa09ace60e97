//! Service discovery
//!
//! Network stores configured with `smc_service` resolve the service to a
//! `host:port` list through a [`ServiceDiscovery`]. Lookups are cached per
//! store for `service_cache_timeout` seconds.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use sluice_config::ServicesConfig;

/// Resolves a service name to its servers
pub trait ServiceDiscovery: Send + Sync {
    /// `None` when the lookup itself failed
    fn lookup(&self, service: &str, options: &str) -> Option<Vec<String>>;
}

/// Discovery backed by the `[services]` table
#[derive(Debug, Clone, Default)]
pub struct StaticDiscovery {
    services: HashMap<String, Vec<String>>,
}

impl StaticDiscovery {
    pub fn from_config(services: &ServicesConfig) -> Self {
        Self::from_pairs(
            services
                .iter()
                .map(|(name, servers)| (name.clone(), servers.clone())),
        )
    }

    pub fn from_pairs(pairs: impl IntoIterator<Item = (String, Vec<String>)>) -> Self {
        Self {
            services: pairs.into_iter().collect(),
        }
    }
}

impl ServiceDiscovery for StaticDiscovery {
    fn lookup(&self, service: &str, _options: &str) -> Option<Vec<String>> {
        self.services.get(service).cloned()
    }
}

/// Last lookup result for one service, refreshed after `timeout`
#[derive(Debug, Clone)]
pub struct ServiceCache {
    timeout: Duration,
    last_check: Option<Instant>,
    servers: Vec<String>,
}

impl ServiceCache {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            last_check: None,
            servers: Vec::new(),
        }
    }

    /// Servers for `service`, looked up again if the cache is stale.
    /// Empty when the lookup failed or found nothing.
    pub fn servers(
        &mut self,
        discovery: &dyn ServiceDiscovery,
        service: &str,
        options: &str,
    ) -> &[String] {
        let stale = self
            .last_check
            .is_none_or(|checked| checked.elapsed() >= self.timeout);
        if stale {
            self.last_check = Some(Instant::now());
            self.servers = discovery.lookup(service, options).unwrap_or_default();
            tracing::debug!(service = %service, count = self.servers.len(), "refreshed service servers");
        }
        &self.servers
    }
}

#[cfg(test)]
#[path = "discovery_test.rs"]
mod discovery_test;
