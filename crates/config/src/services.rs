//! Static service table
//!
//! Backs service-name lookups for network stores configured with
//! `smc_service` when no external discovery client is wired in.
//!
//! ```toml
//! [services]
//! aggregators = ["agg1:1463", "agg2:1463"]
//! ```

use std::collections::HashMap;

use serde::Deserialize;

/// Service name to `host:port` list
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(transparent)]
pub struct ServicesConfig(HashMap<String, Vec<String>>);

impl ServicesConfig {
    /// Servers registered for `name`
    pub fn servers(&self, name: &str) -> Option<&[String]> {
        self.0.get(name).map(Vec::as_slice)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Vec<String>)> {
        self.0.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromIterator<(String, Vec<String>)> for ServicesConfig {
    fn from_iter<I: IntoIterator<Item = (String, Vec<String>)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}
