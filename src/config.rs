//! Tunables for the discovery engines.

use std::time::Duration;

use crate::error::{Error, Result};

/// Configuration for a [`LookupDiscoveryManager`](crate::LookupDiscoveryManager).
#[derive(Debug, Clone)]
pub struct DiscoveryConfig {
    /// Ascending delays between unicast attempts; the last entry repeats forever.
    pub backoff: Vec<Duration>,
    /// Maximum simultaneous unicast probes.
    pub max_inflight: usize,
    /// Timeout for each individual probe.
    pub probe_timeout: Duration,
    /// Backoff index a locator restarts from after its registrar is discarded.
    pub discard_try_index: usize,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            backoff: [5, 10, 20, 30, 60, 120, 240, 480, 900]
                .into_iter()
                .map(Duration::from_secs)
                .collect(),
            max_inflight: 15,
            probe_timeout: Duration::from_secs(60),
            discard_try_index: 1,
        }
    }
}

impl DiscoveryConfig {
    /// Replace the backoff table.
    pub fn backoff<I: IntoIterator<Item = Duration>>(mut self, table: I) -> Self {
        self.backoff = table.into_iter().collect();
        self
    }

    /// Set the worker-pool size. Default: 15.
    pub fn max_inflight(mut self, n: usize) -> Self {
        self.max_inflight = n;
        self
    }

    /// Set the per-probe timeout. Default: 60 seconds.
    pub fn probe_timeout(mut self, d: Duration) -> Self {
        self.probe_timeout = d;
        self
    }

    /// Set the backoff index used after a discard. Default: 1.
    pub fn discard_try_index(mut self, idx: usize) -> Self {
        self.discard_try_index = idx;
        self
    }

    pub(crate) fn validate(&self) -> Result<()> {
        if self.backoff.is_empty() {
            return Err(Error::invalid("backoff table is empty"));
        }
        if self.max_inflight == 0 {
            return Err(Error::invalid("max_inflight must be at least 1"));
        }
        if self.probe_timeout.is_zero() {
            return Err(Error::invalid("probe_timeout must be non-zero"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = DiscoveryConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.backoff.first(), Some(&Duration::from_secs(5)));
        assert_eq!(config.backoff.last(), Some(&Duration::from_secs(900)));
    }

    #[test]
    fn rejects_degenerate_settings() {
        assert!(DiscoveryConfig::default().backoff([]).validate().is_err());
        assert!(DiscoveryConfig::default().max_inflight(0).validate().is_err());
        assert!(DiscoveryConfig::default()
            .probe_timeout(Duration::ZERO)
            .validate()
            .is_err());
    }
}
