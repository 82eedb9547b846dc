//! Capped retry schedule for unicast discovery.

use std::time::Duration;

/// Fixed ascending delay table indexed by attempt number.
///
/// Never gives up: once the last entry is reached it repeats.
///
/// The table is non-empty: `DiscoveryConfig::validate` rejects an empty one
/// before any engine is built.
#[derive(Debug, Clone)]
pub(crate) struct Backoff {
    table: Vec<Duration>,
}

impl Backoff {
    pub(crate) fn new(table: Vec<Duration>) -> Self {
        debug_assert!(!table.is_empty(), "backoff table must be validated");
        Self { table }
    }

    /// Delay for `try_index`, clamped to the last entry.
    pub(crate) fn delay(&self, try_index: usize) -> Duration {
        self.table[self.clamp(try_index)]
    }

    /// Index following `try_index`, capped at the last entry.
    pub(crate) fn next_index(&self, try_index: usize) -> usize {
        self.clamp(try_index.saturating_add(1))
    }

    #[cfg(test)]
    fn max_delay(&self) -> Duration {
        self.table.iter().copied().max().unwrap_or_default()
    }

    /// Last valid index.
    pub(crate) fn last_index(&self) -> usize {
        self.table.len() - 1
    }

    fn clamp(&self, try_index: usize) -> usize {
        try_index.min(self.last_index())
    }
}
