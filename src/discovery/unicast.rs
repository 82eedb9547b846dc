//! Seam for the unicast discovery handshake.

use async_trait::async_trait;

use crate::error::Result;
use crate::locator::LookupLocator;
use crate::registrar::RegistrarHandle;

/// Outcome of a successful unicast probe.
#[derive(Debug, Clone)]
pub struct ProbeResult {
    /// Proxy for the lookup service that answered.
    pub registrar: RegistrarHandle,
    /// Groups the lookup service is a member of.
    pub groups: Vec<String>,
}

impl ProbeResult {
    /// Pair a registrar with its member groups.
    pub fn new<I, S>(registrar: RegistrarHandle, groups: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            registrar,
            groups: groups.into_iter().map(Into::into).collect(),
        }
    }
}

/// Performs one unicast discovery attempt against a locator.
///
/// Implementations own the wire protocol and any transport security. The
/// engine bounds every call with its probe timeout and never holds a lock
/// while a probe runs.
#[async_trait]
pub trait UnicastProbe: Send + Sync + 'static {
    /// Contact the lookup service at `locator`.
    async fn probe(&self, locator: &LookupLocator) -> Result<ProbeResult>;
}
