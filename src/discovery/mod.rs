//! Discovery engines: group (multicast) and locator (unicast).
//!
//! - Both engines report raw signals as tagged [`EngineEvent`]s through an
//!   [`EngineSink`]
//! - The manager merges the two feeds into one managed set
//! - Locator discovery retries with capped backoff until removed

mod backoff;
pub mod group;
pub mod locator;
pub mod unicast;
pub mod wakeup;

use std::fmt;

use tokio::sync::mpsc;

use crate::registrar::RegistrarHandle;

pub use group::{GroupDiscovery, ManualGroupDiscovery};
pub use locator::LocatorDiscovery;
pub use unicast::{ProbeResult, UnicastProbe};

/// Which discovery mechanism produced a signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Mechanism {
    /// Multicast group discovery.
    Group,
    /// Unicast locator discovery.
    Locator,
}

impl fmt::Display for Mechanism {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Group => "group",
            Self::Locator => "locator",
        })
    }
}

/// Raw signal from an engine, before deduplication.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    /// The engine now considers the registrar discovered.
    Discovered,
    /// The engine dropped the registrar.
    Discarded {
        /// The registrar was dropped because it is unreachable, not because
        /// the client lost interest in it.
        unreachable: bool,
    },
    /// The registrar's member groups changed.
    Changed,
}

/// A tagged signal on the engines' shared channel.
#[derive(Debug, Clone)]
pub struct EngineEvent {
    /// Producing engine.
    pub source: Mechanism,
    /// What happened.
    pub signal: Signal,
    /// Registrar concerned.
    pub registrar: RegistrarHandle,
    /// Member groups as currently known by the engine.
    pub groups: Vec<String>,
}

/// Receiving half of the engines' shared channel.
pub type EngineEvents = mpsc::UnboundedReceiver<EngineEvent>;

/// Create the shared channel the engines report into.
pub fn engine_channel() -> (mpsc::UnboundedSender<EngineEvent>, EngineEvents) {
    mpsc::unbounded_channel()
}

/// Sending half handed to one engine; tags every signal with its source.
#[derive(Debug, Clone)]
pub struct EngineSink {
    source: Mechanism,
    tx: mpsc::UnboundedSender<EngineEvent>,
}

impl EngineSink {
    /// Wrap a channel sender for the given engine.
    pub fn new(source: Mechanism, tx: mpsc::UnboundedSender<EngineEvent>) -> Self {
        Self { source, tx }
    }

    /// Engine this sink reports for.
    pub fn source(&self) -> Mechanism {
        self.source
    }

    /// Whether both sinks feed the same channel.
    pub fn same_channel(&self, other: &EngineSink) -> bool {
        self.tx.same_channel(&other.tx)
    }

    /// Report a discovered registrar.
    pub fn discovered(&self, registrar: RegistrarHandle, groups: Vec<String>) -> bool {
        self.send(Signal::Discovered, registrar, groups)
    }

    /// Report a discarded registrar.
    pub fn discarded(
        &self,
        registrar: RegistrarHandle,
        groups: Vec<String>,
        unreachable: bool,
    ) -> bool {
        self.send(Signal::Discarded { unreachable }, registrar, groups)
    }

    /// Report changed member groups.
    pub fn changed(&self, registrar: RegistrarHandle, groups: Vec<String>) -> bool {
        self.send(Signal::Changed, registrar, groups)
    }

    fn send(&self, signal: Signal, registrar: RegistrarHandle, groups: Vec<String>) -> bool {
        self.tx
            .send(EngineEvent {
                source: self.source,
                signal,
                registrar,
                groups,
            })
            .is_ok()
    }
}
