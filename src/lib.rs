//! Lookup service discovery over multicast groups and unicast locators.
//!
//! [`LookupDiscoveryManager`] runs a [`GroupDiscovery`] engine and a
//! [`LocatorDiscovery`] engine side by side and presents their results as one
//! managed set: a registrar reachable both ways is reported once, and a
//! client discard removes it from both.

#![deny(missing_docs)]

pub mod config;
pub mod discovery;
pub mod error;
pub mod event;
pub mod locator;
pub mod manager;
mod notify;
pub mod registrar;
pub mod stream;

// Re-export key types
pub use config::DiscoveryConfig;
pub use discovery::{
    GroupDiscovery, LocatorDiscovery, ManualGroupDiscovery, Mechanism, ProbeResult, UnicastProbe,
};
pub use error::{Error, Result};
pub use event::{
    DiscoveryChangeListener, DiscoveryEvent, DiscoveryListener, EventKind, ListenerHandle,
};
pub use locator::LookupLocator;
pub use manager::record::DiscoveryMask;
pub use manager::{LookupDiscoveryManager, ManagerBuilder};
pub use registrar::{GroupSet, Registrar, RegistrarHandle, ServiceId};
pub use stream::DiscoveryEvents;
