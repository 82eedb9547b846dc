//! Listener-facing discovery events.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::registrar::{RegistrarHandle, ServiceId};

/// What happened to the registrars in an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// Newly discovered.
    Discovered,
    /// No longer discovered.
    Discarded,
    /// Still discovered, member groups changed.
    Changed,
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Discovered => "discovered",
            Self::Discarded => "discarded",
            Self::Changed => "changed",
        })
    }
}

/// Immutable snapshot of a set of registrars and their member groups.
///
/// Built once when the event is enqueued and shared between all listeners of
/// that notification.
#[derive(Clone)]
pub struct DiscoveryEvent {
    inner: Arc<EventInner>,
}

struct EventInner {
    registrars: Vec<RegistrarHandle>,
    groups: HashMap<ServiceId, Vec<String>>,
}

impl DiscoveryEvent {
    /// Snapshot the given registrar/groups pairs.
    pub fn new<I>(entries: I) -> Self
    where
        I: IntoIterator<Item = (RegistrarHandle, Vec<String>)>,
    {
        let mut registrars = Vec::new();
        let mut groups = HashMap::new();
        for (registrar, member_groups) in entries {
            if groups.insert(registrar.service_id(), member_groups).is_none() {
                registrars.push(registrar);
            }
        }
        Self {
            inner: Arc::new(EventInner { registrars, groups }),
        }
    }

    /// Registrars in this event, in the order they were added.
    pub fn registrars(&self) -> &[RegistrarHandle] {
        &self.inner.registrars
    }

    /// Member groups of a registrar in this event.
    pub fn groups(&self, id: &ServiceId) -> Option<&[String]> {
        self.inner.groups.get(id).map(Vec::as_slice)
    }

    /// The whole registrar -> groups map.
    pub fn groups_map(&self) -> &HashMap<ServiceId, Vec<String>> {
        &self.inner.groups
    }

    /// Ids of the registrars in this event.
    pub fn service_ids(&self) -> Vec<ServiceId> {
        self.inner.registrars.iter().map(|r| r.service_id()).collect()
    }

    /// Number of registrars.
    pub fn len(&self) -> usize {
        self.inner.registrars.len()
    }

    /// Whether the event carries no registrars.
    pub fn is_empty(&self) -> bool {
        self.inner.registrars.is_empty()
    }
}

impl fmt::Debug for DiscoveryEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map()
            .entries(self.inner.registrars.iter().map(|r| {
                let id = r.service_id();
                (id, self.inner.groups.get(&id))
            }))
            .finish()
    }
}

/// Receives discovered and discarded notifications.
///
/// Callbacks run on the manager's notification thread, one event at a time.
/// A panicking callback is logged and does not affect other listeners.
pub trait DiscoveryListener: Send + Sync + 'static {
    /// Registrars became discovered.
    fn discovered(&self, event: &DiscoveryEvent);

    /// Registrars were discarded.
    fn discarded(&self, event: &DiscoveryEvent);

    /// Listeners that also want change events return themselves here.
    fn as_change_listener(&self) -> Option<&dyn DiscoveryChangeListener> {
        None
    }
}

/// A listener that is also told when a registrar's member groups change.
pub trait DiscoveryChangeListener: DiscoveryListener {
    /// Member groups of still-discovered registrars changed.
    fn changed(&self, event: &DiscoveryEvent);
}

/// Shared listener handle.
pub type ListenerHandle = Arc<dyn DiscoveryListener>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registrar::Registrar;

    #[derive(Debug)]
    struct Reg(ServiceId);

    impl Registrar for Reg {
        fn service_id(&self) -> ServiceId {
            self.0
        }
    }

    #[test]
    fn snapshot_dedupes_registrars() {
        let id = ServiceId::random();
        let reg: RegistrarHandle = Arc::new(Reg(id));
        let event = DiscoveryEvent::new([
            (reg.clone(), vec!["a".to_string()]),
            (reg, vec!["b".to_string()]),
        ]);
        assert_eq!(event.len(), 1);
        assert_eq!(event.groups(&id), Some(&["b".to_string()][..]));
    }

    #[test]
    fn snapshot_is_detached_from_source() {
        let id = ServiceId::random();
        let reg: RegistrarHandle = Arc::new(Reg(id));
        let mut groups = vec!["a".to_string()];
        let event = DiscoveryEvent::new([(reg, groups.clone())]);
        groups.push("b".to_string());
        assert_eq!(event.groups(&id).map(<[String]>::len), Some(1));
    }
}
