//! Per-registrar state shared by the classification logic.

use std::fmt;

use parking_lot::Mutex;

use crate::discovery::Mechanism;
use crate::registrar::{RegistrarHandle, ServiceId};

/// Which mechanisms currently claim a registrar as discovered.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct DiscoveryMask(u8);

impl DiscoveryMask {
    /// No mechanism.
    pub const NONE: Self = Self(0);
    /// Group discovery.
    pub const GROUP: Self = Self(1);
    /// Locator discovery.
    pub const LOCATOR: Self = Self(2);
    /// Both mechanisms.
    pub const BOTH: Self = Self(3);

    /// The bit for one mechanism.
    pub fn of(mechanism: Mechanism) -> Self {
        match mechanism {
            Mechanism::Group => Self::GROUP,
            Mechanism::Locator => Self::LOCATOR,
        }
    }

    /// Whether `mechanism` is set.
    pub fn contains(self, mechanism: Mechanism) -> bool {
        self.0 & Self::of(mechanism).0 != 0
    }

    /// Whether no mechanism is set.
    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Raw bits.
    pub fn bits(self) -> u8 {
        self.0
    }

    pub(crate) fn insert(&mut self, mechanism: Mechanism) {
        self.0 |= Self::of(mechanism).0;
    }

    pub(crate) fn remove(&mut self, mechanism: Mechanism) {
        self.0 &= !Self::of(mechanism).0;
    }
}

impl fmt::Debug for DiscoveryMask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Self::NONE => f.write_str("NONE"),
            Self::GROUP => f.write_str("GROUP"),
            Self::LOCATOR => f.write_str("LOCATOR"),
            _ => f.write_str("GROUP|LOCATOR"),
        }
    }
}

/// Mutable fields of a record, guarded by the record's own lock.
#[derive(Debug)]
pub(crate) struct RecordState {
    pub(crate) groups: Vec<String>,
    pub(crate) mask: DiscoveryMask,
    /// Set by an explicit client discard: treat the next discard as unreachability.
    pub(crate) comm_discard: bool,
    /// Removal has begun; the record must not be reused.
    pub(crate) discarded: bool,
}

/// One managed registrar.
#[derive(Debug)]
pub(crate) struct RegistrarRecord {
    proxy: RegistrarHandle,
    id: ServiceId,
    state: Mutex<RecordState>,
}

impl RegistrarRecord {
    pub(crate) fn new(proxy: RegistrarHandle, groups: Vec<String>, source: Mechanism) -> Self {
        let id = proxy.service_id();
        Self {
            proxy,
            id,
            state: Mutex::new(RecordState {
                groups,
                mask: DiscoveryMask::of(source),
                comm_discard: false,
                discarded: false,
            }),
        }
    }

    pub(crate) fn proxy(&self) -> &RegistrarHandle {
        &self.proxy
    }

    pub(crate) fn id(&self) -> ServiceId {
        self.id
    }

    pub(crate) fn lock(&self) -> parking_lot::MutexGuard<'_, RecordState> {
        self.state.lock()
    }

    /// Proxy and current groups, for building event snapshots.
    pub(crate) fn snapshot(&self) -> (RegistrarHandle, Vec<String>) {
        (self.proxy.clone(), self.state.lock().groups.clone())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

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
    fn mask_tracks_each_mechanism() {
        let mut mask = DiscoveryMask::of(Mechanism::Group);
        assert!(mask.contains(Mechanism::Group));
        assert!(!mask.contains(Mechanism::Locator));

        mask.insert(Mechanism::Locator);
        assert_eq!(mask, DiscoveryMask::BOTH);
        assert_eq!(mask.bits(), 3);

        mask.remove(Mechanism::Group);
        assert_eq!(mask, DiscoveryMask::LOCATOR);
        mask.remove(Mechanism::Locator);
        assert!(mask.is_empty());
        assert_eq!(format!("{mask:?}"), "NONE");
    }

    #[test]
    fn new_record_starts_discovered_by_its_source() {
        let id = ServiceId::random();
        let record = RegistrarRecord::new(Arc::new(Reg(id)), vec!["a".into()], Mechanism::Locator);
        assert_eq!(record.id(), id);
        let state = record.lock();
        assert_eq!(state.mask, DiscoveryMask::LOCATOR);
        assert!(!state.comm_discard && !state.discarded);
    }
}
