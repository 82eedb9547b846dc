//! Merging the two engines' signals into the managed set.
//!
//! Runs on the classifier task only, with the sequencing lock held, so each
//! decision and the notification it produces are enqueued atomically with
//! respect to listener registration and every other decision.

use std::sync::Arc;

use tracing::{debug, trace};

use super::record::RegistrarRecord;
use super::Core;
use crate::discovery::{EngineEvent, Mechanism, Signal};
use crate::event::EventKind;
use crate::registrar::{same_groups, RegistrarHandle};

impl Core {
    pub(super) fn classify(&self, event: EngineEvent) {
        let _seq = self.sequencer.lock();
        if self.is_terminated() {
            return;
        }
        let EngineEvent {
            source,
            signal,
            registrar,
            groups,
        } = event;
        trace!(%source, ?signal, service_id = %registrar.service_id(), "engine signal");
        match signal {
            // A change from an engine is a re-discovery with new groups.
            Signal::Discovered | Signal::Changed => self.on_discovered(source, registrar, groups),
            Signal::Discarded { unreachable } => {
                self.on_discarded(source, registrar, groups, unreachable)
            }
        }
    }

    fn on_discovered(&self, source: Mechanism, registrar: RegistrarHandle, groups: Vec<String>) {
        let id = registrar.service_id();
        // Find-or-create under the structural write lock.
        let existing = {
            let mut records = self.records.write();
            match records.get(&id) {
                Some(record) => Some(Arc::clone(record)),
                None => {
                    let record = RegistrarRecord::new(registrar.clone(), groups.clone(), source);
                    records.insert(id, Arc::new(record));
                    None
                }
            }
        };

        let Some(record) = existing else {
            debug!(%source, service_id = %id, ?groups, "registrar discovered");
            self.notify(EventKind::Discovered, vec![(registrar, groups)]);
            return;
        };

        let mut state = record.lock();
        state.mask.insert(source);
        if source == Mechanism::Group && !same_groups(&state.groups, &groups) {
            debug!(service_id = %id, old = ?state.groups, new = ?groups, "member groups changed");
            state.groups = groups.clone();
            drop(state);
            self.notify(EventKind::Changed, vec![(record.proxy().clone(), groups)]);
        } else {
            trace!(%source, service_id = %id, mask = ?state.mask, "already discovered");
        }
    }

    fn on_discarded(
        &self,
        source: Mechanism,
        registrar: RegistrarHandle,
        groups: Vec<String>,
        unreachable: bool,
    ) {
        let id = registrar.service_id();
        let Some(record) = self.records.read().get(&id).cloned() else {
            trace!(%source, service_id = %id, "discard for unmanaged registrar");
            return;
        };

        let mut state = record.lock();
        if state.discarded || !state.mask.contains(source) {
            return;
        }
        state.mask.remove(source);

        if state.mask.is_empty() {
            state.discarded = true;
            let last_groups = state.groups.clone();
            drop(state);
            self.records.write().remove(&record.id());
            debug!(%source, service_id = %id, "registrar discarded");
            self.notify(EventKind::Discarded, vec![(record.proxy().clone(), last_groups)]);
            return;
        }

        // The other mechanism still claims the registrar.
        match source {
            Mechanism::Group => {
                let interested = self.group.groups().intersects(&groups);
                if state.comm_discard || interested {
                    drop(state);
                    debug!(service_id = %id, "group discard of reachable interest, chaining to locator discovery");
                    if let Err(err) = self.locator.discard(record.proxy()) {
                        debug!(service_id = %id, error = %err, "chained locator discard skipped");
                    }
                } else if !same_groups(&state.groups, &groups) {
                    state.groups = groups.clone();
                    drop(state);
                    debug!(service_id = %id, ?groups, "no longer in groups of interest, still located");
                    self.notify(EventKind::Changed, vec![(record.proxy().clone(), groups)]);
                } else {
                    trace!(service_id = %id, "group interest dropped, still located");
                }
            }
            Mechanism::Locator => {
                if state.comm_discard || unreachable {
                    drop(state);
                    debug!(service_id = %id, "locator discard, chaining to group discovery");
                    self.group.discard(record.proxy());
                } else {
                    trace!(service_id = %id, "locator removed, still discovered by group");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::mpsc as std_mpsc;
    use std::time::Duration;

    use async_trait::async_trait;
    use parking_lot::Mutex;

    use super::*;
    use crate::discovery::{EngineSink, GroupDiscovery, ProbeResult, UnicastProbe};
    use crate::error::{Error, Result};
    use crate::event::{DiscoveryEvent, DiscoveryListener};
    use crate::locator::LookupLocator;
    use crate::manager::record::DiscoveryMask;
    use crate::manager::LookupDiscoveryManager;
    use crate::registrar::{GroupSet, Registrar, ServiceId};

    #[derive(Debug)]
    struct Reg(ServiceId);

    impl Registrar for Reg {
        fn service_id(&self) -> ServiceId {
            self.0
        }
    }

    /// Group engine that only records the discards it is asked for.
    #[derive(Default)]
    struct DiscardLog {
        discards: Mutex<Vec<ServiceId>>,
    }

    impl GroupDiscovery for DiscardLog {
        fn subscribe(&self, _: EngineSink) {}

        fn unsubscribe(&self, _: &EngineSink) {}

        fn groups(&self) -> GroupSet {
            GroupSet::All
        }

        fn set_groups(&self, _: GroupSet) -> Result<()> {
            Ok(())
        }

        fn add_groups(&self, _: &[String]) -> Result<()> {
            Ok(())
        }

        fn remove_groups(&self, _: &[String]) -> Result<()> {
            Ok(())
        }

        fn discard(&self, registrar: &RegistrarHandle) {
            self.discards.lock().push(registrar.service_id());
        }

        fn registrars(&self) -> Vec<RegistrarHandle> {
            Vec::new()
        }

        fn terminate(&self) {}
    }

    struct Refuse;

    #[async_trait]
    impl UnicastProbe for Refuse {
        async fn probe(&self, locator: &LookupLocator) -> Result<ProbeResult> {
            Err(Error::probe(locator, "connection refused"))
        }
    }

    struct Forward(std_mpsc::Sender<(EventKind, Vec<ServiceId>)>);

    impl DiscoveryListener for Forward {
        fn discovered(&self, event: &DiscoveryEvent) {
            let _ = self.0.send((EventKind::Discovered, event.service_ids()));
        }

        fn discarded(&self, event: &DiscoveryEvent) {
            let _ = self.0.send((EventKind::Discarded, event.service_ids()));
        }
    }

    struct Fixture {
        manager: LookupDiscoveryManager,
        group: Arc<DiscardLog>,
        events: std_mpsc::Receiver<(EventKind, Vec<ServiceId>)>,
        registrar: RegistrarHandle,
    }

    impl Fixture {
        fn new() -> Self {
            let group = Arc::new(DiscardLog::default());
            let (tx, events) = std_mpsc::channel();
            let manager = LookupDiscoveryManager::builder(group.clone(), Arc::new(Refuse))
                .listener(Arc::new(Forward(tx)))
                .spawn()
                .unwrap();
            Self {
                manager,
                group,
                events,
                registrar: Arc::new(Reg(ServiceId::random())),
            }
        }

        fn signal(&self, source: Mechanism, signal: Signal) {
            self.manager.core.classify(EngineEvent {
                source,
                signal,
                registrar: self.registrar.clone(),
                groups: vec!["public".to_string()],
            });
        }

        /// Discovered by both mechanisms, with the single discovered event consumed.
        fn discovered_by_both(&self) {
            self.signal(Mechanism::Locator, Signal::Discovered);
            self.signal(Mechanism::Group, Signal::Discovered);
            assert_eq!(self.mask(), Some(DiscoveryMask::BOTH));
            self.expect(EventKind::Discovered);
        }

        fn mask(&self) -> Option<DiscoveryMask> {
            self.manager.discovered_by(&self.registrar).unwrap()
        }

        fn expect(&self, kind: EventKind) {
            let got = self.events.recv_timeout(Duration::from_secs(5)).unwrap();
            assert_eq!(got, (kind, vec![self.registrar.service_id()]));
        }

        fn assert_quiet(&self) {
            let got = self.events.recv_timeout(Duration::from_millis(100));
            assert!(got.is_err(), "unexpected event {got:?}");
        }
    }

    #[tokio::test]
    async fn unreachable_locator_discard_chains_to_group_discovery() {
        let fx = Fixture::new();
        fx.discovered_by_both();

        fx.signal(Mechanism::Locator, Signal::Discarded { unreachable: true });
        assert_eq!(*fx.group.discards.lock(), vec![fx.registrar.service_id()]);
        assert_eq!(fx.mask(), Some(DiscoveryMask::GROUP));
        fx.assert_quiet();

        // The group engine answers the chained discard.
        fx.signal(Mechanism::Group, Signal::Discarded { unreachable: true });
        assert_eq!(fx.mask(), None);
        fx.expect(EventKind::Discarded);
        fx.assert_quiet();
    }

    #[tokio::test]
    async fn client_discard_flag_chains_locator_removal_to_group_discovery() {
        let fx = Fixture::new();
        fx.discovered_by_both();
        let record = fx
            .manager
            .core
            .records
            .read()
            .get(&fx.registrar.service_id())
            .cloned()
            .unwrap();
        record.lock().comm_discard = true;

        fx.signal(Mechanism::Locator, Signal::Discarded { unreachable: false });
        assert_eq!(*fx.group.discards.lock(), vec![fx.registrar.service_id()]);
        assert_eq!(fx.mask(), Some(DiscoveryMask::GROUP));
    }

    #[tokio::test]
    async fn removed_locator_keeps_group_discovered_registrar_silently() {
        let fx = Fixture::new();
        fx.discovered_by_both();

        fx.signal(Mechanism::Locator, Signal::Discarded { unreachable: false });
        assert!(fx.group.discards.lock().is_empty());
        assert_eq!(fx.mask(), Some(DiscoveryMask::GROUP));
        fx.assert_quiet();
    }
}
