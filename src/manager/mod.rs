//! The discovery manager: one managed set over group and locator discovery.
//!
//! # Example
//!
//! ```ignore
//! let groups = Arc::new(ManualGroupDiscovery::new(GroupSet::only(["public"])));
//! let manager = LookupDiscoveryManager::builder(groups.clone(), Arc::new(MyProbe))
//!     .locators(["jini://lookup.example.org".parse()?])
//!     .listener(Arc::new(MyListener))
//!     .spawn()?;
//!
//! // Feed multicast announcements into the group engine.
//! groups.announce(registrar, ["public"]);
//! ```

mod classify;
pub mod record;

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use arc_swap::ArcSwap;
use parking_lot::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::config::DiscoveryConfig;
use crate::discovery::{
    engine_channel, EngineEvents, EngineSink, GroupDiscovery, LocatorDiscovery, Mechanism,
    UnicastProbe,
};
use crate::error::{Error, Result};
use crate::event::{DiscoveryEvent, EventKind, ListenerHandle};
use crate::locator::LookupLocator;
use crate::notify::NotificationQueue;
use crate::registrar::{GroupSet, RegistrarHandle, ServiceId};
use crate::stream::DiscoveryEvents;

use self::record::{DiscoveryMask, RegistrarRecord};

/// State shared between the public handle and the classifier task.
pub(crate) struct Core {
    group: Arc<dyn GroupDiscovery>,
    group_sink: EngineSink,
    locator: LocatorDiscovery,
    records: RwLock<HashMap<ServiceId, Arc<RegistrarRecord>>>,
    /// Orders classification decisions against listener registration.
    sequencer: Mutex<()>,
    listeners: ArcSwap<Vec<ListenerHandle>>,
    notifier: NotificationQueue,
    terminated: AtomicBool,
    classifier: Mutex<Option<JoinHandle<()>>>,
}

impl Core {
    fn is_terminated(&self) -> bool {
        self.terminated.load(Ordering::SeqCst)
    }

    fn ensure_running(&self) -> Result<()> {
        if self.is_terminated() {
            Err(Error::Terminated)
        } else {
            Ok(())
        }
    }

    /// Enqueue an event for every current listener. Caller holds the sequencer.
    fn notify(&self, kind: EventKind, entries: Vec<(RegistrarHandle, Vec<String>)>) {
        let listeners = self.listeners.load().to_vec();
        self.notifier
            .enqueue(listeners, kind, DiscoveryEvent::new(entries));
    }

    fn snapshot(&self) -> Vec<(RegistrarHandle, Vec<String>)> {
        self.records.read().values().map(|r| r.snapshot()).collect()
    }

    pub(crate) fn add_listener(&self, listener: ListenerHandle) -> Result<()> {
        let _seq = self.sequencer.lock();
        self.ensure_running()?;
        let current = self.listeners.load_full();
        if current.iter().any(|l| same_listener(l, &listener)) {
            debug!("listener already registered");
            return Ok(());
        }
        let mut next = current.to_vec();
        next.push(Arc::clone(&listener));
        self.listeners.store(Arc::new(next));

        // Replay the current set before any later live event can be enqueued.
        let replay = DiscoveryEvent::new(self.snapshot());
        self.notifier
            .enqueue(vec![listener], EventKind::Discovered, replay);
        Ok(())
    }

    pub(crate) fn remove_listener(&self, listener: &ListenerHandle) -> Result<()> {
        let _seq = self.sequencer.lock();
        self.ensure_running()?;
        let current = self.listeners.load_full();
        if current.iter().any(|l| same_listener(l, listener)) {
            let next: Vec<ListenerHandle> = current
                .iter()
                .filter(|l| !same_listener(l, listener))
                .cloned()
                .collect();
            self.listeners.store(Arc::new(next));
        }
        Ok(())
    }

    fn terminate(&self) {
        let _seq = self.sequencer.lock();
        if self.terminated.swap(true, Ordering::SeqCst) {
            return;
        }
        self.locator.terminate();
        self.group.unsubscribe(&self.group_sink);
        self.group.terminate();
        if let Some(task) = self.classifier.lock().take() {
            task.abort();
        }
        self.listeners.store(Arc::new(Vec::new()));
        self.records.write().clear();
        self.notifier.close();
        info!("lookup discovery manager terminated");
    }
}

/// Listener identity is the allocation, not the vtable.
fn same_listener(a: &ListenerHandle, b: &ListenerHandle) -> bool {
    std::ptr::eq(Arc::as_ptr(a) as *const (), Arc::as_ptr(b) as *const ())
}

async fn run_classifier(core: Weak<Core>, mut events: EngineEvents) {
    while let Some(event) = events.recv().await {
        let Some(core) = core.upgrade() else {
            break;
        };
        core.classify(event);
    }
    debug!("classifier stopped");
}

/// Discovers lookup services by group and by locator, presenting one
/// deduplicated stream of discovered, discarded and changed events.
///
/// Dropping the manager terminates it.
pub struct LookupDiscoveryManager {
    core: Arc<Core>,
}

impl LookupDiscoveryManager {
    /// Start building a manager over a group engine and a unicast probe.
    pub fn builder(
        group: Arc<dyn GroupDiscovery>,
        probe: Arc<dyn UnicastProbe>,
    ) -> ManagerBuilder {
        ManagerBuilder::new(group, probe)
    }

    /// Groups currently of interest.
    pub fn groups(&self) -> Result<GroupSet> {
        self.core.ensure_running()?;
        Ok(self.core.group.groups())
    }

    /// Add groups of interest. An empty slice is a no-op.
    pub fn add_groups(&self, groups: &[String]) -> Result<()> {
        self.core.ensure_running()?;
        if groups.is_empty() {
            return Ok(());
        }
        self.core.group.add_groups(groups)
    }

    /// Remove groups of interest. An empty slice is a no-op.
    pub fn remove_groups(&self, groups: &[String]) -> Result<()> {
        self.core.ensure_running()?;
        if groups.is_empty() {
            return Ok(());
        }
        self.core.group.remove_groups(groups)
    }

    /// Replace the groups of interest. `GroupSet::All` lifts the restriction,
    /// an empty `GroupSet::Only` stops group discovery.
    pub fn set_groups(&self, groups: GroupSet) -> Result<()> {
        self.core.ensure_running()?;
        self.core.group.set_groups(groups)
    }

    /// All desired locators.
    pub fn locators(&self) -> Result<Vec<LookupLocator>> {
        self.core.ensure_running()?;
        Ok(self.core.locator.locators())
    }

    /// Add locators to discover.
    pub fn add_locators(&self, locators: &[LookupLocator]) -> Result<()> {
        self.core.ensure_running()?;
        self.core.locator.add_locators(locators)
    }

    /// Stop discovering locators; registrars only they reached are discarded.
    pub fn remove_locators(&self, locators: &[LookupLocator]) -> Result<()> {
        self.core.ensure_running()?;
        self.core.locator.remove_locators(locators)
    }

    /// Replace the desired locators. An empty slice removes them all.
    pub fn set_locators(&self, locators: &[LookupLocator]) -> Result<()> {
        self.core.ensure_running()?;
        self.core.locator.set_locators(locators)
    }

    /// Desired locators whose lookup service has been found.
    pub fn discovered_locators(&self) -> Result<Vec<LookupLocator>> {
        self.core.ensure_running()?;
        Ok(self.core.locator.discovered_locators())
    }

    /// Desired locators still being retried.
    pub fn undiscovered_locators(&self) -> Result<Vec<LookupLocator>> {
        self.core.ensure_running()?;
        Ok(self.core.locator.undiscovered_locators())
    }

    /// Every registrar in the managed set.
    pub fn registrars(&self) -> Result<Vec<RegistrarHandle>> {
        self.core.ensure_running()?;
        Ok(self
            .core
            .records
            .read()
            .values()
            .map(|r| r.proxy().clone())
            .collect())
    }

    /// Which mechanisms currently claim `registrar`, if it is managed.
    pub fn discovered_by(&self, registrar: &RegistrarHandle) -> Result<Option<DiscoveryMask>> {
        self.core.ensure_running()?;
        let record = self.core.records.read().get(&registrar.service_id()).cloned();
        Ok(record.map(|r| r.lock().mask))
    }

    /// Discard `registrar` as unreachable.
    ///
    /// Group discovery is asked first when it claims the registrar; the
    /// discard then chains to locator discovery, so listeners see a single
    /// discarded event.
    pub fn discard(&self, registrar: &RegistrarHandle) -> Result<()> {
        let core = &self.core;
        let _seq = core.sequencer.lock();
        core.ensure_running()?;
        let id = registrar.service_id();
        let Some(record) = core.records.read().get(&id).cloned() else {
            debug!(service_id = %id, "discard of unmanaged registrar ignored");
            return Ok(());
        };
        let mask = {
            let mut state = record.lock();
            if state.discarded {
                return Ok(());
            }
            state.comm_discard = true;
            state.mask
        };
        debug!(service_id = %id, ?mask, "client discard");
        if mask.contains(Mechanism::Group) {
            core.group.discard(record.proxy());
        } else if mask.contains(Mechanism::Locator) {
            core.locator.discard(record.proxy())?;
        }
        Ok(())
    }

    /// Register a listener. It first receives one discovered event holding
    /// the whole current set (if non-empty), then live events. Registering
    /// the same listener twice has no effect.
    pub fn add_discovery_listener(&self, listener: ListenerHandle) -> Result<()> {
        self.core.add_listener(listener)
    }

    /// Unregister a listener. Events already queued for it are still delivered.
    pub fn remove_discovery_listener(&self, listener: &ListenerHandle) -> Result<()> {
        self.core.remove_listener(listener)
    }

    /// Subscribe to all events, including changes, as a stream.
    pub fn subscribe(&self) -> Result<DiscoveryEvents> {
        DiscoveryEvents::register(&self.core)
    }

    /// Stop both engines and all notification. Idempotent.
    ///
    /// Notifications committed before this call may still be delivered.
    pub fn terminate(&self) {
        self.core.terminate();
    }

    /// Whether [`terminate`](Self::terminate) has been called.
    pub fn is_terminated(&self) -> bool {
        self.core.is_terminated()
    }
}

impl Drop for LookupDiscoveryManager {
    fn drop(&mut self) {
        self.core.terminate();
    }
}

/// Fluent builder for [`LookupDiscoveryManager`].
pub struct ManagerBuilder {
    group: Arc<dyn GroupDiscovery>,
    probe: Arc<dyn UnicastProbe>,
    config: DiscoveryConfig,
    groups: Option<GroupSet>,
    locators: Vec<LookupLocator>,
    listeners: Vec<ListenerHandle>,
}

impl ManagerBuilder {
    fn new(group: Arc<dyn GroupDiscovery>, probe: Arc<dyn UnicastProbe>) -> Self {
        Self {
            group,
            probe,
            config: DiscoveryConfig::default(),
            groups: None,
            locators: Vec::new(),
            listeners: Vec::new(),
        }
    }

    /// Engine tunables.
    pub fn config(mut self, config: DiscoveryConfig) -> Self {
        self.config = config;
        self
    }

    /// Initial groups of interest. Default: whatever the group engine has.
    pub fn groups(mut self, groups: GroupSet) -> Self {
        self.groups = Some(groups);
        self
    }

    /// Initial locators.
    pub fn locators<I: IntoIterator<Item = LookupLocator>>(mut self, locators: I) -> Self {
        self.locators.extend(locators);
        self
    }

    /// Initial listener.
    pub fn listener(mut self, listener: ListenerHandle) -> Self {
        self.listeners.push(listener);
        self
    }

    /// Start the manager. Must be called from within a tokio runtime.
    pub fn spawn(self) -> Result<LookupDiscoveryManager> {
        self.config.validate()?;
        let (tx, events) = engine_channel();
        let group_sink = EngineSink::new(Mechanism::Group, tx.clone());
        let locator_sink = EngineSink::new(Mechanism::Locator, tx);
        let locator = LocatorDiscovery::new(self.probe, &self.config, locator_sink)?;

        if let Some(groups) = self.groups {
            self.group.set_groups(groups)?;
        }
        self.group.subscribe(group_sink.clone());

        let core = Arc::new(Core {
            group: self.group,
            group_sink,
            locator,
            records: RwLock::new(HashMap::new()),
            sequencer: Mutex::new(()),
            listeners: ArcSwap::from_pointee(Vec::new()),
            notifier: NotificationQueue::spawn()?,
            terminated: AtomicBool::new(false),
            classifier: Mutex::new(None),
        });
        let task = tokio::spawn(run_classifier(Arc::downgrade(&core), events));
        *core.classifier.lock() = Some(task);

        let manager = LookupDiscoveryManager { core };
        manager.core.locator.add_locators(&self.locators)?;
        for listener in self.listeners {
            manager.add_discovery_listener(listener)?;
        }
        info!(
            groups = ?manager.core.group.groups(),
            locators = self.locators.len(),
            "lookup discovery manager started"
        );
        Ok(manager)
    }
}
