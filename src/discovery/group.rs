//! Group discovery seam and an in-process implementation.

use std::collections::{BTreeSet, HashMap, HashSet};

use parking_lot::Mutex;
use tracing::debug;

use super::EngineSink;
use crate::error::{Error, Result};
use crate::registrar::{same_groups, GroupSet, RegistrarHandle, ServiceId};

/// A group discovery engine.
///
/// The packet-level multicast protocol lives behind this trait. Engines
/// report through every subscribed [`EngineSink`]; a newly subscribed sink is
/// first told about every registrar the engine already considers discovered.
pub trait GroupDiscovery: Send + Sync + 'static {
    /// Start reporting to `sink`.
    fn subscribe(&self, sink: EngineSink);

    /// Stop reporting to `sink`.
    fn unsubscribe(&self, sink: &EngineSink);

    /// Groups currently of interest.
    fn groups(&self) -> GroupSet;

    /// Replace the groups of interest.
    fn set_groups(&self, groups: GroupSet) -> Result<()>;

    /// Add groups of interest. Fails when the set is unrestricted.
    fn add_groups(&self, groups: &[String]) -> Result<()>;

    /// Remove groups of interest. Fails when the set is unrestricted.
    fn remove_groups(&self, groups: &[String]) -> Result<()>;

    /// Drop a registrar as unreachable; it may be rediscovered later.
    fn discard(&self, registrar: &RegistrarHandle);

    /// Registrars currently discovered by this engine.
    fn registrars(&self) -> Vec<RegistrarHandle>;

    /// Stop discovery. Idempotent.
    fn terminate(&self);
}

struct Announced {
    registrar: RegistrarHandle,
    groups: Vec<String>,
}

struct GroupState {
    groups: GroupSet,
    terminated: bool,
    sinks: Vec<EngineSink>,
    announced: HashMap<ServiceId, Announced>,
    discovered: HashSet<ServiceId>,
}

impl GroupState {
    fn emit<F>(&mut self, f: F)
    where
        F: Fn(&EngineSink) -> bool,
    {
        self.sinks.retain(|sink| f(sink));
    }

    /// Bring `discovered` in line with the group filter after it changed.
    fn reevaluate(&mut self) {
        let mut gained = Vec::new();
        let mut lost = Vec::new();
        for (id, entry) in &self.announced {
            let wanted = self.groups.intersects(&entry.groups);
            let known = self.discovered.contains(id);
            if wanted && !known {
                gained.push((*id, entry.registrar.clone(), entry.groups.clone()));
            } else if !wanted && known {
                lost.push((*id, entry.registrar.clone(), entry.groups.clone()));
            }
        }
        for (id, registrar, groups) in lost {
            debug!(service_id = %id, "registrar no longer in groups of interest");
            self.discovered.remove(&id);
            self.emit(|s| s.discarded(registrar.clone(), groups.clone(), false));
        }
        for (id, registrar, groups) in gained {
            debug!(service_id = %id, "registrar now in groups of interest");
            self.discovered.insert(id);
            self.emit(|s| s.discovered(registrar.clone(), groups.clone()));
        }
    }

    fn drop_registrar(&mut self, id: ServiceId) {
        if let Some(entry) = self.announced.remove(&id) {
            if self.discovered.remove(&id) {
                let Announced { registrar, groups } = entry;
                self.emit(|s| s.discarded(registrar.clone(), groups.clone(), true));
            }
        }
    }
}

/// Group discovery fed by the embedding application.
///
/// Whatever receives multicast announcements (or any other source of group
/// membership) calls [`announce`](Self::announce) and
/// [`lose`](Self::lose); this type applies the group filter and reports the
/// resulting discovered, discarded and changed signals.
pub struct ManualGroupDiscovery {
    state: Mutex<GroupState>,
}

impl ManualGroupDiscovery {
    /// Create an engine interested in `groups`.
    pub fn new(groups: GroupSet) -> Self {
        Self {
            state: Mutex::new(GroupState {
                groups,
                terminated: false,
                sinks: Vec::new(),
                announced: HashMap::new(),
                discovered: HashSet::new(),
            }),
        }
    }

    /// A lookup service announced itself as a member of `groups`.
    pub fn announce<I, S>(&self, registrar: RegistrarHandle, groups: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let groups: Vec<String> = groups.into_iter().map(Into::into).collect();
        let id = registrar.service_id();
        let mut state = self.state.lock();
        if state.terminated {
            return;
        }
        let wanted = state.groups.intersects(&groups);
        let known = state.discovered.contains(&id);
        let previous = state.announced.insert(
            id,
            Announced {
                registrar: registrar.clone(),
                groups: groups.clone(),
            },
        );

        match (known, wanted) {
            (false, true) => {
                debug!(service_id = %id, ?groups, "registrar announced");
                state.discovered.insert(id);
                state.emit(|s| s.discovered(registrar.clone(), groups.clone()));
            }
            (true, true) => {
                let changed = previous.is_some_and(|p| !same_groups(&p.groups, &groups));
                if changed {
                    debug!(service_id = %id, ?groups, "registrar member groups changed");
                    state.emit(|s| s.changed(registrar.clone(), groups.clone()));
                }
            }
            (true, false) => {
                debug!(service_id = %id, ?groups, "registrar left the groups of interest");
                state.discovered.remove(&id);
                state.emit(|s| s.discarded(registrar.clone(), groups.clone(), false));
            }
            (false, false) => {}
        }
    }

    /// A lookup service stopped announcing and is considered unreachable.
    pub fn lose(&self, registrar: &RegistrarHandle) {
        let mut state = self.state.lock();
        if state.terminated {
            return;
        }
        debug!(service_id = %registrar.service_id(), "registrar lost");
        state.drop_registrar(registrar.service_id());
    }
}

impl Default for ManualGroupDiscovery {
    fn default() -> Self {
        Self::new(GroupSet::All)
    }
}

impl GroupDiscovery for ManualGroupDiscovery {
    fn subscribe(&self, sink: EngineSink) {
        let mut state = self.state.lock();
        if state.terminated {
            return;
        }
        for id in &state.discovered {
            if let Some(entry) = state.announced.get(id) {
                sink.discovered(entry.registrar.clone(), entry.groups.clone());
            }
        }
        state.sinks.push(sink);
    }

    fn unsubscribe(&self, sink: &EngineSink) {
        self.state
            .lock()
            .sinks
            .retain(|s| !s.same_channel(sink));
    }

    fn groups(&self) -> GroupSet {
        self.state.lock().groups.clone()
    }

    fn set_groups(&self, groups: GroupSet) -> Result<()> {
        let mut state = self.state.lock();
        if state.terminated {
            return Err(Error::Terminated);
        }
        state.groups = groups;
        state.reevaluate();
        Ok(())
    }

    fn add_groups(&self, groups: &[String]) -> Result<()> {
        let mut state = self.state.lock();
        if state.terminated {
            return Err(Error::Terminated);
        }
        let GroupSet::Only(current) = &mut state.groups else {
            return Err(Error::Unsupported(
                "cannot add groups to the unrestricted group set".into(),
            ));
        };
        let before = current.len();
        current.extend(groups.iter().cloned());
        if current.len() != before {
            state.reevaluate();
        }
        Ok(())
    }

    fn remove_groups(&self, groups: &[String]) -> Result<()> {
        let mut state = self.state.lock();
        if state.terminated {
            return Err(Error::Terminated);
        }
        let GroupSet::Only(current) = &mut state.groups else {
            return Err(Error::Unsupported(
                "cannot remove groups from the unrestricted group set".into(),
            ));
        };
        let doomed: BTreeSet<&String> = groups.iter().collect();
        let before = current.len();
        current.retain(|g| !doomed.contains(g));
        if current.len() != before {
            state.reevaluate();
        }
        Ok(())
    }

    fn discard(&self, registrar: &RegistrarHandle) {
        let mut state = self.state.lock();
        if state.terminated {
            return;
        }
        state.drop_registrar(registrar.service_id());
    }

    fn registrars(&self) -> Vec<RegistrarHandle> {
        let state = self.state.lock();
        state
            .discovered
            .iter()
            .filter_map(|id| state.announced.get(id))
            .map(|e| e.registrar.clone())
            .collect()
    }

    fn terminate(&self) {
        let mut state = self.state.lock();
        if state.terminated {
            return;
        }
        state.terminated = true;
        state.sinks.clear();
        state.discovered.clear();
        state.announced.clear();
        debug!("group discovery terminated");
    }
}
