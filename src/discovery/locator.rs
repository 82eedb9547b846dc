//! Locator discovery: unicast probing with capped backoff.
//!
//! Every desired locator that is not yet discovered owns a [`LocatorTask`].
//! First attempts go straight to the bounded worker pool; failed attempts
//! park in the [`WakeupManager`] until their deadline and only then take a
//! pool slot again. Probes run without any lock held.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tokio::time::{timeout, Instant};
use tracing::{debug, info, warn};

use super::backoff::Backoff;
use super::unicast::{ProbeResult, UnicastProbe};
use super::wakeup::{Ticket, WakeupManager};
use super::EngineSink;
use crate::config::DiscoveryConfig;
use crate::error::{Error, Result};
use crate::locator::LookupLocator;
use crate::registrar::{RegistrarHandle, ServiceId};

/// Retry state for one desired, undiscovered locator.
#[derive(Debug, Clone)]
struct LocatorTask {
    ticket: Ticket,
    try_index: usize,
    next_try: Instant,
}

#[derive(Default)]
struct State {
    terminated: bool,
    pending: HashMap<LookupLocator, LocatorTask>,
    discovered: HashMap<LookupLocator, ProbeResult>,
    inflight: HashMap<Ticket, JoinHandle<()>>,
}

impl State {
    fn shares_registrar(&self, id: ServiceId) -> bool {
        self.discovered
            .values()
            .any(|r| r.registrar.service_id() == id)
    }
}

struct Inner {
    probe: Arc<dyn UnicastProbe>,
    backoff: Backoff,
    probe_timeout: Duration,
    discard_try_index: usize,
    pool: Arc<Semaphore>,
    sink: EngineSink,
    wakeup: WakeupManager,
    next_ticket: AtomicU64,
    state: Mutex<State>,
}

/// Unicast discovery engine for a mutable set of locators.
///
/// Reports through its [`EngineSink`]; never gives up on a desired locator.
pub struct LocatorDiscovery {
    inner: Arc<Inner>,
}

impl LocatorDiscovery {
    /// Create the engine. Must be called from within a tokio runtime.
    pub fn new(
        probe: Arc<dyn UnicastProbe>,
        config: &DiscoveryConfig,
        sink: EngineSink,
    ) -> Result<Self> {
        config.validate()?;
        let inner = Arc::new_cyclic(|weak: &Weak<Inner>| {
            let weak = weak.clone();
            let wakeup = WakeupManager::spawn(move |ticket| {
                if let Some(inner) = weak.upgrade() {
                    inner.on_wakeup(ticket);
                }
            });
            Inner {
                probe,
                backoff: Backoff::new(config.backoff.clone()),
                probe_timeout: config.probe_timeout,
                discard_try_index: config.discard_try_index,
                pool: Arc::new(Semaphore::new(config.max_inflight)),
                sink,
                wakeup,
                next_ticket: AtomicU64::new(1),
                state: Mutex::new(State::default()),
            }
        });
        Ok(Self { inner })
    }

    /// All desired locators, discovered or not.
    pub fn locators(&self) -> Vec<LookupLocator> {
        let state = self.inner.state.lock();
        let mut all: Vec<_> = state
            .pending
            .keys()
            .chain(state.discovered.keys())
            .cloned()
            .collect();
        all.sort();
        all
    }

    /// Locators whose lookup service has been found.
    pub fn discovered_locators(&self) -> Vec<LookupLocator> {
        let mut v: Vec<_> = self.inner.state.lock().discovered.keys().cloned().collect();
        v.sort();
        v
    }

    /// Locators still being retried.
    pub fn undiscovered_locators(&self) -> Vec<LookupLocator> {
        let mut v: Vec<_> = self.inner.state.lock().pending.keys().cloned().collect();
        v.sort();
        v
    }

    /// Registrars found through unicast discovery, one per lookup service.
    pub fn registrars(&self) -> Vec<RegistrarHandle> {
        let state = self.inner.state.lock();
        let mut seen = HashSet::new();
        state
            .discovered
            .values()
            .filter(|r| seen.insert(r.registrar.service_id()))
            .map(|r| r.registrar.clone())
            .collect()
    }

    /// Start discovering `locators`. Already desired locators are ignored.
    pub fn add_locators(&self, locators: &[LookupLocator]) -> Result<()> {
        let mut state = self.inner.state.lock();
        if state.terminated {
            return Err(Error::Terminated);
        }
        self.inner.add(&mut state, locators);
        Ok(())
    }

    /// Stop discovering `locators`; discovered ones are reported discarded.
    pub fn remove_locators(&self, locators: &[LookupLocator]) -> Result<()> {
        let mut state = self.inner.state.lock();
        if state.terminated {
            return Err(Error::Terminated);
        }
        self.inner.remove(&mut state, locators);
        Ok(())
    }

    /// Replace the desired set with `locators`.
    pub fn set_locators(&self, locators: &[LookupLocator]) -> Result<()> {
        let mut state = self.inner.state.lock();
        if state.terminated {
            return Err(Error::Terminated);
        }
        let desired: HashSet<&LookupLocator> = locators.iter().collect();
        let unwanted: Vec<LookupLocator> = state
            .pending
            .keys()
            .chain(state.discovered.keys())
            .filter(|l| !desired.contains(l))
            .cloned()
            .collect();
        self.inner.remove(&mut state, &unwanted);
        self.inner.add(&mut state, locators);
        Ok(())
    }

    /// Move a discovered registrar back to retrying after a short forced delay.
    ///
    /// Returns true when some locator was discovered with that registrar.
    pub fn discard(&self, registrar: &RegistrarHandle) -> Result<bool> {
        let mut state = self.inner.state.lock();
        if state.terminated {
            return Err(Error::Terminated);
        }
        Ok(self.inner.discard(&mut state, registrar.service_id()))
    }

    /// Stop all scheduling, cancel pending and in-flight attempts.
    ///
    /// No signal is emitted after this returns. Idempotent.
    pub fn terminate(&self) {
        let inflight = {
            let mut state = self.inner.state.lock();
            if state.terminated {
                return;
            }
            state.terminated = true;
            state.pending.clear();
            state.discovered.clear();
            std::mem::take(&mut state.inflight)
        };
        self.inner.wakeup.stop();
        self.inner.pool.close();
        for (_, handle) in inflight {
            handle.abort();
        }
        info!("locator discovery terminated");
    }

    /// Whether [`terminate`](Self::terminate) has been called.
    pub fn is_terminated(&self) -> bool {
        self.inner.state.lock().terminated
    }
}

impl Inner {
    fn add(self: &Arc<Self>, state: &mut State, locators: &[LookupLocator]) {
        let now = Instant::now();
        for locator in locators {
            if state.pending.contains_key(locator) || state.discovered.contains_key(locator) {
                continue;
            }
            let task = LocatorTask {
                ticket: self.next_ticket.fetch_add(1, Ordering::Relaxed),
                try_index: 0,
                next_try: now,
            };
            debug!(%locator, ticket = task.ticket, "locator added");
            let ticket = task.ticket;
            state.pending.insert(locator.clone(), task);
            self.submit(state, locator.clone(), ticket);
        }
    }

    fn remove(&self, state: &mut State, locators: &[LookupLocator]) {
        for locator in locators {
            if let Some(task) = state.pending.remove(locator) {
                // An in-flight attempt for this ticket finishes but is ignored.
                self.wakeup.cancel(task.ticket);
                debug!(%locator, "pending locator removed");
            }
            if let Some(found) = state.discovered.remove(locator) {
                let id = found.registrar.service_id();
                debug!(%locator, service_id = %id, "discovered locator removed");
                if !state.shares_registrar(id) {
                    self.sink.discarded(found.registrar, found.groups, false);
                }
            }
        }
    }

    fn discard(&self, state: &mut State, id: ServiceId) -> bool {
        let locators: Vec<LookupLocator> = state
            .discovered
            .iter()
            .filter(|(_, r)| r.registrar.service_id() == id)
            .map(|(l, _)| l.clone())
            .collect();
        let mut last = None;
        let try_index = self.discard_try_index.min(self.backoff.last_index());
        let delay = self.backoff.delay(try_index.saturating_sub(1));
        let next_try = Instant::now() + delay;
        for locator in locators {
            let Some(found) = state.discovered.remove(&locator) else {
                continue;
            };
            let task = LocatorTask {
                ticket: self.next_ticket.fetch_add(1, Ordering::Relaxed),
                try_index,
                next_try,
            };
            debug!(
                %locator,
                service_id = %id,
                delay_ms = delay.as_millis() as u64,
                "registrar discarded, locator back to pending"
            );
            self.wakeup.schedule(task.next_try, task.ticket);
            state.pending.insert(locator, task);
            last = Some(found);
        }
        match last {
            Some(found) => {
                self.sink.discarded(found.registrar, found.groups, true);
                true
            }
            None => false,
        }
    }

    /// Hand an attempt for `locator` to the worker pool.
    fn submit(self: &Arc<Self>, state: &mut State, locator: LookupLocator, ticket: Ticket) {
        let inner = Arc::clone(self);
        let handle = tokio::spawn(async move {
            inner.attempt(locator, ticket).await;
        });
        state.inflight.insert(ticket, handle);
    }

    fn on_wakeup(self: &Arc<Self>, ticket: Ticket) {
        let mut state = self.state.lock();
        if state.terminated {
            return;
        }
        let locator = state
            .pending
            .iter()
            .find(|(_, t)| t.ticket == ticket)
            .map(|(l, _)| l.clone());
        if let Some(locator) = locator {
            self.submit(&mut state, locator, ticket);
        }
    }

    fn is_current(&self, locator: &LookupLocator, ticket: Ticket) -> bool {
        let state = self.state.lock();
        !state.terminated
            && state
                .pending
                .get(locator)
                .is_some_and(|t| t.ticket == ticket)
    }

    async fn attempt(self: Arc<Self>, locator: LookupLocator, ticket: Ticket) {
        let permit = match Arc::clone(&self.pool).acquire_owned().await {
            Ok(permit) => permit,
            Err(_) => return,
        };
        if !self.is_current(&locator, ticket) {
            self.state.lock().inflight.remove(&ticket);
            return;
        }

        debug!(%locator, ticket, "unicast discovery attempt");
        let outcome = match timeout(self.probe_timeout, self.probe.probe(&locator)).await {
            Ok(result) => result,
            Err(_) => Err(Error::ProbeTimeout(locator.clone())),
        };
        drop(permit);

        let mut state = self.state.lock();
        state.inflight.remove(&ticket);
        if state.terminated {
            return;
        }
        let Some(task) = state
            .pending
            .get_mut(&locator)
            .filter(|t| t.ticket == ticket)
        else {
            debug!(%locator, ticket, "locator no longer desired, dropping probe result");
            return;
        };

        match outcome {
            Ok(found) => {
                state.pending.remove(&locator);
                info!(
                    %locator,
                    service_id = %found.registrar.service_id(),
                    groups = ?found.groups,
                    "lookup service discovered by unicast"
                );
                let (registrar, groups) = (found.registrar.clone(), found.groups.clone());
                state.discovered.insert(locator, found);
                self.sink.discovered(registrar, groups);
            }
            Err(err) => {
                let delay = self.backoff.delay(task.try_index);
                task.try_index = self.backoff.next_index(task.try_index);
                task.next_try = Instant::now() + delay;
                warn!(
                    %locator,
                    error = %err,
                    try_index = task.try_index,
                    delay_ms = delay.as_millis() as u64,
                    "unicast discovery failed, will retry"
                );
                self.wakeup.schedule(task.next_try, ticket);
            }
        }
    }
}
