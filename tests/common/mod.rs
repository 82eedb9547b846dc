#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use lookup_discovery::{
    DiscoveryChangeListener, DiscoveryConfig, DiscoveryEvent, DiscoveryListener, Error, EventKind,
    LookupLocator, ProbeResult, Registrar, RegistrarHandle, Result, ServiceId, UnicastProbe,
};
use parking_lot::Mutex;
use tokio::sync::{mpsc, Notify};
use tokio::time::{sleep, timeout, Instant};

pub const WAIT: Duration = Duration::from_secs(5);

#[derive(Debug)]
pub struct TestRegistrar(pub ServiceId);

impl Registrar for TestRegistrar {
    fn service_id(&self) -> ServiceId {
        self.0
    }
}

pub fn registrar() -> RegistrarHandle {
    Arc::new(TestRegistrar(ServiceId::random()))
}

pub fn locator(host: &str) -> LookupLocator {
    LookupLocator::new(host, 4160).unwrap()
}

/// Short backoff so retries happen within a test.
pub fn fast_config() -> DiscoveryConfig {
    DiscoveryConfig::default()
        .backoff([20, 40, 80].map(Duration::from_millis))
        .probe_timeout(Duration::from_secs(1))
}

/// Unicast probe answering from a table; unknown locators are refused.
#[derive(Default)]
pub struct ScriptedProbe {
    answers: Mutex<HashMap<LookupLocator, ProbeResult>>,
    gates: Mutex<HashMap<LookupLocator, Arc<Notify>>>,
    started: Notify,
    calls: Mutex<Vec<LookupLocator>>,
}

impl ScriptedProbe {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn answer(&self, locator: &LookupLocator, registrar: &RegistrarHandle, groups: &[&str]) {
        self.answers.lock().insert(
            locator.clone(),
            ProbeResult::new(registrar.clone(), groups.iter().copied()),
        );
    }

    pub fn refuse(&self, locator: &LookupLocator) {
        self.answers.lock().remove(locator);
    }

    /// Hold probes of `locator` until the returned gate is notified.
    pub fn gate(&self, locator: &LookupLocator) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        self.gates.lock().insert(locator.clone(), gate.clone());
        gate
    }

    pub async fn wait_started(&self) {
        timeout(WAIT, self.started.notified()).await.unwrap();
    }

    pub fn calls(&self, locator: &LookupLocator) -> usize {
        self.calls.lock().iter().filter(|l| *l == locator).count()
    }
}

#[async_trait]
impl UnicastProbe for ScriptedProbe {
    async fn probe(&self, locator: &LookupLocator) -> Result<ProbeResult> {
        self.calls.lock().push(locator.clone());
        self.started.notify_one();
        let gate = self.gates.lock().get(locator).cloned();
        if let Some(gate) = gate {
            gate.notified().await;
        }
        self.answers
            .lock()
            .get(locator)
            .cloned()
            .ok_or_else(|| Error::probe(locator, "connection refused"))
    }
}

/// Listener forwarding everything it sees into a channel.
pub struct Recorder {
    tx: mpsc::UnboundedSender<(EventKind, DiscoveryEvent)>,
    wants_changes: bool,
}

impl Recorder {
    pub fn new() -> (Arc<Self>, Events) {
        Self::build(false)
    }

    pub fn with_changes() -> (Arc<Self>, Events) {
        Self::build(true)
    }

    fn build(wants_changes: bool) -> (Arc<Self>, Events) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Arc::new(Self { tx, wants_changes }), Events(rx))
    }

    fn push(&self, kind: EventKind, event: &DiscoveryEvent) {
        let _ = self.tx.send((kind, event.clone()));
    }
}

impl DiscoveryListener for Recorder {
    fn discovered(&self, event: &DiscoveryEvent) {
        self.push(EventKind::Discovered, event);
    }

    fn discarded(&self, event: &DiscoveryEvent) {
        self.push(EventKind::Discarded, event);
    }

    fn as_change_listener(&self) -> Option<&dyn DiscoveryChangeListener> {
        self.wants_changes.then_some(self as &dyn DiscoveryChangeListener)
    }
}

impl DiscoveryChangeListener for Recorder {
    fn changed(&self, event: &DiscoveryEvent) {
        self.push(EventKind::Changed, event);
    }
}

pub struct Events(mpsc::UnboundedReceiver<(EventKind, DiscoveryEvent)>);

impl Events {
    pub async fn next(&mut self) -> (EventKind, DiscoveryEvent) {
        timeout(WAIT, self.0.recv())
            .await
            .expect("timed out waiting for a discovery event")
            .expect("recorder dropped")
    }

    /// Next event, which must be `kind` for exactly `registrar`.
    pub async fn expect(&mut self, kind: EventKind, registrar: &RegistrarHandle) -> DiscoveryEvent {
        let (got, event) = self.next().await;
        assert_eq!(got, kind, "unexpected event {event:?}");
        assert_eq!(event.service_ids(), vec![registrar.service_id()]);
        event
    }

    /// Nothing arrives for a while.
    pub async fn assert_quiet(&mut self, window: Duration) {
        if let Ok(Some((kind, event))) = timeout(window, self.0.recv()).await {
            panic!("unexpected {kind} event: {event:?}");
        }
    }
}

/// Poll `cond` until it holds or the wait expires.
pub async fn eventually<F: FnMut() -> bool>(mut cond: F) {
    let deadline = Instant::now() + WAIT;
    while !cond() {
        assert!(Instant::now() < deadline, "condition not reached in time");
        sleep(Duration::from_millis(5)).await;
    }
}
