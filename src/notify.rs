//! Ordered delivery of discovery events to listeners.
//!
//! Producers enqueue without blocking; a single dedicated thread drains the
//! queue in FIFO order and invokes listener callbacks, so discovery tasks
//! never wait on listener code.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::thread::{self, JoinHandle};

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::{debug, trace, warn};

use crate::error::Result;
use crate::event::{DiscoveryEvent, EventKind, ListenerHandle};

const THREAD_NAME: &str = "lookup-discovery-notify";

/// One committed notification: an event and the listeners it is addressed to.
struct Notification {
    listeners: Vec<ListenerHandle>,
    kind: EventKind,
    event: DiscoveryEvent,
}

/// Single-consumer FIFO of notifications.
pub(crate) struct NotificationQueue {
    tx: Mutex<Option<mpsc::UnboundedSender<Notification>>>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl NotificationQueue {
    /// Start the delivery thread.
    pub(crate) fn spawn() -> Result<Self> {
        let (tx, mut rx) = mpsc::unbounded_channel::<Notification>();
        let handle = thread::Builder::new()
            .name(THREAD_NAME.to_string())
            .spawn(move || {
                while let Some(notification) = rx.blocking_recv() {
                    deliver(&notification);
                }
                debug!("notification queue drained");
            })?;
        Ok(Self {
            tx: Mutex::new(Some(tx)),
            thread: Mutex::new(Some(handle)),
        })
    }

    /// Queue `event` for `listeners`. Returns false once the queue is closed.
    pub(crate) fn enqueue(
        &self,
        listeners: Vec<ListenerHandle>,
        kind: EventKind,
        event: DiscoveryEvent,
    ) -> bool {
        if listeners.is_empty() || event.is_empty() {
            return true;
        }
        let guard = self.tx.lock();
        let Some(tx) = guard.as_ref() else {
            trace!(%kind, "notification dropped, queue closed");
            return false;
        };
        trace!(%kind, registrars = event.len(), listeners = listeners.len(), "enqueue notification");
        tx.send(Notification {
            listeners,
            kind,
            event,
        })
        .is_ok()
    }

    /// Refuse new notifications. Already queued ones are still delivered.
    pub(crate) fn close(&self) {
        self.tx.lock().take();
    }

    /// Wait for the delivery thread to drain and exit.
    #[cfg(test)]
    pub(crate) fn join(&self) {
        if let Some(handle) = self.thread.lock().take() {
            if handle.join().is_err() {
                warn!("notification thread panicked");
            }
        }
    }
}

impl Drop for NotificationQueue {
    /// Closes the queue and detaches the delivery thread, which exits on its
    /// own once the remaining notifications are delivered.
    fn drop(&mut self) {
        self.close();
        if self.thread.lock().take().is_some() {
            trace!("notification thread detached");
        }
    }
}

fn deliver(notification: &Notification) {
    let event = &notification.event;
    for listener in &notification.listeners {
        let result = catch_unwind(AssertUnwindSafe(|| match notification.kind {
            EventKind::Discovered => listener.discovered(event),
            EventKind::Discarded => listener.discarded(event),
            EventKind::Changed => {
                if let Some(change_listener) = listener.as_change_listener() {
                    change_listener.changed(event);
                }
            }
        }));
        if result.is_err() {
            warn!(kind = %notification.kind, "discovery listener panicked, continuing");
        }
    }
}
