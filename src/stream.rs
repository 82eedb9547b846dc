//! Discovery events as an async [`Stream`].

use std::pin::Pin;
use std::sync::{Arc, Weak};
use std::task::{Context, Poll};

use futures_util::Stream;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::trace;

use crate::error::Result;
use crate::event::{
    DiscoveryChangeListener, DiscoveryEvent, DiscoveryListener, EventKind, ListenerHandle,
};
use crate::manager::Core;

/// Listener that forwards every event into a channel.
struct ChannelListener {
    tx: mpsc::UnboundedSender<(EventKind, DiscoveryEvent)>,
}

impl ChannelListener {
    fn forward(&self, kind: EventKind, event: &DiscoveryEvent) {
        if self.tx.send((kind, event.clone())).is_err() {
            trace!(%kind, "event stream dropped");
        }
    }
}

impl DiscoveryListener for ChannelListener {
    fn discovered(&self, event: &DiscoveryEvent) {
        self.forward(EventKind::Discovered, event);
    }

    fn discarded(&self, event: &DiscoveryEvent) {
        self.forward(EventKind::Discarded, event);
    }

    fn as_change_listener(&self) -> Option<&dyn DiscoveryChangeListener> {
        Some(self)
    }
}

impl DiscoveryChangeListener for ChannelListener {
    fn changed(&self, event: &DiscoveryEvent) {
        self.forward(EventKind::Changed, event);
    }
}

/// Stream of `(kind, event)` pairs from a manager, change events included.
///
/// Starts with the current set as one discovered event (if non-empty).
/// Ends once the manager terminates and already queued events are delivered.
/// Dropping the stream unregisters it.
pub struct DiscoveryEvents {
    inner: UnboundedReceiverStream<(EventKind, DiscoveryEvent)>,
    listener: Weak<ChannelListener>,
    core: Weak<Core>,
}

impl DiscoveryEvents {
    pub(crate) fn register(core: &Arc<Core>) -> Result<Self> {
        let (tx, rx) = mpsc::unbounded_channel();
        let listener = Arc::new(ChannelListener { tx });
        let weak = Arc::downgrade(&listener);
        core.add_listener(listener)?;
        Ok(Self {
            inner: UnboundedReceiverStream::new(rx),
            listener: weak,
            core: Arc::downgrade(core),
        })
    }
}

impl Stream for DiscoveryEvents {
    type Item = (EventKind, DiscoveryEvent);

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.inner).poll_next(cx)
    }
}

impl Drop for DiscoveryEvents {
    fn drop(&mut self) {
        let (Some(core), Some(listener)) = (self.core.upgrade(), self.listener.upgrade()) else {
            return;
        };
        let listener: ListenerHandle = listener;
        // Fails only when the manager already terminated and dropped it.
        let _ = core.remove_listener(&listener);
    }
}
