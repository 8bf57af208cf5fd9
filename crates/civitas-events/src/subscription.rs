//! Subscriber side of the event bus.

use tokio::sync::mpsc;

use civitas_types::{Event, EventKind};

/// A stream of committed events of one kind (or of every kind).
///
/// Events arrive in sequence-number order. The subscription can be drained
/// synchronously as an [`Iterator`] (which yields only what has already
/// been delivered and never blocks) or awaited with [`recv`](Self::recv).
#[derive(Debug)]
pub struct Subscription {
    filter: Option<EventKind>,
    receiver: mpsc::UnboundedReceiver<Event>,
}

impl Subscription {
    pub(crate) const fn new(
        filter: Option<EventKind>,
        receiver: mpsc::UnboundedReceiver<Event>,
    ) -> Self {
        Self { filter, receiver }
    }

    /// The kind this subscription receives, or `None` for every kind.
    pub const fn kind(&self) -> Option<EventKind> {
        self.filter
    }

    /// Take the next delivered event without waiting.
    pub fn try_next(&mut self) -> Option<Event> {
        self.receiver.try_recv().ok()
    }

    /// Wait for the next event.
    ///
    /// Returns `None` once the bus has been dropped and every delivered
    /// event has been consumed.
    pub async fn recv(&mut self) -> Option<Event> {
        self.receiver.recv().await
    }

    /// Take every delivered event.
    pub fn drain(&mut self) -> Vec<Event> {
        self.by_ref().collect()
    }
}

impl Iterator for Subscription {
    type Item = Event;

    fn next(&mut self) -> Option<Event> {
        self.try_next()
    }
}
