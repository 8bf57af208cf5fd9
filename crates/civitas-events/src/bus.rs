//! The event bus: staged events, the committed log, and fan-out.

use tokio::sync::mpsc;
use tracing::{debug, trace};

use civitas_types::{Event, EventKind, NewEvent};

use crate::subscription::Subscription;

/// A registered subscriber.
#[derive(Debug)]
struct Subscriber {
    /// `None` receives every kind.
    filter: Option<EventKind>,
    sender: mpsc::UnboundedSender<Event>,
}

impl Subscriber {
    fn wants(&self, event: &Event) -> bool {
        self.filter.is_none_or(|kind| kind == event.kind)
    }
}

/// Append-only event log with staged publication.
#[derive(Debug)]
pub struct EventBus {
    /// Committed events, ordered by sequence number.
    log: Vec<Event>,
    /// Published but not yet flushed.
    pending: Vec<Event>,
    /// Sequence number the next published event receives.
    next_sequence: u64,
    subscribers: Vec<Subscriber>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    /// Create an empty bus. The first event gets sequence number 1.
    pub const fn new() -> Self {
        Self {
            log: Vec::new(),
            pending: Vec::new(),
            next_sequence: 1,
            subscribers: Vec::new(),
        }
    }

    /// Stage an event and return its sequence number.
    ///
    /// The event is not visible to subscribers or [`events`](Self::events)
    /// until the next [`flush`](Self::flush).
    pub fn publish(&mut self, event: NewEvent) -> u64 {
        let sequence = self.next_sequence;
        self.next_sequence = self.next_sequence.saturating_add(1);
        let event = Event {
            sequence,
            tick: event.tick,
            source: event.source,
            kind: event.payload.kind(),
            payload: event.payload,
        };
        trace!(sequence, kind = ?event.kind, tick = event.tick, "Event staged");
        self.pending.push(event);
        sequence
    }

    /// Commit all staged events and deliver them to subscribers.
    ///
    /// Returns the number of events committed. Subscriptions whose receiver
    /// has been dropped are removed.
    pub fn flush(&mut self) -> usize {
        let committed = self.pending.len();
        if committed == 0 {
            return 0;
        }

        for event in self.pending.drain(..) {
            self.subscribers.retain(|subscriber| {
                !subscriber.wants(&event) || subscriber.sender.send(event).is_ok()
            });
            self.log.push(event);
        }

        debug!(
            committed,
            log_len = self.log.len(),
            subscribers = self.subscribers.len(),
            "Events flushed"
        );
        committed
    }

    /// Drop all staged events and rewind the sequence counter.
    ///
    /// Returns the number of events discarded.
    pub fn discard_pending(&mut self) -> usize {
        let discarded = self.pending.len();
        self.pending.clear();
        self.next_sequence = self
            .log
            .last()
            .map_or(1, |event| event.sequence.saturating_add(1));
        if discarded > 0 {
            debug!(discarded, "Staged events discarded");
        }
        discarded
    }

    /// Subscribe to one kind of event.
    ///
    /// The subscription is first filled with every committed event of that
    /// kind, then receives new ones on each flush.
    pub fn subscribe(&mut self, kind: EventKind) -> Subscription {
        self.register(Some(kind))
    }

    /// Subscribe to every event.
    pub fn subscribe_all(&mut self) -> Subscription {
        self.register(None)
    }

    fn register(&mut self, filter: Option<EventKind>) -> Subscription {
        let (sender, receiver) = mpsc::unbounded_channel();
        let subscriber = Subscriber { filter, sender };

        for event in &self.log {
            if subscriber.wants(event) {
                // The receiver is alive: it is returned below.
                let _ = subscriber.sender.send(*event);
            }
        }

        self.subscribers.push(subscriber);
        Subscription::new(filter, receiver)
    }

    /// The committed log.
    pub fn events(&self) -> &[Event] {
        &self.log
    }

    /// Committed events with a sequence number greater than `sequence`.
    pub fn events_since(&self, sequence: u64) -> &[Event] {
        let start = self.log.partition_point(|event| event.sequence <= sequence);
        self.log.get(start..).unwrap_or_default()
    }

    /// Staged, not yet committed events.
    pub fn pending(&self) -> &[Event] {
        &self.pending
    }

    /// Number of committed events.
    pub const fn len(&self) -> usize {
        self.log.len()
    }

    /// Whether nothing has been committed yet.
    pub const fn is_empty(&self) -> bool {
        self.log.is_empty()
    }

    /// Sequence number the next published event will receive.
    pub const fn next_sequence(&self) -> u64 {
        self.next_sequence
    }

    /// Number of live subscriptions (as of the last flush).
    pub const fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use civitas_types::{
        CitizenType, EntityId, EventPayload, ResourceKind, ResourceMask, Subtype,
    };

    use super::*;

    const WORKER: Subtype = Subtype::Citizen(CitizenType::Worker);

    fn performed(tick: u64, id: u64) -> NewEvent {
        NewEvent {
            tick,
            source: Some(EntityId::from_raw(id)),
            payload: EventPayload::ActionPerformed { subtype: WORKER },
        }
    }

    fn shortage(tick: u64) -> NewEvent {
        NewEvent {
            tick,
            source: None,
            payload: EventPayload::ResourceShortage {
                resource: ResourceKind::Power,
                denied_requests: 1,
                units_denied: 1,
            },
        }
    }

    #[test]
    fn sequence_numbers_start_at_one_and_increase() {
        let mut bus = EventBus::new();
        assert_eq!(bus.publish(performed(1, 1)), 1);
        assert_eq!(bus.publish(performed(1, 2)), 2);
        assert_eq!(bus.publish(shortage(1)), 3);
        bus.flush();

        let sequences: Vec<u64> = bus.events().iter().map(|e| e.sequence).collect();
        assert_eq!(sequences, vec![1, 2, 3]);
    }

    #[test]
    fn staged_events_are_invisible_until_flush() {
        let mut bus = EventBus::new();
        let mut sub = bus.subscribe_all();
        bus.publish(performed(1, 1));

        assert!(bus.is_empty());
        assert_eq!(bus.pending().len(), 1);
        assert!(sub.try_next().is_none());

        assert_eq!(bus.flush(), 1);
        assert_eq!(bus.len(), 1);
        assert_eq!(sub.try_next().map(|e| e.sequence), Some(1));
    }

    #[test]
    fn subscription_filters_by_kind() {
        let mut bus = EventBus::new();
        let mut shortages = bus.subscribe(EventKind::ResourceShortage);
        bus.publish(performed(1, 1));
        bus.publish(shortage(1));
        bus.publish(performed(1, 2));
        bus.flush();

        let got: Vec<Event> = shortages.by_ref().collect();
        assert_eq!(got.len(), 1);
        assert_eq!(got.first().map(|e| e.sequence), Some(2));
        assert_eq!(shortages.kind(), Some(EventKind::ResourceShortage));
    }

    #[test]
    fn late_subscriber_receives_history_in_order() {
        let mut bus = EventBus::new();
        for id in 1..=3 {
            bus.publish(performed(1, id));
        }
        bus.flush();

        let mut late = bus.subscribe(EventKind::ActionPerformed);
        bus.publish(performed(2, 4));
        bus.flush();

        let sequences: Vec<u64> = late.by_ref().map(|e| e.sequence).collect();
        assert_eq!(sequences, vec![1, 2, 3, 4]);
    }

    #[test]
    fn discard_rewinds_sequence_without_gaps() {
        let mut bus = EventBus::new();
        bus.publish(performed(1, 1));
        bus.flush();

        bus.publish(performed(2, 1));
        bus.publish(performed(2, 2));
        assert_eq!(bus.discard_pending(), 2);
        assert_eq!(bus.next_sequence(), 2);

        bus.publish(shortage(2));
        bus.flush();
        let sequences: Vec<u64> = bus.events().iter().map(|e| e.sequence).collect();
        assert_eq!(sequences, vec![1, 2]);
        assert_eq!(
            bus.events().last().map(|e| e.kind),
            Some(EventKind::ResourceShortage)
        );
    }

    #[test]
    fn dropped_subscription_is_pruned_on_flush() {
        let mut bus = EventBus::new();
        let sub = bus.subscribe_all();
        let _keep = bus.subscribe_all();
        drop(sub);

        bus.publish(performed(1, 1));
        bus.flush();
        assert_eq!(bus.subscriber_count(), 1);
    }

    #[test]
    fn events_since_returns_tail() {
        let mut bus = EventBus::new();
        for id in 1..=5 {
            bus.publish(performed(1, id));
        }
        bus.flush();

        let tail: Vec<u64> = bus.events_since(3).iter().map(|e| e.sequence).collect();
        assert_eq!(tail, vec![4, 5]);
        assert!(bus.events_since(5).is_empty());
        assert_eq!(bus.events_since(0).len(), 5);
    }

    #[test]
    fn payload_fields_survive_delivery() {
        let mut bus = EventBus::new();
        let mut sub = bus.subscribe(EventKind::ActionDegraded);
        let denied: ResourceMask = [ResourceKind::Power].into_iter().collect();
        bus.publish(NewEvent {
            tick: 7,
            source: Some(EntityId::from_raw(11)),
            payload: EventPayload::ActionDegraded {
                subtype: WORKER,
                denied,
            },
        });
        bus.flush();

        let event = sub.try_next().unwrap();
        assert_eq!(event.tick, 7);
        assert_eq!(event.source, Some(EntityId::from_raw(11)));
        assert_eq!(
            event.payload,
            EventPayload::ActionDegraded {
                subtype: WORKER,
                denied
            }
        );
    }

    #[tokio::test]
    async fn subscription_can_be_awaited() {
        let mut bus = EventBus::new();
        let mut sub = bus.subscribe(EventKind::ResourceShortage);
        bus.publish(shortage(3));
        bus.flush();

        let event = sub.recv().await;
        assert_eq!(event.map(|e| e.tick), Some(3));
    }
}
