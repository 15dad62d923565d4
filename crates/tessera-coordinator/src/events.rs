//! Event emission.
//!
//! Every accepted order transition emits one or more [`Event`]s. The bus
//! stamps each with the next sequence number and broadcasts it; subscribers
//! filter with an [`EventFilter`](tessera_types::events::EventFilter). A slow
//! subscriber that falls more than `capacity` events behind loses the oldest.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tessera_types::events::Event;
use tokio::sync::broadcast;
use tracing::debug;

/// Event bus for broadcasting events to subscribers.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<Event>,
    sequence: Arc<AtomicU64>,
}

impl EventBus {
    /// Create a new event bus with the given buffer capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            sender,
            sequence: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Stamp `event` with the next sequence number and broadcast it.
    pub fn emit(&self, mut event: Event) -> u64 {
        let sequence = self.sequence.fetch_add(1, Ordering::SeqCst) + 1;
        event.sequence = sequence;
        debug!(sequence, event_type = ?event.event_type, "event emitted");
        // No subscribers is fine.
        let _ = self.sender.send(event);
        sequence
    }

    /// Subscribe to events emitted from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.sender.subscribe()
    }

    /// The sequence number of the most recent event (0 if none).
    pub fn sequence(&self) -> u64 {
        self.sequence.load(Ordering::SeqCst)
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("sequence", &self.sequence())
            .field("subscribers", &self.sender.receiver_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tessera_types::events::{EventCategory, EventFilter, EventType};
    use tessera_types::OrderId;

    fn event(event_type: EventType) -> Event {
        Event::new(
            event_type,
            Some(OrderId::new([1; 32])),
            1_000,
            serde_json::json!({"start_index": 1}),
        )
    }

    #[test]
    fn test_event_bus_emit_subscribe() {
        let bus = EventBus::new(16);
        let mut rx = bus.subscribe();

        assert_eq!(bus.emit(event(EventType::OrderCreated)), 1);
        assert_eq!(bus.emit(event(EventType::FillRequested)), 2);

        let first = rx.try_recv().expect("receive event");
        assert_eq!(first.sequence, 1);
        assert_eq!(first.event_type, EventType::OrderCreated);
        assert_eq!(rx.try_recv().expect("receive event").sequence, 2);
        assert_eq!(bus.sequence(), 2);
    }

    #[test]
    fn test_emit_without_subscribers() {
        let bus = EventBus::new(4);
        bus.emit(event(EventType::OrderExpired));
        assert_eq!(bus.sequence(), 1);
    }

    #[test]
    fn test_filtered_subscription() {
        let bus = EventBus::new(16);
        let mut rx = bus.subscribe();
        let filter = EventFilter {
            categories: Some(vec![EventCategory::Settlement]),
            order_ids: None,
        };

        bus.emit(event(EventType::FillRequested));
        bus.emit(event(EventType::GrantIssued));

        let mut matched = Vec::new();
        while let Ok(event) = rx.try_recv() {
            if filter.matches(&event) {
                matched.push(event.event_type);
            }
        }
        assert_eq!(matched, vec![EventType::GrantIssued]);
    }
}
