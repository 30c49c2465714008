//! Event bus for broadcasting store events to live queries

use super::{EventEmitter, StoreEvent};
use tokio::sync::broadcast;
use tracing::debug;

/// Default broadcast channel capacity
pub const DEFAULT_CAPACITY: usize = 1024;

/// Event bus that distributes StoreEvents via `tokio::sync::broadcast`
///
/// Fire-and-forget: emitting never blocks, never panics.
/// If no live query is listening, events are silently dropped.
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<StoreEvent>,
}

impl EventBus {
    /// Create a new EventBus with the given channel capacity
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Subscribe to receive events (one receiver per live query)
    pub fn subscribe(&self) -> broadcast::Receiver<StoreEvent> {
        self.sender.subscribe()
    }

    /// Number of active receivers
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl EventEmitter for EventBus {
    fn emit(&self, event: StoreEvent) {
        let label = match &event {
            StoreEvent::Change(change) => format!("{}:{:?}", change.collection, change.action),
            StoreEvent::Fault(fault) => format!("fault:{:?}", fault.kind),
        };
        if let Ok(n) = self.sender.send(event) {
            debug!(event = %label, subscribers = n, "StoreEvent emitted");
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{ChangeAction, ChangeEvent, FaultKind};

    #[test]
    fn test_emit_without_subscriber_no_panic() {
        let bus = EventBus::default();
        bus.emit_change(ChangeEvent::new("contacts", ChangeAction::Created, "c1"));
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[test]
    fn test_emit_with_subscriber() {
        let bus = EventBus::default();
        let mut rx = bus.subscribe();
        assert_eq!(bus.subscriber_count(), 1);

        bus.emit_change(ChangeEvent::new("deals", ChangeAction::Updated, "d1"));

        match rx.try_recv().unwrap() {
            StoreEvent::Change(event) => {
                assert_eq!(event.collection, "deals");
                assert_eq!(event.action, ChangeAction::Updated);
                assert_eq!(event.document_id, "d1");
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn test_fault_reaches_every_subscriber() {
        let bus = EventBus::default();
        let mut rx1 = bus.subscribe();
        let mut rx2 = bus.subscribe();

        bus.emit_fault(None, FaultKind::Unavailable, "connection lost");

        for rx in [&mut rx1, &mut rx2] {
            assert!(matches!(rx.try_recv().unwrap(), StoreEvent::Fault(_)));
        }
    }

    #[test]
    fn test_dropped_subscriber_doesnt_affect_others() {
        let bus = EventBus::default();
        let rx1 = bus.subscribe();
        let mut rx2 = bus.subscribe();
        assert_eq!(bus.subscriber_count(), 2);

        drop(rx1);
        assert_eq!(bus.subscriber_count(), 1);

        bus.emit_change(ChangeEvent::new("contacts", ChangeAction::Deleted, "c9"));
        assert!(rx2.try_recv().is_ok());
    }

    #[test]
    fn test_clone_shares_channel() {
        let bus = EventBus::default();
        let bus2 = bus.clone();
        let mut rx = bus.subscribe();

        bus2.emit_change(ChangeEvent::new("recurringTaskTemplates", ChangeAction::Created, "t1"));
        assert!(rx.try_recv().is_ok());
    }
}
