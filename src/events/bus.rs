//! Event bus for broadcasting runtime events.
//!
//! [`Bus`] is a thin wrapper around [`tokio::sync::broadcast`] that lets the
//! scanner and the per-service supervisors exchange [`Event`]s.
//!
//! - [`Bus::publish`] sends an event to all subscribers (non-blocking).
//! - [`Bus::subscribe`] creates a new receiver for consuming events.

use tokio::sync::broadcast;

use crate::events::Event;

/// Broadcast channel for runtime events.
///
/// Wrapper over [`tokio::sync::broadcast`] that provides `publish`/`subscribe`
/// methods for working with [`Event`]s.
#[derive(Clone)]
pub struct Bus {
    tx: broadcast::Sender<Event>,
}

impl Bus {
    /// Creates a new bus with the given channel capacity.
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Publishes an event to all subscribers.
    ///
    /// Errors are ignored if there are no active subscribers.
    pub fn publish(&self, ev: Event) {
        let _ = self.tx.send(ev);
    }

    /// Subscribes to the bus and returns a new receiver.
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.tx.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventKind;

    #[tokio::test]
    async fn publish_reaches_subscriber() {
        let bus = Bus::new(16);
        let mut rx = bus.subscribe();
        bus.publish(Event::now(EventKind::ServiceAdded).with_service("a"));
        let ev = rx.recv().await.unwrap();
        assert_eq!(ev.kind, EventKind::ServiceAdded);
        assert_eq!(ev.service.as_deref(), Some("a"));
    }

    #[test]
    fn publish_without_subscribers_is_ok() {
        let bus = Bus::new(4);
        bus.publish(Event::now(EventKind::ScanFailed));
    }
}
