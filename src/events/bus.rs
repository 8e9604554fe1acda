//! Broadcast bus for engine events.
//!
//! [`Bus`] is a thin wrapper around [`tokio::sync::broadcast`] that gives
//! every component (host tasks, retry policy, circuit registry, coordinator)
//! a non-blocking way to report progress.
//!
//! ## Rules
//! - **Non-blocking publish**: `publish()` never blocks or awaits.
//! - **Bounded capacity**: a single ring buffer stores recent events for all
//!   receivers; slow receivers observe `RecvError::Lagged(n)` and skip the
//!   `n` oldest items.
//! - **No persistence**: events are dropped if no receiver is subscribed at
//!   send time. Durable state lives in the [`JobStore`](crate::store::JobStore),
//!   never on the bus.

use tokio::sync::broadcast;

use super::event::Event;

/// Broadcast channel for engine events.
///
/// Cheap to clone (internally holds an `Arc`-backed sender); publishers and
/// subscribers may live on any task.
#[derive(Clone, Debug)]
pub struct Bus {
    tx: broadcast::Sender<Event>,
}

impl Bus {
    /// Creates a new bus with the given ring-buffer capacity (clamped to a
    /// minimum of 1).
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (tx, _rx) = broadcast::channel::<Event>(capacity);
        Self { tx }
    }

    /// Publishes an event to all active receivers. Returns immediately; if
    /// no receiver is subscribed the event is dropped.
    pub fn publish(&self, ev: Event) {
        let _ = self.tx.send(ev);
    }

    /// Creates a new independent receiver observing subsequent events only.
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.tx.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventKind;

    #[tokio::test]
    async fn subscriber_receives_published_events() {
        let bus = Bus::new(16);
        let mut rx = bus.subscribe();
        bus.publish(Event::now(EventKind::JobQueued).with_job("j1"));
        let ev = rx.recv().await.unwrap();
        assert_eq!(ev.kind, EventKind::JobQueued);
        assert_eq!(ev.job.as_deref(), Some("j1"));
    }

    #[tokio::test]
    async fn publish_without_receivers_does_not_block() {
        let bus = Bus::new(1);
        for _ in 0..100 {
            bus.publish(Event::now(EventKind::UploadStarting));
        }
    }
}
