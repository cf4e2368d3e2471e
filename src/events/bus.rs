//! # Event bus for broadcasting runtime events.
//!
//! [`Bus`] is a thin wrapper around [`tokio::sync::broadcast`] that stamps every
//! event with the supervisor's sequence number before sending it.
//!
//! ## Architecture
//! ```text
//! Publishers (many):                    Receivers:
//!   Supervisor::spawn ──┐
//!   dispatcher        ──┼──► Bus ──┬──► subscriber listener ──► SubscriberSet
//!   acceptors         ──┤          └──► Supervisor::events() (Respawner, tests)
//!   SubscriberSet     ──┘
//! ```
//!
//! ## Rules
//! - **Non-blocking publish**: `publish()` never blocks.
//! - **Bounded capacity**: one ring buffer shared by all receivers.
//! - **Lag handling**: slow receivers get `RecvError::Lagged(n)` and skip `n` oldest items.
//! - **No persistence**: events published with no receiver are lost.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::broadcast;

use super::event::{Event, EventKind};

/// Broadcast channel for runtime events.
///
/// Cheap to clone; clones share the channel and the sequence counter.
#[derive(Clone, Debug)]
pub struct Bus {
    tx: broadcast::Sender<Event>,
    seq: Arc<AtomicU64>,
}

impl Bus {
    /// Creates a new bus with the given channel capacity (min 1).
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel::<Event>(capacity.max(1));
        Self {
            tx,
            seq: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Stamps `kind` with the next sequence number and sends it.
    ///
    /// Returns the sequence number. With no receivers the event is dropped.
    pub fn publish(&self, kind: EventKind) -> u64 {
        let seq = self.seq.fetch_add(1, Ordering::Relaxed) + 1;
        let _ = self.tx.send(Event::new(seq, kind));
        seq
    }

    /// Creates a new receiver that observes subsequent events.
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.tx.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn sequence_is_shared_by_clones() {
        let bus = Bus::new(8);
        let mut rx = bus.subscribe();
        let other = bus.clone();
        assert_eq!(bus.publish(EventKind::ShutdownRequested), 1);
        assert_eq!(other.publish(EventKind::AllStoppedWithin), 2);
        assert_eq!(rx.recv().await.unwrap().seq, 1);
        assert_eq!(rx.recv().await.unwrap().seq, 2);
    }

    #[test]
    fn publish_without_receivers_is_fine() {
        let bus = Bus::new(0);
        assert_eq!(bus.publish(EventKind::ShutdownRequested), 1);
    }
}
