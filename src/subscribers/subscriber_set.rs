//! # Non-blocking event fan-out to multiple subscribers.
//!
//! ```text
//! emit(event)
//!     │
//!     ├──► [queue 1] ──► worker 1 ──► subscriber1.on_event()
//!     │    (bounded)         └──────► panic → SubscriberPanicked
//!     ├──► [queue 2] ──► worker 2 ──► subscriber2.on_event()
//!     └──► [queue N] ──► worker N ──► subscriberN.on_event()
//! ```
//!
//! ## Rules
//! - **Non-blocking**: `emit()` uses `try_send` and returns immediately.
//! - **Overflow**: event dropped for that subscriber only, `SubscriberOverflow` published.
//! - **Per-subscriber FIFO**, no cross-subscriber ordering.
//! - Health events about a subscriber never trigger further health events.
//!
//! Worker tasks use `catch_unwind` with `AssertUnwindSafe`; a subscriber that
//! panics while holding a lock of its own may leave that state inconsistent.

use std::sync::Arc;

use futures::FutureExt;
use tokio::{sync::mpsc, task::JoinHandle};

use crate::error::panic_message;
use crate::events::{Bus, Event, EventKind};
use crate::subscribers::Subscribe;

struct SubscriberChannel {
    name: &'static str,
    sender: mpsc::Sender<Arc<Event>>,
}

/// Fan-out coordinator for event subscribers.
pub struct SubscriberSet {
    channels: Vec<SubscriberChannel>,
    workers: Vec<JoinHandle<()>>,
    bus: Bus,
}

impl SubscriberSet {
    /// Creates the set and spawns one worker task per subscriber.
    #[must_use]
    pub fn new(subs: Vec<Arc<dyn Subscribe>>, bus: Bus) -> Self {
        let mut channels = Vec::with_capacity(subs.len());
        let mut workers = Vec::with_capacity(subs.len());

        for sub in subs {
            let name = sub.name();
            let (tx, mut rx) = mpsc::channel::<Arc<Event>>(sub.queue_capacity().max(1));
            let bus_for_worker = bus.clone();

            let handle = tokio::spawn(async move {
                while let Some(ev) = rx.recv().await {
                    let fut = sub.on_event(ev.as_ref());
                    if let Err(panic_err) = std::panic::AssertUnwindSafe(fut).catch_unwind().await {
                        let info = panic_message(&*panic_err);
                        tracing::warn!(subscriber = name, %info, "subscriber panicked");
                        bus_for_worker.publish(EventKind::SubscriberPanicked {
                            subscriber: name,
                            info: info.into(),
                        });
                    }
                }
            });
            channels.push(SubscriberChannel { name, sender: tx });
            workers.push(handle);
        }
        Self {
            channels,
            workers,
            bus,
        }
    }

    /// Number of subscribers.
    pub fn len(&self) -> usize {
        self.channels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }

    /// Emits an event to all subscribers without waiting for them.
    pub fn emit(&self, event: Event) {
        self.emit_arc(Arc::new(event));
    }

    /// Emits a shared event to all subscribers.
    ///
    /// On a full or closed queue the event is dropped for that subscriber and a
    /// `SubscriberOverflow` is published, unless the event is itself a health event.
    pub fn emit_arc(&self, event: Arc<Event>) {
        let quiet = event.is_subscriber_health();

        for channel in &self.channels {
            let reason = match channel.sender.try_send(Arc::clone(&event)) {
                Ok(()) => continue,
                Err(mpsc::error::TrySendError::Full(_)) => "full",
                Err(mpsc::error::TrySendError::Closed(_)) => "closed",
            };
            if !quiet {
                self.bus.publish(EventKind::SubscriberOverflow {
                    subscriber: channel.name,
                    reason,
                });
            }
        }
    }

    /// Closes every queue and waits for the workers to drain them.
    pub async fn shutdown(self) {
        drop(self.channels);
        for h in self.workers {
            let _ = h.await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex;
    use std::time::Duration;

    #[derive(Default)]
    struct Record(Mutex<Vec<u64>>);

    #[async_trait]
    impl Subscribe for Record {
        async fn on_event(&self, event: &Event) {
            self.0.lock().unwrap().push(event.seq);
        }
        fn name(&self) -> &'static str {
            "record"
        }
    }

    struct Boom;

    #[async_trait]
    impl Subscribe for Boom {
        async fn on_event(&self, _event: &Event) {
            panic!("boom");
        }
        fn name(&self) -> &'static str {
            "boom"
        }
    }

    struct Stuck;

    #[async_trait]
    impl Subscribe for Stuck {
        async fn on_event(&self, _event: &Event) {
            tokio::time::sleep(Duration::from_secs(3600)).await;
        }
        fn name(&self) -> &'static str {
            "stuck"
        }
        fn queue_capacity(&self) -> usize {
            1
        }
    }

    #[tokio::test]
    async fn delivers_in_order_and_drains_on_shutdown() {
        let bus = Bus::new(16);
        let rec = Arc::new(Record::default());
        let set = SubscriberSet::new(vec![rec.clone()], bus);
        for seq in 1..=3 {
            set.emit(Event::new(seq, EventKind::AllStoppedWithin));
        }
        set.shutdown().await;
        assert_eq!(*rec.0.lock().unwrap(), vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn panic_is_reported_on_the_bus() {
        let bus = Bus::new(16);
        let mut rx = bus.subscribe();
        let set = SubscriberSet::new(vec![Arc::new(Boom)], bus);
        set.emit(Event::new(1, EventKind::ShutdownRequested));

        let ev = rx.recv().await.unwrap();
        assert!(matches!(
            ev.kind,
            EventKind::SubscriberPanicked { subscriber: "boom", ref info } if &**info == "boom"
        ));
    }

    #[tokio::test]
    async fn overflow_is_reported_once_per_drop() {
        let bus = Bus::new(16);
        let mut rx = bus.subscribe();
        let set = SubscriberSet::new(vec![Arc::new(Stuck)], bus);
        for seq in 1..=5 {
            set.emit(Event::new(seq, EventKind::ShutdownRequested));
            tokio::task::yield_now().await;
        }
        let ev = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(
            ev.kind,
            EventKind::SubscriberOverflow { subscriber: "stuck", reason: "full" }
        ));
    }
}
