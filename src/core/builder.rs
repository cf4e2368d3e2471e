use std::sync::{Arc, Weak};

use tokio::sync::broadcast::error::RecvError;

use crate::core::config::ClusterConfig;
use crate::core::shared::{dispatch_loop, Shared};
use crate::core::supervisor::Supervisor;
use crate::events::Bus;
use crate::subscribers::{Subscribe, SubscriberSet};

/// Builder for constructing a [`Supervisor`] with optional subscribers.
pub struct SupervisorBuilder {
    cfg: ClusterConfig,
    subscribers: Vec<Arc<dyn Subscribe>>,
}

impl SupervisorBuilder {
    /// Creates a new builder with the given configuration.
    pub fn new(cfg: ClusterConfig) -> Self {
        Self {
            cfg,
            subscribers: Vec::new(),
        }
    }

    /// Sets event subscribers for observability.
    ///
    /// Subscribers receive every runtime event (forks, exits, dropped
    /// connections, ...) through dedicated workers with bounded queues.
    pub fn with_subscribers(mut self, subscribers: Vec<Arc<dyn Subscribe>>) -> Self {
        self.subscribers = subscribers;
        self
    }

    /// Builds the supervisor and starts its background tasks:
    /// - subscriber workers and the bus listener feeding them
    /// - the dispatcher draining worker signals
    ///
    /// Must be called inside a tokio runtime.
    pub fn build(self) -> Supervisor {
        let bus = Bus::new(self.cfg.bus_capacity_clamped());
        let subs = Arc::new(SubscriberSet::new(self.subscribers, bus.clone()));
        if !subs.is_empty() {
            subscriber_listener(&bus, Arc::downgrade(&subs));
        }

        let (shared, inbox) = Shared::new(self.cfg, bus);
        tokio::spawn(dispatch_loop(Arc::downgrade(&shared), inbox));
        Supervisor::from_parts(shared, subs)
    }
}

/// Forwards bus events to the subscriber set (fire-and-forget).
///
/// Stops once the set is gone. A lagging listener skips what it missed.
fn subscriber_listener(bus: &Bus, set: Weak<SubscriberSet>) {
    let mut rx = bus.subscribe();
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(ev) => match set.upgrade() {
                    Some(set) => set.emit(ev),
                    None => break,
                },
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "subscriber listener lagged behind the bus");
                }
                Err(RecvError::Closed) => break,
            }
        }
    });
}
