//! # Supervisor state and the dispatcher.
//!
//! [`Shared`] is everything a [`Supervisor`](crate::Supervisor) clone points at.
//! The registry and the distributor live together under one mutex ([`Core`]) so
//! routing always sees a consistent view of worker states.
//!
//! ```text
//! workers ── WorkerLink::signal ──► inbox ──► dispatch_loop ──► Shared::handle
//!                                                                 ├─► Registry::transition
//!                                                                 ├─► Distributor (listen / forget)
//!                                                                 └─► Bus::publish
//! acceptors ── ConnectionSink::dispatch ──► Distributor::dispatch (route / queue / drop)
//! ```
//!
//! ## Rules
//! - The dispatcher is the only place where worker-reported transitions are applied,
//!   so the events of one worker are published in the order it reported them.
//! - The lock is never held across an `.await`.
//! - Events are published while the lock is held; `Fork` therefore always precedes
//!   the `Online` of the same worker.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use tokio::sync::mpsc;
use tracing::{debug, trace, warn};

use crate::channel::{
    Inbound, InboxReceiver, InboxSender, Message, SendHandle, WorkerSignal,
};
use crate::core::config::ClusterConfig;
use crate::core::registry::Registry;
use crate::distributor::{spawn_acceptor, Connection, ConnectionSink, Distributor, Fresh, Listener};
use crate::error::ClusterError;
use crate::events::{Bus, EventKind};
use crate::workers::{Endpoint, Signal, WorkerId, WorkerState};

/// State guarded by the supervisor lock.
pub(crate) struct Core {
    pub(crate) registry: Registry,
    pub(crate) distributor: Distributor,
}

pub(crate) struct Shared {
    pub(crate) cfg: ClusterConfig,
    pub(crate) bus: Bus,
    pub(crate) inbox: InboxSender,
    next_id: AtomicU64,
    core: Mutex<Core>,
}

impl Shared {
    pub(crate) fn new(cfg: ClusterConfig, bus: Bus) -> (Arc<Self>, InboxReceiver) {
        let (inbox, rx) = mpsc::unbounded_channel();
        let distributor = Distributor::new(cfg.policy, cfg.pending_connections);
        let shared = Arc::new(Self {
            cfg,
            bus,
            inbox,
            next_id: AtomicU64::new(0),
            core: Mutex::new(Core {
                registry: Registry::default(),
                distributor,
            }),
        });
        (shared, rx)
    }

    /// Locks the core. A poisoned lock is recovered: every mutation keeps it consistent.
    pub(crate) fn core(&self) -> MutexGuard<'_, Core> {
        self.core.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Next worker id; ids start at 1 and are never reused.
    pub(crate) fn next_id(&self) -> WorkerId {
        WorkerId::new(self.next_id.fetch_add(1, Ordering::Relaxed) + 1)
    }

    pub(crate) fn start_acceptor(self: &Arc<Self>, fresh: Fresh) {
        let _ = spawn_acceptor(Arc::downgrade(self), fresh.endpoint, fresh.listener, fresh.token);
    }

    /// Applies one signal reported by a worker.
    pub(crate) fn handle(self: &Arc<Self>, worker: WorkerId, signal: WorkerSignal) {
        match signal {
            WorkerSignal::Online => self.on_online(worker),
            WorkerSignal::Listen { endpoint, reply } => {
                let result = self.register_listener(worker, &endpoint);
                if let Err(e) = &result {
                    debug!(%worker, %endpoint, error = %e, "listen refused");
                }
                // A worker that went away takes its listener with it; the inlet
                // closes and the router skips it.
                let _ = reply.send(result);
            }
            WorkerSignal::Listening { address } => self.on_listening(worker, address),
            WorkerSignal::Message { message, handle } => self.relay(worker, message, handle),
            WorkerSignal::Disconnected { requested } => self.on_disconnected(worker, requested),
            WorkerSignal::Exited { code, signal } => self.on_exit(worker, code, signal),
        }
    }

    fn on_online(&self, worker: WorkerId) {
        let mut core = self.core();
        if let Some(handle) = core.registry.transition(worker, WorkerState::Online) {
            debug!(%worker, "worker online");
            self.bus.publish(EventKind::Online { worker: handle });
        }
    }

    fn register_listener(
        self: &Arc<Self>,
        worker: WorkerId,
        endpoint: &Endpoint,
    ) -> Result<Listener, ClusterError> {
        let mut core = self.core();
        let Core {
            registry,
            distributor,
        } = &mut *core;

        let entry = registry.get_mut(worker)?;
        if !matches!(
            entry.handle.state,
            WorkerState::Online | WorkerState::Listening
        ) {
            return Err(ClusterError::ChannelClosed { worker });
        }
        let disconnect = entry.channel.disconnect_token();

        let (bound, fresh) = distributor.ensure_bound(endpoint)?;
        if let Some(fresh) = fresh {
            self.start_acceptor(fresh);
        }
        let listener = distributor.register(worker, &bound, disconnect)?;

        if let Some(handle) = registry.transition(worker, WorkerState::Listening) {
            debug!(%worker, endpoint = %bound, "worker listening");
            self.bus.publish(EventKind::Listening {
                worker: handle,
                address: bound.clone(),
            });
        }
        let flushed = distributor.flush_pending(&bound, |id| registry.is_listening(id));
        if flushed > 0 {
            debug!(endpoint = %bound, flushed, "queued connections delivered");
        }
        Ok(listener)
    }

    /// Process workers listen on their own; they only report the address.
    fn on_listening(&self, worker: WorkerId, address: Endpoint) {
        let mut core = self.core();
        if core.registry.state(worker) == Some(WorkerState::Spawning) {
            if let Some(handle) = core.registry.transition(worker, WorkerState::Online) {
                self.bus.publish(EventKind::Online { worker: handle });
            }
        }
        if let Some(handle) = core.registry.transition(worker, WorkerState::Listening) {
            debug!(%worker, %address, "worker listening");
            self.bus.publish(EventKind::Listening {
                worker: handle,
                address,
            });
        }
    }

    fn relay(&self, worker: WorkerId, message: Message, handle: Option<SendHandle>) {
        let Some(snapshot) = self.core().registry.snapshot(worker) else {
            trace!(%worker, "message from unregistered worker dropped");
            return;
        };
        self.bus.publish(EventKind::Message {
            worker: snapshot,
            message,
            handle,
        });
    }

    fn on_disconnected(&self, worker: WorkerId, requested: bool) {
        let mut core = self.core();
        self.disconnect_locked(&mut core, worker, requested);
    }

    fn disconnect_locked(&self, core: &mut Core, worker: WorkerId, requested: bool) {
        if requested {
            if let Ok(entry) = core.registry.get_mut(worker) {
                if !entry.handle.state.is_settled() {
                    entry.handle.exited_after_disconnect = true;
                }
            }
        }
        if let Some(handle) = core.registry.transition(worker, WorkerState::Disconnected) {
            core.distributor.forget(worker);
            debug!(%worker, requested, "worker disconnected");
            self.bus.publish(EventKind::Disconnect { worker: handle });
        }
    }

    fn on_exit(&self, worker: WorkerId, code: Option<i32>, signal: Option<Signal>) {
        let mut core = self.core();
        if core
            .registry
            .state(worker)
            .is_some_and(|s| !s.is_settled())
        {
            self.disconnect_locked(&mut core, worker, false);
        }
        core.distributor.forget(worker);

        let Some(handle) = core.registry.record_exit(worker, code, signal) else {
            return;
        };
        if handle.crashed() {
            warn!(%worker, exit_code = ?handle.exit_code, signal = ?handle.signal, "worker died unexpectedly");
        } else {
            debug!(%worker, exit_code = ?handle.exit_code, signal = ?handle.signal, "worker exited");
        }
        let (exit_code, signal) = (handle.exit_code, handle.signal);
        self.bus.publish(EventKind::Exit {
            worker: handle,
            exit_code,
            signal,
        });
    }
}

impl ConnectionSink for Shared {
    fn dispatch(&self, endpoint: &Endpoint, conn: Connection) {
        let mut core = self.core();
        let Core {
            registry,
            distributor,
        } = &mut *core;
        match distributor.dispatch(endpoint, conn, |id| registry.is_listening(id)) {
            Ok(Some(worker)) => trace!(%worker, %endpoint, "connection routed"),
            Ok(None) => debug!(%endpoint, "no listening worker; connection queued"),
            Err((conn, refusal)) => {
                drop(core);
                drop(conn);
                warn!(%endpoint, reason = refusal.reason(), "connection dropped");
                self.bus.publish(EventKind::ConnectionDropped {
                    endpoint: endpoint.clone(),
                    reason: refusal.reason().into(),
                });
            }
        }
    }
}

impl Drop for Shared {
    fn drop(&mut self) {
        self.core
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .distributor
            .close_all();
    }
}

/// Drains the inbox until the supervisor is gone.
pub(crate) async fn dispatch_loop(shared: Weak<Shared>, mut inbox: InboxReceiver) {
    while let Some(Inbound { worker, signal }) = inbox.recv().await {
        let Some(shared) = shared.upgrade() else {
            break;
        };
        shared.handle(worker, signal);
    }
    trace!("dispatcher stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::ControlChannel;
    use crate::core::registry::Entry;
    use crate::events::Event;
    use tokio::sync::broadcast;

    fn shared_with(ids: &[u64]) -> (Arc<Shared>, broadcast::Receiver<Event>) {
        let bus = Bus::new(64);
        let rx = bus.subscribe();
        let (shared, _inbox) = Shared::new(ClusterConfig::default(), bus);
        {
            let mut core = shared.core();
            for raw in ids {
                let id = WorkerId::new(*raw);
                let (channel, _ends) = ControlChannel::new(id, true);
                core.registry.insert(Entry::new(id, channel));
            }
        }
        (shared, rx)
    }

    fn labels(rx: &mut broadcast::Receiver<Event>) -> Vec<&'static str> {
        let mut out = Vec::new();
        while let Ok(ev) = rx.try_recv() {
            out.push(ev.label());
        }
        out
    }

    #[tokio::test]
    async fn exit_without_disconnect_publishes_both() {
        let (shared, mut rx) = shared_with(&[1]);
        let id = WorkerId::new(1);
        shared.handle(id, WorkerSignal::Online);
        shared.handle(
            id,
            WorkerSignal::Exited {
                code: Some(2),
                signal: None,
            },
        );
        assert_eq!(labels(&mut rx), vec!["online", "disconnect", "exit"]);

        let h = shared.core().registry.snapshot(id).unwrap();
        assert!(h.is_dead());
        assert!(!h.exited_after_disconnect);
        assert!(h.crashed());
    }

    #[tokio::test]
    async fn worker_requested_disconnect_is_voluntary() {
        let (shared, mut rx) = shared_with(&[1]);
        let id = WorkerId::new(1);
        shared.handle(id, WorkerSignal::Online);
        shared.handle(id, WorkerSignal::Disconnected { requested: true });
        shared.handle(id, WorkerSignal::Disconnected { requested: false });
        shared.handle(
            id,
            WorkerSignal::Exited {
                code: Some(0),
                signal: None,
            },
        );
        assert_eq!(labels(&mut rx), vec!["online", "disconnect", "exit"]);
        assert!(shared.core().registry.snapshot(id).unwrap().exited_after_disconnect);
    }

    #[tokio::test]
    async fn reported_listening_implies_online() {
        let (shared, mut rx) = shared_with(&[1]);
        let address: Endpoint = "127.0.0.1:9000".parse().unwrap();
        shared.handle(WorkerId::new(1), WorkerSignal::Listening { address });
        assert_eq!(labels(&mut rx), vec!["online", "listening"]);
    }

    #[tokio::test]
    async fn listen_before_online_is_refused() {
        let (shared, _rx) = shared_with(&[1]);
        let (reply, answer) = tokio::sync::oneshot::channel();
        shared.handle(
            WorkerId::new(1),
            WorkerSignal::Listen {
                endpoint: "127.0.0.1:0".parse().unwrap(),
                reply,
            },
        );
        let err = answer.await.unwrap().unwrap_err();
        assert_eq!(err.as_label(), "cluster_channel_closed");
    }

    #[tokio::test]
    async fn messages_carry_a_snapshot() {
        let (shared, mut rx) = shared_with(&[3]);
        shared.handle(
            WorkerId::new(3),
            WorkerSignal::Message {
                message: Message::from("hi"),
                handle: None,
            },
        );
        let ev = rx.try_recv().unwrap();
        match ev.kind {
            EventKind::Message { worker, message, .. } => {
                assert_eq!(worker.id, WorkerId::new(3));
                assert_eq!(message.as_str(), Some("hi"));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn connection_for_a_released_endpoint_is_reported_closed() {
        let (shared, mut rx) = shared_with(&[]);
        let socket = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = socket.local_addr().unwrap();
        let client = tokio::spawn(async move { tokio::net::TcpStream::connect(addr).await.unwrap() });
        let (stream, peer) = socket.accept().await.unwrap();
        let _client = client.await.unwrap();

        let endpoint = Endpoint::Tcp(addr);
        shared.dispatch(&endpoint, Connection::Tcp { stream, peer });
        match rx.try_recv().unwrap().kind {
            EventKind::ConnectionDropped { endpoint: ep, reason } => {
                assert_eq!(ep, endpoint);
                assert_eq!(&*reason, "endpoint closed");
            }
            other => panic!("unexpected {other:?}"),
        }
    }
}
