//! # Supervisor: spawns workers, shares endpoints and drives shutdown.
//!
//! [`Supervisor`] is a cheap handle (clone it freely) over one cluster. It owns
//! the event bus, the worker registry, the connection distributor and the
//! subscriber fan-out.
//!
//! ## High-level architecture
//! ```text
//! spawn(SpawnConfig) ──► prepare (fork/exec, unlocked) ──► start unit ──► Registry (Spawning) ──► Bus: Fork
//!                                   unit ── Online / Listen / Message / Exited ──► inbox
//!                                                                               │
//!                                          dispatcher (single writer) ◄─────────┘
//!                                              └─► Registry transitions ──► Bus: Online, Listening, ...
//!
//! Bus ──► subscriber listener ──► SubscriberSet::emit ──► [queue S1] ... [queue SN]
//!
//! Shutdown path:
//!   shutdown(grace) / run_until_signal()
//!       └─► Bus: ShutdownRequested
//!       └─► disconnect every worker
//!       └─► wait for Dead within grace:
//!              ├─ all dead      → Bus: AllStoppedWithin
//!              └─ grace elapsed → kill(Kill) stuck workers, Bus: GraceExceeded, Err
//!       └─► close every shared endpoint
//! ```
//!
//! ## Example
//! ```rust,no_run
//! use clustervisor::{
//!     ClusterConfig, Endpoint, SpawnConfig, Supervisor, WorkerContext, WorkerError, WorkerFn,
//! };
//! use tokio::io::AsyncWriteExt;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let sup = Supervisor::new(ClusterConfig::default());
//!     let endpoint: Endpoint = "127.0.0.1:8080".parse()?;
//!
//!     for _ in 0..4 {
//!         let endpoint = endpoint.clone();
//!         let worker = WorkerFn::arc("echo", move |ctx: WorkerContext| {
//!             let endpoint = endpoint.clone();
//!             async move {
//!                 let mut listener = ctx.listen(&endpoint).await?;
//!                 while let Some(mut conn) = listener.accept().await? {
//!                     conn.write_all(format!("hello from {}\n", ctx.id()).as_bytes()).await?;
//!                 }
//!                 Ok::<_, WorkerError>(())
//!             }
//!         });
//!         sup.spawn(SpawnConfig::task(worker))?;
//!     }
//!     sup.run_until_signal().await?;
//!     Ok(())
//! }
//! ```

use std::sync::{Arc, Weak};
use std::time::Duration;

use futures::future::join_all;
use tokio::sync::{broadcast, watch};
use tracing::{debug, info, warn};

use crate::channel::{ControlChannel, Message, SendHandle, WorkerLink};
use crate::core::builder::SupervisorBuilder;
use crate::core::config::ClusterConfig;
use crate::core::launch::{prepare, start};
use crate::core::registry::Entry;
use crate::core::shared::{Core, Shared};
use crate::core::shutdown;
use crate::distributor::SchedulingPolicy;
use crate::error::{ClusterError, SpawnError};
use crate::events::{Event, EventKind};
use crate::subscribers::SubscriberSet;
use crate::workers::{Endpoint, Signal, SpawnConfig, WorkerHandle, WorkerId, WorkerState};

/// Upper bound on the wait for a unit to die after `Kill` was delivered.
const KILL_WAIT: Duration = Duration::from_secs(5);

/// Handle over one cluster of workers.
#[derive(Clone)]
pub struct Supervisor {
    shared: Arc<Shared>,
    subs: Arc<SubscriberSet>,
}

impl Supervisor {
    /// Supervisor without subscribers. Must be called inside a tokio runtime.
    pub fn new(cfg: ClusterConfig) -> Self {
        SupervisorBuilder::new(cfg).build()
    }

    pub fn builder(cfg: ClusterConfig) -> SupervisorBuilder {
        SupervisorBuilder::new(cfg)
    }

    pub(crate) fn from_parts(shared: Arc<Shared>, subs: Arc<SubscriberSet>) -> Self {
        Self { shared, subs }
    }

    pub(crate) fn downgrade(&self) -> WeakSupervisor {
        WeakSupervisor {
            shared: Arc::downgrade(&self.shared),
            subs: Arc::downgrade(&self.subs),
        }
    }

    pub fn config(&self) -> &ClusterConfig {
        &self.shared.cfg
    }

    /// Receiver of every event published from now on.
    pub fn events(&self) -> broadcast::Receiver<Event> {
        self.shared.bus.subscribe()
    }

    pub fn scheduling_policy(&self) -> SchedulingPolicy {
        self.shared.core().distributor.policy()
    }

    /// Changes the policy. Fails with [`ClusterError::PolicyLocked`] once a worker was spawned.
    pub fn set_scheduling_policy(&self, policy: SchedulingPolicy) -> Result<(), ClusterError> {
        self.shared.core().distributor.set_policy(policy)
    }

    /// Creates a worker and starts its execution unit.
    ///
    /// Returns the `Spawning` snapshot; a `Fork` event has been published. The
    /// unit reports `Online` on its own.
    ///
    /// ### Errors
    /// - [`SpawnError::InvalidConfig`]: bad config, or a process worker under round-robin.
    /// - [`SpawnError::TooManyPending`]: too many workers still `Spawning`.
    /// - [`SpawnError::Launch`]: the OS refused to start the process.
    pub fn spawn(&self, config: SpawnConfig) -> Result<WorkerHandle, ClusterError> {
        config.validate()?;
        let shared = &self.shared;
        let inherited = {
            let core = shared.core();
            self.admit(&core, &config)?;
            if config.target().is_process() {
                core.distributor.inheritable()
            } else {
                Vec::new()
            }
        };

        let id = shared.next_id();
        let prepared = prepare(&config, id, &inherited).map_err(|e| {
            warn!(worker = %id, error = %e, "spawn failed");
            ClusterError::from(e)
        })?;

        let mut core = shared.core();
        // Another spawn or a policy change may have won the race while unlocked.
        self.admit(&core, &config)?;
        let (channel, ends) = ControlChannel::new(id, !config.target().is_process());
        let link = WorkerLink::new(id, shared.inbox.clone());
        let exec = match start(prepared, &config, ends, link) {
            Ok(exec) => exec,
            Err(e) => {
                warn!(worker = %id, error = %e, "spawn failed");
                return Err(e.into());
            }
        };
        let mut entry = Entry::new(id, channel);
        entry.exec = Some(exec);
        let handle = entry.handle.clone();
        core.registry.insert(entry);
        core.distributor.lock_policy();

        debug!(worker = %id, process = config.target().is_process(), "worker forked");
        shared.bus.publish(EventKind::Fork {
            worker: handle.clone(),
        });
        Ok(handle)
    }

    /// Checks policy and pending limit for one more worker.
    fn admit(&self, core: &Core, config: &SpawnConfig) -> Result<(), ClusterError> {
        if config.target().is_process()
            && core.distributor.policy() == SchedulingPolicy::RoundRobin
        {
            return Err(SpawnError::InvalidConfig(
                "process workers share endpoints only under SchedulingPolicy::OsDefault".into(),
            )
            .into());
        }
        if let Some(limit) = self.shared.cfg.pending_workers_limit() {
            if core.registry.pending_count() >= limit {
                return Err(SpawnError::TooManyPending { limit }.into());
            }
        }
        Ok(())
    }

    /// Spawns and waits until the worker left `Spawning`.
    ///
    /// Bounded by [`ClusterConfig::ready_timeout`]; on timeout the worker is
    /// killed and [`SpawnError::ReadyTimeout`] returned.
    pub async fn spawn_ready(&self, config: SpawnConfig) -> Result<WorkerHandle, ClusterError> {
        let id = self.spawn(config)?.id;
        let mut rx = self.watch(id)?;
        let ready = async {
            let _ = rx.wait_for(|s| *s != WorkerState::Spawning).await;
        };
        if let Some(limit) = self.shared.cfg.ready_limit() {
            if tokio::time::timeout(limit, ready).await.is_err() {
                warn!(worker = %id, ?limit, "worker not ready in time; killing");
                self.kill(id, Signal::Kill)?;
                return Err(SpawnError::ReadyTimeout {
                    worker: id,
                    timeout: limit,
                }
                .into());
            }
        } else {
            ready.await;
        }
        self.worker(id).ok_or(ClusterError::UnknownWorker(id))
    }

    fn watch(&self, id: WorkerId) -> Result<watch::Receiver<WorkerState>, ClusterError> {
        self.shared
            .core()
            .registry
            .get(id)
            .map(Entry::watch)
            .ok_or(ClusterError::UnknownWorker(id))
    }

    /// Asks a worker to close its channel and stop its listeners.
    ///
    /// Marks the worker as leaving on purpose (`exited_after_disconnect`).
    /// Idempotent: later calls return a handle over the same transition.
    pub fn disconnect(&self, id: WorkerId) -> Result<DisconnectHandle, ClusterError> {
        let mut core = self.shared.core();
        let entry = core.registry.get_mut(id)?;
        let rx = entry.watch();
        if entry.handle.state.is_live() {
            entry.handle.exited_after_disconnect = true;
            entry.channel.request_disconnect();
            core.registry.transition(id, WorkerState::Disconnecting);
            debug!(worker = %id, "disconnect requested");
        }
        Ok(DisconnectHandle { worker: id, rx })
    }

    /// Disconnects every registered worker and runs `done` once all of them settled.
    ///
    /// With nothing left to wait for, `done` runs right away on the caller.
    pub fn disconnect_all<F>(&self, done: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let handles: Vec<DisconnectHandle> = self
            .workers()
            .iter()
            .filter_map(|w| self.disconnect(w.id).ok())
            .collect();
        if handles.iter().all(DisconnectHandle::is_done) {
            done();
            return;
        }
        tokio::spawn(async move {
            join_all(handles.into_iter().map(DisconnectHandle::wait)).await;
            done();
        });
    }

    /// Forcefully terminates a worker's unit. A no-op for dead workers.
    pub fn kill(&self, id: WorkerId, signal: Signal) -> Result<(), ClusterError> {
        let core = self.shared.core();
        let entry = core
            .registry
            .get(id)
            .ok_or(ClusterError::UnknownWorker(id))?;
        if let Some(exec) = &entry.exec {
            debug!(worker = %id, %signal, "killing worker");
            exec.kill(signal);
        }
        Ok(())
    }

    /// Queues a message for a worker. Returns its per-worker sequence number.
    pub fn send(&self, id: WorkerId, message: impl Into<Message>) -> Result<u64, ClusterError> {
        self.shared
            .core()
            .registry
            .get_mut(id)?
            .channel
            .send(message.into(), None)
    }

    /// Queues a message with an attached resource. In-process workers only.
    pub fn send_with_handle(
        &self,
        id: WorkerId,
        message: impl Into<Message>,
        handle: SendHandle,
    ) -> Result<u64, ClusterError> {
        self.shared
            .core()
            .registry
            .get_mut(id)?
            .channel
            .send(message.into(), Some(handle))
    }

    /// Disconnects a worker and waits for it to die, killing it after `grace`.
    pub async fn stop(&self, id: WorkerId, grace: Duration) -> Result<WorkerHandle, ClusterError> {
        let mut rx = self.watch(id)?;
        self.disconnect(id)?;

        let dead = |s: &WorkerState| *s == WorkerState::Dead;
        if tokio::time::timeout(grace, rx.wait_for(dead)).await.is_err() {
            warn!(worker = %id, ?grace, "worker did not stop in time; killing");
            self.kill(id, Signal::Kill)?;
            if tokio::time::timeout(KILL_WAIT, rx.wait_for(dead))
                .await
                .is_err()
            {
                return Err(ClusterError::GraceExceeded {
                    grace,
                    stuck: vec![id],
                });
            }
        }
        self.worker(id).ok_or(ClusterError::UnknownWorker(id))
    }

    /// Graceful shutdown of the whole cluster.
    ///
    /// Publishes `ShutdownRequested`, disconnects every worker and waits up to
    /// `grace` for all of them to die. Stragglers are killed and reported in
    /// [`ClusterError::GraceExceeded`]. Shared endpoints are closed either way.
    pub async fn shutdown(&self, grace: Duration) -> Result<(), ClusterError> {
        self.shared.bus.publish(EventKind::ShutdownRequested);
        let ids = self.shared.core().registry.alive_ids();
        info!(workers = ids.len(), ?grace, "shutting down");

        let mut watchers = Vec::with_capacity(ids.len());
        for id in ids {
            if let Ok(rx) = self.watch(id) {
                watchers.push(rx);
            }
            let _ = self.disconnect(id);
        }
        let all_dead = join_all(watchers.iter_mut().map(|rx| async move {
            let _ = rx.wait_for(|s| *s == WorkerState::Dead).await;
        }));

        let result = if tokio::time::timeout(grace, all_dead).await.is_ok() {
            self.shared.bus.publish(EventKind::AllStoppedWithin);
            Ok(())
        } else {
            let stuck = self.shared.core().registry.alive_ids();
            for id in &stuck {
                let _ = self.kill(*id, Signal::Kill);
            }
            warn!(?stuck, ?grace, "grace exceeded; killed remaining workers");
            self.shared.bus.publish(EventKind::GraceExceeded {
                stuck: stuck.clone(),
            });
            Err(ClusterError::GraceExceeded { grace, stuck })
        };
        self.shared.core().distributor.close_all();
        result
    }

    /// Waits for SIGINT/SIGTERM/SIGQUIT (Ctrl-C on Windows), then shuts down
    /// with [`ClusterConfig::grace`].
    pub async fn run_until_signal(&self) -> Result<(), ClusterError> {
        shutdown::wait_for_shutdown_signal()
            .await
            .map_err(ClusterError::SignalHandler)?;
        info!("termination signal received");
        self.shutdown(self.shared.cfg.grace).await
    }

    /// Binds a shared endpoint ahead of any worker. Returns the resolved address.
    pub fn bind(&self, endpoint: &Endpoint) -> Result<Endpoint, ClusterError> {
        let (bound, fresh) = self.shared.core().distributor.ensure_bound(endpoint)?;
        if let Some(fresh) = fresh {
            self.shared.start_acceptor(fresh);
        }
        Ok(bound)
    }

    /// The worker the next connection on `endpoint` goes to (advances the rotation).
    ///
    /// ### Errors
    /// - [`ClusterError::RoutingDelegated`] under [`SchedulingPolicy::OsDefault`].
    /// - [`ClusterError::NoAvailableWorker`] when no member is `Listening`.
    pub fn route(&self, endpoint: &Endpoint) -> Result<WorkerHandle, ClusterError> {
        let mut core = self.shared.core();
        let Core {
            registry,
            distributor,
        } = &mut *core;
        let id = distributor.route(endpoint, |id| registry.is_listening(id))?;
        registry
            .snapshot(id)
            .ok_or(ClusterError::UnknownWorker(id))
    }

    pub fn worker(&self, id: WorkerId) -> Option<WorkerHandle> {
        self.shared.core().registry.snapshot(id)
    }

    /// Every registered worker, in id order.
    pub fn workers(&self) -> Vec<WorkerHandle> {
        self.shared.core().registry.snapshots()
    }

    /// Removes a dead worker from the registry.
    pub fn reap(&self, id: WorkerId) -> Result<WorkerHandle, ClusterError> {
        self.shared.core().registry.reap(id)
    }

    pub fn reap_dead(&self) -> Vec<WorkerHandle> {
        self.shared.core().registry.reap_dead()
    }

    /// Empties the registry. Refused while any worker is alive.
    pub fn clear(&self) -> Result<usize, ClusterError> {
        self.shared.core().registry.clear()
    }
}

/// Non-owning supervisor handle for background tasks.
#[derive(Clone)]
pub(crate) struct WeakSupervisor {
    shared: Weak<Shared>,
    subs: Weak<SubscriberSet>,
}

impl WeakSupervisor {
    pub(crate) fn upgrade(&self) -> Option<Supervisor> {
        Some(Supervisor {
            shared: self.shared.upgrade()?,
            subs: self.subs.upgrade()?,
        })
    }
}

/// Completion of a [`Supervisor::disconnect`].
#[derive(Debug)]
pub struct DisconnectHandle {
    worker: WorkerId,
    rx: watch::Receiver<WorkerState>,
}

impl DisconnectHandle {
    pub fn worker(&self) -> WorkerId {
        self.worker
    }

    /// True once the worker is `Disconnected` or `Dead`.
    pub fn is_done(&self) -> bool {
        self.rx.borrow().is_settled()
    }

    /// Waits for the worker to settle and returns the state it settled in.
    pub async fn wait(mut self) -> WorkerState {
        let settled = self
            .rx
            .wait_for(|s| s.is_settled())
            .await
            .map(|s| *s);
        settled.unwrap_or_else(|_| *self.rx.borrow())
    }
}
