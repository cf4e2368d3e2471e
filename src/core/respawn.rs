//! # Respawner: opt-in re-forking of dead workers.
//!
//! The supervisor never respawns on its own. A [`Respawner`] remembers the
//! [`SpawnConfig`] of every worker spawned through it and, when one of them
//! dies, forks a replacement according to its [`RespawnPolicy`].
//!
//! ```text
//! Bus ──► Respawner task
//!           ├─ Listening          → crash streak = 0
//!           ├─ Exit(managed id)   → policy? limit? → sleep(backoff(streak)) → spawn(config)
//!           └─ ShutdownRequested  → cancel pending respawns, stop
//! ```
//!
//! ## Rules
//! - Only workers spawned through [`Respawner::spawn`] are managed.
//! - A replacement is a new worker with a new id; the dead one stays until reaped.
//! - `max_respawns` bounds the total number of respawns (crash storm guard).

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::core::supervisor::{Supervisor, WeakSupervisor};
use crate::error::ClusterError;
use crate::events::{Event, EventKind};
use crate::policies::{BackoffPolicy, RespawnPolicy};
use crate::workers::{SpawnConfig, WorkerHandle, WorkerId};

type Configs = Arc<Mutex<HashMap<WorkerId, SpawnConfig>>>;

/// Re-forks managed workers after they die.
#[derive(Clone)]
pub struct Respawner {
    sup: Supervisor,
    policy: RespawnPolicy,
    backoff: BackoffPolicy,
    max_respawns: Option<u32>,
    configs: Configs,
}

impl Respawner {
    /// `OnCrash` with the default backoff and no respawn limit.
    pub fn new(sup: &Supervisor) -> Self {
        Self {
            sup: sup.clone(),
            policy: RespawnPolicy::default(),
            backoff: BackoffPolicy::default(),
            max_respawns: None,
            configs: Arc::default(),
        }
    }

    pub fn with_policy(mut self, policy: RespawnPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_backoff(mut self, backoff: BackoffPolicy) -> Self {
        self.backoff = backoff;
        self
    }

    /// Stops respawning after `limit` respawns in total.
    pub fn with_max_respawns(mut self, limit: u32) -> Self {
        self.max_respawns = Some(limit);
        self
    }

    fn configs(&self) -> MutexGuard<'_, HashMap<WorkerId, SpawnConfig>> {
        lock(&self.configs)
    }

    /// Spawns a managed worker.
    pub fn spawn(&self, config: SpawnConfig) -> Result<WorkerHandle, ClusterError> {
        // Held across the spawn so an instant exit still finds the config.
        let mut configs = self.configs();
        let handle = self.sup.spawn(config.clone())?;
        configs.insert(handle.id, config);
        Ok(handle)
    }

    /// Ids of the managed workers that have not died yet.
    pub fn managed(&self) -> Vec<WorkerId> {
        let mut ids: Vec<WorkerId> = self.configs().keys().copied().collect();
        ids.sort();
        ids
    }

    /// Retires a managed worker: it is stopped and never respawned.
    pub async fn stop(&self, id: WorkerId, grace: Duration) -> Result<WorkerHandle, ClusterError> {
        self.configs().remove(&id);
        self.sup.stop(id, grace).await
    }

    /// Starts watching the event stream.
    ///
    /// Events published before this call are not seen. The task ends on
    /// `ShutdownRequested` or when the supervisor is gone.
    pub fn start(&self) -> JoinHandle<()> {
        let rx = self.sup.events();
        let task = RespawnTask {
            sup: self.sup.downgrade(),
            policy: self.policy,
            backoff: self.backoff,
            max_respawns: self.max_respawns,
            configs: Arc::clone(&self.configs),
            stop: CancellationToken::new(),
            streak: 0,
            respawned: 0,
        };
        tokio::spawn(task.run(rx))
    }
}

fn lock(configs: &Configs) -> MutexGuard<'_, HashMap<WorkerId, SpawnConfig>> {
    configs.lock().unwrap_or_else(PoisonError::into_inner)
}

struct RespawnTask {
    sup: WeakSupervisor,
    policy: RespawnPolicy,
    backoff: BackoffPolicy,
    max_respawns: Option<u32>,
    configs: Configs,
    stop: CancellationToken,
    streak: u32,
    respawned: u32,
}

impl RespawnTask {
    async fn run(mut self, mut rx: broadcast::Receiver<Event>) {
        loop {
            let ev = match rx.recv().await {
                Ok(ev) => ev,
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "respawner lagged; some exits were missed");
                    continue;
                }
                Err(RecvError::Closed) => break,
            };
            match ev.kind {
                EventKind::ShutdownRequested => break,
                EventKind::Listening { .. } => self.streak = 0,
                EventKind::Exit { worker, .. } => self.on_exit(worker),
                _ => {}
            }
        }
        self.stop.cancel();
    }

    fn on_exit(&mut self, dead: WorkerHandle) {
        let Some(config) = lock(&self.configs).remove(&dead.id) else {
            return;
        };
        if !self.policy.should_respawn(&dead) {
            return;
        }
        if self.max_respawns.is_some_and(|max| self.respawned >= max) {
            warn!(worker = %dead.id, respawned = self.respawned, "respawn limit reached; worker stays dead");
            return;
        }
        self.streak = self.streak.saturating_add(1);
        self.respawned += 1;
        let delay = self.backoff.delay_for(self.streak);

        let sup = self.sup.clone();
        let configs = Arc::clone(&self.configs);
        let stop = self.stop.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = stop.cancelled() => return,
                _ = tokio::time::sleep(delay) => {}
            }
            let Some(sup) = sup.upgrade() else { return };
            let mut managed = lock(&configs);
            match sup.spawn(config.clone()) {
                Ok(fresh) => {
                    managed.insert(fresh.id, config);
                    info!(worker = %dead.id, replacement = %fresh.id, ?delay, "worker respawned");
                }
                Err(e) => warn!(worker = %dead.id, error = %e, "respawn failed"),
            }
        });
    }
}
