//! # Worker registry.
//!
//! Ordered map `WorkerId → Entry`. The entry owns everything the supervisor
//! holds for one worker: its [`WorkerHandle`], the supervisor end of its
//! control channel, the kill switch of its execution unit and a `watch`
//! channel mirroring its state.
//!
//! ## Rules
//! - Entries are never dropped implicitly; `Dead` workers stay until reaped.
//! - Every state change goes through [`Registry::transition`], which keeps the
//!   watch channel in sync and closes the control channel on
//!   `Disconnected`/`Dead`.
//! - Illegal transitions are ignored and reported as "no change".

use std::collections::BTreeMap;

use tokio::sync::watch;

use crate::channel::ControlChannel;
use crate::core::launch::Execution;
use crate::error::ClusterError;
use crate::workers::{Signal, WorkerHandle, WorkerId, WorkerState};

pub(crate) struct Entry {
    pub(crate) handle: WorkerHandle,
    pub(crate) channel: ControlChannel,
    pub(crate) exec: Option<Execution>,
    state_tx: watch::Sender<WorkerState>,
}

impl Entry {
    pub(crate) fn new(id: WorkerId, channel: ControlChannel) -> Self {
        let handle = WorkerHandle::new(id);
        let (state_tx, _) = watch::channel(handle.state);
        Self {
            handle,
            channel,
            exec: None,
            state_tx,
        }
    }

    /// Receiver observing every later state of this worker.
    pub(crate) fn watch(&self) -> watch::Receiver<WorkerState> {
        self.state_tx.subscribe()
    }

    fn sync(&mut self) {
        self.state_tx.send_replace(self.handle.state);
        if self.handle.state.is_settled() {
            self.channel.close();
        }
    }
}

#[derive(Default)]
pub(crate) struct Registry {
    entries: BTreeMap<WorkerId, Entry>,
}

impl Registry {
    pub(crate) fn insert(&mut self, entry: Entry) {
        self.entries.insert(entry.handle.id, entry);
    }

    pub(crate) fn get(&self, id: WorkerId) -> Option<&Entry> {
        self.entries.get(&id)
    }

    pub(crate) fn get_mut(&mut self, id: WorkerId) -> Result<&mut Entry, ClusterError> {
        self.entries
            .get_mut(&id)
            .ok_or(ClusterError::UnknownWorker(id))
    }

    pub(crate) fn state(&self, id: WorkerId) -> Option<WorkerState> {
        self.entries.get(&id).map(|e| e.handle.state)
    }

    pub(crate) fn is_listening(&self, id: WorkerId) -> bool {
        self.state(id).is_some_and(WorkerState::is_routable)
    }

    pub(crate) fn snapshot(&self, id: WorkerId) -> Option<WorkerHandle> {
        self.entries.get(&id).map(|e| e.handle.clone())
    }

    /// Snapshots in id order.
    pub(crate) fn snapshots(&self) -> Vec<WorkerHandle> {
        self.entries.values().map(|e| e.handle.clone()).collect()
    }

    /// Ids of workers that have not terminated, in id order.
    pub(crate) fn alive_ids(&self) -> Vec<WorkerId> {
        self.entries
            .values()
            .filter(|e| !e.handle.is_dead())
            .map(|e| e.handle.id)
            .collect()
    }

    /// Workers still in `Spawning`.
    pub(crate) fn pending_count(&self) -> usize {
        self.entries
            .values()
            .filter(|e| e.handle.state == WorkerState::Spawning)
            .count()
    }

    /// Applies `next`. Returns the new snapshot when the state changed.
    pub(crate) fn transition(&mut self, id: WorkerId, next: WorkerState) -> Option<WorkerHandle> {
        let entry = self.entries.get_mut(&id)?;
        if !entry.handle.transition(next) {
            return None;
        }
        entry.sync();
        Some(entry.handle.clone())
    }

    /// Moves to `Dead`, records the exit status and releases the unit.
    pub(crate) fn record_exit(
        &mut self,
        id: WorkerId,
        code: Option<i32>,
        signal: Option<Signal>,
    ) -> Option<WorkerHandle> {
        let entry = self.entries.get_mut(&id)?;
        if !entry.handle.record_exit(code, signal) {
            return None;
        }
        entry.exec = None;
        entry.sync();
        Some(entry.handle.clone())
    }

    /// Removes a dead worker.
    pub(crate) fn reap(&mut self, id: WorkerId) -> Result<WorkerHandle, ClusterError> {
        match self.entries.get(&id).map(|e| e.handle.is_dead()) {
            None => Err(ClusterError::UnknownWorker(id)),
            Some(false) => Err(ClusterError::WorkerAlive(id)),
            Some(true) => self
                .entries
                .remove(&id)
                .map(|e| e.handle)
                .ok_or(ClusterError::UnknownWorker(id)),
        }
    }

    /// Removes every dead worker.
    pub(crate) fn reap_dead(&mut self) -> Vec<WorkerHandle> {
        let dead: Vec<WorkerId> = self
            .entries
            .values()
            .filter(|e| e.handle.is_dead())
            .map(|e| e.handle.id)
            .collect();
        dead.into_iter()
            .filter_map(|id| self.entries.remove(&id).map(|e| e.handle))
            .collect()
    }

    /// Removes every entry; refused while any worker is alive.
    pub(crate) fn clear(&mut self) -> Result<usize, ClusterError> {
        if let Some(id) = self.alive_ids().first() {
            return Err(ClusterError::WorkerAlive(*id));
        }
        let n = self.entries.len();
        self.entries.clear();
        Ok(n)
    }
}
