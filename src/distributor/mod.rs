//! # Connection distributor.
//!
//! Owns the shared listening endpoints and decides which worker gets each
//! inbound connection.
//!
//! ```text
//!                    ┌──────────── SharedEndpoint ────────────┐
//! client ──► socket ─┤ acceptor ─► route() ─► inlet[worker#1] ├─► Listener (worker#1)
//!                    │                    └─► inlet[worker#2] ├─► Listener (worker#2)
//!                    │  no Listening worker ─► pending queue   │
//!                    └─────────────────────────────────────────┘
//! ```
//!
//! ## Rules
//! - Workers are referred to by id only; eligibility comes from the caller
//!   (the registry) on every routing decision.
//! - Members of an endpoint are the workers that opened a listener on it.
//! - A connection whose inlet turned out to be closed is re-routed, never lost
//!   silently: it ends up in a worker, in the pending queue, or is returned to
//!   the caller to be dropped and reported.

mod acceptor;
mod connection;
#[cfg(unix)]
mod inherit;
mod listener;
mod policy;
mod round_robin;

use std::collections::VecDeque;
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error::ClusterError;
use crate::workers::{Endpoint, WorkerId};
use round_robin::RoundRobin;

pub(crate) use acceptor::{spawn_acceptor, ConnectionSink};
pub(crate) use connection::BoundListener;
#[cfg(unix)]
pub(crate) use inherit::{adopt_from_env, Inheritance};
#[cfg(unix)]
pub use inherit::LISTEN_FDS_ENV;
pub use connection::Connection;
pub use listener::Listener;
pub use policy::SchedulingPolicy;

/// Newly bound endpoint that still needs an acceptor.
pub(crate) struct Fresh {
    pub(crate) endpoint: Endpoint,
    pub(crate) listener: Arc<BoundListener>,
    pub(crate) token: CancellationToken,
}

/// Why an accepted connection could not be placed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Refusal {
    /// The endpoint was released while the connection was in flight.
    EndpointClosed,
    /// No listening worker and the pending queue is full.
    BacklogFull,
}

impl Refusal {
    /// Text carried by `ConnectionDropped`.
    pub(crate) fn reason(self) -> &'static str {
        match self {
            Refusal::EndpointClosed => "endpoint closed",
            Refusal::BacklogFull => "no listening worker and the pending queue is full",
        }
    }
}

type Inlet = (WorkerId, mpsc::UnboundedSender<Connection>);

fn open_inlet(inlets: &[Inlet], id: WorkerId) -> bool {
    inlets.iter().any(|(w, tx)| *w == id && !tx.is_closed())
}

struct SharedEndpoint {
    requested: Endpoint,
    bound: Endpoint,
    listener: Arc<BoundListener>,
    rotation: RoundRobin,
    inlets: Vec<Inlet>,
    pending: VecDeque<Connection>,
    acceptor: CancellationToken,
}

impl SharedEndpoint {
    fn matches(&self, endpoint: &Endpoint) -> bool {
        &self.requested == endpoint || &self.bound == endpoint
    }

    fn inlet(&self, id: WorkerId) -> Option<&mpsc::UnboundedSender<Connection>> {
        self.inlets.iter().find(|(w, _)| *w == id).map(|(_, tx)| tx)
    }

    fn drop_member(&mut self, id: WorkerId) {
        self.rotation.remove(id);
        self.inlets.retain(|(w, _)| *w != id);
    }

    /// Routes to the next eligible member, re-routing past closed inlets.
    fn hand_off(
        &mut self,
        mut conn: Connection,
        mut eligible: impl FnMut(WorkerId) -> bool,
    ) -> Result<WorkerId, Connection> {
        loop {
            let inlets = &self.inlets;
            let picked = self
                .rotation
                .next(|id| open_inlet(inlets, id) && eligible(id));
            let Some(id) = picked else { return Err(conn) };
            let Some(tx) = self.inlet(id) else { return Err(conn) };
            match tx.send(conn) {
                Ok(()) => return Ok(id),
                Err(mpsc::error::SendError(back)) => {
                    tracing::debug!(worker = %id, endpoint = %self.bound, "inlet closed, re-routing");
                    self.drop_member(id);
                    conn = back;
                }
            }
        }
    }
}

/// Shared endpoints plus the active scheduling policy.
pub(crate) struct Distributor {
    policy: SchedulingPolicy,
    locked: bool,
    pending_limit: usize,
    endpoints: Vec<SharedEndpoint>,
}

impl Distributor {
    pub(crate) fn new(policy: SchedulingPolicy, pending_limit: usize) -> Self {
        Self {
            policy,
            locked: false,
            pending_limit,
            endpoints: Vec::new(),
        }
    }

    pub(crate) fn policy(&self) -> SchedulingPolicy {
        self.policy
    }

    pub(crate) fn set_policy(&mut self, policy: SchedulingPolicy) -> Result<(), ClusterError> {
        if self.locked && policy != self.policy {
            return Err(ClusterError::PolicyLocked);
        }
        self.policy = policy;
        Ok(())
    }

    /// Freezes the policy; called on the first spawn.
    pub(crate) fn lock_policy(&mut self) {
        self.locked = true;
    }

    fn position(&self, endpoint: &Endpoint) -> Option<usize> {
        self.endpoints.iter().position(|e| e.matches(endpoint))
    }

    /// Binds `endpoint` unless already bound.
    ///
    /// Returns the bound endpoint and, for a new endpoint, what the caller
    /// needs to start its acceptor (round-robin only).
    pub(crate) fn ensure_bound(
        &mut self,
        endpoint: &Endpoint,
    ) -> Result<(Endpoint, Option<Fresh>), ClusterError> {
        if let Some(i) = self.position(endpoint) {
            return Ok((self.endpoints[i].bound.clone(), None));
        }
        let listener = Arc::new(BoundListener::bind(endpoint)?);
        let bound = listener.local_endpoint(endpoint);
        let token = CancellationToken::new();
        tracing::debug!(%bound, policy = %self.policy, "shared endpoint bound");

        let fresh = (self.policy == SchedulingPolicy::RoundRobin).then(|| Fresh {
            endpoint: bound.clone(),
            listener: Arc::clone(&listener),
            token: token.clone(),
        });
        self.endpoints.push(SharedEndpoint {
            requested: endpoint.clone(),
            bound: bound.clone(),
            listener,
            rotation: RoundRobin::new(),
            inlets: Vec::new(),
            pending: VecDeque::new(),
            acceptor: token,
        });
        Ok((bound, fresh))
    }

    /// Sockets a process worker inherits: every bound endpoint under OsDefault.
    pub(crate) fn inheritable(&self) -> Vec<(Endpoint, Arc<BoundListener>)> {
        if self.policy != SchedulingPolicy::OsDefault {
            return Vec::new();
        }
        self.endpoints
            .iter()
            .map(|e| (e.bound.clone(), Arc::clone(&e.listener)))
            .collect()
    }

    /// Adds `worker` as a member of `endpoint` and builds its listener.
    ///
    /// The endpoint must already be bound.
    pub(crate) fn register(
        &mut self,
        worker: WorkerId,
        endpoint: &Endpoint,
        disconnect: CancellationToken,
    ) -> Result<Listener, ClusterError> {
        let policy = self.policy;
        let shared = self
            .position(endpoint)
            .map(|i| &mut self.endpoints[i])
            .ok_or_else(|| ClusterError::UnsupportedEndpoint(endpoint.clone()))?;
        shared.rotation.insert(worker);
        let listener = match policy {
            SchedulingPolicy::RoundRobin => {
                let (tx, rx) = mpsc::unbounded_channel();
                shared.inlets.retain(|(w, _)| *w != worker);
                shared.inlets.push((worker, tx));
                Listener::routed(shared.bound.clone(), rx, disconnect)
            }
            SchedulingPolicy::OsDefault => {
                Listener::shared(shared.bound.clone(), Arc::clone(&shared.listener), disconnect)
            }
        };
        Ok(listener)
    }

    /// Picks the worker for the next connection on `endpoint`.
    pub(crate) fn route(
        &mut self,
        endpoint: &Endpoint,
        mut eligible: impl FnMut(WorkerId) -> bool,
    ) -> Result<WorkerId, ClusterError> {
        if self.policy == SchedulingPolicy::OsDefault {
            return Err(ClusterError::RoutingDelegated);
        }
        let unavailable = || ClusterError::NoAvailableWorker {
            endpoint: endpoint.clone(),
        };
        let i = self.position(endpoint).ok_or_else(unavailable)?;
        let shared = &mut self.endpoints[i];
        let inlets = &shared.inlets;
        shared
            .rotation
            .next(|id| open_inlet(inlets, id) && eligible(id))
            .ok_or_else(unavailable)
    }

    /// Delivers an accepted connection, queueing it when nobody is listening.
    ///
    /// Returns the connection back when it can be neither delivered nor queued.
    pub(crate) fn dispatch(
        &mut self,
        endpoint: &Endpoint,
        conn: Connection,
        eligible: impl FnMut(WorkerId) -> bool,
    ) -> Result<Option<WorkerId>, (Connection, Refusal)> {
        let limit = self.pending_limit;
        let Some(i) = self.position(endpoint) else {
            return Err((conn, Refusal::EndpointClosed));
        };
        let shared = &mut self.endpoints[i];
        match shared.hand_off(conn, eligible) {
            Ok(id) => Ok(Some(id)),
            Err(conn) if shared.pending.len() < limit => {
                shared.pending.push_back(conn);
                Ok(None)
            }
            Err(conn) => Err((conn, Refusal::BacklogFull)),
        }
    }

    /// Hands queued connections of `endpoint` to listening workers.
    ///
    /// Returns how many were delivered.
    pub(crate) fn flush_pending(
        &mut self,
        endpoint: &Endpoint,
        mut eligible: impl FnMut(WorkerId) -> bool,
    ) -> usize {
        let Some(i) = self.position(endpoint) else {
            return 0;
        };
        let shared = &mut self.endpoints[i];
        let mut delivered = 0;
        while let Some(conn) = shared.pending.pop_front() {
            match shared.hand_off(conn, &mut eligible) {
                Ok(_) => delivered += 1,
                Err(conn) => {
                    shared.pending.push_front(conn);
                    break;
                }
            }
        }
        delivered
    }

    /// Removes `worker` from every endpoint. Its inlets close.
    pub(crate) fn forget(&mut self, worker: WorkerId) {
        for shared in &mut self.endpoints {
            shared.drop_member(worker);
        }
    }

    /// Stops every acceptor and releases every endpoint.
    pub(crate) fn close_all(&mut self) {
        for shared in self.endpoints.drain(..) {
            shared.acceptor.cancel();
            #[cfg(unix)]
            if let Endpoint::Unix(path) = &shared.bound {
                let _ = std::fs::remove_file(path);
            }
            tracing::debug!(endpoint = %shared.bound, dropped = shared.pending.len(), "shared endpoint closed");
        }
    }
}
