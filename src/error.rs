//! Error types used by the cluster runtime and by worker bodies.
//!
//! - [`ClusterError`]: failures surfaced to callers of the [`Supervisor`](crate::Supervisor)
//!   and of the worker-side APIs.
//! - [`SpawnError`]: why a single spawn attempt failed (wrapped by [`ClusterError::Spawn`]).
//! - [`WorkerError`]: what a worker body returns when it gives up.
//!
//! Worker failures never cross into the supervisor as errors: a failing body is
//! reported as an `Exit` event with a non-zero exit code. Every enum exposes
//! `as_label()` for logs and metrics.

use std::io;
use std::time::Duration;

use thiserror::Error;

use crate::workers::{Endpoint, WorkerId};

/// # Errors produced by the cluster runtime.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum ClusterError {
    /// A worker could not be created. Existing workers are unaffected.
    #[error("spawn failed: {0}")]
    Spawn(#[from] SpawnError),

    /// The worker's control channel is closed (worker disconnected or dead).
    #[error("control channel to {worker} is closed")]
    ChannelClosed {
        /// Worker on the other side of the channel.
        worker: WorkerId,
    },

    /// Round-robin routing found no worker in the `Listening` state.
    #[error("no listening worker available for {endpoint}")]
    NoAvailableWorker {
        /// Endpoint the connection arrived on.
        endpoint: Endpoint,
    },

    /// Routing is performed by the operating system under [`SchedulingPolicy::OsDefault`](crate::SchedulingPolicy::OsDefault).
    #[error("connections are distributed by the operating system")]
    RoutingDelegated,

    /// No worker with this id is registered.
    #[error("unknown worker {0}")]
    UnknownWorker(WorkerId),

    /// The worker is still alive and cannot be reaped.
    #[error("{0} is still alive")]
    WorkerAlive(WorkerId),

    /// The scheduling policy can only be changed before the first spawn.
    #[error("scheduling policy is locked once a worker has been spawned")]
    PolicyLocked,

    /// Named-pipe servers are not permitted inside a worker on Windows.
    #[error("workers cannot listen on named pipe {0}")]
    PipeNotPermitted(String),

    /// The endpoint kind is not available on this platform.
    #[error("endpoint {0} is not supported on this platform")]
    UnsupportedEndpoint(Endpoint),

    /// The endpoint string could not be parsed.
    #[error("invalid endpoint {0:?}")]
    InvalidEndpoint(String),

    /// Handles can only travel to and from in-process workers.
    #[error("{worker} cannot receive handles")]
    HandleNotTransferable {
        /// Target worker.
        worker: WorkerId,
    },

    /// The shared listening endpoint could not be created.
    #[error("failed to bind {endpoint}: {source}")]
    Bind {
        /// Endpoint that failed to bind.
        endpoint: Endpoint,
        /// Underlying I/O error.
        #[source]
        source: io::Error,
    },

    /// A control frame could not be encoded or decoded.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Termination signal handlers could not be installed.
    #[error("failed to install signal handlers: {0}")]
    SignalHandler(#[source] io::Error),

    /// Shutdown grace period was exceeded; the listed workers were killed.
    #[error("shutdown grace {grace:?} exceeded; killed: {stuck:?}")]
    GraceExceeded {
        /// The configured grace duration.
        grace: Duration,
        /// Workers that did not stop in time.
        stuck: Vec<WorkerId>,
    },
}

impl ClusterError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    ///
    /// # Example
    /// ```
    /// use clustervisor::ClusterError;
    ///
    /// assert_eq!(ClusterError::PolicyLocked.as_label(), "cluster_policy_locked");
    /// ```
    pub fn as_label(&self) -> &'static str {
        match self {
            ClusterError::Spawn(e) => e.as_label(),
            ClusterError::ChannelClosed { .. } => "cluster_channel_closed",
            ClusterError::NoAvailableWorker { .. } => "cluster_no_available_worker",
            ClusterError::RoutingDelegated => "cluster_routing_delegated",
            ClusterError::UnknownWorker(_) => "cluster_unknown_worker",
            ClusterError::WorkerAlive(_) => "cluster_worker_alive",
            ClusterError::PolicyLocked => "cluster_policy_locked",
            ClusterError::PipeNotPermitted(_) => "cluster_pipe_not_permitted",
            ClusterError::UnsupportedEndpoint(_) => "cluster_unsupported_endpoint",
            ClusterError::InvalidEndpoint(_) => "cluster_invalid_endpoint",
            ClusterError::HandleNotTransferable { .. } => "cluster_handle_not_transferable",
            ClusterError::Bind { .. } => "cluster_bind_failed",
            ClusterError::Protocol(_) => "cluster_protocol",
            ClusterError::SignalHandler(_) => "cluster_signal_handler",
            ClusterError::GraceExceeded { .. } => "cluster_grace_exceeded",
        }
    }

    /// True for errors the caller can recover from by dropping or re-routing.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            ClusterError::ChannelClosed { .. } | ClusterError::NoAvailableWorker { .. }
        )
    }
}

/// # Why a spawn attempt failed.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum SpawnError {
    /// The spawn configuration is not usable.
    #[error("invalid spawn config: {0}")]
    InvalidConfig(String),

    /// The execution unit could not be started.
    #[error("failed to launch worker: {0}")]
    Launch(#[source] io::Error),

    /// Too many workers are still waiting to come online.
    #[error("{limit} workers are already pending")]
    TooManyPending {
        /// Configured `max_pending_workers`.
        limit: usize,
    },

    /// The worker did not report readiness in time and was killed.
    #[error("{worker} not online after {timeout:?}")]
    ReadyTimeout {
        /// The worker that was killed.
        worker: WorkerId,
        /// The configured readiness timeout.
        timeout: Duration,
    },
}

impl SpawnError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            SpawnError::InvalidConfig(_) => "spawn_invalid_config",
            SpawnError::Launch(_) => "spawn_launch_failed",
            SpawnError::TooManyPending { .. } => "spawn_too_many_pending",
            SpawnError::ReadyTimeout { .. } => "spawn_ready_timeout",
        }
    }
}

/// # Errors returned by worker bodies.
///
/// Any error makes the worker exit with code `1`.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum WorkerError {
    /// The worker gave up.
    #[error("worker failed: {0}")]
    Fail(String),

    /// I/O failure while serving.
    #[error("worker i/o: {0}")]
    Io(#[from] io::Error),

    /// A cluster operation failed inside the worker.
    #[error(transparent)]
    Cluster(#[from] ClusterError),
}

impl WorkerError {
    /// Builds a [`WorkerError::Fail`] from anything printable.
    pub fn fail(msg: impl Into<String>) -> Self {
        WorkerError::Fail(msg.into())
    }

    /// Returns a short stable label (snake_case) for use in logs/metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            WorkerError::Fail(_) => "worker_failed",
            WorkerError::Io(_) => "worker_io",
            WorkerError::Cluster(_) => "worker_cluster",
        }
    }
}

/// Best-effort text of a panic payload.
pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&'static str>() {
        (*msg).to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic".to_string()
    }
}
