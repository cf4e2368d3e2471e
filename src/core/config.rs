//! # Cluster configuration.
//!
//! [`ClusterConfig`] centralizes the supervisor's settings. It is a plain struct
//! with public fields; prefer the helper accessors over sprinkling sentinel
//! checks across the code.
//!
//! ## Sentinel values
//! - `ready_timeout = 0s` → `spawn_ready` waits without bound
//! - `max_pending_workers = 0` → no limit on workers still `Spawning`
//! - `pending_connections = 0` → connections with no listening worker are dropped at once
//! - `bus_capacity` is clamped to at least 1
//!
//! ## Environment
//! [`ClusterConfig::from_env`] overlays `CLUSTER_SCHED_POLICY` (`rr` or `none`).

use std::time::Duration;

use crate::distributor::SchedulingPolicy;

/// Environment variable selecting the scheduling policy.
pub const SCHED_POLICY_ENV: &str = "CLUSTER_SCHED_POLICY";

/// Settings for a [`Supervisor`](crate::Supervisor).
#[derive(Clone, Debug)]
pub struct ClusterConfig {
    /// How connections are spread across workers. Locked by the first spawn.
    pub policy: SchedulingPolicy,

    /// How long `shutdown`/`stop` wait for workers before killing them.
    pub grace: Duration,

    /// How long `spawn_ready` waits for a worker to come online (`0s` = forever).
    pub ready_timeout: Duration,

    /// Capacity of the event bus ring buffer (min 1).
    ///
    /// Receivers lagging by more than this many events skip the oldest ones.
    pub bus_capacity: usize,

    /// Maximum workers allowed in `Spawning` at once (`0` = unlimited).
    pub max_pending_workers: usize,

    /// Connections kept per endpoint while no worker is listening.
    pub pending_connections: usize,
}

impl ClusterConfig {
    /// Defaults overlaid with `CLUSTER_SCHED_POLICY`.
    ///
    /// An unknown value is logged and ignored.
    pub fn from_env() -> Self {
        Self::default().with_policy_var(std::env::var(SCHED_POLICY_ENV).ok().as_deref())
    }

    fn with_policy_var(mut self, value: Option<&str>) -> Self {
        match value.map(str::parse::<SchedulingPolicy>) {
            Some(Ok(policy)) => self.policy = policy,
            Some(Err(e)) => tracing::warn!(var = SCHED_POLICY_ENV, error = %e, "ignoring scheduling policy"),
            None => {}
        }
        self
    }

    /// Readiness timeout as an `Option` (`None` = unbounded).
    #[inline]
    pub fn ready_limit(&self) -> Option<Duration> {
        if self.ready_timeout == Duration::ZERO {
            None
        } else {
            Some(self.ready_timeout)
        }
    }

    /// Pending-worker limit as an `Option` (`None` = unlimited).
    #[inline]
    pub fn pending_workers_limit(&self) -> Option<usize> {
        match self.max_pending_workers {
            0 => None,
            n => Some(n),
        }
    }

    /// Bus capacity clamped to a minimum of 1.
    #[inline]
    pub fn bus_capacity_clamped(&self) -> usize {
        self.bus_capacity.max(1)
    }
}

impl Default for ClusterConfig {
    /// - `policy`: round-robin (OS default on Windows)
    /// - `grace = 60s`, `ready_timeout = 30s`
    /// - `bus_capacity = 1024`
    /// - `max_pending_workers = 128`, `pending_connections = 128`
    fn default() -> Self {
        Self {
            policy: SchedulingPolicy::default(),
            grace: Duration::from_secs(60),
            ready_timeout: Duration::from_secs(30),
            bus_capacity: 1024,
            max_pending_workers: 128,
            pending_connections: 128,
        }
    }
}
