//! Runtime core: supervision and lifecycle.
//!
//! The public API from this module is [`Supervisor`] (built with
//! [`SupervisorBuilder`]), its [`ClusterConfig`] and the opt-in [`Respawner`].
//!
//! Internal modules:
//! - [`registry`]: worker entries and state transitions;
//! - [`launch`]: starts task and process execution units;
//! - [`shared`]: supervisor state, the dispatcher and connection routing;
//! - [`supervisor`]: the public handle (spawn, disconnect, kill, shutdown, route);
//! - [`respawn`]: re-forks managed workers after they die;
//! - [`shutdown`]: cross-platform termination signal handling.

mod builder;
mod config;
mod launch;
mod registry;
mod respawn;
mod shared;
mod shutdown;
mod supervisor;

pub use builder::SupervisorBuilder;
pub use config::{ClusterConfig, SCHED_POLICY_ENV};
pub use respawn::Respawner;
pub use shutdown::wait_for_shutdown_signal;
pub use supervisor::{DisconnectHandle, Supervisor};
