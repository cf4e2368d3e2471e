//! # clustervisor
//!
//! **Clustervisor** runs several workers behind one listening endpoint.
//!
//! A [`Supervisor`] spawns workers (isolated tokio tasks or child processes),
//! owns the shared endpoints they listen on, spreads incoming connections over
//! them and drives their lifecycle: readiness, graceful disconnect, forced kill
//! and orderly shutdown. Everything that happens is published as an [`Event`].
//!
//! ## Architecture
//! ### Overview
//! ```text
//!     ┌──────────────┐   ┌──────────────┐   ┌──────────────┐
//!     │   Worker 1   │   │   Worker 2   │   │   Worker 3   │
//!     │  (task/proc) │   │  (task/proc) │   │  (task/proc) │
//!     └──┬───────▲───┘   └──┬───────▲───┘   └──┬───────▲───┘
//!        │signals│frames    │       │          │       │
//!        ▼       │          ▼       │          ▼       │
//! ┌───────────────────────────────────────────────────────────────────┐
//! │  Supervisor                                                       │
//! │  - dispatcher (single writer of worker states)                    │
//! │  - Registry (id → state, control channel, kill switch)            │
//! │  - Distributor (shared endpoints, round-robin rotation, backlog)  │
//! │  - Bus (broadcast events) ──► SubscriberSet (per-sub queues)      │
//! └──────────────────────────────▲────────────────────────────────────┘
//!                                │ accepted connections
//!                     ┌──────────┴──────────┐
//!                     │ acceptor / endpoint │  (round-robin policy)
//!                     └─────────────────────┘
//! ```
//!
//! ### Lifecycle
//! ```text
//! spawn ──► Spawning ──► Online ──► Listening
//!              │           │           │
//!              └───────────┴───────────┴──► Disconnecting ──► Disconnected ──► Dead
//!
//! disconnect(id)  → Disconnecting (exited_after_disconnect = true)
//! kill(id, sig)   → Dead (signal recorded, no exit code)
//! worker returns  → Disconnected → Dead (exit code)
//! ```
//!
//! ## Scheduling
//! - [`SchedulingPolicy::RoundRobin`]: the supervisor accepts and hands each
//!   connection to the next `Listening` worker in id order. Default except on Windows.
//! - [`SchedulingPolicy::OsDefault`]: workers accept on the same socket; the OS decides.
//!
//! ## Features
//! | Area              | Description                                             | Key types / traits                          |
//! |-------------------|---------------------------------------------------------|---------------------------------------------|
//! | **Supervision**   | Spawn, disconnect, kill, stop and shut down workers.    | [`Supervisor`], [`DisconnectHandle`]        |
//! | **Workers**       | In-process bodies and the child-process channel.        | [`Worker`], [`WorkerFn`], [`ProcessChannel`] |
//! | **Distribution**  | Shared endpoints and connection routing.                | [`Endpoint`], [`Listener`], [`Connection`]  |
//! | **Messaging**     | JSON messages both ways, FIFO per worker.               | [`Message`], [`SendHandle`], [`Delivery`]   |
//! | **Subscriber API**| Hook into lifecycle events (logging, metrics, ...).     | [`Subscribe`]                               |
//! | **Respawn**       | Opt-in re-forking of crashed workers with backoff.      | [`Respawner`], [`RespawnPolicy`]            |
//! | **Errors**        | Typed errors with stable labels.                        | [`ClusterError`], [`SpawnError`], [`WorkerError`] |
//! | **Configuration** | Centralize runtime settings.                            | [`ClusterConfig`]                           |
//!
//! ## Optional features
//! - `logging`: exports the built-in [`LogWriter`] subscriber.
//!
//! ## Example
//! ```rust
//! use std::sync::Arc;
//! use std::time::Duration;
//! use clustervisor::{ClusterConfig, SpawnConfig, Supervisor, WorkerContext, WorkerError, WorkerFn};
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     #[cfg(feature = "logging")]
//!     let subs: Vec<Arc<dyn clustervisor::Subscribe>> = vec![Arc::new(clustervisor::LogWriter)];
//!     #[cfg(not(feature = "logging"))]
//!     let subs: Vec<Arc<dyn clustervisor::Subscribe>> = Vec::new();
//!
//!     let sup = Supervisor::builder(ClusterConfig::default())
//!         .with_subscribers(subs)
//!         .build();
//!
//!     let hello = WorkerFn::arc("hello", |ctx: WorkerContext| async move {
//!         ctx.send(format!("hello from {}", ctx.id()))?;
//!         ctx.disconnect_requested().await;
//!         Ok::<_, WorkerError>(())
//!     });
//!     let worker = sup.spawn_ready(SpawnConfig::task(hello)).await?;
//!
//!     sup.stop(worker.id, Duration::from_secs(1)).await?;
//!     sup.shutdown(Duration::from_secs(1)).await?;
//!     Ok(())
//! }
//! ```

mod channel;
mod core;
mod distributor;
mod error;
mod events;
mod policies;
mod subscribers;
mod workers;

// ---- Public re-exports ----

pub use channel::{Delivery, Message, SendHandle};
pub use core::{
    wait_for_shutdown_signal, ClusterConfig, DisconnectHandle, Respawner, Supervisor,
    SupervisorBuilder, SCHED_POLICY_ENV,
};
pub use distributor::{Connection, Listener, SchedulingPolicy};
pub use error::{ClusterError, SpawnError, WorkerError};
pub use events::{Bus, Event, EventKind};
pub use policies::{BackoffPolicy, JitterPolicy, RespawnPolicy};
pub use subscribers::{Subscribe, SubscriberSet};
pub use workers::{
    Endpoint, ProcessChannel, Signal, SpawnConfig, StdioMode, Worker, WorkerContext, WorkerFn,
    WorkerHandle, WorkerId, WorkerRef, WorkerState, WorkerTarget, WORKER_ID_ENV,
};

#[cfg(unix)]
pub use distributor::LISTEN_FDS_ENV;

#[cfg(feature = "logging")]
pub use subscribers::LogWriter;
