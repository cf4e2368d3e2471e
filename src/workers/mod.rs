//! # Workers: identity, configuration and the worker-side API.
//!
//! ## Contents
//! - [`WorkerHandle`], [`WorkerId`], [`WorkerState`], [`Signal`]: snapshot of one worker
//! - [`SpawnConfig`], [`WorkerTarget`], [`StdioMode`]: what to spawn
//! - [`Worker`], [`WorkerFn`], [`WorkerContext`]: in-process worker bodies
//! - [`ProcessChannel`]: child side of a process worker
//! - [`Endpoint`]: shared listening addresses
//!
//! ## State machine
//! ```text
//! Spawning ──► Online ──► Listening ◄─┐
//!    │           │           │  └─────┘ (another endpoint)
//!    └───────────┴───────────┴──► Disconnecting ──► Disconnected ──► Dead
//!                 (any state may jump to Disconnected or Dead)
//! ```

mod context;
mod endpoint;
mod handle;
mod process;
mod spec;
mod worker;

pub use context::WorkerContext;
pub use endpoint::Endpoint;
pub use handle::{Signal, WorkerHandle, WorkerId, WorkerState};
pub use process::ProcessChannel;
pub use spec::{SpawnConfig, StdioMode, WorkerTarget, WORKER_ID_ENV};
pub use worker::{Worker, WorkerFn, WorkerRef};
