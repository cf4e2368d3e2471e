//! Respawn policies.
//!
//! Knobs for the opt-in [`Respawner`](crate::Respawner): **whether** a dead
//! worker is forked again and **how long** to wait first.
//!
//! ## Contents
//! - [`RespawnPolicy`] which exits qualify (never / on crash / always)
//! - [`BackoffPolicy`] delay over the crash streak (first / factor / max + jitter)
//! - [`JitterPolicy`]  randomization so simultaneous crashes do not respawn in lockstep
//!
//! ## Defaults
//! - `RespawnPolicy::OnCrash`
//! - `BackoffPolicy::default()` → first=100ms, factor=2.0, max=10s, jitter=Equal

mod backoff;
mod jitter;
mod respawn;

pub use backoff::BackoffPolicy;
pub use jitter::JitterPolicy;
pub use respawn::RespawnPolicy;
