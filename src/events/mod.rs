//! Runtime events: types and broadcast bus.
//!
//! ## Contents
//! - [`EventKind`], [`Event`]: event classification and ordering metadata
//! - [`Bus`]: thin wrapper over `tokio::sync::broadcast`
//!
//! ## Quick reference
//! - **Publishers**: `Supervisor` (fork, shutdown), the dispatcher (worker
//!   lifecycle and messages), acceptors (dropped connections), `SubscriberSet`
//!   workers (overflow/panic).
//! - **Consumers**: the supervisor's subscriber listener (fans out to
//!   `SubscriberSet`) and any receiver from `Supervisor::events()`.

mod bus;
mod event;

pub use bus::Bus;
pub use event::{Event, EventKind};
