//! # Event subscriber trait.
//!
//! Provides [`Subscribe`], the extension point for plugging event handlers into
//! a [`Supervisor`](crate::Supervisor).
//!
//! Each subscriber gets:
//! - **Dedicated worker task** (runs independently)
//! - **Per-subscriber bounded queue** (capacity via [`Subscribe::queue_capacity`])
//! - **Panic isolation** (panics are reported as `EventKind::SubscriberPanicked`)
//!
//! ## Rules
//! - A slow subscriber only affects its own queue; it never blocks a worker's
//!   control channel or the dispatcher.
//! - Queue overflow drops the event **for this subscriber only** and publishes
//!   `EventKind::SubscriberOverflow`.
//! - Events are processed sequentially (FIFO) per subscriber.
//!
//! ## Example
//! ```rust
//! use async_trait::async_trait;
//! use clustervisor::{Event, EventKind, Subscribe};
//!
//! struct Crashes;
//!
//! #[async_trait]
//! impl Subscribe for Crashes {
//!     async fn on_event(&self, ev: &Event) {
//!         if let EventKind::Exit { worker, .. } = &ev.kind {
//!             if worker.crashed() {
//!                 // page someone
//!             }
//!         }
//!     }
//!
//!     fn name(&self) -> &'static str { "crashes" }
//!     fn queue_capacity(&self) -> usize { 256 }
//! }
//! ```

use async_trait::async_trait;

use crate::events::Event;

/// Event subscriber.
///
/// ### Implementation requirements
/// - Use async I/O; avoid blocking the executor.
/// - Handle errors internally; do not panic.
#[async_trait]
pub trait Subscribe: Send + Sync + 'static {
    /// Processes a single event, from the subscriber's own task.
    async fn on_event(&self, event: &Event);

    /// Name used in logs and in overflow/panic events.
    ///
    /// The default uses `type_name::<Self>()`; override it when possible.
    fn name(&self) -> &'static str {
        std::any::type_name::<Self>()
    }

    /// Preferred queue capacity (clamped to at least 1). Default: 1024.
    fn queue_capacity(&self) -> usize {
        1024
    }
}
