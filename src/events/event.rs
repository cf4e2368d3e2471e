//! # Runtime events emitted by the supervisor.
//!
//! [`EventKind`] classifies events in three groups:
//! - **Worker lifecycle**: `Fork`, `Online`, `Listening`, `Disconnect`, `Exit`, `Message`
//! - **Runtime**: `ConnectionDropped`, `ShutdownRequested`, `AllStoppedWithin`, `GraceExceeded`
//! - **Subscriber health**: `SubscriberOverflow`, `SubscriberPanicked`
//!
//! Worker events carry a [`WorkerHandle`] snapshot taken right after the
//! transition, so subscribers never need to query the registry.
//!
//! ## Ordering guarantees
//! Every event has a sequence number (`seq`), unique and increasing per
//! supervisor. Events of one worker are published in transition order;
//! there is no promise across workers beyond `seq`.
//!
//! ## Example
//! ```rust
//! use clustervisor::{Event, EventKind};
//!
//! let ev = Event::new(7, EventKind::ShutdownRequested);
//! assert_eq!(ev.seq, 7);
//! assert_eq!(ev.label(), "shutdown_requested");
//! assert!(ev.worker().is_none());
//! ```

use std::sync::Arc;
use std::time::SystemTime;

use crate::channel::{Message, SendHandle};
use crate::workers::{Endpoint, Signal, WorkerHandle, WorkerId};

/// What happened.
#[derive(Debug, Clone)]
pub enum EventKind {
    // === Worker lifecycle ===
    /// Worker entry created (state `Spawning`).
    Fork { worker: WorkerHandle },

    /// Worker reported readiness.
    Online { worker: WorkerHandle },

    /// Worker listens on `address` (port `0` resolved).
    Listening {
        worker: WorkerHandle,
        address: Endpoint,
    },

    /// Worker's control channel closed.
    Disconnect { worker: WorkerHandle },

    /// Worker terminated. Exactly one of `exit_code` / `signal` is set,
    /// unless the exit status could not be observed.
    Exit {
        worker: WorkerHandle,
        exit_code: Option<i32>,
        signal: Option<Signal>,
    },

    /// Application message sent by a worker.
    Message {
        worker: WorkerHandle,
        message: Message,
        handle: Option<SendHandle>,
    },

    // === Runtime ===
    /// A connection was closed without reaching any worker.
    ConnectionDropped {
        endpoint: Endpoint,
        reason: Arc<str>,
    },

    /// Shutdown started (signal or explicit call).
    ShutdownRequested,

    /// Every worker stopped within the grace period.
    AllStoppedWithin,

    /// Grace period exceeded; `stuck` workers were killed.
    GraceExceeded { stuck: Vec<WorkerId> },

    // === Subscriber health ===
    /// A subscriber dropped an event (queue full or worker closed).
    SubscriberOverflow {
        subscriber: &'static str,
        reason: &'static str,
    },

    /// A subscriber panicked while handling an event.
    SubscriberPanicked {
        subscriber: &'static str,
        info: Arc<str>,
    },
}

/// Runtime event with ordering metadata.
#[derive(Debug, Clone)]
pub struct Event {
    /// Sequence number, unique per supervisor.
    pub seq: u64,
    /// Wall-clock time of publication.
    pub at: SystemTime,
    /// Payload.
    pub kind: EventKind,
}

impl Event {
    /// Creates an event stamped with the current time.
    pub fn new(seq: u64, kind: EventKind) -> Self {
        Self {
            seq,
            at: SystemTime::now(),
            kind,
        }
    }

    /// Worker snapshot, for worker lifecycle events.
    pub fn worker(&self) -> Option<&WorkerHandle> {
        match &self.kind {
            EventKind::Fork { worker }
            | EventKind::Online { worker }
            | EventKind::Listening { worker, .. }
            | EventKind::Disconnect { worker }
            | EventKind::Exit { worker, .. }
            | EventKind::Message { worker, .. } => Some(worker),
            _ => None,
        }
    }

    /// Short stable label (snake_case) for logs/metrics.
    pub fn label(&self) -> &'static str {
        match &self.kind {
            EventKind::Fork { .. } => "fork",
            EventKind::Online { .. } => "online",
            EventKind::Listening { .. } => "listening",
            EventKind::Disconnect { .. } => "disconnect",
            EventKind::Exit { .. } => "exit",
            EventKind::Message { .. } => "message",
            EventKind::ConnectionDropped { .. } => "connection_dropped",
            EventKind::ShutdownRequested => "shutdown_requested",
            EventKind::AllStoppedWithin => "all_stopped_within_grace",
            EventKind::GraceExceeded { .. } => "grace_exceeded",
            EventKind::SubscriberOverflow { .. } => "subscriber_overflow",
            EventKind::SubscriberPanicked { .. } => "subscriber_panicked",
        }
    }

    /// True for events about subscriber health.
    pub fn is_subscriber_health(&self) -> bool {
        matches!(
            self.kind,
            EventKind::SubscriberOverflow { .. } | EventKind::SubscriberPanicked { .. }
        )
    }
}
