//! # Logging subscriber.
//!
//! [`LogWriter`] renders every event as a `tracing` record under the
//! `clustervisor::events` target. Install a `tracing` subscriber (for example
//! `tracing-subscriber`) to see the output.
//!
//! ## Output (fmt layer)
//! ```text
//! INFO clustervisor::events: fork worker=worker#1
//! INFO clustervisor::events: listening worker=worker#1 address=127.0.0.1:8080
//! WARN clustervisor::events: exit worker=worker#2 code=Some(1) signal=None crashed=true
//! ```

use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::events::{Event, EventKind};
use crate::subscribers::Subscribe;

const TARGET: &str = "clustervisor::events";

/// Writes every event to `tracing`.
#[derive(Clone, Copy, Debug, Default)]
pub struct LogWriter;

impl LogWriter {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Subscribe for LogWriter {
    async fn on_event(&self, e: &Event) {
        match &e.kind {
            EventKind::Fork { worker } => info!(target: TARGET, seq = e.seq, worker = %worker.id, "fork"),
            EventKind::Online { worker } => info!(target: TARGET, seq = e.seq, worker = %worker.id, "online"),
            EventKind::Listening { worker, address } => {
                info!(target: TARGET, seq = e.seq, worker = %worker.id, %address, "listening")
            }
            EventKind::Disconnect { worker } => info!(
                target: TARGET,
                seq = e.seq,
                worker = %worker.id,
                requested = worker.exited_after_disconnect,
                "disconnect"
            ),
            EventKind::Exit {
                worker,
                exit_code,
                signal,
            } => {
                let signal = signal.map(|s| s.to_string());
                if worker.crashed() {
                    warn!(target: TARGET, seq = e.seq, worker = %worker.id, code = ?exit_code, ?signal, crashed = true, "exit")
                } else {
                    info!(target: TARGET, seq = e.seq, worker = %worker.id, code = ?exit_code, ?signal, "exit")
                }
            }
            EventKind::Message { worker, message, handle } => debug!(
                target: TARGET,
                seq = e.seq,
                worker = %worker.id,
                payload = %message.as_value(),
                with_handle = handle.is_some(),
                "message"
            ),
            EventKind::ConnectionDropped { endpoint, reason } => {
                warn!(target: TARGET, seq = e.seq, %endpoint, %reason, "connection dropped")
            }
            EventKind::ShutdownRequested => info!(target: TARGET, seq = e.seq, "shutdown requested"),
            EventKind::AllStoppedWithin => info!(target: TARGET, seq = e.seq, "all workers stopped within grace"),
            EventKind::GraceExceeded { stuck } => {
                warn!(target: TARGET, seq = e.seq, ?stuck, "grace exceeded")
            }
            EventKind::SubscriberOverflow { subscriber, reason } => {
                warn!(target: TARGET, seq = e.seq, subscriber, reason, "subscriber dropped an event")
            }
            EventKind::SubscriberPanicked { subscriber, info } => {
                warn!(target: TARGET, seq = e.seq, subscriber, %info, "subscriber panicked")
            }
        }
    }

    fn name(&self) -> &'static str {
        "log"
    }
}
