//! # Supervisor → worker control channel.
//!
//! One [`ControlChannel`] per worker, owned by the registry entry. It carries
//! application messages and the disconnect request in a single FIFO queue, so a
//! worker observes them in exactly the order the supervisor issued them.
//!
//! ## Rules
//! - `send` stamps a per-channel sequence number (the acknowledgement).
//! - The channel closes when the worker becomes `Disconnected` or `Dead`;
//!   later sends fail with [`ClusterError::ChannelClosed`], never dropped silently.
//! - Requesting a disconnect cancels the worker's disconnect token immediately
//!   (so listeners stop even if the worker never reads its inbox) and enqueues a
//!   `Disconnect` frame behind every message already sent.
//! - `Disconnect` is always the last frame: once it is queued (or the worker
//!   disconnected on its own) sends are refused.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::channel::message::{Delivery, Message, SendHandle};
use crate::error::ClusterError;
use crate::workers::WorkerId;

/// Frames queued for a worker.
#[derive(Debug)]
pub(crate) enum ControlFrame {
    Deliver(Delivery),
    Disconnect,
}

/// Worker-side ends of a control channel.
pub(crate) struct ControlEnds {
    pub(crate) frames: mpsc::UnboundedReceiver<ControlFrame>,
    pub(crate) disconnect: CancellationToken,
    pub(crate) open: Arc<AtomicBool>,
}

/// Supervisor-side end of a worker's control channel.
pub(crate) struct ControlChannel {
    worker: WorkerId,
    tx: mpsc::UnboundedSender<ControlFrame>,
    next_seq: u64,
    open: Arc<AtomicBool>,
    disconnect: CancellationToken,
    accepts_handles: bool,
}

impl ControlChannel {
    /// Creates a channel and the ends handed to the execution unit.
    pub(crate) fn new(worker: WorkerId, accepts_handles: bool) -> (Self, ControlEnds) {
        let (tx, frames) = mpsc::unbounded_channel();
        let open = Arc::new(AtomicBool::new(true));
        let disconnect = CancellationToken::new();
        let channel = Self {
            worker,
            tx,
            next_seq: 0,
            open: Arc::clone(&open),
            disconnect: disconnect.clone(),
            accepts_handles,
        };
        (
            channel,
            ControlEnds {
                frames,
                disconnect,
                open,
            },
        )
    }

    /// Queues a message. Returns its sequence number.
    pub(crate) fn send(
        &mut self,
        message: Message,
        handle: Option<SendHandle>,
    ) -> Result<u64, ClusterError> {
        if !self.is_open() || self.disconnect.is_cancelled() {
            return Err(self.closed());
        }
        if handle.is_some() && !self.accepts_handles {
            return Err(ClusterError::HandleNotTransferable {
                worker: self.worker,
            });
        }
        let seq = self.next_seq + 1;
        self.tx
            .send(ControlFrame::Deliver(Delivery {
                seq,
                message,
                handle,
            }))
            .map_err(|_| self.closed())?;
        self.next_seq = seq;
        Ok(seq)
    }

    /// Signals the worker to disconnect. Idempotent.
    pub(crate) fn request_disconnect(&self) {
        if self.disconnect.is_cancelled() {
            return;
        }
        self.disconnect.cancel();
        let _ = self.tx.send(ControlFrame::Disconnect);
    }

    /// Rejects every later send.
    pub(crate) fn close(&self) {
        self.open.store(false, Ordering::Release);
    }

    #[inline]
    pub(crate) fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }

    /// Token cancelled once a disconnect was requested.
    pub(crate) fn disconnect_token(&self) -> CancellationToken {
        self.disconnect.clone()
    }

    fn closed(&self) -> ClusterError {
        ClusterError::ChannelClosed {
            worker: self.worker,
        }
    }
}
