//! Worker → supervisor direction.
//!
//! Every execution unit reports through a [`WorkerLink`] into the supervisor's
//! single inbox. The inbox is drained by one dispatcher task, which is the only
//! writer of lifecycle transitions; per-worker order is the order of `signal`
//! calls.

use tokio::sync::{mpsc, oneshot};

use crate::channel::message::{Message, SendHandle};
use crate::distributor::Listener;
use crate::error::ClusterError;
use crate::workers::{Endpoint, Signal, WorkerId};

/// What a worker reports.
pub(crate) enum WorkerSignal {
    /// Unit started running.
    Online,
    /// In-process unit asks for a listener on the shared endpoint.
    Listen {
        endpoint: Endpoint,
        reply: oneshot::Sender<Result<Listener, ClusterError>>,
    },
    /// Child process bound `address` on its own.
    Listening { address: Endpoint },
    /// Application message for the supervisor.
    Message {
        message: Message,
        handle: Option<SendHandle>,
    },
    /// Worker side of the channel is gone. `requested` when the worker closed it on purpose.
    Disconnected { requested: bool },
    /// Unit terminated.
    Exited {
        code: Option<i32>,
        signal: Option<Signal>,
    },
}

/// One entry of the supervisor inbox.
pub(crate) struct Inbound {
    pub(crate) worker: WorkerId,
    pub(crate) signal: WorkerSignal,
}

pub(crate) type InboxSender = mpsc::UnboundedSender<Inbound>;
pub(crate) type InboxReceiver = mpsc::UnboundedReceiver<Inbound>;

/// Sending half used by one worker.
#[derive(Clone)]
pub(crate) struct WorkerLink {
    worker: WorkerId,
    inbox: InboxSender,
}

impl WorkerLink {
    pub(crate) fn new(worker: WorkerId, inbox: InboxSender) -> Self {
        Self { worker, inbox }
    }

    pub(crate) fn worker(&self) -> WorkerId {
        self.worker
    }

    /// Fails only when the supervisor is gone.
    pub(crate) fn signal(&self, signal: WorkerSignal) -> Result<(), ClusterError> {
        self.inbox
            .send(Inbound {
                worker: self.worker,
                signal,
            })
            .map_err(|_| ClusterError::ChannelClosed {
                worker: self.worker,
            })
    }
}
