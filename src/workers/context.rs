//! # Worker-side context.
//!
//! Every in-process worker receives one [`WorkerContext`]. It is the worker's
//! only way to talk to its supervisor:
//!
//! ```text
//! ctx.listen(ep) ──► Listen ──► dispatcher ──► Listener (routed or shared)
//! ctx.send(msg)  ──► Message ─► dispatcher ──► Message event
//! ctx.recv()     ◄── ControlChannel FIFO (messages, then disconnect)
//! ```

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

use crate::channel::{ControlEnds, ControlFrame, Delivery, Message, SendHandle, WorkerLink, WorkerSignal};
use crate::distributor::Listener;
use crate::error::ClusterError;
use crate::workers::{Endpoint, WorkerId};

/// Handle given to an in-process worker body.
pub struct WorkerContext {
    id: WorkerId,
    args: Arc<[String]>,
    env: Arc<BTreeMap<String, String>>,
    link: WorkerLink,
    frames: mpsc::UnboundedReceiver<ControlFrame>,
    disconnect: CancellationToken,
    open: Arc<AtomicBool>,
    drained: bool,
}

impl WorkerContext {
    pub(crate) fn new(
        args: Arc<[String]>,
        env: Arc<BTreeMap<String, String>>,
        link: WorkerLink,
        ends: ControlEnds,
    ) -> Self {
        Self {
            id: link.worker(),
            args,
            env,
            link,
            frames: ends.frames,
            disconnect: ends.disconnect,
            open: ends.open,
            drained: false,
        }
    }

    /// This worker's id.
    pub fn id(&self) -> WorkerId {
        self.id
    }

    /// Arguments from the spawn configuration.
    pub fn args(&self) -> &[String] {
        &self.args
    }

    /// Environment variable as seen by this worker: spawn overrides first,
    /// then the process environment.
    pub fn env(&self, key: &str) -> Option<String> {
        if key == crate::workers::WORKER_ID_ENV {
            return Some(self.id.get().to_string());
        }
        self.env
            .get(key)
            .cloned()
            .or_else(|| std::env::var(key).ok())
    }

    /// Environment overrides from the spawn configuration.
    pub fn env_overrides(&self) -> &BTreeMap<String, String> {
        &self.env
    }

    /// Opens a listener on the shared endpoint.
    ///
    /// The first listener on an endpoint binds it. Named pipes are refused here.
    pub async fn listen(&self, endpoint: &Endpoint) -> Result<Listener, ClusterError> {
        endpoint.ensure_worker_bindable(cfg!(windows))?;
        let (reply, answer) = oneshot::channel();
        self.link.signal(WorkerSignal::Listen {
            endpoint: endpoint.clone(),
            reply,
        })?;
        answer
            .await
            .map_err(|_| ClusterError::ChannelClosed { worker: self.id })?
    }

    /// Sends a message to the supervisor.
    pub fn send(&self, message: impl Into<Message>) -> Result<(), ClusterError> {
        self.send_inner(message.into(), None)
    }

    /// Sends a message together with a shared resource.
    pub fn send_with_handle(
        &self,
        message: impl Into<Message>,
        handle: SendHandle,
    ) -> Result<(), ClusterError> {
        self.send_inner(message.into(), Some(handle))
    }

    fn send_inner(&self, message: Message, handle: Option<SendHandle>) -> Result<(), ClusterError> {
        if !self.open.load(Ordering::Acquire) {
            return Err(ClusterError::ChannelClosed { worker: self.id });
        }
        self.link.signal(WorkerSignal::Message { message, handle })
    }

    /// Next message from the supervisor.
    ///
    /// Returns `None` once a disconnect was requested (after every message sent
    /// before it) or the channel closed.
    pub async fn recv(&mut self) -> Option<Delivery> {
        if self.drained {
            return None;
        }
        match self.frames.recv().await {
            Some(ControlFrame::Deliver(delivery)) => Some(delivery),
            Some(ControlFrame::Disconnect) | None => {
                self.drained = true;
                None
            }
        }
    }

    /// True once the supervisor asked this worker to disconnect.
    pub fn is_disconnect_requested(&self) -> bool {
        self.disconnect.is_cancelled()
    }

    /// Completes when the supervisor asks this worker to disconnect.
    pub async fn disconnect_requested(&self) {
        self.disconnect.cancelled().await
    }

    /// Token cancelled on disconnect; hand it to sub-tasks.
    pub fn cancellation(&self) -> CancellationToken {
        self.disconnect.child_token()
    }

    /// Closes the channel from the worker side.
    ///
    /// The supervisor records the worker as disconnected on purpose. Idempotent.
    pub fn disconnect(&self) -> Result<(), ClusterError> {
        if !self.open.swap(false, Ordering::AcqRel) {
            return Ok(());
        }
        self.disconnect.cancel();
        self.link.signal(WorkerSignal::Disconnected { requested: true })
    }
}

impl std::fmt::Debug for WorkerContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerContext")
            .field("id", &self.id)
            .field("args", &self.args)
            .field("disconnect_requested", &self.is_disconnect_requested())
            .finish()
    }
}
