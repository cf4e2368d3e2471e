//! # Child side of a process worker.
//!
//! A program spawned through [`SpawnConfig::command`](crate::SpawnConfig::command)
//! talks to its supervisor over stdin/stdout with newline-delimited JSON.
//! [`ProcessChannel`] implements that side:
//!
//! ```text
//! supervisor ── stdin ──► reader task ──► recv()
//!                                    └──► disconnect token
//! supervisor ◄── stdout ── listen() / listening() / send() / disconnect()
//! supervisor ── fd 3.. ──► listen()   (sockets shared under OsDefault, unix)
//! ```
//!
//! ## Rules
//! - Stdout belongs to the protocol. Log to stderr.
//! - `connect` reports the worker online and adopts the inherited sockets.
//! - `listen` accepts on the supervisor's socket for that endpoint when one was
//!   inherited, and binds the endpoint itself otherwise.
//! - EOF on stdin counts as a disconnect request (the supervisor is gone).

use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Stdout};
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::channel::protocol::{ChildFrame, ParentFrame};
use crate::channel::{Delivery, Message};
use crate::distributor::{BoundListener, Listener};
use crate::error::ClusterError;
use crate::workers::{Endpoint, WorkerId, WORKER_ID_ENV};

/// Control channel of a process worker, seen from inside the child.
pub struct ProcessChannel {
    id: WorkerId,
    out: Arc<Mutex<Stdout>>,
    inbox: mpsc::UnboundedReceiver<Delivery>,
    disconnect: CancellationToken,
    inherited: Vec<(Endpoint, Arc<BoundListener>)>,
}

impl ProcessChannel {
    /// True when this process was started by a supervisor.
    pub fn is_worker() -> bool {
        std::env::var_os(WORKER_ID_ENV).is_some()
    }

    /// Attaches to the supervisor and reports the worker online.
    pub async fn connect() -> Result<Self, ClusterError> {
        let raw = std::env::var(WORKER_ID_ENV)
            .map_err(|_| ClusterError::Protocol(format!("{WORKER_ID_ENV} is not set")))?;
        let id = raw
            .trim()
            .parse::<u64>()
            .map(WorkerId::new)
            .map_err(|e| ClusterError::Protocol(format!("bad {WORKER_ID_ENV} {raw:?}: {e}")))?;

        #[cfg(unix)]
        let inherited = crate::distributor::adopt_from_env()?;
        #[cfg(not(unix))]
        let inherited = Vec::new();

        let (tx, inbox) = mpsc::unbounded_channel();
        let disconnect = CancellationToken::new();
        tokio::spawn(read_parent(tx, disconnect.clone()));

        let chan = Self {
            id,
            out: Arc::new(Mutex::new(tokio::io::stdout())),
            inbox,
            disconnect,
            inherited,
        };
        chan.write(&ChildFrame::Online).await?;
        Ok(chan)
    }

    pub fn id(&self) -> WorkerId {
        self.id
    }

    /// Endpoints whose sockets were handed down by the supervisor.
    pub fn inherited_endpoints(&self) -> impl Iterator<Item = &Endpoint> {
        self.inherited.iter().map(|(endpoint, _)| endpoint)
    }

    /// Starts accepting on `endpoint` and reports the worker `Listening`.
    ///
    /// Uses the supervisor's socket when it was inherited, so every worker on
    /// the endpoint shares one socket and the OS spreads the connections.
    /// The listener stops once a disconnect was requested.
    pub async fn listen(&self, endpoint: &Endpoint) -> Result<Listener, ClusterError> {
        endpoint.ensure_worker_bindable(cfg!(windows))?;
        let (bound, socket) = match self.inherited.iter().find(|(ep, _)| ep == endpoint) {
            Some((ep, socket)) => (ep.clone(), Arc::clone(socket)),
            None => {
                let socket = BoundListener::bind(endpoint)?;
                (socket.local_endpoint(endpoint), Arc::new(socket))
            }
        };
        self.listening(&bound).await?;
        Ok(Listener::shared(bound, socket, self.disconnect.clone()))
    }

    /// Tells the supervisor this worker accepts connections on `address`.
    ///
    /// For sockets the program manages on its own; [`listen`](Self::listen) calls it.
    pub async fn listening(&self, address: &Endpoint) -> Result<(), ClusterError> {
        self.write(&ChildFrame::Listening {
            address: address.to_string(),
        })
        .await
    }

    /// Sends a message to the supervisor.
    pub async fn send(&self, message: impl Into<Message>) -> Result<(), ClusterError> {
        let payload = message.into().as_value().clone();
        self.write(&ChildFrame::Message { payload }).await
    }

    /// Next message from the supervisor; `None` after a disconnect request.
    pub async fn recv(&mut self) -> Option<Delivery> {
        self.inbox.recv().await
    }

    pub fn is_disconnect_requested(&self) -> bool {
        self.disconnect.is_cancelled()
    }

    /// Completes when the supervisor asks this worker to disconnect.
    pub async fn disconnect_requested(&self) {
        self.disconnect.cancelled().await
    }

    /// Closes the channel from the child side.
    pub async fn disconnect(&self) -> Result<(), ClusterError> {
        self.disconnect.cancel();
        self.write(&ChildFrame::Disconnect).await
    }

    async fn write(&self, frame: &ChildFrame) -> Result<(), ClusterError> {
        let line = frame.to_line()?;
        let closed = |_| ClusterError::ChannelClosed { worker: self.id };
        let mut out = self.out.lock().await;
        out.write_all(line.as_bytes()).await.map_err(closed)?;
        out.flush().await.map_err(closed)
    }
}

async fn read_parent(tx: mpsc::UnboundedSender<Delivery>, disconnect: CancellationToken) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) if line.trim().is_empty() => continue,
            Ok(Some(line)) => match ParentFrame::from_line(&line) {
                Ok(ParentFrame::Message { seq, payload }) => {
                    let delivery = Delivery {
                        seq,
                        message: Message::new(payload),
                        handle: None,
                    };
                    if tx.send(delivery).is_err() {
                        break;
                    }
                }
                Ok(ParentFrame::Disconnect) => break,
                Err(e) => warn!(error = %e, "ignoring malformed frame from supervisor"),
            },
            Ok(None) => break,
            Err(e) => {
                warn!(error = %e, "supervisor channel read failed");
                break;
            }
        }
    }
    disconnect.cancel();
}
