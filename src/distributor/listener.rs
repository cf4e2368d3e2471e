//! Worker-side view of a shared endpoint.
//!
//! ```text
//! RoundRobin:  acceptor ──route──► inlet (mpsc) ──► Listener::accept
//! OsDefault:   Listener::accept ──► BoundListener::accept (clone of the shared socket)
//! ```
//!
//! Once the owning worker is asked to disconnect, a routed listener stops taking
//! new connections but still yields the ones already handed to it; a shared
//! listener stops immediately.

use std::io;
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::distributor::connection::{BoundListener, Connection};
use crate::workers::Endpoint;

enum Source {
    Routed(mpsc::UnboundedReceiver<Connection>),
    Shared(Arc<BoundListener>),
}

/// Listener returned by [`WorkerContext::listen`](crate::WorkerContext::listen).
pub struct Listener {
    endpoint: Endpoint,
    source: Source,
    disconnect: CancellationToken,
    closing: bool,
}

impl Listener {
    pub(crate) fn routed(
        endpoint: Endpoint,
        inlet: mpsc::UnboundedReceiver<Connection>,
        disconnect: CancellationToken,
    ) -> Self {
        Self {
            endpoint,
            source: Source::Routed(inlet),
            disconnect,
            closing: false,
        }
    }

    pub(crate) fn shared(
        endpoint: Endpoint,
        listener: Arc<BoundListener>,
        disconnect: CancellationToken,
    ) -> Self {
        Self {
            endpoint,
            source: Source::Shared(listener),
            disconnect,
            closing: false,
        }
    }

    /// Endpoint actually bound (port `0` resolved).
    pub fn local_endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// Next connection, or `Ok(None)` once the listener is done.
    pub async fn accept(&mut self) -> io::Result<Option<Connection>> {
        match &mut self.source {
            Source::Routed(inlet) => {
                if !self.closing {
                    tokio::select! {
                        conn = inlet.recv() => return Ok(conn),
                        _ = self.disconnect.cancelled() => {
                            inlet.close();
                            self.closing = true;
                        }
                    }
                }
                Ok(inlet.recv().await)
            }
            Source::Shared(listener) => {
                tokio::select! {
                    biased;
                    _ = self.disconnect.cancelled() => Ok(None),
                    conn = listener.accept() => conn.map(Some),
                }
            }
        }
    }
}

impl std::fmt::Debug for Listener {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mode = match self.source {
            Source::Routed(_) => "routed",
            Source::Shared(_) => "shared",
        };
        f.debug_struct("Listener")
            .field("endpoint", &self.endpoint)
            .field("mode", &mode)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpStream;

    async fn tcp_pair(listener: &BoundListener, addr: std::net::SocketAddr) -> Connection {
        let client = tokio::spawn(async move { TcpStream::connect(addr).await.unwrap() });
        let conn = listener.accept().await.unwrap();
        client.await.unwrap();
        conn
    }

    #[tokio::test]
    async fn routed_listener_drains_after_disconnect() {
        let ep: Endpoint = "127.0.0.1:0".parse().unwrap();
        let bound = BoundListener::bind(&ep).unwrap();
        let addr = bound.local_endpoint(&ep).tcp_addr().unwrap();

        let (tx, rx) = mpsc::unbounded_channel();
        let token = CancellationToken::new();
        let mut listener = Listener::routed(ep, rx, token.clone());

        tx.send(tcp_pair(&bound, addr).await).unwrap();
        token.cancel();

        assert!(listener.accept().await.unwrap().is_some());
        assert!(tx.send(tcp_pair(&bound, addr).await).is_err());
        assert!(listener.accept().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn shared_listener_stops_on_disconnect() {
        let ep: Endpoint = "127.0.0.1:0".parse().unwrap();
        let bound = Arc::new(BoundListener::bind(&ep).unwrap());
        let token = CancellationToken::new();
        let mut listener = Listener::shared(bound.local_endpoint(&ep), bound, token.clone());
        token.cancel();
        assert!(listener.accept().await.unwrap().is_none());
    }
}
