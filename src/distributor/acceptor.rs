//! Accept loop for round-robin endpoints.
//!
//! One task per shared endpoint. It owns nothing but the socket: every accepted
//! connection is handed to a [`ConnectionSink`], which routes, queues or drops it.
//! The task exits when its token is cancelled or the sink is gone.

use std::sync::{Arc, Weak};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::distributor::connection::{BoundListener, Connection};
use crate::workers::Endpoint;

/// Pause after a failed `accept` (e.g. out of file descriptors).
const ACCEPT_RETRY: Duration = Duration::from_millis(50);

/// Receiver of accepted connections.
pub(crate) trait ConnectionSink: Send + Sync + 'static {
    fn dispatch(&self, endpoint: &Endpoint, conn: Connection);
}

pub(crate) fn spawn_acceptor<S: ConnectionSink>(
    sink: Weak<S>,
    endpoint: Endpoint,
    listener: Arc<BoundListener>,
    token: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        debug!(%endpoint, "acceptor started");
        loop {
            let accepted = tokio::select! {
                _ = token.cancelled() => break,
                accepted = listener.accept() => accepted,
            };
            match accepted {
                Ok(conn) => {
                    let Some(sink) = sink.upgrade() else { break };
                    sink.dispatch(&endpoint, conn);
                }
                Err(e) => {
                    warn!(%endpoint, error = %e, "accept failed");
                    tokio::time::sleep(ACCEPT_RETRY).await;
                }
            }
        }
        debug!(%endpoint, "acceptor stopped");
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use tokio::net::TcpStream;

    #[derive(Default)]
    struct Collect(Mutex<Vec<Endpoint>>);

    impl ConnectionSink for Collect {
        fn dispatch(&self, endpoint: &Endpoint, _conn: Connection) {
            self.0.lock().unwrap().push(endpoint.clone());
        }
    }

    #[tokio::test]
    async fn hands_every_connection_to_the_sink() {
        let ep: Endpoint = "127.0.0.1:0".parse().unwrap();
        let bound = Arc::new(BoundListener::bind(&ep).unwrap());
        let addr = bound.local_endpoint(&ep).tcp_addr().unwrap();
        let sink = Arc::new(Collect::default());
        let token = CancellationToken::new();
        let task = spawn_acceptor(Arc::downgrade(&sink), ep.clone(), bound, token.clone());

        for _ in 0..3 {
            let _ = TcpStream::connect(addr).await.unwrap();
        }
        for _ in 0..100 {
            if sink.0.lock().unwrap().len() == 3 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(sink.0.lock().unwrap().len(), 3);

        token.cancel();
        task.await.unwrap();
    }
}
