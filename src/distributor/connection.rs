//! Accepted connections and the shared listening socket.

use std::io;
use std::net::SocketAddr;
use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::{TcpListener, TcpStream};
#[cfg(unix)]
use tokio::net::{UnixListener, UnixStream};

use crate::error::ClusterError;
use crate::workers::Endpoint;

/// A connection accepted on a shared endpoint.
#[derive(Debug)]
pub enum Connection {
    Tcp { stream: TcpStream, peer: SocketAddr },
    #[cfg(unix)]
    Unix { stream: UnixStream },
}

impl Connection {
    /// Remote address of TCP connections.
    pub fn peer_addr(&self) -> Option<SocketAddr> {
        match self {
            Connection::Tcp { peer, .. } => Some(*peer),
            #[cfg(unix)]
            Connection::Unix { .. } => None,
        }
    }

    /// Unwraps a TCP stream.
    pub fn into_tcp(self) -> Option<TcpStream> {
        match self {
            Connection::Tcp { stream, .. } => Some(stream),
            #[cfg(unix)]
            Connection::Unix { .. } => None,
        }
    }
}

impl AsyncRead for Connection {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Connection::Tcp { stream, .. } => Pin::new(stream).poll_read(cx, buf),
            #[cfg(unix)]
            Connection::Unix { stream } => Pin::new(stream).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for Connection {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match self.get_mut() {
            Connection::Tcp { stream, .. } => Pin::new(stream).poll_write(cx, buf),
            #[cfg(unix)]
            Connection::Unix { stream } => Pin::new(stream).poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Connection::Tcp { stream, .. } => Pin::new(stream).poll_flush(cx),
            #[cfg(unix)]
            Connection::Unix { stream } => Pin::new(stream).poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Connection::Tcp { stream, .. } => Pin::new(stream).poll_shutdown(cx),
            #[cfg(unix)]
            Connection::Unix { stream } => Pin::new(stream).poll_shutdown(cx),
        }
    }
}

/// The one socket shared by every worker listening on an endpoint.
#[derive(Debug)]
pub(crate) enum BoundListener {
    Tcp(TcpListener),
    #[cfg(unix)]
    Unix(UnixListener),
}

impl BoundListener {
    /// Binds synchronously; must run inside a tokio runtime.
    pub(crate) fn bind(endpoint: &Endpoint) -> Result<Self, ClusterError> {
        let bind_err = |source: io::Error| ClusterError::Bind {
            endpoint: endpoint.clone(),
            source,
        };
        match endpoint {
            Endpoint::Tcp(addr) => {
                let std = std::net::TcpListener::bind(addr).map_err(bind_err)?;
                std.set_nonblocking(true).map_err(bind_err)?;
                TcpListener::from_std(std)
                    .map(BoundListener::Tcp)
                    .map_err(bind_err)
            }
            #[cfg(unix)]
            Endpoint::Unix(path) => {
                let std = std::os::unix::net::UnixListener::bind(path).map_err(bind_err)?;
                std.set_nonblocking(true).map_err(bind_err)?;
                UnixListener::from_std(std)
                    .map(BoundListener::Unix)
                    .map_err(bind_err)
            }
            other => Err(ClusterError::UnsupportedEndpoint(other.clone())),
        }
    }

    /// The endpoint actually bound (port `0` resolved).
    pub(crate) fn local_endpoint(&self, requested: &Endpoint) -> Endpoint {
        match self {
            BoundListener::Tcp(l) => l
                .local_addr()
                .map(Endpoint::Tcp)
                .unwrap_or_else(|_| requested.clone()),
            #[cfg(unix)]
            BoundListener::Unix(_) => requested.clone(),
        }
    }

    /// Rebuilds a listener from a descriptor inherited from the supervisor.
    ///
    /// # Safety
    /// `fd` must be an open listening socket of the kind `endpoint` names and
    /// owned by nobody else.
    #[cfg(unix)]
    pub(crate) unsafe fn from_inherited(
        fd: std::os::fd::RawFd,
        endpoint: &Endpoint,
    ) -> Result<Self, ClusterError> {
        use std::os::fd::FromRawFd;

        let adopt_err = |source: io::Error| ClusterError::Bind {
            endpoint: endpoint.clone(),
            source,
        };
        match endpoint {
            Endpoint::Tcp(_) => {
                let std = std::net::TcpListener::from_raw_fd(fd);
                std.set_nonblocking(true).map_err(adopt_err)?;
                TcpListener::from_std(std)
                    .map(BoundListener::Tcp)
                    .map_err(adopt_err)
            }
            Endpoint::Unix(_) => {
                let std = std::os::unix::net::UnixListener::from_raw_fd(fd);
                std.set_nonblocking(true).map_err(adopt_err)?;
                UnixListener::from_std(std)
                    .map(BoundListener::Unix)
                    .map_err(adopt_err)
            }
            other => Err(ClusterError::UnsupportedEndpoint(other.clone())),
        }
    }

    #[cfg(unix)]
    pub(crate) fn as_raw_fd(&self) -> std::os::fd::RawFd {
        use std::os::fd::AsRawFd;
        match self {
            BoundListener::Tcp(l) => l.as_raw_fd(),
            BoundListener::Unix(l) => l.as_raw_fd(),
        }
    }

    pub(crate) async fn accept(&self) -> io::Result<Connection> {
        match self {
            BoundListener::Tcp(l) => {
                let (stream, peer) = l.accept().await?;
                Ok(Connection::Tcp { stream, peer })
            }
            #[cfg(unix)]
            BoundListener::Unix(l) => {
                let (stream, _) = l.accept().await?;
                Ok(Connection::Unix { stream })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    #[tokio::test]
    async fn binds_port_zero_and_accepts() {
        let requested: Endpoint = "127.0.0.1:0".parse().unwrap();
        let listener = BoundListener::bind(&requested).unwrap();
        let bound = listener.local_endpoint(&requested);
        let addr = bound.tcp_addr().unwrap();
        assert_ne!(addr.port(), 0);

        let client = tokio::spawn(async move {
            let mut s = TcpStream::connect(addr).await.unwrap();
            s.write_all(b"ping").await.unwrap();
        });
        let mut conn = listener.accept().await.unwrap();
        assert!(conn.peer_addr().is_some());
        let mut buf = [0u8; 4];
        conn.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"ping");
        client.await.unwrap();
    }

    #[tokio::test]
    async fn bind_conflict_is_reported() {
        let requested: Endpoint = "127.0.0.1:0".parse().unwrap();
        let first = BoundListener::bind(&requested).unwrap();
        let taken = first.local_endpoint(&requested);
        let err = BoundListener::bind(&taken).unwrap_err();
        assert_eq!(err.as_label(), "cluster_bind_failed");
    }

    #[tokio::test]
    async fn pipes_cannot_be_bound() {
        let err = BoundListener::bind(&Endpoint::Pipe("svc".into())).unwrap_err();
        assert!(matches!(err, ClusterError::UnsupportedEndpoint(_)));
    }
}
