//! # Listening endpoints.
//!
//! An [`Endpoint`] names an address workers share. Text form:
//! - `127.0.0.1:8080`, `[::1]:0`: TCP
//! - `unix:/run/app.sock`: Unix domain socket
//! - `pipe:app` or `\\.\pipe\app`: Windows named pipe

use std::fmt;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;

use crate::error::ClusterError;

const WINDOWS_PIPE_PREFIX: &str = r"\\.\pipe\";

/// Address a server listens on.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Endpoint {
    /// TCP socket address. Port `0` picks a free port when bound.
    Tcp(SocketAddr),
    /// Unix domain socket path.
    Unix(PathBuf),
    /// Windows named pipe.
    Pipe(String),
}

impl Endpoint {
    /// TCP socket address, if this is a TCP endpoint.
    pub fn tcp_addr(&self) -> Option<SocketAddr> {
        match self {
            Endpoint::Tcp(addr) => Some(*addr),
            _ => None,
        }
    }

    /// Rejects endpoints a worker may not listen on.
    ///
    /// Checked when a worker binds, never when it is spawned.
    pub(crate) fn ensure_worker_bindable(&self, on_windows: bool) -> Result<(), ClusterError> {
        match self {
            Endpoint::Tcp(_) => Ok(()),
            Endpoint::Pipe(name) if on_windows => Err(ClusterError::PipeNotPermitted(name.clone())),
            Endpoint::Unix(_) if !on_windows => Ok(()),
            other => Err(ClusterError::UnsupportedEndpoint(other.clone())),
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Endpoint::Tcp(addr) => write!(f, "{addr}"),
            Endpoint::Unix(path) => write!(f, "unix:{}", path.display()),
            Endpoint::Pipe(name) => write!(f, "pipe:{name}"),
        }
    }
}

impl FromStr for Endpoint {
    type Err = ClusterError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if let Some(path) = s.strip_prefix("unix:") {
            if path.is_empty() {
                return Err(ClusterError::InvalidEndpoint(s.to_string()));
            }
            return Ok(Endpoint::Unix(PathBuf::from(path)));
        }
        if let Some(name) = s
            .strip_prefix("pipe:")
            .or_else(|| s.strip_prefix(WINDOWS_PIPE_PREFIX))
        {
            if name.is_empty() {
                return Err(ClusterError::InvalidEndpoint(s.to_string()));
            }
            return Ok(Endpoint::Pipe(name.to_string()));
        }
        s.parse::<SocketAddr>()
            .map(Endpoint::Tcp)
            .map_err(|_| ClusterError::InvalidEndpoint(s.to_string()))
    }
}

impl From<SocketAddr> for Endpoint {
    fn from(addr: SocketAddr) -> Self {
        Endpoint::Tcp(addr)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_every_kind() {
        assert_eq!(
            "127.0.0.1:8080".parse::<Endpoint>().unwrap(),
            Endpoint::Tcp("127.0.0.1:8080".parse().unwrap())
        );
        assert_eq!(
            "unix:/tmp/app.sock".parse::<Endpoint>().unwrap(),
            Endpoint::Unix(PathBuf::from("/tmp/app.sock"))
        );
        assert_eq!(
            r"\\.\pipe\app".parse::<Endpoint>().unwrap(),
            Endpoint::Pipe("app".into())
        );
        assert_eq!("pipe:app".parse::<Endpoint>().unwrap(), Endpoint::Pipe("app".into()));
        assert!("localhost".parse::<Endpoint>().is_err());
        assert!("unix:".parse::<Endpoint>().is_err());
    }

    #[test]
    fn display_parses_back() {
        for text in ["[::1]:0", "unix:/run/x.sock", "pipe:svc"] {
            let ep: Endpoint = text.parse().unwrap();
            assert_eq!(ep.to_string().parse::<Endpoint>().unwrap(), ep);
        }
    }

    #[test]
    fn pipes_rejected_at_bind_on_windows() {
        let pipe = Endpoint::Pipe("svc".into());
        assert!(matches!(
            pipe.ensure_worker_bindable(true),
            Err(ClusterError::PipeNotPermitted(name)) if name == "svc"
        ));
        assert!(matches!(
            pipe.ensure_worker_bindable(false),
            Err(ClusterError::UnsupportedEndpoint(_))
        ));
    }

    #[test]
    fn tcp_always_bindable_unix_only_off_windows() {
        let tcp = Endpoint::Tcp("0.0.0.0:0".parse().unwrap());
        assert!(tcp.ensure_worker_bindable(true).is_ok());
        assert!(tcp.ensure_worker_bindable(false).is_ok());
        let unix = Endpoint::Unix("/tmp/s".into());
        assert!(unix.ensure_worker_bindable(false).is_ok());
        assert!(unix.ensure_worker_bindable(true).is_err());
    }
}
