//! # Shared sockets for process workers.
//!
//! Under [`SchedulingPolicy::OsDefault`](crate::SchedulingPolicy::OsDefault)
//! every process worker accepts on the supervisor's own sockets instead of
//! binding the address again.
//!
//! ```text
//! supervisor: BoundListener ──dup──► pre_exec dup2 ──► child fd 3, 4, ...
//!             CLUSTER_LISTEN_FDS="3=127.0.0.1:7000;4=unix:/run/app.sock"
//! child:      ProcessChannel::connect ──► parse ──► BoundListener per fd
//! ```
//!
//! ## Rules
//! - Descriptors are numbered from 3 in bind order.
//! - Only the listed descriptors survive `exec`; the intermediate copies are
//!   close-on-exec.

use std::io;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use nix::fcntl::{fcntl, FcntlArg};
use tokio::process::Command;

use crate::distributor::connection::BoundListener;
use crate::error::ClusterError;
use crate::workers::Endpoint;

/// Environment variable listing the inherited listening sockets.
pub const LISTEN_FDS_ENV: &str = "CLUSTER_LISTEN_FDS";

const FIRST_FD: RawFd = 3;

static ADOPTED: AtomicBool = AtomicBool::new(false);

/// Descriptors prepared for one child.
///
/// Must outlive the `spawn` call it was applied to.
pub(crate) struct Inheritance {
    env: String,
    fds: Vec<OwnedFd>,
}

impl Inheritance {
    /// Duplicates every listener above the target range.
    pub(crate) fn prepare(listeners: &[(Endpoint, Arc<BoundListener>)]) -> io::Result<Self> {
        let base = FIRST_FD + listeners.len() as RawFd;
        let mut fds = Vec::with_capacity(listeners.len());
        let mut entries = Vec::with_capacity(listeners.len());
        for (slot, (endpoint, listener)) in listeners.iter().enumerate() {
            let raw = fcntl(listener.as_raw_fd(), FcntlArg::F_DUPFD_CLOEXEC(base))?;
            // SAFETY: `raw` was just returned by fcntl and is owned by nobody else.
            fds.push(unsafe { OwnedFd::from_raw_fd(raw) });
            entries.push(format!("{}={endpoint}", FIRST_FD + slot as RawFd));
        }
        Ok(Self {
            env: entries.join(";"),
            fds,
        })
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.fds.is_empty()
    }

    /// Makes the child see the sockets at their announced numbers.
    pub(crate) fn apply(&self, cmd: &mut Command) {
        if self.is_empty() {
            return;
        }
        cmd.env(LISTEN_FDS_ENV, &self.env);
        let sources: Vec<RawFd> = self.fds.iter().map(AsRawFd::as_raw_fd).collect();
        // SAFETY: the closure only calls dup2, which is async-signal-safe, and
        // does not allocate. Every source sits above the target range, so a
        // dup2 never clobbers a source that is still needed.
        unsafe {
            cmd.pre_exec(move || {
                for (slot, source) in sources.iter().enumerate() {
                    nix::unistd::dup2(*source, FIRST_FD + slot as RawFd)?;
                }
                Ok(())
            });
        }
    }
}

/// Parses the value of [`LISTEN_FDS_ENV`].
pub(crate) fn parse_listen_fds(raw: &str) -> Result<Vec<(RawFd, Endpoint)>, ClusterError> {
    raw.split(';')
        .filter(|entry| !entry.trim().is_empty())
        .map(|entry| {
            let bad = || ClusterError::Protocol(format!("bad {LISTEN_FDS_ENV} entry {entry:?}"));
            let (fd, endpoint) = entry.split_once('=').ok_or_else(bad)?;
            let fd = fd.trim().parse::<RawFd>().map_err(|_| bad())?;
            if fd < FIRST_FD {
                return Err(bad());
            }
            Ok((fd, endpoint.parse::<Endpoint>()?))
        })
        .collect()
}

/// Adopts the sockets announced in the environment.
///
/// Only the first call per process adopts anything.
pub(crate) fn adopt_from_env() -> Result<Vec<(Endpoint, Arc<BoundListener>)>, ClusterError> {
    let Ok(raw) = std::env::var(LISTEN_FDS_ENV) else {
        return Ok(Vec::new());
    };
    let entries = parse_listen_fds(&raw)?;
    if ADOPTED.swap(true, Ordering::AcqRel) {
        return Ok(Vec::new());
    }
    entries
        .into_iter()
        .map(|(fd, endpoint)| {
            // SAFETY: the supervisor placed a listening socket of this kind at `fd`
            // and ADOPTED guarantees a single owner.
            let listener = unsafe { BoundListener::from_inherited(fd, &endpoint)? };
            Ok((endpoint, Arc::new(listener)))
        })
        .collect()
}
