//! # Worker identity, lifecycle state and exit status.
//!
//! [`WorkerHandle`] is a snapshot of one worker as recorded by the supervisor's
//! registry. The registry owns the authoritative copy; everything else
//! (events, the distributor, callers) sees clones.
//!
//! ## State machine
//! ```text
//! Spawning ──► Online ──► Listening ──┐ (Listening → Listening: another endpoint)
//!    │           │            │       │
//!    └───────────┴────────────┴──► Disconnecting ──► Disconnected ──► Dead
//!                                                         ▲             ▲
//!              any non-Dead state ────────────────────────┘             │
//!              any state ───────────────────────────────────────────────┘
//! ```

use std::fmt;

/// Unique worker id; assigned monotonically from 1 and never reused.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct WorkerId(u64);

impl WorkerId {
    /// Wraps a raw id.
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// Returns the raw id.
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for WorkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "worker#{}", self.0)
    }
}

impl From<u64> for WorkerId {
    fn from(raw: u64) -> Self {
        Self(raw)
    }
}

/// Lifecycle state of a worker.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum WorkerState {
    /// Execution unit created, not yet running.
    Spawning,
    /// Worker reported readiness.
    Online,
    /// Worker accepts connections on at least one endpoint.
    Listening,
    /// Graceful disconnect requested, not yet acknowledged.
    Disconnecting,
    /// Control channel closed.
    Disconnected,
    /// Execution unit terminated.
    Dead,
}

impl WorkerState {
    /// Stable lowercase name.
    pub fn as_str(self) -> &'static str {
        match self {
            WorkerState::Spawning => "spawning",
            WorkerState::Online => "online",
            WorkerState::Listening => "listening",
            WorkerState::Disconnecting => "disconnecting",
            WorkerState::Disconnected => "disconnected",
            WorkerState::Dead => "dead",
        }
    }

    /// Only `Listening` workers receive routed connections.
    #[inline]
    pub fn is_routable(self) -> bool {
        matches!(self, WorkerState::Listening)
    }

    /// `Disconnected` or `Dead`: a pending disconnect has resolved.
    #[inline]
    pub fn is_settled(self) -> bool {
        matches!(self, WorkerState::Disconnected | WorkerState::Dead)
    }

    /// True until a disconnect was requested or the channel closed.
    #[inline]
    pub fn is_live(self) -> bool {
        matches!(
            self,
            WorkerState::Spawning | WorkerState::Online | WorkerState::Listening
        )
    }

    /// Whether `self → next` is a legal transition.
    pub fn can_transition_to(self, next: WorkerState) -> bool {
        use WorkerState::*;
        match (self, next) {
            (Dead, _) => false,
            (_, Dead) => true,
            (Disconnected, _) => false,
            (_, Disconnected) => true,
            (Disconnecting, _) => false,
            (_, Disconnecting) => true,
            (Spawning, Online) => true,
            (Online, Listening) | (Listening, Listening) => true,
            _ => false,
        }
    }
}

impl fmt::Display for WorkerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Termination signal.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Signal {
    Hup,
    Int,
    Quit,
    Kill,
    Term,
    Usr1,
    Usr2,
    /// A signal without a named variant (raw platform number).
    Other(i32),
}

impl Signal {
    /// Conventional name, e.g. `SIGTERM`.
    pub fn name(self) -> Option<&'static str> {
        Some(match self {
            Signal::Hup => "SIGHUP",
            Signal::Int => "SIGINT",
            Signal::Quit => "SIGQUIT",
            Signal::Kill => "SIGKILL",
            Signal::Term => "SIGTERM",
            Signal::Usr1 => "SIGUSR1",
            Signal::Usr2 => "SIGUSR2",
            Signal::Other(_) => return None,
        })
    }

    #[cfg(unix)]
    pub(crate) fn to_nix(self) -> Option<nix::sys::signal::Signal> {
        use nix::sys::signal::Signal as Nix;
        match self {
            Signal::Hup => Some(Nix::SIGHUP),
            Signal::Int => Some(Nix::SIGINT),
            Signal::Quit => Some(Nix::SIGQUIT),
            Signal::Kill => Some(Nix::SIGKILL),
            Signal::Term => Some(Nix::SIGTERM),
            Signal::Usr1 => Some(Nix::SIGUSR1),
            Signal::Usr2 => Some(Nix::SIGUSR2),
            Signal::Other(raw) => Nix::try_from(raw).ok(),
        }
    }

    /// Decodes a raw platform signal number.
    #[cfg(unix)]
    pub(crate) fn from_raw(raw: i32) -> Self {
        use nix::sys::signal::Signal as Nix;
        match Nix::try_from(raw) {
            Ok(Nix::SIGHUP) => Signal::Hup,
            Ok(Nix::SIGINT) => Signal::Int,
            Ok(Nix::SIGQUIT) => Signal::Quit,
            Ok(Nix::SIGKILL) => Signal::Kill,
            Ok(Nix::SIGTERM) => Signal::Term,
            Ok(Nix::SIGUSR1) => Signal::Usr1,
            Ok(Nix::SIGUSR2) => Signal::Usr2,
            _ => Signal::Other(raw),
        }
    }
}

impl fmt::Display for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.name(), self) {
            (Some(name), _) => f.write_str(name),
            (None, Signal::Other(raw)) => write!(f, "SIG{raw}"),
            (None, _) => f.write_str("SIG?"),
        }
    }
}

/// Snapshot of one worker.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WorkerHandle {
    /// Stable worker id.
    pub id: WorkerId,
    /// Current lifecycle state.
    pub state: WorkerState,
    /// Set when a disconnect was requested before the unit terminated.
    /// Records intent: it stays `true` even if the worker was later killed.
    pub exited_after_disconnect: bool,
    /// Exit code; only when `state == Dead` and the unit exited normally.
    pub exit_code: Option<i32>,
    /// Terminating signal; only when `state == Dead` and the unit was signalled.
    pub signal: Option<Signal>,
}

impl WorkerHandle {
    pub(crate) fn new(id: WorkerId) -> Self {
        Self {
            id,
            state: WorkerState::Spawning,
            exited_after_disconnect: false,
            exit_code: None,
            signal: None,
        }
    }

    /// True once the execution unit terminated.
    #[inline]
    pub fn is_dead(&self) -> bool {
        self.state == WorkerState::Dead
    }

    /// Dead without a prior disconnect request.
    pub fn crashed(&self) -> bool {
        self.is_dead() && !self.exited_after_disconnect
    }

    /// Applies `next` if legal. Returns whether the state changed.
    pub(crate) fn transition(&mut self, next: WorkerState) -> bool {
        if !self.state.can_transition_to(next) {
            return false;
        }
        self.state = next;
        true
    }

    /// Moves to `Dead` and records how the unit ended.
    ///
    /// An exit code and a signal are mutually exclusive; the signal wins.
    pub(crate) fn record_exit(&mut self, code: Option<i32>, signal: Option<Signal>) -> bool {
        if !self.transition(WorkerState::Dead) {
            return false;
        }
        self.signal = signal;
        self.exit_code = if signal.is_some() { None } else { code };
        true
    }
}
