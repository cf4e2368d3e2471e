//! # Execution units.
//!
//! Starts the unit behind a worker in two steps: [`prepare`] does the blocking
//! part (fork and exec), [`start`] wires the unit to the supervisor inbox.
//!
//! ```text
//! Task:     tokio::spawn(body) ──► watcher ──► Disconnected, Exited
//! Process:  Child ─ stdin  ◄── pump   ◄── ControlChannel frames
//!                 ─ stdout ──► reader ──► Online / Listening / Message / Disconnected
//!                 ─ stderr ──► tracing (Capture mode)
//!                 └ wait   ──► waiter ──► Exited  (kill requests delivered here)
//! ```
//!
//! ## Rules
//! - A unit always ends with `Disconnected` followed by `Exited`.
//! - Body errors and panics exit with code `1`; an aborted task reports the
//!   signal it was killed with and no code.
//! - A process unit reports the OS exit status verbatim.
//! - Under OsDefault a process unit inherits the supervisor's listening sockets.

use std::path::Path;
use std::process::Stdio;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command};
use tokio::sync::mpsc;
use tokio::task::{AbortHandle, JoinHandle};
use tracing::{debug, info, warn};

use crate::channel::protocol::{ChildFrame, ParentFrame};
use crate::channel::{ControlEnds, ControlFrame, Message, WorkerLink, WorkerSignal};
use crate::distributor::BoundListener;
#[cfg(unix)]
use crate::distributor::Inheritance;
use crate::error::{panic_message, SpawnError, WorkerError};
use crate::workers::{
    Endpoint, Signal, SpawnConfig, StdioMode, WorkerContext, WorkerId, WorkerRef, WorkerTarget,
    WORKER_ID_ENV,
};

/// How long the waiter lets the stdout reader finish after the child exited.
const READER_DRAIN: Duration = Duration::from_secs(1);

/// Kill switch of a running unit.
pub(crate) enum Execution {
    Task {
        abort: AbortHandle,
        killed: Arc<OnceLock<Signal>>,
    },
    Process {
        kill: mpsc::UnboundedSender<Signal>,
    },
}

impl Execution {
    /// Forcefully terminates the unit. The first signal is the one reported.
    pub(crate) fn kill(&self, signal: Signal) {
        match self {
            Execution::Task { abort, killed } => {
                let _ = killed.set(signal);
                abort.abort();
            }
            Execution::Process { kill } => {
                let _ = kill.send(signal);
            }
        }
    }
}

/// A unit whose blocking setup already ran.
///
/// Dropping a prepared process kills it.
pub(crate) enum Prepared {
    Task(WorkerRef),
    Process(Box<Child>),
}

/// Runs the blocking part of a launch: fork and exec for process units.
///
/// Called without the core lock. Nothing reaches the inbox before [`start`].
/// `inherited` sockets are handed to process units (unix only).
pub(crate) fn prepare(
    config: &SpawnConfig,
    worker: WorkerId,
    inherited: &[(Endpoint, Arc<BoundListener>)],
) -> Result<Prepared, SpawnError> {
    match config.target() {
        WorkerTarget::Task(body) => Ok(Prepared::Task(Arc::clone(body))),
        WorkerTarget::Command { program } => {
            spawn_child(program, config, worker, inherited).map(|c| Prepared::Process(Box::new(c)))
        }
    }
}

/// Wires a prepared unit to its control channel and the inbox. Never blocks.
pub(crate) fn start(
    prepared: Prepared,
    config: &SpawnConfig,
    ends: ControlEnds,
    link: WorkerLink,
) -> Result<Execution, SpawnError> {
    match prepared {
        Prepared::Task(body) => Ok(start_task(body, config, ends, link)),
        Prepared::Process(child) => start_process(*child, ends, link),
    }
}

fn start_task(
    worker: WorkerRef,
    config: &SpawnConfig,
    ends: ControlEnds,
    link: WorkerLink,
) -> Execution {
    let ctx = WorkerContext::new(
        config.arguments().into(),
        Arc::new(config.env_overrides().clone()),
        link.clone(),
        ends,
    );
    let name = worker.name().to_string();
    let body_link = link.clone();
    let join = tokio::spawn(async move {
        let _ = body_link.signal(WorkerSignal::Online);
        worker.run(ctx).await
    });

    let killed = Arc::new(OnceLock::new());
    let exec = Execution::Task {
        abort: join.abort_handle(),
        killed: Arc::clone(&killed),
    };
    tokio::spawn(watch_task(join, link, killed, name));
    exec
}

async fn watch_task(
    join: JoinHandle<Result<(), WorkerError>>,
    link: WorkerLink,
    killed: Arc<OnceLock<Signal>>,
    name: String,
) {
    let worker = link.worker();
    let (code, signal) = match join.await {
        Ok(Ok(())) => {
            debug!(%worker, name = %name, "worker body returned");
            (Some(0), None)
        }
        Ok(Err(e)) => {
            warn!(%worker, name = %name, error = %e, label = e.as_label(), "worker body failed");
            (Some(1), None)
        }
        Err(e) if e.is_cancelled() => (None, Some(killed.get().copied().unwrap_or(Signal::Kill))),
        Err(e) => {
            let info = e
                .try_into_panic()
                .map(|p| panic_message(&*p))
                .unwrap_or_else(|_| "join failed".to_string());
            warn!(%worker, name = %name, %info, "worker body panicked");
            (Some(1), None)
        }
    };
    let _ = link.signal(WorkerSignal::Disconnected { requested: false });
    let _ = link.signal(WorkerSignal::Exited { code, signal });
}

fn spawn_child(
    program: &Path,
    config: &SpawnConfig,
    worker: WorkerId,
    inherited: &[(Endpoint, Arc<BoundListener>)],
) -> Result<Child, SpawnError> {
    let stderr = match config.stdio_mode() {
        StdioMode::Inherit => Stdio::inherit(),
        StdioMode::Capture => Stdio::piped(),
    };
    let mut cmd = Command::new(program);
    cmd.args(config.arguments())
        .envs(config.env_overrides())
        .env(WORKER_ID_ENV, worker.get().to_string())
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(stderr)
        .kill_on_drop(true);

    #[cfg(unix)]
    let sockets = {
        let sockets = Inheritance::prepare(inherited).map_err(SpawnError::Launch)?;
        sockets.apply(&mut cmd);
        sockets
    };

    let child = cmd.spawn().map_err(SpawnError::Launch)?;
    #[cfg(unix)]
    drop(sockets);

    debug!(
        %worker,
        pid = ?child.id(),
        program = %program.display(),
        sockets = inherited.len(),
        "process worker launched"
    );
    Ok(child)
}

fn start_process(
    mut child: Child,
    ends: ControlEnds,
    link: WorkerLink,
) -> Result<Execution, SpawnError> {
    let worker = link.worker();
    let (Some(stdin), Some(stdout)) = (child.stdin.take(), child.stdout.take()) else {
        return Err(SpawnError::Launch(std::io::Error::other(
            "child stdio was not captured",
        )));
    };
    if let Some(err) = child.stderr.take() {
        tokio::spawn(log_stderr(err, worker));
    }
    let writer = tokio::spawn(pump_frames(stdin, ends.frames, worker));
    let reader = tokio::spawn(read_child(stdout, link.clone()));
    let (kill, kill_rx) = mpsc::unbounded_channel();
    tokio::spawn(wait_child(child, kill_rx, reader, writer, link));
    Ok(Execution::Process { kill })
}

/// Writes control frames to the child's stdin; closes it after a disconnect.
async fn pump_frames(
    mut stdin: ChildStdin,
    mut frames: mpsc::UnboundedReceiver<ControlFrame>,
    worker: WorkerId,
) {
    while let Some(frame) = frames.recv().await {
        let (wire, last) = match frame {
            ControlFrame::Deliver(d) => (
                ParentFrame::Message {
                    seq: d.seq,
                    payload: d.message.as_value().clone(),
                },
                false,
            ),
            ControlFrame::Disconnect => (ParentFrame::Disconnect, true),
        };
        let line = match wire.to_line() {
            Ok(line) => line,
            Err(e) => {
                warn!(%worker, error = %e, "dropping unencodable frame");
                continue;
            }
        };
        if let Err(e) = stdin.write_all(line.as_bytes()).await {
            debug!(%worker, error = %e, "child stdin closed");
            break;
        }
        let _ = stdin.flush().await;
        if last {
            break;
        }
    }
}

async fn read_child(stdout: ChildStdout, link: WorkerLink) {
    let worker = link.worker();
    let mut lines = BufReader::new(stdout).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) if line.trim().is_empty() => continue,
            Ok(Some(line)) => match ChildFrame::from_line(&line) {
                Ok(frame) => {
                    let Some(signal) = to_signal(frame, worker) else {
                        continue;
                    };
                    if link.signal(signal).is_err() {
                        return;
                    }
                }
                Err(e) => warn!(%worker, error = %e, "ignoring malformed frame from worker"),
            },
            Ok(None) => break,
            Err(e) => {
                warn!(%worker, error = %e, "worker stdout read failed");
                break;
            }
        }
    }
    let _ = link.signal(WorkerSignal::Disconnected { requested: false });
}

fn to_signal(frame: ChildFrame, worker: WorkerId) -> Option<WorkerSignal> {
    Some(match frame {
        ChildFrame::Online => WorkerSignal::Online,
        ChildFrame::Listening { address } => match address.parse::<Endpoint>() {
            Ok(address) => WorkerSignal::Listening { address },
            Err(e) => {
                warn!(%worker, error = %e, "worker reported an unparsable address");
                return None;
            }
        },
        ChildFrame::Message { payload } => WorkerSignal::Message {
            message: Message::new(payload),
            handle: None,
        },
        ChildFrame::Disconnect => WorkerSignal::Disconnected { requested: true },
    })
}

async fn log_stderr(stderr: ChildStderr, worker: WorkerId) {
    let mut lines = BufReader::new(stderr).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        info!(target: "clustervisor::worker", %worker, "{line}");
    }
}

async fn wait_child(
    mut child: Child,
    mut kill_rx: mpsc::UnboundedReceiver<Signal>,
    reader: JoinHandle<()>,
    writer: JoinHandle<()>,
    link: WorkerLink,
) {
    let worker = link.worker();
    let status = loop {
        tokio::select! {
            status = child.wait() => break status,
            Some(signal) = kill_rx.recv() => deliver(&mut child, signal, worker),
        }
    };
    writer.abort();
    let _ = tokio::time::timeout(READER_DRAIN, reader).await;

    let (code, signal) = match status {
        Ok(status) => exit_parts(status),
        Err(e) => {
            warn!(%worker, error = %e, "waiting for worker process failed");
            (None, None)
        }
    };
    let _ = link.signal(WorkerSignal::Disconnected { requested: false });
    let _ = link.signal(WorkerSignal::Exited { code, signal });
}

fn deliver(child: &mut Child, signal: Signal, worker: WorkerId) {
    #[cfg(unix)]
    if let (Some(pid), Some(sig)) = (child.id(), signal.to_nix()) {
        let pid = nix::unistd::Pid::from_raw(pid as i32);
        match nix::sys::signal::kill(pid, sig) {
            Ok(()) => {
                debug!(%worker, %signal, "signal delivered");
                return;
            }
            Err(e) => warn!(%worker, %signal, error = %e, "signal delivery failed, killing"),
        }
    }
    if let Err(e) = child.start_kill() {
        debug!(%worker, %signal, error = %e, "kill failed");
    }
}

#[cfg(unix)]
fn exit_parts(status: std::process::ExitStatus) -> (Option<i32>, Option<Signal>) {
    use std::os::unix::process::ExitStatusExt;
    (status.code(), status.signal().map(Signal::from_raw))
}

#[cfg(not(unix))]
fn exit_parts(status: std::process::ExitStatus) -> (Option<i32>, Option<Signal>) {
    (status.code(), None)
}
