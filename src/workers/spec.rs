//! # Spawn configuration.
//!
//! [`SpawnConfig`] describes one worker to [`Supervisor::spawn`](crate::Supervisor::spawn):
//! - the execution target ([`WorkerTarget`]): an in-process [`Worker`](crate::Worker)
//!   or a child program;
//! - arguments and environment overrides (merged over the inherited environment);
//! - the stdio mode ([`StdioMode`]) for child programs.
//!
//! Every worker additionally sees [`WORKER_ID_ENV`] set to its id.

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

use crate::error::SpawnError;
use crate::workers::worker::WorkerRef;

/// Environment variable carrying the worker id into every worker.
pub const WORKER_ID_ENV: &str = "CLUSTER_WORKER_ID";

/// What a worker executes.
#[derive(Clone)]
pub enum WorkerTarget {
    /// Isolated tokio task running a [`Worker`](crate::Worker).
    Task(WorkerRef),
    /// Child process speaking the line protocol on stdin/stdout
    /// (see [`ProcessChannel`](crate::ProcessChannel)).
    Command {
        /// Program path.
        program: PathBuf,
    },
}

impl WorkerTarget {
    /// True for child processes.
    pub fn is_process(&self) -> bool {
        matches!(self, WorkerTarget::Command { .. })
    }
}

impl fmt::Debug for WorkerTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WorkerTarget::Task(w) => f.debug_tuple("Task").field(&w.name()).finish(),
            WorkerTarget::Command { program } => {
                f.debug_struct("Command").field("program", program).finish()
            }
        }
    }
}

/// Where a child program's stderr goes. Stdout always carries the control protocol.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum StdioMode {
    /// Shares the supervisor's stderr.
    #[default]
    Inherit,
    /// Captured line by line into the supervisor's log.
    Capture,
}

/// Configuration of one worker.
#[derive(Clone, Debug)]
pub struct SpawnConfig {
    target: WorkerTarget,
    args: Vec<String>,
    env: BTreeMap<String, String>,
    stdio: StdioMode,
}

impl SpawnConfig {
    /// In-process worker.
    pub fn task(worker: WorkerRef) -> Self {
        Self::with_target(WorkerTarget::Task(worker))
    }

    /// Child-process worker.
    pub fn command(program: impl Into<PathBuf>) -> Self {
        Self::with_target(WorkerTarget::Command {
            program: program.into(),
        })
    }

    fn with_target(target: WorkerTarget) -> Self {
        Self {
            target,
            args: Vec::new(),
            env: BTreeMap::new(),
            stdio: StdioMode::default(),
        }
    }

    /// Appends one argument.
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Appends arguments.
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Sets one environment override.
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    /// Sets environment overrides.
    pub fn envs<I, K, V>(mut self, vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.env
            .extend(vars.into_iter().map(|(k, v)| (k.into(), v.into())));
        self
    }

    /// Sets the stdio mode.
    pub fn stdio(mut self, mode: StdioMode) -> Self {
        self.stdio = mode;
        self
    }

    pub fn target(&self) -> &WorkerTarget {
        &self.target
    }

    pub fn arguments(&self) -> &[String] {
        &self.args
    }

    pub fn env_overrides(&self) -> &BTreeMap<String, String> {
        &self.env
    }

    pub fn stdio_mode(&self) -> StdioMode {
        self.stdio
    }

    /// Checks what can be checked before launching.
    pub(crate) fn validate(&self) -> Result<(), SpawnError> {
        for key in self.env.keys() {
            if key.is_empty() || key.contains('=') || key.contains('\0') {
                return Err(SpawnError::InvalidConfig(format!(
                    "bad environment key {key:?}"
                )));
            }
            if key == WORKER_ID_ENV {
                return Err(SpawnError::InvalidConfig(format!(
                    "{WORKER_ID_ENV} is reserved"
                )));
            }
        }
        if let Some((key, _)) = self.env.iter().find(|(_, v)| v.contains('\0')) {
            return Err(SpawnError::InvalidConfig(format!(
                "environment value of {key:?} contains NUL"
            )));
        }
        if let WorkerTarget::Command { program } = &self.target {
            if program.as_os_str().is_empty() {
                return Err(SpawnError::InvalidConfig("empty program path".into()));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_accumulates() {
        let cfg = SpawnConfig::command("/bin/app")
            .arg("--port")
            .args(["80", "-v"])
            .env("MODE", "prod")
            .envs([("A", "1"), ("B", "2")])
            .stdio(StdioMode::Capture);
        assert_eq!(cfg.arguments(), ["--port", "80", "-v"]);
        assert_eq!(cfg.env_overrides().len(), 3);
        assert_eq!(cfg.stdio_mode(), StdioMode::Capture);
        assert!(cfg.target().is_process());
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn rejects_bad_env_and_empty_program() {
        assert!(SpawnConfig::command("/bin/app").env("A=B", "1").validate().is_err());
        assert!(SpawnConfig::command("/bin/app").env(WORKER_ID_ENV, "9").validate().is_err());
        assert!(SpawnConfig::command("/bin/app").env("A", "x\0").validate().is_err());
        assert!(SpawnConfig::command("").validate().is_err());
    }
}
