//! # In-process worker bodies.
//!
//! A [`Worker`] is the request-handling side of the cluster: it receives a
//! [`WorkerContext`], opens a listener on the shared endpoint and serves until a
//! disconnect is requested. [`WorkerFn`] adapts a closure; [`WorkerRef`] is the
//! shared form stored in a [`SpawnConfig`](crate::SpawnConfig).
//!
//! ## Example
//! ```rust
//! use clustervisor::{WorkerContext, WorkerError, WorkerFn, WorkerRef};
//!
//! let echo: WorkerRef = WorkerFn::arc("echo", |mut ctx: WorkerContext| async move {
//!     while let Some(delivery) = ctx.recv().await {
//!         ctx.send(delivery.message)?;
//!     }
//!     Ok::<_, WorkerError>(())
//! });
//! assert_eq!(echo.name(), "echo");
//! ```

use std::borrow::Cow;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::WorkerError;
use crate::workers::context::WorkerContext;

/// Shared reference to a worker body.
pub type WorkerRef = Arc<dyn Worker>;

/// Body of an in-process worker.
///
/// `run` is called once per spawned worker with a fresh context. Returning
/// `Ok(())` exits with code `0`; an error or a panic exits with code `1`.
#[async_trait]
pub trait Worker: Send + Sync + 'static {
    /// Name used in logs.
    fn name(&self) -> &str {
        "worker"
    }

    /// Serves until done or until a disconnect is requested.
    async fn run(&self, ctx: WorkerContext) -> Result<(), WorkerError>;
}

/// Closure-backed worker; the closure builds a fresh future per spawn.
#[derive(Debug)]
pub struct WorkerFn<F> {
    name: Cow<'static, str>,
    f: F,
}

impl<F> WorkerFn<F> {
    /// Creates a closure-backed worker.
    pub fn new(name: impl Into<Cow<'static, str>>, f: F) -> Self {
        Self {
            name: name.into(),
            f,
        }
    }

    /// Creates the worker and returns it as an `Arc`.
    pub fn arc(name: impl Into<Cow<'static, str>>, f: F) -> Arc<Self> {
        Arc::new(Self::new(name, f))
    }
}

#[async_trait]
impl<F, Fut> Worker for WorkerFn<F>
where
    F: Fn(WorkerContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), WorkerError>> + Send + 'static,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&self, ctx: WorkerContext) -> Result<(), WorkerError> {
        (self.f)(ctx).await
    }
}
