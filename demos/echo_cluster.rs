//! # Demo: echo_cluster
//!
//! Four in-process workers share one TCP endpoint and echo every line back,
//! prefixed with their id. Connections are spread round-robin unless
//! `CLUSTER_SCHED_POLICY=none` hands them to the OS.
//!
//! Shows how to:
//! - Bind a shared endpoint with [`Supervisor::bind`].
//! - Write a [`WorkerFn`] that listens through its [`WorkerContext`].
//! - Keep the pool at size with a [`Respawner`] (one worker crashes on `crash`).
//! - Shut down gracefully on Ctrl-C with [`Supervisor::run_until_signal`].
//!
//! ## Flow
//! ```text
//! client ──► 127.0.0.1:7000 ──► acceptor ──► next Listening worker ──► echo
//!                                                  │
//!                       "crash" ──► Err ──► Exit ──┴─► Respawner ──► spawn(config)
//! ```
//!
//! ## Run
//! ```bash
//! RUST_LOG=debug cargo run --example echo_cluster
//! nc 127.0.0.1 7000
//! ```

use std::sync::Arc;
use std::time::Duration;

use clustervisor::{
    BackoffPolicy, ClusterConfig, Endpoint, LogWriter, Respawner, SpawnConfig, Subscribe,
    Supervisor, WorkerContext, WorkerError, WorkerFn,
};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing_subscriber::EnvFilter;

const WORKERS: usize = 4;

fn echo_worker(endpoint: Endpoint) -> SpawnConfig {
    SpawnConfig::task(WorkerFn::arc("echo", move |ctx: WorkerContext| {
        let endpoint = endpoint.clone();
        async move {
            let mut listener = ctx.listen(&endpoint).await?;
            while let Some(conn) = listener.accept().await? {
                let id = ctx.id();
                let (read, mut write) = tokio::io::split(conn);
                let mut lines = BufReader::new(read).lines();
                while let Some(line) = lines.next_line().await? {
                    if line.trim() == "crash" {
                        return Err(WorkerError::fail("asked to crash"));
                    }
                    write.write_all(format!("[{id}] {line}\n").as_bytes()).await?;
                }
            }
            Ok(())
        }
    }))
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cfg = ClusterConfig {
        grace: Duration::from_secs(5),
        ..ClusterConfig::from_env()
    };
    let subs: Vec<Arc<dyn Subscribe>> = vec![Arc::new(LogWriter)];
    let sup = Supervisor::builder(cfg).with_subscribers(subs).build();

    let endpoint = sup.bind(&"127.0.0.1:7000".parse()?)?;
    tracing::info!(%endpoint, workers = WORKERS, "echo cluster listening");

    let respawner = Respawner::new(&sup).with_backoff(BackoffPolicy {
        max: Duration::from_secs(2),
        ..BackoffPolicy::default()
    });
    let _respawns = respawner.start();
    for _ in 0..WORKERS {
        respawner.spawn(echo_worker(endpoint.clone()))?;
    }

    sup.run_until_signal().await?;
    Ok(())
}
