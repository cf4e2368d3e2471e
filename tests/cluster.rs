use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use clustervisor::{
    ClusterConfig, ClusterError, Endpoint, Event, EventKind, SchedulingPolicy, Signal,
    SpawnConfig, SpawnError, Supervisor, WorkerContext, WorkerError, WorkerFn, WorkerId,
    WorkerState,
};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::broadcast;

const WAIT: Duration = Duration::from_secs(5);

fn rr_config() -> ClusterConfig {
    ClusterConfig {
        policy: SchedulingPolicy::RoundRobin,
        ..ClusterConfig::default()
    }
}

fn local() -> Endpoint {
    "127.0.0.1:0".parse().unwrap()
}

/// Listens on `endpoint`, writes its id to every connection and closes it.
fn id_server(endpoint: Endpoint) -> SpawnConfig {
    SpawnConfig::task(WorkerFn::arc("id-server", move |ctx: WorkerContext| {
        let endpoint = endpoint.clone();
        async move {
            let mut listener = ctx.listen(&endpoint).await?;
            while let Some(mut conn) = listener.accept().await? {
                conn.write_all(ctx.id().get().to_string().as_bytes()).await?;
                conn.shutdown().await?;
            }
            Ok::<_, WorkerError>(())
        }
    }))
}

/// Listens on `endpoint` but never accepts; leaves on disconnect.
fn idle_listener(endpoint: Endpoint) -> SpawnConfig {
    SpawnConfig::task(WorkerFn::arc("idle-listener", move |ctx: WorkerContext| {
        let endpoint = endpoint.clone();
        async move {
            let _listener = ctx.listen(&endpoint).await?;
            ctx.disconnect_requested().await;
            Ok::<_, WorkerError>(())
        }
    }))
}

fn idle() -> SpawnConfig {
    SpawnConfig::task(WorkerFn::arc("idle", |ctx: WorkerContext| async move {
        ctx.disconnect_requested().await;
        Ok::<_, WorkerError>(())
    }))
}

/// Ignores disconnect requests; only a kill ends it.
fn stubborn() -> SpawnConfig {
    SpawnConfig::task(WorkerFn::arc("stubborn", |_ctx: WorkerContext| async move {
        futures::future::pending::<()>().await;
        Ok::<_, WorkerError>(())
    }))
}

async fn next_event(
    rx: &mut broadcast::Receiver<Event>,
    pred: impl Fn(&EventKind) -> bool,
) -> Event {
    tokio::time::timeout(WAIT, async {
        loop {
            let ev = rx.recv().await.expect("bus closed");
            if pred(&ev.kind) {
                return ev;
            }
        }
    })
    .await
    .expect("event not seen in time")
}

async fn wait_listening(rx: &mut broadcast::Receiver<Event>, n: usize) {
    for _ in 0..n {
        next_event(rx, |k| matches!(k, EventKind::Listening { .. })).await;
    }
}

async fn wait_state(sup: &Supervisor, id: WorkerId, state: WorkerState) {
    tokio::time::timeout(WAIT, async {
        while sup.worker(id).map(|w| w.state) != Some(state) {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("state not reached in time");
}

async fn read_reply(addr: std::net::SocketAddr) -> String {
    let mut stream = TcpStream::connect(addr).await.unwrap();
    let mut out = String::new();
    tokio::time::timeout(WAIT, stream.read_to_string(&mut out))
        .await
        .unwrap()
        .unwrap();
    out
}

#[tokio::test]
async fn spawned_workers_get_distinct_ids_and_fork_first() {
    let sup = Supervisor::new(rr_config());
    let mut rx = sup.events();

    let ids: Vec<WorkerId> = (0..3).map(|_| sup.spawn(idle()).unwrap().id).collect();
    assert_eq!(ids, vec![WorkerId::new(1), WorkerId::new(2), WorkerId::new(3)]);

    let first = next_event(&mut rx, |_| true).await;
    assert!(matches!(first.kind, EventKind::Fork { ref worker } if worker.id == ids[0]));
    for id in &ids {
        wait_state(&sup, *id, WorkerState::Online).await;
    }
    sup.shutdown(Duration::from_secs(1)).await.unwrap();
}

#[tokio::test]
async fn route_cycles_over_listening_workers_only() {
    let sup = Supervisor::new(rr_config());
    let mut rx = sup.events();
    let endpoint = sup.bind(&local()).unwrap();

    let w1 = sup.spawn(idle_listener(endpoint.clone())).unwrap().id;
    let w2 = sup.spawn(idle_listener(endpoint.clone())).unwrap().id;
    let w3 = sup.spawn(idle()).unwrap().id;
    wait_listening(&mut rx, 2).await;
    wait_state(&sup, w3, WorkerState::Online).await;

    let picks: Vec<WorkerId> = (0..4).map(|_| sup.route(&endpoint).unwrap().id).collect();
    assert_eq!(picks, vec![w1, w2, w1, w2]);

    sup.disconnect(w1).unwrap().wait().await;
    assert_eq!(sup.route(&endpoint).unwrap().id, w2);
    assert_eq!(sup.route(&endpoint).unwrap().id, w2);
    sup.shutdown(Duration::from_secs(1)).await.unwrap();
}

#[tokio::test]
async fn route_without_listeners_fails() {
    let sup = Supervisor::new(rr_config());
    let endpoint = sup.bind(&local()).unwrap();
    sup.spawn(idle()).unwrap();

    let err = sup.route(&endpoint).unwrap_err();
    assert!(matches!(err, ClusterError::NoAvailableWorker { .. }));

    let os = Supervisor::new(ClusterConfig {
        policy: SchedulingPolicy::OsDefault,
        ..ClusterConfig::default()
    });
    let endpoint = os.bind(&local()).unwrap();
    assert!(matches!(os.route(&endpoint), Err(ClusterError::RoutingDelegated)));
}

#[tokio::test]
async fn connections_are_spread_round_robin() {
    let sup = Supervisor::new(rr_config());
    let mut rx = sup.events();
    let endpoint = sup.bind(&local()).unwrap();
    let addr = endpoint.tcp_addr().unwrap();

    sup.spawn(id_server(endpoint.clone())).unwrap();
    sup.spawn(id_server(endpoint.clone())).unwrap();
    wait_listening(&mut rx, 2).await;

    let mut replies = Vec::new();
    for _ in 0..4 {
        replies.push(read_reply(addr).await);
    }
    assert_eq!(replies, vec!["1", "2", "1", "2"]);
    sup.shutdown(Duration::from_secs(1)).await.unwrap();
}

#[tokio::test]
async fn connections_wait_for_the_first_listener() {
    let sup = Supervisor::new(rr_config());
    let endpoint = sup.bind(&local()).unwrap();
    let addr = endpoint.tcp_addr().unwrap();

    let early = tokio::spawn(read_reply(addr));
    tokio::time::sleep(Duration::from_millis(50)).await;
    sup.spawn(id_server(endpoint)).unwrap();

    let reply = tokio::time::timeout(WAIT, early).await.unwrap().unwrap();
    assert_eq!(reply, "1");
    sup.shutdown(Duration::from_secs(1)).await.unwrap();
}

#[tokio::test]
async fn full_backlog_drops_connections() {
    let sup = Supervisor::new(ClusterConfig {
        pending_connections: 0,
        ..rr_config()
    });
    let mut rx = sup.events();
    let endpoint = sup.bind(&local()).unwrap();

    let _client = TcpStream::connect(endpoint.tcp_addr().unwrap()).await.unwrap();
    let ev = next_event(&mut rx, |k| matches!(k, EventKind::ConnectionDropped { .. })).await;
    match ev.kind {
        EventKind::ConnectionDropped { endpoint: dropped, .. } => assert_eq!(dropped, endpoint),
        other => panic!("unexpected {other:?}"),
    }
}

#[tokio::test]
async fn kill_after_disconnect_keeps_the_voluntary_flag() {
    let sup = Supervisor::new(rr_config());
    let id = sup.spawn(stubborn()).unwrap().id;
    wait_state(&sup, id, WorkerState::Online).await;

    let pending = sup.disconnect(id).unwrap();
    assert!(!pending.is_done());
    assert_eq!(sup.worker(id).unwrap().state, WorkerState::Disconnecting);

    sup.kill(id, Signal::Kill).unwrap();
    assert!(pending.wait().await.is_settled());
    wait_state(&sup, id, WorkerState::Dead).await;

    let dead = sup.worker(id).unwrap();
    assert!(dead.exited_after_disconnect);
    assert_eq!(dead.signal, Some(Signal::Kill));
    assert_eq!(dead.exit_code, None);
    assert!(!dead.crashed());
}

#[tokio::test]
async fn disconnect_all_without_workers_completes_immediately() {
    let sup = Supervisor::new(rr_config());
    let done = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&done);
    sup.disconnect_all(move || flag.store(true, Ordering::SeqCst));
    assert!(done.load(Ordering::SeqCst));
}

#[tokio::test]
async fn disconnect_all_waits_for_every_worker() {
    let sup = Supervisor::new(rr_config());
    let ids: Vec<WorkerId> = (0..3).map(|_| sup.spawn(idle()).unwrap().id).collect();
    let (tx, rx) = tokio::sync::oneshot::channel();
    sup.disconnect_all(move || {
        let _ = tx.send(());
    });
    tokio::time::timeout(WAIT, rx).await.unwrap().unwrap();
    for id in ids {
        assert!(sup.worker(id).unwrap().state.is_settled());
    }
}

#[tokio::test]
async fn messages_arrive_in_send_order() {
    let sup = Supervisor::new(rr_config());
    let mut rx = sup.events();
    let echo = SpawnConfig::task(WorkerFn::arc("echo", |mut ctx: WorkerContext| async move {
        while let Some(delivery) = ctx.recv().await {
            ctx.send(delivery.message)?;
        }
        Ok::<_, WorkerError>(())
    }));
    let id = sup.spawn(echo).unwrap().id;

    for n in 1..=50u64 {
        assert_eq!(sup.send(id, serde_json::json!(n)).unwrap(), n);
    }
    for n in 1..=50u64 {
        let ev = next_event(&mut rx, |k| matches!(k, EventKind::Message { .. })).await;
        match ev.kind {
            EventKind::Message { worker, message, .. } => {
                assert_eq!(worker.id, id);
                assert_eq!(message.as_value().as_u64(), Some(n));
            }
            other => panic!("unexpected {other:?}"),
        }
    }
    sup.shutdown(Duration::from_secs(1)).await.unwrap();
    assert!(matches!(
        sup.send(id, "late"),
        Err(ClusterError::ChannelClosed { .. })
    ));
}

#[tokio::test]
async fn sends_after_disconnect_are_refused() {
    let sup = Supervisor::new(rr_config());
    let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
    let log = Arc::clone(&seen);
    let collector = SpawnConfig::task(WorkerFn::arc("collector", move |mut ctx: WorkerContext| {
        let log = Arc::clone(&log);
        async move {
            while let Some(delivery) = ctx.recv().await {
                let text = delivery.message.as_str().unwrap_or_default().to_string();
                log.lock().unwrap().push(text);
            }
            Ok::<_, WorkerError>(())
        }
    }));
    let id = sup.spawn_ready(collector).await.unwrap().id;

    assert_eq!(sup.send(id, "a").unwrap(), 1);
    let handle = sup.disconnect(id).unwrap();
    assert!(matches!(
        sup.send(id, "late"),
        Err(ClusterError::ChannelClosed { worker }) if worker == id
    ));
    assert!(tokio::time::timeout(WAIT, handle.wait())
        .await
        .unwrap()
        .is_settled());
    assert_eq!(*seen.lock().unwrap(), vec!["a".to_string()]);
}

#[tokio::test]
async fn crash_is_reported_as_exit() {
    let sup = Supervisor::new(rr_config());
    let mut rx = sup.events();
    let crash = SpawnConfig::task(WorkerFn::arc("crash", |_ctx: WorkerContext| async move {
        Err::<(), _>(WorkerError::fail("boom"))
    }));
    let id = sup.spawn(crash).unwrap().id;

    let ev = next_event(&mut rx, |k| matches!(k, EventKind::Exit { .. })).await;
    match ev.kind {
        EventKind::Exit {
            worker,
            exit_code,
            signal,
        } => {
            assert_eq!(worker.id, id);
            assert_eq!(exit_code, Some(1));
            assert_eq!(signal, None);
            assert!(worker.crashed());
        }
        other => panic!("unexpected {other:?}"),
    }
    assert_eq!(sup.reap(id).unwrap().id, id);
    assert!(sup.workers().is_empty());
}

#[tokio::test]
async fn stop_escalates_to_kill() {
    let sup = Supervisor::new(rr_config());
    let id = sup.spawn_ready(stubborn()).await.unwrap().id;

    let dead = sup.stop(id, Duration::from_millis(50)).await.unwrap();
    assert!(dead.is_dead());
    assert_eq!(dead.signal, Some(Signal::Kill));
    assert!(dead.exited_after_disconnect);
}

#[tokio::test]
async fn shutdown_reports_stuck_workers() {
    let sup = Supervisor::new(rr_config());
    let mut rx = sup.events();
    let polite = sup.spawn_ready(idle()).await.unwrap().id;
    let stuck = sup.spawn_ready(stubborn()).await.unwrap().id;

    let err = sup.shutdown(Duration::from_millis(100)).await.unwrap_err();
    match err {
        ClusterError::GraceExceeded { stuck: ids, .. } => assert_eq!(ids, vec![stuck]),
        other => panic!("unexpected {other:?}"),
    }
    next_event(&mut rx, |k| matches!(k, EventKind::ShutdownRequested)).await;
    let ev = next_event(&mut rx, |k| matches!(k, EventKind::GraceExceeded { .. })).await;
    assert!(matches!(ev.kind, EventKind::GraceExceeded { stuck: ref ids } if ids == &vec![stuck]));

    wait_state(&sup, stuck, WorkerState::Dead).await;
    assert!(!sup.worker(polite).unwrap().crashed());
    assert_eq!(sup.clear().unwrap(), 2);
}

#[tokio::test]
async fn clean_shutdown_publishes_all_stopped() {
    let sup = Supervisor::new(rr_config());
    let mut rx = sup.events();
    sup.spawn_ready(idle()).await.unwrap();
    sup.shutdown(Duration::from_secs(1)).await.unwrap();
    next_event(&mut rx, |k| matches!(k, EventKind::AllStoppedWithin)).await;
    assert!(sup.workers().iter().all(|w| w.is_dead()));
}

#[tokio::test]
async fn policy_is_locked_by_the_first_spawn() {
    let sup = Supervisor::new(rr_config());
    sup.set_scheduling_policy(SchedulingPolicy::OsDefault).unwrap();
    sup.set_scheduling_policy(SchedulingPolicy::RoundRobin).unwrap();
    sup.spawn(idle()).unwrap();

    assert!(matches!(
        sup.set_scheduling_policy(SchedulingPolicy::OsDefault),
        Err(ClusterError::PolicyLocked)
    ));
    sup.set_scheduling_policy(SchedulingPolicy::RoundRobin).unwrap();
    assert_eq!(sup.scheduling_policy(), SchedulingPolicy::RoundRobin);
}

#[tokio::test]
async fn workers_cannot_listen_on_pipes() {
    let sup = Supervisor::new(rr_config());
    let mut rx = sup.events();
    let pipe: Endpoint = "pipe:svc".parse().unwrap();
    let (tx, result) = tokio::sync::oneshot::channel();
    let tx = Arc::new(std::sync::Mutex::new(Some(tx)));
    let worker = SpawnConfig::task(WorkerFn::arc("pipe", move |ctx: WorkerContext| {
        let pipe = pipe.clone();
        let tx = Arc::clone(&tx);
        async move {
            let outcome = ctx.listen(&pipe).await.map(|_| ());
            if let Some(tx) = tx.lock().unwrap().take() {
                let _ = tx.send(outcome);
            }
            Ok::<_, WorkerError>(())
        }
    }));
    sup.spawn(worker).unwrap();

    let err = tokio::time::timeout(WAIT, result).await.unwrap().unwrap().unwrap_err();
    if cfg!(windows) {
        assert!(matches!(err, ClusterError::PipeNotPermitted(_)));
    } else {
        assert!(matches!(err, ClusterError::UnsupportedEndpoint(_)));
    }
    let ev = next_event(&mut rx, |k| {
        matches!(k, EventKind::Listening { .. } | EventKind::Exit { .. })
    })
    .await;
    assert_eq!(ev.label(), "exit");
}

#[tokio::test]
async fn pending_worker_limit_is_enforced() {
    let sup = Supervisor::new(ClusterConfig {
        max_pending_workers: 1,
        ..rr_config()
    });
    sup.spawn(idle()).unwrap();
    let err = sup.spawn(idle()).unwrap_err();
    assert!(matches!(
        err,
        ClusterError::Spawn(SpawnError::TooManyPending { limit: 1 })
    ));
}

#[cfg(unix)]
mod process {
    use super::*;
    use clustervisor::{ProcessChannel, LISTEN_FDS_ENV};

    fn os_config() -> ClusterConfig {
        ClusterConfig {
            policy: SchedulingPolicy::OsDefault,
            ready_timeout: Duration::from_millis(200),
            ..ClusterConfig::default()
        }
    }

    #[tokio::test]
    async fn commands_need_os_scheduling() {
        let sup = Supervisor::new(rr_config());
        let err = sup.spawn(SpawnConfig::command("/bin/sh")).unwrap_err();
        assert_eq!(err.as_label(), "spawn_invalid_config");
    }

    #[tokio::test]
    async fn failed_launch_leaves_no_trace() {
        let sup = Supervisor::new(os_config());
        let mut rx = sup.events();
        let err = sup
            .spawn(SpawnConfig::command("/definitely/not/here"))
            .unwrap_err();
        assert_eq!(err.as_label(), "spawn_launch_failed");
        assert!(sup.workers().is_empty());
        sup.set_scheduling_policy(SchedulingPolicy::RoundRobin).unwrap();
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn silent_child_times_out() {
        let sup = Supervisor::new(os_config());
        let err = sup
            .spawn_ready(SpawnConfig::command("/bin/sh").args(["-c", "sleep 30"]))
            .await
            .unwrap_err();
        assert!(matches!(err, ClusterError::Spawn(SpawnError::ReadyTimeout { .. })));

        let id = sup.workers()[0].id;
        wait_state(&sup, id, WorkerState::Dead).await;
        assert_eq!(sup.worker(id).unwrap().signal, Some(Signal::Kill));
    }

    #[tokio::test]
    async fn child_reports_listening_and_exit_code() {
        let sup = Supervisor::new(os_config());
        let mut rx = sup.events();
        let script = r#"echo '{"type":"listening","address":"127.0.0.1:7001"}'; exit 4"#;
        let id = sup
            .spawn(SpawnConfig::command("/bin/sh").args(["-c", script]))
            .unwrap()
            .id;

        let ev = next_event(&mut rx, |k| matches!(k, EventKind::Listening { .. })).await;
        assert!(matches!(ev.kind, EventKind::Listening { ref address, .. } if address.to_string() == "127.0.0.1:7001"));
        let ev = next_event(&mut rx, |k| matches!(k, EventKind::Exit { .. })).await;
        assert!(matches!(ev.kind, EventKind::Exit { exit_code: Some(4), .. }));
        assert!(sup.worker(id).unwrap().crashed());
    }

    /// Body of the child processes below: does nothing unless spawned by a supervisor.
    #[tokio::test]
    async fn serve_inherited_socket_when_spawned() {
        if !ProcessChannel::is_worker() {
            return;
        }
        assert!(std::env::var_os(LISTEN_FDS_ENV).is_some());
        let chan = ProcessChannel::connect().await.unwrap();
        let endpoint = chan.inherited_endpoints().next().cloned().unwrap();
        let mut listener = chan.listen(&endpoint).await.unwrap();
        while let Some(mut conn) = listener.accept().await.unwrap() {
            conn.write_all(chan.id().get().to_string().as_bytes()).await.unwrap();
            conn.shutdown().await.unwrap();
        }
    }

    #[tokio::test]
    async fn children_share_the_supervisor_socket() {
        let sup = Supervisor::new(os_config());
        let mut rx = sup.events();
        let endpoint = sup.bind(&local()).unwrap();
        let addr = endpoint.tcp_addr().unwrap();

        let child = || {
            SpawnConfig::command(std::env::current_exe().unwrap()).args([
                "--exact",
                "process::serve_inherited_socket_when_spawned",
                "--nocapture",
            ])
        };
        let ids = [sup.spawn(child()).unwrap().id, sup.spawn(child()).unwrap().id];

        for _ in 0..2 {
            let ev = next_event(&mut rx, |k| matches!(k, EventKind::Listening { .. })).await;
            match ev.kind {
                EventKind::Listening { worker, address } => {
                    assert!(ids.contains(&worker.id));
                    assert_eq!(address, endpoint);
                }
                other => panic!("unexpected {other:?}"),
            }
        }

        for _ in 0..4 {
            let reply: u64 = read_reply(addr).await.parse().unwrap();
            assert!(ids.contains(&WorkerId::new(reply)));
        }
        sup.shutdown(WAIT).await.unwrap();
        for id in ids {
            assert_eq!(sup.worker(id).unwrap().exit_code, Some(0));
        }
    }
}
