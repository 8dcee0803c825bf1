//! Supervisor state machine against in-memory process servers.

mod common;

use std::sync::Arc;
use std::time::{Duration, Instant};

use procfleet_core::testing::{MemoryBackend, MemoryTaskRef};
use procfleet_core::{
    ConfiguredDeployment, FleetContext, LookupError, NameMappings, ProcessReadiness,
    ProcessStatus, RegistryError, SpawnOptions,
};
use procfleet_runtime::{
    PoolEvent, ProcessSupervisor, SupervisorError, SupervisorPool, SupervisorState,
};
use tokio_test::{assert_err, assert_ok};

use common::{POLL, SlowBackend, config, deployment, fleet, model, register_tasks, server};

/// Context whose only process server answers `start` and `stop` after
/// `latency`.
fn slow_fleet(memory: &Arc<MemoryBackend>, latency: Duration) -> FleetContext {
    let mut ctx = FleetContext::with_defaults();
    let client = SlowBackend::new(Arc::clone(memory), latency);
    ctx.registry
        .register_process_server("local", client, None, "localhost")
        .unwrap();
    ctx
}

async fn wait_dead(supervisor: &ProcessSupervisor, limit: Duration) -> bool {
    let mut rx = supervisor.subscribe();
    tokio::time::timeout(limit, rx.wait_for(|state| state.is_dead()))
        .await
        .is_ok()
}

#[tokio::test]
async fn unmanaged_tasks_resolve_over_several_polls() {
    let backend = Arc::new(MemoryBackend::unmanaged());
    let a = MemoryTaskRef::new("a");
    let b = MemoryTaskRef::new("b");
    backend.names().register_on_lookup(Arc::clone(&a), 1);
    backend.names().register_on_lookup(Arc::clone(&b), 3);
    let ctx = fleet("local", &backend, None);

    let supervisor =
        ProcessSupervisor::new(deployment("local", "d", &["a", "b"]), &server(&ctx, "local"), config());
    assert_ok!(supervisor.spawn().await);

    let tasks = supervisor
        .wait_running(Some(Duration::from_secs(1)))
        .await
        .unwrap();
    let mut names: Vec<_> = tasks.keys().cloned().collect();
    names.sort();
    assert_eq!(names, vec!["a", "b"]);
    assert_eq!(tasks["a"].ior(), "IOR:a");
    assert_eq!(supervisor.state(), SupervisorState::Monitoring);
    assert_eq!(backend.names().lookup_count("a"), 1);
    assert_eq!(backend.names().lookup_count("b"), 3);
    assert!(supervisor.started_at().is_some());
    assert!(supervisor.process_info().is_none());

    supervisor.kill(true).await;
}

#[tokio::test]
async fn first_ping_failure_kills_and_stops_pinging() {
    let backend = Arc::new(MemoryBackend::unmanaged());
    let tasks = register_tasks(&backend, &["a", "b"]);
    let ctx = fleet("local", &backend, None);

    let supervisor =
        ProcessSupervisor::new(deployment("local", "d", &["a", "b"]), &server(&ctx, "local"), config());
    supervisor.spawn().await.unwrap();
    supervisor
        .wait_running(Some(Duration::from_secs(1)))
        .await
        .unwrap();

    tasks[0].fail_pings();
    assert!(wait_dead(&supervisor, POLL * 2 + Duration::from_millis(100)).await);

    let b_pings = tasks[1].ping_count();
    tokio::time::sleep(POLL * 5).await;
    assert_eq!(tasks[1].ping_count(), b_pings);
    assert!(!tasks[1].was_stopped());
    assert!(supervisor.is_dead());
    assert!(!supervisor.is_running());

    // Losing a task is not a fault of the supervisor itself
    assert_ok!(supervisor.verify_state());
    // Killing a dead supervisor is a no-op
    supervisor.kill(true).await;
    assert_eq!(supervisor.state(), SupervisorState::Dead);
}

#[tokio::test]
async fn waiting_kill_returns_after_shutdown() {
    let backend = Arc::new(MemoryBackend::remote());
    let tasks = register_tasks(&backend, &["cam", "imu"]);
    let ctx = fleet("robot", &backend, None);

    let supervisor = ProcessSupervisor::new(
        deployment("robot", "sensors", &["cam", "imu"]),
        &server(&ctx, "robot"),
        config(),
    );
    supervisor.spawn().await.unwrap();
    supervisor.wait_running(None).await.unwrap();
    assert_eq!(supervisor.process_info().unwrap().name, "sensors");

    supervisor.kill(true).await;

    assert!(supervisor.is_dead());
    assert!(tasks.iter().all(|t| t.was_stopped() && t.was_cleaned_up()));
    assert_eq!(backend.stopped(), vec!["sensors"]);
    assert_eq!(supervisor.exit_status(), Some(ProcessStatus::Exited(0)));

    let pings: Vec<usize> = tasks.iter().map(|t| t.ping_count()).collect();
    tokio::time::sleep(POLL * 3).await;
    let after: Vec<usize> = tasks.iter().map(|t| t.ping_count()).collect();
    assert_eq!(pings, after);
}

#[tokio::test]
async fn detached_kill_finishes_in_background() {
    let backend = Arc::new(MemoryBackend::in_process());
    let tasks = register_tasks(&backend, &["a"]);
    let ctx = fleet("local", &backend, None);

    let supervisor =
        ProcessSupervisor::new(deployment("local", "d", &["a"]), &server(&ctx, "local"), config());
    supervisor.spawn().await.unwrap();
    supervisor.wait_running(None).await.unwrap();

    supervisor.kill(false).await;
    assert!(wait_dead(&supervisor, Duration::from_secs(1)).await);
    assert!(tasks[0].was_stopped());
}

#[tokio::test]
async fn unmanaged_deployment_rejects_renames() {
    let backend = Arc::new(MemoryBackend::unmanaged());
    let ctx = fleet("local", &backend, None);

    let mut mappings = NameMappings::new();
    mappings.insert("a".into(), "other_a".into());
    let renamed = Arc::new(ConfiguredDeployment::new(
        "local",
        model("d", &["a"]),
        mappings,
        SpawnOptions::default(),
    ));

    let supervisor = ProcessSupervisor::new(renamed, &server(&ctx, "local"), config());
    let err = supervisor.spawn().await.unwrap_err();
    assert!(matches!(err, SupervisorError::NameMappingForbidden { .. }));
    assert!(supervisor.is_dead());
}

#[tokio::test]
async fn remote_deployment_accepts_prefix_renames() {
    let backend = Arc::new(MemoryBackend::remote());
    register_tasks(&backend, &["left_cam"]);
    let ctx = fleet("robot", &backend, None);

    let model = model("cam", &["cam"]);
    let mappings = ConfiguredDeployment::prefix_mappings("left_", &model);
    let renamed = Arc::new(ConfiguredDeployment::new(
        "robot",
        model,
        mappings,
        SpawnOptions::default(),
    ));

    let supervisor = ProcessSupervisor::new(renamed, &server(&ctx, "robot"), config());
    supervisor.spawn().await.unwrap();
    supervisor
        .wait_running(Some(Duration::from_secs(1)))
        .await
        .unwrap();

    assert_eq!(backend.started(), vec!["left_cam"]);
    // Declared and deployed names both find the task
    assert_eq!(supervisor.task("cam").unwrap().name(), "left_cam");
    assert_eq!(supervisor.task("left_cam").unwrap().name(), "left_cam");
    assert!(matches!(
        supervisor.task("gps"),
        Err(SupervisorError::UnknownTask(_))
    ));
    supervisor.kill(true).await;
}

#[tokio::test]
async fn tasks_are_unavailable_until_resolved() {
    let backend = Arc::new(MemoryBackend::unmanaged());
    let ctx = fleet("local", &backend, None);

    let supervisor =
        ProcessSupervisor::new(deployment("local", "d", &["a"]), &server(&ctx, "local"), config());
    assert!(matches!(
        supervisor.wait_running(None).await,
        Err(SupervisorError::InvalidState { .. })
    ));

    supervisor.spawn().await.unwrap();
    assert!(matches!(supervisor.task("a"), Err(SupervisorError::NotRunning(_))));
    match supervisor.wait_running(Some(POLL * 3)).await {
        Err(SupervisorError::ResolveTimeout { pending }) => assert_eq!(pending, vec!["a"]),
        Err(e) => panic!("expected a resolve timeout, got {e}"),
        Ok(_) => panic!("resolution cannot complete without tasks"),
    }
    assert!(matches!(
        supervisor.spawn().await,
        Err(SupervisorError::InvalidState { .. })
    ));

    supervisor.kill(true).await;
    assert!(supervisor.is_dead());
}

#[tokio::test]
async fn kill_before_spawn_is_immediate() {
    let backend = Arc::new(MemoryBackend::remote());
    let ctx = fleet("local", &backend, None);
    let supervisor =
        ProcessSupervisor::new(deployment("local", "d", &["a"]), &server(&ctx, "local"), config());

    supervisor.kill(false).await;
    assert!(supervisor.is_dead());
    assert!(backend.started().is_empty());
}

#[tokio::test]
async fn permanent_lookup_failure_is_reraised_once() {
    let backend = Arc::new(MemoryBackend::unmanaged());
    backend.names().fail_permanently("a");
    let ctx = fleet("local", &backend, None);

    let supervisor =
        ProcessSupervisor::new(deployment("local", "d", &["a"]), &server(&ctx, "local"), config());
    supervisor.spawn().await.unwrap();

    let err = supervisor
        .wait_running(Some(Duration::from_secs(1)))
        .await
        .unwrap_err();
    assert!(matches!(err, SupervisorError::Lookup { ref task, .. } if task == "a"));
    assert!(wait_dead(&supervisor, Duration::from_secs(1)).await);

    assert_err!(supervisor.verify_state());
    assert_ok!(supervisor.verify_state());
}

#[tokio::test]
async fn unreachable_name_service_gives_up_after_limit() {
    let backend = Arc::new(MemoryBackend::unmanaged());
    backend.names().set_unreachable(true);
    let ctx = fleet("local", &backend, None);

    let supervisor = ProcessSupervisor::new(
        deployment("local", "d", &["a"]),
        &server(&ctx, "local"),
        config().with_max_resolve_failures(Some(3)),
    );
    supervisor.spawn().await.unwrap();

    let err = supervisor
        .wait_running(Some(Duration::from_secs(1)))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        SupervisorError::TooManyResolveFailures { failures: 3, .. }
    ));
}

#[tokio::test]
async fn crashed_process_is_reported_during_resolution() {
    let backend = Arc::new(MemoryBackend::remote());
    backend.set_readiness(
        "d",
        ProcessReadiness::Failed {
            reason: "segfault".into(),
        },
    );
    backend.set_exit_status("d", ProcessStatus::Signaled(11));
    let ctx = fleet("local", &backend, None);

    let supervisor =
        ProcessSupervisor::new(deployment("local", "d", &["a"]), &server(&ctx, "local"), config());
    supervisor.spawn().await.unwrap();

    let err = supervisor.wait_running(None).await.unwrap_err();
    assert!(matches!(err, SupervisorError::ProcessFailed { ref reason, .. } if reason == "segfault"));
    assert!(wait_dead(&supervisor, Duration::from_secs(1)).await);
    assert_eq!(supervisor.exit_status(), Some(ProcessStatus::Signaled(11)));
}

#[tokio::test]
async fn lost_remote_process_is_reaped() {
    let backend = Arc::new(MemoryBackend::remote());
    let tasks = register_tasks(&backend, &["a"]);
    backend.set_exit_status("d", ProcessStatus::Exited(3));
    let ctx = fleet("local", &backend, None);

    let supervisor =
        ProcessSupervisor::new(deployment("local", "d", &["a"]), &server(&ctx, "local"), config());
    supervisor.spawn().await.unwrap();
    supervisor.wait_running(None).await.unwrap();

    tasks[0].fail_pings();
    assert!(wait_dead(&supervisor, Duration::from_secs(1)).await);

    // The exit status is collected right after the transition to DEAD
    let mut status = None;
    for _ in 0..50 {
        status = supervisor.exit_status();
        if status.is_some() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(status, Some(ProcessStatus::Exited(3)));
}

#[tokio::test]
async fn pool_tracks_and_forgets_supervisors() {
    let backend = Arc::new(MemoryBackend::unmanaged());
    let tasks = register_tasks(&backend, &["a", "b"]);
    let ctx = fleet("local", &backend, None);
    let mut pool = SupervisorPool::new(config());

    let first = deployment("local", "first", &["a"]);
    let second = deployment("local", "second", &["b"]);
    pool.spawn(&ctx, &first).await.unwrap();
    pool.spawn(&ctx, &second).await.unwrap();
    assert_eq!(pool.len(), 2);
    assert!(matches!(
        pool.spawn(&ctx, &first).await,
        Err(SupervisorError::AlreadySupervised(_))
    ));

    let orphan = deployment("nowhere", "orphan", &["c"]);
    assert!(matches!(
        pool.spawn(&ctx, &orphan).await,
        Err(SupervisorError::Registry(RegistryError::UnknownServer(_)))
    ));

    pool.get("first")
        .unwrap()
        .wait_running(Some(Duration::from_secs(1)))
        .await
        .unwrap();
    tasks[0].fail_pings();
    assert!(wait_dead(pool.get("first").unwrap(), Duration::from_secs(1)).await);

    let events = pool.poll();
    assert_eq!(events.len(), 1);
    assert!(matches!(&events[0], PoolEvent::Died { deployment } if deployment == "first"));
    assert!(pool.get("first").is_none());
    assert_eq!(pool.len(), 1);

    pool.kill_all(true).await;
    assert!(pool.is_empty());
}

#[tokio::test]
async fn concurrent_kills_on_one_server_keep_every_exit_status() {
    let memory = Arc::new(MemoryBackend::remote());
    register_tasks(&memory, &["ta", "tb"]);
    memory.set_exit_status("pa", ProcessStatus::Exited(3));
    memory.set_exit_status("pb", ProcessStatus::Exited(4));
    let ctx = slow_fleet(&memory, Duration::from_millis(5));
    let local = server(&ctx, "local");

    let a = ProcessSupervisor::new(deployment("local", "pa", &["ta"]), &local, config());
    let b = ProcessSupervisor::new(deployment("local", "pb", &["tb"]), &local, config());
    for supervisor in [&a, &b] {
        supervisor.spawn().await.unwrap();
        supervisor
            .wait_running(Some(Duration::from_secs(1)))
            .await
            .unwrap();
    }

    tokio::join!(a.kill(true), b.kill(true));

    assert_eq!(a.exit_status(), Some(ProcessStatus::Exited(3)));
    assert_eq!(b.exit_status(), Some(ProcessStatus::Exited(4)));
    let mut stopped = memory.stopped();
    stopped.sort();
    assert_eq!(stopped, ["pa", "pb"]);
    assert!(local.exit_statuses.is_empty());
}

#[tokio::test]
async fn kill_during_start_leaves_the_reap_to_spawn() {
    let memory = Arc::new(MemoryBackend::remote());
    memory.set_exit_status("d", ProcessStatus::Exited(0));
    let latency = Duration::from_millis(200);
    let ctx = slow_fleet(&memory, latency);

    let supervisor =
        ProcessSupervisor::new(deployment("local", "d", &["a"]), &server(&ctx, "local"), config());
    let spawning = tokio::spawn({
        let supervisor = supervisor.clone();
        async move { supervisor.spawn().await }
    });
    let mut rx = supervisor.subscribe();
    rx.wait_for(|state| *state == SupervisorState::Spawning)
        .await
        .unwrap();

    // The start request is still in flight, so there is nothing to stop yet
    let started = Instant::now();
    supervisor.kill(true).await;
    assert!(started.elapsed() < latency, "kill waited {:?}", started.elapsed());
    assert!(supervisor.is_dead());
    assert!(memory.started().is_empty());

    // Once the backend answers, spawn stops the process it just started
    assert_ok!(spawning.await.unwrap());
    assert_eq!(memory.started(), ["d"]);
    assert_eq!(memory.stopped(), ["d"]);
    assert_eq!(supervisor.exit_status(), Some(ProcessStatus::Exited(0)));
    assert!(supervisor.is_dead());
}

#[tokio::test]
async fn configured_resolve_timeout_limits_wait_running() {
    let backend = Arc::new(MemoryBackend::unmanaged());
    let ctx = fleet("local", &backend, None);
    let limit = POLL * 5;
    let mut pool = SupervisorPool::new(config().with_resolve_timeout(Some(limit)));
    pool.spawn(&ctx, &deployment("local", "d", &["a"])).await.unwrap();

    let started = Instant::now();
    let err = pool.wait_running("d").await.unwrap_err();
    assert!(matches!(err, SupervisorError::ResolveTimeout { ref pending } if *pending == ["a"]));
    assert!(started.elapsed() >= limit, "gave up after {:?}", started.elapsed());
    assert!(matches!(
        pool.wait_running("missing").await,
        Err(SupervisorError::Registry(RegistryError::UnknownDeployment(_)))
    ));

    // The timeout only bounds the wait; resolution carries on
    backend.names().register(MemoryTaskRef::new("a"));
    let tasks = pool.get("d").unwrap().wait_running_default().await.unwrap();
    assert!(tasks.contains_key("a"));

    pool.kill_all(true).await;
}

#[tokio::test]
async fn known_tasks_are_listed_with_their_supervisor_state() {
    let backend = Arc::new(MemoryBackend::unmanaged());
    register_tasks(&backend, &["b", "a", "stray"]);
    let ctx = fleet("local", &backend, None);
    let local = server(&ctx, "local");
    let mut pool = SupervisorPool::new(config());
    pool.spawn(&ctx, &deployment("local", "d", &["a", "b"])).await.unwrap();
    pool.wait_running("d").await.unwrap();

    let listing: Vec<String> = pool
        .known_tasks(&local)
        .await
        .unwrap()
        .iter()
        .map(ToString::to_string)
        .collect();
    assert_eq!(
        listing,
        ["a (d, MONITORING)", "b (d, MONITORING)", "stray (unsupervised)"]
    );

    backend.names().set_unreachable(true);
    assert!(matches!(
        pool.known_tasks(&local).await,
        Err(LookupError::Communication(_))
    ));

    pool.kill_all(true).await;
}
