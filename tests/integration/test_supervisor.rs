use futures::future::join_all;
use std::fs;
use std::time::Duration;
use tempfile::TempDir;
use toolgate::core::{
    CircuitState, CommandRequest, FailureKind, ProcessSupervisor, SupervisorConfig, Tool,
    ToolBinaries, EXIT_CODE_NOT_RUN,
};

/// Every tool resolves to `sh`, so `git -c <script>` runs a shell script.
fn sh_supervisor(config: SupervisorConfig) -> ProcessSupervisor {
    ProcessSupervisor::new(config, ToolBinaries::all("sh")).unwrap()
}

fn sh(script: &str) -> CommandRequest {
    CommandRequest::new(Tool::Git, ["-c", script])
}

async fn wait_until(mut condition: impl FnMut() -> bool) {
    for _ in 0..500 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached within 5s");
}

#[tokio::test]
async fn test_destroyed_supervisor_rejects_without_spawning() {
    let supervisor = sh_supervisor(SupervisorConfig::default());
    supervisor.destroy();
    supervisor.destroy();
    assert!(supervisor.is_destroyed());

    let result = supervisor.execute(sh("echo should-not-run")).await;

    assert!(!result.success);
    assert_eq!(result.exit_code, EXIT_CODE_NOT_RUN);
    assert_eq!(result.failure, Some(FailureKind::Destroyed));
    assert!(result.error.unwrap().contains("shut down"));
    assert_eq!(supervisor.process_stats().spawned, 0);
    assert!(supervisor.stats().destroyed);
}

#[tokio::test]
async fn test_breaker_opens_after_sequential_failures() {
    let supervisor = sh_supervisor(SupervisorConfig {
        max_concurrency: 1,
        circuit_breaker_threshold: 2,
        ..Default::default()
    });

    let (first, second) = tokio::join!(
        supervisor.execute(sh("sleep 0.05; exit 3")),
        supervisor.execute(sh("exit 4"))
    );
    assert_eq!(first.exit_code, 3);
    assert_eq!(second.exit_code, 4);
    assert_eq!(supervisor.circuit_state(), CircuitState::Open);

    let third = supervisor.execute(sh("echo never")).await;
    assert!(!third.success);
    assert_eq!(third.failure, Some(FailureKind::CircuitOpen));
    assert_eq!(third.exit_code, EXIT_CODE_NOT_RUN);
    assert!(third.error.unwrap().contains("circuit breaker is open"));

    let stats = supervisor.stats();
    assert_eq!(stats.processes.spawned, 2);
    assert_eq!(stats.processes.failed, 2);
    assert_eq!(stats.circuit_breaker.failures, 2);
}

#[tokio::test]
async fn test_limiter_admits_in_arrival_order() {
    let temp = TempDir::new().unwrap();
    let log = temp.path().join("order.log");
    let supervisor = sh_supervisor(SupervisorConfig {
        max_concurrency: 1,
        ..Default::default()
    });

    let requests: Vec<_> = (0..4)
        .map(|i| {
            let script = if i == 0 {
                format!("sleep 0.1; echo {} >> '{}'", i, log.display())
            } else {
                format!("echo {} >> '{}'", i, log.display())
            };
            supervisor.execute(sh(&script))
        })
        .collect();
    let results = join_all(requests).await;

    assert!(results.iter().all(|r| r.success), "{results:?}");
    assert_eq!(fs::read_to_string(&log).unwrap(), "0\n1\n2\n3\n");
    let limiter = supervisor.stats().limiter;
    assert_eq!(limiter.active, 0);
    assert_eq!(limiter.queued, 0);
}

#[tokio::test]
async fn test_concurrency_never_exceeds_limit() {
    let supervisor = sh_supervisor(SupervisorConfig {
        max_concurrency: 2,
        ..Default::default()
    });

    let requests: Vec<_> = (0..5)
        .map(|_| supervisor.execute(sh("sleep 0.1")))
        .collect();
    let watcher = supervisor.clone();
    let observed = tokio::spawn(async move {
        let mut peak = 0;
        for _ in 0..60 {
            peak = peak.max(watcher.process_stats().live);
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        peak
    });

    let results = join_all(requests).await;
    assert!(results.iter().all(|r| r.success));
    assert!(observed.await.unwrap() <= 2);
    assert_eq!(supervisor.process_stats().spawned, 5);
}

#[tokio::test]
async fn test_dedupe_coalesces_identical_requests() {
    let supervisor = sh_supervisor(SupervisorConfig::default());
    let request = sh("sleep 0.1; printf '{\"head\":\"abc123\"}'").with_dedupe(true);

    let (a, b) = tokio::join!(
        supervisor.execute(request.clone()),
        supervisor.execute(request)
    );

    assert!(a.success);
    assert_eq!(a, b);
    assert_eq!(a.data, Some(serde_json::json!({"head": "abc123"})));
    assert_eq!(supervisor.process_stats().spawned, 1);
    assert_eq!(supervisor.stats().deduped_in_flight, 0);
}

#[tokio::test]
async fn test_requests_without_dedupe_spawn_separately() {
    let supervisor = sh_supervisor(SupervisorConfig::default());
    let (a, b) = tokio::join!(
        supervisor.execute(sh("echo same")),
        supervisor.execute(sh("echo same"))
    );
    assert!(a.success && b.success);
    assert_eq!(supervisor.process_stats().spawned, 2);
}

#[tokio::test]
async fn test_shutdown_kills_live_process_and_clears_queue() {
    let supervisor = sh_supervisor(SupervisorConfig {
        max_concurrency: 1,
        ..Default::default()
    });

    let running = tokio::spawn({
        let supervisor = supervisor.clone();
        async move { supervisor.execute(sh("exec sleep 30")).await }
    });
    wait_until(|| supervisor.process_stats().live == 1).await;

    let queued = tokio::spawn({
        let supervisor = supervisor.clone();
        async move { supervisor.execute(sh("echo queued")).await }
    });
    wait_until(|| supervisor.stats().limiter.queued == 1).await;

    supervisor.shutdown(Duration::from_secs(5)).await;

    let running = running.await.unwrap();
    assert!(!running.success);
    assert_eq!(running.failure, Some(FailureKind::Killed));
    assert_eq!(running.exit_code, EXIT_CODE_NOT_RUN);
    assert!(running.duration_ms < 30_000);

    let queued = queued.await.unwrap();
    assert_eq!(queued.failure, Some(FailureKind::QueueCleared));
    assert!(queued.is_retryable());

    let stats = supervisor.process_stats();
    assert_eq!(stats.live, 0);
    assert_eq!(stats.killed, 1);
    assert_eq!(stats.spawned, 1);
    // Shutdown kills do not count against the breaker.
    assert_eq!(supervisor.circuit_state(), CircuitState::Closed);
}

#[tokio::test]
async fn test_output_is_capped() {
    let supervisor = sh_supervisor(SupervisorConfig {
        max_output_bytes: 16,
        ..Default::default()
    });

    let result = supervisor
        .execute(sh("head -c 4096 /dev/zero | tr '\\0' a"))
        .await;

    assert!(result.success, "{result:?}");
    assert!(result.truncated);
    assert_eq!(result.data, Some(serde_json::Value::String("a".repeat(16))));
}

#[tokio::test]
async fn test_live_process_is_listed_in_stats() {
    let supervisor = sh_supervisor(SupervisorConfig::default());
    let running = tokio::spawn({
        let supervisor = supervisor.clone();
        async move { supervisor.execute(sh("sleep 0.3")).await }
    });
    wait_until(|| supervisor.process_stats().live == 1).await;

    let stats = supervisor.process_stats();
    assert_eq!(stats.processes.len(), 1);
    let info = &stats.processes[0];
    assert_eq!(info.tool, Tool::Git);
    assert!(info.pid.is_some());
    assert_eq!(info.command, "sh -c 'sleep 0.3'");

    assert!(running.await.unwrap().success);
    assert_eq!(supervisor.process_stats().live, 0);
    assert_eq!(supervisor.process_stats().succeeded, 1);
}

#[tokio::test]
async fn test_abandoned_dedupe_run_still_finishes_and_frees_its_slot() {
    let supervisor = sh_supervisor(SupervisorConfig {
        max_concurrency: 1,
        default_timeout_ms: 300,
        ..Default::default()
    });

    let abandoned = tokio::time::timeout(
        Duration::from_millis(50),
        supervisor.execute(sh("exec sleep 5").with_dedupe(true)),
    )
    .await;
    assert!(abandoned.is_err());

    wait_until(|| supervisor.stats().deduped_in_flight == 0).await;
    let stats = supervisor.stats();
    assert_eq!(stats.processes.live, 0);
    assert_eq!(stats.processes.timed_out, 1);
    assert_eq!(stats.limiter.active, 0);

    let next = tokio::time::timeout(Duration::from_secs(3), supervisor.execute(sh("echo hi")))
        .await
        .expect("request after an abandoned run should be admitted");
    assert!(next.success, "{next:?}");
}

#[tokio::test]
async fn test_abandoned_half_open_trial_does_not_wedge_the_breaker() {
    let supervisor = sh_supervisor(SupervisorConfig {
        circuit_breaker_threshold: 1,
        circuit_breaker_reset_ms: 100,
        ..Default::default()
    });
    let failed = supervisor.execute(sh("exit 1")).await;
    assert_eq!(failed.failure, Some(FailureKind::NonZeroExit));
    assert_eq!(supervisor.circuit_state(), CircuitState::Open);

    tokio::time::sleep(Duration::from_millis(150)).await;
    let abandoned = tokio::time::timeout(
        Duration::from_millis(50),
        supervisor.execute(sh("exec sleep 5")),
    )
    .await;
    assert!(abandoned.is_err());
    assert_eq!(supervisor.circuit_state(), CircuitState::HalfOpen);
    assert_eq!(supervisor.process_stats().live, 0);

    let next = supervisor.execute(sh("echo recovered")).await;
    assert!(next.success, "{next:?}");
    assert_eq!(supervisor.circuit_state(), CircuitState::Closed);
}

#[tokio::test]
async fn test_abandoned_queued_request_leaves_the_queue_usable() {
    let supervisor = sh_supervisor(SupervisorConfig {
        max_concurrency: 1,
        ..Default::default()
    });
    let running = tokio::spawn({
        let supervisor = supervisor.clone();
        async move { supervisor.execute(sh("sleep 0.2")).await }
    });
    wait_until(|| supervisor.process_stats().live == 1).await;

    let abandoned = tokio::time::timeout(
        Duration::from_millis(20),
        supervisor.execute(sh("echo never")),
    )
    .await;
    assert!(abandoned.is_err());
    assert_eq!(supervisor.stats().limiter.queued, 1);

    assert!(running.await.unwrap().success);
    let after = supervisor.execute(sh("echo next")).await;
    assert!(after.success);
    let stats = supervisor.stats();
    assert_eq!(stats.limiter.active, 0);
    assert_eq!(stats.limiter.queued, 0);
    assert_eq!(stats.processes.spawned, 2);
}

#[tokio::test]
async fn test_signal_termination_counts_as_failure() {
    let supervisor = sh_supervisor(SupervisorConfig {
        circuit_breaker_threshold: 1,
        ..Default::default()
    });

    let result = supervisor.execute(sh("kill -9 $$")).await;

    assert!(!result.success);
    assert_eq!(result.failure, Some(FailureKind::Signaled));
    assert_eq!(result.exit_code, EXIT_CODE_NOT_RUN);
    assert!(result.error.as_ref().unwrap().contains("terminated by a signal"));
    assert!(!result.is_retryable());
    assert_eq!(supervisor.process_stats().failed, 1);
    assert_eq!(supervisor.circuit_state(), CircuitState::Open);
}
