//! Integration tests for the worker supervisor against real subprocesses.
//!
//! Workers are `/bin/sh` scripts from `wavecrew-test-utils`, so these tests
//! only run on unix.

#![cfg(unix)]

use std::sync::Arc;
use std::time::Duration;

use wavecrew_core::hub::{ActivityKind, CHANNEL_WORKERS, Hub, HubEvent, Subscription};
use wavecrew_core::protocol::oversized_placeholder;
use wavecrew_core::worker::{
    CompletionKind, SupervisorError, SupervisorOptions, SupervisorState, TaskRequest, WorkerConfig, WorkerKind,
    WorkerSupervisor,
};
use wavecrew_test_utils::FakeWorker;

fn quick_options() -> SupervisorOptions {
    SupervisorOptions {
        shutdown_grace: Duration::from_millis(200),
        terminate_grace: Duration::from_millis(500),
        task_timeout: Duration::from_secs(10),
        join_timeout: Duration::from_millis(500),
        ..SupervisorOptions::default()
    }
}

fn supervisor_for(fake: &FakeWorker, config: impl FnOnce(WorkerConfig) -> WorkerConfig) -> (WorkerSupervisor, Subscription) {
    let hub = Arc::new(Hub::new());
    let sub = hub.connect(CHANNEL_WORKERS, 256);
    let cfg = config(WorkerConfig::new("w1", WorkerKind::Claude, fake.command()).with_args(fake.args()));
    (WorkerSupervisor::with_options(cfg, hub, quick_options()), sub)
}

fn task(touch: &str) -> TaskRequest {
    let mut task = TaskRequest::new("obj-1", "Feature: login");
    task.scope_touch = vec![touch.to_string()];
    task
}

/// Drain hub events until `pred` matches or `within` elapses.
async fn wait_for(sub: &mut Subscription, within: Duration, pred: impl Fn(&HubEvent) -> bool) -> Option<HubEvent> {
    tokio::time::timeout(within, async {
        while let Some(event) = sub.recv().await {
            if pred(&event) {
                return Some(event);
            }
        }
        None
    })
    .await
    .ok()
    .flatten()
}

#[tokio::test]
async fn responsive_worker_runs_a_task_end_to_end() {
    let fake = FakeWorker::responsive(Duration::from_millis(50));
    let (sup, mut sub) = supervisor_for(&fake, |c| c);

    sup.start().await.expect("start");
    assert_eq!(sup.state(), SupervisorState::Running);
    assert!(sup.pid().await.is_some());

    let tools = sup.list_tools(Duration::from_secs(5)).await.expect("list_tools");
    let names: Vec<&str> = tools.iter().map(|t| t.name.as_str()).collect();
    assert_eq!(names, vec!["edit_file", "run_tests"]);
    assert_eq!(sup.pending_requests(), 0);

    let outcome = sup.execute_task(task("src/auth/")).await.expect("execute_task");
    assert!(outcome.success, "{outcome:?}");
    assert_eq!(outcome.worker_id, "w1");
    assert_eq!(outcome.files_modified, vec!["src/auth/CHANGES.md".to_string()]);
    assert_eq!(outcome.completion, CompletionKind::Signalled);
    let tests = outcome.test_results.expect("test results");
    assert_eq!((tests.total, tests.passed, tests.failed), (2, 2, 0));

    let metrics = sup.metrics();
    assert_eq!(metrics.tasks_completed, 1);
    assert_eq!(metrics.tools_used.get("edit_file"), Some(&1));
    assert_eq!(metrics.files_modified, vec!["src/auth/CHANGES.md".to_string()]);

    let started = wait_for(&mut sub, Duration::from_secs(2), |e| {
        matches!(e, HubEvent::WorkerActivity(a) if a.activity_type == ActivityKind::TaskStarted)
    })
    .await;
    assert!(started.is_some(), "no task_started activity on the hub");

    sup.stop().await.expect("stop");
    assert_eq!(sup.state(), SupervisorState::Stopped);
    assert_eq!(sup.pending_tasks(), 0);
}

#[tokio::test]
async fn concurrent_tasks_are_correlated_by_task_id() {
    let fake = FakeWorker::responsive(Duration::from_millis(100));
    let (sup, _sub) = supervisor_for(&fake, |c| c.with_max_concurrent_tasks(3));
    sup.start().await.expect("start");

    let (a, b, c) = tokio::join!(
        sup.execute_task(task("src/a/")),
        sup.execute_task(task("src/b/")),
        sup.execute_task(task("src/c/")),
    );
    assert_eq!(a.expect("a").files_modified, vec!["src/a/CHANGES.md".to_string()]);
    assert_eq!(b.expect("b").files_modified, vec!["src/b/CHANGES.md".to_string()]);
    assert_eq!(c.expect("c").files_modified, vec!["src/c/CHANGES.md".to_string()]);
    assert_eq!(sup.metrics().tasks_completed, 3);

    sup.stop().await.expect("stop");
}

#[tokio::test]
async fn task_error_is_a_failed_outcome_not_an_error() {
    let fake = FakeWorker::failing();
    let (sup, mut sub) = supervisor_for(&fake, |c| c);
    sup.start().await.expect("start");

    let outcome = sup.execute_task(task("src/")).await.expect("execute_task");
    assert!(!outcome.success);
    assert_eq!(outcome.error.as_deref(), Some("simulated failure"));
    assert_eq!(sup.metrics().tasks_failed, 1);

    let error = wait_for(&mut sub, Duration::from_secs(2), |e| matches!(e, HubEvent::WorkerError(_))).await;
    match error {
        Some(HubEvent::WorkerError(e)) => assert!(e.error.contains("simulated failure"), "{}", e.error),
        other => panic!("expected worker_error, got {other:?}"),
    }

    sup.stop().await.expect("stop");
}

#[tokio::test]
async fn tool_discovery_times_out_and_clears_the_slot() {
    let fake = FakeWorker::silent();
    let (sup, _sub) = supervisor_for(&fake, |c| c);
    sup.start().await.expect("start");

    let err = sup.list_tools(Duration::from_millis(200)).await.unwrap_err();
    assert!(matches!(err, SupervisorError::ToolDiscoveryTimeout { .. }), "{err}");
    assert_eq!(sup.pending_requests(), 0);
    assert!(sup.is_running());

    sup.stop().await.expect("stop");
}

#[tokio::test]
async fn echo_is_not_a_worker_but_still_starts() {
    let hub = Arc::new(Hub::new());
    let cfg = WorkerConfig::new("echo", WorkerKind::Codex, "echo").with_args(["hello"]);
    let sup = WorkerSupervisor::with_options(cfg, hub, quick_options());
    sup.start().await.expect("start");

    let started = std::time::Instant::now();
    let err = sup.list_tools(Duration::from_secs(1)).await.unwrap_err();
    assert!(matches!(err, SupervisorError::ToolDiscoveryTimeout { .. }), "{err}");
    assert!(started.elapsed() < Duration::from_secs(3));
    assert_eq!(sup.pending_requests(), 0);

    sup.stop().await.expect("stop");
}

#[tokio::test]
async fn worker_without_completion_signal_is_assumed_done() {
    let fake = FakeWorker::silent();
    let (sup, _sub) = supervisor_for(&fake, |c| c.without_completion_signal(Duration::from_millis(200)));
    sup.start().await.expect("start");

    let outcome = sup.execute_task(task("docs/")).await.expect("execute_task");
    assert!(outcome.success);
    assert_eq!(outcome.completion, CompletionKind::Assumed);
    assert_eq!(outcome.files_modified, vec!["docs/".to_string()]);
    assert_eq!(sup.pending_tasks(), 0);

    sup.stop().await.expect("stop");
}

#[tokio::test]
async fn late_completion_of_an_assumed_task_is_counted_once() {
    let fake = FakeWorker::responsive(Duration::from_millis(600));
    let (sup, mut sub) = supervisor_for(&fake, |c| c.without_completion_signal(Duration::from_millis(100)));
    sup.start().await.expect("start");

    let outcome = sup.execute_task(task("src/")).await.expect("execute_task");
    assert_eq!(outcome.completion, CompletionKind::Assumed);
    assert_eq!(sup.metrics().tasks_completed, 1);

    let late = wait_for(&mut sub, Duration::from_secs(3), |e| {
        matches!(e, HubEvent::WorkerActivity(a) if a.activity_type == ActivityKind::TaskComplete)
    })
    .await;
    assert!(late.is_some(), "worker never reported the task");
    let metrics = sup.metrics();
    assert_eq!((metrics.tasks_completed, metrics.tasks_failed), (1, 0));

    sup.stop().await.expect("stop");
}

#[tokio::test]
async fn stop_releases_in_flight_requests_and_tasks() {
    let fake = FakeWorker::silent();
    let (sup, _sub) = supervisor_for(&fake, |c| c);
    let sup = Arc::new(sup);
    sup.start().await.expect("start");

    let tools = tokio::spawn({
        let sup = Arc::clone(&sup);
        async move { sup.list_tools(Duration::from_secs(30)).await }
    });
    let work = tokio::spawn({
        let sup = Arc::clone(&sup);
        async move { sup.execute_task(task("src/")).await }
    });
    tokio::time::timeout(Duration::from_secs(2), async {
        while sup.pending_requests() == 0 || sup.pending_tasks() == 0 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("requests were never registered");

    tokio::time::timeout(Duration::from_secs(5), sup.stop())
        .await
        .expect("stop should not wait on in-flight work")
        .expect("stop");

    let tools = tokio::time::timeout(Duration::from_secs(2), tools)
        .await
        .expect("list_tools still waiting")
        .expect("join list_tools");
    assert!(matches!(tools, Err(SupervisorError::Cancelled { .. })), "{tools:?}");

    let work = tokio::time::timeout(Duration::from_secs(2), work)
        .await
        .expect("execute_task still waiting")
        .expect("join execute_task");
    assert!(matches!(work, Err(SupervisorError::Cancelled { .. })), "{work:?}");

    assert_eq!(sup.pending_requests(), 0);
    assert_eq!(sup.pending_tasks(), 0);
    assert_eq!(sup.state(), SupervisorState::Stopped);
}

fn sort_output(event: HubEvent, logs: &mut Vec<String>, errors: &mut Vec<String>) {
    match event {
        HubEvent::WorkerActivity(a) if a.activity_type == ActivityKind::Log => logs.push(a.description),
        HubEvent::WorkerError(e) => errors.push(e.error),
        _ => {}
    }
}

#[tokio::test]
async fn over_long_lines_do_not_stop_the_readers() {
    let fake = FakeWorker::flooding();
    let (sup, mut sub) = supervisor_for(&fake, |c| c);
    sup.start().await.expect("start");

    let outcome = sup.execute_task(task("src/")).await.expect("execute_task");
    assert!(outcome.success, "{outcome:?}");
    assert_eq!(outcome.completion, CompletionKind::Signalled);
    assert_eq!(sup.state(), SupervisorState::Running);

    let mut logs = Vec::new();
    let mut errors = Vec::new();
    for event in sub.drain() {
        sort_output(event, &mut logs, &mut errors);
    }
    if !errors.iter().any(|e| e == "stderr still flowing") {
        let stderr = wait_for(&mut sub, Duration::from_secs(3), |e| {
            matches!(e, HubEvent::WorkerError(w) if w.error == "stderr still flowing")
        })
        .await;
        if let Some(event) = stderr {
            sort_output(event, &mut logs, &mut errors);
        }
    }

    assert!(logs.contains(&oversized_placeholder()), "{logs:?}");
    assert!(logs.iter().any(|l| l == "after the flood"), "{logs:?}");
    assert!(logs.iter().all(|l| l.len() < 1024), "over-long line leaked through");
    assert!(errors.iter().any(|e| e == "stderr still flowing"), "{errors:?}");

    sup.stop().await.expect("stop");
}

#[tokio::test]
async fn crash_mid_task_fails_the_waiter() {
    let fake = FakeWorker::crashing();
    let (sup, mut sub) = supervisor_for(&fake, |c| c);
    sup.start().await.expect("start");

    let err = sup.execute_task(task("src/")).await.unwrap_err();
    assert!(matches!(err, SupervisorError::Cancelled { .. }), "{err}");
    assert_eq!(sup.pending_tasks(), 0);

    let stderr = wait_for(&mut sub, Duration::from_secs(2), |e| {
        matches!(e, HubEvent::WorkerError(w) if w.error.contains("worker crashed"))
    })
    .await;
    assert!(stderr.is_some(), "stderr line not broadcast");

    sup.stop().await.expect("stop");
    assert_eq!(sup.state(), SupervisorState::Stopped);
}

#[tokio::test]
async fn non_protocol_output_becomes_log_activity() {
    let fake = FakeWorker::chatty();
    let (sup, mut sub) = supervisor_for(&fake, |c| c);
    sup.start().await.expect("start");

    let outcome = sup.execute_task(task("src/")).await.expect("execute_task");
    assert!(outcome.success);

    let mut logs = Vec::new();
    let mut warnings = Vec::new();
    for event in sub.drain() {
        if let HubEvent::WorkerActivity(a) = event {
            match a.activity_type {
                ActivityKind::Log => logs.push(a.description),
                ActivityKind::Warning => warnings.push(a.description),
                _ => {}
            }
        }
    }
    assert!(logs.iter().any(|l| l == "thinking about it"), "{logs:?}");
    assert!(logs.iter().any(|l| l.starts_with("{\"type\":")), "malformed JSON should surface as text: {logs:?}");
    assert_eq!(warnings, vec!["careful now".to_string()]);

    sup.stop().await.expect("stop");
}

#[tokio::test]
async fn stop_escalates_to_kill_for_stubborn_workers() {
    let fake = FakeWorker::stubborn();
    let (sup, _sub) = supervisor_for(&fake, |c| c);
    sup.start().await.expect("start");

    tokio::time::timeout(Duration::from_secs(10), sup.stop())
        .await
        .expect("stop should not hang")
        .expect("stop");
    assert_eq!(sup.state(), SupervisorState::Stopped);

    // Stopping twice is fine.
    sup.stop().await.expect("second stop");
}

#[tokio::test]
async fn missing_binary_fails_start() {
    let hub = Arc::new(Hub::new());
    let sup = WorkerSupervisor::new(
        WorkerConfig::new("ghost", WorkerKind::Codex, "/definitely/not/a/real/binary"),
        hub,
    );

    let err = sup.start().await.unwrap_err();
    assert!(matches!(err, SupervisorError::Startup { .. }), "{err}");
    assert_eq!(sup.state(), SupervisorState::Errored);

    let err = sup.execute_task(task("src/")).await.unwrap_err();
    assert!(matches!(err, SupervisorError::NotRunning { .. }), "{err}");
}
