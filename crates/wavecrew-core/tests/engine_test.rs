//! Integration tests for the phase engine: full cycles, the wave barrier,
//! cancellation, failure paths and the documentation collaborators.

use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use anyhow::bail;
use async_trait::async_trait;
use futures::StreamExt;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use wavecrew_core::analysis::TaskType;
use wavecrew_core::docs::{AgentsLog, ProseWriter};
use wavecrew_core::engine::{
    AccomplishmentReport, AnalysisReport, CANCELLED, CoordinationPlan, Dispatcher, EngineConfig, IntegrationStatus,
    OrchestratorStatus, Phase, PhaseEngine, ProgressEvent, RunRequest,
};
use wavecrew_core::scope::{Objective, WorkerTarget};
use wavecrew_core::store::{MemoryStore, OrchestrationRecord, Store};
use wavecrew_core::worker::{CompletionKind, TaskOutcome, TaskRequest, TestCounts, WorkerKind};

// ===========================================================================
// Test doubles
// ===========================================================================

#[derive(Debug, Clone)]
struct Span {
    objective_id: String,
    started: Instant,
    finished: Instant,
}

/// Dispatcher that "modifies" one file per touch scope after `delay`.
#[derive(Default)]
struct ScriptedDispatcher {
    delay: Duration,
    failing: HashSet<String>,
    unroutable: bool,
    spans: Mutex<Vec<Span>>,
    halted: Mutex<Vec<String>>,
}

impl ScriptedDispatcher {
    fn with_delay(delay: Duration) -> Self {
        Self {
            delay,
            ..Self::default()
        }
    }

    fn span(&self, objective_id: &str) -> Span {
        self.spans
            .lock()
            .unwrap()
            .iter()
            .find(|s| s.objective_id == objective_id)
            .cloned()
            .unwrap_or_else(|| panic!("objective {objective_id} never ran"))
    }
}

#[async_trait]
impl Dispatcher for ScriptedDispatcher {
    fn route(&self, target: &WorkerTarget) -> Option<String> {
        if self.unroutable {
            return None;
        }
        Some(format!("{target}-1"))
    }

    async fn dispatch(&self, worker_id: &str, task: TaskRequest) -> anyhow::Result<TaskOutcome> {
        let started = Instant::now();
        tokio::time::sleep(self.delay).await;
        self.spans.lock().unwrap().push(Span {
            objective_id: task.objective_id.clone(),
            started,
            finished: Instant::now(),
        });

        let success = !self.failing.contains(&task.objective_id);
        Ok(TaskOutcome {
            task_id: task.task_id,
            worker_id: worker_id.to_string(),
            success,
            files_modified: task
                .scope_touch
                .iter()
                .map(|t| format!("{}/mod.rs", t.trim_end_matches('/')))
                .collect(),
            error: (!success).then(|| "tests did not pass".to_string()),
            test_results: Some(TestCounts {
                total: 3,
                passed: if success { 3 } else { 1 },
                failed: if success { 0 } else { 2 },
            }),
            duration_secs: self.delay.as_secs_f64(),
            completion: CompletionKind::Signalled,
        })
    }

    async fn halt(&self, worker_ids: &[String]) {
        self.halted.lock().unwrap().extend(worker_ids.iter().cloned());
    }
}

/// Store that refuses to save plans.
struct PlanRejectingStore(MemoryStore);

#[async_trait]
impl Store for PlanRejectingStore {
    async fn create_orchestration(&self, record: &OrchestrationRecord) -> anyhow::Result<()> {
        self.0.create_orchestration(record).await
    }
    async fn update_orchestration(&self, record: &OrchestrationRecord) -> anyhow::Result<()> {
        self.0.update_orchestration(record).await
    }
    async fn get_orchestration(&self, id: Uuid) -> anyhow::Result<Option<OrchestrationRecord>> {
        self.0.get_orchestration(id).await
    }
    async fn list_orchestrations(&self) -> anyhow::Result<Vec<OrchestrationRecord>> {
        self.0.list_orchestrations().await
    }
    async fn append_status(&self, id: Uuid, status: &OrchestratorStatus) -> anyhow::Result<()> {
        self.0.append_status(id, status).await
    }
    async fn status_history(&self, id: Uuid) -> anyhow::Result<Vec<OrchestratorStatus>> {
        self.0.status_history(id).await
    }
    async fn save_analysis(&self, report: &AnalysisReport) -> anyhow::Result<()> {
        self.0.save_analysis(report).await
    }
    async fn save_plan(&self, _plan: &CoordinationPlan) -> anyhow::Result<()> {
        bail!("disk full")
    }
    async fn save_accomplishment(&self, report: &AccomplishmentReport) -> anyhow::Result<()> {
        self.0.save_accomplishment(report).await
    }
}

struct CannedProse(&'static str);

#[async_trait]
impl ProseWriter for CannedProse {
    async fn write(&self, _prompt: &str, context: &serde_json::Value) -> anyhow::Result<String> {
        assert!(context.get("request").is_some());
        Ok(self.0.to_string())
    }
}

// ===========================================================================
// Helpers
// ===========================================================================

async fn run(engine: PhaseEngine, request: RunRequest) -> Vec<ProgressEvent> {
    engine.run(request, CancellationToken::new()).collect().await
}

fn accomplishment(events: &[ProgressEvent]) -> &AccomplishmentReport {
    match events.last() {
        Some(ProgressEvent::CycleComplete { accomplishment }) => accomplishment,
        other => panic!("expected cycle_complete, got {other:?}"),
    }
}

fn failure(events: &[ProgressEvent]) -> (Phase, &str) {
    match events.last() {
        Some(ProgressEvent::Failed { phase, error, .. }) => (*phase, error.as_str()),
        other => panic!("expected failed, got {other:?}"),
    }
}

fn conflicting_objectives() -> Vec<Objective> {
    vec![
        Objective::new("obj-1", "Core rewrite", WorkerTarget::Kind(WorkerKind::Claude)).touching(["src/"]),
        Objective::new("obj-2", "API endpoints", WorkerTarget::Kind(WorkerKind::Codex)).touching(["src/api/"]),
        Objective::new("obj-3", "Docs", WorkerTarget::Auto).touching(["docs/"]),
    ]
}

// ===========================================================================
// Tests
// ===========================================================================

#[tokio::test]
async fn full_cycle_with_a_dispatcher_completes() {
    let store = Arc::new(MemoryStore::new());
    let dispatcher = Arc::new(ScriptedDispatcher::with_delay(Duration::from_millis(10)));
    let engine = PhaseEngine::new(EngineConfig::default())
        .with_store(store.clone())
        .with_dispatcher(dispatcher.clone());
    let id = engine.orchestration_id();

    let events = run(engine, RunRequest::new("add a login page")).await;
    let report = accomplishment(&events);

    assert_eq!(report.integration_status, IntegrationStatus::Success);
    assert_eq!(report.objectives_completed.len(), 1);
    assert_eq!(report.files_modified, vec!["src/mod.rs".to_string()]);
    assert_eq!(report.test_results.status, "passed");
    assert_eq!(report.quality_gates.get("objectives").map(String::as_str), Some("1/1"));
    assert_eq!(report.quality_gates.get("scope_audit").map(String::as_str), Some("passed"));
    assert!(report.commit_message.starts_with("feat: "), "{}", report.commit_message);
    assert_eq!(report.summary, "Completed feature: add a login page");

    assert_eq!(store.analyses().len(), 1);
    assert_eq!(store.plans().len(), 1);
    assert_eq!(store.accomplishments().len(), 1);
    let record = store.get_orchestration(id).await.unwrap().expect("record");
    assert_eq!(record.phase, Phase::Completed);
    assert_eq!(record.accomplishment_id, Some(report.accomplishment_id));

    let history = store.status_history(id).await.unwrap();
    assert_eq!(history.last().map(|s| s.phase), Some(Phase::Completed));

    let task_type = events.iter().find_map(|e| match e {
        ProgressEvent::TaskTypeDetermined { task_type } => Some(*task_type),
        _ => None,
    });
    assert_eq!(task_type, Some(TaskType::Feature));
}

#[tokio::test]
async fn phases_start_in_order_and_each_completes() {
    let dispatcher = Arc::new(ScriptedDispatcher::default());
    let engine = PhaseEngine::new(EngineConfig::default()).with_dispatcher(dispatcher);
    let events = run(engine, RunRequest::new("add a login page")).await;

    let started: Vec<Phase> = events
        .iter()
        .filter_map(|e| match e {
            ProgressEvent::PhaseStart { phase } => Some(*phase),
            _ => None,
        })
        .collect();
    let completed: Vec<Phase> = events
        .iter()
        .filter_map(|e| match e {
            ProgressEvent::PhaseComplete { phase, .. } => Some(*phase),
            _ => None,
        })
        .collect();
    let expected = vec![
        Phase::Analytic,
        Phase::Planning,
        Phase::Validation,
        Phase::Execution,
        Phase::Integration,
        Phase::PostExecution,
        Phase::AutoDocumentation,
    ];
    assert_eq!(started, expected);
    assert_eq!(completed, expected);

    let artifacts: Vec<(Phase, bool, bool)> = events
        .iter()
        .filter_map(|e| match e {
            ProgressEvent::PhaseComplete { phase, report, plan } => Some((*phase, report.is_some(), plan.is_some())),
            _ => None,
        })
        .filter(|(_, r, p)| *r || *p)
        .collect();
    assert_eq!(artifacts, vec![(Phase::Analytic, true, false), (Phase::Validation, false, true)]);
}

#[tokio::test]
async fn conflicting_objectives_are_deferred_and_waves_are_barriers() {
    let dispatcher = Arc::new(ScriptedDispatcher::with_delay(Duration::from_millis(50)));
    let engine = PhaseEngine::new(EngineConfig::default()).with_dispatcher(dispatcher.clone());
    let events = run(
        engine,
        RunRequest::new("rework the service").with_objectives(conflicting_objectives()),
    )
    .await;
    let report = accomplishment(&events);
    assert_eq!(report.integration_status, IntegrationStatus::Success);

    let deferred = events.iter().find_map(|e| match e {
        ProgressEvent::ConflictsResolved { passes, deferred } => Some((*passes, deferred.clone())),
        _ => None,
    });
    let (passes, deferred) = deferred.expect("conflicts_resolved");
    assert_eq!(passes, 1);
    assert_eq!(deferred.len(), 1);
    assert_eq!(deferred[0].objective_id, "obj-2");
    assert_eq!((deferred[0].from_wave, deferred[0].to_wave), (1, 2));

    let validations: Vec<bool> = events
        .iter()
        .filter_map(|e| match e {
            ProgressEvent::ScopeValidated { valid, .. } => Some(*valid),
            _ => None,
        })
        .collect();
    assert_eq!(validations, vec![false, true]);

    // Wave 2 starts only after every wave 1 objective finished.
    let core = dispatcher.span("obj-1");
    let docs = dispatcher.span("obj-3");
    let api = dispatcher.span("obj-2");
    assert!(api.started >= core.finished);
    assert!(api.started >= docs.finished);

    let waves: Vec<(u32, usize)> = events
        .iter()
        .filter_map(|e| match e {
            ProgressEvent::WaveStarted { wave, objectives, .. } => Some((*wave, objectives.len())),
            _ => None,
        })
        .collect();
    assert_eq!(waves, vec![(1, 2), (2, 1)]);

    // wave_completed for wave 1 precedes wave_started for wave 2.
    let position = |pred: &dyn Fn(&ProgressEvent) -> bool| events.iter().position(pred).expect("event");
    let wave1_done = position(&|e| matches!(e, ProgressEvent::WaveCompleted { wave: 1, .. }));
    let wave2_start = position(&|e| matches!(e, ProgressEvent::WaveStarted { wave: 2, .. }));
    assert!(wave1_done < wave2_start);
}

#[tokio::test]
async fn failed_objectives_still_complete_the_cycle() {
    let dispatcher = Arc::new(ScriptedDispatcher {
        failing: HashSet::from(["obj-3".to_string()]),
        ..ScriptedDispatcher::default()
    });
    let engine = PhaseEngine::new(EngineConfig::default()).with_dispatcher(dispatcher);
    let events = run(
        engine,
        RunRequest::new("rework the service").with_objectives(conflicting_objectives()),
    )
    .await;
    let report = accomplishment(&events);

    assert_eq!(report.integration_status, IntegrationStatus::Partial);
    assert_eq!(report.objectives_failed, vec!["Docs".to_string()]);
    assert_eq!(report.test_results.status, "failed");
    assert_eq!((report.test_results.total, report.test_results.failed), (9, 2));
    assert!(report.known_issues.iter().any(|i| i == "Docs: tests did not pass"), "{:?}", report.known_issues);
    assert!(report.next_steps.contains(&"Retry: Docs".to_string()));
    assert_eq!(report.quality_gates.get("objectives").map(String::as_str), Some("2/3"));
}

#[tokio::test]
async fn unroutable_objectives_fail_without_dispatch() {
    let dispatcher = Arc::new(ScriptedDispatcher {
        unroutable: true,
        ..ScriptedDispatcher::default()
    });
    let engine = PhaseEngine::new(EngineConfig::default()).with_dispatcher(dispatcher.clone());
    let events = run(engine, RunRequest::new("add a login page")).await;
    let report = accomplishment(&events);

    assert_eq!(report.integration_status, IntegrationStatus::Failed);
    assert!(dispatcher.spans.lock().unwrap().is_empty());
    let completed = events.iter().find_map(|e| match e {
        ProgressEvent::ObjectiveCompleted { worker_id, error, .. } => Some((worker_id.clone(), error.clone())),
        _ => None,
    });
    let (worker_id, error) = completed.expect("objective_completed");
    assert_eq!(worker_id, None);
    assert!(error.unwrap_or_default().contains("no running worker"));
}

#[tokio::test]
async fn slow_objectives_time_out_as_failures() {
    let dispatcher = Arc::new(ScriptedDispatcher::with_delay(Duration::from_secs(5)));
    let config = EngineConfig {
        task_timeout: Duration::from_millis(100),
        ..EngineConfig::default()
    };
    let engine = PhaseEngine::new(config).with_dispatcher(dispatcher);
    let events = run(engine, RunRequest::new("add a login page")).await;
    let report = accomplishment(&events);

    assert_eq!(report.integration_status, IntegrationStatus::Failed);
    assert!(report.known_issues.iter().any(|i| i.contains("timed out")), "{:?}", report.known_issues);
}

#[tokio::test]
async fn cancellation_mid_wave_halts_workers_and_skips_later_waves() {
    let dispatcher = Arc::new(ScriptedDispatcher::with_delay(Duration::from_secs(30)));
    let engine = PhaseEngine::new(EngineConfig::default()).with_dispatcher(dispatcher.clone());
    let status = engine.status_handle();
    let cancel = CancellationToken::new();

    let mut stream = engine.run(
        RunRequest::new("rework the service").with_objectives(conflicting_objectives()),
        cancel.clone(),
    );
    let mut events = Vec::new();
    let started = Instant::now();
    while let Some(event) = stream.next().await {
        if matches!(event, ProgressEvent::WaveStarted { wave: 1, .. }) {
            cancel.cancel();
        }
        events.push(event);
    }
    assert!(started.elapsed() < Duration::from_secs(10), "cancellation did not interrupt the wave");

    let (phase, error) = failure(&events);
    assert_eq!(phase, Phase::Execution);
    assert_eq!(error, CANCELLED);

    let skipped = events.iter().find_map(|e| match e {
        ProgressEvent::WavesSkipped { waves } => Some(waves.clone()),
        _ => None,
    });
    assert_eq!(skipped, Some(vec![2]));
    assert!(!events.iter().any(|e| matches!(e, ProgressEvent::WaveStarted { wave: 2, .. })));

    let mut halted = dispatcher.halted.lock().unwrap().clone();
    halted.sort();
    assert_eq!(halted, vec!["auto-1".to_string(), "claude-1".to_string()]);
    assert_eq!(status.snapshot().phase, Phase::Failed);
}

#[tokio::test]
async fn failing_to_save_the_plan_fails_validation() {
    let store = Arc::new(PlanRejectingStore(MemoryStore::new()));
    let engine = PhaseEngine::new(EngineConfig::default()).with_store(store.clone());
    let id = engine.orchestration_id();
    let events = run(engine, RunRequest::new("add a login page").dry_run()).await;

    let (phase, error) = failure(&events);
    assert_eq!(phase, Phase::Validation);
    assert!(error.contains("disk full"), "{error}");

    let record = store.get_orchestration(id).await.unwrap().expect("record");
    assert_eq!(record.phase, Phase::Failed);
    assert!(record.error.is_some());
    assert!(record.plan_id.is_none());
}

#[tokio::test]
async fn prose_writer_supplies_the_summary() {
    let engine = PhaseEngine::new(EngineConfig::default())
        .with_dispatcher(Arc::new(ScriptedDispatcher::default()))
        .with_prose(Arc::new(CannedProse("Added the login page.\nAll checks green.")));
    let events = run(engine, RunRequest::new("add a login page")).await;
    let report = accomplishment(&events);

    assert_eq!(report.summary, "Added the login page.\nAll checks green.");
    assert!(report.commit_message.starts_with("feat: Added the login page.\n"), "{}", report.commit_message);
}

#[tokio::test]
async fn agents_log_receives_a_session_entry() {
    let project = tempfile::TempDir::new().unwrap();
    std::fs::write(project.path().join("AGENTS.md"), "# Agents\n\n# Recent Sessions\n").unwrap();

    let engine = PhaseEngine::new(EngineConfig::default())
        .with_dispatcher(Arc::new(ScriptedDispatcher::default()))
        .with_docs(Arc::new(AgentsLog::new(project.path())));
    let id = engine.orchestration_id();
    let events = run(engine, RunRequest::new("add a login page")).await;
    accomplishment(&events);

    let updates: BTreeMap<String, String> = events
        .iter()
        .find_map(|e| match e {
            ProgressEvent::DocumentationUpdated { updates, .. } => Some(updates.clone()),
            _ => None,
        })
        .expect("documentation_updated");
    assert_eq!(updates.get("AGENTS.md"), Some(&format!("Added session {id} learnings")));

    let content = std::fs::read_to_string(project.path().join("AGENTS.md")).unwrap();
    assert!(content.contains(&format!("## Session {id}")), "{content}");
}

#[cfg(unix)]
#[tokio::test]
async fn auto_commit_commits_modified_files() {
    use wavecrew_core::vcs::GitCli;

    if !wavecrew_test_utils::git_available() {
        return;
    }
    let (_dir, repo) = wavecrew_test_utils::create_temp_git_repo();
    std::fs::create_dir_all(repo.join("src")).unwrap();
    std::fs::write(repo.join("src/mod.rs"), "pub fn login() {}\n").unwrap();

    let git = Arc::new(GitCli::open(&repo).await.expect("open repo"));
    let before = git.head().await.unwrap();
    let config = EngineConfig {
        auto_commit: true,
        ..EngineConfig::default()
    };
    let engine = PhaseEngine::new(config)
        .with_dispatcher(Arc::new(ScriptedDispatcher::default()))
        .with_vcs(git.clone());
    let events = run(engine, RunRequest::new("add a login page")).await;
    accomplishment(&events);

    let commit = events.iter().find_map(|e| match e {
        ProgressEvent::DocumentationUpdated { commit, .. } => Some(commit.clone()),
        _ => None,
    });
    let sha = commit.flatten().expect("commit id");
    assert_ne!(sha, before);
    assert_eq!(git.head().await.unwrap(), sha);
}
