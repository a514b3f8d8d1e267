//! `wavecrew run` command: start the worker pool, drive one orchestration
//! and print its progress.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use futures::StreamExt;
use tokio_util::sync::CancellationToken;

use wavecrew_core::docs::AgentsLog;
use wavecrew_core::engine::{EngineConfig, PhaseEngine, ProgressEvent, RunRequest};
use wavecrew_core::hub::{CHANNEL_WORKERS, Hub, HubEvent};
use wavecrew_core::pool::WorkerPool;
use wavecrew_core::store::FsStore;
use wavecrew_core::vcs::GitCli;
use wavecrew_core::worker::{SupervisorOptions, WorkerRegistry};

use crate::config::WavecrewConfig;
use crate::plan_cmds;

/// Arguments of `wavecrew run`.
#[derive(Debug)]
pub struct RunArgs {
    pub request: String,
    pub files: Vec<String>,
    pub project: Option<PathBuf>,
    pub objectives: Option<PathBuf>,
    pub dry_run: bool,
    pub json: bool,
}

/// Run one orchestration to completion or failure.
///
/// Ctrl+C cancels the run; a second Ctrl+C exits immediately.
pub async fn run_orchestration(config: &WavecrewConfig, args: RunArgs) -> Result<()> {
    let project = match args.project.clone() {
        Some(path) => path,
        None => std::env::current_dir().context("failed to get current directory")?,
    };

    let mut global_forbid = config.global_forbid.clone();

    let objectives = match &args.objectives {
        Some(path) => {
            let plan = plan_cmds::load_plan(&path.to_string_lossy())?;
            merge_forbid(&mut global_forbid, &plan.global_forbid);
            Some(plan.objectives)
        }
        None => None,
    };

    // A dry run dispatches nothing, so the registry is optional there.
    let registry = if args.dry_run && !config.registry_path.exists() {
        None
    } else {
        let registry = WorkerRegistry::load(&config.registry_path)
            .with_context(|| format!("failed to load worker registry {}", config.registry_path.display()))?;
        merge_forbid(&mut global_forbid, &registry.global_forbid);
        Some(registry)
    };

    let hub = Arc::new(Hub::new());
    let pool = match (&registry, args.dry_run) {
        (Some(registry), false) => Some(start_pool(registry, &hub, config, &args).await?),
        _ => None,
    };

    let engine_config = EngineConfig {
        global_forbid,
        max_resolution_passes: config.max_resolution_passes,
        project_root: Some(project.clone()),
        task_timeout: config.task_timeout,
        auto_commit: config.auto_commit,
        ..EngineConfig::default()
    };
    let mut engine = PhaseEngine::new(engine_config)
        .with_store(Arc::new(FsStore::new(&config.data_dir)))
        .with_docs(Arc::new(AgentsLog::new(&project)))
        .with_hub(Arc::clone(&hub));
    if let Some(pool) = &pool {
        engine = engine.with_dispatcher(pool.clone());
    }
    if config.auto_commit {
        match GitCli::open(&project).await {
            Ok(git) => engine = engine.with_vcs(Arc::new(git)),
            Err(e) => tracing::warn!(project = %project.display(), error = %e, "auto_commit is on but the project is not usable as a git repository"),
        }
    }

    let orchestration_id = engine.orchestration_id();
    if !args.json {
        println!("Orchestration {orchestration_id}");
        println!("Request: {}", args.request);
        if args.dry_run {
            println!("Mode: dry run (no dispatch)");
        }
        println!();
    }

    let activity = spawn_activity_printer(&hub, args.json);
    let cancel = CancellationToken::new();
    let interrupt = spawn_interrupt_handler(cancel.clone());

    let mut request = RunRequest::new(&args.request).with_files(args.files.clone());
    if let Some(objectives) = objectives {
        request = request.with_objectives(objectives);
    }
    if args.dry_run {
        request = request.dry_run();
    }

    let mut events = engine.run(request, cancel);
    let mut failure = None;
    let mut finished = false;
    while let Some(event) = events.next().await {
        if args.json {
            println!("{}", serde_json::to_string(&event)?);
        } else {
            println!("{}", render_event(&event));
        }
        match event {
            ProgressEvent::CycleComplete { .. } => finished = true,
            ProgressEvent::Failed { phase, error, .. } => failure = Some(format!("{phase} phase failed: {error}")),
            _ => {}
        }
    }

    interrupt.abort();
    activity.abort();
    if let Some(pool) = pool {
        pool.stop_all().await;
    }

    if let Some(message) = failure {
        bail!("orchestration {orchestration_id}: {message}");
    }
    if !finished {
        bail!("orchestration {orchestration_id} ended without a result");
    }
    if !args.json {
        println!();
        println!("Records in {}", config.data_dir.display());
    }
    Ok(())
}

async fn start_pool(
    registry: &WorkerRegistry,
    hub: &Arc<Hub>,
    config: &WavecrewConfig,
    args: &RunArgs,
) -> Result<Arc<WorkerPool>> {
    let options = SupervisorOptions {
        task_timeout: config.task_timeout,
        ..SupervisorOptions::default()
    };
    let pool = Arc::new(WorkerPool::from_registry(registry, Arc::clone(hub), options)?);

    let report = pool.start_all().await;
    for (id, error) in &report.failed {
        tracing::warn!(worker_id = %id, error = %error, "worker failed to start");
    }
    if report.started.is_empty() {
        pool.stop_all().await;
        bail!("no workers started from {}", config.registry_path.display());
    }
    if !args.json {
        println!("Workers: {}", report.started.join(", "));
    }
    Ok(pool)
}

/// Print worker activity from the hub until aborted.
fn spawn_activity_printer(hub: &Hub, json: bool) -> tokio::task::JoinHandle<()> {
    let mut sub = hub.connect(CHANNEL_WORKERS, 256);
    tokio::spawn(async move {
        while let Some(event) = sub.recv().await {
            if json {
                if let Ok(line) = serde_json::to_string(&event) {
                    println!("{line}");
                }
            } else if let Some(line) = render_worker_event(&event) {
                println!("{line}");
            }
        }
    })
}

fn spawn_interrupt_handler(cancel: CancellationToken) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_err() {
            return;
        }
        eprintln!("Cancelling... press Ctrl+C again to exit immediately.");
        cancel.cancel();
        if tokio::signal::ctrl_c().await.is_ok() {
            std::process::exit(130);
        }
    })
}

/// Append entries of `extra` missing from `forbid`.
fn merge_forbid(forbid: &mut Vec<String>, extra: &[String]) {
    for path in extra {
        if !forbid.contains(path) {
            forbid.push(path.clone());
        }
    }
}

// -----------------------------------------------------------------------
// Rendering
// -----------------------------------------------------------------------

/// Human-readable line(s) for one progress event.
pub fn render_event(event: &ProgressEvent) -> String {
    match event {
        ProgressEvent::PhaseStart { phase } => format!("== {phase} =="),
        ProgressEvent::Activity { activity, status } => {
            format!("  [{:>3}%] {activity}", status.progress_percent)
        }
        ProgressEvent::CodebaseAnalyzed { modules, entry_points } => {
            if entry_points.is_empty() {
                format!("  codebase: {modules} modules")
            } else {
                format!("  codebase: {modules} modules, entry points: {}", entry_points.join(", "))
            }
        }
        ProgressEvent::TaskTypeDetermined { task_type } => format!("  task type: {task_type}"),
        ProgressEvent::CoordinationPoints { points } => {
            let mut out = format!("  coordination points: {}", points.len());
            for point in points {
                out.push_str(&format!("\n    - {point}"));
            }
            out
        }
        ProgressEvent::ScopeStrategy { strategy } => format!("  strategy: {strategy}"),
        ProgressEvent::ObjectivesCreated { count } => format!("  objectives: {count}"),
        ProgressEvent::WavesCreated { wave_count } => format!("  waves: {wave_count}"),
        ProgressEvent::ScopeValidated { valid: true, .. } => "  scopes exclusive".to_string(),
        ProgressEvent::ScopeValidated { conflicts, .. } => {
            let mut out = format!("  {} scope conflicts", conflicts.len());
            for c in conflicts {
                out.push_str(&format!(
                    "\n    [!] wave {}: {} <-> {} on {}",
                    c.wave,
                    c.objective1,
                    c.objective2,
                    c.overlap.join(", ")
                ));
            }
            out
        }
        ProgressEvent::ConflictsResolved { passes, deferred } => {
            let mut out = format!("  resolved in {passes} passes");
            for d in deferred {
                out.push_str(&format!("\n    {} : wave {} -> {}", d.objective, d.from_wave, d.to_wave));
            }
            out
        }
        ProgressEvent::PhaseComplete { phase, .. } => format!("  {phase} complete"),
        ProgressEvent::WaveStarted {
            wave,
            total_waves,
            objectives,
        } => format!("  wave {wave}/{total_waves}: {}", objectives.join(", ")),
        ProgressEvent::ObjectiveCompleted {
            objective,
            worker_id,
            success,
            files_modified,
            error,
            ..
        } => {
            let worker = worker_id.as_deref().unwrap_or("unrouted");
            if *success {
                format!("    [+] {objective} ({worker}, {} files)", files_modified.len())
            } else {
                format!("    [!] {objective} ({worker}): {}", error.as_deref().unwrap_or("failed"))
            }
        }
        ProgressEvent::WaveCompleted {
            wave,
            succeeded,
            failed,
        } => format!("  wave {wave} done: {succeeded} succeeded, {failed} failed"),
        ProgressEvent::WavesSkipped { waves } => {
            let waves: Vec<String> = waves.iter().map(u32::to_string).collect();
            format!("  skipped waves: {}", waves.join(", "))
        }
        ProgressEvent::IntegrationChecked { status, violations } => {
            let mut out = format!("  integration: {status}");
            for v in violations {
                out.push_str(&format!("\n    [!] {v}"));
            }
            out
        }
        ProgressEvent::DocumentationUpdated { updates, commit } => {
            let mut out = String::from("  documentation:");
            for (target, result) in updates {
                out.push_str(&format!("\n    {target}: {result}"));
            }
            if let Some(commit) = commit {
                out.push_str(&format!("\n    committed {commit}"));
            }
            out
        }
        ProgressEvent::CycleComplete { accomplishment } => {
            let a = accomplishment;
            let mut out = format!(
                "\nCompleted: {}\n  integration: {}\n  objectives: {} completed, {} failed\n  files modified: {}\n  tests: {}",
                a.summary,
                a.integration_status,
                a.objectives_completed.len(),
                a.objectives_failed.len(),
                a.files_modified.len(),
                a.test_results.status,
            );
            for issue in &a.known_issues {
                out.push_str(&format!("\n  issue: {issue}"));
            }
            for step in &a.next_steps {
                out.push_str(&format!("\n  next: {step}"));
            }
            out
        }
        ProgressEvent::Failed { phase, error, .. } => format!("\nFAILED in {phase}: {error}"),
    }
}

/// Worker activity line, or `None` for events not worth printing.
pub fn render_worker_event(event: &HubEvent) -> Option<String> {
    match event {
        HubEvent::WorkerActivity(a) => Some(format!("    <{}> {}", a.worker_id, a.description)),
        HubEvent::WorkerError(e) => Some(format!("    <{}> error: {}", e.worker_id, e.error)),
        HubEvent::WorkerMetrics(_) | HubEvent::OrchestrationProgress(_) => None,
    }
}
