//! One orchestration run, phase by phase.

use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use chrono::Utc;
use futures::StreamExt;
use futures::stream::FuturesUnordered;
use serde_json::json;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::analysis::{TaskClassifier, analyze_codebase, coordination_points, decompose, scope_strategy};
use crate::docs::{DocsUpdater, ProseWriter};
use crate::hub::{CHANNEL_ORCHESTRATION, Hub, HubEvent, ProgressEnvelope};
use crate::scope::{Objective, Schedule, contains, group_into_waves, schedule};
use crate::store::{OrchestrationRecord, Store};
use crate::vcs::VersionControl;
use crate::worker::{TaskOutcome, TaskRequest, TestCounts};

use super::artifacts::{
    AccomplishmentReport, AnalysisReport, CoordinationPlan, IntegrationStatus, TestSummary, commit_message,
};
use super::dispatch::Dispatcher;
use super::events::ProgressEvent;
use super::status::{OrchestratorStatus, Phase, StatusTracker};
use super::{CANCELLED, EngineConfig, PhaseEngine, PhaseFailure, RunRequest};

const SUMMARY_PROMPT: &str = "Summarize this orchestration run in two or three sentences for the project log.";

/// One objective after dispatch.
#[derive(Debug, Clone)]
pub(super) struct ObjectiveRun {
    pub wave: u32,
    pub objective: Objective,
    pub worker_id: Option<String>,
    pub outcome: TaskOutcome,
}

#[derive(Debug)]
struct ExecutionResult {
    runs: Vec<ObjectiveRun>,
    /// No objective was dispatched.
    dry_run: bool,
}

#[derive(Debug)]
struct IntegrationResult {
    status: IntegrationStatus,
    files_modified: Vec<String>,
    violations: Vec<String>,
}

pub(super) struct Run {
    id: Uuid,
    config: EngineConfig,
    store: Arc<dyn Store>,
    dispatcher: Option<Arc<dyn Dispatcher>>,
    classifier: Arc<dyn TaskClassifier>,
    docs: Option<Arc<dyn DocsUpdater>>,
    vcs: Option<Arc<dyn VersionControl>>,
    prose: Option<Arc<dyn ProseWriter>>,
    hub: Option<Arc<Hub>>,
    tracker: StatusTracker,
    record: Option<OrchestrationRecord>,
    phase: Phase,
    tx: mpsc::UnboundedSender<ProgressEvent>,
}

impl Run {
    pub(super) fn new(engine: PhaseEngine, tx: mpsc::UnboundedSender<ProgressEvent>) -> Self {
        Self {
            id: engine.id,
            config: engine.config,
            store: engine.store,
            dispatcher: engine.dispatcher,
            classifier: engine.classifier,
            docs: engine.docs,
            vcs: engine.vcs,
            prose: engine.prose,
            hub: engine.hub,
            tracker: engine.tracker,
            record: None,
            phase: Phase::Idle,
            tx,
        }
    }

    /// Run every phase, then emit exactly one terminal event.
    pub(super) async fn drive(mut self, request: RunRequest, cancel: CancellationToken) {
        self.tracker.start();
        info!(orchestration_id = %self.id, execute = request.execute, "orchestration started");

        match self.cycle(&request, &cancel).await {
            Ok(accomplishment) => {
                let status = self.tracker.update(Phase::Completed, 100, "Orchestration complete");
                self.persist(&status).await;
                self.save_record(Phase::Completed, None).await;
                info!(
                    orchestration_id = %self.id,
                    integration = %accomplishment.integration_status,
                    "orchestration complete"
                );
                self.emit(ProgressEvent::CycleComplete {
                    accomplishment: Box::new(accomplishment),
                });
            }
            Err(failure) => self.fail(failure).await,
        }
    }

    async fn cycle(&mut self, request: &RunRequest, cancel: &CancellationToken) -> Result<AccomplishmentReport, PhaseFailure> {
        self.phase = Phase::Analytic;
        let record = OrchestrationRecord::new(self.id, &request.request, request.uploaded_files.clone());
        self.store
            .create_orchestration(&record)
            .await
            .map_err(|e| self.failure(format!("failed to record orchestration: {e:#}")))?;
        self.record = Some(record);

        let analysis = self.analytic(request).await?;
        self.checkpoint(cancel, Phase::Planning)?;
        let schedule = self.planning(&analysis, request).await?;
        self.checkpoint(cancel, Phase::Validation)?;
        let plan = self.validation(&analysis, schedule).await?;
        // Execution checks the token itself so it can report skipped waves.
        let execution = self.execution(&plan, request, cancel).await?;
        self.checkpoint(cancel, Phase::Integration)?;
        let integration = self.integration(&execution.runs).await?;
        self.checkpoint(cancel, Phase::PostExecution)?;
        let accomplishment = self.post_execution(&analysis, &plan, &execution, integration).await?;
        self.checkpoint(cancel, Phase::AutoDocumentation)?;
        self.auto_documentation(&analysis, &plan, &accomplishment).await?;
        Ok(accomplishment)
    }

    // ---- phases ----

    async fn analytic(&mut self, request: &RunRequest) -> Result<AnalysisReport, PhaseFailure> {
        self.enter(Phase::Analytic, "Starting deep analysis...").await;

        let scan_root = match &self.config.project_root {
            Some(root) => Some(root.clone()),
            None if !request.uploaded_files.is_empty() => Some(PathBuf::from(".")),
            None => None,
        };
        let mut codebase = None;
        if let Some(root) = scan_root {
            self.step(10, "Analyzing codebase structure...").await;
            let limits = self.config.codebase_limits;
            let structure = tokio::task::spawn_blocking(move || analyze_codebase(&root, &limits))
                .await
                .map_err(|e| self.failure(format!("codebase analysis aborted: {e}")))?
                .map_err(|e| self.failure(e.to_string()))?;
            debug!(modules = structure.modules.len(), project_type = ?structure.project_type, "codebase analyzed");
            self.emit(ProgressEvent::CodebaseAnalyzed {
                modules: structure.modules.len(),
                entry_points: structure.entry_points.clone(),
            });
            codebase = Some(structure);
        }

        self.step(20, "Determining task type...").await;
        let task_type = self.classifier.classify(&request.request);
        info!(orchestration_id = %self.id, task_type = %task_type, "task type determined");
        self.emit(ProgressEvent::TaskTypeDetermined { task_type });

        self.step(40, "Identifying coordination points...").await;
        let points = coordination_points(&request.request);
        self.emit(ProgressEvent::CoordinationPoints { points: points.clone() });

        self.step(60, "Developing scope allocation strategy...").await;
        let strategy = scope_strategy(task_type, &points);
        self.emit(ProgressEvent::ScopeStrategy {
            strategy: strategy.clone(),
        });

        self.step(80, "Generating analysis report...").await;
        let report = AnalysisReport {
            report_id: Uuid::new_v4(),
            orchestration_id: self.id,
            owner_request: request.request.clone(),
            uploaded_files: request.uploaded_files.clone(),
            identified_modules: codebase.as_ref().map(|c| c.modules.clone()).unwrap_or_default(),
            codebase,
            coordination_points: points,
            scope_strategy: strategy,
            task_type,
            timestamp: Utc::now(),
        };
        self.store
            .save_analysis(&report)
            .await
            .map_err(|e| self.failure(format!("failed to save analysis report: {e:#}")))?;
        if let Some(record) = &mut self.record {
            record.analysis_id = Some(report.report_id);
        }

        self.complete(Some(report.clone()), None).await;
        Ok(report)
    }

    async fn planning(&mut self, analysis: &AnalysisReport, request: &RunRequest) -> Result<Schedule, PhaseFailure> {
        self.enter(Phase::Planning, "Starting coordination planning...").await;

        self.step(20, "Decomposing request into objectives...").await;
        let objectives = match &request.objectives {
            Some(objectives) => objectives.clone(),
            None => decompose(analysis.task_type, &analysis.owner_request, &self.config.global_forbid),
        };
        self.emit(ProgressEvent::ObjectivesCreated {
            count: objectives.len(),
        });

        self.step(40, "Assigning objectives to waves...").await;
        self.emit(ProgressEvent::WavesCreated {
            wave_count: group_into_waves(&objectives).len(),
        });

        self.step(70, "Resolving scope conflicts...").await;
        let schedule = schedule(objectives, &self.config.global_forbid, self.config.max_resolution_passes)
            .map_err(|e| self.failure(e.to_string()))?;

        self.complete(None, None).await;
        Ok(schedule)
    }

    async fn validation(&mut self, analysis: &AnalysisReport, schedule: Schedule) -> Result<CoordinationPlan, PhaseFailure> {
        self.enter(Phase::Validation, "Starting scope validation...").await;

        self.step(20, "Validating scope exclusivity...").await;
        self.emit(ProgressEvent::ScopeValidated {
            valid: schedule.initial_validation.valid,
            conflicts: schedule.initial_validation.conflicts.clone(),
        });

        let resolution = schedule.resolution;
        if resolution.passes > 0 {
            self.step(50, "Deferring conflicting objectives...").await;
            info!(
                passes = resolution.passes,
                deferred = resolution.deferrals.len(),
                "scope conflicts resolved"
            );
            self.emit(ProgressEvent::ConflictsResolved {
                passes: resolution.passes,
                deferred: resolution.deferrals.clone(),
            });
            self.emit(ProgressEvent::ScopeValidated {
                valid: resolution.validation.valid,
                conflicts: resolution.validation.conflicts.clone(),
            });
        }

        self.step(80, "Defining integration contracts...").await;
        let plan = CoordinationPlan {
            plan_id: Uuid::new_v4(),
            orchestration_id: self.id,
            analysis_report_id: analysis.report_id,
            plan_type: analysis.task_type,
            waves: schedule.waves,
            integration_contracts: schedule.contracts,
            global_forbid: self.config.global_forbid.clone(),
            scope_validation: resolution.validation,
            deferrals: resolution.deferrals,
            estimated_duration: schedule.estimated_duration,
            timestamp: Utc::now(),
        };
        self.store
            .save_plan(&plan)
            .await
            .map_err(|e| self.failure(format!("failed to save coordination plan: {e:#}")))?;
        if let Some(record) = &mut self.record {
            record.plan_id = Some(plan.plan_id);
        }

        self.complete(None, Some(plan.clone())).await;
        Ok(plan)
    }

    async fn execution(
        &mut self,
        plan: &CoordinationPlan,
        request: &RunRequest,
        cancel: &CancellationToken,
    ) -> Result<ExecutionResult, PhaseFailure> {
        self.enter(Phase::Execution, "Starting wave execution...").await;
        let wave_numbers: Vec<u32> = plan.waves.iter().map(|w| w.number).collect();

        if !request.execute {
            self.step(100, "Dry run: no objectives dispatched").await;
            self.emit(ProgressEvent::WavesSkipped { waves: wave_numbers });
            self.complete(None, None).await;
            return Ok(ExecutionResult {
                runs: Vec::new(),
                dry_run: true,
            });
        }

        let Some(dispatcher) = self.dispatcher.clone() else {
            return Err(self.failure("no dispatcher attached; only dry runs are possible"));
        };

        let total = plan.waves.len();
        let mut runs = Vec::new();
        for (index, wave) in plan.waves.iter().enumerate() {
            if cancel.is_cancelled() {
                self.emit(ProgressEvent::WavesSkipped {
                    waves: wave_numbers[index..].to_vec(),
                });
                return Err(self.failure(CANCELLED));
            }

            let progress = u8::try_from(index * 100 / total.max(1)).unwrap_or(100);
            self.step(progress, format!("Executing wave {} of {total}", wave.number)).await;
            info!(wave = wave.number, objectives = wave.objectives.len(), "wave started");
            self.emit(ProgressEvent::WaveStarted {
                wave: wave.number,
                total_waves: total,
                objectives: wave.objectives.iter().map(|o| o.title.clone()).collect(),
            });

            let routed = Arc::new(Mutex::new(Vec::new()));
            let mut pending: FuturesUnordered<_> = wave
                .objectives
                .iter()
                .map(|objective| {
                    run_objective(
                        Arc::clone(&dispatcher),
                        objective.clone(),
                        wave.number,
                        request.request.clone(),
                        self.config.task_timeout,
                        Arc::clone(&routed),
                    )
                })
                .collect();

            let mut succeeded = 0;
            let mut failed = 0;
            loop {
                let next = tokio::select! {
                    biased;
                    () = cancel.cancelled() => None,
                    run = pending.next() => Some(run),
                };
                let run = match next {
                    None => {
                        let busy = routed.lock().unwrap_or_else(PoisonError::into_inner).clone();
                        warn!(wave = wave.number, workers = ?busy, "orchestration cancelled mid-wave, halting workers");
                        dispatcher.halt(&busy).await;
                        drop(pending);
                        self.emit(ProgressEvent::WavesSkipped {
                            waves: wave_numbers[index + 1..].to_vec(),
                        });
                        return Err(self.failure(CANCELLED));
                    }
                    Some(None) => break,
                    Some(Some(run)) => run,
                };

                if run.outcome.success {
                    succeeded += 1;
                } else {
                    failed += 1;
                    warn!(
                        wave = run.wave,
                        objective = %run.objective.id,
                        error = run.outcome.error.as_deref().unwrap_or("unknown"),
                        "objective failed"
                    );
                }
                self.emit(ProgressEvent::ObjectiveCompleted {
                    wave: run.wave,
                    objective: run.objective.title.clone(),
                    worker_id: run.worker_id.clone(),
                    success: run.outcome.success,
                    files_modified: run.outcome.files_modified.clone(),
                    error: run.outcome.error.clone(),
                });
                runs.push(run);
            }

            info!(wave = wave.number, succeeded, failed, "wave complete");
            self.emit(ProgressEvent::WaveCompleted {
                wave: wave.number,
                succeeded,
                failed,
            });
        }

        self.complete(None, None).await;
        Ok(ExecutionResult { runs, dry_run: false })
    }

    async fn integration(&mut self, runs: &[ObjectiveRun]) -> Result<IntegrationResult, PhaseFailure> {
        self.enter(Phase::Integration, "Starting integration checks...").await;

        self.step(30, "Collecting modified files...").await;
        let files_modified: Vec<String> = runs
            .iter()
            .flat_map(|r| r.outcome.files_modified.iter().cloned())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();

        self.step(60, "Auditing modified files against scopes...").await;
        let violations = scope_audit(runs, &self.config.global_forbid);
        for violation in &violations {
            warn!(orchestration_id = %self.id, violation = %violation, "scope violation");
        }

        let succeeded = runs.iter().filter(|r| r.outcome.success).count();
        let status = IntegrationStatus::from_counts(succeeded, runs.len());
        self.emit(ProgressEvent::IntegrationChecked {
            status,
            violations: violations.clone(),
        });

        self.complete(None, None).await;
        Ok(IntegrationResult {
            status,
            files_modified,
            violations,
        })
    }

    async fn post_execution(
        &mut self,
        analysis: &AnalysisReport,
        plan: &CoordinationPlan,
        execution: &ExecutionResult,
        integration: IntegrationResult,
    ) -> Result<AccomplishmentReport, PhaseFailure> {
        self.enter(Phase::PostExecution, "Aggregating results...").await;

        let mut counts = TestCounts::default();
        for run in &execution.runs {
            if let Some(results) = &run.outcome.test_results {
                counts.merge(results);
            }
        }
        let test_results = TestSummary::from(counts);

        let (done, not_done): (Vec<&ObjectiveRun>, Vec<&ObjectiveRun>) =
            execution.runs.iter().partition(|r| r.outcome.success);
        let objectives_completed: Vec<String> = done.iter().map(|r| r.objective.title.clone()).collect();
        let objectives_failed: Vec<String> = not_done.iter().map(|r| r.objective.title.clone()).collect();

        let mut quality_gates = BTreeMap::new();
        quality_gates.insert(
            "objectives".to_string(),
            format!("{}/{}", objectives_completed.len(), plan.objective_count()),
        );
        let audit = if integration.violations.is_empty() { "passed" } else { "failed" };
        quality_gates.insert("scope_audit".to_string(), audit.to_string());
        quality_gates.insert("tests".to_string(), test_results.status.clone());

        let mut known_issues = integration.violations.clone();
        for run in &not_done {
            let error = run.outcome.error.as_deref().unwrap_or("no error reported");
            known_issues.push(format!("{}: {error}", run.objective.title));
        }
        if execution.dry_run {
            known_issues.push(format!("Dry run: {} objectives were not dispatched", plan.objective_count()));
        }

        let mut next_steps: Vec<String> = not_done.iter().map(|r| format!("Retry: {}", r.objective.title)).collect();
        if execution.dry_run {
            next_steps.push("Run again with execution enabled".to_string());
        }
        if counts.failed > 0 {
            next_steps.push(format!("Fix {} failing tests", counts.failed));
        }

        self.step(40, "Writing summary...").await;
        let summary = self.summary(analysis, &objectives_completed, &objectives_failed, &integration).await;

        self.step(80, "Generating accomplishment report...").await;
        let mut report = AccomplishmentReport {
            accomplishment_id: Uuid::new_v4(),
            orchestration_id: self.id,
            plan_id: plan.plan_id,
            summary,
            objectives_completed,
            objectives_failed,
            files_modified: integration.files_modified,
            test_results,
            quality_gates,
            integration_status: integration.status,
            known_issues,
            next_steps,
            commit_message: String::new(),
            timestamp: Utc::now(),
        };
        report.commit_message = commit_message(analysis.task_type, &report);

        self.store
            .save_accomplishment(&report)
            .await
            .map_err(|e| self.failure(format!("failed to save accomplishment report: {e:#}")))?;
        if let Some(record) = &mut self.record {
            record.accomplishment_id = Some(report.accomplishment_id);
        }

        self.complete(None, None).await;
        Ok(report)
    }

    async fn auto_documentation(
        &mut self,
        analysis: &AnalysisReport,
        plan: &CoordinationPlan,
        accomplishment: &AccomplishmentReport,
    ) -> Result<(), PhaseFailure> {
        self.enter(Phase::AutoDocumentation, "Updating documentation...").await;

        let mut updates = BTreeMap::new();
        if let Some(docs) = self.docs.clone() {
            self.step(30, "Recording session learnings...").await;
            updates = docs
                .update(analysis, plan, accomplishment)
                .await
                .map_err(|e| self.failure(format!("documentation update failed: {e:#}")))?;
        }

        let mut commit = None;
        if self.config.auto_commit && !accomplishment.files_modified.is_empty() {
            match self.vcs.clone() {
                Some(vcs) => {
                    self.step(70, "Committing modified files...").await;
                    commit = vcs
                        .commit(&accomplishment.files_modified, &accomplishment.commit_message)
                        .await
                        .map_err(|e| self.failure(format!("commit failed: {e:#}")))?;
                    if let Some(sha) = &commit {
                        info!(orchestration_id = %self.id, commit = %sha, "changes committed");
                    }
                }
                None => warn!("auto_commit is enabled but no version control is attached"),
            }
        }

        self.emit(ProgressEvent::DocumentationUpdated { updates, commit });
        self.complete(None, None).await;
        Ok(())
    }

    // ---- helpers ----

    async fn summary(
        &self,
        analysis: &AnalysisReport,
        completed: &[String],
        failed: &[String],
        integration: &IntegrationResult,
    ) -> String {
        let fallback = format!("Completed {}: {}", analysis.task_type, analysis.owner_request);
        let Some(prose) = &self.prose else {
            return fallback;
        };
        let context = json!({
            "request": analysis.owner_request,
            "task_type": analysis.task_type,
            "objectives_completed": completed,
            "objectives_failed": failed,
            "files_modified": integration.files_modified,
            "integration_status": integration.status,
        });
        match prose.write(SUMMARY_PROMPT, &context).await {
            Ok(text) if !text.trim().is_empty() => text.trim().to_string(),
            Ok(_) => fallback,
            Err(e) => {
                warn!(error = %e, "prose writer failed, using plain summary");
                fallback
            }
        }
    }

    fn emit(&self, event: ProgressEvent) {
        if let Some(hub) = &self.hub {
            hub.publish(
                CHANNEL_ORCHESTRATION,
                &HubEvent::OrchestrationProgress(ProgressEnvelope {
                    orchestration_id: self.id,
                    event: event.clone(),
                }),
            );
        }
        // The receiver is gone only when the stream was dropped.
        let _ = self.tx.send(event);
    }

    fn failure(&self, message: impl Into<String>) -> PhaseFailure {
        PhaseFailure {
            phase: self.phase,
            message: message.into(),
        }
    }

    fn checkpoint(&self, cancel: &CancellationToken, next: Phase) -> Result<(), PhaseFailure> {
        if cancel.is_cancelled() {
            return Err(PhaseFailure {
                phase: next,
                message: CANCELLED.to_string(),
            });
        }
        Ok(())
    }

    async fn enter(&mut self, phase: Phase, activity: &str) {
        self.phase = phase;
        info!(orchestration_id = %self.id, phase = %phase, "phase started");
        let status = self.tracker.update(phase, 5, activity);
        self.persist(&status).await;
        self.save_record(phase, None).await;
        self.emit(ProgressEvent::PhaseStart { phase });
    }

    async fn step(&mut self, progress: u8, activity: impl Into<String>) {
        let activity = activity.into();
        let status = self.tracker.update(self.phase, progress, activity.clone());
        self.persist(&status).await;
        self.emit(ProgressEvent::Activity { activity, status });
    }

    async fn complete(&mut self, report: Option<AnalysisReport>, plan: Option<CoordinationPlan>) {
        let status = self.tracker.update(self.phase, 100, format!("{} complete", self.phase));
        self.persist(&status).await;
        self.emit(ProgressEvent::PhaseComplete {
            phase: self.phase,
            report: report.map(Box::new),
            plan: plan.map(Box::new),
        });
    }

    /// Status snapshots are best-effort; a failed write is recorded on the
    /// status itself.
    async fn persist(&mut self, status: &OrchestratorStatus) {
        if let Err(e) = self.store.append_status(self.id, status).await {
            warn!(orchestration_id = %self.id, error = %e, "failed to persist status snapshot");
            self.tracker.record_error(format!("status snapshot not saved: {e}"));
        }
    }

    async fn save_record(&mut self, phase: Phase, error: Option<String>) {
        let Some(record) = &mut self.record else {
            return;
        };
        record.phase = phase;
        record.updated_at = Utc::now();
        if error.is_some() {
            record.error = error;
        }
        if let Err(e) = self.store.update_orchestration(record).await {
            warn!(orchestration_id = %self.id, error = %e, "failed to update orchestration record");
        }
    }

    async fn fail(&mut self, failure: PhaseFailure) {
        error!(orchestration_id = %self.id, phase = %failure.phase, error = %failure.message, "orchestration failed");
        self.tracker.record_error(failure.to_string());
        let progress = self.tracker.snapshot().progress_percent;
        let status = self.tracker.update(
            Phase::Failed,
            progress,
            format!("Failed during {}: {}", failure.phase, failure.message),
        );
        self.persist(&status).await;
        self.save_record(Phase::Failed, Some(failure.message.clone())).await;
        self.emit(ProgressEvent::Failed {
            phase: failure.phase,
            error: failure.message,
            status,
        });
    }
}

/// Route and run one objective. Every path ends in an outcome; routing and
/// transport errors become failed outcomes.
async fn run_objective(
    dispatcher: Arc<dyn Dispatcher>,
    objective: Objective,
    wave: u32,
    description: String,
    timeout: Duration,
    routed: Arc<Mutex<Vec<String>>>,
) -> ObjectiveRun {
    let mut task = TaskRequest::new(objective.id.as_str(), objective.title.as_str());
    task.description = description;
    task.scope_touch = objective.scope_touch.clone();
    task.scope_forbid = objective.scope_forbid.clone();
    task.wave = wave;

    let Some(worker_id) = dispatcher.route(&objective.worker) else {
        let outcome = TaskOutcome::failed(
            task.task_id.as_str(),
            "",
            format!("no running worker for target {}", objective.worker),
        );
        return ObjectiveRun {
            wave,
            objective,
            worker_id: None,
            outcome,
        };
    };
    routed.lock().unwrap_or_else(PoisonError::into_inner).push(worker_id.clone());
    debug!(objective = %objective.id, worker_id = %worker_id, wave, "objective dispatched");

    let task_id = task.task_id.clone();
    let outcome = match tokio::time::timeout(timeout, dispatcher.dispatch(&worker_id, task)).await {
        Ok(Ok(outcome)) => outcome,
        Ok(Err(e)) => TaskOutcome::failed(task_id, worker_id.as_str(), format!("{e:#}")),
        Err(_) => TaskOutcome::failed(
            task_id,
            worker_id.as_str(),
            format!("objective timed out after {timeout:?}"),
        ),
    };

    ObjectiveRun {
        wave,
        objective,
        worker_id: Some(worker_id),
        outcome,
    }
}

/// Modified files outside an objective's scope, or inside the global forbid
/// set, as human-readable violations.
pub(super) fn scope_audit(runs: &[ObjectiveRun], global_forbid: &[String]) -> Vec<String> {
    let mut violations = Vec::new();
    for run in runs {
        for file in &run.outcome.files_modified {
            if global_forbid.iter().any(|f| contains(f, file)) {
                violations.push(format!("{}: modified globally forbidden path {file}", run.objective.title));
            } else if !run.objective.permits(file) {
                violations.push(format!("{}: modified {file} outside its scope", run.objective.title));
            }
        }
    }
    violations
}
