//! Worker process supervisor.
//!
//! Owns one worker subprocess: spawns it, frames its stdio with
//! [`MessageCodec`], correlates requests with responses, keeps
//! [`WorkerMetrics`], and broadcasts activity on the hub's `workers`
//! channel.
//!
//! ```text
//!              +------------ writer task <-- mpsc <-- send()/list_tools()/execute_task()
//!              |
//!   subprocess stdin
//!   subprocess stdout --> stdout task --> handle_message --> Correlator::resolve
//!   subprocess stderr --> stderr task --> worker_error          |
//!                                                            Hub::publish
//! ```
//!
//! All three tasks are owned by the supervisor and joined in [`stop`].
//!
//! [`stop`]: WorkerSupervisor::stop

use std::collections::HashMap;
use std::fmt;
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use futures::{SinkExt, StreamExt};
use serde_json::{Map, Value, json};
use thiserror::Error;
use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::codec::{FramedRead, FramedWrite};
use tracing::{debug, error, info, warn};

use crate::hub::{ActivityKind, CHANNEL_WORKERS, Hub, HubEvent, WorkerActivity, WorkerError};
use crate::protocol::{
    CorrelationError, Correlator, Frame, Message, MessageCodec, MessageType, TextLineCodec, ToolDescriptor, payload,
};

use super::config::WorkerConfig;
use super::metrics::{MetricsSnapshot, WorkerMetrics};
use super::task::{CompletionKind, TaskOutcome, TaskReport, TaskRequest, TestCounts};

/// Lifecycle of a supervised worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisorState {
    NotStarted,
    Starting,
    Running,
    Stopping,
    Stopped,
    Errored,
}

impl fmt::Display for SupervisorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::NotStarted => "not_started",
            Self::Starting => "starting",
            Self::Running => "running",
            Self::Stopping => "stopping",
            Self::Stopped => "stopped",
            Self::Errored => "errored",
        };
        f.write_str(s)
    }
}

/// Errors surfaced by [`WorkerSupervisor`] operations.
#[derive(Debug, Error)]
pub enum SupervisorError {
    #[error("failed to start worker {worker_id} ({command}): {source}")]
    Startup {
        worker_id: String,
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("worker {worker_id} is already running")]
    AlreadyRunning { worker_id: String },

    #[error("worker {worker_id} is not running (state: {state})")]
    NotRunning {
        worker_id: String,
        state: SupervisorState,
    },

    #[error("worker {worker_id} did not answer list_tools within {timeout:?}")]
    ToolDiscoveryTimeout { worker_id: String, timeout: Duration },

    #[error("task {task_id} on worker {worker_id} did not finish within {timeout:?}")]
    TaskTimeout {
        worker_id: String,
        task_id: String,
        timeout: Duration,
    },

    #[error("request to worker {worker_id} was cancelled: {reason}")]
    Cancelled { worker_id: String, reason: String },

    #[error("worker {worker_id} sent an invalid tools_response: {source}")]
    InvalidToolsResponse {
        worker_id: String,
        #[source]
        source: serde_json::Error,
    },

    #[error(transparent)]
    Correlation(#[from] CorrelationError),
}

/// Timing knobs for a supervisor.
#[derive(Debug, Clone)]
pub struct SupervisorOptions {
    /// How long to wait for a voluntary exit after `shutdown`.
    pub shutdown_grace: Duration,
    /// How long to wait after SIGTERM before force-killing.
    pub terminate_grace: Duration,
    /// Upper bound on `execute_task` for workers with a completion signal.
    pub task_timeout: Duration,
    /// Broadcast a metrics snapshot every this many tool invocations.
    pub metrics_every: u64,
    /// Outbound queue depth.
    pub queue_depth: usize,
    /// How long `stop` waits for each I/O task before aborting it.
    pub join_timeout: Duration,
}

impl Default for SupervisorOptions {
    fn default() -> Self {
        Self {
            shutdown_grace: Duration::from_millis(500),
            terminate_grace: Duration::from_secs(5),
            task_timeout: Duration::from_secs(30 * 60),
            metrics_every: 10,
            queue_depth: 64,
            join_timeout: Duration::from_secs(2),
        }
    }
}

// ---------------------------------------------------------------------------
// State shared with the I/O tasks
// ---------------------------------------------------------------------------

struct Shared {
    worker_id: String,
    hub: Arc<Hub>,
    state: Mutex<SupervisorState>,
    requests: Arc<Correlator<Value>>,
    tasks: Arc<Correlator<TaskReport>>,
    metrics: Mutex<WorkerMetrics>,
    dispatched_at: Mutex<HashMap<String, Instant>>,
    metrics_every: u64,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Shared {
    fn state(&self) -> SupervisorState {
        *lock(&self.state)
    }

    fn set_state(&self, next: SupervisorState) {
        let mut state = lock(&self.state);
        let from = *state;
        if from != next {
            debug!(worker_id = %self.worker_id, %from, to = %next, "supervisor state change");
            *state = next;
        }
    }

    fn publish_activity(&self, activity: WorkerActivity) {
        self.hub.publish(CHANNEL_WORKERS, &HubEvent::WorkerActivity(activity));
    }

    fn publish_error(&self, error: impl Into<String>) {
        self.hub
            .publish(CHANNEL_WORKERS, &HubEvent::WorkerError(WorkerError::new(&self.worker_id, error)));
    }

    fn publish_metrics(&self) {
        let snapshot = lock(&self.metrics).snapshot();
        self.hub.publish(CHANNEL_WORKERS, &HubEvent::WorkerMetrics(snapshot));
    }

    fn activity(&self, kind: ActivityKind, description: impl Into<String>) -> WorkerActivity {
        WorkerActivity::new(&self.worker_id, kind, description)
    }

    fn take_dispatch_time(&self, task_id: &str) -> Option<Duration> {
        lock(&self.dispatched_at).remove(task_id).map(|t| t.elapsed())
    }

    fn handle_frame(&self, frame: Frame) {
        match frame {
            Frame::Message(message) => self.handle_message(message),
            Frame::Text(raw) => {
                debug!(worker_id = %self.worker_id, line = %raw, "non-protocol output from worker");
                self.publish_activity(self.activity(ActivityKind::Log, raw));
            }
        }
    }

    fn handle_message(&self, message: Message) {
        match message.kind {
            MessageType::Initialized => {
                info!(worker_id = %self.worker_id, "worker initialized");
            }
            MessageType::TaskStarted => {
                let task_id = message.payload_str("task_id").unwrap_or(&message.id);
                self.publish_activity(self.activity(ActivityKind::TaskStarted, format!("Started task {task_id}")));
            }
            MessageType::ToolUse => {
                let tool = message
                    .payload_str("tool")
                    .or_else(|| message.payload_str("name"))
                    .unwrap_or("unknown")
                    .to_string();
                let invocations = lock(&self.metrics).record_tool_use(&tool);

                let mut activity = self.activity(
                    ActivityKind::ToolUse,
                    message
                        .payload_str("description")
                        .map(str::to_string)
                        .unwrap_or_else(|| format!("Using {tool}")),
                );
                activity.file_path = message
                    .payload_str("file")
                    .or_else(|| message.payload_str("file_path"))
                    .map(str::to_string);
                activity.tool_name = Some(tool);
                self.publish_activity(activity);

                if self.metrics_every > 0 && invocations % self.metrics_every == 0 {
                    self.publish_metrics();
                }
            }
            MessageType::Progress => {
                let mut activity = self.activity(
                    ActivityKind::Progress,
                    message.payload_str("message").unwrap_or_default(),
                );
                activity.progress = message
                    .payload
                    .get("progress")
                    .and_then(Value::as_f64)
                    .map(|p| p.clamp(0.0, 100.0).round() as u8);
                self.publish_activity(activity);
            }
            MessageType::TaskComplete => {
                let task_id = message.payload_str("task_id").unwrap_or(&message.id).to_string();
                let files = message.payload_strings("files_modified");
                let test_results = message
                    .payload
                    .get("test_results")
                    .and_then(|v| serde_json::from_value::<TestCounts>(v.clone()).ok());
                let elapsed = self.take_dispatch_time(&task_id);
                if self.tasks.contains(&task_id) {
                    lock(&self.metrics).record_completion(elapsed, &files);
                } else {
                    debug!(worker_id = %self.worker_id, task_id = %task_id, "late or unknown task_complete, not counted");
                }

                info!(worker_id = %self.worker_id, task_id = %task_id, files = files.len(), "task complete");
                self.publish_activity(self.activity(ActivityKind::TaskComplete, format!("Completed task {task_id}")));
                self.publish_metrics();
                self.tasks.resolve(
                    &task_id,
                    TaskReport {
                        success: true,
                        files_modified: files,
                        error: None,
                        test_results,
                    },
                );
            }
            MessageType::TaskError => {
                let task_id = message.payload_str("task_id").unwrap_or(&message.id).to_string();
                let reason = message.payload_str("error").unwrap_or("unknown error").to_string();
                let elapsed = self.take_dispatch_time(&task_id);
                if self.tasks.contains(&task_id) {
                    lock(&self.metrics).record_failure(elapsed);
                } else {
                    debug!(worker_id = %self.worker_id, task_id = %task_id, "late or unknown task_error, not counted");
                }

                warn!(worker_id = %self.worker_id, task_id = %task_id, error = %reason, "task failed");
                self.publish_error(format!("Task {task_id} failed: {reason}"));
                self.publish_activity(self.activity(ActivityKind::TaskError, format!("Task {task_id} failed: {reason}")));
                self.publish_metrics();
                self.tasks.resolve(
                    &task_id,
                    TaskReport {
                        success: false,
                        files_modified: message.payload_strings("files_modified"),
                        error: Some(reason),
                        test_results: None,
                    },
                );
            }
            MessageType::Log => {
                let level = message.payload_str("level").unwrap_or("info");
                self.publish_activity(self.activity(
                    ActivityKind::from_log_level(level),
                    message.payload_str("message").unwrap_or_default(),
                ));
            }
            MessageType::ToolsResponse => {
                let request_id = message.payload_str("request_id").unwrap_or(&message.id).to_string();
                let tools = message.payload.get("tools").cloned().unwrap_or(Value::Array(Vec::new()));
                if !self.requests.resolve(&request_id, tools) {
                    debug!(worker_id = %self.worker_id, request_id = %request_id, "tools_response with no waiting request");
                }
            }
            outbound => {
                debug!(worker_id = %self.worker_id, kind = %outbound, "ignoring client-side message type from worker");
            }
        }
    }
}

// ---------------------------------------------------------------------------
// I/O tasks
// ---------------------------------------------------------------------------

async fn write_loop(shared: Arc<Shared>, stdin: ChildStdin, mut rx: mpsc::Receiver<Message>) {
    let mut sink = FramedWrite::new(stdin, MessageCodec::new());
    let mut broken = false;
    while let Some(message) = rx.recv().await {
        if broken {
            debug!(worker_id = %shared.worker_id, kind = %message.kind, "stdin closed, dropping message");
            continue;
        }
        let kind = message.kind;
        if let Err(e) = sink.send(message).await {
            warn!(worker_id = %shared.worker_id, error = %e, "failed to write to worker stdin");
            shared.publish_error(format!("failed to send {kind} to worker: {e}"));
            broken = true;
        }
    }
    debug!(worker_id = %shared.worker_id, "writer finished");
}

async fn read_stdout(shared: Arc<Shared>, stdout: ChildStdout) {
    let mut frames = FramedRead::new(stdout, MessageCodec::new());
    while let Some(frame) = frames.next().await {
        match frame {
            Ok(frame) => shared.handle_frame(frame),
            Err(e) => {
                error!(worker_id = %shared.worker_id, error = %e, "worker stdout read failed");
                shared.publish_error(format!("stdout read error: {e}"));
                if shared.state() == SupervisorState::Running {
                    shared.set_state(SupervisorState::Errored);
                }
                break;
            }
        }
    }
    debug!(worker_id = %shared.worker_id, "worker stdout closed");
    let failed = shared.tasks.cancel_all("worker exited before reporting completion");
    if failed > 0 {
        warn!(worker_id = %shared.worker_id, tasks = failed, "worker exited with tasks in flight");
    }
}

async fn read_stderr(shared: Arc<Shared>, stderr: ChildStderr) {
    let mut lines = FramedRead::new(stderr, TextLineCodec::new());
    while let Some(line) = lines.next().await {
        match line {
            Ok(line) if line.trim().is_empty() => {}
            Ok(line) => {
                debug!(worker_id = %shared.worker_id, line = %line, "worker stderr");
                shared.publish_error(line);
            }
            Err(e) => {
                warn!(worker_id = %shared.worker_id, error = %e, "worker stderr read failed");
                break;
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Supervisor
// ---------------------------------------------------------------------------

struct RunningProcess {
    child: Child,
    pid: Option<u32>,
    io_tasks: Vec<JoinHandle<()>>,
}

/// Supervises one worker subprocess.
pub struct WorkerSupervisor {
    config: WorkerConfig,
    options: SupervisorOptions,
    shared: Arc<Shared>,
    outbound: Mutex<Option<mpsc::Sender<Message>>>,
    process: tokio::sync::Mutex<Option<RunningProcess>>,
    next_seq: AtomicU64,
}

impl fmt::Debug for WorkerSupervisor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkerSupervisor")
            .field("worker_id", &self.config.id)
            .field("kind", &self.config.kind)
            .field("state", &self.state())
            .finish()
    }
}

impl WorkerSupervisor {
    pub fn new(config: WorkerConfig, hub: Arc<Hub>) -> Self {
        Self::with_options(config, hub, SupervisorOptions::default())
    }

    pub fn with_options(config: WorkerConfig, hub: Arc<Hub>, options: SupervisorOptions) -> Self {
        let shared = Arc::new(Shared {
            worker_id: config.id.clone(),
            hub,
            state: Mutex::new(SupervisorState::NotStarted),
            requests: Correlator::new(),
            tasks: Correlator::new(),
            metrics: Mutex::new(WorkerMetrics::new(config.id.clone())),
            dispatched_at: Mutex::new(HashMap::new()),
            metrics_every: options.metrics_every,
        });
        Self {
            config,
            options,
            shared,
            outbound: Mutex::new(None),
            process: tokio::sync::Mutex::new(None),
            next_seq: AtomicU64::new(1),
        }
    }

    pub fn id(&self) -> &str {
        &self.config.id
    }

    pub fn config(&self) -> &WorkerConfig {
        &self.config
    }

    pub fn state(&self) -> SupervisorState {
        self.shared.state()
    }

    pub fn is_running(&self) -> bool {
        self.state() == SupervisorState::Running
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        lock(&self.shared.metrics).snapshot()
    }

    /// Outstanding request/response slots (e.g. `list_tools`).
    pub fn pending_requests(&self) -> usize {
        self.shared.requests.len()
    }

    /// Outstanding task-completion slots.
    pub fn pending_tasks(&self) -> usize {
        self.shared.tasks.len()
    }

    /// OS pid of the running subprocess.
    pub async fn pid(&self) -> Option<u32> {
        self.process.lock().await.as_ref().and_then(|p| p.pid)
    }

    fn next_message_id(&self) -> String {
        let n = self.next_seq.fetch_add(1, Ordering::Relaxed);
        format!("{}_{n}", self.config.id)
    }

    fn not_running(&self) -> SupervisorError {
        SupervisorError::NotRunning {
            worker_id: self.config.id.clone(),
            state: self.state(),
        }
    }

    fn ensure_running(&self) -> Result<(), SupervisorError> {
        if self.is_running() { Ok(()) } else { Err(self.not_running()) }
    }

    /// Spawn the subprocess, start the I/O tasks and send `initialize`.
    pub async fn start(&self) -> Result<(), SupervisorError> {
        let mut process = self.process.lock().await;
        if process.is_some() {
            return Err(SupervisorError::AlreadyRunning {
                worker_id: self.config.id.clone(),
            });
        }
        self.shared.set_state(SupervisorState::Starting);

        let mut cmd = Command::new(&self.config.command);
        cmd.args(self.config.expanded_args());
        // Overlay, don't replace, the inherited environment.
        for (key, value) in self.config.expanded_env() {
            cmd.env(key, value);
        }
        cmd.stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(source) => return Err(self.startup_failed(source)),
        };

        let (Some(stdin), Some(stdout), Some(stderr)) = (child.stdin.take(), child.stdout.take(), child.stderr.take())
        else {
            let _ = child.kill().await;
            return Err(self.startup_failed(std::io::Error::other("worker stdio was not captured")));
        };

        let pid = child.id();
        lock(&self.shared.metrics).mark_started();

        let (tx, rx) = mpsc::channel(self.options.queue_depth.max(1));
        let io_tasks = vec![
            tokio::spawn(write_loop(Arc::clone(&self.shared), stdin, rx)),
            tokio::spawn(read_stdout(Arc::clone(&self.shared), stdout)),
            tokio::spawn(read_stderr(Arc::clone(&self.shared), stderr)),
        ];
        *lock(&self.outbound) = Some(tx);
        *process = Some(RunningProcess { child, pid, io_tasks });
        drop(process);

        self.shared.set_state(SupervisorState::Running);
        info!(worker_id = %self.config.id, kind = %self.config.kind, pid, "worker started");

        self.send(
            MessageType::Initialize,
            payload(json!({
                "worker_id": self.config.id,
                "worker_type": self.config.kind,
                "max_concurrent_tasks": self.config.max_concurrent_tasks,
            })),
        )
        .await?;
        Ok(())
    }

    fn startup_failed(&self, source: std::io::Error) -> SupervisorError {
        self.shared.set_state(SupervisorState::Errored);
        let err = SupervisorError::Startup {
            worker_id: self.config.id.clone(),
            command: self.config.command.clone(),
            source,
        };
        error!(worker_id = %self.config.id, error = %err, "worker failed to start");
        self.shared.publish_error(err.to_string());
        err
    }

    /// Queue a message for the worker. Returns the message id.
    pub async fn send(&self, kind: MessageType, payload: Map<String, Value>) -> Result<String, SupervisorError> {
        let id = self.next_message_id();
        self.send_with_id(kind, id.clone(), payload).await?;
        Ok(id)
    }

    async fn send_with_id(&self, kind: MessageType, id: String, payload: Map<String, Value>) -> Result<(), SupervisorError> {
        self.ensure_running()?;
        let tx = lock(&self.outbound).clone().ok_or_else(|| self.not_running())?;
        tx.send(Message::new(kind, id, payload))
            .await
            .map_err(|_| self.not_running())
    }

    /// Ask the worker for its tool inventory.
    ///
    /// Fails with [`SupervisorError::ToolDiscoveryTimeout`] if no matching
    /// `tools_response` arrives within `timeout`; the pending slot is
    /// removed either way.
    pub async fn list_tools(&self, timeout: Duration) -> Result<Vec<ToolDescriptor>, SupervisorError> {
        self.ensure_running()?;
        let request_id = self.next_message_id();
        let pending = self.shared.requests.register(request_id.clone())?;
        self.send_with_id(
            MessageType::ListTools,
            request_id.clone(),
            payload(json!({ "request_id": request_id })),
        )
        .await?;

        let tools = pending.wait(timeout).await.map_err(|e| match e {
            CorrelationError::TimedOut(timeout) => {
                warn!(worker_id = %self.config.id, ?timeout, "tool discovery timed out");
                SupervisorError::ToolDiscoveryTimeout {
                    worker_id: self.config.id.clone(),
                    timeout,
                }
            }
            CorrelationError::Cancelled(reason) => SupervisorError::Cancelled {
                worker_id: self.config.id.clone(),
                reason,
            },
            other => SupervisorError::Correlation(other),
        })?;

        serde_json::from_value(tools).map_err(|source| SupervisorError::InvalidToolsResponse {
            worker_id: self.config.id.clone(),
            source,
        })
    }

    /// Dispatch a task and wait for its outcome.
    ///
    /// Workers with a completion signal are awaited until `task_complete` /
    /// `task_error` (bounded by [`SupervisorOptions::task_timeout`]). Workers
    /// without one are given [`WorkerConfig::completion_fallback`], after
    /// which the task is reported with [`CompletionKind::Assumed`].
    pub async fn execute_task(&self, task: TaskRequest) -> Result<TaskOutcome, SupervisorError> {
        self.ensure_running()?;
        let task_id = task.task_id.clone();
        let pending = self.shared.tasks.register(task_id.clone())?;
        lock(&self.shared.dispatched_at).insert(task_id.clone(), Instant::now());
        let started = Instant::now();

        if let Err(e) = self.send(MessageType::ExecuteTask, task.to_payload()).await {
            self.shared.take_dispatch_time(&task_id);
            return Err(e);
        }
        info!(worker_id = %self.config.id, task_id = %task_id, title = %task.title, "task dispatched");

        let bound = if self.config.completion_signal {
            self.options.task_timeout
        } else {
            self.config.completion_fallback
        };

        match pending.wait(bound).await {
            Ok(report) => Ok(TaskOutcome {
                task_id,
                worker_id: self.config.id.clone(),
                success: report.success,
                files_modified: report.files_modified,
                error: report.error,
                test_results: report.test_results,
                duration_secs: started.elapsed().as_secs_f64(),
                completion: CompletionKind::Signalled,
            }),
            Err(CorrelationError::TimedOut(_)) if !self.config.completion_signal => {
                let elapsed = self.shared.take_dispatch_time(&task_id);
                lock(&self.shared.metrics).record_completion(elapsed, &task.scope_touch);
                info!(worker_id = %self.config.id, task_id = %task_id, "no completion signal; assuming task finished");
                Ok(TaskOutcome {
                    task_id,
                    worker_id: self.config.id.clone(),
                    success: true,
                    files_modified: task.scope_touch.clone(),
                    error: None,
                    test_results: None,
                    duration_secs: started.elapsed().as_secs_f64(),
                    completion: CompletionKind::Assumed,
                })
            }
            Err(CorrelationError::TimedOut(timeout)) => {
                let elapsed = self.shared.take_dispatch_time(&task_id);
                lock(&self.shared.metrics).record_failure(elapsed);
                self.shared.publish_error(format!("Task {task_id} timed out after {timeout:?}"));
                Err(SupervisorError::TaskTimeout {
                    worker_id: self.config.id.clone(),
                    task_id,
                    timeout,
                })
            }
            Err(CorrelationError::Cancelled(reason)) => {
                self.shared.take_dispatch_time(&task_id);
                Err(SupervisorError::Cancelled {
                    worker_id: self.config.id.clone(),
                    reason,
                })
            }
            Err(other) => Err(other.into()),
        }
    }

    /// Ask the worker to abandon a task and release its waiter.
    pub async fn cancel_task(&self, task_id: &str) -> Result<(), SupervisorError> {
        self.send(MessageType::CancelTask, payload(json!({ "task_id": task_id })))
            .await?;
        self.shared.take_dispatch_time(task_id);
        self.shared
            .tasks
            .fail(task_id, CorrelationError::Cancelled(format!("task {task_id} cancelled")));
        Ok(())
    }

    /// Shut the worker down: `shutdown`, brief wait, SIGTERM, grace period,
    /// then kill. Pending requests are cancelled first. Safe to call in any
    /// state and more than once.
    pub async fn stop(&self) -> Result<(), SupervisorError> {
        let mut process = self.process.lock().await;
        let Some(mut running) = process.take() else {
            debug!(worker_id = %self.config.id, state = %self.state(), "stop: no running process");
            return Ok(());
        };
        self.shared.set_state(SupervisorState::Stopping);
        info!(worker_id = %self.config.id, pid = running.pid, "stopping worker");

        let cancelled = self.shared.requests.cancel_all("worker stopping")
            + self.shared.tasks.cancel_all("worker stopping");
        if cancelled > 0 {
            debug!(worker_id = %self.config.id, cancelled, "cancelled pending requests");
        }
        lock(&self.shared.dispatched_at).clear();

        // Dropping the sender lets the writer flush `shutdown` and close stdin.
        if let Some(tx) = lock(&self.outbound).take() {
            let shutdown = Message::new(MessageType::Shutdown, self.next_message_id(), Map::new());
            if tx.try_send(shutdown).is_err() {
                debug!(worker_id = %self.config.id, "could not queue shutdown message");
            }
        }

        if !wait_for_exit(&mut running.child, self.options.shutdown_grace).await {
            terminate(&mut running.child, running.pid);
            if !wait_for_exit(&mut running.child, self.options.terminate_grace).await {
                warn!(worker_id = %self.config.id, "worker ignored SIGTERM, killing");
                if let Err(e) = running.child.kill().await {
                    warn!(worker_id = %self.config.id, error = %e, "failed to kill worker");
                }
            }
        }

        for handle in running.io_tasks {
            let abort = handle.abort_handle();
            if tokio::time::timeout(self.options.join_timeout, handle).await.is_err() {
                debug!(worker_id = %self.config.id, "I/O task did not finish, aborting");
                abort.abort();
            }
        }

        self.shared.set_state(SupervisorState::Stopped);
        info!(worker_id = %self.config.id, "worker stopped");
        Ok(())
    }
}

async fn wait_for_exit(child: &mut Child, grace: Duration) -> bool {
    matches!(tokio::time::timeout(grace, child.wait()).await, Ok(Ok(_)))
}

fn terminate(child: &mut Child, pid: Option<u32>) {
    #[cfg(unix)]
    {
        if let Some(pid) = pid {
            // SAFETY: pid belongs to a child we spawned and have not yet reaped.
            let ret = unsafe { libc::kill(pid as i32, libc::SIGTERM) };
            if ret == 0 {
                return;
            }
            debug!(pid, "SIGTERM failed, falling back to kill");
        }
    }
    let _ = pid;
    if let Err(e) = child.start_kill() {
        debug!(error = %e, "start_kill failed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hub::Subscription;
    use crate::worker::config::WorkerKind;

    fn supervisor() -> (WorkerSupervisor, Subscription) {
        let hub = Arc::new(Hub::new());
        let sub = hub.connect(CHANNEL_WORKERS, 64);
        let sup = WorkerSupervisor::new(WorkerConfig::new("w1", WorkerKind::Claude, "true"), hub);
        (sup, sub)
    }

    fn inbound(kind: MessageType, body: Value) -> Message {
        Message::new(kind, "m1", payload(body))
    }

    #[test]
    fn tool_use_updates_metrics_and_broadcasts() {
        let (sup, mut sub) = supervisor();
        sup.shared.handle_message(inbound(
            MessageType::ToolUse,
            json!({"tool": "edit_file", "description": "Editing auth", "file": "src/auth.rs"}),
        ));

        assert_eq!(sup.metrics().tools_used.get("edit_file"), Some(&1));
        match sub.try_recv() {
            Some(HubEvent::WorkerActivity(a)) => {
                assert_eq!(a.activity_type, ActivityKind::ToolUse);
                assert_eq!(a.tool_name.as_deref(), Some("edit_file"));
                assert_eq!(a.file_path.as_deref(), Some("src/auth.rs"));
                assert_eq!(a.description, "Editing auth");
            }
            other => panic!("expected activity, got {other:?}"),
        }
    }

    #[test]
    fn metrics_broadcast_every_n_tool_invocations() {
        let (sup, mut sub) = supervisor();
        for _ in 0..10 {
            sup.shared.handle_message(inbound(MessageType::ToolUse, json!({"tool": "bash"})));
        }
        let events = sub.drain();
        let metrics: Vec<_> = events
            .iter()
            .filter(|e| matches!(e, HubEvent::WorkerMetrics(_)))
            .collect();
        assert_eq!(events.len(), 11);
        assert_eq!(metrics.len(), 1, "one snapshot after the tenth invocation");
    }

    #[test]
    fn task_error_counts_failure_and_broadcasts_error() {
        let (sup, mut sub) = supervisor();
        let _pending = sup.shared.tasks.register("t9").unwrap();
        sup.shared.handle_message(inbound(
            MessageType::TaskError,
            json!({"task_id": "t9", "error": "compile failed"}),
        ));

        assert_eq!(sup.metrics().tasks_failed, 1);
        let events = sub.drain();
        assert!(events.iter().any(|e| matches!(
            e,
            HubEvent::WorkerError(err) if err.error == "Task t9 failed: compile failed"
        )));
        assert!(events.iter().any(|e| matches!(
            e,
            HubEvent::WorkerActivity(a) if a.activity_type == ActivityKind::TaskError
        )));
    }

    #[test]
    fn log_levels_and_raw_text_become_activities() {
        let (sup, mut sub) = supervisor();
        sup.shared.handle_message(inbound(MessageType::Log, json!({"level": "warning", "message": "slow disk"})));
        sup.shared.handle_frame(Frame::Text("plain chatter".into()));

        let kinds: Vec<(ActivityKind, String)> = sub
            .drain()
            .into_iter()
            .filter_map(|e| match e {
                HubEvent::WorkerActivity(a) => Some((a.activity_type, a.description)),
                _ => None,
            })
            .collect();
        assert_eq!(
            kinds,
            vec![
                (ActivityKind::Warning, "slow disk".to_string()),
                (ActivityKind::Log, "plain chatter".to_string()),
            ]
        );
    }

    #[test]
    fn progress_is_clamped() {
        let (sup, mut sub) = supervisor();
        sup.shared.handle_message(inbound(MessageType::Progress, json!({"progress": 140, "message": "almost"})));
        match sub.try_recv() {
            Some(HubEvent::WorkerActivity(a)) => assert_eq!(a.progress, Some(100)),
            other => panic!("expected activity, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn task_complete_resolves_waiting_task() {
        let (sup, _sub) = supervisor();
        let pending = sup.shared.tasks.register("t1").unwrap();
        sup.shared.handle_message(inbound(
            MessageType::TaskComplete,
            json!({"task_id": "t1", "files_modified": ["src/a.rs"], "test_results": {"total": 4, "passed": 4, "failed": 0}}),
        ));

        let report = pending.wait(Duration::from_secs(1)).await.unwrap();
        assert!(report.success);
        assert_eq!(report.files_modified, vec!["src/a.rs"]);
        assert_eq!(report.test_results.map(|t| t.passed), Some(4));
        assert_eq!(sup.metrics().tasks_completed, 1);
    }

    #[tokio::test]
    async fn late_task_complete_is_broadcast_but_not_counted() {
        let (sup, mut sub) = supervisor();
        let pending = sup.shared.tasks.register("t2").unwrap();
        lock(&sup.shared.dispatched_at).insert("t2".into(), Instant::now());

        // The waiter gives up first, the way an assumed or timed-out task does.
        assert!(pending.wait(Duration::from_millis(10)).await.is_err());
        lock(&sup.shared.metrics).record_completion(sup.shared.take_dispatch_time("t2"), &["src/".to_string()]);

        sup.shared.handle_message(inbound(MessageType::TaskComplete, json!({"task_id": "t2"})));
        sup.shared.handle_message(inbound(MessageType::TaskError, json!({"task_id": "t2", "error": "too late"})));

        let metrics = sup.metrics();
        assert_eq!(metrics.tasks_completed, 1);
        assert_eq!(metrics.tasks_failed, 0);
        assert!(sub.drain().iter().any(|e| matches!(
            e,
            HubEvent::WorkerActivity(a) if a.activity_type == ActivityKind::TaskComplete
        )));
    }

    #[tokio::test]
    async fn operations_before_start_report_not_running() {
        let (sup, _sub) = supervisor();
        let err = sup.list_tools(Duration::from_millis(10)).await.unwrap_err();
        assert!(matches!(err, SupervisorError::NotRunning { state: SupervisorState::NotStarted, .. }));
        assert!(sup.stop().await.is_ok(), "stop before start is a no-op");
        assert_eq!(sup.state(), SupervisorState::NotStarted);
    }
}
