//! The orchestration phase engine.
//!
//! One [`PhaseEngine`] drives one run through
//!
//! ```text
//! IDLE -> ANALYTIC -> PLANNING -> VALIDATION -> EXECUTION -> INTEGRATION
//!      -> POST_EXECUTION -> AUTO_DOCUMENTATION -> COMPLETED
//! ```
//!
//! with a transition to FAILED from any phase. [`PhaseEngine::run`] consumes
//! the engine and returns a lazy stream of [`ProgressEvent`]s that ends with
//! `cycle_complete` or `failed`. Failures are never retried here.

pub mod artifacts;
pub mod dispatch;
pub mod events;
mod run;
pub mod status;

use std::path::PathBuf;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use futures::Stream;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::analysis::{CodebaseLimits, KeywordClassifier, TaskClassifier};
use crate::docs::{DocsUpdater, ProseWriter};
use crate::hub::Hub;
use crate::scope::{DEFAULT_MAX_RESOLUTION_PASSES, Objective};
use crate::store::{MemoryStore, Store};
use crate::vcs::VersionControl;

pub use artifacts::{AccomplishmentReport, AnalysisReport, CoordinationPlan, IntegrationStatus, TestSummary, commit_message};
pub use dispatch::Dispatcher;
pub use events::ProgressEvent;
pub use status::{OrchestratorStatus, Phase, StatusHandle, StatusTracker, estimate_remaining};

/// Error message of a run stopped through its cancellation token.
pub const CANCELLED: &str = "orchestration cancelled";

/// Engine settings.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Paths no objective may ever touch.
    pub global_forbid: Vec<String>,
    pub max_resolution_passes: usize,
    /// Root scanned during analysis. The working directory is used when
    /// this is unset and files were uploaded.
    pub project_root: Option<PathBuf>,
    /// Upper bound on a single objective, dispatch to outcome.
    pub task_timeout: Duration,
    /// Commit modified files after documentation.
    pub auto_commit: bool,
    pub codebase_limits: CodebaseLimits,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            global_forbid: Vec::new(),
            max_resolution_passes: DEFAULT_MAX_RESOLUTION_PASSES,
            project_root: None,
            task_timeout: Duration::from_secs(30 * 60),
            auto_commit: false,
            codebase_limits: CodebaseLimits::default(),
        }
    }
}

/// What one run is asked to do.
#[derive(Debug, Clone, PartialEq)]
pub struct RunRequest {
    pub request: String,
    pub uploaded_files: Vec<String>,
    /// Hand-authored objectives; replaces heuristic decomposition.
    pub objectives: Option<Vec<Objective>>,
    /// `false` plans and validates but skips every wave.
    pub execute: bool,
}

impl RunRequest {
    pub fn new(request: impl Into<String>) -> Self {
        Self {
            request: request.into(),
            uploaded_files: Vec::new(),
            objectives: None,
            execute: true,
        }
    }

    pub fn with_files(mut self, files: Vec<String>) -> Self {
        self.uploaded_files = files;
        self
    }

    pub fn with_objectives(mut self, objectives: Vec<Objective>) -> Self {
        self.objectives = Some(objectives);
        self
    }

    pub fn dry_run(mut self) -> Self {
        self.execute = false;
        self
    }
}

/// An unrecovered error inside a phase. Ends the run.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{phase} phase failed: {message}")]
pub struct PhaseFailure {
    pub phase: Phase,
    pub message: String,
}

/// Progress events of one run.
pub type ProgressStream = Pin<Box<dyn Stream<Item = ProgressEvent> + Send>>;

/// Drives a single orchestration run.
pub struct PhaseEngine {
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
}

impl std::fmt::Debug for PhaseEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PhaseEngine")
            .field("id", &self.id)
            .field("config", &self.config)
            .field("dispatcher", &self.dispatcher.is_some())
            .field("hub", &self.hub.is_some())
            .finish_non_exhaustive()
    }
}

impl PhaseEngine {
    /// An engine with an in-memory store, the keyword classifier and no
    /// dispatcher. Without a dispatcher only dry runs can complete.
    pub fn new(config: EngineConfig) -> Self {
        Self {
            id: Uuid::new_v4(),
            config,
            store: Arc::new(MemoryStore::new()),
            dispatcher: None,
            classifier: Arc::new(KeywordClassifier::default()),
            docs: None,
            vcs: None,
            prose: None,
            hub: None,
            tracker: StatusTracker::new(),
        }
    }

    pub fn with_store(mut self, store: Arc<dyn Store>) -> Self {
        self.store = store;
        self
    }

    pub fn with_dispatcher(mut self, dispatcher: Arc<dyn Dispatcher>) -> Self {
        self.dispatcher = Some(dispatcher);
        self
    }

    pub fn with_classifier(mut self, classifier: Arc<dyn TaskClassifier>) -> Self {
        self.classifier = classifier;
        self
    }

    pub fn with_docs(mut self, docs: Arc<dyn DocsUpdater>) -> Self {
        self.docs = Some(docs);
        self
    }

    pub fn with_vcs(mut self, vcs: Arc<dyn VersionControl>) -> Self {
        self.vcs = Some(vcs);
        self
    }

    pub fn with_prose(mut self, prose: Arc<dyn ProseWriter>) -> Self {
        self.prose = Some(prose);
        self
    }

    /// Mirror every progress event to the hub's `orchestration` channel.
    pub fn with_hub(mut self, hub: Arc<Hub>) -> Self {
        self.hub = Some(hub);
        self
    }

    pub fn orchestration_id(&self) -> Uuid {
        self.id
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// A live view of the status that stays valid after [`run`](Self::run)
    /// consumes the engine.
    pub fn status_handle(&self) -> StatusHandle {
        self.tracker.handle()
    }

    /// Start the run. Nothing happens until the stream is polled; dropping
    /// the stream abandons the run.
    pub fn run(self, request: RunRequest, cancel: CancellationToken) -> ProgressStream {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let run = run::Run::new(self, tx);

        let stream = async_stream::stream! {
            let drive = run.drive(request, cancel);
            tokio::pin!(drive);
            let mut finished = false;
            loop {
                let next = tokio::select! {
                    biased;
                    event = rx.recv() => event,
                    () = &mut drive, if !finished => {
                        finished = true;
                        continue;
                    }
                };
                match next {
                    Some(event) => yield event,
                    None => break,
                }
            }
        };

        Box::pin(stream)
    }
}
