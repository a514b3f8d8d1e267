//! Progress events yielded by a run, in order.
//!
//! Serialized with a `type` tag, e.g.
//! `{"type":"task_type_determined","task_type":"feature"}`.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::analysis::TaskType;
use crate::scope::{Deferral, ScopeConflict};

use super::artifacts::{AccomplishmentReport, AnalysisReport, CoordinationPlan, IntegrationStatus};
use super::status::{OrchestratorStatus, Phase};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProgressEvent {
    PhaseStart {
        phase: Phase,
    },
    Activity {
        activity: String,
        status: OrchestratorStatus,
    },
    CodebaseAnalyzed {
        modules: usize,
        entry_points: Vec<String>,
    },
    TaskTypeDetermined {
        task_type: TaskType,
    },
    CoordinationPoints {
        points: Vec<String>,
    },
    ScopeStrategy {
        strategy: String,
    },
    ObjectivesCreated {
        count: usize,
    },
    WavesCreated {
        wave_count: usize,
    },
    ScopeValidated {
        valid: bool,
        conflicts: Vec<ScopeConflict>,
    },
    ConflictsResolved {
        passes: usize,
        deferred: Vec<Deferral>,
    },
    PhaseComplete {
        phase: Phase,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        report: Option<Box<AnalysisReport>>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        plan: Option<Box<CoordinationPlan>>,
    },
    WaveStarted {
        wave: u32,
        total_waves: usize,
        objectives: Vec<String>,
    },
    ObjectiveCompleted {
        wave: u32,
        objective: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        worker_id: Option<String>,
        success: bool,
        files_modified: Vec<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    WaveCompleted {
        wave: u32,
        succeeded: usize,
        failed: usize,
    },
    WavesSkipped {
        waves: Vec<u32>,
    },
    IntegrationChecked {
        status: IntegrationStatus,
        violations: Vec<String>,
    },
    DocumentationUpdated {
        updates: BTreeMap<String, String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        commit: Option<String>,
    },
    CycleComplete {
        accomplishment: Box<AccomplishmentReport>,
    },
    /// Terminal failure.
    Failed {
        phase: Phase,
        error: String,
        status: OrchestratorStatus,
    },
}

impl ProgressEvent {
    /// The wire name of this event, matching its `type` tag.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::PhaseStart { .. } => "phase_start",
            Self::Activity { .. } => "activity",
            Self::CodebaseAnalyzed { .. } => "codebase_analyzed",
            Self::TaskTypeDetermined { .. } => "task_type_determined",
            Self::CoordinationPoints { .. } => "coordination_points",
            Self::ScopeStrategy { .. } => "scope_strategy",
            Self::ObjectivesCreated { .. } => "objectives_created",
            Self::WavesCreated { .. } => "waves_created",
            Self::ScopeValidated { .. } => "scope_validated",
            Self::ConflictsResolved { .. } => "conflicts_resolved",
            Self::PhaseComplete { .. } => "phase_complete",
            Self::WaveStarted { .. } => "wave_started",
            Self::ObjectiveCompleted { .. } => "objective_completed",
            Self::WaveCompleted { .. } => "wave_completed",
            Self::WavesSkipped { .. } => "waves_skipped",
            Self::IntegrationChecked { .. } => "integration_checked",
            Self::DocumentationUpdated { .. } => "documentation_updated",
            Self::CycleComplete { .. } => "cycle_complete",
            Self::Failed { .. } => "failed",
        }
    }

    /// `cycle_complete` and `failed` end the stream.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::CycleComplete { .. } | Self::Failed { .. })
    }
}
