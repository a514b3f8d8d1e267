//! Persistence collaborator: orchestration records, status history and
//! run artifacts.

pub mod fs;
pub mod memory;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::engine::artifacts::{AccomplishmentReport, AnalysisReport, CoordinationPlan};
use crate::engine::status::{OrchestratorStatus, Phase};

pub use fs::FsStore;
pub use memory::MemoryStore;

/// One orchestration run as persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrchestrationRecord {
    pub id: Uuid,
    pub request: String,
    #[serde(default)]
    pub uploaded_files: Vec<String>,
    pub phase: Phase,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub analysis_id: Option<Uuid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plan_id: Option<Uuid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub accomplishment_id: Option<Uuid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl OrchestrationRecord {
    pub fn new(id: Uuid, request: impl Into<String>, uploaded_files: Vec<String>) -> Self {
        let now = Utc::now();
        Self {
            id,
            request: request.into(),
            uploaded_files,
            phase: Phase::Idle,
            created_at: now,
            updated_at: now,
            analysis_id: None,
            plan_id: None,
            accomplishment_id: None,
            error: None,
        }
    }
}

/// Where the engine writes what it produces. Artifacts are append-only.
#[async_trait]
pub trait Store: Send + Sync {
    async fn create_orchestration(&self, record: &OrchestrationRecord) -> Result<()>;

    /// Replace the stored record with the same id.
    async fn update_orchestration(&self, record: &OrchestrationRecord) -> Result<()>;

    async fn get_orchestration(&self, id: Uuid) -> Result<Option<OrchestrationRecord>>;

    /// All records, oldest first.
    async fn list_orchestrations(&self) -> Result<Vec<OrchestrationRecord>>;

    async fn append_status(&self, orchestration_id: Uuid, status: &OrchestratorStatus) -> Result<()>;

    /// Status snapshots in the order they were appended.
    async fn status_history(&self, orchestration_id: Uuid) -> Result<Vec<OrchestratorStatus>>;

    async fn save_analysis(&self, report: &AnalysisReport) -> Result<()>;

    async fn save_plan(&self, plan: &CoordinationPlan) -> Result<()>;

    async fn save_accomplishment(&self, report: &AccomplishmentReport) -> Result<()>;
}

// Compile-time check: Store must be object-safe.
const _: () = {
    fn _assert_object_safe(_: &dyn Store) {}
};
