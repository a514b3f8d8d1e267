//! In-process [`Store`], for tests and embedding.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use anyhow::{Result, bail};
use async_trait::async_trait;
use uuid::Uuid;

use crate::engine::artifacts::{AccomplishmentReport, AnalysisReport, CoordinationPlan};
use crate::engine::status::OrchestratorStatus;

use super::{OrchestrationRecord, Store};

#[derive(Default)]
struct Inner {
    orchestrations: HashMap<Uuid, OrchestrationRecord>,
    statuses: HashMap<Uuid, Vec<OrchestratorStatus>>,
    analyses: Vec<AnalysisReport>,
    plans: Vec<CoordinationPlan>,
    accomplishments: Vec<AccomplishmentReport>,
}

#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl std::fmt::Debug for MemoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryStore").finish_non_exhaustive()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn analyses(&self) -> Vec<AnalysisReport> {
        self.lock().analyses.clone()
    }

    pub fn plans(&self) -> Vec<CoordinationPlan> {
        self.lock().plans.clone()
    }

    pub fn accomplishments(&self) -> Vec<AccomplishmentReport> {
        self.lock().accomplishments.clone()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn create_orchestration(&self, record: &OrchestrationRecord) -> Result<()> {
        let mut inner = self.lock();
        if inner.orchestrations.contains_key(&record.id) {
            bail!("orchestration {} already exists", record.id);
        }
        inner.orchestrations.insert(record.id, record.clone());
        Ok(())
    }

    async fn update_orchestration(&self, record: &OrchestrationRecord) -> Result<()> {
        let mut inner = self.lock();
        match inner.orchestrations.get_mut(&record.id) {
            Some(existing) => {
                *existing = record.clone();
                Ok(())
            }
            None => bail!("orchestration {} not found", record.id),
        }
    }

    async fn get_orchestration(&self, id: Uuid) -> Result<Option<OrchestrationRecord>> {
        Ok(self.lock().orchestrations.get(&id).cloned())
    }

    async fn list_orchestrations(&self) -> Result<Vec<OrchestrationRecord>> {
        let mut records: Vec<_> = self.lock().orchestrations.values().cloned().collect();
        records.sort_by_key(|r| r.created_at);
        Ok(records)
    }

    async fn append_status(&self, orchestration_id: Uuid, status: &OrchestratorStatus) -> Result<()> {
        self.lock()
            .statuses
            .entry(orchestration_id)
            .or_default()
            .push(status.clone());
        Ok(())
    }

    async fn status_history(&self, orchestration_id: Uuid) -> Result<Vec<OrchestratorStatus>> {
        Ok(self.lock().statuses.get(&orchestration_id).cloned().unwrap_or_default())
    }

    async fn save_analysis(&self, report: &AnalysisReport) -> Result<()> {
        self.lock().analyses.push(report.clone());
        Ok(())
    }

    async fn save_plan(&self, plan: &CoordinationPlan) -> Result<()> {
        self.lock().plans.push(plan.clone());
        Ok(())
    }

    async fn save_accomplishment(&self, report: &AccomplishmentReport) -> Result<()> {
        self.lock().accomplishments.push(report.clone());
        Ok(())
    }
}
