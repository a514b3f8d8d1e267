//! Directory-backed [`Store`].
//!
//! ```text
//! <root>/
//!   orchestrations/<id>.json
//!   status/<id>.jsonl
//!   analyses/<report_id>.{json,md}
//!   plans/<plan_id>.{json,md}
//!   accomplishments/<accomplishment_id>.{json,md}
//! ```

use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::io::AsyncWriteExt;
use uuid::Uuid;

use crate::docs::markdown::{render_accomplishment, render_analysis, render_plan};
use crate::engine::artifacts::{AccomplishmentReport, AnalysisReport, CoordinationPlan};
use crate::engine::status::OrchestratorStatus;

use super::{OrchestrationRecord, Store};

const ORCHESTRATIONS: &str = "orchestrations";
const STATUS: &str = "status";
const ANALYSES: &str = "analyses";
const PLANS: &str = "plans";
const ACCOMPLISHMENTS: &str = "accomplishments";

#[derive(Debug, Clone)]
pub struct FsStore {
    root: PathBuf,
}

impl FsStore {
    /// A store rooted at `root`. Directories are created on first write.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn record_path(&self, id: Uuid) -> PathBuf {
        self.root.join(ORCHESTRATIONS).join(format!("{id}.json"))
    }

    fn status_path(&self, id: Uuid) -> PathBuf {
        self.root.join(STATUS).join(format!("{id}.jsonl"))
    }

    /// Path of a rendered markdown artifact, e.g. `plans/<id>.md`.
    pub fn markdown_path(&self, kind: &str, id: Uuid) -> PathBuf {
        self.root.join(kind).join(format!("{id}.md"))
    }

    async fn ensure_dir(&self, dir: &str) -> Result<PathBuf> {
        let path = self.root.join(dir);
        tokio::fs::create_dir_all(&path)
            .await
            .with_context(|| format!("failed to create {}", path.display()))?;
        Ok(path)
    }

    async fn write_json<T: Serialize + Sync>(&self, path: &Path, value: &T) -> Result<()> {
        let json = serde_json::to_string_pretty(value)?;
        tokio::fs::write(path, json)
            .await
            .with_context(|| format!("failed to write {}", path.display()))
    }

    async fn read_json<T: DeserializeOwned>(&self, path: &Path) -> Result<Option<T>> {
        match tokio::fs::read_to_string(path).await {
            Ok(content) => {
                let value = serde_json::from_str(&content).with_context(|| format!("invalid JSON in {}", path.display()))?;
                Ok(Some(value))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e).with_context(|| format!("failed to read {}", path.display())),
        }
    }

    async fn save_artifact<T: Serialize + Sync>(&self, kind: &str, id: Uuid, value: &T, markdown: String) -> Result<()> {
        let dir = self.ensure_dir(kind).await?;
        self.write_json(&dir.join(format!("{id}.json")), value).await?;
        let md_path = dir.join(format!("{id}.md"));
        tokio::fs::write(&md_path, markdown)
            .await
            .with_context(|| format!("failed to write {}", md_path.display()))?;
        tracing::debug!(kind, %id, "artifact saved");
        Ok(())
    }
}

#[async_trait]
impl Store for FsStore {
    async fn create_orchestration(&self, record: &OrchestrationRecord) -> Result<()> {
        self.ensure_dir(ORCHESTRATIONS).await?;
        let path = self.record_path(record.id);
        if tokio::fs::try_exists(&path).await.unwrap_or(false) {
            bail!("orchestration {} already exists", record.id);
        }
        self.write_json(&path, record).await
    }

    async fn update_orchestration(&self, record: &OrchestrationRecord) -> Result<()> {
        let path = self.record_path(record.id);
        if !tokio::fs::try_exists(&path).await.unwrap_or(false) {
            bail!("orchestration {} not found", record.id);
        }
        self.write_json(&path, record).await
    }

    async fn get_orchestration(&self, id: Uuid) -> Result<Option<OrchestrationRecord>> {
        self.read_json(&self.record_path(id)).await
    }

    async fn list_orchestrations(&self) -> Result<Vec<OrchestrationRecord>> {
        let dir = self.root.join(ORCHESTRATIONS);
        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e).with_context(|| format!("failed to list {}", dir.display())),
        };

        let mut records = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            match self.read_json::<OrchestrationRecord>(&path).await {
                Ok(Some(record)) => records.push(record),
                Ok(None) => {}
                Err(e) => tracing::warn!(path = %path.display(), error = %e, "skipping unreadable orchestration record"),
            }
        }
        records.sort_by_key(|r| r.created_at);
        Ok(records)
    }

    async fn append_status(&self, orchestration_id: Uuid, status: &OrchestratorStatus) -> Result<()> {
        self.ensure_dir(STATUS).await?;
        let path = self.status_path(orchestration_id);
        let mut line = serde_json::to_string(status)?;
        line.push('\n');
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await
            .with_context(|| format!("failed to open {}", path.display()))?;
        file.write_all(line.as_bytes()).await?;
        file.flush().await?;
        Ok(())
    }

    async fn status_history(&self, orchestration_id: Uuid) -> Result<Vec<OrchestratorStatus>> {
        let path = self.status_path(orchestration_id);
        let content = match tokio::fs::read_to_string(&path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e).with_context(|| format!("failed to read {}", path.display())),
        };
        content
            .lines()
            .filter(|l| !l.trim().is_empty())
            .map(|l| serde_json::from_str(l).with_context(|| format!("invalid status line in {}", path.display())))
            .collect()
    }

    async fn save_analysis(&self, report: &AnalysisReport) -> Result<()> {
        self.save_artifact(ANALYSES, report.report_id, report, render_analysis(report))
            .await
    }

    async fn save_plan(&self, plan: &CoordinationPlan) -> Result<()> {
        self.save_artifact(PLANS, plan.plan_id, plan, render_plan(plan)).await
    }

    async fn save_accomplishment(&self, report: &AccomplishmentReport) -> Result<()> {
        self.save_artifact(ACCOMPLISHMENTS, report.accomplishment_id, report, render_accomplishment(report))
            .await
    }
}
