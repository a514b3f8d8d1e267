//! `AGENTS.md` session log.

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use anyhow::Context;
use async_trait::async_trait;

use crate::engine::artifacts::{AccomplishmentReport, AnalysisReport, CoordinationPlan, IntegrationStatus};

use super::DocsUpdater;

const AGENTS_FILE: &str = "AGENTS.md";
const SECTION: &str = "# Recent Sessions";

/// Prepends a session entry under `# Recent Sessions` in `AGENTS.md`.
///
/// The file is never created; when it is missing the update reports
/// `"AGENTS.md not found"`.
#[derive(Debug, Clone)]
pub struct AgentsLog {
    project_root: PathBuf,
}

impl AgentsLog {
    pub fn new(project_root: impl Into<PathBuf>) -> Self {
        Self {
            project_root: project_root.into(),
        }
    }

    pub fn path(&self) -> PathBuf {
        self.project_root.join(AGENTS_FILE)
    }
}

/// Short lessons drawn from a finished run.
pub fn learnings(accomplishment: &AccomplishmentReport, plan: &CoordinationPlan) -> Vec<String> {
    let mut out = Vec::new();
    if accomplishment.integration_status == IntegrationStatus::Success {
        out.push("Scope allocation was effective - zero conflicts".to_string());
    }
    if plan.waves.len() > 1 {
        out.push(format!(
            "Multi-wave coordination ({} waves) executed successfully",
            plan.waves.len()
        ));
    }
    let gates_passed = accomplishment
        .quality_gates
        .get("scope_audit")
        .is_some_and(|s| s == "passed")
        && accomplishment.test_results.status != "failed";
    if gates_passed && accomplishment.objectives_failed.is_empty() {
        out.push("Quality gates validated integration correctness".to_string());
    }
    out
}

fn list(out: &mut String, items: &[String]) {
    if items.is_empty() {
        out.push_str("- None\n");
    }
    for item in items {
        let _ = writeln!(out, "- {item}");
    }
}

/// The markdown entry for one session.
pub fn session_entry(analysis: &AnalysisReport, plan: &CoordinationPlan, accomplishment: &AccomplishmentReport) -> String {
    let mut e = String::new();
    let _ = writeln!(
        e,
        "\n## Session {} - {}\n",
        accomplishment.orchestration_id,
        accomplishment.timestamp.format("%Y-%m-%d %H:%M:%S")
    );
    let _ = writeln!(e, "### What Was Accomplished\n{}\n", accomplishment.summary);
    let _ = writeln!(
        e,
        "### Coordination Pattern Used\n- **Task Type:** {}\n- **Waves:** {}\n- **Objectives:** {}\n",
        plan.plan_type,
        plan.waves.len(),
        plan.objective_count()
    );
    e.push_str("### Key Learnings\n");
    list(&mut e, &learnings(accomplishment, plan));
    let _ = writeln!(e, "\n### Scope Allocation Strategy\n{}\n", analysis.scope_strategy);
    e.push_str("### Integration Challenges\n");
    list(&mut e, &accomplishment.known_issues);
    e.push_str("\n### Recommended for Future\n");
    let recommended: Vec<String> = accomplishment.next_steps.iter().take(3).cloned().collect();
    list(&mut e, &recommended);
    e.push_str("\n---\n");
    e
}

/// Insert `entry` directly below the first `# Recent Sessions` heading, or
/// append the heading and entry when the section is absent.
pub fn insert_entry(content: &str, entry: &str) -> String {
    if content.contains(SECTION) {
        content.replacen(SECTION, &format!("{SECTION}\n{entry}"), 1)
    } else {
        format!("{content}\n\n{SECTION}\n{entry}")
    }
}

async fn update_agents_file(path: &Path, entry: &str) -> anyhow::Result<bool> {
    let content = match tokio::fs::read_to_string(path).await {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(false),
        Err(e) => return Err(e).with_context(|| format!("failed to read {}", path.display())),
    };
    tokio::fs::write(path, insert_entry(&content, entry))
        .await
        .with_context(|| format!("failed to write {}", path.display()))?;
    Ok(true)
}

#[async_trait]
impl DocsUpdater for AgentsLog {
    async fn update(
        &self,
        analysis: &AnalysisReport,
        plan: &CoordinationPlan,
        accomplishment: &AccomplishmentReport,
    ) -> anyhow::Result<BTreeMap<String, String>> {
        let entry = session_entry(analysis, plan, accomplishment);
        let path = self.path();
        let outcome = if update_agents_file(&path, &entry).await? {
            tracing::info!(path = %path.display(), "recorded session in AGENTS.md");
            format!("Added session {} learnings", accomplishment.orchestration_id)
        } else {
            "AGENTS.md not found".to_string()
        };
        Ok(BTreeMap::from([(AGENTS_FILE.to_string(), outcome)]))
    }
}
