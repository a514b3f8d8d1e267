//! Artifacts produced once per run: analysis, coordination plan and
//! accomplishment. None is mutated after it is emitted.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::analysis::{CodebaseStructure, TaskType};
use crate::scope::{Deferral, IntegrationContract, Objective, ScopeValidation, Wave};
use crate::worker::TestCounts;

/// Output of the analytic phase.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisReport {
    pub report_id: Uuid,
    pub orchestration_id: Uuid,
    pub owner_request: String,
    pub uploaded_files: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub codebase: Option<CodebaseStructure>,
    pub coordination_points: Vec<String>,
    pub identified_modules: Vec<String>,
    pub scope_strategy: String,
    pub task_type: TaskType,
    pub timestamp: DateTime<Utc>,
}

/// Output of planning and validation.
///
/// For every wave the `scope_touch` sets of its objectives are pairwise
/// disjoint, and no touch prefix lies inside `global_forbid`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoordinationPlan {
    pub plan_id: Uuid,
    pub orchestration_id: Uuid,
    pub analysis_report_id: Uuid,
    pub plan_type: TaskType,
    pub waves: Vec<Wave>,
    pub integration_contracts: Vec<IntegrationContract>,
    pub global_forbid: Vec<String>,
    /// Validation of the final wave assignment.
    pub scope_validation: ScopeValidation,
    /// Objectives moved to later waves while resolving conflicts.
    #[serde(default)]
    pub deferrals: Vec<Deferral>,
    pub estimated_duration: String,
    pub timestamp: DateTime<Utc>,
}

impl CoordinationPlan {
    /// All objectives in wave order.
    pub fn objectives(&self) -> impl Iterator<Item = &Objective> {
        self.waves.iter().flat_map(|w| w.objectives.iter())
    }

    pub fn objective_count(&self) -> usize {
        self.waves.iter().map(|w| w.objectives.len()).sum()
    }
}

/// How well the executed objectives fit together.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntegrationStatus {
    /// Every objective succeeded.
    Success,
    Partial,
    /// No objective succeeded.
    Failed,
    /// Nothing was executed.
    Skipped,
}

impl IntegrationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Partial => "partial",
            Self::Failed => "failed",
            Self::Skipped => "skipped",
        }
    }

    /// Derive the status from succeeded/total counts.
    pub fn from_counts(succeeded: usize, total: usize) -> Self {
        if total == 0 {
            Self::Skipped
        } else if succeeded == total {
            Self::Success
        } else if succeeded == 0 {
            Self::Failed
        } else {
            Self::Partial
        }
    }
}

impl fmt::Display for IntegrationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Aggregated worker-reported test counts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestSummary {
    /// `passed`, `failed` or `not_run`.
    pub status: String,
    pub total: u64,
    pub passed: u64,
    pub failed: u64,
}

impl From<TestCounts> for TestSummary {
    fn from(counts: TestCounts) -> Self {
        let status = if counts.total == 0 && counts.failed == 0 {
            "not_run"
        } else if counts.failed > 0 {
            "failed"
        } else {
            "passed"
        };
        Self {
            status: status.to_string(),
            total: counts.total,
            passed: counts.passed,
            failed: counts.failed,
        }
    }
}

/// Output of post-execution: what the run produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccomplishmentReport {
    pub accomplishment_id: Uuid,
    pub orchestration_id: Uuid,
    pub plan_id: Uuid,
    pub summary: String,
    pub objectives_completed: Vec<String>,
    #[serde(default)]
    pub objectives_failed: Vec<String>,
    pub files_modified: Vec<String>,
    pub test_results: TestSummary,
    pub quality_gates: BTreeMap<String, String>,
    pub integration_status: IntegrationStatus,
    pub known_issues: Vec<String>,
    pub next_steps: Vec<String>,
    pub commit_message: String,
    pub timestamp: DateTime<Utc>,
}

/// Longest subject line before truncation.
const SUBJECT_CHARS: usize = 50;

/// Conventional commit message for an accomplishment.
///
/// ```text
/// feat: <first summary line, at most 50 chars>
///
/// <summary>
///
/// Objectives completed:
/// - <title>
///
/// Modified files: <n>
/// Tests: <status>
/// ```
pub fn commit_message(task_type: TaskType, report: &AccomplishmentReport) -> String {
    let first_line = report.summary.lines().next().unwrap_or_default();
    let subject: String = first_line.chars().take(SUBJECT_CHARS).collect();

    let mut msg = format!("{}: {subject}\n\n{}\n\nObjectives completed:\n", task_type.commit_prefix(), report.summary);
    if report.objectives_completed.is_empty() {
        msg.push_str("- none\n");
    }
    for title in &report.objectives_completed {
        msg.push_str(&format!("- {title}\n"));
    }
    msg.push_str(&format!(
        "\nModified files: {}\nTests: {}\n",
        report.files_modified.len(),
        report.test_results.status
    ));
    msg
}

#[cfg(test)]
mod tests {
    use super::*;

    fn report(summary: &str) -> AccomplishmentReport {
        AccomplishmentReport {
            accomplishment_id: Uuid::new_v4(),
            orchestration_id: Uuid::new_v4(),
            plan_id: Uuid::new_v4(),
            summary: summary.to_string(),
            objectives_completed: vec!["Feature: login".to_string()],
            objectives_failed: Vec::new(),
            files_modified: vec!["src/a.rs".to_string(), "src/b.rs".to_string()],
            test_results: TestCounts {
                total: 3,
                passed: 3,
                failed: 0,
            }
            .into(),
            quality_gates: BTreeMap::new(),
            integration_status: IntegrationStatus::Success,
            known_issues: Vec::new(),
            next_steps: Vec::new(),
            commit_message: String::new(),
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn commit_message_layout() {
        let msg = commit_message(TaskType::Feature, &report("Completed feature: add login"));
        assert!(msg.starts_with("feat: Completed feature: add login\n\n"));
        assert!(msg.contains("Objectives completed:\n- Feature: login\n"));
        assert!(msg.contains("Modified files: 2\n"));
        assert!(msg.ends_with("Tests: passed\n"));
    }

    #[test]
    fn commit_subject_is_truncated() {
        let long = "y".repeat(120);
        let msg = commit_message(TaskType::Bug, &report(&format!("{long}\nsecond line")));
        let subject = msg.lines().next().unwrap();
        assert_eq!(subject, format!("fix: {}", "y".repeat(50)));
    }

    #[test]
    fn integration_status_from_counts() {
        assert_eq!(IntegrationStatus::from_counts(0, 0), IntegrationStatus::Skipped);
        assert_eq!(IntegrationStatus::from_counts(2, 2), IntegrationStatus::Success);
        assert_eq!(IntegrationStatus::from_counts(1, 2), IntegrationStatus::Partial);
        assert_eq!(IntegrationStatus::from_counts(0, 2), IntegrationStatus::Failed);
    }

    #[test]
    fn test_summary_status() {
        assert_eq!(TestSummary::from(TestCounts::default()).status, "not_run");
        let failed = TestCounts {
            total: 4,
            passed: 3,
            failed: 1,
        };
        assert_eq!(TestSummary::from(failed).status, "failed");
    }
}
