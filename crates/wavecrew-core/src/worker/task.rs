//! Task requests sent to workers and the outcomes they produce.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use uuid::Uuid;

/// Work handed to a single worker via `execute_task`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskRequest {
    pub task_id: String,
    pub objective_id: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub scope_touch: Vec<String>,
    #[serde(default)]
    pub scope_forbid: Vec<String>,
    #[serde(default = "default_wave")]
    pub wave: u32,
}

fn default_wave() -> u32 {
    1
}

impl TaskRequest {
    /// A request with a fresh task id.
    pub fn new(objective_id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            task_id: format!("task-{}", Uuid::new_v4()),
            objective_id: objective_id.into(),
            title: title.into(),
            description: String::new(),
            scope_touch: Vec::new(),
            scope_forbid: Vec::new(),
            wave: 1,
        }
    }

    /// The `execute_task` payload: `{"task_id": ..., "task": {...}}`.
    pub fn to_payload(&self) -> Map<String, Value> {
        let mut map = Map::new();
        map.insert("task_id".to_string(), Value::String(self.task_id.clone()));
        map.insert(
            "task".to_string(),
            json!({
                "objective_id": self.objective_id,
                "title": self.title,
                "description": self.description,
                "scope_touch": self.scope_touch,
                "scope_forbid": self.scope_forbid,
                "wave": self.wave,
            }),
        );
        map
    }
}

/// Test counts a worker may attach to `task_complete`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestCounts {
    #[serde(default)]
    pub total: u64,
    #[serde(default)]
    pub passed: u64,
    #[serde(default)]
    pub failed: u64,
}

impl TestCounts {
    pub fn merge(&mut self, other: &TestCounts) {
        self.total += other.total;
        self.passed += other.passed;
        self.failed += other.failed;
    }
}

/// How the end of a task was determined.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompletionKind {
    /// The worker sent `task_complete` or `task_error`.
    Signalled,
    /// The worker has no completion signal; the fallback wait elapsed.
    Assumed,
}

/// What the inbound reader learned from `task_complete` / `task_error`.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct TaskReport {
    pub success: bool,
    pub files_modified: Vec<String>,
    pub error: Option<String>,
    pub test_results: Option<TestCounts>,
}

/// The result of one `execute_task` call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskOutcome {
    pub task_id: String,
    pub worker_id: String,
    pub success: bool,
    #[serde(default)]
    pub files_modified: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub test_results: Option<TestCounts>,
    pub duration_secs: f64,
    pub completion: CompletionKind,
}

impl TaskOutcome {
    /// A failed outcome for work that never reached a worker or was cut short.
    pub fn failed(task_id: impl Into<String>, worker_id: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            task_id: task_id.into(),
            worker_id: worker_id.into(),
            success: false,
            files_modified: Vec::new(),
            error: Some(error.into()),
            test_results: None,
            duration_secs: 0.0,
            completion: CompletionKind::Signalled,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payload_nests_task_body_without_task_id() {
        let mut req = TaskRequest::new("obj-1", "Feature: login");
        req.scope_touch = vec!["src/auth/".into()];
        let payload = req.to_payload();

        assert_eq!(payload["task_id"], Value::String(req.task_id.clone()));
        let body = &payload["task"];
        assert_eq!(body["objective_id"], "obj-1");
        assert_eq!(body["scope_touch"], json!(["src/auth/"]));
        assert!(body.get("task_id").is_none());
    }

    #[test]
    fn test_counts_merge() {
        let mut a = TestCounts { total: 3, passed: 2, failed: 1 };
        a.merge(&TestCounts { total: 2, passed: 2, failed: 0 });
        assert_eq!(a, TestCounts { total: 5, passed: 4, failed: 1 });
    }
}
