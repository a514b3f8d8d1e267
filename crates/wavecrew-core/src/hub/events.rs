//! Events fanned out through the [`Hub`](super::Hub).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::engine::events::ProgressEvent;
use crate::worker::metrics::MetricsSnapshot;

/// Normalized category of a worker activity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityKind {
    TaskStarted,
    ToolUse,
    Progress,
    TaskComplete,
    TaskError,
    Log,
    Warning,
    Error,
}

impl ActivityKind {
    /// Map a worker log level onto an activity kind.
    pub fn from_log_level(level: &str) -> Self {
        match level.to_ascii_lowercase().as_str() {
            "warning" | "warn" => Self::Warning,
            "error" | "critical" => Self::Error,
            _ => Self::Log,
        }
    }
}

/// One normalized worker activity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerActivity {
    pub worker_id: String,
    pub timestamp: DateTime<Utc>,
    pub activity_type: ActivityKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_name: Option<String>,
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub progress: Option<u8>,
}

impl WorkerActivity {
    pub fn new(worker_id: impl Into<String>, activity_type: ActivityKind, description: impl Into<String>) -> Self {
        Self {
            worker_id: worker_id.into(),
            timestamp: Utc::now(),
            activity_type,
            tool_name: None,
            description: description.into(),
            file_path: None,
            progress: None,
        }
    }
}

/// Something went wrong in or around a worker process.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerError {
    pub worker_id: String,
    pub error: String,
    pub timestamp: DateTime<Utc>,
}

impl WorkerError {
    pub fn new(worker_id: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            worker_id: worker_id.into(),
            error: error.into(),
            timestamp: Utc::now(),
        }
    }
}

/// A progress event from one orchestration run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressEnvelope {
    pub orchestration_id: Uuid,
    pub event: ProgressEvent,
}

/// Everything the hub carries. Serialized with a `type` tag, e.g.
/// `{"type":"worker_error","worker_id":"w1","error":"...","timestamp":"..."}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum HubEvent {
    WorkerActivity(WorkerActivity),
    WorkerMetrics(MetricsSnapshot),
    WorkerError(WorkerError),
    OrchestrationProgress(ProgressEnvelope),
}

impl HubEvent {
    /// The worker this event concerns, if any.
    pub fn worker_id(&self) -> Option<&str> {
        match self {
            Self::WorkerActivity(a) => Some(&a.worker_id),
            Self::WorkerMetrics(m) => Some(&m.worker_id),
            Self::WorkerError(e) => Some(&e.worker_id),
            Self::OrchestrationProgress(_) => None,
        }
    }
}
