//! Per-worker counters, owned and mutated by a single supervisor.

use std::collections::{BTreeMap, BTreeSet};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

/// Live counters for one worker.
#[derive(Debug, Clone)]
pub struct WorkerMetrics {
    worker_id: String,
    tasks_completed: u64,
    tasks_failed: u64,
    tools_used: BTreeMap<String, u64>,
    tool_invocations: u64,
    files_modified: BTreeSet<String>,
    avg_task_duration: Duration,
    timed_tasks: u64,
    started_at: Option<Instant>,
}

/// A serializable point-in-time copy of [`WorkerMetrics`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub worker_id: String,
    pub tasks_completed: u64,
    pub tasks_failed: u64,
    pub tools_used: BTreeMap<String, u64>,
    pub files_modified: Vec<String>,
    /// Seconds.
    pub avg_task_duration: f64,
    pub uptime_seconds: f64,
}

impl WorkerMetrics {
    pub fn new(worker_id: impl Into<String>) -> Self {
        Self {
            worker_id: worker_id.into(),
            tasks_completed: 0,
            tasks_failed: 0,
            tools_used: BTreeMap::new(),
            tool_invocations: 0,
            files_modified: BTreeSet::new(),
            avg_task_duration: Duration::ZERO,
            timed_tasks: 0,
            started_at: None,
        }
    }

    /// Start the uptime clock (called when the subprocess is spawned).
    pub fn mark_started(&mut self) {
        self.started_at = Some(Instant::now());
    }

    /// Count a tool invocation and return the total invocation count.
    pub fn record_tool_use(&mut self, tool: &str) -> u64 {
        *self.tools_used.entry(tool.to_string()).or_insert(0) += 1;
        self.tool_invocations += 1;
        self.tool_invocations
    }

    pub fn record_completion(&mut self, duration: Option<Duration>, files: &[String]) {
        self.tasks_completed += 1;
        if let Some(d) = duration {
            self.record_duration(d);
        }
        self.add_files(files);
    }

    pub fn record_failure(&mut self, duration: Option<Duration>) {
        self.tasks_failed += 1;
        if let Some(d) = duration {
            self.record_duration(d);
        }
    }

    pub fn add_files(&mut self, files: &[String]) {
        self.files_modified.extend(files.iter().cloned());
    }

    fn record_duration(&mut self, d: Duration) {
        self.timed_tasks += 1;
        // Running mean: avg += (x - avg) / n
        let n = self.timed_tasks as f64;
        let avg = self.avg_task_duration.as_secs_f64();
        let next = avg + (d.as_secs_f64() - avg) / n;
        self.avg_task_duration = Duration::from_secs_f64(next.max(0.0));
    }

    pub fn tasks_completed(&self) -> u64 {
        self.tasks_completed
    }

    pub fn tasks_failed(&self) -> u64 {
        self.tasks_failed
    }

    pub fn tool_invocations(&self) -> u64 {
        self.tool_invocations
    }

    pub fn tool_count(&self, tool: &str) -> u64 {
        self.tools_used.get(tool).copied().unwrap_or(0)
    }

    pub fn avg_task_duration(&self) -> Duration {
        self.avg_task_duration
    }

    pub fn uptime(&self) -> Duration {
        self.started_at.map(|t| t.elapsed()).unwrap_or(Duration::ZERO)
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            worker_id: self.worker_id.clone(),
            tasks_completed: self.tasks_completed,
            tasks_failed: self.tasks_failed,
            tools_used: self.tools_used.clone(),
            files_modified: self.files_modified.iter().cloned().collect(),
            avg_task_duration: self.avg_task_duration.as_secs_f64(),
            uptime_seconds: self.uptime().as_secs_f64(),
        }
    }
}
