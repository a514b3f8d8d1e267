//! Engine phases and the live status snapshot.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Phases of one orchestration run, in order. `Failed` can follow any
/// phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Idle,
    Analytic,
    Planning,
    Validation,
    Execution,
    Integration,
    PostExecution,
    AutoDocumentation,
    Completed,
    Failed,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Analytic => "analytic",
            Self::Planning => "planning",
            Self::Validation => "validation",
            Self::Execution => "execution",
            Self::Integration => "integration",
            Self::PostExecution => "post_execution",
            Self::AutoDocumentation => "auto_documentation",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The engine's own status, overwritten on every step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrchestratorStatus {
    pub phase: Phase,
    /// Progress within the current phase, 0-100.
    pub progress_percent: u8,
    pub current_activity: String,
    pub elapsed_secs: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub estimated_remaining_secs: Option<f64>,
    #[serde(default)]
    pub errors: Vec<String>,
    pub updated_at: DateTime<Utc>,
}

impl Default for OrchestratorStatus {
    fn default() -> Self {
        Self {
            phase: Phase::Idle,
            progress_percent: 0,
            current_activity: "Ready".to_string(),
            elapsed_secs: 0.0,
            estimated_remaining_secs: None,
            errors: Vec::new(),
            updated_at: Utc::now(),
        }
    }
}

/// `elapsed / progress * (100 - progress)`, or `None` before any progress.
pub fn estimate_remaining(elapsed: Duration, progress_percent: u8) -> Option<Duration> {
    let progress = u32::from(progress_percent.min(100));
    if progress == 0 {
        return None;
    }
    Some(elapsed.mul_f64(f64::from(100 - progress) / f64::from(progress)))
}

fn lock(status: &Mutex<OrchestratorStatus>) -> MutexGuard<'_, OrchestratorStatus> {
    status.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Read-only view of a running engine's status.
#[derive(Debug, Clone)]
pub struct StatusHandle(Arc<Mutex<OrchestratorStatus>>);

impl StatusHandle {
    pub fn snapshot(&self) -> OrchestratorStatus {
        lock(&self.0).clone()
    }
}

/// Owns the status and keeps progress monotonic within a phase.
#[derive(Debug)]
pub struct StatusTracker {
    shared: Arc<Mutex<OrchestratorStatus>>,
    started: Option<Instant>,
}

impl Default for StatusTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl StatusTracker {
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Mutex::new(OrchestratorStatus::default())),
            started: None,
        }
    }

    pub fn handle(&self) -> StatusHandle {
        StatusHandle(Arc::clone(&self.shared))
    }

    /// Start the elapsed-time clock.
    pub fn start(&mut self) {
        self.started = Some(Instant::now());
    }

    fn elapsed(&self) -> Duration {
        self.started.map(|s| s.elapsed()).unwrap_or_default()
    }

    /// Move to `phase` at `progress` percent with a new activity line.
    ///
    /// Within the same phase progress never goes backwards; entering a new
    /// phase resets it.
    pub fn update(&mut self, phase: Phase, progress: u8, activity: impl Into<String>) -> OrchestratorStatus {
        let elapsed = self.elapsed();
        let mut status = lock(&self.shared);
        let progress = progress.min(100);
        let progress = if status.phase == phase {
            progress.max(status.progress_percent)
        } else {
            progress
        };
        status.phase = phase;
        status.progress_percent = progress;
        status.current_activity = activity.into();
        status.elapsed_secs = elapsed.as_secs_f64();
        status.estimated_remaining_secs = estimate_remaining(elapsed, progress).map(|d| d.as_secs_f64());
        status.updated_at = Utc::now();
        status.clone()
    }

    pub fn record_error(&mut self, error: impl Into<String>) {
        lock(&self.shared).errors.push(error.into());
    }

    pub fn snapshot(&self) -> OrchestratorStatus {
        lock(&self.shared).clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_idle() {
        let tracker = StatusTracker::new();
        let s = tracker.snapshot();
        assert_eq!(s.phase, Phase::Idle);
        assert_eq!(s.progress_percent, 0);
        assert_eq!(s.current_activity, "Ready");
    }

    #[test]
    fn progress_is_monotonic_within_a_phase() {
        let mut tracker = StatusTracker::new();
        tracker.update(Phase::Analytic, 40, "a");
        let s = tracker.update(Phase::Analytic, 20, "b");
        assert_eq!(s.progress_percent, 40);
        assert_eq!(s.current_activity, "b");

        let s = tracker.update(Phase::Planning, 5, "c");
        assert_eq!(s.progress_percent, 5);
        let s = tracker.update(Phase::Planning, 250, "d");
        assert_eq!(s.progress_percent, 100);
    }

    #[test]
    fn handle_sees_updates_and_errors() {
        let mut tracker = StatusTracker::new();
        let handle = tracker.handle();
        tracker.update(Phase::Execution, 50, "wave 1");
        tracker.record_error("boom");
        let s = handle.snapshot();
        assert_eq!(s.phase, Phase::Execution);
        assert_eq!(s.errors, vec!["boom"]);
    }

    #[test]
    fn eta_formula() {
        assert_eq!(estimate_remaining(Duration::from_secs(10), 0), None);
        assert_eq!(estimate_remaining(Duration::from_secs(10), 50), Some(Duration::from_secs(10)));
        assert_eq!(estimate_remaining(Duration::from_secs(10), 25), Some(Duration::from_secs(30)));
        assert_eq!(estimate_remaining(Duration::from_secs(10), 100), Some(Duration::ZERO));
    }

    #[test]
    fn phase_serializes_snake_case() {
        assert_eq!(serde_json::to_string(&Phase::PostExecution).unwrap(), "\"post_execution\"");
        assert_eq!(Phase::AutoDocumentation.to_string(), "auto_documentation");
        assert!(Phase::Failed.is_terminal());
        assert!(!Phase::Execution.is_terminal());
    }
}
