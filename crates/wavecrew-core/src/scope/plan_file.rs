//! Hand-authored objective plans.
//!
//! ```toml
//! global_forbid = [".env"]
//!
//! [[objectives]]
//! id = "core"
//! title = "Core module refactoring"
//! worker = "claude"
//! scope_touch = ["src/core/"]
//! scope_forbid = ["tests/"]
//! wave = 1
//! ```

use serde::{Deserialize, Serialize};

use super::ScopeError;
use super::objective::{Objective, WorkerTarget};

/// A single `[[objectives]]` entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObjectiveToml {
    /// Generated as `obj-N` (1-based position) when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub title: String,
    #[serde(default = "default_worker")]
    pub worker: WorkerTarget,
    #[serde(default)]
    pub scope_touch: Vec<String>,
    #[serde(default)]
    pub scope_forbid: Vec<String>,
    #[serde(default = "default_wave")]
    pub wave: u32,
}

fn default_worker() -> WorkerTarget {
    WorkerTarget::Auto
}

fn default_wave() -> u32 {
    1
}

/// Top-level structure of an objective plan file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ObjectivePlanToml {
    #[serde(default)]
    pub global_forbid: Vec<String>,
    #[serde(default)]
    pub objectives: Vec<ObjectiveToml>,
}

/// A parsed objective plan.
#[derive(Debug, Clone, PartialEq)]
pub struct ObjectivePlan {
    pub global_forbid: Vec<String>,
    pub objectives: Vec<Objective>,
}

/// Parse an objective plan from TOML.
pub fn parse_objective_plan(content: &str) -> Result<ObjectivePlan, ScopeError> {
    let raw: ObjectivePlanToml = toml::from_str(content)?;
    if raw.objectives.is_empty() {
        return Err(ScopeError::NoObjectives);
    }

    let objectives = raw
        .objectives
        .into_iter()
        .enumerate()
        .map(|(i, o)| Objective {
            id: o.id.unwrap_or_else(|| format!("obj-{}", i + 1)),
            title: o.title,
            worker: o.worker,
            scope_touch: o.scope_touch,
            scope_forbid: o.scope_forbid,
            wave: o.wave,
        })
        .collect();

    Ok(ObjectivePlan {
        global_forbid: raw.global_forbid,
        objectives,
    })
}
