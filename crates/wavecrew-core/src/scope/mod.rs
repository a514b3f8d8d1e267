//! Scope exclusivity validation and wave scheduling.
//!
//! Objectives carry path-prefix scopes and a wave number. Within a wave no
//! two objectives may have overlapping `scope_touch` sets; conflicts are
//! resolved by deferring the later objective to the next wave, for a bounded
//! number of passes.

pub mod objective;
pub mod plan_file;
pub mod schedule;
pub mod validator;

use thiserror::Error;

pub use objective::{Objective, WorkerTarget, contains};
pub use plan_file::{ObjectivePlan, parse_objective_plan};
pub use schedule::{
    DEFAULT_MAX_RESOLUTION_PASSES, Deferral, IntegrationContract, Resolution, Schedule, Wave, estimate_duration,
    group_into_waves, integration_contracts, resolve_conflicts, schedule,
};
pub use validator::{ForbidViolation, ScopeConflict, ScopeValidation, check_global_forbid, validate};

/// Errors that prevent a valid schedule from being produced.
#[derive(Debug, Error)]
pub enum ScopeError {
    #[error("scope conflicts remain after {passes} resolution passes ({} conflicts)", .conflicts.len())]
    Unresolved {
        passes: usize,
        conflicts: Vec<ScopeConflict>,
    },

    #[error("objective {objective:?} touches globally forbidden paths: {}", .paths.join(", "))]
    ForbiddenScope { objective: String, paths: Vec<String> },

    #[error("duplicate objective id: {0:?}")]
    DuplicateObjective(String),

    #[error("objective {0:?} has wave 0 (waves start at 1)")]
    InvalidWave(String),

    #[error("plan must contain at least one objective")]
    NoObjectives,

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
}
