//! Conflict resolution by deferral, wave grouping and integration contracts.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use super::ScopeError;
use super::objective::Objective;
use super::validator::{ScopeValidation, by_wave, check_global_forbid, validate};

/// Default bound on resolution passes.
pub const DEFAULT_MAX_RESOLUTION_PASSES: usize = 16;

/// One objective moved to a later wave.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Deferral {
    pub objective_id: String,
    pub objective: String,
    pub from_wave: u32,
    pub to_wave: u32,
}

/// Outcome of [`resolve_conflicts`].
#[derive(Debug, Clone, PartialEq)]
pub struct Resolution {
    pub objectives: Vec<Objective>,
    /// Resolution passes performed; 0 when the input was already valid.
    pub passes: usize,
    pub deferrals: Vec<Deferral>,
    /// Validation of the final assignment (always valid).
    pub validation: ScopeValidation,
}

/// Defer the second-named objective of every conflict to the conflict's
/// wave + 1 and re-validate, for at most `max_passes` passes.
pub fn resolve_conflicts(mut objectives: Vec<Objective>, max_passes: usize) -> Result<Resolution, ScopeError> {
    let mut passes = 0;
    let mut deferrals = Vec::new();

    loop {
        let validation = validate(&objectives);
        if validation.valid {
            return Ok(Resolution {
                objectives,
                passes,
                deferrals,
                validation,
            });
        }
        if passes >= max_passes {
            tracing::warn!(passes, conflicts = validation.conflicts.len(), "scope conflicts did not converge");
            return Err(ScopeError::Unresolved {
                passes,
                conflicts: validation.conflicts,
            });
        }
        passes += 1;

        for conflict in &validation.conflicts {
            let Some(obj) = objectives.iter_mut().find(|o| o.id == conflict.objective2_id) else {
                continue;
            };
            let target = conflict.wave + 1;
            if obj.wave < target {
                tracing::info!(objective = %obj.title, from = obj.wave, to = target, "deferring objective");
                deferrals.push(Deferral {
                    objective_id: obj.id.clone(),
                    objective: obj.title.clone(),
                    from_wave: obj.wave,
                    to_wave: target,
                });
                obj.wave = target;
            }
        }
    }
}

/// A set of objectives that run concurrently.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Wave {
    pub number: u32,
    pub objectives: Vec<Objective>,
}

/// Group objectives into waves in increasing wave order. Empty wave numbers
/// are skipped, so the result has no gaps.
pub fn group_into_waves(objectives: &[Objective]) -> Vec<Wave> {
    by_wave(objectives)
        .into_iter()
        .map(|(number, members)| Wave {
            number,
            objectives: members.into_iter().cloned().collect(),
        })
        .collect()
}

/// Advisory record that a later-wave objective consumes an earlier one's
/// interfaces.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntegrationContract {
    pub from: String,
    pub to: String,
    pub from_id: String,
    pub to_id: String,
    pub description: String,
}

/// A contract for every unordered pair of objectives in different waves,
/// from the earlier-wave objective to the later one.
pub fn integration_contracts(objectives: &[Objective]) -> Vec<IntegrationContract> {
    let mut contracts = Vec::new();
    for (i, a) in objectives.iter().enumerate() {
        for b in &objectives[i + 1..] {
            let (from, to) = match a.wave.cmp(&b.wave) {
                std::cmp::Ordering::Less => (a, b),
                std::cmp::Ordering::Greater => (b, a),
                std::cmp::Ordering::Equal => continue,
            };
            contracts.push(IntegrationContract {
                from: from.title.clone(),
                to: to.title.clone(),
                from_id: from.id.clone(),
                to_id: to.id.clone(),
                description: format!("{} uses interfaces from {}", to.title, from.title),
            });
        }
    }
    contracts
}

/// Rough wall-clock estimate: ten minutes per wave.
pub fn estimate_duration(wave_count: usize) -> String {
    format!("~{} minutes ({wave_count} waves)", wave_count * 10)
}

/// A conflict-free, forbid-respecting schedule.
#[derive(Debug, Clone, PartialEq)]
pub struct Schedule {
    /// Validation of the objectives as decomposed, before any deferral.
    pub initial_validation: ScopeValidation,
    pub resolution: Resolution,
    pub waves: Vec<Wave>,
    pub contracts: Vec<IntegrationContract>,
    pub estimated_duration: String,
}

/// Validate, resolve and group `objectives`.
///
/// Every objective's `scope_forbid` is extended with `global_forbid`. Fails
/// if ids repeat, a wave number is 0, a touch scope lies inside the global
/// forbid set, or conflicts survive `max_passes` resolution passes.
pub fn schedule(
    mut objectives: Vec<Objective>,
    global_forbid: &[String],
    max_passes: usize,
) -> Result<Schedule, ScopeError> {
    if objectives.is_empty() {
        return Err(ScopeError::NoObjectives);
    }

    let mut seen = HashSet::new();
    for obj in &objectives {
        if !seen.insert(obj.id.as_str()) {
            return Err(ScopeError::DuplicateObjective(obj.id.clone()));
        }
        if obj.wave == 0 {
            return Err(ScopeError::InvalidWave(obj.id.clone()));
        }
    }

    if let Some(violation) = check_global_forbid(&objectives, global_forbid).into_iter().next() {
        return Err(ScopeError::ForbiddenScope {
            objective: violation.objective,
            paths: violation.paths,
        });
    }

    for obj in &mut objectives {
        for path in global_forbid {
            if !obj.scope_forbid.contains(path) {
                obj.scope_forbid.push(path.clone());
            }
        }
    }

    let initial_validation = validate(&objectives);
    let resolution = resolve_conflicts(objectives, max_passes)?;
    let waves = group_into_waves(&resolution.objectives);
    let contracts = integration_contracts(&resolution.objectives);
    let estimated_duration = estimate_duration(waves.len());

    Ok(Schedule {
        initial_validation,
        resolution,
        waves,
        contracts,
        estimated_duration,
    })
}
