//! Pairwise scope-exclusivity checks within each wave.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::objective::{Objective, contains, overlap};

/// Two objectives in the same wave whose write scopes overlap.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScopeConflict {
    pub wave: u32,
    /// Title of the earlier objective in decomposition order.
    pub objective1: String,
    /// Title of the later objective; this is the one deferred.
    pub objective2: String,
    pub objective1_id: String,
    pub objective2_id: String,
    pub overlap: Vec<String>,
}

/// Result of one validation pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScopeValidation {
    pub valid: bool,
    pub conflicts: Vec<ScopeConflict>,
    pub waves_checked: usize,
    pub total_objectives: usize,
}

/// An objective whose touch scope falls inside a globally forbidden prefix.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForbidViolation {
    pub objective_id: String,
    pub objective: String,
    pub paths: Vec<String>,
}

/// Group objectives by wave, keeping decomposition order inside each wave.
pub(crate) fn by_wave(objectives: &[Objective]) -> BTreeMap<u32, Vec<&Objective>> {
    let mut waves: BTreeMap<u32, Vec<&Objective>> = BTreeMap::new();
    for obj in objectives {
        waves.entry(obj.wave).or_default().push(obj);
    }
    waves
}

/// Overlapping prefixes between two touch sets, deduplicated, in the order
/// first seen.
pub fn touch_overlap(a: &Objective, b: &Objective) -> Vec<String> {
    let mut paths: Vec<String> = Vec::new();
    for pa in &a.scope_touch {
        for pb in &b.scope_touch {
            if let Some(p) = overlap(pa, pb) {
                if !paths.iter().any(|existing| existing == p) {
                    paths.push(p.to_string());
                }
            }
        }
    }
    paths
}

/// Check every unordered pair of objectives within each wave.
pub fn validate(objectives: &[Objective]) -> ScopeValidation {
    let waves = by_wave(objectives);
    let mut conflicts = Vec::new();

    for (&wave, members) in &waves {
        for (i, first) in members.iter().enumerate() {
            for second in &members[i + 1..] {
                let shared = touch_overlap(first, second);
                if !shared.is_empty() {
                    tracing::debug!(
                        wave,
                        objective1 = %first.title,
                        objective2 = %second.title,
                        overlap = ?shared,
                        "scope conflict"
                    );
                    conflicts.push(ScopeConflict {
                        wave,
                        objective1: first.title.clone(),
                        objective2: second.title.clone(),
                        objective1_id: first.id.clone(),
                        objective2_id: second.id.clone(),
                        overlap: shared,
                    });
                }
            }
        }
    }

    ScopeValidation {
        valid: conflicts.is_empty(),
        conflicts,
        waves_checked: waves.len(),
        total_objectives: objectives.len(),
    }
}

/// Objectives whose touch prefixes equal or lie under a globally forbidden
/// prefix. A touch prefix that merely contains a forbidden path is allowed;
/// the forbidden path is carved out by the objective's `scope_forbid`.
pub fn check_global_forbid(objectives: &[Objective], global_forbid: &[String]) -> Vec<ForbidViolation> {
    objectives
        .iter()
        .filter_map(|obj| {
            let paths: Vec<String> = obj
                .scope_touch
                .iter()
                .filter(|touch| global_forbid.iter().any(|f| contains(f, touch)))
                .cloned()
                .collect();
            (!paths.is_empty()).then(|| ForbidViolation {
                objective_id: obj.id.clone(),
                objective: obj.title.clone(),
                paths,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scope::objective::WorkerTarget;

    fn obj(id: &str, touch: &[&str], wave: u32) -> Objective {
        Objective::new(id, format!("Objective {id}"), WorkerTarget::Auto)
            .touching(touch.iter().copied())
            .in_wave(wave)
    }

    #[test]
    fn identical_touch_sets_conflict() {
        let objectives = vec![obj("a", &["src/core/"], 1), obj("b", &["src/core/"], 1)];
        let result = validate(&objectives);
        assert!(!result.valid);
        assert_eq!(result.conflicts.len(), 1);
        let c = &result.conflicts[0];
        assert_eq!((c.wave, c.objective1_id.as_str(), c.objective2_id.as_str()), (1, "a", "b"));
        assert_eq!(c.overlap, vec!["src/core/"]);
    }

    #[test]
    fn disjoint_scopes_in_one_wave_are_valid() {
        let objectives = vec![
            obj("a", &["src/core/"], 1),
            obj("b", &["src/ui/"], 1),
            obj("c", &["tests/"], 1),
        ];
        let result = validate(&objectives);
        assert!(result.valid);
        assert!(result.conflicts.is_empty());
        assert_eq!(result.waves_checked, 1);
        assert_eq!(result.total_objectives, 3);
    }

    #[test]
    fn nested_prefixes_conflict() {
        let objectives = vec![obj("a", &["src/"], 1), obj("b", &["src/ui/components/"], 1)];
        let result = validate(&objectives);
        assert_eq!(result.conflicts[0].overlap, vec!["src/ui/components/"]);
    }

    #[test]
    fn overlap_across_waves_is_not_a_conflict() {
        let objectives = vec![obj("a", &["src/core/"], 1), obj("b", &["src/core/"], 2)];
        let result = validate(&objectives);
        assert!(result.valid);
        assert_eq!(result.waves_checked, 2);
    }

    #[test]
    fn three_way_overlap_reports_every_pair() {
        let objectives = vec![obj("a", &["lib/"], 1), obj("b", &["lib/"], 1), obj("c", &["lib/"], 1)];
        let pairs: Vec<(String, String)> = validate(&objectives)
            .conflicts
            .into_iter()
            .map(|c| (c.objective1_id, c.objective2_id))
            .collect();
        assert_eq!(
            pairs,
            vec![
                ("a".to_string(), "b".to_string()),
                ("a".to_string(), "c".to_string()),
                ("b".to_string(), "c".to_string()),
            ]
        );
    }

    #[test]
    fn global_forbid_flags_touch_inside_forbidden_prefix() {
        let forbid = vec!["secrets/".to_string(), ".env".to_string()];
        let objectives = vec![
            obj("ok", &["src/"], 1),
            obj("bad", &["secrets/keys/", "src/config/"], 1),
            obj("env", &[".env"], 1),
        ];
        let violations = check_global_forbid(&objectives, &forbid);
        assert_eq!(violations.len(), 2);
        assert_eq!(violations[0].objective_id, "bad");
        assert_eq!(violations[0].paths, vec!["secrets/keys/"]);
        assert_eq!(violations[1].objective_id, "env");
    }

    #[test]
    fn broad_touch_containing_forbidden_file_is_allowed() {
        let forbid = vec!["src/secrets.rs".to_string()];
        let objectives = vec![obj("a", &["src/"], 1)];
        assert!(check_global_forbid(&objectives, &forbid).is_empty());
    }
}
