//! Coordination points, scope strategy and objective decomposition.

use crate::scope::{Objective, WorkerTarget};
use crate::worker::WorkerKind;

use super::classify::TaskType;

const AUTH_POINTS: [&str; 3] = [
    "Auth module must export login/verify functions",
    "UI must call auth functions",
    "Middleware must use auth decorators",
];

const TEST_POINT: &str = "Tests must use interfaces from implementation";

/// Longest request prefix carried into a generated objective title.
const TITLE_REQUEST_CHARS: usize = 50;

/// Interfaces the request implies workers will have to agree on.
pub fn coordination_points(request: &str) -> Vec<String> {
    let lowered = request.to_lowercase();
    let mut points = Vec::new();
    if lowered.contains("auth") {
        points.extend(AUTH_POINTS.iter().map(|p| p.to_string()));
    }
    if lowered.contains("test") {
        points.push(TEST_POINT.to_string());
    }
    points
}

/// How scopes will be allocated across workers.
pub fn scope_strategy(task_type: TaskType, coordination_points: &[String]) -> String {
    if task_type == TaskType::Reset {
        "Parallel RESET: split by module (core, ui, tests) with exclusive scopes".to_string()
    } else if coordination_points.len() > 2 {
        "Multi-wave: independent modules in Wave 1, integration in Wave 2".to_string()
    } else {
        "Single-wave: single objective with focused scope".to_string()
    }
}

/// Turn a classified request into objectives, all in wave 1.
pub fn decompose(task_type: TaskType, request: &str, global_forbid: &[String]) -> Vec<Objective> {
    match task_type {
        TaskType::Reset => vec![
            Objective::new("obj-1", "RESET: Core module refactoring", WorkerTarget::Kind(WorkerKind::Claude))
                .touching(["src/core/"])
                .forbidding(["tests/", "src/ui/"]),
            Objective::new("obj-2", "RESET: Test suite hardening", WorkerTarget::Kind(WorkerKind::Codex))
                .touching(["tests/"])
                .forbidding(["src/"]),
        ],
        _ => {
            let excerpt: String = request.chars().take(TITLE_REQUEST_CHARS).collect();
            vec![
                Objective::new("obj-1", format!("{}: {excerpt}", task_type.title()), WorkerTarget::Auto)
                    .touching(["src/"])
                    .forbidding(global_forbid.iter().cloned()),
            ]
        }
    }
}
