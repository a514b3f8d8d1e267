//! Request analysis: codebase inventory, task classification, and
//! decomposition of a request into scoped objectives.

pub mod classify;
pub mod codebase;
pub mod decompose;

pub use classify::{ClassifierRule, KeywordClassifier, TaskClassifier, TaskType};
pub use codebase::{CodebaseError, CodebaseLimits, CodebaseStructure, analyze_codebase, detect_project_type};
pub use decompose::{coordination_points, decompose, scope_strategy};
