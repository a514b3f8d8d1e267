//! Request classification.
//!
//! [`KeywordClassifier`] is a substring heuristic over a rule table. The
//! engine only sees the [`TaskClassifier`] trait, so a different classifier
//! can be swapped in.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// The kind of work a request asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskType {
    Reset,
    Feature,
    Bug,
    Refactor,
    Enhancement,
}

impl TaskType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Reset => "reset",
            Self::Feature => "feature",
            Self::Bug => "bug",
            Self::Refactor => "refactor",
            Self::Enhancement => "enhancement",
        }
    }

    /// Capitalised form used in objective titles, e.g. `Feature`.
    pub fn title(&self) -> &'static str {
        match self {
            Self::Reset => "Reset",
            Self::Feature => "Feature",
            Self::Bug => "Bug",
            Self::Refactor => "Refactor",
            Self::Enhancement => "Enhancement",
        }
    }

    /// Conventional-commit prefix.
    pub fn commit_prefix(&self) -> &'static str {
        match self {
            Self::Reset | Self::Refactor => "refactor",
            Self::Feature | Self::Enhancement => "feat",
            Self::Bug => "fix",
        }
    }
}

impl fmt::Display for TaskType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "reset" => Ok(Self::Reset),
            "feature" => Ok(Self::Feature),
            "bug" => Ok(Self::Bug),
            "refactor" => Ok(Self::Refactor),
            "enhancement" => Ok(Self::Enhancement),
            other => Err(format!("unknown task type: {other:?}")),
        }
    }
}

/// Classify free text into a [`TaskType`].
pub trait TaskClassifier: Send + Sync {
    fn classify(&self, request: &str) -> TaskType;
}

// Compile-time check: TaskClassifier must be object-safe.
const _: () = {
    fn _assert_object_safe(_: &dyn TaskClassifier) {}
};

/// Any keyword appearing in the lowercased request selects `task_type`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassifierRule {
    pub task_type: TaskType,
    pub keywords: Vec<String>,
}

impl ClassifierRule {
    pub fn new(task_type: TaskType, keywords: &[&str]) -> Self {
        Self {
            task_type,
            keywords: keywords.iter().map(|k| k.to_lowercase()).collect(),
        }
    }

    fn matches(&self, lowered: &str) -> bool {
        self.keywords.iter().any(|k| lowered.contains(k.as_str()))
    }
}

/// First matching rule wins; no match gives `fallback`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeywordClassifier {
    rules: Vec<ClassifierRule>,
    fallback: TaskType,
}

impl KeywordClassifier {
    pub fn new(rules: Vec<ClassifierRule>, fallback: TaskType) -> Self {
        Self { rules, fallback }
    }

    pub fn rules(&self) -> &[ClassifierRule] {
        &self.rules
    }
}

impl Default for KeywordClassifier {
    fn default() -> Self {
        Self::new(
            vec![
                ClassifierRule::new(TaskType::Reset, &["reset", "refactor all", "clean up", "restructure"]),
                ClassifierRule::new(TaskType::Bug, &["bug", "fix", "broken", "error"]),
                ClassifierRule::new(TaskType::Refactor, &["refactor", "improve", "optimize"]),
            ],
            TaskType::Feature,
        )
    }
}

impl TaskClassifier for KeywordClassifier {
    fn classify(&self, request: &str) -> TaskType {
        let lowered = request.to_lowercase();
        self.rules
            .iter()
            .find(|rule| rule.matches(&lowered))
            .map(|rule| rule.task_type)
            .unwrap_or(self.fallback)
    }
}
