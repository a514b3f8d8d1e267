//! Objectives and path-prefix scopes.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::worker::WorkerKind;

/// Which worker an objective should run on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum WorkerTarget {
    /// Any running worker.
    Auto,
    Kind(WorkerKind),
}

impl fmt::Display for WorkerTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Auto => f.write_str("auto"),
            Self::Kind(kind) => write!(f, "{kind}"),
        }
    }
}

impl FromStr for WorkerTarget {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.eq_ignore_ascii_case("auto") || s.is_empty() {
            Ok(Self::Auto)
        } else {
            s.parse().map(Self::Kind)
        }
    }
}

impl TryFrom<String> for WorkerTarget {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<WorkerTarget> for String {
    fn from(value: WorkerTarget) -> Self {
        value.to_string()
    }
}

/// A unit of planned work with an exclusive write scope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Objective {
    pub id: String,
    pub title: String,
    pub worker: WorkerTarget,
    /// Path prefixes this objective may write.
    pub scope_touch: Vec<String>,
    /// Path prefixes this objective must not write.
    pub scope_forbid: Vec<String>,
    /// Waves start at 1.
    pub wave: u32,
}

impl Objective {
    pub fn new(id: impl Into<String>, title: impl Into<String>, worker: WorkerTarget) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            worker,
            scope_touch: Vec::new(),
            scope_forbid: Vec::new(),
            wave: 1,
        }
    }

    pub fn touching<I, S>(mut self, paths: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.scope_touch = paths.into_iter().map(Into::into).collect();
        self
    }

    pub fn forbidding<I, S>(mut self, paths: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.scope_forbid = paths.into_iter().map(Into::into).collect();
        self
    }

    pub fn in_wave(mut self, wave: u32) -> Self {
        self.wave = wave;
        self
    }

    /// Whether writing `path` is allowed by this objective's scope.
    pub fn permits(&self, path: &str) -> bool {
        self.scope_touch.iter().any(|t| contains(t, path)) && !self.scope_forbid.iter().any(|f| contains(f, path))
    }
}

/// Normalize a path prefix for comparison: strip leading `./`, collapse
/// repeated `/`, drop the trailing `/`.
pub fn normalize(path: &str) -> String {
    let mut p = path.trim();
    while let Some(rest) = p.strip_prefix("./") {
        p = rest;
    }
    let parts: Vec<&str> = p.split('/').filter(|s| !s.is_empty() && *s != ".").collect();
    let joined = parts.join("/");
    if p.starts_with('/') { format!("/{joined}") } else { joined }
}

/// Whether prefix `outer` covers `inner` on a path-component boundary.
/// The empty prefix covers everything.
pub fn contains(outer: &str, inner: &str) -> bool {
    let outer = normalize(outer);
    let inner = normalize(inner);
    if outer.is_empty() || outer == inner {
        return true;
    }
    inner.len() > outer.len() && inner.starts_with(&outer) && inner.as_bytes()[outer.len()] == b'/'
}

/// The overlapping region of two prefixes: the more specific of the two, or
/// `None` when they are disjoint.
pub fn overlap<'a>(a: &'a str, b: &'a str) -> Option<&'a str> {
    if contains(a, b) {
        Some(b)
    } else if contains(b, a) {
        Some(a)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_strips_noise() {
        assert_eq!(normalize("./src//core/"), "src/core");
        assert_eq!(normalize("src/core"), "src/core");
        assert_eq!(normalize("./"), "");
        assert_eq!(normalize("/abs/path/"), "/abs/path");
    }

    #[test]
    fn containment_respects_component_boundaries() {
        assert!(contains("src/", "src/core/"));
        assert!(contains("src/core/", "src/core"));
        assert!(contains("src", "src/core/mod.rs"));
        assert!(!contains("src/co", "src/core/"));
        assert!(!contains("src/core/", "src/"));
        assert!(contains("", "anything"));
    }

    #[test]
    fn overlap_reports_more_specific_prefix() {
        assert_eq!(overlap("src/core/", "src/core/"), Some("src/core/"));
        assert_eq!(overlap("src/", "src/ui/"), Some("src/ui/"));
        assert_eq!(overlap("tests/unit/", "tests/"), Some("tests/unit/"));
        assert_eq!(overlap("src/core/", "tests/"), None);
    }

    #[test]
    fn worker_target_serde() {
        let auto: WorkerTarget = serde_json::from_str("\"auto\"").unwrap();
        assert_eq!(auto, WorkerTarget::Auto);
        let claude: WorkerTarget = serde_json::from_str("\"claude\"").unwrap();
        assert_eq!(claude, WorkerTarget::Kind(WorkerKind::Claude));
        assert_eq!(serde_json::to_string(&claude).unwrap(), "\"claude\"");
        assert!(serde_json::from_str::<WorkerTarget>("\"hal9000\"").is_err());
    }

    #[test]
    fn permits_checks_touch_and_forbid() {
        let obj = Objective::new("o1", "Core", WorkerTarget::Auto)
            .touching(["src/"])
            .forbidding(["src/secrets.rs"]);
        assert!(obj.permits("src/lib.rs"));
        assert!(!obj.permits("src/secrets.rs"));
        assert!(!obj.permits("README.md"));
    }
}
