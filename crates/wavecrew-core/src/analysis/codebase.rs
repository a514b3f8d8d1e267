//! Codebase inventory for the analytic phase.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use walkdir::{DirEntry, WalkDir};

/// Directories never descended into.
const SKIP_DIRS: &[&str] = &["target", "node_modules", "__pycache__", "venv"];

const SOURCE_EXTENSIONS: &[&str] = &["rs", "py", "js", "ts", "tsx", "go", "java", "rb", "c", "cpp", "h"];

const CONFIG_EXTENSIONS: &[&str] = &["json", "yaml", "yml", "toml", "ini"];

const ENTRY_POINT_NAMES: &[&str] = &["main.rs", "__main__.py", "main.py", "main.go", "index.js", "index.ts"];

#[derive(Debug, Error)]
pub enum CodebaseError {
    #[error("codebase root {0} is not a directory")]
    NotADirectory(PathBuf),
}

/// Caps on how many paths of each kind end up in the inventory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodebaseLimits {
    pub modules: usize,
    pub tests: usize,
    pub configs: usize,
}

impl Default for CodebaseLimits {
    fn default() -> Self {
        Self {
            modules: 20,
            tests: 10,
            configs: 10,
        }
    }
}

/// What the analytic phase knows about the project on disk. Paths are
/// relative to `root_path` and use `/` separators.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodebaseStructure {
    pub root_path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_type: Option<String>,
    pub modules: Vec<String>,
    pub entry_points: Vec<String>,
    pub test_paths: Vec<String>,
    pub config_files: Vec<String>,
}

/// Detect the project type from marker files in `dir`.
///
/// Returns `"rust"`, `"node"`, `"python"`, `"go"`, or `None`.
pub fn detect_project_type(dir: &Path) -> Option<String> {
    if dir.join("Cargo.toml").exists() {
        Some("rust".to_string())
    } else if dir.join("package.json").exists() {
        Some("node".to_string())
    } else if dir.join("pyproject.toml").exists() || dir.join("setup.py").exists() {
        Some("python".to_string())
    } else if dir.join("go.mod").exists() {
        Some("go".to_string())
    } else {
        None
    }
}

fn is_skipped_dir(entry: &DirEntry) -> bool {
    if entry.depth() == 0 || !entry.file_type().is_dir() {
        return false;
    }
    let name = entry.file_name().to_string_lossy();
    name.starts_with('.') || SKIP_DIRS.contains(&name.as_ref())
}

fn is_entry_point(rel: &str) -> bool {
    let file_name = rel.rsplit('/').next().unwrap_or(rel);
    ENTRY_POINT_NAMES.contains(&file_name) || rel.starts_with("src/bin/") || rel.contains("/src/bin/")
}

fn push_limited(list: &mut Vec<String>, path: String, limit: usize) {
    if list.len() < limit {
        list.push(path);
    }
}

/// Walk `root` and sort files into modules, entry points, tests and config.
///
/// Hidden directories and build/vendor directories are skipped. Unreadable
/// entries are skipped rather than failing the scan. Walk order is sorted by
/// file name so results are stable.
pub fn analyze_codebase(root: &Path, limits: &CodebaseLimits) -> Result<CodebaseStructure, CodebaseError> {
    if !root.is_dir() {
        return Err(CodebaseError::NotADirectory(root.to_path_buf()));
    }

    let mut structure = CodebaseStructure {
        root_path: root.display().to_string(),
        project_type: detect_project_type(root),
        ..Default::default()
    };

    let walker = WalkDir::new(root)
        .follow_links(false)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| !is_skipped_dir(e));

    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                tracing::debug!(error = %e, "skipping unreadable entry");
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }

        let path = entry.path();
        let Ok(relative) = path.strip_prefix(root) else {
            continue;
        };
        let rel = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");
        let ext = path.extension().and_then(|e| e.to_str()).unwrap_or_default();

        if CONFIG_EXTENSIONS.contains(&ext) {
            push_limited(&mut structure.config_files, rel, limits.configs);
        } else if SOURCE_EXTENSIONS.contains(&ext) {
            if rel.to_lowercase().contains("test") {
                push_limited(&mut structure.test_paths, rel, limits.tests);
            } else if is_entry_point(&rel) {
                structure.entry_points.push(rel);
            } else {
                push_limited(&mut structure.modules, rel, limits.modules);
            }
        }
    }

    tracing::debug!(
        root = %structure.root_path,
        modules = structure.modules.len(),
        entry_points = structure.entry_points.len(),
        tests = structure.test_paths.len(),
        configs = structure.config_files.len(),
        "codebase analyzed"
    );
    Ok(structure)
}
