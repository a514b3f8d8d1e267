//! Worker configuration and the declarative worker registry.
//!
//! A registry file is JSON (`.json`) or TOML (`.toml`):
//!
//! ```json
//! {
//!   "global_forbid": [".env", "secrets/"],
//!   "workers": [
//!     {"id": "claude-1", "agent_type": "claude", "command": "python",
//!      "args": ["workers/claude_worker.py"], "env": {"API_KEY": "${ANTHROPIC_API_KEY}"},
//!      "max_concurrent_tasks": 2, "enabled": true, "capabilities": ["architecture"]}
//!   ]
//! }
//! ```
//!
//! The nested `mcp_config: {command, args, env}` form is accepted too.

use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// The kinds of coding agent a worker process can front.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkerKind {
    Codex,
    Cursor,
    Claude,
    Gpt4,
    Droid,
}

impl WorkerKind {
    pub const ALL: [WorkerKind; 5] = [
        WorkerKind::Codex,
        WorkerKind::Cursor,
        WorkerKind::Claude,
        WorkerKind::Gpt4,
        WorkerKind::Droid,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Codex => "codex",
            Self::Cursor => "cursor",
            Self::Claude => "claude",
            Self::Gpt4 => "gpt4",
            Self::Droid => "droid",
        }
    }

    /// Capabilities assumed for a kind when the registry lists none.
    pub fn default_capabilities(&self) -> &'static [&'static str] {
        match self {
            Self::Codex => &["refactoring", "type_hints", "quick_fixes", "python"],
            Self::Claude => &["complex_logic", "architecture", "deep_analysis", "refactoring"],
            Self::Gpt4 => &["algorithms", "debugging", "testing", "performance"],
            Self::Cursor => &["code_generation", "refactoring", "multi_file_changes"],
            Self::Droid => &["automation", "integration", "code_generation"],
        }
    }
}

impl fmt::Display for WorkerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for WorkerKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|k| k.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| format!("unknown worker kind: {s:?} (expected codex, cursor, claude, gpt4, or droid)"))
    }
}

/// Launch and scheduling configuration for one worker. Immutable once loaded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerConfig {
    pub id: String,
    pub kind: WorkerKind,
    pub command: String,
    pub args: Vec<String>,
    /// Overlay on top of the inherited environment.
    pub env: BTreeMap<String, String>,
    pub max_concurrent_tasks: usize,
    pub enabled: bool,
    pub capabilities: Vec<String>,
    /// Whether the worker reports `task_complete` / `task_error`. Workers
    /// that do not are given [`WorkerConfig::completion_fallback`] instead.
    pub completion_signal: bool,
    pub completion_fallback: Duration,
}

impl WorkerConfig {
    pub const DEFAULT_COMPLETION_FALLBACK: Duration = Duration::from_secs(5);

    /// A minimal enabled config; mostly useful in tests and for ad hoc workers.
    pub fn new(id: impl Into<String>, kind: WorkerKind, command: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind,
            command: command.into(),
            args: Vec::new(),
            env: BTreeMap::new(),
            max_concurrent_tasks: 1,
            enabled: true,
            capabilities: kind.default_capabilities().iter().map(|c| c.to_string()).collect(),
            completion_signal: true,
            completion_fallback: Self::DEFAULT_COMPLETION_FALLBACK,
        }
    }

    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn with_max_concurrent_tasks(mut self, n: usize) -> Self {
        self.max_concurrent_tasks = n.max(1);
        self
    }

    pub fn without_completion_signal(mut self, fallback: Duration) -> Self {
        self.completion_signal = false;
        self.completion_fallback = fallback;
        self
    }

    /// Arguments with `$VAR` / `${VAR}` expanded from the current environment.
    pub fn expanded_args(&self) -> Vec<String> {
        self.args.iter().map(|a| expand_env_vars(a)).collect()
    }

    /// Environment overlay with values expanded from the current environment.
    pub fn expanded_env(&self) -> BTreeMap<String, String> {
        self.env
            .iter()
            .map(|(k, v)| (k.clone(), expand_env_vars(v)))
            .collect()
    }

    pub fn has_capability(&self, capability: &str) -> bool {
        self.capabilities.iter().any(|c| c == capability)
    }
}

/// Expand `$VAR` and `${VAR}` references using the process environment.
/// Unknown variables are left untouched.
pub fn expand_env_vars(input: &str) -> String {
    expand_with(input, |name| std::env::var(name).ok())
}

/// Expand `$VAR` and `${VAR}` references using `lookup`.
pub fn expand_with(input: &str, lookup: impl Fn(&str) -> Option<String>) -> String {
    let mut out = String::with_capacity(input.len());
    let mut rest = input;

    while let Some(pos) = rest.find('$') {
        out.push_str(&rest[..pos]);
        let after = &rest[pos + 1..];

        if let Some(braced) = after.strip_prefix('{') {
            if let Some(end) = braced.find('}') {
                let name = &braced[..end];
                match lookup(name) {
                    Some(value) if is_var_name(name) => out.push_str(&value),
                    _ => out.push_str(&rest[pos..pos + 2 + end + 1]),
                }
                rest = &braced[end + 1..];
                continue;
            }
            out.push('$');
            rest = after;
            continue;
        }

        let len = after
            .char_indices()
            .find(|(_, c)| !(c.is_ascii_alphanumeric() || *c == '_'))
            .map(|(i, _)| i)
            .unwrap_or(after.len());
        let name = &after[..len];
        match lookup(name) {
            Some(value) if is_var_name(name) => out.push_str(&value),
            _ => {
                out.push('$');
                out.push_str(name);
            }
        }
        rest = &after[len..];
    }

    out.push_str(rest);
    out
}

fn is_var_name(name: &str) -> bool {
    !name.is_empty() && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
}

// ---------------------------------------------------------------------------
// Registry file
// ---------------------------------------------------------------------------

/// Errors loading or validating a worker registry.
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("failed to read worker registry {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse JSON worker registry: {0}")]
    Json(#[from] serde_json::Error),

    #[error("failed to parse TOML worker registry: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("duplicate worker id: {0:?}")]
    DuplicateId(String),

    #[error("worker {0:?} has an empty command")]
    EmptyCommand(String),

    #[error("worker {id:?}: {message}")]
    InvalidEntry { id: String, message: String },
}

/// Launch details, either inline on the entry or nested under `mcp_config`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LaunchSpec {
    #[serde(default)]
    pub command: Option<String>,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
}

/// One worker entry as it appears in the registry file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerEntry {
    pub id: String,
    #[serde(alias = "kind", alias = "worker_type")]
    pub agent_type: String,
    #[serde(default)]
    pub command: Option<String>,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mcp_config: Option<LaunchSpec>,
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent_tasks: usize,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub capabilities: Vec<String>,
    #[serde(default = "default_true")]
    pub completion_signal: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completion_fallback_secs: Option<u64>,
}

fn default_max_concurrent() -> usize {
    1
}

fn default_true() -> bool {
    true
}

/// Command used when neither the entry nor `mcp_config` names one.
pub const DEFAULT_WORKER_COMMAND: &str = "python";

impl WorkerEntry {
    /// Convert the entry into a [`WorkerConfig`].
    pub fn to_config(&self) -> Result<WorkerConfig, RegistryError> {
        let kind: WorkerKind = self.agent_type.parse().map_err(|message| RegistryError::InvalidEntry {
            id: self.id.clone(),
            message,
        })?;

        let nested = self.mcp_config.clone().unwrap_or_default();
        let command = self
            .command
            .clone()
            .or(nested.command)
            .unwrap_or_else(|| DEFAULT_WORKER_COMMAND.to_string());
        if command.trim().is_empty() {
            return Err(RegistryError::EmptyCommand(self.id.clone()));
        }
        if self.max_concurrent_tasks == 0 {
            return Err(RegistryError::InvalidEntry {
                id: self.id.clone(),
                message: "max_concurrent_tasks must be at least 1".to_string(),
            });
        }

        let args = if self.args.is_empty() { nested.args } else { self.args.clone() };
        let mut env = nested.env;
        env.extend(self.env.clone());

        let capabilities = if self.capabilities.is_empty() {
            kind.default_capabilities().iter().map(|c| c.to_string()).collect()
        } else {
            self.capabilities.clone()
        };

        Ok(WorkerConfig {
            id: self.id.clone(),
            kind,
            command,
            args,
            env,
            max_concurrent_tasks: self.max_concurrent_tasks,
            enabled: self.enabled,
            capabilities,
            completion_signal: self.completion_signal,
            completion_fallback: self
                .completion_fallback_secs
                .map(Duration::from_secs)
                .unwrap_or(WorkerConfig::DEFAULT_COMPLETION_FALLBACK),
        })
    }
}

/// The parsed registry file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkerRegistry {
    #[serde(default)]
    pub workers: Vec<WorkerEntry>,
    /// Paths no objective may ever touch.
    #[serde(default)]
    pub global_forbid: Vec<String>,
}

impl WorkerRegistry {
    /// Parse registry JSON.
    pub fn from_json(content: &str) -> Result<Self, RegistryError> {
        let registry: Self = serde_json::from_str(content)?;
        registry.validate()?;
        Ok(registry)
    }

    /// Parse registry TOML (`[[workers]]` tables).
    pub fn from_toml(content: &str) -> Result<Self, RegistryError> {
        let registry: Self = toml::from_str(content)?;
        registry.validate()?;
        Ok(registry)
    }

    /// Load a registry file, choosing the format by extension (TOML for
    /// `.toml`, JSON otherwise).
    pub fn load(path: &Path) -> Result<Self, RegistryError> {
        let content = std::fs::read_to_string(path).map_err(|source| RegistryError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        match path.extension().and_then(|e| e.to_str()) {
            Some("toml") => Self::from_toml(&content),
            _ => Self::from_json(&content),
        }
    }

    fn validate(&self) -> Result<(), RegistryError> {
        let mut seen = HashSet::new();
        for entry in &self.workers {
            if !seen.insert(entry.id.as_str()) {
                return Err(RegistryError::DuplicateId(entry.id.clone()));
            }
            entry.to_config()?;
        }
        Ok(())
    }

    /// Configs for every enabled worker, in file order.
    pub fn enabled_configs(&self) -> Result<Vec<WorkerConfig>, RegistryError> {
        let mut configs = Vec::new();
        for entry in &self.workers {
            let config = entry.to_config()?;
            if config.enabled {
                configs.push(config);
            } else {
                tracing::debug!(worker_id = %entry.id, "skipping disabled worker");
            }
        }
        Ok(configs)
    }
}
