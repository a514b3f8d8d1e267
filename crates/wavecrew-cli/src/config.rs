//! Configuration file management for wavecrew.
//!
//! Provides a TOML-based config file at `~/.config/wavecrew/config.toml` and a
//! resolution chain: CLI flag > env var > config file > default.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use wavecrew_core::scope::DEFAULT_MAX_RESOLUTION_PASSES;

/// Registry file used when nothing else names one.
pub const DEFAULT_REGISTRY: &str = "team.json";

/// Data directory used when nothing else names one.
pub const DEFAULT_DATA_DIR: &str = ".wavecrew";

const DEFAULT_TASK_TIMEOUT_SECS: u64 = 30 * 60;

// -----------------------------------------------------------------------
// Config file types
// -----------------------------------------------------------------------

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct ConfigFile {
    #[serde(default)]
    pub registry: RegistrySection,
    #[serde(default)]
    pub storage: StorageSection,
    #[serde(default)]
    pub orchestration: OrchestrationSection,
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct RegistrySection {
    /// Worker registry file (JSON or TOML).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct StorageSection {
    /// Directory holding run records and artifacts.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dir: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct OrchestrationSection {
    #[serde(default)]
    pub global_forbid: Vec<String>,
    #[serde(default = "default_max_passes")]
    pub max_resolution_passes: usize,
    #[serde(default = "default_task_timeout_secs")]
    pub task_timeout_secs: u64,
    #[serde(default)]
    pub auto_commit: bool,
}

impl Default for OrchestrationSection {
    fn default() -> Self {
        Self {
            global_forbid: Vec::new(),
            max_resolution_passes: default_max_passes(),
            task_timeout_secs: default_task_timeout_secs(),
            auto_commit: false,
        }
    }
}

fn default_max_passes() -> usize {
    DEFAULT_MAX_RESOLUTION_PASSES
}

fn default_task_timeout_secs() -> u64 {
    DEFAULT_TASK_TIMEOUT_SECS
}

// -----------------------------------------------------------------------
// Paths
// -----------------------------------------------------------------------

/// Return the wavecrew config directory.
///
/// Always uses XDG layout: `$XDG_CONFIG_HOME/wavecrew` or `~/.config/wavecrew`.
pub fn config_dir() -> PathBuf {
    if let Ok(xdg) = std::env::var("XDG_CONFIG_HOME") {
        return PathBuf::from(xdg).join("wavecrew");
    }
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".config")
        .join("wavecrew")
}

/// Return the path to the wavecrew config file.
pub fn config_path() -> PathBuf {
    config_dir().join("config.toml")
}

// -----------------------------------------------------------------------
// Read / write
// -----------------------------------------------------------------------

/// Load and parse the config file. Returns an error if it does not exist.
pub fn load_config() -> Result<ConfigFile> {
    let path = config_path();
    let contents = std::fs::read_to_string(&path)
        .with_context(|| format!("failed to read config file at {}", path.display()))?;
    let config: ConfigFile = toml::from_str(&contents).context("failed to parse config file")?;
    Ok(config)
}

/// Serialize and write the config file, creating parent dirs as needed.
/// Sets file permissions to 0600 on Unix.
pub fn save_config(config: &ConfigFile) -> Result<()> {
    let path = config_path();
    let dir = config_dir();
    std::fs::create_dir_all(&dir)
        .with_context(|| format!("failed to create config directory {}", dir.display()))?;

    let contents = toml::to_string_pretty(config).context("failed to serialize config")?;
    std::fs::write(&path, &contents)
        .with_context(|| format!("failed to write config file at {}", path.display()))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let perms = std::fs::Permissions::from_mode(0o600);
        std::fs::set_permissions(&path, perms)
            .with_context(|| format!("failed to set permissions on {}", path.display()))?;
    }

    Ok(())
}

// -----------------------------------------------------------------------
// Resolved config
// -----------------------------------------------------------------------

/// Fully resolved configuration, ready for use.
#[derive(Debug)]
pub struct WavecrewConfig {
    pub registry_path: PathBuf,
    pub data_dir: PathBuf,
    pub global_forbid: Vec<String>,
    pub max_resolution_passes: usize,
    pub task_timeout: Duration,
    pub auto_commit: bool,
}

impl WavecrewConfig {
    /// Resolve configuration using the chain: CLI flag > env var > config file > default.
    ///
    /// - Registry: `cli_registry` > `WAVECREW_REGISTRY` env > `registry.path` > `team.json`
    /// - Data dir: `cli_data_dir` > `WAVECREW_DATA_DIR` env > `storage.dir` > `.wavecrew`
    ///
    /// Orchestration settings come from the config file only.
    pub fn resolve(cli_registry: Option<&str>, cli_data_dir: Option<&str>) -> Self {
        let file_config = load_config().unwrap_or_default();

        let registry_path = pick(
            cli_registry,
            "WAVECREW_REGISTRY",
            file_config.registry.path.as_deref(),
            DEFAULT_REGISTRY,
        );
        let data_dir = pick(
            cli_data_dir,
            "WAVECREW_DATA_DIR",
            file_config.storage.dir.as_deref(),
            DEFAULT_DATA_DIR,
        );

        let orchestration = file_config.orchestration;
        Self {
            registry_path: PathBuf::from(registry_path),
            data_dir: PathBuf::from(data_dir),
            global_forbid: orchestration.global_forbid,
            max_resolution_passes: orchestration.max_resolution_passes,
            task_timeout: Duration::from_secs(orchestration.task_timeout_secs),
            auto_commit: orchestration.auto_commit,
        }
    }
}

fn pick(cli: Option<&str>, env_var: &str, file: Option<&str>, default: &str) -> String {
    if let Some(value) = cli {
        value.to_string()
    } else if let Ok(value) = std::env::var(env_var) {
        value
    } else if let Some(value) = file {
        value.to_string()
    } else {
        default.to_string()
    }
}

// -----------------------------------------------------------------------
// Tests
// -----------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn lock_env() -> std::sync::MutexGuard<'static, ()> {
        crate::test_util::lock_env()
    }

    /// Point `XDG_CONFIG_HOME` at `dir` for the duration of `f`.
    fn with_config_home<T>(dir: &std::path::Path, f: impl FnOnce() -> T) -> T {
        let orig = std::env::var("XDG_CONFIG_HOME").ok();
        unsafe { std::env::set_var("XDG_CONFIG_HOME", dir) };
        let result = f();
        match orig {
            Some(x) => unsafe { std::env::set_var("XDG_CONFIG_HOME", x) },
            None => unsafe { std::env::remove_var("XDG_CONFIG_HOME") },
        }
        result
    }

    #[test]
    fn save_and_load_config_roundtrip() {
        let _lock = lock_env();
        let tmp = tempfile::TempDir::new().unwrap();

        let loaded = with_config_home(tmp.path(), || {
            let original = ConfigFile {
                registry: RegistrySection {
                    path: Some("/etc/wavecrew/team.toml".to_string()),
                },
                storage: StorageSection {
                    dir: Some("/var/lib/wavecrew".to_string()),
                },
                orchestration: OrchestrationSection {
                    global_forbid: vec![".env".to_string()],
                    auto_commit: true,
                    ..OrchestrationSection::default()
                },
            };
            save_config(&original).unwrap();
            load_config().unwrap()
        });

        assert_eq!(loaded.registry.path.as_deref(), Some("/etc/wavecrew/team.toml"));
        assert_eq!(loaded.storage.dir.as_deref(), Some("/var/lib/wavecrew"));
        assert_eq!(loaded.orchestration.global_forbid, vec![".env".to_string()]);
        assert!(loaded.orchestration.auto_commit);
        assert_eq!(loaded.orchestration.max_resolution_passes, DEFAULT_MAX_RESOLUTION_PASSES);
        assert!(tmp.path().join("wavecrew/config.toml").exists());
    }

    #[cfg(unix)]
    #[test]
    fn save_config_sets_permissions() {
        use std::os::unix::fs::PermissionsExt;

        let _lock = lock_env();
        let tmp = tempfile::TempDir::new().unwrap();
        with_config_home(tmp.path(), || save_config(&ConfigFile::default()).unwrap());

        let meta = std::fs::metadata(tmp.path().join("wavecrew/config.toml")).unwrap();
        assert_eq!(meta.permissions().mode() & 0o777, 0o600);
    }

    #[test]
    fn partial_config_file_fills_defaults() {
        let config: ConfigFile = toml::from_str("[orchestration]\nauto_commit = true\n").unwrap();
        assert!(config.registry.path.is_none());
        assert!(config.orchestration.auto_commit);
        assert_eq!(config.orchestration.task_timeout_secs, DEFAULT_TASK_TIMEOUT_SECS);
    }

    #[test]
    fn resolve_with_cli_flag_overrides_all() {
        let _lock = lock_env();

        unsafe { std::env::set_var("WAVECREW_REGISTRY", "/env/team.json") };
        unsafe { std::env::set_var("WAVECREW_DATA_DIR", "/env/data") };

        let config = WavecrewConfig::resolve(Some("/cli/team.json"), Some("/cli/data"));
        assert_eq!(config.registry_path, PathBuf::from("/cli/team.json"));
        assert_eq!(config.data_dir, PathBuf::from("/cli/data"));

        unsafe { std::env::remove_var("WAVECREW_REGISTRY") };
        unsafe { std::env::remove_var("WAVECREW_DATA_DIR") };
    }

    #[test]
    fn resolve_with_env_var_overrides_config_file() {
        let _lock = lock_env();
        let tmp = tempfile::TempDir::new().unwrap();

        let config = with_config_home(tmp.path(), || {
            let file = ConfigFile {
                registry: RegistrySection {
                    path: Some("/file/team.json".to_string()),
                },
                storage: StorageSection {
                    dir: Some("/file/data".to_string()),
                },
                ..ConfigFile::default()
            };
            save_config(&file).unwrap();

            unsafe { std::env::set_var("WAVECREW_REGISTRY", "/env/team.json") };
            unsafe { std::env::remove_var("WAVECREW_DATA_DIR") };
            let config = WavecrewConfig::resolve(None, None);
            unsafe { std::env::remove_var("WAVECREW_REGISTRY") };
            config
        });

        assert_eq!(config.registry_path, PathBuf::from("/env/team.json"));
        assert_eq!(config.data_dir, PathBuf::from("/file/data"));
    }

    #[test]
    fn resolve_defaults_when_nothing_set() {
        let _lock = lock_env();
        let tmp = tempfile::TempDir::new().unwrap();

        unsafe { std::env::remove_var("WAVECREW_REGISTRY") };
        unsafe { std::env::remove_var("WAVECREW_DATA_DIR") };
        let config = with_config_home(tmp.path(), || WavecrewConfig::resolve(None, None));

        assert_eq!(config.registry_path, PathBuf::from(DEFAULT_REGISTRY));
        assert_eq!(config.data_dir, PathBuf::from(DEFAULT_DATA_DIR));
        assert!(config.global_forbid.is_empty());
        assert_eq!(config.task_timeout, Duration::from_secs(DEFAULT_TASK_TIMEOUT_SECS));
        assert!(!config.auto_commit);
    }

    #[test]
    fn config_path_ends_with_expected_filename() {
        let path = config_path();
        assert!(
            path.ends_with("wavecrew/config.toml"),
            "unexpected config path: {}",
            path.display()
        );
    }
}
