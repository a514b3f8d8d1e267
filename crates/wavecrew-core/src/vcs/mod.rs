//! Version-control collaborator: "commit these paths with this message".

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use thiserror::Error;
use tokio::process::Command;
use tokio::sync::Mutex;

/// Commits files produced by a run.
#[async_trait]
pub trait VersionControl: Send + Sync {
    /// Stage `paths` and commit them. Returns the new commit id, or `None`
    /// when there was nothing to commit.
    async fn commit(&self, paths: &[String], message: &str) -> anyhow::Result<Option<String>>;
}

// Compile-time check: VersionControl must be object-safe.
const _: () = {
    fn _assert_object_safe(_: &dyn VersionControl) {}
};

/// Errors from [`GitCli`].
#[derive(Debug, Error)]
pub enum GitError {
    #[error("not a git repository: {0}")]
    NotAGitRepo(PathBuf),

    #[error("failed to run git {command}: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("git {command} failed (exit {code}): {stderr}")]
    Exit { command: String, code: i32, stderr: String },
}

/// [`VersionControl`] backed by the `git` binary.
///
/// Mutating commands are serialised through an internal lock; git's index
/// lock does not tolerate concurrent writers.
#[derive(Debug)]
pub struct GitCli {
    repo_path: PathBuf,
    git_lock: Mutex<()>,
}

impl GitCli {
    /// Wrap the repository at `repo_path`.
    ///
    /// # Errors
    ///
    /// Returns [`GitError::NotAGitRepo`] if `git rev-parse --git-dir` fails there.
    pub async fn open(repo_path: impl Into<PathBuf>) -> Result<Self, GitError> {
        let repo_path = repo_path.into();
        let output = Command::new("git")
            .args(["rev-parse", "--git-dir"])
            .current_dir(&repo_path)
            .output()
            .await
            .map_err(|source| GitError::Spawn {
                command: "rev-parse".into(),
                source,
            })?;
        if !output.status.success() {
            return Err(GitError::NotAGitRepo(repo_path));
        }
        Ok(Self {
            repo_path,
            git_lock: Mutex::new(()),
        })
    }

    pub fn repo_path(&self) -> &Path {
        &self.repo_path
    }

    async fn git(&self, args: &[&str]) -> Result<std::process::Output, GitError> {
        let command = args.first().copied().unwrap_or_default().to_string();
        Command::new("git")
            .args(args)
            .current_dir(&self.repo_path)
            .output()
            .await
            .map_err(|source| GitError::Spawn { command, source })
    }

    async fn git_ok(&self, args: &[&str]) -> Result<String, GitError> {
        let output = self.git(args).await?;
        if !output.status.success() {
            return Err(GitError::Exit {
                command: args.first().copied().unwrap_or_default().to_string(),
                code: output.status.code().unwrap_or(-1),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }

    /// Current `HEAD` commit id.
    pub async fn head(&self) -> Result<String, GitError> {
        self.git_ok(&["rev-parse", "HEAD"]).await
    }

    /// Stage and commit. Paths that do not exist in the working tree are
    /// skipped with a warning.
    pub async fn commit_paths(&self, paths: &[String], message: &str) -> Result<Option<String>, GitError> {
        let _lock = self.git_lock.lock().await;

        let existing: Vec<&str> = paths
            .iter()
            .filter(|p| {
                let present = self.repo_path.join(p.as_str()).exists();
                if !present {
                    tracing::warn!(path = %p, "skipping missing path in commit");
                }
                present
            })
            .map(String::as_str)
            .collect();
        if existing.is_empty() {
            return Ok(None);
        }

        let mut add = vec!["add", "--"];
        add.extend(existing.iter().copied());
        self.git_ok(&add).await?;

        // Exit 0 from `diff --cached --quiet` means nothing is staged.
        let staged = self.git(&["diff", "--cached", "--quiet"]).await?;
        if staged.status.success() {
            tracing::debug!(repo = %self.repo_path.display(), "nothing staged, skipping commit");
            return Ok(None);
        }

        self.git_ok(&["commit", "-m", message]).await?;
        let sha = self.head().await?;
        tracing::info!(commit = %sha, files = existing.len(), "committed run output");
        Ok(Some(sha))
    }
}

#[async_trait]
impl VersionControl for GitCli {
    async fn commit(&self, paths: &[String], message: &str) -> anyhow::Result<Option<String>> {
        Ok(self.commit_paths(paths, message).await?)
    }
}
