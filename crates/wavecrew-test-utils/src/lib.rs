//! Shared test utilities for wavecrew integration tests.
//!
//! [`FakeWorker`] writes a small `/bin/sh` program that speaks the worker
//! line protocol, so supervisor, pool and engine tests can run real
//! subprocesses without any agent installed. Each script lives in its own
//! temporary directory, removed when the `FakeWorker` is dropped.
//!
//! Scripts match on the compact JSON the supervisor writes
//! (`"type":"execute_task"`), which is why they get away with `case` and
//! `sed` instead of a JSON parser.

use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;

use tempfile::TempDir;

/// Shared prelude: pulls ids and the first touch scope out of a request line.
const PRELUDE: &str = r##"#!/bin/sh
field() {
  printf '%s\n' "$line" | sed -n "s/.*\"$1\":\"\([^\"]*\)\".*/\1/p"
}
first_touch() {
  printf '%s\n' "$line" | sed -n 's/.*"scope_touch":\["\([^"]*\)".*/\1/p'
}
touched_file() {
  t=$(first_touch)
  if [ -z "$t" ]; then echo "CHANGES.md"; else echo "${t%/}/CHANGES.md"; fi
}
tools_response() {
  rid=$(field request_id)
  printf '{"type":"tools_response","id":"%s","payload":{"request_id":"%s","tools":[{"name":"edit_file","description":"Edit a file","parameters":{"type":"object"}},{"name":"run_tests","description":"Run the test suite","parameters":{"type":"object"}}]}}\n' "$rid" "$rid"
}
"##;

/// Completes every task after `$1` seconds, reporting one modified file inside
/// the task's first touch scope and two passing tests.
const RESPONSIVE: &str = r##"
DELAY="${1:-0}"
while IFS= read -r line; do
  case "$line" in
    *'"type":"initialize"'*)
      echo '{"type":"initialized","id":"init","payload":{"status":"ready"}}' ;;
    *'"type":"list_tools"'*)
      tools_response ;;
    *'"type":"execute_task"'*)
      tid=$(field task_id)
      file=$(touched_file)
      (
        printf '{"type":"task_started","id":"%s","payload":{"task_id":"%s"}}\n' "$tid" "$tid"
        printf '{"type":"tool_use","id":"%s","payload":{"tool":"edit_file","file":"%s"}}\n' "$tid" "$file"
        printf '{"type":"progress","id":"%s","payload":{"message":"halfway","progress":50}}\n' "$tid"
        sleep "$DELAY"
        printf '{"type":"task_complete","id":"%s","payload":{"task_id":"%s","files_modified":["%s"],"test_results":{"total":2,"passed":2,"failed":0}}}\n' "$tid" "$tid" "$file"
      ) &
      ;;
    *'"type":"shutdown"'*)
      exit 0 ;;
  esac
done
"##;

/// Fails every task with `task_error`.
const FAILING: &str = r##"
while IFS= read -r line; do
  case "$line" in
    *'"type":"list_tools"'*)
      tools_response ;;
    *'"type":"execute_task"'*)
      tid=$(field task_id)
      printf '{"type":"task_error","id":"%s","payload":{"task_id":"%s","error":"simulated failure"}}\n' "$tid" "$tid" ;;
    *'"type":"shutdown"'*)
      exit 0 ;;
  esac
done
"##;

/// Reads everything, answers nothing, exits on `shutdown`.
const SILENT: &str = r##"
while IFS= read -r line; do
  case "$line" in
    *'"type":"shutdown"'*)
      exit 0 ;;
  esac
done
"##;

/// Mixes protocol messages with plain text, malformed JSON, log messages and
/// stderr output, then completes the task.
const CHATTY: &str = r##"
echo "booting fake worker"
echo "warming up" >&2
while IFS= read -r line; do
  case "$line" in
    *'"type":"list_tools"'*)
      tools_response ;;
    *'"type":"execute_task"'*)
      tid=$(field task_id)
      file=$(touched_file)
      echo "thinking about it"
      echo '{"type": '
      echo '{"type":"log","payload":{"level":"warning","message":"careful now"}}'
      echo "something odd happened" >&2
      printf '{"type":"task_complete","id":"%s","payload":{"task_id":"%s","files_modified":["%s"]}}\n' "$tid" "$tid" "$file" ;;
    *'"type":"shutdown"'*)
      exit 0 ;;
  esac
done
"##;

/// Dumps a two-megabyte line on stdout and on stderr before reporting, then
/// keeps talking normally.
const FLOODING: &str = r##"
while IFS= read -r line; do
  case "$line" in
    *'"type":"execute_task"'*)
      tid=$(field task_id)
      file=$(touched_file)
      head -c 2000000 /dev/zero | tr '\0' x
      echo
      head -c 2000000 /dev/zero | tr '\0' y >&2
      echo >&2
      echo "stderr still flowing" >&2
      echo '{"type":"log","id":"after","payload":{"level":"info","message":"after the flood"}}'
      printf '{"type":"task_complete","id":"%s","payload":{"task_id":"%s","files_modified":["%s"]}}\n' "$tid" "$tid" "$file" ;;
    *'"type":"shutdown"'*)
      exit 0 ;;
  esac
done
"##;

/// Exits with status 3 as soon as a task arrives, without reporting it.
const CRASHING: &str = r##"
while IFS= read -r line; do
  case "$line" in
    *'"type":"list_tools"'*)
      tools_response ;;
    *'"type":"execute_task"'*)
      echo "fatal: worker crashed" >&2
      exit 3 ;;
  esac
done
"##;

/// Ignores `shutdown`, SIGTERM and stdin EOF. Only SIGKILL stops it.
const STUBBORN: &str = r##"
trap '' TERM
while IFS= read -r line; do
  :
done
while true; do
  sleep 1 </dev/null >/dev/null 2>&1
done
"##;

/// A fake worker program on disk.
#[derive(Debug)]
pub struct FakeWorker {
    _dir: TempDir,
    script: PathBuf,
    extra_args: Vec<String>,
}

impl FakeWorker {
    fn write(name: &str, body: &str, extra_args: Vec<String>) -> Self {
        let dir = TempDir::new().expect("failed to create temp dir for fake worker");
        let script = dir.path().join(format!("{name}.sh"));
        std::fs::write(&script, format!("{PRELUDE}{body}"))
            .unwrap_or_else(|e| panic!("failed to write fake worker {name}: {e}"));
        Self {
            _dir: dir,
            script,
            extra_args,
        }
    }

    /// Completes each task after `delay`. Tasks run concurrently.
    pub fn responsive(delay: Duration) -> Self {
        Self::write("responsive", RESPONSIVE, vec![format!("{:.3}", delay.as_secs_f64())])
    }

    pub fn failing() -> Self {
        Self::write("failing", FAILING, Vec::new())
    }

    /// Never answers. Useful for tool-discovery timeouts and workers without
    /// a completion signal.
    pub fn silent() -> Self {
        Self::write("silent", SILENT, Vec::new())
    }

    pub fn chatty() -> Self {
        Self::write("chatty", CHATTY, Vec::new())
    }

    /// Writes over-long lines to both output streams during each task.
    pub fn flooding() -> Self {
        Self::write("flooding", FLOODING, Vec::new())
    }

    pub fn crashing() -> Self {
        Self::write("crashing", CRASHING, Vec::new())
    }

    pub fn stubborn() -> Self {
        Self::write("stubborn", STUBBORN, Vec::new())
    }

    /// The program to launch.
    pub fn command(&self) -> &str {
        "sh"
    }

    /// Arguments for [`command`](Self::command): the script, then its own args.
    pub fn args(&self) -> Vec<String> {
        let mut args = vec![self.script.display().to_string()];
        args.extend(self.extra_args.iter().cloned());
        args
    }

    pub fn script(&self) -> &Path {
        &self.script
    }
}

/// Create a temporary git repository with an initial commit.
pub fn create_temp_git_repo() -> (TempDir, PathBuf) {
    let dir = TempDir::new().expect("failed to create temp dir");
    let repo_path = dir.path().to_path_buf();

    let run = |args: &[&str]| {
        let output = Command::new("git")
            .args(args)
            .current_dir(&repo_path)
            .output()
            .unwrap_or_else(|e| panic!("failed to run git {}: {e}", args.join(" ")));
        assert!(
            output.status.success(),
            "git {} failed: {}",
            args.join(" "),
            String::from_utf8_lossy(&output.stderr)
        );
    };

    run(&["init"]);
    run(&["config", "user.email", "test@wavecrew.dev"]);
    run(&["config", "user.name", "Wavecrew Test"]);
    run(&["config", "commit.gpgsign", "false"]);

    std::fs::write(repo_path.join("README.md"), "# Test repo\n").expect("failed to write README");

    run(&["add", "."]);
    run(&["commit", "-m", "Initial commit"]);

    (dir, repo_path)
}

/// Whether `git` can be run at all; tests needing it return early otherwise.
pub fn git_available() -> bool {
    Command::new("git")
        .arg("--version")
        .output()
        .map(|o| o.status.success())
        .unwrap_or(false)
}
