//! Local shell tool for the agent backend.
//!
//! When `agent_shell_tool` is on, the agent may ask to run commands while it
//! works on a fix. Each command runs inside the session directory with stdin
//! closed and a bounded timeout; its exit status and combined output are
//! handed back to the model as text.

use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, warn};

/// Upper bound on a single command, whatever the model asks for.
pub const MAX_COMMAND_TIMEOUT: Duration = Duration::from_secs(30);

/// Output returned to the model is cut to this many bytes.
const OUTPUT_LIMIT: usize = 16 * 1024;

/// The `action` of a `local_shell_call` output item.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ShellAction {
    /// Program followed by its arguments.
    #[serde(default)]
    pub command: Vec<String>,
    #[serde(default)]
    pub env: HashMap<String, String>,
    #[serde(default)]
    pub timeout_ms: Option<u64>,
}

/// Runs agent shell calls in one session directory.
#[derive(Debug, Clone)]
pub struct ShellTool {
    dir: PathBuf,
    max_timeout: Duration,
}

impl ShellTool {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            max_timeout: MAX_COMMAND_TIMEOUT,
        }
    }

    /// Lower the per-command ceiling.
    pub fn with_max_timeout(mut self, max_timeout: Duration) -> Self {
        self.max_timeout = max_timeout;
        self
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Run `action` and describe the result for the model.
    ///
    /// Failures to launch, timeouts and non-zero exits are all reported in
    /// the returned text rather than as errors.
    pub async fn exec(&self, action: &ShellAction) -> String {
        let Some((program, args)) = action.command.split_first() else {
            return "error: empty command".to_string();
        };

        let timeout = action
            .timeout_ms
            .map(Duration::from_millis)
            .map_or(self.max_timeout, |t| t.min(self.max_timeout));

        debug!(command = ?action.command, dir = %self.dir.display(), "running agent shell command");

        let mut cmd = Command::new(program);
        cmd.args(args)
            .envs(&action.env)
            .current_dir(&self.dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => {
                warn!(program = %program, error = %e, "agent shell command failed to start");
                return format!("error: failed to start {program}: {e}");
            }
        };

        // Dropping the pending wait on timeout kills the child.
        let output = match tokio::time::timeout(timeout, child.wait_with_output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => return format!("error: {e}"),
            Err(_) => {
                warn!(command = ?action.command, timeout_ms = timeout.as_millis() as u64, "agent shell command timed out");
                return format!("error: command timed out after {} ms", timeout.as_millis());
            }
        };

        let status = match output.status.code() {
            Some(code) => format!("exit code: {code}"),
            None => "killed by signal".to_string(),
        };
        let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
        text.push_str(&String::from_utf8_lossy(&output.stderr));

        format!("{status}\n{}", truncate(text))
    }
}

fn truncate(mut text: String) -> String {
    if text.len() <= OUTPUT_LIMIT {
        return text;
    }
    let mut end = OUTPUT_LIMIT;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    text.truncate(end);
    text.push_str("\n[output truncated]");
    text
}
