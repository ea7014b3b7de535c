//! Script runner.
//!
//! Executes an uploaded script through the configured interpreter:
//! - stdout and stderr both go to one log file, truncated per run
//! - a wall-clock timeout kills the process and reports `TimedOut`
//! - launch failures are written into the log and reported as `LaunchFailed`

use fix_core::inspect;
use fix_core::{Config, ExecStatus, ExecutionReport};
use std::fs::File;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::process::Command;
use tracing::{debug, info, warn};

/// Interval between heartbeat log messages while a script is running.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

#[derive(Debug, Error)]
pub enum RunnerError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("interpreter not found: {0}")]
    InterpreterNotFound(String),
}

pub type Result<T> = std::result::Result<T, RunnerError>;

/// Runner configuration.
#[derive(Debug, Clone)]
pub struct RunnerConfig {
    /// Interpreter invoked as `<python_bin> <script>`.
    pub python_bin: PathBuf,
    /// Wall-clock limit (None = wait forever).
    pub timeout: Option<Duration>,
    /// Lines of log kept in the report.
    pub log_tail_lines: usize,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

impl RunnerConfig {
    /// Create from fix-core Config.
    pub fn from_config(config: &Config) -> Self {
        Self {
            python_bin: config.python_bin.clone(),
            timeout: (config.script_timeout_sec > 0)
                .then(|| Duration::from_secs(u64::from(config.script_timeout_sec))),
            log_tail_lines: config.log_tail_lines,
        }
    }
}

/// Runs scripts and classifies their logs.
#[derive(Debug, Clone)]
pub struct ScriptRunner {
    config: RunnerConfig,
}

impl ScriptRunner {
    pub fn new(config: RunnerConfig) -> Self {
        Self { config }
    }

    /// Run `script`, replacing `log_path` with its combined output.
    ///
    /// Never fails: launch errors become a `LaunchFailed` report whose log
    /// holds the error text.
    pub async fn run(&self, script: &Path, log_path: &Path) -> ExecutionReport {
        let started = Instant::now();

        let status = match self.execute(script, log_path).await {
            Ok(status) => status,
            Err(err) => {
                warn!(
                    script = %script.display(),
                    error = %err,
                    "failed to run script"
                );
                if let Err(write_err) =
                    std::fs::write(log_path, format!("Error running script: {err}"))
                {
                    warn!(
                        log = %log_path.display(),
                        error = %write_err,
                        "failed to record launch error"
                    );
                }
                ExecStatus::LaunchFailed
            }
        };

        let duration_ms = started.elapsed().as_millis() as u64;
        let content = inspect::read_log(log_path);
        let has_error_markers = inspect::contains_error_markers(&content);
        let failed = inspect::is_failure(status, has_error_markers);

        info!(
            script = %script.display(),
            status = %status,
            duration_ms = duration_ms,
            has_error_markers = has_error_markers,
            log_bytes = content.len(),
            "script run complete"
        );

        ExecutionReport {
            status,
            duration_ms,
            log_path: log_path.display().to_string(),
            has_error_markers,
            failed,
            log_tail: inspect::log_tail(&content, self.config.log_tail_lines),
        }
    }

    /// Spawn the interpreter and wait for it under the timeout.
    async fn execute(&self, script: &Path, log_path: &Path) -> Result<ExecStatus> {
        let log = File::create(log_path)?;
        let log_err = log.try_clone()?;

        let mut cmd = Command::new(&self.config.python_bin);
        cmd.arg(script)
            .env("PYTHONUNBUFFERED", "1")
            .stdin(Stdio::null())
            .stdout(Stdio::from(log))
            .stderr(Stdio::from(log_err))
            .kill_on_drop(true);
        if let Some(dir) = script.parent().filter(|d| !d.as_os_str().is_empty()) {
            cmd.current_dir(dir);
        }

        debug!(
            interpreter = %self.config.python_bin.display(),
            script = %script.display(),
            "spawning script"
        );

        let mut child = cmd.spawn().map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                RunnerError::InterpreterNotFound(self.config.python_bin.display().to_string())
            } else {
                RunnerError::Io(e)
            }
        })?;

        let started = Instant::now();

        loop {
            let elapsed = started.elapsed();

            if let Some(limit) = self.config.timeout {
                if elapsed >= limit {
                    warn!(
                        script = %script.display(),
                        timeout_ms = limit.as_millis() as u64,
                        "script timed out; killing"
                    );
                    if let Err(err) = child.kill().await {
                        warn!(
                            script = %script.display(),
                            error = %err,
                            "failed to kill timed-out script"
                        );
                    }
                    if let Err(err) = child.wait().await {
                        warn!(
                            script = %script.display(),
                            error = %err,
                            "failed to reap timed-out script"
                        );
                    }
                    return Ok(ExecStatus::TimedOut);
                }
            }

            let remaining = self
                .config
                .timeout
                .map_or(Duration::MAX, |limit| limit.saturating_sub(elapsed));
            let sleep_duration = HEARTBEAT_INTERVAL.min(remaining);

            tokio::select! {
                result = child.wait() => {
                    let status = result?;
                    return Ok(status.code().map_or(ExecStatus::Signaled, ExecStatus::Exited));
                }
                () = tokio::time::sleep(sleep_duration) => {
                    info!(
                        script = %script.display(),
                        elapsed_sec = started.elapsed().as_secs(),
                        "script still running"
                    );
                }
            }
        }
    }
}
