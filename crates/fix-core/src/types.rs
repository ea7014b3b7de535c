//! Core types shared by the daemon and the CLI.
//!
//! Sessions, execution reports and the fix-pipeline state machine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier for sessions.
/// Uses `UUIDv7` for time-ordered lexicographic sorting.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Id(pub String);

impl Id {
    pub fn new() -> Self {
        Self(Uuid::now_v7().to_string())
    }

    pub fn from_string(s: impl Into<String>) -> Self {
        Self(s.into())
    }
}

impl Default for Id {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for Id {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl AsRef<str> for Id {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// How a script execution ended.
///
/// `TimedOut` and `LaunchFailed` never carry an exit code, so they can not be
/// confused with anything the script itself returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "code", rename_all = "snake_case")]
pub enum ExecStatus {
    /// The process exited on its own with this code.
    Exited(i32),
    /// The process was terminated by a signal we did not send.
    Signaled,
    /// The wall-clock timeout elapsed and the process was killed.
    TimedOut,
    /// The interpreter could not be started.
    LaunchFailed,
}

impl ExecStatus {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Exited(0))
    }
}

impl std::fmt::Display for ExecStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Exited(code) => write!(f, "exit {code}"),
            Self::Signaled => write!(f, "killed by signal"),
            Self::TimedOut => write!(f, "timed out"),
            Self::LaunchFailed => write!(f, "launch failed"),
        }
    }
}

/// Which completion backend handles fix requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendMode {
    /// Agent runtime first, direct chat completion on failure.
    #[default]
    Agent,
    /// Direct chat completion only.
    Chat,
}

impl BackendMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Agent => "agent",
            Self::Chat => "chat",
        }
    }
}

/// Fix pipeline state for a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionState {
    Idle,
    Running,
    Success,
    Failed,
    BackingUp,
    Fixing,
    RunningFixed,
    FixedSuccess,
    FixedFailed,
    FixFailed,
    RequestFailed,
}

impl SessionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "IDLE",
            Self::Running => "RUNNING",
            Self::Success => "SUCCESS",
            Self::Failed => "FAILED",
            Self::BackingUp => "BACKING_UP",
            Self::Fixing => "FIXING",
            Self::RunningFixed => "RUNNING_FIXED",
            Self::FixedSuccess => "FIXED_SUCCESS",
            Self::FixedFailed => "FIXED_FAILED",
            Self::FixFailed => "FIX_FAILED",
            Self::RequestFailed => "REQUEST_FAILED",
        }
    }

    /// No further transitions follow.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Success
                | Self::FixedSuccess
                | Self::FixedFailed
                | Self::FixFailed
                | Self::RequestFailed
        )
    }

    /// Whether the session ended with a script that runs cleanly.
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success | Self::FixedSuccess)
    }
}

/// A single state transition recorded for the front end.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageEvent {
    pub state: SessionState,
    pub at: DateTime<Utc>,
    pub message: String,
}

/// Outcome of one script execution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionReport {
    pub status: ExecStatus,
    pub duration_ms: u64,
    pub log_path: String,
    pub has_error_markers: bool,
    /// Markers present or status other than a zero exit.
    pub failed: bool,
    /// Last lines of the log, for display.
    pub log_tail: String,
}

/// One upload and everything the pipeline did with it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: Id,
    /// Original upload filename, e.g. `broken.py`.
    pub filename: String,
    pub state: SessionState,
    pub events: Vec<StageEvent>,
    pub original_run: Option<ExecutionReport>,
    pub fixed_run: Option<ExecutionReport>,
    /// Untouched copy of the upload (`name_v2.py`).
    pub backup_path: Option<String>,
    /// Versioned file holding the model's fix.
    pub fixed_path: Option<String>,
    pub fixed_source: Option<String>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Session {
    pub fn new(filename: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Id::new(),
            filename: filename.into(),
            state: SessionState::Idle,
            events: Vec::new(),
            original_run: None,
            fixed_run: None,
            backup_path: None,
            fixed_path: None,
            fixed_source: None,
            error: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Move to `state` and record the transition.
    pub fn transition(&mut self, state: SessionState, message: impl Into<String>) {
        let now = Utc::now();
        self.state = state;
        self.updated_at = now;
        self.events.push(StageEvent {
            state,
            at: now,
            message: message.into(),
        });
    }

    /// Filename offered for the fixed script download.
    pub fn download_name(&self) -> String {
        format!("fixed_{}", self.filename)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exec_status_success_only_for_zero_exit() {
        assert!(ExecStatus::Exited(0).is_success());
        assert!(!ExecStatus::Exited(1).is_success());
        assert!(!ExecStatus::TimedOut.is_success());
        assert!(!ExecStatus::LaunchFailed.is_success());
        assert!(!ExecStatus::Signaled.is_success());
    }

    #[test]
    fn exec_status_serializes_tagged() {
        let json = serde_json::to_value(ExecStatus::Exited(2)).unwrap();
        assert_eq!(json, serde_json::json!({"kind": "exited", "code": 2}));
        let json = serde_json::to_value(ExecStatus::TimedOut).unwrap();
        assert_eq!(json, serde_json::json!({"kind": "timed_out"}));
    }

    #[test]
    fn terminal_states() {
        for state in [
            SessionState::Success,
            SessionState::FixedSuccess,
            SessionState::FixedFailed,
            SessionState::FixFailed,
            SessionState::RequestFailed,
        ] {
            assert!(state.is_terminal(), "{} should be terminal", state.as_str());
        }
        for state in [
            SessionState::Idle,
            SessionState::Running,
            SessionState::Failed,
            SessionState::BackingUp,
            SessionState::Fixing,
            SessionState::RunningFixed,
        ] {
            assert!(!state.is_terminal(), "{} should not be terminal", state.as_str());
        }
    }

    #[test]
    fn transition_records_events_in_order() {
        let mut session = Session::new("broken.py");
        session.transition(SessionState::Running, "running broken.py");
        session.transition(SessionState::Success, "no errors");

        assert_eq!(session.state, SessionState::Success);
        let states: Vec<_> = session.events.iter().map(|e| e.state).collect();
        assert_eq!(states, vec![SessionState::Running, SessionState::Success]);
    }

    #[test]
    fn download_name_is_prefixed() {
        let session = Session::new("script.py");
        assert_eq!(session.download_name(), "fixed_script.py");
    }

    #[test]
    fn session_state_serializes_screaming_snake() {
        let json = serde_json::to_string(&SessionState::FixedSuccess).unwrap();
        assert_eq!(json, "\"FIXED_SUCCESS\"");
    }
}
