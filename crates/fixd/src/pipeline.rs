//! Fix pipeline orchestration.
//!
//! run -> inspect -> (backup -> request fix -> run -> inspect), with exactly
//! one fix attempt per upload. Every transition is recorded on the
//! [`Session`] and written through to the [`SessionStore`], so readers see
//! the current stage while the pipeline is still working.

use crate::backend::{BackendConfig, Credential, FixBackend};
use crate::fixer::{request_fix, FixOutcome};
use crate::runner::{RunnerConfig, ScriptRunner};
use crate::session::{SessionStore, SessionWorkspace};
use fix_core::inspect::read_log;
use fix_core::versioning::backup_and_version;
use fix_core::{Config, Session, SessionState};
use tracing::{error, info, warn};

/// Runs the fix pipeline for sessions.
#[derive(Debug, Clone)]
pub struct Pipeline {
    runner: ScriptRunner,
    backend: BackendConfig,
}

/// Record a transition and publish the session.
async fn advance(
    store: &SessionStore,
    session: &mut Session,
    state: SessionState,
    message: impl Into<String>,
) {
    session.transition(state, message);
    store.put(session.clone()).await;
}

fn describe_source(outcome: &FixOutcome) -> String {
    if outcome.fell_back {
        format!("{} after agent failure", outcome.backend)
    } else {
        outcome.backend.to_string()
    }
}

impl Pipeline {
    pub fn new(runner: ScriptRunner, backend: BackendConfig) -> Self {
        Self { runner, backend }
    }

    /// Create from fix-core Config.
    pub fn from_config(config: &Config) -> Self {
        Self::new(
            ScriptRunner::new(RunnerConfig::from_config(config)),
            BackendConfig::from_config(config),
        )
    }

    pub fn backend_config(&self) -> &BackendConfig {
        &self.backend
    }

    /// Build the session's backend from its credential, then run the pipeline.
    ///
    /// A backend that can not be built ends the session in `RequestFailed`
    /// before the script is executed.
    pub async fn run(
        &self,
        workspace: &SessionWorkspace,
        credential: &Credential,
        store: &SessionStore,
        session: &mut Session,
    ) {
        let backend = match FixBackend::connect(&self.backend, credential, workspace.dir()) {
            Ok(backend) => backend,
            Err(err) => {
                error!(session_id = %session.id, error = %err, "failed to create backend");
                session.error = Some(err.to_string());
                advance(
                    store,
                    session,
                    SessionState::RequestFailed,
                    format!("failed to create agent: {err}"),
                )
                .await;
                return;
            }
        };

        self.run_with_backend(workspace, &backend, store, session).await;
    }

    /// Run the pipeline with an already constructed backend.
    pub async fn run_with_backend(
        &self,
        workspace: &SessionWorkspace,
        backend: &FixBackend,
        store: &SessionStore,
        session: &mut Session,
    ) {
        let script = workspace.script_path();
        let log_path = workspace.log_path();

        let message = format!("running {} and monitoring for errors", session.filename);
        advance(store, session, SessionState::Running, message).await;
        info!(session_id = %session.id, script = %script.display(), "running uploaded script");

        let report = self.runner.run(script, log_path).await;
        let failed = report.failed;
        let status = report.status;
        session.original_run = Some(report);

        if !failed {
            info!(session_id = %session.id, "script ran cleanly");
            advance(store, session, SessionState::Success, "script ran successfully with no errors").await;
            return;
        }

        advance(
            store,
            session,
            SessionState::Failed,
            format!("script failed ({status}); attempting automatic fix"),
        )
        .await;
        let error_log = read_log(log_path);

        advance(store, session, SessionState::BackingUp, "backing up original script").await;
        match backup_and_version(script) {
            Ok(backup) => {
                info!(session_id = %session.id, backup = %backup.display(), "original backed up");
                session.backup_path = Some(backup.display().to_string());
            }
            Err(err) => {
                fix_failed(store, session, format!("failed to back up script: {err}")).await;
                return;
            }
        }

        advance(store, session, SessionState::Fixing, "analyzing and rewriting the script").await;
        let outcome = match request_fix(backend, script, &error_log).await {
            Ok(outcome) => outcome,
            Err(err) => {
                fix_failed(store, session, format!("error fixing script: {err}")).await;
                return;
            }
        };

        let fixed_name = outcome
            .path
            .file_name()
            .map_or_else(|| outcome.path.display().to_string(), |n| n.to_string_lossy().into_owned());
        session.fixed_path = Some(outcome.path.display().to_string());
        session.fixed_source = Some(outcome.source.clone());
        advance(
            store,
            session,
            SessionState::RunningFixed,
            format!(
                "script fixed and saved as {fixed_name} (via {}); retesting",
                describe_source(&outcome)
            ),
        )
        .await;

        let report = self.runner.run(&outcome.path, log_path).await;
        let failed = report.failed;
        let status = report.status;
        session.fixed_run = Some(report);

        if failed {
            warn!(session_id = %session.id, status = %status, "fixed script still fails");
            advance(
                store,
                session,
                SessionState::FixedFailed,
                format!("fix attempt failed ({status}); manual debugging recommended"),
            )
            .await;
        } else {
            info!(session_id = %session.id, "fixed script runs cleanly");
            advance(
                store,
                session,
                SessionState::FixedSuccess,
                "fixed script is now fully operational",
            )
            .await;
        }
    }
}

async fn fix_failed(store: &SessionStore, session: &mut Session, message: String) {
    error!(session_id = %session.id, error = %message, "fix request failed");
    session.error = Some(message.clone());
    advance(store, session, SessionState::FixFailed, message).await;
}
