//! fixd - Python script fixer daemon
//!
//! Library components for the daemon process: script execution, completion
//! backends, the fix pipeline and its HTTP front end.

pub mod backend;
pub mod fixer;
pub mod pipeline;
pub mod runner;
pub mod server;
pub mod session;
pub mod shell;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use fix_core::config::{ConfigError, DEFAULT_CONFIG_PATH};
use fix_core::Config;
use server::AppState;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Default HTTP port.
pub const DEFAULT_PORT: u16 = 7810;

/// Daemon configuration.
#[derive(Debug, Clone)]
pub struct DaemonConfig {
    /// HTTP server port (default: 7810).
    pub port: u16,
    /// Bearer token required by the HTTP API (optional).
    pub auth_token: Option<String>,
    /// Pipeline configuration.
    pub config: Config,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            auth_token: std::env::var("FIXD_AUTH_TOKEN").ok().filter(|t| !t.is_empty()),
            config: Config::default(),
        }
    }
}

/// User-level config file (`~/.config/scriptfix/config` on Linux).
pub fn user_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("scriptfix").join("config"))
}

/// Load pipeline config.
///
/// Layers, lowest first: defaults, the user config file, `.scriptfix/config`
/// under `cwd`, then `explicit` if given. Missing optional files are skipped.
pub fn load_config(cwd: &Path, explicit: Option<&Path>) -> Result<Config, ConfigError> {
    let mut config = match user_config_path().filter(|p| p.is_file()) {
        Some(path) => Config::from_file(&path)?,
        None => Config::default(),
    };

    let local = cwd.join(DEFAULT_CONFIG_PATH);
    if local.is_file() {
        config.load_file(&local)?;
    }

    if let Some(path) = explicit {
        config.load_file(path)?;
    }

    config.resolve_paths(cwd);
    Ok(config)
}

/// Daemon state.
#[derive(Debug)]
pub struct Daemon {
    config: DaemonConfig,
    state: Arc<AppState>,
    shutdown: CancellationToken,
}

impl Daemon {
    /// Create a new daemon with the given configuration.
    pub fn new(config: DaemonConfig) -> Result<Self, Box<dyn std::error::Error>> {
        std::fs::create_dir_all(&config.config.work_dir)?;

        let state = Arc::new(AppState::new(
            config.config.clone(),
            config.auth_token.clone(),
        ));

        Ok(Self {
            config,
            state,
            shutdown: CancellationToken::new(),
        })
    }

    /// Shared handler state.
    pub fn state(&self) -> &Arc<AppState> {
        &self.state
    }

    /// Serve the HTTP API until shutdown is requested.
    pub async fn run(&self) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let config = &self.config.config;
        info!("fixd starting on port {}", self.config.port);
        info!("work dir: {}", config.work_dir.display());
        info!("interpreter: {}", config.python_bin.display());
        info!(
            "backend: {} (agent model {}, chat model {})",
            config.backend.as_str(),
            config.agent_model,
            config.chat_model
        );
        info!("max concurrent sessions: {}", config.max_concurrent_sessions);
        if self.config.auth_token.is_some() {
            info!("auth token: enabled");
        }
        if config.keep_artifacts {
            warn!("keep_artifacts is on; session directories are not removed");
        }

        server::start_server(
            Arc::clone(&self.state),
            self.config.port,
            self.shutdown.clone(),
        )
        .await
    }

    /// Signal the daemon to shut down.
    pub fn shutdown(&self) {
        info!("shutdown requested");
        self.shutdown.cancel();
    }
}
