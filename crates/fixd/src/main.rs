//! fixd - Python script fixer daemon
//!
//! Main entry point for the daemon binary.

use mimalloc::MiMalloc;

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

use std::path::PathBuf;

use clap::{Parser, ValueEnum};
use eyre::WrapErr;
use fix_core::BackendMode;
use fixd::{load_config, Daemon, DaemonConfig, DEFAULT_PORT};
use tracing::{error, info};
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Clone, Copy, Debug, ValueEnum)]
enum BackendArg {
    Agent,
    Chat,
}

impl From<BackendArg> for BackendMode {
    fn from(arg: BackendArg) -> Self {
        match arg {
            BackendArg::Agent => BackendMode::Agent,
            BackendArg::Chat => BackendMode::Chat,
        }
    }
}

#[derive(Parser)]
#[command(name = "fixd", about = "Python script fixer daemon", version)]
struct Cli {
    /// Port to listen on
    #[arg(short, long, default_value_t = DEFAULT_PORT)]
    port: u16,

    /// Config file (key=value), applied over .scriptfix/config
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Directory for per-session scratch space
    #[arg(long)]
    work_dir: Option<PathBuf>,

    /// Interpreter used to run uploaded scripts
    #[arg(long)]
    python: Option<PathBuf>,

    /// Completion backend
    #[arg(long, value_enum)]
    backend: Option<BackendArg>,

    /// Script execution timeout in seconds (0 disables)
    #[arg(long)]
    timeout: Option<u32>,

    /// Keep session directories after each run
    #[arg(long)]
    keep_artifacts: bool,
}

fn build_config(cli: &Cli) -> eyre::Result<DaemonConfig> {
    let cwd = std::env::current_dir().wrap_err("failed to resolve current directory")?;
    let mut config = load_config(&cwd, cli.config.as_deref()).wrap_err("failed to load config")?;

    if let Some(work_dir) = &cli.work_dir {
        config.work_dir = cwd.join(work_dir);
    }
    if let Some(python) = &cli.python {
        config.python_bin = python.clone();
    }
    if let Some(backend) = cli.backend {
        config.backend = backend.into();
    }
    if let Some(timeout) = cli.timeout {
        config.script_timeout_sec = timeout;
    }
    if cli.keep_artifacts {
        config.keep_artifacts = true;
    }

    Ok(DaemonConfig {
        port: cli.port,
        config,
        ..Default::default()
    })
}

fn main() -> eyre::Result<()> {
    let cli = Cli::parse();

    // Initialize tracing.
    fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = build_config(&cli)?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .wrap_err("failed to create tokio runtime")?;

    runtime.block_on(async {
        let daemon = match Daemon::new(config) {
            Ok(daemon) => daemon,
            Err(e) => {
                error!("failed to initialize daemon: {}", e);
                std::process::exit(1);
            }
        };

        // Set up signal handlers for graceful shutdown.
        #[cfg(unix)]
        {
            use tokio::signal::unix::{signal, SignalKind};
            let mut sigterm =
                signal(SignalKind::terminate()).wrap_err("failed to register SIGTERM handler")?;
            let mut sigint =
                signal(SignalKind::interrupt()).wrap_err("failed to register SIGINT handler")?;

            let serve = daemon.run();
            tokio::pin!(serve);

            tokio::select! {
                result = &mut serve => {
                    if let Err(e) = result {
                        error!("daemon error: {}", e);
                    }
                    return Ok(());
                }
                _ = sigint.recv() => {
                    info!("received SIGINT, initiating graceful shutdown");
                }
                _ = sigterm.recv() => {
                    info!("received SIGTERM, initiating graceful shutdown");
                }
            }

            daemon.shutdown();
            if let Err(e) = serve.await {
                error!("daemon error: {}", e);
            }
        }

        #[cfg(not(unix))]
        {
            let serve = daemon.run();
            tokio::pin!(serve);

            tokio::select! {
                result = &mut serve => {
                    if let Err(e) = result {
                        error!("daemon error: {}", e);
                    }
                    return Ok(());
                }
                _ = tokio::signal::ctrl_c() => {
                    info!("received SIGINT, initiating graceful shutdown");
                }
            }

            daemon.shutdown();
            if let Err(e) = serve.await {
                error!("daemon error: {}", e);
            }
        }

        Ok::<(), eyre::Report>(())
    })
}
