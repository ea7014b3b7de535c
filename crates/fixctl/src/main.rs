//! fixctl - CLI client for fixd
//!
//! Uploads scripts to the fixer daemon and renders the stage results, plus
//! offline helpers that need no daemon.

use mimalloc::MiMalloc;

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

mod client;
mod render;

use clap::{Parser, Subcommand};
use client::{Client, ClientError, CreateSessionRequest};
use fix_core::prompt::build_fix_prompt;
use fix_core::samples::{write_samples, SAMPLES};
use std::path::{Path, PathBuf};

/// Exit status when the script could not be made to run cleanly.
const EXIT_UNFIXED: i32 = 2;

/// CLI client for the fixd script fixer daemon.
#[derive(Parser)]
#[command(name = "fixctl")]
#[command(about = "Run Python scripts through fixd and fetch automatic fixes")]
#[command(version)]
struct Cli {
    /// Daemon address (default: http://127.0.0.1:7810)
    #[arg(long, global = true, env = "FIXD_ADDR")]
    addr: Option<String>,

    /// Auth token for daemon API
    #[arg(long, global = true, env = "FIXD_TOKEN", hide_env_values = true)]
    token: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Upload a script, run it and fix it if it fails
    Fix {
        /// Path to the Python script
        script: PathBuf,

        /// API key for the completion service
        #[arg(long, env = "OPENAI_API_KEY", hide_env_values = true)]
        api_key: Option<String>,

        /// Write the fixed script here
        #[arg(short, long)]
        out: Option<PathBuf>,
    },

    /// List sessions
    List,

    /// Show the report for a session
    Show {
        /// Session ID
        session_id: String,
    },

    /// Download the fixed script of a session
    Download {
        /// Session ID
        session_id: String,

        /// Output path (default: the name offered by the daemon)
        #[arg(short, long)]
        out: Option<PathBuf>,
    },

    /// Release a session and delete its files
    Release {
        /// Session ID
        session_id: String,
    },

    /// Show the prompt that would be sent (no daemon required)
    Prompt {
        /// Path to the Python script
        script: PathBuf,

        /// Path to the captured error log
        #[arg(long)]
        log: PathBuf,
    },

    /// Write the sample broken scripts (no daemon required)
    Samples {
        /// Target directory
        #[arg(long, default_value = ".")]
        dir: PathBuf,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let addr = cli
        .addr
        .unwrap_or_else(|| "http://127.0.0.1:7810".to_string());
    let client = Client::new(&addr, cli.token.as_deref());

    let requires_daemon = !matches!(
        cli.command,
        Command::Prompt { .. } | Command::Samples { .. }
    );
    if requires_daemon {
        if let Err(e) = client.wait_for_ready().await {
            eprintln!("error: {}", e);
            std::process::exit(1);
        }
    }

    let result = match cli.command {
        Command::Fix {
            script,
            api_key,
            out,
        } => run_fix(&client, &script, api_key, out.as_deref()).await,
        Command::List => run_list(&client).await,
        Command::Show { session_id } => run_show(&client, &session_id).await,
        Command::Download { session_id, out } => {
            run_download(&client, &session_id, out.as_deref()).await
        }
        Command::Release { session_id } => run_release(&client, &session_id).await,
        Command::Prompt { script, log } => show_prompt(&script, &log),
        Command::Samples { dir } => run_samples(&dir),
    };

    match result {
        Ok(true) => {}
        Ok(false) => std::process::exit(EXIT_UNFIXED),
        Err(e) => {
            eprintln!("error: {}", e);
            std::process::exit(1);
        }
    }
}

/// Upload name for `script`: its final path component.
fn upload_name(script: &Path) -> Result<String, ClientError> {
    script
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .ok_or_else(|| ClientError::Rejected(format!("not a file: {}", script.display())))
}

async fn run_fix(
    client: &Client,
    script: &Path,
    api_key: Option<String>,
    out: Option<&Path>,
) -> Result<bool, ClientError> {
    let api_key = api_key
        .filter(|k| !k.trim().is_empty())
        .ok_or(ClientError::MissingApiKey)?;

    let source = std::fs::read_to_string(script)
        .map_err(|e| ClientError::IoError(format!("{}: {}", script.display(), e)))?;

    let req = CreateSessionRequest {
        filename: upload_name(script)?,
        source,
        api_key,
    };

    println!("Uploading {} ...", script.display());
    let session = client.create_session(&req).await?;
    render::print_session_report(&session);

    if let Some(out) = out {
        match &session.fixed_source {
            Some(fixed) => {
                std::fs::write(out, fixed)?;
                println!("Fixed script written to {}", out.display());
            }
            None => println!("No fixed script to write."),
        }
    }

    Ok(session.state.is_success())
}

async fn run_list(client: &Client) -> Result<bool, ClientError> {
    let sessions = client.list_sessions().await?;
    render::print_session_list(&sessions);
    Ok(true)
}

async fn run_show(client: &Client, session_id: &str) -> Result<bool, ClientError> {
    let session = client.get_session(session_id).await?;
    render::print_session_report(&session);
    Ok(true)
}

async fn run_download(
    client: &Client,
    session_id: &str,
    out: Option<&Path>,
) -> Result<bool, ClientError> {
    let download = client.download(session_id).await?;

    let path = match out {
        Some(path) => path.to_path_buf(),
        None => PathBuf::from(
            download
                .filename
                .unwrap_or_else(|| format!("fixed_{session_id}.py")),
        ),
    };

    std::fs::write(&path, &download.source)?;
    println!("Saved {}", path.display());
    Ok(true)
}

async fn run_release(client: &Client, session_id: &str) -> Result<bool, ClientError> {
    client.release(session_id).await?;
    println!("Released session: {}", session_id);
    Ok(true)
}

fn show_prompt(script: &Path, log: &Path) -> Result<bool, ClientError> {
    let source = std::fs::read_to_string(script)
        .map_err(|e| ClientError::IoError(format!("{}: {}", script.display(), e)))?;
    let log = std::fs::read(log)
        .map_err(|e| ClientError::IoError(format!("{}: {}", log.display(), e)))?;

    println!("{}", build_fix_prompt(&source, &String::from_utf8_lossy(&log)));
    Ok(true)
}

fn run_samples(dir: &Path) -> Result<bool, ClientError> {
    let written = write_samples(dir)?;
    for (path, sample) in written.iter().zip(SAMPLES.iter()) {
        println!("{:<40}  {}", path.display(), sample.description);
    }
    Ok(true)
}
