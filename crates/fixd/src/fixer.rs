//! Fix requests.
//!
//! Reads the failing script, asks the completion backend for a corrected
//! version, strips markdown fences and writes the result to the next free
//! version path. The original script is never modified.

use crate::backend::{BackendError, FixBackend};
use fix_core::prompt::{build_fix_prompt, strip_code_fences};
use fix_core::versioning::backup_and_version;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::info;

#[derive(Debug, Error)]
pub enum FixError {
    #[error("failed to read script {path}: {source}")]
    ReadScript {
        path: String,
        source: std::io::Error,
    },
    #[error("failed to write fixed script: {0}")]
    WriteFix(#[source] std::io::Error),
    #[error(transparent)]
    Backend(#[from] BackendError),
}

pub type Result<T> = std::result::Result<T, FixError>;

/// A fixed script on disk.
#[derive(Debug, Clone)]
pub struct FixOutcome {
    pub path: PathBuf,
    pub source: String,
    /// Backend that produced the fix (`agent` or `chat`).
    pub backend: &'static str,
    pub fell_back: bool,
}

/// Request a corrected version of `script` given its failure log.
pub async fn request_fix(backend: &FixBackend, script: &Path, error_log: &str) -> Result<FixOutcome> {
    let original = std::fs::read_to_string(script).map_err(|source| FixError::ReadScript {
        path: script.display().to_string(),
        source,
    })?;

    let prompt = build_fix_prompt(&original, error_log);
    info!(
        script = %script.display(),
        prompt_bytes = prompt.len(),
        mode = backend.mode().as_str(),
        "requesting fix"
    );

    let completion = backend.complete(&prompt).await?;
    let fixed = strip_code_fences(&completion.text);

    let path = backup_and_version(script).map_err(FixError::WriteFix)?;
    std::fs::write(&path, &fixed).map_err(FixError::WriteFix)?;

    info!(
        script = %script.display(),
        fixed_path = %path.display(),
        backend = completion.backend,
        fell_back = completion.fell_back,
        "fixed script written"
    );

    Ok(FixOutcome {
        path,
        source: fixed,
        backend: completion.backend,
        fell_back: completion.fell_back,
    })
}
