//! Per-session scratch space and the in-memory session registry.
//!
//! Every upload gets its own directory `<work_dir>/session-<id>/` holding the
//! script, its versions and `run.log`, so concurrent sessions never share a
//! file name.

use fix_core::{Id, Session};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::sync::RwLock;
use tracing::debug;

/// Log file name inside a session directory.
pub const LOG_FILE_NAME: &str = "run.log";

/// Reduce an upload name to a bare `.py` file name.
///
/// Directory components are dropped. Returns None unless the result has a
/// non-empty stem and a `.py` extension.
pub fn sanitize_filename(name: &str) -> Option<String> {
    let base = name.rsplit(|c: char| c == '/' || c == '\\').next().unwrap_or("").trim();
    let (stem, ext) = base.rsplit_once('.')?;
    if stem.is_empty() || !ext.eq_ignore_ascii_case("py") {
        return None;
    }
    Some(base.to_string())
}

/// Scratch directory for one session.
#[derive(Debug, Clone)]
pub struct SessionWorkspace {
    dir: PathBuf,
    script_path: PathBuf,
    log_path: PathBuf,
}

impl SessionWorkspace {
    /// Directory for session `id` under `work_dir`.
    pub fn dir_for(work_dir: &Path, id: &Id) -> PathBuf {
        work_dir.join(format!("session-{id}"))
    }

    /// Create the session directory and write the uploaded script into it.
    pub fn create(work_dir: &Path, id: &Id, filename: &str, source: &[u8]) -> std::io::Result<Self> {
        let dir = Self::dir_for(work_dir, id);
        std::fs::create_dir_all(&dir)?;
        let script_path = dir.join(filename);
        std::fs::write(&script_path, source)?;
        Ok(Self {
            log_path: dir.join(LOG_FILE_NAME),
            dir,
            script_path,
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn script_path(&self) -> &Path {
        &self.script_path
    }

    pub fn log_path(&self) -> &Path {
        &self.log_path
    }

    /// Remove the session directory. Failures are ignored.
    pub fn release(&self) {
        release_dir(&self.dir);
    }
}

/// Best-effort recursive removal.
pub fn release_dir(dir: &Path) {
    if let Err(err) = std::fs::remove_dir_all(dir) {
        debug!(dir = %dir.display(), error = %err, "ignoring session cleanup failure");
    }
}

/// In-memory registry of sessions for the lifetime of the daemon.
#[derive(Debug, Default)]
pub struct SessionStore {
    sessions: RwLock<HashMap<Id, Session>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a session.
    pub async fn put(&self, session: Session) {
        self.sessions.write().await.insert(session.id.clone(), session);
    }

    pub async fn get(&self, id: &Id) -> Option<Session> {
        self.sessions.read().await.get(id).cloned()
    }

    /// All sessions, oldest first.
    pub async fn list(&self) -> Vec<Session> {
        let mut sessions: Vec<Session> = self.sessions.read().await.values().cloned().collect();
        sessions.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.0.cmp(&b.id.0)));
        sessions
    }

    pub async fn remove(&self, id: &Id) -> Option<Session> {
        self.sessions.write().await.remove(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fix_core::SessionState;
    use tempfile::TempDir;

    #[test]
    fn sanitize_accepts_python_files() {
        assert_eq!(sanitize_filename("broken.py").as_deref(), Some("broken.py"));
        assert_eq!(sanitize_filename("Tool.PY").as_deref(), Some("Tool.PY"));
        assert_eq!(sanitize_filename("a.b.py").as_deref(), Some("a.b.py"));
    }

    #[test]
    fn sanitize_strips_directories() {
        assert_eq!(sanitize_filename("../../etc/evil.py").as_deref(), Some("evil.py"));
        assert_eq!(sanitize_filename("C:\\Users\\me\\job.py").as_deref(), Some("job.py"));
    }

    #[test]
    fn sanitize_rejects_other_files() {
        assert_eq!(sanitize_filename("notes.txt"), None);
        assert_eq!(sanitize_filename("script"), None);
        assert_eq!(sanitize_filename(".py"), None);
        assert_eq!(sanitize_filename("dir/"), None);
        assert_eq!(sanitize_filename(""), None);
    }

    #[test]
    fn workspace_is_unique_per_session() {
        let dir = TempDir::new().unwrap();
        let a = SessionWorkspace::create(dir.path(), &Id::new(), "job.py", b"print(1)").unwrap();
        let b = SessionWorkspace::create(dir.path(), &Id::new(), "job.py", b"print(2)").unwrap();

        assert_ne!(a.dir(), b.dir());
        assert_eq!(std::fs::read_to_string(a.script_path()).unwrap(), "print(1)");
        assert_eq!(std::fs::read_to_string(b.script_path()).unwrap(), "print(2)");
        assert_eq!(a.log_path(), a.dir().join("run.log"));
    }

    #[test]
    fn release_removes_directory_and_tolerates_repeats() {
        let dir = TempDir::new().unwrap();
        let ws = SessionWorkspace::create(dir.path(), &Id::new(), "job.py", b"x").unwrap();
        ws.release();
        assert!(!ws.dir().exists());
        ws.release();
    }

    #[tokio::test]
    async fn store_round_trip() {
        let store = SessionStore::new();
        let mut first = Session::new("a.py");
        first.transition(SessionState::Success, "ok");
        let second = Session::new("b.py");

        store.put(first.clone()).await;
        store.put(second.clone()).await;

        assert_eq!(store.get(&first.id).await.unwrap().state, SessionState::Success);
        let mut listed: Vec<_> = store.list().await.into_iter().map(|s| s.filename).collect();
        listed.sort();
        assert_eq!(listed, vec!["a.py", "b.py"]);

        assert!(store.remove(&first.id).await.is_some());
        assert!(store.get(&first.id).await.is_none());
        assert!(store.remove(&first.id).await.is_none());
    }
}
