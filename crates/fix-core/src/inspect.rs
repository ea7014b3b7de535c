//! Log inspection.
//!
//! A log is treated as errored when its lowercased text contains one of
//! [`ERROR_MARKERS`]. This is a substring heuristic: a script that prints the
//! word "error" on success is reported as failed.

use crate::types::ExecStatus;
use std::path::Path;

/// Case-insensitive substrings that mark a log as failed.
pub const ERROR_MARKERS: [&str; 2] = ["error", "traceback"];

/// Number of log lines shown to the user by default.
pub const DEFAULT_TAIL_LINES: usize = 30;

/// Check text for error markers.
pub fn contains_error_markers(text: &str) -> bool {
    let lowered = text.to_lowercase();
    ERROR_MARKERS.iter().any(|marker| lowered.contains(marker))
}

/// Check a log file for error markers.
///
/// Returns false when the file does not exist or can not be read.
pub fn has_error_markers(log_path: &Path) -> bool {
    match std::fs::read(log_path) {
        Ok(bytes) => contains_error_markers(&String::from_utf8_lossy(&bytes)),
        Err(_) => false,
    }
}

/// Read a log file lossily; missing files read as empty.
pub fn read_log(log_path: &Path) -> String {
    std::fs::read(log_path)
        .map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
        .unwrap_or_default()
}

/// A run failed if the log has markers or the script did not exit zero.
pub fn is_failure(status: ExecStatus, has_markers: bool) -> bool {
    has_markers || !status.is_success()
}

/// Last `lines` lines of `content`.
pub fn log_tail(content: &str, lines: usize) -> String {
    let all: Vec<&str> = content.lines().collect();
    let start = all.len().saturating_sub(lines);
    all[start..].join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn markers_are_case_insensitive() {
        assert!(contains_error_markers("SyntaxError: '(' was never closed"));
        assert!(contains_error_markers("Traceback (most recent call last):"));
        assert!(contains_error_markers("ERROR"));
        assert!(!contains_error_markers("Hello World\nValue: 5"));
    }

    #[test]
    fn missing_log_has_no_markers() {
        let dir = TempDir::new().unwrap();
        assert!(!has_error_markers(&dir.path().join("absent.log")));
    }

    #[test]
    fn log_file_with_traceback_has_markers() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("run.log");
        std::fs::write(&path, "Traceback (most recent call last):\n  File \"x.py\"\nNameError: name 'z' is not defined\n").unwrap();
        assert!(has_error_markers(&path));
    }

    #[test]
    fn invalid_utf8_is_read_lossily() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("run.log");
        std::fs::write(&path, b"\xff\xfeerror here").unwrap();
        assert!(has_error_markers(&path));
        assert!(read_log(&path).contains("error here"));
    }

    #[test]
    fn failure_rule_combines_status_and_markers() {
        assert!(!is_failure(ExecStatus::Exited(0), false));
        assert!(is_failure(ExecStatus::Exited(0), true));
        assert!(is_failure(ExecStatus::Exited(1), false));
        assert!(is_failure(ExecStatus::TimedOut, false));
        assert!(is_failure(ExecStatus::LaunchFailed, false));
    }

    #[test]
    fn log_tail_keeps_last_lines() {
        let content = (1..=40).map(|i| format!("line {i}")).collect::<Vec<_>>().join("\n");
        let tail = log_tail(&content, DEFAULT_TAIL_LINES);
        assert_eq!(tail.lines().count(), 30);
        assert!(tail.starts_with("line 11"));
        assert!(tail.ends_with("line 40"));

        assert_eq!(log_tail("a\nb", 30), "a\nb");
        assert_eq!(log_tail("", 30), "");
    }
}
