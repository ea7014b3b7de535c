//! Output rendering for fixctl.
//!
//! Formats session reports for terminal display: stage messages, log panes,
//! the fixed code and a final verdict.

use fix_core::{ExecutionReport, Session, SessionState};

/// One-line verdict for a finished session.
pub fn verdict(session: &Session) -> &'static str {
    match session.state {
        SessionState::Success => "Script ran successfully with no errors.",
        SessionState::FixedSuccess => "Script was fixed and is now fully operational.",
        SessionState::FixedFailed => {
            "Automatic fix did not resolve the problem. Manual debugging recommended."
        }
        SessionState::FixFailed => "Could not produce a fix for this script.",
        SessionState::RequestFailed => "Could not reach the completion service.",
        _ => "Session did not finish.",
    }
}

/// Print the full report for a session.
pub fn print_session_report(session: &Session) {
    println!("Session: {}", session.id);
    println!("  File:   {}", session.filename);
    println!("  State:  {}", session.state.as_str());
    println!();

    for event in &session.events {
        println!(
            "  [{}] {:<14} {}",
            event.at.format("%H:%M:%S"),
            event.state.as_str(),
            event.message
        );
    }

    if let Some(report) = &session.original_run {
        print_run("Original run", report);
    }

    if let Some(backup) = &session.backup_path {
        println!();
        println!("  Backup: {}", backup);
    }

    if let Some(source) = &session.fixed_source {
        println!();
        println!("  Fixed script ({}):", session.download_name());
        println!("  {}", "-".repeat(60));
        for line in source.lines() {
            println!("  {}", line);
        }
        println!("  {}", "-".repeat(60));
    }

    if let Some(report) = &session.fixed_run {
        print_run("Fixed run", report);
    }

    if let Some(error) = &session.error {
        println!();
        println!("  Error: {}", error);
    }

    println!();
    println!("{}", verdict(session));
}

fn print_run(title: &str, report: &ExecutionReport) {
    println!();
    println!(
        "  {}: {} in {}ms{}",
        title,
        report.status,
        report.duration_ms,
        if report.has_error_markers {
            " (errors in log)"
        } else {
            ""
        }
    );
    if report.log_tail.is_empty() {
        println!("    (no output)");
        return;
    }
    for line in report.log_tail.lines() {
        println!("    | {}", line);
    }
}

/// Print a list of sessions in tabular format.
pub fn print_session_list(sessions: &[Session]) {
    if sessions.is_empty() {
        println!("No sessions found.");
        return;
    }

    println!(
        "{:<36}  {:<24}  {:<14}  {:<20}",
        "ID", "FILE", "STATE", "CREATED"
    );
    println!("{}", "-".repeat(100));

    for session in sessions {
        println!(
            "{:<36}  {:<24}  {:<14}  {:<20}",
            session.id.0,
            truncate(&session.filename, 24),
            session.state.as_str(),
            format_time(&session.created_at),
        );
    }

    println!();
    println!("{} session(s)", sessions.len());
}

fn format_time(dt: &chrono::DateTime<chrono::Utc>) -> String {
    dt.format("%Y-%m-%d %H:%M:%S").to_string()
}

fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max_len - 3).collect();
        format!("{kept}...")
    }
}
