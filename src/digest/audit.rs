use crate::digest::orchestrator::GenerationAttempt;
use crate::digest::paths::DigestPaths;
use crate::digest::util::{now_epoch_secs, truncate_with_ellipsis};
use anyhow::{Context, Result};
use serde::Serialize;
use std::fs;
use std::io::Write;

const MAX_AUDIT_TEXT_CHARS: usize = 2_000;

#[derive(Debug, Clone, Serialize)]
pub struct AuditEvent {
    pub at_epoch_secs: u64,
    pub phase: String,
    pub status: String,
    pub message: String,
}

#[derive(Debug, Clone, Serialize)]
struct AttemptEvent<'a> {
    at_epoch_secs: u64,
    phase: &'static str,
    window_id: &'a str,
    attempt_number: u32,
    prompt_text: String,
    raw_response: String,
    parsed_summary: Option<String>,
    score: Option<f64>,
    rejection_reason: Option<&'a str>,
}

fn append_line(paths: &DigestPaths, line: &str) -> Result<()> {
    fs::create_dir_all(&paths.logs_dir)
        .with_context(|| format!("failed to create {}", paths.logs_dir.display()))?;
    let path = paths.audit_log();
    let mut file = fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .with_context(|| format!("failed to open {}", path.display()))?;
    file.write_all(line.as_bytes())?;
    Ok(())
}

pub fn append_event(paths: &DigestPaths, phase: &str, status: &str, message: &str) -> Result<()> {
    let event = AuditEvent {
        at_epoch_secs: now_epoch_secs()?,
        phase: phase.to_string(),
        status: status.to_string(),
        message: message.to_string(),
    };
    append_line(paths, &format!("{}\n", serde_json::to_string(&event)?))
}

/// Attempts are transient; the audit log is the only place they survive.
pub fn append_attempt(paths: &DigestPaths, attempt: &GenerationAttempt) -> Result<()> {
    let event = AttemptEvent {
        at_epoch_secs: now_epoch_secs()?,
        phase: "attempt",
        window_id: attempt.window_id.as_str(),
        attempt_number: attempt.attempt_number,
        prompt_text: truncate_with_ellipsis(&attempt.prompt_text, MAX_AUDIT_TEXT_CHARS),
        raw_response: truncate_with_ellipsis(&attempt.raw_response, MAX_AUDIT_TEXT_CHARS),
        parsed_summary: attempt.parsed_summary.clone(),
        score: attempt.score,
        rejection_reason: attempt.rejection_reason.as_deref(),
    };
    append_line(paths, &format!("{}\n", serde_json::to_string(&event)?))
}
