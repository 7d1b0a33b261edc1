use anyhow::{Context, Result};
use std::path::PathBuf;

use crate::commands::{CommandReport, load_context, load_windows};
use crate::digest::audit;
use crate::digest::generation::build_client;
use crate::digest::oracle::LlmJudgeOracle;
use crate::digest::orchestrator::{CancelToken, Orchestrator, RetryPolicy};
use crate::digest::store::{JsonlStore, RecordStatus, SummaryStore};

#[derive(Debug, Clone)]
pub struct SummarizeOptions {
    pub input: PathBuf,
    pub max_windows: Option<usize>,
    pub dry_run: bool,
}

pub fn run(opts: &SummarizeOptions) -> Result<CommandReport> {
    let ctx = load_context()?;
    let (messages, windows) = load_windows(&ctx.config, &opts.input)?;
    let store = JsonlStore::new(&ctx.paths.store_file);

    let mut report = CommandReport::new("summarize");
    report.detail(format!("input={}", opts.input.display()));
    report.detail(format!("store={}", store.path().display()));
    report.detail(format!("messages={}", messages.len()));
    report.detail(format!("windows={}", windows.len()));

    if opts.dry_run {
        let mut pending = 0usize;
        for window in &windows {
            if store.has(&window.id)? {
                continue;
            }
            pending += 1;
            report.detail(format!(
                "would_summarize id={} messages={}",
                window.id,
                window.messages.len()
            ));
        }
        report.detail(format!("pending={pending}"));
        return Ok(report);
    }

    let generator = build_client(&ctx.config.generation).context("failed to build generation client")?;
    let judge = build_client(&ctx.config.oracle).context("failed to build oracle client")?;
    let oracle = LlmJudgeOracle::new(judge);
    let orchestrator = Orchestrator::new(
        generator,
        Box::new(oracle),
        RetryPolicy::from(&ctx.config.retry),
        ctx.config.generation.timeout(),
        ctx.config.oracle.timeout(),
        &ctx.config.summary_field,
    );

    audit::append_event(
        &ctx.paths,
        "run",
        "started",
        &format!(
            "input={} windows={} model={}",
            opts.input.display(),
            windows.len(),
            ctx.config.generation.model
        ),
    )?;
    tracing::info!(windows = windows.len(), "summarize run started");

    let cancel = CancelToken::new();
    let mut window_lines = Vec::new();
    let summary = orchestrator.run(&windows, &store, &cancel, opts.max_windows, |outcome| {
        for attempt in &outcome.attempts {
            audit::append_attempt(&ctx.paths, attempt)?;
        }
        let record = &outcome.record;
        let status = match record.status {
            RecordStatus::Accepted => "accepted",
            RecordStatus::Failed => "failed",
        };
        audit::append_event(
            &ctx.paths,
            "window",
            status,
            &format!(
                "window_id={} attempts={} score={:.2} reason={}",
                record.window_id, record.attempts, record.score, record.reason
            ),
        )?;
        window_lines.push(format!(
            "window id={} status={} attempts={} score={:.2}",
            record.window_id, status, record.attempts, record.score
        ));
        Ok(())
    })?;

    for line in window_lines {
        report.detail(line);
    }
    report.detail(format!("accepted={}", summary.accepted));
    report.detail(format!("failed={}", summary.failed));
    report.detail(format!("skipped={}", summary.skipped));
    report.detail(format!("pending={}", summary.pending));
    audit::append_event(
        &ctx.paths,
        "run",
        "finished",
        &format!(
            "accepted={} failed={} skipped={} pending={}",
            summary.accepted, summary.failed, summary.skipped, summary.pending
        ),
    )?;
    tracing::info!(
        accepted = summary.accepted,
        failed = summary.failed,
        skipped = summary.skipped,
        pending = summary.pending,
        "summarize run finished"
    );
    Ok(report)
}
