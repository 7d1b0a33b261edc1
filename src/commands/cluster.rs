use anyhow::Result;
use chrono::SecondsFormat;
use std::path::Path;

use crate::commands::{CommandReport, load_context, load_windows};

pub fn run(input: &Path) -> Result<CommandReport> {
    let ctx = load_context()?;
    let (messages, windows) = load_windows(&ctx.config, input)?;

    let mut report = CommandReport::new("cluster");
    report.detail(format!("input={}", input.display()));
    report.detail(format!("messages={}", messages.len()));
    report.detail(format!("width_minutes={}", ctx.config.window.width_minutes));
    report.detail(format!(
        "group_by_conversation={}",
        ctx.config.window.group_by_conversation
    ));
    report.detail(format!("windows={}", windows.len()));
    for window in &windows {
        report.detail(format!(
            "window id={} start={} end={} messages={}",
            window.id,
            window.start.to_rfc3339_opts(SecondsFormat::Secs, true),
            window.end.to_rfc3339_opts(SecondsFormat::Secs, true),
            window.messages.len()
        ));
    }
    Ok(report)
}
