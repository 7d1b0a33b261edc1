use anyhow::{Context, Result};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::commands::{CommandReport, load_context, load_windows};
use crate::digest::graph::{EdgePolicy, assemble};
use crate::digest::store::{JsonlStore, SummaryStore};

#[derive(Debug, Clone)]
pub struct GraphOptions {
    pub input: PathBuf,
    pub out: Option<PathBuf>,
    pub legacy_edges: bool,
    pub accepted_only: bool,
}

fn write_atomic(path: &Path, body: &str) -> Result<()> {
    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    fs::create_dir_all(&parent)
        .with_context(|| format!("failed to create {}", parent.display()))?;
    let mut tmp = tempfile::NamedTempFile::new_in(&parent)
        .with_context(|| format!("failed to create temp file in {}", parent.display()))?;
    tmp.write_all(body.as_bytes())?;
    tmp.as_file().sync_data()?;
    tmp.persist(path)
        .map_err(|err| err.error)
        .with_context(|| format!("failed to write {}", path.display()))?;
    Ok(())
}

pub fn run(opts: &GraphOptions) -> Result<CommandReport> {
    let ctx = load_context()?;
    let (_, windows) = load_windows(&ctx.config, &opts.input)?;
    let store = JsonlStore::new(&ctx.paths.store_file);
    let records = store.load_all()?;

    let policy = if opts.legacy_edges {
        EdgePolicy::LegacySelfLoop
    } else {
        EdgePolicy::Sequential
    };
    let graph = assemble(&records, &windows, policy, opts.accepted_only);

    let mut report = CommandReport::new("graph");
    report.detail(format!("records={}", records.len()));
    report.detail(format!("nodes={}", graph.nodes.len()));
    report.detail(format!("links={}", graph.links.len()));
    report.detail(format!("edge_policy={policy:?}"));

    let value = serde_json::to_value(&graph)?;
    match opts.out.as_deref() {
        Some(out) => {
            write_atomic(out, &format!("{}\n", serde_json::to_string_pretty(&value)?))?;
            report.detail(format!("out={}", out.display()));
        }
        None => report.set_payload(value),
    }
    Ok(report)
}
