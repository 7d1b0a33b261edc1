use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::commands::{self, CommandReport};
use crate::logging;

#[derive(Debug, Parser)]
#[command(name = "convo-digest", version, about = "Quality-gated time-window digests of message exports")]
struct Cli {
    /// Print the command report as JSON.
    #[arg(long, global = true)]
    json: bool,
    /// Raise log verbosity (-v info, -vv debug, -vvv trace).
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Cluster a message export into time windows.
    Cluster {
        #[arg(long)]
        input: PathBuf,
    },
    /// Summarize every window not yet in the store.
    Summarize {
        #[arg(long)]
        input: PathBuf,
        /// Stop after this many windows have been processed.
        #[arg(long)]
        max_windows: Option<usize>,
        /// List the windows that would be summarized without calling any model.
        #[arg(long)]
        dry_run: bool,
    },
    /// Print the node/link graph of stored summaries.
    Graph {
        #[arg(long)]
        input: PathBuf,
        /// Write the graph to this file instead of stdout.
        #[arg(long)]
        out: Option<PathBuf>,
        /// Link each node to its predecessor's own index.
        #[arg(long)]
        legacy_edges: bool,
        #[arg(long)]
        accepted_only: bool,
    },
    /// Show resolved paths, config and store counts.
    Status,
}

fn render_text(report: &CommandReport) -> String {
    let mut out = format!(
        "{}: {}\n",
        report.command,
        if report.ok { "ok" } else { "failed" }
    );
    for line in &report.details {
        out.push_str(&format!("  {line}\n"));
    }
    for line in &report.issues {
        out.push_str(&format!("  issue: {line}\n"));
    }
    out
}

fn emit(report: &CommandReport, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(report)?);
        return Ok(());
    }
    match &report.payload {
        // Keep stdout parseable when there is a payload.
        Some(payload) => {
            eprint!("{}", render_text(report));
            println!("{}", serde_json::to_string_pretty(payload)?);
        }
        None => print!("{}", render_text(report)),
    }
    Ok(())
}

pub fn run() -> Result<()> {
    let cli = Cli::parse();
    logging::init(cli.verbose);

    let report = match cli.command {
        Command::Cluster { input } => commands::cluster::run(&input)?,
        Command::Summarize {
            input,
            max_windows,
            dry_run,
        } => commands::summarize::run(&commands::summarize::SummarizeOptions {
            input,
            max_windows,
            dry_run,
        })?,
        Command::Graph {
            input,
            out,
            legacy_edges,
            accepted_only,
        } => commands::graph::run(&commands::graph::GraphOptions {
            input,
            out,
            legacy_edges,
            accepted_only,
        })?,
        Command::Status => commands::status::run()?,
    };

    emit(&report, cli.json)?;
    if !report.ok {
        anyhow::bail!("{} reported {} issue(s)", report.command, report.issues.len());
    }
    Ok(())
}
