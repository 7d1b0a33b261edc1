use crate::digest::store::{RecordStatus, SummaryRecord};
use crate::digest::window::{Window, WindowId};
use chrono::SecondsFormat;
use serde::Serialize;
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EdgePolicy {
    /// `(i-1, i)`: each window points at the next one.
    #[default]
    Sequential,
    /// `(i-1, i-1)`: the self-loops older graph consumers expect.
    LegacySelfLoop,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GraphNode {
    pub id: usize,
    pub summary: String,
    pub window_start: String,
    pub window_end: String,
    pub original_messages: String,
    pub score: f64,
    pub status: RecordStatus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct GraphLink {
    pub source: usize,
    pub target: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Graph {
    pub nodes: Vec<GraphNode>,
    pub links: Vec<GraphLink>,
}

fn render_original_messages(window: &Window) -> String {
    window
        .messages
        .iter()
        .map(|m| {
            format!(
                "{}|{}|{}|{}",
                m.timestamp.to_rfc3339_opts(SecondsFormat::Secs, true),
                m.message_type,
                m.text,
                m.source_id
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Build the `{nodes, links}` view. Records are ordered by window start, so
/// the store's append order never leaks into node indexes.
pub fn assemble(
    records: &[SummaryRecord],
    windows: &[Window],
    policy: EdgePolicy,
    accepted_only: bool,
) -> Graph {
    let by_id: HashMap<&WindowId, &Window> = windows.iter().map(|w| (&w.id, w)).collect();

    let mut ordered = records
        .iter()
        .enumerate()
        .filter(|(_, record)| !accepted_only || record.is_accepted())
        .collect::<Vec<_>>();
    ordered.sort_by(|(ia, a), (ib, b)| {
        a.start
            .cmp(&b.start)
            .then_with(|| a.conversation_id.cmp(&b.conversation_id))
            .then_with(|| ia.cmp(ib))
    });

    let nodes = ordered
        .iter()
        .enumerate()
        .map(|(idx, (_, record))| GraphNode {
            id: idx,
            summary: record.summary.clone(),
            window_start: record.start.to_rfc3339_opts(SecondsFormat::Secs, true),
            window_end: record.end.to_rfc3339_opts(SecondsFormat::Secs, true),
            original_messages: by_id
                .get(&record.window_id)
                .map(|window| render_original_messages(window))
                .unwrap_or_default(),
            score: record.score,
            status: record.status,
        })
        .collect::<Vec<_>>();

    let links = (1..nodes.len())
        .map(|i| match policy {
            EdgePolicy::Sequential => GraphLink {
                source: i - 1,
                target: i,
            },
            EdgePolicy::LegacySelfLoop => GraphLink {
                source: i - 1,
                target: i - 1,
            },
        })
        .collect();

    Graph { nodes, links }
}
