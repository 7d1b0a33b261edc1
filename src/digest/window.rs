use crate::digest::message::Message;
use anyhow::{Result, bail};
use chrono::{DateTime, SecondsFormat, TimeDelta, Timelike, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WindowId(String);

impl WindowId {
    pub fn new(conversation_id: Option<&str>, start: DateTime<Utc>) -> Self {
        let start = start.to_rfc3339_opts(SecondsFormat::Secs, true);
        match conversation_id {
            Some(conversation) => Self(format!("{conversation}@{start}")),
            None => Self(start),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for WindowId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for WindowId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// Half-open interval `[start, end)` holding at least one message.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Window {
    pub id: WindowId,
    pub conversation_id: Option<String>,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub messages: Vec<Message>,
}

pub fn floor_to_hour(ts: DateTime<Utc>) -> DateTime<Utc> {
    let into_hour = TimeDelta::seconds(i64::from(ts.minute() * 60 + ts.second()))
        + TimeDelta::nanoseconds(i64::from(ts.nanosecond()));
    ts - into_hour
}

fn cluster_run(
    messages: &[&Message],
    width: TimeDelta,
    conversation_id: Option<&str>,
    out: &mut Vec<Window>,
) -> Result<()> {
    let Some(first) = messages.first() else {
        return Ok(());
    };
    let base = floor_to_hour(first.timestamp);
    let width_secs = width.num_seconds();

    let mut current: Option<(i64, Vec<Message>)> = None;
    for message in messages {
        // Messages are sorted, so the index never decreases and empty
        // windows between two indexes are never materialized.
        let index = (message.timestamp - base).num_seconds() / width_secs;
        match current.as_mut() {
            Some((open, bucket)) if *open == index => bucket.push((*message).clone()),
            _ => {
                if let Some((open, bucket)) = current.take() {
                    out.push(make_window(base, width, open, conversation_id, bucket)?);
                }
                current = Some((index, vec![(*message).clone()]));
            }
        }
    }
    if let Some((open, bucket)) = current {
        out.push(make_window(base, width, open, conversation_id, bucket)?);
    }
    Ok(())
}

fn make_window(
    base: DateTime<Utc>,
    width: TimeDelta,
    index: i64,
    conversation_id: Option<&str>,
    messages: Vec<Message>,
) -> Result<Window> {
    let start = width
        .num_seconds()
        .checked_mul(index)
        .and_then(TimeDelta::try_seconds)
        .and_then(|offset| base.checked_add_signed(offset));
    let Some(start) = start else {
        bail!("window {index} from {base} overflows the supported time range");
    };
    let Some(end) = start.checked_add_signed(width) else {
        bail!("window starting at {start} overflows the supported time range");
    };
    Ok(Window {
        id: WindowId::new(conversation_id, start),
        conversation_id: conversation_id.map(str::to_string),
        start,
        end,
        messages,
    })
}

/// Partition time-ordered messages into hour-aligned windows of `width`.
///
/// With `group_by_conversation` each conversation gets its own cursor and
/// the result is ordered by `(start, conversation id)`.
pub fn cluster(
    messages: &[Message],
    width: TimeDelta,
    group_by_conversation: bool,
) -> Result<Vec<Window>> {
    if width.num_seconds() <= 0 {
        bail!("window width must be at least one second");
    }

    let mut out = Vec::new();
    if !group_by_conversation {
        let all = messages.iter().collect::<Vec<_>>();
        cluster_run(&all, width, None, &mut out)?;
        return Ok(out);
    }

    let mut groups: BTreeMap<Option<&str>, Vec<&Message>> = BTreeMap::new();
    for message in messages {
        groups
            .entry(message.conversation_id.as_deref())
            .or_default()
            .push(message);
    }
    for (conversation_id, group) in groups {
        cluster_run(&group, width, conversation_id, &mut out)?;
    }
    out.sort_by(|a, b| {
        a.start
            .cmp(&b.start)
            .then_with(|| a.conversation_id.cmp(&b.conversation_id))
    });
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(raw: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(raw)
            .expect("valid rfc3339")
            .with_timezone(&Utc)
    }

    fn msg(seq: usize, ts: &str, conversation: Option<&str>) -> Message {
        Message {
            seq,
            timestamp: at(ts),
            source_id: format!("s{seq}"),
            message_type: "SMS".to_string(),
            text: format!("m{seq}"),
            conversation_id: conversation.map(str::to_string),
        }
    }

    #[test]
    fn hourly_windows_skip_empty_hours() {
        let messages = vec![
            msg(0, "2025-01-29T09:10:00Z", None),
            msg(1, "2025-01-29T09:50:00Z", None),
            msg(2, "2025-01-29T11:05:00Z", None),
        ];
        let windows = cluster(&messages, TimeDelta::minutes(60), false).expect("cluster");
        assert_eq!(windows.len(), 2);
        assert_eq!(windows[0].start, at("2025-01-29T09:00:00Z"));
        assert_eq!(windows[0].end, at("2025-01-29T10:00:00Z"));
        assert_eq!(windows[0].messages.len(), 2);
        assert_eq!(windows[1].start, at("2025-01-29T11:00:00Z"));
        assert_eq!(windows[1].messages.len(), 1);
        assert_eq!(windows[0].id.as_str(), "2025-01-29T09:00:00Z");
    }

    #[test]
    fn boundary_message_opens_next_window() {
        let messages = vec![
            msg(0, "2025-01-29T09:59:59Z", None),
            msg(1, "2025-01-29T10:00:00Z", None),
        ];
        let windows = cluster(&messages, TimeDelta::minutes(60), false).expect("cluster");
        assert_eq!(windows.len(), 2);
        assert_eq!(windows[1].start, at("2025-01-29T10:00:00Z"));
        assert_eq!(windows[1].messages[0].seq, 1);
    }

    #[test]
    fn empty_input_yields_no_windows() {
        let windows = cluster(&[], TimeDelta::minutes(60), false).expect("cluster");
        assert!(windows.is_empty());
    }

    #[test]
    fn zero_width_is_rejected() {
        assert!(cluster(&[], TimeDelta::zero(), false).is_err());
    }

    #[test]
    fn window_end_past_the_calendar_is_an_error() {
        let messages = vec![msg(0, "2025-01-29T09:10:00Z", None)];
        let err = cluster(&messages, TimeDelta::MAX, false).expect_err("overflow");
        assert!(err.to_string().contains("overflows"));
    }

    #[test]
    fn windows_are_disjoint_and_cover_every_message() {
        let messages = (0..40)
            .map(|i| {
                let ts = at("2025-01-29T08:07:00Z") + TimeDelta::minutes(i * 37);
                Message {
                    seq: i as usize,
                    timestamp: ts,
                    source_id: "a".to_string(),
                    message_type: "SMS".to_string(),
                    text: String::new(),
                    conversation_id: None,
                }
            })
            .collect::<Vec<_>>();
        let width = TimeDelta::minutes(45);
        let windows = cluster(&messages, width, false).expect("cluster");

        let total: usize = windows.iter().map(|w| w.messages.len()).sum();
        assert_eq!(total, messages.len());
        for pair in windows.windows(2) {
            assert!(pair[0].end <= pair[1].start);
        }
        for window in &windows {
            assert_eq!(window.end - window.start, width);
            let offset = window.start - at("2025-01-29T08:00:00Z");
            assert_eq!(offset.num_seconds() % width.num_seconds(), 0);
            for message in &window.messages {
                assert!(window.start <= message.timestamp && message.timestamp < window.end);
            }
        }
    }

    #[test]
    fn grouped_clustering_orders_by_start_then_conversation() {
        let messages = vec![
            msg(0, "2025-01-29T09:10:00Z", Some("b")),
            msg(1, "2025-01-29T09:20:00Z", Some("a")),
            msg(2, "2025-01-29T10:30:00Z", Some("a")),
        ];
        let windows = cluster(&messages, TimeDelta::minutes(60), true).expect("cluster");
        let ids = windows.iter().map(|w| w.id.as_str()).collect::<Vec<_>>();
        assert_eq!(
            ids,
            vec![
                "a@2025-01-29T09:00:00Z",
                "b@2025-01-29T09:00:00Z",
                "a@2025-01-29T10:00:00Z",
            ]
        );
    }
}
