use crate::error::DigestErrorCode;
use anyhow::{Context, Result, anyhow};
use chrono::{DateTime, NaiveDateTime, TimeDelta, TimeZone, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fs;
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Position in the input file, used to break timestamp ties.
    pub seq: usize,
    pub timestamp: DateTime<Utc>,
    pub source_id: String,
    pub message_type: String,
    pub text: String,
    pub conversation_id: Option<String>,
}

/// One row of an export, accepting both snake_case keys and the column
/// headers of the spreadsheet exports.
#[derive(Debug, Clone, Deserialize)]
struct MessageRow {
    #[serde(alias = "Date/Time", alias = "datetime")]
    timestamp: String,
    #[serde(default, alias = "sender")]
    source: Option<Value>,
    #[serde(default, rename = "Source Name")]
    source_name: Option<Value>,
    #[serde(default, rename = "From Phone Number")]
    from_phone_number: Option<Value>,
    #[serde(default, alias = "Message Type", alias = "type")]
    message_type: Option<Value>,
    #[serde(default, alias = "Text")]
    text: Option<Value>,
    #[serde(default, alias = "Conversation_ID")]
    conversation_id: Option<Value>,
}

const NAIVE_FORMATS: [&str; 4] = [
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%d %H:%M",
    "%d/%m/%Y %H:%M:%S",
];

fn value_text(value: Option<&Value>) -> Option<String> {
    let text = match value? {
        Value::Null => return None,
        Value::String(s) => s.trim().to_string(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        other => other.to_string(),
    };
    if text.is_empty() { None } else { Some(text) }
}

fn parse_naive(raw: &str) -> Option<NaiveDateTime> {
    let trimmed = raw.trim();
    NAIVE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(trimmed, fmt).ok())
}

/// Normalize an export timestamp to UTC.
///
/// RFC 3339 strings carry their own offset. Naive strings may end with a
/// `BST` (UTC+1) or `GMT`/`UTC`/`Z` label; unlabelled naive strings are read
/// in `source_tz`.
pub fn parse_timestamp(raw: &str, source_tz: Tz) -> Result<DateTime<Utc>> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(anyhow!("timestamp is empty"));
    }
    if let Ok(parsed) = DateTime::parse_from_rfc3339(trimmed) {
        return Ok(parsed.with_timezone(&Utc));
    }

    let labelled = [
        ("BST", TimeDelta::hours(1)),
        ("GMT", TimeDelta::zero()),
        ("UTC", TimeDelta::zero()),
        ("Z", TimeDelta::zero()),
    ];
    for (label, offset) in labelled {
        if let Some(stripped) = trimmed.strip_suffix(label) {
            let naive = parse_naive(stripped)
                .ok_or_else(|| anyhow!("unrecognized timestamp format `{trimmed}`"))?;
            return Ok(Utc.from_utc_datetime(&(naive - offset)));
        }
    }

    let naive =
        parse_naive(trimmed).ok_or_else(|| anyhow!("unrecognized timestamp format `{trimmed}`"))?;
    let local = source_tz
        .from_local_datetime(&naive)
        .earliest()
        .ok_or_else(|| anyhow!("timestamp `{trimmed}` does not exist in {source_tz}"))?;
    Ok(local.with_timezone(&Utc))
}

fn row_to_message(seq: usize, row: MessageRow, source_tz: Tz) -> Result<Message> {
    let timestamp = parse_timestamp(&row.timestamp, source_tz)?;
    let source_id = value_text(row.source.as_ref())
        .or_else(|| value_text(row.source_name.as_ref()))
        .or_else(|| value_text(row.from_phone_number.as_ref()))
        .unwrap_or_default();
    Ok(Message {
        seq,
        timestamp,
        source_id,
        message_type: value_text(row.message_type.as_ref()).unwrap_or_default(),
        text: value_text(row.text.as_ref()).unwrap_or_default(),
        conversation_id: value_text(row.conversation_id.as_ref()),
    })
}

/// Stable sort by timestamp, so equal timestamps keep ingestion order.
pub fn sort_messages(messages: &mut [Message]) {
    messages.sort_by_key(|m| (m.timestamp, m.seq));
}

pub fn parse_messages(raw: &str, source_tz: Tz) -> Result<Vec<Message>> {
    let code = DigestErrorCode::E004InputInvalid.as_str();
    let mut out = Vec::new();

    if raw.trim_start().starts_with('[') {
        let rows: Vec<MessageRow> =
            serde_json::from_str(raw).with_context(|| format!("{code}: invalid JSON array"))?;
        for (idx, row) in rows.into_iter().enumerate() {
            let message = row_to_message(idx, row, source_tz)
                .with_context(|| format!("{code}: invalid message at index {idx}"))?;
            out.push(message);
        }
    } else {
        for (line_idx, line) in raw.lines().enumerate() {
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            let line_no = line_idx + 1;
            let row: MessageRow = serde_json::from_str(trimmed)
                .with_context(|| format!("{code}: invalid JSON on line {line_no}"))?;
            let message = row_to_message(out.len(), row, source_tz)
                .with_context(|| format!("{code}: invalid message on line {line_no}"))?;
            out.push(message);
        }
    }

    sort_messages(&mut out);
    Ok(out)
}

pub fn load_messages(path: &Path, source_tz: Tz) -> Result<Vec<Message>> {
    let raw =
        fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))?;
    parse_messages(&raw, source_tz).with_context(|| format!("failed to load {}", path.display()))
}
