use crate::digest::message::Message;
use crate::digest::window::Window;

const TRANSCRIPT_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";
const REFINEMENT_LEAD: &str = "\n\nThe previous summary was evaluated";

fn speaker_label(message: &Message) -> String {
    let source = message.source_id.trim();
    let kind = message.message_type.trim();
    match (source.is_empty(), kind.is_empty()) {
        (false, false) => format!("{source} ({kind})"),
        (false, true) => source.to_string(),
        (true, false) => format!("({kind})"),
        (true, true) => "unknown".to_string(),
    }
}

fn transcript_line(message: &Message) -> String {
    format!(
        "{} - {}: {}",
        message.timestamp.format(TRANSCRIPT_TIME_FORMAT),
        speaker_label(message),
        message.text.trim()
    )
}

/// One line per message, oldest first. Also the oracle's context.
pub fn render_transcript(window: &Window) -> String {
    window
        .messages
        .iter()
        .map(transcript_line)
        .collect::<Vec<_>>()
        .join("\n")
}

pub fn build_prompt(window: &Window, summary_field: &str) -> String {
    let mut prompt = format!(
        "Analyse the following messages grouped into a time window from {} to {}. \
Summarize the key events or the main theme of the conversation in this window. \
Respond with a JSON object containing a single string field named \"{}\".\n",
        window.start.format(TRANSCRIPT_TIME_FORMAT),
        window.end.format(TRANSCRIPT_TIME_FORMAT),
        summary_field
    );
    if let Some(conversation) = window.conversation_id.as_deref() {
        prompt.push_str(&format!("Conversation ID: {conversation}\n"));
    }
    prompt.push_str("\nMessages:\n");
    prompt.push_str(&render_transcript(window));
    prompt
}

/// Append the corrective block for the next attempt to `base`, the prompt
/// from [`build_prompt`]. Callers always start from `base`, so each attempt
/// carries exactly one block.
pub fn with_refinement(base: &str, threshold: f64, previous_score: f64, reason: &str) -> String {
    let mut block = format!(
        "{REFINEMENT_LEAD} and scored below the acceptance threshold of {threshold:.2}. \
Please refine the summary to better capture the key points of the conversation.\n\
Previous score: {previous_score:.2}"
    );
    let reason = reason.trim();
    if !reason.is_empty() {
        block.push_str(&format!("\nReviewer feedback: {reason}"));
    }
    format!("{base}{block}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::digest::window::WindowId;
    use chrono::{DateTime, TimeDelta, Utc};

    fn at(raw: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(raw)
            .expect("valid rfc3339")
            .with_timezone(&Utc)
    }

    fn sample_window(conversation: Option<&str>) -> Window {
        let start = at("2025-01-29T09:00:00Z");
        let message = |seq: usize, ts: &str, source: &str, kind: &str, text: &str| Message {
            seq,
            timestamp: at(ts),
            source_id: source.to_string(),
            message_type: kind.to_string(),
            text: text.to_string(),
            conversation_id: conversation.map(str::to_string),
        };
        Window {
            id: WindowId::new(conversation, start),
            conversation_id: conversation.map(str::to_string),
            start,
            end: start + TimeDelta::hours(1),
            messages: vec![
                message(0, "2025-01-29T09:10:00Z", "alice", "SMS", "lunch at noon?"),
                message(1, "2025-01-29T09:50:00Z", "", "MMS", " photo "),
                message(2, "2025-01-29T09:55:00Z", "bob", "", "ok"),
            ],
        }
    }

    #[test]
    fn transcript_labels_sender_and_type() {
        let transcript = render_transcript(&sample_window(None));
        assert_eq!(
            transcript,
            "2025-01-29 09:10:00 - alice (SMS): lunch at noon?\n\
2025-01-29 09:50:00 - (MMS): photo\n\
2025-01-29 09:55:00 - bob: ok"
        );
    }

    #[test]
    fn prompt_names_range_field_and_conversation() {
        let prompt = build_prompt(&sample_window(Some("c-9")), "summary");
        assert!(prompt.starts_with(
            "Analyse the following messages grouped into a time window from 2025-01-29 09:00:00 to 2025-01-29 10:00:00."
        ));
        assert!(prompt.contains("field named \"summary\""));
        assert!(prompt.contains("Conversation ID: c-9\n"));
        assert!(prompt.ends_with("bob: ok"));
    }

    #[test]
    fn prompt_is_deterministic() {
        let window = sample_window(None);
        assert_eq!(build_prompt(&window, "summary"), build_prompt(&window, "summary"));
        assert!(!build_prompt(&window, "summary").contains("Conversation ID"));
    }

    #[test]
    fn refinement_block_is_replaced_not_stacked() {
        let base = build_prompt(&sample_window(None), "summary");
        let first = with_refinement(&base, 0.8, 0.6, "misses the photo");
        let second = with_refinement(&base, 0.8, 0.7, "");

        assert!(first.starts_with(&base));
        assert!(first.contains("threshold of 0.80"));
        assert!(first.contains("Previous score: 0.60"));
        assert!(first.contains("Reviewer feedback: misses the photo"));
        assert_eq!(second.matches("The previous summary was evaluated").count(), 1);
        assert!(second.contains("Previous score: 0.70"));
        assert!(!second.contains("Reviewer feedback"));
    }

    #[test]
    fn refinement_keeps_messages_that_quote_the_block() {
        let mut window = sample_window(None);
        window.messages[0].text = "note:\n\nThe previous summary was evaluated by legal".to_string();
        window.messages[2].text = "KEY EVIDENCE LINE".to_string();
        let base = build_prompt(&window, "summary");

        let refined = with_refinement(&base, 0.8, 0.5, "too vague");
        assert!(refined.starts_with(&base));
        assert!(refined.contains("evaluated by legal"));
        assert!(refined.contains("bob: KEY EVIDENCE LINE"));
        assert!(refined.ends_with("Reviewer feedback: too vague"));
    }
}
