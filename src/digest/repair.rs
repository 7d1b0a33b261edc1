use serde_json::{Map, Value};

/// Legacy output field some prompts still produce.
const LEGACY_SUMMARY_FIELD: &str = "window_summary";

#[derive(Debug, Clone, PartialEq)]
pub enum ModelReply {
    Structured(Map<String, Value>),
    Raw(String),
}

impl ModelReply {
    /// Text to store as the summary: the named field (or the legacy field)
    /// when it is a string, otherwise the compact object, otherwise the raw
    /// text.
    pub fn summary_text(&self, field: &str) -> String {
        match self {
            Self::Structured(object) => {
                let named = object
                    .get(field)
                    .or_else(|| object.get(LEGACY_SUMMARY_FIELD))
                    .and_then(Value::as_str);
                match named {
                    Some(text) => text.trim().to_string(),
                    None => Value::Object(object.clone()).to_string(),
                }
            }
            Self::Raw(text) => text.trim().to_string(),
        }
    }

    pub fn as_object(&self) -> Option<&Map<String, Value>> {
        match self {
            Self::Structured(object) => Some(object),
            Self::Raw(_) => None,
        }
    }
}

fn parse_object(candidate: &str) -> Option<Map<String, Value>> {
    match serde_json::from_str::<Value>(candidate) {
        Ok(Value::Object(object)) => Some(object),
        _ => None,
    }
}

fn first_streamed_object(text: &str) -> Option<Map<String, Value>> {
    for (idx, _) in text.match_indices('{') {
        let mut stream = serde_json::Deserializer::from_str(&text[idx..]).into_iter::<Value>();
        if let Some(Ok(Value::Object(object))) = stream.next() {
            return Some(object);
        }
    }
    None
}

/// Recover a JSON object from a model reply. Never fails; anything that
/// cannot be recovered comes back as `Raw`.
pub fn repair(raw: &str) -> ModelReply {
    let trimmed = raw.trim();
    if let Some(object) = parse_object(trimmed) {
        return ModelReply::Structured(object);
    }

    if let (Some(open), Some(close)) = (trimmed.find('{'), trimmed.rfind('}'))
        && open < close
        && let Some(object) = parse_object(&trimmed[open..=close])
    {
        return ModelReply::Structured(object);
    }

    if let Some(object) = first_streamed_object(trimmed) {
        return ModelReply::Structured(object);
    }

    ModelReply::Raw(raw.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strict_json_is_structured() {
        let reply = repair(" {\"summary\": \"plans for friday\"} \n");
        assert_eq!(reply.summary_text("summary"), "plans for friday");
    }

    #[test]
    fn embedded_object_is_recovered_from_chatter() {
        let reply = repair("Sure! {\"summary\": \"met at 3pm\"} thanks");
        let object = reply.as_object().expect("structured");
        assert_eq!(object.len(), 1);
        assert_eq!(object["summary"], "met at 3pm");
    }

    #[test]
    fn markdown_fence_is_stripped() {
        let reply = repair("```json\n{\"summary\": \"fenced\"}\n```");
        assert_eq!(reply.summary_text("summary"), "fenced");
    }

    #[test]
    fn braces_in_prose_do_not_hide_the_object() {
        // First-to-last brace slice is not valid JSON here.
        let raw = "Using {placeholders} here: {\"summary\": \"real one\"} and {more}";
        let reply = repair(raw);
        assert_eq!(reply.summary_text("summary"), "real one");
    }

    #[test]
    fn unrecoverable_text_passes_through_unchanged() {
        let raw = "  no json at all, just words  ";
        assert_eq!(repair(raw), ModelReply::Raw(raw.to_string()));
        assert_eq!(repair(raw).summary_text("summary"), "no json at all, just words");
    }

    #[test]
    fn legacy_field_and_missing_field_fallbacks() {
        let legacy = repair("{\"window_summary\": \"older shape\"}");
        assert_eq!(legacy.summary_text("summary"), "older shape");

        let other = repair("{\"topic\": \"x\"}");
        assert_eq!(other.summary_text("summary"), "{\"topic\":\"x\"}");
    }

    #[test]
    fn top_level_array_is_not_an_object() {
        let reply = repair("[1, 2, 3]");
        assert!(reply.as_object().is_none());
    }
}
