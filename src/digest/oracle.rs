use crate::digest::generation::{GenerationClient, GenerationRequest};
use crate::digest::repair::repair;
use crate::error::OracleError;
use serde_json::{Value, json};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq)]
pub struct OracleVerdict {
    /// Normalized to `[0, 1]`.
    pub score: f64,
    pub reason: String,
}

pub trait QualityOracle: Send + Sync {
    /// Judge `candidate` against `context`, giving up after `timeout`.
    fn score(
        &self,
        context: &str,
        candidate: &str,
        timeout: Duration,
    ) -> Result<OracleVerdict, OracleError>;
}

const JUDGE_MAX_SCORE: f64 = 10.0;

/// Scores candidates with a correctness rubric through any generation client.
pub struct LlmJudgeOracle {
    judge: Box<dyn GenerationClient>,
    schema: Value,
}

impl LlmJudgeOracle {
    pub fn new(judge: Box<dyn GenerationClient>) -> Self {
        Self {
            judge,
            schema: verdict_schema(),
        }
    }
}

pub fn verdict_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "score": {"type": "number"},
            "reason": {"type": "string"}
        },
        "required": ["score", "reason"]
    })
}

fn judge_prompt(context: &str, candidate: &str) -> String {
    format!(
        "You are evaluating a summary of a group of messages.\n\
Criterion: correctness. Determine whether the summary accurately reflects the messages. \
Check that the key points are captured, that no important detail is omitted and that no \
incorrect information is introduced.\n\
Respond with a JSON object {{\"score\": <number from 0 to 10>, \"reason\": <short explanation>}}.\n\n\
Messages:\n{context}\n\nSummary:\n{candidate}"
    )
}

fn parse_score(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
}

/// Turn a judge reply into a verdict, normalizing `0..=10` to `0..=1`.
pub fn parse_verdict(raw: &str) -> Result<OracleVerdict, OracleError> {
    let reply = repair(raw);
    let object = reply
        .as_object()
        .ok_or_else(|| OracleError::MalformedVerdict("judge reply is not a JSON object".to_string()))?;
    let score = object
        .get("score")
        .and_then(parse_score)
        .ok_or_else(|| OracleError::MalformedVerdict("judge reply has no numeric score".to_string()))?;
    if !score.is_finite() || !(0.0..=JUDGE_MAX_SCORE).contains(&score) {
        return Err(OracleError::MalformedVerdict(format!(
            "judge score {score} outside 0..={JUDGE_MAX_SCORE}"
        )));
    }
    let reason = object
        .get("reason")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .trim()
        .to_string();
    Ok(OracleVerdict {
        score: score / JUDGE_MAX_SCORE,
        reason,
    })
}

impl QualityOracle for LlmJudgeOracle {
    fn score(
        &self,
        context: &str,
        candidate: &str,
        timeout: Duration,
    ) -> Result<OracleVerdict, OracleError> {
        let prompt = judge_prompt(context, candidate);
        let raw = self.judge.generate(&GenerationRequest {
            prompt: &prompt,
            schema: &self.schema,
            timeout,
        })?;
        parse_verdict(&raw)
    }
}
