use crate::digest::config::RetryConfig;
use crate::digest::generation::{GenerationClient, GenerationRequest, summary_schema};
use crate::digest::oracle::{OracleVerdict, QualityOracle};
use crate::digest::prompt::{build_prompt, render_transcript, with_refinement};
use crate::digest::repair::repair;
use crate::digest::store::{AppendOutcome, RecordStatus, SummaryRecord, SummaryStore};
use crate::digest::util::sha256_hex;
use crate::digest::window::{Window, WindowId};
use crate::error::WindowFailure;
use anyhow::Result;
use chrono::Utc;
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WindowState {
    Pending,
    Generating,
    Scoring,
    Refining,
    Accepted,
    Failed,
}

impl WindowState {
    pub fn can_transition_to(self, next: WindowState) -> bool {
        use WindowState::*;
        if self.is_terminal() {
            return false;
        }
        matches!(
            (self, next),
            (Pending, Generating)
                | (Generating, Scoring)
                | (Generating, Failed)
                | (Scoring, Accepted)
                | (Scoring, Refining)
                | (Scoring, Failed)
                | (Refining, Generating)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, WindowState::Accepted | WindowState::Failed)
    }
}

/// One generate-and-score round. Only ever written to the audit log.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationAttempt {
    pub window_id: WindowId,
    pub attempt_number: u32,
    pub prompt_text: String,
    pub raw_response: String,
    pub parsed_summary: Option<String>,
    pub score: Option<f64>,
    pub rejection_reason: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    pub threshold: f64,
    pub max_attempts: u32,
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(cfg: &RetryConfig) -> Self {
        Self {
            threshold: cfg.threshold,
            max_attempts: cfg.max_attempts.max(1),
        }
    }
}

impl RetryPolicy {
    pub fn accepts(&self, score: f64) -> bool {
        score >= self.threshold
    }
}

#[derive(Debug, Clone)]
pub struct WindowOutcome {
    pub record: SummaryRecord,
    pub attempts: Vec<GenerationAttempt>,
    pub states: Vec<WindowState>,
}

/// Cooperative stop flag, checked between windows.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    pub accepted: usize,
    pub failed: usize,
    pub skipped: usize,
    pub pending: usize,
}

struct StateTrack<'a> {
    window_id: &'a WindowId,
    states: Vec<WindowState>,
}

impl<'a> StateTrack<'a> {
    fn new(window_id: &'a WindowId) -> Self {
        Self {
            window_id,
            states: vec![WindowState::Pending],
        }
    }

    fn current(&self) -> WindowState {
        self.states
            .last()
            .copied()
            .unwrap_or(WindowState::Pending)
    }

    fn advance(&mut self, next: WindowState) {
        let from = self.current();
        debug_assert!(
            from.can_transition_to(next),
            "illegal window transition {from:?} -> {next:?}"
        );
        tracing::debug!(
            window_id = %self.window_id,
            from = ?from,
            to = ?next,
            "window state transition"
        );
        self.states.push(next);
    }
}

pub struct Orchestrator {
    generator: Box<dyn GenerationClient>,
    oracle: Box<dyn QualityOracle>,
    policy: RetryPolicy,
    generation_timeout: Duration,
    oracle_timeout: Duration,
    summary_field: String,
    schema: Value,
}

impl Orchestrator {
    pub fn new(
        generator: Box<dyn GenerationClient>,
        oracle: Box<dyn QualityOracle>,
        policy: RetryPolicy,
        generation_timeout: Duration,
        oracle_timeout: Duration,
        summary_field: &str,
    ) -> Self {
        Self {
            generator,
            oracle,
            policy,
            generation_timeout,
            oracle_timeout,
            summary_field: summary_field.to_string(),
            schema: summary_schema(summary_field),
        }
    }

    /// Drive one window to a terminal record.
    pub fn summarize_window(&self, window: &Window) -> WindowOutcome {
        let base_prompt = build_prompt(window, &self.summary_field);
        let context = render_transcript(window);
        let content_hash = sha256_hex(&context);
        let mut track = StateTrack::new(&window.id);
        let mut attempts = Vec::new();
        let mut prompt = base_prompt.clone();
        let mut last_score = 0.0;

        for attempt_number in 1..=self.policy.max_attempts {
            track.advance(WindowState::Generating);
            let request = GenerationRequest {
                prompt: &prompt,
                schema: &self.schema,
                timeout: self.generation_timeout,
            };
            let raw = match self.generator.generate(&request) {
                Ok(raw) => raw,
                Err(err) => {
                    let failure = WindowFailure::Transport(err);
                    attempts.push(GenerationAttempt {
                        window_id: window.id.clone(),
                        attempt_number,
                        prompt_text: prompt.clone(),
                        raw_response: String::new(),
                        parsed_summary: None,
                        score: None,
                        rejection_reason: Some(failure.to_string()),
                    });
                    track.advance(WindowState::Failed);
                    return self.failed(window, content_hash, failure, attempts, track);
                }
            };

            let candidate = repair(&raw).summary_text(&self.summary_field);
            track.advance(WindowState::Scoring);
            let verdict = if candidate.is_empty() {
                OracleVerdict {
                    score: 0.0,
                    reason: "empty summary".to_string(),
                }
            } else {
                match self.oracle.score(&context, &candidate, self.oracle_timeout) {
                    Ok(verdict) => verdict,
                    Err(err) => {
                        let failure = WindowFailure::Oracle(err);
                        attempts.push(GenerationAttempt {
                            window_id: window.id.clone(),
                            attempt_number,
                            prompt_text: prompt.clone(),
                            raw_response: raw,
                            parsed_summary: Some(candidate),
                            score: None,
                            rejection_reason: Some(failure.to_string()),
                        });
                        track.advance(WindowState::Failed);
                        return self.failed(window, content_hash, failure, attempts, track);
                    }
                }
            };

            let accepted = self.policy.accepts(verdict.score);
            attempts.push(GenerationAttempt {
                window_id: window.id.clone(),
                attempt_number,
                prompt_text: prompt.clone(),
                raw_response: raw,
                parsed_summary: Some(candidate.clone()),
                score: Some(verdict.score),
                rejection_reason: (!accepted).then(|| verdict.reason.clone()),
            });

            if accepted {
                track.advance(WindowState::Accepted);
                tracing::info!(
                    window_id = %window.id,
                    attempts = attempt_number,
                    score = verdict.score,
                    "window accepted"
                );
                let record = SummaryRecord {
                    window_id: window.id.clone(),
                    conversation_id: window.conversation_id.clone(),
                    start: window.start,
                    end: window.end,
                    status: RecordStatus::Accepted,
                    summary: candidate,
                    score: verdict.score,
                    reason: verdict.reason,
                    attempts: attempt_number,
                    content_hash,
                    recorded_at: Utc::now(),
                };
                return WindowOutcome {
                    record,
                    attempts,
                    states: track.states,
                };
            }

            last_score = verdict.score;
            tracing::debug!(
                window_id = %window.id,
                attempt = attempt_number,
                score = verdict.score,
                threshold = self.policy.threshold,
                "summary below threshold"
            );
            if attempt_number == self.policy.max_attempts {
                break;
            }
            track.advance(WindowState::Refining);
            prompt = with_refinement(
                &base_prompt,
                self.policy.threshold,
                verdict.score,
                &verdict.reason,
            );
        }

        track.advance(WindowState::Failed);
        let failure = WindowFailure::ThresholdNotMet {
            threshold: self.policy.threshold,
            attempts: self.policy.max_attempts,
            last_score,
        };
        self.failed(window, content_hash, failure, attempts, track)
    }

    fn failed(
        &self,
        window: &Window,
        content_hash: String,
        failure: WindowFailure,
        attempts: Vec<GenerationAttempt>,
        track: StateTrack<'_>,
    ) -> WindowOutcome {
        tracing::warn!(window_id = %window.id, reason = %failure, "window failed");
        let record = SummaryRecord {
            window_id: window.id.clone(),
            conversation_id: window.conversation_id.clone(),
            start: window.start,
            end: window.end,
            status: RecordStatus::Failed,
            summary: String::new(),
            score: 0.0,
            reason: failure.to_string(),
            attempts: attempts.len() as u32,
            content_hash,
            recorded_at: Utc::now(),
        };
        WindowOutcome {
            record,
            attempts,
            states: track.states,
        }
    }

    /// Process windows in order, skipping those already stored.
    ///
    /// Stops between windows on cancellation or once `max_windows` have been
    /// processed; the remainder is reported as pending. Store errors and
    /// errors from `on_outcome` abort the run.
    pub fn run<F>(
        &self,
        windows: &[Window],
        store: &dyn SummaryStore,
        cancel: &CancelToken,
        max_windows: Option<usize>,
        mut on_outcome: F,
    ) -> Result<RunSummary>
    where
        F: FnMut(&WindowOutcome) -> Result<()>,
    {
        let mut summary = RunSummary::default();
        let mut processed = 0usize;

        for window in windows {
            if store.has(&window.id)? {
                summary.skipped += 1;
                continue;
            }
            let limit_reached = max_windows.is_some_and(|limit| processed >= limit);
            if cancel.is_cancelled() || limit_reached {
                summary.pending += 1;
                continue;
            }

            let outcome = self.summarize_window(window);
            processed += 1;
            match store.append(&outcome.record)? {
                AppendOutcome::Written => match outcome.record.status {
                    RecordStatus::Accepted => summary.accepted += 1,
                    RecordStatus::Failed => summary.failed += 1,
                },
                AppendOutcome::AlreadyPresent => {
                    tracing::info!(window_id = %window.id, "window recorded by another writer");
                    summary.skipped += 1;
                }
            }
            on_outcome(&outcome)?;
        }
        Ok(summary)
    }
}
