pub mod cluster;
pub mod graph;
pub mod status;
pub mod summarize;

use crate::digest::config::{self, DigestConfig};
use crate::digest::message::{Message, load_messages};
use crate::digest::paths::{DigestPaths, resolve_paths};
use crate::digest::window::{Window, cluster};
use crate::error::DigestErrorCode;
use anyhow::{Context, Result};
use serde::Serialize;
use serde_json::Value;
use std::path::Path;

#[derive(Debug, Clone, Serialize)]
pub struct CommandReport {
    pub command: String,
    pub ok: bool,
    pub details: Vec<String>,
    pub issues: Vec<String>,
    /// Machine-readable result, printed on stdout when present.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
}

impl CommandReport {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            ok: true,
            details: Vec::new(),
            issues: Vec::new(),
            payload: None,
        }
    }

    pub fn detail(&mut self, text: impl Into<String>) {
        self.details.push(text.into());
    }

    pub fn issue(&mut self, text: impl Into<String>) {
        self.ok = false;
        self.issues.push(text.into());
    }

    pub fn set_payload(&mut self, payload: Value) {
        self.payload = Some(payload);
    }
}

/// Resolved paths and validated config, shared by every subcommand.
pub struct CommandContext {
    pub paths: DigestPaths,
    pub config: DigestConfig,
}

pub fn load_context() -> Result<CommandContext> {
    let paths = resolve_paths()?;
    let config = config::load_config(&paths)
        .with_context(|| DigestErrorCode::E003ConfigInvalid.as_str())?;
    Ok(CommandContext { paths, config })
}

/// Load an export and cluster it with the configured window settings.
pub fn load_windows(cfg: &DigestConfig, input: &Path) -> Result<(Vec<Message>, Vec<Window>)> {
    let tz = cfg.window.timezone()?;
    let messages = load_messages(input, tz)?;
    let windows = cluster(
        &messages,
        cfg.window.width()?,
        cfg.window.group_by_conversation,
    )?;
    Ok((messages, windows))
}
