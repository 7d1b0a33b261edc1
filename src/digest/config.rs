use crate::digest::paths::DigestPaths;
use anyhow::{Context, Result, anyhow};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::Path;
use std::time::Duration;

pub const PROVIDER_OLLAMA: &str = "ollama";
pub const PROVIDER_OPENAI_COMPATIBLE: &str = "openai-compatible";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WindowConfig {
    pub width_minutes: u64,
    pub group_by_conversation: bool,
    pub source_timezone: String,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            width_minutes: 60,
            group_by_conversation: false,
            source_timezone: "UTC".to_string(),
        }
    }
}

/// One hundred years of minutes.
pub const MAX_WINDOW_MINUTES: u64 = 525_600 * 100;

impl WindowConfig {
    pub fn width(&self) -> Result<chrono::TimeDelta> {
        i64::try_from(self.width_minutes)
            .ok()
            .and_then(chrono::TimeDelta::try_minutes)
            .ok_or_else(|| anyhow!("window width of {} minutes is out of range", self.width_minutes))
    }

    pub fn timezone(&self) -> Result<Tz> {
        self.source_timezone
            .trim()
            .parse::<Tz>()
            .map_err(|err| anyhow!("invalid source timezone `{}`: {err}", self.source_timezone))
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ModelEndpointConfig {
    pub provider: String,
    pub endpoint: String,
    pub model: String,
    pub num_ctx: u64,
    pub timeout_secs: u64,
    #[serde(skip_serializing)]
    pub api_key: Option<String>,
}

impl ModelEndpointConfig {
    fn generation_default() -> Self {
        Self {
            provider: PROVIDER_OLLAMA.to_string(),
            endpoint: "http://localhost:11434/api/generate".to_string(),
            model: "gemma2:9b".to_string(),
            num_ctx: 4096,
            timeout_secs: 30,
            api_key: None,
        }
    }

    fn oracle_default() -> Self {
        Self {
            provider: PROVIDER_OPENAI_COMPATIBLE.to_string(),
            endpoint: "https://api.openai.com".to_string(),
            model: "gpt-4o".to_string(),
            num_ctx: 8192,
            timeout_secs: 60,
            api_key: None,
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub threshold: f64,
    pub max_attempts: u32,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            threshold: 0.8,
            max_attempts: 5,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct DigestConfig {
    pub window: WindowConfig,
    pub generation: ModelEndpointConfig,
    pub oracle: ModelEndpointConfig,
    pub retry: RetryConfig,
    pub summary_field: String,
}

impl Default for DigestConfig {
    fn default() -> Self {
        Self {
            window: WindowConfig::default(),
            generation: ModelEndpointConfig::generation_default(),
            oracle: ModelEndpointConfig::oracle_default(),
            retry: RetryConfig::default(),
            summary_field: "summary".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
struct PartialDigestConfig {
    window: Option<WindowConfig>,
    generation: Option<PartialEndpointConfig>,
    oracle: Option<PartialEndpointConfig>,
    retry: Option<RetryConfig>,
    summary_field: Option<String>,
}

/// Endpoint sections merge field by field so a file can override just the model.
#[derive(Debug, Clone, Deserialize, Default)]
struct PartialEndpointConfig {
    provider: Option<String>,
    endpoint: Option<String>,
    model: Option<String>,
    num_ctx: Option<u64>,
    timeout_secs: Option<u64>,
}

impl PartialEndpointConfig {
    fn apply(self, base: &mut ModelEndpointConfig) {
        if let Some(provider) = self.provider {
            base.provider = provider;
        }
        if let Some(endpoint) = self.endpoint {
            base.endpoint = endpoint;
        }
        if let Some(model) = self.model {
            base.model = model;
        }
        if let Some(num_ctx) = self.num_ctx {
            base.num_ctx = num_ctx;
        }
        if let Some(timeout_secs) = self.timeout_secs {
            base.timeout_secs = timeout_secs;
        }
    }
}

fn env_or_f64(var: &str, fallback: f64) -> f64 {
    match env::var(var) {
        Ok(v) => v.trim().parse::<f64>().ok().unwrap_or(fallback),
        Err(_) => fallback,
    }
}

fn env_or_u64(var: &str, fallback: u64) -> u64 {
    match env::var(var) {
        Ok(v) => v.trim().parse::<u64>().ok().unwrap_or(fallback),
        Err(_) => fallback,
    }
}

fn env_or_u32(var: &str, fallback: u32) -> u32 {
    match env::var(var) {
        Ok(v) => v.trim().parse::<u32>().ok().unwrap_or(fallback),
        Err(_) => fallback,
    }
}

fn env_or_bool(var: &str, fallback: bool) -> bool {
    match env::var(var) {
        Ok(v) => {
            let trimmed = v.trim();
            match trimmed {
                "1" | "true" | "TRUE" | "yes" | "on" => true,
                "0" | "false" | "FALSE" | "no" | "off" => false,
                _ => fallback,
            }
        }
        Err(_) => fallback,
    }
}

fn env_or_string(var: &str, fallback: &str) -> String {
    match env::var(var) {
        Ok(v) if !v.trim().is_empty() => v.trim().to_string(),
        _ => fallback.to_string(),
    }
}

fn env_first_non_empty(vars: &[&str]) -> Option<String> {
    for var in vars {
        if let Ok(v) = env::var(var) {
            let trimmed = v.trim();
            if !trimmed.is_empty() {
                return Some(trimmed.to_string());
            }
        }
    }
    None
}

fn validate_endpoint(section: &str, cfg: &ModelEndpointConfig) -> Result<()> {
    if cfg.provider != PROVIDER_OLLAMA && cfg.provider != PROVIDER_OPENAI_COMPATIBLE {
        return Err(anyhow!(
            "invalid {section} provider `{}`: use `{PROVIDER_OLLAMA}` or `{PROVIDER_OPENAI_COMPATIBLE}`",
            cfg.provider
        ));
    }
    if cfg.endpoint.trim().is_empty() {
        return Err(anyhow!("invalid {section} endpoint: cannot be empty"));
    }
    if cfg.model.trim().is_empty() {
        return Err(anyhow!("invalid {section} model: cannot be empty"));
    }
    if cfg.timeout_secs == 0 {
        return Err(anyhow!("invalid {section} timeout: must be >= 1 second"));
    }
    Ok(())
}

pub fn validate(cfg: &DigestConfig) -> Result<()> {
    if cfg.window.width_minutes == 0 || cfg.window.width_minutes > MAX_WINDOW_MINUTES {
        return Err(anyhow!(
            "invalid window width: require 1 <= width_minutes <= {MAX_WINDOW_MINUTES}"
        ));
    }
    cfg.window.timezone()?;
    let t = cfg.retry.threshold;
    if !(t > 0.0 && t <= 1.0) {
        return Err(anyhow!("invalid retry threshold: require 0 < threshold <= 1.0"));
    }
    if cfg.retry.max_attempts == 0 {
        return Err(anyhow!("invalid retry max attempts: must be >= 1"));
    }
    if cfg.summary_field.trim().is_empty() {
        return Err(anyhow!("invalid summary field: cannot be empty"));
    }
    validate_endpoint("generation", &cfg.generation)?;
    validate_endpoint("oracle", &cfg.oracle)?;
    Ok(())
}

fn merge_file_config(base: &mut DigestConfig, path: &Path) -> Result<()> {
    if !path.exists() {
        return Ok(());
    }

    let raw =
        fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))?;
    let parsed: PartialDigestConfig = toml::from_str(&raw)
        .map_err(|err| anyhow!("failed to parse digest config {}: {err}", path.display()))?;
    if let Some(window) = parsed.window {
        base.window = window;
    }
    if let Some(generation) = parsed.generation {
        generation.apply(&mut base.generation);
    }
    if let Some(oracle) = parsed.oracle {
        oracle.apply(&mut base.oracle);
    }
    if let Some(retry) = parsed.retry {
        base.retry = retry;
    }
    if let Some(summary_field) = parsed.summary_field {
        base.summary_field = summary_field;
    }
    Ok(())
}

fn apply_endpoint_env(cfg: &mut ModelEndpointConfig, prefix: &str) {
    cfg.provider = env_or_string(&format!("{prefix}_PROVIDER"), &cfg.provider);
    cfg.endpoint = env_or_string(&format!("{prefix}_ENDPOINT"), &cfg.endpoint);
    cfg.model = env_or_string(&format!("{prefix}_MODEL"), &cfg.model);
    cfg.num_ctx = env_or_u64(&format!("{prefix}_NUM_CTX"), cfg.num_ctx);
    cfg.timeout_secs = env_or_u64(&format!("{prefix}_TIMEOUT_SECS"), cfg.timeout_secs);
}

pub fn load_config(paths: &DigestPaths) -> Result<DigestConfig> {
    let mut cfg = DigestConfig::default();
    merge_file_config(&mut cfg, &paths.config_file)?;

    cfg.window.width_minutes = env_or_u64("DIGEST_WINDOW_MINUTES", cfg.window.width_minutes);
    cfg.window.group_by_conversation = env_or_bool(
        "DIGEST_GROUP_BY_CONVERSATION",
        cfg.window.group_by_conversation,
    );
    cfg.window.source_timezone =
        env_or_string("DIGEST_SOURCE_TIMEZONE", &cfg.window.source_timezone);

    // Spelled out so the build-time key table picks every key up:
    // DIGEST_GENERATION_PROVIDER, DIGEST_GENERATION_ENDPOINT, DIGEST_GENERATION_MODEL,
    // DIGEST_GENERATION_NUM_CTX, DIGEST_GENERATION_TIMEOUT_SECS, DIGEST_ORACLE_PROVIDER,
    // DIGEST_ORACLE_ENDPOINT, DIGEST_ORACLE_MODEL, DIGEST_ORACLE_NUM_CTX,
    // DIGEST_ORACLE_TIMEOUT_SECS.
    apply_endpoint_env(&mut cfg.generation, "DIGEST_GENERATION");
    apply_endpoint_env(&mut cfg.oracle, "DIGEST_ORACLE");
    cfg.generation.api_key =
        env_first_non_empty(&["DIGEST_GENERATION_API_KEY", "AI_API_KEY"]);
    cfg.oracle.api_key =
        env_first_non_empty(&["DIGEST_ORACLE_API_KEY", "OPENAI_API_KEY", "AI_API_KEY"]);

    cfg.retry.threshold = env_or_f64("DIGEST_THRESHOLD", cfg.retry.threshold);
    cfg.retry.max_attempts = env_or_u32("DIGEST_MAX_ATTEMPTS", cfg.retry.max_attempts);
    cfg.summary_field = env_or_string("DIGEST_SUMMARY_FIELD", &cfg.summary_field);

    validate(&cfg)?;
    Ok(cfg)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn defaults_pass_validation() {
        let cfg = DigestConfig::default();
        validate(&cfg).expect("defaults should validate");
        assert_eq!(cfg.retry.threshold, 0.8);
        assert_eq!(cfg.window.width_minutes, 60);
    }

    #[test]
    fn validate_rejects_zero_attempts_and_bad_threshold() {
        let mut cfg = DigestConfig::default();
        cfg.retry.max_attempts = 0;
        assert!(validate(&cfg).is_err());

        let mut cfg = DigestConfig::default();
        cfg.retry.threshold = 1.5;
        assert!(validate(&cfg).is_err());
    }

    #[test]
    fn validate_bounds_window_width() {
        let mut cfg = DigestConfig::default();
        cfg.window.width_minutes = MAX_WINDOW_MINUTES;
        validate(&cfg).expect("upper bound is inclusive");
        assert_eq!(
            cfg.window.width().expect("width").num_minutes(),
            MAX_WINDOW_MINUTES as i64
        );

        cfg.window.width_minutes = 10_000_000_000_000;
        assert!(validate(&cfg).is_err());

        cfg.window.width_minutes = 0;
        assert!(validate(&cfg).is_err());
    }

    #[test]
    fn oversized_width_is_an_error_not_a_panic() {
        let cfg = WindowConfig {
            width_minutes: 1 << 62,
            ..WindowConfig::default()
        };
        assert!(cfg.width().is_err());
    }

    #[test]
    fn validate_rejects_unknown_timezone_and_provider() {
        let mut cfg = DigestConfig::default();
        cfg.window.source_timezone = "Mars/Olympus".to_string();
        assert!(validate(&cfg).is_err());

        let mut cfg = DigestConfig::default();
        cfg.oracle.provider = "carrier-pigeon".to_string();
        assert!(validate(&cfg).is_err());
    }

    #[test]
    fn file_config_merges_partial_sections() {
        let tmp = tempdir().expect("tempdir");
        let path = tmp.path().join("digest.toml");
        fs::write(
            &path,
            "summary_field = \"window_summary\"\n\n[window]\nwidth_minutes = 1440\n\n[generation]\nmodel = \"llama3:8b\"\n",
        )
        .expect("write config");

        let mut cfg = DigestConfig::default();
        merge_file_config(&mut cfg, &path).expect("merge");
        assert_eq!(cfg.window.width_minutes, 1440);
        assert_eq!(cfg.window.source_timezone, "UTC");
        assert_eq!(cfg.generation.model, "llama3:8b");
        assert_eq!(cfg.generation.provider, PROVIDER_OLLAMA);
        assert_eq!(cfg.summary_field, "window_summary");
    }
}
