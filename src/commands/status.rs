use anyhow::Result;
use std::env;

use crate::commands::CommandReport;
use crate::digest::config;
use crate::digest::paths::resolve_paths;
use crate::digest::store::{JsonlStore, SummaryStore};

/// An environment key read somewhere in `src/`, found at build time.
pub struct EnvKey {
    pub name: &'static str,
    pub secret: bool,
}

include!(concat!(env!("OUT_DIR"), "/digest_env_keys.rs"));

/// Keys referenced by this build that are set in the environment. Secrets
/// only report that they are set.
pub fn env_overrides() -> Vec<String> {
    GENERATED_ENV_KEYS
        .iter()
        .filter_map(|key| {
            let value = env::var(key.name).ok()?;
            let value = value.trim();
            if value.is_empty() {
                return None;
            }
            if key.secret {
                Some(format!("{}=<set>", key.name))
            } else {
                Some(format!("{}={value}", key.name))
            }
        })
        .collect()
}

pub fn run() -> Result<CommandReport> {
    let paths = resolve_paths()?;
    let mut report = CommandReport::new("status");

    report.detail(format!("build_uuid={}", env!("BUILD_UUID")));
    report.detail(format!("digest_home={}", paths.digest_home.display()));
    report.detail(format!("config_file={}", paths.config_file.display()));
    report.detail(format!("store_file={}", paths.store_file.display()));
    report.detail(format!("audit_log={}", paths.audit_log().display()));

    match config::load_config(&paths) {
        Ok(cfg) => {
            report.detail(format!("window.width_minutes={}", cfg.window.width_minutes));
            report.detail(format!("window.source_timezone={}", cfg.window.source_timezone));
            report.detail(format!(
                "generation={} {} @ {}",
                cfg.generation.provider, cfg.generation.model, cfg.generation.endpoint
            ));
            report.detail(format!(
                "oracle={} {} @ {}",
                cfg.oracle.provider, cfg.oracle.model, cfg.oracle.endpoint
            ));
            report.detail(format!("retry.threshold={}", cfg.retry.threshold));
            report.detail(format!("retry.max_attempts={}", cfg.retry.max_attempts));
            if cfg.oracle.provider == config::PROVIDER_OPENAI_COMPATIBLE
                && cfg.oracle.api_key.is_none()
            {
                report.detail("oracle api key not set; hosted judges will reject requests");
            }
        }
        Err(err) => report.issue(format!("config invalid: {err:#}")),
    }

    let store = JsonlStore::new(&paths.store_file);
    match store.load_all() {
        Ok(records) => {
            let accepted = records.iter().filter(|r| r.is_accepted()).count();
            report.detail(format!("records={}", records.len()));
            report.detail(format!("records.accepted={accepted}"));
            report.detail(format!("records.failed={}", records.len() - accepted));
        }
        Err(err) => report.issue(format!("store unreadable: {err:#}")),
    }

    for line in env_overrides() {
        report.detail(format!("env {line}"));
    }
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::{EnvKey, GENERATED_ENV_KEYS};

    fn key(name: &str) -> Option<&'static EnvKey> {
        GENERATED_ENV_KEYS.iter().find(|key| key.name == name)
    }

    #[test]
    fn table_covers_config_keys() {
        for name in ["DIGEST_HOME", "DIGEST_THRESHOLD", "DIGEST_ORACLE_ENDPOINT"] {
            let found = key(name).unwrap_or_else(|| panic!("missing {name}"));
            assert!(!found.secret, "{name} is not a secret");
        }
    }

    #[test]
    fn api_keys_and_their_fallbacks_are_secret() {
        for name in ["DIGEST_ORACLE_API_KEY", "OPENAI_API_KEY", "AI_API_KEY"] {
            assert!(key(name).is_some_and(|k| k.secret), "{name} should be masked");
        }
        assert!(key("DIGEST_ORACLE_MODEL").is_some_and(|k| !k.secret));
        assert!(GENERATED_ENV_KEYS.windows(2).all(|w| w[0].name < w[1].name));
    }
}
