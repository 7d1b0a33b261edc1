use anyhow::Result;
use std::env;
use std::path::PathBuf;

#[derive(Debug, Clone)]
pub struct DigestPaths {
    pub digest_home: PathBuf,
    pub store_file: PathBuf,
    pub logs_dir: PathBuf,
    pub config_file: PathBuf,
}

impl DigestPaths {
    pub fn audit_log(&self) -> PathBuf {
        self.logs_dir.join("audit.log")
    }
}

fn required_home_dir() -> Result<PathBuf> {
    if let Some(home) = dirs::home_dir() {
        return Ok(home);
    }
    Err(anyhow::anyhow!("HOME directory could not be resolved"))
}

fn env_or_default_path(var: &str, fallback: PathBuf) -> PathBuf {
    match env::var(var) {
        Ok(v) if !v.trim().is_empty() => PathBuf::from(v.trim()),
        _ => fallback,
    }
}

pub fn default_digest_home() -> Result<PathBuf> {
    Ok(required_home_dir()?.join(".convo-digest"))
}

pub fn resolve_paths() -> Result<DigestPaths> {
    let digest_home = match env::var("DIGEST_HOME") {
        Ok(v) if !v.trim().is_empty() => PathBuf::from(v.trim()),
        _ => default_digest_home()?,
    };

    let store_file = env_or_default_path("DIGEST_STORE_PATH", digest_home.join("summaries.jsonl"));
    let logs_dir = env_or_default_path("DIGEST_LOGS_DIR", digest_home.join("logs"));
    let config_file = env_or_default_path("DIGEST_CONFIG_PATH", digest_home.join("digest.toml"));

    Ok(DigestPaths {
        digest_home,
        store_file,
        logs_dir,
        config_file,
    })
}
