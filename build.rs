use std::collections::BTreeMap;
use std::env;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

const ENV_PREFIX: &str = "DIGEST_";
const SECRET_SUFFIX: &str = "_API_KEY";

fn collect_rs_files(dir: &Path, out: &mut Vec<PathBuf>) -> std::io::Result<()> {
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_dir() {
            collect_rs_files(&path, out)?;
        } else if path.extension().and_then(|ext| ext.to_str()) == Some("rs") {
            out.push(path);
        }
    }
    Ok(())
}

fn is_env_char(c: char) -> bool {
    c.is_ascii_uppercase() || c.is_ascii_digit() || c == '_'
}

/// Maximal runs of `[A-Z0-9_]`, so `MY_DIGEST_X` never yields `DIGEST_X`.
fn env_tokens(source: &str) -> impl Iterator<Item = &str> {
    source
        .split(|c: char| !is_env_char(c))
        .filter(|token| !token.is_empty())
}

/// Every `DIGEST_*` key, plus any bare `*_API_KEY` fallback the config reads.
/// The value is whether `status` must mask it.
fn collect_env_keys(source: &str, out: &mut BTreeMap<String, bool>) {
    for token in env_tokens(source) {
        let secret = token.ends_with(SECRET_SUFFIX) && token.len() > SECRET_SUFFIX.len();
        let ours = token.starts_with(ENV_PREFIX) && token.len() > ENV_PREFIX.len();
        if ours || secret {
            out.insert(token.to_string(), secret);
        }
    }
}

fn write_env_key_table() -> std::io::Result<()> {
    let mut rs_files = Vec::new();
    collect_rs_files(Path::new("src"), &mut rs_files)?;
    rs_files.sort();

    let mut keys = BTreeMap::new();
    for file in rs_files {
        if let Ok(content) = fs::read_to_string(&file) {
            collect_env_keys(&content, &mut keys);
        }
    }

    let out_dir = env::var("OUT_DIR").expect("OUT_DIR is set by cargo");
    let mut f = fs::File::create(Path::new(&out_dir).join("digest_env_keys.rs"))?;
    writeln!(f, "pub const GENERATED_ENV_KEYS: &[EnvKey] = &[")?;
    for (name, secret) in keys {
        writeln!(f, "    EnvKey {{ name: \"{name}\", secret: {secret} }},")?;
    }
    writeln!(f, "];")?;
    Ok(())
}

fn main() {
    write_env_key_table().expect("failed to generate env key table");

    let now = SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_default();
    println!(
        "cargo:rustc-env=BUILD_UUID={:x}-{:x}",
        now.as_secs(),
        now.subsec_nanos()
    );
    println!("cargo:rerun-if-changed=build.rs");
    println!("cargo:rerun-if-changed=src");
}
