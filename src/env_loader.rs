use std::env;
use std::path::PathBuf;

fn fallback_dotenv_paths(digest_home: Option<PathBuf>, home_dir: Option<PathBuf>) -> Vec<PathBuf> {
    let mut out = Vec::new();
    if let Some(digest_home) = digest_home {
        out.push(digest_home.join(".env"));
    }
    if let Some(home) = home_dir {
        let default = home.join(".convo-digest/.env");
        if !out.contains(&default) {
            out.push(default);
        }
    }
    out
}

/// Load the first `.env` found: cwd, then `$DIGEST_HOME/.env`, then
/// `~/.convo-digest/.env`. Variables already set are never overwritten.
pub fn load_dotenv() {
    if dotenvy::dotenv().is_ok() {
        return;
    }

    let fallbacks = fallback_dotenv_paths(
        env::var_os("DIGEST_HOME").map(PathBuf::from),
        dirs::home_dir(),
    );
    for path in fallbacks {
        if path.is_file() {
            let _ = dotenvy::from_path(&path);
            return;
        }
    }
}
