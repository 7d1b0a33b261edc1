use crate::digest::window::WindowId;
use crate::error::DigestErrorCode;
use anyhow::{Context, Result, anyhow};
use chrono::{DateTime, Utc};
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::thread;
use std::time::{Duration, Instant};

const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(10);
const LOCK_POLL_INTERVAL: Duration = Duration::from_millis(50);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordStatus {
    Accepted,
    Failed,
}

/// Terminal outcome for one window. Written once, never rewritten.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SummaryRecord {
    pub window_id: WindowId,
    #[serde(default)]
    pub conversation_id: Option<String>,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub status: RecordStatus,
    pub summary: String,
    pub score: f64,
    pub reason: String,
    pub attempts: u32,
    pub content_hash: String,
    pub recorded_at: DateTime<Utc>,
}

impl SummaryRecord {
    pub fn is_accepted(&self) -> bool {
        self.status == RecordStatus::Accepted
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppendOutcome {
    Written,
    AlreadyPresent,
}

pub trait SummaryStore: Send + Sync {
    fn has(&self, window_id: &WindowId) -> Result<bool>;
    /// Append unless a record for the same window exists. Durable on return.
    fn append(&self, record: &SummaryRecord) -> Result<AppendOutcome>;
    /// Records in append order.
    fn load_all(&self) -> Result<Vec<SummaryRecord>>;
}

/// JSON Lines ledger guarded by an exclusive lock on a sidecar `.lock` file.
#[derive(Debug, Clone)]
pub struct JsonlStore {
    path: PathBuf,
    lock_timeout: Duration,
}

struct LedgerScan {
    records: Vec<SummaryRecord>,
    /// Byte length of the complete, newline-terminated prefix.
    intact_len: u64,
    torn_tail: bool,
}

impl JsonlStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock_timeout: DEFAULT_LOCK_TIMEOUT,
        }
    }

    pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = timeout;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn lock_path(&self) -> PathBuf {
        let mut name = self.path.as_os_str().to_os_string();
        name.push(".lock");
        PathBuf::from(name)
    }

    fn acquire_lock(&self) -> Result<fs::File> {
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        let lock_path = self.lock_path();
        let lock = fs::OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&lock_path)
            .with_context(|| format!("failed to open {}", lock_path.display()))?;

        let started = Instant::now();
        loop {
            if lock.try_lock_exclusive().is_ok() {
                return Ok(lock);
            }
            if started.elapsed() >= self.lock_timeout {
                return Err(anyhow!(
                    "{}: store lock {} held for more than {}s",
                    DigestErrorCode::E001StoreLocked.as_str(),
                    lock_path.display(),
                    self.lock_timeout.as_secs()
                ));
            }
            thread::sleep(LOCK_POLL_INTERVAL);
        }
    }

    fn scan(&self) -> Result<LedgerScan> {
        if !self.path.exists() {
            return Ok(LedgerScan {
                records: Vec::new(),
                intact_len: 0,
                torn_tail: false,
            });
        }
        let raw = fs::read_to_string(&self.path)
            .with_context(|| format!("failed to read {}", self.path.display()))?;
        parse_ledger(&raw).with_context(|| format!("failed to load {}", self.path.display()))
    }
}

fn parse_ledger(raw: &str) -> Result<LedgerScan> {
    let mut records = Vec::new();
    let mut intact_len = 0u64;
    let mut torn_tail = false;
    let mut offset = 0usize;

    for (idx, segment) in raw.split_inclusive('\n').enumerate() {
        offset += segment.len();
        let terminated = segment.ends_with('\n');
        let trimmed = segment.trim();
        if trimmed.is_empty() {
            if terminated {
                intact_len = offset as u64;
            }
            continue;
        }
        if !terminated {
            // A crash mid-append leaves an unterminated tail; whatever it
            // holds does not count until rewritten.
            torn_tail = true;
            continue;
        }
        match serde_json::from_str::<SummaryRecord>(trimmed) {
            Ok(record) => {
                records.push(record);
                intact_len = offset as u64;
            }
            Err(err) => {
                return Err(anyhow!(
                    "{}: corrupt record on line {}: {err}",
                    DigestErrorCode::E002StoreCorrupt.as_str(),
                    idx + 1
                ));
            }
        }
    }
    Ok(LedgerScan {
        records,
        intact_len,
        torn_tail,
    })
}

impl SummaryStore for JsonlStore {
    fn has(&self, window_id: &WindowId) -> Result<bool> {
        Ok(self
            .scan()?
            .records
            .iter()
            .any(|record| &record.window_id == window_id))
    }

    fn append(&self, record: &SummaryRecord) -> Result<AppendOutcome> {
        let lock = self.acquire_lock()?;
        let scan = self.scan()?;
        if scan
            .records
            .iter()
            .any(|existing| existing.window_id == record.window_id)
        {
            FileExt::unlock(&lock)?;
            return Ok(AppendOutcome::AlreadyPresent);
        }

        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .with_context(|| format!("failed to open {}", self.path.display()))?;
        if scan.torn_tail {
            file.set_len(scan.intact_len)
                .with_context(|| format!("failed to truncate torn tail of {}", self.path.display()))?;
        }
        let line = format!("{}\n", serde_json::to_string(record)?);
        file.write_all(line.as_bytes())
            .with_context(|| format!("failed to append to {}", self.path.display()))?;
        file.sync_data()
            .with_context(|| format!("failed to sync {}", self.path.display()))?;
        FileExt::unlock(&lock)?;
        Ok(AppendOutcome::Written)
    }

    fn load_all(&self) -> Result<Vec<SummaryRecord>> {
        Ok(self.scan()?.records)
    }
}

/// Process-local store for tests.
#[derive(Debug, Default)]
pub struct MemoryStore {
    records: Mutex<Vec<SummaryRecord>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SummaryStore for MemoryStore {
    fn has(&self, window_id: &WindowId) -> Result<bool> {
        let records = self
            .records
            .lock()
            .map_err(|_| anyhow!("memory store lock poisoned"))?;
        Ok(records.iter().any(|record| &record.window_id == window_id))
    }

    fn append(&self, record: &SummaryRecord) -> Result<AppendOutcome> {
        let mut records = self
            .records
            .lock()
            .map_err(|_| anyhow!("memory store lock poisoned"))?;
        if records
            .iter()
            .any(|existing| existing.window_id == record.window_id)
        {
            return Ok(AppendOutcome::AlreadyPresent);
        }
        records.push(record.clone());
        Ok(AppendOutcome::Written)
    }

    fn load_all(&self) -> Result<Vec<SummaryRecord>> {
        let records = self
            .records
            .lock()
            .map_err(|_| anyhow!("memory store lock poisoned"))?;
        Ok(records.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeDelta;
    use tempfile::tempdir;

    fn record(id: &str) -> SummaryRecord {
        let start = DateTime::parse_from_rfc3339(id)
            .expect("id is a timestamp")
            .with_timezone(&Utc);
        SummaryRecord {
            window_id: WindowId::from(id),
            conversation_id: None,
            start,
            end: start + TimeDelta::hours(1),
            status: RecordStatus::Accepted,
            summary: format!("summary for {id}"),
            score: 0.9,
            reason: "fine".to_string(),
            attempts: 1,
            content_hash: "abc".to_string(),
            recorded_at: start,
        }
    }

    #[test]
    fn jsonl_store_appends_once_per_window() {
        let dir = tempdir().expect("tempdir");
        let store = JsonlStore::new(dir.path().join("nested/summaries.jsonl"));

        let first = record("2025-01-29T09:00:00Z");
        assert_eq!(store.append(&first).expect("append"), AppendOutcome::Written);
        assert_eq!(
            store.append(&first).expect("append"),
            AppendOutcome::AlreadyPresent
        );
        store
            .append(&record("2025-01-29T11:00:00Z"))
            .expect("append");

        let loaded = store.load_all().expect("load");
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded[0], first);
        assert!(store.has(&WindowId::from("2025-01-29T11:00:00Z")).expect("has"));
        assert!(!store.has(&WindowId::from("2025-01-29T10:00:00Z")).expect("has"));
    }

    #[test]
    fn torn_tail_is_ignored_then_truncated_on_append() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("summaries.jsonl");
        let store = JsonlStore::new(&path);
        store
            .append(&record("2025-01-29T09:00:00Z"))
            .expect("append");

        let mut file = fs::OpenOptions::new()
            .append(true)
            .open(&path)
            .expect("open");
        file.write_all(b"{\"window_id\": \"2025-01-29T1")
            .expect("write torn tail");
        drop(file);

        assert_eq!(store.load_all().expect("load").len(), 1);

        store
            .append(&record("2025-01-29T10:00:00Z"))
            .expect("append after crash");
        let raw = fs::read_to_string(&path).expect("read");
        assert_eq!(raw.lines().count(), 2);
        assert!(raw.ends_with('\n'));
        let ids = store
            .load_all()
            .expect("load")
            .into_iter()
            .map(|r| r.window_id.as_str().to_string())
            .collect::<Vec<_>>();
        assert_eq!(ids, vec!["2025-01-29T09:00:00Z", "2025-01-29T10:00:00Z"]);
    }

    #[test]
    fn corrupt_interior_line_is_an_error() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("summaries.jsonl");
        let good = serde_json::to_string(&record("2025-01-29T09:00:00Z")).expect("json");
        fs::write(&path, format!("not json\n{good}\n")).expect("write");

        let err = JsonlStore::new(&path).load_all().expect_err("corrupt");
        let rendered = format!("{err:#}");
        assert!(rendered.contains("E002_STORE_CORRUPT"), "{rendered}");
        assert!(rendered.contains("line 1"), "{rendered}");
    }

    #[test]
    fn held_lock_times_out_with_store_locked_code() {
        let dir = tempdir().expect("tempdir");
        let store = JsonlStore::new(dir.path().join("summaries.jsonl"))
            .with_lock_timeout(Duration::from_millis(100));
        let held = store.acquire_lock().expect("first lock");

        // A second handle on the same lock file contends like another process.
        let err = store
            .append(&record("2025-01-29T09:00:00Z"))
            .expect_err("lock is held");
        assert!(err.to_string().contains("E001_STORE_LOCKED"));
        drop(held);
        assert_eq!(
            store.append(&record("2025-01-29T09:00:00Z")).expect("append"),
            AppendOutcome::Written
        );
    }

    #[test]
    fn memory_store_keeps_append_order_and_uniqueness() {
        let store = MemoryStore::new();
        store.append(&record("2025-01-29T11:00:00Z")).expect("append");
        store.append(&record("2025-01-29T09:00:00Z")).expect("append");
        assert_eq!(
            store.append(&record("2025-01-29T11:00:00Z")).expect("append"),
            AppendOutcome::AlreadyPresent
        );
        let ids = store
            .load_all()
            .expect("load")
            .into_iter()
            .map(|r| r.window_id.as_str().to_string())
            .collect::<Vec<_>>();
        assert_eq!(ids, vec!["2025-01-29T11:00:00Z", "2025-01-29T09:00:00Z"]);
    }
}
