//! File-backed map from mailbox address to the latest verification code.
//!
//! The whole map lives in one pretty-printed JSON document. Every write takes an
//! exclusive OS file lock on that document, reads it, drops records older than
//! the TTL, sets the new record and rewrites the file in place before the lock
//! is released. Because the lock is advisory and held on the file itself, it
//! serializes writers across threads and across processes alike.
//!
//! Expiry is enforced only when somebody writes. Readers that open the
//! document directly may still see stale records between writes; `lookup`
//! filters them out instead.

use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use chrono::{DateTime, Local, NaiveDateTime, TimeDelta};
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, trace};

use crate::utils::utils::{normalize_address, timestamp};

/// Records older than this are dropped on the next write.
pub const DEFAULT_TTL_SECS: i64 = 600;

/// How long a caller waits for the document lock before giving up.
pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(10);

const LOCK_POLL_INTERVAL: Duration = Duration::from_millis(20);
const LOCK_POLL_JITTER_MS: u64 = 15;

/// One stored code.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    pub code: String,
    #[serde(with = "timestamp")]
    pub received_at: NaiveDateTime,
}

impl Record {
    fn is_expired(&self, now: NaiveDateTime, ttl: TimeDelta) -> bool {
        now - self.received_at > ttl
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    /// The document lock could not be taken within the configured wait.
    #[error("lock on {} not acquired after {waited:?}", .path.display())]
    LockUnavailable { path: PathBuf, waited: Duration },

    #[error("failed to encode record store: {0}")]
    EncodeFailed(#[source] serde_json::Error),

    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: io::Error,
    },
}

impl StoreError {
    fn io(context: impl Into<String>, source: io::Error) -> Self {
        StoreError::Io {
            context: context.into(),
            source,
        }
    }
}

#[derive(Debug, Clone)]
pub struct StoreConfig {
    pub path: PathBuf,
    pub ttl: TimeDelta,
    pub lock_timeout: Duration,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("visa_codes.json"),
            ttl: TimeDelta::seconds(DEFAULT_TTL_SECS),
            lock_timeout: DEFAULT_LOCK_TIMEOUT,
        }
    }
}

#[derive(Clone, Copy)]
enum LockMode {
    Shared,
    Exclusive,
}

#[derive(Clone)]
pub struct CodeStore {
    config: Arc<StoreConfig>,
}

impl CodeStore {
    pub fn new(config: StoreConfig) -> Self {
        Self {
            config: Arc::new(config),
        }
    }

    pub fn path(&self) -> &Path {
        &self.config.path
    }

    pub fn ttl(&self) -> TimeDelta {
        self.config.ttl
    }

    /// Stores `code` for `address` and evicts every expired record.
    ///
    /// Blocks until the document lock is free or the lock timeout elapses.
    /// An unreadable or corrupt document is treated as empty and replaced.
    pub fn upsert(&self, address: &str, code: &str, now: DateTime<Local>) -> Result<(), StoreError> {
        let path = self.path();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .map_err(|e| StoreError::io(format!("creating {}", parent.display()), e))?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .read(true)
            .write(true)
            .open(path)
            .map_err(|e| StoreError::io(format!("opening {}", path.display()), e))?;

        // Dropping `file` on any return below releases the lock.
        self.acquire(&file, LockMode::Exclusive)?;

        let mut records = read_records(&mut file, path)?;
        let before = records.len();
        let now_local = now.naive_local();
        records.retain(|_, record| !record.is_expired(now_local, self.config.ttl));
        if records.len() != before {
            debug!(evicted = before - records.len(), "Evicted expired codes");
        }

        records.insert(
            normalize_address(address),
            Record {
                code: code.to_string(),
                received_at: now_local,
            },
        );

        let encoded = serde_json::to_vec_pretty(&records).map_err(StoreError::EncodeFailed)?;
        file.set_len(0)
            .map_err(|e| StoreError::io(format!("truncating {}", path.display()), e))?;
        file.seek(SeekFrom::Start(0))
            .map_err(|e| StoreError::io(format!("rewinding {}", path.display()), e))?;
        file.write_all(&encoded)
            .map_err(|e| StoreError::io(format!("writing {}", path.display()), e))?;
        file.sync_all()
            .map_err(|e| StoreError::io(format!("syncing {}", path.display()), e))?;

        trace!(live = records.len(), "Record store rewritten");
        Ok(())
    }

    /// Returns the live record for `address`, ignoring expired ones.
    pub fn lookup(&self, address: &str, now: DateTime<Local>) -> Result<Option<Record>, StoreError> {
        let key = normalize_address(address);
        let record = self.snapshot()?.remove(&key);
        Ok(record.filter(|r| !r.is_expired(now.naive_local(), self.config.ttl)))
    }

    /// Reads the whole document under a shared lock without modifying it.
    pub fn snapshot(&self) -> Result<BTreeMap<String, Record>, StoreError> {
        let path = self.path();
        let mut file = match File::open(path) {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(BTreeMap::new()),
            Err(e) => return Err(StoreError::io(format!("opening {}", path.display()), e)),
        };
        self.acquire(&file, LockMode::Shared)?;
        read_records(&mut file, path)
    }

    fn acquire(&self, file: &File, mode: LockMode) -> Result<(), StoreError> {
        let start = Instant::now();
        loop {
            let attempt = match mode {
                LockMode::Shared => FileExt::try_lock_shared(file),
                LockMode::Exclusive => FileExt::try_lock_exclusive(file),
            };
            match attempt {
                Ok(()) => return Ok(()),
                Err(e) if is_contended(&e) => {}
                Err(e) => {
                    return Err(StoreError::io(
                        format!("locking {}", self.path().display()),
                        e,
                    ))
                }
            }

            let waited = start.elapsed();
            if waited >= self.config.lock_timeout {
                return Err(StoreError::LockUnavailable {
                    path: self.path().to_path_buf(),
                    waited,
                });
            }
            let jitter_ms = rand::random::<u64>() % (LOCK_POLL_JITTER_MS + 1);
            thread::sleep(LOCK_POLL_INTERVAL + Duration::from_millis(jitter_ms));
        }
    }
}

fn is_contended(err: &io::Error) -> bool {
    err.kind() == io::ErrorKind::WouldBlock
        || err.raw_os_error() == fs2::lock_contended_error().raw_os_error()
}

/// Decodes the document, skipping anything that is not a well-formed record.
fn read_records(file: &mut File, path: &Path) -> Result<BTreeMap<String, Record>, StoreError> {
    let mut raw = Vec::new();
    file.seek(SeekFrom::Start(0))
        .and_then(|_| file.read_to_end(&mut raw))
        .map_err(|e| StoreError::io(format!("reading {}", path.display()), e))?;

    let entries: serde_json::Map<String, serde_json::Value> = match serde_json::from_slice(&raw) {
        Ok(entries) => entries,
        Err(e) => {
            if !raw.is_empty() {
                debug!(error = %e, path = %path.display(), "Discarding unreadable record store");
            }
            return Ok(BTreeMap::new());
        }
    };

    Ok(entries
        .into_iter()
        .filter_map(|(key, value)| match serde_json::from_value::<Record>(value) {
            Ok(record) => Some((key, record)),
            Err(e) => {
                debug!(key = %key, error = %e, "Dropping malformed record");
                None
            }
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tempfile::{tempdir, TempDir};

    fn test_store() -> (CodeStore, TempDir) {
        let dir = tempdir().unwrap();
        let store = CodeStore::new(StoreConfig {
            path: dir.path().join("codes.json"),
            ..StoreConfig::default()
        });
        (store, dir)
    }

    fn at(h: u32, m: u32, s: u32) -> DateTime<Local> {
        Local.with_ymd_and_hms(2024, 6, 1, h, m, s).earliest().unwrap()
    }

    fn read_document(store: &CodeStore) -> serde_json::Value {
        let raw = fs::read(store.path()).unwrap();
        serde_json::from_slice(&raw).unwrap()
    }

    #[test]
    fn upsert_creates_document() {
        let (store, _dir) = test_store();
        store.upsert("test@domain.com", "123456", at(12, 0, 0)).unwrap();

        let doc = read_document(&store);
        assert_eq!(doc["test@domain.com"]["code"], "123456");
        assert_eq!(doc["test@domain.com"]["received_at"], "2024-06-01 12:00:00");
    }

    #[test]
    fn upsert_overwrites_same_address() {
        let (store, _dir) = test_store();
        store.upsert("a@b.com", "111111", at(12, 0, 0)).unwrap();
        store.upsert("a@b.com", "222222", at(12, 1, 0)).unwrap();

        let all = store.snapshot().unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all["a@b.com"].code, "222222");
    }

    #[test]
    fn keys_are_case_and_whitespace_insensitive() {
        let (store, _dir) = test_store();
        store.upsert("User@Example.com", "111111", at(12, 0, 0)).unwrap();
        store.upsert(" user@example.com ", "222222", at(12, 0, 5)).unwrap();

        let all = store.snapshot().unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all["user@example.com"].code, "222222");
    }

    #[test]
    fn every_write_evicts_expired_records() {
        let (store, _dir) = test_store();
        store.upsert("old@x.com", "111111", at(12, 0, 0)).unwrap();
        store.upsert("fresh@x.com", "222222", at(12, 9, 0)).unwrap();
        store.upsert("new@x.com", "333333", at(12, 10, 1)).unwrap();

        let all = store.snapshot().unwrap();
        assert!(!all.contains_key("old@x.com"));
        assert!(all.contains_key("fresh@x.com"));
        assert!(all.contains_key("new@x.com"));
    }

    #[test]
    fn record_exactly_at_ttl_is_kept() {
        let (store, _dir) = test_store();
        store.upsert("edge@x.com", "111111", at(12, 0, 0)).unwrap();
        store.upsert("other@x.com", "222222", at(12, 10, 0)).unwrap();

        assert!(store.snapshot().unwrap().contains_key("edge@x.com"));
    }

    #[test]
    fn corrupt_document_is_replaced() {
        let (store, _dir) = test_store();
        fs::write(store.path(), b"{not json at all").unwrap();

        store.upsert("a@b.com", "123456", at(12, 0, 0)).unwrap();

        let doc = read_document(&store);
        assert_eq!(doc.as_object().unwrap().len(), 1);
        assert_eq!(doc["a@b.com"]["code"], "123456");
    }

    #[test]
    fn malformed_entries_are_dropped_and_others_kept() {
        let (store, _dir) = test_store();
        let seeded = serde_json::json!({
            "good@x.com": {"code": "111111", "received_at": "2024-06-01 11:59:00"},
            "nodate@x.com": {"code": "222222"},
            "baddate@x.com": {"code": "333333", "received_at": "last tuesday"},
            "scalar@x.com": "444444"
        });
        fs::write(store.path(), serde_json::to_vec(&seeded).unwrap()).unwrap();

        store.upsert("new@x.com", "555555", at(12, 0, 0)).unwrap();

        let all = store.snapshot().unwrap();
        let keys: Vec<_> = all.keys().cloned().collect();
        assert_eq!(keys, vec!["good@x.com", "new@x.com"]);
    }

    #[test]
    fn concurrent_writers_never_lose_updates() {
        let (store, _dir) = test_store();
        let now = at(12, 0, 0);

        let handles: Vec<_> = (0..16)
            .map(|i| {
                let store = store.clone();
                thread::spawn(move || {
                    store
                        .upsert(&format!("user{i}@example.com"), &format!("{:06}", i), now)
                        .unwrap();
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let all = store.snapshot().unwrap();
        assert_eq!(all.len(), 16);
        for i in 0..16 {
            assert_eq!(all[&format!("user{i}@example.com")].code, format!("{:06}", i));
        }
    }

    #[test]
    fn held_lock_surfaces_lock_unavailable() {
        let dir = tempdir().unwrap();
        let store = CodeStore::new(StoreConfig {
            path: dir.path().join("codes.json"),
            lock_timeout: Duration::from_millis(100),
            ..StoreConfig::default()
        });
        let holder = OpenOptions::new()
            .create(true)
            .truncate(false)
            .read(true)
            .write(true)
            .open(store.path())
            .unwrap();
        FileExt::lock_exclusive(&holder).unwrap();

        let err = store.upsert("a@b.com", "123456", at(12, 0, 0)).unwrap_err();
        assert!(matches!(err, StoreError::LockUnavailable { .. }), "{err:?}");

        drop(holder);
        store.upsert("a@b.com", "123456", at(12, 0, 0)).unwrap();
    }

    #[test]
    fn upsert_creates_missing_parent_directories() {
        let dir = tempdir().unwrap();
        let store = CodeStore::new(StoreConfig {
            path: dir.path().join("nested").join("deeper").join("codes.json"),
            ..StoreConfig::default()
        });
        store.upsert("a@b.com", "123456", at(12, 0, 0)).unwrap();
        assert!(store.path().exists());
    }

    #[test]
    fn lookup_returns_live_record() {
        let (store, _dir) = test_store();
        store.upsert("a@b.com", "123456", at(12, 0, 0)).unwrap();

        let record = store.lookup("  A@B.COM", at(12, 5, 0)).unwrap().unwrap();
        assert_eq!(record.code, "123456");
    }

    #[test]
    fn lookup_hides_expired_record_without_removing_it() {
        let (store, _dir) = test_store();
        store.upsert("a@b.com", "123456", at(12, 0, 0)).unwrap();

        assert_eq!(store.lookup("a@b.com", at(12, 11, 0)).unwrap(), None);
        assert!(store.snapshot().unwrap().contains_key("a@b.com"));
    }

    #[test]
    fn lookup_on_missing_document_is_none() {
        let (store, _dir) = test_store();
        assert_eq!(store.lookup("a@b.com", at(12, 0, 0)).unwrap(), None);
        assert!(!store.path().exists());
    }
}
