//! Refresh bookkeeping for elision
//!
//! The record is small and always read and written as a whole: one JSON object
//! mapping metadata keys to the Unix timestamp of their last refresh.

use chrono::{DateTime, TimeZone, Utc};
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock};

use super::store::write_atomically;
use crate::error::CacheError;

/// File name of the aggregate record inside the cache directory
pub const METADATA_FILE_NAME: &str = "refresh_metadata.json";

type RefreshRecord = BTreeMap<String, i64>;

/// Storage for "last refreshed" timestamps
///
/// Every mutating call is an atomic read-modify-write of the whole record, so
/// concurrent stamps for different keys are never lost.
pub trait MetadataStore: Send + Sync {
    /// When `key` was last refreshed, if ever
    fn last_refresh(&self, key: &str) -> Option<DateTime<Utc>>;

    /// Records a refresh of `key` at `at`
    fn stamp(&self, key: &str, at: DateTime<Utc>) -> Result<(), CacheError>;

    fn remove(&self, key: &str) -> Result<(), CacheError>;

    fn clear(&self) -> Result<(), CacheError>;
}

fn from_unix(seconds: i64) -> Option<DateTime<Utc>> {
    Utc.timestamp_opt(seconds, 0).single()
}

type RecordLock = Arc<Mutex<()>>;

/// One lock per record file, shared by every store in the process
static RECORD_LOCKS: OnceLock<Mutex<HashMap<PathBuf, RecordLock>>> = OnceLock::new();

/// The lock guarding the record at `path`
///
/// Relative paths are resolved against the working directory first, so
/// `./cache/x` and its absolute spelling share a lock. Symlinked aliases do
/// not.
fn record_lock(path: &Path) -> RecordLock {
    let key = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()
            .map(|cwd| cwd.join(path))
            .unwrap_or_else(|_| path.to_path_buf())
    };

    let mut locks = RECORD_LOCKS
        .get_or_init(Default::default)
        .lock()
        .unwrap_or_else(|e| e.into_inner());
    Arc::clone(locks.entry(key).or_default())
}

/// Metadata record persisted as a single JSON file
#[derive(Debug)]
pub struct FileMetadataStore {
    path: PathBuf,
    /// Serializes read-modify-write cycles on the record across all stores
    /// opened on the same path
    lock: RecordLock,
}

impl FileMetadataStore {
    /// Stores the record as [`METADATA_FILE_NAME`] inside `cache_dir`
    pub fn new(cache_dir: impl AsRef<Path>) -> Self {
        Self::with_path(cache_dir.as_ref().join(METADATA_FILE_NAME))
    }

    pub fn with_path(path: PathBuf) -> Self {
        let lock = record_lock(&path);
        Self { path, lock }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn guard(&self) -> MutexGuard<'_, ()> {
        self.lock.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Missing or unreadable records read as empty
    fn load(&self) -> RefreshRecord {
        fs::read(&self.path)
            .ok()
            .and_then(|bytes| serde_json::from_slice(&bytes).ok())
            .unwrap_or_default()
    }

    fn save(&self, record: &RefreshRecord) -> Result<(), CacheError> {
        let json = serde_json::to_vec_pretty(record)?;
        write_atomically(&self.path, &json)
    }

    fn update(&self, mutate: impl FnOnce(&mut RefreshRecord)) -> Result<(), CacheError> {
        let _guard = self.guard();
        let mut record = self.load();
        mutate(&mut record);
        self.save(&record)
    }
}

impl MetadataStore for FileMetadataStore {
    fn last_refresh(&self, key: &str) -> Option<DateTime<Utc>> {
        let _guard = self.guard();
        self.load().get(key).copied().and_then(from_unix)
    }

    fn stamp(&self, key: &str, at: DateTime<Utc>) -> Result<(), CacheError> {
        self.update(|record| {
            record.insert(key.to_string(), at.timestamp());
        })
    }

    fn remove(&self, key: &str) -> Result<(), CacheError> {
        self.update(|record| {
            record.remove(key);
        })
    }

    fn clear(&self) -> Result<(), CacheError> {
        let _guard = self.guard();
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(CacheError::io(&self.path, e)),
        }
    }
}

/// In-process metadata record, used by tests
#[derive(Debug, Default)]
pub struct MemoryMetadataStore {
    record: Mutex<RefreshRecord>,
}

impl MemoryMetadataStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn record(&self) -> MutexGuard<'_, RefreshRecord> {
        self.record.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl MetadataStore for MemoryMetadataStore {
    fn last_refresh(&self, key: &str) -> Option<DateTime<Utc>> {
        self.record().get(key).copied().and_then(from_unix)
    }

    fn stamp(&self, key: &str, at: DateTime<Utc>) -> Result<(), CacheError> {
        self.record().insert(key.to_string(), at.timestamp());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), CacheError> {
        self.record().remove(key);
        Ok(())
    }

    fn clear(&self) -> Result<(), CacheError> {
        self.record().clear();
        Ok(())
    }
}
