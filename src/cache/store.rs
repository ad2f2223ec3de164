//! Entry store for persisting encoded cache values
//!
//! Provides a file-backed `FileEntryStore` that keeps one file per
//! [`CacheIdentity`], and an in-memory `MemoryEntryStore` for tests. Absence
//! of an entry, or of the whole cache directory, is an ordinary miss.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};
use tracing::debug;

use super::identity::{escape_component, CacheIdentity};
use crate::error::CacheError;

/// File name prefix shared by every entry file
pub const ENTRY_PREFIX: &str = "entry_";

/// File extension shared by every entry file
pub const ENTRY_EXTENSION: &str = ".cache";

/// Maps cache identities to encoded byte blobs
pub trait EntryStore: Send + Sync {
    /// Returns the stored bytes, or `None` on a miss
    fn read(&self, identity: &CacheIdentity) -> Option<Vec<u8>>;

    /// Replaces the entry; readers never observe a partial write
    fn write(&self, identity: &CacheIdentity, bytes: &[u8]) -> Result<(), CacheError>;

    /// Removes one entry; removing a missing entry succeeds
    fn delete(&self, identity: &CacheIdentity) -> Result<(), CacheError>;

    /// Removes every entry whose type tag starts with `type_tag_prefix`
    ///
    /// An empty prefix removes every entry. Returns how many were removed.
    fn delete_all(&self, type_tag_prefix: &str) -> Result<usize, CacheError>;

    /// Every identity currently stored, sorted
    fn identities(&self) -> Vec<CacheIdentity>;
}

/// Distinguishes temp files of concurrent writers within this process
static TEMP_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Writes `bytes` to `path` through a temp sibling and a rename
///
/// Creates the parent directory if needed. The temp file never matches the
/// entry naming convention, so listings and bulk deletes ignore it.
pub(crate) fn write_atomically(path: &Path, bytes: &[u8]) -> Result<(), CacheError> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(dir).map_err(|e| CacheError::io(dir, e))?;

    let file_name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    let temp_path = dir.join(format!(
        ".{}.{}.{}.tmp",
        file_name,
        std::process::id(),
        TEMP_COUNTER.fetch_add(1, Ordering::Relaxed)
    ));

    fs::write(&temp_path, bytes).map_err(|e| CacheError::io(&temp_path, e))?;
    if let Err(e) = fs::rename(&temp_path, path) {
        let _ = fs::remove_file(&temp_path);
        return Err(CacheError::io(path, e));
    }
    Ok(())
}

/// Stores each entry as `entry_<stem>.cache` inside one directory
#[derive(Debug, Clone)]
pub struct FileEntryStore {
    /// Directory where entry files are stored
    cache_dir: PathBuf,
}

impl FileEntryStore {
    /// Creates a store rooted at `cache_dir`; the directory is created lazily
    pub fn with_dir(cache_dir: PathBuf) -> Self {
        Self { cache_dir }
    }

    /// Returns the path of the entry file for an identity
    pub fn entry_path(&self, identity: &CacheIdentity) -> PathBuf {
        self.cache_dir.join(format!(
            "{}{}{}",
            ENTRY_PREFIX,
            identity.storage_stem(),
            ENTRY_EXTENSION
        ))
    }

    /// Removes temp files left behind by writers that died before renaming
    fn sweep_temp_files(&self) {
        let Ok(read_dir) = fs::read_dir(&self.cache_dir) else {
            return;
        };

        let temp_prefix = format!(".{ENTRY_PREFIX}");
        let leftovers = read_dir.filter_map(Result::ok).filter(|dir_entry| {
            let name = dir_entry.file_name();
            let name = name.to_string_lossy();
            name.starts_with(&temp_prefix) && name.ends_with(".tmp")
        });
        for dir_entry in leftovers {
            let path = dir_entry.path();
            if let Err(e) = fs::remove_file(&path) {
                debug!(path = %path.display(), error = %e, "could not remove leftover temp file");
            }
        }
    }

    /// Stems of every file following the entry naming convention
    fn entry_stems(&self) -> Vec<(String, PathBuf)> {
        let Ok(read_dir) = fs::read_dir(&self.cache_dir) else {
            return Vec::new();
        };

        read_dir
            .filter_map(Result::ok)
            .filter_map(|dir_entry| {
                let name = dir_entry.file_name().into_string().ok()?;
                let stem = name
                    .strip_prefix(ENTRY_PREFIX)?
                    .strip_suffix(ENTRY_EXTENSION)?
                    .to_string();
                Some((stem, dir_entry.path()))
            })
            .collect()
    }
}

impl EntryStore for FileEntryStore {
    fn read(&self, identity: &CacheIdentity) -> Option<Vec<u8>> {
        fs::read(self.entry_path(identity)).ok()
    }

    fn write(&self, identity: &CacheIdentity, bytes: &[u8]) -> Result<(), CacheError> {
        write_atomically(&self.entry_path(identity), bytes)
    }

    fn delete(&self, identity: &CacheIdentity) -> Result<(), CacheError> {
        let path = self.entry_path(identity);
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(CacheError::io(path, e)),
        }
    }

    fn delete_all(&self, type_tag_prefix: &str) -> Result<usize, CacheError> {
        let escaped_prefix = escape_component(type_tag_prefix);
        let mut removed = 0;
        for (stem, path) in self.entry_stems() {
            if !stem.starts_with(&escaped_prefix) {
                continue;
            }
            match fs::remove_file(&path) {
                Ok(()) => removed += 1,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(CacheError::io(path, e)),
            }
        }
        if type_tag_prefix.is_empty() {
            self.sweep_temp_files();
        }
        Ok(removed)
    }

    fn identities(&self) -> Vec<CacheIdentity> {
        let mut identities: Vec<_> = self
            .entry_stems()
            .iter()
            .filter_map(|(stem, _)| CacheIdentity::from_storage_stem(stem))
            .collect();
        identities.sort();
        identities
    }
}

/// Entry store held in memory, used by tests
#[derive(Debug, Default)]
pub struct MemoryEntryStore {
    entries: Mutex<HashMap<CacheIdentity, Vec<u8>>>,
}

impl MemoryEntryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<CacheIdentity, Vec<u8>>> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl EntryStore for MemoryEntryStore {
    fn read(&self, identity: &CacheIdentity) -> Option<Vec<u8>> {
        self.entries().get(identity).cloned()
    }

    fn write(&self, identity: &CacheIdentity, bytes: &[u8]) -> Result<(), CacheError> {
        self.entries().insert(identity.clone(), bytes.to_vec());
        Ok(())
    }

    fn delete(&self, identity: &CacheIdentity) -> Result<(), CacheError> {
        self.entries().remove(identity);
        Ok(())
    }

    fn delete_all(&self, type_tag_prefix: &str) -> Result<usize, CacheError> {
        let mut entries = self.entries();
        let before = entries.len();
        entries.retain(|identity, _| !identity.type_tag().starts_with(type_tag_prefix));
        Ok(before - entries.len())
    }

    fn identities(&self) -> Vec<CacheIdentity> {
        let mut identities: Vec<_> = self.entries().keys().cloned().collect();
        identities.sort();
        identities
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn create_test_store() -> (FileEntryStore, TempDir) {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let store = FileEntryStore::with_dir(temp_dir.path().to_path_buf());
        (store, temp_dir)
    }

    fn card(id: &str) -> CacheIdentity {
        CacheIdentity::new("Card", id)
    }

    #[test]
    fn test_write_creates_file_in_cache_directory() {
        let (store, temp_dir) = create_test_store();

        store.write(&card("all"), b"payload").expect("Write should succeed");

        let expected_path = temp_dir.path().join("entry_Card_all.cache");
        assert!(expected_path.exists(), "Entry file should exist");
        assert_eq!(fs::read(&expected_path).unwrap(), b"payload");
    }

    #[test]
    fn test_read_returns_none_for_missing_entry() {
        let (store, _temp_dir) = create_test_store();
        assert!(store.read(&card("missing")).is_none());
    }

    #[test]
    fn test_read_returns_none_when_directory_is_gone() {
        let temp_dir = TempDir::new().unwrap();
        let store = FileEntryStore::with_dir(temp_dir.path().join("never-created"));
        assert!(store.read(&card("all")).is_none());
        assert!(store.identities().is_empty());
        assert_eq!(store.delete_all("").unwrap(), 0);
    }

    #[test]
    fn test_write_creates_directory_if_missing() {
        let temp_dir = TempDir::new().unwrap();
        let nested_path = temp_dir.path().join("nested").join("cache").join("dir");
        let store = FileEntryStore::with_dir(nested_path.clone());

        store.write(&card("all"), b"x").expect("Write should succeed");

        assert!(nested_path.exists(), "Nested directory should be created");
        assert_eq!(store.read(&card("all")).as_deref(), Some(&b"x"[..]));
    }

    #[test]
    fn test_overwrite_leaves_no_temp_files() {
        let (store, temp_dir) = create_test_store();

        store.write(&card("all"), b"first").unwrap();
        store.write(&card("all"), b"second").unwrap();

        assert_eq!(store.read(&card("all")).as_deref(), Some(&b"second"[..]));
        let names: Vec<_> = fs::read_dir(temp_dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().into_string().unwrap())
            .collect();
        assert_eq!(names, vec!["entry_Card_all.cache".to_string()]);
    }

    #[test]
    fn test_delete_removes_entry_and_ignores_missing() {
        let (store, _temp_dir) = create_test_store();
        store.write(&card("all"), b"x").unwrap();

        store.delete(&card("all")).expect("Delete should succeed");
        assert!(store.read(&card("all")).is_none());
        store.delete(&card("all")).expect("Deleting twice should succeed");
    }

    #[test]
    fn test_delete_all_matches_type_tag_prefix() {
        let (store, temp_dir) = create_test_store();
        store.write(&CacheIdentity::new("CardList", "a"), b"1").unwrap();
        store.write(&CacheIdentity::new("CardDetail", "7"), b"2").unwrap();
        store.write(&CacheIdentity::new("Song", "1"), b"3").unwrap();
        fs::write(temp_dir.path().join("unrelated.txt"), b"keep").unwrap();

        assert_eq!(store.delete_all("Card").unwrap(), 2);
        assert_eq!(store.identities(), vec![CacheIdentity::new("Song", "1")]);

        assert_eq!(store.delete_all("").unwrap(), 1);
        assert!(store.identities().is_empty());
        assert!(temp_dir.path().join("unrelated.txt").exists());
    }

    #[test]
    fn test_delete_all_sweeps_leftover_temp_files() {
        let (store, temp_dir) = create_test_store();
        store.write(&card("all"), b"x").unwrap();
        let leftover = temp_dir.path().join(".entry_Card_all.cache.4242.0.tmp");
        fs::write(&leftover, b"half").unwrap();

        assert_eq!(store.delete_all("Card").unwrap(), 1);
        assert!(leftover.exists(), "only a full clear sweeps temp files");

        assert_eq!(store.delete_all("").unwrap(), 0);
        assert!(!leftover.exists());
        assert!(store.identities().is_empty());
    }

    #[test]
    fn test_identities_decode_escaped_names() {
        let (store, _temp_dir) = create_test_store();
        let odd = CacheIdentity::new("Event List", "filter/jp_en");
        store.write(&odd, b"x").unwrap();
        store.write(&card("all"), b"y").unwrap();

        assert_eq!(store.identities(), vec![card("all"), odd]);
    }

    #[test]
    fn test_memory_store_prefix_delete() {
        let store = MemoryEntryStore::new();
        store.write(&CacheIdentity::new("CardList", "a"), b"1").unwrap();
        store.write(&CacheIdentity::new("Song", "1"), b"2").unwrap();

        assert_eq!(store.delete_all("Card").unwrap(), 1);
        assert_eq!(store.identities(), vec![CacheIdentity::new("Song", "1")]);
    }
}
