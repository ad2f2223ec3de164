//! Where the cache lives on disk

use directories::ProjectDirs;
use std::path::PathBuf;

use crate::cache::METADATA_FILE_NAME;
use crate::error::CacheError;

/// Default namespace used by the command-line tool
pub const DEFAULT_NAMESPACE: &str = "stalecache";

/// Location of one process namespace's cache
///
/// Entries and the refresh metadata record share `cache_dir`. The OS may wipe
/// this directory at any time; that is a cold start, not an error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheConfig {
    /// Directory where entry files and the metadata record are stored
    pub cache_dir: PathBuf,
    /// Application name the directory was derived from
    pub namespace: String,
}

impl CacheConfig {
    /// Resolves the XDG-compliant cache directory for `namespace`
    ///
    /// Uses `~/.cache/<namespace>/` on Linux, or the platform equivalent.
    pub fn new(namespace: &str) -> Result<Self, CacheError> {
        let project_dirs = ProjectDirs::from("", "", namespace).ok_or(CacheError::NoCacheDir)?;
        Ok(Self {
            cache_dir: project_dirs.cache_dir().to_path_buf(),
            namespace: namespace.to_string(),
        })
    }

    /// Uses an explicit directory instead of the platform default
    pub fn with_dir(namespace: &str, cache_dir: PathBuf) -> Self {
        Self {
            cache_dir,
            namespace: namespace.to_string(),
        }
    }

    /// Path of the aggregate refresh metadata file
    pub fn metadata_path(&self) -> PathBuf {
        self.cache_dir.join(METADATA_FILE_NAME)
    }
}
