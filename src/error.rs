//! Error types shared by the cache stores and the serializer

use std::path::PathBuf;
use thiserror::Error;

/// Errors raised inside the cache engine
///
/// These never reach callers of [`crate::cache::CacheEngine::request`]; the
/// orchestrator logs them and degrades to a miss. They are returned from the
/// store traits and the invalidation API so tooling can report them.
#[derive(Debug, Error)]
pub enum CacheError {
    /// Reading or writing a file under the cache directory failed
    #[error("I/O error at {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The value could not be expressed in the entry format
    #[error("Failed to encode cache value: {0}")]
    Encode(#[from] bincode::Error),

    /// The refresh record could not be written as JSON
    #[error("Failed to encode refresh record: {0}")]
    Record(#[from] serde_json::Error),

    /// No home directory to derive a cache directory from
    #[error("Could not determine a cache directory for this platform")]
    NoCacheDir,
}

impl CacheError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}
