//! Deciding whether a refresh can be skipped

use chrono::{DateTime, Duration, Utc};

use super::metadata::MetadataStore;

/// How long after a successful refresh an elidable request skips the fetch
pub const ELISION_WINDOW: Duration = Duration::hours(24);

/// Per-request refresh policy; never persisted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CacheTrait {
    /// Always invoke the fetch operation
    #[default]
    RealTime,
    /// Skip the fetch operation if the last refresh is recent enough
    InvocationElidable,
}

impl CacheTrait {
    /// Whether successful refreshes under this trait are stamped in metadata
    pub fn tracks_refresh(self) -> bool {
        self == CacheTrait::InvocationElidable
    }
}

/// Returns `true` when the fetch operation should not be invoked
///
/// Only `InvocationElidable` requests are ever elided, and only once a refresh
/// has been recorded for `key` within [`ELISION_WINDOW`] of `now`. The window
/// is inclusive. A stamp later than `now` counts as fresh.
pub fn should_elide_refresh(
    metadata: &dyn MetadataStore,
    key: &str,
    cache_trait: CacheTrait,
    now: DateTime<Utc>,
) -> bool {
    if cache_trait != CacheTrait::InvocationElidable {
        return false;
    }

    match metadata.last_refresh(key) {
        Some(last) => now - last <= ELISION_WINDOW,
        None => false,
    }
}
