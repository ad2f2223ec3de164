//! Bundled fallback values for cold starts
//!
//! An application can ship encoded values for identities it needs on first
//! launch. They are consulted only when the entry store has nothing, and they
//! are never written back to disk on their own.

use std::collections::HashMap;

use super::identity::CacheIdentity;
use super::serializer::{self, Cacheable};
use crate::error::CacheError;

/// Read-only source of encoded values used when the entry store misses
pub trait PreCache: Send + Sync {
    fn lookup(&self, identity: &CacheIdentity) -> Option<Vec<u8>>;
}

/// A pre-cache held in memory, built at startup
#[derive(Debug, Default, Clone)]
pub struct BundledPreCache {
    entries: HashMap<CacheIdentity, Vec<u8>>,
}

impl BundledPreCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Encodes and adds a value
    pub fn insert<T: Cacheable>(
        &mut self,
        identity: CacheIdentity,
        value: &T,
    ) -> Result<(), CacheError> {
        let bytes = serializer::encode(value)?;
        self.entries.insert(identity, bytes);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl PreCache for BundledPreCache {
    fn lookup(&self, identity: &CacheIdentity) -> Option<Vec<u8>> {
        self.entries.get(identity).cloned()
    }
}
