//! The cache orchestrator
//!
//! Each request runs as its own tokio task through a fixed sequence: look up
//! the entry, deliver it if present, decide whether the refresh can be elided,
//! invoke the fetch operation, then reconcile the result with what was cached.
//! Concurrent requests for one identity are not serialized; the last
//! successful reconcile wins the entry store.

use futures::FutureExt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::clock::{Clock, SystemClock};
use super::elision::{should_elide_refresh, CacheTrait};
use super::identity::CacheIdentity;
use super::metadata::{FileMetadataStore, MetadataStore};
use super::precache::PreCache;
use super::promise::{DeliveryHandle, RequestOutcome};
use super::serializer::{self, Cacheable};
use super::store::{EntryStore, FileEntryStore};
use crate::config::CacheConfig;
use crate::error::CacheError;

/// Serves cached values immediately and refreshes them in the background
///
/// Cloning is cheap; clones share the same stores.
#[derive(Clone)]
pub struct CacheEngine {
    entries: Arc<dyn EntryStore>,
    metadata: Arc<dyn MetadataStore>,
    clock: Arc<dyn Clock>,
    precache: Option<Arc<dyn PreCache>>,
}

impl std::fmt::Debug for CacheEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheEngine")
            .field("precache", &self.precache.is_some())
            .finish_non_exhaustive()
    }
}

impl CacheEngine {
    /// Creates an engine over explicit stores, using the system clock
    pub fn new(entries: Arc<dyn EntryStore>, metadata: Arc<dyn MetadataStore>) -> Self {
        Self {
            entries,
            metadata,
            clock: Arc::new(SystemClock),
            precache: None,
        }
    }

    /// Creates a file-backed engine rooted at the configured directory
    pub fn open(config: &CacheConfig) -> Self {
        Self::new(
            Arc::new(FileEntryStore::with_dir(config.cache_dir.clone())),
            Arc::new(FileMetadataStore::with_path(config.metadata_path())),
        )
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Consults `precache` whenever the entry store has no usable value
    pub fn with_precache(mut self, precache: Arc<dyn PreCache>) -> Self {
        self.precache = Some(precache);
        self
    }

    pub fn entries(&self) -> &Arc<dyn EntryStore> {
        &self.entries
    }

    pub fn metadata(&self) -> &Arc<dyn MetadataStore> {
        &self.metadata
    }

    /// Starts a request and returns its delivery handle immediately
    ///
    /// `fetch` is invoked at most once, on a background task, with a token that
    /// is cancelled when the handle is. It returns `None` when no fresh value
    /// could be produced; errors, timeouts and retries are its own business.
    ///
    /// Must be called from within a tokio runtime.
    pub fn request<T, F, Fut>(
        &self,
        identity: CacheIdentity,
        cache_trait: CacheTrait,
        fetch: F,
    ) -> DeliveryHandle<Option<T>>
    where
        T: Cacheable + Clone,
        F: FnOnce(CancellationToken) -> Fut + Send + 'static,
        Fut: Future<Output = Option<T>> + Send + 'static,
    {
        let handle = DeliveryHandle::new();
        let token = CancellationToken::new();
        let hook_token = token.clone();
        handle.set_cancel_hook(move || hook_token.cancel());

        let settler = handle.take_settler();
        let delivery = handle.clone();
        let engine = self.clone();
        tokio::spawn(async move {
            let outcome = engine
                .resolve(&identity, cache_trait, fetch, token, &delivery)
                .await;
            debug!(%identity, ?outcome, "cache request finished");
            if let Some(settler) = settler {
                settler.settle(outcome);
            }
        });

        handle
    }

    async fn resolve<T, F, Fut>(
        &self,
        identity: &CacheIdentity,
        cache_trait: CacheTrait,
        fetch: F,
        token: CancellationToken,
        delivery: &DeliveryHandle<Option<T>>,
    ) -> RequestOutcome
    where
        T: Cacheable + Clone,
        F: FnOnce(CancellationToken) -> Fut + Send + 'static,
        Fut: Future<Output = Option<T>> + Send + 'static,
    {
        let cached: Option<T> = self.lookup(identity);

        if let Some(value) = &cached {
            debug!(%identity, "delivering cached value");
            delivery.deliver(Some(value.clone()));

            let key = identity.metadata_key();
            if should_elide_refresh(self.metadata.as_ref(), &key, cache_trait, self.clock.now()) {
                debug!(%identity, "refresh elided");
                return RequestOutcome::Elided;
            }
        }

        let fresh = match AssertUnwindSafe(async move { fetch(token).await })
            .catch_unwind()
            .await
        {
            Ok(fresh) => fresh,
            Err(_) => {
                warn!(%identity, "fetch operation panicked; treating as no value");
                None
            }
        };

        match (fresh, cached.is_some()) {
            (Some(value), _) => {
                delivery.deliver(Some(value.clone()));
                self.persist(identity, &value, cache_trait);
                RequestOutcome::Refreshed
            }
            (None, true) => {
                debug!(%identity, "fetch returned nothing; keeping cached value");
                RequestOutcome::KeptCached
            }
            (None, false) => {
                debug!(%identity, "fetch returned nothing and no cached value exists");
                delivery.deliver(None);
                RequestOutcome::Unavailable
            }
        }
    }

    /// Reads the entry store, falling back to the pre-cache on a miss
    fn lookup<T: Cacheable>(&self, identity: &CacheIdentity) -> Option<T> {
        if let Some(bytes) = self.entries.read(identity) {
            match serializer::decode(&bytes) {
                Some(value) => return Some(value),
                None => debug!(%identity, "cached entry is unreadable; treating as a miss"),
            }
        }

        let bytes = self.precache.as_ref()?.lookup(identity)?;
        let value = serializer::decode(&bytes);
        if value.is_some() {
            debug!(%identity, "using pre-cached value");
        }
        value
    }

    /// Best-effort write of a fresh value and, for elidable requests, its stamp
    ///
    /// The stamp is only recorded once the entry is on disk; otherwise the next
    /// request would elide against a value that was never stored.
    fn persist<T: Cacheable>(&self, identity: &CacheIdentity, value: &T, cache_trait: CacheTrait) {
        let now = self.clock.now();

        let written = serializer::encode_at(value, now)
            .and_then(|bytes| self.entries.write(identity, &bytes));
        if let Err(e) = written {
            warn!(%identity, error = %e, "failed to persist cache entry");
            return;
        }

        if cache_trait.tracks_refresh() {
            if let Err(e) = self.metadata.stamp(&identity.metadata_key(), now) {
                warn!(%identity, error = %e, "failed to record refresh time");
            }
        }
    }

    /// Removes one entry and its refresh stamp
    pub fn invalidate(&self, type_tag: &str, id: &str) -> Result<(), CacheError> {
        let identity = CacheIdentity::new(type_tag, id);
        self.entries.delete(&identity)?;
        self.metadata.remove(&identity.metadata_key())?;
        debug!(%identity, "invalidated cache entry");
        Ok(())
    }

    /// Removes every entry whose type tag starts with `type_tag_prefix`
    pub fn invalidate_type(&self, type_tag_prefix: &str) -> Result<usize, CacheError> {
        for identity in self.entries.identities() {
            if identity.type_tag().starts_with(type_tag_prefix) {
                self.metadata.remove(&identity.metadata_key())?;
            }
        }
        let removed = self.entries.delete_all(type_tag_prefix)?;
        debug!(type_tag_prefix, removed, "invalidated cache entries by type");
        Ok(removed)
    }

    /// Removes every entry and clears the refresh record
    pub fn invalidate_all(&self) -> Result<usize, CacheError> {
        let removed = self.entries.delete_all("")?;
        self.metadata.clear()?;
        debug!(removed, "invalidated all cache entries");
        Ok(removed)
    }
}
