//! Disk-backed cache with request elision and cancellable delivery
//!
//! A request returns a [`DeliveryHandle`] at once. In the background the
//! engine delivers whatever is cached, optionally skips the refresh when the
//! last one is recent, calls the caller's fetch operation, and persists a
//! fresh value. A failed refresh never erases a good cached value, and every
//! storage failure degrades to a cache miss.

mod clock;
mod elision;
mod engine;
mod identity;
mod metadata;
mod precache;
mod promise;
pub mod serializer;
mod store;

pub use clock::{Clock, ManualClock, SystemClock};
pub use elision::{should_elide_refresh, CacheTrait, ELISION_WINDOW};
pub use engine::CacheEngine;
pub use identity::CacheIdentity;
pub use metadata::{FileMetadataStore, MemoryMetadataStore, MetadataStore, METADATA_FILE_NAME};
pub use precache::{BundledPreCache, PreCache};
pub use promise::{DeliveryHandle, RequestOutcome};
pub use serializer::{Cacheable, Rgb};
pub use store::{EntryStore, FileEntryStore, MemoryEntryStore, ENTRY_EXTENSION, ENTRY_PREFIX};
pub use tokio_util::sync::CancellationToken;
