//! Stalecache library
//!
//! An asynchronous disk-backed cache that hands callers a cached value at
//! once, refreshes it in the background, skips refreshes that were done
//! recently, and lets callers cancel delivery at any time.

pub mod cache;
pub mod cli;
pub mod config;
pub mod error;

pub use cache::{CacheEngine, CacheIdentity, CacheTrait, DeliveryHandle, RequestOutcome};
pub use config::CacheConfig;
pub use error::CacheError;
