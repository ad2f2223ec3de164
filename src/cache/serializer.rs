//! Conversion between cacheable values and on-disk bytes
//!
//! Values are stored with bincode inside a small envelope that records when
//! they were encoded, so a bare scalar and a composite value take the same
//! path. The format keeps floats bit-exact, tags every optional layer and
//! accepts maps keyed by any cacheable type. Decoding never fails loudly:
//! corrupt or mismatched bytes come back as `None` and are treated as a cache
//! miss.

use bincode::Options;
use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Deserialize, Serialize};

use crate::error::CacheError;

/// Any value the cache can persist
///
/// Implemented for every serde type, which covers scalars, strings, dates,
/// [`Rgb`] colours and, recursively, options, sequences, sets and maps. Types
/// whose `Deserialize` needs a self-describing format (untagged enums,
/// `#[serde(flatten)]`, `serde_json::Value`) encode but never decode.
pub trait Cacheable: Serialize + DeserializeOwned + Send + Sync + 'static {}

impl<T> Cacheable for T where T: Serialize + DeserializeOwned + Send + Sync + 'static {}

/// A colour stored as its resolved RGB channels (0.0 - 1.0)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Rgb {
    pub red: f64,
    pub green: f64,
    pub blue: f64,
}

impl Rgb {
    pub fn new(red: f64, green: f64, blue: f64) -> Self {
        Self { red, green, blue }
    }
}

/// Envelope written to disk; `cached_at` comes first so it can be read alone
#[derive(Serialize)]
struct EnvelopeRef<'a, T> {
    cached_at: DateTime<Utc>,
    value: &'a T,
}

/// Envelope read back from disk
#[derive(Deserialize)]
struct Envelope<T> {
    cached_at: DateTime<Utc>,
    value: T,
}

/// The leading field of an envelope
#[derive(Deserialize)]
struct EnvelopeHeader {
    cached_at: DateTime<Utc>,
}

/// A decoded value together with the time it was encoded
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedEntry<T> {
    pub value: T,
    pub cached_at: DateTime<Utc>,
}

/// Varint integers, and a decode must consume every byte
fn entry_format() -> impl Options {
    bincode::options()
}

/// Encodes a value, stamping the envelope with the current time
pub fn encode<T: Cacheable>(value: &T) -> Result<Vec<u8>, CacheError> {
    encode_at(value, Utc::now())
}

/// Encodes a value with an explicit `cached_at` stamp
///
/// Fails only for a `Serialize` impl that reports its own error or a
/// sequence of unknown length.
pub fn encode_at<T: Cacheable>(value: &T, cached_at: DateTime<Utc>) -> Result<Vec<u8>, CacheError> {
    let envelope = EnvelopeRef { cached_at, value };
    Ok(entry_format().serialize(&envelope)?)
}

/// Decodes bytes produced by [`encode`]; `None` on any malformed input
pub fn decode<T: Cacheable>(bytes: &[u8]) -> Option<T> {
    decode_entry(bytes).map(|entry| entry.value)
}

/// Like [`decode`], but also returns the envelope timestamp
pub fn decode_entry<T: Cacheable>(bytes: &[u8]) -> Option<DecodedEntry<T>> {
    let envelope: Envelope<T> = entry_format().deserialize(bytes).ok()?;
    Some(DecodedEntry {
        value: envelope.value,
        cached_at: envelope.cached_at,
    })
}

/// Reads only the envelope timestamp, whatever the value's type
pub fn peek_cached_at(bytes: &[u8]) -> Option<DateTime<Utc>> {
    let header: EnvelopeHeader = entry_format()
        .allow_trailing_bytes()
        .deserialize(bytes)
        .ok()?;
    Some(header.cached_at)
}
