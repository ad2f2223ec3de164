//! Cache identities and their filesystem-safe encoding

use std::fmt;

/// Separator between the encoded type tag and the encoded id
const COMPONENT_SEPARATOR: char = '_';

/// Identifies one cached value: the shape of the value plus a caller id
///
/// Two identities are equal iff both components are equal.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheIdentity {
    type_tag: String,
    id: String,
}

impl CacheIdentity {
    /// Creates an identity from a type tag (e.g. "Card") and an id (e.g. "all")
    pub fn new(type_tag: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            type_tag: type_tag.into(),
            id: id.into(),
        }
    }

    pub fn type_tag(&self) -> &str {
        &self.type_tag
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Filesystem-safe name for this identity, without prefix or extension
    ///
    /// Every byte outside `[A-Za-z0-9.-]` is percent-escaped, so the separator
    /// never appears inside a component and distinct identities never collide.
    pub fn storage_stem(&self) -> String {
        let mut stem = escape_component(&self.type_tag);
        stem.push(COMPONENT_SEPARATOR);
        stem.push_str(&escape_component(&self.id));
        stem
    }

    /// Key of this identity in the refresh metadata record
    pub fn metadata_key(&self) -> String {
        self.storage_stem()
    }

    /// Parses a stem produced by [`storage_stem`](Self::storage_stem)
    ///
    /// Returns `None` for anything that is not a well-formed stem.
    pub fn from_storage_stem(stem: &str) -> Option<Self> {
        let (type_tag, id) = stem.split_once(COMPONENT_SEPARATOR)?;
        Some(Self {
            type_tag: unescape_component(type_tag)?,
            id: unescape_component(id)?,
        })
    }
}

impl fmt::Display for CacheIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.type_tag, self.id)
    }
}

/// Escapes one component; also used to build type-tag prefixes for matching
pub(crate) fn escape_component(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for byte in raw.bytes() {
        if byte.is_ascii_alphanumeric() || byte == b'.' || byte == b'-' {
            out.push(byte as char);
        } else {
            out.push_str(&format!("%{:02X}", byte));
        }
    }
    out
}

fn unescape_component(encoded: &str) -> Option<String> {
    let bytes = encoded.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'%' => {
                let hex = encoded.get(i + 1..i + 3)?;
                out.push(u8::from_str_radix(hex, 16).ok()?);
                i += 3;
            }
            b if b.is_ascii_alphanumeric() || b == b'.' || b == b'-' => {
                out.push(b);
                i += 1;
            }
            _ => return None,
        }
    }
    String::from_utf8(out).ok()
}
