//! Hashed names.
//!
//! Uniform names, keyword names and material parameter names are compared
//! millions of times per frame but only spelled out when an asset is loaded.
//! [`NameId`] replaces the string with its 64-bit xxh3 hash at that point.

use std::fmt;

use xxhash_rust::xxh3::xxh3_64;

/// 64-bit hash of a name.
///
/// Hashing is stable across runs and platforms, so ids can be stored in
/// cache keys and compared against ids computed elsewhere.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct NameId(u64);

impl NameId {
    /// Hashes `name`.
    #[inline]
    #[must_use]
    pub fn new(name: &str) -> Self {
        Self(xxh3_64(name.as_bytes()))
    }

    /// Wraps a previously computed hash.
    #[inline]
    #[must_use]
    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    #[inline]
    #[must_use]
    pub const fn raw(self) -> u64 {
        self.0
    }
}

impl From<&str> for NameId {
    #[inline]
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

impl fmt::Debug for NameId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NameId({:016x})", self.0)
    }
}
