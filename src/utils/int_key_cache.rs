//! Integer Key Cache
//!
//! A flat, sorted, parallel-array map from 64-bit keys to `u32` indices.
//!
//! # Design
//!
//! ```text
//! keys:    [ 0x12.., 0x5a.., 0x9f.., 0xe0.. ]   (sorted, binary searched)
//! indices: [      3,      0,      2,      1 ]
//! ```
//!
//! Shaders and materials hold a handful to a few dozen named entries. For
//! that size a sorted pair of vectors beats a hash map on both lookup and
//! memory, and iteration order is deterministic.
//!
//! # Performance
//!
//! - Lookup: O(log n)
//! - Insert/remove: O(n) (element shift), done only at load or first use

use crate::utils::name_id::NameId;

/// Sorted key → index lookup.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IntKeyCache {
    keys: Vec<u64>,
    indices: Vec<u32>,
}

impl IntKeyCache {
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self {
            keys: Vec::new(),
            indices: Vec::new(),
        }
    }

    #[inline]
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            keys: Vec::with_capacity(capacity),
            indices: Vec::with_capacity(capacity),
        }
    }

    /// Looks up the index stored for `key`.
    #[inline]
    #[must_use]
    pub fn get(&self, key: u64) -> Option<u32> {
        self.keys
            .binary_search(&key)
            .ok()
            .map(|slot| self.indices[slot])
    }

    /// Looks up the index stored for a hashed name.
    #[inline]
    #[must_use]
    pub fn get_name(&self, name: NameId) -> Option<u32> {
        self.get(name.raw())
    }

    #[inline]
    #[must_use]
    pub fn contains(&self, key: u64) -> bool {
        self.keys.binary_search(&key).is_ok()
    }

    /// Inserts or replaces the index for `key`, returning the previous index.
    pub fn insert(&mut self, key: u64, index: u32) -> Option<u32> {
        match self.keys.binary_search(&key) {
            Ok(slot) => Some(std::mem::replace(&mut self.indices[slot], index)),
            Err(slot) => {
                self.keys.insert(slot, key);
                self.indices.insert(slot, index);
                None
            }
        }
    }

    /// Removes `key`, returning its index.
    pub fn remove(&mut self, key: u64) -> Option<u32> {
        let slot = self.keys.binary_search(&key).ok()?;
        self.keys.remove(slot);
        Some(self.indices.remove(slot))
    }

    pub fn clear(&mut self) {
        self.keys.clear();
        self.indices.clear();
    }

    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Iterates `(key, index)` pairs in ascending key order.
    pub fn iter(&self) -> impl Iterator<Item = (u64, u32)> + '_ {
        self.keys.iter().copied().zip(self.indices.iter().copied())
    }
}
