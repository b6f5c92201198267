//! Variant Keys & Keyword Sets
//!
//! A variant key is the sorted set of keyword hashes ("key pieces") a
//! shader instance was compiled with. A material's enabled keywords form a
//! [`KeywordSet`]; resolution picks the first instance whose key is exactly
//! that set.
//!
//! Both types keep their ids sorted in a `SmallVec`, so membership is a
//! binary search and equal sets compare and hash equally regardless of
//! insertion order.

use smallvec::SmallVec;

use crate::utils::NameId;

/// Well-known keyword names.
pub mod keywords {
    pub const SKINNING: &str = "SKINNING";
    pub const LIT: &str = "LIT";
    pub const HALF_LAMBERT: &str = "HALF_LAMBERT";
    pub const INSTANCING: &str = "INSTANCING";

    /// Keywords every shader accepts, declared or not.
    pub const BUILTIN: &[&str] = &[SKINNING];
}

/// Sorted keyword-hash set identifying one compiled variant.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct VariantKey {
    pieces: SmallVec<[NameId; 4]>,
}

impl VariantKey {
    /// Parses a space-separated keyword list. Duplicates collapse.
    #[must_use]
    pub fn parse(key: &str) -> Self {
        let mut pieces: SmallVec<[NameId; 4]> = key.split_whitespace().map(NameId::new).collect();
        pieces.sort_unstable();
        pieces.dedup();
        Self { pieces }
    }

    #[inline]
    #[must_use]
    pub fn pieces(&self) -> &[NameId] {
        &self.pieces
    }

    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.pieces.len()
    }

    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pieces.is_empty()
    }

    /// `true` if this key is exactly the active keyword set.
    #[must_use]
    pub fn matches(&self, active: &KeywordSet) -> bool {
        if self.pieces.len() != active.len() {
            return false;
        }
        self.pieces.iter().all(|piece| active.contains(*piece))
    }
}

/// Enabled keywords of a material.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct KeywordSet {
    ids: SmallVec<[NameId; 8]>,
}

impl KeywordSet {
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `id`. Returns `true` if the set changed.
    pub fn insert(&mut self, id: NameId) -> bool {
        match self.ids.binary_search(&id) {
            Ok(_) => false,
            Err(slot) => {
                self.ids.insert(slot, id);
                true
            }
        }
    }

    /// Removes `id`. Returns `true` if the set changed.
    pub fn remove(&mut self, id: NameId) -> bool {
        match self.ids.binary_search(&id) {
            Ok(slot) => {
                self.ids.remove(slot);
                true
            }
            Err(_) => false,
        }
    }

    #[inline]
    #[must_use]
    pub fn contains(&self, id: NameId) -> bool {
        self.ids.binary_search(&id).is_ok()
    }

    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = NameId> + '_ {
        self.ids.iter().copied()
    }

    /// Order-independent cache key: XOR of every keyword hash, seeded with
    /// the set size.
    #[must_use]
    pub fn cache_key(&self) -> u64 {
        self.ids
            .iter()
            .fold(self.ids.len() as u64, |acc, id| acc ^ id.raw())
    }
}
