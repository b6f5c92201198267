//! Resource Handles
//!
//! Typed, generational handles to registry slots. A handle is an
//! `(index, generation)` pair; once its slot is recycled the generation no
//! longer matches and every lookup through the stale handle fails.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::marker::PhantomData;

use slotmap::{Key, KeyData, new_key_type};

new_key_type! {
    /// Untyped registry slot key.
    pub struct ResourceKey;
}

/// Typed handle to a backend-owned resource.
///
/// `T` is a zero-sized marker ([`Buffer`](super::Buffer),
/// [`Texture`](super::Texture)) that keeps buffer and texture handles from
/// being mixed up.
pub struct ResourceHandle<T> {
    key: ResourceKey,
    _marker: PhantomData<fn() -> T>,
}

impl<T> ResourceHandle<T> {
    #[inline]
    pub(crate) fn from_key(key: ResourceKey) -> Self {
        Self {
            key,
            _marker: PhantomData,
        }
    }

    /// A handle that never resolves.
    #[inline]
    #[must_use]
    pub fn null() -> Self {
        Self::from_key(ResourceKey::null())
    }

    #[inline]
    #[must_use]
    pub fn is_null(&self) -> bool {
        self.key.is_null()
    }

    #[inline]
    pub(crate) fn key(self) -> ResourceKey {
        self.key
    }

    /// Slot index.
    #[inline]
    #[must_use]
    pub fn index(&self) -> u32 {
        (self.key.data().as_ffi() & 0xFFFF_FFFF) as u32
    }

    /// Slot generation the handle was issued for.
    #[inline]
    #[must_use]
    pub fn generation(&self) -> u32 {
        (self.key.data().as_ffi() >> 32) as u32
    }

    /// Packs the handle into a `u64` for hashing or FFI.
    #[inline]
    #[must_use]
    pub fn to_bits(&self) -> u64 {
        self.key.data().as_ffi()
    }

    #[inline]
    #[must_use]
    pub fn from_bits(bits: u64) -> Self {
        Self::from_key(ResourceKey::from(KeyData::from_ffi(bits)))
    }
}

impl<T> Clone for ResourceHandle<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for ResourceHandle<T> {}

impl<T> PartialEq for ResourceHandle<T> {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key
    }
}

impl<T> Eq for ResourceHandle<T> {}

impl<T> Hash for ResourceHandle<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.key.hash(state);
    }
}

impl<T> Default for ResourceHandle<T> {
    fn default() -> Self {
        Self::null()
    }
}

impl<T> fmt::Debug for ResourceHandle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = std::any::type_name::<T>().rsplit("::").next().unwrap_or("?");
        write!(f, "{kind}Handle({}v{})", self.index(), self.generation())
    }
}
