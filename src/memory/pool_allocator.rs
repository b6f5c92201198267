//! Pool Allocator
//!
//! Recycles fixed-length scratch arrays keyed by their exact length, so
//! per-frame working buffers of a recurring size (bone palettes, instance
//! transforms) are allocated once and reused.
//!
//! # Memory Strategy
//!
//! - Arrays are **never** freed while pooled; they remain in their bucket.
//! - A bucket grows on demand when every array of that length is rented.
//! - [`PoolAllocator::release`] only accepts arrays this pool handed out.
//!   Anything else is dropped without touching the pool.
//!
//! Identity is tracked by the array's heap address. Returning the same
//! array twice cannot happen through safe code because `release` takes
//! ownership.
//!
//! # Caller Obligation
//!
//! Every rented array must come back through [`PoolAllocator::release`].
//! An array dropped instead leaves its address recorded as rented, so
//! [`PoolAllocator::rented_count`] overstates live rentals and a later
//! allocation at the same address would be accepted as pooled. Owners that
//! drop rentals call [`PoolAllocator::forget_rentals`] once none are live.

use rustc_hash::{FxHashMap, FxHashSet};

use crate::errors::{Result, RhiError};

struct Bucket<T> {
    /// Arrays ready to be rented.
    free: Vec<Box<[T]>>,
    /// Addresses of arrays currently rented out.
    rented: FxHashSet<usize>,
}

impl<T> Default for Bucket<T> {
    fn default() -> Self {
        Self {
            free: Vec::new(),
            rented: FxHashSet::default(),
        }
    }
}

/// Exact-length array pool.
pub struct PoolAllocator<T> {
    buckets: FxHashMap<usize, Bucket<T>>,
}

impl<T: Default + Clone> PoolAllocator<T> {
    #[must_use]
    pub fn new() -> Self {
        Self {
            buckets: FxHashMap::default(),
        }
    }

    /// Rents an array of exactly `length` elements.
    ///
    /// Reused arrays keep the contents they had when released.
    ///
    /// # Panics
    ///
    /// Panics if `length` is zero.
    #[track_caller]
    pub fn rent(&mut self, length: usize) -> Box<[T]> {
        assert!(length > 0, "PoolAllocator::rent: length must be greater than zero");
        self.rent_unchecked(length)
    }

    /// Fallible form of [`Self::rent`].
    pub fn try_rent(&mut self, length: usize) -> Result<Box<[T]>> {
        if length == 0 {
            return Err(RhiError::InvalidLength(length));
        }
        Ok(self.rent_unchecked(length))
    }

    fn rent_unchecked(&mut self, length: usize) -> Box<[T]> {
        let bucket = self.buckets.entry(length).or_default();
        let array = bucket.free.pop().unwrap_or_else(|| {
            log::debug!("Pool allocator creating array of length {length}");
            vec![T::default(); length].into_boxed_slice()
        });
        if !bucket.rented.insert(array.as_ptr().addr()) {
            log::debug!("Pool allocator: array of length {length} reuses the address of a dropped rental");
        }
        array
    }

    /// Returns a rented array to its bucket.
    ///
    /// Arrays this pool did not rent out (or rented before [`Self::clear`])
    /// are dropped and `false` is returned.
    pub fn release(&mut self, contents: Box<[T]>) -> bool {
        let Some(bucket) = self.buckets.get_mut(&contents.len()) else {
            return false;
        };
        if !bucket.rented.remove(&contents.as_ptr().addr()) {
            return false;
        }
        bucket.free.push(contents);
        true
    }

    /// Arrays of `length` waiting to be rented.
    #[must_use]
    pub fn pooled_count(&self, length: usize) -> usize {
        self.buckets.get(&length).map_or(0, |bucket| bucket.free.len())
    }

    /// Arrays of `length` currently rented out.
    #[must_use]
    pub fn rented_count(&self, length: usize) -> usize {
        self.buckets.get(&length).map_or(0, |bucket| bucket.rented.len())
    }

    /// Stops tracking every outstanding rental. Pooled arrays stay; arrays
    /// still rented become foreign to the pool.
    pub fn forget_rentals(&mut self) {
        for bucket in self.buckets.values_mut() {
            bucket.rented.clear();
        }
    }

    /// Drops every bucket. Outstanding rentals become foreign to the pool.
    pub fn clear(&mut self) {
        self.buckets.clear();
    }
}

impl<T: Default + Clone> Default for PoolAllocator<T> {
    fn default() -> Self {
        Self::new()
    }
}
