//! Freeform Allocator
//!
//! Variable-length arena with free-list reuse, splitting and compaction.
//! Backs dynamically sized vertex, index and bone-matrix data that is
//! uploaded to the GPU from one contiguous buffer.
//!
//! # Design
//!
//! ```text
//!  buffer: [ A A A A | . . . . . . | C C C | . . ]
//!            live      free           live   free
//!
//!  allocate(n):
//!    free list empty      → append n elements at the tail
//!    first free entry ≥ n → carve it, remainder stays free
//!    nothing fits         → compact(n), then carve the tail
//! ```
//!
//! Live entries never overlap, and live plus free entries always cover
//! `[0, len)` exactly.
//!
//! Entries are generational keys ([`ArenaEntry`]). Freeing twice, or freeing
//! an entry whose slot was reused, is detected and ignored.
//!
//! # Address stability
//!
//! Growth and compaction reallocate the buffer. Re-query
//! [`FreeformAllocator::as_ptr`] after every `allocate` or `compact`.

use bytemuck::Pod;
use slotmap::{SlotMap, new_key_type};

new_key_type! {
    /// Handle to a live arena entry.
    pub struct ArenaEntry;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Span {
    start: usize,
    length: usize,
}

/// Free-list arena over elements of type `T`.
pub struct FreeformAllocator<T: Pod> {
    buffer: Vec<T>,
    live: SlotMap<ArenaEntry, Span>,
    free: Vec<Span>,
}

impl<T: Pod> FreeformAllocator<T> {
    #[must_use]
    pub fn new() -> Self {
        Self {
            buffer: Vec::new(),
            live: SlotMap::with_key(),
            free: Vec::new(),
        }
    }

    /// Allocates `length` elements, zero-initialized on first use.
    ///
    /// Reused regions keep whatever bytes were previously written there.
    pub fn allocate(&mut self, length: usize) -> ArenaEntry {
        if self.free.is_empty() {
            let start = self.buffer.len();
            self.buffer.resize(start + length, T::zeroed());
            log::debug!("Freeform allocator appended {length} elements at {start}");
            return self.live.insert(Span { start, length });
        }

        if let Some(entry) = self.carve(length) {
            return entry;
        }

        // compact(length) leaves exactly `length` free elements at the tail
        self.compact(length);
        let start = self.buffer.len() - length;
        self.free.clear();
        self.live.insert(Span { start, length })
    }

    /// First-fit over the free list.
    fn carve(&mut self, length: usize) -> Option<ArenaEntry> {
        let index = self.free.iter().position(|span| span.length >= length)?;
        let span = self.free[index];

        let remainder = span.length - length;
        if remainder > 0 {
            self.free[index] = Span {
                start: span.start + length,
                length: remainder,
            };
        } else {
            self.free.remove(index);
        }

        Some(self.live.insert(Span {
            start: span.start,
            length,
        }))
    }

    /// Releases `entry`. Freeing an already freed entry is a no-op.
    ///
    /// Returns `true` if the entry was live.
    pub fn free(&mut self, entry: ArenaEntry) -> bool {
        match self.live.remove(entry) {
            Some(span) => {
                if span.length > 0 {
                    self.free.push(span);
                }
                true
            }
            None => false,
        }
    }

    /// Rebuilds the buffer with only live regions, packed in ascending start
    /// order, then appends `extra_length` elements of free space.
    pub fn compact(&mut self, extra_length: usize) {
        let live_length: usize = self.live.values().map(|span| span.length).sum();

        let mut order: Vec<(usize, ArenaEntry)> = self
            .live
            .iter()
            .map(|(entry, span)| (span.start, entry))
            .collect();
        order.sort_unstable_by_key(|&(start, _)| start);

        let mut packed = Vec::with_capacity(live_length + extra_length);
        for (_, entry) in order {
            let span = &mut self.live[entry];
            packed.extend_from_slice(&self.buffer[span.start..span.start + span.length]);
            span.start = packed.len() - span.length;
        }

        log::debug!(
            "Freeform allocator compacted: {} -> {} elements (+{} free)",
            self.buffer.len(),
            live_length,
            extra_length
        );

        packed.resize(live_length + extra_length, T::zeroed());
        self.buffer = packed;
        self.free.clear();
        if extra_length > 0 {
            self.free.push(Span {
                start: live_length,
                length: extra_length,
            });
        }
    }

    /// Contents of `entry`, or an empty slice if it was freed or no longer
    /// lies inside the buffer.
    #[must_use]
    pub fn get(&self, entry: ArenaEntry) -> &[T] {
        match self.live.get(entry) {
            Some(span) if span.start + span.length <= self.buffer.len() => {
                &self.buffer[span.start..span.start + span.length]
            }
            _ => &[],
        }
    }

    /// Mutable contents of `entry`, with the same rules as [`Self::get`].
    pub fn get_mut(&mut self, entry: ArenaEntry) -> &mut [T] {
        match self.live.get(entry) {
            Some(span) if span.start + span.length <= self.buffer.len() => {
                let range = span.start..span.start + span.length;
                &mut self.buffer[range]
            }
            _ => &mut [],
        }
    }

    /// Copies `data` into the start of `entry`, truncated to the entry
    /// length. Returns the number of elements written.
    pub fn write(&mut self, entry: ArenaEntry, data: &[T]) -> usize {
        let target = self.get_mut(entry);
        let count = target.len().min(data.len());
        target[..count].copy_from_slice(&data[..count]);
        count
    }

    /// Element range of a live entry.
    #[must_use]
    pub fn range(&self, entry: ArenaEntry) -> Option<std::ops::Range<usize>> {
        self.live
            .get(entry)
            .map(|span| span.start..span.start + span.length)
    }

    #[inline]
    #[must_use]
    pub fn contains(&self, entry: ArenaEntry) -> bool {
        self.live.contains_key(entry)
    }

    /// Whole backing buffer, for bulk upload.
    #[inline]
    #[must_use]
    pub fn as_slice(&self) -> &[T] {
        &self.buffer
    }

    /// Backing buffer viewed as bytes.
    #[inline]
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.buffer)
    }

    /// Base address of the buffer. Invalidated by `allocate` and `compact`.
    #[inline]
    #[must_use]
    pub fn as_ptr(&self) -> *const T {
        self.buffer.as_ptr()
    }

    /// Buffer length in elements.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    #[must_use]
    pub fn live_count(&self) -> usize {
        self.live.len()
    }

    #[must_use]
    pub fn live_length(&self) -> usize {
        self.live.values().map(|span| span.length).sum()
    }

    #[must_use]
    pub fn free_count(&self) -> usize {
        self.free.len()
    }

    #[must_use]
    pub fn free_length(&self) -> usize {
        self.free.iter().map(|span| span.length).sum()
    }
}

impl<T: Pod> Default for FreeformAllocator<T> {
    fn default() -> Self {
        Self::new()
    }
}
