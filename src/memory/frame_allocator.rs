//! Frame Allocator
//!
//! A pure logical structure that does not hold GPU resources; it only manages
//! bytes and offsets. Uniform data for every draw of a frame is packed here
//! while commands are recorded, read back by the executor during replay, and
//! discarded with a single [`FrameAllocator::clear`] once the frame is
//! submitted.
//!
//! # Address stability
//!
//! The backing storage is one contiguous `Vec<u8>`. Offsets returned by
//! [`FrameAllocator::allocate`] stay valid for the whole frame, but the base
//! address moves whenever the buffer grows. Never hold a pointer from
//! [`FrameAllocator::as_ptr`] across an `allocate` call.

/// A region of the frame allocator, stored in commands instead of a pointer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FrameRegion {
    pub offset: usize,
    pub size: usize,
}

impl FrameRegion {
    #[inline]
    #[must_use]
    pub fn range(self) -> std::ops::Range<usize> {
        self.offset..self.offset.saturating_add(self.size)
    }
}

/// Linear (bump) allocator reset once per frame.
pub struct FrameAllocator {
    buffer: Vec<u8>,
    /// Current write position for this frame
    position: usize,
}

impl FrameAllocator {
    /// Default initial capacity in bytes.
    pub const DEFAULT_CAPACITY: usize = 1024;

    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            buffer: vec![0; capacity.max(1)],
            position: 0,
        }
    }

    /// Reserves `size` bytes and returns their starting offset.
    ///
    /// The buffer doubles until the request fits. Previously returned offsets
    /// remain valid and their contents are preserved.
    pub fn allocate(&mut self, size: usize) -> usize {
        let required = self.position + size;
        if required > self.buffer.len() {
            self.grow(required);
        }

        let start = self.position;
        self.position = required;
        start
    }

    /// Reserves space for `data`, copies it in and returns the region.
    pub fn push_bytes(&mut self, data: &[u8]) -> FrameRegion {
        let offset = self.allocate(data.len());
        self.buffer[offset..offset + data.len()].copy_from_slice(data);
        FrameRegion {
            offset,
            size: data.len(),
        }
    }

    /// Resets the bump pointer. Capacity is kept as a high-water mark.
    #[inline]
    pub fn clear(&mut self) {
        self.position = 0;
    }

    /// Raw address of `position` for direct consumption by native calls.
    ///
    /// Re-query after every `allocate`: growth moves the buffer.
    #[inline]
    #[must_use]
    pub fn as_ptr(&self, position: usize) -> *const u8 {
        self.buffer.as_ptr().wrapping_add(position)
    }

    /// Read view of `[position, position + size)`. Out-of-range requests
    /// yield an empty slice.
    #[must_use]
    pub fn span(&self, position: usize, size: usize) -> &[u8] {
        position
            .checked_add(size)
            .and_then(|end| self.buffer.get(position..end))
            .unwrap_or(&[])
    }

    /// Write view of `[position, position + size)`. Out-of-range requests
    /// yield an empty slice.
    pub fn span_mut(&mut self, position: usize, size: usize) -> &mut [u8] {
        match position.checked_add(size) {
            Some(end) => self.buffer.get_mut(position..end).unwrap_or(&mut []),
            None => &mut [],
        }
    }

    #[inline]
    #[must_use]
    pub fn region(&self, region: FrameRegion) -> &[u8] {
        self.span(region.offset, region.size)
    }

    #[inline]
    pub fn region_mut(&mut self, region: FrameRegion) -> &mut [u8] {
        self.span_mut(region.offset, region.size)
    }

    /// Bytes allocated this frame.
    #[inline]
    #[must_use]
    pub fn position(&self) -> usize {
        self.position
    }

    #[inline]
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.buffer.len()
    }

    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.position == 0
    }

    fn grow(&mut self, required: usize) {
        let mut new_len = self.buffer.len() * 2;
        while new_len < required {
            new_len *= 2;
        }

        log::debug!(
            "Frame allocator expanding capacity: {} -> {}",
            self.buffer.len(),
            new_len
        );
        self.buffer.resize(new_len, 0);
    }
}

impl Default for FrameAllocator {
    fn default() -> Self {
        Self::new(Self::DEFAULT_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bump_allocation_is_contiguous() {
        let mut frame = FrameAllocator::new(64);
        assert_eq!(frame.allocate(16), 0);
        assert_eq!(frame.allocate(8), 16);
        assert_eq!(frame.position(), 24);
    }

    #[test]
    fn growth_doubles_and_preserves_contents() {
        let mut frame = FrameAllocator::new(16);
        let first = frame.push_bytes(&[1, 2, 3, 4]);
        let second = frame.push_bytes(&[9; 40]);

        assert_eq!(frame.capacity(), 64);
        assert_eq!(frame.region(first), &[1, 2, 3, 4]);
        assert_eq!(frame.region(second), &[9; 40][..]);
    }

    #[test]
    fn clear_keeps_high_water_mark() {
        let mut frame = FrameAllocator::new(8);
        frame.allocate(100);
        let capacity = frame.capacity();
        frame.clear();

        assert!(frame.is_empty());
        assert_eq!(frame.capacity(), capacity);
        assert_eq!(frame.allocate(4), 0);
    }

    #[test]
    fn out_of_range_span_is_empty() {
        let frame = FrameAllocator::new(8);
        assert!(frame.span(6, 4).is_empty());
        assert_eq!(frame.span(4, 4).len(), 4);
    }

    #[test]
    fn huge_regions_resolve_empty() {
        let mut frame = FrameAllocator::new(8);
        let region = FrameRegion {
            offset: usize::MAX - 2,
            size: 16,
        };
        assert_eq!(region.range(), usize::MAX - 2..usize::MAX);
        assert!(frame.region(region).is_empty());
        assert!(frame.region_mut(region).is_empty());
    }

    #[test]
    fn regions_past_four_gib_keep_their_offset() {
        let region = FrameRegion {
            offset: 5 << 30,
            size: 64,
        };
        assert_eq!(region.range(), (5 << 30)..(5 << 30) + 64);
    }

    #[test]
    fn pointer_tracks_offset() {
        let mut frame = FrameAllocator::new(32);
        let offset = frame.allocate(8);
        let base = frame.as_ptr(0);
        assert_eq!(frame.as_ptr(offset + 4), base.wrapping_add(offset + 4));
    }
}
