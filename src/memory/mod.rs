//! Memory Module
//!
//! CPU-side allocators feeding GPU uploads. None of them are synchronized:
//! each is owned by the render thread, or locked by the caller.
//!
//! | Allocator | Lifetime | Use |
//! |-----------|----------|-----|
//! | [`FrameAllocator`] | Reset every frame | Packed uniform bytes for recorded draws |
//! | [`FreeformAllocator`] | Session | Variable-size vertex/index/bone data |
//! | [`PoolAllocator`] | Session | Same-length scratch arrays reused across frames |

pub mod frame_allocator;
pub mod freeform_allocator;
pub mod pool_allocator;

pub use frame_allocator::{FrameAllocator, FrameRegion};
pub use freeform_allocator::{ArenaEntry, FreeformAllocator};
pub use pool_allocator::PoolAllocator;
