use bitflags::bitflags;
use serde::{Deserialize, Serialize};

use crate::backend::{NativeBuffer, NativeStaging};

use super::ResourceHandle;

/// Marker for buffer handles.
#[derive(Debug)]
pub enum Buffer {}

pub type BufferHandle = ResourceHandle<Buffer>;

bitflags! {
    /// How a buffer is consumed by the GPU.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct BufferUsage: u32 {
        const VERTEX        = 1 << 0;
        const INDEX         = 1 << 1;
        const INDIRECT      = 1 << 2;
        const GRAPHICS_READ = 1 << 3;
        const COMPUTE_READ  = 1 << 4;
        const COMPUTE_WRITE = 1 << 5;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum IndexFormat {
    Uint16,
    #[default]
    Uint32,
}

impl IndexFormat {
    #[inline]
    #[must_use]
    pub const fn size(self) -> usize {
        match self {
            Self::Uint16 => 2,
            Self::Uint32 => 4,
        }
    }
}

/// Registry record for a buffer.
///
/// The native buffer and its staging buffer are created by the first update
/// command that executes, and re-created whenever the uploaded length
/// changes.
#[derive(Debug, Clone)]
pub struct BufferResource {
    pub native: Option<NativeBuffer>,
    pub staging: Option<NativeStaging>,
    /// Byte length of the native buffer.
    pub length: usize,
    pub usage: BufferUsage,
    /// Cleared on destroy; the slot itself is recycled once the GPU is idle.
    pub used: bool,
}

impl BufferResource {
    #[must_use]
    pub fn new(usage: BufferUsage) -> Self {
        Self {
            native: None,
            staging: None,
            length: 0,
            usage,
            used: true,
        }
    }

    /// Native buffer, if it is live and has been uploaded.
    #[inline]
    #[must_use]
    pub fn resident(&self) -> Option<NativeBuffer> {
        if self.used { self.native } else { None }
    }
}
