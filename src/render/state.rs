//! Draw state captured by value into render commands.

use glam::Mat4;
use smallvec::SmallVec;

use crate::backend::ScissorRect;
use crate::material::ApplyMode;
use crate::resources::{BufferHandle, IndexFormat};

/// A storage buffer bound to one stage slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StorageSlot {
    pub binding: u32,
    pub buffer: BufferHandle,
}

/// Geometry, transform and per-draw overrides of one draw call.
///
/// Scene code keeps one of these per renderable and mutates it freely;
/// submission copies it into the command.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderState {
    pub vertex_buffer: Option<BufferHandle>,
    pub index_buffer: Option<BufferHandle>,
    pub index_format: IndexFormat,
    /// Added to every index before fetching vertices.
    pub start_vertex: i32,
    pub start_index: u32,
    pub index_count: u32,
    /// `0` is treated as a single instance.
    pub instance_count: u32,
    pub world: Mat4,
    pub scissor: Option<ScissorRect>,
    pub apply_mode: ApplyMode,
    pub vertex_storage_buffers: SmallVec<[StorageSlot; 2]>,
    pub fragment_storage_buffers: SmallVec<[StorageSlot; 2]>,
    /// First instance index written to the render data block.
    pub instance_offset: u32,
}

impl Default for RenderState {
    fn default() -> Self {
        Self {
            vertex_buffer: None,
            index_buffer: None,
            index_format: IndexFormat::default(),
            start_vertex: 0,
            start_index: 0,
            index_count: 0,
            instance_count: 1,
            world: Mat4::IDENTITY,
            scissor: None,
            apply_mode: ApplyMode::All,
            vertex_storage_buffers: SmallVec::new(),
            fragment_storage_buffers: SmallVec::new(),
            instance_offset: 0,
        }
    }
}

impl RenderState {
    /// Indexed geometry drawing `index_count` indices from the start.
    #[must_use]
    pub fn indexed(
        vertex_buffer: BufferHandle,
        index_buffer: BufferHandle,
        index_format: IndexFormat,
        index_count: u32,
    ) -> Self {
        Self {
            vertex_buffer: Some(vertex_buffer),
            index_buffer: Some(index_buffer),
            index_format,
            index_count,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_world(mut self, world: Mat4) -> Self {
        self.world = world;
        self
    }

    /// Every buffer handle the draw depends on.
    pub fn buffer_handles(&self) -> impl Iterator<Item = BufferHandle> + '_ {
        self.vertex_buffer
            .into_iter()
            .chain(self.index_buffer)
            .chain(self.vertex_storage_buffers.iter().map(|slot| slot.buffer))
            .chain(self.fragment_storage_buffers.iter().map(|slot| slot.buffer))
    }
}
