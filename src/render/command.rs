//! Render Commands
//!
//! Immutable records of deferred work. A command owns copies of everything
//! it needs: the draw state, the texture slot arrays and the frame
//! allocator region holding its packed uniform bytes. Mutating the source
//! [`Material`](crate::material::Material) or [`RenderState`] after
//! submission does not affect a queued command.
//!
//! Draw commands live for one frame. Their uniform regions are reused once
//! the frame allocator resets, so a draw carries the frame it was built in
//! and is skipped if replayed later.

use glam::{Mat4, Vec4};
use smallvec::SmallVec;

use super::state::RenderState;
use crate::backend::{ClearMode, ProgramId};
use crate::material::{CullMode, TextureSlot};
use crate::memory::FrameRegion;
use crate::resources::{BufferHandle, TextureHandle};
use crate::shader::ShaderStage;

/// Packed bytes of one uniform block, living in the frame allocator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UniformRegion {
    pub stage: ShaderStage,
    pub binding: u32,
    pub region: FrameRegion,
}

/// Per-draw built-in block, laid out as the shaders declare `RenderData`.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct RenderData {
    pub world: [f32; 16],
    pub view: [f32; 16],
    pub projection: [f32; 16],
    pub instance_offset: u32,
    pub _pad: [u32; 3],
}

impl RenderData {
    #[must_use]
    pub fn new(world: Mat4, view: Mat4, projection: Mat4, instance_offset: u32) -> Self {
        Self {
            world: world.to_cols_array(),
            view: view.to_cols_array(),
            projection: projection.to_cols_array(),
            instance_offset,
            _pad: [0; 3],
        }
    }
}

#[derive(Debug, Clone)]
pub struct DrawCommand {
    pub state: RenderState,
    pub program: ProgramId,
    pub vertex_textures: SmallVec<[TextureSlot; 4]>,
    pub fragment_textures: SmallVec<[TextureSlot; 4]>,
    pub uniforms: SmallVec<[UniformRegion; 4]>,
    /// Index into `uniforms` of the block patched with [`RenderData`].
    pub render_data: Option<usize>,
    pub cull_mode: CullMode,
    /// Frame whose allocator holds `uniforms`. The command only executes
    /// in that frame.
    pub frame: u64,
}

impl DrawCommand {
    /// Every texture handle the draw samples.
    pub fn texture_handles(&self) -> impl Iterator<Item = TextureHandle> + '_ {
        self.vertex_textures
            .iter()
            .chain(&self.fragment_textures)
            .map(|slot| slot.texture)
    }
}

#[derive(Debug, Clone)]
pub struct IndirectDraw {
    pub draw: DrawCommand,
    pub indirect_buffer: BufferHandle,
    /// Byte offset of the first argument record.
    pub offset: u64,
    pub draw_count: u32,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BeginRenderPass {
    /// Color target; `None` renders to the surface.
    pub target: Option<TextureHandle>,
    pub depth: Option<TextureHandle>,
    pub clear: ClearMode,
    pub clear_color: Vec4,
    /// Normalized `(x, y, width, height)`, scaled by the target size.
    pub viewport: Vec4,
    pub view: Mat4,
    pub projection: Mat4,
}

impl Default for BeginRenderPass {
    fn default() -> Self {
        Self {
            target: None,
            depth: None,
            clear: ClearMode::All,
            clear_color: Vec4::new(0.0, 0.0, 0.0, 1.0),
            viewport: Vec4::new(0.0, 0.0, 1.0, 1.0),
            view: Mat4::IDENTITY,
            projection: Mat4::IDENTITY,
        }
    }
}

/// Receives downloaded texture bytes, or `None` if the read failed.
pub type ReadbackCallback = Box<dyn FnOnce(Option<Vec<u8>>) + Send>;

pub enum RenderCommand {
    BeginRenderPass(BeginRenderPass),
    Draw(Box<DrawCommand>),
    DrawIndirect(Box<IndirectDraw>),
    UpdateBuffer { handle: BufferHandle, data: Vec<u8> },
    UpdateTexture { handle: TextureHandle, data: Vec<u8> },
    DestroyBuffer(BufferHandle),
    DestroyTexture(TextureHandle),
    ReadTexture { handle: TextureHandle, callback: ReadbackCallback },
}

impl RenderCommand {
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::BeginRenderPass(_) => "BeginRenderPass",
            Self::Draw(_) => "Draw",
            Self::DrawIndirect(_) => "DrawIndirect",
            Self::UpdateBuffer { .. } => "UpdateBuffer",
            Self::UpdateTexture { .. } => "UpdateTexture",
            Self::DestroyBuffer(_) => "DestroyBuffer",
            Self::DestroyTexture(_) => "DestroyTexture",
            Self::ReadTexture { .. } => "ReadTexture",
        }
    }
}

impl std::fmt::Debug for RenderCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::BeginRenderPass(pass) => f.debug_tuple("BeginRenderPass").field(pass).finish(),
            Self::Draw(draw) => f.debug_tuple("Draw").field(draw).finish(),
            Self::DrawIndirect(draw) => f.debug_tuple("DrawIndirect").field(draw).finish(),
            Self::UpdateBuffer { handle, data } => f
                .debug_struct("UpdateBuffer")
                .field("handle", handle)
                .field("len", &data.len())
                .finish(),
            Self::UpdateTexture { handle, data } => f
                .debug_struct("UpdateTexture")
                .field("handle", handle)
                .field("len", &data.len())
                .finish(),
            Self::DestroyBuffer(handle) => f.debug_tuple("DestroyBuffer").field(handle).finish(),
            Self::DestroyTexture(handle) => f.debug_tuple("DestroyTexture").field(handle).finish(),
            Self::ReadTexture { handle, .. } => {
                f.debug_struct("ReadTexture").field("handle", handle).finish_non_exhaustive()
            }
        }
    }
}
