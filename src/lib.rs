#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::cast_precision_loss)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::too_many_arguments)]

//! # Myth RHI
//!
//! The layer between per-frame scene traversal and a native GPU API.
//!
//! Scene code describes draws with logical [`BufferHandle`]s and
//! [`TextureHandle`]s, a [`RenderState`] and a [`Material`]. The
//! [`RenderContext`] captures each draw into an immutable command, queues
//! it per view, and replays the frame in order against a [`GpuDevice`].
//!
//! ```rust,ignore
//! use myth_rhi::prelude::*;
//!
//! let mut ctx = RenderContext::new(HeadlessDevice::new(800, 600), RhiSettings::default());
//! let vb = ctx.create_vertex_buffer(&vertices).unwrap();
//! let ib = ctx.create_index_buffer(&indices).unwrap();
//! let shader = ctx.load_shader(&metadata);
//! let mut material = ctx.create_material(&shader);
//! material.set_main_color(Vec4::new(1.0, 0.5, 0.2, 1.0));
//!
//! ctx.begin_view(0, BeginRenderPass::default());
//! ctx.draw(0, &RenderState::indexed(vb, ib, IndexFormat::Uint16, 36), &material);
//! let stats = ctx.end_frame();
//! ```

pub mod backend;
pub mod errors;
pub mod logging;
pub mod material;
pub mod memory;
pub mod render;
pub mod resources;
pub mod settings;
pub mod shader;
pub mod utils;

pub use backend::{GpuDevice, HeadlessDevice};
pub use errors::{Result, RhiError};
pub use material::{ApplyMode, CullMode, Material, MaterialValue};
pub use memory::{FrameAllocator, FreeformAllocator, PoolAllocator};
pub use render::{BeginRenderPass, FrameStats, RenderCommand, RenderContext, RenderState, ViewId};
pub use resources::{
    BufferHandle, BufferUsage, IndexFormat, ResourceHandle, TextureDesc, TextureFlags,
    TextureFormat, TextureHandle,
};
pub use settings::{RhiSettings, ViewOrder};
pub use shader::{KeywordSet, Shader, ShaderHandle, ShaderMetadata, VariantKey};

pub mod prelude {
    pub use crate::backend::{ClearMode, GpuDevice, HeadlessDevice, ScissorRect};
    pub use crate::material::{ApplyMode, CullMode, Material, MaterialValue};
    pub use crate::render::{BeginRenderPass, FrameStats, RenderContext, RenderState, ViewId};
    pub use crate::resources::{
        BufferHandle, BufferUsage, IndexFormat, TextureDesc, TextureFlags, TextureFormat,
        TextureHandle,
    };
    pub use crate::settings::RhiSettings;
    pub use crate::shader::{ShaderMetadata, keywords};
    pub use glam::{Mat4, Vec4};
}
