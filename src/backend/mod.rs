//! Backend Module
//!
//! The native graphics API boundary. Everything above this module works with
//! logical handles; only [`GpuDevice`] implementations see native objects,
//! and even those are passed around as opaque ids.
//!
//! # Implementations
//!
//! | Device | Feature | Use |
//! |--------|---------|-----|
//! | [`HeadlessDevice`] | always | Records calls and keeps uploads in memory (tests, tools) |
//! | `WgpuDevice` | `wgpu` | Drives a `wgpu::Device` |
//!
//! The executor is the only caller. It calls devices from a single thread,
//! in command order; devices do not need interior synchronization.

pub mod headless;
#[cfg(feature = "wgpu")]
pub mod wgpu_device;

use glam::Vec4;

use crate::material::CullMode;
use crate::resources::{BufferUsage, IndexFormat, SamplerKey, TextureDesc};
use crate::shader::{ShaderStage, ShaderVariantSource};

pub use headless::{DeviceCall, DeviceLog, HeadlessDevice};
#[cfg(feature = "wgpu")]
pub use wgpu_device::WgpuDevice;

// ─── Native Handles ───────────────────────────────────────────────────────────

macro_rules! native_id {
    ($($(#[$meta:meta])* $name:ident),* $(,)?) => {
        $(
            $(#[$meta])*
            #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
            pub struct $name(pub u64);
        )*
    };
}

native_id! {
    /// GPU-resident buffer.
    NativeBuffer,
    /// CPU-writable transfer buffer.
    NativeStaging,
    NativeTexture,
    NativeSampler,
    /// Compiled pipeline/program for one shader variant.
    ProgramId,
    /// Ticket of an in-flight texture download.
    ReadbackId,
}

// ─── Pass & Draw Descriptors ──────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ClearMode {
    /// Load color and depth.
    None,
    /// Load color, clear depth.
    Depth,
    /// Clear color and depth.
    #[default]
    All,
}

/// Pixel-space viewport.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Viewport {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct ScissorRect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RenderPassDesc {
    /// Color target; `None` renders to the device's surface.
    pub color: Option<NativeTexture>,
    pub depth: Option<NativeTexture>,
    pub clear: ClearMode,
    pub clear_color: Vec4,
    pub viewport: Viewport,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DrawIndexed {
    pub index_count: u32,
    pub instance_count: u32,
    pub first_index: u32,
    pub base_vertex: i32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SamplerBinding {
    pub binding: u32,
    pub texture: NativeTexture,
    pub sampler: NativeSampler,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StorageBinding {
    pub binding: u32,
    pub buffer: NativeBuffer,
}

/// Completion of a texture download: the bytes, or `None` on failure.
pub type ReadbackResult = (ReadbackId, Option<Vec<u8>>);

// ─── Device Trait ─────────────────────────────────────────────────────────────

/// Native graphics API consumed by the executor.
///
/// Creation methods return `None` when the device cannot allocate; the
/// executor then skips the dependent upload or draw for this frame.
pub trait GpuDevice {
    // Buffers
    fn create_buffer(&mut self, size: usize, usage: BufferUsage) -> Option<NativeBuffer>;
    fn create_staging(&mut self, size: usize) -> Option<NativeStaging>;
    /// Copies `data` into `staging` and records a transfer into `buffer`.
    fn upload_buffer(&mut self, staging: NativeStaging, buffer: NativeBuffer, data: &[u8]);
    fn release_buffer(&mut self, buffer: NativeBuffer);
    fn release_staging(&mut self, staging: NativeStaging);

    // Textures
    fn create_texture(&mut self, desc: &TextureDesc) -> Option<NativeTexture>;
    fn upload_texture(
        &mut self,
        staging: NativeStaging,
        texture: NativeTexture,
        desc: &TextureDesc,
        data: &[u8],
    );
    fn release_texture(&mut self, texture: NativeTexture);
    fn create_sampler(&mut self, key: SamplerKey) -> Option<NativeSampler>;

    // Programs
    fn create_program(&mut self, source: &ShaderVariantSource) -> Option<ProgramId>;
    fn release_program(&mut self, program: ProgramId);

    // Passes
    fn begin_render_pass(&mut self, desc: &RenderPassDesc);
    fn end_render_pass(&mut self);
    /// Size of the surface used by passes without a color target.
    fn surface_size(&self) -> (u32, u32);

    // Bindings
    fn bind_program(&mut self, program: ProgramId);
    fn set_cull_mode(&mut self, cull_mode: CullMode);
    fn bind_vertex_buffer(&mut self, buffer: NativeBuffer);
    fn bind_index_buffer(&mut self, buffer: NativeBuffer, format: IndexFormat);
    fn bind_samplers(&mut self, stage: ShaderStage, samplers: &[SamplerBinding]);
    fn bind_storage_buffers(&mut self, stage: ShaderStage, buffers: &[StorageBinding]);
    fn push_uniform_data(&mut self, stage: ShaderStage, binding: u32, data: &[u8]);
    fn set_scissor(&mut self, rect: Option<ScissorRect>);

    // Draws
    fn draw_indexed(&mut self, draw: &DrawIndexed);
    fn draw_indexed_indirect(&mut self, buffer: NativeBuffer, offset: u64, draw_count: u32);

    // Readback
    /// Starts copying `texture` to CPU memory. The device sends the result on
    /// `completion` once the copy finishes, possibly from another thread.
    fn download_texture(
        &mut self,
        texture: NativeTexture,
        desc: &TextureDesc,
        id: ReadbackId,
        completion: flume::Sender<ReadbackResult>,
    );

    // Frame
    /// Submits all work recorded since the last submit.
    fn submit(&mut self);
    /// Blocks until all submitted work has completed.
    fn wait_idle(&mut self);
}
