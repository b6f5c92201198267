//! Render Context
//!
//! The entry point scene code talks to. It owns the device, the resource
//! registry, the frame allocator and the per-view queues, and replays the
//! whole frame in [`RenderContext::end_frame`].
//!
//! # Frame Order
//!
//! ```text
//! end_frame()
//!   ├─ create/update commands issued through the context   (FIFO)
//!   ├─ view queues, views sequenced by ViewOrder           (FIFO per view)
//!   ├─ read/destroy commands issued through the context    (FIFO)
//!   ├─ submit + wait idle
//!   ├─ release destroyed natives, retired programs
//!   ├─ deliver texture readbacks
//!   └─ reset frame allocator
//! ```
//!
//! A resource command that must run at an exact point inside a view is
//! submitted to that view with [`RenderContext::submit`] and keeps its
//! position there.

use std::sync::Arc;

use smallvec::SmallVec;

use super::command::{
    BeginRenderPass, DrawCommand, IndirectDraw, RenderCommand, UniformRegion,
};
use super::executor::{Executor, FrameStats};
use super::queue::{CommandQueue, ViewId};
use super::state::RenderState;
use crate::backend::GpuDevice;
use crate::material::{ApplyMode, Material, TextureSlot};
use crate::memory::{FrameAllocator, FrameRegion};
use crate::resources::{
    BufferHandle, BufferUsage, ResourceRegistry, TextureDesc, TextureFormat, TextureHandle,
};
use crate::settings::RhiSettings;
use crate::shader::{Shader, ShaderMetadata, ShaderStage};

pub struct RenderContext<D: GpuDevice> {
    device: D,
    settings: RhiSettings,
    registry: ResourceRegistry,
    frame: FrameAllocator,
    queue: CommandQueue,
    upload_commands: Vec<RenderCommand>,
    post_commands: Vec<RenderCommand>,
    executor: Executor,
    fallback_texture: TextureHandle,
    frame_index: u64,
    shut_down: bool,
}

impl<D: GpuDevice> RenderContext<D> {
    /// Creates the context and uploads the opaque-white fallback texture.
    pub fn new(device: D, settings: RhiSettings) -> Self {
        let settings = settings.sanitized();
        let mut ctx = Self {
            device,
            registry: ResourceRegistry::new(settings.max_buffers, settings.max_textures),
            frame: FrameAllocator::new(settings.frame_allocator_capacity),
            queue: CommandQueue::new(),
            upload_commands: Vec::new(),
            post_commands: Vec::new(),
            executor: Executor::new(settings.elide_redundant_binds),
            fallback_texture: TextureHandle::null(),
            frame_index: 0,
            shut_down: false,
            settings,
        };

        let size = ctx.settings.fallback_texture_size;
        let desc = TextureDesc::new(size, size, TextureFormat::Rgba8Unorm);
        match ctx.registry.reserve_texture(desc) {
            Some(handle) => {
                ctx.executor.execute(
                    &mut ctx.device,
                    &mut ctx.registry,
                    &mut ctx.frame,
                    RenderCommand::UpdateTexture {
                        handle,
                        data: vec![0xFF; desc.byte_length()],
                    },
                );
                ctx.fallback_texture = handle;
            }
            None => log::error!("No texture slot available for the fallback texture"),
        }

        log::info!(
            "Render context ready: {} buffer slots, {} texture slots, {} byte frame allocator",
            ctx.settings.max_buffers,
            ctx.settings.max_textures,
            ctx.frame.capacity()
        );
        ctx
    }

    // ========================================================================
    // Buffers
    // ========================================================================

    /// Reserves a buffer and schedules its first upload. Returns `None` when
    /// the registry is full.
    pub fn create_buffer(&mut self, usage: BufferUsage, data: &[u8]) -> Option<BufferHandle> {
        let handle = self.registry.reserve_buffer(usage)?;
        if !data.is_empty() {
            self.upload_commands.push(RenderCommand::UpdateBuffer {
                handle,
                data: data.to_vec(),
            });
        }
        Some(handle)
    }

    pub fn create_vertex_buffer(&mut self, data: &[u8]) -> Option<BufferHandle> {
        self.create_buffer(BufferUsage::VERTEX, data)
    }

    pub fn create_index_buffer(&mut self, data: &[u8]) -> Option<BufferHandle> {
        self.create_buffer(BufferUsage::INDEX, data)
    }

    /// Schedules an upload. A different length re-creates the native buffer.
    pub fn update_buffer(&mut self, handle: BufferHandle, data: &[u8]) {
        self.upload_commands.push(RenderCommand::UpdateBuffer {
            handle,
            data: data.to_vec(),
        });
    }

    /// Schedules destruction after every view of this frame has executed.
    pub fn destroy_buffer(&mut self, handle: BufferHandle) {
        self.post_commands.push(RenderCommand::DestroyBuffer(handle));
    }

    // ========================================================================
    // Textures
    // ========================================================================

    pub fn create_texture(&mut self, desc: TextureDesc, data: Option<&[u8]>) -> Option<TextureHandle> {
        let handle = self.registry.reserve_texture(desc)?;
        if let Some(data) = data.filter(|data| !data.is_empty()) {
            self.upload_commands.push(RenderCommand::UpdateTexture {
                handle,
                data: data.to_vec(),
            });
        }
        Some(handle)
    }

    pub fn update_texture(&mut self, handle: TextureHandle, data: &[u8]) {
        self.upload_commands.push(RenderCommand::UpdateTexture {
            handle,
            data: data.to_vec(),
        });
    }

    pub fn destroy_texture(&mut self, handle: TextureHandle) {
        self.post_commands.push(RenderCommand::DestroyTexture(handle));
    }

    /// Requests the texture's contents after this frame's views have run.
    ///
    /// `callback` runs once, at the end of the frame that completes the
    /// copy, with `None` if the texture is gone or the copy failed.
    pub fn read_texture(
        &mut self,
        handle: TextureHandle,
        callback: impl FnOnce(Option<Vec<u8>>) + Send + 'static,
    ) {
        self.post_commands.push(RenderCommand::ReadTexture {
            handle,
            callback: Box::new(callback),
        });
    }

    // ========================================================================
    // Shaders & Materials
    // ========================================================================

    /// Builds a shader and compiles one program per variant.
    pub fn load_shader(&mut self, metadata: &ShaderMetadata) -> Arc<Shader> {
        let device = &mut self.device;
        let shader = Shader::build(metadata, |source| {
            let program = device.create_program(source);
            if program.is_none() {
                log::warn!(
                    "Shader '{}': variant '{}' failed to compile",
                    metadata.name,
                    source.key
                );
            }
            program
        });
        log::debug!(
            "Loaded shader '{}' with {} variants",
            shader.name(),
            shader.instances().len()
        );
        Arc::new(shader)
    }

    /// Disposes the shader. Its programs are released after the current
    /// frame; materials using it stop rendering immediately.
    pub fn dispose_shader(&mut self, shader: &Shader) {
        self.executor.retire_programs(shader.dispose());
    }

    #[must_use]
    pub fn create_material(&self, shader: &Arc<Shader>) -> Material {
        Material::new(Arc::clone(shader), self.fallback_texture)
    }

    // ========================================================================
    // Submission
    // ========================================================================

    /// Starts a render pass in `view`.
    pub fn begin_view(&mut self, view: ViewId, pass: BeginRenderPass) {
        self.queue.submit(view, RenderCommand::BeginRenderPass(pass));
    }

    /// Captures `state` and `material` into a draw command for `view`.
    ///
    /// Returns `false` if the material has no renderable variant; nothing
    /// is queued in that case.
    pub fn draw(&mut self, view: ViewId, state: &RenderState, material: &Material) -> bool {
        match self.prepare_draw(state, material) {
            Some(draw) => {
                self.queue.submit(view, RenderCommand::Draw(Box::new(draw)));
                true
            }
            None => false,
        }
    }

    pub fn draw_indirect(
        &mut self,
        view: ViewId,
        state: &RenderState,
        material: &Material,
        indirect_buffer: BufferHandle,
        offset: u64,
        draw_count: u32,
    ) -> bool {
        match self.prepare_draw(state, material) {
            Some(draw) => {
                self.queue.submit(
                    view,
                    RenderCommand::DrawIndirect(Box::new(IndirectDraw {
                        draw,
                        indirect_buffer,
                        offset,
                        draw_count,
                    })),
                );
                true
            }
            None => false,
        }
    }

    /// Appends any command to `view`.
    pub fn submit(&mut self, view: ViewId, command: RenderCommand) {
        self.queue.submit(view, command);
    }

    /// Builds a draw command without queueing it. Uniform bytes are packed
    /// into this frame's allocator, so the command is only valid until
    /// [`RenderContext::end_frame`]; submitting it in a later frame skips it.
    pub fn prepare_draw(&mut self, state: &RenderState, material: &Material) -> Option<DrawCommand> {
        let Some(program) = material.program() else {
            log::debug!(
                "Material on shader '{}' has no renderable variant",
                material.shader().name()
            );
            return None;
        };
        let instance = material.instance()?;

        let blocks = material.uniform_blocks();
        let vertex_blocks = blocks
            .iter()
            .filter(|block| block.stage == ShaderStage::Vertex)
            .count();
        let render_data = instance
            .render_data_block()
            .map(|(stage, block)| match stage {
                ShaderStage::Vertex => block as usize,
                ShaderStage::Fragment => vertex_blocks + block as usize,
            });

        let mut uniforms: SmallVec<[UniformRegion; 4]> = SmallVec::with_capacity(blocks.len());
        for block in blocks {
            let region = if state.apply_mode == ApplyMode::TexturesOnly {
                let offset = self.frame.allocate(block.bytes.len());
                self.frame.span_mut(offset, block.bytes.len()).fill(0);
                FrameRegion {
                    offset,
                    size: block.bytes.len(),
                }
            } else {
                self.frame.push_bytes(&block.bytes)
            };
            uniforms.push(UniformRegion {
                stage: block.stage,
                binding: block.binding,
                region,
            });
        }

        let textures = |stage: ShaderStage| -> SmallVec<[TextureSlot; 4]> {
            let slots = material.textures(stage);
            if state.apply_mode == ApplyMode::IgnoreTextures {
                slots
                    .iter()
                    .map(|slot| TextureSlot {
                        binding: slot.binding,
                        texture: material.fallback_texture(),
                    })
                    .collect()
            } else {
                SmallVec::from_slice(slots)
            }
        };

        Some(DrawCommand {
            state: state.clone(),
            program,
            vertex_textures: textures(ShaderStage::Vertex),
            fragment_textures: textures(ShaderStage::Fragment),
            uniforms,
            render_data,
            cull_mode: material.cull_mode(),
            frame: self.frame_index,
        })
    }

    /// Replays the frame and resets per-frame state.
    pub fn end_frame(&mut self) -> FrameStats {
        self.executor.begin_frame(self.frame_index);
        for command in std::mem::take(&mut self.upload_commands) {
            self.executor
                .execute(&mut self.device, &mut self.registry, &mut self.frame, command);
        }

        for (view, commands) in self.queue.drain_ordered(self.settings.view_order) {
            log::trace!("Replaying view {view}: {} commands", commands.len());
            self.executor.begin_view(&mut self.device);
            for command in commands {
                self.executor
                    .execute(&mut self.device, &mut self.registry, &mut self.frame, command);
            }
        }

        self.executor.begin_view(&mut self.device);
        for command in std::mem::take(&mut self.post_commands) {
            self.executor
                .execute(&mut self.device, &mut self.registry, &mut self.frame, command);
        }

        let stats = self.executor.finish_frame(&mut self.device, &mut self.registry);
        self.frame.clear();
        self.frame_index += 1;
        log::debug!(
            "Frame {}: {} draws, {} skipped, {} uploads",
            self.frame_index,
            stats.draws,
            stats.skipped_draws,
            stats.uploads
        );
        stats
    }

    /// Releases every native object. Pending readbacks complete with `None`.
    /// Called automatically on drop.
    pub fn shutdown(&mut self) {
        if self.shut_down {
            return;
        }
        self.shut_down = true;
        self.queue.clear();
        self.upload_commands.clear();
        for command in std::mem::take(&mut self.post_commands) {
            if let RenderCommand::ReadTexture { callback, .. } = command {
                callback(None);
            }
        }

        self.device.wait_idle();
        self.executor.cancel_readbacks();
        let batch = self.registry.drain_all();
        for buffer in batch.buffers {
            self.device.release_buffer(buffer);
        }
        for texture in batch.textures {
            self.device.release_texture(texture);
        }
        for staging in batch.staging {
            self.device.release_staging(staging);
        }
        self.executor.release_retired_programs(&mut self.device);
        log::debug!("Render context shut down after {} frames", self.frame_index);
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    #[inline]
    #[must_use]
    pub fn device(&self) -> &D {
        &self.device
    }

    #[inline]
    pub fn device_mut(&mut self) -> &mut D {
        &mut self.device
    }

    #[inline]
    #[must_use]
    pub fn registry(&self) -> &ResourceRegistry {
        &self.registry
    }

    #[inline]
    #[must_use]
    pub fn settings(&self) -> &RhiSettings {
        &self.settings
    }

    #[inline]
    #[must_use]
    pub fn frame_allocator(&self) -> &FrameAllocator {
        &self.frame
    }

    /// Commands queued in views for the current frame.
    #[inline]
    #[must_use]
    pub fn queued_commands(&self) -> usize {
        self.queue.len()
    }

    #[inline]
    #[must_use]
    pub fn fallback_texture(&self) -> TextureHandle {
        self.fallback_texture
    }

    /// Frames completed so far.
    #[inline]
    #[must_use]
    pub fn frame_index(&self) -> u64 {
        self.frame_index
    }
}

impl<D: GpuDevice> Drop for RenderContext<D> {
    fn drop(&mut self) {
        self.shutdown();
    }
}
