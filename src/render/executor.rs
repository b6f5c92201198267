//! Command Executor
//!
//! Replays render commands against a [`GpuDevice`], one at a time, on the
//! submitting thread.
//!
//! # Handle Resolution
//!
//! Every handle a command holds is resolved through the
//! [`ResourceRegistry`] *before* the first device call of that command. If
//! any required buffer or texture is missing, destroyed or not yet uploaded,
//! the command is skipped as a whole and logged at `debug`; the frame goes
//! on. Draws built in an earlier frame are skipped the same way: their
//! uniform regions and program may no longer be theirs.
//!
//! # Bind Elision
//!
//! The executor remembers the last bound program, vertex buffer, index
//! buffer and cull mode within the current pass and skips identical rebinds.
//! Beginning a pass resets the cache since native pass state does not carry
//! over.
//!
//! # Deferred Work
//!
//! Destroys only mark registry slots; native objects are released in
//! [`Executor::finish_frame`] after the device is idle. Texture downloads
//! complete through a channel and are delivered at the same point.

use glam::Mat4;
use rustc_hash::FxHashMap;
use smallvec::SmallVec;

use super::command::{BeginRenderPass, DrawCommand, ReadbackCallback, RenderCommand, RenderData};
use crate::backend::{
    ClearMode, DrawIndexed, GpuDevice, NativeBuffer, NativeSampler, NativeTexture, ProgramId,
    ReadbackId, ReadbackResult, RenderPassDesc, SamplerBinding, StorageBinding, Viewport,
};
use crate::material::{CullMode, TextureSlot};
use crate::memory::FrameAllocator;
use crate::render::state::StorageSlot;
use crate::resources::{
    BufferHandle, IndexFormat, ResourceRegistry, SamplerKey, TextureDesc, TextureHandle,
};
use crate::shader::ShaderStage;

/// Counters for one executed frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FrameStats {
    pub draws: u32,
    /// Draws dropped because a resource or target did not resolve.
    pub skipped_draws: u32,
    pub uploads: u32,
    pub passes: u32,
    pub readbacks: u32,
}

struct PendingRead {
    texture: TextureHandle,
    callback: ReadbackCallback,
}

/// Native objects a draw needs, resolved up front.
struct ResolvedDraw {
    vertex: NativeBuffer,
    index: NativeBuffer,
    vertex_samplers: SmallVec<[SamplerBinding; 4]>,
    fragment_samplers: SmallVec<[SamplerBinding; 4]>,
    vertex_storage: SmallVec<[StorageBinding; 2]>,
    fragment_storage: SmallVec<[StorageBinding; 2]>,
}

pub struct Executor {
    elide_redundant_binds: bool,

    last_program: Option<ProgramId>,
    last_vertex_buffer: Option<NativeBuffer>,
    last_index_buffer: Option<(NativeBuffer, IndexFormat)>,
    last_cull_mode: Option<CullMode>,

    pass_open: bool,
    /// Pass to resume after an upload or readback closed it mid-view.
    last_pass: Option<RenderPassDesc>,
    /// The current view's pass target failed to resolve; draws are skipped
    /// until the next pass begins.
    target_lost: bool,
    view: Mat4,
    projection: Mat4,

    samplers: FxHashMap<SamplerKey, NativeSampler>,

    next_readback: u64,
    pending_reads: FxHashMap<ReadbackId, PendingRead>,
    readback_tx: flume::Sender<ReadbackResult>,
    readback_rx: flume::Receiver<ReadbackResult>,

    retired_programs: Vec<ProgramId>,
    /// Frame being replayed; draws packed in any other frame are stale.
    frame_index: u64,
    stats: FrameStats,
}

impl Executor {
    #[must_use]
    pub fn new(elide_redundant_binds: bool) -> Self {
        let (readback_tx, readback_rx) = flume::unbounded();
        Self {
            elide_redundant_binds,
            last_program: None,
            last_vertex_buffer: None,
            last_index_buffer: None,
            last_cull_mode: None,
            pass_open: false,
            last_pass: None,
            target_lost: false,
            view: Mat4::IDENTITY,
            projection: Mat4::IDENTITY,
            samplers: FxHashMap::default(),
            next_readback: 1,
            pending_reads: FxHashMap::default(),
            readback_tx,
            readback_rx,
            retired_programs: Vec::new(),
            frame_index: 0,
            stats: FrameStats::default(),
        }
    }

    /// Counters accumulated since the last [`Executor::finish_frame`].
    #[inline]
    #[must_use]
    pub fn stats(&self) -> FrameStats {
        self.stats
    }

    #[inline]
    #[must_use]
    pub fn pending_reads(&self) -> usize {
        self.pending_reads.len()
    }

    /// Sets the frame whose allocator regions draws may reference.
    pub fn begin_frame(&mut self, frame: u64) {
        self.frame_index = frame;
    }

    /// Queues programs for release once the device is idle.
    pub fn retire_programs(&mut self, programs: impl IntoIterator<Item = ProgramId>) {
        self.retired_programs.extend(programs);
    }

    /// Starts replaying a new view: closes any open pass and forgets the
    /// previous view's target and camera.
    pub fn begin_view<D: GpuDevice + ?Sized>(&mut self, device: &mut D) {
        self.end_pass(device);
        self.last_pass = None;
        self.target_lost = false;
        self.view = Mat4::IDENTITY;
        self.projection = Mat4::IDENTITY;
    }

    pub fn execute<D: GpuDevice + ?Sized>(
        &mut self,
        device: &mut D,
        registry: &mut ResourceRegistry,
        frame: &mut FrameAllocator,
        command: RenderCommand,
    ) {
        match command {
            RenderCommand::BeginRenderPass(pass) => self.begin_pass(device, registry, &pass),
            RenderCommand::Draw(draw) => self.draw(device, registry, frame, &draw, None),
            RenderCommand::DrawIndirect(indirect) => self.draw(
                device,
                registry,
                frame,
                &indirect.draw,
                Some((indirect.indirect_buffer, indirect.offset, indirect.draw_count)),
            ),
            RenderCommand::UpdateBuffer { handle, data } => {
                self.update_buffer(device, registry, handle, &data);
            }
            RenderCommand::UpdateTexture { handle, data } => {
                self.update_texture(device, registry, handle, &data);
            }
            RenderCommand::DestroyBuffer(handle) => {
                if !registry.destroy_buffer(handle) {
                    log::debug!("DestroyBuffer: {handle:?} is not live");
                }
            }
            RenderCommand::DestroyTexture(handle) => self.destroy_texture(registry, handle),
            RenderCommand::ReadTexture { handle, callback } => {
                self.read_texture(device, registry, handle, callback);
            }
        }
    }

    // ========================================================================
    // Passes
    // ========================================================================

    fn begin_pass<D: GpuDevice + ?Sized>(
        &mut self,
        device: &mut D,
        registry: &ResourceRegistry,
        pass: &BeginRenderPass,
    ) {
        self.end_pass(device);
        self.view = pass.view;
        self.projection = pass.projection;

        let color = match pass.target {
            Some(handle) => match resolve_texture(registry, handle) {
                Some((native, desc)) => Some((native, desc.width, desc.height)),
                None => return self.lose_target("color", handle),
            },
            None => None,
        };
        let depth = match pass.depth {
            Some(handle) => match resolve_texture(registry, handle) {
                Some((native, _)) => Some(native),
                None => return self.lose_target("depth", handle),
            },
            None => None,
        };

        let (width, height) = color.map_or_else(|| device.surface_size(), |(_, w, h)| (w, h));
        let desc = RenderPassDesc {
            color: color.map(|(native, _, _)| native),
            depth,
            clear: pass.clear,
            clear_color: pass.clear_color,
            viewport: Viewport {
                x: pass.viewport.x * width as f32,
                y: pass.viewport.y * height as f32,
                width: pass.viewport.z * width as f32,
                height: pass.viewport.w * height as f32,
            },
        };

        self.target_lost = false;
        self.open_pass(device, desc);
    }

    fn lose_target(&mut self, kind: &str, handle: TextureHandle) {
        log::debug!("BeginRenderPass: {kind} target {handle:?} is not resident; skipping view pass");
        self.target_lost = true;
        self.last_pass = None;
    }

    fn open_pass<D: GpuDevice + ?Sized>(&mut self, device: &mut D, desc: RenderPassDesc) {
        device.begin_render_pass(&desc);
        self.pass_open = true;
        self.last_pass = Some(desc);
        self.stats.passes += 1;
        self.reset_bindings();
    }

    /// Reopens the interrupted pass with load operations, or a surface pass
    /// if the view never began one.
    fn ensure_pass<D: GpuDevice + ?Sized>(&mut self, device: &mut D) {
        if self.pass_open {
            return;
        }
        let desc = match self.last_pass {
            Some(desc) => RenderPassDesc {
                clear: ClearMode::None,
                ..desc
            },
            None => {
                let (width, height) = device.surface_size();
                RenderPassDesc {
                    color: None,
                    depth: None,
                    clear: ClearMode::None,
                    clear_color: glam::Vec4::ZERO,
                    viewport: Viewport {
                        x: 0.0,
                        y: 0.0,
                        width: width as f32,
                        height: height as f32,
                    },
                }
            }
        };
        self.open_pass(device, desc);
    }

    fn end_pass<D: GpuDevice + ?Sized>(&mut self, device: &mut D) {
        if self.pass_open {
            device.end_render_pass();
            self.pass_open = false;
        }
    }

    fn reset_bindings(&mut self) {
        self.last_program = None;
        self.last_vertex_buffer = None;
        self.last_index_buffer = None;
        self.last_cull_mode = None;
    }

    // ========================================================================
    // Draws
    // ========================================================================

    fn draw<D: GpuDevice + ?Sized>(
        &mut self,
        device: &mut D,
        registry: &ResourceRegistry,
        frame: &mut FrameAllocator,
        draw: &DrawCommand,
        indirect: Option<(BufferHandle, u64, u32)>,
    ) {
        if draw.frame != self.frame_index {
            log::debug!(
                "Draw skipped: packed in frame {}, replaying frame {}",
                draw.frame,
                self.frame_index
            );
            self.stats.skipped_draws += 1;
            return;
        }
        if self.target_lost {
            self.stats.skipped_draws += 1;
            return;
        }
        let Some(resolved) = self.resolve_draw(device, registry, draw) else {
            self.stats.skipped_draws += 1;
            return;
        };
        let indirect = match indirect {
            Some((handle, offset, count)) => match resolve_buffer(registry, handle) {
                Some(native) => Some((native, offset, count)),
                None => {
                    log::debug!("DrawIndirect: argument buffer {handle:?} is not resident");
                    self.stats.skipped_draws += 1;
                    return;
                }
            },
            None => None,
        };

        self.ensure_pass(device);
        let state = &draw.state;

        if !self.elide_redundant_binds || self.last_program != Some(draw.program) {
            device.bind_program(draw.program);
            self.last_program = Some(draw.program);
        }
        if !self.elide_redundant_binds || self.last_cull_mode != Some(draw.cull_mode) {
            device.set_cull_mode(draw.cull_mode);
            self.last_cull_mode = Some(draw.cull_mode);
        }
        if !self.elide_redundant_binds || self.last_vertex_buffer != Some(resolved.vertex) {
            device.bind_vertex_buffer(resolved.vertex);
            self.last_vertex_buffer = Some(resolved.vertex);
        }
        let index = (resolved.index, state.index_format);
        if !self.elide_redundant_binds || self.last_index_buffer != Some(index) {
            device.bind_index_buffer(index.0, index.1);
            self.last_index_buffer = Some(index);
        }

        if !resolved.vertex_samplers.is_empty() {
            device.bind_samplers(ShaderStage::Vertex, &resolved.vertex_samplers);
        }
        if !resolved.fragment_samplers.is_empty() {
            device.bind_samplers(ShaderStage::Fragment, &resolved.fragment_samplers);
        }
        if !resolved.vertex_storage.is_empty() {
            device.bind_storage_buffers(ShaderStage::Vertex, &resolved.vertex_storage);
        }
        if !resolved.fragment_storage.is_empty() {
            device.bind_storage_buffers(ShaderStage::Fragment, &resolved.fragment_storage);
        }

        if let Some(uniform) = draw.render_data.and_then(|i| draw.uniforms.get(i)) {
            let data = RenderData::new(state.world, self.view, self.projection, state.instance_offset);
            let src = bytemuck::bytes_of(&data);
            let dst = frame.region_mut(uniform.region);
            let len = src.len().min(dst.len());
            dst[..len].copy_from_slice(&src[..len]);
        }
        for uniform in &draw.uniforms {
            device.push_uniform_data(uniform.stage, uniform.binding, frame.region(uniform.region));
        }

        device.set_scissor(state.scissor);

        match indirect {
            Some((buffer, offset, count)) => device.draw_indexed_indirect(buffer, offset, count),
            None => device.draw_indexed(&DrawIndexed {
                index_count: state.index_count,
                instance_count: state.instance_count.max(1),
                first_index: state.start_index,
                base_vertex: state.start_vertex,
            }),
        }
        self.stats.draws += 1;
    }

    fn resolve_draw<D: GpuDevice + ?Sized>(
        &mut self,
        device: &mut D,
        registry: &ResourceRegistry,
        draw: &DrawCommand,
    ) -> Option<ResolvedDraw> {
        let state = &draw.state;
        let Some(vertex) = state.vertex_buffer.and_then(|h| resolve_buffer(registry, h)) else {
            log::debug!("Draw skipped: vertex buffer {:?} is not resident", state.vertex_buffer);
            return None;
        };
        let Some(index) = state.index_buffer.and_then(|h| resolve_buffer(registry, h)) else {
            log::debug!("Draw skipped: index buffer {:?} is not resident", state.index_buffer);
            return None;
        };

        Some(ResolvedDraw {
            vertex,
            index,
            vertex_samplers: self.resolve_samplers(device, registry, &draw.vertex_textures)?,
            fragment_samplers: self.resolve_samplers(device, registry, &draw.fragment_textures)?,
            vertex_storage: resolve_storage(registry, &state.vertex_storage_buffers)?,
            fragment_storage: resolve_storage(registry, &state.fragment_storage_buffers)?,
        })
    }

    fn resolve_samplers<D: GpuDevice + ?Sized>(
        &mut self,
        device: &mut D,
        registry: &ResourceRegistry,
        slots: &[TextureSlot],
    ) -> Option<SmallVec<[SamplerBinding; 4]>> {
        let mut out = SmallVec::with_capacity(slots.len());
        for slot in slots {
            let Some((texture, desc)) = resolve_texture(registry, slot.texture) else {
                log::debug!("Draw skipped: texture {:?} is not resident", slot.texture);
                return None;
            };
            let sampler = self.sampler(device, SamplerKey::from_flags(desc.flags))?;
            out.push(SamplerBinding {
                binding: slot.binding,
                texture,
                sampler,
            });
        }
        Some(out)
    }

    fn sampler<D: GpuDevice + ?Sized>(&mut self, device: &mut D, key: SamplerKey) -> Option<NativeSampler> {
        if let Some(&sampler) = self.samplers.get(&key) {
            return Some(sampler);
        }
        let Some(sampler) = device.create_sampler(key) else {
            log::warn!("Sampler creation failed for {key:?}");
            return None;
        };
        self.samplers.insert(key, sampler);
        Some(sampler)
    }

    // ========================================================================
    // Uploads
    // ========================================================================

    fn update_buffer<D: GpuDevice + ?Sized>(
        &mut self,
        device: &mut D,
        registry: &mut ResourceRegistry,
        handle: BufferHandle,
        data: &[u8],
    ) {
        if data.is_empty() {
            return;
        }
        let Some(res) = registry.buffer_mut(handle) else {
            log::debug!("UpdateBuffer: {handle:?} is not live");
            return;
        };
        self.end_pass(device);

        if res.native.is_none() || res.staging.is_none() || res.length != data.len() {
            if res.native.is_some() || res.staging.is_some() {
                device.wait_idle();
                if let Some(old) = res.native.take() {
                    device.release_buffer(old);
                }
                if let Some(old) = res.staging.take() {
                    device.release_staging(old);
                }
                res.length = 0;
            }

            let Some(native) = device.create_buffer(data.len(), res.usage) else {
                log::warn!("UpdateBuffer: cannot allocate {} bytes for {handle:?}", data.len());
                return;
            };
            let Some(staging) = device.create_staging(data.len()) else {
                device.release_buffer(native);
                log::warn!("UpdateBuffer: cannot allocate staging for {handle:?}");
                return;
            };
            res.native = Some(native);
            res.staging = Some(staging);
            res.length = data.len();
        }

        if let (Some(staging), Some(native)) = (res.staging, res.native) {
            device.upload_buffer(staging, native, data);
            self.stats.uploads += 1;
        }
    }

    fn update_texture<D: GpuDevice + ?Sized>(
        &mut self,
        device: &mut D,
        registry: &mut ResourceRegistry,
        handle: TextureHandle,
        data: &[u8],
    ) {
        if data.is_empty() {
            return;
        }
        let Some(res) = registry.texture_mut(handle) else {
            log::debug!("UpdateTexture: {handle:?} is not live");
            return;
        };
        let expected = res.desc.byte_length();
        if data.len() != expected {
            log::warn!(
                "UpdateTexture: {handle:?} expects {expected} bytes, got {}",
                data.len()
            );
            return;
        }
        self.end_pass(device);

        if res.native.is_none() || res.staging.is_none() || res.length != data.len() {
            if res.native.is_some() || res.staging.is_some() {
                device.wait_idle();
                if let Some(old) = res.native.take() {
                    device.release_texture(old);
                }
                if let Some(old) = res.staging.take() {
                    device.release_staging(old);
                }
                res.length = 0;
            }

            let Some(native) = device.create_texture(&res.desc) else {
                log::warn!(
                    "UpdateTexture: cannot allocate {}x{} texture for {handle:?}",
                    res.desc.width,
                    res.desc.height
                );
                return;
            };
            let Some(staging) = device.create_staging(data.len()) else {
                device.release_texture(native);
                log::warn!("UpdateTexture: cannot allocate staging for {handle:?}");
                return;
            };
            res.native = Some(native);
            res.staging = Some(staging);
            res.length = data.len();
        }

        if let (Some(staging), Some(native)) = (res.staging, res.native) {
            device.upload_texture(staging, native, &res.desc, data);
            self.stats.uploads += 1;
        }
    }

    // ========================================================================
    // Destroy & Readback
    // ========================================================================

    fn destroy_texture(&mut self, registry: &mut ResourceRegistry, handle: TextureHandle) {
        if !registry.destroy_texture(handle) {
            log::debug!("DestroyTexture: {handle:?} is not live");
            return;
        }
        let orphaned: SmallVec<[ReadbackId; 2]> = self
            .pending_reads
            .iter()
            .filter(|(_, read)| read.texture == handle)
            .map(|(&id, _)| id)
            .collect();
        for id in orphaned {
            if let Some(read) = self.pending_reads.remove(&id) {
                (read.callback)(None);
            }
        }
    }

    fn read_texture<D: GpuDevice + ?Sized>(
        &mut self,
        device: &mut D,
        registry: &ResourceRegistry,
        handle: TextureHandle,
        callback: ReadbackCallback,
    ) {
        let Some((native, desc)) = resolve_texture(registry, handle) else {
            log::debug!("ReadTexture: {handle:?} is not resident");
            callback(None);
            return;
        };
        self.end_pass(device);

        let id = ReadbackId(self.next_readback);
        self.next_readback += 1;
        self.pending_reads.insert(
            id,
            PendingRead {
                texture: handle,
                callback,
            },
        );
        device.download_texture(native, &desc, id, self.readback_tx.clone());
        self.stats.readbacks += 1;
    }

    fn deliver_readbacks(&mut self) {
        for (id, bytes) in self.readback_rx.try_iter() {
            match self.pending_reads.remove(&id) {
                Some(read) => (read.callback)(bytes),
                None => log::debug!("Readback {id:?} completed after its texture was destroyed"),
            }
        }
    }

    // ========================================================================
    // Frame End
    // ========================================================================

    /// Closes the frame: submits, waits for the device, releases deferred
    /// natives and delivers completed readbacks. Returns the frame's stats.
    pub fn finish_frame<D: GpuDevice + ?Sized>(
        &mut self,
        device: &mut D,
        registry: &mut ResourceRegistry,
    ) -> FrameStats {
        self.end_pass(device);
        self.last_pass = None;
        self.target_lost = false;
        self.reset_bindings();

        device.submit();
        device.wait_idle();

        let batch = registry.collect_garbage();
        for buffer in batch.buffers {
            device.release_buffer(buffer);
        }
        for texture in batch.textures {
            device.release_texture(texture);
        }
        for staging in batch.staging {
            device.release_staging(staging);
        }
        self.release_retired_programs(device);

        self.deliver_readbacks();
        std::mem::take(&mut self.stats)
    }

    /// Releases programs passed to [`Executor::retire_programs`]. The device
    /// must be idle.
    pub fn release_retired_programs<D: GpuDevice + ?Sized>(&mut self, device: &mut D) {
        for program in self.retired_programs.drain(..) {
            device.release_program(program);
        }
    }

    /// Fails every outstanding readback. Used at shutdown.
    pub fn cancel_readbacks(&mut self) {
        self.deliver_readbacks();
        for (_, read) in self.pending_reads.drain() {
            (read.callback)(None);
        }
    }
}

fn resolve_buffer(registry: &ResourceRegistry, handle: BufferHandle) -> Option<NativeBuffer> {
    registry.buffer(handle).and_then(|res| res.resident())
}

fn resolve_texture(
    registry: &ResourceRegistry,
    handle: TextureHandle,
) -> Option<(NativeTexture, TextureDesc)> {
    registry
        .texture(handle)
        .and_then(|res| res.resident().map(|native| (native, res.desc)))
}

fn resolve_storage(
    registry: &ResourceRegistry,
    slots: &[StorageSlot],
) -> Option<SmallVec<[StorageBinding; 2]>> {
    slots
        .iter()
        .map(|slot| {
            let buffer = resolve_buffer(registry, slot.buffer);
            if buffer.is_none() {
                log::debug!("Draw skipped: storage buffer {:?} is not resident", slot.buffer);
            }
            buffer.map(|buffer| StorageBinding {
                binding: slot.binding,
                buffer,
            })
        })
        .collect()
}
