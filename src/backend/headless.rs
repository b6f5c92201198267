//! Headless Device
//!
//! A [`GpuDevice`] with no GPU behind it. Every call is appended to a shared
//! [`DeviceLog`] and uploaded bytes are kept in memory, so replay order and
//! upload contents can be inspected after the device has been moved into a
//! [`RenderContext`](crate::render::RenderContext).
//!
//! ```rust,ignore
//! let device = HeadlessDevice::new(1280, 720);
//! let log = device.log();
//! let mut ctx = RenderContext::new(device, RhiSettings::default());
//! // ... record and end a frame ...
//! assert_eq!(log.draw_count(), 1);
//! ```

use std::sync::Arc;

use parking_lot::Mutex;
use rustc_hash::FxHashMap;

use super::{
    DrawIndexed, GpuDevice, NativeBuffer, NativeSampler, NativeStaging, NativeTexture, ProgramId,
    ReadbackId, ReadbackResult, RenderPassDesc, SamplerBinding, ScissorRect, StorageBinding,
};
use crate::material::CullMode;
use crate::resources::{BufferUsage, IndexFormat, SamplerKey, TextureDesc};
use crate::shader::{ShaderStage, ShaderVariantSource};

/// One recorded device call.
#[derive(Debug, Clone, PartialEq)]
pub enum DeviceCall {
    CreateBuffer { buffer: NativeBuffer, size: usize },
    CreateStaging { staging: NativeStaging, size: usize },
    UploadBuffer { buffer: NativeBuffer, size: usize },
    ReleaseBuffer(NativeBuffer),
    ReleaseStaging(NativeStaging),
    CreateTexture { texture: NativeTexture, width: u32, height: u32 },
    UploadTexture { texture: NativeTexture, size: usize },
    ReleaseTexture(NativeTexture),
    CreateSampler(NativeSampler),
    CreateProgram { program: ProgramId, key: String },
    ReleaseProgram(ProgramId),
    BeginRenderPass(RenderPassDesc),
    EndRenderPass,
    BindProgram(ProgramId),
    SetCullMode(CullMode),
    BindVertexBuffer(NativeBuffer),
    BindIndexBuffer(NativeBuffer, IndexFormat),
    BindSamplers { stage: ShaderStage, samplers: Vec<SamplerBinding> },
    BindStorageBuffers { stage: ShaderStage, buffers: Vec<StorageBinding> },
    PushUniformData { stage: ShaderStage, binding: u32, data: Vec<u8> },
    SetScissor(Option<ScissorRect>),
    DrawIndexed(DrawIndexed),
    DrawIndexedIndirect { buffer: NativeBuffer, offset: u64, draw_count: u32 },
    DownloadTexture(NativeTexture),
    Submit,
    WaitIdle,
}

/// Shared, cloneable view of a [`HeadlessDevice`]'s call log.
#[derive(Debug, Clone, Default)]
pub struct DeviceLog(Arc<Mutex<Vec<DeviceCall>>>);

impl DeviceLog {
    fn push(&self, call: DeviceCall) {
        self.0.lock().push(call);
    }

    /// Snapshot of every call recorded so far.
    #[must_use]
    pub fn calls(&self) -> Vec<DeviceCall> {
        self.0.lock().clone()
    }

    /// Recorded draw calls, direct and indirect.
    #[must_use]
    pub fn draws(&self) -> Vec<DeviceCall> {
        self.0
            .lock()
            .iter()
            .filter(|call| {
                matches!(
                    call,
                    DeviceCall::DrawIndexed(_) | DeviceCall::DrawIndexedIndirect { .. }
                )
            })
            .cloned()
            .collect()
    }

    #[must_use]
    pub fn draw_count(&self) -> usize {
        self.draws().len()
    }

    /// Number of recorded calls matching `predicate`.
    pub fn count(&self, predicate: impl Fn(&DeviceCall) -> bool) -> usize {
        self.0.lock().iter().filter(|call| predicate(call)).count()
    }

    pub fn clear(&self) {
        self.0.lock().clear();
    }
}

/// In-memory device for tests and offline tools.
pub struct HeadlessDevice {
    log: DeviceLog,
    next_id: u64,
    surface: (u32, u32),
    buffers: FxHashMap<NativeBuffer, Vec<u8>>,
    textures: FxHashMap<NativeTexture, Vec<u8>>,
    staging: FxHashMap<NativeStaging, usize>,
    fail_allocations: u32,
}

impl HeadlessDevice {
    #[must_use]
    pub fn new(surface_width: u32, surface_height: u32) -> Self {
        Self {
            log: DeviceLog::default(),
            next_id: 1,
            surface: (surface_width, surface_height),
            buffers: FxHashMap::default(),
            textures: FxHashMap::default(),
            staging: FxHashMap::default(),
            fail_allocations: 0,
        }
    }

    /// Handle to the call log that stays valid after the device is moved.
    #[must_use]
    pub fn log(&self) -> DeviceLog {
        self.log.clone()
    }

    /// Makes the next `count` buffer, staging or texture creations fail.
    pub fn fail_next_allocations(&mut self, count: u32) {
        self.fail_allocations = count;
    }

    /// Bytes last uploaded to `buffer`.
    #[must_use]
    pub fn buffer_contents(&self, buffer: NativeBuffer) -> Option<&[u8]> {
        self.buffers.get(&buffer).map(Vec::as_slice)
    }

    #[must_use]
    pub fn texture_contents(&self, texture: NativeTexture) -> Option<&[u8]> {
        self.textures.get(&texture).map(Vec::as_slice)
    }

    /// Native buffers currently alive.
    #[must_use]
    pub fn live_buffers(&self) -> usize {
        self.buffers.len()
    }

    #[must_use]
    pub fn live_textures(&self) -> usize {
        self.textures.len()
    }

    fn next(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    fn allocation_fails(&mut self) -> bool {
        if self.fail_allocations > 0 {
            self.fail_allocations -= 1;
            true
        } else {
            false
        }
    }
}

impl Default for HeadlessDevice {
    fn default() -> Self {
        Self::new(1, 1)
    }
}

impl GpuDevice for HeadlessDevice {
    fn create_buffer(&mut self, size: usize, _usage: BufferUsage) -> Option<NativeBuffer> {
        if self.allocation_fails() {
            return None;
        }
        let buffer = NativeBuffer(self.next());
        self.buffers.insert(buffer, vec![0; size]);
        self.log.push(DeviceCall::CreateBuffer { buffer, size });
        Some(buffer)
    }

    fn create_staging(&mut self, size: usize) -> Option<NativeStaging> {
        if self.allocation_fails() {
            return None;
        }
        let staging = NativeStaging(self.next());
        self.staging.insert(staging, size);
        self.log.push(DeviceCall::CreateStaging { staging, size });
        Some(staging)
    }

    fn upload_buffer(&mut self, _staging: NativeStaging, buffer: NativeBuffer, data: &[u8]) {
        if let Some(contents) = self.buffers.get_mut(&buffer) {
            let count = contents.len().min(data.len());
            contents[..count].copy_from_slice(&data[..count]);
        }
        self.log.push(DeviceCall::UploadBuffer {
            buffer,
            size: data.len(),
        });
    }

    fn release_buffer(&mut self, buffer: NativeBuffer) {
        self.buffers.remove(&buffer);
        self.log.push(DeviceCall::ReleaseBuffer(buffer));
    }

    fn release_staging(&mut self, staging: NativeStaging) {
        self.staging.remove(&staging);
        self.log.push(DeviceCall::ReleaseStaging(staging));
    }

    fn create_texture(&mut self, desc: &TextureDesc) -> Option<NativeTexture> {
        if self.allocation_fails() {
            return None;
        }
        let texture = NativeTexture(self.next());
        self.textures.insert(texture, vec![0; desc.byte_length()]);
        self.log.push(DeviceCall::CreateTexture {
            texture,
            width: desc.width,
            height: desc.height,
        });
        Some(texture)
    }

    fn upload_texture(
        &mut self,
        _staging: NativeStaging,
        texture: NativeTexture,
        _desc: &TextureDesc,
        data: &[u8],
    ) {
        if let Some(contents) = self.textures.get_mut(&texture) {
            let count = contents.len().min(data.len());
            contents[..count].copy_from_slice(&data[..count]);
        }
        self.log.push(DeviceCall::UploadTexture {
            texture,
            size: data.len(),
        });
    }

    fn release_texture(&mut self, texture: NativeTexture) {
        self.textures.remove(&texture);
        self.log.push(DeviceCall::ReleaseTexture(texture));
    }

    fn create_sampler(&mut self, _key: SamplerKey) -> Option<NativeSampler> {
        let sampler = NativeSampler(self.next());
        self.log.push(DeviceCall::CreateSampler(sampler));
        Some(sampler)
    }

    fn create_program(&mut self, source: &ShaderVariantSource) -> Option<ProgramId> {
        let program = ProgramId(self.next());
        self.log.push(DeviceCall::CreateProgram {
            program,
            key: source.key.clone(),
        });
        Some(program)
    }

    fn release_program(&mut self, program: ProgramId) {
        self.log.push(DeviceCall::ReleaseProgram(program));
    }

    fn begin_render_pass(&mut self, desc: &RenderPassDesc) {
        self.log.push(DeviceCall::BeginRenderPass(*desc));
    }

    fn end_render_pass(&mut self) {
        self.log.push(DeviceCall::EndRenderPass);
    }

    fn surface_size(&self) -> (u32, u32) {
        self.surface
    }

    fn bind_program(&mut self, program: ProgramId) {
        self.log.push(DeviceCall::BindProgram(program));
    }

    fn set_cull_mode(&mut self, cull_mode: CullMode) {
        self.log.push(DeviceCall::SetCullMode(cull_mode));
    }

    fn bind_vertex_buffer(&mut self, buffer: NativeBuffer) {
        self.log.push(DeviceCall::BindVertexBuffer(buffer));
    }

    fn bind_index_buffer(&mut self, buffer: NativeBuffer, format: IndexFormat) {
        self.log.push(DeviceCall::BindIndexBuffer(buffer, format));
    }

    fn bind_samplers(&mut self, stage: ShaderStage, samplers: &[SamplerBinding]) {
        self.log.push(DeviceCall::BindSamplers {
            stage,
            samplers: samplers.to_vec(),
        });
    }

    fn bind_storage_buffers(&mut self, stage: ShaderStage, buffers: &[StorageBinding]) {
        self.log.push(DeviceCall::BindStorageBuffers {
            stage,
            buffers: buffers.to_vec(),
        });
    }

    fn push_uniform_data(&mut self, stage: ShaderStage, binding: u32, data: &[u8]) {
        self.log.push(DeviceCall::PushUniformData {
            stage,
            binding,
            data: data.to_vec(),
        });
    }

    fn set_scissor(&mut self, rect: Option<ScissorRect>) {
        self.log.push(DeviceCall::SetScissor(rect));
    }

    fn draw_indexed(&mut self, draw: &DrawIndexed) {
        self.log.push(DeviceCall::DrawIndexed(*draw));
    }

    fn draw_indexed_indirect(&mut self, buffer: NativeBuffer, offset: u64, draw_count: u32) {
        self.log.push(DeviceCall::DrawIndexedIndirect {
            buffer,
            offset,
            draw_count,
        });
    }

    fn download_texture(
        &mut self,
        texture: NativeTexture,
        _desc: &TextureDesc,
        id: ReadbackId,
        completion: flume::Sender<ReadbackResult>,
    ) {
        self.log.push(DeviceCall::DownloadTexture(texture));
        let bytes = self.textures.get(&texture).cloned();
        if completion.send((id, bytes)).is_err() {
            log::debug!("Readback receiver dropped before completion of {id:?}");
        }
    }

    fn submit(&mut self) {
        self.log.push(DeviceCall::Submit);
    }

    fn wait_idle(&mut self) {
        self.log.push(DeviceCall::WaitIdle);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resources::TextureFormat;

    #[test]
    fn uploads_are_kept() {
        let mut device = HeadlessDevice::default();
        let buffer = device.create_buffer(4, BufferUsage::VERTEX).unwrap();
        let staging = device.create_staging(4).unwrap();
        device.upload_buffer(staging, buffer, &[1, 2, 3, 4]);

        assert_eq!(device.buffer_contents(buffer), Some(&[1u8, 2, 3, 4][..]));
        device.release_buffer(buffer);
        assert_eq!(device.buffer_contents(buffer), None);
    }

    #[test]
    fn injected_failures_are_consumed() {
        let mut device = HeadlessDevice::default();
        device.fail_next_allocations(1);
        assert!(device.create_buffer(4, BufferUsage::VERTEX).is_none());
        assert!(device.create_buffer(4, BufferUsage::VERTEX).is_some());
    }

    #[test]
    fn log_survives_device_move() {
        let device = HeadlessDevice::default();
        let log = device.log();
        let mut moved = device;
        moved.submit();
        assert_eq!(log.calls(), vec![DeviceCall::Submit]);
    }

    #[test]
    fn download_reports_contents() {
        let mut device = HeadlessDevice::default();
        let desc = TextureDesc::new(1, 1, TextureFormat::Rgba8Unorm);
        let texture = device.create_texture(&desc).unwrap();
        let staging = device.create_staging(4).unwrap();
        device.upload_texture(staging, texture, &desc, &[9, 8, 7, 6]);

        let (tx, rx) = flume::unbounded();
        device.download_texture(texture, &desc, ReadbackId(5), tx);
        assert_eq!(rx.try_recv().unwrap(), (ReadbackId(5), Some(vec![9, 8, 7, 6])));
    }
}
