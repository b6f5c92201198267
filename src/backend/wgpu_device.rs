//! wgpu Device
//!
//! [`GpuDevice`] over `wgpu`. Draws are recorded while a pass is open and
//! encoded when it ends, because a `wgpu::RenderPass` borrows every object
//! bound to it.
//!
//! # Binding Convention
//!
//! WGSL variant sources must follow this layout:
//!
//! | Group | Contents |
//! |-------|----------|
//! | 0 | Vertex uniform blocks at their declared binding (dynamic offset) |
//! | 1 | Fragment uniform blocks at their declared binding (dynamic offset) |
//! | 2 | Vertex textures: texture `n` at `2n`, its sampler at `2n + 1`; storage buffer `i` at `64 + i` |
//! | 3 | Fragment textures and storage buffers, same layout as group 2 |
//!
//! Vertex buffer slot 0 carries the variant's vertex layout.
//!
//! # Surface
//!
//! Passes without a color target render into an offscreen surface texture
//! owned by the device ([`WgpuDevice::surface_texture`]). Hosts presenting
//! to a window copy from it.

use std::borrow::Cow;

use rustc_hash::FxHashMap;
use smallvec::SmallVec;

use super::{
    ClearMode, DrawIndexed, GpuDevice, NativeBuffer, NativeSampler, NativeStaging, NativeTexture,
    ProgramId, ReadbackId, ReadbackResult, RenderPassDesc, SamplerBinding, ScissorRect,
    StorageBinding,
};
use crate::errors::{Result, RhiError};
use crate::material::CullMode;
use crate::resources::{
    BufferUsage, IndexFormat, SamplerKey, TextureDesc, TextureFlags, TextureFormat,
};
use crate::shader::{ShaderStage, ShaderVariantSource, VertexFormat};

const UNIFORM_ALIGNMENT: usize = 256;
const STORAGE_BINDING_BASE: u32 = 64;
/// Size of one `DrawIndexedIndirect` argument record.
const INDIRECT_STRIDE: u64 = 20;

const fn stage_index(stage: ShaderStage) -> usize {
    match stage {
        ShaderStage::Vertex => 0,
        ShaderStage::Fragment => 1,
    }
}

// ─── Conversions ──────────────────────────────────────────────────────────────

fn texture_format(format: TextureFormat) -> wgpu::TextureFormat {
    match format {
        TextureFormat::Rgba8Unorm => wgpu::TextureFormat::Rgba8Unorm,
        TextureFormat::Bgra8Unorm => wgpu::TextureFormat::Bgra8Unorm,
        TextureFormat::R8Unorm => wgpu::TextureFormat::R8Unorm,
        TextureFormat::Rgba16Float => wgpu::TextureFormat::Rgba16Float,
        TextureFormat::Rgba32Float => wgpu::TextureFormat::Rgba32Float,
        TextureFormat::Depth32Float => wgpu::TextureFormat::Depth32Float,
    }
}

fn index_format(format: IndexFormat) -> wgpu::IndexFormat {
    match format {
        IndexFormat::Uint16 => wgpu::IndexFormat::Uint16,
        IndexFormat::Uint32 => wgpu::IndexFormat::Uint32,
    }
}

fn vertex_format(format: VertexFormat) -> wgpu::VertexFormat {
    match format {
        VertexFormat::Float32 => wgpu::VertexFormat::Float32,
        VertexFormat::Float32x2 => wgpu::VertexFormat::Float32x2,
        VertexFormat::Float32x3 => wgpu::VertexFormat::Float32x3,
        VertexFormat::Float32x4 => wgpu::VertexFormat::Float32x4,
        VertexFormat::Unorm8x4 => wgpu::VertexFormat::Unorm8x4,
        VertexFormat::Uint16x4 => wgpu::VertexFormat::Uint16x4,
    }
}

fn cull_face(cull_mode: CullMode) -> Option<wgpu::Face> {
    match cull_mode {
        CullMode::None => None,
        CullMode::Back => Some(wgpu::Face::Back),
        CullMode::Front => Some(wgpu::Face::Front),
    }
}

fn buffer_usages(usage: BufferUsage) -> wgpu::BufferUsages {
    let mut out = wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::COPY_SRC;
    if usage.contains(BufferUsage::VERTEX) {
        out |= wgpu::BufferUsages::VERTEX;
    }
    if usage.contains(BufferUsage::INDEX) {
        out |= wgpu::BufferUsages::INDEX;
    }
    if usage.contains(BufferUsage::INDIRECT) {
        out |= wgpu::BufferUsages::INDIRECT;
    }
    if usage.intersects(
        BufferUsage::GRAPHICS_READ | BufferUsage::COMPUTE_READ | BufferUsage::COMPUTE_WRITE,
    ) {
        out |= wgpu::BufferUsages::STORAGE;
    }
    out
}

fn address_mode(flags: TextureFlags, repeat: TextureFlags, mirror: TextureFlags) -> wgpu::AddressMode {
    if flags.contains(mirror) {
        wgpu::AddressMode::MirrorRepeat
    } else if flags.contains(repeat) {
        wgpu::AddressMode::Repeat
    } else {
        wgpu::AddressMode::ClampToEdge
    }
}

/// Copies `data` into a 4-byte aligned buffer when needed by `write_buffer`.
fn aligned(data: &[u8]) -> Cow<'_, [u8]> {
    let align = wgpu::COPY_BUFFER_ALIGNMENT as usize;
    if data.len() % align == 0 {
        Cow::Borrowed(data)
    } else {
        let mut padded = data.to_vec();
        padded.resize(data.len().next_multiple_of(align), 0);
        Cow::Owned(padded)
    }
}

// ─── Device State ─────────────────────────────────────────────────────────────

struct TextureEntry {
    texture: wgpu::Texture,
    view: wgpu::TextureView,
    format: wgpu::TextureFormat,
    size: (u32, u32),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct PipelineKey {
    cull_mode: CullMode,
    color: wgpu::TextureFormat,
    depth: Option<wgpu::TextureFormat>,
}

struct ProgramEntry {
    label: String,
    vertex_module: wgpu::ShaderModule,
    fragment_module: wgpu::ShaderModule,
    vertex_entry: String,
    fragment_entry: String,
    layouts: [wgpu::BindGroupLayout; 4],
    pipeline_layout: wgpu::PipelineLayout,
    vertex_stride: u64,
    vertex_attributes: Vec<wgpu::VertexAttribute>,
    /// `(binding, size)` per stage, sorted by binding.
    uniform_blocks: [Vec<(u32, u64)>; 2],
    texture_bindings: [Vec<u32>; 2],
    storage_buffers: [u32; 2],
    pipelines: FxHashMap<PipelineKey, wgpu::RenderPipeline>,
}

#[derive(Debug, Clone, Copy)]
enum DrawKind {
    Direct(DrawIndexed),
    Indirect {
        buffer: NativeBuffer,
        offset: u64,
        draw_count: u32,
    },
}

/// Bindings set since the pass began, snapshotted by every draw.
#[derive(Debug, Clone, Default)]
struct BindingState {
    program: Option<ProgramId>,
    cull_mode: CullMode,
    vertex: Option<NativeBuffer>,
    index: Option<(NativeBuffer, IndexFormat)>,
    /// `(binding, offset into the frame uniform buffer)` per stage.
    uniforms: [SmallVec<[(u32, u32); 4]>; 2],
    samplers: [SmallVec<[SamplerBinding; 4]>; 2],
    storage: [SmallVec<[StorageBinding; 2]>; 2],
    scissor: Option<ScissorRect>,
}

struct RecordedDraw {
    state: BindingState,
    kind: DrawKind,
}

struct PreparedDraw {
    pipeline: wgpu::RenderPipeline,
    groups: [wgpu::BindGroup; 4],
    offsets: [SmallVec<[u32; 4]>; 2],
    vertex: wgpu::Buffer,
    index: wgpu::Buffer,
    index_format: wgpu::IndexFormat,
    indirect: Option<wgpu::Buffer>,
    scissor: Option<ScissorRect>,
    kind: DrawKind,
}

struct PendingDownload {
    id: ReadbackId,
    buffer: wgpu::Buffer,
    desc: TextureDesc,
    padded_row: u32,
    completion: flume::Sender<ReadbackResult>,
}

pub struct WgpuDevice {
    device: wgpu::Device,
    queue: wgpu::Queue,
    next_id: u64,

    buffers: FxHashMap<NativeBuffer, wgpu::Buffer>,
    staging: FxHashMap<NativeStaging, usize>,
    textures: FxHashMap<NativeTexture, TextureEntry>,
    samplers: FxHashMap<NativeSampler, wgpu::Sampler>,
    programs: FxHashMap<ProgramId, ProgramEntry>,
    surface: TextureEntry,

    frame_uniforms: Vec<u8>,
    uploaded_uniforms: usize,
    uniform_buffer: wgpu::Buffer,
    uniform_capacity: u64,
    max_block_size: u64,

    current_pass: Option<RenderPassDesc>,
    state: BindingState,
    draws: Vec<RecordedDraw>,
    command_buffers: Vec<wgpu::CommandBuffer>,
    downloads: Vec<PendingDownload>,
}

impl WgpuDevice {
    /// Wraps an existing device. Passes without a color target render into
    /// a `width` × `height` offscreen surface.
    #[must_use]
    pub fn from_device(device: wgpu::Device, queue: wgpu::Queue, width: u32, height: u32) -> Self {
        let surface = Self::make_texture(
            &device,
            "Myth RHI Surface",
            &TextureDesc::new(width.max(1), height.max(1), TextureFormat::Rgba8Unorm)
                .with_flags(TextureFlags::LINEAR_FILTER | TextureFlags::COLOR_TARGET),
        );
        let uniform_capacity = 64 * 1024;
        let uniform_buffer = Self::make_uniform_buffer(&device, uniform_capacity);

        Self {
            device,
            queue,
            next_id: 1,
            buffers: FxHashMap::default(),
            staging: FxHashMap::default(),
            textures: FxHashMap::default(),
            samplers: FxHashMap::default(),
            programs: FxHashMap::default(),
            surface,
            frame_uniforms: Vec::new(),
            uploaded_uniforms: 0,
            uniform_buffer,
            uniform_capacity,
            max_block_size: 256,
            current_pass: None,
            state: BindingState::default(),
            draws: Vec::new(),
            command_buffers: Vec::new(),
            downloads: Vec::new(),
        }
    }

    /// Requests an adapter and device without a window.
    pub fn new_headless(width: u32, height: u32) -> Result<Self> {
        let instance = wgpu::Instance::default();
        let adapter = pollster::block_on(instance.request_adapter(&wgpu::RequestAdapterOptions {
            power_preference: wgpu::PowerPreference::HighPerformance,
            compatible_surface: None,
            force_fallback_adapter: false,
        }))
        .map_err(|e| RhiError::Backend(e.to_string()))?;

        let (device, queue) = pollster::block_on(adapter.request_device(&wgpu::DeviceDescriptor {
            label: Some("Myth RHI Device"),
            required_features: wgpu::Features::empty(),
            required_limits: wgpu::Limits::default(),
            memory_hints: wgpu::MemoryHints::Performance,
            ..Default::default()
        }))
        .map_err(|e| RhiError::Backend(e.to_string()))?;

        log::info!("wgpu device ready on {}", adapter.get_info().name);
        Ok(Self::from_device(device, queue, width, height))
    }

    #[must_use]
    pub fn device(&self) -> &wgpu::Device {
        &self.device
    }

    #[must_use]
    pub fn queue(&self) -> &wgpu::Queue {
        &self.queue
    }

    /// Offscreen target of passes without a color texture.
    #[must_use]
    pub fn surface_texture(&self) -> &wgpu::Texture {
        &self.surface.texture
    }

    fn next(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    fn make_texture(device: &wgpu::Device, label: &str, desc: &TextureDesc) -> TextureEntry {
        let format = texture_format(desc.format);
        let mut usage = wgpu::TextureUsages::TEXTURE_BINDING
            | wgpu::TextureUsages::COPY_DST
            | wgpu::TextureUsages::COPY_SRC;
        if desc.format.is_depth()
            || desc
                .flags
                .intersects(TextureFlags::COLOR_TARGET | TextureFlags::DEPTH_TARGET)
        {
            usage |= wgpu::TextureUsages::RENDER_ATTACHMENT;
        }

        let texture = device.create_texture(&wgpu::TextureDescriptor {
            label: Some(label),
            size: wgpu::Extent3d {
                width: desc.width,
                height: desc.height,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format,
            usage,
            view_formats: &[],
        });
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        TextureEntry {
            texture,
            view,
            format,
            size: (desc.width, desc.height),
        }
    }

    fn make_uniform_buffer(device: &wgpu::Device, size: u64) -> wgpu::Buffer {
        device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Myth RHI Frame Uniforms"),
            size,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        })
    }

    // ========================================================================
    // Uniforms
    // ========================================================================

    /// Uploads uniform bytes pushed since the last flush, growing the frame
    /// uniform buffer if needed.
    fn flush_uniforms(&mut self) {
        let required = self.frame_uniforms.len() as u64 + self.max_block_size;
        if required > self.uniform_capacity {
            let capacity = required.next_power_of_two();
            log::debug!(
                "Frame uniform buffer grows {} -> {} bytes",
                self.uniform_capacity,
                capacity
            );
            self.uniform_buffer = Self::make_uniform_buffer(&self.device, capacity);
            self.uniform_capacity = capacity;
            self.uploaded_uniforms = 0;
        }

        if self.uploaded_uniforms < self.frame_uniforms.len() {
            self.queue.write_buffer(
                &self.uniform_buffer,
                self.uploaded_uniforms as u64,
                &self.frame_uniforms[self.uploaded_uniforms..],
            );
            self.uploaded_uniforms = self.frame_uniforms.len();
        }
    }

    // ========================================================================
    // Programs & Pipelines
    // ========================================================================

    fn bind_group_layout(
        &self,
        label: &str,
        stage: ShaderStage,
        source: &ShaderVariantSource,
        uniforms: bool,
    ) -> wgpu::BindGroupLayout {
        let visibility = match stage {
            ShaderStage::Vertex => wgpu::ShaderStages::VERTEX,
            ShaderStage::Fragment => wgpu::ShaderStages::FRAGMENT,
        };
        let stage_source = source.stage(stage);
        let mut entries = Vec::new();

        if uniforms {
            for block in &stage_source.uniform_blocks {
                entries.push(wgpu::BindGroupLayoutEntry {
                    binding: block.binding,
                    visibility,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Uniform,
                        has_dynamic_offset: true,
                        min_binding_size: wgpu::BufferSize::new(u64::from(block.size)),
                    },
                    count: None,
                });
            }
        } else {
            for texture in &stage_source.textures {
                entries.push(wgpu::BindGroupLayoutEntry {
                    binding: texture.binding * 2,
                    visibility,
                    ty: wgpu::BindingType::Texture {
                        sample_type: wgpu::TextureSampleType::Float { filterable: true },
                        view_dimension: wgpu::TextureViewDimension::D2,
                        multisampled: false,
                    },
                    count: None,
                });
                entries.push(wgpu::BindGroupLayoutEntry {
                    binding: texture.binding * 2 + 1,
                    visibility,
                    ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
                    count: None,
                });
            }
            for i in 0..stage_source.storage_buffers {
                entries.push(wgpu::BindGroupLayoutEntry {
                    binding: STORAGE_BINDING_BASE + i,
                    visibility,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Storage { read_only: true },
                        has_dynamic_offset: false,
                        min_binding_size: None,
                    },
                    count: None,
                });
            }
        }

        self.device
            .create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                label: Some(label),
                entries: &entries,
            })
    }

    fn pipeline(&mut self, program: ProgramId, key: PipelineKey) -> Option<wgpu::RenderPipeline> {
        let entry = self.programs.get_mut(&program)?;
        if let Some(pipeline) = entry.pipelines.get(&key) {
            return Some(pipeline.clone());
        }

        let vertex_buffers = [wgpu::VertexBufferLayout {
            array_stride: entry.vertex_stride,
            step_mode: wgpu::VertexStepMode::Vertex,
            attributes: &entry.vertex_attributes,
        }];
        let buffers: &[wgpu::VertexBufferLayout] = if entry.vertex_attributes.is_empty() {
            &[]
        } else {
            &vertex_buffers
        };

        let pipeline = self.device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some(&entry.label),
            layout: Some(&entry.pipeline_layout),
            vertex: wgpu::VertexState {
                module: &entry.vertex_module,
                entry_point: Some(&entry.vertex_entry),
                buffers,
                compilation_options: wgpu::PipelineCompilationOptions::default(),
            },
            fragment: Some(wgpu::FragmentState {
                module: &entry.fragment_module,
                entry_point: Some(&entry.fragment_entry),
                targets: &[Some(wgpu::ColorTargetState {
                    format: key.color,
                    blend: Some(wgpu::BlendState::ALPHA_BLENDING),
                    write_mask: wgpu::ColorWrites::ALL,
                })],
                compilation_options: wgpu::PipelineCompilationOptions::default(),
            }),
            primitive: wgpu::PrimitiveState {
                topology: wgpu::PrimitiveTopology::TriangleList,
                front_face: wgpu::FrontFace::Ccw,
                cull_mode: cull_face(key.cull_mode),
                ..Default::default()
            },
            depth_stencil: key.depth.map(|format| wgpu::DepthStencilState {
                format,
                depth_write_enabled: true,
                depth_compare: wgpu::CompareFunction::Less,
                stencil: wgpu::StencilState::default(),
                bias: wgpu::DepthBiasState::default(),
            }),
            multisample: wgpu::MultisampleState::default(),
            multiview_mask: None,
            cache: None,
        });

        entry.pipelines.insert(key, pipeline.clone());
        Some(pipeline)
    }

    // ========================================================================
    // Pass Encoding
    // ========================================================================

    fn prepare_draw(&mut self, draw: &RecordedDraw, key: PipelineKey) -> Option<PreparedDraw> {
        let state = &draw.state;
        let program = state.program?;
        let pipeline = self.pipeline(
            program,
            PipelineKey {
                cull_mode: state.cull_mode,
                ..key
            },
        )?;
        let entry = self.programs.get(&program)?;

        let vertex = self.buffers.get(&state.vertex?)?.clone();
        let (index_native, format) = state.index?;
        let index = self.buffers.get(&index_native)?.clone();
        let indirect = match draw.kind {
            DrawKind::Indirect { buffer, .. } => Some(self.buffers.get(&buffer)?.clone()),
            DrawKind::Direct(_) => None,
        };

        let mut offsets: [SmallVec<[u32; 4]>; 2] = Default::default();
        let mut uniform_groups: SmallVec<[wgpu::BindGroup; 2]> = SmallVec::new();
        for stage in [ShaderStage::Vertex, ShaderStage::Fragment] {
            let s = stage_index(stage);
            let entries: Vec<wgpu::BindGroupEntry> = entry.uniform_blocks[s]
                .iter()
                .map(|&(binding, size)| wgpu::BindGroupEntry {
                    binding,
                    resource: wgpu::BindingResource::Buffer(wgpu::BufferBinding {
                        buffer: &self.uniform_buffer,
                        offset: 0,
                        size: wgpu::BufferSize::new(size),
                    }),
                })
                .collect();
            for &(binding, _) in &entry.uniform_blocks[s] {
                let offset = state.uniforms[s]
                    .iter()
                    .find(|&&(b, _)| b == binding)
                    .map_or(0, |&(_, offset)| offset);
                offsets[s].push(offset);
            }
            uniform_groups.push(self.device.create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some("Myth RHI Uniforms"),
                layout: &entry.layouts[s],
                entries: &entries,
            }));
        }

        let mut resource_groups: SmallVec<[wgpu::BindGroup; 2]> = SmallVec::new();
        for stage in [ShaderStage::Vertex, ShaderStage::Fragment] {
            let s = stage_index(stage);
            let mut entries = Vec::new();
            for &binding in &entry.texture_bindings[s] {
                let Some(slot) = state.samplers[s].iter().find(|slot| slot.binding == binding) else {
                    log::debug!("{}: texture binding {binding} not bound; draw dropped", entry.label);
                    return None;
                };
                let texture = self.textures.get(&slot.texture)?;
                let sampler = self.samplers.get(&slot.sampler)?;
                entries.push(wgpu::BindGroupEntry {
                    binding: binding * 2,
                    resource: wgpu::BindingResource::TextureView(&texture.view),
                });
                entries.push(wgpu::BindGroupEntry {
                    binding: binding * 2 + 1,
                    resource: wgpu::BindingResource::Sampler(sampler),
                });
            }
            for i in 0..entry.storage_buffers[s] {
                let Some(slot) = state.storage[s].iter().find(|slot| slot.binding == i) else {
                    log::debug!("{}: storage binding {i} not bound; draw dropped", entry.label);
                    return None;
                };
                entries.push(wgpu::BindGroupEntry {
                    binding: STORAGE_BINDING_BASE + i,
                    resource: self.buffers.get(&slot.buffer)?.as_entire_binding(),
                });
            }
            resource_groups.push(self.device.create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some("Myth RHI Resources"),
                layout: &entry.layouts[2 + s],
                entries: &entries,
            }));
        }

        let [vertex_uniforms, fragment_uniforms]: [wgpu::BindGroup; 2] =
            uniform_groups.into_inner().ok()?;
        let [vertex_resources, fragment_resources]: [wgpu::BindGroup; 2] =
            resource_groups.into_inner().ok()?;

        Some(PreparedDraw {
            pipeline,
            groups: [
                vertex_uniforms,
                fragment_uniforms,
                vertex_resources,
                fragment_resources,
            ],
            offsets,
            vertex,
            index,
            index_format: index_format(format),
            indirect,
            scissor: state.scissor,
            kind: draw.kind,
        })
    }

    fn encode_pass(&mut self, desc: RenderPassDesc, draws: Vec<RecordedDraw>) {
        self.flush_uniforms();

        let (color_format, target_size) = match desc.color {
            Some(texture) => match self.textures.get(&texture) {
                Some(entry) => (entry.format, entry.size),
                None => {
                    log::warn!("Render pass color target {texture:?} no longer exists");
                    return;
                }
            },
            None => (self.surface.format, self.surface.size),
        };
        let depth_format = match desc.depth {
            Some(texture) => match self.textures.get(&texture) {
                Some(entry) => Some(entry.format),
                None => {
                    log::warn!("Render pass depth target {texture:?} no longer exists");
                    return;
                }
            },
            None => None,
        };

        let key = PipelineKey {
            cull_mode: CullMode::Back,
            color: color_format,
            depth: depth_format,
        };
        let prepared: Vec<PreparedDraw> = draws
            .iter()
            .filter_map(|draw| self.prepare_draw(draw, key))
            .collect();

        let color_view = match desc.color.and_then(|t| self.textures.get(&t)) {
            Some(entry) => &entry.view,
            None => &self.surface.view,
        };
        let depth_view = desc
            .depth
            .and_then(|t| self.textures.get(&t))
            .map(|entry| &entry.view);

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("Myth RHI Pass Encoder"),
            });
        {
            let c = desc.clear_color;
            let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("Myth RHI Pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: color_view,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: match desc.clear {
                            ClearMode::All => wgpu::LoadOp::Clear(wgpu::Color {
                                r: f64::from(c.x),
                                g: f64::from(c.y),
                                b: f64::from(c.z),
                                a: f64::from(c.w),
                            }),
                            ClearMode::None | ClearMode::Depth => wgpu::LoadOp::Load,
                        },
                        store: wgpu::StoreOp::Store,
                    },
                    depth_slice: None,
                })],
                depth_stencil_attachment: depth_view.map(|view| {
                    wgpu::RenderPassDepthStencilAttachment {
                        view,
                        depth_ops: Some(wgpu::Operations {
                            load: match desc.clear {
                                ClearMode::None => wgpu::LoadOp::Load,
                                ClearMode::Depth | ClearMode::All => wgpu::LoadOp::Clear(1.0),
                            },
                            store: wgpu::StoreOp::Store,
                        }),
                        stencil_ops: None,
                    }
                }),
                timestamp_writes: None,
                occlusion_query_set: None,
                multiview_mask: None,
            });

            let vp = desc.viewport;
            let (tw, th) = (target_size.0 as f32, target_size.1 as f32);
            let x = vp.x.clamp(0.0, tw - 1.0);
            let y = vp.y.clamp(0.0, th - 1.0);
            pass.set_viewport(
                x,
                y,
                vp.width.clamp(1.0, tw - x),
                vp.height.clamp(1.0, th - y),
                0.0,
                1.0,
            );

            for draw in &prepared {
                pass.set_pipeline(&draw.pipeline);
                pass.set_bind_group(0, &draw.groups[0], &draw.offsets[0]);
                pass.set_bind_group(1, &draw.groups[1], &draw.offsets[1]);
                pass.set_bind_group(2, &draw.groups[2], &[]);
                pass.set_bind_group(3, &draw.groups[3], &[]);
                pass.set_vertex_buffer(0, draw.vertex.slice(..));
                pass.set_index_buffer(draw.index.slice(..), draw.index_format);

                match draw.scissor {
                    Some(rect) => {
                        let x = rect.x.min(target_size.0);
                        let y = rect.y.min(target_size.1);
                        pass.set_scissor_rect(
                            x,
                            y,
                            rect.width.min(target_size.0 - x),
                            rect.height.min(target_size.1 - y),
                        );
                    }
                    None => pass.set_scissor_rect(0, 0, target_size.0, target_size.1),
                }

                match (draw.kind, &draw.indirect) {
                    (DrawKind::Direct(d), _) => pass.draw_indexed(
                        d.first_index..d.first_index + d.index_count,
                        d.base_vertex,
                        0..d.instance_count,
                    ),
                    (DrawKind::Indirect { offset, draw_count, .. }, Some(buffer)) => {
                        for i in 0..u64::from(draw_count) {
                            pass.draw_indexed_indirect(buffer, offset + i * INDIRECT_STRIDE);
                        }
                    }
                    (DrawKind::Indirect { .. }, None) => {}
                }
            }
        }
        self.command_buffers.push(encoder.finish());
    }

    // ========================================================================
    // Readback
    // ========================================================================

    fn finish_downloads(&mut self) {
        if self.downloads.is_empty() {
            return;
        }
        let downloads = std::mem::take(&mut self.downloads);

        let mut mapped = Vec::with_capacity(downloads.len());
        for download in downloads {
            let (tx, rx) = flume::bounded(1);
            download
                .buffer
                .slice(..)
                .map_async(wgpu::MapMode::Read, move |result| {
                    let _ = tx.send(result.is_ok());
                });
            mapped.push((download, rx));
        }
        self.poll_wait();

        for (download, rx) in mapped {
            let bytes = if rx.try_recv().unwrap_or(false) {
                let row = (download.desc.width * download.desc.format.bytes_per_pixel()) as usize;
                let padded = download.padded_row as usize;
                let mut out = Vec::with_capacity(row * download.desc.height as usize);
                {
                    let view = download.buffer.slice(..).get_mapped_range();
                    for chunk in view.chunks(padded).take(download.desc.height as usize) {
                        out.extend_from_slice(&chunk[..row.min(chunk.len())]);
                    }
                }
                download.buffer.unmap();
                Some(out)
            } else {
                log::warn!("Readback {:?} failed to map", download.id);
                None
            };
            if download.completion.send((download.id, bytes)).is_err() {
                log::debug!("Readback receiver dropped before completion of {:?}", download.id);
            }
        }
    }

    fn poll_wait(&self) {
        if let Err(e) = self.device.poll(wgpu::PollType::wait_indefinitely()) {
            log::warn!("Device poll failed: {e}");
        }
    }
}

impl GpuDevice for WgpuDevice {
    fn create_buffer(&mut self, size: usize, usage: BufferUsage) -> Option<NativeBuffer> {
        let size = (size as u64).next_multiple_of(wgpu::COPY_BUFFER_ALIGNMENT);
        if size > self.device.limits().max_buffer_size {
            return None;
        }
        let buffer = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Myth RHI Buffer"),
            size,
            usage: buffer_usages(usage),
            mapped_at_creation: false,
        });
        let id = NativeBuffer(self.next());
        self.buffers.insert(id, buffer);
        Some(id)
    }

    /// Uploads go through `Queue::write_buffer`, which manages its own
    /// staging memory; the id only tracks the reservation.
    fn create_staging(&mut self, size: usize) -> Option<NativeStaging> {
        let id = NativeStaging(self.next());
        self.staging.insert(id, size);
        Some(id)
    }

    fn upload_buffer(&mut self, _staging: NativeStaging, buffer: NativeBuffer, data: &[u8]) {
        if let Some(target) = self.buffers.get(&buffer) {
            self.queue.write_buffer(target, 0, &aligned(data));
        }
    }

    fn release_buffer(&mut self, buffer: NativeBuffer) {
        if let Some(buffer) = self.buffers.remove(&buffer) {
            buffer.destroy();
        }
    }

    fn release_staging(&mut self, staging: NativeStaging) {
        self.staging.remove(&staging);
    }

    fn create_texture(&mut self, desc: &TextureDesc) -> Option<NativeTexture> {
        let limit = self.device.limits().max_texture_dimension_2d;
        if desc.width == 0 || desc.height == 0 || desc.width > limit || desc.height > limit {
            return None;
        }
        let entry = Self::make_texture(&self.device, "Myth RHI Texture", desc);
        let id = NativeTexture(self.next());
        self.textures.insert(id, entry);
        Some(id)
    }

    fn upload_texture(
        &mut self,
        _staging: NativeStaging,
        texture: NativeTexture,
        desc: &TextureDesc,
        data: &[u8],
    ) {
        let Some(entry) = self.textures.get(&texture) else {
            return;
        };
        self.queue.write_texture(
            wgpu::TexelCopyTextureInfo {
                texture: &entry.texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            data,
            wgpu::TexelCopyBufferLayout {
                offset: 0,
                bytes_per_row: Some(desc.bytes_per_row()),
                rows_per_image: Some(desc.height),
            },
            wgpu::Extent3d {
                width: desc.width,
                height: desc.height,
                depth_or_array_layers: 1,
            },
        );
    }

    fn release_texture(&mut self, texture: NativeTexture) {
        if let Some(entry) = self.textures.remove(&texture) {
            entry.texture.destroy();
        }
    }

    fn create_sampler(&mut self, key: SamplerKey) -> Option<NativeSampler> {
        let flags = key.flags();
        let linear = flags.contains(TextureFlags::LINEAR_FILTER);
        let filter = if linear {
            wgpu::FilterMode::Linear
        } else {
            wgpu::FilterMode::Nearest
        };

        let sampler = self.device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("Myth RHI Sampler"),
            address_mode_u: address_mode(flags, TextureFlags::REPEAT_U, TextureFlags::MIRROR_U),
            address_mode_v: address_mode(flags, TextureFlags::REPEAT_V, TextureFlags::MIRROR_V),
            address_mode_w: address_mode(flags, TextureFlags::REPEAT_W, TextureFlags::MIRROR_W),
            mag_filter: filter,
            min_filter: filter,
            mipmap_filter: if linear {
                wgpu::MipmapFilterMode::Linear
            } else {
                wgpu::MipmapFilterMode::Nearest
            },
            anisotropy_clamp: if linear && flags.contains(TextureFlags::ANISOTROPIC) {
                16
            } else {
                1
            },
            ..Default::default()
        });
        let id = NativeSampler(self.next());
        self.samplers.insert(id, sampler);
        Some(id)
    }

    fn create_program(&mut self, source: &ShaderVariantSource) -> Option<ProgramId> {
        if source.vertex.code.is_empty() || source.fragment.code.is_empty() {
            return None;
        }
        let label = if source.key.is_empty() {
            "Myth RHI Program".to_owned()
        } else {
            format!("Myth RHI Program [{}]", source.key)
        };

        let module = |code: &str| {
            self.device.create_shader_module(wgpu::ShaderModuleDescriptor {
                label: Some(&label),
                source: wgpu::ShaderSource::Wgsl(Cow::Owned(code.to_owned())),
            })
        };
        let vertex_module = module(&source.vertex.code);
        let fragment_module = module(&source.fragment.code);

        let layouts = [
            self.bind_group_layout(&label, ShaderStage::Vertex, source, true),
            self.bind_group_layout(&label, ShaderStage::Fragment, source, true),
            self.bind_group_layout(&label, ShaderStage::Vertex, source, false),
            self.bind_group_layout(&label, ShaderStage::Fragment, source, false),
        ];
        let pipeline_layout = self
            .device
            .create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
                label: Some(&label),
                bind_group_layouts: &[&layouts[0], &layouts[1], &layouts[2], &layouts[3]],
                immediate_size: 0,
            });

        let blocks = |stage: ShaderStage| -> Vec<(u32, u64)> {
            let mut blocks: Vec<(u32, u64)> = source
                .stage(stage)
                .uniform_blocks
                .iter()
                .map(|block| (block.binding, u64::from(block.size)))
                .collect();
            blocks.sort_unstable_by_key(|&(binding, _)| binding);
            blocks
        };
        let uniform_blocks = [blocks(ShaderStage::Vertex), blocks(ShaderStage::Fragment)];
        self.max_block_size = uniform_blocks
            .iter()
            .flatten()
            .map(|&(_, size)| size.next_multiple_of(UNIFORM_ALIGNMENT as u64))
            .fold(self.max_block_size, u64::max);

        let textures = |stage: ShaderStage| -> Vec<u32> {
            source.stage(stage).textures.iter().map(|t| t.binding).collect()
        };
        let entry = ProgramEntry {
            vertex_module,
            fragment_module,
            vertex_entry: source.vertex.entry_point.clone(),
            fragment_entry: source.fragment.entry_point.clone(),
            layouts,
            pipeline_layout,
            vertex_stride: u64::from(source.vertex_layout.stride),
            vertex_attributes: source
                .vertex_layout
                .attributes
                .iter()
                .map(|a| wgpu::VertexAttribute {
                    format: vertex_format(a.format),
                    offset: u64::from(a.offset),
                    shader_location: a.location,
                })
                .collect(),
            uniform_blocks,
            texture_bindings: [textures(ShaderStage::Vertex), textures(ShaderStage::Fragment)],
            storage_buffers: [source.vertex.storage_buffers, source.fragment.storage_buffers],
            pipelines: FxHashMap::default(),
            label,
        };

        let id = ProgramId(self.next());
        self.programs.insert(id, entry);
        Some(id)
    }

    fn release_program(&mut self, program: ProgramId) {
        self.programs.remove(&program);
    }

    fn begin_render_pass(&mut self, desc: &RenderPassDesc) {
        if self.current_pass.is_some() {
            self.end_render_pass();
        }
        self.current_pass = Some(*desc);
        self.state = BindingState::default();
    }

    fn end_render_pass(&mut self) {
        let Some(desc) = self.current_pass.take() else {
            return;
        };
        let draws = std::mem::take(&mut self.draws);
        self.encode_pass(desc, draws);
    }

    fn surface_size(&self) -> (u32, u32) {
        self.surface.size
    }

    fn bind_program(&mut self, program: ProgramId) {
        self.state.program = Some(program);
        self.state.uniforms = Default::default();
        self.state.samplers = Default::default();
        self.state.storage = Default::default();
    }

    fn set_cull_mode(&mut self, cull_mode: CullMode) {
        self.state.cull_mode = cull_mode;
    }

    fn bind_vertex_buffer(&mut self, buffer: NativeBuffer) {
        self.state.vertex = Some(buffer);
    }

    fn bind_index_buffer(&mut self, buffer: NativeBuffer, format: IndexFormat) {
        self.state.index = Some((buffer, format));
    }

    fn bind_samplers(&mut self, stage: ShaderStage, samplers: &[SamplerBinding]) {
        self.state.samplers[stage_index(stage)] = SmallVec::from_slice(samplers);
    }

    fn bind_storage_buffers(&mut self, stage: ShaderStage, buffers: &[StorageBinding]) {
        self.state.storage[stage_index(stage)] = SmallVec::from_slice(buffers);
    }

    fn push_uniform_data(&mut self, stage: ShaderStage, binding: u32, data: &[u8]) {
        let offset = self.frame_uniforms.len().next_multiple_of(UNIFORM_ALIGNMENT);
        self.frame_uniforms.resize(offset, 0);
        self.frame_uniforms.extend_from_slice(data);
        let padded = self.frame_uniforms.len().next_multiple_of(wgpu::COPY_BUFFER_ALIGNMENT as usize);
        self.frame_uniforms.resize(padded, 0);

        let slots = &mut self.state.uniforms[stage_index(stage)];
        match slots.iter_mut().find(|(b, _)| *b == binding) {
            Some(slot) => slot.1 = offset as u32,
            None => slots.push((binding, offset as u32)),
        }
    }

    fn set_scissor(&mut self, rect: Option<ScissorRect>) {
        self.state.scissor = rect;
    }

    fn draw_indexed(&mut self, draw: &DrawIndexed) {
        self.draws.push(RecordedDraw {
            state: self.state.clone(),
            kind: DrawKind::Direct(*draw),
        });
    }

    fn draw_indexed_indirect(&mut self, buffer: NativeBuffer, offset: u64, draw_count: u32) {
        self.draws.push(RecordedDraw {
            state: self.state.clone(),
            kind: DrawKind::Indirect {
                buffer,
                offset,
                draw_count,
            },
        });
    }

    fn download_texture(
        &mut self,
        texture: NativeTexture,
        desc: &TextureDesc,
        id: ReadbackId,
        completion: flume::Sender<ReadbackResult>,
    ) {
        let Some(entry) = self.textures.get(&texture) else {
            let _ = completion.send((id, None));
            return;
        };
        let row = desc.width * desc.format.bytes_per_pixel();
        let padded_row = row.next_multiple_of(wgpu::COPY_BYTES_PER_ROW_ALIGNMENT);
        let buffer = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Myth RHI Readback"),
            size: u64::from(padded_row) * u64::from(desc.height),
            usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
            mapped_at_creation: false,
        });

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("Myth RHI Readback Encoder"),
            });
        encoder.copy_texture_to_buffer(
            wgpu::TexelCopyTextureInfo {
                texture: &entry.texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            wgpu::TexelCopyBufferInfo {
                buffer: &buffer,
                layout: wgpu::TexelCopyBufferLayout {
                    offset: 0,
                    bytes_per_row: Some(padded_row),
                    rows_per_image: Some(desc.height),
                },
            },
            wgpu::Extent3d {
                width: desc.width,
                height: desc.height,
                depth_or_array_layers: 1,
            },
        );
        self.command_buffers.push(encoder.finish());
        self.downloads.push(PendingDownload {
            id,
            buffer,
            desc: *desc,
            padded_row,
            completion,
        });
    }

    fn submit(&mut self) {
        self.end_render_pass();
        self.flush_uniforms();
        if !self.command_buffers.is_empty() {
            self.queue.submit(self.command_buffers.drain(..));
        }
        self.frame_uniforms.clear();
        self.uploaded_uniforms = 0;
    }

    fn wait_idle(&mut self) {
        if !self.command_buffers.is_empty() || self.current_pass.is_some() {
            self.submit();
        }
        self.poll_wait();
        self.finish_downloads();
    }
}
