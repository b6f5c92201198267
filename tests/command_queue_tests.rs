//! Command Queue & Replay Order Tests
//!
//! Tests for:
//! - CommandQueue: FIFO within a view, view sequencing, clearing
//! - RenderContext::end_frame: uploads before views, reads/destroys after,
//!   ViewOrder, per-frame reset
//! - Executor: redundant bind elision, pass resumption after mid-view uploads

use std::sync::Arc;

use myth_rhi::ViewOrder;
use myth_rhi::backend::{DeviceCall, DeviceLog, HeadlessDevice};
use myth_rhi::prelude::*;
use myth_rhi::render::{CommandQueue, RenderCommand};
use myth_rhi::shader::Shader;

const UNLIT: &str = r#"{
    "name": "Unlit",
    "uniforms": [
        { "name": "mainColor", "type": "Color", "default_value": "1 1 1 1" },
        { "name": "mainTexture", "type": "Texture" }
    ],
    "instances": [{
        "key": "",
        "vertex": {
            "uniform_blocks": [{ "name": "RenderData", "binding": 0, "size": 208 }]
        },
        "fragment": {
            "uniform_blocks": [{
                "name": "Material", "binding": 1, "size": 16,
                "fields": [{ "name": "mainColor", "offset": 0, "size": 16 }]
            }],
            "textures": [{ "name": "mainTexture", "binding": 0 }]
        }
    }]
}"#;

struct Scene {
    ctx: RenderContext<HeadlessDevice>,
    log: DeviceLog,
    material: Material,
    vertex_buffer: BufferHandle,
    index_buffer: BufferHandle,
    _shader: Arc<Shader>,
}

impl Scene {
    fn new(settings: RhiSettings) -> Self {
        myth_rhi::logging::init_test_logging();
        let device = HeadlessDevice::new(320, 240);
        let log = device.log();
        let mut ctx = RenderContext::new(device, settings);

        let metadata: ShaderMetadata = serde_json::from_str(UNLIT).unwrap();
        let shader = ctx.load_shader(&metadata);
        let material = ctx.create_material(&shader);
        let vertex_buffer = ctx.create_vertex_buffer(&[0u8; 36]).unwrap();
        let indices: [u16; 6] = [0, 1, 2, 2, 1, 0];
        let index_buffer = ctx
            .create_index_buffer(bytemuck::cast_slice(&indices))
            .unwrap();
        ctx.end_frame();
        log.clear();

        Self {
            ctx,
            log,
            material,
            vertex_buffer,
            index_buffer,
            _shader: shader,
        }
    }

    fn state(&self, index_count: u32) -> RenderState {
        RenderState::indexed(
            self.vertex_buffer,
            self.index_buffer,
            IndexFormat::Uint16,
            index_count,
        )
    }

    fn draw(&mut self, view: ViewId, index_count: u32) {
        let state = self.state(index_count);
        assert!(self.ctx.draw(view, &state, &self.material));
    }

    /// Index counts of the recorded draws, in device order.
    fn drawn(&self) -> Vec<u32> {
        self.log
            .draws()
            .into_iter()
            .filter_map(|call| match call {
                DeviceCall::DrawIndexed(draw) => Some(draw.index_count),
                _ => None,
            })
            .collect()
    }
}

fn update(handle: u64, tag: u8) -> RenderCommand {
    RenderCommand::UpdateBuffer {
        handle: BufferHandle::from_bits(handle),
        data: vec![tag],
    }
}

fn tags(commands: &[RenderCommand]) -> Vec<u8> {
    commands
        .iter()
        .filter_map(|command| match command {
            RenderCommand::UpdateBuffer { data, .. } => data.first().copied(),
            _ => None,
        })
        .collect()
}

// ============================================================================
// CommandQueue Tests
// ============================================================================

#[test]
fn queue_is_fifo_within_view() {
    let mut queue = CommandQueue::new();
    for tag in 0..5 {
        queue.submit(7, update(1, tag));
    }
    assert_eq!(queue.len(), 5);
    assert_eq!(queue.view_len(7), 5);

    let drained = queue.drain_ordered(ViewOrder::Ascending);
    assert_eq!(drained.len(), 1);
    assert_eq!(tags(&drained[0].1), vec![0, 1, 2, 3, 4]);
    assert!(queue.is_empty());
}

#[test]
fn queue_sequences_views() {
    let mut queue = CommandQueue::new();
    queue.submit(3, update(1, 30));
    queue.submit(1, update(1, 10));
    queue.submit(3, update(1, 31));
    queue.submit(2, update(1, 20));

    assert_eq!(queue.views(ViewOrder::Ascending), vec![1, 2, 3]);
    assert_eq!(queue.views(ViewOrder::Submission), vec![3, 1, 2]);

    let drained = queue.drain_ordered(ViewOrder::Submission);
    let flattened: Vec<u8> = drained.iter().flat_map(|(_, c)| tags(c)).collect();
    assert_eq!(flattened, vec![30, 31, 10, 20]);
}

#[test]
fn queue_clear_forgets_views() {
    let mut queue = CommandQueue::new();
    queue.submit(0, update(1, 0));
    queue.clear();
    assert!(queue.is_empty());
    assert!(queue.views(ViewOrder::Ascending).is_empty());
}

// ============================================================================
// Frame Replay Order
// ============================================================================

#[test]
fn draws_replay_in_submission_order_within_view() {
    let mut scene = Scene::new(RhiSettings::default());
    scene.ctx.begin_view(0, BeginRenderPass::default());
    for count in [3, 6, 9, 12] {
        scene.draw(0, count);
    }
    let stats = scene.ctx.end_frame();

    assert_eq!(stats.draws, 4);
    assert_eq!(scene.drawn(), vec![3, 6, 9, 12]);
}

#[test]
fn views_replay_by_ascending_id() {
    let mut scene = Scene::new(RhiSettings::default());
    scene.draw(2, 30);
    scene.draw(0, 10);
    scene.draw(1, 20);
    scene.ctx.end_frame();

    assert_eq!(scene.drawn(), vec![10, 20, 30]);
}

#[test]
fn views_replay_in_submission_order_when_configured() {
    let mut scene = Scene::new(RhiSettings {
        view_order: ViewOrder::Submission,
        ..RhiSettings::default()
    });
    scene.draw(2, 30);
    scene.draw(0, 10);
    scene.draw(2, 31);
    scene.draw(1, 20);
    scene.ctx.end_frame();

    assert_eq!(scene.drawn(), vec![30, 31, 10, 20]);
}

#[test]
fn uploads_run_before_views() {
    let mut scene = Scene::new(RhiSettings::default());
    scene.ctx.begin_view(0, BeginRenderPass::default());
    scene.draw(0, 3);
    // Issued after the draw, but executed before any view.
    scene.ctx.update_buffer(scene.vertex_buffer, &[1u8; 36]);
    scene.ctx.end_frame();

    let calls = scene.log.calls();
    let upload = calls
        .iter()
        .position(|c| matches!(c, DeviceCall::UploadBuffer { .. }))
        .unwrap();
    let draw = calls
        .iter()
        .position(|c| matches!(c, DeviceCall::DrawIndexed(_)))
        .unwrap();
    assert!(upload < draw);
}

#[test]
fn buffer_created_this_frame_is_drawable() {
    let mut scene = Scene::new(RhiSettings::default());
    let fresh = scene.ctx.create_vertex_buffer(&[2u8; 48]).unwrap();
    let state = RenderState::indexed(fresh, scene.index_buffer, IndexFormat::Uint16, 6);
    assert!(scene.ctx.draw(0, &state, &scene.material));

    let stats = scene.ctx.end_frame();
    assert_eq!(stats.draws, 1);
    assert_eq!(stats.skipped_draws, 0);
}

#[test]
fn destroy_runs_after_views() {
    let mut scene = Scene::new(RhiSettings::default());
    scene.ctx.destroy_buffer(scene.vertex_buffer);
    scene.draw(0, 6);
    let stats = scene.ctx.end_frame();

    assert_eq!(stats.draws, 1);
    assert!(scene.log.calls().iter().any(|c| matches!(c, DeviceCall::ReleaseBuffer(_))));

    // Gone from the next frame on.
    scene.draw(0, 6);
    let stats = scene.ctx.end_frame();
    assert_eq!(stats.draws, 0);
    assert_eq!(stats.skipped_draws, 1);
}

#[test]
fn queue_is_empty_after_frame() {
    let mut scene = Scene::new(RhiSettings::default());
    scene.draw(0, 3);
    scene.draw(1, 3);
    assert_eq!(scene.ctx.queued_commands(), 2);

    scene.ctx.end_frame();
    assert_eq!(scene.ctx.queued_commands(), 0);
    assert!(scene.ctx.frame_allocator().is_empty());

    scene.log.clear();
    let stats = scene.ctx.end_frame();
    assert_eq!(stats.draws, 0);
    assert!(scene.drawn().is_empty());
}

// ============================================================================
// Bind Elision & Pass Resumption
// ============================================================================

#[test]
fn identical_binds_are_elided() {
    let mut scene = Scene::new(RhiSettings::default());
    scene.ctx.begin_view(0, BeginRenderPass::default());
    scene.draw(0, 3);
    scene.draw(0, 6);
    scene.ctx.end_frame();

    let log = &scene.log;
    assert_eq!(log.count(|c| matches!(c, DeviceCall::BindProgram(_))), 1);
    assert_eq!(log.count(|c| matches!(c, DeviceCall::BindVertexBuffer(_))), 1);
    assert_eq!(log.count(|c| matches!(c, DeviceCall::BindIndexBuffer(..))), 1);
    assert_eq!(log.count(|c| matches!(c, DeviceCall::SetCullMode(_))), 1);
    // Uniforms are pushed for every draw.
    assert_eq!(log.count(|c| matches!(c, DeviceCall::PushUniformData { .. })), 4);
}

#[test]
fn elision_can_be_disabled() {
    let mut scene = Scene::new(RhiSettings {
        elide_redundant_binds: false,
        ..RhiSettings::default()
    });
    scene.draw(0, 3);
    scene.draw(0, 6);
    scene.ctx.end_frame();

    assert_eq!(scene.log.count(|c| matches!(c, DeviceCall::BindProgram(_))), 2);
    assert_eq!(scene.log.count(|c| matches!(c, DeviceCall::BindVertexBuffer(_))), 2);
}

#[test]
fn new_pass_resets_bind_cache() {
    let mut scene = Scene::new(RhiSettings::default());
    scene.ctx.begin_view(0, BeginRenderPass::default());
    scene.draw(0, 3);
    scene.ctx.begin_view(0, BeginRenderPass::default());
    scene.draw(0, 6);
    let stats = scene.ctx.end_frame();

    assert_eq!(stats.passes, 2);
    assert_eq!(scene.log.count(|c| matches!(c, DeviceCall::BindProgram(_))), 2);
}

#[test]
fn mid_view_upload_resumes_pass_with_load() {
    let mut scene = Scene::new(RhiSettings::default());
    scene.ctx.begin_view(0, BeginRenderPass::default());
    scene.draw(0, 3);
    scene.ctx.submit(
        0,
        RenderCommand::UpdateBuffer {
            handle: scene.vertex_buffer,
            data: vec![4u8; 36],
        },
    );
    scene.draw(0, 6);
    let stats = scene.ctx.end_frame();

    let clears: Vec<ClearMode> = scene
        .log
        .calls()
        .into_iter()
        .filter_map(|c| match c {
            DeviceCall::BeginRenderPass(desc) => Some(desc.clear),
            _ => None,
        })
        .collect();
    assert_eq!(clears, vec![ClearMode::All, ClearMode::None]);
    assert_eq!(stats.passes, 2);
    assert_eq!(scene.drawn(), vec![3, 6]);
}
