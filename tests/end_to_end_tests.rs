//! End-to-End Frame Tests
//!
//! Tests for:
//! - A full frame: create, upload, draw, and what the device actually sees
//! - Stale handles and commands held past their frame
//! - Indirect draws, storage buffers, texture readback
//! - Per-draw built-in uniforms and ApplyMode overrides
//! - Lost pass targets, shader disposal, settings limits

use std::sync::Arc;

use parking_lot::Mutex;

use myth_rhi::backend::{DeviceCall, DeviceLog, HeadlessDevice, NativeBuffer};
use myth_rhi::prelude::*;
use myth_rhi::render::{RenderCommand, StorageSlot};
use myth_rhi::shader::{Shader, ShaderStage};

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

fn setup(settings: RhiSettings) -> (RenderContext<HeadlessDevice>, DeviceLog, Arc<Shader>) {
    myth_rhi::logging::init_test_logging();
    let device = HeadlessDevice::new(128, 128);
    let log = device.log();
    let mut ctx = RenderContext::new(device, settings);
    let metadata: ShaderMetadata = serde_json::from_str(UNLIT).unwrap();
    let shader = ctx.load_shader(&metadata);
    (ctx, log, shader)
}

fn quad(ctx: &mut RenderContext<HeadlessDevice>, vertices: &[u8]) -> RenderState {
    let vb = ctx.create_vertex_buffer(vertices).unwrap();
    let indices: [u16; 6] = [0, 1, 2, 2, 3, 0];
    let ib = ctx.create_index_buffer(bytemuck::cast_slice(&indices)).unwrap();
    RenderState::indexed(vb, ib, IndexFormat::Uint16, 6)
}

fn resident(ctx: &RenderContext<HeadlessDevice>, handle: BufferHandle) -> NativeBuffer {
    ctx.registry().buffer(handle).unwrap().resident().unwrap()
}

fn pushed(log: &DeviceLog, stage: ShaderStage, binding: u32) -> Vec<Vec<u8>> {
    log.calls()
        .into_iter()
        .filter_map(|call| match call {
            DeviceCall::PushUniformData { stage: s, binding: b, data } if s == stage && b == binding => {
                Some(data)
            }
            _ => None,
        })
        .collect()
}

// ============================================================================
// Full Frame
// ============================================================================

#[test]
fn uploaded_buffer_is_bound_for_the_draw() {
    let (mut ctx, log, shader) = setup(RhiSettings::default());
    let material = ctx.create_material(&shader);
    let contents: Vec<u8> = (0..=255u8).collect();
    let state = quad(&mut ctx, &contents);
    let handle = state.vertex_buffer.unwrap();

    ctx.begin_view(0, BeginRenderPass::default());
    assert!(ctx.draw(0, &state, &material));
    let stats = ctx.end_frame();

    assert_eq!(stats.draws, 1);
    assert_eq!(stats.skipped_draws, 0);
    assert_eq!(log.draw_count(), 1);

    let native = resident(&ctx, handle);
    assert!(log.calls().contains(&DeviceCall::BindVertexBuffer(native)));
    assert_eq!(ctx.device().buffer_contents(native), Some(contents.as_slice()));
}

#[test]
fn stale_draw_command_is_skipped() {
    let (mut ctx, log, shader) = setup(RhiSettings::default());
    let material = ctx.create_material(&shader);
    let state = quad(&mut ctx, &[9u8; 256]);
    let command = ctx.prepare_draw(&state, &material).unwrap();
    ctx.submit(0, RenderCommand::Draw(Box::new(command.clone())));
    assert_eq!(ctx.end_frame().draws, 1);

    ctx.destroy_buffer(state.vertex_buffer.unwrap());
    ctx.end_frame();

    log.clear();
    ctx.submit(0, RenderCommand::Draw(Box::new(command)));
    let stats = ctx.end_frame();
    assert_eq!(stats.draws, 0);
    assert_eq!(stats.skipped_draws, 1);
    assert_eq!(log.draw_count(), 0);
}

#[test]
fn held_command_never_pushes_a_later_frames_uniforms() {
    let (mut ctx, log, shader) = setup(RhiSettings::default());
    let state = quad(&mut ctx, &[0u8; 64]);
    let mut red = ctx.create_material(&shader);
    red.set_main_color(Vec4::new(1.0, 0.0, 0.0, 1.0));
    let held = ctx.prepare_draw(&state, &red).unwrap();
    ctx.end_frame();

    let mut green = ctx.create_material(&shader);
    green.set_main_color(Vec4::new(0.0, 1.0, 0.0, 1.0));
    log.clear();
    ctx.draw(0, &state, &green);
    ctx.submit(0, RenderCommand::Draw(Box::new(held)));
    let stats = ctx.end_frame();

    assert_eq!(stats.draws, 1);
    assert_eq!(stats.skipped_draws, 1);
    let green_bytes: &[u8] = bytemuck::cast_slice(&[0.0f32, 1.0, 0.0, 1.0]);
    assert_eq!(pushed(&log, ShaderStage::Fragment, 1), vec![green_bytes.to_vec()]);
}

#[test]
fn held_command_does_not_bind_released_program() {
    let (mut ctx, log, shader) = setup(RhiSettings::default());
    let material = ctx.create_material(&shader);
    let state = quad(&mut ctx, &[0u8; 64]);
    let held = ctx.prepare_draw(&state, &material).unwrap();
    ctx.dispose_shader(&shader);
    ctx.end_frame();
    assert!(log.calls().contains(&DeviceCall::ReleaseProgram(held.program)));

    log.clear();
    ctx.submit(0, RenderCommand::Draw(Box::new(held)));
    let stats = ctx.end_frame();
    assert_eq!(stats.skipped_draws, 1);
    assert_eq!(log.count(|c| matches!(c, DeviceCall::BindProgram(_))), 0);
}

#[test]
fn queued_command_ignores_later_material_changes() {
    let (mut ctx, log, shader) = setup(RhiSettings::default());
    let mut material = ctx.create_material(&shader);
    let state = quad(&mut ctx, &[0u8; 64]);

    material.set_main_color(Vec4::new(1.0, 0.0, 0.0, 1.0));
    ctx.draw(0, &state, &material);
    material.set_main_color(Vec4::new(0.0, 1.0, 0.0, 1.0));
    ctx.end_frame();

    let fragment = pushed(&log, ShaderStage::Fragment, 1);
    assert_eq!(fragment.len(), 1);
    let red: &[u8] = bytemuck::cast_slice(&[1.0f32, 0.0, 0.0, 1.0]);
    assert_eq!(&fragment[0][..16], red);
}

// ============================================================================
// Indirect & Storage
// ============================================================================

#[test]
fn indirect_draw_uses_argument_buffer() {
    let (mut ctx, log, shader) = setup(RhiSettings::default());
    let material = ctx.create_material(&shader);
    let state = quad(&mut ctx, &[0u8; 64]);
    let args = ctx.create_buffer(BufferUsage::INDIRECT, &[0u8; 40]).unwrap();

    assert!(ctx.draw_indirect(0, &state, &material, args, 20, 1));
    let stats = ctx.end_frame();

    assert_eq!(stats.draws, 1);
    let native = resident(&ctx, args);
    assert!(log.calls().contains(&DeviceCall::DrawIndexedIndirect {
        buffer: native,
        offset: 20,
        draw_count: 1,
    }));
}

#[test]
fn missing_argument_buffer_skips_indirect_draw() {
    let (mut ctx, _log, shader) = setup(RhiSettings::default());
    let material = ctx.create_material(&shader);
    let state = quad(&mut ctx, &[0u8; 64]);
    let args = ctx.create_buffer(BufferUsage::INDIRECT, &[]).unwrap();

    ctx.draw_indirect(0, &state, &material, args, 0, 1);
    let stats = ctx.end_frame();
    assert_eq!(stats.draws, 0);
    assert_eq!(stats.skipped_draws, 1);
}

#[test]
fn storage_buffers_bind_per_stage() {
    let (mut ctx, log, shader) = setup(RhiSettings::default());
    let material = ctx.create_material(&shader);
    let mut state = quad(&mut ctx, &[0u8; 64]);
    let storage = ctx.create_buffer(BufferUsage::GRAPHICS_READ, &[1u8; 32]).unwrap();
    state.fragment_storage_buffers.push(StorageSlot {
        binding: 2,
        buffer: storage,
    });

    ctx.draw(0, &state, &material);
    ctx.end_frame();

    let native = resident(&ctx, storage);
    let bound = log.calls().into_iter().any(|call| match call {
        DeviceCall::BindStorageBuffers { stage, buffers } => {
            stage == ShaderStage::Fragment && buffers.len() == 1 && buffers[0].buffer == native
        }
        _ => false,
    });
    assert!(bound);
}

// ============================================================================
// Readback
// ============================================================================

fn capture() -> (Arc<Mutex<Option<Option<Vec<u8>>>>>, impl FnOnce(Option<Vec<u8>>) + Send + 'static) {
    let slot = Arc::new(Mutex::new(None));
    let sink = Arc::clone(&slot);
    (slot, move |bytes| *sink.lock() = Some(bytes))
}

#[test]
fn readback_delivers_texture_contents() {
    let (mut ctx, _log, _shader) = setup(RhiSettings::default());
    let pixels: Vec<u8> = (0..16).collect();
    let texture = ctx
        .create_texture(TextureDesc::new(2, 2, TextureFormat::Rgba8Unorm), Some(&pixels))
        .unwrap();

    let (result, callback) = capture();
    ctx.read_texture(texture, callback);
    assert!(result.lock().is_none());

    let stats = ctx.end_frame();
    assert_eq!(stats.readbacks, 1);
    assert_eq!(*result.lock(), Some(Some(pixels)));
}

#[test]
fn destroying_texture_fails_pending_read() {
    let (mut ctx, _log, _shader) = setup(RhiSettings::default());
    let texture = ctx
        .create_texture(TextureDesc::new(1, 1, TextureFormat::Rgba8Unorm), Some(&[7u8; 4]))
        .unwrap();
    ctx.end_frame();

    let (result, callback) = capture();
    ctx.read_texture(texture, callback);
    ctx.destroy_texture(texture);
    ctx.end_frame();

    assert_eq!(*result.lock(), Some(None));
}

#[test]
fn reading_missing_texture_reports_none() {
    let (mut ctx, _log, _shader) = setup(RhiSettings::default());
    let texture = ctx
        .create_texture(TextureDesc::new(1, 1, TextureFormat::Rgba8Unorm), None)
        .unwrap();

    let (result, callback) = capture();
    ctx.read_texture(texture, callback);
    let stats = ctx.end_frame();

    assert_eq!(stats.readbacks, 0);
    assert_eq!(*result.lock(), Some(None));
}

#[test]
fn shutdown_fails_unread_requests() {
    let (mut ctx, _log, _shader) = setup(RhiSettings::default());
    let texture = ctx
        .create_texture(TextureDesc::new(1, 1, TextureFormat::Rgba8Unorm), Some(&[1u8; 4]))
        .unwrap();
    let (result, callback) = capture();
    ctx.read_texture(texture, callback);

    ctx.shutdown();
    assert_eq!(*result.lock(), Some(None));
}

// ============================================================================
// Built-in Uniforms & ApplyMode
// ============================================================================

#[test]
fn render_data_carries_world_and_view() {
    let (mut ctx, log, shader) = setup(RhiSettings::default());
    let material = ctx.create_material(&shader);
    let world = Mat4::from_translation(glam::Vec3::new(1.0, 2.0, 3.0));
    let view = Mat4::from_scale(glam::Vec3::splat(2.0));
    let state = quad(&mut ctx, &[0u8; 64]).with_world(world);

    ctx.begin_view(
        0,
        BeginRenderPass {
            view,
            ..BeginRenderPass::default()
        },
    );
    ctx.draw(0, &state, &material);
    ctx.end_frame();

    let vertex = pushed(&log, ShaderStage::Vertex, 0);
    assert_eq!(vertex.len(), 1);
    let floats: &[f32] = bytemuck::cast_slice(&vertex[0][..128]);
    assert_eq!(&floats[..16], &world.to_cols_array());
    assert_eq!(&floats[16..32], &view.to_cols_array());
}

#[test]
fn textures_only_pushes_zeroed_uniforms() {
    let (mut ctx, log, shader) = setup(RhiSettings::default());
    let material = ctx.create_material(&shader);
    let mut state = quad(&mut ctx, &[0u8; 64]);
    state.apply_mode = ApplyMode::TexturesOnly;

    ctx.draw(0, &state, &material);
    ctx.end_frame();

    let fragment = pushed(&log, ShaderStage::Fragment, 1);
    assert_eq!(fragment, vec![vec![0u8; 16]]);
}

#[test]
fn ignore_textures_binds_fallback() {
    let (mut ctx, log, shader) = setup(RhiSettings::default());
    let mut material = ctx.create_material(&shader);
    let texture = ctx
        .create_texture(TextureDesc::new(1, 1, TextureFormat::Rgba8Unorm), Some(&[3u8; 4]))
        .unwrap();
    material.set_main_texture(Some(texture));
    let mut state = quad(&mut ctx, &[0u8; 64]);
    state.apply_mode = ApplyMode::IgnoreTextures;

    ctx.draw(0, &state, &material);
    ctx.end_frame();

    let fallback = ctx
        .registry()
        .texture(ctx.fallback_texture())
        .unwrap()
        .resident()
        .unwrap();
    let bound: Vec<_> = log
        .calls()
        .into_iter()
        .filter_map(|call| match call {
            DeviceCall::BindSamplers { samplers, .. } => Some(samplers[0].texture),
            _ => None,
        })
        .collect();
    assert_eq!(bound, vec![fallback]);
}

// ============================================================================
// Failure Paths
// ============================================================================

#[test]
fn lost_pass_target_skips_view_draws() {
    let (mut ctx, log, shader) = setup(RhiSettings::default());
    let material = ctx.create_material(&shader);
    let state = quad(&mut ctx, &[0u8; 64]);
    let target = ctx
        .create_texture(TextureDesc::new(64, 64, TextureFormat::Rgba8Unorm), None)
        .unwrap();

    ctx.begin_view(
        0,
        BeginRenderPass {
            target: Some(target),
            ..BeginRenderPass::default()
        },
    );
    ctx.draw(0, &state, &material);
    ctx.draw(1, &state, &material);
    let stats = ctx.end_frame();

    assert_eq!(stats.skipped_draws, 1);
    assert_eq!(stats.draws, 1);
    assert_eq!(log.draw_count(), 1);
}

#[test]
fn disposed_shader_stops_drawing_and_releases_programs() {
    let (mut ctx, log, shader) = setup(RhiSettings::default());
    let material = ctx.create_material(&shader);
    let state = quad(&mut ctx, &[0u8; 64]);

    ctx.dispose_shader(&shader);
    assert!(!ctx.draw(0, &state, &material));
    assert!(!material.is_renderable());

    ctx.end_frame();
    let calls = log.calls();
    let wait = calls.iter().position(|c| *c == DeviceCall::WaitIdle).unwrap();
    let release = calls
        .iter()
        .position(|c| matches!(c, DeviceCall::ReleaseProgram(_)))
        .unwrap();
    assert!(wait < release);
}

#[test]
fn settings_limits_apply_to_context() -> anyhow::Result<()> {
    let settings = RhiSettings::from_json_str(r#"{ "max_buffers": 1, "max_textures": 1 }"#)?;
    let (mut ctx, _log, _shader) = setup(settings);

    assert!(ctx.create_vertex_buffer(&[0u8; 4]).is_some());
    assert!(ctx.create_vertex_buffer(&[0u8; 4]).is_none());
    // The fallback texture holds the only texture slot.
    assert!(
        ctx.create_texture(TextureDesc::new(1, 1, TextureFormat::R8Unorm), None)
            .is_none()
    );
    Ok(())
}
