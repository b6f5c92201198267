//! Resource Registry Tests
//!
//! Tests for:
//! - ResourceRegistry: reserve/destroy/collect lifecycle, slot limits
//! - ResourceHandle: generations, null handles, stale lookups after recycling
//! - Two-phase destruction through RenderContext: natives released only
//!   after the frame is idle

use myth_rhi::backend::{DeviceCall, DeviceLog, HeadlessDevice};
use myth_rhi::prelude::*;
use myth_rhi::resources::{ResourceHandle, ResourceRegistry};

fn ctx() -> (RenderContext<HeadlessDevice>, DeviceLog) {
    myth_rhi::logging::init_test_logging();
    let device = HeadlessDevice::new(64, 64);
    let log = device.log();
    (RenderContext::new(device, RhiSettings::default()), log)
}

// ============================================================================
// ResourceRegistry Tests
// ============================================================================

#[test]
fn reserved_buffer_is_live_but_not_resident() {
    let mut registry = ResourceRegistry::new(0, 0);
    let handle = registry.reserve_buffer(BufferUsage::VERTEX).unwrap();

    let record = registry.buffer(handle).unwrap();
    assert!(record.used);
    assert_eq!(record.resident(), None);
    assert_eq!(record.usage, BufferUsage::VERTEX);
}

#[test]
fn destroyed_buffer_lookup_fails_immediately() {
    let mut registry = ResourceRegistry::new(0, 0);
    let handle = registry.reserve_buffer(BufferUsage::INDEX).unwrap();

    assert!(registry.destroy_buffer(handle));
    assert!(registry.buffer(handle).is_none());
    assert!(registry.has_pending_releases());
    // The slot is still occupied until collection.
    assert_eq!(registry.buffer_slots(), 1);
}

#[test]
fn second_destroy_is_a_no_op() {
    let mut registry = ResourceRegistry::new(0, 0);
    let handle = registry.reserve_buffer(BufferUsage::VERTEX).unwrap();

    assert!(registry.destroy_buffer(handle));
    assert!(!registry.destroy_buffer(handle));
    registry.collect_garbage();
    assert!(!registry.destroy_buffer(handle));
}

#[test]
fn collected_slot_is_reused_with_new_generation() {
    let mut registry = ResourceRegistry::new(0, 0);
    let old = registry.reserve_buffer(BufferUsage::VERTEX).unwrap();
    registry.destroy_buffer(old);
    registry.collect_garbage();

    let new = registry.reserve_buffer(BufferUsage::VERTEX).unwrap();
    assert_eq!(new.index(), old.index());
    assert_ne!(new.generation(), old.generation());
    assert!(registry.buffer(old).is_none());
    assert!(registry.buffer(new).is_some());
}

#[test]
fn slot_limit_is_enforced() {
    let mut registry = ResourceRegistry::new(2, 1);
    assert!(registry.reserve_buffer(BufferUsage::VERTEX).is_some());
    assert!(registry.reserve_buffer(BufferUsage::VERTEX).is_some());
    assert!(registry.reserve_buffer(BufferUsage::VERTEX).is_none());

    let desc = TextureDesc::new(4, 4, TextureFormat::Rgba8Unorm);
    assert!(registry.reserve_texture(desc).is_some());
    assert!(registry.reserve_texture(desc).is_none());
}

#[test]
fn destroyed_texture_slot_counts_until_collected() {
    let mut registry = ResourceRegistry::new(0, 1);
    let desc = TextureDesc::new(2, 2, TextureFormat::R8Unorm);
    let handle = registry.reserve_texture(desc).unwrap();
    registry.destroy_texture(handle);

    assert!(registry.reserve_texture(desc).is_none());
    registry.collect_garbage();
    assert!(registry.reserve_texture(desc).is_some());
}

#[test]
fn null_handle_never_resolves() {
    let registry = ResourceRegistry::new(0, 0);
    let handle = BufferHandle::null();
    assert!(handle.is_null());
    assert!(registry.buffer(handle).is_none());
}

#[test]
fn handle_bits_round_trip() {
    let mut registry = ResourceRegistry::new(0, 0);
    let handle = registry.reserve_buffer(BufferUsage::VERTEX).unwrap();
    let restored: BufferHandle = ResourceHandle::from_bits(handle.to_bits());
    assert_eq!(restored, handle);
}

// ============================================================================
// Two-Phase Destruction
// ============================================================================

#[test]
fn buffer_native_released_after_frame() {
    let (mut ctx, log) = ctx();
    let handle = ctx.create_vertex_buffer(&[0u8; 32]).unwrap();
    ctx.end_frame();
    assert_eq!(ctx.device().live_buffers(), 1);

    ctx.destroy_buffer(handle);
    log.clear();
    ctx.end_frame();

    let calls = log.calls();
    let wait = calls.iter().position(|c| *c == DeviceCall::WaitIdle).unwrap();
    let release = calls
        .iter()
        .position(|c| matches!(c, DeviceCall::ReleaseBuffer(_)))
        .unwrap();
    assert!(wait < release, "native released before the device was idle");
    assert_eq!(ctx.device().live_buffers(), 0);
    assert!(ctx.registry().buffer(handle).is_none());
}

#[test]
fn stale_handle_after_destroy_is_ignored() {
    let (mut ctx, _log) = ctx();
    let handle = ctx.create_vertex_buffer(&[1u8; 16]).unwrap();
    ctx.destroy_buffer(handle);
    ctx.end_frame();

    // Updates and destroys through the stale handle change nothing.
    ctx.update_buffer(handle, &[2u8; 16]);
    ctx.destroy_buffer(handle);
    let stats = ctx.end_frame();
    assert_eq!(stats.uploads, 0);
    assert_eq!(ctx.device().live_buffers(), 0);

    let replacement = ctx.create_vertex_buffer(&[3u8; 16]).unwrap();
    assert_ne!(replacement, handle);
    ctx.end_frame();
    assert!(ctx.registry().buffer(replacement).is_some());
    assert!(ctx.registry().buffer(handle).is_none());
}

#[test]
fn resized_buffer_recreates_native() {
    let (mut ctx, log) = ctx();
    let handle = ctx.create_vertex_buffer(&[0u8; 16]).unwrap();
    ctx.end_frame();
    let first = ctx.registry().buffer(handle).unwrap().resident().unwrap();

    log.clear();
    ctx.update_buffer(handle, &[5u8; 64]);
    ctx.end_frame();

    let second = ctx.registry().buffer(handle).unwrap().resident().unwrap();
    assert_ne!(first, second);
    assert_eq!(ctx.registry().buffer(handle).unwrap().length, 64);
    assert!(log.calls().contains(&DeviceCall::ReleaseBuffer(first)));
    assert_eq!(ctx.device().buffer_contents(second), Some(&[5u8; 64][..]));
}

#[test]
fn same_length_update_reuses_native() {
    let (mut ctx, _log) = ctx();
    let handle = ctx.create_vertex_buffer(&[0u8; 16]).unwrap();
    ctx.end_frame();
    let first = ctx.registry().buffer(handle).unwrap().resident();

    ctx.update_buffer(handle, &[7u8; 16]);
    let stats = ctx.end_frame();
    assert_eq!(stats.uploads, 1);
    assert_eq!(ctx.registry().buffer(handle).unwrap().resident(), first);
}

#[test]
fn failed_allocation_leaves_slot_retryable() {
    let (mut ctx, _log) = ctx();
    let handle = ctx.create_vertex_buffer(&[0u8; 16]).unwrap();
    ctx.device_mut().fail_next_allocations(1);
    let stats = ctx.end_frame();
    assert_eq!(stats.uploads, 0);
    assert!(ctx.registry().buffer(handle).unwrap().resident().is_none());

    ctx.update_buffer(handle, &[1u8; 16]);
    let stats = ctx.end_frame();
    assert_eq!(stats.uploads, 1);
    assert!(ctx.registry().buffer(handle).unwrap().resident().is_some());
}

#[test]
fn shutdown_releases_everything() {
    let (mut ctx, _log) = ctx();
    ctx.create_vertex_buffer(&[0u8; 16]).unwrap();
    ctx.create_texture(
        TextureDesc::new(2, 2, TextureFormat::Rgba8Unorm),
        Some(&[0u8; 16]),
    )
    .unwrap();
    ctx.end_frame();
    assert_eq!(ctx.device().live_textures(), 2);

    ctx.shutdown();
    assert_eq!(ctx.device().live_buffers(), 0);
    assert_eq!(ctx.device().live_textures(), 0);
    assert_eq!(ctx.registry().buffer_slots(), 0);
}
