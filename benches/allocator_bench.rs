//! Allocator and frame replay benchmarks.

use std::hint::black_box;

use criterion::{Criterion, criterion_group, criterion_main};

use myth_rhi::memory::{FrameAllocator, FreeformAllocator, PoolAllocator};
use myth_rhi::prelude::*;

const UNLIT: &str = r#"{
    "name": "Unlit",
    "uniforms": [{ "name": "mainColor", "type": "Color", "default_value": "1 1 1 1" }],
    "instances": [{
        "key": "",
        "vertex": {
            "uniform_blocks": [{ "name": "RenderData", "binding": 0, "size": 208 }]
        },
        "fragment": {
            "uniform_blocks": [{
                "name": "Material", "binding": 1, "size": 16,
                "fields": [{ "name": "mainColor", "offset": 0, "size": 16 }]
            }]
        }
    }]
}"#;

fn frame_allocator(c: &mut Criterion) {
    let block = [0u8; 208];
    let mut frame = FrameAllocator::new(1024);
    c.bench_function("frame_allocator/push_1000_blocks", |b| {
        b.iter(|| {
            for _ in 0..1000 {
                black_box(frame.push_bytes(black_box(&block)));
            }
            frame.clear();
        });
    });
}

fn freeform_allocator(c: &mut Criterion) {
    c.bench_function("freeform/allocate_free_cycle", |b| {
        let mut arena = FreeformAllocator::<f32>::new();
        let mut live = Vec::with_capacity(64);
        b.iter(|| {
            for length in 1..=64 {
                live.push(arena.allocate(length));
            }
            for entry in live.drain(..) {
                arena.free(entry);
            }
            black_box(arena.len());
        });
    });

    c.bench_function("freeform/compact_fragmented", |b| {
        b.iter_batched(
            || {
                let mut arena = FreeformAllocator::<u32>::new();
                let entries: Vec<_> = (0..256).map(|i| arena.allocate(1 + i % 16)).collect();
                for entry in entries.into_iter().step_by(2) {
                    arena.free(entry);
                }
                arena
            },
            |mut arena| {
                arena.compact(0);
                arena
            },
            criterion::BatchSize::SmallInput,
        );
    });
}

fn pool_allocator(c: &mut Criterion) {
    let mut pool = PoolAllocator::<Mat4>::new();
    c.bench_function("pool/rent_release_64", |b| {
        b.iter(|| {
            let array = pool.rent(black_box(64));
            pool.release(array);
        });
    });
}

fn frame_replay(c: &mut Criterion) {
    let mut ctx = RenderContext::new(HeadlessDevice::new(1280, 720), RhiSettings::default());
    let metadata: ShaderMetadata = serde_json::from_str(UNLIT).expect("valid shader metadata");
    let shader = ctx.load_shader(&metadata);
    let material = ctx.create_material(&shader);
    let vb = ctx.create_vertex_buffer(&[0u8; 96]).expect("vertex buffer");
    let ib = ctx
        .create_index_buffer(bytemuck::cast_slice(&[0u16, 1, 2, 2, 3, 0]))
        .expect("index buffer");
    ctx.end_frame();

    let state = RenderState::indexed(vb, ib, IndexFormat::Uint16, 6);
    c.bench_function("context/replay_1000_draws", |b| {
        b.iter(|| {
            ctx.begin_view(0, BeginRenderPass::default());
            for _ in 0..1000 {
                ctx.draw(0, &state, &material);
            }
            let stats = ctx.end_frame();
            // The headless log grows with every call; keep it bounded.
            ctx.device().log().clear();
            black_box(stats)
        });
    });
}

criterion_group!(
    benches,
    frame_allocator,
    freeform_allocator,
    pool_allocator,
    frame_replay
);
criterion_main!(benches);
