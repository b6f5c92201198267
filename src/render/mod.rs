//! Render Module
//!
//! Deferred command recording and replay.
//!
//! - [`state`]: [`RenderState`], the per-draw snapshot scene code fills in
//! - [`command`]: immutable [`RenderCommand`]s
//! - [`queue`]: per-view FIFO [`CommandQueue`]
//! - [`executor`]: handle resolution, bind elision and deferred release
//! - [`context`]: [`RenderContext`], the scene-facing entry point
//!
//! ```text
//! RenderState + Material ──► RenderContext::draw ──► DrawCommand (uniforms in FrameAllocator)
//!                                                        │
//!                                           CommandQueue[view] (FIFO)
//!                                                        │
//!                        RenderContext::end_frame ──► Executor ──► GpuDevice
//! ```

pub mod command;
pub mod context;
pub mod executor;
pub mod queue;
pub mod state;

pub use command::{
    BeginRenderPass, DrawCommand, IndirectDraw, ReadbackCallback, RenderCommand, RenderData,
    UniformRegion,
};
pub use context::RenderContext;
pub use executor::{Executor, FrameStats};
pub use queue::{CommandQueue, ViewId};
pub use state::{RenderState, StorageSlot};
