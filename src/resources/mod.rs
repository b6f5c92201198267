//! Resources Module
//!
//! Logical handles to GPU buffers and textures, and the registry that owns
//! their backend records.
//!
//! Scene code only ever holds [`BufferHandle`] / [`TextureHandle`]. The
//! executor resolves them through [`ResourceRegistry`] when a command is
//! replayed; a handle that no longer resolves makes that one command a
//! no-op.

pub mod buffer;
pub mod handle;
pub mod registry;
pub mod texture;

pub use buffer::{Buffer, BufferHandle, BufferResource, BufferUsage, IndexFormat};
pub use handle::{ResourceHandle, ResourceKey};
pub use registry::{ReleaseBatch, ResourceRegistry};
pub use texture::{
    SamplerKey, Texture, TextureDesc, TextureFlags, TextureFormat, TextureHandle, TextureResource,
};
