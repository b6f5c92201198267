//! Material Module
//!
//! Shader parameter values, keyword sets and the per-variant packed state
//! that draw submission copies into the frame allocator.

#[allow(clippy::module_inception)]
pub mod material;
pub mod parameter;

pub use material::{ApplyMode, CullMode, MAIN_COLOR, MAIN_TEXTURE, Material, StagedBlock, TextureSlot};
pub use parameter::{MaterialParameter, MaterialValue};
