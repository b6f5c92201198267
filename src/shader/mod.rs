//! Shader Module
//!
//! Runtime shaders, their compiled variants, and keyword-driven variant
//! resolution.
//!
//! - [`metadata`]: asset-side descriptors consumed from loading
//! - [`variant`]: [`VariantKey`] and [`KeywordSet`]
//! - [`uniform`]: uniform declarations, locations and owner-checked handles
//! - [`shader`](mod@shader): [`Shader`] and [`ShaderInstance`]

pub mod metadata;
#[allow(clippy::module_inception)]
pub mod shader;
pub mod uniform;
pub mod variant;

pub use metadata::{
    ShaderMetadata, ShaderStage, ShaderVariantSource, StageSource, TextureBindingDecl,
    UniformBlockLayout, UniformDecl, UniformField, UniformType, VertexAttribute, VertexFormat,
    VertexLayout,
};
pub use shader::{RENDER_DATA_BLOCK, Shader, ShaderId, ShaderInstance, StageLayout};
pub use uniform::{ShaderHandle, UniformInfo, UniformLocation, UniformLocations, split_array_name};
pub use variant::{KeywordSet, VariantKey, keywords};
