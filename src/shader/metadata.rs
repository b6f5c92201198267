//! Shader asset descriptors.
//!
//! These are the structures asset loading hands over: keyword declarations,
//! uniform declarations and one [`ShaderVariantSource`] per compiled variant.
//! They derive serde so tools and tests can author them as JSON.

use serde::{Deserialize, Serialize};

use crate::resources::IndexFormat;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ShaderStage {
    Vertex,
    Fragment,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum UniformType {
    Int,
    Float,
    Vector2,
    Vector3,
    Vector4,
    Color,
    Matrix3x3,
    Matrix4x4,
    Texture,
}

impl UniformType {
    /// Tightly packed size of one element in bytes. Textures occupy no
    /// uniform storage.
    #[must_use]
    pub const fn packed_size(self) -> usize {
        match self {
            Self::Int | Self::Float => 4,
            Self::Vector2 => 8,
            Self::Vector3 => 12,
            Self::Vector4 | Self::Color => 16,
            Self::Matrix3x3 => 36,
            Self::Matrix4x4 => 64,
            Self::Texture => 0,
        }
    }

    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Int => "Int",
            Self::Float => "Float",
            Self::Vector2 => "Vector2",
            Self::Vector3 => "Vector3",
            Self::Vector4 => "Vector4",
            Self::Color => "Color",
            Self::Matrix3x3 => "Matrix3x3",
            Self::Matrix4x4 => "Matrix4x4",
            Self::Texture => "Texture",
        }
    }
}

/// A material-facing uniform declaration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UniformDecl {
    /// Name, optionally with an array suffix: `"bones[64]"`.
    pub name: String,
    #[serde(rename = "type")]
    pub ty: UniformType,
    /// Keyword toggled by this scalar's value.
    #[serde(default)]
    pub variant: Option<String>,
    /// Whitespace-separated default components, e.g. `"1 1 1 1"`.
    #[serde(default)]
    pub default_value: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UniformField {
    pub name: String,
    pub offset: u32,
    pub size: u32,
}

/// Layout of one uniform block of a compiled stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UniformBlockLayout {
    pub name: String,
    pub binding: u32,
    pub size: u32,
    #[serde(default)]
    pub fields: Vec<UniformField>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextureBindingDecl {
    pub name: String,
    pub binding: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct StageSource {
    /// Shader source or bytecode as text (WGSL for the wgpu device).
    #[serde(default)]
    pub code: String,
    #[serde(default = "default_entry_point")]
    pub entry_point: String,
    #[serde(default)]
    pub uniform_blocks: Vec<UniformBlockLayout>,
    #[serde(default)]
    pub textures: Vec<TextureBindingDecl>,
    /// Number of read-only storage buffers the stage expects.
    #[serde(default)]
    pub storage_buffers: u32,
}

fn default_entry_point() -> String {
    "main".to_owned()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum VertexFormat {
    Float32,
    Float32x2,
    Float32x3,
    Float32x4,
    Unorm8x4,
    Uint16x4,
}

impl VertexFormat {
    #[must_use]
    pub const fn size(self) -> u32 {
        match self {
            Self::Float32 | Self::Unorm8x4 => 4,
            Self::Float32x2 | Self::Uint16x4 => 8,
            Self::Float32x3 => 12,
            Self::Float32x4 => 16,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VertexAttribute {
    pub location: u32,
    pub offset: u32,
    pub format: VertexFormat,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct VertexLayout {
    pub stride: u32,
    pub attributes: Vec<VertexAttribute>,
}

/// One compiled variant of a shader.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ShaderVariantSource {
    /// Space-separated keyword names; empty for the base variant.
    #[serde(default)]
    pub key: String,
    pub vertex: StageSource,
    pub fragment: StageSource,
    #[serde(default)]
    pub vertex_layout: VertexLayout,
    #[serde(default)]
    pub index_format: IndexFormat,
}

impl ShaderVariantSource {
    #[must_use]
    pub fn stage(&self, stage: ShaderStage) -> &StageSource {
        match stage {
            ShaderStage::Vertex => &self.vertex,
            ShaderStage::Fragment => &self.fragment,
        }
    }
}

/// Everything asset loading provides for one shader.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ShaderMetadata {
    pub name: String,
    /// Keywords materials may enable on this shader.
    #[serde(default)]
    pub variants: Vec<String>,
    #[serde(default)]
    pub uniforms: Vec<UniformDecl>,
    pub instances: Vec<ShaderVariantSource>,
}
