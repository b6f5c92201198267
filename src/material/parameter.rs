//! Typed material parameter values and their uniform byte encoding.

use std::hash::{Hash, Hasher};

use glam::{Mat3, Mat4, Vec2, Vec3, Vec4};
use smallvec::SmallVec;

use crate::resources::TextureHandle;
use crate::shader::{ShaderHandle, UniformLocations, UniformType};
use crate::utils::NameId;

/// Value of a material parameter.
#[derive(Debug, Clone, PartialEq)]
pub enum MaterialValue {
    Int(i32),
    Float(f32),
    Vector2(Vec2),
    Vector3(Vec3),
    Vector4(Vec4),
    Color(Vec4),
    Matrix3(Mat3),
    Matrix4(Mat4),
    /// `None` samples the fallback texture.
    Texture(Option<TextureHandle>),
    Vector4Array(Vec<Vec4>),
    Matrix4Array(Vec<Mat4>),
}

impl MaterialValue {
    #[must_use]
    pub fn uniform_type(&self) -> UniformType {
        match self {
            Self::Int(_) => UniformType::Int,
            Self::Float(_) => UniformType::Float,
            Self::Vector2(_) => UniformType::Vector2,
            Self::Vector3(_) => UniformType::Vector3,
            Self::Vector4(_) | Self::Vector4Array(_) => UniformType::Vector4,
            Self::Color(_) => UniformType::Color,
            Self::Matrix3(_) => UniformType::Matrix3x3,
            Self::Matrix4(_) | Self::Matrix4Array(_) => UniformType::Matrix4x4,
            Self::Texture(_) => UniformType::Texture,
        }
    }

    /// `true` if both values are the same variant.
    #[must_use]
    pub fn same_kind(&self, other: &Self) -> bool {
        std::mem::discriminant(self) == std::mem::discriminant(other)
    }

    /// Whether a value of this kind may be stored in a uniform declared as
    /// `declared`.
    #[must_use]
    pub fn fits_declaration(&self, declared: UniformType) -> bool {
        let ty = self.uniform_type();
        ty == declared
            || matches!(
                (ty, declared),
                (UniformType::Color, UniformType::Vector4) | (UniformType::Vector4, UniformType::Color)
            )
    }

    /// Scalar used to drive keyword toggles.
    #[must_use]
    pub fn scalar(&self) -> Option<f32> {
        match *self {
            Self::Int(v) => Some(v as f32),
            Self::Float(v) => Some(v),
            _ => None,
        }
    }

    /// Builds a value of type `ty` from whitespace-separated default
    /// components. Missing components are zero.
    #[must_use]
    pub fn from_components(ty: UniformType, c: &[f32]) -> Option<Self> {
        let at = |i: usize| c.get(i).copied().unwrap_or(0.0);
        Some(match ty {
            UniformType::Int => Self::Int(at(0) as i32),
            UniformType::Float => Self::Float(at(0)),
            UniformType::Vector2 => Self::Vector2(Vec2::new(at(0), at(1))),
            UniformType::Vector3 => Self::Vector3(Vec3::new(at(0), at(1), at(2))),
            UniformType::Vector4 => Self::Vector4(Vec4::new(at(0), at(1), at(2), at(3))),
            UniformType::Color => Self::Color(Vec4::new(at(0), at(1), at(2), at(3))),
            UniformType::Texture => Self::Texture(None),
            UniformType::Matrix3x3 | UniformType::Matrix4x4 => return None,
        })
    }

    /// Encodes the value into `dst`, a uniform field of `dst.len()` bytes.
    ///
    /// Scalars and short vectors are zero-padded up to the field width
    /// (a float in a `vec4` slot becomes `(v, 0, 0, 0)`). A 3×3 matrix is
    /// written column-padded when the field has room for three `vec4`s.
    /// Arrays are clamped to the number of whole elements that fit.
    pub fn write_to(&self, dst: &mut [u8]) {
        let mut bytes: SmallVec<[u8; 64]> = SmallVec::new();
        match self {
            Self::Int(v) => bytes.extend_from_slice(bytemuck::bytes_of(v)),
            Self::Float(v) => bytes.extend_from_slice(bytemuck::bytes_of(v)),
            Self::Vector2(v) => bytes.extend_from_slice(bytemuck::bytes_of(v)),
            Self::Vector3(v) => bytes.extend_from_slice(bytemuck::bytes_of(v)),
            Self::Vector4(v) | Self::Color(v) => bytes.extend_from_slice(bytemuck::bytes_of(v)),
            Self::Matrix3(m) => {
                if dst.len() >= 48 {
                    for column in [m.x_axis, m.y_axis, m.z_axis] {
                        bytes.extend_from_slice(bytemuck::bytes_of(&column.extend(0.0)));
                    }
                } else {
                    bytes.extend_from_slice(bytemuck::bytes_of(m));
                }
            }
            Self::Matrix4(m) => bytes.extend_from_slice(bytemuck::bytes_of(m)),
            Self::Texture(_) => return,
            Self::Vector4Array(items) => return write_array(dst, bytemuck::cast_slice(items), 16),
            Self::Matrix4Array(items) => return write_array(dst, bytemuck::cast_slice(items), 64),
        }

        let count = bytes.len().min(dst.len());
        dst[..count].copy_from_slice(&bytes[..count]);
        dst[count..].fill(0);
    }

    pub(crate) fn hash_into<H: Hasher>(&self, state: &mut H) {
        std::mem::discriminant(self).hash(state);
        match self {
            Self::Int(v) => v.hash(state),
            Self::Texture(handle) => handle.hash(state),
            Self::Float(v) => hash_floats(state, std::slice::from_ref(v)),
            Self::Vector2(v) => hash_floats(state, &v.to_array()),
            Self::Vector3(v) => hash_floats(state, &v.to_array()),
            Self::Vector4(v) | Self::Color(v) => hash_floats(state, &v.to_array()),
            Self::Matrix3(m) => hash_floats(state, &m.to_cols_array()),
            Self::Matrix4(m) => hash_floats(state, &m.to_cols_array()),
            Self::Vector4Array(items) => hash_floats(state, bytemuck::cast_slice(items)),
            Self::Matrix4Array(items) => hash_floats(state, bytemuck::cast_slice(items)),
        }
    }
}

fn hash_floats<H: Hasher>(state: &mut H, floats: &[f32]) {
    for f in floats {
        f.to_bits().hash(state);
    }
}

fn write_array(dst: &mut [u8], src: &[u8], stride: usize) {
    let count = (src.len().min(dst.len()) / stride) * stride;
    dst[..count].copy_from_slice(&src[..count]);
}

/// A named material parameter and where it lands in the current variant.
#[derive(Debug, Clone)]
pub struct MaterialParameter {
    pub name: String,
    pub id: NameId,
    pub value: MaterialValue,
    pub(crate) handle: Option<ShaderHandle>,
    pub(crate) locations: UniformLocations,
}
