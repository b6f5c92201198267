//! Uniform declarations and owner-checked handles.

use smallvec::SmallVec;

use super::metadata::{ShaderStage, UniformDecl, UniformType};
use super::shader::ShaderId;
use crate::utils::NameId;

/// Where a uniform lives inside one variant's uniform blocks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UniformLocation {
    pub stage: ShaderStage,
    /// Index into the variant's blocks for `stage`.
    pub block: u16,
    pub offset: u32,
    pub size: u32,
}

/// Locations of one uniform in both stages of a variant.
pub type UniformLocations = SmallVec<[UniformLocation; 2]>;

/// A declared material uniform.
#[derive(Debug, Clone, PartialEq)]
pub struct UniformInfo {
    /// Name without any array suffix.
    pub name: String,
    pub id: NameId,
    pub ty: UniformType,
    /// Element count; `1` unless declared as `name[N]`.
    pub count: u32,
    /// Keyword toggled by this uniform's scalar value.
    pub variant: Option<NameId>,
    pub default_value: Option<String>,
}

impl UniformInfo {
    #[must_use]
    pub fn from_decl(decl: &UniformDecl) -> Self {
        let (name, count) = split_array_name(&decl.name);
        Self {
            name: name.to_owned(),
            id: NameId::new(name),
            ty: decl.ty,
            count,
            variant: decl.variant.as_deref().map(NameId::new),
            default_value: decl.default_value.clone(),
        }
    }

    /// Parsed default components. Unparseable components are skipped.
    #[must_use]
    pub fn default_components(&self) -> SmallVec<[f32; 16]> {
        self.default_value
            .as_deref()
            .unwrap_or_default()
            .split([' ', ',', '\t'])
            .filter(|s| !s.is_empty())
            .filter_map(|s| s.parse().ok())
            .collect()
    }
}

/// Splits `"bones[64]"` into `("bones", 64)`. Names without a well-formed
/// positive suffix count as a single element.
#[must_use]
pub fn split_array_name(name: &str) -> (&str, u32) {
    let Some(open) = name.find('[') else {
        return (name, 1);
    };
    let count = name[open + 1..]
        .strip_suffix(']')
        .and_then(|digits| digits.trim().parse::<u32>().ok())
        .filter(|&n| n > 0)
        .unwrap_or(1);
    (&name[..open], count)
}

/// A uniform looked up on a specific shader.
///
/// The handle records the shader it came from; using it with any other
/// shader, or after its shader is disposed, fails at lookup instead of
/// silently addressing the wrong uniform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ShaderHandle {
    pub(crate) owner: ShaderId,
    pub(crate) uniform: NameId,
    pub(crate) index: u32,
}

impl ShaderHandle {
    #[inline]
    #[must_use]
    pub fn owner(&self) -> ShaderId {
        self.owner
    }

    #[inline]
    #[must_use]
    pub fn uniform(&self) -> NameId {
        self.uniform
    }
}
