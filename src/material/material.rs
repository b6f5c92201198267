//! Material
//!
//! A [`Material`] pairs a shared [`Shader`] with parameter values and an
//! enabled keyword set.
//!
//! # Variant Selection
//!
//! Variant resolution runs when the keyword set changes, never at draw time:
//!
//! ```text
//! enable_keyword("LIT") ──► set changed? ──► resolve (cached by set hash)
//!                                               │
//!                     variant changed? ◄────────┘
//!                            │
//!                            ▼
//!        rebuild uniform blocks, re-resolve every parameter location,
//!        rebuild texture slots (unset slots → fallback texture)
//! ```
//!
//! Draw submission then only copies the already packed blocks and slot
//! arrays.

use std::hash::{Hash, Hasher};
use std::sync::Arc;

use glam::{Mat3, Mat4, Vec2, Vec3, Vec4};
use rustc_hash::{FxHashMap, FxHasher};
use smallvec::SmallVec;

use super::parameter::{MaterialParameter, MaterialValue};
use crate::backend::ProgramId;
use crate::resources::TextureHandle;
use crate::shader::{KeywordSet, Shader, ShaderInstance, ShaderStage, UniformLocation};
use crate::utils::{IntKeyCache, NameId};

/// Name of the main color parameter.
pub const MAIN_COLOR: &str = "mainColor";
/// Name of the main texture parameter.
pub const MAIN_TEXTURE: &str = "mainTexture";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum CullMode {
    None,
    #[default]
    Back,
    Front,
}

/// Which parts of a material a draw applies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ApplyMode {
    #[default]
    All,
    /// Uniform values apply; every sampler binds the fallback texture.
    IgnoreTextures,
    /// Textures apply; uniform blocks are pushed with zeroed values.
    TexturesOnly,
}

/// A texture bound to a sampler slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TextureSlot {
    pub binding: u32,
    pub texture: TextureHandle,
}

/// Packed bytes of one uniform block of the current variant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagedBlock {
    pub stage: ShaderStage,
    pub binding: u32,
    pub bytes: Vec<u8>,
}

#[derive(Debug, Clone)]
pub struct Material {
    shader: Arc<Shader>,
    keywords: KeywordSet,
    variant: Option<usize>,
    variant_cache: FxHashMap<u64, Option<usize>>,
    parameters: Vec<MaterialParameter>,
    parameter_lookup: IntKeyCache,
    /// Vertex blocks first, then fragment blocks.
    blocks: Vec<StagedBlock>,
    vertex_block_count: usize,
    vertex_textures: SmallVec<[TextureSlot; 4]>,
    fragment_textures: SmallVec<[TextureSlot; 4]>,
    fallback_texture: TextureHandle,
    cull_mode: CullMode,
}

impl Material {
    /// Creates a material with the shader's declared defaults applied.
    ///
    /// `fallback_texture` is bound to every sampler slot without a texture.
    #[must_use]
    pub fn new(shader: Arc<Shader>, fallback_texture: TextureHandle) -> Self {
        let mut material = Self {
            shader,
            keywords: KeywordSet::new(),
            variant: None,
            variant_cache: FxHashMap::default(),
            parameters: Vec::new(),
            parameter_lookup: IntKeyCache::new(),
            blocks: Vec::new(),
            vertex_block_count: 0,
            vertex_textures: SmallVec::new(),
            fragment_textures: SmallVec::new(),
            fallback_texture,
            cull_mode: CullMode::default(),
        };

        let defaults: Vec<(String, MaterialValue)> = material
            .shader
            .uniforms()
            .iter()
            .filter(|info| info.default_value.is_some())
            .filter_map(|info| {
                MaterialValue::from_components(info.ty, &info.default_components())
                    .map(|value| (info.name.clone(), value))
            })
            .collect();

        material.update_variant();
        for (name, value) in defaults {
            material.set_parameter(&name, value);
        }
        material
    }

    // ========================================================================
    // Keywords
    // ========================================================================

    /// Enables a keyword the shader declares (or a built-in one).
    ///
    /// Returns `false` if the shader does not accept the keyword.
    pub fn enable_keyword(&mut self, name: &str) -> bool {
        self.set_keyword(NameId::new(name), true)
    }

    pub fn disable_keyword(&mut self, name: &str) -> bool {
        self.set_keyword(NameId::new(name), false)
    }

    #[must_use]
    pub fn is_keyword_enabled(&self, name: &str) -> bool {
        self.keywords.contains(NameId::new(name))
    }

    #[inline]
    #[must_use]
    pub fn keywords(&self) -> &KeywordSet {
        &self.keywords
    }

    fn set_keyword(&mut self, keyword: NameId, enabled: bool) -> bool {
        if enabled && !self.shader.accepts_keyword(keyword) {
            log::debug!(
                "Shader '{}' does not declare keyword {keyword:?}",
                self.shader.name()
            );
            return false;
        }

        let changed = if enabled {
            self.keywords.insert(keyword)
        } else {
            self.keywords.remove(keyword)
        };
        if changed {
            self.update_variant();
        }
        true
    }

    fn update_variant(&mut self) {
        let key = self.keywords.cache_key();
        let resolved = match self.variant_cache.get(&key) {
            Some(&Some(index))
                if self
                    .shader
                    .instance(index)
                    .is_some_and(|instance| instance.key().matches(&self.keywords)) =>
            {
                Some(index)
            }
            _ => {
                let resolved = self.shader.resolve(&self.keywords);
                self.variant_cache.insert(key, resolved);
                resolved
            }
        };

        if resolved.is_none() {
            log::debug!(
                "Shader '{}' has no variant for {} active keywords",
                self.shader.name(),
                self.keywords.len()
            );
        }
        if resolved != self.variant {
            self.variant = resolved;
            self.rebuild_bindings();
        }
    }

    fn rebuild_bindings(&mut self) {
        self.blocks.clear();
        self.vertex_textures.clear();
        self.fragment_textures.clear();
        self.vertex_block_count = 0;

        let shader = Arc::clone(&self.shader);
        let Some(instance) = self.variant.and_then(|index| shader.instance(index)) else {
            for param in &mut self.parameters {
                param.locations.clear();
            }
            return;
        };

        for stage in [ShaderStage::Vertex, ShaderStage::Fragment] {
            for block in instance.stage(stage).blocks() {
                self.blocks.push(StagedBlock {
                    stage,
                    binding: block.binding,
                    bytes: vec![0; block.size as usize],
                });
            }
            if stage == ShaderStage::Vertex {
                self.vertex_block_count = self.blocks.len();
            }
        }

        for index in 0..self.parameters.len() {
            self.parameters[index].locations = instance.locations(self.parameters[index].id);
            self.write_parameter(index);
        }
        self.rebuild_texture_slots(instance);
    }

    fn rebuild_texture_slots(&mut self, instance: &ShaderInstance) {
        let mut slots_for = |stage: ShaderStage| -> SmallVec<[TextureSlot; 4]> {
            instance
                .stage(stage)
                .textures()
                .iter()
                .map(|&(name, binding)| TextureSlot {
                    binding,
                    texture: self.texture_for(name),
                })
                .collect()
        };
        let vertex = slots_for(ShaderStage::Vertex);
        let fragment = slots_for(ShaderStage::Fragment);
        self.vertex_textures = vertex;
        self.fragment_textures = fragment;
    }

    fn texture_for(&self, name: NameId) -> TextureHandle {
        match self.parameter_by_id(name).map(|param| &param.value) {
            Some(MaterialValue::Texture(Some(handle))) => *handle,
            _ => self.fallback_texture,
        }
    }

    // ========================================================================
    // Parameters
    // ========================================================================

    /// Sets a parameter.
    ///
    /// Returns `false` (and changes nothing) if the name already holds a
    /// value of another kind, or the shader declares the uniform with an
    /// incompatible type.
    ///
    /// Int and Float values of a uniform tied to a keyword toggle it:
    /// `> 0` enables, `<= 0` disables.
    pub fn set_parameter(&mut self, name: &str, value: MaterialValue) -> bool {
        let id = NameId::new(name);

        let index = if let Some(index) = self.parameter_lookup.get_name(id) {
            let param = &mut self.parameters[index as usize];
            if !param.value.same_kind(&value) {
                log::debug!(
                    "Material parameter '{name}' is {:?}; ignoring {:?} value",
                    param.value.uniform_type(),
                    value.uniform_type()
                );
                return false;
            }
            param.value = value;
            index as usize
        } else {
            let handle = self.shader.uniform_handle(name);
            if let Some(info) = handle.and_then(|h| self.shader.try_uniform(&h).ok())
                && !value.fits_declaration(info.ty)
            {
                log::debug!(
                    "Uniform '{name}' is declared {}; ignoring {} value",
                    info.ty.name(),
                    value.uniform_type().name()
                );
                return false;
            }

            let locations = self
                .instance()
                .map(|instance| instance.locations(id))
                .unwrap_or_default();
            let index = self.parameters.len();
            self.parameters.push(MaterialParameter {
                name: name.to_owned(),
                id,
                value,
                handle,
                locations,
            });
            self.parameter_lookup.insert(id.raw(), index as u32);
            index
        };

        if matches!(self.parameters[index].value, MaterialValue::Texture(_)) {
            let shader = Arc::clone(&self.shader);
            if let Some(instance) = self.variant.and_then(|v| shader.instance(v)) {
                self.rebuild_texture_slots(instance);
            }
        } else {
            self.write_parameter(index);
        }
        self.apply_keyword_toggle(index);
        true
    }

    fn apply_keyword_toggle(&mut self, index: usize) {
        let param = &self.parameters[index];
        let Some(scalar) = param.value.scalar() else {
            return;
        };
        let Some(keyword) = param
            .handle
            .and_then(|h| self.shader.try_uniform(&h).ok())
            .and_then(|info| info.variant)
        else {
            return;
        };
        self.set_keyword(keyword, scalar > 0.0);
    }

    fn write_parameter(&mut self, index: usize) {
        let param = &self.parameters[index];
        for &UniformLocation {
            stage,
            block,
            offset,
            size,
        } in &param.locations
        {
            let block_index = match stage {
                ShaderStage::Vertex => block as usize,
                ShaderStage::Fragment => self.vertex_block_count + block as usize,
            };
            let Some(staged) = self.blocks.get_mut(block_index) else {
                continue;
            };
            let (start, end) = (offset as usize, offset as usize + size as usize);
            match staged.bytes.get_mut(start..end) {
                Some(dst) => param.value.write_to(dst),
                None => log::warn!(
                    "Uniform '{}' at {start}..{end} exceeds block of {} bytes",
                    param.name,
                    staged.bytes.len()
                ),
            }
        }
    }

    fn parameter_by_id(&self, id: NameId) -> Option<&MaterialParameter> {
        self.parameter_lookup
            .get_name(id)
            .map(|index| &self.parameters[index as usize])
    }

    #[must_use]
    pub fn parameter(&self, name: &str) -> Option<&MaterialValue> {
        self.parameter_by_id(NameId::new(name)).map(|param| &param.value)
    }

    /// Parameters in insertion order.
    #[must_use]
    pub fn parameters(&self) -> &[MaterialParameter] {
        &self.parameters
    }

    pub fn set_int(&mut self, name: &str, value: i32) -> bool {
        self.set_parameter(name, MaterialValue::Int(value))
    }

    pub fn set_float(&mut self, name: &str, value: f32) -> bool {
        self.set_parameter(name, MaterialValue::Float(value))
    }

    pub fn set_vector2(&mut self, name: &str, value: Vec2) -> bool {
        self.set_parameter(name, MaterialValue::Vector2(value))
    }

    pub fn set_vector3(&mut self, name: &str, value: Vec3) -> bool {
        self.set_parameter(name, MaterialValue::Vector3(value))
    }

    pub fn set_vector4(&mut self, name: &str, value: Vec4) -> bool {
        self.set_parameter(name, MaterialValue::Vector4(value))
    }

    pub fn set_color(&mut self, name: &str, value: Vec4) -> bool {
        self.set_parameter(name, MaterialValue::Color(value))
    }

    pub fn set_matrix3(&mut self, name: &str, value: Mat3) -> bool {
        self.set_parameter(name, MaterialValue::Matrix3(value))
    }

    pub fn set_matrix4(&mut self, name: &str, value: Mat4) -> bool {
        self.set_parameter(name, MaterialValue::Matrix4(value))
    }

    /// `None` rebinds the fallback texture.
    pub fn set_texture(&mut self, name: &str, texture: Option<TextureHandle>) -> bool {
        self.set_parameter(name, MaterialValue::Texture(texture))
    }

    pub fn set_vector4_array(&mut self, name: &str, values: &[Vec4]) -> bool {
        self.set_parameter(name, MaterialValue::Vector4Array(values.to_vec()))
    }

    pub fn set_matrix4_array(&mut self, name: &str, values: &[Mat4]) -> bool {
        self.set_parameter(name, MaterialValue::Matrix4Array(values.to_vec()))
    }

    #[must_use]
    pub fn main_color(&self) -> Vec4 {
        match self.parameter(MAIN_COLOR) {
            Some(MaterialValue::Color(c) | MaterialValue::Vector4(c)) => *c,
            _ => Vec4::ONE,
        }
    }

    pub fn set_main_color(&mut self, color: Vec4) -> bool {
        self.set_color(MAIN_COLOR, color)
    }

    #[must_use]
    pub fn main_texture(&self) -> Option<TextureHandle> {
        match self.parameter(MAIN_TEXTURE) {
            Some(MaterialValue::Texture(handle)) => *handle,
            _ => None,
        }
    }

    pub fn set_main_texture(&mut self, texture: Option<TextureHandle>) -> bool {
        self.set_texture(MAIN_TEXTURE, texture)
    }

    // ========================================================================
    // State
    // ========================================================================

    #[inline]
    #[must_use]
    pub fn shader(&self) -> &Arc<Shader> {
        &self.shader
    }

    /// Index of the selected shader instance.
    #[inline]
    #[must_use]
    pub fn variant(&self) -> Option<usize> {
        self.variant
    }

    #[must_use]
    pub fn instance(&self) -> Option<&ShaderInstance> {
        self.variant.and_then(|index| self.shader.instance(index))
    }

    #[must_use]
    pub fn program(&self) -> Option<ProgramId> {
        if self.shader.is_disposed() {
            return None;
        }
        self.instance().and_then(ShaderInstance::program)
    }

    /// A variant is selected and has a compiled program.
    #[must_use]
    pub fn is_renderable(&self) -> bool {
        self.program().is_some()
    }

    /// Packed uniform blocks of the selected variant.
    #[inline]
    #[must_use]
    pub fn uniform_blocks(&self) -> &[StagedBlock] {
        &self.blocks
    }

    #[must_use]
    pub fn textures(&self, stage: ShaderStage) -> &[TextureSlot] {
        match stage {
            ShaderStage::Vertex => &self.vertex_textures,
            ShaderStage::Fragment => &self.fragment_textures,
        }
    }

    #[inline]
    #[must_use]
    pub fn fallback_texture(&self) -> TextureHandle {
        self.fallback_texture
    }

    #[inline]
    #[must_use]
    pub fn cull_mode(&self) -> CullMode {
        self.cull_mode
    }

    pub fn set_cull_mode(&mut self, cull_mode: CullMode) {
        self.cull_mode = cull_mode;
    }

    /// Hash of everything that affects rendering, for batching decisions.
    #[must_use]
    pub fn state_hash(&self) -> u64 {
        let mut hasher = FxHasher::default();
        self.shader.id().hash(&mut hasher);
        self.variant.hash(&mut hasher);
        self.cull_mode.hash(&mut hasher);
        for param in &self.parameters {
            param.id.hash(&mut hasher);
            param.value.hash_into(&mut hasher);
        }
        hasher.finish()
    }
}
