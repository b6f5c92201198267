//! Shader & Variant Resolution
//!
//! A [`Shader`] is the runtime form of a [`ShaderMetadata`] asset: one
//! [`ShaderInstance`] per compiled variant plus the material-facing uniform
//! declarations.
//!
//! # Design
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │ Shader (id #7)                                               │
//! │                                                              │
//! │  uniforms:  [mainColor, useLighting→LIT, bones[64]]          │
//! │  lookup:    IntKeyCache  NameId → uniforms index             │
//! │                                                              │
//! │  instances (declaration order):                              │
//! │   [0] key {}            program #1  vertex/fragment layouts  │
//! │   [1] key {LIT}         program #2  ...                      │
//! │   [2] key {LIT,SKINNING} program #3 ...                      │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! Uniform locations are per instance: the same uniform may sit at a
//! different offset, or be absent, in each variant.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use rustc_hash::FxHashMap;
use smallvec::SmallVec;

use super::metadata::{ShaderMetadata, ShaderStage, ShaderVariantSource, StageSource, UniformBlockLayout};
use super::uniform::{ShaderHandle, UniformInfo, UniformLocation, UniformLocations, split_array_name};
use super::variant::{KeywordSet, VariantKey, keywords};
use crate::backend::ProgramId;
use crate::errors::{Result, RhiError};
use crate::utils::{IntKeyCache, NameId};

/// Name of the per-draw built-in uniform block filled by the executor.
pub const RENDER_DATA_BLOCK: &str = "RenderData";

static NEXT_SHADER_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique shader identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ShaderId(u64);

impl ShaderId {
    fn next() -> Self {
        Self(NEXT_SHADER_ID.fetch_add(1, Ordering::Relaxed))
    }

    #[inline]
    #[must_use]
    pub fn raw(self) -> u64 {
        self.0
    }
}

// ─── Stage Layout ─────────────────────────────────────────────────────────────

/// Uniform blocks and texture bindings of one stage of one variant.
#[derive(Debug, Clone, Default)]
pub struct StageLayout {
    blocks: Vec<UniformBlockLayout>,
    fields: FxHashMap<NameId, (u16, u32, u32)>,
    /// `(name, binding)`, sorted by binding.
    textures: SmallVec<[(NameId, u32); 4]>,
    storage_buffers: u32,
}

impl StageLayout {
    fn from_source(source: &StageSource) -> Self {
        let mut fields = FxHashMap::default();
        for (block_index, block) in source.uniform_blocks.iter().enumerate() {
            for field in &block.fields {
                let (name, _) = split_array_name(&field.name);
                fields.insert(NameId::new(name), (block_index as u16, field.offset, field.size));
            }
        }

        let mut textures: SmallVec<[(NameId, u32); 4]> = source
            .textures
            .iter()
            .map(|t| (NameId::new(&t.name), t.binding))
            .collect();
        textures.sort_unstable_by_key(|&(_, binding)| binding);

        Self {
            blocks: source.uniform_blocks.clone(),
            fields,
            textures,
            storage_buffers: source.storage_buffers,
        }
    }

    #[inline]
    #[must_use]
    pub fn blocks(&self) -> &[UniformBlockLayout] {
        &self.blocks
    }

    #[inline]
    #[must_use]
    pub fn textures(&self) -> &[(NameId, u32)] {
        &self.textures
    }

    #[inline]
    #[must_use]
    pub fn storage_buffers(&self) -> u32 {
        self.storage_buffers
    }

    fn location(&self, stage: ShaderStage, name: NameId) -> Option<UniformLocation> {
        self.fields
            .get(&name)
            .map(|&(block, offset, size)| UniformLocation {
                stage,
                block,
                offset,
                size,
            })
    }

    fn block_named(&self, name: &str) -> Option<u16> {
        self.blocks
            .iter()
            .position(|block| block.name == name)
            .map(|index| index as u16)
    }
}

// ─── Shader Instance ──────────────────────────────────────────────────────────

/// One compiled variant.
#[derive(Debug, Clone)]
pub struct ShaderInstance {
    key: VariantKey,
    key_string: String,
    program: Option<ProgramId>,
    vertex: StageLayout,
    fragment: StageLayout,
}

impl ShaderInstance {
    fn new(source: &ShaderVariantSource, program: Option<ProgramId>) -> Self {
        Self {
            key: VariantKey::parse(&source.key),
            key_string: source.key.split_whitespace().collect::<Vec<_>>().join(" "),
            program,
            vertex: StageLayout::from_source(&source.vertex),
            fragment: StageLayout::from_source(&source.fragment),
        }
    }

    #[inline]
    #[must_use]
    pub fn key(&self) -> &VariantKey {
        &self.key
    }

    /// Keyword names as written in the asset, single-space separated.
    #[inline]
    #[must_use]
    pub fn key_string(&self) -> &str {
        &self.key_string
    }

    /// Compiled program; `None` if compilation failed or no device was used.
    #[inline]
    #[must_use]
    pub fn program(&self) -> Option<ProgramId> {
        self.program
    }

    #[inline]
    #[must_use]
    pub fn stage(&self, stage: ShaderStage) -> &StageLayout {
        match stage {
            ShaderStage::Vertex => &self.vertex,
            ShaderStage::Fragment => &self.fragment,
        }
    }

    /// Every location of uniform `name` in this variant.
    #[must_use]
    pub fn locations(&self, name: NameId) -> UniformLocations {
        let mut out = UniformLocations::new();
        out.extend(self.vertex.location(ShaderStage::Vertex, name));
        out.extend(self.fragment.location(ShaderStage::Fragment, name));
        out
    }

    /// Stage and block index of the built-in [`RENDER_DATA_BLOCK`].
    #[must_use]
    pub fn render_data_block(&self) -> Option<(ShaderStage, u16)> {
        self.vertex
            .block_named(RENDER_DATA_BLOCK)
            .map(|block| (ShaderStage::Vertex, block))
            .or_else(|| {
                self.fragment
                    .block_named(RENDER_DATA_BLOCK)
                    .map(|block| (ShaderStage::Fragment, block))
            })
    }
}

// ─── Shader ───────────────────────────────────────────────────────────────────

pub struct Shader {
    id: ShaderId,
    name: String,
    /// Declared plus built-in keywords that some variant key mentions, sorted.
    accepted_keywords: SmallVec<[NameId; 8]>,
    uniforms: Vec<UniformInfo>,
    uniform_lookup: IntKeyCache,
    instances: Vec<ShaderInstance>,
    disposed: AtomicBool,
}

impl Shader {
    /// Builds a shader without compiled programs.
    #[must_use]
    pub fn new(metadata: &ShaderMetadata) -> Self {
        Self::build(metadata, |_| None)
    }

    /// Builds a shader, compiling each variant with `compile`.
    ///
    /// A variant whose compilation fails stays resolvable but has no
    /// program, so materials selecting it are not renderable.
    pub fn build(
        metadata: &ShaderMetadata,
        mut compile: impl FnMut(&ShaderVariantSource) -> Option<ProgramId>,
    ) -> Self {
        let mut uniforms = Vec::with_capacity(metadata.uniforms.len());
        let mut uniform_lookup = IntKeyCache::with_capacity(metadata.uniforms.len());
        for decl in &metadata.uniforms {
            let info = UniformInfo::from_decl(decl);
            if uniform_lookup.contains(info.id.raw()) {
                log::warn!("Shader '{}': duplicate uniform '{}' ignored", metadata.name, info.name);
                continue;
            }
            uniform_lookup.insert(info.id.raw(), uniforms.len() as u32);
            uniforms.push(info);
        }

        let mut instances: Vec<ShaderInstance> = Vec::with_capacity(metadata.instances.len());
        for source in &metadata.instances {
            let key = VariantKey::parse(&source.key);
            if instances.iter().any(|existing| existing.key == key) {
                log::warn!(
                    "Shader '{}': duplicate variant '{}' ignored",
                    metadata.name,
                    source.key
                );
                continue;
            }
            let program = compile(source);
            if program.is_none() {
                log::debug!("Shader '{}': variant '{}' has no program", metadata.name, source.key);
            }
            instances.push(ShaderInstance::new(source, program));
        }

        // A keyword no variant key mentions could only ever lead to an
        // unmatched set, so it is not accepted.
        let mut accepted_keywords: SmallVec<[NameId; 8]> = metadata
            .variants
            .iter()
            .map(String::as_str)
            .chain(keywords::BUILTIN.iter().copied())
            .map(NameId::new)
            .filter(|id| {
                instances
                    .iter()
                    .any(|instance| instance.key.pieces().contains(id))
            })
            .collect();
        accepted_keywords.sort_unstable();
        accepted_keywords.dedup();

        Self {
            id: ShaderId::next(),
            name: metadata.name.clone(),
            accepted_keywords,
            uniforms,
            uniform_lookup,
            instances,
            disposed: AtomicBool::new(false),
        }
    }

    #[inline]
    #[must_use]
    pub fn id(&self) -> ShaderId {
        self.id
    }

    #[inline]
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[inline]
    #[must_use]
    pub fn instances(&self) -> &[ShaderInstance] {
        &self.instances
    }

    #[inline]
    #[must_use]
    pub fn instance(&self, index: usize) -> Option<&ShaderInstance> {
        self.instances.get(index)
    }

    #[inline]
    #[must_use]
    pub fn uniforms(&self) -> &[UniformInfo] {
        &self.uniforms
    }

    /// Declared uniform by id.
    #[must_use]
    pub fn uniform_info(&self, id: NameId) -> Option<&UniformInfo> {
        self.uniform_lookup
            .get_name(id)
            .map(|index| &self.uniforms[index as usize])
    }

    /// Looks up a declared uniform. `name` may carry an array suffix.
    /// Disposed shaders return `None`.
    #[must_use]
    pub fn uniform_handle(&self, name: &str) -> Option<ShaderHandle> {
        if self.is_disposed() {
            return None;
        }
        let (name, _) = split_array_name(name);
        let uniform = NameId::new(name);
        let index = self.uniform_lookup.get_name(uniform)?;
        Some(ShaderHandle {
            owner: self.id,
            uniform,
            index,
        })
    }

    /// Resolves a handle obtained from [`Self::uniform_handle`].
    pub fn try_uniform(&self, handle: &ShaderHandle) -> Result<&UniformInfo> {
        if handle.owner != self.id {
            return Err(RhiError::ForeignShaderHandle {
                owner: handle.owner.raw(),
                shader: self.id.raw(),
            });
        }
        if self.is_disposed() {
            return Err(RhiError::ShaderDisposed(self.name.clone()));
        }
        self.uniforms
            .get(handle.index as usize)
            .filter(|info| info.id == handle.uniform)
            .ok_or_else(|| RhiError::UnknownUniform(format!("{:?}", handle.uniform)))
    }

    /// Whether materials may enable `keyword` on this shader.
    #[must_use]
    pub fn accepts_keyword(&self, keyword: NameId) -> bool {
        self.accepted_keywords.binary_search(&keyword).is_ok()
    }

    /// First instance, in declaration order, whose key is exactly `active`.
    #[must_use]
    pub fn resolve(&self, active: &KeywordSet) -> Option<usize> {
        if self.is_disposed() {
            return None;
        }
        self.instances
            .iter()
            .position(|instance| instance.key.matches(active))
    }

    #[inline]
    #[must_use]
    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Acquire)
    }

    /// Marks the shader dead and returns its programs for release. Only the
    /// first call returns programs.
    pub fn dispose(&self) -> Vec<ProgramId> {
        if self.disposed.swap(true, Ordering::AcqRel) {
            return Vec::new();
        }
        log::debug!("Shader '{}' (#{}) disposed", self.name, self.id.raw());
        self.instances.iter().filter_map(ShaderInstance::program).collect()
    }
}

impl std::fmt::Debug for Shader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Shader")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("instances", &self.instances.len())
            .field("disposed", &self.is_disposed())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shader::metadata::{TextureBindingDecl, UniformDecl, UniformField, UniformType};

    fn stage_with_color(offset: u32) -> StageSource {
        StageSource {
            uniform_blocks: vec![UniformBlockLayout {
                name: "Material".into(),
                binding: 0,
                size: 32,
                fields: vec![UniformField {
                    name: "mainColor".into(),
                    offset,
                    size: 16,
                }],
            }],
            textures: vec![TextureBindingDecl {
                name: "mainTexture".into(),
                binding: 1,
            }],
            ..Default::default()
        }
    }

    fn metadata() -> ShaderMetadata {
        ShaderMetadata {
            name: "Test".into(),
            variants: vec!["LIT".into()],
            uniforms: vec![UniformDecl {
                name: "mainColor".into(),
                ty: UniformType::Color,
                variant: None,
                default_value: None,
            }],
            instances: vec![
                ShaderVariantSource {
                    key: String::new(),
                    fragment: stage_with_color(0),
                    ..Default::default()
                },
                ShaderVariantSource {
                    key: "LIT".into(),
                    fragment: stage_with_color(16),
                    ..Default::default()
                },
                ShaderVariantSource {
                    key: "LIT SKINNING".into(),
                    ..Default::default()
                },
            ],
        }
    }

    #[test]
    fn resolve_picks_exact_key() {
        let shader = Shader::new(&metadata());
        let mut active = KeywordSet::new();
        assert_eq!(shader.resolve(&active), Some(0));

        active.insert(NameId::new("LIT"));
        assert_eq!(shader.resolve(&active), Some(1));

        active.insert(NameId::new("SKINNING"));
        assert_eq!(shader.resolve(&active), Some(2));

        active.insert(NameId::new("INSTANCING"));
        assert_eq!(shader.resolve(&active), None);
    }

    #[test]
    fn locations_are_per_variant() {
        let shader = Shader::new(&metadata());
        let color = NameId::new("mainColor");
        assert_eq!(shader.instances()[0].locations(color)[0].offset, 0);
        assert_eq!(shader.instances()[1].locations(color)[0].offset, 16);
        assert!(shader.instances()[2].locations(color).is_empty());
    }

    #[test]
    fn duplicate_variants_are_dropped() {
        let mut meta = metadata();
        meta.instances.push(ShaderVariantSource {
            key: "SKINNING  LIT".into(),
            ..Default::default()
        });
        let shader = Shader::new(&meta);
        assert_eq!(shader.instances().len(), 3);
    }

    #[test]
    fn builtin_keywords_are_accepted() {
        let shader = Shader::new(&metadata());
        assert!(shader.accepts_keyword(NameId::new("LIT")));
        assert!(shader.accepts_keyword(NameId::new("SKINNING")));
        assert!(!shader.accepts_keyword(NameId::new("HALF_LAMBERT")));
    }

    #[test]
    fn keywords_without_variant_are_not_accepted() {
        let mut meta = metadata();
        meta.variants.push("HALF_LAMBERT".into());
        meta.instances.truncate(2);
        let shader = Shader::new(&meta);

        assert!(shader.accepts_keyword(NameId::new("LIT")));
        assert!(!shader.accepts_keyword(NameId::new("HALF_LAMBERT")));
        assert!(!shader.accepts_keyword(NameId::new("SKINNING")));
    }

    #[test]
    fn handle_is_bound_to_its_shader() {
        let a = Shader::new(&metadata());
        let b = Shader::new(&metadata());
        let handle = a.uniform_handle("mainColor").unwrap();

        assert!(a.try_uniform(&handle).is_ok());
        assert!(matches!(
            b.try_uniform(&handle),
            Err(RhiError::ForeignShaderHandle { .. })
        ));
    }

    #[test]
    fn disposed_shader_rejects_lookups() {
        let shader = Shader::build(&metadata(), |_| Some(ProgramId(1)));
        let handle = shader.uniform_handle("mainColor").unwrap();

        assert_eq!(shader.dispose().len(), 3);
        assert!(shader.dispose().is_empty());
        assert!(shader.uniform_handle("mainColor").is_none());
        assert!(matches!(shader.try_uniform(&handle), Err(RhiError::ShaderDisposed(_))));
        assert_eq!(shader.resolve(&KeywordSet::new()), None);
    }

    #[test]
    fn render_data_block_is_found() {
        let mut meta = metadata();
        meta.instances[0].vertex.uniform_blocks.push(UniformBlockLayout {
            name: RENDER_DATA_BLOCK.into(),
            binding: 0,
            size: 208,
            fields: Vec::new(),
        });
        let shader = Shader::new(&meta);
        assert_eq!(
            shader.instances()[0].render_data_block(),
            Some((ShaderStage::Vertex, 0))
        );
        assert_eq!(shader.instances()[1].render_data_block(), None);
    }
}
