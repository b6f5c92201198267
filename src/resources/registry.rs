//! Resource Registry
//!
//! Maps logical [`ResourceHandle`]s to backend-owned buffer and texture
//! records.
//!
//! # Lifetime
//!
//! ```text
//!   reserve ──► used = true, native = None
//!      │
//!   update ───► native + staging created (executor)
//!      │
//!   destroy ──► used = false            lookups fail from here on
//!      │
//!   collect_garbage (after GPU idle)
//!      └──────► slot removed, generation bumped, natives handed back
//! ```
//!
//! Destruction is two-phase so native objects are never released while
//! submitted GPU work may still reference them.

use slotmap::SlotMap;

use super::buffer::{BufferHandle, BufferResource, BufferUsage};
use super::handle::{ResourceHandle, ResourceKey};
use super::texture::{TextureDesc, TextureHandle, TextureResource};
use crate::backend::{NativeBuffer, NativeStaging, NativeTexture};

/// Native objects whose slots were recycled and may now be released.
#[derive(Debug, Default)]
pub struct ReleaseBatch {
    pub buffers: Vec<NativeBuffer>,
    pub textures: Vec<NativeTexture>,
    pub staging: Vec<NativeStaging>,
}

impl ReleaseBatch {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.buffers.is_empty() && self.textures.is_empty() && self.staging.is_empty()
    }
}

pub struct ResourceRegistry {
    buffers: SlotMap<ResourceKey, BufferResource>,
    textures: SlotMap<ResourceKey, TextureResource>,
    max_buffers: usize,
    max_textures: usize,
    pending_buffers: Vec<ResourceKey>,
    pending_textures: Vec<ResourceKey>,
}

impl ResourceRegistry {
    /// `0` disables the respective slot limit.
    #[must_use]
    pub fn new(max_buffers: usize, max_textures: usize) -> Self {
        Self {
            buffers: SlotMap::with_key(),
            textures: SlotMap::with_key(),
            max_buffers,
            max_textures,
            pending_buffers: Vec::new(),
            pending_textures: Vec::new(),
        }
    }

    // ========================================================================
    // Buffers
    // ========================================================================

    /// Reserves a buffer slot. Returns `None` when the slot limit is reached.
    pub fn reserve_buffer(&mut self, usage: BufferUsage) -> Option<BufferHandle> {
        if self.max_buffers > 0 && self.buffers.len() >= self.max_buffers {
            log::warn!("Buffer registry exhausted ({} slots)", self.max_buffers);
            return None;
        }
        let key = self.buffers.insert(BufferResource::new(usage));
        Some(ResourceHandle::from_key(key))
    }

    /// Live buffer record. Destroyed and stale handles resolve to `None`.
    #[must_use]
    pub fn buffer(&self, handle: BufferHandle) -> Option<&BufferResource> {
        self.buffers.get(handle.key()).filter(|res| res.used)
    }

    pub fn buffer_mut(&mut self, handle: BufferHandle) -> Option<&mut BufferResource> {
        self.buffers.get_mut(handle.key()).filter(|res| res.used)
    }

    /// Marks the buffer destroyed. The second call for the same handle, and
    /// calls with stale handles, return `false` and change nothing.
    pub fn destroy_buffer(&mut self, handle: BufferHandle) -> bool {
        match self.buffers.get_mut(handle.key()) {
            Some(res) if res.used => {
                res.used = false;
                self.pending_buffers.push(handle.key());
                true
            }
            _ => false,
        }
    }

    // ========================================================================
    // Textures
    // ========================================================================

    pub fn reserve_texture(&mut self, desc: TextureDesc) -> Option<TextureHandle> {
        if self.max_textures > 0 && self.textures.len() >= self.max_textures {
            log::warn!("Texture registry exhausted ({} slots)", self.max_textures);
            return None;
        }
        let key = self.textures.insert(TextureResource::new(desc));
        Some(ResourceHandle::from_key(key))
    }

    #[must_use]
    pub fn texture(&self, handle: TextureHandle) -> Option<&TextureResource> {
        self.textures.get(handle.key()).filter(|res| res.used)
    }

    pub fn texture_mut(&mut self, handle: TextureHandle) -> Option<&mut TextureResource> {
        self.textures.get_mut(handle.key()).filter(|res| res.used)
    }

    pub fn destroy_texture(&mut self, handle: TextureHandle) -> bool {
        match self.textures.get_mut(handle.key()) {
            Some(res) if res.used => {
                res.used = false;
                self.pending_textures.push(handle.key());
                true
            }
            _ => false,
        }
    }

    // ========================================================================
    // Garbage Collection
    // ========================================================================

    /// Recycles the slots of destroyed resources.
    ///
    /// Call only once the device guarantees no in-flight work references
    /// them; the caller releases the returned native objects.
    pub fn collect_garbage(&mut self) -> ReleaseBatch {
        let mut batch = ReleaseBatch::default();

        for key in self.pending_buffers.drain(..) {
            if let Some(res) = self.buffers.remove(key) {
                batch.buffers.extend(res.native);
                batch.staging.extend(res.staging);
            }
        }
        for key in self.pending_textures.drain(..) {
            if let Some(res) = self.textures.remove(key) {
                batch.textures.extend(res.native);
                batch.staging.extend(res.staging);
            }
        }

        if !batch.is_empty() {
            log::debug!(
                "Registry released {} buffers, {} textures, {} staging buffers",
                batch.buffers.len(),
                batch.textures.len(),
                batch.staging.len()
            );
        }
        batch
    }

    #[must_use]
    pub fn has_pending_releases(&self) -> bool {
        !self.pending_buffers.is_empty() || !self.pending_textures.is_empty()
    }

    /// Occupied buffer slots, including destroyed ones awaiting collection.
    #[must_use]
    pub fn buffer_slots(&self) -> usize {
        self.buffers.len()
    }

    #[must_use]
    pub fn texture_slots(&self) -> usize {
        self.textures.len()
    }

    /// Takes every resource out of the registry, live or not. Used at
    /// shutdown after the device is idle.
    pub fn drain_all(&mut self) -> ReleaseBatch {
        let mut batch = ReleaseBatch::default();
        for (_, res) in self.buffers.drain() {
            batch.buffers.extend(res.native);
            batch.staging.extend(res.staging);
        }
        for (_, res) in self.textures.drain() {
            batch.textures.extend(res.native);
            batch.staging.extend(res.staging);
        }
        self.pending_buffers.clear();
        self.pending_textures.clear();
        batch
    }
}
