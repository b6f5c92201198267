//! Render Interface Settings
//!
//! Configuration for the allocators, resource registry and command
//! executor. Settings can be built in code or loaded from JSON.
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use myth_rhi::settings::{RhiSettings, ViewOrder};
//!
//! // Defaults: 1 KiB frame allocator, bind elision on, ascending view order
//! let settings = RhiSettings::default();
//!
//! // Larger staging area, replay views in submission order
//! let settings = RhiSettings {
//!     frame_allocator_capacity: 64 * 1024,
//!     view_order: ViewOrder::Submission,
//!     ..Default::default()
//! };
//!
//! // From a config file
//! let settings = RhiSettings::from_json_str(r#"{ "max_buffers": 512 }"#)?;
//! ```

use serde::{Deserialize, Serialize};

use crate::errors::Result;

// ---------------------------------------------------------------------------
// ViewOrder
// ---------------------------------------------------------------------------

/// Order in which per-view command queues are replayed at the end of a frame.
///
/// Commands *within* a view always replay in submission order; this only
/// decides how whole views are sequenced against each other.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ViewOrder {
    /// Views replay by ascending view id.
    #[default]
    Ascending,
    /// Views replay in the order their first command was submitted.
    Submission,
}

// ---------------------------------------------------------------------------
// RhiSettings
// ---------------------------------------------------------------------------

/// Top-level configuration.
///
/// | Field | Default | Meaning |
/// |-------|---------|---------|
/// | `frame_allocator_capacity` | 1024 | Initial frame allocator size in bytes |
/// | `max_buffers` | 4096 | Buffer slots in the registry (0 = unbounded) |
/// | `max_textures` | 2048 | Texture slots in the registry (0 = unbounded) |
/// | `elide_redundant_binds` | `true` | Skip pipeline/vertex/index rebinds that match the last bind |
/// | `fallback_texture_size` | 1 | Edge length of the opaque-white fallback texture |
/// | `view_order` | `Ascending` | How views are sequenced at frame end |
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RhiSettings {
    /// Initial capacity of the per-frame uniform staging allocator, in bytes.
    ///
    /// The allocator doubles on overflow and keeps its high-water mark.
    pub frame_allocator_capacity: usize,

    /// Maximum number of live buffer slots. `0` disables the limit.
    pub max_buffers: usize,

    /// Maximum number of live texture slots. `0` disables the limit.
    pub max_textures: usize,

    /// When `false` every draw rebinds its program and geometry buffers.
    pub elide_redundant_binds: bool,

    /// Edge length in texels of the fallback texture bound to unset sampler
    /// slots.
    pub fallback_texture_size: u32,

    /// Sequencing of views at the end of a frame.
    pub view_order: ViewOrder,
}

impl Default for RhiSettings {
    fn default() -> Self {
        Self {
            frame_allocator_capacity: 1024,
            max_buffers: 4096,
            max_textures: 2048,
            elide_redundant_binds: true,
            fallback_texture_size: 1,
            view_order: ViewOrder::Ascending,
        }
    }
}

impl RhiSettings {
    /// Parses settings from a JSON document. Missing fields take their
    /// default values.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let settings: Self = serde_json::from_str(json)?;
        Ok(settings.sanitized())
    }

    /// Clamps values that would make the allocators unusable.
    #[must_use]
    pub fn sanitized(mut self) -> Self {
        self.frame_allocator_capacity = self.frame_allocator_capacity.max(16);
        self.fallback_texture_size = self.fallback_texture_size.max(1);
        self
    }
}
