use bitflags::bitflags;
use serde::{Deserialize, Serialize};

use crate::backend::{NativeStaging, NativeTexture};

use super::ResourceHandle;

/// Marker for texture handles.
#[derive(Debug)]
pub enum Texture {}

pub type TextureHandle = ResourceHandle<Texture>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum TextureFormat {
    #[default]
    Rgba8Unorm,
    Bgra8Unorm,
    R8Unorm,
    Rgba16Float,
    Rgba32Float,
    Depth32Float,
}

impl TextureFormat {
    #[must_use]
    pub const fn bytes_per_pixel(self) -> u32 {
        match self {
            Self::R8Unorm => 1,
            Self::Rgba8Unorm | Self::Bgra8Unorm | Self::Depth32Float => 4,
            Self::Rgba16Float => 8,
            Self::Rgba32Float => 16,
        }
    }

    #[must_use]
    pub const fn is_depth(self) -> bool {
        matches!(self, Self::Depth32Float)
    }
}

bitflags! {
    /// Sampling and usage flags of a texture.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct TextureFlags: u32 {
        const LINEAR_FILTER = 1 << 0;
        const ANISOTROPIC   = 1 << 1;
        const REPEAT_U      = 1 << 2;
        const REPEAT_V      = 1 << 3;
        const REPEAT_W      = 1 << 4;
        const MIRROR_U      = 1 << 5;
        const MIRROR_V      = 1 << 6;
        const MIRROR_W      = 1 << 7;
        const COLOR_TARGET  = 1 << 8;
        const DEPTH_TARGET  = 1 << 9;
        const READBACK      = 1 << 10;

        /// Bits that affect sampler state.
        const SAMPLER_MASK = Self::LINEAR_FILTER.bits()
            | Self::ANISOTROPIC.bits()
            | Self::REPEAT_U.bits()
            | Self::REPEAT_V.bits()
            | Self::REPEAT_W.bits()
            | Self::MIRROR_U.bits()
            | Self::MIRROR_V.bits()
            | Self::MIRROR_W.bits();
    }
}

/// Sampler cache key: the sampler-relevant subset of [`TextureFlags`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct SamplerKey(TextureFlags);

impl SamplerKey {
    #[inline]
    #[must_use]
    pub fn from_flags(flags: TextureFlags) -> Self {
        Self(flags & TextureFlags::SAMPLER_MASK)
    }

    #[inline]
    #[must_use]
    pub fn flags(self) -> TextureFlags {
        self.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TextureDesc {
    pub width: u32,
    pub height: u32,
    pub format: TextureFormat,
    pub flags: TextureFlags,
}

impl TextureDesc {
    #[must_use]
    pub fn new(width: u32, height: u32, format: TextureFormat) -> Self {
        Self {
            width,
            height,
            format,
            flags: TextureFlags::LINEAR_FILTER,
        }
    }

    #[must_use]
    pub fn with_flags(mut self, flags: TextureFlags) -> Self {
        self.flags = flags;
        self
    }

    /// Size of the full image in bytes.
    #[inline]
    #[must_use]
    pub fn byte_length(&self) -> usize {
        self.width as usize * self.height as usize * self.format.bytes_per_pixel() as usize
    }

    #[inline]
    #[must_use]
    pub fn bytes_per_row(&self) -> u32 {
        self.width * self.format.bytes_per_pixel()
    }
}

/// Registry record for a texture.
#[derive(Debug, Clone)]
pub struct TextureResource {
    pub native: Option<NativeTexture>,
    pub staging: Option<NativeStaging>,
    pub desc: TextureDesc,
    /// Byte length of the last upload.
    pub length: usize,
    pub used: bool,
}

impl TextureResource {
    #[must_use]
    pub fn new(desc: TextureDesc) -> Self {
        Self {
            native: None,
            staging: None,
            desc,
            length: 0,
            used: true,
        }
    }

    #[inline]
    #[must_use]
    pub fn resident(&self) -> Option<NativeTexture> {
        if self.used { self.native } else { None }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sampler_key_ignores_target_bits() {
        let a = SamplerKey::from_flags(TextureFlags::LINEAR_FILTER | TextureFlags::COLOR_TARGET);
        let b = SamplerKey::from_flags(TextureFlags::LINEAR_FILTER | TextureFlags::READBACK);
        assert_eq!(a, b);
        assert_ne!(a, SamplerKey::from_flags(TextureFlags::REPEAT_U));
    }

    #[test]
    fn byte_length_uses_format() {
        let desc = TextureDesc::new(4, 2, TextureFormat::Rgba16Float);
        assert_eq!(desc.byte_length(), 64);
        assert_eq!(desc.bytes_per_row(), 32);
    }
}
