//! Logical textures and their GPU plane sets.
//!
//! A logical texture maps to one, two, or three GPU texture objects:
//! RGBA-family formats use a single plane; planar YUV uses full-size
//! Y plus two quarter-size chroma planes sampled on units 0/1/2;
//! semi-planar NV12/NV21 use Y plus one half-resolution interleaved
//! chroma plane (luminance-alpha) on unit 1.

use smallvec::SmallVec;

use crate::core::handle::Handle;
use crate::gpu::{FramebufferObject, PlaneLayout, TextureObject};

use super::BlendMode;

/// Marker type for texture handles.
#[derive(Debug)]
pub struct TextureMarker;

/// Host-facing handle to a renderer-owned texture.
pub type TextureId = Handle<TextureMarker>;

/// Logical pixel formats accepted by `create_texture`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PixelFormat {
    Argb8888,
    Abgr8888,
    /// 32-bit XRGB (alpha byte unused).
    Rgb888,
    /// 32-bit XBGR (alpha byte unused).
    Bgr888,
    /// Planar 4:2:0, order Y U V.
    Iyuv,
    /// Planar 4:2:0, order Y V U.
    Yv12,
    /// Semi-planar 4:2:0, interleaved UV.
    Nv12,
    /// Semi-planar 4:2:0, interleaved VU.
    Nv21,
}

impl PixelFormat {
    /// Bytes per pixel of the primary plane.
    #[inline]
    pub const fn bytes_per_pixel(&self) -> usize {
        match self {
            PixelFormat::Argb8888
            | PixelFormat::Abgr8888
            | PixelFormat::Rgb888
            | PixelFormat::Bgr888 => 4,
            PixelFormat::Iyuv | PixelFormat::Yv12 | PixelFormat::Nv12 | PixelFormat::Nv21 => 1,
        }
    }

    /// Three-plane 4:2:0 layouts.
    #[inline]
    pub const fn is_planar_yuv(&self) -> bool {
        matches!(self, PixelFormat::Iyuv | PixelFormat::Yv12)
    }

    /// Two-plane layouts with interleaved chroma.
    #[inline]
    pub const fn is_semi_planar(&self) -> bool {
        matches!(self, PixelFormat::Nv12 | PixelFormat::Nv21)
    }

    /// Texel layout of the primary plane.
    #[inline]
    pub const fn primary_layout(&self) -> PlaneLayout {
        match self {
            PixelFormat::Argb8888
            | PixelFormat::Abgr8888
            | PixelFormat::Rgb888
            | PixelFormat::Bgr888 => PlaneLayout::Rgba,
            _ => PlaneLayout::Luminance,
        }
    }
}

/// Update policy declared at creation time.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TextureAccess {
    /// Rarely updated.
    Static,
    /// Updated often; owns a CPU-side pixel scratch for locking.
    Streaming,
    /// Usable as a render target.
    Target,
}

/// Renderer-internal record for one logical texture.
pub(crate) struct TextureData {
    pub format: PixelFormat,
    pub access: TextureAccess,
    pub w: u32,
    pub h: u32,
    /// GPU planes ordered `[y]`, `[y, uv]`, or `[y, u, v]`.
    pub planes: SmallVec<[TextureObject; 3]>,
    /// CPU scratch for streaming textures, empty otherwise.
    pub pixel_data: Vec<u8>,
    /// Byte pitch of the primary plane in `pixel_data`.
    pub pitch: usize,
    /// Pooled framebuffer, set only for `TextureAccess::Target`.
    pub fbo: Option<FramebufferObject>,
    /// True while unflushed commands reference this texture.
    pub in_batch: bool,
    /// Color modulation applied per vertex at copy time.
    pub color_mod: [u8; 4],
    /// Blend mode used when this texture is copied.
    pub blend: BlendMode,
}

impl TextureData {
    /// Primary (Y or RGBA) plane.
    #[inline]
    pub fn plane_y(&self) -> TextureObject {
        self.planes[0]
    }
}

/// Bytes of CPU scratch a streaming texture needs: the primary plane
/// plus chroma storage for YUV layouts.
pub(crate) fn streaming_scratch_len(format: PixelFormat, h: u32, pitch: usize) -> usize {
    let primary = h as usize * pitch;
    if format.is_planar_yuv() || format.is_semi_planar() {
        primary + primary / 2
    } else {
        primary
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bytes_per_pixel_by_family() {
        assert_eq!(PixelFormat::Argb8888.bytes_per_pixel(), 4);
        assert_eq!(PixelFormat::Bgr888.bytes_per_pixel(), 4);
        assert_eq!(PixelFormat::Iyuv.bytes_per_pixel(), 1);
        assert_eq!(PixelFormat::Nv21.bytes_per_pixel(), 1);
    }

    #[test]
    fn plane_family_classification() {
        assert!(PixelFormat::Iyuv.is_planar_yuv());
        assert!(PixelFormat::Yv12.is_planar_yuv());
        assert!(!PixelFormat::Nv12.is_planar_yuv());
        assert!(PixelFormat::Nv12.is_semi_planar());
        assert!(PixelFormat::Nv21.is_semi_planar());
        assert!(!PixelFormat::Abgr8888.is_semi_planar());
    }

    #[test]
    fn primary_layout_is_luminance_for_yuv() {
        assert_eq!(PixelFormat::Argb8888.primary_layout(), PlaneLayout::Rgba);
        assert_eq!(PixelFormat::Yv12.primary_layout(), PlaneLayout::Luminance);
        assert_eq!(PixelFormat::Nv12.primary_layout(), PlaneLayout::Luminance);
    }

    #[test]
    fn scratch_sizing_adds_chroma_for_yuv() {
        // 16x16 at 1 bpp: 256 luma + 128 chroma.
        assert_eq!(streaming_scratch_len(PixelFormat::Iyuv, 16, 16), 384);
        assert_eq!(streaming_scratch_len(PixelFormat::Nv12, 16, 16), 384);
        // RGBA: primary plane only.
        assert_eq!(streaming_scratch_len(PixelFormat::Abgr8888, 16, 64), 1024);
    }
}
