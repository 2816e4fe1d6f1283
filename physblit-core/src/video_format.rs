//! Raw video pixel formats and their descriptors.
//!
//! The descriptor carries what format negotiation needs to judge how lossy a
//! conversion is (color model, alpha, palette, chroma subsampling, depth) and
//! what buffer allocation needs (frame size).

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

// ============================================================================
// Pixel Formats
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum VideoFormat {
    // YUV planar
    I420,
    Yv12,
    Y42b,
    Y444,
    I420P10,

    // YUV semi-planar
    Nv12,
    Nv21,
    Nv16,
    P010,

    // YUV packed
    Yuy2,
    Uyvy,

    // RGB packed
    Rgb16,
    Bgr16,
    Rgb,
    Bgr,
    Rgbx,
    Bgrx,
    Xrgb,
    Xbgr,
    Rgba,
    Bgra,
    Argb,
    Abgr,

    // Palettized
    Rgb8p,

    // Gray
    Gray8,
    Gray16Le,
}

impl VideoFormat {
    pub const ALL: [VideoFormat; 26] = [
        Self::I420,
        Self::Yv12,
        Self::Y42b,
        Self::Y444,
        Self::I420P10,
        Self::Nv12,
        Self::Nv21,
        Self::Nv16,
        Self::P010,
        Self::Yuy2,
        Self::Uyvy,
        Self::Rgb16,
        Self::Bgr16,
        Self::Rgb,
        Self::Bgr,
        Self::Rgbx,
        Self::Bgrx,
        Self::Xrgb,
        Self::Xbgr,
        Self::Rgba,
        Self::Bgra,
        Self::Argb,
        Self::Abgr,
        Self::Rgb8p,
        Self::Gray8,
        Self::Gray16Le,
    ];

    pub fn name(self) -> &'static str {
        self.info().name
    }

    pub fn info(self) -> FormatInfo {
        use ColorModel::{Gray, Rgb, Yuv};
        use Layout::{Packed, Palette, Planar, SemiPlanar};

        let (name, color, alpha, w_sub, h_sub, bits, layout) = match self {
            Self::I420 => ("I420", Yuv, false, 1, 1, 8, Planar { sample: 1 }),
            Self::Yv12 => ("YV12", Yuv, false, 1, 1, 8, Planar { sample: 1 }),
            Self::Y42b => ("Y42B", Yuv, false, 1, 0, 8, Planar { sample: 1 }),
            Self::Y444 => ("Y444", Yuv, false, 0, 0, 8, Planar { sample: 1 }),
            Self::I420P10 => ("I420_10LE", Yuv, false, 1, 1, 10, Planar { sample: 2 }),
            Self::Nv12 => ("NV12", Yuv, false, 1, 1, 8, SemiPlanar { sample: 1 }),
            Self::Nv21 => ("NV21", Yuv, false, 1, 1, 8, SemiPlanar { sample: 1 }),
            Self::Nv16 => ("NV16", Yuv, false, 1, 0, 8, SemiPlanar { sample: 1 }),
            Self::P010 => ("P010_10LE", Yuv, false, 1, 1, 10, SemiPlanar { sample: 2 }),
            Self::Yuy2 => ("YUY2", Yuv, false, 1, 0, 8, Packed { pixel_stride: 2 }),
            Self::Uyvy => ("UYVY", Yuv, false, 1, 0, 8, Packed { pixel_stride: 2 }),
            Self::Rgb16 => ("RGB16", Rgb, false, 0, 0, 5, Packed { pixel_stride: 2 }),
            Self::Bgr16 => ("BGR16", Rgb, false, 0, 0, 5, Packed { pixel_stride: 2 }),
            Self::Rgb => ("RGB", Rgb, false, 0, 0, 8, Packed { pixel_stride: 3 }),
            Self::Bgr => ("BGR", Rgb, false, 0, 0, 8, Packed { pixel_stride: 3 }),
            Self::Rgbx => ("RGBx", Rgb, false, 0, 0, 8, Packed { pixel_stride: 4 }),
            Self::Bgrx => ("BGRx", Rgb, false, 0, 0, 8, Packed { pixel_stride: 4 }),
            Self::Xrgb => ("xRGB", Rgb, false, 0, 0, 8, Packed { pixel_stride: 4 }),
            Self::Xbgr => ("xBGR", Rgb, false, 0, 0, 8, Packed { pixel_stride: 4 }),
            Self::Rgba => ("RGBA", Rgb, true, 0, 0, 8, Packed { pixel_stride: 4 }),
            Self::Bgra => ("BGRA", Rgb, true, 0, 0, 8, Packed { pixel_stride: 4 }),
            Self::Argb => ("ARGB", Rgb, true, 0, 0, 8, Packed { pixel_stride: 4 }),
            Self::Abgr => ("ABGR", Rgb, true, 0, 0, 8, Packed { pixel_stride: 4 }),
            Self::Rgb8p => ("RGB8P", Rgb, false, 0, 0, 8, Palette),
            Self::Gray8 => ("GRAY8", Gray, false, 0, 0, 8, Packed { pixel_stride: 1 }),
            Self::Gray16Le => ("GRAY16_LE", Gray, false, 0, 0, 16, Packed { pixel_stride: 2 }),
        };

        FormatInfo {
            format: self,
            name,
            color,
            alpha,
            palette: matches!(layout, Palette),
            w_sub,
            h_sub,
            bits,
            layout,
        }
    }

    /// Size in bytes of one frame with the default (4-byte aligned) strides,
    /// or `None` on overflow.
    pub fn frame_size(self, width: u32, height: u32) -> Option<usize> {
        self.info().frame_size(width, height)
    }
}

impl fmt::Display for VideoFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for VideoFormat {
    type Err = UnknownFormat;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|f| f.name() == s)
            .ok_or_else(|| UnknownFormat(s.to_string()))
    }
}

impl TryFrom<String> for VideoFormat {
    type Error = UnknownFormat;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<VideoFormat> for String {
    fn from(f: VideoFormat) -> Self {
        f.name().to_string()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Unknown video format: {0}")]
pub struct UnknownFormat(pub String);

// ============================================================================
// Format Descriptor
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColorModel {
    Yuv,
    Rgb,
    Gray,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Layout {
    /// One plane, `pixel_stride` bytes per pixel
    Packed { pixel_stride: usize },
    /// Y, U and V planes
    Planar { sample: usize },
    /// Y plane and an interleaved UV plane
    SemiPlanar { sample: usize },
    /// 8-bit indices plus a 256 entry ARGB palette
    Palette,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FormatInfo {
    pub format: VideoFormat,
    pub name: &'static str,
    pub color: ColorModel,
    pub alpha: bool,
    pub palette: bool,
    /// log2 horizontal subsampling of the first chroma component
    pub w_sub: u32,
    /// log2 vertical subsampling of the first chroma component
    pub h_sub: u32,
    /// bits per component
    pub bits: u32,
    pub layout: Layout,
}

impl FormatInfo {
    /// `None` when the size does not fit in `usize`.
    pub fn frame_size(&self, width: u32, height: u32) -> Option<usize> {
        let w = width as usize;
        let h = height as usize;
        let cw = chroma_dim(w, self.w_sub);
        let ch = chroma_dim(h, self.h_sub);

        match self.layout {
            Layout::Packed { pixel_stride } => {
                // 4:2:2 packed formats store pixel pairs
                let w = if self.w_sub > 0 { round_up(w, 2)? } else { w };
                round_up(w.checked_mul(pixel_stride)?, 4)?.checked_mul(h)
            }
            Layout::Planar { sample } => {
                let luma = round_up(w.checked_mul(sample)?, 4)?.checked_mul(h)?;
                let chroma = round_up(cw.checked_mul(sample)?, 4)?.checked_mul(ch)?;
                luma.checked_add(chroma.checked_mul(2)?)
            }
            Layout::SemiPlanar { sample } => {
                let luma = round_up(w.checked_mul(sample)?, 4)?.checked_mul(h)?;
                let chroma = round_up(cw.checked_mul(2 * sample)?, 4)?.checked_mul(ch)?;
                luma.checked_add(chroma)
            }
            Layout::Palette => round_up(w, 4)?.checked_mul(h)?.checked_add(256 * 4),
        }
    }
}

fn chroma_dim(dim: usize, sub: u32) -> usize {
    dim.div_ceil(1usize << sub)
}

fn round_up(value: usize, align: usize) -> Option<usize> {
    value.div_ceil(align).checked_mul(align)
}

// ============================================================================
// Tests
// ============================================================================
