//! Fixed video description derived from negotiated caps.

use crate::caps::{Caps, IntField, InterlaceMode};
use crate::fraction::Fraction;
use crate::video_format::VideoFormat;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum VideoInfoError {
    #[error("Caps are empty")]
    Empty,

    #[error("Caps field not fixed: {0}")]
    NotFixed(&'static str),

    #[error("Invalid dimensions {width}x{height}")]
    InvalidSize { width: i64, height: i64 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VideoInfo {
    pub format: VideoFormat,
    pub width: u32,
    pub height: u32,
    pub par: Fraction,
    pub interlace_mode: InterlaceMode,
    /// Bytes of one frame
    pub size: usize,
}

impl VideoInfo {
    pub fn new(format: VideoFormat, width: u32, height: u32) -> Result<Self, VideoInfoError> {
        let size = format
            .frame_size(width, height)
            .ok_or(VideoInfoError::InvalidSize {
                width: width.into(),
                height: height.into(),
            })?;
        Ok(Self {
            format,
            width,
            height,
            par: Fraction::ONE,
            interlace_mode: InterlaceMode::Progressive,
            size,
        })
    }

    pub fn with_interlace_mode(mut self, mode: InterlaceMode) -> Self {
        self.interlace_mode = mode;
        self
    }

    /// Parse the first structure of fixed caps. Missing PAR means square
    /// pixels, missing interlace mode means progressive.
    pub fn from_caps(caps: &Caps) -> Result<Self, VideoInfoError> {
        let s = caps.structure(0).ok_or(VideoInfoError::Empty)?;

        let format = s.format_fixed().ok_or(VideoInfoError::NotFixed("format"))?;
        let width = s
            .get_int(IntField::Width)
            .ok_or(VideoInfoError::NotFixed("width"))?;
        let height = s
            .get_int(IntField::Height)
            .ok_or(VideoInfoError::NotFixed("height"))?;
        if width <= 0 || height <= 0 {
            return Err(VideoInfoError::InvalidSize {
                width: width.into(),
                height: height.into(),
            });
        }

        let par = match &s.pixel_aspect_ratio {
            Some(value) => value
                .fixed()
                .ok_or(VideoInfoError::NotFixed("pixel-aspect-ratio"))?,
            None => Fraction::ONE,
        };

        let mut info = Self::new(format, width as u32, height as u32)?;
        info.par = par;
        info.interlace_mode = s.interlace_mode.unwrap_or_default();
        Ok(info)
    }

    /// Equality as far as blitting is concerned: size and pixel format.
    /// Pixel aspect ratio and colorimetry do not count.
    pub fn is_equal_for_blit(&self, other: &VideoInfo) -> bool {
        self.width == other.width && self.height == other.height && self.format == other.format
    }
}
