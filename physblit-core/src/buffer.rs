//! # Video Buffers
//!
//! A frame as it travels through the transform: its memory (physically
//! contiguous, or plain system memory from an upstream that knows nothing
//! about the blitter) plus the metadata the passthrough decision reads.

use crate::phys_mem::PhysMemory;
use crate::video_format::VideoFormat;
use bitflags::bitflags;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

// ============================================================================
// Memory
// ============================================================================

#[derive(Debug, Clone)]
pub enum Memory {
    /// Blitter-addressable block
    Physical(Arc<PhysMemory>),
    /// Ordinary heap memory
    System(Bytes),
}

impl Memory {
    /// Whether the memory came from a physical memory allocator.
    pub fn is_phys_memory(&self) -> bool {
        matches!(self, Self::Physical(_))
    }

    pub fn as_phys(&self) -> Option<&Arc<PhysMemory>> {
        match self {
            Self::Physical(mem) => Some(mem),
            Self::System(_) => None,
        }
    }

    pub fn phys_addr(&self) -> Option<u64> {
        self.as_phys().map(|mem| mem.phys_addr())
    }

    pub fn cpu_addr(&self) -> Option<usize> {
        self.as_phys().map(|mem| mem.cpu_addr())
    }

    /// Logical size in bytes.
    pub fn size(&self) -> usize {
        match self {
            Self::Physical(mem) => mem.size(),
            Self::System(bytes) => bytes.len(),
        }
    }
}

// ============================================================================
// Metadata
// ============================================================================

bitflags! {
    /// Per-frame video flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct VideoFrameFlags: u32 {
        /// Frame is interlaced (mixed interlace mode)
        const INTERLACED = 1 << 0;
        /// Top field first
        const TFF = 1 << 1;
        /// Repeat first field
        const RFF = 1 << 2;
        /// Only one field present
        const ONEFIELD = 1 << 3;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VideoMeta {
    pub width: u32,
    pub height: u32,
    pub format: VideoFormat,
    pub flags: VideoFrameFlags,
}

/// Region of the frame that should be shown.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct VideoCropMeta {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl VideoCropMeta {
    /// True if the rectangle cuts something off a `meta`-sized frame.
    pub fn is_effective(&self, meta: &VideoMeta) -> bool {
        self.x != 0 || self.y != 0 || self.width != meta.width || self.height != meta.height
    }
}

// ============================================================================
// Buffer
// ============================================================================

#[derive(Debug, Clone)]
pub struct VideoBuffer {
    pub memory: Memory,
    pub video_meta: Option<VideoMeta>,
    pub crop_meta: Option<VideoCropMeta>,
    /// Presentation timestamp (microseconds)
    pub pts_us: i64,
}

impl VideoBuffer {
    pub fn new(memory: Memory) -> Self {
        Self {
            memory,
            video_meta: None,
            crop_meta: None,
            pts_us: 0,
        }
    }

    pub fn physical(mem: PhysMemory) -> Self {
        Self::new(Memory::Physical(Arc::new(mem)))
    }

    pub fn with_video_meta(mut self, meta: VideoMeta) -> Self {
        self.video_meta = Some(meta);
        self
    }

    pub fn with_crop_meta(mut self, crop: VideoCropMeta) -> Self {
        self.crop_meta = Some(crop);
        self
    }

    pub fn with_pts(mut self, pts_us: i64) -> Self {
        self.pts_us = pts_us;
        self
    }

    pub fn is_phys_memory(&self) -> bool {
        self.memory.is_phys_memory()
    }

    pub fn phys_addr(&self) -> Option<u64> {
        self.memory.phys_addr()
    }
}
