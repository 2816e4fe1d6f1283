//! # Blitter Interface
//!
//! The hardware transform engine the stage drives: it is configured with
//! rotation, crop and deinterlacing, given an input and an output buffer,
//! and told to blit. Pixel work happens entirely behind this trait.
//!
//! [`DryRunBlitter`] is the in-process engine: it validates buffers and
//! records every operation it would have submitted, without touching pixels.

use crate::buffer::{Memory, VideoBuffer, VideoCropMeta};
use crate::buffer_pool::{BufferPool, BufferPoolConfig, PoolError, PoolOption};
use crate::caps::Caps;
use crate::phys_mem::{AllocationParams, PhysMemAllocator, PhysMemError};
use crate::video_format::VideoFormat;
use crate::video_info::VideoInfo;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, trace};

// ============================================================================
// Configuration Enums
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RotationMode {
    #[default]
    None,
    /// 90 degrees clockwise
    Rotate90,
    Rotate180,
    /// 90 degrees counter-clockwise
    Rotate270,
    HorizontalFlip,
    VerticalFlip,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeinterlaceMode {
    #[default]
    None,
    /// Motion adaptive, uses the previous field
    Slow,
    /// Field interpolation only
    Fast,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BlitError {
    #[error("Buffer is not backed by physical memory")]
    NotPhysical,

    #[error("No input buffer set")]
    NoInput,

    #[error("No output buffer set")]
    NoOutput,

    #[error("Input video info not configured")]
    NotConfigured,

    #[error("Blitter device error: {0}")]
    Device(String),
}

impl From<PhysMemError> for BlitError {
    fn from(e: PhysMemError) -> Self {
        Self::Device(e.to_string())
    }
}

impl From<PoolError> for BlitError {
    fn from(e: PoolError) -> Self {
        Self::Device(e.to_string())
    }
}

// ============================================================================
// Blitter Trait
// ============================================================================

pub trait Blitter: Send {
    fn name(&self) -> &str;

    fn set_output_rotation(&mut self, mode: RotationMode);
    fn output_rotation(&self) -> RotationMode;

    fn enable_crop(&mut self, enable: bool);
    fn is_crop_enabled(&self) -> bool;

    fn set_deinterlace_mode(&mut self, mode: DeinterlaceMode);
    fn deinterlace_mode(&self) -> DeinterlaceMode;

    /// Negotiated description of every input frame.
    fn set_input_info(&mut self, info: &VideoInfo);
    fn input_info(&self) -> Option<&VideoInfo>;

    fn set_input_buffer(&mut self, buffer: &VideoBuffer) -> Result<(), BlitError>;
    fn set_output_buffer(&mut self, buffer: &VideoBuffer) -> Result<(), BlitError>;

    /// Run the configured operation from the input into the output buffer.
    fn blit(&mut self) -> Result<(), BlitError>;

    /// Pool producing output buffers this blitter can write into.
    fn create_buffer_pool(
        &self,
        caps: &Caps,
        size: usize,
        min_buffers: u32,
        max_buffers: u32,
    ) -> Result<Arc<BufferPool>, BlitError>;

    /// Whether any configured operation could make the output differ from
    /// the input.
    fn are_transforms_enabled(&self) -> bool {
        self.output_rotation() != RotationMode::None
            || self.deinterlace_mode() != DeinterlaceMode::None
            || self.is_crop_enabled()
    }
}

/// Formats the blitters in this crate read and write.
pub const SUPPORTED_FORMATS: &[VideoFormat] = &[
    VideoFormat::I420,
    VideoFormat::Yv12,
    VideoFormat::Y42b,
    VideoFormat::Y444,
    VideoFormat::Nv12,
    VideoFormat::Nv16,
    VideoFormat::Yuy2,
    VideoFormat::Uyvy,
    VideoFormat::Rgb16,
    VideoFormat::Bgr16,
    VideoFormat::Rgb,
    VideoFormat::Bgr,
    VideoFormat::Rgbx,
    VideoFormat::Bgrx,
    VideoFormat::Rgba,
    VideoFormat::Bgra,
    VideoFormat::Gray8,
];

// ============================================================================
// Dry Run Blitter
// ============================================================================

/// One operation as it would have been submitted to the device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BlitRecord {
    pub input_phys_addr: u64,
    pub output_phys_addr: u64,
    pub input: VideoInfo,
    pub rotation: RotationMode,
    pub deinterlace: DeinterlaceMode,
    /// Source rectangle when cropping applies
    pub crop: Option<VideoCropMeta>,
    /// Input was copied into physical memory first
    pub uploaded: bool,
}

/// Shared record of submitted operations.
#[derive(Debug, Clone, Default)]
pub struct BlitLog(Arc<Mutex<Vec<BlitRecord>>>);

impl BlitLog {
    pub fn new() -> Self {
        Self::default()
    }

    fn push(&self, record: BlitRecord) {
        self.0.lock().push(record);
    }

    pub fn records(&self) -> Vec<BlitRecord> {
        self.0.lock().clone()
    }

    pub fn last(&self) -> Option<BlitRecord> {
        self.0.lock().last().cloned()
    }

    pub fn len(&self) -> usize {
        self.0.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.lock().is_empty()
    }
}

pub struct DryRunBlitter {
    allocator: PhysMemAllocator,
    log: BlitLog,
    rotation: RotationMode,
    crop: bool,
    deinterlace: DeinterlaceMode,
    input_info: Option<VideoInfo>,
    input: Option<VideoBuffer>,
    output: Option<VideoBuffer>,
    /// Input was system memory and got copied
    uploaded: bool,
}

impl DryRunBlitter {
    pub fn new(allocator: PhysMemAllocator, log: BlitLog) -> Self {
        Self {
            allocator,
            log,
            rotation: RotationMode::None,
            crop: false,
            deinterlace: DeinterlaceMode::None,
            input_info: None,
            input: None,
            output: None,
            uploaded: false,
        }
    }

    pub fn log(&self) -> &BlitLog {
        &self.log
    }

    /// Copy a system memory frame into a physical block the engine can read.
    fn upload(&self, buffer: &VideoBuffer, bytes: &[u8]) -> Result<VideoBuffer, BlitError> {
        let mem = self.allocator.alloc(bytes.len(), &AllocationParams::default())?;
        {
            let mut mapping = mem.map_writable()?;
            if let Some(dest) = mapping.as_mut_slice() {
                dest[..bytes.len()].copy_from_slice(bytes);
            }
        }
        let mut uploaded = VideoBuffer::physical(mem);
        uploaded.video_meta = buffer.video_meta;
        uploaded.crop_meta = buffer.crop_meta;
        uploaded.pts_us = buffer.pts_us;
        Ok(uploaded)
    }
}

impl Blitter for DryRunBlitter {
    fn name(&self) -> &str {
        "dry-run"
    }

    fn set_output_rotation(&mut self, mode: RotationMode) {
        self.rotation = mode;
    }

    fn output_rotation(&self) -> RotationMode {
        self.rotation
    }

    fn enable_crop(&mut self, enable: bool) {
        self.crop = enable;
    }

    fn is_crop_enabled(&self) -> bool {
        self.crop
    }

    fn set_deinterlace_mode(&mut self, mode: DeinterlaceMode) {
        self.deinterlace = mode;
    }

    fn deinterlace_mode(&self) -> DeinterlaceMode {
        self.deinterlace
    }

    fn set_input_info(&mut self, info: &VideoInfo) {
        debug!(
            "input info: {} {}x{} {:?}",
            info.format, info.width, info.height, info.interlace_mode
        );
        self.input_info = Some(*info);
    }

    fn input_info(&self) -> Option<&VideoInfo> {
        self.input_info.as_ref()
    }

    fn set_input_buffer(&mut self, buffer: &VideoBuffer) -> Result<(), BlitError> {
        match &buffer.memory {
            Memory::Physical(_) => {
                self.input = Some(buffer.clone());
                self.uploaded = false;
            }
            Memory::System(bytes) => {
                trace!("input is not physical memory, copying {} bytes", bytes.len());
                self.input = Some(self.upload(buffer, bytes)?);
                self.uploaded = true;
            }
        }
        Ok(())
    }

    fn set_output_buffer(&mut self, buffer: &VideoBuffer) -> Result<(), BlitError> {
        if !buffer.is_phys_memory() {
            // the frame is dropped, so is its input
            self.input = None;
            self.uploaded = false;
            return Err(BlitError::NotPhysical);
        }
        self.output = Some(buffer.clone());
        Ok(())
    }

    /// Buffers are released once the operation is recorded.
    fn blit(&mut self) -> Result<(), BlitError> {
        let info = self.input_info.ok_or(BlitError::NotConfigured)?;
        if self.input.is_none() {
            return Err(BlitError::NoInput);
        }
        let output = self.output.take().ok_or(BlitError::NoOutput)?;
        let input = self.input.take().ok_or(BlitError::NoInput)?;

        let crop = if self.crop { input.crop_meta } else { None };
        let record = BlitRecord {
            input_phys_addr: input.phys_addr().ok_or(BlitError::NotPhysical)?,
            output_phys_addr: output.phys_addr().ok_or(BlitError::NotPhysical)?,
            input: info,
            rotation: self.rotation,
            deinterlace: self.deinterlace,
            crop,
            uploaded: self.uploaded,
        };
        trace!(
            "blit 0x{:x} -> 0x{:x}",
            record.input_phys_addr,
            record.output_phys_addr
        );
        self.log.push(record);
        Ok(())
    }

    fn create_buffer_pool(
        &self,
        caps: &Caps,
        size: usize,
        min_buffers: u32,
        max_buffers: u32,
    ) -> Result<Arc<BufferPool>, BlitError> {
        let pool = BufferPool::new_physical("dry-run-output", self.allocator.clone());
        let mut config = BufferPoolConfig::new(caps.clone(), size, min_buffers, max_buffers);
        config.add_option(PoolOption::PhysMem);
        config.add_option(PoolOption::VideoMeta);
        pool.set_config(config)?;
        Ok(Arc::new(pool))
    }
}
