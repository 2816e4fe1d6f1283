//! # Video Transform Stage
//!
//! Drives one blitter for a scaling/rotating/deinterlacing stage:
//!
//! - caps negotiation callbacks (delegating to [`crate::negotiate`])
//! - output pool selection, preferring pools with physical memory
//! - the per-frame choice between passthrough and a blit
//! - properties, applied under the same lock the frame path takes
//!
//! ## Lifecycle
//!
//! ```text
//! new ──► activate ──► set_info ──► decide_allocation ──► process* ──► deactivate
//!          (blitter                                                    (blitter
//!           created)                                                    dropped)
//! ```

use crate::blitter::{
    BlitError, BlitLog, Blitter, DeinterlaceMode, DryRunBlitter, RotationMode, SUPPORTED_FORMATS,
};
use crate::buffer::{VideoBuffer, VideoFrameFlags, VideoMeta};
use crate::buffer_pool::{AllocationQuery, BufferPool, PoolError, PoolOption, PoolProposal};
use crate::caps::{Caps, InterlaceMode};
use crate::negotiate::{self, NegotiationError, PadDirection};
use crate::phys_mem::{AllocationParams, ContiguousBackend, PhysMemAllocator, PhysMemError};
use crate::settings::{Property, PropertyValue, TransformSettings};
use crate::video_info::VideoInfo;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, error, info, trace, warn};

// ============================================================================
// Errors
// ============================================================================

/// Why a frame (or the stream) could not be processed.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FlowError {
    #[error("Not negotiated")]
    NotNegotiated,

    #[error("Transform is not active")]
    NotActive,

    #[error("Blit failed: {0}")]
    Blit(#[from] BlitError),

    #[error("Allocation failed: {0}")]
    Alloc(#[from] PhysMemError),

    #[error("Buffer pool error: {0}")]
    Pool(#[from] PoolError),
}

// ============================================================================
// State
// ============================================================================

/// Creates the blitter on activation.
pub type BlitterFactory = Box<dyn Fn() -> Result<Box<dyn Blitter>, BlitError> + Send + Sync>;

/// Everything the properties and the frame path share.
struct TransformState {
    settings: TransformSettings,
    blitter: Option<Box<dyn Blitter>>,
}

#[derive(Default)]
struct Negotiated {
    in_info: Option<VideoInfo>,
    out_info: Option<VideoInfo>,
    pool: Option<Arc<BufferPool>>,
}

/// Pointer event travelling upstream from a display.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NavigationEvent {
    pub event: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pointer_x: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pointer_y: Option<f64>,
}

/// Output of [`VideoTransform::prepare_output_buffer`].
#[derive(Debug)]
pub enum OutputBuffer {
    /// Forward the input unchanged
    Passthrough,
    /// Blit into this buffer
    Blit(VideoBuffer),
}

pub struct VideoTransform {
    state: Mutex<TransformState>,
    negotiated: Mutex<Negotiated>,
    factory: BlitterFactory,
    allocator: PhysMemAllocator,
    inout_caps_equal: AtomicBool,
    passthrough: AtomicBool,
}

impl VideoTransform {
    /// `factory` picks the blitter implementation; `allocator` backs output
    /// buffers when no pool was negotiated.
    pub fn new(settings: TransformSettings, allocator: PhysMemAllocator, factory: BlitterFactory) -> Self {
        Self {
            state: Mutex::new(TransformState {
                settings,
                blitter: None,
            }),
            negotiated: Mutex::new(Negotiated::default()),
            factory,
            allocator,
            inout_caps_equal: AtomicBool::new(false),
            passthrough: AtomicBool::new(false),
        }
    }

    /// A transform over the in-process backend and the dry-run blitter.
    pub fn new_dry_run(settings: TransformSettings) -> (Self, BlitLog, Arc<ContiguousBackend>) {
        let backend = Arc::new(ContiguousBackend::new(settings.contiguous_capacity));
        let allocator = PhysMemAllocator::new(backend.clone());
        let log = BlitLog::new();

        let blitter_allocator = allocator.clone();
        let blitter_log = log.clone();
        let factory: BlitterFactory = Box::new(move || {
            Ok(Box::new(DryRunBlitter::new(blitter_allocator.clone(), blitter_log.clone())) as Box<dyn Blitter>)
        });

        (Self::new(settings, allocator, factory), log, backend)
    }

    pub fn allocator(&self) -> &PhysMemAllocator {
        &self.allocator
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Create the blitter and push the current settings into it.
    pub fn activate(&self) -> Result<(), FlowError> {
        let mut state = self.state.lock();
        if state.blitter.is_some() {
            return Ok(());
        }

        let mut blitter = (self.factory)()?;
        blitter.set_output_rotation(state.settings.output_rotation);
        blitter.enable_crop(state.settings.enable_crop);
        blitter.set_deinterlace_mode(state.settings.deinterlace_mode);
        info!("activated with blitter {}", blitter.name());
        state.blitter = Some(blitter);
        Ok(())
    }

    pub fn deactivate(&self) {
        let blitter = self.state.lock().blitter.take();
        if let Some(blitter) = blitter {
            info!("deactivated blitter {}", blitter.name());
        }

        let pool = self.negotiated.lock().pool.take();
        if let Some(pool) = pool {
            if let Err(e) = pool.set_active(false) {
                warn!("failed to deactivate output pool: {}", e);
            }
        }
    }

    pub fn is_active(&self) -> bool {
        self.state.lock().blitter.is_some()
    }

    // ========================================================================
    // Properties
    // ========================================================================

    pub fn set_property(&self, value: PropertyValue) {
        let mut state = self.state.lock();
        state.settings.set(value);
        if let Some(blitter) = state.blitter.as_mut() {
            apply_property(blitter.as_mut(), value);
        }
        debug!("set {:?}", value);
    }

    pub fn property(&self, property: Property) -> PropertyValue {
        self.state.lock().settings.get(property)
    }

    pub fn settings(&self) -> TransformSettings {
        self.state.lock().settings.clone()
    }

    /// Replace all properties at once; frames see either the old or the new
    /// set, never a mix.
    pub fn apply_settings(&self, settings: TransformSettings) {
        let mut state = self.state.lock();
        if let Some(blitter) = state.blitter.as_mut() {
            apply_property(blitter.as_mut(), PropertyValue::OutputRotation(settings.output_rotation));
            apply_property(blitter.as_mut(), PropertyValue::EnableCrop(settings.enable_crop));
            apply_property(blitter.as_mut(), PropertyValue::DeinterlaceMode(settings.deinterlace_mode));
        }
        state.settings = settings;
    }

    // ========================================================================
    // Negotiation
    // ========================================================================

    /// Caps accepted on either pad.
    pub fn template_caps(&self) -> Caps {
        Caps::blitter_template(SUPPORTED_FORMATS)
    }

    pub fn transform_caps(&self, direction: PadDirection, caps: &Caps, filter: Option<&Caps>) -> Caps {
        negotiate::transform_caps(direction, caps, filter)
    }

    pub fn fixate_caps(
        &self,
        direction: PadDirection,
        caps: &Caps,
        othercaps: Caps,
    ) -> Result<Caps, NegotiationError> {
        negotiate::fixate_caps(direction, caps, othercaps).map_err(|e| {
            error!("fixating caps failed: {}", e);
            e
        })
    }

    /// Lock in the negotiated descriptions.
    pub fn set_info(&self, in_info: &VideoInfo, out_info: &VideoInfo) -> Result<(), FlowError> {
        // Blitting only cares about size and pixel format
        let equal = in_info.is_equal_for_blit(out_info);
        if equal {
            debug!("input and output caps are equal");
        } else {
            debug!(
                "input and output caps are not equal:  input: {:?}  output: {:?}",
                in_info, out_info
            );
        }

        {
            let mut state = self.state.lock();
            let blitter = state.blitter.as_mut().ok_or(FlowError::NotActive)?;
            blitter.set_input_info(in_info);
        }
        self.inout_caps_equal.store(equal, Ordering::Release);

        let mut negotiated = self.negotiated.lock();
        negotiated.in_info = Some(*in_info);
        negotiated.out_info = Some(*out_info);
        Ok(())
    }

    /// [`set_info`](Self::set_info) from fixed caps.
    pub fn set_caps(&self, in_caps: &Caps, out_caps: &Caps) -> Result<(), FlowError> {
        let in_info = VideoInfo::from_caps(in_caps).map_err(|_| FlowError::NotNegotiated)?;
        let out_info = VideoInfo::from_caps(out_caps).map_err(|_| FlowError::NotNegotiated)?;

        let template = self.template_caps();
        for caps in [in_caps, out_caps] {
            if !caps.into_iter().all(|s| template.is_subset_structure(s)) {
                debug!("caps {} not accepted by the blitter", caps);
                return Err(FlowError::NotNegotiated);
            }
        }
        self.set_info(&in_info, &out_info)
    }

    pub fn input_info(&self) -> Option<VideoInfo> {
        self.negotiated.lock().in_info
    }

    pub fn output_info(&self) -> Option<VideoInfo> {
        self.negotiated.lock().out_info
    }

    pub fn inout_caps_equal(&self) -> bool {
        self.inout_caps_equal.load(Ordering::Acquire)
    }

    /// Choose the output pool. A proposed pool able to allocate physical
    /// memory is reconfigured and kept; otherwise the blitter creates one.
    /// The chosen pool replaces the first proposal (or is appended).
    pub fn decide_allocation(&self, query: &mut AllocationQuery) -> Result<Arc<BufferPool>, FlowError> {
        let out_info = VideoInfo::from_caps(&query.caps).map_err(|_| FlowError::NotNegotiated)?;
        debug!("num allocation pools: {}", query.n_pools());

        let mut pool: Option<Arc<BufferPool>> = None;
        let (mut size, mut min, mut max) = (out_info.size, 0, 0);
        let update_pool = query.n_pools() > 0;

        if update_pool {
            for proposal in &query.pools {
                pool = proposal.pool.clone();
                size = proposal.size;
                min = proposal.min_buffers;
                max = proposal.max_buffers;
                if pool.as_ref().is_some_and(|p| p.has_option(PoolOption::PhysMem)) {
                    break;
                }
            }
            size = size.max(out_info.size);
        }

        let pool = match pool {
            Some(pool) if pool.has_option(PoolOption::PhysMem) => {
                pool.set_active(false)?;
                let mut config = pool.config();
                config.set_params(query.caps.clone(), size, min, max);
                config.add_option(PoolOption::PhysMem);
                config.add_option(PoolOption::VideoMeta);
                pool.set_config(config)?;
                pool
            }
            other => {
                if other.is_none() {
                    debug!("no pool present; creating new pool");
                } else {
                    debug!("no pool supports physical memory buffers; creating new pool");
                }
                let state = self.state.lock();
                let blitter = state.blitter.as_ref().ok_or(FlowError::NotActive)?;
                blitter.create_buffer_pool(&query.caps, size, min, max)?
            }
        };

        debug!(
            "pool config:  outcaps: {}  size: {}  min buffers: {}  max buffers: {}",
            query.caps, size, min, max
        );

        let proposal = PoolProposal {
            pool: Some(Arc::clone(&pool)),
            size,
            min_buffers: min,
            max_buffers: max,
        };
        if update_pool {
            query.set_nth_pool(0, proposal);
        } else {
            query.pools.push(proposal);
        }

        pool.set_active(true)?;
        if let Some(old) = self.negotiated.lock().pool.replace(Arc::clone(&pool)) {
            if !Arc::ptr_eq(&old, &pool) {
                if let Err(e) = old.set_active(false) {
                    warn!("failed to deactivate previous pool: {}", e);
                }
            }
        }
        Ok(pool)
    }

    // ========================================================================
    // Frame Path
    // ========================================================================

    /// Whether `input` can be forwarded without a blit. The answer is also
    /// stored as the current passthrough mode.
    pub fn decide_passthrough(&self, input: Option<&VideoBuffer>) -> bool {
        let state = self.state.lock();
        let equal = self.inout_caps_equal();

        let passthrough = match input {
            Some(input) if equal => match state.blitter.as_deref() {
                Some(blitter) => passthrough_allowed(blitter, input),
                None => true,
            },
            Some(_) => {
                trace!("input and output caps are not equal");
                false
            }
            None => {
                trace!("no input buffer");
                false
            }
        };
        drop(state);

        trace!("passthrough: {}", if passthrough { "yes" } else { "no" });
        self.passthrough.store(passthrough, Ordering::Release);
        passthrough
    }

    pub fn is_passthrough(&self) -> bool {
        self.passthrough.load(Ordering::Acquire)
    }

    /// Decide passthrough for `input` and, if a blit is needed, get a buffer
    /// to blit into.
    pub fn prepare_output_buffer(&self, input: &VideoBuffer) -> Result<OutputBuffer, FlowError> {
        if self.decide_passthrough(Some(input)) {
            return Ok(OutputBuffer::Passthrough);
        }

        let (pool, out_info) = {
            let negotiated = self.negotiated.lock();
            (negotiated.pool.clone(), negotiated.out_info)
        };
        let out_info = out_info.ok_or(FlowError::NotNegotiated)?;

        let mut output = match pool {
            Some(pool) => pool.acquire()?,
            None => {
                let mem = self.allocator.alloc(out_info.size, &AllocationParams::default())?;
                VideoBuffer::physical(mem)
            }
        };
        if output.video_meta.is_none() {
            output.video_meta = Some(VideoMeta {
                width: out_info.width,
                height: out_info.height,
                format: out_info.format,
                flags: VideoFrameFlags::empty(),
            });
        }
        output.pts_us = input.pts_us;
        Ok(OutputBuffer::Blit(output))
    }

    /// Blit `input` into `output`. Any failing step drops the frame.
    pub fn transform_frame(&self, input: &VideoBuffer, output: &VideoBuffer) -> Result<(), FlowError> {
        let mut state = self.state.lock();
        let blitter = state.blitter.as_mut().ok_or(FlowError::NotActive)?;

        let result = blitter
            .set_input_buffer(input)
            .and_then(|_| blitter.set_output_buffer(output))
            .and_then(|_| blitter.blit());

        result.map_err(|e| {
            error!("blit failed: {}", e);
            FlowError::Blit(e)
        })
    }

    /// Run one frame through the stage: the input itself on passthrough,
    /// otherwise a freshly blitted output buffer.
    pub fn process(&self, input: VideoBuffer) -> Result<VideoBuffer, FlowError> {
        if self.negotiated.lock().out_info.is_none() {
            return Err(FlowError::NotNegotiated);
        }

        match self.prepare_output_buffer(&input)? {
            OutputBuffer::Passthrough => Ok(input),
            OutputBuffer::Blit(output) => {
                if let Err(e) = self.transform_frame(&input, &output) {
                    self.release_output(output);
                    return Err(e);
                }
                Ok(output)
            }
        }
    }

    /// Hand an output buffer back to the negotiated pool.
    pub fn release_output(&self, buffer: VideoBuffer) {
        let pool = self.negotiated.lock().pool.clone();
        if let Some(pool) = pool {
            pool.release(buffer);
        }
    }

    // ========================================================================
    // Events
    // ========================================================================

    /// Map pointer coordinates from output to input space.
    pub fn translate_navigation(&self, mut event: NavigationEvent) -> NavigationEvent {
        let (in_info, out_info) = {
            let negotiated = self.negotiated.lock();
            (negotiated.in_info, negotiated.out_info)
        };
        let (Some(in_info), Some(out_info)) = (in_info, out_info) else {
            return event;
        };

        if in_info.width != out_info.width || in_info.height != out_info.height {
            if let Some(x) = event.pointer_x.as_mut() {
                *x = *x * in_info.width as f64 / out_info.width as f64;
            }
            if let Some(y) = event.pointer_y.as_mut() {
                *y = *y * in_info.height as f64 / out_info.height as f64;
            }
        }
        event
    }
}

fn apply_property(blitter: &mut dyn Blitter, value: PropertyValue) {
    match value {
        PropertyValue::OutputRotation(mode) => blitter.set_output_rotation(mode),
        PropertyValue::EnableCrop(enable) => blitter.enable_crop(enable),
        PropertyValue::DeinterlaceMode(mode) => blitter.set_deinterlace_mode(mode),
    }
}

/// Equal caps allow passthrough unless an enabled transform would change
/// this frame.
fn passthrough_allowed(blitter: &dyn Blitter, input: &VideoBuffer) -> bool {
    if !blitter.are_transforms_enabled() {
        return true;
    }

    let mut passthrough = true;
    let video_meta = input.video_meta.as_ref();

    match video_meta {
        Some(meta) if blitter.deinterlace_mode() != DeinterlaceMode::None => {
            let mode = blitter
                .input_info()
                .map(|info| info.interlace_mode)
                .unwrap_or_default();
            match mode {
                InterlaceMode::Interleaved => {
                    trace!("interlacing in interleaved mode");
                    passthrough = false;
                }
                InterlaceMode::Mixed => {
                    // "found" means the INTERLACED flag is absent
                    let flag_found = !meta.flags.contains(VideoFrameFlags::INTERLACED);
                    passthrough = passthrough && !flag_found;
                    trace!(
                        "interlacing in mixed mode - flag {}",
                        if flag_found { "found" } else { "not found" }
                    );
                }
                InterlaceMode::Progressive | InterlaceMode::Fields => {}
            }
        }
        Some(_) => {}
        None => trace!("no video metadata found"),
    }

    if blitter.output_rotation() != RotationMode::None {
        trace!("rotation requested");
        passthrough = false;
    }

    if blitter.is_crop_enabled() {
        match (input.crop_meta.as_ref(), video_meta) {
            (Some(crop), Some(meta)) => {
                if crop.is_effective(meta) {
                    passthrough = false;
                }
                trace!(
                    "effective crop rectangle found: {}",
                    if passthrough { "yes" } else { "no" }
                );
            }
            (Some(_), None) => {}
            (None, _) => trace!("no video crop metadata found"),
        }
    }

    passthrough
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::VideoCropMeta;
    use crate::caps::Structure;
    use crate::fraction::Fraction;
    use crate::video_format::VideoFormat;

    fn settings(rotation: RotationMode, crop: bool, deinterlace: DeinterlaceMode) -> TransformSettings {
        TransformSettings {
            output_rotation: rotation,
            enable_crop: crop,
            deinterlace_mode: deinterlace,
            contiguous_capacity: 16 << 20,
        }
    }

    fn plain() -> TransformSettings {
        settings(RotationMode::None, false, DeinterlaceMode::None)
    }

    fn stage(settings: TransformSettings, in_info: VideoInfo, out_info: VideoInfo) -> (VideoTransform, BlitLog) {
        let (transform, log, _backend) = VideoTransform::new_dry_run(settings);
        transform.activate().unwrap();
        transform.set_info(&in_info, &out_info).unwrap();
        (transform, log)
    }

    fn info_720p() -> VideoInfo {
        VideoInfo::new(VideoFormat::I420, 1280, 720).unwrap()
    }

    fn frame(transform: &VideoTransform, info: &VideoInfo, flags: VideoFrameFlags) -> VideoBuffer {
        let mem = transform
            .allocator()
            .alloc(info.size, &AllocationParams::default())
            .unwrap();
        VideoBuffer::physical(mem).with_video_meta(VideoMeta {
            width: info.width,
            height: info.height,
            format: info.format,
            flags,
        })
    }

    #[test]
    fn test_passthrough_with_equal_caps() {
        let info = info_720p();
        let (transform, log) = stage(plain(), info, info);
        assert!(transform.inout_caps_equal());

        let input = frame(&transform, &info, VideoFrameFlags::empty());
        let addr = input.phys_addr();
        assert!(transform.decide_passthrough(Some(&input)));

        let output = transform.process(input).unwrap();
        assert_eq!(output.phys_addr(), addr);
        assert!(log.is_empty());
    }

    #[test]
    fn test_rotation_disables_passthrough() {
        let info = info_720p();
        let (transform, log) = stage(plain(), info, info);
        transform.set_property(PropertyValue::OutputRotation(RotationMode::Rotate90));

        let input = frame(&transform, &info, VideoFrameFlags::empty());
        assert!(!transform.decide_passthrough(Some(&input)));
        assert!(!transform.is_passthrough());

        let output = transform.process(input.clone()).unwrap();
        assert_ne!(output.phys_addr(), input.phys_addr());
        assert_eq!(log.last().unwrap().rotation, RotationMode::Rotate90);
    }

    #[test]
    fn test_no_input_or_unequal_caps() {
        let info = info_720p();
        let (transform, _log) = stage(plain(), info, info);
        assert!(!transform.decide_passthrough(None));

        let out = VideoInfo::new(VideoFormat::I420, 640, 360).unwrap();
        let (transform, log) = stage(plain(), info, out);
        assert!(!transform.inout_caps_equal());
        let input = frame(&transform, &info, VideoFrameFlags::empty());
        let output = transform.process(input).unwrap();
        assert!(output.is_phys_memory());
        assert_eq!(output.video_meta.map(|m| m.width), Some(640));
        assert_eq!(log.len(), 1);
    }

    #[test]
    fn test_par_difference_still_passes_through() {
        let info = info_720p();
        let mut out = info;
        out.par = Fraction::new(4, 3);
        let (transform, _log) = stage(plain(), info, out);
        let input = frame(&transform, &info, VideoFrameFlags::empty());
        assert!(transform.decide_passthrough(Some(&input)));
    }

    #[test]
    fn test_deinterlace_interleaved() {
        let info = info_720p().with_interlace_mode(InterlaceMode::Interleaved);
        let (transform, _log) = stage(settings(RotationMode::None, false, DeinterlaceMode::Fast), info, info);

        let input = frame(&transform, &info, VideoFrameFlags::empty());
        assert!(!transform.decide_passthrough(Some(&input)));

        // without video meta the interlacing cannot be judged
        let mut bare = input.clone();
        bare.video_meta = None;
        assert!(transform.decide_passthrough(Some(&bare)));
    }

    #[test]
    fn test_deinterlace_mixed_polarity() {
        let info = info_720p().with_interlace_mode(InterlaceMode::Mixed);
        let (transform, _log) = stage(settings(RotationMode::None, false, DeinterlaceMode::Slow), info, info);

        let flagged = frame(&transform, &info, VideoFrameFlags::INTERLACED);
        assert!(transform.decide_passthrough(Some(&flagged)));

        let unflagged = frame(&transform, &info, VideoFrameFlags::empty());
        assert!(!transform.decide_passthrough(Some(&unflagged)));
    }

    #[test]
    fn test_progressive_with_deinterlace_passes_through() {
        let info = info_720p();
        let (transform, _log) = stage(settings(RotationMode::None, false, DeinterlaceMode::Fast), info, info);
        let input = frame(&transform, &info, VideoFrameFlags::empty());
        assert!(transform.decide_passthrough(Some(&input)));
    }

    #[test]
    fn test_effective_crop() {
        let info = info_720p();
        let (transform, log) = stage(settings(RotationMode::None, true, DeinterlaceMode::None), info, info);

        let input = frame(&transform, &info, VideoFrameFlags::empty());
        assert!(transform.decide_passthrough(Some(&input)));

        let full = input.clone().with_crop_meta(VideoCropMeta { x: 0, y: 0, width: 1280, height: 720 });
        assert!(transform.decide_passthrough(Some(&full)));

        let cropped = input.clone().with_crop_meta(VideoCropMeta { x: 8, y: 0, width: 1272, height: 720 });
        assert!(!transform.decide_passthrough(Some(&cropped)));
        transform.process(cropped).unwrap();
        assert_eq!(log.last().unwrap().crop.map(|c| c.x), Some(8));

        // crop meta alone is not enough
        let mut no_meta = input.with_crop_meta(VideoCropMeta { x: 8, y: 0, width: 1272, height: 720 });
        no_meta.video_meta = None;
        assert!(transform.decide_passthrough(Some(&no_meta)));
    }

    #[test]
    fn test_inactive_and_unnegotiated() {
        let (transform, _log, _backend) = VideoTransform::new_dry_run(plain());
        let info = info_720p();
        assert_eq!(transform.set_info(&info, &info), Err(FlowError::NotActive));

        transform.activate().unwrap();
        let input = frame(&transform, &info, VideoFrameFlags::empty());
        assert_eq!(transform.process(input).unwrap_err(), FlowError::NotNegotiated);
    }

    struct BrokenBlitter(DryRunBlitter);

    impl Blitter for BrokenBlitter {
        fn name(&self) -> &str {
            "broken"
        }
        fn set_output_rotation(&mut self, mode: RotationMode) {
            self.0.set_output_rotation(mode)
        }
        fn output_rotation(&self) -> RotationMode {
            self.0.output_rotation()
        }
        fn enable_crop(&mut self, enable: bool) {
            self.0.enable_crop(enable)
        }
        fn is_crop_enabled(&self) -> bool {
            self.0.is_crop_enabled()
        }
        fn set_deinterlace_mode(&mut self, mode: DeinterlaceMode) {
            self.0.set_deinterlace_mode(mode)
        }
        fn deinterlace_mode(&self) -> DeinterlaceMode {
            self.0.deinterlace_mode()
        }
        fn set_input_info(&mut self, info: &VideoInfo) {
            self.0.set_input_info(info)
        }
        fn input_info(&self) -> Option<&VideoInfo> {
            self.0.input_info()
        }
        fn set_input_buffer(&mut self, buffer: &VideoBuffer) -> Result<(), BlitError> {
            self.0.set_input_buffer(buffer)
        }
        fn set_output_buffer(&mut self, buffer: &VideoBuffer) -> Result<(), BlitError> {
            self.0.set_output_buffer(buffer)
        }
        fn blit(&mut self) -> Result<(), BlitError> {
            Err(BlitError::Device("IPU task queue failed".to_string()))
        }
        fn create_buffer_pool(
            &self,
            caps: &Caps,
            size: usize,
            min_buffers: u32,
            max_buffers: u32,
        ) -> Result<Arc<BufferPool>, BlitError> {
            self.0.create_buffer_pool(caps, size, min_buffers, max_buffers)
        }
    }

    #[test]
    fn test_blit_failure_is_a_flow_error() {
        let allocator = PhysMemAllocator::new(Arc::new(ContiguousBackend::new(16 << 20)));
        let blitter_allocator = allocator.clone();
        let factory: BlitterFactory = Box::new(move || {
            Ok(Box::new(BrokenBlitter(DryRunBlitter::new(blitter_allocator.clone(), BlitLog::new()))) as Box<dyn Blitter>)
        });
        let transform = VideoTransform::new(plain(), allocator, factory);
        transform.activate().unwrap();
        let info = info_720p();
        transform
            .set_info(&info, &VideoInfo::new(VideoFormat::Nv12, 1280, 720).unwrap())
            .unwrap();

        let input = frame(&transform, &info, VideoFrameFlags::empty());
        assert!(matches!(
            transform.process(input),
            Err(FlowError::Blit(BlitError::Device(_)))
        ));
    }

    fn out_caps() -> Caps {
        Caps::from_structure(Structure::fixed(VideoFormat::I420, 640, 360, Fraction::ONE))
    }

    #[test]
    fn test_decide_allocation_creates_pool() {
        let (transform, _log) = stage(plain(), info_720p(), VideoInfo::new(VideoFormat::I420, 640, 360).unwrap());

        let mut query = AllocationQuery::new(out_caps());
        let pool = transform.decide_allocation(&mut query).unwrap();
        assert!(pool.has_option(PoolOption::PhysMem));
        assert_eq!(query.n_pools(), 1);
        assert_eq!(query.pools[0].size, 640 * 360 * 3 / 2);

        let input = frame(&transform, &info_720p(), VideoFrameFlags::empty());
        let output = transform.process(input).unwrap();
        assert_eq!(pool.stats().outstanding, 1);
        transform.release_output(output);
        assert_eq!(pool.stats().available, 1);
    }

    #[test]
    fn test_decide_allocation_replaces_system_pool() {
        let (transform, _log) = stage(plain(), info_720p(), VideoInfo::new(VideoFormat::I420, 640, 360).unwrap());

        let mut query = AllocationQuery::new(out_caps());
        query.add_pool(Some(Arc::new(BufferPool::new_system("downstream"))), 1000, 2, 8);
        let pool = transform.decide_allocation(&mut query).unwrap();

        assert_ne!(pool.name(), "downstream");
        assert!(pool.has_option(PoolOption::PhysMem));
        assert_eq!(query.n_pools(), 1);
        let chosen = &query.pools[0];
        assert_eq!(chosen.size, 640 * 360 * 3 / 2);
        assert_eq!((chosen.min_buffers, chosen.max_buffers), (2, 8));
    }

    #[test]
    fn test_decide_allocation_keeps_physical_pool() {
        let (transform, _log) = stage(plain(), info_720p(), VideoInfo::new(VideoFormat::I420, 640, 360).unwrap());
        let downstream = Arc::new(BufferPool::new_physical("downstream", transform.allocator().clone()));

        let mut query = AllocationQuery::new(out_caps());
        query.add_pool(Some(Arc::new(BufferPool::new_system("sys"))), 0, 0, 0);
        query.add_pool(Some(downstream.clone()), 1 << 20, 1, 4);
        let pool = transform.decide_allocation(&mut query).unwrap();

        assert!(Arc::ptr_eq(&pool, &downstream));
        let config = pool.config();
        assert_eq!(config.size, 1 << 20);
        assert!(config.has_option(PoolOption::VideoMeta));
        assert!(Arc::ptr_eq(query.pools[0].pool.as_ref().unwrap(), &downstream));
    }

    #[test]
    fn test_properties_forwarded_to_blitter() {
        let info = info_720p();
        let (transform, log) = stage(plain(), info, VideoInfo::new(VideoFormat::Nv12, 1280, 720).unwrap());
        transform.set_property(PropertyValue::DeinterlaceMode(DeinterlaceMode::Fast));
        assert_eq!(
            transform.property(Property::DeinterlaceMode),
            PropertyValue::DeinterlaceMode(DeinterlaceMode::Fast)
        );

        let input = frame(&transform, &info, VideoFrameFlags::empty());
        transform.process(input).unwrap();
        assert_eq!(log.last().unwrap().deinterlace, DeinterlaceMode::Fast);

        // settings survive a restart
        transform.deactivate();
        assert!(!transform.is_active());
        transform.activate().unwrap();
        assert_eq!(transform.settings().deinterlace_mode, DeinterlaceMode::Fast);
    }

    #[test]
    fn test_deactivate_stops_pool() {
        let info = info_720p();
        let (transform, _log) = stage(plain(), info, info);
        let caps = Caps::from_structure(Structure::fixed(VideoFormat::I420, 1280, 720, Fraction::ONE));
        let mut query = AllocationQuery::new(caps);
        let pool = transform.decide_allocation(&mut query).unwrap();
        assert!(pool.is_active());

        transform.deactivate();
        assert!(!pool.is_active());
        assert_eq!(pool.acquire().unwrap_err(), PoolError::Inactive);
    }

    #[test]
    fn test_template_caps() {
        let (transform, _log, _backend) = VideoTransform::new_dry_run(plain());
        let template = transform.template_caps();
        let i420 = Structure::fixed(VideoFormat::I420, 1280, 720, Fraction::ONE);
        let p010 = Structure::fixed(VideoFormat::P010, 1280, 720, Fraction::ONE);
        assert!(template.is_subset_structure(&i420));
        assert!(!template.is_subset_structure(&p010));

        transform.activate().unwrap();
        let supported = Caps::from_structure(i420);
        let unsupported = Caps::from_structure(p010);
        assert_eq!(
            transform.set_caps(&unsupported, &supported),
            Err(FlowError::NotNegotiated)
        );
        assert_eq!(
            transform.set_caps(&supported, &unsupported),
            Err(FlowError::NotNegotiated)
        );
        assert!(transform.input_info().is_none());
        transform.set_caps(&supported, &supported).unwrap();
        assert!(transform.inout_caps_equal());
    }

    #[test]
    fn test_navigation_scaling() {
        let (transform, _log) = stage(plain(), info_720p(), VideoInfo::new(VideoFormat::I420, 640, 360).unwrap());
        let event = NavigationEvent {
            event: "mouse-move".to_string(),
            pointer_x: Some(320.0),
            pointer_y: Some(90.0),
        };
        let translated = transform.translate_navigation(event);
        assert_eq!(translated.pointer_x, Some(640.0));
        assert_eq!(translated.pointer_y, Some(180.0));

        let info = info_720p();
        let (same, _log) = stage(plain(), info, info);
        let event = NavigationEvent {
            event: "mouse-move".to_string(),
            pointer_x: Some(10.0),
            pointer_y: None,
        };
        assert_eq!(same.translate_navigation(event.clone()), event);
    }

    #[test]
    fn test_settings_never_torn() {
        let info = info_720p();
        let (transform, log) = stage(plain(), info, info);
        let a = plain();
        let b = settings(RotationMode::Rotate90, true, DeinterlaceMode::Fast);
        // contiguous_capacity equal in both, so whole-struct comparison works
        assert_eq!(a.contiguous_capacity, b.contiguous_capacity);

        let caps = Caps::from_structure(Structure::fixed(VideoFormat::I420, 1280, 720, Fraction::ONE));
        let mut query = AllocationQuery::new(caps);
        transform.decide_allocation(&mut query).unwrap();

        let mut frames = Vec::new();
        for _ in 0..4 {
            frames.push(frame(&transform, &info, VideoFrameFlags::empty()));
        }

        transform.apply_settings(b.clone());
        let done = AtomicBool::new(false);
        std::thread::scope(|scope| {
            scope.spawn(|| {
                let mut i = 0usize;
                while !done.load(Ordering::Acquire) {
                    transform.apply_settings(if i % 2 == 0 { a.clone() } else { b.clone() });
                    i += 1;
                }
            });
            scope.spawn(|| {
                while !done.load(Ordering::Acquire) {
                    let seen = transform.settings();
                    assert!(seen == a || seen == b);
                }
            });
            scope.spawn(|| {
                for i in 0..200 {
                    let input = frames[i % frames.len()].clone();
                    let addr = input.phys_addr();
                    let result = transform.process(input);
                    if result.is_err() {
                        done.store(true, Ordering::Release);
                    }
                    let output = result.unwrap();
                    if output.phys_addr() != addr {
                        transform.release_output(output);
                    }
                }
                done.store(true, Ordering::Release);
            });
        });

        let records = log.records();
        assert!(!records.is_empty());
        // a blit may see either set, but never half of each
        for record in records {
            assert!(matches!(
                (record.rotation, record.deinterlace),
                (RotationMode::Rotate90, DeinterlaceMode::Fast) | (RotationMode::None, DeinterlaceMode::None)
            ));
        }
    }
}
