//! # Format Negotiation
//!
//! Capability expansion and fixation for a scaling/converting transform.
//!
//! `transform_caps` widens one accepted description into everything the
//! blitter could produce from it. `fixate_caps` then resolves a partially
//! free output description against a fixed input:
//!
//! 1. size and pixel aspect ratio, keeping the input display aspect ratio
//! 2. pixel format, picking the candidate with the least conversion loss
//! 3. any leftovers, fixated to their defaults

use crate::caps::{Caps, FormatValue, FractionValue, IntField, IntValue, Structure, PAR_RANGE};
use crate::fraction::Fraction;
use crate::video_format::{FormatInfo, VideoFormat};
use thiserror::Error;
use tracing::{debug, error};

/// Smallest width/height offered by capability expansion.
pub const MIN_DIMENSION: i32 = 64;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NegotiationError {
    #[error("Error calculating the output scaled size - integer overflow")]
    Overflow,

    #[error("Input caps field missing or not fixed: {0}")]
    MissingInputField(&'static str),

    #[error("Empty caps")]
    EmptyCaps,
}

/// Which side of the transform the fixed caps belong to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PadDirection {
    /// `caps` describe the input, `othercaps` the output
    Sink,
    /// `caps` describe the output, `othercaps` the input
    Src,
}

// ============================================================================
// Capability Expansion
// ============================================================================

/// Everything the transform can turn `caps` into (or accept to produce
/// `caps`). Sizes open up, the pixel format and color details are dropped,
/// a pixel aspect ratio becomes unconstrained.
pub fn transform_caps(direction: PadDirection, caps: &Caps, filter: Option<&Caps>) -> Caps {
    let mut expanded = Caps::new_empty();

    for (i, structure) in caps.iter().enumerate() {
        if i > 0 && expanded.is_subset_structure(structure) {
            continue;
        }

        let mut structure = structure.clone();
        structure.width = Some(IntValue::range(MIN_DIMENSION, i32::MAX));
        structure.height = Some(IntValue::range(MIN_DIMENSION, i32::MAX));
        structure.format = None;
        structure.colorimetry = None;
        structure.chroma_site = None;
        if structure.has_pixel_aspect_ratio() {
            structure.pixel_aspect_ratio = Some(PAR_RANGE);
        }
        expanded.append_structure(structure);
    }

    let result = match filter {
        Some(filter) => filter.intersect_first(&expanded),
        None => expanded,
    };

    debug!("{:?}: transformed {} into {}", direction, caps, result);
    result
}

// ============================================================================
// Fixation
// ============================================================================

/// Fixate `othercaps` against the fixed `caps`. Only the first structure of
/// `othercaps` is kept and the result is always fully fixed.
pub fn fixate_caps(
    direction: PadDirection,
    caps: &Caps,
    othercaps: Caps,
) -> Result<Caps, NegotiationError> {
    let mut othercaps = othercaps.truncate();
    debug!("trying to fixate othercaps {} based on caps {}", othercaps, caps);

    fixate_size(direction, caps, &mut othercaps)?;
    fixate_format(caps, &mut othercaps);

    if let Some(outs) = othercaps.structure_mut(0) {
        outs.fixate_remaining();
    }

    debug!("fixated othercaps to {}", othercaps);
    Ok(othercaps)
}

/// Resolve width, height and pixel aspect ratio of the first output
/// structure so the display aspect ratio of the input is kept where the
/// output constraints allow it.
pub fn fixate_size(
    direction: PadDirection,
    caps: &Caps,
    othercaps: &mut Caps,
) -> Result<(), NegotiationError> {
    let ins = caps.structure(0).ok_or(NegotiationError::EmptyCaps)?;
    let outs = othercaps.structure_mut(0).ok_or(NegotiationError::EmptyCaps)?;

    // From the sink side a missing input PAR means square pixels and a
    // missing output PAR means anything goes. From the src side the output
    // gets square pixels.
    let from_par = match &ins.pixel_aspect_ratio {
        Some(value) => value
            .fixed()
            .ok_or(NegotiationError::MissingInputField("pixel-aspect-ratio"))?,
        None => Fraction::ONE,
    };
    let to_par = match (outs.pixel_aspect_ratio.clone(), direction) {
        (Some(value), _) => value,
        (None, PadDirection::Sink) => PAR_RANGE,
        (None, PadDirection::Src) => {
            outs.set_pixel_aspect_ratio(Fraction::ONE);
            FractionValue::Fixed(Fraction::ONE)
        }
    };

    let from_w = ins
        .get_int(IntField::Width)
        .ok_or(NegotiationError::MissingInputField("width"))?;
    let from_h = ins
        .get_int(IntField::Height)
        .ok_or(NegotiationError::MissingInputField("height"))?;

    let w = outs.get_int(IntField::Width);
    let h = outs.get_int(IntField::Height);

    if let (Some(w), Some(h)) = (w, h) {
        debug!("dimensions already set to {}x{}, not fixating", w, h);
        if !to_par.is_fixed() {
            let par = Fraction::display_ratio(from_w, from_h, from_par, w, h)
                .ok_or_else(overflow)?;
            debug!("fixating to_par to {}", par);
            if outs.has_pixel_aspect_ratio() {
                outs.fixate_field_nearest_fraction(par);
            } else if !par.is_one() {
                outs.set_pixel_aspect_ratio(par);
            }
        }
        return Ok(());
    }

    let from_dar = Fraction::new(from_w, from_h)
        .checked_mul(from_par)
        .ok_or_else(overflow)?;
    debug!("Input DAR is {}", from_dar);

    let fixed = match (w, h) {
        (None, Some(h)) => {
            debug!("height is fixed ({})", h);
            fixate_other_dimension(outs, &to_par, from_dar, IntField::Width, from_w, h)?
        }
        (Some(w), None) => {
            debug!("width is fixed ({})", w);
            fixate_other_dimension(outs, &to_par, from_dar, IntField::Height, from_h, w)?
        }
        _ => match to_par.fixed() {
            Some(par) => fixate_dimensions_for_par(outs, from_dar, par, from_w, from_h)?,
            None => fixate_dimensions_and_par(outs, &to_par, from_dar, from_w, from_h)?,
        },
    };

    outs.set_int(IntField::Width, fixed.width);
    outs.set_int(IntField::Height, fixed.height);
    if let Some(par) = fixed.par {
        set_par(outs, par);
    }
    Ok(())
}

struct FixedSize {
    width: i32,
    height: i32,
    /// `None` leaves the output PAR field as it is
    par: Option<Fraction>,
}

fn overflow() -> NegotiationError {
    error!("Error calculating the output scaled size - integer overflow");
    NegotiationError::Overflow
}

/// Value a field would take if fixated near `target`, without touching the
/// structure. An absent field accepts any value.
fn nearest_int(outs: &Structure, field: IntField, target: i32) -> i32 {
    outs.int_field(field)
        .and_then(|v| v.nearest(target))
        .unwrap_or(target)
}

fn nearest_par(to_par: &FractionValue, target: Fraction) -> Fraction {
    to_par.nearest(target).unwrap_or(target)
}

fn set_par(outs: &mut Structure, par: Fraction) {
    if outs.has_pixel_aspect_ratio() || !par.is_one() {
        outs.set_pixel_aspect_ratio(par);
    }
}

/// `value` scaled by the ratio that keeps `dar` with pixels of `par`:
/// width from height when `field` is the width, height from width otherwise.
fn scale_for_dar(
    dar: Fraction,
    par: Fraction,
    field: IntField,
    value: i32,
) -> Result<i32, NegotiationError> {
    let ratio = dar.checked_mul(par.inverse()).ok_or_else(overflow)?;
    Ok(match field {
        IntField::Width => ratio.scale_int(value),
        IntField::Height => ratio.inverse().scale_int(value),
    })
}

/// One dimension is fixed to `fixed_value`; choose `free` (and the PAR).
fn fixate_other_dimension(
    outs: &Structure,
    to_par: &FractionValue,
    from_dar: Fraction,
    free: IntField,
    from_value: i32,
    fixed_value: i32,
) -> Result<FixedSize, NegotiationError> {
    let pack = |free_value: i32, par: Option<Fraction>| match free {
        IntField::Width => FixedSize {
            width: free_value,
            height: fixed_value,
            par,
        },
        IntField::Height => FixedSize {
            width: fixed_value,
            height: free_value,
            par,
        },
    };

    // PAR fixed too: only the free dimension can follow the DAR
    if let Some(par) = to_par.fixed() {
        debug!("PAR is fixed {}", par);
        let target = scale_for_dar(from_dar, par, free, fixed_value)?;
        return Ok(pack(nearest_int(outs, free, target), None));
    }

    // Keep the input size on the free side and adjust the PAR
    let set_value = nearest_int(outs, free, from_value);
    let (w, h) = match free {
        IntField::Width => (set_value, fixed_value),
        IntField::Height => (fixed_value, set_value),
    };
    let target_par = from_dar
        .checked_mul(Fraction::new(h, w))
        .ok_or_else(overflow)?;
    let set_par = nearest_par(to_par, target_par);

    if set_par == target_par {
        return Ok(pack(set_value, Some(set_par)));
    }

    // PAR not accepted: scale the free side to the PAR we can get. If that
    // is not accepted either, the DAR changes.
    let target = scale_for_dar(from_dar, set_par, free, fixed_value)?;
    Ok(pack(nearest_int(outs, free, target), Some(set_par)))
}

/// PAR is fixed, width and height are free.
fn fixate_dimensions_for_par(
    outs: &Structure,
    from_dar: Fraction,
    par: Fraction,
    from_w: i32,
    from_h: i32,
) -> Result<FixedSize, NegotiationError> {
    // Keep the input height (interlacing), scale the width
    let set_h = nearest_int(outs, IntField::Height, from_h);
    let w = scale_for_dar(from_dar, par, IntField::Width, set_h)?;
    let set_w = nearest_int(outs, IntField::Width, w);
    if set_w == w {
        return Ok(FixedSize { width: set_w, height: set_h, par: None });
    }
    let first_try = FixedSize { width: set_w, height: set_h, par: None };

    // Keep the input width, scale the height
    let set_w = nearest_int(outs, IntField::Width, from_w);
    let h = scale_for_dar(from_dar, par, IntField::Height, set_w)?;
    let set_h = nearest_int(outs, IntField::Height, h);
    if set_h == h {
        return Ok(FixedSize { width: set_w, height: set_h, par: None });
    }

    Ok(first_try)
}

/// Nothing is fixed: try to keep the input size and find a PAR for it.
fn fixate_dimensions_and_par(
    outs: &Structure,
    to_par: &FractionValue,
    from_dar: Fraction,
    from_w: i32,
    from_h: i32,
) -> Result<FixedSize, NegotiationError> {
    let set_h = nearest_int(outs, IntField::Height, from_h);
    let set_w = nearest_int(outs, IntField::Width, from_w);

    let target_par = from_dar
        .checked_mul(Fraction::new(set_h, set_w))
        .ok_or_else(overflow)?;
    let set_par = nearest_par(to_par, target_par);
    let par = Some(set_par);

    if set_par == target_par {
        return Ok(FixedSize { width: set_w, height: set_h, par });
    }

    // Scale the width to keep the DAR with the PAR we got and the height
    let w = scale_for_dar(from_dar, set_par, IntField::Width, set_h)?;
    if nearest_int(outs, IntField::Width, w) == w {
        return Ok(FixedSize { width: w, height: set_h, par });
    }

    // ... or the height
    let h = scale_for_dar(from_dar, set_par, IntField::Height, set_w)?;
    if nearest_int(outs, IntField::Height, h) == h {
        return Ok(FixedSize { width: set_w, height: h, par });
    }

    Ok(FixedSize { width: set_w, height: set_h, par })
}

// ============================================================================
// Format Selection
// ============================================================================

const SCORE_PALETTE_LOSS: u32 = 1;
const SCORE_COLOR_LOSS: u32 = 2;
const SCORE_ALPHA_LOSS: u32 = 4;
const SCORE_CHROMA_W_LOSS: u32 = 8;
const SCORE_CHROMA_H_LOSS: u32 = 16;
const SCORE_DEPTH_LOSS: u32 = 32;

/// How much information converting `from` into `to` loses. 0 only for the
/// identical format.
pub fn format_loss(from: VideoFormat, to: VideoFormat) -> u32 {
    if from == to {
        return 0;
    }

    let a: FormatInfo = from.info();
    let b: FormatInfo = to.info();
    let mut loss = 1;

    if a.palette != b.palette {
        loss += SCORE_PALETTE_LOSS;
    }
    if a.color != b.color {
        loss += SCORE_COLOR_LOSS;
    }
    if a.alpha != b.alpha {
        loss += SCORE_ALPHA_LOSS;
    }
    if a.h_sub < b.h_sub {
        loss += SCORE_CHROMA_H_LOSS;
    }
    if a.w_sub < b.w_sub {
        loss += SCORE_CHROMA_W_LOSS;
    }
    if a.bits > b.bits {
        loss += SCORE_DEPTH_LOSS;
    }

    debug!("score {} -> {} = {}", from, to, loss);
    loss
}

/// The first candidate with the smallest loss; an exact match ends the scan.
pub fn best_format(from: VideoFormat, candidates: &[VideoFormat]) -> Option<VideoFormat> {
    let mut best: Option<(VideoFormat, u32)> = None;
    for &candidate in candidates {
        let loss = format_loss(from, candidate);
        if best.map_or(true, |(_, min)| loss < min) {
            debug!("found new best {}", loss);
            best = Some((candidate, loss));
        }
        if loss == 0 {
            break;
        }
    }
    best.map(|(format, _)| format)
}

/// Pick the output pixel format closest to the input's. Leaves the output
/// alone if the input has no fixed format or the output has no format field.
pub fn fixate_format(caps: &Caps, othercaps: &mut Caps) {
    let Some(in_format) = caps.structure(0).and_then(Structure::format_fixed) else {
        return;
    };
    debug!("source format {}", in_format);

    let candidates: Vec<VideoFormat> = othercaps
        .iter()
        .filter_map(|s| s.format.as_ref())
        .flat_map(|f| f.candidates().iter().copied())
        .collect();

    if let Some(best) = best_format(in_format, &candidates) {
        if let Some(outs) = othercaps.structure_mut(0) {
            outs.format = Some(FormatValue::Fixed(best));
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn input_1080p() -> Caps {
        Caps::from_structure(Structure::fixed(VideoFormat::I420, 1920, 1080, Fraction::ONE))
    }

    fn open_output() -> Structure {
        Structure::new_video_raw()
            .with_width(IntValue::range(MIN_DIMENSION, i32::MAX))
            .with_height(IntValue::range(MIN_DIMENSION, i32::MAX))
    }

    fn fixated(direction: PadDirection, caps: &Caps, outs: Structure) -> Structure {
        let result = fixate_caps(direction, caps, Caps::from_structure(outs)).unwrap();
        assert!(result.is_fixed());
        result.structure(0).unwrap().clone()
    }

    #[test]
    fn test_transform_caps_widens() {
        let mut s = Structure::fixed(VideoFormat::Nv12, 1280, 720, Fraction::new(4, 3));
        s.colorimetry = Some("bt709".to_string());
        let out = transform_caps(PadDirection::Sink, &Caps::from_structure(s), None);

        assert_eq!(out.len(), 1);
        let s = out.structure(0).unwrap();
        assert_eq!(s.width, Some(IntValue::range(64, i32::MAX)));
        assert_eq!(s.height, Some(IntValue::range(64, i32::MAX)));
        assert_eq!(s.pixel_aspect_ratio, Some(PAR_RANGE));
        assert!(s.format.is_none());
        assert!(s.colorimetry.is_none());
    }

    #[test]
    fn test_transform_caps_skips_duplicates_and_filters() {
        let a = Structure::fixed(VideoFormat::Nv12, 1280, 720, Fraction::ONE);
        let b = Structure::fixed(VideoFormat::I420, 640, 480, Fraction::ONE);
        let caps = Caps::from_structures(vec![a, b]);

        let out = transform_caps(PadDirection::Src, &caps, None);
        assert_eq!(out.len(), 1);

        let filter = Caps::from_structure(
            Structure::new_video_raw()
                .with_width(IntValue::Fixed(800))
                .with_format(FormatValue::Fixed(VideoFormat::Rgba)),
        );
        let out = transform_caps(PadDirection::Src, &caps, Some(&filter));
        let s = out.structure(0).unwrap();
        assert_eq!(s.get_int(IntField::Width), Some(800));
        assert_eq!(s.format_fixed(), Some(VideoFormat::Rgba));

        let no_match = Caps::from_structure(Structure::new_video_raw().with_width(IntValue::Fixed(32)));
        assert!(transform_caps(PadDirection::Src, &caps, Some(&no_match)).is_empty());
    }

    #[test]
    fn test_fixate_keeps_input_size() {
        let outs = open_output().with_pixel_aspect_ratio(PAR_RANGE);
        let s = fixated(PadDirection::Sink, &input_1080p(), outs);
        assert_eq!(s.get_int(IntField::Width), Some(1920));
        assert_eq!(s.get_int(IntField::Height), Some(1080));
        assert_eq!(s.pixel_aspect_ratio_fixed(), Some(Fraction::ONE));
    }

    #[test]
    fn test_fixed_height_keeps_dar_with_square_pixels() {
        // src side without an output PAR: square pixels, width follows the DAR
        let outs = open_output().with_height(IntValue::Fixed(540));
        let s = fixated(PadDirection::Src, &input_1080p(), outs);
        assert_eq!(s.get_int(IntField::Width), Some(960));
        assert_eq!(s.get_int(IntField::Height), Some(540));
        assert_eq!(s.pixel_aspect_ratio_fixed(), Some(Fraction::ONE));
    }

    #[test]
    fn test_inverted_width_range_does_not_panic() {
        let outs = Structure::new_video_raw()
            .with_width(IntValue::range(100, 50))
            .with_height(IntValue::Fixed(540));
        let s = fixated(PadDirection::Sink, &input_1080p(), outs);
        assert_eq!(s.get_int(IntField::Height), Some(540));
        assert!(s.get_int(IntField::Width).is_some());
    }

    #[test]
    fn test_fixed_height_prefers_input_width_when_par_is_free() {
        let outs = open_output()
            .with_height(IntValue::Fixed(540))
            .with_pixel_aspect_ratio(PAR_RANGE);
        let s = fixated(PadDirection::Sink, &input_1080p(), outs);
        assert_eq!(s.get_int(IntField::Width), Some(1920));
        assert_eq!(s.pixel_aspect_ratio_fixed(), Some(Fraction::new(1, 2)));
    }

    #[test]
    fn test_fixed_height_falls_back_to_par_bound() {
        let outs = open_output()
            .with_width(IntValue::range(64, 4096))
            .with_height(IntValue::Fixed(540))
            .with_pixel_aspect_ratio(FractionValue::Range {
                min: Fraction::ONE,
                max: Fraction::new(2, 1),
            });
        let s = fixated(PadDirection::Sink, &input_1080p(), outs);
        assert_eq!(s.get_int(IntField::Width), Some(960));
        assert_eq!(s.pixel_aspect_ratio_fixed(), Some(Fraction::ONE));
    }

    #[test]
    fn test_fixed_width() {
        let outs = open_output()
            .with_width(IntValue::Fixed(1280))
            .with_pixel_aspect_ratio(FractionValue::Fixed(Fraction::ONE));
        let s = fixated(PadDirection::Sink, &input_1080p(), outs);
        assert_eq!(s.get_int(IntField::Height), Some(720));

        let outs = open_output()
            .with_width(IntValue::Fixed(1280))
            .with_pixel_aspect_ratio(PAR_RANGE);
        let s = fixated(PadDirection::Sink, &input_1080p(), outs);
        assert_eq!(s.get_int(IntField::Height), Some(1080));
        assert_eq!(s.pixel_aspect_ratio_fixed(), Some(Fraction::new(3, 2)));
    }

    #[test]
    fn test_fixed_par_scales_width() {
        // PAL 4:3 with 16:15 pixels onto square pixels
        let caps = Caps::from_structure(Structure::fixed(
            VideoFormat::I420,
            720,
            576,
            Fraction::new(16, 15),
        ));
        let outs = open_output().with_pixel_aspect_ratio(FractionValue::Fixed(Fraction::ONE));
        let s = fixated(PadDirection::Sink, &caps, outs);
        assert_eq!(s.get_int(IntField::Width), Some(768));
        assert_eq!(s.get_int(IntField::Height), Some(576));
    }

    #[test]
    fn test_fixed_par_keeps_width_when_height_is_bounded() {
        let outs = open_output()
            .with_width(IntValue::range(64, 1920))
            .with_height(IntValue::range(64, 720))
            .with_pixel_aspect_ratio(FractionValue::Fixed(Fraction::ONE));
        let s = fixated(PadDirection::Sink, &input_1080p(), outs);
        // 720 high needs 1280 wide, which the width range allows
        assert_eq!(s.get_int(IntField::Width), Some(1280));
        assert_eq!(s.get_int(IntField::Height), Some(720));
    }

    #[test]
    fn test_both_fixed_computes_par() {
        let outs = Structure::new_video_raw()
            .with_width(IntValue::Fixed(1440))
            .with_height(IntValue::Fixed(1080))
            .with_pixel_aspect_ratio(PAR_RANGE);
        let s = fixated(PadDirection::Sink, &input_1080p(), outs);
        assert_eq!(s.get_int(IntField::Width), Some(1440));
        assert_eq!(s.pixel_aspect_ratio_fixed(), Some(Fraction::new(4, 3)));
    }

    #[test]
    fn test_fixation_is_idempotent() {
        let outs = Structure::fixed(VideoFormat::Nv12, 1280, 720, Fraction::ONE);
        let caps = input_1080p();
        let once = fixate_caps(PadDirection::Sink, &caps, Caps::from_structure(outs.clone())).unwrap();
        assert_eq!(once.structure(0), Some(&outs));
        let twice = fixate_caps(PadDirection::Sink, &caps, once.clone()).unwrap();
        assert_eq!(once, twice);
    }

    #[test]
    fn test_fixate_overflow() {
        let caps = Caps::from_structure(Structure::fixed(
            VideoFormat::I420,
            i32::MAX,
            3,
            Fraction::new(7, 5),
        ));
        let outs = open_output().with_pixel_aspect_ratio(PAR_RANGE);
        let result = fixate_caps(PadDirection::Sink, &caps, Caps::from_structure(outs));
        assert_eq!(result, Err(NegotiationError::Overflow));
    }

    #[test]
    fn test_fixate_missing_input() {
        let caps = Caps::from_structure(Structure::new_video_raw().with_height(IntValue::Fixed(10)));
        let result = fixate_caps(PadDirection::Sink, &caps, Caps::from_structure(open_output()));
        assert_eq!(result, Err(NegotiationError::MissingInputField("width")));
        assert_eq!(
            fixate_caps(PadDirection::Sink, &Caps::new_empty(), Caps::from_structure(open_output())),
            Err(NegotiationError::EmptyCaps)
        );
    }

    #[test]
    fn test_format_loss() {
        use VideoFormat::*;
        assert_eq!(format_loss(I420, I420), 0);
        // color + alpha
        assert_eq!(format_loss(I420, Rgba), 1 + 2 + 4);
        // 4:2:2 -> 4:2:0 loses vertical chroma
        assert_eq!(format_loss(Yuy2, Nv12), 1 + 16);
        // 4:4:4 -> 4:2:2 loses horizontal chroma
        assert_eq!(format_loss(Y444, Y42b), 1 + 8);
        assert_eq!(format_loss(P010, Nv12), 1 + 32);
        assert_eq!(format_loss(Rgb8p, Rgb), 1 + 1);
    }

    #[test]
    fn test_fixate_format_prefers_exact_match() {
        let outs = Structure::fixed(VideoFormat::I420, 1920, 1080, Fraction::ONE)
            .with_format(FormatValue::List(vec![VideoFormat::Rgba, VideoFormat::I420]));
        let s = fixated(PadDirection::Sink, &input_1080p(), outs);
        assert_eq!(s.format_fixed(), Some(VideoFormat::I420));

        assert_eq!(
            best_format(VideoFormat::Yuy2, &[VideoFormat::Rgbx, VideoFormat::Nv16, VideoFormat::Nv12]),
            Some(VideoFormat::Nv16)
        );
        // ties keep the first candidate
        assert_eq!(
            best_format(VideoFormat::I420, &[VideoFormat::Nv12, VideoFormat::Yv12]),
            Some(VideoFormat::Nv12)
        );
    }
}
