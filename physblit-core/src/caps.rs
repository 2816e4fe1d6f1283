//! # Caps - Video Format Descriptions
//!
//! A [`Caps`] is an ordered list of [`Structure`]s, each describing a set of
//! raw video formats. Every field is optional; a present field is either
//! fixed (one value) or free (a range or a list of candidates). Negotiation
//! narrows free fields down until one concrete description remains.
//!
//! ```text
//! video/x-raw, width=[64, MAX], height=540, pixel-aspect-ratio=[1/MAX, MAX/1],
//!              format={ I420, NV12, RGBA }
//! ```

use crate::fraction::Fraction;
use crate::video_format::VideoFormat;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

pub const MEDIA_TYPE_VIDEO_RAW: &str = "video/x-raw";

/// The unconstrained pixel aspect ratio range.
pub const PAR_RANGE: FractionValue = FractionValue::Range {
    min: Fraction::MIN_POSITIVE,
    max: Fraction::MAX,
};

// ============================================================================
// Field Values
// ============================================================================

/// A range whose lower bound lies above its upper bound.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("range minimum {min} is above maximum {max}")]
pub struct InvertedRange {
    pub min: String,
    pub max: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged, try_from = "RawIntValue")]
pub enum IntValue {
    Fixed(i32),
    Range { min: i32, max: i32 },
    List(Vec<i32>),
}

/// Wire form of [`IntValue`], checked on the way in.
#[derive(Deserialize)]
#[serde(untagged)]
enum RawIntValue {
    Fixed(i32),
    Range { min: i32, max: i32 },
    List(Vec<i32>),
}

impl TryFrom<RawIntValue> for IntValue {
    type Error = InvertedRange;

    fn try_from(raw: RawIntValue) -> Result<Self, Self::Error> {
        match raw {
            RawIntValue::Fixed(v) => Ok(Self::Fixed(v)),
            RawIntValue::Range { min, max } => Self::try_range(min, max),
            RawIntValue::List(l) => Ok(Self::List(l)),
        }
    }
}

impl IntValue {
    pub fn range(min: i32, max: i32) -> Self {
        Self::Range { min, max }
    }

    pub fn try_range(min: i32, max: i32) -> Result<Self, InvertedRange> {
        if min > max {
            return Err(InvertedRange {
                min: min.to_string(),
                max: max.to_string(),
            });
        }
        Ok(Self::range(min, max))
    }

    pub fn fixed(&self) -> Option<i32> {
        match self {
            Self::Fixed(v) => Some(*v),
            Self::List(l) if l.len() == 1 => Some(l[0]),
            _ => None,
        }
    }

    pub fn is_fixed(&self) -> bool {
        self.fixed().is_some()
    }

    pub fn contains(&self, value: i32) -> bool {
        match self {
            Self::Fixed(v) => *v == value,
            Self::Range { min, max } => (*min..=*max).contains(&value),
            Self::List(l) => l.contains(&value),
        }
    }

    /// The accepted value closest to `target`; the first one wins a tie.
    pub fn nearest(&self, target: i32) -> Option<i32> {
        match self {
            Self::Fixed(v) => Some(*v),
            Self::Range { min, max } if min > max => None,
            Self::Range { min, max } => Some(target.clamp(*min, *max)),
            Self::List(l) => l
                .iter()
                .copied()
                .min_by_key(|v| (*v as i64 - target as i64).abs()),
        }
    }

    pub fn intersect(&self, other: &IntValue) -> Option<IntValue> {
        match (self, other) {
            (Self::Range { min: a0, max: a1 }, Self::Range { min: b0, max: b1 }) => {
                let lo = (*a0).max(*b0);
                let hi = (*a1).min(*b1);
                match lo.cmp(&hi) {
                    std::cmp::Ordering::Greater => None,
                    std::cmp::Ordering::Equal => Some(Self::Fixed(lo)),
                    std::cmp::Ordering::Less => Some(Self::Range { min: lo, max: hi }),
                }
            }
            (Self::Fixed(v), other) | (other, Self::Fixed(v)) => {
                other.contains(*v).then_some(Self::Fixed(*v))
            }
            (Self::List(l), other) => collapse_int(l.iter().copied().filter(|v| other.contains(*v))),
            (range, Self::List(l)) => collapse_int(l.iter().copied().filter(|v| range.contains(*v))),
        }
    }

    pub fn is_subset(&self, other: &IntValue) -> bool {
        match self {
            Self::Fixed(v) => other.contains(*v),
            Self::List(l) => l.iter().all(|v| other.contains(*v)),
            Self::Range { min, max } => match other {
                Self::Range { min: o0, max: o1 } => o0 <= min && max <= o1,
                Self::Fixed(v) => min == max && min == v,
                Self::List(l) => {
                    let span = (*max as i64 - *min as i64) as usize + 1;
                    span <= l.len() && (*min..=*max).all(|v| l.contains(&v))
                }
            },
        }
    }

    /// Default fixation: lower bound of a range, first entry of a list.
    fn fixate(&self) -> i32 {
        match self {
            Self::Fixed(v) => *v,
            Self::Range { min, .. } => *min,
            Self::List(l) => l.first().copied().unwrap_or(0),
        }
    }
}

fn collapse_int(values: impl Iterator<Item = i32>) -> Option<IntValue> {
    let values: Vec<i32> = values.collect();
    match values.len() {
        0 => None,
        1 => Some(IntValue::Fixed(values[0])),
        _ => Some(IntValue::List(values)),
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged, try_from = "RawFractionValue")]
pub enum FractionValue {
    Fixed(Fraction),
    Range { min: Fraction, max: Fraction },
    List(Vec<Fraction>),
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawFractionValue {
    Fixed(Fraction),
    Range { min: Fraction, max: Fraction },
    List(Vec<Fraction>),
}

impl TryFrom<RawFractionValue> for FractionValue {
    type Error = InvertedRange;

    fn try_from(raw: RawFractionValue) -> Result<Self, Self::Error> {
        match raw {
            RawFractionValue::Fixed(f) => Ok(Self::Fixed(f)),
            RawFractionValue::Range { min, max } if min > max => Err(InvertedRange {
                min: min.to_string(),
                max: max.to_string(),
            }),
            RawFractionValue::Range { min, max } => Ok(Self::Range { min, max }),
            RawFractionValue::List(l) => Ok(Self::List(l)),
        }
    }
}

impl FractionValue {
    pub fn fixed(&self) -> Option<Fraction> {
        match self {
            Self::Fixed(f) => Some(*f),
            Self::List(l) if l.len() == 1 => Some(l[0]),
            _ => None,
        }
    }

    pub fn is_fixed(&self) -> bool {
        self.fixed().is_some()
    }

    pub fn contains(&self, value: Fraction) -> bool {
        match self {
            Self::Fixed(f) => *f == value || f.cmp(&value).is_eq(),
            Self::Range { min, max } => *min <= value && value <= *max,
            Self::List(l) => l.iter().any(|f| f.cmp(&value).is_eq()),
        }
    }

    /// The accepted value closest to `target`; the first one wins a tie.
    pub fn nearest(&self, target: Fraction) -> Option<Fraction> {
        match self {
            Self::Fixed(f) => Some(*f),
            Self::Range { min, max } if min > max => None,
            Self::Range { min, max } => Some(target.clamp_to(*min, *max)),
            Self::List(l) => l.iter().copied().min_by(|a, b| {
                let da = (a.as_f64() - target.as_f64()).abs();
                let db = (b.as_f64() - target.as_f64()).abs();
                da.total_cmp(&db)
            }),
        }
    }

    pub fn intersect(&self, other: &FractionValue) -> Option<FractionValue> {
        match (self, other) {
            (Self::Range { min: a0, max: a1 }, Self::Range { min: b0, max: b1 }) => {
                let lo = (*a0).max(*b0);
                let hi = (*a1).min(*b1);
                match lo.cmp(&hi) {
                    std::cmp::Ordering::Greater => None,
                    std::cmp::Ordering::Equal => Some(Self::Fixed(lo)),
                    std::cmp::Ordering::Less => Some(Self::Range { min: lo, max: hi }),
                }
            }
            (Self::Fixed(f), other) | (other, Self::Fixed(f)) => {
                other.contains(*f).then_some(Self::Fixed(*f))
            }
            (Self::List(l), other) => {
                collapse_fraction(l.iter().copied().filter(|f| other.contains(*f)))
            }
            (range, Self::List(l)) => {
                collapse_fraction(l.iter().copied().filter(|f| range.contains(*f)))
            }
        }
    }

    pub fn is_subset(&self, other: &FractionValue) -> bool {
        match self {
            Self::Fixed(f) => other.contains(*f),
            Self::List(l) => l.iter().all(|f| other.contains(*f)),
            Self::Range { min, max } => match other {
                Self::Range { min: o0, max: o1 } => o0 <= min && max <= o1,
                Self::Fixed(f) => min == max && min == f,
                Self::List(_) => min == max && other.contains(*min),
            },
        }
    }

    /// Default fixation: as close to square pixels as allowed.
    fn fixate(&self) -> Fraction {
        self.nearest(Fraction::ONE).unwrap_or(Fraction::ONE)
    }
}

fn collapse_fraction(values: impl Iterator<Item = Fraction>) -> Option<FractionValue> {
    let values: Vec<Fraction> = values.collect();
    match values.len() {
        0 => None,
        1 => Some(FractionValue::Fixed(values[0])),
        _ => Some(FractionValue::List(values)),
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FormatValue {
    Fixed(VideoFormat),
    List(Vec<VideoFormat>),
}

impl FormatValue {
    pub fn fixed(&self) -> Option<VideoFormat> {
        match self {
            Self::Fixed(f) => Some(*f),
            Self::List(l) if l.len() == 1 => Some(l[0]),
            Self::List(_) => None,
        }
    }

    pub fn candidates(&self) -> &[VideoFormat] {
        match self {
            Self::Fixed(f) => std::slice::from_ref(f),
            Self::List(l) => l,
        }
    }

    pub fn contains(&self, format: VideoFormat) -> bool {
        self.candidates().contains(&format)
    }

    pub fn intersect(&self, other: &FormatValue) -> Option<FormatValue> {
        let common: Vec<VideoFormat> = self
            .candidates()
            .iter()
            .copied()
            .filter(|f| other.contains(*f))
            .collect();
        match common.len() {
            0 => None,
            1 => Some(Self::Fixed(common[0])),
            _ => Some(Self::List(common)),
        }
    }

    pub fn is_subset(&self, other: &FormatValue) -> bool {
        self.candidates().iter().all(|f| other.contains(*f))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum InterlaceMode {
    #[default]
    Progressive,
    /// Both fields interleaved in every frame
    Interleaved,
    /// Per-frame: frames flagged INTERLACED are interleaved, others progressive
    Mixed,
    /// Fields stored in separate buffers
    Fields,
}

impl InterlaceMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Progressive => "progressive",
            Self::Interleaved => "interleaved",
            Self::Mixed => "mixed",
            Self::Fields => "fields",
        }
    }
}

// ============================================================================
// Structure
// ============================================================================

/// Integer fields of a [`Structure`] that fixation works on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntField {
    Width,
    Height,
}

impl IntField {
    pub fn name(self) -> &'static str {
        match self {
            Self::Width => "width",
            Self::Height => "height",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct Structure {
    #[serde(default = "default_media_type")]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub width: Option<IntValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub height: Option<IntValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pixel_aspect_ratio: Option<FractionValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format: Option<FormatValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interlace_mode: Option<InterlaceMode>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub framerate: Option<FractionValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub colorimetry: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chroma_site: Option<String>,
}

fn default_media_type() -> String {
    MEDIA_TYPE_VIDEO_RAW.to_string()
}

impl Default for Structure {
    fn default() -> Self {
        Self::new_video_raw()
    }
}

impl Structure {
    pub fn new_video_raw() -> Self {
        Self {
            name: default_media_type(),
            width: None,
            height: None,
            pixel_aspect_ratio: None,
            format: None,
            interlace_mode: None,
            framerate: None,
            colorimetry: None,
            chroma_site: None,
        }
    }

    /// A fully fixed raw video structure.
    pub fn fixed(format: VideoFormat, width: i32, height: i32, par: Fraction) -> Self {
        Self::new_video_raw()
            .with_format(FormatValue::Fixed(format))
            .with_width(IntValue::Fixed(width))
            .with_height(IntValue::Fixed(height))
            .with_pixel_aspect_ratio(FractionValue::Fixed(par))
    }

    pub fn with_width(mut self, value: IntValue) -> Self {
        self.width = Some(value);
        self
    }

    pub fn with_height(mut self, value: IntValue) -> Self {
        self.height = Some(value);
        self
    }

    pub fn with_pixel_aspect_ratio(mut self, value: FractionValue) -> Self {
        self.pixel_aspect_ratio = Some(value);
        self
    }

    pub fn with_format(mut self, value: FormatValue) -> Self {
        self.format = Some(value);
        self
    }

    pub fn with_interlace_mode(mut self, mode: InterlaceMode) -> Self {
        self.interlace_mode = Some(mode);
        self
    }

    pub fn int_field(&self, field: IntField) -> Option<&IntValue> {
        match field {
            IntField::Width => self.width.as_ref(),
            IntField::Height => self.height.as_ref(),
        }
    }

    fn int_field_mut(&mut self, field: IntField) -> &mut Option<IntValue> {
        match field {
            IntField::Width => &mut self.width,
            IntField::Height => &mut self.height,
        }
    }

    /// Fixed value of an integer field, `None` if absent or still free.
    pub fn get_int(&self, field: IntField) -> Option<i32> {
        self.int_field(field).and_then(IntValue::fixed)
    }

    pub fn set_int(&mut self, field: IntField, value: i32) {
        *self.int_field_mut(field) = Some(IntValue::Fixed(value));
    }

    /// Fixed pixel aspect ratio, `None` if absent or still free.
    pub fn pixel_aspect_ratio_fixed(&self) -> Option<Fraction> {
        self.pixel_aspect_ratio.as_ref().and_then(FractionValue::fixed)
    }

    pub fn has_pixel_aspect_ratio(&self) -> bool {
        self.pixel_aspect_ratio.is_some()
    }

    pub fn set_pixel_aspect_ratio(&mut self, par: Fraction) {
        self.pixel_aspect_ratio = Some(FractionValue::Fixed(par));
    }

    pub fn format_fixed(&self) -> Option<VideoFormat> {
        self.format.as_ref().and_then(FormatValue::fixed)
    }

    /// Fix an integer field to the accepted value nearest to `target`.
    /// Returns false if the field is absent.
    pub fn fixate_field_nearest_int(&mut self, field: IntField, target: i32) -> bool {
        let slot = self.int_field_mut(field);
        match slot.as_ref().and_then(|v| v.nearest(target)) {
            Some(value) => {
                *slot = Some(IntValue::Fixed(value));
                true
            }
            None => false,
        }
    }

    /// Fix the pixel aspect ratio to the accepted value nearest to `target`.
    /// Returns false if the field is absent.
    pub fn fixate_field_nearest_fraction(&mut self, target: Fraction) -> bool {
        match self.pixel_aspect_ratio.as_ref().and_then(|v| v.nearest(target)) {
            Some(par) => {
                self.pixel_aspect_ratio = Some(FractionValue::Fixed(par));
                true
            }
            None => false,
        }
    }

    /// Fix every field that is still free to its default choice.
    pub fn fixate_remaining(&mut self) {
        for field in [IntField::Width, IntField::Height] {
            let slot = self.int_field_mut(field);
            let choice = slot.as_ref().filter(|v| !v.is_fixed()).map(IntValue::fixate);
            if let Some(value) = choice {
                *slot = Some(IntValue::Fixed(value));
            }
        }
        for slot in [&mut self.pixel_aspect_ratio, &mut self.framerate] {
            let choice = slot.as_ref().filter(|v| !v.is_fixed()).map(FractionValue::fixate);
            if let Some(value) = choice {
                *slot = Some(FractionValue::Fixed(value));
            }
        }
        if let Some(FormatValue::List(list)) = &self.format {
            if let Some(first) = list.first() {
                self.format = Some(FormatValue::Fixed(*first));
            }
        }
    }

    pub fn is_fixed(&self) -> bool {
        self.width.as_ref().map_or(true, IntValue::is_fixed)
            && self.height.as_ref().map_or(true, IntValue::is_fixed)
            && self.pixel_aspect_ratio.as_ref().map_or(true, FractionValue::is_fixed)
            && self.framerate.as_ref().map_or(true, FractionValue::is_fixed)
            && self.format.as_ref().map_or(true, |f| f.fixed().is_some())
    }

    /// Common subset of two structures, `None` if they cannot both hold.
    pub fn intersect(&self, other: &Structure) -> Option<Structure> {
        if self.name != other.name {
            return None;
        }

        Some(Structure {
            name: self.name.clone(),
            width: merge(&self.width, &other.width, IntValue::intersect)?,
            height: merge(&self.height, &other.height, IntValue::intersect)?,
            pixel_aspect_ratio: merge(
                &self.pixel_aspect_ratio,
                &other.pixel_aspect_ratio,
                FractionValue::intersect,
            )?,
            format: merge(&self.format, &other.format, FormatValue::intersect)?,
            interlace_mode: merge(&self.interlace_mode, &other.interlace_mode, |a, b| {
                (a == b).then_some(*a)
            })?,
            framerate: merge(&self.framerate, &other.framerate, FractionValue::intersect)?,
            colorimetry: merge(&self.colorimetry, &other.colorimetry, |a, b| {
                (a == b).then(|| a.clone())
            })?,
            chroma_site: merge(&self.chroma_site, &other.chroma_site, |a, b| {
                (a == b).then(|| a.clone())
            })?,
        })
    }

    /// True if every description this structure allows is also allowed by
    /// `other`. Fields `other` leaves out are unconstrained.
    pub fn is_subset(&self, other: &Structure) -> bool {
        fn field<T>(mine: &Option<T>, theirs: &Option<T>, subset: impl Fn(&T, &T) -> bool) -> bool {
            match (mine, theirs) {
                (_, None) => true,
                (None, Some(_)) => false,
                (Some(a), Some(b)) => subset(a, b),
            }
        }

        self.name == other.name
            && field(&self.width, &other.width, IntValue::is_subset)
            && field(&self.height, &other.height, IntValue::is_subset)
            && field(&self.pixel_aspect_ratio, &other.pixel_aspect_ratio, FractionValue::is_subset)
            && field(&self.format, &other.format, FormatValue::is_subset)
            && field(&self.interlace_mode, &other.interlace_mode, |a, b| a == b)
            && field(&self.framerate, &other.framerate, FractionValue::is_subset)
            && field(&self.colorimetry, &other.colorimetry, |a, b| a == b)
            && field(&self.chroma_site, &other.chroma_site, |a, b| a == b)
    }
}

/// Intersect two optional fields. The outer `None` means the intersection is
/// empty; `Some(None)` means neither side constrains the field.
fn merge<T: Clone>(
    a: &Option<T>,
    b: &Option<T>,
    intersect: impl Fn(&T, &T) -> Option<T>,
) -> Option<Option<T>> {
    match (a, b) {
        (Some(a), Some(b)) => intersect(a, b).map(Some),
        (Some(a), None) => Some(Some(a.clone())),
        (None, Some(b)) => Some(Some(b.clone())),
        (None, None) => Some(None),
    }
}

impl fmt::Display for Structure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)?;
        if let Some(v) = &self.width {
            write!(f, ", width={}", IntDisplay(v))?;
        }
        if let Some(v) = &self.height {
            write!(f, ", height={}", IntDisplay(v))?;
        }
        if let Some(v) = &self.pixel_aspect_ratio {
            write!(f, ", pixel-aspect-ratio={}", FractionDisplay(v))?;
        }
        if let Some(v) = &self.format {
            match v {
                FormatValue::Fixed(format) => write!(f, ", format={}", format)?,
                FormatValue::List(list) => {
                    let names: Vec<&str> = list.iter().map(|f| f.name()).collect();
                    write!(f, ", format={{ {} }}", names.join(", "))?;
                }
            }
        }
        if let Some(mode) = self.interlace_mode {
            write!(f, ", interlace-mode={}", mode.as_str())?;
        }
        if let Some(v) = &self.framerate {
            write!(f, ", framerate={}", FractionDisplay(v))?;
        }
        if let Some(v) = &self.colorimetry {
            write!(f, ", colorimetry={}", v)?;
        }
        if let Some(v) = &self.chroma_site {
            write!(f, ", chroma-site={}", v)?;
        }
        Ok(())
    }
}

struct IntDisplay<'a>(&'a IntValue);

impl fmt::Display for IntDisplay<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            IntValue::Fixed(v) => write!(f, "{}", v),
            IntValue::Range { min, max } => write!(f, "[{}, {}]", min, max),
            IntValue::List(l) => write!(f, "{:?}", l),
        }
    }
}

struct FractionDisplay<'a>(&'a FractionValue);

impl fmt::Display for FractionDisplay<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            FractionValue::Fixed(v) => write!(f, "{}", v),
            FractionValue::Range { min, max } => write!(f, "[{}, {}]", min, max),
            FractionValue::List(l) => {
                let items: Vec<String> = l.iter().map(|v| v.to_string()).collect();
                write!(f, "{{ {} }}", items.join(", "))
            }
        }
    }
}

// ============================================================================
// Caps
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Caps(Vec<Structure>);

impl Caps {
    pub fn new_empty() -> Self {
        Self(Vec::new())
    }

    pub fn from_structure(structure: Structure) -> Self {
        Self(vec![structure])
    }

    pub fn from_structures(structures: Vec<Structure>) -> Self {
        Self(structures)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn structure(&self, index: usize) -> Option<&Structure> {
        self.0.get(index)
    }

    pub fn structure_mut(&mut self, index: usize) -> Option<&mut Structure> {
        self.0.get_mut(index)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Structure> {
        self.0.iter()
    }

    pub fn append_structure(&mut self, structure: Structure) {
        self.0.push(structure);
    }

    /// Keep only the first structure.
    pub fn truncate(mut self) -> Self {
        self.0.truncate(1);
        self
    }

    pub fn is_fixed(&self) -> bool {
        self.0.len() == 1 && self.0[0].is_fixed()
    }

    /// True if `structure` is already expressed by one of ours.
    pub fn is_subset_structure(&self, structure: &Structure) -> bool {
        self.0.iter().any(|s| structure.is_subset(s))
    }

    /// Intersection keeping the structure order of `self` first, as a
    /// downstream filter expects.
    pub fn intersect_first(&self, other: &Caps) -> Caps {
        let mut result = Caps::new_empty();
        for mine in &self.0 {
            for theirs in &other.0 {
                if let Some(common) = mine.intersect(theirs) {
                    if !result.is_subset_structure(&common) {
                        result.append_structure(common);
                    }
                }
            }
        }
        result
    }

    /// Every structure the blitter can read or write.
    pub fn blitter_template(formats: &[VideoFormat]) -> Caps {
        Caps::from_structure(
            Structure::new_video_raw()
                .with_format(FormatValue::List(formats.to_vec()))
                .with_width(IntValue::range(1, i32::MAX))
                .with_height(IntValue::range(1, i32::MAX))
                .with_pixel_aspect_ratio(PAR_RANGE),
        )
    }
}

impl<'a> IntoIterator for &'a Caps {
    type Item = &'a Structure;
    type IntoIter = std::slice::Iter<'a, Structure>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

impl fmt::Display for Caps {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            return f.write_str("EMPTY");
        }
        let parts: Vec<String> = self.0.iter().map(|s| s.to_string()).collect();
        f.write_str(&parts.join("; "))
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_int_nearest() {
        assert_eq!(IntValue::range(64, 1024).nearest(2000), Some(1024));
        assert_eq!(IntValue::range(64, 1024).nearest(10), Some(64));
        assert_eq!(IntValue::List(vec![320, 640, 1280]).nearest(700), Some(640));
        // tie keeps the first entry
        assert_eq!(IntValue::List(vec![100, 200]).nearest(150), Some(100));
        assert_eq!(IntValue::Fixed(5).nearest(7), Some(5));
        assert_eq!(IntValue::range(100, 50).nearest(75), None);
    }

    #[test]
    fn test_inverted_range_rejected() {
        let json = r#"[{ "width": { "min": 100, "max": 50 }, "height": 540 }]"#;
        assert!(serde_json::from_str::<Caps>(json).is_err());

        let json = r#"[{ "pixel-aspect-ratio": { "min": { "num": 2, "den": 1 }, "max": { "num": 1, "den": 2 } } }]"#;
        assert!(serde_json::from_str::<Caps>(json).is_err());

        let ok: Caps = serde_json::from_str(r#"[{ "width": { "min": 50, "max": 100 } }]"#).unwrap();
        assert_eq!(ok.structure(0).and_then(|s| s.width.clone()), Some(IntValue::range(50, 100)));
        assert_eq!(
            IntValue::try_range(100, 50),
            Err(InvertedRange { min: "100".into(), max: "50".into() })
        );
    }

    #[test]
    fn test_int_intersect() {
        let a = IntValue::range(64, 1920);
        let b = IntValue::range(1000, 4096);
        assert_eq!(a.intersect(&b), Some(IntValue::range(1000, 1920)));
        assert_eq!(a.intersect(&IntValue::Fixed(32)), None);
        assert_eq!(IntValue::Fixed(100).intersect(&a), Some(IntValue::Fixed(100)));
        assert_eq!(
            IntValue::List(vec![32, 640, 720]).intersect(&a),
            Some(IntValue::List(vec![640, 720]))
        );
        assert_eq!(a.intersect(&IntValue::range(1920, 2000)), Some(IntValue::Fixed(1920)));
    }

    #[test]
    fn test_fraction_nearest_in_range() {
        let par = PAR_RANGE;
        assert_eq!(par.nearest(Fraction::new(1, 2)), Some(Fraction::new(1, 2)));
        let narrow = FractionValue::Range {
            min: Fraction::new(1, 1),
            max: Fraction::new(2, 1),
        };
        assert_eq!(narrow.nearest(Fraction::new(1, 2)), Some(Fraction::ONE));
    }

    #[test]
    fn test_structure_intersect() {
        let a = Structure::new_video_raw()
            .with_width(IntValue::range(64, i32::MAX))
            .with_format(FormatValue::List(vec![VideoFormat::I420, VideoFormat::Nv12]));
        let b = Structure::new_video_raw()
            .with_width(IntValue::Fixed(640))
            .with_height(IntValue::Fixed(480))
            .with_format(FormatValue::List(vec![VideoFormat::Nv12, VideoFormat::Rgba]));

        let common = a.intersect(&b).unwrap();
        assert_eq!(common.get_int(IntField::Width), Some(640));
        assert_eq!(common.get_int(IntField::Height), Some(480));
        assert_eq!(common.format_fixed(), Some(VideoFormat::Nv12));

        let c = Structure::new_video_raw().with_format(FormatValue::Fixed(VideoFormat::Gray8));
        assert!(a.intersect(&c).is_none());
    }

    #[test]
    fn test_subset() {
        let wide = Structure::new_video_raw()
            .with_width(IntValue::range(64, i32::MAX))
            .with_height(IntValue::range(64, i32::MAX));
        let fixed = Structure::fixed(VideoFormat::I420, 640, 480, Fraction::ONE);
        assert!(fixed.is_subset(&wide));
        assert!(!wide.is_subset(&fixed));

        let caps = Caps::from_structure(wide);
        assert!(caps.is_subset_structure(&fixed));
    }

    #[test]
    fn test_fixate_remaining() {
        let mut s = Structure::new_video_raw()
            .with_width(IntValue::range(64, 4096))
            .with_height(IntValue::List(vec![720, 1080]))
            .with_pixel_aspect_ratio(PAR_RANGE)
            .with_format(FormatValue::List(vec![VideoFormat::Nv12, VideoFormat::I420]));
        assert!(!s.is_fixed());
        s.fixate_remaining();
        assert!(s.is_fixed());
        assert_eq!(s.get_int(IntField::Width), Some(64));
        assert_eq!(s.get_int(IntField::Height), Some(720));
        assert_eq!(s.pixel_aspect_ratio_fixed(), Some(Fraction::ONE));
        assert_eq!(s.format_fixed(), Some(VideoFormat::Nv12));
    }

    #[test]
    fn test_caps_json() {
        let json = r#"[{"width": 1920, "height": {"min": 64, "max": 1080},
                        "pixel-aspect-ratio": {"num": 1, "den": 1},
                        "format": ["NV12", "I420"], "interlace-mode": "mixed"}]"#;
        let caps: Caps = serde_json::from_str(json).unwrap();
        let s = caps.structure(0).unwrap();
        assert_eq!(s.name, MEDIA_TYPE_VIDEO_RAW);
        assert_eq!(s.get_int(IntField::Width), Some(1920));
        assert_eq!(s.height, Some(IntValue::range(64, 1080)));
        assert_eq!(s.pixel_aspect_ratio_fixed(), Some(Fraction::ONE));
        assert_eq!(s.interlace_mode, Some(InterlaceMode::Mixed));
        assert_eq!(
            s.format,
            Some(FormatValue::List(vec![VideoFormat::Nv12, VideoFormat::I420]))
        );
    }

    #[test]
    fn test_display() {
        let s = Structure::fixed(VideoFormat::Nv12, 640, 480, Fraction::ONE);
        assert_eq!(
            s.to_string(),
            "video/x-raw, width=640, height=480, pixel-aspect-ratio=1/1, format=NV12"
        );
    }
}
