//! Fractions for pixel and display aspect ratios.
//!
//! All arithmetic is overflow checked: every result has to fit an `i32`
//! numerator and denominator, the same limits caps values are expressed in.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

/// A fraction `num/den` with a positive denominator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Fraction {
    pub num: i32,
    pub den: i32,
}

impl Fraction {
    pub const ONE: Self = Self { num: 1, den: 1 };
    /// Smallest representable positive fraction (lower PAR bound).
    pub const MIN_POSITIVE: Self = Self { num: 1, den: i32::MAX };
    /// Largest representable fraction (upper PAR bound).
    pub const MAX: Self = Self { num: i32::MAX, den: 1 };

    pub const fn new(num: i32, den: i32) -> Self {
        Self { num, den }
    }

    pub fn is_one(self) -> bool {
        self.num == self.den
    }

    pub fn inverse(self) -> Self {
        Self {
            num: self.den,
            den: self.num,
        }
    }

    /// Reduce to lowest terms.
    pub fn reduced(self) -> Self {
        let g = gcd(self.num as i64, self.den as i64);
        if g == 0 {
            return self;
        }
        Self {
            num: (self.num as i64 / g) as i32,
            den: (self.den as i64 / g) as i32,
        }
    }

    /// Multiply two fractions, cross-reducing first so that intermediate
    /// products stay as small as possible. Returns `None` on overflow or a
    /// zero denominator.
    pub fn checked_mul(self, other: Fraction) -> Option<Fraction> {
        if self.den == 0 || other.den == 0 {
            return None;
        }

        let (mut a_n, mut a_d) = reduce_pair(self.num as i64, self.den as i64);
        let (mut b_n, mut b_d) = reduce_pair(other.num as i64, other.den as i64);

        let g = gcd(a_n, b_d);
        if g != 0 {
            a_n /= g;
            b_d /= g;
        }
        let g = gcd(a_d, b_n);
        if g != 0 {
            a_d /= g;
            b_n /= g;
        }

        if a_n != 0 && i32::MAX as i64 / a_n.abs() < b_n.abs() {
            return None;
        }
        if i32::MAX as i64 / a_d.abs() < b_d.abs() {
            return None;
        }

        let (n, d) = reduce_pair(a_n * b_n, a_d * b_d);
        Some(Fraction::new(n as i32, d as i32))
    }

    /// The pixel aspect ratio an output of `out_width`x`out_height` needs to
    /// show a `width`x`height` picture with pixel aspect ratio `par` at the
    /// same display aspect ratio.
    pub fn display_ratio(
        width: i32,
        height: i32,
        par: Fraction,
        out_width: i32,
        out_height: i32,
    ) -> Option<Fraction> {
        Fraction::new(width, height)
            .checked_mul(par)?
            .checked_mul(Fraction::new(out_height, out_width))
    }

    /// Returns `value * num / den`, rounded to nearest and saturated to the
    /// positive `i32` range.
    pub fn scale(value: i32, num: i32, den: i32) -> i32 {
        if den == 0 {
            return 0;
        }
        let value = value as i128;
        let num = num as i128;
        let den = den as i128;
        let scaled = (value * num + den / 2) / den;
        scaled.clamp(0, i32::MAX as i128) as i32
    }

    /// `value` scaled by this fraction.
    pub fn scale_int(self, value: i32) -> i32 {
        Self::scale(value, self.num, self.den)
    }

    /// Clamp into the inclusive range `[min, max]`.
    pub fn clamp_to(self, min: Fraction, max: Fraction) -> Fraction {
        if self < min {
            min
        } else if self > max {
            max
        } else {
            self
        }
    }

    pub fn as_f64(self) -> f64 {
        self.num as f64 / self.den as f64
    }
}

impl Default for Fraction {
    fn default() -> Self {
        Self::ONE
    }
}

impl PartialOrd for Fraction {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Fraction {
    fn cmp(&self, other: &Self) -> Ordering {
        let lhs = self.num as i64 * other.den as i64;
        let rhs = other.num as i64 * self.den as i64;
        lhs.cmp(&rhs)
    }
}

impl fmt::Display for Fraction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.num, self.den)
    }
}

fn gcd(mut a: i64, mut b: i64) -> i64 {
    while b != 0 {
        let t = a % b;
        a = b;
        b = t;
    }
    a.abs()
}

fn reduce_pair(n: i64, d: i64) -> (i64, i64) {
    let g = gcd(n, d);
    if g == 0 {
        (n, d)
    } else {
        (n / g, d / g)
    }
}

// ============================================================================
// Tests
// ============================================================================
