//! Fixed point temperature formats.
//!
//! [`Temp`] holds a temperature (or temperature difference, gain, estimator)
//! with 7 integer bits and 9 fraction bits, so 1.0 is stored as 512. The
//! lowest representable value is reserved as [`Temp::INVALID`] and means the
//! value is unknown.
//!
//! [`LongTemp`] keeps the same 9 fraction bits in an `i32`. It is used as an
//! accumulator: sums and products of narrow values are exact in the wide
//! format and only come back to [`Temp`] through an explicit clamp.

use core::fmt;
use core::ops::{Add, AddAssign, Neg, Sub};

/// Number of fraction bits in both formats.
pub const FRACTION_BITS: u32 = 9;

/// Narrow fixed point value (7.9).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Temp(i16);

impl Temp {
    /// Undefined value: sensor unavailable or setpoint not supplied yet.
    pub const INVALID: Temp = Temp(i16::MIN);
    /// Lowest valid value, one step above the sentinel.
    pub const MIN: Temp = Temp(i16::MIN + 1);
    pub const MAX: Temp = Temp(i16::MAX);
    pub const ZERO: Temp = Temp(0);

    pub const fn from_raw(raw: i16) -> Self {
        Temp(raw)
    }

    pub const fn raw(self) -> i16 {
        self.0
    }

    /// Whole degrees, -63..=63.
    pub const fn from_degrees(degrees: i8) -> Self {
        Temp((degrees as i16) << FRACTION_BITS)
    }

    /// Hundredths of a degree, rounded to the nearest step and clamped to
    /// the valid range. `from_centi(30)` is 0.3 (raw 154).
    pub const fn from_centi(centi: i32) -> Self {
        let scaled = centi * (1 << FRACTION_BITS);
        let rounded = if scaled >= 0 { (scaled + 50) / 100 } else { (scaled - 50) / 100 };
        if rounded > i16::MAX as i32 {
            Temp::MAX
        } else if rounded < (i16::MIN + 1) as i32 {
            Temp::MIN
        } else {
            Temp(rounded as i16)
        }
    }

    pub const fn is_valid(self) -> bool {
        self.0 != i16::MIN
    }

    pub const fn wide(self) -> LongTemp {
        LongTemp(self.0 as i32)
    }

    /// Magnitude, saturating. The sentinel stays the sentinel.
    pub fn abs(self) -> Temp {
        if self.is_valid() {
            Temp(self.0.abs())
        } else {
            self
        }
    }

    /// Value rounded to hundredths of a degree.
    pub fn centi(self) -> i32 {
        self.wide().centi()
    }
}

/// Wide fixed point value (23.9), accumulator only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct LongTemp(i32);

impl LongTemp {
    pub const ZERO: LongTemp = LongTemp(0);

    pub const fn from_raw(raw: i32) -> Self {
        LongTemp(raw)
    }

    pub const fn raw(self) -> i32 {
        self.0
    }

    /// Clamp into `[min, max]` and narrow. This is the only place a value is
    /// allowed to saturate.
    pub fn clamp_to(self, min: Temp, max: Temp) -> Temp {
        Temp(self.0.clamp(min.0 as i32, max.0 as i32) as i16)
    }

    /// Narrow to the full valid range of [`Temp`].
    pub fn saturate(self) -> Temp {
        self.clamp_to(Temp::MIN, Temp::MAX)
    }

    /// Arithmetic shift right, i.e. division by `2^n` rounding down.
    pub const fn shr(self, n: u32) -> LongTemp {
        LongTemp(self.0 >> n)
    }

    pub const fn scale(self, factor: i32) -> LongTemp {
        LongTemp(self.0.saturating_mul(factor))
    }

    pub fn centi(self) -> i32 {
        let scaled = self.0 as i64 * 100;
        let half = 1i64 << (FRACTION_BITS - 1);
        let rounded = if scaled >= 0 { (scaled + half) >> FRACTION_BITS } else { -((-scaled + half) >> FRACTION_BITS) };
        rounded as i32
    }
}

impl From<Temp> for LongTemp {
    fn from(value: Temp) -> Self {
        value.wide()
    }
}

/// Narrow times narrow. The product is widened and shifted back by the
/// fraction bits; the low fraction bits are discarded.
pub fn multiply(a: Temp, b: Temp) -> LongTemp {
    LongTemp((a.0 as i32 * b.0 as i32) >> FRACTION_BITS)
}

/// Narrow times wide, same shift. Saturates at the wide range instead of
/// wrapping.
pub fn multiply_long(a: Temp, b: LongTemp) -> LongTemp {
    let product = (a.0 as i64 * b.0 as i64) >> FRACTION_BITS;
    LongTemp(product.clamp(i32::MIN as i64, i32::MAX as i64) as i32)
}

impl Add for Temp {
    type Output = LongTemp;

    fn add(self, rhs: Temp) -> LongTemp {
        LongTemp(self.0 as i32 + rhs.0 as i32)
    }
}

impl Sub for Temp {
    type Output = LongTemp;

    fn sub(self, rhs: Temp) -> LongTemp {
        LongTemp(self.0 as i32 - rhs.0 as i32)
    }
}

impl Add for LongTemp {
    type Output = LongTemp;

    fn add(self, rhs: LongTemp) -> LongTemp {
        LongTemp(self.0.saturating_add(rhs.0))
    }
}

impl Add<Temp> for LongTemp {
    type Output = LongTemp;

    fn add(self, rhs: Temp) -> LongTemp {
        LongTemp(self.0.saturating_add(rhs.0 as i32))
    }
}

impl AddAssign for LongTemp {
    fn add_assign(&mut self, rhs: LongTemp) {
        *self = *self + rhs;
    }
}

impl Sub for LongTemp {
    type Output = LongTemp;

    fn sub(self, rhs: LongTemp) -> LongTemp {
        LongTemp(self.0.saturating_sub(rhs.0))
    }
}

impl Neg for LongTemp {
    type Output = LongTemp;

    fn neg(self) -> LongTemp {
        LongTemp(self.0.saturating_neg())
    }
}

impl PartialEq<Temp> for LongTemp {
    fn eq(&self, other: &Temp) -> bool {
        self.0 == other.0 as i32
    }
}

impl PartialOrd<Temp> for LongTemp {
    fn partial_cmp(&self, other: &Temp) -> Option<core::cmp::Ordering> {
        self.0.partial_cmp(&(other.0 as i32))
    }
}

impl PartialEq<LongTemp> for Temp {
    fn eq(&self, other: &LongTemp) -> bool {
        self.0 as i32 == other.0
    }
}

impl PartialOrd<LongTemp> for Temp {
    fn partial_cmp(&self, other: &LongTemp) -> Option<core::cmp::Ordering> {
        (self.0 as i32).partial_cmp(&other.0)
    }
}

fn write_centi(f: &mut fmt::Formatter<'_>, centi: i32) -> fmt::Result {
    let sign = if centi < 0 { "-" } else { "" };
    let magnitude = centi.unsigned_abs();
    write!(f, "{}{}.{:02}", sign, magnitude / 100, magnitude % 100)
}

impl fmt::Display for Temp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.is_valid() {
            return f.write_str("null");
        }
        write_centi(f, self.centi())
    }
}

impl fmt::Display for LongTemp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_centi(f, self.centi())
    }
}

#[cfg(feature = "defmt")]
impl defmt::Format for Temp {
    fn format(&self, f: defmt::Formatter) {
        let mut text: heapless::String<12> = heapless::String::new();
        let _ = core::fmt::write(&mut text, format_args!("{}", self));
        defmt::write!(f, "{=str}", text.as_str())
    }
}

#[cfg(feature = "defmt")]
impl defmt::Format for LongTemp {
    fn format(&self, f: defmt::Formatter) {
        let mut text: heapless::String<16> = heapless::String::new();
        let _ = core::fmt::write(&mut text, format_args!("{}", self));
        defmt::write!(f, "{=str}", text.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::fmt::Write;

    fn text(t: Temp) -> heapless::String<12> {
        let mut s = heapless::String::new();
        write!(s, "{}", t).unwrap();
        s
    }

    #[test]
    fn centi_conversion_matches_factory_constants() {
        assert_eq!(Temp::from_centi(30).raw(), 154);
        assert_eq!(Temp::from_centi(-20).raw(), -102);
        assert_eq!(Temp::from_centi(20).raw(), 102);
        assert_eq!(Temp::from_centi(-30).raw(), -154);
        assert_eq!(Temp::from_centi(60).raw(), 307);
        assert_eq!(Temp::from_centi(-300).raw(), -1536);
        assert_eq!(Temp::from_centi(2000).raw(), 20 << 9);
        assert_eq!(Temp::from_degrees(30).raw(), 30 * 512);
    }

    #[test]
    fn centi_conversion_clamps_instead_of_wrapping() {
        assert_eq!(Temp::from_centi(100_000), Temp::MAX);
        assert_eq!(Temp::from_centi(-100_000), Temp::MIN);
        assert!(Temp::from_centi(-100_000).is_valid());
    }

    #[test]
    fn multiply_shifts_back_to_nine_fraction_bits() {
        // 20.0 * 0.5 = 10.0
        let p = multiply(Temp::from_degrees(20), Temp::from_centi(50));
        assert_eq!(p, Temp::from_degrees(10));
        // -3.0 * 0.25 = -0.75
        let d = multiply(Temp::from_centi(-300), Temp::from_centi(25));
        assert_eq!(d.raw(), -384);
    }

    #[test]
    fn products_beyond_narrow_range_stay_exact_in_wide_format() {
        let p = multiply(Temp::from_degrees(60), Temp::from_degrees(60));
        assert_eq!(p.raw(), 3600 * 512);
        assert_eq!(p.saturate(), Temp::MAX);
    }

    #[test]
    fn multiply_long_saturates_at_wide_range() {
        let big = LongTemp::from_raw(i32::MAX);
        assert_eq!(multiply_long(Temp::from_degrees(4), big).raw(), i32::MAX);
        assert_eq!(multiply_long(Temp::from_centi(60), LongTemp::from_raw(512)).raw(), 307);
    }

    #[test]
    fn clamp_to_bounds() {
        let lo = Temp::from_degrees(1);
        let hi = Temp::from_degrees(30);
        assert_eq!(Temp::from_degrees(40).wide().clamp_to(lo, hi), hi);
        assert_eq!(Temp::from_degrees(-5).wide().clamp_to(lo, hi), lo);
        assert_eq!(Temp::from_degrees(12).wide().clamp_to(lo, hi), Temp::from_degrees(12));
    }

    #[test]
    fn sums_are_wide() {
        let sum = Temp::MAX + Temp::MAX;
        assert_eq!(sum.raw(), 2 * i16::MAX as i32);
        assert!(sum > Temp::MAX);
    }

    #[test]
    fn display() {
        assert_eq!(text(Temp::from_degrees(20)).as_str(), "20.00");
        assert_eq!(text(Temp::from_centi(-25)).as_str(), "-0.25");
        assert_eq!(text(Temp::from_centi(1850)).as_str(), "18.50");
        assert_eq!(text(Temp::INVALID).as_str(), "null");
    }

    #[test]
    fn abs_keeps_sentinel() {
        assert_eq!(Temp::from_centi(-50).abs(), Temp::from_centi(50));
        assert_eq!(Temp::INVALID.abs(), Temp::INVALID);
    }
}
