//! Fixed-point decimal values.
//!
//! Formulas do not use floating point: decimals are a signed count of
//! millionths (6 decimal places), so authored constants survive
//! parse/print round trips exactly and results are identical across
//! platforms. Multiplication and division widen through `i128`.

use std::cmp::Ordering;
use std::fmt;
use std::ops::{Add, Neg, Sub};

/// Millionths per unit.
pub const SCALE: i64 = 1_000_000;

/// Number of decimal places carried.
pub const PLACES: u32 = 6;

/// Fixed-point decimal: `raw` millionths.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Decimal {
    raw: i64,
}

impl Decimal {
    /// From a raw count of millionths.
    pub const fn from_raw(raw: i64) -> Self {
        Self { raw }
    }

    pub const fn from_int(v: i64) -> Self {
        Self { raw: v * SCALE }
    }

    /// The smallest positive decimal, substituted for zero divisors under
    /// the lenient division policy.
    pub const fn epsilon() -> Self {
        Self { raw: 1 }
    }

    pub const fn raw(self) -> i64 {
        self.raw
    }

    pub const fn is_zero(self) -> bool {
        self.raw == 0
    }

    /// Truncate toward zero.
    pub const fn as_int(self) -> i64 {
        self.raw / SCALE
    }

    pub fn as_f64(self) -> f64 {
        self.raw as f64 / SCALE as f64
    }

    /// Parse `digits[.digits]`. At most six fractional digits are kept;
    /// anything beyond the sixth place is dropped.
    pub fn parse(text: &str) -> Option<Self> {
        let (negative, text) = match text.strip_prefix('-') {
            Some(rest) => (true, rest),
            None => (false, text),
        };
        let (int_part, frac_part) = match text.split_once('.') {
            Some((i, f)) => (i, f),
            None => (text, ""),
        };
        if int_part.is_empty() && frac_part.is_empty() {
            return None;
        }
        let mut raw: i64 = 0;
        if !int_part.is_empty() {
            raw = int_part.parse::<i64>().ok()?.checked_mul(SCALE)?;
        }
        let mut place = SCALE / 10;
        for c in frac_part.chars().take(PLACES as usize) {
            let digit = c.to_digit(10)? as i64;
            raw += digit * place;
            place /= 10;
        }
        // validate the dropped tail is still numeric
        if frac_part.chars().any(|c| !c.is_ascii_digit()) {
            return None;
        }
        Some(Self {
            raw: if negative { -raw } else { raw },
        })
    }

    pub fn mul(self, other: Decimal) -> Decimal {
        let wide = self.raw as i128 * other.raw as i128 / SCALE as i128;
        Decimal::from_raw(wide as i64)
    }

    /// Divide by a non-zero decimal. Zero divisors are the caller's
    /// responsibility (see the division-by-zero policy in the runtime).
    pub fn div(self, other: Decimal) -> Decimal {
        debug_assert!(other.raw != 0, "decimal division by zero");
        let wide = self.raw as i128 * SCALE as i128 / other.raw as i128;
        Decimal::from_raw(wide as i64)
    }

    pub fn rem(self, other: Decimal) -> Decimal {
        debug_assert!(other.raw != 0, "decimal modulo by zero");
        Decimal::from_raw(self.raw % other.raw)
    }

    pub fn abs(self) -> Decimal {
        Decimal::from_raw(self.raw.abs())
    }

    /// Largest integer <= self.
    pub fn floor(self) -> i64 {
        self.raw.div_euclid(SCALE)
    }

    /// Smallest integer >= self.
    pub fn ceil(self) -> i64 {
        -(-self.raw).div_euclid(SCALE)
    }

    /// Round half away from zero.
    pub fn round(self) -> i64 {
        if self.raw >= 0 {
            (self.raw + SCALE / 2).div_euclid(SCALE)
        } else {
            -(-self.raw + SCALE / 2).div_euclid(SCALE)
        }
    }
}

impl From<i64> for Decimal {
    fn from(v: i64) -> Self {
        Self::from_int(v)
    }
}

impl Add for Decimal {
    type Output = Decimal;
    fn add(self, other: Decimal) -> Decimal {
        Decimal::from_raw(self.raw + other.raw)
    }
}

impl Sub for Decimal {
    type Output = Decimal;
    fn sub(self, other: Decimal) -> Decimal {
        Decimal::from_raw(self.raw - other.raw)
    }
}

impl Neg for Decimal {
    type Output = Decimal;
    fn neg(self) -> Decimal {
        Decimal::from_raw(-self.raw)
    }
}

impl PartialOrd for Decimal {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Decimal {
    fn cmp(&self, other: &Self) -> Ordering {
        self.raw.cmp(&other.raw)
    }
}

impl fmt::Display for Decimal {
    /// Prints the integer part, a point, and the fraction with trailing
    /// zeros trimmed — but always at least one fractional digit, so a
    /// decimal never redisplays as an integer.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let raw = self.raw;
        if raw < 0 {
            write!(f, "-")?;
        }
        let magnitude = raw.unsigned_abs();
        let int_part = magnitude / SCALE as u64;
        let mut frac = magnitude % SCALE as u64;
        let mut digits = PLACES;
        while digits > 1 && frac % 10 == 0 {
            frac /= 10;
            digits -= 1;
        }
        write!(f, "{}.{:0width$}", int_part, frac, width = digits as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_and_display_round_trip() {
        for text in ["0.5", "0.0005", "12.25", "3.0", "0.000001"] {
            let d = Decimal::parse(text).unwrap();
            assert_eq!(d.to_string(), text);
        }
    }

    #[test]
    fn parse_negative() {
        let d = Decimal::parse("-2.5").unwrap();
        assert_eq!(d.raw(), -2_500_000);
        assert_eq!(d.to_string(), "-2.5");
    }

    #[test]
    fn excess_places_dropped() {
        let d = Decimal::parse("0.1234567").unwrap();
        assert_eq!(d.raw(), 123_456);
    }

    #[test]
    fn mul_div() {
        let half = Decimal::parse("0.5").unwrap();
        let three = Decimal::from_int(3);
        assert_eq!(half.mul(three), Decimal::parse("1.5").unwrap());
        assert_eq!(three.div(half), Decimal::from_int(6));
    }

    #[test]
    fn rounding() {
        assert_eq!(Decimal::parse("2.5").unwrap().round(), 3);
        assert_eq!(Decimal::parse("-2.5").unwrap().round(), -3);
        assert_eq!(Decimal::parse("2.4").unwrap().round(), 2);
        assert_eq!(Decimal::parse("-2.7").unwrap().floor(), -3);
        assert_eq!(Decimal::parse("-2.7").unwrap().ceil(), -2);
    }

    #[test]
    fn epsilon_is_tiny_but_positive() {
        assert!(Decimal::epsilon().raw() > 0);
        assert_eq!(Decimal::epsilon().to_string(), "0.000001");
    }
}
