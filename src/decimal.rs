//! Fixed-point decimal type with a per-value scale.
//!
//! Uses `rust_decimal` internally. Every construction and every arithmetic
//! result is truncated toward zero to the scale, then padded so that the
//! value always renders with exactly `scale` fraction digits.

use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Serialize, Serializer};
use std::cmp::Ordering;
use std::fmt;
use std::ops::{Add, Neg, Sub};
use std::str::FromStr;

/// A decimal that keeps a fixed number of fraction digits.
///
/// Scale is applied by truncation, never by rounding, so that accumulating
/// money values never drifts upwards.
///
/// # Examples
///
/// ```
/// use control_break::FixedDecimal;
///
/// let amount = FixedDecimal::parse("6.6666", 2).unwrap();
/// assert_eq!(amount.to_string(), "6.66");
/// ```
#[derive(Debug, Clone, Copy, Default)]
pub struct FixedDecimal(Decimal);

impl FixedDecimal {
    /// Largest scale `rust_decimal` can represent.
    pub const MAX_SCALE: u32 = 28;

    /// Creates a `FixedDecimal` from a `Decimal`, truncating to `scale` places.
    /// A value truncated to zero is always the positive zero.
    pub fn new(value: Decimal, scale: u32) -> Self {
        let scale = scale.min(Self::MAX_SCALE);
        let mut truncated = value.round_dp_with_strategy(scale, RoundingStrategy::ToZero);
        truncated.rescale(scale);
        if truncated.is_zero() {
            truncated.set_sign_positive(true);
        }
        FixedDecimal(truncated)
    }

    /// The identity value for `scale`, e.g. `0.00` for scale 2.
    pub fn zero(scale: u32) -> Self {
        Self::new(Decimal::ZERO, scale)
    }

    /// Parses a decimal string and truncates it to `scale`.
    pub fn parse(s: &str, scale: u32) -> std::result::Result<Self, rust_decimal::Error> {
        let decimal = Decimal::from_str(s.trim())?;
        Ok(Self::new(decimal, scale))
    }

    /// Converts a float; non-finite input becomes zero.
    pub fn from_f64(value: f64, scale: u32) -> Self {
        let decimal = Decimal::from_f64(value).unwrap_or(Decimal::ZERO);
        Self::new(decimal, scale)
    }

    pub fn from_i64(value: i64, scale: u32) -> Self {
        Self::new(Decimal::from(value), scale)
    }

    /// Number of fraction digits kept.
    pub fn scale(&self) -> u32 {
        self.0.scale()
    }

    /// Returns `true` if this value is zero.
    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }

    /// Re-expresses the value at another scale (truncating when narrowing).
    pub fn with_scale(self, scale: u32) -> Self {
        Self::new(self.0, scale)
    }

    /// Divides by a positive count. Returns `None` for a zero divisor.
    pub fn div_count(self, divisor: u64) -> Option<Self> {
        if divisor == 0 {
            return None;
        }
        let quotient = self.0.checked_div(Decimal::from(divisor))?;
        Some(Self::new(quotient, self.scale()))
    }

    pub fn to_f64(&self) -> f64 {
        self.0.to_f64().unwrap_or(f64::NAN)
    }

    pub fn as_decimal(&self) -> Decimal {
        self.0
    }
}

impl From<Decimal> for FixedDecimal {
    /// Keeps the decimal's own scale.
    fn from(value: Decimal) -> Self {
        let scale = value.scale();
        FixedDecimal::new(value, scale)
    }
}

impl fmt::Display for FixedDecimal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl PartialEq for FixedDecimal {
    fn eq(&self, other: &Self) -> bool {
        self.0 == other.0
    }
}

impl Eq for FixedDecimal {}

impl PartialOrd for FixedDecimal {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for FixedDecimal {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.cmp(&other.0)
    }
}

impl Add for FixedDecimal {
    type Output = Self;

    /// The result keeps the wider of the two scales.
    fn add(self, rhs: Self) -> Self::Output {
        let scale = self.scale().max(rhs.scale());
        FixedDecimal::new(self.0 + rhs.0, scale)
    }
}

impl Sub for FixedDecimal {
    type Output = Self;

    fn sub(self, rhs: Self) -> Self::Output {
        let scale = self.scale().max(rhs.scale());
        FixedDecimal::new(self.0 - rhs.0, scale)
    }
}

impl Neg for FixedDecimal {
    type Output = Self;

    fn neg(self) -> Self::Output {
        FixedDecimal::new(-self.0, self.scale())
    }
}

impl Serialize for FixedDecimal {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}
