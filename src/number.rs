//! Numeric values flowing through accumulators and collectors.

use crate::decimal::FixedDecimal;
use rust_decimal::Decimal;
use serde::{Serialize, Serializer};
use std::cmp::Ordering;
use std::fmt;

/// A metric contribution or aggregate result.
///
/// Equality and ordering are numeric across variants, so `Int(4)` equals
/// `Float(4.0)` and a `Decimal` of `4.00`.
#[derive(Debug, Clone, Copy)]
pub enum Number {
    Int(i64),
    Float(f64),
    Decimal(FixedDecimal),
}

impl Number {
    pub fn as_f64(&self) -> f64 {
        match self {
            Number::Int(i) => *i as f64,
            Number::Float(f) => *f,
            Number::Decimal(d) => d.to_f64(),
        }
    }

    /// Converts to a fixed decimal truncated to `scale`.
    pub fn to_fixed(&self, scale: u32) -> FixedDecimal {
        match self {
            Number::Int(i) => FixedDecimal::from_i64(*i, scale),
            Number::Float(f) => FixedDecimal::from_f64(*f, scale),
            Number::Decimal(d) => d.with_scale(scale),
        }
    }

    pub fn is_zero(&self) -> bool {
        match self {
            Number::Int(i) => *i == 0,
            Number::Float(f) => *f == 0.0,
            Number::Decimal(d) => d.is_zero(),
        }
    }

    /// Addition without a configured scale.
    ///
    /// `Int + Int` stays integral (falling back to float on overflow) and
    /// `Decimal + Decimal` stays decimal; every other mix is computed in `f64`.
    pub fn native_add(&self, other: &Number) -> Number {
        match (self, other) {
            (Number::Int(a), Number::Int(b)) => match a.checked_add(*b) {
                Some(sum) => Number::Int(sum),
                None => Number::Float(*a as f64 + *b as f64),
            },
            (Number::Decimal(a), Number::Decimal(b)) => Number::Decimal(*a + *b),
            (Number::Decimal(a), Number::Int(b)) => {
                Number::Decimal(*a + FixedDecimal::from_i64(*b, a.scale()))
            }
            (Number::Int(a), Number::Decimal(b)) => {
                Number::Decimal(FixedDecimal::from_i64(*a, b.scale()) + *b)
            }
            _ => Number::Float(self.as_f64() + other.as_f64()),
        }
    }

    pub fn negate(&self) -> Number {
        match self {
            Number::Int(i) => match i.checked_neg() {
                Some(n) => Number::Int(n),
                None => Number::Float(-(*i as f64)),
            },
            Number::Float(f) => Number::Float(-f),
            Number::Decimal(d) => Number::Decimal(-*d),
        }
    }
}

impl PartialEq for Number {
    fn eq(&self, other: &Self) -> bool {
        self.partial_cmp(other) == Some(Ordering::Equal)
    }
}

impl PartialOrd for Number {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        match (self, other) {
            (Number::Int(a), Number::Int(b)) => Some(a.cmp(b)),
            (Number::Decimal(a), Number::Decimal(b)) => Some(a.cmp(b)),
            (Number::Decimal(a), Number::Int(b)) => {
                Some(a.as_decimal().cmp(&Decimal::from(*b)))
            }
            (Number::Int(a), Number::Decimal(b)) => {
                Some(Decimal::from(*a).cmp(&b.as_decimal()))
            }
            _ => self.as_f64().partial_cmp(&other.as_f64()),
        }
    }
}

impl fmt::Display for Number {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Number::Int(i) => write!(f, "{}", i),
            Number::Float(x) => write!(f, "{}", x),
            Number::Decimal(d) => write!(f, "{}", d),
        }
    }
}

impl Serialize for Number {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match self {
            Number::Int(i) => serializer.serialize_i64(*i),
            Number::Float(f) => serializer.serialize_f64(*f),
            Number::Decimal(d) => d.serialize(serializer),
        }
    }
}

impl From<i64> for Number {
    fn from(value: i64) -> Self {
        Number::Int(value)
    }
}

impl From<i32> for Number {
    fn from(value: i32) -> Self {
        Number::Int(value as i64)
    }
}

impl From<u64> for Number {
    fn from(value: u64) -> Self {
        match i64::try_from(value) {
            Ok(i) => Number::Int(i),
            Err(_) => Number::Float(value as f64),
        }
    }
}

impl From<f64> for Number {
    fn from(value: f64) -> Self {
        Number::Float(value)
    }
}

impl From<FixedDecimal> for Number {
    fn from(value: FixedDecimal) -> Self {
        Number::Decimal(value)
    }
}

impl From<Decimal> for Number {
    fn from(value: Decimal) -> Self {
        Number::Decimal(FixedDecimal::from(value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_numeric_equality_across_variants() {
        assert_eq!(Number::Int(4), Number::Float(4.0));
        assert_eq!(
            Number::Int(4),
            Number::Decimal(FixedDecimal::parse("4", 2).unwrap())
        );
        assert_ne!(Number::Int(4), Number::Float(4.5));
    }

    #[test]
    fn test_native_add_keeps_integers() {
        let sum = Number::Int(2).native_add(&Number::Int(3));
        assert!(matches!(sum, Number::Int(5)));

        let sum = Number::Int(2).native_add(&Number::Float(0.5));
        assert!(matches!(sum, Number::Float(f) if f == 2.5));
    }

    #[test]
    fn test_native_add_overflow_falls_back_to_float() {
        let sum = Number::Int(i64::MAX).native_add(&Number::Int(1));
        assert!(matches!(sum, Number::Float(_)));
    }

    #[test]
    fn test_ordering() {
        assert!(Number::Int(1) < Number::Float(1.5));
        assert!(Number::Decimal(FixedDecimal::parse("2.01", 2).unwrap()) > Number::Int(2));
    }
}
