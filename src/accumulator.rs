//! Leveled accumulators.
//!
//! An accumulator keeps one partial value per level (`0..=max_level`).
//! Contributions land in the bucket of the level currently processed; when a
//! group closes, the report calls `cumulate_to_next_level(level)`, which folds
//! that bucket into `level - 1` and resets it to the identity value.
//!
//! Queries are running totals: `sum(level)` reduces every bucket from `level`
//! down to `max_level`, so it is valid at any time, not only after a close.
//!
//! Three tiers exist, each in native (`Int`/`Float`) or decimal arithmetic:
//!
//! - [`MinimalAccumulator`]: sum only
//! - [`StandardAccumulator`]: sum, count, not-null/not-zero counters, averages
//! - [`ExtendedAccumulator`]: everything above plus min/max

use crate::decimal::FixedDecimal;
use crate::error::{ReportError, Result};
use crate::level::LevelResolver;
use crate::number::Number;
use serde::{Deserialize, Serialize};
use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

/// What an accumulator tracks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    Minimal,
    #[default]
    Standard,
    Extended,
}

/// How values are combined.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Arithmetic {
    /// Integer arithmetic while possible, `f64` otherwise.
    #[default]
    Native,
    /// Fixed-point arithmetic truncating to the given scale.
    Decimal(u32),
}

impl Arithmetic {
    /// The identity value of a bucket.
    pub fn zero(self) -> Number {
        match self {
            Arithmetic::Native => Number::Int(0),
            Arithmetic::Decimal(scale) => Number::Decimal(FixedDecimal::zero(scale)),
        }
    }

    /// Brings an incoming value into this arithmetic.
    pub fn coerce(self, value: Number) -> Number {
        match self {
            Arithmetic::Native => value,
            Arithmetic::Decimal(scale) => Number::Decimal(value.to_fixed(scale)),
        }
    }

    pub fn add(self, a: &Number, b: &Number) -> Number {
        match self {
            Arithmetic::Native => a.native_add(b),
            Arithmetic::Decimal(scale) => Number::Decimal(a.to_fixed(scale) + b.to_fixed(scale)),
        }
    }

    pub fn sub(self, a: &Number, b: &Number) -> Number {
        self.add(a, &b.negate())
    }

    /// `value / divisor`, or `None` when the divisor is zero.
    pub fn div(self, value: &Number, divisor: u64) -> Option<Number> {
        if divisor == 0 {
            return None;
        }
        match (self, value) {
            (Arithmetic::Decimal(scale), _) => value.to_fixed(scale).div_count(divisor).map(Number::Decimal),
            (Arithmetic::Native, Number::Decimal(d)) => d.div_count(divisor).map(Number::Decimal),
            (Arithmetic::Native, _) => Some(Number::Float(value.as_f64() / divisor as f64)),
        }
    }

    pub fn sum<'a>(self, values: impl IntoIterator<Item = &'a Number>) -> Number {
        values
            .into_iter()
            .fold(self.zero(), |acc, value| self.add(&acc, value))
    }
}

/// Accumulator handle shared between the report's collectors and any
/// filtered views over them.
pub type SharedAccumulator = Rc<RefCell<dyn Accumulator>>;

/// Common contract of every tier.
///
/// Query methods take an optional level; `None` means the level the report is
/// currently processing. Counter and min/max queries default to an
/// `UnsupportedAggregate` error so lower tiers reject them.
pub trait Accumulator: fmt::Debug {
    fn tier(&self) -> Tier;

    fn arithmetic(&self) -> Arithmetic;

    fn max_level(&self) -> usize;

    /// Adds a value at the current level. `None` is ignored entirely.
    fn add(&mut self, value: Option<Number>);

    /// Behaves exactly as `add` of the negated value.
    fn sub(&mut self, value: Option<Number>) {
        self.add(value.map(|v| v.negate()));
    }

    /// Folds `level` into `level - 1` and resets `level` to identity.
    /// A no-op for level 0 and for levels beyond `max_level`.
    fn cumulate_to_next_level(&mut self, level: usize) {
        let arithmetic = self.arithmetic();
        self.cumulate_with(level, arithmetic);
    }

    /// Same roll-up, but the rolled sum is added into `level - 1` with
    /// `arithmetic` instead of the accumulator's own.
    fn cumulate_with(&mut self, level: usize, arithmetic: Arithmetic);

    /// Running total from `level` through `max_level`.
    fn sum(&self, level: Option<usize>) -> Number;

    fn count(&self, _level: Option<usize>) -> Result<u64> {
        Err(self.unsupported("count"))
    }

    fn count_not_null(&self, _level: Option<usize>) -> Result<u64> {
        Err(self.unsupported("countNotNull"))
    }

    fn count_not_zero(&self, _level: Option<usize>) -> Result<u64> {
        Err(self.unsupported("countNotZero"))
    }

    fn avg(&self, level: Option<usize>) -> Result<Option<Number>> {
        let divisor = self.count(level)?;
        Ok(self.arithmetic().div(&self.sum(level), divisor))
    }

    fn avg_not_null(&self, level: Option<usize>) -> Result<Option<Number>> {
        let divisor = self.count_not_null(level)?;
        Ok(self.arithmetic().div(&self.sum(level), divisor))
    }

    fn avg_not_zero(&self, level: Option<usize>) -> Result<Option<Number>> {
        let divisor = self.count_not_zero(level)?;
        Ok(self.arithmetic().div(&self.sum(level), divisor))
    }

    fn min(&self, _level: Option<usize>) -> Result<Option<Number>> {
        Err(self.unsupported("min"))
    }

    fn max(&self, _level: Option<usize>) -> Result<Option<Number>> {
        Err(self.unsupported("max"))
    }

    fn unsupported(&self, aggregate: &'static str) -> ReportError {
        ReportError::UnsupportedAggregate {
            aggregate,
            tier: self.tier(),
        }
    }
}

/// Creates an accumulator of the given tier, sized by the resolver's current
/// `max_level`.
pub fn build(tier: Tier, arithmetic: Arithmetic, resolver: &Rc<LevelResolver>) -> SharedAccumulator {
    let max_level = resolver.max_level();
    let resolver = Rc::clone(resolver);
    match tier {
        Tier::Minimal => Rc::new(RefCell::new(MinimalAccumulator::new(resolver, max_level, arithmetic))),
        Tier::Standard => Rc::new(RefCell::new(StandardAccumulator::new(resolver, max_level, arithmetic))),
        Tier::Extended => Rc::new(RefCell::new(ExtendedAccumulator::new(resolver, max_level, arithmetic))),
    }
}

/// Sum-only accumulator.
#[derive(Debug)]
pub struct MinimalAccumulator {
    resolver: Rc<LevelResolver>,
    arithmetic: Arithmetic,
    max_level: usize,
    sums: Vec<Number>,
}

impl MinimalAccumulator {
    pub fn new(resolver: Rc<LevelResolver>, max_level: usize, arithmetic: Arithmetic) -> Self {
        MinimalAccumulator {
            resolver,
            arithmetic,
            max_level,
            sums: vec![arithmetic.zero(); max_level + 1],
        }
    }

    /// Bucket for the current level; the detail pseudo-level shares `max_level`.
    fn bucket(&self) -> usize {
        self.resolver.current().min(self.max_level)
    }

    /// First bucket a query starting at `level` covers.
    fn from_level(&self, level: Option<usize>) -> usize {
        level.unwrap_or_else(|| self.resolver.current())
    }
}

impl Accumulator for MinimalAccumulator {
    fn tier(&self) -> Tier {
        Tier::Minimal
    }

    fn arithmetic(&self) -> Arithmetic {
        self.arithmetic
    }

    fn max_level(&self) -> usize {
        self.max_level
    }

    fn add(&mut self, value: Option<Number>) {
        let Some(value) = value else {
            return;
        };
        let bucket = self.bucket();
        let value = self.arithmetic.coerce(value);
        self.sums[bucket] = self.arithmetic.add(&self.sums[bucket], &value);
    }

    fn cumulate_with(&mut self, level: usize, arithmetic: Arithmetic) {
        if level == 0 || level > self.max_level {
            return;
        }
        let rolled = std::mem::replace(&mut self.sums[level], self.arithmetic.zero());
        self.sums[level - 1] = arithmetic.add(&self.sums[level - 1], &rolled);
    }

    fn sum(&self, level: Option<usize>) -> Number {
        let from = self.from_level(level);
        self.arithmetic.sum(self.sums.iter().skip(from))
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct Counters {
    all: u64,
    not_null: u64,
    not_zero: u64,
}

impl Counters {
    fn absorb(&mut self, other: Counters) {
        self.all += other.all;
        self.not_null += other.not_null;
        self.not_zero += other.not_zero;
    }
}

/// Sum plus contribution counters and averages.
///
/// Null contributions are ignored, so `count` and `count_not_null` agree;
/// `count_not_zero` additionally skips zeros.
#[derive(Debug)]
pub struct StandardAccumulator {
    base: MinimalAccumulator,
    counters: Vec<Counters>,
}

impl StandardAccumulator {
    pub fn new(resolver: Rc<LevelResolver>, max_level: usize, arithmetic: Arithmetic) -> Self {
        StandardAccumulator {
            base: MinimalAccumulator::new(resolver, max_level, arithmetic),
            counters: vec![Counters::default(); max_level + 1],
        }
    }

    fn total(&self, level: Option<usize>) -> Counters {
        let from = self.base.from_level(level);
        self.counters
            .iter()
            .skip(from)
            .fold(Counters::default(), |mut acc, c| {
                acc.absorb(*c);
                acc
            })
    }
}

impl Accumulator for StandardAccumulator {
    fn tier(&self) -> Tier {
        Tier::Standard
    }

    fn arithmetic(&self) -> Arithmetic {
        self.base.arithmetic
    }

    fn max_level(&self) -> usize {
        self.base.max_level
    }

    fn add(&mut self, value: Option<Number>) {
        let Some(value) = value else {
            return;
        };
        let counters = &mut self.counters[self.base.bucket()];
        counters.all += 1;
        counters.not_null += 1;
        if !value.is_zero() {
            counters.not_zero += 1;
        }
        self.base.add(Some(value));
    }

    fn cumulate_with(&mut self, level: usize, arithmetic: Arithmetic) {
        if level == 0 || level > self.base.max_level {
            return;
        }
        let rolled = std::mem::take(&mut self.counters[level]);
        self.counters[level - 1].absorb(rolled);
        self.base.cumulate_with(level, arithmetic);
    }

    fn sum(&self, level: Option<usize>) -> Number {
        self.base.sum(level)
    }

    fn count(&self, level: Option<usize>) -> Result<u64> {
        Ok(self.total(level).all)
    }

    fn count_not_null(&self, level: Option<usize>) -> Result<u64> {
        Ok(self.total(level).not_null)
    }

    fn count_not_zero(&self, level: Option<usize>) -> Result<u64> {
        Ok(self.total(level).not_zero)
    }
}

/// Standard tier plus per-level min/max.
#[derive(Debug)]
pub struct ExtendedAccumulator {
    base: StandardAccumulator,
    mins: Vec<Option<Number>>,
    maxs: Vec<Option<Number>>,
}

impl ExtendedAccumulator {
    pub fn new(resolver: Rc<LevelResolver>, max_level: usize, arithmetic: Arithmetic) -> Self {
        ExtendedAccumulator {
            base: StandardAccumulator::new(resolver, max_level, arithmetic),
            mins: vec![None; max_level + 1],
            maxs: vec![None; max_level + 1],
        }
    }

    fn extreme(
        values: &[Option<Number>],
        from: usize,
        better: impl Fn(&Number, &Number) -> bool,
    ) -> Option<Number> {
        values
            .iter()
            .skip(from)
            .flatten()
            .fold(None, |best: Option<Number>, v| match best {
                Some(b) if !better(v, &b) => Some(b),
                _ => Some(*v),
            })
    }
}

impl Accumulator for ExtendedAccumulator {
    fn tier(&self) -> Tier {
        Tier::Extended
    }

    fn arithmetic(&self) -> Arithmetic {
        self.base.arithmetic()
    }

    fn max_level(&self) -> usize {
        self.base.max_level()
    }

    fn add(&mut self, value: Option<Number>) {
        let Some(value) = value else {
            return;
        };
        let value = self.arithmetic().coerce(value);
        let bucket = self.base.base.bucket();
        match (self.mins[bucket], self.maxs[bucket]) {
            (None, None) => {
                self.mins[bucket] = Some(value);
                self.maxs[bucket] = Some(value);
            }
            // a new maximum is never also tested as a minimum
            (_, Some(max)) if value > max => self.maxs[bucket] = Some(value),
            (Some(min), _) if value < min => self.mins[bucket] = Some(value),
            _ => {}
        }
        self.base.add(Some(value));
    }

    fn cumulate_with(&mut self, level: usize, arithmetic: Arithmetic) {
        if level == 0 || level > self.max_level() {
            return;
        }
        if let Some(rolled) = self.mins[level].take() {
            let next = &mut self.mins[level - 1];
            if next.map_or(true, |n| rolled < n) {
                *next = Some(rolled);
            }
        }
        if let Some(rolled) = self.maxs[level].take() {
            let next = &mut self.maxs[level - 1];
            if next.map_or(true, |n| rolled > n) {
                *next = Some(rolled);
            }
        }
        self.base.cumulate_with(level, arithmetic);
    }

    fn sum(&self, level: Option<usize>) -> Number {
        self.base.sum(level)
    }

    fn count(&self, level: Option<usize>) -> Result<u64> {
        self.base.count(level)
    }

    fn count_not_null(&self, level: Option<usize>) -> Result<u64> {
        self.base.count_not_null(level)
    }

    fn count_not_zero(&self, level: Option<usize>) -> Result<u64> {
        self.base.count_not_zero(level)
    }

    fn min(&self, level: Option<usize>) -> Result<Option<Number>> {
        let from = self.base.base.from_level(level);
        Ok(Self::extreme(&self.mins, from, |a, b| a < b))
    }

    fn max(&self, level: Option<usize>) -> Result<Option<Number>> {
        let from = self.base.base.from_level(level);
        Ok(Self::extreme(&self.maxs, from, |a, b| a > b))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resolver(max_level: usize) -> Rc<LevelResolver> {
        let resolver = Rc::new(LevelResolver::new());
        resolver.set_max_level(max_level);
        resolver.set_current(max_level);
        resolver
    }

    fn n(value: i64) -> Option<Number> {
        Some(Number::Int(value))
    }

    #[test]
    fn test_sum_is_running_total() {
        let r = resolver(2);
        let mut acc = MinimalAccumulator::new(Rc::clone(&r), 2, Arithmetic::Native);
        acc.add(n(3));
        acc.add(n(4));
        assert_eq!(acc.sum(Some(2)), Number::Int(7));
        assert_eq!(acc.sum(Some(0)), Number::Int(7));

        acc.cumulate_to_next_level(2);
        assert_eq!(acc.sum(Some(2)), Number::Int(0));
        assert_eq!(acc.sum(Some(1)), Number::Int(7));

        acc.add(n(1));
        assert_eq!(acc.sum(Some(2)), Number::Int(1));
        assert_eq!(acc.sum(Some(1)), Number::Int(8));
    }

    #[test]
    fn test_add_lands_in_current_level_bucket() {
        let r = resolver(2);
        let mut acc = MinimalAccumulator::new(Rc::clone(&r), 2, Arithmetic::Native);
        r.set_current(1);
        acc.add(n(5));
        r.set_current(2);
        acc.add(n(2));
        assert_eq!(acc.sum(Some(2)), Number::Int(2));
        assert_eq!(acc.sum(Some(1)), Number::Int(7));
        // no level: current
        assert_eq!(acc.sum(None), Number::Int(2));
    }

    #[test]
    fn test_detail_level_uses_max_bucket() {
        let r = resolver(1);
        let mut acc = MinimalAccumulator::new(Rc::clone(&r), 1, Arithmetic::Native);
        r.set_current(5);
        acc.add(n(9));
        assert_eq!(acc.sum(Some(1)), Number::Int(9));
    }

    #[test]
    fn test_cumulate_beyond_max_level_is_noop() {
        let r = resolver(1);
        let mut acc = StandardAccumulator::new(Rc::clone(&r), 1, Arithmetic::Native);
        acc.add(n(4));
        acc.cumulate_to_next_level(2);
        acc.cumulate_to_next_level(99);
        assert_eq!(acc.sum(Some(1)), Number::Int(4));
        assert_eq!(acc.count(Some(1)).unwrap(), 1);
    }

    #[test]
    fn test_second_cumulate_is_noop() {
        let r = resolver(2);
        let mut once = StandardAccumulator::new(Rc::clone(&r), 2, Arithmetic::Native);
        let mut twice = StandardAccumulator::new(Rc::clone(&r), 2, Arithmetic::Native);
        for acc in [&mut once, &mut twice] {
            acc.add(n(2));
            acc.add(n(5));
        }
        once.cumulate_to_next_level(2);
        twice.cumulate_to_next_level(2);
        twice.cumulate_to_next_level(2);

        assert_eq!(once.sum(Some(1)), twice.sum(Some(1)));
        assert_eq!(once.count(Some(1)).unwrap(), twice.count(Some(1)).unwrap());
    }

    #[test]
    fn test_null_and_zero_counters() {
        let r = resolver(1);
        let mut acc = StandardAccumulator::new(Rc::clone(&r), 1, Arithmetic::Native);
        acc.add(None);
        acc.add(n(0));
        acc.add(n(6));

        assert_eq!(acc.count(Some(0)).unwrap(), 2);
        assert_eq!(acc.count_not_null(Some(0)).unwrap(), 2);
        assert_eq!(acc.count_not_zero(Some(0)).unwrap(), 1);
        assert_eq!(acc.sum(Some(0)), Number::Int(6));
        assert_eq!(acc.avg(Some(0)).unwrap(), Some(Number::Float(3.0)));
        assert_eq!(acc.avg_not_zero(Some(0)).unwrap(), Some(Number::Int(6)));
    }

    #[test]
    fn test_avg_is_none_without_contributions() {
        let r = resolver(1);
        let mut acc = StandardAccumulator::new(Rc::clone(&r), 1, Arithmetic::Native);
        assert_eq!(acc.avg(Some(0)).unwrap(), None);

        acc.add(None);
        acc.add(n(0));
        assert_eq!(acc.avg_not_zero(Some(0)).unwrap(), None);
        assert_eq!(acc.avg_not_null(Some(0)).unwrap(), Some(Number::Int(0)));
    }

    #[test]
    fn test_minimal_rejects_counters() {
        let r = resolver(1);
        let acc = MinimalAccumulator::new(Rc::clone(&r), 1, Arithmetic::Native);
        assert!(matches!(
            acc.count(None),
            Err(ReportError::UnsupportedAggregate { tier: Tier::Minimal, .. })
        ));
        assert!(acc.avg(None).is_err());
        assert!(acc.min(None).is_err());
    }

    #[test]
    fn test_sub_negates() {
        let r = resolver(1);
        let mut acc = StandardAccumulator::new(Rc::clone(&r), 1, Arithmetic::Native);
        acc.add(n(10));
        acc.sub(n(4));
        acc.sub(None);
        assert_eq!(acc.sum(Some(0)), Number::Int(6));
        assert_eq!(acc.count(Some(0)).unwrap(), 2);
    }

    #[test]
    fn test_decimal_sum_truncates() {
        let r = resolver(1);
        let mut acc = StandardAccumulator::new(Rc::clone(&r), 1, Arithmetic::Decimal(2));
        acc.add(n(1));
        acc.add(Some(Number::Float(20.0 / 3.0)));
        acc.add(n(0));

        assert_eq!(acc.sum(Some(0)).to_string(), "7.66");
        assert_eq!(acc.count_not_zero(Some(0)).unwrap(), 2);
    }

    #[test]
    fn test_decimal_sum_never_renders_negative_zero() {
        let r = resolver(1);
        let mut acc = ExtendedAccumulator::new(Rc::clone(&r), 1, Arithmetic::Decimal(2));
        acc.add(Some(Number::Decimal(FixedDecimal::parse("0.00", 2).unwrap())));
        acc.add(Some(Number::Decimal(FixedDecimal::parse("-0.001", 3).unwrap())));
        acc.sub(Some(Number::Decimal(FixedDecimal::parse("0.00", 2).unwrap())));

        assert_eq!(acc.sum(Some(1)).to_string(), "0.00");
        assert_eq!(acc.min(Some(1)).unwrap().unwrap().to_string(), "0.00");
        assert_eq!(acc.avg(Some(1)).unwrap().unwrap().to_string(), "0.00");
    }

    #[test]
    fn test_cumulate_with_rescales_rolled_sum() {
        let r = resolver(1);
        let mut acc = StandardAccumulator::new(Rc::clone(&r), 1, Arithmetic::Native);
        acc.add(Some(Number::Float(0.1)));
        acc.add(Some(Number::Float(0.2)));
        acc.cumulate_with(1, Arithmetic::Decimal(2));

        assert_eq!(acc.sum(Some(0)).to_string(), "0.30");
        assert_eq!(acc.sum(Some(1)), Number::Int(0));
        assert_eq!(acc.count(Some(0)).unwrap(), 2);
    }

    #[test]
    fn test_decimal_identity_is_padded_zero() {
        let r = resolver(2);
        let acc = MinimalAccumulator::new(Rc::clone(&r), 2, Arithmetic::Decimal(3));
        assert_eq!(acc.sum(Some(0)).to_string(), "0.000");
    }

    #[test]
    fn test_decimal_avg_truncates() {
        let r = resolver(1);
        let mut acc = StandardAccumulator::new(Rc::clone(&r), 1, Arithmetic::Decimal(2));
        acc.add(n(10));
        acc.add(n(0));
        acc.add(n(0));
        assert_eq!(acc.avg(Some(0)).unwrap().unwrap().to_string(), "3.33");
    }

    #[test]
    fn test_min_max_rollup_is_order_independent() {
        let r = resolver(2);
        let mut forward = ExtendedAccumulator::new(Rc::clone(&r), 2, Arithmetic::Native);
        let mut backward = ExtendedAccumulator::new(Rc::clone(&r), 2, Arithmetic::Native);

        for v in [5, 3] {
            forward.add(n(v));
        }
        forward.cumulate_to_next_level(2);
        for v in [1, 2] {
            forward.add(n(v));
        }
        forward.cumulate_to_next_level(2);

        for v in [1, 2] {
            backward.add(n(v));
        }
        backward.cumulate_to_next_level(2);
        for v in [5, 3] {
            backward.add(n(v));
        }
        backward.cumulate_to_next_level(2);

        for acc in [&forward, &backward] {
            assert_eq!(acc.min(Some(1)).unwrap(), Some(Number::Int(1)));
            assert_eq!(acc.max(Some(1)).unwrap(), Some(Number::Int(5)));
            assert_eq!(acc.min(Some(2)).unwrap(), None);
            assert_eq!(acc.max(Some(2)).unwrap(), None);
        }
    }

    #[test]
    fn test_min_max_running_across_levels() {
        let r = resolver(2);
        let mut acc = ExtendedAccumulator::new(Rc::clone(&r), 2, Arithmetic::Native);
        acc.add(n(4));
        acc.cumulate_to_next_level(2);
        acc.add(n(7));
        acc.add(None);

        assert_eq!(acc.max(Some(2)).unwrap(), Some(Number::Int(7)));
        assert_eq!(acc.min(Some(2)).unwrap(), Some(Number::Int(7)));
        assert_eq!(acc.min(Some(1)).unwrap(), Some(Number::Int(4)));
        assert_eq!(acc.max(Some(1)).unwrap(), Some(Number::Int(7)));
    }

    #[test]
    fn test_min_max_ties_keep_existing() {
        let r = resolver(1);
        let mut acc = ExtendedAccumulator::new(Rc::clone(&r), 1, Arithmetic::Decimal(2));
        acc.add(Some(Number::Int(3)));
        acc.add(Some(Number::Float(3.0)));
        acc.cumulate_to_next_level(1);
        let min = acc.min(Some(0)).unwrap().unwrap();
        assert_eq!(min.to_string(), "3.00");
    }

    #[test]
    fn test_build_picks_tier() {
        let r = resolver(1);
        let acc = build(Tier::Extended, Arithmetic::Native, &r);
        assert_eq!(acc.borrow().tier(), Tier::Extended);
        assert_eq!(acc.borrow().max_level(), 1);
    }
}
