//! Recursive aggregate containers.
//!
//! A [`Collector`] is an insertion-ordered map from [`Key`] to either an
//! accumulator or another collector. Items are reference counted: every
//! filtering operation (`range`, `between`, `filter`, `cmd`) builds a new
//! collector over the *same* items, so a view keeps seeing the live totals.

use crate::accumulator::{Accumulator, Arithmetic, SharedAccumulator};
use crate::error::{ReportError, Result};
use crate::number::Number;
use crate::sheet::SheetTemplate;
use crate::value::Key;
use indexmap::IndexMap;
use log::trace;
use std::cell::RefCell;
use std::cmp::Ordering;
use std::collections::BTreeSet;
use std::rc::Rc;

pub type SharedCollector = Rc<RefCell<Collector>>;

#[derive(Debug, Clone)]
pub enum Item {
    Accumulator(SharedAccumulator),
    Collector(SharedCollector),
}

impl Item {
    pub fn accumulator(&self) -> Option<&SharedAccumulator> {
        match self {
            Item::Accumulator(acc) => Some(acc),
            Item::Collector(_) => None,
        }
    }

    pub fn collector(&self) -> Option<&SharedCollector> {
        match self {
            Item::Collector(c) => Some(c),
            Item::Accumulator(_) => None,
        }
    }

    fn roll_up(&self, level: usize, scaled: Option<Arithmetic>) {
        match (self, scaled) {
            (Item::Accumulator(acc), Some(arithmetic)) => {
                acc.borrow_mut().cumulate_with(level, arithmetic)
            }
            (Item::Accumulator(acc), None) => acc.borrow_mut().cumulate_to_next_level(level),
            (Item::Collector(c), _) => c.borrow().roll_up(level, scaled),
        }
    }
}

/// A value routed into a collector by `add_values`.
#[derive(Debug, Clone, PartialEq)]
pub enum Contribution {
    Scalar(Option<Number>),
    Nested(IndexMap<Key, Contribution>),
}

impl From<Option<Number>> for Contribution {
    fn from(value: Option<Number>) -> Self {
        Contribution::Scalar(value)
    }
}

impl From<Number> for Contribution {
    fn from(value: Number) -> Self {
        Contribution::Scalar(Some(value))
    }
}

/// The aggregate queries a collector answers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Query {
    Sum,
    Count,
    CountNotNull,
    CountNotZero,
    Avg,
    AvgNotNull,
    AvgNotZero,
    Min,
    Max,
}

/// Result of a depth-bounded query.
#[derive(Debug, Clone, PartialEq)]
pub enum Aggregate {
    Scalar(Option<Number>),
    Nested(IndexMap<Key, Aggregate>),
}

impl Aggregate {
    /// The scalar value, if this is not an expanded mapping.
    pub fn scalar(&self) -> Option<Number> {
        match self {
            Aggregate::Scalar(v) => *v,
            Aggregate::Nested(_) => None,
        }
    }

    pub fn get(&self, key: impl Into<Key>) -> Option<&Aggregate> {
        match self {
            Aggregate::Nested(items) => items.get(&key.into()),
            Aggregate::Scalar(_) => None,
        }
    }

    pub fn keys(&self) -> Vec<Key> {
        match self {
            Aggregate::Nested(items) => items.keys().cloned().collect(),
            Aggregate::Scalar(_) => Vec::new(),
        }
    }
}

/// Selector accepted by [`Collector::range`].
#[derive(Debug, Clone, PartialEq)]
pub enum RangeBound {
    /// A single key or alias.
    Key(Key),
    /// Every item positioned between the two keys, inclusive.
    Span(Key, Key),
}

impl From<Key> for RangeBound {
    fn from(key: Key) -> Self {
        RangeBound::Key(key)
    }
}

impl From<i32> for RangeBound {
    fn from(key: i32) -> Self {
        RangeBound::Key(Key::from(key))
    }
}

impl From<i64> for RangeBound {
    fn from(key: i64) -> Self {
        RangeBound::Key(Key::from(key))
    }
}

impl From<&str> for RangeBound {
    fn from(key: &str) -> Self {
        RangeBound::Key(Key::from(key))
    }
}

/// Reordering/slicing operations for [`Collector::cmd`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CollectorOp {
    Reverse,
    Slice { offset: usize, length: Option<usize> },
    /// Ascending by key; integer keys sort before names.
    SortKeys,
    SortKeysDesc,
}

#[derive(Debug, Clone, Default)]
pub struct Collector {
    name: String,
    items: IndexMap<Key, Item>,
    aliases: IndexMap<Key, Key>,
    scale: Option<u32>,
    sheet: Option<SheetTemplate>,
}

impl Collector {
    pub fn new(name: impl Into<String>) -> Self {
        Collector {
            name: name.into(),
            ..Default::default()
        }
    }

    /// Sums and averages of this collector reduce with scaled decimal addition.
    pub fn with_scale(mut self, scale: u32) -> Self {
        self.scale = Some(scale);
        self
    }

    pub(crate) fn with_sheet(mut self, template: SheetTemplate) -> Self {
        self.sheet = Some(template);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn scale(&self) -> Option<u32> {
        self.scale
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn keys(&self) -> Vec<Key> {
        self.items.keys().cloned().collect()
    }

    pub fn items(&self) -> impl Iterator<Item = (&Key, &Item)> {
        self.items.iter()
    }

    pub fn into_shared(self) -> SharedCollector {
        Rc::new(RefCell::new(self))
    }

    fn arithmetic(&self) -> Arithmetic {
        self.scale.map_or(Arithmetic::Native, Arithmetic::Decimal)
    }

    pub fn add_item(&mut self, key: impl Into<Key>, item: Item) -> Result<()> {
        let key = key.into();
        if self.items.contains_key(&key) || self.aliases.contains_key(&key) {
            return Err(ReportError::DuplicateKey {
                key: key.to_string(),
            });
        }
        self.items.insert(key, item);
        Ok(())
    }

    pub fn add_accumulator(&mut self, key: impl Into<Key>, acc: SharedAccumulator) -> Result<()> {
        self.add_item(key, Item::Accumulator(acc))
    }

    pub fn add_collector(&mut self, key: impl Into<Key>, collector: Collector) -> Result<()> {
        self.add_item(key, Item::Collector(collector.into_shared()))
    }

    /// Adds an alternative name for an existing item. Each item has at most
    /// one alias and aliases never shadow real keys.
    pub fn set_alias(&mut self, alias: impl Into<Key>, target: impl Into<Key>) -> Result<()> {
        let (alias, target) = (alias.into(), target.into());
        if !self.items.contains_key(&target) {
            return Err(ReportError::UnknownKey {
                key: target.to_string(),
            });
        }
        if self.items.contains_key(&alias)
            || self.aliases.contains_key(&alias)
            || self.aliases.values().any(|t| *t == target)
        {
            return Err(ReportError::AliasCollision {
                alias: alias.to_string(),
            });
        }
        self.aliases.insert(alias, target);
        Ok(())
    }

    /// Real key for a key or alias.
    fn resolve_key(&self, key: &Key) -> Option<Key> {
        if self.items.contains_key(key) {
            return Some(key.clone());
        }
        self.aliases.get(key).cloned()
    }

    fn position(&self, key: &Key) -> Result<usize> {
        self.resolve_key(key)
            .and_then(|k| self.items.get_index_of(&k))
            .ok_or_else(|| ReportError::UnknownKey {
                key: key.to_string(),
            })
    }

    pub fn get(&self, key: impl Into<Key>) -> Result<Item> {
        let key = key.into();
        let position = self.position(&key)?;
        Ok(self.items[position].clone())
    }

    /// Routes each contribution to the item with that key (or alias).
    ///
    /// Sheets create an accumulator for a key seen for the first time; any
    /// other collector treats an unknown key as a lookup error.
    pub fn add_values<I>(&mut self, values: I) -> Result<()>
    where
        I: IntoIterator<Item = (Key, Contribution)>,
    {
        for (key, contribution) in values {
            let item = match (self.resolve_key(&key), &self.sheet) {
                (Some(real), _) => self.items[&real].clone(),
                (None, Some(template)) => {
                    trace!("Sheet '{}' opens column '{}'", self.name, key);
                    let item = Item::Accumulator(template.build());
                    self.items.insert(key.clone(), item.clone());
                    item
                }
                (None, None) => {
                    return Err(ReportError::UnknownKey {
                        key: key.to_string(),
                    })
                }
            };
            match (item, contribution) {
                (Item::Accumulator(acc), Contribution::Scalar(value)) => {
                    acc.borrow_mut().add(value)
                }
                (Item::Collector(c), Contribution::Nested(values)) => {
                    c.borrow_mut().add_values(values)?
                }
                (Item::Collector(c), Contribution::Scalar(value)) => {
                    return Err(ReportError::ShapeMismatch {
                        key: key.to_string(),
                        detail: format!(
                            "collector '{}' cannot take scalar {:?}",
                            c.borrow().name,
                            value
                        ),
                    });
                }
                (Item::Accumulator(_), Contribution::Nested(_)) => {
                    return Err(ReportError::ShapeMismatch {
                        key: key.to_string(),
                        detail: "accumulator cannot take nested values".to_string(),
                    })
                }
            }
        }
        Ok(())
    }

    /// Adds one scalar value to the item with `key`.
    pub fn add_value(&mut self, key: impl Into<Key>, value: Option<Number>) -> Result<()> {
        self.add_values([(key.into(), Contribution::Scalar(value))])
    }

    /// Rolls `level` into `level - 1` on every item, recursively.
    ///
    /// Under a scaled collector (or a scaled ancestor) the rolled sums are
    /// added into the parent bucket with decimal arithmetic at that scale.
    pub fn cumulate_to_next_level(&self, level: usize) {
        self.roll_up(level, None);
    }

    fn roll_up(&self, level: usize, inherited: Option<Arithmetic>) {
        let scaled = self.scale.map(Arithmetic::Decimal).or(inherited);
        for item in self.items.values() {
            item.roll_up(level, scaled);
        }
    }

    /// Every accumulator reachable from this collector, in order.
    pub fn leaves(&self) -> Vec<SharedAccumulator> {
        let mut leaves = Vec::new();
        for item in self.items.values() {
            match item {
                Item::Accumulator(acc) => leaves.push(Rc::clone(acc)),
                Item::Collector(c) => leaves.extend(c.borrow().leaves()),
            }
        }
        leaves
    }

    /// Runs a query.
    ///
    /// With `depth == 0` the result is one scalar reduced over all leaves.
    /// With `depth > 0` it maps every item key to the item's own scalar
    /// (accumulators) or to the same query at `depth - 1` (collectors).
    pub fn query(&self, query: Query, level: Option<usize>, depth: usize) -> Result<Aggregate> {
        if depth == 0 {
            return Ok(Aggregate::Scalar(self.reduce(query, level, &self.leaves())?));
        }
        let mut expanded = IndexMap::with_capacity(self.items.len());
        for (key, item) in &self.items {
            let value = match item {
                Item::Accumulator(acc) => {
                    let scaled = self.scale.map(Arithmetic::Decimal);
                    Aggregate::Scalar(leaf_scalar(query, &*acc.borrow(), level, scaled)?)
                }
                Item::Collector(c) => c.borrow().query(query, level, depth - 1)?,
            };
            expanded.insert(key.clone(), value);
        }
        Ok(Aggregate::Nested(expanded))
    }

    fn reduce(
        &self,
        query: Query,
        level: Option<usize>,
        leaves: &[SharedAccumulator],
    ) -> Result<Option<Number>> {
        let arithmetic = self.arithmetic();
        let sum = || {
            let sums: Vec<Number> = leaves.iter().map(|a| a.borrow().sum(level)).collect();
            arithmetic.sum(&sums)
        };
        let total = |counter: fn(&dyn Accumulator, Option<usize>) -> Result<u64>| {
            leaves
                .iter()
                .map(|a| counter(&*a.borrow(), level))
                .sum::<Result<u64>>()
        };
        let extreme = |pick: fn(&dyn Accumulator, Option<usize>) -> Result<Option<Number>>,
                       wanted: Ordering|
         -> Result<Option<Number>> {
            let mut best: Option<Number> = None;
            for leaf in leaves {
                if let Some(v) = pick(&*leaf.borrow(), level)? {
                    if best.map_or(true, |b| v.partial_cmp(&b) == Some(wanted)) {
                        best = Some(v);
                    }
                }
            }
            Ok(best)
        };

        Ok(match query {
            Query::Sum => Some(sum()),
            Query::Count => Some(total(|a, l| a.count(l))?.into()),
            Query::CountNotNull => Some(total(|a, l| a.count_not_null(l))?.into()),
            Query::CountNotZero => Some(total(|a, l| a.count_not_zero(l))?.into()),
            Query::Avg => arithmetic.div(&sum(), total(|a, l| a.count(l))?),
            Query::AvgNotNull => arithmetic.div(&sum(), total(|a, l| a.count_not_null(l))?),
            Query::AvgNotZero => arithmetic.div(&sum(), total(|a, l| a.count_not_zero(l))?),
            Query::Min => extreme(|a, l| a.min(l), Ordering::Less)?,
            Query::Max => extreme(|a, l| a.max(l), Ordering::Greater)?,
        })
    }

    pub fn sum(&self, level: Option<usize>, depth: usize) -> Result<Aggregate> {
        self.query(Query::Sum, level, depth)
    }

    pub fn count(&self, level: Option<usize>, depth: usize) -> Result<Aggregate> {
        self.query(Query::Count, level, depth)
    }

    pub fn count_not_null(&self, level: Option<usize>, depth: usize) -> Result<Aggregate> {
        self.query(Query::CountNotNull, level, depth)
    }

    pub fn count_not_zero(&self, level: Option<usize>, depth: usize) -> Result<Aggregate> {
        self.query(Query::CountNotZero, level, depth)
    }

    pub fn avg(&self, level: Option<usize>, depth: usize) -> Result<Aggregate> {
        self.query(Query::Avg, level, depth)
    }

    pub fn avg_not_null(&self, level: Option<usize>, depth: usize) -> Result<Aggregate> {
        self.query(Query::AvgNotNull, level, depth)
    }

    pub fn avg_not_zero(&self, level: Option<usize>, depth: usize) -> Result<Aggregate> {
        self.query(Query::AvgNotZero, level, depth)
    }

    pub fn min(&self, level: Option<usize>, depth: usize) -> Result<Aggregate> {
        self.query(Query::Min, level, depth)
    }

    pub fn max(&self, level: Option<usize>, depth: usize) -> Result<Aggregate> {
        self.query(Query::Max, level, depth)
    }

    /// New collector over the given items, keeping aliases of survivors.
    /// Views never grow, even when taken from a sheet.
    fn view(&self, items: IndexMap<Key, Item>) -> Collector {
        let aliases = self
            .aliases
            .iter()
            .filter(|(_, target)| items.contains_key(*target))
            .map(|(alias, target)| (alias.clone(), target.clone()))
            .collect();
        Collector {
            name: self.name.clone(),
            items,
            aliases,
            scale: self.scale,
            sheet: None,
        }
    }

    /// Items selected by keys/aliases and inclusive positional spans, in
    /// their original order. Every referenced key must exist.
    pub fn range<I, B>(&self, selectors: I) -> Result<Collector>
    where
        I: IntoIterator<Item = B>,
        B: Into<RangeBound>,
    {
        let mut positions = BTreeSet::new();
        for selector in selectors {
            match selector.into() {
                RangeBound::Key(key) => {
                    positions.insert(self.position(&key)?);
                }
                RangeBound::Span(start, end) => {
                    let (a, b) = (self.position(&start)?, self.position(&end)?);
                    positions.extend(a.min(b)..=a.max(b));
                }
            }
        }
        let items = positions
            .into_iter()
            .filter_map(|p| self.items.get_index(p))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        Ok(self.view(items))
    }

    /// Items whose key lies within any of the inclusive bounds, scanned in
    /// original order. Bounds naming absent keys simply match less.
    pub fn between<K: Into<Key>>(&self, bounds: impl IntoIterator<Item = (K, K)>) -> Collector {
        let bounds: Vec<(Key, Key)> = bounds
            .into_iter()
            .map(|(lo, hi)| (lo.into(), hi.into()))
            .collect();
        let within = |key: &Key| {
            bounds.iter().any(|(lo, hi)| {
                matches!(key.compare(lo), Some(Ordering::Greater | Ordering::Equal))
                    && matches!(key.compare(hi), Some(Ordering::Less | Ordering::Equal))
            })
        };
        self.filter(|key, _| within(key))
    }

    pub fn filter(&self, predicate: impl Fn(&Key, &Item) -> bool) -> Collector {
        let items = self
            .items
            .iter()
            .filter(|(k, v)| predicate(k, v))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        self.view(items)
    }

    pub fn cmd(&self, op: CollectorOp) -> Collector {
        let mut entries: Vec<(Key, Item)> = self
            .items
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        match op {
            CollectorOp::Reverse => entries.reverse(),
            CollectorOp::Slice { offset, length } => {
                let length = length.unwrap_or(usize::MAX);
                entries = entries.into_iter().skip(offset).take(length).collect();
            }
            CollectorOp::SortKeys => entries.sort_by(|(a, _), (b, _)| key_order(a, b)),
            CollectorOp::SortKeysDesc => entries.sort_by(|(a, _), (b, _)| key_order(b, a)),
        }
        self.view(entries.into_iter().collect())
    }
}

fn key_order(a: &Key, b: &Key) -> Ordering {
    match (a, b) {
        (Key::Index(_), Key::Name(_)) => Ordering::Less,
        (Key::Name(_), Key::Index(_)) => Ordering::Greater,
        _ => a.compare(b).unwrap_or(Ordering::Equal),
    }
}

/// One accumulator's answer; sums and averages are re-expressed at the
/// collector's scale when it has one.
fn leaf_scalar(
    query: Query,
    acc: &dyn Accumulator,
    level: Option<usize>,
    scaled: Option<Arithmetic>,
) -> Result<Option<Number>> {
    if let Some(arithmetic) = scaled {
        let sum = arithmetic.coerce(acc.sum(level));
        let divisor = match query {
            Query::Sum => return Ok(Some(sum)),
            Query::Avg => acc.count(level)?,
            Query::AvgNotNull => acc.count_not_null(level)?,
            Query::AvgNotZero => acc.count_not_zero(level)?,
            _ => return leaf_scalar(query, acc, level, None),
        };
        return Ok(arithmetic.div(&sum, divisor));
    }
    Ok(match query {
        Query::Sum => Some(acc.sum(level)),
        Query::Count => Some(acc.count(level)?.into()),
        Query::CountNotNull => Some(acc.count_not_null(level)?.into()),
        Query::CountNotZero => Some(acc.count_not_zero(level)?.into()),
        Query::Avg => acc.avg(level)?,
        Query::AvgNotNull => acc.avg_not_null(level)?,
        Query::AvgNotZero => acc.avg_not_zero(level)?,
        Query::Min => acc.min(level)?,
        Query::Max => acc.max(level)?,
    })
}
