//! Dimensions: the nesting tiers of the input.
//!
//! Dimension 0 holds the top-level rows. Each further dimension is fed from
//! the rows of the one before it and owns a contiguous slice of levels right
//! below its parent's. A dimension without groups owns an empty slice and
//! contributes at its parent's deepest level.

use crate::action::Action;
use crate::engine::Report;
use crate::error::{ReportError, Result};
use crate::value::{Key, Value, ValueSource};
use std::fmt;
use std::rc::Rc;

/// Feeds the nested rows of `row` by calling `Report::feed_row` itself.
pub type Driver = Rc<dyn Fn(&mut Report, &Value, &Key) -> Result<()>>;

/// How a dimension reaches the rows of the next one.
#[derive(Clone)]
pub enum NestedSource {
    /// A list or record inside the row; every element becomes a nested row.
    Attribute(ValueSource),
    Driver(Driver),
}

impl NestedSource {
    pub fn attribute(source: impl Into<ValueSource>) -> Self {
        NestedSource::Attribute(source.into())
    }

    pub fn driver(f: impl Fn(&mut Report, &Value, &Key) -> Result<()> + 'static) -> Self {
        NestedSource::Driver(Rc::new(f))
    }
}

impl fmt::Debug for NestedSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NestedSource::Attribute(source) => f.debug_tuple("Attribute").field(source).finish(),
            NestedSource::Driver(_) => write!(f, "Driver(..)"),
        }
    }
}

/// Per-feed bookkeeping, reset whenever the dimension starts a new sub-stream.
#[derive(Debug, Default)]
pub(crate) struct DimensionState {
    /// Group values of the previous row.
    pub previous: Option<Vec<Value>>,
    /// The previous row, handed to footers.
    pub previous_row: Option<(Rc<Value>, Key)>,
    /// Deepest level with an open group.
    pub lowest_header: Option<usize>,
    pub rows_seen: u64,
}

impl DimensionState {
    pub fn reset(&mut self) {
        *self = DimensionState::default();
    }
}

#[derive(Debug)]
pub struct Dimension {
    id: usize,
    first_level: usize,
    last_level: usize,
    nested: Option<NestedSource>,
    detail: Option<Action>,
    no_data: Option<Action>,
    pub(crate) state: DimensionState,
}

impl Dimension {
    fn new(id: usize, parent_last_level: usize) -> Self {
        Dimension {
            id,
            first_level: parent_last_level + 1,
            last_level: parent_last_level,
            nested: None,
            detail: None,
            no_data: None,
            state: DimensionState::default(),
        }
    }

    pub fn id(&self) -> usize {
        self.id
    }

    /// First owned level. Exceeds `last_level` when the dimension has no groups.
    pub fn first_level(&self) -> usize {
        self.first_level
    }

    /// Deepest owned level, or the parent's deepest level without groups.
    pub fn last_level(&self) -> usize {
        self.last_level
    }

    pub fn has_groups(&self) -> bool {
        self.last_level >= self.first_level
    }

    pub fn owns(&self, level: usize) -> bool {
        (self.first_level..=self.last_level).contains(&level)
    }

    pub fn nested(&self) -> Option<&NestedSource> {
        self.nested.as_ref()
    }

    pub fn detail(&self) -> Option<&Action> {
        self.detail.as_ref()
    }

    pub fn no_data(&self) -> Option<&Action> {
        self.no_data.as_ref()
    }

    pub fn on_detail(&mut self, action: impl Into<Action>) -> &mut Self {
        self.detail = Some(action.into());
        self
    }

    pub fn on_no_data(&mut self, action: impl Into<Action>) -> &mut Self {
        self.no_data = Some(action.into());
        self
    }

    /// Number of rows fed into the current sub-stream.
    pub fn rows_seen(&self) -> u64 {
        self.state.rows_seen
    }

    fn push_level(&mut self, level: usize) {
        debug_assert_eq!(level, self.last_level + 1);
        self.last_level = level;
    }
}

#[derive(Debug)]
pub struct Dimensions {
    dimensions: Vec<Dimension>,
}

impl Dimensions {
    pub fn new() -> Self {
        Dimensions {
            dimensions: vec![Dimension::new(0, 0)],
        }
    }

    /// Opens the next dimension below the last one.
    pub fn declare(&mut self, nested: NestedSource) -> usize {
        let id = self.dimensions.len();
        let parent = self.last_mut();
        parent.nested = Some(nested);
        let parent_last = parent.last_level;
        self.dimensions.push(Dimension::new(id, parent_last));
        id
    }

    /// Assigns `level` to the dimension currently being declared.
    pub fn add_level(&mut self, level: usize) -> usize {
        let last = self.last_mut();
        last.push_level(level);
        last.id
    }

    pub fn len(&self) -> usize {
        self.dimensions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dimensions.is_empty()
    }

    pub fn get(&self, id: usize) -> Result<&Dimension> {
        self.dimensions
            .get(id)
            .ok_or(ReportError::UnknownDimension(id))
    }

    pub fn get_mut(&mut self, id: usize) -> Result<&mut Dimension> {
        self.dimensions
            .get_mut(id)
            .ok_or(ReportError::UnknownDimension(id))
    }

    pub fn last_mut(&mut self) -> &mut Dimension {
        let last = self.dimensions.len() - 1;
        &mut self.dimensions[last]
    }

    /// The dimension owning `level`; level 0 belongs to the root.
    pub fn owner_of(&self, level: usize) -> Option<&Dimension> {
        if level == 0 {
            return self.dimensions.first();
        }
        self.dimensions.iter().find(|d| d.owns(level))
    }

    pub fn iter(&self) -> impl Iterator<Item = &Dimension> {
        self.dimensions.iter()
    }
}

impl Default for Dimensions {
    fn default() -> Self {
        Self::new()
    }
}

impl std::ops::Index<usize> for Dimensions {
    type Output = Dimension;

    fn index(&self, id: usize) -> &Dimension {
        &self.dimensions[id]
    }
}

impl std::ops::IndexMut<usize> for Dimensions {
    fn index_mut(&mut self, id: usize) -> &mut Dimension {
        &mut self.dimensions[id]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_root_owns_declared_levels() {
        let mut dims = Dimensions::new();
        assert!(!dims[0].has_groups());
        dims.add_level(1);
        dims.add_level(2);
        assert_eq!(dims[0].first_level(), 1);
        assert_eq!(dims[0].last_level(), 2);
        assert!(dims[0].owns(2));
    }

    #[test]
    fn test_nested_dimension_starts_below_parent() {
        let mut dims = Dimensions::new();
        dims.add_level(1);
        let id = dims.declare(NestedSource::attribute("lines"));
        assert_eq!(id, 1);
        assert!(dims[0].nested().is_some());
        assert_eq!(dims[1].first_level(), 2);
        assert!(!dims[1].has_groups());
        assert_eq!(dims[1].last_level(), 1);

        dims.add_level(2);
        assert_eq!(dims.owner_of(2).unwrap().id(), 1);
        assert_eq!(dims.owner_of(1).unwrap().id(), 0);
        assert_eq!(dims.owner_of(0).unwrap().id(), 0);
        assert!(dims.owner_of(3).is_none());
    }

    #[test]
    fn test_unknown_dimension() {
        let dims = Dimensions::new();
        assert!(matches!(dims.get(4), Err(ReportError::UnknownDimension(4))));
    }
}
