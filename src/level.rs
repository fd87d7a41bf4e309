//! Level resolution.
//!
//! Level 0 is the grand total, `max_level` the most detailed declared group.
//! The resolver is shared (`Rc`) between the report and every accumulator so
//! that `add` always lands in the bucket of the level currently processed.

use crate::error::{ReportError, Result};
use std::cell::{Cell, RefCell};
use std::collections::HashMap;

/// A level as callers may spell it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LevelRef {
    /// The level the report is currently processing.
    Current,
    /// An absolute level. Values beyond `max_level` address the detail
    /// pseudo-level, which shares the `max_level` bucket.
    At(usize),
    /// `n` levels above the current one.
    Up(usize),
    /// The level of the group declared under this name.
    Named(String),
}

impl From<i32> for LevelRef {
    /// Non-negative numbers are absolute levels, negative ones are relative
    /// to the current level.
    fn from(value: i32) -> Self {
        if value < 0 {
            LevelRef::Up(value.unsigned_abs() as usize)
        } else {
            LevelRef::At(value as usize)
        }
    }
}

impl From<&str> for LevelRef {
    fn from(name: &str) -> Self {
        LevelRef::Named(name.to_string())
    }
}

impl From<String> for LevelRef {
    fn from(name: String) -> Self {
        LevelRef::Named(name)
    }
}

impl From<Option<usize>> for LevelRef {
    fn from(level: Option<usize>) -> Self {
        level.map_or(LevelRef::Current, LevelRef::At)
    }
}

#[derive(Debug, Default)]
pub struct LevelResolver {
    current: Cell<usize>,
    max_level: Cell<usize>,
    names: RefCell<HashMap<String, usize>>,
}

impl LevelResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current(&self) -> usize {
        self.current.get()
    }

    pub fn set_current(&self, level: usize) {
        self.current.set(level);
    }

    pub fn max_level(&self) -> usize {
        self.max_level.get()
    }

    pub fn set_max_level(&self, level: usize) {
        self.max_level.set(level);
    }

    /// Registers a group name for by-name lookup.
    pub fn register(&self, name: &str, level: usize) {
        self.names.borrow_mut().insert(name.to_string(), level);
    }

    pub fn level_of(&self, name: &str) -> Result<usize> {
        self.names
            .borrow()
            .get(name)
            .copied()
            .ok_or_else(|| ReportError::UnknownGroup(name.to_string()))
    }

    /// Translates a `LevelRef` into an absolute level.
    pub fn resolve(&self, level: &LevelRef) -> Result<usize> {
        match level {
            LevelRef::Current => Ok(self.current()),
            LevelRef::At(level) => Ok((*level).min(self.max_level())),
            LevelRef::Up(offset) => {
                self.current()
                    .checked_sub(*offset)
                    .ok_or(ReportError::LevelOutOfRange {
                        level: self.current() as i64 - *offset as i64,
                        max_level: self.max_level(),
                    })
            }
            LevelRef::Named(name) => self.level_of(name),
        }
    }
}
