//! Group declarations.
//!
//! Groups receive levels in declaration order: the first declared group is
//! level 1, the last one is `max_level`.

use crate::action::Action;
use crate::value::ValueSource;

#[derive(Debug, Clone)]
pub struct Group {
    level: usize,
    dimension: usize,
    name: String,
    source: ValueSource,
    header: Option<Action>,
    footer: Option<Action>,
}

impl Group {
    pub fn level(&self) -> usize {
        self.level
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn source(&self) -> &ValueSource {
        &self.source
    }

    pub fn header(&self) -> Option<&Action> {
        self.header.as_ref()
    }

    pub fn footer(&self) -> Option<&Action> {
        self.footer.as_ref()
    }

    /// Binds (or rebinds) the header action.
    pub fn on_header(&mut self, action: impl Into<Action>) -> &mut Self {
        self.header = Some(action.into());
        self
    }

    /// Binds (or rebinds) the footer action.
    pub fn on_footer(&mut self, action: impl Into<Action>) -> &mut Self {
        self.footer = Some(action.into());
        self
    }
}

#[derive(Debug, Default)]
pub struct Groups {
    groups: Vec<Group>,
}

impl Groups {
    /// Registers a group at the next free level.
    pub fn declare(&mut self, name: &str, dimension: usize, source: ValueSource) -> &mut Group {
        let level = self.groups.len() + 1;
        self.groups.push(Group {
            level,
            dimension,
            name: name.to_string(),
            source,
            header: None,
            footer: None,
        });
        let last = self.groups.len() - 1;
        &mut self.groups[last]
    }

    /// Number of groups, which is also the deepest level.
    pub fn len(&self) -> usize {
        self.groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    pub fn get(&self, level: usize) -> Option<&Group> {
        level.checked_sub(1).and_then(|i| self.groups.get(i))
    }

    pub fn get_mut(&mut self, level: usize) -> Option<&mut Group> {
        level.checked_sub(1).and_then(move |i| self.groups.get_mut(i))
    }

    pub fn iter(&self) -> impl Iterator<Item = &Group> {
        self.groups.iter()
    }
}
