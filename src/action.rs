//! Resolved event actions.
//!
//! Whatever an event was configured with (a literal, a closure, a bound
//! method) arrives here as one of three variants and is invoked the same way.
//! The returned text is appended to the report output.

use crate::engine::Report;
use crate::error::Result;
use crate::value::{Key, Value};
use std::fmt;
use std::rc::Rc;

pub type Callback = Rc<dyn Fn(&mut Report, &Invocation) -> Result<String>>;

/// The points at which a report calls out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    Init,
    TotalHeader,
    GroupHeader(usize),
    GroupFooter(usize),
    Detail(usize),
    NoData(usize),
    TotalFooter,
    Close,
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Event::Init => write!(f, "init"),
            Event::TotalHeader => write!(f, "total header"),
            Event::GroupHeader(level) => write!(f, "header {}", level),
            Event::GroupFooter(level) => write!(f, "footer {}", level),
            Event::Detail(dimension) => write!(f, "detail {}", dimension),
            Event::NoData(dimension) => write!(f, "no data {}", dimension),
            Event::TotalFooter => write!(f, "total footer"),
            Event::Close => write!(f, "close"),
        }
    }
}

/// Report-wide and per-dimension hooks that `Report::on` binds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Hook {
    Init,
    TotalHeader,
    TotalFooter,
    Close,
    /// Rows of the most recently declared dimension with no nested data.
    Detail,
    /// A dimension that received no rows at all.
    NoData,
}

/// Arguments of one event call.
///
/// Group footers carry the row that *closed* the group, i.e. the last row
/// of it, not the row that triggered the change.
#[derive(Debug, Clone)]
pub struct Invocation {
    pub event: Event,
    pub group_value: Option<Value>,
    pub row: Option<Rc<Value>>,
    pub key: Option<Key>,
    pub dimension: usize,
}

impl Invocation {
    pub fn new(event: Event, dimension: usize) -> Self {
        Invocation {
            event,
            group_value: None,
            row: None,
            key: None,
            dimension,
        }
    }

    /// The group value rendered as text, empty when absent.
    pub fn value(&self) -> String {
        self.group_value
            .as_ref()
            .map(ToString::to_string)
            .unwrap_or_default()
    }
}

#[derive(Clone)]
pub enum Action {
    /// Appends the literal as is.
    Text(String),
    Callback(Callback),
    /// Stand-in that describes the event; used while laying out a report.
    Prototype,
}

impl Action {
    pub fn text(text: impl Into<String>) -> Self {
        Action::Text(text.into())
    }

    pub fn callback(f: impl Fn(&mut Report, &Invocation) -> Result<String> + 'static) -> Self {
        Action::Callback(Rc::new(f))
    }

    pub fn invoke(&self, report: &mut Report, invocation: &Invocation) -> Result<String> {
        match self {
            Action::Text(text) => Ok(text.clone()),
            Action::Callback(f) => f(report, invocation),
            Action::Prototype => Ok(prototype(invocation)),
        }
    }
}

fn prototype(invocation: &Invocation) -> String {
    match (&invocation.event, &invocation.group_value, &invocation.row) {
        (Event::GroupHeader(_) | Event::GroupFooter(_), Some(value), _) => {
            format!("{}: {}\n", invocation.event, value)
        }
        (Event::Detail(_), _, Some(row)) => format!("{}: {}\n", invocation.event, row),
        _ => format!("{}\n", invocation.event),
    }
}

impl fmt::Debug for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Action::Text(text) => f.debug_tuple("Text").field(text).finish(),
            Action::Callback(_) => write!(f, "Callback(..)"),
            Action::Prototype => write!(f, "Prototype"),
        }
    }
}

impl From<&str> for Action {
    fn from(text: &str) -> Self {
        Action::text(text)
    }
}
