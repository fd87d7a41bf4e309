//! Row values, row/item keys and value extraction.

use crate::decimal::FixedDecimal;
use crate::number::Number;
use indexmap::IndexMap;
use log::trace;
use rust_decimal::Decimal;
use std::cmp::Ordering;
use std::fmt;
use std::rc::Rc;
use std::str::FromStr;

/// Key of a row within its dimension, or of an item within a collector.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Key {
    Index(i64),
    Name(String),
}

impl Key {
    /// Ordering used by range bounds. Keys of different kinds do not compare.
    pub fn compare(&self, other: &Key) -> Option<Ordering> {
        match (self, other) {
            (Key::Index(a), Key::Index(b)) => Some(a.cmp(b)),
            (Key::Name(a), Key::Name(b)) => Some(a.cmp(b)),
            _ => None,
        }
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Key::Index(i) => write!(f, "{}", i),
            Key::Name(s) => write!(f, "{}", s),
        }
    }
}

impl From<i64> for Key {
    fn from(value: i64) -> Self {
        Key::Index(value)
    }
}

impl From<i32> for Key {
    fn from(value: i32) -> Self {
        Key::Index(value as i64)
    }
}

impl From<usize> for Key {
    fn from(value: usize) -> Self {
        Key::Index(value as i64)
    }
}

impl From<&str> for Key {
    fn from(value: &str) -> Self {
        Key::Name(value.to_string())
    }
}

impl From<String> for Key {
    fn from(value: String) -> Self {
        Key::Name(value)
    }
}

/// A cell, a row, or a nested collection of rows.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Decimal(Decimal),
    Text(String),
    List(Vec<Value>),
    Record(IndexMap<String, Value>),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Builds a record from `(field, value)` pairs.
    pub fn record<K, V>(fields: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<Value>,
    {
        Value::Record(
            fields
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }

    /// Builds a list row.
    pub fn list<V: Into<Value>>(items: impl IntoIterator<Item = V>) -> Self {
        Value::List(items.into_iter().map(Into::into).collect())
    }

    pub fn column(&self, index: usize) -> Option<&Value> {
        match self {
            Value::List(items) => items.get(index),
            Value::Record(fields) => fields.get_index(index).map(|(_, v)| v),
            _ => None,
        }
    }

    pub fn field(&self, name: &str) -> Option<&Value> {
        match self {
            Value::Record(fields) => fields.get(name),
            _ => None,
        }
    }

    /// Numeric view used for metric contributions. Null and non-numeric
    /// text contribute nothing.
    pub fn to_number(&self) -> Option<Number> {
        match self {
            Value::Null | Value::List(_) | Value::Record(_) => None,
            Value::Bool(b) => Some(Number::Int(*b as i64)),
            Value::Int(i) => Some(Number::Int(*i)),
            Value::Float(f) => Some(Number::Float(*f)),
            Value::Decimal(d) => Some(Number::Decimal(FixedDecimal::from(*d))),
            Value::Text(s) => {
                let s = s.trim();
                if let Ok(i) = s.parse::<i64>() {
                    return Some(Number::Int(i));
                }
                match Decimal::from_str(s) {
                    Ok(d) => Some(Number::Decimal(FixedDecimal::from(d))),
                    Err(_) => {
                        trace!("Text '{}' is not numeric, contributing nothing", s);
                        None
                    }
                }
            }
        }
    }

    /// Splits a nested collection into keyed rows. Lists are keyed by
    /// position, records by field name; a scalar is a single row.
    pub fn into_rows(self) -> Vec<(Key, Value)> {
        match self {
            Value::Null => Vec::new(),
            Value::List(items) => items
                .into_iter()
                .enumerate()
                .map(|(i, v)| (Key::from(i), v))
                .collect(),
            Value::Record(fields) => fields.into_iter().map(|(k, v)| (Key::Name(k), v)).collect(),
            scalar => vec![(Key::Index(0), scalar)],
        }
    }

    /// Converts into a collector key for pivot columns.
    pub fn to_key(&self) -> Key {
        match self {
            Value::Int(i) => Key::Index(*i),
            Value::Bool(b) => Key::Index(*b as i64),
            Value::Text(s) => Key::Name(s.clone()),
            other => Key::Name(other.to_string()),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => Ok(()),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Int(i) => write!(f, "{}", i),
            Value::Float(x) => write!(f, "{}", x),
            Value::Decimal(d) => write!(f, "{}", d),
            Value::Text(s) => write!(f, "{}", s),
            Value::List(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", item)?;
                }
                write!(f, "]")
            }
            Value::Record(fields) => {
                write!(f, "{{")?;
                for (i, (k, v)) in fields.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}: {}", k, v)?;
                }
                write!(f, "}}")
            }
        }
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Int(value)
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Value::Int(value as i64)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Float(value)
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Bool(value)
    }
}

impl From<Decimal> for Value {
    fn from(value: Decimal) -> Self {
        Value::Decimal(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::Text(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::Text(value)
    }
}

impl From<Vec<Value>> for Value {
    fn from(value: Vec<Value>) -> Self {
        Value::List(value)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Self {
        value.map_or(Value::Null, Into::into)
    }
}

/// Function computing a value from a row and its key.
pub type ComputeFn = Rc<dyn Fn(&Value, &Key) -> Value>;

/// Where a group or metric value comes from.
#[derive(Clone)]
pub enum ValueSource {
    /// Positional cell of a list row (or the n-th field of a record).
    Column(usize),
    /// Named field of a record row.
    Field(String),
    /// The row's own key.
    RowKey,
    /// The same value for every row.
    Fixed(Value),
    Compute(ComputeFn),
}

impl ValueSource {
    pub fn column(index: usize) -> Self {
        ValueSource::Column(index)
    }

    pub fn field(name: impl Into<String>) -> Self {
        ValueSource::Field(name.into())
    }

    pub fn compute(f: impl Fn(&Value, &Key) -> Value + 'static) -> Self {
        ValueSource::Compute(Rc::new(f))
    }

    /// Extracts the value; a missing column or field yields `Value::Null`.
    pub fn extract(&self, row: &Value, key: &Key) -> Value {
        match self {
            ValueSource::Column(index) => row.column(*index).cloned().unwrap_or_default(),
            ValueSource::Field(name) => row.field(name).cloned().unwrap_or_default(),
            ValueSource::RowKey => match key {
                Key::Index(i) => Value::Int(*i),
                Key::Name(s) => Value::Text(s.clone()),
            },
            ValueSource::Fixed(value) => value.clone(),
            ValueSource::Compute(f) => f(row, key),
        }
    }
}

impl fmt::Debug for ValueSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValueSource::Column(i) => write!(f, "Column({})", i),
            ValueSource::Field(name) => write!(f, "Field({:?})", name),
            ValueSource::RowKey => write!(f, "RowKey"),
            ValueSource::Fixed(v) => write!(f, "Fixed({:?})", v),
            ValueSource::Compute(_) => write!(f, "Compute(..)"),
        }
    }
}

impl From<usize> for ValueSource {
    fn from(index: usize) -> Self {
        ValueSource::Column(index)
    }
}

impl From<&str> for ValueSource {
    fn from(name: &str) -> Self {
        ValueSource::Field(name.to_string())
    }
}
