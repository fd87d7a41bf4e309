//! Error types for the control-break engine.

use crate::accumulator::Tier;
use thiserror::Error;

/// Result type alias for report operations
pub type Result<T> = std::result::Result<T, ReportError>;

/// Errors that can occur while defining, feeding or querying a report.
#[derive(Error, Debug)]
pub enum ReportError {
    /// Failed to open or read the input file
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// CSV parsing error
    #[error("CSV parsing error: {0}")]
    Csv(#[from] csv::Error),

    /// Collector lookup by key or alias failed
    #[error("Unknown collector key or alias '{key}'")]
    UnknownKey { key: String },

    /// A collector item with this key already exists
    #[error("Duplicate collector key '{key}'")]
    DuplicateKey { key: String },

    /// A scalar was routed to a collector or a mapping to an accumulator
    #[error("Value for '{key}' does not match the item shape: {detail}")]
    ShapeMismatch { key: String, detail: String },

    /// Aliases must not shadow real keys or other aliases
    #[error("Alias '{alias}' collides with an existing key or alias")]
    AliasCollision { alias: String },

    /// Level lookup by group name failed
    #[error("Unknown group '{0}'")]
    UnknownGroup(String),

    /// A relative or absolute level points outside `0..=max_level`
    #[error("Level {level} is out of range (max level {max_level})")]
    LevelOutOfRange { level: i64, max_level: usize },

    /// The accumulator tier does not track what was asked for
    #[error("Aggregate '{aggregate}' is not available on the {tier:?} tier")]
    UnsupportedAggregate { aggregate: &'static str, tier: Tier },

    /// A context-bound query was made from the wrong kind of callback
    #[error("'{query}' may only be called from a {expected} callback")]
    InvalidContext {
        query: &'static str,
        expected: &'static str,
    },

    /// Rows were fed after the report was finalized
    #[error("Report is already finalized")]
    Finalized,

    /// Schema declarations are frozen once the first row or finalize arrives
    #[error("Cannot declare {what} after the report has started")]
    AlreadyStarted { what: &'static str },

    /// No such dimension
    #[error("Unknown dimension {0}")]
    UnknownDimension(usize),

    /// A user callback reported a failure
    #[error("Callback failed: {0}")]
    Callback(String),

    /// Missing command line arguments
    #[error(
        "Missing arguments. Usage: control-break <input.csv> <group-columns> <metric-column>"
    )]
    MissingArgument,

    /// A column named on the command line is not in the CSV header
    #[error("Unknown column '{0}' in input header")]
    UnknownColumn(String),
}
