//! # Control Break
//!
//! A streaming engine for hierarchical control-break reports: rows arrive
//! sorted by their group values and the report fires header and footer
//! events whenever a group value changes, keeping running totals for every
//! open level.
//!
//! ## Design Principles
//!
//! - **Leveled accumulators**: one bucket per level, rolled into the parent
//!   level right after each group footer
//! - **Streaming processing**: rows are fed one at a time; nothing is buffered
//! - **Nested dimensions**: rows may carry (or drive) their own sub-streams
//!   with their own groups
//! - **Fixed-point option**: decimal metrics truncate to a configured scale
//!   via `rust_decimal`
//!
//! ## Example
//!
//! ```
//! use control_break::{Action, LevelRef, Report, Tier, Value, ValueSource};
//!
//! let mut report = Report::new();
//! report
//!     .declare_group("region", ValueSource::column(0))
//!     .unwrap()
//!     .on_footer(Action::callback(|report, inv| {
//!         Ok(format!("{}: {}\n", inv.value(), report.sum("amount", LevelRef::Current)?))
//!     }));
//! report
//!     .declare_metric("amount", ValueSource::column(1), Tier::Standard)
//!     .unwrap();
//!
//! let rows = vec![
//!     Value::list(["EU", "10"]),
//!     Value::list(["EU", "5"]),
//!     Value::list(["US", "7"]),
//! ];
//! let output = report.feed_batch(rows, true).unwrap().unwrap();
//! assert_eq!(output, "EU: 15\nUS: 7\n");
//! ```

pub mod accumulator;
pub mod action;
pub mod collector;
pub mod decimal;
pub mod dimension;
pub mod engine;
pub mod error;
pub mod group;
pub mod level;
pub mod number;
pub mod sheet;
pub mod value;

pub use accumulator::{Accumulator, Arithmetic, SharedAccumulator, Tier};
pub use action::{Action, Event, Hook, Invocation};
pub use collector::{Aggregate, Collector, CollectorOp, Contribution, Item, Query, RangeBound};
pub use decimal::FixedDecimal;
pub use dimension::NestedSource;
pub use engine::{Report, ReportConfig, State};
pub use error::{ReportError, Result};
pub use level::{LevelRef, LevelResolver};
pub use number::Number;
pub use sheet::{Sheet, SheetTemplate};
pub use value::{Key, Value, ValueSource};
