//! Control-break orchestration.
//!
//! Rows arrive already ordered by their group values. For every row the
//! report finds the highest level whose value changed, closes the groups
//! below it (footers, deepest first, each followed by a roll-up of that
//! level), opens the new ones (headers), adds the row's metrics at the
//! deepest level of its dimension and then either descends into the nested
//! dimension or emits the detail event.
//!
//! Callbacks receive `&mut Report` and may feed more rows, into this report
//! or another one. The dimension being fed is the top of a frame stack that
//! is pushed and popped around every descent.

use crate::accumulator::{self, Arithmetic, Tier};
use crate::action::{Action, Event, Hook, Invocation};
use crate::collector::{Collector, Contribution, Item, Query};
use crate::dimension::{Dimension, Dimensions, Driver, NestedSource};
use crate::error::{ReportError, Result};
use crate::group::{Group, Groups};
use crate::level::{LevelRef, LevelResolver};
use crate::number::Number;
use crate::sheet::{Sheet, SheetTemplate};
use crate::value::{Key, Value, ValueSource};
use csv::{ReaderBuilder, Trim};
use indexmap::IndexMap;
use log::{debug, trace, warn};
use serde::{Deserialize, Serialize};
use std::io::Read;
use std::rc::Rc;

/// Lifecycle of a report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    /// Declarations are still accepted.
    Fresh,
    /// Init and total header have fired.
    Initialized,
    Running,
    Finalizing,
    Done,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReportConfig {
    /// Tier used by [`Report::declare_default_metric`].
    pub default_tier: Tier,
    /// Decimal scale for metrics declared without their own arithmetic;
    /// `None` keeps native arithmetic.
    pub scale: Option<u32>,
    /// Render a description for events that have no action bound.
    pub prototype: bool,
}

impl Default for ReportConfig {
    fn default() -> Self {
        ReportConfig {
            default_tier: Tier::Standard,
            scale: None,
            prototype: false,
        }
    }
}

#[derive(Debug, Clone)]
enum MetricSource {
    Value(ValueSource),
    Pivot {
        column: ValueSource,
        value: ValueSource,
    },
}

#[derive(Debug, Clone)]
struct MetricDecl {
    name: String,
    dimension: usize,
    tier: Tier,
    /// `None` follows `ReportConfig::scale`.
    arithmetic: Option<Arithmetic>,
    source: MetricSource,
}

#[derive(Debug, Default)]
struct Hooks {
    init: Option<Action>,
    total_header: Option<Action>,
    total_footer: Option<Action>,
    close: Option<Action>,
}

/// Row context of the dimension being fed.
#[derive(Debug)]
struct Frame {
    dimension: usize,
    row: Option<Rc<Value>>,
    key: Option<Key>,
}

impl Frame {
    fn new(dimension: usize) -> Self {
        Frame {
            dimension,
            row: None,
            key: None,
        }
    }
}

/// The footer being fired: its level and the level where the change that
/// triggered the cascade was detected.
#[derive(Debug, Clone, Copy)]
struct FooterContext {
    level: usize,
    origin: usize,
}

enum Descent {
    Rows(Vec<(Key, Value)>),
    Driver(Driver),
}

/// A control-break report.
///
/// # Example
///
/// ```
/// use control_break::{Action, LevelRef, Report, Tier, ValueSource, Value};
///
/// let mut report = Report::new();
/// report
///     .declare_group("letter", ValueSource::column(0))
///     .unwrap()
///     .on_footer(Action::callback(|report, inv| {
///         Ok(format!("{}={} ", inv.value(), report.sum("n", LevelRef::Current)?))
///     }));
/// report.declare_metric("n", ValueSource::column(1), Tier::Standard).unwrap();
///
/// let rows = vec![Value::list(["A", "1"]), Value::list(["A", "2"]), Value::list(["B", "1"])];
/// let output = report.feed_batch(rows, true).unwrap().unwrap();
/// assert_eq!(output, "A=3 B=1 ");
/// ```
pub struct Report {
    config: ReportConfig,
    state: State,
    resolver: Rc<LevelResolver>,
    groups: Groups,
    dimensions: Dimensions,
    metric_decls: Vec<MetricDecl>,
    hooks: Hooks,
    metrics: Collector,
    group_counts: Collector,
    row_counts: Collector,
    frames: Vec<Frame>,
    footer: Option<FooterContext>,
    output: String,
}

impl Report {
    pub fn new() -> Self {
        Self::with_config(ReportConfig::default())
    }

    pub fn with_config(config: ReportConfig) -> Self {
        Report {
            config,
            state: State::Fresh,
            resolver: Rc::new(LevelResolver::new()),
            groups: Groups::default(),
            dimensions: Dimensions::new(),
            metric_decls: Vec::new(),
            hooks: Hooks::default(),
            metrics: Collector::new("metrics"),
            group_counts: Collector::new("groups"),
            row_counts: Collector::new("rows"),
            frames: vec![Frame::new(0)],
            footer: None,
            output: String::new(),
        }
    }

    pub fn config(&self) -> &ReportConfig {
        &self.config
    }

    fn ensure_fresh(&self, what: &'static str) -> Result<()> {
        if self.state != State::Fresh {
            return Err(ReportError::AlreadyStarted { what });
        }
        Ok(())
    }

    /// Declares the next group level in the most recently declared dimension.
    pub fn declare_group(&mut self, name: &str, source: impl Into<ValueSource>) -> Result<&mut Group> {
        self.ensure_fresh("a group")?;
        let level = self.groups.len() + 1;
        let dimension = self.dimensions.add_level(level);
        self.resolver.register(name, level);
        self.resolver.set_max_level(level);
        debug!("Group '{}' is level {} of dimension {}", name, level, dimension);
        Ok(self.groups.declare(name, dimension, source.into()))
    }

    /// Declares a nested dimension fed from the rows of the current last one.
    pub fn declare_dimension(&mut self, nested: NestedSource) -> Result<usize> {
        self.ensure_fresh("a dimension")?;
        Ok(self.dimensions.declare(nested))
    }

    /// Declares a metric of the most recently declared dimension.
    pub fn declare_metric(&mut self, name: &str, source: impl Into<ValueSource>, tier: Tier) -> Result<()> {
        self.push_metric(name, tier, None, MetricSource::Value(source.into()))
    }

    /// Declares a metric with its own arithmetic, e.g. a decimal metric in an
    /// otherwise native report or the other way round.
    pub fn declare_metric_with(
        &mut self,
        name: &str,
        source: impl Into<ValueSource>,
        tier: Tier,
        arithmetic: Arithmetic,
    ) -> Result<()> {
        self.push_metric(name, tier, Some(arithmetic), MetricSource::Value(source.into()))
    }

    /// Declares a metric using the configured default tier.
    pub fn declare_default_metric(&mut self, name: &str, source: impl Into<ValueSource>) -> Result<()> {
        let tier = self.config.default_tier;
        self.declare_metric(name, source, tier)
    }

    /// Declares a pivot metric: one accumulator per distinct `column` value.
    pub fn declare_pivot(
        &mut self,
        name: &str,
        column: impl Into<ValueSource>,
        value: impl Into<ValueSource>,
        tier: Tier,
    ) -> Result<()> {
        let source = MetricSource::Pivot {
            column: column.into(),
            value: value.into(),
        };
        self.push_metric(name, tier, None, source)
    }

    fn push_metric(
        &mut self,
        name: &str,
        tier: Tier,
        arithmetic: Option<Arithmetic>,
        source: MetricSource,
    ) -> Result<()> {
        self.ensure_fresh("a metric")?;
        if self.metric_decls.iter().any(|m| m.name == name) {
            return Err(ReportError::DuplicateKey {
                key: name.to_string(),
            });
        }
        self.metric_decls.push(MetricDecl {
            name: name.to_string(),
            dimension: self.dimensions.len() - 1,
            tier,
            arithmetic,
            source,
        });
        Ok(())
    }

    /// Binds a report-wide hook, or a detail/no-data hook of the most
    /// recently declared dimension. Rebinding is allowed at any time.
    pub fn on(&mut self, hook: Hook, action: impl Into<Action>) -> &mut Self {
        let action = action.into();
        match hook {
            Hook::Init => self.hooks.init = Some(action),
            Hook::TotalHeader => self.hooks.total_header = Some(action),
            Hook::TotalFooter => self.hooks.total_footer = Some(action),
            Hook::Close => self.hooks.close = Some(action),
            Hook::Detail => {
                self.dimensions.last_mut().on_detail(action);
            }
            Hook::NoData => {
                self.dimensions.last_mut().on_no_data(action);
            }
        }
        self
    }

    pub fn group_mut(&mut self, level: impl Into<LevelRef>) -> Result<&mut Group> {
        let level = self.resolver.resolve(&level.into())?;
        let max_level = self.groups.len();
        self.groups
            .get_mut(level)
            .ok_or(ReportError::LevelOutOfRange {
                level: level as i64,
                max_level,
            })
    }

    pub fn dimension_mut(&mut self, id: usize) -> Result<&mut Dimension> {
        self.dimensions.get_mut(id)
    }

    pub fn groups(&self) -> &Groups {
        &self.groups
    }

    pub fn dimensions(&self) -> &Dimensions {
        &self.dimensions
    }

    /// Freezes the schema, builds the collectors and fires init/total header.
    fn start(&mut self) -> Result<()> {
        match self.state {
            State::Fresh => {}
            State::Done => return Err(ReportError::Finalized),
            _ => return Ok(()),
        }
        self.build_collectors()?;
        self.state = State::Initialized;
        self.resolver.set_current(0);
        debug!(
            "Report started: {} levels, {} dimensions, {} metrics",
            self.groups.len(),
            self.dimensions.len(),
            self.metric_decls.len()
        );
        self.emit(self.hooks.init.clone(), Invocation::new(Event::Init, 0))?;
        self.emit(
            self.hooks.total_header.clone(),
            Invocation::new(Event::TotalHeader, 0),
        )
    }

    fn build_collectors(&mut self) -> Result<()> {
        let max_level = self.groups.len();
        self.resolver.set_max_level(max_level);
        let default_arithmetic = self.config.scale.map_or(Arithmetic::Native, Arithmetic::Decimal);

        // each metric carries its own arithmetic, so the collector stays unscaled
        let mut metrics = Collector::new("metrics");
        for decl in &self.metric_decls {
            let arithmetic = decl.arithmetic.unwrap_or(default_arithmetic);
            match decl.source {
                MetricSource::Value(_) => {
                    let acc = accumulator::build(decl.tier, arithmetic, &self.resolver);
                    metrics.add_accumulator(decl.name.as_str(), acc)?;
                }
                MetricSource::Pivot { .. } => {
                    let template = SheetTemplate::new(decl.tier, arithmetic, Rc::clone(&self.resolver));
                    metrics.add_collector(decl.name.as_str(), Sheet::lazy(decl.name.as_str(), template))?;
                }
            }
        }

        let mut group_counts = Collector::new("groups");
        for level in 1..=max_level {
            let acc = accumulator::build(Tier::Minimal, Arithmetic::Native, &self.resolver);
            group_counts.add_accumulator(level, acc)?;
        }

        let mut row_counts = Collector::new("rows");
        for dimension in 0..self.dimensions.len() {
            let acc = accumulator::build(Tier::Minimal, Arithmetic::Native, &self.resolver);
            row_counts.add_accumulator(dimension, acc)?;
        }

        self.metrics = metrics;
        self.group_counts = group_counts;
        self.row_counts = row_counts;
        Ok(())
    }

    /// Feeds one row into the dimension currently on top of the frame stack.
    /// Without a key, rows are keyed by their position in the sub-stream.
    pub fn feed_row(&mut self, row: impl Into<Value>, key: Option<Key>) -> Result<()> {
        self.start()?;
        if matches!(self.state, State::Finalizing | State::Done) {
            return Err(ReportError::Finalized);
        }
        self.state = State::Running;
        let dimension = self.dimension();
        let key = key.unwrap_or_else(|| Key::from(self.dimensions[dimension].state.rows_seen as i64));
        self.process_row(dimension, Rc::new(row.into()), key)
    }

    /// Feeds every row, then finalizes if asked to and returns the output.
    pub fn feed_batch<I>(&mut self, rows: I, finalize: bool) -> Result<Option<String>>
    where
        I: IntoIterator,
        I::Item: Into<Value>,
    {
        for row in rows {
            self.feed_row(row, None)?;
        }
        if finalize {
            self.finalize().map(Some)
        } else {
            Ok(None)
        }
    }

    /// Streams CSV records (with a header row) as record rows.
    ///
    /// Cells are trimmed and empty cells become null. Malformed records are
    /// logged at warn level and skipped. Returns the number of rows fed.
    pub fn feed_csv<R: Read>(&mut self, reader: R) -> Result<usize> {
        let mut csv_reader = ReaderBuilder::new()
            .trim(Trim::All)
            .flexible(true)
            .from_reader(reader);
        let headers: Vec<String> = csv_reader.headers()?.iter().map(str::to_string).collect();

        let mut fed = 0;
        for (row_idx, result) in csv_reader.records().enumerate() {
            let row_num = row_idx + 2; // 1-indexed, accounting for header row

            match result {
                Ok(record) => {
                    let fields = headers
                        .iter()
                        .zip(record.iter())
                        .map(|(header, cell)| {
                            let value = if cell.is_empty() {
                                Value::Null
                            } else {
                                Value::from(cell)
                            };
                            (header.clone(), value)
                        })
                        .collect();
                    self.feed_row(Value::Record(fields), Some(Key::from(row_idx)))?;
                    fed += 1;
                }
                Err(e) => {
                    warn!("Row {}: CSV parse error: {}", row_num, e);
                }
            }
        }

        Ok(fed)
    }

    /// Closes every open group, fires total footer and close, and returns
    /// the accumulated output.
    ///
    /// Calling it again returns the same output without firing anything.
    pub fn finalize(&mut self) -> Result<String> {
        match self.state {
            State::Done => {
                debug!("Report already finalized");
                return Ok(self.output.clone());
            }
            State::Finalizing => return Err(ReportError::Finalized),
            _ => {}
        }
        self.start()?;
        self.state = State::Finalizing;

        let (rows_seen, lowest, first_level) = {
            let root = &self.dimensions[0];
            (root.state.rows_seen, root.state.lowest_header, root.first_level())
        };
        if rows_seen == 0 {
            debug!("Report finalized without data");
            self.resolver.set_current(0);
            let action = self.dimensions[0].no_data().cloned();
            self.emit(action, Invocation::new(Event::NoData(0), 0))?;
        } else {
            if let Some(lowest) = lowest {
                self.fire_footers(0, lowest, first_level, 0)?;
            }
            self.resolver.set_current(0);
            let mut invocation = Invocation::new(Event::TotalFooter, 0);
            if let Some((row, key)) = self.dimensions[0].state.previous_row.clone() {
                invocation.row = Some(row);
                invocation.key = Some(key);
            }
            self.emit(self.hooks.total_footer.clone(), invocation)?;
        }
        self.emit(self.hooks.close.clone(), Invocation::new(Event::Close, 0))?;
        self.state = State::Done;
        Ok(self.output.clone())
    }

    fn process_row(&mut self, dimension: usize, row: Rc<Value>, key: Key) -> Result<()> {
        let values: Vec<Value> = self
            .groups
            .iter()
            .filter(|g| g.dimension() == dimension)
            .map(|g| g.source().extract(&row, &key))
            .collect();
        let (first_level, last_level) = {
            let d = &self.dimensions[dimension];
            (d.first_level(), d.last_level())
        };

        let change = match &self.dimensions[dimension].state.previous {
            None => Some(0),
            Some(previous) => previous.iter().zip(&values).position(|(a, b)| a != b),
        };

        if let Some(offset) = change {
            let change_level = first_level + offset;
            if let Some(lowest) = self.dimensions[dimension].state.lowest_header {
                debug!(
                    "Group change at level {} in dimension {}",
                    change_level, dimension
                );
                self.fire_footers(dimension, lowest, change_level, change_level)?;
            }
            self.dimensions[dimension].state.previous = Some(values.clone());
            self.set_frame_row(&row, &key);
            self.fire_headers(dimension, change_level, &values, &row, &key)?;
        } else {
            self.set_frame_row(&row, &key);
        }

        self.resolver.set_current(last_level);
        {
            let state = &mut self.dimensions[dimension].state;
            state.previous_row = Some((Rc::clone(&row), key.clone()));
            state.rows_seen += 1;
        }
        self.add_metrics(dimension, &row, &key)?;
        self.row_counts
            .add_value(dimension, Some(Number::Int(1)))?;

        match self.dimensions[dimension].nested().cloned() {
            Some(NestedSource::Attribute(source)) => {
                let data = source.extract(&row, &key);
                if data.is_null() {
                    self.fire_detail(dimension, &row, &key)
                } else {
                    self.descend(dimension, Descent::Rows(data.into_rows()), &row, &key)
                }
            }
            Some(NestedSource::Driver(driver)) => {
                self.descend(dimension, Descent::Driver(driver), &row, &key)
            }
            None => self.fire_detail(dimension, &row, &key),
        }
    }

    fn set_frame_row(&mut self, row: &Rc<Value>, key: &Key) {
        if let Some(frame) = self.frames.last_mut() {
            frame.row = Some(Rc::clone(row));
            frame.key = Some(key.clone());
        }
    }

    /// Fires footers from `from` up to `to` (inclusive), rolling each level
    /// into its parent right after its footer.
    fn fire_footers(&mut self, dimension: usize, from: usize, to: usize, origin: usize) -> Result<()> {
        let (previous, previous_row, first_level) = {
            let d = &self.dimensions[dimension];
            (
                d.state.previous.clone().unwrap_or_default(),
                d.state.previous_row.clone(),
                d.first_level(),
            )
        };
        let (row, key) = match previous_row {
            Some((row, key)) => (Some(row), Some(key)),
            None => (None, None),
        };

        for level in (to..=from).rev() {
            self.resolver.set_current(level);
            let action = self.groups.get(level).and_then(|g| g.footer().cloned());
            let invocation = Invocation {
                event: Event::GroupFooter(level),
                group_value: previous.get(level - first_level).cloned(),
                row: row.clone(),
                key: key.clone(),
                dimension,
            };
            let saved = self.footer.replace(FooterContext { level, origin });
            let result = self.emit(action, invocation);
            self.footer = saved;
            result?;
            self.cumulate(level);
        }

        self.dimensions[dimension].state.lowest_header = if to > first_level {
            Some(to - 1)
        } else {
            None
        };
        Ok(())
    }

    fn fire_headers(
        &mut self,
        dimension: usize,
        from: usize,
        values: &[Value],
        row: &Rc<Value>,
        key: &Key,
    ) -> Result<()> {
        let (first_level, last_level) = {
            let d = &self.dimensions[dimension];
            (d.first_level(), d.last_level())
        };
        for level in from..=last_level {
            self.resolver.set_current(level);
            self.group_counts.add_value(level, Some(Number::Int(1)))?;
            let action = self.groups.get(level).and_then(|g| g.header().cloned());
            let invocation = Invocation {
                event: Event::GroupHeader(level),
                group_value: values.get(level - first_level).cloned(),
                row: Some(Rc::clone(row)),
                key: Some(key.clone()),
                dimension,
            };
            self.emit(action, invocation)?;
        }
        if last_level >= first_level {
            self.dimensions[dimension].state.lowest_header = Some(last_level);
        }
        Ok(())
    }

    fn cumulate(&mut self, level: usize) {
        self.metrics.cumulate_to_next_level(level);
        self.group_counts.cumulate_to_next_level(level);
        self.row_counts.cumulate_to_next_level(level);
    }

    fn add_metrics(&mut self, dimension: usize, row: &Value, key: &Key) -> Result<()> {
        let mut contributions = IndexMap::new();
        for decl in self.metric_decls.iter().filter(|m| m.dimension == dimension) {
            let contribution = match &decl.source {
                MetricSource::Value(source) => Contribution::Scalar(source.extract(row, key).to_number()),
                MetricSource::Pivot { column, value } => {
                    let mut cell = IndexMap::new();
                    cell.insert(
                        column.extract(row, key).to_key(),
                        Contribution::Scalar(value.extract(row, key).to_number()),
                    );
                    Contribution::Nested(cell)
                }
            };
            trace!("Row {}: metric '{}' <- {:?}", key, decl.name, contribution);
            contributions.insert(Key::from(decl.name.as_str()), contribution);
        }
        self.metrics.add_values(contributions)
    }

    fn fire_detail(&mut self, dimension: usize, row: &Rc<Value>, key: &Key) -> Result<()> {
        let action = self.dimensions[dimension].detail().cloned();
        let invocation = Invocation {
            event: Event::Detail(dimension),
            group_value: None,
            row: Some(Rc::clone(row)),
            key: Some(key.clone()),
            dimension,
        };
        self.emit(action, invocation)
    }

    fn descend(&mut self, parent: usize, descent: Descent, row: &Rc<Value>, key: &Key) -> Result<()> {
        let child = parent + 1;
        debug!("Row {}: descending from dimension {} into {}", key, parent, child);
        self.dimensions[child].state.reset();
        self.frames.push(Frame::new(child));
        let result = self.run_descent(child, descent, row, key);
        self.frames.pop();
        self.resolver.set_current(self.dimensions[parent].last_level());
        result
    }

    fn run_descent(&mut self, child: usize, descent: Descent, row: &Rc<Value>, key: &Key) -> Result<()> {
        match descent {
            Descent::Rows(rows) => {
                for (nested_key, nested_row) in rows {
                    self.process_row(child, Rc::new(nested_row), nested_key)?;
                }
            }
            Descent::Driver(driver) => driver(self, &**row, key)?,
        }
        self.close_dimension(child, row, key)
    }

    /// Ends a nested sub-stream: closes its open groups, or reports that it
    /// had no rows.
    fn close_dimension(&mut self, child: usize, row: &Rc<Value>, key: &Key) -> Result<()> {
        let (rows_seen, lowest, first_level) = {
            let d = &self.dimensions[child];
            (d.state.rows_seen, d.state.lowest_header, d.first_level())
        };
        if rows_seen == 0 {
            self.resolver.set_current(first_level - 1);
            let action = self.dimensions[child].no_data().cloned();
            let invocation = Invocation {
                event: Event::NoData(child),
                group_value: None,
                row: Some(Rc::clone(row)),
                key: Some(key.clone()),
                dimension: child,
            };
            return self.emit(action, invocation);
        }
        if let Some(lowest) = lowest {
            self.fire_footers(child, lowest, first_level, first_level - 1)?;
        }
        Ok(())
    }

    fn emit(&mut self, action: Option<Action>, invocation: Invocation) -> Result<()> {
        let action = match action {
            Some(action) => action,
            None if self.config.prototype => Action::Prototype,
            None => return Ok(()),
        };
        let text = action.invoke(self, &invocation)?;
        self.output.push_str(&text);
        Ok(())
    }

    pub fn state(&self) -> State {
        self.state
    }

    /// Output appended so far.
    pub fn output(&self) -> &str {
        &self.output
    }

    /// The level currently processed.
    pub fn level(&self) -> usize {
        self.resolver.current()
    }

    pub fn max_level(&self) -> usize {
        self.groups.len()
    }

    /// The dimension currently fed.
    pub fn dimension(&self) -> usize {
        self.frames.last().map_or(0, |f| f.dimension)
    }

    pub fn current_row(&self) -> Option<Rc<Value>> {
        self.frames.last().and_then(|f| f.row.clone())
    }

    pub fn current_key(&self) -> Option<Key> {
        self.frames.last().and_then(|f| f.key.clone())
    }

    pub fn level_of(&self, name: &str) -> Result<usize> {
        self.resolver.level_of(name)
    }

    pub fn resolve(&self, level: impl Into<LevelRef>) -> Result<usize> {
        self.resolver.resolve(&level.into())
    }

    /// Whether the group open at `level` is the first one within its parent
    /// group. Level 0 is always first.
    pub fn is_first(&self, level: impl Into<LevelRef>) -> Result<bool> {
        let level = self.resolve(level)?;
        if level == 0 {
            return Ok(true);
        }
        let counter = self.group_counts.get(level)?;
        Ok(count_of(&counter, level - 1) == 1)
    }

    /// Only valid inside a group footer: `true` while the cascade closes
    /// levels deeper than the one where the change was detected.
    pub fn is_last(&self) -> Result<bool> {
        self.footer
            .map(|f| f.level != f.origin)
            .ok_or(ReportError::InvalidContext {
                query: "is_last",
                expected: "group footer",
            })
    }

    /// Value of the group at `level` (during footers: of the closing group).
    pub fn group_value(&self, level: impl Into<LevelRef>) -> Result<Option<Value>> {
        let level = self.resolve(level)?;
        if level == 0 {
            return Ok(None);
        }
        let Some(dimension) = self.dimensions.owner_of(level) else {
            return Ok(None);
        };
        Ok(dimension
            .state
            .previous
            .as_ref()
            .and_then(|values| values.get(level - dimension.first_level()))
            .cloned())
    }

    /// Rows of `dimension` counted from `level` downwards.
    pub fn row_count(&self, dimension: usize, level: impl Into<LevelRef>) -> Result<u64> {
        self.dimensions.get(dimension)?;
        let level = self.resolve(level)?;
        let counter = self.row_counts.get(dimension)?;
        Ok(count_of(&counter, level))
    }

    /// Groups of `group_level` opened, counted from `at_level` downwards.
    pub fn group_count(&self, group_level: impl Into<LevelRef>, at_level: impl Into<LevelRef>) -> Result<u64> {
        let group_level = self.resolve(group_level)?;
        let at_level = self.resolve(at_level)?;
        let counter = self.group_counts.get(group_level)?;
        Ok(count_of(&counter, at_level))
    }

    pub fn metrics(&self) -> &Collector {
        &self.metrics
    }

    pub fn metric(&self, name: &str) -> Result<Item> {
        self.metrics.get(name)
    }

    /// Any collector query over one metric, reduced to a scalar.
    pub fn aggregate(&self, name: &str, query: Query, level: impl Into<LevelRef>) -> Result<Option<Number>> {
        let level = self.resolve(level)?;
        let view = self.metrics.range([Key::from(name)])?;
        Ok(view.query(query, Some(level), 0)?.scalar())
    }

    /// Running total of a metric from `level` downwards.
    pub fn sum(&self, name: &str, level: impl Into<LevelRef>) -> Result<Number> {
        let sum = self.aggregate(name, Query::Sum, level)?;
        Ok(sum.unwrap_or(Number::Int(0)))
    }
}

impl Default for Report {
    fn default() -> Self {
        Self::new()
    }
}

fn count_of(item: &Item, level: usize) -> u64 {
    match item.accumulator().map(|acc| acc.borrow().sum(Some(level))) {
        Some(Number::Int(n)) => n.max(0) as u64,
        Some(other) => other.as_f64().max(0.0) as u64,
        None => 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::io::Cursor;

    fn rows(data: &[(&str, i64)]) -> Vec<Value> {
        data.iter()
            .map(|(g, n)| Value::list([Value::from(*g), Value::from(*n)]))
            .collect()
    }

    fn letter_report() -> Report {
        let mut report = Report::new();
        report
            .declare_group("letter", ValueSource::column(0))
            .unwrap()
            .on_header(Action::callback(|_, inv| Ok(format!("H({})", inv.value()))))
            .on_footer(Action::callback(|_, inv| Ok(format!("F({})", inv.value()))));
        report
            .declare_metric("n", ValueSource::column(1), Tier::Extended)
            .unwrap();
        report
    }

    #[test]
    fn test_simple_control_break() {
        let mut report = letter_report();
        let output = report
            .feed_batch(rows(&[("A", 1), ("A", 2), ("B", 1)]), true)
            .unwrap()
            .unwrap();

        assert_eq!(output, "H(A)F(A)H(B)F(B)");
        assert_eq!(report.sum("n", 0).unwrap(), Number::Int(4));
        assert_eq!(report.state(), State::Done);
    }

    #[test]
    fn test_footer_fires_before_next_header() {
        let mut report = letter_report();
        report.feed_row(Value::list(["A", "1"]), None).unwrap();
        report.feed_row(Value::list(["A", "2"]), None).unwrap();
        assert_eq!(report.output(), "H(A)");
        report.feed_row(Value::list(["B", "1"]), None).unwrap();
        assert_eq!(report.output(), "H(A)F(A)H(B)");
    }

    #[test]
    fn test_group_totals_visible_in_footer() {
        let mut report = Report::new();
        report
            .declare_group("letter", ValueSource::column(0))
            .unwrap()
            .on_footer(Action::callback(|report, inv| {
                Ok(format!(
                    "{}:{}/{} ",
                    inv.value(),
                    report.sum("n", LevelRef::Current)?,
                    report.row_count(0, LevelRef::Current)?
                ))
            }));
        report
            .declare_metric("n", ValueSource::column(1), Tier::Standard)
            .unwrap();
        report.on(
            Hook::TotalFooter,
            Action::callback(|report, _| Ok(format!("T:{}", report.sum("n", 0)?))),
        );

        let output = report
            .feed_batch(rows(&[("A", 1), ("A", 2), ("B", 5)]), true)
            .unwrap()
            .unwrap();
        assert_eq!(output, "A:3/2 B:5/1 T:8");
    }

    #[test]
    fn test_footer_sees_previous_row() {
        let mut report = Report::new();
        report
            .declare_group("letter", ValueSource::column(0))
            .unwrap()
            .on_footer(Action::callback(|_, inv| {
                let row = inv.row.as_ref().map(|r| r.to_string()).unwrap_or_default();
                Ok(format!("{} ", row))
            }));
        report
            .feed_batch(rows(&[("A", 1), ("A", 2), ("B", 3)]), true)
            .unwrap();
        assert_eq!(report.output(), "[A, 2] [B, 3] ");
    }

    #[test]
    fn test_no_data() {
        let mut report = Report::new();
        report.on(Hook::Init, "init ");
        report.on(Hook::TotalHeader, "header ");
        report.on(Hook::NoData, "empty ");
        report.on(Hook::TotalFooter, "footer ");
        report.on(Hook::Close, "close");
        let output = report.finalize().unwrap();
        assert_eq!(output, "init header empty close");
    }

    #[test]
    fn test_finalize_twice_returns_same_output() {
        let calls = Rc::new(RefCell::new(0));
        let counter = Rc::clone(&calls);
        let mut report = letter_report();
        report.on(
            Hook::Close,
            Action::callback(move |_, _| {
                *counter.borrow_mut() += 1;
                Ok(String::new())
            }),
        );
        report.feed_batch(rows(&[("A", 1)]), false).unwrap();
        let first = report.finalize().unwrap();
        let second = report.finalize().unwrap();
        assert_eq!(first, second);
        assert_eq!(*calls.borrow(), 1);
    }

    #[test]
    fn test_feed_after_finalize_is_error() {
        let mut report = letter_report();
        report.finalize().unwrap();
        assert!(matches!(
            report.feed_row(Value::list(["A", "1"]), None),
            Err(ReportError::Finalized)
        ));
    }

    #[test]
    fn test_declare_after_start_is_error() {
        let mut report = letter_report();
        report.feed_row(Value::list(["A", "1"]), None).unwrap();
        assert!(matches!(
            report.declare_group("late", ValueSource::column(2)),
            Err(ReportError::AlreadyStarted { .. })
        ));
        assert!(matches!(
            report.declare_metric("late", ValueSource::column(2), Tier::Minimal),
            Err(ReportError::AlreadyStarted { .. })
        ));
    }

    #[test]
    fn test_duplicate_metric_is_error() {
        let mut report = letter_report();
        assert!(matches!(
            report.declare_metric("n", ValueSource::column(1), Tier::Minimal),
            Err(ReportError::DuplicateKey { .. })
        ));
    }

    #[test]
    fn test_is_last_outside_footer_is_error() {
        let mut report = Report::new();
        report
            .declare_group("letter", ValueSource::column(0))
            .unwrap()
            .on_header(Action::callback(|report, _| {
                assert!(matches!(
                    report.is_last(),
                    Err(ReportError::InvalidContext { .. })
                ));
                Ok(String::new())
            }));
        report.feed_row(Value::list(["A"]), None).unwrap();
        assert!(report.is_last().is_err());
    }

    #[test]
    fn test_prototype_mode() {
        let config = ReportConfig {
            prototype: true,
            ..ReportConfig::default()
        };
        let mut report = Report::with_config(config);
        report
            .declare_group("letter", ValueSource::column(0))
            .unwrap();
        let output = report
            .feed_batch(vec![Value::list(["A"])], true)
            .unwrap()
            .unwrap();
        assert_eq!(
            output,
            "init\ntotal header\nheader 1: A\ndetail 0: [A]\nfooter 1: A\ntotal footer\nclose\n"
        );
    }

    #[test]
    fn test_scaled_config_uses_decimal_metrics() {
        let config = ReportConfig {
            scale: Some(2),
            ..ReportConfig::default()
        };
        let mut report = Report::with_config(config);
        report
            .declare_default_metric("amount", ValueSource::column(0))
            .unwrap();
        report
            .feed_batch(
                vec![
                    Value::list([Value::from(1)]),
                    Value::list([Value::from(20.0 / 3.0)]),
                    Value::list([Value::from(0)]),
                ],
                true,
            )
            .unwrap();
        assert_eq!(report.sum("amount", 0).unwrap().to_string(), "7.66");
        assert_eq!(
            report
                .aggregate("amount", Query::Avg, 0)
                .unwrap()
                .unwrap()
                .to_string(),
            "2.55"
        );
    }

    #[test]
    fn test_decimal_and_native_metrics_side_by_side() {
        let mut report = Report::new();
        report
            .declare_metric_with("money", ValueSource::column(0), Tier::Standard, Arithmetic::Decimal(2))
            .unwrap();
        report
            .declare_metric("raw", ValueSource::column(0), Tier::Standard)
            .unwrap();
        report
            .feed_batch(
                vec![Value::list([Value::from(0.1)]), Value::list([Value::from(0.2)])],
                true,
            )
            .unwrap();

        assert_eq!(report.sum("money", 0).unwrap().to_string(), "0.30");
        assert!(matches!(report.sum("raw", 0).unwrap(), Number::Float(_)));
        assert_eq!(
            report.aggregate("money", Query::Avg, 0).unwrap().unwrap().to_string(),
            "0.15"
        );
    }

    #[test]
    fn test_native_metric_overrides_configured_scale() {
        let config = ReportConfig {
            scale: Some(2),
            ..ReportConfig::default()
        };
        let mut report = Report::with_config(config);
        report
            .declare_metric("scaled", ValueSource::column(0), Tier::Minimal)
            .unwrap();
        report
            .declare_metric_with("count", ValueSource::column(0), Tier::Minimal, Arithmetic::Native)
            .unwrap();
        report
            .feed_batch(vec![Value::list([Value::from(3)]), Value::list([Value::from(4)])], true)
            .unwrap();

        assert_eq!(report.sum("scaled", 0).unwrap().to_string(), "7.00");
        assert_eq!(report.sum("count", 0).unwrap().to_string(), "7");
    }

    #[test]
    fn test_row_count_of_unknown_dimension() {
        let mut report = letter_report();
        report.finalize().unwrap();
        assert!(matches!(
            report.row_count(3, 0),
            Err(ReportError::UnknownDimension(3))
        ));
    }

    #[test]
    fn test_feed_csv_nulls_empty_cells() {
        let csv = "region,amount\nEU, 10\nEU,5\nUS,\n";
        let mut report = Report::new();
        report.declare_group("region", "region").unwrap();
        report
            .declare_metric("amount", "amount", Tier::Standard)
            .unwrap();
        let fed = report.feed_csv(Cursor::new(csv)).unwrap();
        report.finalize().unwrap();

        assert_eq!(fed, 3);
        assert_eq!(report.sum("amount", 0).unwrap(), Number::Int(15));
        assert_eq!(
            report.aggregate("amount", Query::Count, 0).unwrap(),
            Some(Number::Int(2))
        );
        assert_eq!(report.row_count(0, 0).unwrap(), 3);
    }
}
