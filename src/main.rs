//! Control Break CLI
//!
//! Reads a CSV file that is sorted by the group columns and prints one
//! summary line per closed group plus a grand total.
//!
//! # Usage
//!
//! ```bash
//! cargo run -- sales.csv region,customer amount > summary.csv
//! ```
//!
//! # Environment Variables
//!
//! - `RUST_LOG`: Set to `debug` or `trace` to follow group changes

use control_break::{
    Action, Hook, LevelRef, Query, Report, ReportConfig, ReportError, Result, Tier,
};
use csv::{ReaderBuilder, Trim, Writer};
use serde::Serialize;
use std::cell::RefCell;
use std::env;
use std::fs::File;
use std::io::{self, BufReader};
use std::process;
use std::rc::Rc;

const SCALE: u32 = 4;

/// One output line of the summary.
#[derive(Debug, Serialize)]
struct SummaryRecord {
    level: usize,
    group: String,
    value: String,
    rows: u64,
    sum: String,
    avg: String,
    min: String,
    max: String,
}

type Summaries = Rc<RefCell<Vec<SummaryRecord>>>;

fn main() {
    env_logger::init();

    if let Err(e) = run() {
        eprintln!("Error: {}", e);
        process::exit(1);
    }
}

fn run() -> Result<()> {
    let args: Vec<String> = env::args().collect();
    if args.len() < 4 {
        return Err(ReportError::MissingArgument);
    }

    let input_path = &args[1];
    let group_columns: Vec<&str> = args[2]
        .split(',')
        .map(str::trim)
        .filter(|c| !c.is_empty())
        .collect();
    let metric_column = args[3].trim();

    check_columns(input_path, group_columns.iter().copied().chain([metric_column]))?;

    let summaries: Summaries = Rc::new(RefCell::new(Vec::new()));
    let mut report = build_report(&group_columns, metric_column, &summaries)?;

    let file = File::open(input_path)?;
    report.feed_csv(BufReader::new(file))?;
    report.finalize()?;

    let stdout = io::stdout();
    let mut writer = Writer::from_writer(stdout.lock());
    for record in summaries.borrow().iter() {
        writer.serialize(record)?;
    }
    writer.flush()?;

    Ok(())
}

/// Fails on the first requested column missing from the header row.
fn check_columns<'a>(path: &str, columns: impl IntoIterator<Item = &'a str>) -> Result<()> {
    let mut reader = ReaderBuilder::new()
        .trim(Trim::All)
        .from_reader(BufReader::new(File::open(path)?));
    let headers = reader.headers()?.clone();
    for column in columns {
        if !headers.iter().any(|h| h == column) {
            return Err(ReportError::UnknownColumn(column.to_string()));
        }
    }
    Ok(())
}

fn build_report(groups: &[&str], metric: &str, summaries: &Summaries) -> Result<Report> {
    let mut report = Report::with_config(ReportConfig {
        default_tier: Tier::Extended,
        scale: Some(SCALE),
        prototype: false,
    });

    for &column in groups {
        let sink = Rc::clone(summaries);
        let metric_name = metric.to_string();
        let group_name = column.to_string();
        report
            .declare_group(column, column)?
            .on_footer(Action::callback(move |report, inv| {
                let level = report.level();
                let record = summarize(report, &metric_name, level, &group_name, inv.value())?;
                sink.borrow_mut().push(record);
                Ok(String::new())
            }));
    }
    report.declare_default_metric(metric, metric)?;

    let sink = Rc::clone(summaries);
    let metric_name = metric.to_string();
    report.on(
        Hook::TotalFooter,
        Action::callback(move |report, _| {
            let record = summarize(report, &metric_name, 0, "total", String::new())?;
            sink.borrow_mut().push(record);
            Ok(String::new())
        }),
    );

    Ok(report)
}

fn summarize(
    report: &Report,
    metric: &str,
    level: usize,
    group: &str,
    value: String,
) -> Result<SummaryRecord> {
    let render = |query: Query| -> Result<String> {
        Ok(report
            .aggregate(metric, query, LevelRef::At(level))?
            .map(|n| n.to_string())
            .unwrap_or_default())
    };

    Ok(SummaryRecord {
        level,
        group: group.to_string(),
        value,
        rows: report.row_count(0, LevelRef::At(level))?,
        sum: render(Query::Sum)?,
        avg: render(Query::Avg)?,
        min: render(Query::Min)?,
        max: render(Query::Max)?,
    })
}
