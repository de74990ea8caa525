//! Loading historical series into the events queue
//!
//! External data enters the engine as a [Frame]: a time-indexed table of named numeric columns,
//! built programmatically or read from CSV. [load_frame_events] walks one column in index order
//! and enqueues the matching event variant on the backtest. Every event is constructed, and
//! therefore validated, before the first one is enqueued, so a bad row loads nothing.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::Path;

use rand::thread_rng;
use rand_distr::{Distribution, Uniform};

use crate::asset::Asset;
use crate::backtest::Backtest;
use crate::clock::DateTime;
use crate::error::{Error, Result};
use crate::event::Event;
use crate::fx::FxRate;

/// A time-indexed table of named numeric columns.
#[derive(Clone, Debug, Default)]
pub struct Frame {
    rows: BTreeMap<i64, HashMap<String, f64>>,
    columns: HashSet<String>,
}

impl Frame {
    pub fn new() -> Self {
        Self {
            rows: BTreeMap::new(),
            columns: HashSet::new(),
        }
    }

    pub fn add_value(&mut self, datetime: DateTime, column: impl Into<String>, value: f64) {
        let column = column.into();
        self.columns.insert(column.clone());
        self.rows
            .entry(i64::from(datetime))
            .or_default()
            .insert(column, value);
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.columns.contains(name)
    }

    /// One column in index order, skipping rows without a value for it.
    pub fn column(&self, name: &str) -> Vec<(DateTime, f64)> {
        self.rows
            .iter()
            .filter_map(|(datetime, row)| {
                row.get(name).map(|value| (DateTime::from(*datetime), *value))
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Read a CSV file with a date column parsed by `date_fmt` (for example
    /// `"[year]-[month]-[day]"`); every other column is numeric. Empty cells are skipped.
    pub fn from_csv_path(path: &Path, date_column: &str, date_fmt: &str) -> Result<Frame> {
        let mut reader = csv::Reader::from_path(path)
            .map_err(|err| Error::missing_resource(err.to_string()))?;
        let headers = reader
            .headers()
            .map_err(|err| Error::domain_violation(err.to_string()))?
            .clone();
        let date_position = headers
            .iter()
            .position(|header| header == date_column)
            .ok_or_else(|| {
                Error::missing_resource(format!("no {date_column} column in csv"))
            })?;

        let mut frame = Frame::new();
        for record in reader.records() {
            let record = record.map_err(|err| Error::domain_violation(err.to_string()))?;
            let date_cell = record.get(date_position).ok_or_else(|| {
                Error::domain_violation("csv row is missing its date cell".to_string())
            })?;
            let datetime = DateTime::from_date_string(date_cell, date_fmt)?;
            for (position, header) in headers.iter().enumerate() {
                if position == date_position {
                    continue;
                }
                let Some(cell) = record.get(position) else {
                    continue;
                };
                if cell.trim().is_empty() {
                    continue;
                }
                let value: f64 = cell.trim().parse().map_err(|_| {
                    Error::type_mismatch(format!("expecting numeric value in column {header}"))
                })?;
                frame.add_value(datetime, header, value);
            }
        }
        Ok(frame)
    }
}

/// Which event variant a frame column loads as.
pub enum FrameTarget {
    AssetPrice(Asset),
    FxRate(FxRate),
    Indicator(String),
}

/// Enqueue one event per row of `column`, in index order, at the row's timestamp.
///
/// Returns the number of events loaded. A missing column, or any row that fails the variant's
/// validation, fails before a single event is enqueued.
pub fn load_frame_events(
    target: FrameTarget,
    frame: &Frame,
    column: &str,
    backtest: &mut Backtest,
) -> Result<usize> {
    if frame.is_empty() {
        return Ok(0);
    }
    if !frame.has_column(column) {
        return Err(Error::missing_resource(format!(
            "no {column} column in frame"
        )));
    }

    let mut events = Vec::new();
    for (datetime, value) in frame.column(column) {
        let event = match &target {
            FrameTarget::AssetPrice(asset) => Event::asset_price(asset, datetime, value)?,
            FrameTarget::FxRate(fx) => Event::fx_rate(fx, datetime, value)?,
            FrameTarget::Indicator(name) => Event::indicator(name.clone(), datetime, value)?,
        };
        events.push(event);
    }

    let loaded = events.len();
    for event in events {
        backtest.load_event(event);
    }
    Ok(loaded)
}

/// A uniformly random price series, useful for demos and benchmarks.
pub fn random_price_frame(column: &str, start: DateTime, length: i64) -> Frame {
    let price_dist = Uniform::new(90.0, 100.0);
    let mut rng = thread_rng();

    let mut frame = Frame::new();
    for offset in 0..length {
        frame.add_value(
            DateTime::from(*start + offset),
            column,
            price_dist.sample(&mut rng),
        );
    }
    frame
}
