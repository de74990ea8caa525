//! Timestamped, one-shot actions applied to the world
//!
//! Events validate their value at construction and fail fast; a constructed event is applied
//! exactly once through [Event::process], which delegates to the variant's effect and marks the
//! event processed. The queue is a min-priority queue on the timestamp that preserves insertion
//! order for equal timestamps, which is what makes the loop's tie-break rules hold.

use std::collections::BinaryHeap;

use crate::asset::Asset;
use crate::backtest::Backtest;
use crate::clock::DateTime;
use crate::error::{Error, Result};
use crate::fx::FxRate;
use crate::trade::{ProposedTrade, Trade};

pub enum EventKind {
    AssetPrice { asset: Asset, value: f64 },
    FxRate { fx: FxRate, value: f64 },
    Indicator { name: String, value: f64 },
    Trade(Trade),
    ProposedTrade(ProposedTrade),
}

pub struct Event {
    datetime: DateTime,
    kind: EventKind,
    processed: bool,
}

impl Event {
    /// A price observation for a variable-price asset. The value must be finite and >= 0.
    pub fn asset_price(asset: &Asset, datetime: DateTime, value: f64) -> Result<Event> {
        if !value.is_finite() {
            return Err(Error::type_mismatch("expecting numeric value"));
        }
        if value < 0.0 {
            return Err(Error::domain_violation("price must be >= 0"));
        }
        if asset.is_cash() {
            return Err(Error::type_mismatch("cash does not take price events"));
        }
        Ok(Event {
            datetime,
            kind: EventKind::AssetPrice {
                asset: asset.clone(),
                value,
            },
            processed: false,
        })
    }

    /// A rate observation for an FX pair. The value must be finite and > 0.
    pub fn fx_rate(fx: &FxRate, datetime: DateTime, value: f64) -> Result<Event> {
        if !value.is_finite() {
            return Err(Error::type_mismatch("expecting numeric value"));
        }
        if value <= 0.0 {
            return Err(Error::domain_violation("FX rate must be > 0"));
        }
        Ok(Event {
            datetime,
            kind: EventKind::FxRate {
                fx: fx.clone(),
                value,
            },
            processed: false,
        })
    }

    /// A named indicator observation, stored on the backtest when processed.
    pub fn indicator(name: impl Into<String>, datetime: DateTime, value: f64) -> Result<Event> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(Error::domain_violation("indicator name must be nonempty"));
        }
        Ok(Event {
            datetime,
            kind: EventKind::Indicator { name, value },
            processed: false,
        })
    }

    /// An indicator observation checked against a caller-supplied predicate at construction.
    pub fn indicator_with_validation(
        name: impl Into<String>,
        datetime: DateTime,
        value: f64,
        validate: impl Fn(f64) -> bool,
    ) -> Result<Event> {
        if !validate(value) {
            return Err(Error::domain_violation(format!(
                "indicator value {value} failed validation"
            )));
        }
        Self::indicator(name, datetime, value)
    }

    /// A trade to run through the pipeline at `datetime`.
    pub fn trade(datetime: DateTime, trade: Trade) -> Event {
        Event {
            datetime,
            kind: EventKind::Trade(trade),
            processed: false,
        }
    }

    /// Reserved: carries a [ProposedTrade] through the queue with no persistent effect.
    pub fn proposed_trade(datetime: DateTime, proposed: ProposedTrade) -> Event {
        Event {
            datetime,
            kind: EventKind::ProposedTrade(proposed),
            processed: false,
        }
    }

    pub fn datetime(&self) -> DateTime {
        self.datetime
    }

    pub fn kind(&self) -> &EventKind {
        &self.kind
    }

    pub fn processed(&self) -> bool {
        self.processed
    }

    /// Apply the event's effect. Fails if the event was already processed; the processed flag
    /// is only set once the effect succeeded.
    pub fn process(&mut self, backtest: &mut Backtest) -> Result<()> {
        if self.processed {
            return Err(Error::lifecycle_violation("event has already been processed"));
        }
        match &mut self.kind {
            EventKind::AssetPrice { asset, value } => asset.set_price(Some(*value))?,
            EventKind::FxRate { fx, value } => fx.set_rate(Some(*value))?,
            EventKind::Indicator { name, value } => {
                let name = name.clone();
                let value = *value;
                backtest.set_indicator(&name, value);
            }
            EventKind::Trade(trade) => backtest.pipeline().run(trade)?,
            EventKind::ProposedTrade(_proposed) => {}
        }
        self.processed = true;
        Ok(())
    }
}

struct QueuedEvent {
    seq: u64,
    event: Event,
}

impl PartialEq for QueuedEvent {
    fn eq(&self, other: &Self) -> bool {
        self.event.datetime() == other.event.datetime() && self.seq == other.seq
    }
}

impl Eq for QueuedEvent {}

impl PartialOrd for QueuedEvent {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for QueuedEvent {
    //Reversed so the BinaryHeap pops the smallest timestamp; the monotone sequence number
    //keeps equal timestamps in insertion order.
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        other
            .event
            .datetime()
            .cmp(&self.event.datetime())
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

/// A stable min-priority queue of events keyed on timestamp.
pub struct EventsQueue {
    heap: BinaryHeap<QueuedEvent>,
    counter: u64,
}

impl EventsQueue {
    pub fn new() -> Self {
        Self {
            heap: BinaryHeap::new(),
            counter: 0,
        }
    }

    pub fn put(&mut self, event: Event) {
        let seq = self.counter;
        self.counter += 1;
        self.heap.push(QueuedEvent { seq, event });
    }

    pub fn pop(&mut self) -> Option<(DateTime, Event)> {
        self.heap
            .pop()
            .map(|queued| (queued.event.datetime(), queued.event))
    }

    /// The timestamp of the next event, or `None` when the queue is empty.
    pub fn peek_datetime(&self) -> Option<DateTime> {
        self.heap.peek().map(|queued| queued.event.datetime())
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }
}

impl Default for EventsQueue {
    fn default() -> Self {
        Self::new()
    }
}
