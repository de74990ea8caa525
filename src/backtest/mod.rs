//! Running context for an event-driven backtest
//!
//! The loop dequeues events in timestamp order and works through one timestamp at a time:
//! process every external event with the current timestamp, give the strategy its single chance
//! to trade, process the trades it produced at the same timestamp, then snapshot history. The
//! clock never goes backwards and strategy trades never leak into the next timestamp because
//! the queue is stable and the timestamp batch is drained on both sides of the strategy call.
//!
//! Errors inside event processing abort the run and surface to the caller; nothing is caught.

use std::collections::HashMap;

use log::debug;

use crate::clock::DateTime;
use crate::error::Result;
use crate::event::{Event, EventsQueue};
use crate::history::History;
use crate::trade::{Trade, TradePipeline};

/// What a strategy sees when it is asked to trade: the current timestamp and the indicator
/// state after all external events for that timestamp were applied.
pub struct StrategyCtx<'a> {
    datetime: DateTime,
    indicators: &'a HashMap<String, f64>,
}

impl StrategyCtx<'_> {
    pub fn datetime(&self) -> DateTime {
        self.datetime
    }

    pub fn get_indicator(&self, name: &str) -> Option<f64> {
        self.indicators.get(name).copied()
    }
}

/// A user-supplied generator of trades, consulted exactly once per timestamp.
///
/// Returning an empty vector means no trades. The returned trades are enqueued at the current
/// timestamp, in order, and run through the pipeline before the clock advances.
pub trait Strategy {
    fn generate_trades(&mut self, ctx: &StrategyCtx) -> Vec<Trade>;
}

pub struct Backtest {
    queue: EventsQueue,
    indicators: HashMap<String, f64>,
    datetime: Option<DateTime>,
    strategy: Option<Box<dyn Strategy>>,
    pipeline: TradePipeline,
    history: Option<History>,
    record_history: bool,
}

impl Backtest {
    pub fn new() -> Self {
        Self {
            queue: EventsQueue::new(),
            indicators: HashMap::new(),
            datetime: None,
            strategy: None,
            pipeline: TradePipeline::new(),
            history: None,
            record_history: true,
        }
    }

    pub fn with_strategy(strategy: Box<dyn Strategy>) -> Self {
        let mut backtest = Self::new();
        backtest.strategy = Some(strategy);
        backtest
    }

    pub fn set_strategy(&mut self, strategy: Box<dyn Strategy>) {
        self.strategy = Some(strategy);
    }

    /// Attach a [History] that will receive one snapshot per timestamp during [Backtest::run].
    pub fn set_history(&mut self, history: History) {
        self.history = Some(history);
    }

    pub fn history(&self) -> Option<&History> {
        self.history.as_ref()
    }

    pub fn take_history(&mut self) -> Option<History> {
        self.history.take()
    }

    /// Turning recording off leaves any attached [History] untouched during the run.
    pub fn set_record_history(&mut self, record_history: bool) {
        self.record_history = record_history;
    }

    /// Non-blocking enqueue; usable before the run and from inside it.
    pub fn load_event(&mut self, event: Event) {
        self.queue.put(event);
    }

    pub fn num_events_loaded(&self) -> usize {
        self.queue.len()
    }

    /// The timestamp of the event processed most recently; `None` before the first dequeue.
    pub fn datetime(&self) -> Option<DateTime> {
        self.datetime
    }

    pub fn get_indicator(&self, name: &str) -> Option<f64> {
        self.indicators.get(name).copied()
    }

    pub fn set_indicator(&mut self, name: &str, value: f64) {
        self.indicators.insert(name.to_string(), value);
    }

    pub fn indicators(&self) -> &HashMap<String, f64> {
        &self.indicators
    }

    pub(crate) fn pipeline(&self) -> &TradePipeline {
        &self.pipeline
    }

    /// Process all events in the queue with the same timestamp, then run the strategy, then
    /// process the trades it produced, then snapshot. Repeat until the queue is empty.
    pub fn run(&mut self) -> Result<()> {
        while !self.queue.is_empty() {
            self.process_next_event()?;
            self.process_events_for_current_datetime()?;
            self.run_strategy();
            self.process_events_for_current_datetime()?;
            self.take_history_snapshot();
        }
        Ok(())
    }

    fn process_next_event(&mut self) -> Result<()> {
        if let Some((datetime, mut event)) = self.queue.pop() {
            self.datetime = Some(datetime);
            debug!("BACKTEST: processing event at {}", i64::from(datetime));
            event.process(self)?;
        }
        Ok(())
    }

    fn process_events_for_current_datetime(&mut self) -> Result<()> {
        while self.queue.peek_datetime().is_some() && self.queue.peek_datetime() == self.datetime {
            self.process_next_event()?;
        }
        Ok(())
    }

    //The strategy runs once per timestamp, after all external events for that timestamp have
    //been applied. Its trades inherit the current timestamp so they execute before the clock
    //advances.
    fn run_strategy(&mut self) {
        let Some(datetime) = self.datetime else {
            return;
        };
        let Some(mut strategy) = self.strategy.take() else {
            return;
        };
        let trades = {
            let ctx = StrategyCtx {
                datetime,
                indicators: &self.indicators,
            };
            strategy.generate_trades(&ctx)
        };
        self.strategy = Some(strategy);
        for trade in trades {
            self.queue.put(Event::trade(datetime, trade));
        }
    }

    fn take_history_snapshot(&mut self) {
        if !self.record_history {
            return;
        }
        let Some(datetime) = self.datetime else {
            return;
        };
        if let Some(history) = self.history.as_mut() {
            history.take_snapshot(datetime, &self.indicators);
        }
    }
}

impl Default for Backtest {
    fn default() -> Self {
        Self::new()
    }
}
