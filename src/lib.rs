//! # How does Staffa work?
//!
//! The development goal is to provide a simple and flexible event-driven backtesting library
//! with support for multi-currency portfolios.
//!
//! A backtest is composed of a [world::World] holding the named instruments, a queue of
//! timestamped events, and a user-provided [backtest::Strategy]. Price and rate events mutate
//! assets and FX pairs; portfolios subscribe to the instruments they hold and revalue
//! themselves synchronously on every change, so the portfolio value is always consistent with
//! the last event applied. Trades produced by the strategy run through a compliance and
//! execution pipeline that can reject them without leaving any trace on the portfolio.
//!
//! ## Execution
//!
//! The engine is single-threaded and cooperative. The only scheduling is the events queue:
//! events are processed strictly in timestamp order, and events with the same timestamp in the
//! order they were loaded. Within one timestamp the ordering is: all externally-loaded events,
//! then one strategy invocation, then the trades the strategy produced, then one history
//! snapshot. Strategy trades are deliberately executed at the same timestamp that triggered
//! them rather than the next one; the queue is drained on both sides of the strategy call to
//! guarantee this.
//!
//! Because valuation is driven by the observable graph rather than polled, a price change
//! recomputes exactly the portfolios that depend on it, once per change.
//!
//! ## Compliance
//!
//! Compliance rules are evaluated against the portfolio as if the trade had been executed.
//! The engine takes a savepoint of the portfolio, books the trade through the broker, asks the
//! rules for a verdict and rolls the portfolio back, holdings, cached value and subscriptions
//! alike. Only a trade that passed is executed for real.
//!
//! ## Example
//!
//! A buy-and-hold backtest over three daily closes:
//!
//! ```
//!     use std::rc::Rc;
//!
//!     use staffa::asset::Asset;
//!     use staffa::backtest::{Backtest, Strategy, StrategyCtx};
//!     use staffa::compliance::{Compliance, UnitLimit};
//!     use staffa::event::Event;
//!     use staffa::portfolio::Portfolio;
//!     use staffa::trade::Trade;
//!     use staffa::world::World;
//!
//!     struct BuyAndHold {
//!         portfolio: Portfolio,
//!         stock: Asset,
//!     }
//!
//!     impl Strategy for BuyAndHold {
//!         fn generate_trades(&mut self, _ctx: &StrategyCtx) -> Vec<Trade> {
//!             vec![Trade::new(&self.portfolio, &self.stock, 1)]
//!         }
//!     }
//!
//!     let world = World::new();
//!     let portfolio = Portfolio::new(&world, "AUD").unwrap();
//!     let stock = Asset::stock_with_price(&world, "ZZB AU", 2.50, "AUD").unwrap();
//!     portfolio.set_compliance(Compliance::new().with_rule(Rc::new(UnitLimit::new(&stock, 5))));
//!
//!     let mut backtest = Backtest::with_strategy(Box::new(BuyAndHold {
//!         portfolio: portfolio.clone(),
//!         stock: stock.clone(),
//!     }));
//!     for (date, price) in [(1, 2.50), (2, 2.60), (3, 2.70)] {
//!         backtest.load_event(Event::asset_price(&stock, date.into(), price).unwrap());
//!     }
//!     backtest.run().unwrap();
//!
//!     assert_eq!(portfolio.get_holding_units("ZZB AU"), 3.0);
//!     assert_eq!(portfolio.get_holding_units("AUD"), -(2.50 + 2.60 + 2.70));
//! ```
//!
//! ## Data
//!
//! Historical series are loaded through [input::Frame], a small time-indexed table that can be
//! built in memory or read from CSV, and [input::load_frame_events] which turns one column into
//! price, rate or indicator events. Loaders run before the backtest or interleave with it;
//! loading is a non-blocking enqueue either way.
//!
//! # Missing features that you may expect
//!
//! * Order types beyond fill-at-last (limits, stops)
//! * Corporate events such as dividends
//! * Margin and borrow costs for short positions

pub mod asset;
pub mod backtest;
pub mod broker;
pub mod clock;
pub mod compliance;
pub mod error;
pub mod event;
pub mod fx;
pub mod history;
pub mod input;
pub mod observable;
pub mod portfolio;
pub mod trade;
pub mod world;
