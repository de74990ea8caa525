//! Trades and the compliance/execution pipeline
//!
//! A [Trade] is a proposed signed change in units of one asset for one portfolio. Before it can
//! touch the portfolio it runs through the pipeline: a compliance step that evaluates the
//! trade's hypothetical effect without persisting it, then an execution step that books it
//! through the portfolio's broker when the check passed.

use log::info;
use serde::{Deserialize, Serialize};

use crate::asset::Asset;
use crate::error::{Error, Result};
use crate::portfolio::Portfolio;

/// Where a trade is in its lifecycle. The pipeline drives Proposed through compliance into
/// Filled; PartiallyFilled and Cancelled are reserved for executions that can report them.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub enum TradeStatus {
    Proposed,
    FailedCompliance,
    PassedCompliance,
    SentForExecution,
    PartiallyFilled,
    Filled,
    Cancelled,
}

/// A proposed signed change in units of one asset for one portfolio.
///
/// Portfolio, asset and units are fixed at construction; `passed_compliance` and `status` are
/// written by the pipeline as the trade moves through it.
pub struct Trade {
    portfolio: Portfolio,
    asset: Asset,
    asset_code: String,
    units: i64,
    passed_compliance: bool,
    status: TradeStatus,
}

impl Trade {
    pub fn new(portfolio: &Portfolio, asset: &Asset, units: i64) -> Trade {
        Trade {
            portfolio: portfolio.clone(),
            asset: asset.clone(),
            asset_code: asset.code(),
            units,
            passed_compliance: false,
            status: TradeStatus::Proposed,
        }
    }

    /// Build a trade from an asset code, resolving the asset through the portfolio's world.
    pub fn from_code(portfolio: &Portfolio, asset_code: &str, units: i64) -> Result<Trade> {
        let asset = portfolio.world().asset(asset_code).ok_or_else(|| {
            Error::missing_resource(format!("asset code {asset_code} doesn't exist"))
        })?;
        Ok(Self::new(portfolio, &asset, units))
    }

    pub fn portfolio(&self) -> Portfolio {
        self.portfolio.clone()
    }

    pub fn asset(&self) -> Asset {
        self.asset.clone()
    }

    pub fn asset_code(&self) -> &str {
        &self.asset_code
    }

    pub fn units(&self) -> i64 {
        self.units
    }

    pub fn passed_compliance(&self) -> bool {
        self.passed_compliance
    }

    pub fn status(&self) -> TradeStatus {
        self.status
    }

    /// Book this trade through the portfolio's broker.
    pub fn execute(&self) -> Result<()> {
        let broker = self.portfolio.broker();
        broker.execute(self)
    }
}

/// Reserved: a trade identified by codes rather than live handles, for flows that propose
/// trades before the instruments exist.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct ProposedTrade {
    portfolio_code: String,
    asset_code: String,
    units: i64,
}

impl ProposedTrade {
    pub fn new(
        portfolio_code: impl Into<String>,
        asset_code: impl Into<String>,
        units: i64,
    ) -> Self {
        Self {
            portfolio_code: portfolio_code.into(),
            asset_code: asset_code.into(),
            units,
        }
    }

    pub fn portfolio_code(&self) -> &str {
        &self.portfolio_code
    }

    pub fn asset_code(&self) -> &str {
        &self.asset_code
    }

    pub fn units(&self) -> i64 {
        self.units
    }
}

/// One node in the pipeline.
pub trait TradeHandler {
    fn handle(&self, trade: &mut Trade) -> Result<()>;
}

/// Evaluates the trade as if executed, without making that effect persistent.
///
/// An empty compliance passes without touching the portfolio at all. Otherwise the portfolio is
/// saved, the trade is executed through the broker, the compliance composite is evaluated
/// against the resulting state, and the savepoint is restored before the verdict is written to
/// the trade. The restore runs even when the hypothetical execution fails.
pub struct ComplianceHandler;

impl TradeHandler for ComplianceHandler {
    fn handle(&self, trade: &mut Trade) -> Result<()> {
        let portfolio = trade.portfolio();
        let compliance = portfolio.compliance();
        if compliance.is_empty() {
            trade.passed_compliance = true;
            trade.status = TradeStatus::PassedCompliance;
            return Ok(());
        }

        let savepoint = portfolio.savepoint();
        let verdict = trade
            .execute()
            .and_then(|_| compliance.passes(&portfolio));
        portfolio.restore(savepoint)?;
        let passed = verdict?;

        trade.passed_compliance = passed;
        if passed {
            trade.status = TradeStatus::PassedCompliance;
        } else {
            trade.status = TradeStatus::FailedCompliance;
            info!(
                "PIPELINE: trade of {} units of {} failed compliance",
                trade.units(),
                trade.asset_code()
            );
        }
        Ok(())
    }
}

/// Books the trade through the portfolio's broker, but only when compliance passed.
pub struct ExecutionHandler;

impl TradeHandler for ExecutionHandler {
    fn handle(&self, trade: &mut Trade) -> Result<()> {
        if !trade.passed_compliance() {
            return Ok(());
        }
        trade.status = TradeStatus::SentForExecution;
        trade.execute()?;
        trade.status = TradeStatus::Filled;
        Ok(())
    }
}

/// The compliance-then-execution chain. State-free aside from its wiring; one pipeline serves
/// a whole backtest.
pub struct TradePipeline {
    handlers: Vec<Box<dyn TradeHandler>>,
}

impl TradePipeline {
    pub fn new() -> Self {
        Self {
            handlers: vec![Box::new(ComplianceHandler), Box::new(ExecutionHandler)],
        }
    }

    pub fn run(&self, trade: &mut Trade) -> Result<()> {
        for handler in &self.handlers {
            handler.handle(trade)?;
        }
        Ok(())
    }
}

impl Default for TradePipeline {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use std::rc::Rc;

    use super::{Trade, TradePipeline, TradeStatus};
    use crate::asset::Asset;
    use crate::compliance::{Compliance, UnitLimit};
    use crate::portfolio::Portfolio;
    use crate::world::World;

    fn setup() -> (World, Portfolio, Asset) {
        let world = World::new();
        let portfolio = Portfolio::new(&world, "AUD").unwrap();
        let aud = Asset::cash(&world, "AUD").unwrap();
        portfolio.transfer(&aud, 1000.0).unwrap();
        let stock = Asset::stock_with_price(&world, "ZZB AU", 2.50, "AUD").unwrap();
        (world, portfolio, stock)
    }

    #[test]
    fn test_that_trades_with_empty_compliance_fill() {
        let (_world, portfolio, stock) = setup();
        let pipeline = TradePipeline::new();

        let mut trade = Trade::new(&portfolio, &stock, 100);
        assert_eq!(trade.status(), TradeStatus::Proposed);
        pipeline.run(&mut trade).unwrap();

        assert!(trade.passed_compliance());
        assert_eq!(trade.status(), TradeStatus::Filled);
        assert_eq!(portfolio.get_holding_units("ZZB AU"), 100.0);
        assert_eq!(portfolio.get_holding_units("AUD"), 750.0);
    }

    #[test]
    fn test_that_failed_compliance_blocks_execution() {
        let (_world, portfolio, stock) = setup();
        let pipeline = TradePipeline::new();
        portfolio
            .set_compliance(Compliance::new().with_rule(Rc::new(UnitLimit::new(&stock, 50))));

        let mut trade = Trade::new(&portfolio, &stock, 100);
        pipeline.run(&mut trade).unwrap();

        assert!(!trade.passed_compliance());
        assert_eq!(trade.status(), TradeStatus::FailedCompliance);
        assert_eq!(portfolio.get_holding_units("ZZB AU"), 0.0);
        assert_eq!(portfolio.get_holding_units("AUD"), 1000.0);
    }

    #[test]
    fn test_that_the_compliance_check_leaves_no_trace() {
        let (_world, portfolio, stock) = setup();
        let pipeline = TradePipeline::new();
        portfolio
            .set_compliance(Compliance::new().with_rule(Rc::new(UnitLimit::new(&stock, 50))));

        let value_before = portfolio.value();
        let mut trade = Trade::new(&portfolio, &stock, 100);
        pipeline.run(&mut trade).unwrap();

        //Holdings, cached value and the observer edge all match the pre-call state
        assert_eq!(portfolio.value(), value_before);
        assert_eq!(portfolio.get_holding_units("ZZB AU"), 0.0);
        assert_eq!(stock.observer_count(), 0);
    }

    #[test]
    fn test_that_passing_trades_execute_exactly_once() {
        let (_world, portfolio, stock) = setup();
        let pipeline = TradePipeline::new();
        portfolio
            .set_compliance(Compliance::new().with_rule(Rc::new(UnitLimit::new(&stock, 100))));

        let mut trade = Trade::new(&portfolio, &stock, 100);
        pipeline.run(&mut trade).unwrap();

        assert!(trade.passed_compliance());
        assert_eq!(trade.status(), TradeStatus::Filled);
        //The hypothetical execution was rolled back, only the real one persists
        assert_eq!(portfolio.get_holding_units("ZZB AU"), 100.0);
        assert_eq!(portfolio.get_holding_units("AUD"), 750.0);
        assert_eq!(stock.observer_count(), 1);
    }

    #[test]
    fn test_that_trades_resolve_assets_by_code() {
        let (_world, portfolio, _stock) = setup();
        let trade = Trade::from_code(&portfolio, "ZZB AU", 10).unwrap();
        assert_eq!(trade.asset_code(), "ZZB AU");
        assert!(Trade::from_code(&portfolio, "MISSING", 10).is_err());
    }
}
