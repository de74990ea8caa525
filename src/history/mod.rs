//! Time-indexed snapshots of the simulated world
//!
//! One row per timestamp: the local value of every live asset, the rate of every live FX pair,
//! and for each watched portfolio its value and its units in every live asset, plus the current
//! indicator readings. The rows are plain maps keyed by column name, so they serialize directly
//! with serde for reporting.

use std::collections::{BTreeMap, HashMap};

use crate::clock::DateTime;
use crate::error::{Error, Result};
use crate::portfolio::Portfolio;
use crate::world::World;

pub type HistoryRow = HashMap<String, f64>;

/// Snapshot recorder over a set of watched portfolios.
pub struct History {
    world: World,
    portfolios: Vec<Portfolio>,
    rows: BTreeMap<i64, HistoryRow>,
}

impl History {
    /// Watch `portfolios`; every watched portfolio needs a registered code to name its columns.
    pub fn new(world: &World, portfolios: Vec<Portfolio>) -> Result<History> {
        for portfolio in &portfolios {
            if portfolio.code().is_none() {
                return Err(Error::missing_resource(
                    "watched portfolios must have a code",
                ));
            }
        }
        Ok(History {
            world: world.clone(),
            portfolios,
            rows: BTreeMap::new(),
        })
    }

    pub fn single(world: &World, portfolio: Portfolio) -> Result<History> {
        Self::new(world, vec![portfolio])
    }

    /// Record one row for `datetime`. Assets without a price and pairs without a rate are
    /// skipped rather than recorded as anything.
    pub fn take_snapshot(&mut self, datetime: DateTime, indicators: &HashMap<String, f64>) {
        let mut row = HistoryRow::new();

        for asset in self.world.live_assets() {
            if let Some(local_value) = asset.local_value() {
                row.insert(asset.code(), local_value);
            }
        }

        for fx in self.world.live_fx_rates() {
            if let Some(rate) = fx.rate() {
                row.insert(fx.pair(), rate);
            }
        }

        for portfolio in &self.portfolios {
            //Checked at construction
            let Some(code) = portfolio.code() else {
                continue;
            };
            row.insert(code.clone(), portfolio.value());
            for asset in self.world.live_assets() {
                let asset_code = asset.code();
                row.insert(
                    format!("{code}_{asset_code}"),
                    portfolio.get_holding_units(&asset_code),
                );
            }
        }

        for (name, value) in indicators {
            row.insert(name.clone(), *value);
        }

        self.rows.insert(i64::from(datetime), row);
    }

    pub fn rows(&self) -> &BTreeMap<i64, HistoryRow> {
        &self.rows
    }

    pub fn row(&self, datetime: DateTime) -> Option<&HistoryRow> {
        self.rows.get(&i64::from(datetime))
    }

    /// One column as a time series, skipping rows where the column is absent.
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
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::History;
    use crate::asset::Asset;
    use crate::portfolio::Portfolio;
    use crate::world::World;

    struct Fixture {
        world: World,
        portfolio: Portfolio,
        benchmark: Portfolio,
        stock: Asset,
    }

    fn setup() -> Fixture {
        let world = World::new();
        let portfolio = Portfolio::new_with_code(&world, "AUD", "Portfolio").unwrap();
        let benchmark = Portfolio::new_with_code(&world, "AUD", "Benchmark").unwrap();
        let cash = Asset::cash(&world, "AUD").unwrap();
        let stock = Asset::stock_in_currency(&world, "ZZB", "AUD").unwrap();
        stock.set_price(Some(0.0)).unwrap();

        portfolio.transfer(&cash, 1000.0).unwrap();
        benchmark.transfer(&cash, 2000.0).unwrap();
        portfolio.transfer(&stock, 100.0).unwrap();
        Fixture {
            world,
            portfolio,
            benchmark,
            stock,
        }
    }

    #[test]
    fn test_that_new_history_is_empty() {
        let fixture = setup();
        let history =
            History::new(&fixture.world, vec![fixture.portfolio, fixture.benchmark]).unwrap();
        assert!(history.is_empty());
    }

    #[test]
    fn test_that_snapshots_record_values_units_and_prices() {
        let fixture = setup();
        let mut history = History::new(
            &fixture.world,
            vec![fixture.portfolio.clone(), fixture.benchmark.clone()],
        )
        .unwrap();

        history.take_snapshot(100.into(), &HashMap::new());
        let row = history.row(100.into()).unwrap();
        assert_eq!(row["PORTFOLIO"], 1000.0);
        assert_eq!(row["BENCHMARK"], 2000.0);
        assert_eq!(row["ZZB"], 0.0);
        assert_eq!(row["AUD"], 1.0);
        assert_eq!(row["PORTFOLIO_AUD"], 1000.0);
        assert_eq!(row["BENCHMARK_AUD"], 2000.0);
        assert_eq!(row["PORTFOLIO_ZZB"], 100.0);
        assert_eq!(row["BENCHMARK_ZZB"], 0.0);

        fixture.stock.set_price(Some(20.0)).unwrap();
        history.take_snapshot(101.into(), &HashMap::new());
        let row = history.row(101.into()).unwrap();
        assert_eq!(row["PORTFOLIO"], 3000.0);
        assert_eq!(row["BENCHMARK"], 2000.0);
        assert_eq!(row["ZZB"], 20.0);
        assert_eq!(history.len(), 2);
    }

    #[test]
    fn test_that_unpriced_assets_are_skipped() {
        let fixture = setup();
        let unpriced = Asset::stock_in_currency(&fixture.world, "NOPX", "AUD").unwrap();
        let mut history = History::single(&fixture.world, fixture.benchmark.clone()).unwrap();

        history.take_snapshot(100.into(), &HashMap::new());
        let row = history.row(100.into()).unwrap();
        assert!(!row.contains_key("NOPX"));
        //Units columns still appear for unpriced assets
        assert_eq!(row["BENCHMARK_NOPX"], 0.0);
        drop(unpriced);
    }

    #[test]
    fn test_that_indicators_land_in_the_row() {
        let fixture = setup();
        let mut history = History::single(&fixture.world, fixture.portfolio.clone()).unwrap();
        let mut indicators = HashMap::new();
        indicators.insert("^VIX".to_string(), 25.85);

        history.take_snapshot(100.into(), &indicators);
        assert_eq!(history.row(100.into()).unwrap()["^VIX"], 25.85);
        assert_eq!(history.column("^VIX"), vec![(100.into(), 25.85)]);
    }

    #[test]
    fn test_that_portfolios_without_codes_are_rejected() {
        let fixture = setup();
        let nameless = Portfolio::new(&fixture.world, "AUD").unwrap();
        assert!(History::single(&fixture.world, nameless).is_err());
    }

    #[test]
    fn test_that_rows_serialize_for_reporting() {
        let fixture = setup();
        let mut history = History::single(&fixture.world, fixture.portfolio.clone()).unwrap();
        history.take_snapshot(100.into(), &HashMap::new());

        let json = serde_json::to_string(history.rows()).unwrap();
        assert!(json.contains("\"PORTFOLIO\""));
    }
}
