use std::rc::Rc;

use anyhow::Result;

use staffa::asset::Asset;
use staffa::backtest::{Backtest, Strategy, StrategyCtx};
use staffa::clock::DateTime;
use staffa::compliance::{Compliance, UnitLimit};
use staffa::event::Event;
use staffa::history::History;
use staffa::portfolio::Portfolio;
use staffa::trade::Trade;
use staffa::world::World;

/// Continue to buy one share of 'ZZB AU'.
struct BasicStrategy {
    portfolio: Portfolio,
    stock: Asset,
}

impl Strategy for BasicStrategy {
    fn generate_trades(&mut self, _ctx: &StrategyCtx) -> Vec<Trade> {
        vec![Trade::new(&self.portfolio, &self.stock, 1)]
    }
}

fn main() -> Result<()> {
    env_logger::init();

    let world = World::new();
    let portfolio = Portfolio::new_with_code(&world, "AUD", "Portfolio")?;
    let stock = Asset::stock_with_price(&world, "ZZB AU", 2.50, "AUD")?;
    portfolio.set_compliance(Compliance::new().with_rule(Rc::new(UnitLimit::new(&stock, 5))));

    let mut backtest = Backtest::with_strategy(Box::new(BasicStrategy {
        portfolio: portfolio.clone(),
        stock: stock.clone(),
    }));
    backtest.set_history(History::single(&world, portfolio.clone())?);

    let date_fmt = "[year]-[month]-[day]";
    for (date, price) in [
        ("2020-09-01", 2.50),
        ("2020-09-02", 2.60),
        ("2020-09-03", 2.70),
    ] {
        let datetime = DateTime::from_date_string(date, date_fmt)?;
        backtest.load_event(Event::asset_price(&stock, datetime, price)?);
    }

    backtest.run()?;

    println!("ZZB AU units: {}", portfolio.get_holding_units("ZZB AU"));
    println!("AUD units: {}", portfolio.get_holding_units("AUD"));
    println!("portfolio value: {:.2}", portfolio.value());
    if let Some(history) = backtest.history() {
        println!("history: {}", serde_json::to_string_pretty(history.rows())?);
    }
    Ok(())
}
