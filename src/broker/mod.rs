//! Materializes trades on a portfolio
//!
//! A broker is a pair of pluggable strategies: an [Execution] that books the trade and a
//! [Charges] that takes its fees. Charges are applied before execution so that a charge in a
//! third currency settles against the portfolio regardless of whether the fill succeeds at the
//! last price.
//!
//! The default broker fills at the last observed price with no charges.

use log::info;

use crate::error::{Error, Result};
use crate::trade::Trade;

/// Books a trade's units and cash legs on the portfolio.
pub trait Execution {
    fn execute(&self, trade: &Trade) -> Result<()>;
}

/// Takes the fees for a trade out of the portfolio.
pub trait Charges {
    fn charge(&self, trade: &Trade) -> Result<()>;
}

/// Fill the full trade at the asset's last observed price.
pub struct FillAtLast;

impl Execution for FillAtLast {
    fn execute(&self, trade: &Trade) -> Result<()> {
        trade
            .portfolio()
            .trade(&trade.asset(), trade.units() as f64, None)
    }
}

/// Fill at the last observed price worsened by a fractional slippage: receive less when
/// selling, pay more when buying.
pub struct FillAtLastWithSlippage {
    slippage: f64,
}

impl FillAtLastWithSlippage {
    pub fn new(slippage: f64) -> Result<Self> {
        if !slippage.is_finite() {
            return Err(Error::type_mismatch("expecting numeric value for slippage"));
        }
        if !(0.0..1.0).contains(&slippage) {
            return Err(Error::domain_violation(
                "expecting slippage between 0 and 1",
            ));
        }
        Ok(Self { slippage })
    }
}

impl Execution for FillAtLastWithSlippage {
    fn execute(&self, trade: &Trade) -> Result<()> {
        let asset = trade.asset();
        let units = trade.units() as f64;
        let local_value = asset.local_value().ok_or_else(|| {
            Error::missing_resource(format!("{} local value is undefined", asset.code()))
        })?;
        let mut consideration = -units * local_value;
        if consideration > 0.0 {
            //Receive less cash when selling
            consideration *= 1.0 - self.slippage;
        }
        if consideration < 0.0 {
            //Pay more cash when buying
            consideration *= 1.0 + self.slippage;
        }
        trade
            .portfolio()
            .trade(&asset, units, Some(consideration))
    }
}

/// No fees.
pub struct NoCharges;

impl Charges for NoCharges {
    fn charge(&self, _trade: &Trade) -> Result<()> {
        Ok(())
    }
}

/// A fixed amount plus a percentage of the traded value, charged in a fixed currency.
pub struct FixedRatePlusPercentage {
    fixed_amount: f64,
    percentage: f64,
    currency_code: String,
}

impl FixedRatePlusPercentage {
    pub fn new(fixed_amount: f64, percentage: f64, currency_code: &str) -> Result<Self> {
        if !fixed_amount.is_finite() {
            return Err(Error::type_mismatch("expecting numeric fixed amount"));
        }
        if !percentage.is_finite() {
            return Err(Error::type_mismatch("expecting numeric percentage"));
        }
        if fixed_amount < 0.0 {
            return Err(Error::domain_violation("charge amount should be >= 0"));
        }
        if percentage < 0.0 {
            return Err(Error::domain_violation("percentage charge should be >= 0"));
        }
        Ok(Self {
            fixed_amount,
            percentage,
            currency_code: crate::world::check_currency_code(currency_code)?,
        })
    }
}

impl Charges for FixedRatePlusPercentage {
    fn charge(&self, trade: &Trade) -> Result<()> {
        let asset = trade.asset();
        let portfolio = trade.portfolio();
        let world = portfolio.world();

        let charge_cash = world.get_cash(&self.currency_code)?;
        let local_value = asset.local_value().ok_or_else(|| {
            Error::missing_resource(format!("{} local value is undefined", asset.code()))
        })?;
        let local_value_traded = (local_value * trade.units() as f64).abs();
        let percentage_charge_local = (self.percentage * local_value_traded).abs();
        let pair = format!("{}{}", asset.currency_code(), self.currency_code);
        let percentage_charge = percentage_charge_local * world.fx_rate(&pair)?;

        let total_charge = self.fixed_amount + percentage_charge;
        info!(
            "BROKER: charging {:.2} {} on trade of {} {}",
            total_charge,
            self.currency_code,
            trade.units(),
            asset.code()
        );
        portfolio.transfer(&charge_cash, -total_charge)
    }
}

/// The pair (execution strategy, charges strategy) applied to realize a trade.
pub struct Broker {
    execution: Box<dyn Execution>,
    charges: Box<dyn Charges>,
}

impl Broker {
    pub fn new(execution: Box<dyn Execution>, charges: Box<dyn Charges>) -> Self {
        Self { execution, charges }
    }

    /// Apply charges, then execution.
    pub fn execute(&self, trade: &Trade) -> Result<()> {
        info!(
            "BROKER: executing trade of {} units of {}",
            trade.units(),
            trade.asset_code()
        );
        self.charges.charge(trade)?;
        self.execution.execute(trade)
    }
}

impl Default for Broker {
    fn default() -> Self {
        Self::new(Box::new(FillAtLast), Box::new(NoCharges))
    }
}

#[cfg(test)]
mod tests {
    use super::{Broker, FillAtLastWithSlippage, FixedRatePlusPercentage, NoCharges};
    use crate::asset::Asset;
    use crate::fx::FxRate;
    use crate::portfolio::Portfolio;
    use crate::trade::Trade;
    use crate::world::World;

    fn setup() -> (World, Portfolio, Asset) {
        let world = World::new();
        let portfolio = Portfolio::new(&world, "AUD").unwrap();
        let aud = Asset::cash(&world, "AUD").unwrap();
        portfolio.transfer(&aud, 1000.0).unwrap();
        let stock = Asset::stock_with_price(&world, "TEST AU", 2.50, "AUD").unwrap();
        (world, portfolio, stock)
    }

    #[test]
    fn test_that_the_default_broker_fills_at_last() {
        let (_world, portfolio, stock) = setup();
        let trade = Trade::new(&portfolio, &stock, 100);
        portfolio.broker().execute(&trade).unwrap();

        assert_eq!(portfolio.get_holding_units("TEST AU"), 100.0);
        assert_eq!(portfolio.get_holding_units("AUD"), 750.0);
    }

    #[test]
    fn test_that_slippage_worsens_both_sides() {
        let (_world, portfolio, stock) = setup();
        portfolio.set_broker(Broker::new(
            Box::new(FillAtLastWithSlippage::new(0.01).unwrap()),
            Box::new(NoCharges),
        ));

        let buy = Trade::new(&portfolio, &stock, 100);
        portfolio.broker().execute(&buy).unwrap();
        assert_eq!(portfolio.get_holding_units("AUD"), 747.50);

        let sell = Trade::new(&portfolio, &stock, -100);
        portfolio.broker().execute(&sell).unwrap();
        assert_eq!(portfolio.get_holding_units("AUD"), 995.0);
        assert_eq!(portfolio.get_holding_units("TEST AU"), 0.0);
    }

    #[test]
    fn test_that_slippage_outside_the_unit_interval_is_rejected() {
        assert!(FillAtLastWithSlippage::new(-0.01).is_err());
        assert!(FillAtLastWithSlippage::new(1.0).is_err());
        assert!(FillAtLastWithSlippage::new(0.0).is_ok());
    }

    #[test]
    fn test_that_charges_settle_in_the_charge_currency() {
        let (world, portfolio, stock) = setup();
        let _audusd = FxRate::with_rate(&world, "AUDUSD", 0.5).unwrap();
        portfolio.set_broker(Broker::new(
            Box::new(super::FillAtLast),
            Box::new(FixedRatePlusPercentage::new(10.0, 0.01, "USD").unwrap()),
        ));

        let trade = Trade::new(&portfolio, &stock, 100);
        portfolio.broker().execute(&trade).unwrap();

        //Charge is 10 + 1% of 250 AUD converted at 0.5 = 10 + 1.25 USD
        assert_eq!(portfolio.get_holding_units("USD"), -11.25);
        assert_eq!(portfolio.get_holding_units("AUD"), 750.0);
    }

    #[test]
    fn test_that_charge_parameters_are_validated() {
        assert!(FixedRatePlusPercentage::new(-1.0, 0.0, "USD").is_err());
        assert!(FixedRatePlusPercentage::new(0.0, -0.1, "USD").is_err());
        assert!(FixedRatePlusPercentage::new(0.0, 0.0, "TOOLONG").is_err());
    }
}
