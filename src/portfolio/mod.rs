//! Holdings and base-currency valuation
//!
//! A portfolio is a collection of signed holdings over assets, valued in a base currency. It is
//! also a subscriber in the observable graph: it watches the variable-price assets it holds and
//! the FX pairs it values through, and recomputes its cached value whenever one of them changes.
//!
//! ### Subscription protocol
//!
//! After every holdings mutation the subscriptions are re-synchronized: a variable-price asset
//! with a nonzero holding is watched, one with a zero holding is not, and the stored direction
//! of `base + asset currency` is watched for every held asset unless the pair is the identity.
//! All of this state can be captured in a savepoint and rolled back exactly, which is how the
//! compliance check evaluates a trade's hypothetical effect without leaving a trace.
//!
//! The observer edges hold the portfolio weakly. Dropping the last strong handle removes the
//! portfolio from every publisher and frees its registered code.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use log::debug;

use crate::asset::Asset;
use crate::broker::Broker;
use crate::compliance::Compliance;
use crate::error::{Error, Result};
use crate::fx::{is_identity_pair, FxRate};
use crate::observable::{Observer, WeakObserver};
use crate::world::{check_code, check_currency_code, World};

#[derive(Clone, Debug)]
pub(crate) struct Holding {
    pub(crate) asset: Asset,
    pub(crate) units: f64,
}

/// The rollback state for a hypothetical trade: the holdings map and the cached value.
///
/// Restoring a savepoint also re-synchronizes the subscription sets, so a restored portfolio is
/// indistinguishable from one that never traded.
pub(crate) struct Savepoint {
    holdings: HashMap<String, Holding>,
    value: f64,
}

pub(crate) struct PortfolioInner {
    world: World,
    base_currency_code: String,
    code: Option<String>,
    holdings: HashMap<String, Holding>,
    value: f64,
    compliance: Compliance,
    broker: Rc<Broker>,
    subscribed_assets: HashMap<String, Asset>,
    subscribed_fx: HashMap<String, FxRate>,
}

impl PortfolioInner {
    //Valuation identity: value is the sum over holdings of units * local_value / fx(base +
    //asset currency). A holding whose price has not arrived yet contributes nothing until the
    //first price event lands and the observer update recomputes; a missing rate for a priced
    //holding is an error because the sum would silently drop known value.
    fn revalue(&mut self) -> Result<()> {
        let base = self.base_currency_code.clone();
        let mut value = 0.0;
        for holding in self.holdings.values() {
            let Some(local_value) = holding.asset.local_value() else {
                continue;
            };
            let pair = format!("{}{}", base, holding.asset.currency_code());
            let rate = self.world.fx_rate(&pair)?;
            value += holding.units * local_value / rate;
        }
        self.value = value;
        Ok(())
    }
}

impl Observer for PortfolioInner {
    fn on_update(&mut self) -> Result<()> {
        self.revalue()
    }
}

/// A named collection of signed holdings, valued in a base currency.
#[derive(Clone)]
pub struct Portfolio {
    inner: Rc<RefCell<PortfolioInner>>,
}

impl PartialEq for Portfolio {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Portfolio {
    pub(crate) fn from_inner(inner: Rc<RefCell<PortfolioInner>>) -> Self {
        Self { inner }
    }

    pub fn new(world: &World, base_currency_code: &str) -> Result<Portfolio> {
        let base_currency_code = check_currency_code(base_currency_code)?;
        Ok(Portfolio {
            inner: Rc::new(RefCell::new(PortfolioInner {
                world: world.clone(),
                base_currency_code,
                code: None,
                holdings: HashMap::new(),
                value: 0.0,
                compliance: Compliance::new(),
                broker: Rc::new(Broker::default()),
                subscribed_assets: HashMap::new(),
                subscribed_fx: HashMap::new(),
            })),
        })
    }

    /// A portfolio in the world's default currency.
    pub fn new_default(world: &World) -> Result<Portfolio> {
        let base_currency_code = world.default_currency_code();
        Self::new(world, &base_currency_code)
    }

    /// A portfolio registered under `code`, so that history snapshots can report it.
    pub fn new_with_code(world: &World, base_currency_code: &str, code: &str) -> Result<Portfolio> {
        let portfolio = Self::new(world, base_currency_code)?;
        let code = check_code(code)?;
        world.register_portfolio(&code, &portfolio.inner)?;
        portfolio.inner.borrow_mut().code = Some(code);
        Ok(portfolio)
    }

    pub fn base_currency_code(&self) -> String {
        self.inner.borrow().base_currency_code.clone()
    }

    pub fn code(&self) -> Option<String> {
        self.inner.borrow().code.clone()
    }

    /// The cached value in base currency, maintained by the observer graph.
    pub fn value(&self) -> f64 {
        self.inner.borrow().value
    }

    pub(crate) fn world(&self) -> World {
        self.inner.borrow().world.clone()
    }

    /// Move units into the portfolio with no cash counter-leg: a trade with a consideration of
    /// zero.
    pub fn transfer(&self, asset: &Asset, units: f64) -> Result<()> {
        self.trade(asset, units, Some(0.0))
    }

    /// Update holdings for a signed trade in `asset` and credit the cash counter-leg.
    ///
    /// When no consideration is given it defaults to `-units * local_value` in the asset's
    /// currency, which requires the asset to have a price. Units must be integer-valued for
    /// anything that is not cash. A trade of cash against cash books the counter-leg against
    /// base-currency cash, converted through `fx(base + asset currency)`, so the portfolio
    /// stays balanced in base currency.
    pub fn trade(&self, asset: &Asset, units: f64, consideration: Option<f64>) -> Result<()> {
        if !units.is_finite() {
            return Err(Error::type_mismatch("expecting numeric units"));
        }
        if !asset.is_cash() && units.fract() != 0.0 {
            return Err(Error::type_mismatch(
                "units for a non-cash trade must be an integer",
            ));
        }
        let consideration = match consideration {
            Some(value) => {
                if !value.is_finite() {
                    return Err(Error::type_mismatch("expecting numeric consideration"));
                }
                value
            }
            None => {
                let local_value = asset.local_value().ok_or_else(|| {
                    Error::missing_resource(format!("{} local value is undefined", asset.code()))
                })?;
                -units * local_value
            }
        };

        let (world, base) = {
            let inner = self.inner.borrow();
            (inner.world.clone(), inner.base_currency_code.clone())
        };

        //Resolving the settlement cash up front surfaces reserved-code conflicts before any
        //holdings are touched.
        let (counter_cash, counter_amount) = if asset.is_cash() {
            let base_cash = world.get_cash(&base)?;
            let amount = if consideration == 0.0 {
                0.0
            } else {
                let pair = format!("{}{}", base, asset.currency_code());
                consideration / world.fx_rate(&pair)?
            };
            (base_cash, amount)
        } else {
            (world.get_cash(&asset.currency_code())?, consideration)
        };

        {
            let mut inner = self.inner.borrow_mut();
            add_units(&mut inner.holdings, asset, units);
            add_units(&mut inner.holdings, &counter_cash, counter_amount);
        }
        debug!(
            "PORTFOLIO: traded {} units of {} against {} {}",
            units,
            asset.code(),
            counter_amount,
            counter_cash.code()
        );

        self.sync_subscriptions()?;
        self.inner.borrow_mut().revalue()
    }

    /// The stored units for `code`, 0 when the asset is not held.
    pub fn get_holding_units(&self, code: &str) -> f64 {
        let Ok(code) = check_code(code) else {
            return 0.0;
        };
        self.inner
            .borrow()
            .holdings
            .get(&code)
            .map(|holding| holding.units)
            .unwrap_or(0.0)
    }

    /// The holding's share of the portfolio value, 0 when absent or when the portfolio has no
    /// value.
    pub fn get_holding_weight(&self, code: &str) -> Result<f64> {
        let Ok(code) = check_code(code) else {
            return Ok(0.0);
        };
        let (holding, total, base, world) = {
            let inner = self.inner.borrow();
            let Some(holding) = inner.holdings.get(&code).cloned() else {
                return Ok(0.0);
            };
            (
                holding,
                inner.value,
                inner.base_currency_code.clone(),
                inner.world.clone(),
            )
        };
        if total == 0.0 {
            return Ok(0.0);
        }
        let local_value = holding.asset.local_value().ok_or_else(|| {
            Error::missing_resource(format!("{code} local value is undefined"))
        })?;
        let pair = format!("{}{}", base, holding.asset.currency_code());
        let rate = world.fx_rate(&pair)?;
        let holding_value = holding.units * local_value / rate;
        Ok(holding_value / total)
    }

    pub fn compliance(&self) -> Compliance {
        self.inner.borrow().compliance.clone()
    }

    pub fn set_compliance(&self, compliance: Compliance) {
        self.inner.borrow_mut().compliance = compliance;
    }

    pub fn broker(&self) -> Rc<Broker> {
        self.inner.borrow().broker.clone()
    }

    pub fn set_broker(&self, broker: Broker) {
        self.inner.borrow_mut().broker = Rc::new(broker);
    }

    pub(crate) fn savepoint(&self) -> Savepoint {
        let inner = self.inner.borrow();
        Savepoint {
            holdings: inner.holdings.clone(),
            value: inner.value,
        }
    }

    pub(crate) fn restore(&self, savepoint: Savepoint) -> Result<()> {
        {
            let mut inner = self.inner.borrow_mut();
            inner.holdings = savepoint.holdings;
            inner.value = savepoint.value;
        }
        self.sync_subscriptions()
    }

    pub(crate) fn as_weak_observer(&self) -> WeakObserver {
        let observer: Rc<RefCell<dyn Observer>> = self.inner.clone();
        Rc::downgrade(&observer)
    }

    //Reconciles the publisher edges with the current holdings: watch variable-price assets with
    //nonzero units and the stored direction of every non-identity valuation pair, drop
    //everything else. Idempotent, so it can run after every mutation and after a rollback.
    fn sync_subscriptions(&self) -> Result<()> {
        let weak = self.as_weak_observer();
        let (world, base, entries) = {
            let inner = self.inner.borrow();
            let entries: Vec<Holding> = inner.holdings.values().cloned().collect();
            (
                inner.world.clone(),
                inner.base_currency_code.clone(),
                entries,
            )
        };

        let mut desired_assets: HashMap<String, Asset> = HashMap::new();
        let mut desired_fx: HashMap<String, FxRate> = HashMap::new();
        for holding in &entries {
            if holding.asset.is_variable_price() && holding.units != 0.0 {
                desired_assets.insert(holding.asset.code(), holding.asset.clone());
            }
            let pair = format!("{}{}", base, holding.asset.currency_code());
            if !is_identity_pair(&pair)? {
                if let Ok(fx) = world.fx_observable(&pair) {
                    desired_fx.insert(fx.pair(), fx);
                }
            }
        }

        let mut inner = self.inner.borrow_mut();
        let current_assets: Vec<String> = inner.subscribed_assets.keys().cloned().collect();
        for code in current_assets {
            if !desired_assets.contains_key(&code) {
                if let Some(asset) = inner.subscribed_assets.remove(&code) {
                    asset.remove_observer(&weak);
                }
            }
        }
        for (code, asset) in desired_assets {
            if !inner.subscribed_assets.contains_key(&code) {
                asset.add_observer(weak.clone());
                inner.subscribed_assets.insert(code, asset);
            }
        }

        let current_fx: Vec<String> = inner.subscribed_fx.keys().cloned().collect();
        for pair in current_fx {
            if !desired_fx.contains_key(&pair) {
                if let Some(fx) = inner.subscribed_fx.remove(&pair) {
                    fx.remove_observer(&weak);
                }
            }
        }
        for (pair, fx) in desired_fx {
            if !inner.subscribed_fx.contains_key(&pair) {
                fx.add_observer(weak.clone());
                inner.subscribed_fx.insert(pair, fx);
            }
        }
        Ok(())
    }
}

fn add_units(holdings: &mut HashMap<String, Holding>, asset: &Asset, units: f64) {
    holdings
        .entry(asset.code())
        .and_modify(|holding| holding.units += units)
        .or_insert_with(|| Holding {
            asset: asset.clone(),
            units,
        });
}

#[cfg(test)]
mod tests {
    use super::Portfolio;
    use crate::asset::Asset;
    use crate::fx::FxRate;
    use crate::world::World;

    struct Fixture {
        world: World,
        portfolio: Portfolio,
        aud: Asset,
        usd: Asset,
        audusd: FxRate,
        stock_aud: Asset,
        stock_usd: Asset,
    }

    fn setup() -> Fixture {
        let world = World::new();
        let portfolio = Portfolio::new(&world, "AUD").unwrap();
        let aud = Asset::cash(&world, "AUD").unwrap();
        let usd = Asset::cash(&world, "USD").unwrap();
        let audusd = FxRate::with_rate(&world, "AUDUSD", 0.70).unwrap();
        let stock_aud = Asset::stock_with_price(&world, "ZZB AU", 2.50, "AUD").unwrap();
        let stock_usd = Asset::stock_with_price(&world, "ZZB US", 110.0, "USD").unwrap();
        Fixture {
            world,
            portfolio,
            aud,
            usd,
            audusd,
            stock_aud,
            stock_usd,
        }
    }

    #[test]
    fn test_that_a_new_portfolio_has_no_value() {
        let fixture = setup();
        assert_eq!(fixture.portfolio.base_currency_code(), "AUD");
        assert_eq!(fixture.portfolio.value(), 0.0);
    }

    #[test]
    fn test_that_transfers_of_base_cash_move_value() {
        let fixture = setup();
        fixture.portfolio.transfer(&fixture.aud, 1000.0).unwrap();
        assert_eq!(fixture.portfolio.value(), 1000.0);
        assert_eq!(fixture.portfolio.get_holding_units("AUD"), 1000.0);
    }

    #[test]
    fn test_that_foreign_cash_is_valued_through_fx() {
        let fixture = setup();
        fixture.audusd.set_rate(Some(0.65)).unwrap();
        fixture.portfolio.transfer(&fixture.aud, 1000.0).unwrap();
        fixture.portfolio.transfer(&fixture.usd, 1000.0).unwrap();
        assert_eq!(fixture.portfolio.value(), 1000.0 + 1000.0 / 0.65);
    }

    #[test]
    fn test_that_rate_changes_trigger_revaluation() {
        let fixture = setup();
        fixture.audusd.set_rate(Some(0.65)).unwrap();
        fixture.portfolio.transfer(&fixture.usd, 1000.0).unwrap();
        assert_eq!(fixture.portfolio.value(), 1000.0 / 0.65);

        fixture.audusd.set_rate(Some(0.50)).unwrap();
        assert_eq!(fixture.portfolio.value(), 1000.0 / 0.50);
    }

    #[test]
    fn test_that_price_changes_trigger_revaluation() {
        let fixture = setup();
        fixture.portfolio.transfer(&fixture.stock_aud, 1000.0).unwrap();
        assert_eq!(fixture.portfolio.value(), 1000.0 * 2.50);

        fixture.stock_aud.set_price(Some(2.0)).unwrap();
        assert_eq!(fixture.portfolio.value(), 1000.0 * 2.0);
    }

    #[test]
    fn test_that_multi_currency_stock_valuation_holds() {
        let fixture = setup();
        fixture.audusd.set_rate(Some(0.65)).unwrap();
        fixture.portfolio.transfer(&fixture.stock_aud, 1000.0).unwrap();
        fixture.portfolio.transfer(&fixture.stock_usd, 1000.0).unwrap();
        let expected = 1000.0 * 2.50 + 1000.0 * 110.0 / 0.65;
        assert_eq!(fixture.portfolio.value(), expected);

        fixture.portfolio.transfer(&fixture.stock_usd, -1000.0).unwrap();
        assert_eq!(fixture.portfolio.value(), 1000.0 * 2.50);
    }

    #[test]
    fn test_that_trades_default_to_local_value_consideration() {
        let fixture = setup();
        fixture.portfolio.transfer(&fixture.aud, 1000.0).unwrap();
        fixture.portfolio.trade(&fixture.stock_aud, 100.0, None).unwrap();
        assert_eq!(fixture.portfolio.get_holding_units("ZZB AU"), 100.0);
        assert_eq!(fixture.portfolio.get_holding_units("AUD"), 1000.0 - 250.0);
        //The portfolio swapped cash for stock at the last price so value is unchanged
        assert_eq!(fixture.portfolio.value(), 1000.0);
    }

    #[test]
    fn test_that_trades_without_a_price_require_consideration() {
        let fixture = setup();
        let unpriced = Asset::stock_in_currency(&fixture.world, "NOPX", "AUD").unwrap();
        assert!(fixture.portfolio.trade(&unpriced, 100.0, None).is_err());
        assert!(fixture.portfolio.trade(&unpriced, 100.0, Some(-250.0)).is_ok());
    }

    #[test]
    fn test_that_unpriced_holdings_contribute_once_priced() {
        let fixture = setup();
        let unpriced = Asset::stock_in_currency(&fixture.world, "NOPX", "AUD").unwrap();
        fixture.portfolio.trade(&unpriced, 100.0, Some(-250.0)).unwrap();
        //Until the first price arrives only the cash leg is visible in the value
        assert_eq!(fixture.portfolio.value(), -250.0);

        unpriced.set_price(Some(3.0)).unwrap();
        assert_eq!(fixture.portfolio.value(), 300.0 - 250.0);
    }

    #[test]
    fn test_that_non_cash_trades_require_integer_units() {
        let fixture = setup();
        assert!(fixture.portfolio.trade(&fixture.stock_aud, 0.5, None).is_err());
        //Cash can move in fractional units
        assert!(fixture.portfolio.transfer(&fixture.aud, 10.25).is_ok());
    }

    #[test]
    fn test_that_non_numeric_considerations_are_rejected() {
        let fixture = setup();
        assert!(fixture
            .portfolio
            .trade(&fixture.stock_aud, 1.0, Some(f64::NAN))
            .is_err());
    }

    #[test]
    fn test_that_cash_for_cash_trades_stay_balanced_in_base() {
        let fixture = setup();
        fixture.audusd.set_rate(Some(0.65)).unwrap();
        fixture.portfolio.transfer(&fixture.aud, 1000.0).unwrap();

        //Buying 100 USD for its local value should leave total value unchanged
        fixture.portfolio.trade(&fixture.usd, 100.0, None).unwrap();
        assert_eq!(fixture.portfolio.get_holding_units("USD"), 100.0);
        let aud_units = fixture.portfolio.get_holding_units("AUD");
        assert!((aud_units - (1000.0 - 100.0 / 0.65)).abs() < 1e-9);
        assert!((fixture.portfolio.value() - 1000.0).abs() < 1e-9);
    }

    #[test]
    fn test_that_holding_weights_sum_to_one() {
        let fixture = setup();
        fixture.portfolio.transfer(&fixture.aud, 250.0).unwrap();
        fixture.portfolio.transfer(&fixture.stock_aud, 100.0).unwrap();

        let cash_weight = fixture.portfolio.get_holding_weight("AUD").unwrap();
        let stock_weight = fixture.portfolio.get_holding_weight("ZZB AU").unwrap();
        assert_eq!(cash_weight, 0.5);
        assert_eq!(stock_weight, 0.5);
        assert_eq!(fixture.portfolio.get_holding_weight("MISSING").unwrap(), 0.0);
    }

    #[test]
    fn test_that_subscriptions_follow_nonzero_holdings() {
        let fixture = setup();
        let weak = fixture.portfolio.as_weak_observer();
        assert!(!fixture.stock_aud.has_observer(&weak));

        fixture.portfolio.transfer(&fixture.stock_aud, 100.0).unwrap();
        assert!(fixture.stock_aud.has_observer(&weak));

        fixture.portfolio.transfer(&fixture.stock_aud, -100.0).unwrap();
        assert!(!fixture.stock_aud.has_observer(&weak));
    }

    #[test]
    fn test_that_fx_subscriptions_accept_the_stored_direction() {
        let fixture = setup();
        let weak = fixture.portfolio.as_weak_observer();
        fixture.portfolio.transfer(&fixture.usd, 1000.0).unwrap();
        //The valuation pair is AUDUSD which is the stored direction here
        assert!(fixture.audusd.has_observer(&weak));
        //Base currency holdings need no FX edge
        fixture.portfolio.transfer(&fixture.aud, 1000.0).unwrap();
        assert_eq!(fixture.audusd.observer_count(), 1);
    }

    #[test]
    fn test_that_dropped_portfolios_leave_the_observer_set() {
        let fixture = setup();
        fixture.portfolio.transfer(&fixture.stock_aud, 100.0).unwrap();
        assert_eq!(fixture.stock_aud.observer_count(), 1);

        drop(fixture.portfolio);
        assert_eq!(fixture.stock_aud.observer_count(), 0);
    }

    #[test]
    fn test_that_savepoints_roll_back_holdings_value_and_subscriptions() {
        let fixture = setup();
        fixture.portfolio.transfer(&fixture.aud, 1000.0).unwrap();

        let savepoint = fixture.portfolio.savepoint();
        fixture.portfolio.trade(&fixture.stock_aud, 100.0, None).unwrap();
        assert_eq!(fixture.portfolio.get_holding_units("ZZB AU"), 100.0);
        assert_eq!(fixture.stock_aud.observer_count(), 1);

        fixture.portfolio.restore(savepoint).unwrap();
        assert_eq!(fixture.portfolio.get_holding_units("ZZB AU"), 0.0);
        assert_eq!(fixture.portfolio.get_holding_units("AUD"), 1000.0);
        assert_eq!(fixture.portfolio.value(), 1000.0);
        assert_eq!(fixture.stock_aud.observer_count(), 0);
    }

    #[test]
    fn test_that_portfolio_codes_register_in_the_world() {
        let world = World::new();
        let portfolio = Portfolio::new_with_code(&world, "AUD", "Growth").unwrap();
        assert_eq!(portfolio.code(), Some("GROWTH".to_string()));
        assert!(world.portfolio_in_use("growth"));
        assert!(world.portfolio("growth").unwrap() == portfolio);

        drop(portfolio);
        assert!(!world.portfolio_in_use("GROWTH"));
    }
}
