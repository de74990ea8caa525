//! Catalogs of named instruments shared across a backtest
//!
//! A [World] owns the code registries for assets and portfolios, the FX rate catalog, and the
//! default currency. Everything is held by weak reference: a code binding lives exactly as long
//! as the last strong handle to its owner, so dropping an asset or portfolio frees its code.
//!
//! Components that need lookups hold a cheaply-cloneable [World] handle. Constructing a fresh
//! [World] gives a clean slate; [World::reset] clears the catalogs of an existing one in place,
//! which amounts to the same thing for tests that share a handle.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::{Rc, Weak};

use itertools::Itertools;
use log::debug;

use crate::asset::{Asset, AssetInner};
use crate::error::{Error, Result};
use crate::fx::{inverse_pair, is_identity_pair, validate_pair, FxRate, FxRateInner};
use crate::portfolio::{Portfolio, PortfolioInner};

/// Normalize and validate a code: trimmed, upper-cased, nonempty.
pub fn check_code(code: &str) -> Result<String> {
    let cleaned = code.trim().to_uppercase();
    if cleaned.is_empty() {
        return Err(Error::domain_violation("code must be nonempty"));
    }
    Ok(cleaned)
}

/// Normalize and validate a currency code: a code of exactly three characters.
pub fn check_currency_code(code: &str) -> Result<String> {
    let cleaned = check_code(code)?;
    if cleaned.len() != 3 {
        return Err(Error::domain_violation(format!(
            "currency code must be 3 characters: {cleaned}"
        )));
    }
    Ok(cleaned)
}

/// A unique-code namespace mapping codes to weak owner handles.
///
/// Registering the same owner under its code twice is a no-op; registering a code held by a
/// different live owner fails. Dead owners free their codes implicitly.
pub(crate) struct Codes<T> {
    inner: HashMap<String, Weak<RefCell<T>>>,
}

impl<T> Codes<T> {
    fn new() -> Self {
        Self {
            inner: HashMap::new(),
        }
    }

    fn register(&mut self, code: &str, owner: &Rc<RefCell<T>>) -> Result<()> {
        if let Some(existing) = self.inner.get(code).and_then(Weak::upgrade) {
            if Rc::ptr_eq(&existing, owner) {
                return Ok(());
            }
            return Err(Error::name_conflict(format!("{code} already registered")));
        }
        self.inner.insert(code.to_string(), Rc::downgrade(owner));
        Ok(())
    }

    fn get(&self, code: &str) -> Option<Rc<RefCell<T>>> {
        self.inner.get(code).and_then(Weak::upgrade)
    }

    fn in_use(&self, code: &str) -> bool {
        self.get(code).is_some()
    }

    fn list(&self) -> Vec<String> {
        self.inner
            .iter()
            .filter(|(_code, owner)| owner.strong_count() > 0)
            .map(|(code, _owner)| code.clone())
            .sorted()
            .collect()
    }

    fn live(&self) -> Vec<Rc<RefCell<T>>> {
        self.inner.values().filter_map(Weak::upgrade).collect()
    }

    fn reset(&mut self) {
        self.inner.clear();
    }
}

struct WorldInner {
    assets: Codes<AssetInner>,
    portfolios: Codes<PortfolioInner>,
    fx_rates: Codes<FxRateInner>,
    default_currency_code: String,
}

/// Shared catalogs of named assets, portfolios and FX rates.
///
/// [World] is a handle and can be cheaply cloned; all clones see the same catalogs.
#[derive(Clone)]
pub struct World {
    inner: Rc<RefCell<WorldInner>>,
}

impl World {
    pub fn new() -> Self {
        Self {
            inner: Rc::new(RefCell::new(WorldInner {
                assets: Codes::new(),
                portfolios: Codes::new(),
                fx_rates: Codes::new(),
                default_currency_code: "USD".to_string(),
            })),
        }
    }

    /// The currency used when an asset or portfolio is constructed without one.
    pub fn default_currency_code(&self) -> String {
        self.inner.borrow().default_currency_code.clone()
    }

    pub fn set_default_currency_code(&self, code: &str) -> Result<()> {
        let code = check_currency_code(code)?;
        self.inner.borrow_mut().default_currency_code = code;
        Ok(())
    }

    /// Clear every catalog atomically. Bindings for instruments still held by clients are gone;
    /// re-registering those instruments requires constructing them against a fresh code.
    pub fn reset(&self) {
        let mut inner = self.inner.borrow_mut();
        inner.assets.reset();
        inner.portfolios.reset();
        inner.fx_rates.reset();
        debug!("WORLD: reset catalogs");
    }

    pub(crate) fn register_asset(&self, code: &str, owner: &Rc<RefCell<AssetInner>>) -> Result<()> {
        self.inner.borrow_mut().assets.register(code, owner)
    }

    pub fn asset(&self, code: &str) -> Option<Asset> {
        let code = check_code(code).ok()?;
        self.inner
            .borrow()
            .assets
            .get(&code)
            .map(Asset::from_inner)
    }

    pub fn asset_in_use(&self, code: &str) -> bool {
        self.asset(code).is_some()
    }

    pub fn asset_codes(&self) -> Vec<String> {
        self.inner.borrow().assets.list()
    }

    pub fn live_assets(&self) -> Vec<Asset> {
        self.inner
            .borrow()
            .assets
            .live()
            .into_iter()
            .map(Asset::from_inner)
            .collect()
    }

    /// The cash asset settling trades in `currency_code`, created and registered lazily.
    ///
    /// A 3-letter code already bound to a non-cash asset is reserved and cannot settle trades.
    pub fn get_cash(&self, currency_code: &str) -> Result<Asset> {
        let currency_code = check_currency_code(currency_code)?;
        if let Some(asset) = self.asset(&currency_code) {
            if !asset.is_cash() {
                return Err(Error::type_mismatch(format!(
                    "currency code {currency_code} is reserved for cash"
                )));
            }
            return Ok(asset);
        }
        Asset::cash(self, &currency_code)
    }

    pub(crate) fn register_portfolio(
        &self,
        code: &str,
        owner: &Rc<RefCell<PortfolioInner>>,
    ) -> Result<()> {
        self.inner.borrow_mut().portfolios.register(code, owner)
    }

    pub fn portfolio(&self, code: &str) -> Option<Portfolio> {
        let code = check_code(code).ok()?;
        self.inner
            .borrow()
            .portfolios
            .get(&code)
            .map(Portfolio::from_inner)
    }

    pub fn portfolio_in_use(&self, code: &str) -> bool {
        check_code(code)
            .map(|code| self.inner.borrow().portfolios.in_use(&code))
            .unwrap_or(false)
    }

    pub fn portfolio_codes(&self) -> Vec<String> {
        self.inner.borrow().portfolios.list()
    }

    pub(crate) fn register_fx(&self, pair: &str, owner: &Rc<RefCell<FxRateInner>>) -> Result<()> {
        let mut inner = self.inner.borrow_mut();
        if inner.fx_rates.in_use(pair) {
            return Err(Error::name_conflict(format!("{pair} already created")));
        }
        let inverse = inverse_pair(pair)?;
        if inner.fx_rates.in_use(&inverse) {
            return Err(Error::name_conflict(format!(
                "{pair} inverse pair {inverse} already created"
            )));
        }
        inner.fx_rates.register(pair, owner)
    }

    /// The rate for `pair`: 1.0 for an identity pair, the stored rate, or the reciprocal of the
    /// stored inverse. Fails when neither direction is available or the rate is unset.
    pub fn fx_rate(&self, pair: &str) -> Result<f64> {
        let pair = validate_pair(pair)?;
        if is_identity_pair(&pair)? {
            return Ok(1.0);
        }

        let inner = self.inner.borrow();
        if let Some(fx) = inner.fx_rates.get(&pair) {
            return fx
                .borrow()
                .rate
                .ok_or_else(|| Error::missing_resource(format!("{pair} rate not available")));
        }

        let inverse = inverse_pair(&pair)?;
        if let Some(fx) = inner.fx_rates.get(&inverse) {
            let rate = fx
                .borrow()
                .rate
                .ok_or_else(|| Error::missing_resource(format!("{pair} rate not available")))?;
            return Ok(1.0 / rate);
        }

        Err(Error::missing_resource(format!("{pair} rate not available")))
    }

    /// The stored [FxRate] for `pair`, accepting the inverse form as equivalent. Subscriptions
    /// go through this so that observers watch whichever concrete direction exists.
    pub fn fx_observable(&self, pair: &str) -> Result<FxRate> {
        let pair = validate_pair(pair)?;
        let inner = self.inner.borrow();
        if let Some(fx) = inner.fx_rates.get(&pair) {
            return Ok(FxRate::from_inner(fx));
        }
        let inverse = inverse_pair(&pair)?;
        if let Some(fx) = inner.fx_rates.get(&inverse) {
            return Ok(FxRate::from_inner(fx));
        }
        Err(Error::missing_resource(format!(
            "{pair} instance doesn't exist"
        )))
    }

    /// The stored [FxRate] for exactly `pair`, not its inverse.
    pub fn fx_instance(&self, pair: &str) -> Option<FxRate> {
        let pair = validate_pair(pair).ok()?;
        self.inner
            .borrow()
            .fx_rates
            .get(&pair)
            .map(FxRate::from_inner)
    }

    pub fn fx_pairs(&self) -> Vec<String> {
        self.inner.borrow().fx_rates.list()
    }

    pub fn live_fx_rates(&self) -> Vec<FxRate> {
        self.inner
            .borrow()
            .fx_rates
            .live()
            .into_iter()
            .map(FxRate::from_inner)
            .collect()
    }
}

impl Default for World {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::{check_code, check_currency_code, World};
    use crate::asset::Asset;

    #[test]
    fn test_that_codes_are_cleaned_on_entry() {
        assert_eq!(check_code(" aapl ").unwrap(), "AAPL");
        assert!(check_code("   ").is_err());
    }

    #[test]
    fn test_that_currency_codes_must_be_three_characters() {
        assert_eq!(check_currency_code(" usd ").unwrap(), "USD");
        assert!(check_currency_code("XXXX").is_err());
        assert!(check_currency_code("XX").is_err());
    }

    #[test]
    fn test_that_default_currency_is_configurable() {
        let world = World::new();
        assert_eq!(world.default_currency_code(), "USD");
        world.set_default_currency_code("aud").unwrap();
        assert_eq!(world.default_currency_code(), "AUD");
        assert!(world.set_default_currency_code("TOOLONG").is_err());
    }

    #[test]
    fn test_that_registration_is_idempotent_for_the_same_owner() {
        let world = World::new();
        let stock = Asset::stock(&world, "ZZB AU").unwrap();
        assert!(world.asset_in_use("ZZB AU"));
        assert_eq!(world.asset_codes().len(), 1);

        //Same owner again is fine, a different owner is not
        assert!(world.register_asset("ZZB AU", &stock.inner).is_ok());
        let other = Asset::stock(&world, "OTHER").unwrap();
        assert!(world.register_asset("ZZB AU", &other.inner).is_err());
    }

    #[test]
    fn test_that_dropping_the_owner_frees_the_code() {
        let world = World::new();
        let stock = Asset::stock(&world, "ZZB AU").unwrap();
        assert!(world.asset_in_use("ZZB AU"));

        drop(stock);
        assert!(!world.asset_in_use("ZZB AU"));
        assert!(world.asset_codes().is_empty());

        //The code can now be taken by a new owner
        let _stock = Asset::stock(&world, "ZZB AU").unwrap();
        assert!(world.asset_in_use("ZZB AU"));
    }

    #[test]
    fn test_that_reset_clears_every_catalog() {
        let world = World::new();
        let _stock = Asset::stock(&world, "ZZB AU").unwrap();
        let _cash = world.get_cash("AUD").unwrap();
        world.reset();
        assert!(world.asset_codes().is_empty());
        assert!(world.fx_pairs().is_empty());
    }

    #[test]
    fn test_that_cash_codes_are_reserved() {
        let world = World::new();
        //A three letter stock code blocks the same currency code for cash
        let _stock = Asset::stock_in_currency(&world, "ZZB", "AUD").unwrap();
        assert!(world.get_cash("ZZB").is_err());

        //Cash lookup is lazy and idempotent
        let first = world.get_cash("AUD").unwrap();
        let second = world.get_cash("AUD").unwrap();
        assert!(first == second);
    }
}
