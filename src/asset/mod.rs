//! Priceable instruments: cash and variable-price stock
//!
//! An [Asset] is a cheap handle over shared state, the same pattern used for the other
//! instruments in the library. Code, currency and multiplier are fixed at construction; only the
//! price of a variable-price asset can change afterwards, and a price change notifies every
//! portfolio holding the asset.

use std::cell::RefCell;
use std::rc::Rc;

use crate::error::{Error, Result};
use crate::observable::{Subscribers, WeakObserver};
use crate::world::{check_code, check_currency_code, World};

#[derive(Debug)]
pub(crate) enum AssetKind {
    Cash,
    Stock {
        price: Option<f64>,
        observers: Subscribers,
    },
}

#[derive(Debug)]
pub(crate) struct AssetInner {
    pub(crate) code: String,
    pub(crate) currency_code: String,
    pub(crate) multiplier: f64,
    pub(crate) kind: AssetKind,
}

/// A named, priceable instrument.
///
/// `Cash` has its price fixed at 1.0 in its own currency and acts as the settlement leg for
/// trades. `Stock` has a nullable price that is set by price events; until the first price
/// arrives the asset has no local value.
#[derive(Clone, Debug)]
pub struct Asset {
    pub(crate) inner: Rc<RefCell<AssetInner>>,
}

impl PartialEq for Asset {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Asset {
    pub(crate) fn from_inner(inner: Rc<RefCell<AssetInner>>) -> Self {
        Self { inner }
    }

    fn register(world: &World, code: &str, inner: AssetInner) -> Result<Asset> {
        let handle = Rc::new(RefCell::new(inner));
        world.register_asset(code, &handle)?;
        Ok(Asset { inner: handle })
    }

    /// Cash in `currency_code`; its code is the currency code itself.
    pub fn cash(world: &World, currency_code: &str) -> Result<Asset> {
        let code = check_currency_code(currency_code)?;
        let inner = AssetInner {
            code: code.clone(),
            currency_code: code.clone(),
            multiplier: 1.0,
            kind: AssetKind::Cash,
        };
        Self::register(world, &code, inner)
    }

    /// A stock with no price yet, denominated in the world's default currency.
    pub fn stock(world: &World, code: impl AsRef<str>) -> Result<Asset> {
        let currency_code = world.default_currency_code();
        Self::stock_in_currency(world, code, &currency_code)
    }

    pub fn stock_in_currency(
        world: &World,
        code: impl AsRef<str>,
        currency_code: &str,
    ) -> Result<Asset> {
        Self::new_stock(world, code, None, currency_code, 1.0)
    }

    pub fn stock_with_price(
        world: &World,
        code: impl AsRef<str>,
        price: f64,
        currency_code: &str,
    ) -> Result<Asset> {
        Self::new_stock(world, code, Some(price), currency_code, 1.0)
    }

    pub fn stock_with_multiplier(
        world: &World,
        code: impl AsRef<str>,
        currency_code: &str,
        multiplier: f64,
    ) -> Result<Asset> {
        Self::new_stock(world, code, None, currency_code, multiplier)
    }

    fn new_stock(
        world: &World,
        code: impl AsRef<str>,
        price: Option<f64>,
        currency_code: &str,
        multiplier: f64,
    ) -> Result<Asset> {
        let code = check_code(code.as_ref())?;
        let currency_code = check_currency_code(currency_code)?;
        if let Some(value) = price {
            if !value.is_finite() {
                return Err(Error::type_mismatch("expecting numeric price"));
            }
        }
        if !multiplier.is_finite() {
            return Err(Error::type_mismatch("expecting numeric multiplier"));
        }
        let inner = AssetInner {
            code: code.clone(),
            currency_code,
            multiplier,
            kind: AssetKind::Stock {
                price,
                observers: Subscribers::new(),
            },
        };
        Self::register(world, &code, inner)
    }

    pub fn code(&self) -> String {
        self.inner.borrow().code.clone()
    }

    pub fn currency_code(&self) -> String {
        self.inner.borrow().currency_code.clone()
    }

    pub fn multiplier(&self) -> f64 {
        self.inner.borrow().multiplier
    }

    pub fn is_cash(&self) -> bool {
        matches!(self.inner.borrow().kind, AssetKind::Cash)
    }

    pub fn is_variable_price(&self) -> bool {
        !self.is_cash()
    }

    pub fn price(&self) -> Option<f64> {
        match self.inner.borrow().kind {
            AssetKind::Cash => Some(1.0),
            AssetKind::Stock { price, .. } => price,
        }
    }

    /// The asset's value in its own currency, `price * multiplier`, undefined until a
    /// variable-price asset sees its first price.
    pub fn local_value(&self) -> Option<f64> {
        let inner = self.inner.borrow();
        match inner.kind {
            AssetKind::Cash => Some(inner.multiplier),
            AssetKind::Stock { price, .. } => price.map(|value| value * inner.multiplier),
        }
    }

    /// Update the price and notify subscribed portfolios. `None` clears the valuation. The
    /// price of cash is fixed and cannot be set.
    pub fn set_price(&self, price: Option<f64>) -> Result<()> {
        if let Some(value) = price {
            if !value.is_finite() {
                return Err(Error::type_mismatch("expecting numeric price"));
            }
        }
        {
            let mut inner = self.inner.borrow_mut();
            match &mut inner.kind {
                AssetKind::Cash => {
                    return Err(Error::type_mismatch("the price of cash is fixed at 1.0"))
                }
                AssetKind::Stock { price: stored, .. } => *stored = price,
            }
        }
        self.notify_observers()
    }

    //The inner borrow is released before any observer runs so that observers can read this
    //asset while reacting to the change.
    fn notify_observers(&self) -> Result<()> {
        let snapshot = {
            let mut inner = self.inner.borrow_mut();
            match &mut inner.kind {
                AssetKind::Cash => Vec::new(),
                AssetKind::Stock { observers, .. } => observers.snapshot(),
            }
        };
        for observer in snapshot {
            observer.borrow_mut().on_update()?;
        }
        Ok(())
    }

    pub(crate) fn add_observer(&self, observer: WeakObserver) {
        let mut inner = self.inner.borrow_mut();
        if let AssetKind::Stock { observers, .. } = &mut inner.kind {
            observers.add(observer);
        }
    }

    pub(crate) fn remove_observer(&self, observer: &WeakObserver) {
        let mut inner = self.inner.borrow_mut();
        if let AssetKind::Stock { observers, .. } = &mut inner.kind {
            observers.remove(observer);
        }
    }

    pub(crate) fn has_observer(&self, observer: &WeakObserver) -> bool {
        match &self.inner.borrow().kind {
            AssetKind::Cash => false,
            AssetKind::Stock { observers, .. } => observers.contains(observer),
        }
    }

    pub fn observer_count(&self) -> usize {
        match &self.inner.borrow().kind {
            AssetKind::Cash => 0,
            AssetKind::Stock { observers, .. } => observers.live_count(),
        }
    }
}
