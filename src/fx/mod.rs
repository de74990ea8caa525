//! Currency pairs used to value assets in a portfolio's base currency
//!
//! Assets track their local value, but portfolios may hold assets denominated in several
//! currencies, so every valuation needs a rate back to the base currency. A pair is stored
//! exactly once per direction: the inverse is always derived, never stored, and an identity
//! pair (AUDAUD) is never stored at all because its rate is 1.0 by definition.

use std::cell::RefCell;
use std::rc::Rc;

use log::debug;

use crate::error::{Error, Result};
use crate::observable::{Subscribers, WeakObserver};
use crate::world::{check_code, World};

/// Normalize and validate a 6 character currency pair.
pub fn validate_pair(pair: &str) -> Result<String> {
    let cleaned = check_code(pair)?;
    if cleaned.len() != 6 || !cleaned.is_ascii() {
        return Err(Error::domain_violation(format!(
            "currency pair must be 6 characters: {cleaned}"
        )));
    }
    Ok(cleaned)
}

/// The two individual components of a pair: `"AUDUSD"` splits to `("AUD", "USD")`.
pub fn split_pair(pair: &str) -> Result<(String, String)> {
    let pair = validate_pair(pair)?;
    Ok((pair[..3].to_string(), pair[3..].to_string()))
}

/// The inverse of a pair: `"AUDUSD"` inverts to `"USDAUD"`.
pub fn inverse_pair(pair: &str) -> Result<String> {
    let (ccy1, ccy2) = split_pair(pair)?;
    Ok(ccy2 + &ccy1)
}

/// True where the rate is static by definition: `AUDAUD` is always 1.0.
pub fn is_identity_pair(pair: &str) -> Result<bool> {
    let (ccy1, ccy2) = split_pair(pair)?;
    Ok(ccy1 == ccy2)
}

#[derive(Debug)]
pub(crate) struct FxRateInner {
    pub(crate) pair: String,
    pub(crate) rate: Option<f64>,
    observers: Subscribers,
}

/// One direction of a currency pair: the number of units of the second currency per unit of the
/// first. Rate changes notify every portfolio valuing through the pair.
#[derive(Clone, Debug)]
pub struct FxRate {
    inner: Rc<RefCell<FxRateInner>>,
}

impl PartialEq for FxRate {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }
}

impl FxRate {
    pub(crate) fn from_inner(inner: Rc<RefCell<FxRateInner>>) -> Self {
        Self { inner }
    }

    /// Register `pair` in the world with no rate yet. Fails if the pair, or its inverse, is
    /// already stored, or if the pair is an identity pair.
    pub fn new(world: &World, pair: &str) -> Result<FxRate> {
        let pair = validate_pair(pair)?;
        if is_identity_pair(&pair)? {
            return Err(Error::domain_violation(format!(
                "{pair} is static by definition and cannot be stored"
            )));
        }
        let handle = Rc::new(RefCell::new(FxRateInner {
            pair: pair.clone(),
            rate: None,
            observers: Subscribers::new(),
        }));
        world.register_fx(&pair, &handle)?;
        Ok(FxRate { inner: handle })
    }

    pub fn with_rate(world: &World, pair: &str, rate: f64) -> Result<FxRate> {
        let fx = Self::new(world, pair)?;
        fx.set_rate(Some(rate))?;
        Ok(fx)
    }

    pub fn pair(&self) -> String {
        self.inner.borrow().pair.clone()
    }

    pub fn rate(&self) -> Option<f64> {
        self.inner.borrow().rate
    }

    /// Update the rate and notify subscribers. A rate must be finite and strictly positive;
    /// `None` clears it.
    pub fn set_rate(&self, rate: Option<f64>) -> Result<()> {
        if let Some(value) = rate {
            if !value.is_finite() {
                return Err(Error::type_mismatch("expecting numeric rate or None"));
            }
            if value <= 0.0 {
                return Err(Error::domain_violation("FX rate must be > 0"));
            }
        }
        {
            let mut inner = self.inner.borrow_mut();
            inner.rate = rate;
            debug!("FX: {} rate set to {:?}", inner.pair, rate);
        }
        self.notify_observers()
    }

    fn notify_observers(&self) -> Result<()> {
        let snapshot = self.inner.borrow_mut().observers.snapshot();
        for observer in snapshot {
            observer.borrow_mut().on_update()?;
        }
        Ok(())
    }

    pub(crate) fn add_observer(&self, observer: WeakObserver) {
        self.inner.borrow_mut().observers.add(observer);
    }

    pub(crate) fn remove_observer(&self, observer: &WeakObserver) {
        self.inner.borrow_mut().observers.remove(observer);
    }

    pub(crate) fn has_observer(&self, observer: &WeakObserver) -> bool {
        self.inner.borrow().observers.contains(observer)
    }

    pub fn observer_count(&self) -> usize {
        self.inner.borrow().observers.live_count()
    }
}
