//! Pre-trade checks over a portfolio's hypothetical state
//!
//! Rules are arranged as a composite: [Compliance] is a set of [ComplianceRule]s and passes only
//! when every rule passes. The pipeline evaluates the composite against the portfolio as if the
//! trade had executed, so rules only ever see a complete portfolio state.

use std::rc::Rc;

use crate::asset::Asset;
use crate::error::{Error, Result};
use crate::portfolio::Portfolio;

/// A pure predicate over a portfolio state.
pub trait ComplianceRule {
    fn passes(&self, portfolio: &Portfolio) -> Result<bool>;
}

//Rules are compared by allocation so that adding or removing the same handle twice is a no-op.
//The data pointer is used directly because fat pointer comparisons are unreliable.
fn rule_ptr(rule: &Rc<dyn ComplianceRule>) -> *const () {
    Rc::as_ptr(rule) as *const ()
}

/// The AND-composition of a set of rules. An empty composite passes everything.
#[derive(Clone, Default)]
pub struct Compliance {
    rules: Vec<Rc<dyn ComplianceRule>>,
}

impl Compliance {
    pub fn new() -> Self {
        Self { rules: Vec::new() }
    }

    pub fn add_rule(&mut self, rule: Rc<dyn ComplianceRule>) {
        if !self.rules.iter().any(|existing| rule_ptr(existing) == rule_ptr(&rule)) {
            self.rules.push(rule);
        }
    }

    pub fn remove_rule(&mut self, rule: &Rc<dyn ComplianceRule>) {
        self.rules.retain(|existing| rule_ptr(existing) != rule_ptr(rule));
    }

    /// Chaining form of [Compliance::add_rule].
    pub fn with_rule(mut self, rule: Rc<dyn ComplianceRule>) -> Self {
        self.add_rule(rule);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn passes(&self, portfolio: &Portfolio) -> Result<bool> {
        for rule in &self.rules {
            if !rule.passes(portfolio)? {
                return Ok(false);
            }
        }
        Ok(true)
    }
}

/// Caps the absolute number of units held in one asset.
pub struct UnitLimit {
    asset: Asset,
    unit_limit: i64,
}

impl UnitLimit {
    pub fn new(asset: &Asset, unit_limit: i64) -> Self {
        Self {
            asset: asset.clone(),
            unit_limit: unit_limit.abs(),
        }
    }
}

impl ComplianceRule for UnitLimit {
    fn passes(&self, portfolio: &Portfolio) -> Result<bool> {
        let position = portfolio.get_holding_units(&self.asset.code());
        Ok(position.abs() <= self.unit_limit as f64)
    }
}

/// Caps the absolute weight of one asset in the portfolio.
pub struct WeightLimit {
    asset: Asset,
    weight_limit: f64,
}

impl WeightLimit {
    pub fn new(asset: &Asset, weight_limit: f64) -> Result<Self> {
        if !weight_limit.is_finite() {
            return Err(Error::type_mismatch("expecting numeric weight limit"));
        }
        Ok(Self {
            asset: asset.clone(),
            weight_limit: weight_limit.abs(),
        })
    }
}

impl ComplianceRule for WeightLimit {
    fn passes(&self, portfolio: &Portfolio) -> Result<bool> {
        let weight = portfolio.get_holding_weight(&self.asset.code())?;
        Ok(weight.abs() <= self.weight_limit)
    }
}
