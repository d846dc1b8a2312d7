//! Strategy directory: name → factory.
//!
//! Built-ins register in `Default`; callers (API layer, scheduler) add their
//! own factories at startup. Instantiation takes the declarative parameter
//! bundle as JSON so the registry stays ignorant of concrete param structs.

use std::collections::HashMap;

use kt_types::StrategyError;

use crate::base::Strategy;
use crate::dynamic::DynamicStrategy;
use crate::examples::{
    EqualWeightParams, EqualWeightPortfolioStrategy, MaCrossParams, MaCrossStrategy,
    MomentumParams, MomentumStrategy,
};

pub type StrategyFactory =
    fn(serde_json::Value) -> Result<Box<dyn Strategy>, StrategyError>;

pub struct StrategyRegistry {
    factories: HashMap<String, StrategyFactory>,
}

impl StrategyRegistry {
    pub fn empty() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    pub fn register(&mut self, name: impl Into<String>, factory: StrategyFactory) {
        self.factories.insert(name.into(), factory);
    }

    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.factories.keys().map(String::as_str).collect();
        names.sort();
        names
    }

    pub fn create(
        &self,
        name: &str,
        params: serde_json::Value,
    ) -> Result<Box<dyn Strategy>, StrategyError> {
        let factory = self
            .factories
            .get(name)
            .ok_or_else(|| StrategyError::NotFound {
                name: name.to_string(),
            })?;
        factory(params)
    }
}

fn invalid(e: serde_json::Error) -> StrategyError {
    StrategyError::InvalidConfig {
        message: e.to_string(),
    }
}

fn make_ma_cross(params: serde_json::Value) -> Result<Box<dyn Strategy>, StrategyError> {
    let params: MaCrossParams = serde_json::from_value(params).map_err(invalid)?;
    Ok(Box::new(MaCrossStrategy::new(params)))
}

fn make_momentum(params: serde_json::Value) -> Result<Box<dyn Strategy>, StrategyError> {
    let params: MomentumParams = serde_json::from_value(params).map_err(invalid)?;
    Ok(Box::new(MomentumStrategy::new(params)))
}

fn make_equal_weight(params: serde_json::Value) -> Result<Box<dyn Strategy>, StrategyError> {
    let params: EqualWeightParams = serde_json::from_value(params).map_err(invalid)?;
    Ok(Box::new(EqualWeightPortfolioStrategy::new(params)))
}

fn make_dynamic(params: serde_json::Value) -> Result<Box<dyn Strategy>, StrategyError> {
    Ok(Box::new(DynamicStrategy::from_json(params)?))
}

impl Default for StrategyRegistry {
    fn default() -> Self {
        let mut registry = Self::empty();
        registry.register("ma_cross", make_ma_cross);
        registry.register("momentum", make_momentum);
        registry.register("equal_weight_portfolio", make_equal_weight);
        registry.register("dynamic", make_dynamic);
        registry
    }
}
