//! Parallel grid-search driver.
//!
//! Expands a parameter grid into its Cartesian product, runs one independent
//! backtest per combination on a rayon pool (workers default to the core
//! count), and ranks the results by a chosen metric. Bar data is shared
//! read-only; every engine gets its own strategy instance.

use std::collections::BTreeMap;

use rayon::prelude::*;
use serde_json::{Map, Value};
use tracing::{info, warn};

use kt_strategy::StrategyRegistry;
use kt_types::{BacktestResult, KtResult, Ohlc, StrategyError};

use crate::engine::{BacktestConfig, BacktestEngine};

/// Parameter grid: name → candidate values. `BTreeMap` keeps expansion
/// order deterministic.
pub type ParameterGrid = BTreeMap<String, Vec<Value>>;

/// Cartesian product of the grid, merged over `base` parameters.
pub fn expand_grid(base: &Value, grid: &ParameterGrid) -> Vec<Value> {
    let base_map = base.as_object().cloned().unwrap_or_default();
    let mut combos: Vec<Map<String, Value>> = vec![base_map];

    for (name, values) in grid {
        let mut next = Vec::with_capacity(combos.len() * values.len());
        for combo in &combos {
            for value in values {
                let mut merged = combo.clone();
                merged.insert(name.clone(), value.clone());
                next.push(merged);
            }
        }
        combos = next;
    }

    combos.into_iter().map(Value::Object).collect()
}

/// One grid cell's outcome.
#[derive(Debug)]
pub struct GridCell {
    pub parameters: Value,
    pub result: KtResult<BacktestResult>,
}

/// Run a full grid search and rank the successful runs.
pub struct GridDriver {
    config: BacktestConfig,
    /// Metric used for ranking (descending). Default "sharpe".
    rank_by: String,
}

impl GridDriver {
    pub fn new(config: BacktestConfig) -> Self {
        Self {
            config,
            rank_by: "sharpe".to_string(),
        }
    }

    pub fn rank_by(mut self, metric: &str) -> Self {
        self.rank_by = metric.to_string();
        self
    }

    /// Run every combination of `grid` for `strategy_name` over `bars`.
    ///
    /// Returns the successful results ranked by the driver's metric,
    /// descending, with parameter order as a deterministic tie-break.
    pub fn run(
        &self,
        registry: &StrategyRegistry,
        strategy_name: &str,
        base_params: &Value,
        grid: &ParameterGrid,
        bars: &[Ohlc],
    ) -> Result<Vec<BacktestResult>, StrategyError> {
        if !registry.contains(strategy_name) {
            return Err(StrategyError::NotFound {
                name: strategy_name.to_string(),
            });
        }

        let combos = expand_grid(base_params, grid);
        info!(
            strategy = strategy_name,
            combinations = combos.len(),
            workers = rayon::current_num_threads(),
            "grid search started"
        );

        let cells: Vec<GridCell> = combos
            .into_par_iter()
            .map(|params| {
                let result = registry
                    .create(strategy_name, params.clone())
                    .map_err(Into::into)
                    .and_then(|mut strategy| {
                        BacktestEngine::new(self.config.clone()).run(strategy.as_mut(), bars)
                    });
                GridCell {
                    parameters: params,
                    result,
                }
            })
            .collect();

        let mut results = Vec::with_capacity(cells.len());
        for cell in cells {
            match cell.result {
                Ok(result) => results.push(result),
                Err(e) => {
                    warn!(parameters = %cell.parameters, error = %e, "grid cell failed")
                }
            }
        }

        self.rank(&mut results);
        info!(completed = results.len(), "grid search finished");
        Ok(results)
    }

    fn rank(&self, results: &mut [BacktestResult]) {
        let metric = self.rank_by.as_str();
        results.sort_by(|a, b| {
            let a_value = a.metric(metric);
            let b_value = b.metric(metric);
            b_value
                .partial_cmp(&a_value)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.parameters.to_string().cmp(&b.parameters.to_string()))
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;
    use serde_json::json;

    fn seeded_bars(n: usize, seed: u64) -> Vec<Ohlc> {
        let mut state = seed;
        let mut price = dec!(70000);
        let mut bars = Vec::with_capacity(n);
        for i in 0..n {
            state = state
                .wrapping_mul(6364136223846793005)
                .wrapping_add(1442695040888963407);
            let step = ((state >> 33) % 2001) as i64 - 1000;
            let open = price;
            let close = (price + Decimal::from(step)).max(dec!(1000));
            let ts = NaiveDate::from_ymd_opt(2024, 1, 1)
                .unwrap()
                .and_hms_opt(15, 30, 0)
                .unwrap()
                + chrono::Duration::days(i as i64);
            bars.push(
                Ohlc::new(
                    "005930",
                    ts,
                    open,
                    open.max(close) + dec!(100),
                    open.min(close) - dec!(100),
                    close,
                    50_000,
                    None,
                )
                .unwrap(),
            );
            price = close;
        }
        bars
    }

    #[test]
    fn test_expand_grid_cartesian_product() {
        let mut grid = ParameterGrid::new();
        grid.insert("short".into(), vec![json!(5), json!(10)]);
        grid.insert("long".into(), vec![json!(20), json!(30)]);

        let combos = expand_grid(&json!({"position_size": 0.1}), &grid);
        assert_eq!(combos.len(), 4);
        for combo in &combos {
            assert_eq!(combo["position_size"], json!(0.1));
            assert!(combo.get("short").is_some());
            assert!(combo.get("long").is_some());
        }
        // Deterministic ordering: BTreeMap iterates long before short.
        assert_eq!(combos[0]["long"], json!(20));
        assert_eq!(combos[0]["short"], json!(5));
        assert_eq!(combos[1]["long"], json!(20));
        assert_eq!(combos[1]["short"], json!(10));
    }

    #[test]
    fn test_grid_run_ranking_is_stable() {
        let registry = StrategyRegistry::default();
        let bars = seeded_bars(120, 7);

        let mut grid = ParameterGrid::new();
        grid.insert("short".into(), vec![json!(5), json!(10)]);
        grid.insert("long".into(), vec![json!(20), json!(30)]);

        let driver = GridDriver::new(BacktestConfig::default());
        let base = json!({"position_size": 0.1});

        let first = driver
            .run(&registry, "ma_cross", &base, &grid, &bars)
            .unwrap();
        let second = driver
            .run(&registry, "ma_cross", &base, &grid, &bars)
            .unwrap();

        assert_eq!(first.len(), 4);
        let order_a: Vec<String> = first.iter().map(|r| r.parameters.to_string()).collect();
        let order_b: Vec<String> = second.iter().map(|r| r.parameters.to_string()).collect();
        assert_eq!(order_a, order_b);

        // Ranked descending by the metric.
        for pair in first.windows(2) {
            let a = pair[0].metric("sharpe");
            let b = pair[1].metric("sharpe");
            assert!(a >= b, "ranking violated: {a:?} < {b:?}");
        }
    }

    #[test]
    fn test_unknown_strategy_fails_fast() {
        let registry = StrategyRegistry::default();
        let driver = GridDriver::new(BacktestConfig::default());
        let result = driver.run(
            &registry,
            "no_such_strategy",
            &json!({}),
            &ParameterGrid::new(),
            &seeded_bars(50, 1),
        );
        assert!(matches!(result, Err(StrategyError::NotFound { .. })));
    }
}
