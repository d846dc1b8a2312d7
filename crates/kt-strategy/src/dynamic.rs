//! Declarative ("builder") strategies.
//!
//! A strategy arrives as a JSON tree of indicator thresholds and logical
//! operators. The tree is deserialized into [`ConditionNode`] and evaluated
//! by a recursive visitor with a hard depth bound; indicator values are
//! computed once per bar by the pre-pass and the visitor only reads them.

use std::collections::HashMap;

use chrono::NaiveDate;
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::warn;

use kt_types::{Account, Order, OrderIntent, OrderSide, Position, StrategyError};

use crate::base::{find_position, BarSeries, MarketSnapshot, Strategy};
use crate::indicators::{apply_indicators, IndicatorFrame};

/// Maximum recursion depth for condition trees.
pub const MAX_CONDITION_DEPTH: usize = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LogicalOp {
    And,
    Or,
    Not,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CmpOp {
    #[serde(rename = ">")]
    Gt,
    #[serde(rename = "<")]
    Lt,
    #[serde(rename = ">=")]
    Ge,
    #[serde(rename = "<=")]
    Le,
    #[serde(rename = "==")]
    Eq,
}

/// Per-indicator parameters. `period` lives here, never on the enclosing
/// condition record.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IndicatorParams {
    #[serde(default)]
    pub period: Option<usize>,
    #[serde(default)]
    pub fast: Option<usize>,
    #[serde(default)]
    pub slow: Option<usize>,
}

/// One node of a declarative condition tree.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ConditionNode {
    /// `AND`/`OR` with two operands; `NOT` uses `left` only.
    Logical {
        op: LogicalOp,
        left: Box<ConditionNode>,
        #[serde(default)]
        right: Option<Box<ConditionNode>>,
    },
    /// Numeric comparison of two value nodes.
    Cmp {
        op: CmpOp,
        left: Box<ConditionNode>,
        right: Box<ConditionNode>,
    },
    /// Named indicator value (`MA`, `EMA`, `RSI`, `MACD`, or a prepared ICT
    /// column such as `fvg_type`).
    Indicator {
        name: String,
        #[serde(default)]
        params: IndicatorParams,
    },
    /// Latest close.
    Price,
    /// Latest bar volume.
    Volume,
    Literal {
        value: f64,
    },
}

impl ConditionNode {
    /// Column name this indicator reference reads.
    fn column_name(name: &str, params: &IndicatorParams) -> String {
        match name {
            "MA" | "EMA" | "RSI" => format!("{name}_{}", params.period.unwrap_or(14)),
            "MACD" => format!(
                "MACD_{}_{}",
                params.fast.unwrap_or(12),
                params.slow.unwrap_or(26)
            ),
            other => other.to_string(),
        }
    }

    /// Collect `(indicator, period)` pairs for the pre-pass.
    fn collect_refs(&self, refs: &mut Vec<(String, usize)>) {
        match self {
            ConditionNode::Logical { left, right, .. } => {
                left.collect_refs(refs);
                if let Some(right) = right {
                    right.collect_refs(refs);
                }
            }
            ConditionNode::Cmp { left, right, .. } => {
                left.collect_refs(refs);
                right.collect_refs(refs);
            }
            ConditionNode::Indicator { name, params } => match name.as_str() {
                "MA" | "EMA" | "RSI" => {
                    refs.push((name.clone(), params.period.unwrap_or(14)));
                }
                "MACD" => {
                    let fast = params.fast.unwrap_or(12);
                    let slow = params.slow.unwrap_or(26);
                    refs.push((format!("MACD_{fast}_{slow}"), slow));
                }
                // ICT columns are always produced by the pre-pass.
                _ => {}
            },
            _ => {}
        }
    }

    /// Largest lookback any referenced indicator needs.
    fn max_period(&self) -> usize {
        let mut refs = Vec::new();
        self.collect_refs(&mut refs);
        refs.iter().map(|(_, p)| *p).max().unwrap_or(0)
    }
}

/// Evaluation result: a boolean, a number, or unknown (warm-up / missing
/// column). Unknown operands make the enclosing comparison false rather than
/// erroring out mid-session.
enum NodeValue {
    Bool(bool),
    Num(Decimal),
    Unknown,
}

fn eval(
    node: &ConditionNode,
    frame: &IndicatorFrame,
    bars: &BarSeries<'_>,
    depth: usize,
) -> Result<NodeValue, StrategyError> {
    if depth > MAX_CONDITION_DEPTH {
        return Err(StrategyError::ConditionTooDeep {
            depth,
            limit: MAX_CONDITION_DEPTH,
        });
    }

    match node {
        ConditionNode::Logical { op, left, right } => {
            let lhs = as_bool(eval(left, frame, bars, depth + 1)?);
            match op {
                LogicalOp::Not => Ok(NodeValue::Bool(!lhs)),
                LogicalOp::And | LogicalOp::Or => {
                    let rhs = match right {
                        Some(right) => as_bool(eval(right, frame, bars, depth + 1)?),
                        None => false,
                    };
                    let value = match op {
                        LogicalOp::And => lhs && rhs,
                        _ => lhs || rhs,
                    };
                    Ok(NodeValue::Bool(value))
                }
            }
        }
        ConditionNode::Cmp { op, left, right } => {
            let lhs = eval(left, frame, bars, depth + 1)?;
            let rhs = eval(right, frame, bars, depth + 1)?;
            match (lhs, rhs) {
                (NodeValue::Num(l), NodeValue::Num(r)) => {
                    let value = match op {
                        CmpOp::Gt => l > r,
                        CmpOp::Lt => l < r,
                        CmpOp::Ge => l >= r,
                        CmpOp::Le => l <= r,
                        CmpOp::Eq => l == r,
                    };
                    Ok(NodeValue::Bool(value))
                }
                _ => Ok(NodeValue::Bool(false)),
            }
        }
        ConditionNode::Indicator { name, params } => {
            let column = ConditionNode::column_name(name, params);
            Ok(frame
                .latest(&column)
                .map_or(NodeValue::Unknown, NodeValue::Num))
        }
        ConditionNode::Price => Ok(bars
            .last()
            .map_or(NodeValue::Unknown, |b| NodeValue::Num(b.close))),
        ConditionNode::Volume => Ok(bars
            .last()
            .map_or(NodeValue::Unknown, |b| NodeValue::Num(Decimal::from(b.volume)))),
        ConditionNode::Literal { value } => Ok(Decimal::from_f64(*value)
            .map_or(NodeValue::Unknown, NodeValue::Num)),
    }
}

fn as_bool(value: NodeValue) -> bool {
    matches!(value, NodeValue::Bool(true))
}

/// Universe filter block for portfolio-kind builder strategies.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UniverseFilter {
    /// Minimum previous-day traded value in KRW (default 100 billion).
    #[serde(default = "default_min_traded_value")]
    pub min_traded_value: Decimal,
    #[serde(default)]
    pub max_per: Option<Decimal>,
    #[serde(default)]
    pub min_roe: Option<Decimal>,
    #[serde(default = "default_top_n")]
    pub top_n: usize,
}

fn default_min_traded_value() -> Decimal {
    Decimal::from(100_000_000_000i64)
}

fn default_top_n() -> usize {
    20
}

/// Declarative strategy configuration as produced by the builder.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DynamicConfig {
    pub name: String,
    /// Pinned symbol for single-symbol strategies.
    #[serde(default)]
    pub symbol: Option<String>,
    pub entry: ConditionNode,
    #[serde(default)]
    pub exit: Option<ConditionNode>,
    /// Fraction of equity committed per entry.
    #[serde(default = "default_position_size")]
    pub position_size: f64,
    #[serde(default)]
    pub trailing_stop_pct: Option<f64>,
    /// 0 disables pyramiding.
    #[serde(default)]
    pub max_pyramid_levels: u32,
    #[serde(default)]
    pub universe: Option<UniverseFilter>,
}

fn default_position_size() -> f64 {
    0.1
}

/// Per-symbol scratch state, cleaned atomically on exit.
#[derive(Debug, Clone, Default)]
struct SymbolState {
    entry_price: Decimal,
    pyramid_level: u32,
    last_entry_bar: usize,
    total_units: i64,
    highest_price: Decimal,
    trailing_stop_price: Option<Decimal>,
}

/// Interpreter for builder strategies.
pub struct DynamicStrategy {
    config: DynamicConfig,
    refs: Vec<(String, usize)>,
    state: HashMap<String, SymbolState>,
}

impl DynamicStrategy {
    pub fn new(config: DynamicConfig) -> Self {
        let mut refs = Vec::new();
        config.entry.collect_refs(&mut refs);
        if let Some(exit) = &config.exit {
            exit.collect_refs(&mut refs);
        }
        refs.sort();
        refs.dedup();
        Self {
            config,
            refs,
            state: HashMap::new(),
        }
    }

    pub fn from_json(raw: serde_json::Value) -> Result<Self, StrategyError> {
        let config: DynamicConfig =
            serde_json::from_value(raw).map_err(|e| StrategyError::InvalidConfig {
                message: e.to_string(),
            })?;
        Ok(Self::new(config))
    }

    fn entry_true(&self, frame: &IndicatorFrame, bars: &BarSeries<'_>) -> bool {
        match eval(&self.config.entry, frame, bars, 0) {
            Ok(value) => as_bool(value),
            Err(e) => {
                warn!(strategy = %self.config.name, error = %e, "entry evaluation failed");
                false
            }
        }
    }

    fn exit_true(&self, frame: &IndicatorFrame, bars: &BarSeries<'_>) -> bool {
        match &self.config.exit {
            Some(exit) => match eval(exit, frame, bars, 0) {
                Ok(value) => as_bool(value),
                Err(e) => {
                    warn!(strategy = %self.config.name, error = %e, "exit evaluation failed");
                    false
                }
            },
            None => false,
        }
    }

    fn unit_quantity(&self, account: &Account, price: Decimal) -> i64 {
        if price <= Decimal::ZERO {
            return 0;
        }
        let budget = account.equity * Decimal::from_f64(self.config.position_size)
            .unwrap_or_default();
        (budget / price).floor().try_into().unwrap_or(0)
    }
}

impl Strategy for DynamicStrategy {
    fn name(&self) -> &str {
        &self.config.name
    }

    fn params(&self) -> serde_json::Value {
        serde_json::to_value(&self.config).unwrap_or(serde_json::Value::Null)
    }

    fn warmup(&self) -> usize {
        self.config
            .entry
            .max_period()
            .max(
                self.config
                    .exit
                    .as_ref()
                    .map(|e| e.max_period())
                    .unwrap_or(0),
            )
            .max(2)
            + 1
    }

    fn on_bar(
        &mut self,
        bars: &BarSeries<'_>,
        positions: &[Position],
        account: &Account,
    ) -> Vec<OrderIntent> {
        let Some(last) = bars.last() else {
            return Vec::new();
        };
        if bars.len() < self.warmup() {
            return Vec::new();
        }

        let symbol = last.symbol.clone();
        let price = last.close;
        let frame = apply_indicators(bars, &self.refs);
        let position = find_position(&symbol, positions).filter(|p| p.quantity > 0);

        let mut intents = Vec::new();

        if let Some(position) = position {
            let state = self.state.entry(symbol.clone()).or_insert_with(|| SymbolState {
                entry_price: position.avg_price,
                total_units: position.quantity,
                highest_price: position.avg_price,
                ..SymbolState::default()
            });

            if price > state.highest_price {
                state.highest_price = price;
            }
            if let Some(pct) = self.config.trailing_stop_pct {
                let pct = Decimal::from_f64(pct).unwrap_or_default();
                state.trailing_stop_price =
                    Some(state.highest_price * (Decimal::ONE - pct));
            }

            let stop_hit = state
                .trailing_stop_price
                .map(|stop| price <= stop)
                .unwrap_or(false);

            let pyramid_level = state.pyramid_level;
            let last_entry_bar = state.last_entry_bar;

            if stop_hit || self.exit_true(&frame, bars) {
                intents.push(OrderIntent::market(
                    symbol.clone(),
                    OrderSide::Sell,
                    position.quantity,
                ));
                // Exit clears all per-symbol scratch in one step.
                self.state.remove(&symbol);
                return intents;
            }

            // Pyramiding: add a unit while the entry condition holds.
            if self.config.max_pyramid_levels > 0
                && pyramid_level < self.config.max_pyramid_levels
                && bars.len() > last_entry_bar
                && self.entry_true(&frame, bars)
            {
                let quantity = self.unit_quantity(account, price);
                if quantity > 0 {
                    let state = self
                        .state
                        .get_mut(&symbol)
                        .expect("state entry inserted above");
                    state.pyramid_level += 1;
                    state.last_entry_bar = bars.len();
                    state.total_units += quantity;
                    intents.push(OrderIntent::market(symbol, OrderSide::Buy, quantity));
                }
            }
            return intents;
        }

        if self.entry_true(&frame, bars) {
            let quantity = self.unit_quantity(account, price);
            if quantity > 0 {
                self.state.insert(
                    symbol.clone(),
                    SymbolState {
                        entry_price: price,
                        pyramid_level: 0,
                        last_entry_bar: bars.len(),
                        total_units: quantity,
                        highest_price: price,
                        trailing_stop_price: None,
                    },
                );
                intents.push(OrderIntent::market(symbol, OrderSide::Buy, quantity));
            }
        }

        intents
    }

    fn on_fill(&mut self, order: &Order, _position: Option<&Position>) {
        if let Some(state) = self.state.get_mut(&order.symbol) {
            if order.side == OrderSide::Buy && state.entry_price == Decimal::ZERO {
                state.entry_price = order.price.unwrap_or(Decimal::ZERO);
            }
        }
    }

    fn select_universe(&self, _date: NaiveDate, market: &MarketSnapshot) -> Vec<String> {
        let Some(filter) = &self.config.universe else {
            return Vec::new();
        };

        let mut candidates: Vec<(&String, &crate::base::SymbolInfo)> = market
            .iter()
            .filter(|(_, info)| info.traded_value >= filter.min_traded_value)
            .filter(|(_, info)| match filter.max_per {
                Some(max) => info.per.map(|v| v > Decimal::ZERO && v <= max).unwrap_or(false),
                None => true,
            })
            .filter(|(_, info)| match filter.min_roe {
                Some(min) => info.roe.map(|v| v >= min).unwrap_or(false),
                None => true,
            })
            .collect();

        candidates.sort_by(|a, b| b.1.traded_value.cmp(&a.1.traded_value));
        candidates
            .into_iter()
            .take(filter.top_n)
            .map(|(symbol, _)| symbol.clone())
            .collect()
    }

    fn is_portfolio(&self) -> bool {
        self.config.universe.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use kt_types::Ohlc;
    use rust_decimal_macros::dec;
    use serde_json::json;

    fn make_bars(closes: &[i64]) -> Vec<Ohlc> {
        closes
            .iter()
            .enumerate()
            .map(|(i, &c)| {
                let ts = NaiveDate::from_ymd_opt(2025, 1, 1)
                    .unwrap()
                    .and_hms_opt(9, 0, 0)
                    .unwrap()
                    + chrono::Duration::minutes(i as i64);
                let close = Decimal::from(c);
                Ohlc::new("005930", ts, close, close, close, close, 1000, None).unwrap()
            })
            .collect()
    }

    fn account() -> Account {
        Account::new("test", dec!(10_000_000))
    }

    fn price_above_ma_config() -> serde_json::Value {
        json!({
            "name": "price_above_ma",
            "symbol": "005930",
            "position_size": 0.1,
            "entry": {
                "type": "cmp",
                "op": ">",
                "left": {"type": "price"},
                "right": {"type": "indicator", "name": "MA", "params": {"period": 3}}
            },
            "exit": {
                "type": "cmp",
                "op": "<",
                "left": {"type": "price"},
                "right": {"type": "indicator", "name": "MA", "params": {"period": 3}}
            }
        })
    }

    #[test]
    fn test_config_deserializes_and_collects_refs() {
        let strategy = DynamicStrategy::from_json(price_above_ma_config()).unwrap();
        assert_eq!(strategy.refs, vec![("MA".to_string(), 3)]);
        assert_eq!(strategy.warmup(), 4);
    }

    #[test]
    fn test_entry_emits_buy_when_price_above_ma() {
        let mut strategy = DynamicStrategy::from_json(price_above_ma_config()).unwrap();
        // Rising closes: last price above MA_3.
        let data = make_bars(&[100, 100, 100, 100, 120]);
        let intents = strategy.on_bar(&BarSeries::new(&data), &[], &account());
        assert_eq!(intents.len(), 1);
        assert_eq!(intents[0].side, OrderSide::Buy);
        // 10% of 10M at price 120.
        assert_eq!(intents[0].quantity, 8333);
    }

    #[test]
    fn test_exit_sells_whole_position_and_clears_state() {
        let mut strategy = DynamicStrategy::from_json(price_above_ma_config()).unwrap();

        let mut pos = Position::new("005930");
        pos.apply_buy(100, dec!(120));

        // Falling closes: price below MA_3.
        let data = make_bars(&[120, 120, 120, 120, 90]);
        let intents = strategy.on_bar(&BarSeries::new(&data), &[pos], &account());
        assert_eq!(intents.len(), 1);
        assert_eq!(intents[0].side, OrderSide::Sell);
        assert_eq!(intents[0].quantity, 100);
        assert!(strategy.state.is_empty());
    }

    #[test]
    fn test_depth_bound_enforced() {
        // Build a NOT-chain deeper than the cap.
        let mut node = json!({"type": "literal", "value": 1.0});
        for _ in 0..(MAX_CONDITION_DEPTH + 2) {
            node = json!({"type": "logical", "op": "NOT", "left": node});
        }
        let strategy = DynamicStrategy::from_json(json!({
            "name": "too_deep",
            "entry": node
        }))
        .unwrap();

        let data = make_bars(&[100, 101, 102, 103]);
        let series = BarSeries::new(&data);
        let frame = apply_indicators(&series, &strategy.refs);
        let result = eval(&strategy.config.entry, &frame, &series, 0);
        assert!(matches!(
            result,
            Err(StrategyError::ConditionTooDeep { .. })
        ));
    }

    #[test]
    fn test_unknown_indicator_value_is_false() {
        // RSI_14 needs 15 bars; feed fewer after forcing a tiny warm-up so the
        // comparison sees Unknown and must answer false.
        let strategy = DynamicStrategy::from_json(json!({
            "name": "rsi_gate",
            "entry": {
                "type": "cmp",
                "op": "<",
                "left": {"type": "indicator", "name": "RSI", "params": {"period": 14}},
                "right": {"type": "literal", "value": 30.0}
            }
        }))
        .unwrap();

        let data = make_bars(&[100, 101, 102, 103, 104]);
        let series = BarSeries::new(&data);
        let frame = apply_indicators(&series, &strategy.refs);
        assert!(!strategy.entry_true(&frame, &series));
    }

    #[test]
    fn test_trailing_stop_exits() {
        let mut strategy = DynamicStrategy::from_json(json!({
            "name": "trailer",
            "symbol": "005930",
            "trailing_stop_pct": 0.05,
            "entry": {"type": "cmp", "op": ">", "left": {"type": "price"},
                       "right": {"type": "literal", "value": 1000000.0}},
        }))
        .unwrap();

        let mut pos = Position::new("005930");
        pos.apply_buy(10, dec!(100));

        // Run up to 120, then collapse to 110 (> 5% off the 120 peak).
        let up = make_bars(&[100, 105, 110, 120]);
        let intents = strategy.on_bar(&BarSeries::new(&up), &[pos.clone()], &account());
        assert!(intents.is_empty());

        let down = make_bars(&[100, 105, 110, 120, 110]);
        let intents = strategy.on_bar(&BarSeries::new(&down), &[pos], &account());
        assert_eq!(intents.len(), 1);
        assert_eq!(intents[0].side, OrderSide::Sell);
    }

    #[test]
    fn test_universe_filter_orders_by_traded_value() {
        let strategy = DynamicStrategy::from_json(json!({
            "name": "portfolio",
            "entry": {"type": "literal", "value": 1.0},
            "universe": {"min_traded_value": "1000", "top_n": 2}
        }))
        .unwrap();
        assert!(strategy.is_portfolio());

        let mut market = MarketSnapshot::new();
        for (symbol, value) in [("005930", 5000i64), ("000660", 9000), ("035420", 500)] {
            market.insert(
                symbol.to_string(),
                crate::base::SymbolInfo {
                    name: symbol.to_string(),
                    close: dec!(10000),
                    traded_value: Decimal::from(value),
                    per: None,
                    pbr: None,
                    roe: None,
                },
            );
        }

        let universe =
            strategy.select_universe(NaiveDate::from_ymd_opt(2025, 1, 2).unwrap(), &market);
        assert_eq!(universe, vec!["000660".to_string(), "005930".to_string()]);
    }
}
