//! Built-in strategies.

use std::collections::HashMap;

use chrono::NaiveDate;
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use kt_types::{Account, OrderIntent, OrderSide, Position};

use crate::base::{find_position, BarSeries, MarketSnapshot, Strategy};
use crate::indicators::sma;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CrossSignal {
    Golden,
    Dead,
}

/// Moving-average crossover: buy when the short MA crosses above the long
/// MA, sell the whole position when it crosses back below.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MaCrossParams {
    #[serde(default = "default_short")]
    pub short: usize,
    #[serde(default = "default_long")]
    pub long: usize,
    /// Fraction of equity committed per entry.
    #[serde(default = "default_position_size")]
    pub position_size: f64,
    #[serde(default)]
    pub symbol: Option<String>,
}

fn default_short() -> usize {
    5
}

fn default_long() -> usize {
    20
}

fn default_position_size() -> f64 {
    0.1
}

pub struct MaCrossStrategy {
    params: MaCrossParams,
    last_signal: Option<CrossSignal>,
}

impl MaCrossStrategy {
    pub fn new(params: MaCrossParams) -> Self {
        Self {
            params,
            last_signal: None,
        }
    }

    fn signal(&self, bars: &BarSeries<'_>) -> Option<CrossSignal> {
        let closes: Vec<Decimal> = bars.closes().collect();
        let short = sma(&closes, self.params.short);
        let long = sma(&closes, self.params.long);
        let (s, l) = (short.last()?.as_ref()?, long.last()?.as_ref()?);
        if s > l {
            Some(CrossSignal::Golden)
        } else if s < l {
            Some(CrossSignal::Dead)
        } else {
            None
        }
    }
}

impl Strategy for MaCrossStrategy {
    fn name(&self) -> &str {
        "ma_cross"
    }

    fn params(&self) -> serde_json::Value {
        serde_json::to_value(&self.params).unwrap_or(serde_json::Value::Null)
    }

    fn warmup(&self) -> usize {
        self.params.long + 1
    }

    fn on_bar(
        &mut self,
        bars: &BarSeries<'_>,
        positions: &[Position],
        account: &Account,
    ) -> Vec<OrderIntent> {
        if bars.len() < self.warmup() {
            return Vec::new();
        }
        let Some(last) = bars.last() else {
            return Vec::new();
        };
        let Some(signal) = self.signal(bars) else {
            return Vec::new();
        };
        if Some(signal) == self.last_signal {
            return Vec::new();
        }
        self.last_signal = Some(signal);

        let symbol = last.symbol.clone();
        let position = find_position(&symbol, positions).filter(|p| p.quantity > 0);

        match signal {
            CrossSignal::Golden if position.is_none() => {
                let budget = account.equity
                    * Decimal::from_f64(self.params.position_size).unwrap_or_default();
                let quantity: i64 = if last.close > Decimal::ZERO {
                    (budget / last.close).floor().try_into().unwrap_or(0)
                } else {
                    0
                };
                if quantity > 0 {
                    vec![OrderIntent::market(symbol, OrderSide::Buy, quantity)]
                } else {
                    Vec::new()
                }
            }
            CrossSignal::Dead => match position {
                Some(p) => vec![OrderIntent::market(symbol, OrderSide::Sell, p.quantity)],
                None => Vec::new(),
            },
            _ => Vec::new(),
        }
    }
}

/// Momentum: go long when the lookback return exceeds the threshold, flat
/// when it turns negative past the threshold.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MomentumParams {
    #[serde(default = "default_lookback")]
    pub lookback: usize,
    /// Return threshold as a fraction (0.05 = 5%).
    #[serde(default = "default_threshold")]
    pub threshold: f64,
    #[serde(default = "default_position_size")]
    pub position_size: f64,
}

fn default_lookback() -> usize {
    10
}

fn default_threshold() -> f64 {
    0.05
}

pub struct MomentumStrategy {
    params: MomentumParams,
}

impl MomentumStrategy {
    pub fn new(params: MomentumParams) -> Self {
        Self { params }
    }

    fn momentum(&self, bars: &BarSeries<'_>) -> Option<Decimal> {
        let data = bars.bars();
        if data.len() <= self.params.lookback {
            return None;
        }
        let past = data[data.len() - 1 - self.params.lookback].close;
        let current = data.last()?.close;
        if past == Decimal::ZERO {
            return None;
        }
        Some((current - past) / past)
    }
}

impl Strategy for MomentumStrategy {
    fn name(&self) -> &str {
        "momentum"
    }

    fn params(&self) -> serde_json::Value {
        serde_json::to_value(&self.params).unwrap_or(serde_json::Value::Null)
    }

    fn warmup(&self) -> usize {
        self.params.lookback + 1
    }

    fn on_bar(
        &mut self,
        bars: &BarSeries<'_>,
        positions: &[Position],
        account: &Account,
    ) -> Vec<OrderIntent> {
        let Some(momentum) = self.momentum(bars) else {
            return Vec::new();
        };
        let Some(last) = bars.last() else {
            return Vec::new();
        };
        let threshold = Decimal::from_f64(self.params.threshold).unwrap_or_default();
        let symbol = last.symbol.clone();
        let position = find_position(&symbol, positions).filter(|p| p.quantity > 0);

        if momentum > threshold && position.is_none() {
            let budget =
                account.equity * Decimal::from_f64(self.params.position_size).unwrap_or_default();
            let quantity: i64 = if last.close > Decimal::ZERO {
                (budget / last.close).floor().try_into().unwrap_or(0)
            } else {
                0
            };
            if quantity > 0 {
                return vec![OrderIntent::market(symbol, OrderSide::Buy, quantity)];
            }
        } else if momentum < -threshold {
            if let Some(p) = position {
                return vec![OrderIntent::market(symbol, OrderSide::Sell, p.quantity)];
            }
        }
        Vec::new()
    }
}

/// Equal-weight portfolio over the most liquid names.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EqualWeightParams {
    #[serde(default = "default_top_n")]
    pub top_n: usize,
    /// Liquidity floor in KRW traded value.
    #[serde(default = "default_min_traded_value")]
    pub min_traded_value: Decimal,
}

fn default_top_n() -> usize {
    10
}

fn default_min_traded_value() -> Decimal {
    Decimal::from(100_000_000_000i64)
}

pub struct EqualWeightPortfolioStrategy {
    params: EqualWeightParams,
}

impl EqualWeightPortfolioStrategy {
    pub fn new(params: EqualWeightParams) -> Self {
        Self { params }
    }
}

impl Strategy for EqualWeightPortfolioStrategy {
    fn name(&self) -> &str {
        "equal_weight_portfolio"
    }

    fn params(&self) -> serde_json::Value {
        serde_json::to_value(&self.params).unwrap_or(serde_json::Value::Null)
    }

    fn on_bar(
        &mut self,
        _bars: &BarSeries<'_>,
        _positions: &[Position],
        _account: &Account,
    ) -> Vec<OrderIntent> {
        // Rebalancing is driven by target weights, not per-bar intents.
        Vec::new()
    }

    fn select_universe(&self, _date: NaiveDate, market: &MarketSnapshot) -> Vec<String> {
        let mut candidates: Vec<(&String, Decimal)> = market
            .iter()
            .filter(|(_, info)| info.traded_value >= self.params.min_traded_value)
            .map(|(symbol, info)| (symbol, info.traded_value))
            .collect();
        candidates.sort_by(|a, b| b.1.cmp(&a.1));
        candidates
            .into_iter()
            .take(self.params.top_n)
            .map(|(symbol, _)| symbol.clone())
            .collect()
    }

    fn get_target_weights(
        &self,
        universe: &[String],
        _prices: &HashMap<String, Decimal>,
        _account: &Account,
    ) -> HashMap<String, f64> {
        if universe.is_empty() {
            return HashMap::new();
        }
        let weight = 1.0 / universe.len() as f64;
        universe.iter().map(|s| (s.clone(), weight)).collect()
    }

    fn is_portfolio(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use kt_types::Ohlc;
    use rust_decimal_macros::dec;

    fn make_bars(closes: &[i64]) -> Vec<Ohlc> {
        closes
            .iter()
            .enumerate()
            .map(|(i, &c)| {
                let ts = NaiveDate::from_ymd_opt(2025, 1, 1)
                    .unwrap()
                    .and_hms_opt(9, 0, 0)
                    .unwrap()
                    + chrono::Duration::days(i as i64);
                let close = Decimal::from(c);
                Ohlc::new("005930", ts, close, close, close, close, 1000, None).unwrap()
            })
            .collect()
    }

    fn account() -> Account {
        Account::new("test", dec!(10_000_000))
    }

    #[test]
    fn test_ma_cross_buys_on_golden_cross() {
        let mut strategy = MaCrossStrategy::new(MaCrossParams {
            short: 2,
            long: 4,
            position_size: 0.1,
            symbol: None,
        });

        // Downtrend first so the initial signal is Dead, then a sharp rally
        // flips the short MA above the long MA.
        let mut closes: Vec<i64> = vec![110, 108, 106, 104, 102];
        let intents = strategy.on_bar(&BarSeries::new(&make_bars(&closes)), &[], &account());
        assert!(intents.is_empty());

        closes.extend([120, 140]);
        let intents = strategy.on_bar(&BarSeries::new(&make_bars(&closes)), &[], &account());
        assert_eq!(intents.len(), 1);
        assert_eq!(intents[0].side, OrderSide::Buy);
        assert_eq!(intents[0].quantity, 1_000_000 / 140);
    }

    #[test]
    fn test_ma_cross_sells_on_dead_cross() {
        let mut strategy = MaCrossStrategy::new(MaCrossParams {
            short: 2,
            long: 4,
            position_size: 0.1,
            symbol: None,
        });
        strategy.last_signal = Some(CrossSignal::Golden);

        let mut pos = Position::new("005930");
        pos.apply_buy(50, dec!(120));

        let closes = vec![140, 138, 130, 120, 100];
        let intents = strategy.on_bar(&BarSeries::new(&make_bars(&closes)), &[pos], &account());
        assert_eq!(intents.len(), 1);
        assert_eq!(intents[0].side, OrderSide::Sell);
        assert_eq!(intents[0].quantity, 50);
    }

    #[test]
    fn test_ma_cross_no_repeat_signal() {
        let mut strategy = MaCrossStrategy::new(MaCrossParams {
            short: 2,
            long: 4,
            position_size: 0.1,
            symbol: None,
        });

        let closes = vec![100, 102, 104, 106, 108, 110];
        let first = strategy.on_bar(&BarSeries::new(&make_bars(&closes)), &[], &account());
        assert_eq!(first.len(), 1);

        // Same golden signal on the next bar: no new order.
        let mut pos = Position::new("005930");
        pos.apply_buy(first[0].quantity, dec!(110));
        let mut closes = closes;
        closes.push(112);
        let second = strategy.on_bar(&BarSeries::new(&make_bars(&closes)), &[pos], &account());
        assert!(second.is_empty());
    }

    #[test]
    fn test_momentum_entry_and_exit() {
        let mut strategy = MomentumStrategy::new(MomentumParams {
            lookback: 3,
            threshold: 0.05,
            position_size: 0.1,
        });

        // +10% over 3 bars.
        let up = make_bars(&[100, 102, 105, 110]);
        let intents = strategy.on_bar(&BarSeries::new(&up), &[], &account());
        assert_eq!(intents.len(), 1);
        assert_eq!(intents[0].side, OrderSide::Buy);

        // -10% over 3 bars with a position: exit.
        let mut pos = Position::new("005930");
        pos.apply_buy(100, dec!(110));
        let down = make_bars(&[110, 108, 104, 99]);
        let intents = strategy.on_bar(&BarSeries::new(&down), &[pos], &account());
        assert_eq!(intents.len(), 1);
        assert_eq!(intents[0].side, OrderSide::Sell);
    }

    #[test]
    fn test_equal_weight_universe_and_weights() {
        let strategy = EqualWeightPortfolioStrategy::new(EqualWeightParams {
            top_n: 2,
            min_traded_value: dec!(1000),
        });
        assert!(strategy.is_portfolio());

        let mut market = MarketSnapshot::new();
        for (symbol, value) in [("005930", 9000i64), ("000660", 5000), ("035420", 100)] {
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
        assert_eq!(universe, vec!["005930".to_string(), "000660".to_string()]);

        let weights = strategy.get_target_weights(&universe, &HashMap::new(), &account());
        assert_eq!(weights.len(), 2);
        assert!((weights["005930"] - 0.5).abs() < f64::EPSILON);
    }
}
