//! Strategy contract.
//!
//! Strategies never touch the broker: the engine hands them bar history,
//! positions and the account snapshot, and they answer with order intents.
//! That keeps strategy code identical between backtest and realtime.

use std::collections::HashMap;

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use kt_types::{Account, Ohlc, Order, OrderIntent, Position};

/// Borrowed, ascending-by-timestamp view over bar history.
///
/// The engine owns the underlying storage; strategies only read.
#[derive(Debug, Clone, Copy)]
pub struct BarSeries<'a> {
    bars: &'a [Ohlc],
}

impl<'a> BarSeries<'a> {
    pub fn new(bars: &'a [Ohlc]) -> Self {
        debug_assert!(bars.windows(2).all(|w| w[0].timestamp <= w[1].timestamp));
        Self { bars }
    }

    pub fn len(&self) -> usize {
        self.bars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bars.is_empty()
    }

    pub fn bars(&self) -> &'a [Ohlc] {
        self.bars
    }

    pub fn last(&self) -> Option<&'a Ohlc> {
        self.bars.last()
    }

    pub fn closes(&self) -> impl Iterator<Item = Decimal> + 'a {
        self.bars.iter().map(|b| b.close)
    }

    /// Simple moving average of closes over the trailing `period` bars.
    pub fn sma(&self, period: usize) -> Option<Decimal> {
        if period == 0 || self.bars.len() < period {
            return None;
        }
        let sum: Decimal = self.bars[self.bars.len() - period..]
            .iter()
            .map(|b| b.close)
            .sum();
        Some(sum / Decimal::from(period as u64))
    }
}

/// Per-symbol reference data used by universe selection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SymbolInfo {
    pub name: String,
    pub close: Decimal,
    /// Previous-day traded value in KRW.
    pub traded_value: Decimal,
    pub per: Option<Decimal>,
    pub pbr: Option<Decimal>,
    pub roe: Option<Decimal>,
}

/// Whole-market snapshot handed to portfolio strategies.
pub type MarketSnapshot = HashMap<String, SymbolInfo>;

/// The strategy contract shared by backtest and realtime execution.
pub trait Strategy: Send + Sync {
    fn name(&self) -> &str;

    /// Parameter bundle, echoed into backtest results.
    fn params(&self) -> serde_json::Value;

    /// Bars required before `on_bar` produces meaningful output.
    fn warmup(&self) -> usize {
        0
    }

    /// Called once per bar (backtest) or validated tick-to-bar cycle
    /// (realtime). Must not perform I/O.
    fn on_bar(
        &mut self,
        bars: &BarSeries<'_>,
        positions: &[Position],
        account: &Account,
    ) -> Vec<OrderIntent>;

    /// Called after an order fills; for state updates only.
    fn on_fill(&mut self, _order: &Order, _position: Option<&Position>) {}

    /// Portfolio strategies pick the day's tradable symbols here.
    fn select_universe(&self, _date: NaiveDate, _market: &MarketSnapshot) -> Vec<String> {
        Vec::new()
    }

    /// Target weights per symbol (sum ≤ 1.0). Default: equal weight.
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

    /// A strategy is portfolio-kind iff it selects a universe.
    fn is_portfolio(&self) -> bool {
        false
    }
}

/// Position lookup helper shared by concrete strategies.
pub fn find_position<'a>(symbol: &str, positions: &'a [Position]) -> Option<&'a Position> {
    positions.iter().find(|p| p.symbol == symbol)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use rust_decimal_macros::dec;

    fn bars(closes: &[i64]) -> Vec<Ohlc> {
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
                Ohlc::new("005930", ts, close, close, close, close, 100, None).unwrap()
            })
            .collect()
    }

    #[test]
    fn test_sma() {
        let data = bars(&[100, 101, 102, 103, 104]);
        let series = BarSeries::new(&data);
        assert_eq!(series.sma(3), Some(dec!(103)));
        assert_eq!(series.sma(5), Some(dec!(102)));
        assert_eq!(series.sma(6), None);
    }

    #[test]
    fn test_find_position() {
        let mut pos = Position::new("005930");
        pos.apply_buy(10, dec!(70000));
        let positions = vec![pos];
        assert!(find_position("005930", &positions).is_some());
        assert!(find_position("000660", &positions).is_none());
    }
}
