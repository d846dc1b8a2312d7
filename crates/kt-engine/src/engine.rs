//! Deterministic backtest engine.
//!
//! Single-threaded bar loop: indicator state lives inside the strategy, the
//! engine owns the simulated ledger. Intents emitted on bar `t` fill at the
//! open of bar `t+1` adjusted for slippage, then positions are marked to the
//! close of `t`. Identical input produces identical output, byte for byte.

use std::collections::{BTreeMap, HashMap};

use chrono::NaiveDateTime;
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use kt_strategy::{BarSeries, MarketSnapshot, Strategy, SymbolInfo};
use kt_types::{
    Account, BacktestError, BacktestResult, KtResult, Ohlc, OrderIntent, OrderSide, OrderType,
    Position, Trade,
};

use crate::metrics;

/// Simulation cost model and starting capital.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BacktestConfig {
    pub initial_capital: Decimal,
    /// Commission rate charged on every fill's notional.
    pub commission: Decimal,
    /// Slippage applied against the fill (paid on buys, lost on sells).
    pub slippage: Decimal,
}

impl Default for BacktestConfig {
    fn default() -> Self {
        Self {
            initial_capital: Decimal::from(10_000_000),
            commission: Decimal::new(15, 4), // 0.0015
            slippage: Decimal::new(5, 4),    // 0.0005
        }
    }
}

/// Simulated cash-and-positions ledger.
struct Ledger {
    cash: Decimal,
    positions: HashMap<String, Position>,
    trades: Vec<Trade>,
    closed_pnls: Vec<Decimal>,
    next_trade_id: u64,
}

impl Ledger {
    fn new(cash: Decimal) -> Self {
        Self {
            cash,
            positions: HashMap::new(),
            trades: Vec::new(),
            closed_pnls: Vec::new(),
            next_trade_id: 1,
        }
    }

    fn positions_vec(&self) -> Vec<Position> {
        let mut positions: Vec<Position> = self.positions.values().cloned().collect();
        positions.sort_by(|a, b| a.symbol.cmp(&b.symbol));
        positions
    }

    fn equity(&self) -> Decimal {
        self.cash
            + self
                .positions
                .values()
                .map(Position::total_value)
                .sum::<Decimal>()
    }

    fn record_trade(
        &mut self,
        symbol: &str,
        side: OrderSide,
        quantity: i64,
        price: Decimal,
        commission: Decimal,
        at: NaiveDateTime,
    ) {
        let trade = Trade {
            trade_id: format!("BT-{}", self.next_trade_id),
            order_id: format!("BT-ORD-{}", self.next_trade_id),
            symbol: symbol.to_string(),
            side,
            quantity,
            price,
            commission,
            timestamp: at,
        };
        self.next_trade_id += 1;
        self.trades.push(trade);
    }

    /// Execute one intent atomically against the ledger. Returns false when
    /// the intent was skipped (no cash, no position).
    fn execute(
        &mut self,
        intent: &OrderIntent,
        fill_price: Decimal,
        commission_rate: Decimal,
        at: NaiveDateTime,
    ) -> bool {
        match intent.side {
            OrderSide::Buy => {
                let notional = fill_price * Decimal::from(intent.quantity);
                let commission = notional * commission_rate;
                let cost = notional + commission;
                if cost > self.cash || intent.quantity <= 0 {
                    warn!(
                        symbol = %intent.symbol,
                        quantity = intent.quantity,
                        "buy skipped: insufficient cash"
                    );
                    return false;
                }
                self.cash -= cost;
                let position = self
                    .positions
                    .entry(intent.symbol.clone())
                    .or_insert_with(|| Position::new(intent.symbol.clone()));
                position.apply_buy(intent.quantity, fill_price);
                self.record_trade(
                    &intent.symbol,
                    OrderSide::Buy,
                    intent.quantity,
                    fill_price,
                    commission,
                    at,
                );
                true
            }
            OrderSide::Sell => {
                let Some(position) = self.positions.get_mut(&intent.symbol) else {
                    return false;
                };
                let quantity = intent.quantity.min(position.quantity);
                if quantity <= 0 {
                    return false;
                }
                let notional = fill_price * Decimal::from(quantity);
                let commission = notional * commission_rate;
                let realized = position.apply_sell(quantity, fill_price) - commission;
                self.cash += notional - commission;
                self.closed_pnls.push(realized);
                if position.is_flat() {
                    self.positions.remove(&intent.symbol);
                }
                self.record_trade(
                    &intent.symbol,
                    OrderSide::Sell,
                    quantity,
                    fill_price,
                    commission,
                    at,
                );
                true
            }
        }
    }

    fn mark(&mut self, prices: &HashMap<&str, Decimal>) {
        for position in self.positions.values_mut() {
            if let Some(price) = prices.get(position.symbol.as_str()) {
                position.update_current_price(*price);
            }
        }
    }
}

/// The backtest engine. Owns nothing between runs; each `run` call builds a
/// fresh ledger.
pub struct BacktestEngine {
    config: BacktestConfig,
}

impl BacktestEngine {
    pub fn new(config: BacktestConfig) -> Self {
        Self { config }
    }

    fn fill_price(&self, side: OrderSide, open: Decimal) -> Decimal {
        match side {
            OrderSide::Buy => open * (Decimal::ONE + self.config.slippage),
            OrderSide::Sell => open * (Decimal::ONE - self.config.slippage),
        }
    }

    /// Run a single-symbol strategy over an ascending bar series.
    pub fn run(&self, strategy: &mut dyn Strategy, bars: &[Ohlc]) -> KtResult<BacktestResult> {
        let warmup = strategy.warmup().max(1);
        if bars.len() <= warmup {
            return Err(BacktestError::NotEnoughBars {
                have: bars.len(),
                need: warmup + 1,
            }
            .into());
        }

        info!(
            strategy = strategy.name(),
            bars = bars.len(),
            warmup,
            "backtest started"
        );

        let mut ledger = Ledger::new(self.config.initial_capital);
        let mut curve = Vec::with_capacity(bars.len() - warmup);
        let mut timestamps = Vec::with_capacity(bars.len() - warmup);
        let mut account = Account::new("backtest", self.config.initial_capital);

        for t in warmup..bars.len() {
            let history = BarSeries::new(&bars[..=t]);
            let positions = ledger.positions_vec();
            account.balance = ledger.cash;
            account.equity = ledger.equity();

            let intents = strategy.on_bar(&history, &positions, &account);

            // Fills happen at the next bar's open; the final bar has no next
            // open, so its intents are dropped.
            if t + 1 < bars.len() {
                let next = &bars[t + 1];
                for intent in &intents {
                    let fill = self.fill_price(intent.side, next.open);
                    if ledger.execute(intent, fill, self.config.commission, next.timestamp) {
                        debug!(
                            symbol = %intent.symbol,
                            side = ?intent.side,
                            quantity = intent.quantity,
                            price = %fill,
                            "simulated fill"
                        );
                        if let Some(trade) = ledger.trades.last() {
                            let order = OrderIntent {
                                symbol: intent.symbol.clone(),
                                side: intent.side,
                                quantity: trade.quantity,
                                order_type: OrderType::Market,
                                price: Some(trade.price),
                                stop_loss: None,
                                take_profit: None,
                            }
                            .into_order(trade.order_id.clone(), trade.timestamp);
                            let position = ledger.positions.get(&intent.symbol).cloned();
                            strategy.on_fill(&order, position.as_ref());
                        }
                    }
                }
            }

            let mut marks = HashMap::new();
            marks.insert(bars[t].symbol.as_str(), bars[t].close);
            ledger.mark(&marks);

            curve.push(ledger.equity());
            timestamps.push(bars[t].timestamp);
        }

        Ok(self.finish(strategy, bars, ledger, curve, timestamps))
    }

    /// Run a portfolio-kind strategy over multiple symbols, rebalancing once
    /// per bar date to the strategy's target weights using integer-share
    /// deltas.
    pub fn run_portfolio(
        &self,
        strategy: &mut dyn Strategy,
        bars_by_symbol: &BTreeMap<String, Vec<Ohlc>>,
    ) -> KtResult<BacktestResult> {
        // Align all series on their timestamp union.
        let mut by_time: BTreeMap<NaiveDateTime, HashMap<&str, &Ohlc>> = BTreeMap::new();
        for (symbol, bars) in bars_by_symbol {
            for bar in bars {
                by_time
                    .entry(bar.timestamp)
                    .or_default()
                    .insert(symbol.as_str(), bar);
            }
        }
        if by_time.len() < 2 {
            return Err(BacktestError::NotEnoughBars {
                have: by_time.len(),
                need: 2,
            }
            .into());
        }

        info!(
            strategy = strategy.name(),
            symbols = bars_by_symbol.len(),
            dates = by_time.len(),
            "portfolio backtest started"
        );

        let mut ledger = Ledger::new(self.config.initial_capital);
        let mut curve = Vec::new();
        let mut timestamps = Vec::new();
        let mut account = Account::new("backtest", self.config.initial_capital);

        let times: Vec<NaiveDateTime> = by_time.keys().copied().collect();
        for (i, &now) in times.iter().enumerate() {
            let today = &by_time[&now];

            // Universe and weights come from the same day's snapshot.
            let snapshot: MarketSnapshot = today
                .iter()
                .map(|(symbol, bar)| {
                    (
                        symbol.to_string(),
                        SymbolInfo {
                            name: symbol.to_string(),
                            close: bar.close,
                            traded_value: bar.value,
                            per: None,
                            pbr: None,
                            roe: None,
                        },
                    )
                })
                .collect();

            account.balance = ledger.cash;
            account.equity = ledger.equity();

            let universe = strategy.select_universe(now.date(), &snapshot);
            let prices: HashMap<String, Decimal> = today
                .iter()
                .map(|(symbol, bar)| (symbol.to_string(), bar.close))
                .collect();
            let weights = strategy.get_target_weights(&universe, &prices, &account);

            // Rebalance fills at the next date's opens.
            if i + 1 < times.len() {
                let next = &by_time[&times[i + 1]];
                let equity = ledger.equity();

                // Exit anything no longer in the target set first, freeing
                // cash for the buys.
                let held: Vec<String> = ledger.positions.keys().cloned().collect();
                for symbol in held {
                    if !weights.contains_key(&symbol) {
                        if let Some(bar) = next.get(symbol.as_str()) {
                            let quantity = ledger.positions[&symbol].quantity;
                            let intent = OrderIntent::market(&symbol, OrderSide::Sell, quantity);
                            let fill = self.fill_price(OrderSide::Sell, bar.open);
                            ledger.execute(&intent, fill, self.config.commission, bar.timestamp);
                        }
                    }
                }

                let mut deltas: Vec<(String, i64)> = Vec::new();
                for (symbol, weight) in &weights {
                    let Some(bar) = next.get(symbol.as_str()) else {
                        continue;
                    };
                    if bar.open <= Decimal::ZERO {
                        continue;
                    }
                    let target_value = equity * Decimal::from_f64(*weight).unwrap_or_default();
                    let target_shares: i64 = (target_value / bar.open)
                        .floor()
                        .try_into()
                        .unwrap_or(0);
                    let current = ledger
                        .positions
                        .get(symbol)
                        .map(|p| p.quantity)
                        .unwrap_or(0);
                    let delta = target_shares - current;
                    if delta != 0 {
                        deltas.push((symbol.clone(), delta));
                    }
                }
                // Sells before buys, then lexicographic for determinism.
                deltas.sort_by(|a, b| a.1.cmp(&b.1).then_with(|| a.0.cmp(&b.0)));

                for (symbol, delta) in deltas {
                    let bar = next[symbol.as_str()];
                    let side = if delta > 0 {
                        OrderSide::Buy
                    } else {
                        OrderSide::Sell
                    };
                    let intent = OrderIntent::market(&symbol, side, delta.abs());
                    let fill = self.fill_price(side, bar.open);
                    ledger.execute(&intent, fill, self.config.commission, bar.timestamp);
                }
            }

            let marks: HashMap<&str, Decimal> = today
                .iter()
                .map(|(symbol, bar)| (*symbol, bar.close))
                .collect();
            ledger.mark(&marks);

            curve.push(ledger.equity());
            timestamps.push(now);
        }

        let all_bars: Vec<Ohlc> = bars_by_symbol
            .values()
            .flat_map(|bars| bars.iter().cloned())
            .collect();
        Ok(self.finish(strategy, &all_bars, ledger, curve, timestamps))
    }

    fn finish(
        &self,
        strategy: &dyn Strategy,
        bars: &[Ohlc],
        ledger: Ledger,
        curve: Vec<Decimal>,
        timestamps: Vec<NaiveDateTime>,
    ) -> BacktestResult {
        let final_equity = curve.last().copied().unwrap_or(self.config.initial_capital);
        let total_return = if self.config.initial_capital > Decimal::ZERO {
            (final_equity - self.config.initial_capital) / self.config.initial_capital
        } else {
            Decimal::ZERO
        };

        let start = timestamps
            .first()
            .copied()
            .or_else(|| bars.first().map(|b| b.timestamp))
            .unwrap_or_default();
        let end = timestamps
            .last()
            .copied()
            .or_else(|| bars.last().map(|b| b.timestamp))
            .unwrap_or_default();

        info!(
            strategy = strategy.name(),
            final_equity = %final_equity,
            total_return = %total_return,
            trades = ledger.trades.len(),
            "backtest finished"
        );

        BacktestResult {
            strategy_name: strategy.name().to_string(),
            parameters: strategy.params(),
            start,
            end,
            initial_capital: self.config.initial_capital,
            final_equity,
            total_return,
            mdd: metrics::max_drawdown(&curve),
            sharpe: metrics::sharpe_ratio(&curve),
            win_rate: metrics::win_rate(&ledger.closed_pnls),
            profit_factor: metrics::profit_factor(&ledger.closed_pnls),
            total_trades: ledger.trades.len() as u64,
            equity_curve: curve,
            equity_timestamps: timestamps,
            trades: ledger.trades,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use kt_strategy::{MaCrossParams, MaCrossStrategy};
    use rust_decimal_macros::dec;

    /// Deterministic synthetic daily series (LCG random walk).
    fn seeded_bars(symbol: &str, n: usize, seed: u64) -> Vec<Ohlc> {
        let mut state = seed;
        let mut price = dec!(70000);
        let mut bars = Vec::with_capacity(n);
        for i in 0..n {
            state = state.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
            let step = ((state >> 33) % 2001) as i64 - 1000; // [-1000, 1000]
            let drift = Decimal::from(step);
            let open = price;
            let close = (price + drift).max(dec!(1000));
            let high = open.max(close) + dec!(200);
            let low = open.min(close) - dec!(200);
            let ts = NaiveDate::from_ymd_opt(2024, 1, 1)
                .unwrap()
                .and_hms_opt(15, 30, 0)
                .unwrap()
                + chrono::Duration::days(i as i64);
            bars.push(Ohlc::new(symbol, ts, open, high, low, close, 100_000, None).unwrap());
            price = close;
        }
        bars
    }

    fn ma_cross() -> MaCrossStrategy {
        MaCrossStrategy::new(MaCrossParams {
            short: 5,
            long: 20,
            position_size: 0.1,
            symbol: Some("005930".to_string()),
        })
    }

    #[test]
    fn test_backtest_is_reproducible() {
        let bars = seeded_bars("005930", 100, 42);
        let engine = BacktestEngine::new(BacktestConfig::default());

        let a = engine.run(&mut ma_cross(), &bars).unwrap();
        let b = engine.run(&mut ma_cross(), &bars).unwrap();

        assert_eq!(a.final_equity, b.final_equity);
        assert_eq!(a.trades, b.trades);
        assert_eq!(a.equity_curve, b.equity_curve);
    }

    #[test]
    fn test_backtest_rejects_short_series() {
        let bars = seeded_bars("005930", 10, 42);
        let engine = BacktestEngine::new(BacktestConfig::default());
        assert!(engine.run(&mut ma_cross(), &bars).is_err());
    }

    #[test]
    fn test_fills_at_next_open_with_slippage() {
        /// Buys exactly once on the first call.
        struct BuyOnce {
            done: bool,
        }
        impl Strategy for BuyOnce {
            fn name(&self) -> &str {
                "buy_once"
            }
            fn params(&self) -> serde_json::Value {
                serde_json::Value::Null
            }
            fn warmup(&self) -> usize {
                1
            }
            fn on_bar(
                &mut self,
                bars: &BarSeries<'_>,
                _positions: &[Position],
                _account: &Account,
            ) -> Vec<OrderIntent> {
                if self.done {
                    return Vec::new();
                }
                self.done = true;
                vec![OrderIntent::market(
                    bars.last().unwrap().symbol.clone(),
                    OrderSide::Buy,
                    10,
                )]
            }
        }

        let bars = seeded_bars("005930", 5, 7);
        let engine = BacktestEngine::new(BacktestConfig::default());
        let result = engine.run(&mut BuyOnce { done: false }, &bars).unwrap();

        assert_eq!(result.total_trades, 1);
        let trade = &result.trades[0];
        // Intent on bar 1 fills at bar 2's open plus slippage.
        let expected = bars[2].open * (Decimal::ONE + dec!(0.0005));
        assert_eq!(trade.price, expected);
        assert_eq!(trade.timestamp, bars[2].timestamp);
    }

    #[test]
    fn test_insufficient_cash_skips_fill() {
        struct BuyTooMuch;
        impl Strategy for BuyTooMuch {
            fn name(&self) -> &str {
                "buy_too_much"
            }
            fn params(&self) -> serde_json::Value {
                serde_json::Value::Null
            }
            fn warmup(&self) -> usize {
                1
            }
            fn on_bar(
                &mut self,
                bars: &BarSeries<'_>,
                _positions: &[Position],
                _account: &Account,
            ) -> Vec<OrderIntent> {
                vec![OrderIntent::market(
                    bars.last().unwrap().symbol.clone(),
                    OrderSide::Buy,
                    1_000_000,
                )]
            }
        }

        let bars = seeded_bars("005930", 5, 7);
        let engine = BacktestEngine::new(BacktestConfig::default());
        let result = engine.run(&mut BuyTooMuch, &bars).unwrap();
        assert_eq!(result.total_trades, 0);
        assert_eq!(result.final_equity, dec!(10_000_000));
    }

    #[test]
    fn test_portfolio_rebalances_to_equal_weights() {
        use kt_strategy::{EqualWeightParams, EqualWeightPortfolioStrategy};

        let mut data = BTreeMap::new();
        data.insert("005930".to_string(), seeded_bars("005930", 30, 1));
        data.insert("000660".to_string(), seeded_bars("000660", 30, 2));

        let mut strategy = EqualWeightPortfolioStrategy::new(EqualWeightParams {
            top_n: 2,
            min_traded_value: Decimal::ZERO,
        });

        let engine = BacktestEngine::new(BacktestConfig::default());
        let result = engine.run_portfolio(&mut strategy, &data).unwrap();

        assert!(result.total_trades > 0);
        // Both symbols traded.
        let symbols: std::collections::HashSet<&str> = result
            .trades
            .iter()
            .map(|t| t.symbol.as_str())
            .collect();
        assert!(symbols.contains("005930"));
        assert!(symbols.contains("000660"));
        assert_eq!(result.equity_curve.len(), 30);
    }
}
