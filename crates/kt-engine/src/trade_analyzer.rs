//! Round-trip trade analysis.
//!
//! Pairs buys against sells per symbol with FIFO matching and derives
//! per-symbol performance (win rate, profit factor, holding period, total
//! P&L). Runs over the `trades` list of a finished backtest or a day's fill
//! history; the ledger's own metrics stay untouched — this is the
//! post-mortem view.

use std::collections::{BTreeMap, VecDeque};

use chrono::NaiveDateTime;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::warn;

use kt_types::{OrderSide, Trade};

/// One matched entry/exit pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletedTrade {
    pub symbol: String,
    pub entry_time: NaiveDateTime,
    pub entry_price: Decimal,
    pub exit_time: NaiveDateTime,
    pub exit_price: Decimal,
    pub quantity: i64,
    /// Entry plus exit commission, prorated to the matched quantity.
    pub commission: Decimal,
    pub pnl: Decimal,
    /// Net return on the entry cost, as a fraction.
    pub return_rate: Decimal,
    pub holding_days: i64,
}

impl CompletedTrade {
    pub fn is_profitable(&self) -> bool {
        self.pnl > Decimal::ZERO
    }
}

/// Per-symbol performance over its completed trades.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SymbolPerformance {
    pub symbol: String,
    pub trade_count: usize,
    pub total_pnl: Decimal,
    pub win_rate: Decimal,
    /// `None` when there were no losing round trips.
    pub profit_factor: Option<Decimal>,
    pub avg_holding_days: i64,
    /// Compounded return over the round trips, as a fraction.
    pub total_return: Decimal,
}

/// Group trades per symbol, each group sorted by timestamp.
pub fn group_trades_by_symbol(trades: &[Trade]) -> BTreeMap<String, Vec<Trade>> {
    let mut grouped: BTreeMap<String, Vec<Trade>> = BTreeMap::new();
    for trade in trades {
        grouped
            .entry(trade.symbol.clone())
            .or_default()
            .push(trade.clone());
    }
    for group in grouped.values_mut() {
        group.sort_by_key(|t| t.timestamp);
    }
    grouped
}

/// FIFO-match one symbol's trades into completed round trips.
///
/// Buys queue up; each sell consumes the oldest open buy lots first,
/// splitting lots when quantities differ. Commissions are prorated by the
/// matched share of each side. A sell with nothing left to match (short
/// entry, transfer-in) is logged and skipped.
pub fn match_entry_exit(trades: &[Trade]) -> Vec<CompletedTrade> {
    struct OpenLot {
        time: NaiveDateTime,
        price: Decimal,
        remaining: i64,
        /// Commission per share of the original lot.
        commission_per_share: Decimal,
    }

    let mut completed = Vec::new();
    let mut open_lots: VecDeque<OpenLot> = VecDeque::new();

    for trade in trades {
        match trade.side {
            OrderSide::Buy => {
                let commission_per_share = if trade.quantity > 0 {
                    trade.commission / Decimal::from(trade.quantity)
                } else {
                    Decimal::ZERO
                };
                open_lots.push_back(OpenLot {
                    time: trade.timestamp,
                    price: trade.price,
                    remaining: trade.quantity,
                    commission_per_share,
                });
            }
            OrderSide::Sell => {
                let mut remaining = trade.quantity;
                let sell_commission_per_share = if trade.quantity > 0 {
                    trade.commission / Decimal::from(trade.quantity)
                } else {
                    Decimal::ZERO
                };

                while remaining > 0 {
                    let Some(lot) = open_lots.front_mut() else {
                        warn!(
                            symbol = %trade.symbol,
                            remaining,
                            at = %trade.timestamp,
                            "sell without a matching entry"
                        );
                        break;
                    };

                    let matched = remaining.min(lot.remaining);
                    let matched_dec = Decimal::from(matched);
                    let entry_cost = lot.price * matched_dec;
                    let exit_value = trade.price * matched_dec;
                    let commission = (lot.commission_per_share + sell_commission_per_share)
                        * matched_dec;
                    let pnl = exit_value - entry_cost - commission;
                    let return_rate = if entry_cost > Decimal::ZERO {
                        pnl / entry_cost
                    } else {
                        Decimal::ZERO
                    };

                    completed.push(CompletedTrade {
                        symbol: trade.symbol.clone(),
                        entry_time: lot.time,
                        entry_price: lot.price,
                        exit_time: trade.timestamp,
                        exit_price: trade.price,
                        quantity: matched,
                        commission,
                        pnl,
                        return_rate,
                        holding_days: (trade.timestamp - lot.time).num_days(),
                    });

                    lot.remaining -= matched;
                    remaining -= matched;
                    if lot.remaining == 0 {
                        open_lots.pop_front();
                    }
                }
            }
        }
    }

    completed
}

/// Aggregate one symbol's completed trades.
pub fn symbol_performance(completed: &[CompletedTrade]) -> Option<SymbolPerformance> {
    let first = completed.first()?;
    let count = completed.len();

    let total_pnl: Decimal = completed.iter().map(|t| t.pnl).sum();
    let wins = completed.iter().filter(|t| t.is_profitable()).count();
    let win_rate = Decimal::from(wins as u64) / Decimal::from(count as u64);

    let gross_win: Decimal = completed
        .iter()
        .filter(|t| t.pnl > Decimal::ZERO)
        .map(|t| t.pnl)
        .sum();
    let gross_loss: Decimal = completed
        .iter()
        .filter(|t| t.pnl < Decimal::ZERO)
        .map(|t| -t.pnl)
        .sum();
    let profit_factor = if gross_loss > Decimal::ZERO {
        Some(gross_win / gross_loss)
    } else {
        None
    };

    let avg_holding_days =
        completed.iter().map(|t| t.holding_days).sum::<i64>() / count as i64;

    // Compounded across round trips in order.
    let mut cumulative = Decimal::ONE;
    for trade in completed {
        cumulative *= Decimal::ONE + trade.return_rate;
    }

    Some(SymbolPerformance {
        symbol: first.symbol.clone(),
        trade_count: count,
        total_pnl,
        win_rate,
        profit_factor,
        avg_holding_days,
        total_return: cumulative - Decimal::ONE,
    })
}

/// Full analysis: FIFO-match every symbol and aggregate.
pub fn analyze_trades(trades: &[Trade]) -> BTreeMap<String, SymbolPerformance> {
    group_trades_by_symbol(trades)
        .into_iter()
        .filter_map(|(symbol, group)| {
            let completed = match_entry_exit(&group);
            symbol_performance(&completed).map(|perf| (symbol, perf))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use rust_decimal_macros::dec;

    fn trade(
        symbol: &str,
        side: OrderSide,
        quantity: i64,
        price: Decimal,
        day: u32,
    ) -> Trade {
        Trade {
            trade_id: format!("T-{day}-{quantity}"),
            order_id: format!("O-{day}"),
            symbol: symbol.to_string(),
            side,
            quantity,
            price,
            commission: Decimal::ZERO,
            timestamp: NaiveDate::from_ymd_opt(2025, 3, day)
                .unwrap()
                .and_hms_opt(15, 30, 0)
                .unwrap(),
        }
    }

    #[test]
    fn test_simple_round_trip() {
        let trades = vec![
            trade("005930", OrderSide::Buy, 10, dec!(70000), 3),
            trade("005930", OrderSide::Sell, 10, dec!(71000), 7),
        ];

        let completed = match_entry_exit(&trades);
        assert_eq!(completed.len(), 1);
        let rt = &completed[0];
        assert_eq!(rt.quantity, 10);
        assert_eq!(rt.pnl, dec!(10000));
        assert_eq!(rt.holding_days, 4);
        assert_eq!(rt.return_rate, dec!(10000) / dec!(700000));
    }

    #[test]
    fn test_fifo_consumes_oldest_lot_first() {
        let trades = vec![
            trade("005930", OrderSide::Buy, 10, dec!(70000), 3),
            trade("005930", OrderSide::Buy, 10, dec!(72000), 4),
            trade("005930", OrderSide::Sell, 15, dec!(73000), 8),
        ];

        let completed = match_entry_exit(&trades);
        assert_eq!(completed.len(), 2);
        // First match closes the whole first lot at its own entry price.
        assert_eq!(completed[0].entry_price, dec!(70000));
        assert_eq!(completed[0].quantity, 10);
        // Second match takes 5 of the newer lot.
        assert_eq!(completed[1].entry_price, dec!(72000));
        assert_eq!(completed[1].quantity, 5);
    }

    #[test]
    fn test_commissions_prorated_across_splits() {
        let mut buy = trade("005930", OrderSide::Buy, 10, dec!(70000), 3);
        buy.commission = dec!(1000); // 100 per share
        let mut sell_a = trade("005930", OrderSide::Sell, 4, dec!(71000), 5);
        sell_a.commission = dec!(400); // 100 per share
        let mut sell_b = trade("005930", OrderSide::Sell, 6, dec!(71000), 6);
        sell_b.commission = dec!(600);

        let completed = match_entry_exit(&[buy, sell_a, sell_b]);
        assert_eq!(completed.len(), 2);
        assert_eq!(completed[0].commission, dec!(800)); // (100+100) * 4
        assert_eq!(completed[1].commission, dec!(1200)); // (100+100) * 6
        // Summed commissions equal the originals exactly.
        let total: Decimal = completed.iter().map(|t| t.commission).sum();
        assert_eq!(total, dec!(2000));
    }

    #[test]
    fn test_unmatched_sell_is_skipped() {
        let trades = vec![trade("005930", OrderSide::Sell, 5, dec!(70000), 3)];
        assert!(match_entry_exit(&trades).is_empty());
    }

    #[test]
    fn test_symbol_performance_aggregates() {
        let trades = vec![
            trade("005930", OrderSide::Buy, 10, dec!(70000), 3),
            trade("005930", OrderSide::Sell, 10, dec!(77000), 5),
            trade("005930", OrderSide::Buy, 10, dec!(77000), 6),
            trade("005930", OrderSide::Sell, 10, dec!(73150), 10),
        ];

        let completed = match_entry_exit(&trades);
        let perf = symbol_performance(&completed).unwrap();
        assert_eq!(perf.trade_count, 2);
        assert_eq!(perf.win_rate, dec!(0.5));
        assert_eq!(perf.total_pnl, dec!(70000) - dec!(38500));
        // +10% then -5%: compounded 1.1 * 0.95 - 1.
        assert_eq!(perf.total_return, dec!(0.045));
        // 70_000 gross win over 38_500 gross loss.
        let pf = perf.profit_factor.unwrap();
        assert!((pf - dec!(70000) / dec!(38500)).abs() < dec!(0.0001));
    }

    #[test]
    fn test_analyze_trades_groups_symbols() {
        let trades = vec![
            trade("005930", OrderSide::Buy, 10, dec!(70000), 3),
            trade("000660", OrderSide::Buy, 5, dec!(180000), 3),
            trade("005930", OrderSide::Sell, 10, dec!(71000), 4),
            trade("000660", OrderSide::Sell, 5, dec!(175000), 4),
        ];

        let analysis = analyze_trades(&trades);
        assert_eq!(analysis.len(), 2);
        assert!(analysis["005930"].total_pnl > Decimal::ZERO);
        assert!(analysis["000660"].total_pnl < Decimal::ZERO);
        // No losses for 005930: infinite profit factor is None.
        assert!(analysis["005930"].profit_factor.is_none());
    }

    #[test]
    fn test_analyze_backtest_output() {
        use crate::engine::{BacktestConfig, BacktestEngine};
        use kt_strategy::{MaCrossParams, MaCrossStrategy};
        use kt_types::Ohlc;

        // The analyzer consumes a backtest's trade log directly.
        let mut state = 42u64;
        let mut price = dec!(70000);
        let bars: Vec<Ohlc> = (0..100)
            .map(|i| {
                state = state
                    .wrapping_mul(6364136223846793005)
                    .wrapping_add(1442695040888963407);
                let step = ((state >> 33) % 2001) as i64 - 1000;
                let open = price;
                let close = (price + Decimal::from(step)).max(dec!(1000));
                price = close;
                Ohlc::new(
                    "005930",
                    NaiveDate::from_ymd_opt(2024, 1, 1)
                        .unwrap()
                        .and_hms_opt(15, 30, 0)
                        .unwrap()
                        + chrono::Duration::days(i),
                    open,
                    open.max(close) + dec!(100),
                    open.min(close) - dec!(100),
                    close,
                    10_000,
                    None,
                )
                .unwrap()
            })
            .collect();

        let mut strategy = MaCrossStrategy::new(MaCrossParams {
            short: 5,
            long: 20,
            position_size: 0.1,
            symbol: Some("005930".to_string()),
        });
        let result = BacktestEngine::new(BacktestConfig::default())
            .run(&mut strategy, &bars)
            .unwrap();

        let analysis = analyze_trades(&result.trades);
        if let Some(perf) = analysis.get("005930") {
            assert!(perf.trade_count > 0);
            assert!(perf.win_rate >= Decimal::ZERO && perf.win_rate <= Decimal::ONE);
        }
    }
}
