use chrono::NaiveDateTime;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::orders::Trade;

/// Outcome of a single backtest run.
///
/// `profit_factor` is `None` when the run had no losing trades (the ratio
/// would be infinite); `sharpe` is `None` when fewer than two equity points
/// exist.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BacktestResult {
    pub strategy_name: String,
    pub parameters: serde_json::Value,
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
    pub initial_capital: Decimal,
    pub final_equity: Decimal,
    pub total_return: Decimal,
    pub mdd: Decimal,
    pub sharpe: Option<Decimal>,
    pub win_rate: Decimal,
    pub profit_factor: Option<Decimal>,
    pub total_trades: u64,
    pub equity_curve: Vec<Decimal>,
    pub equity_timestamps: Vec<NaiveDateTime>,
    pub trades: Vec<Trade>,
}

impl BacktestResult {
    /// Scalar value of a named metric, used by the grid driver for ranking.
    pub fn metric(&self, name: &str) -> Option<Decimal> {
        match name {
            "total_return" => Some(self.total_return),
            "mdd" => Some(self.mdd),
            "sharpe" => self.sharpe,
            "win_rate" => Some(self.win_rate),
            "profit_factor" => self.profit_factor,
            _ => None,
        }
    }
}
