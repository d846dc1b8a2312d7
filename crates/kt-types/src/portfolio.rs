use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// A held position in a single symbol.
///
/// `avg_price` moves only when the position grows (volume-weighted average);
/// reductions leave it untouched and accrue into `realized_pnl`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub symbol: String,
    pub quantity: i64,
    pub avg_price: Decimal,
    pub current_price: Decimal,
    pub unrealized_pnl: Decimal,
    pub realized_pnl: Decimal,
}

impl Position {
    pub fn new(symbol: impl Into<String>) -> Self {
        Self {
            symbol: symbol.into(),
            quantity: 0,
            avg_price: Decimal::ZERO,
            current_price: Decimal::ZERO,
            unrealized_pnl: Decimal::ZERO,
            realized_pnl: Decimal::ZERO,
        }
    }

    pub fn is_flat(&self) -> bool {
        self.quantity == 0
    }

    /// Market value at the last seen price.
    pub fn total_value(&self) -> Decimal {
        Decimal::from(self.quantity) * self.current_price
    }

    /// Increase the position, re-weighting the average entry price.
    pub fn apply_buy(&mut self, quantity: i64, price: Decimal) {
        let old_qty = Decimal::from(self.quantity);
        let add_qty = Decimal::from(quantity);
        let new_qty = old_qty + add_qty;
        if new_qty > Decimal::ZERO {
            self.avg_price = (self.avg_price * old_qty + price * add_qty) / new_qty;
        }
        self.quantity += quantity;
        self.update_current_price(price);
    }

    /// Reduce the position, returning the realized P&L of the exit.
    /// The average entry price never changes on reduction.
    pub fn apply_sell(&mut self, quantity: i64, price: Decimal) -> Decimal {
        let closed = quantity.min(self.quantity);
        let realized = (price - self.avg_price) * Decimal::from(closed);
        self.realized_pnl += realized;
        self.quantity -= closed;
        if self.quantity == 0 {
            self.avg_price = Decimal::ZERO;
        }
        self.update_current_price(price);
        realized
    }

    /// Refresh the mark price and recompute unrealized P&L.
    pub fn update_current_price(&mut self, price: Decimal) {
        self.current_price = price;
        self.unrealized_pnl = (price - self.avg_price) * Decimal::from(self.quantity);
        if self.quantity == 0 {
            self.unrealized_pnl = Decimal::ZERO;
        }
    }
}

/// Account snapshot.
///
/// `equity = balance + sum of position market values`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Account {
    pub account_id: String,
    pub balance: Decimal,
    pub equity: Decimal,
    pub margin_used: Decimal,
    pub margin_available: Decimal,
}

impl Account {
    pub fn new(account_id: impl Into<String>, balance: Decimal) -> Self {
        Self {
            account_id: account_id.into(),
            balance,
            equity: balance,
            margin_used: Decimal::ZERO,
            margin_available: balance,
        }
    }

    /// Recompute equity from cash plus position market values.
    pub fn mark(&mut self, positions: &[Position]) {
        let market_value: Decimal = positions.iter().map(Position::total_value).sum();
        self.equity = self.balance + market_value;
    }
}
