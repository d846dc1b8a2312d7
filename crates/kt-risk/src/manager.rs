//! Risk manager: drawdown, daily loss, position sizing, slippage and
//! per-symbol trade caps, plus the emergency-stop latch the execution engine
//! consults before every strategy cycle.

use std::collections::HashMap;

use chrono::{Duration, NaiveDate, NaiveDateTime};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use kt_types::{Account, OrderIntent, OrderSide, OrderType};

/// Days of per-symbol trade counts kept before the rollover sweep.
const TRADE_COUNT_RETENTION_DAYS: i64 = 30;

/// Result of a pre-trade check.
#[derive(Debug, Clone, PartialEq)]
pub enum RiskCheckResult {
    Approved,
    Rejected { reason: String },
}

impl RiskCheckResult {
    pub fn is_approved(&self) -> bool {
        matches!(self, RiskCheckResult::Approved)
    }

    pub fn reason(&self) -> Option<&str> {
        match self {
            RiskCheckResult::Rejected { reason } => Some(reason),
            RiskCheckResult::Approved => None,
        }
    }
}

/// Configurable limits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskLimits {
    /// Maximum drawdown from the equity peak before the emergency stop trips.
    pub max_mdd: Decimal,
    /// Maximum single-position notional as a fraction of equity.
    pub max_position_size: Decimal,
    /// Maximum intraday loss from the session-start equity.
    pub max_daily_loss: Decimal,
    /// Maximum |limit price − market price| / market price.
    pub max_slippage: Decimal,
    /// Per-symbol trade cap per session.
    pub max_daily_trades_per_symbol: u32,
}

impl Default for RiskLimits {
    fn default() -> Self {
        Self {
            max_mdd: Decimal::new(20, 2),           // 20%
            max_position_size: Decimal::new(10, 2), // 10%
            max_daily_loss: Decimal::new(5, 2),     // 5%
            max_slippage: Decimal::new(5, 3),       // 0.5%
            max_daily_trades_per_symbol: 10,
        }
    }
}

/// Snapshot of the manager's state for status endpoints and reports.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskStatus {
    pub emergency_stop: bool,
    pub current_mdd: Decimal,
    pub max_mdd: Decimal,
    pub daily_loss: Decimal,
    pub max_daily_loss: Decimal,
    pub peak_equity: Decimal,
    pub daily_start_equity: Decimal,
    pub today_trade_counts: HashMap<String, u32>,
}

/// Session risk state. One instance per live engine.
#[derive(Debug)]
pub struct RiskManager {
    limits: RiskLimits,
    peak_equity: Decimal,
    current_mdd: Decimal,
    daily_start_equity: Decimal,
    daily_loss: Decimal,
    current_date: NaiveDate,
    daily_trade_counts: HashMap<String, HashMap<NaiveDate, u32>>,
    emergency_stop: bool,
    market_close_handled: bool,
}

impl RiskManager {
    pub fn new(limits: RiskLimits, initial_capital: Decimal, today: NaiveDate) -> Self {
        info!(
            max_mdd = %limits.max_mdd,
            max_position_size = %limits.max_position_size,
            max_daily_loss = %limits.max_daily_loss,
            max_slippage = %limits.max_slippage,
            max_daily_trades = limits.max_daily_trades_per_symbol,
            "risk manager initialized"
        );
        Self {
            limits,
            peak_equity: initial_capital,
            current_mdd: Decimal::ZERO,
            daily_start_equity: initial_capital,
            daily_loss: Decimal::ZERO,
            current_date: today,
            daily_trade_counts: HashMap::new(),
            emergency_stop: false,
            market_close_handled: false,
        }
    }

    // -- equity tracking ----------------------------------------------------

    /// Feed the latest equity mark. Rolls daily tracking on date change,
    /// advances the peak and recomputes drawdown and daily loss.
    pub fn update_equity(&mut self, equity: Decimal, ts: NaiveDateTime) {
        let date = ts.date();
        if date != self.current_date {
            self.reset_daily_tracking(equity, date);
            self.current_date = date;
        }

        if equity > self.peak_equity {
            self.peak_equity = equity;
        }
        self.current_mdd = self.drawdown(equity);
        self.daily_loss = self.loss_since_open(equity);
    }

    fn drawdown(&self, equity: Decimal) -> Decimal {
        if self.peak_equity == Decimal::ZERO {
            return Decimal::ZERO;
        }
        ((self.peak_equity - equity) / self.peak_equity).max(Decimal::ZERO)
    }

    fn loss_since_open(&self, equity: Decimal) -> Decimal {
        if self.daily_start_equity == Decimal::ZERO {
            return Decimal::ZERO;
        }
        ((self.daily_start_equity - equity) / self.daily_start_equity).max(Decimal::ZERO)
    }

    fn reset_daily_tracking(&mut self, equity: Decimal, today: NaiveDate) {
        self.daily_start_equity = equity;
        self.daily_loss = Decimal::ZERO;
        self.market_close_handled = false;
        self.sweep_old_trade_counts(today);
        info!(start_equity = %equity, "daily risk tracking reset");
    }

    fn sweep_old_trade_counts(&mut self, today: NaiveDate) {
        let cutoff = today - Duration::days(TRADE_COUNT_RETENTION_DAYS);
        self.daily_trade_counts.retain(|_, per_date| {
            per_date.retain(|date, _| *date >= cutoff);
            !per_date.is_empty()
        });
    }

    // -- session gates ------------------------------------------------------

    /// Go/no-go gate the engine consults before running the strategy.
    /// An MDD breach latches the emergency stop; a daily-loss breach only
    /// blocks for the rest of the session.
    pub fn check_risk_limits(&mut self, account: &Account) -> bool {
        if self.emergency_stop {
            warn!("emergency stop is active");
            return false;
        }

        let mdd = self.drawdown(account.equity);
        if mdd >= self.limits.max_mdd {
            error!(mdd = %mdd, limit = %self.limits.max_mdd, "MDD limit exceeded");
            self.trigger_emergency_stop("MDD limit exceeded");
            return false;
        }

        let daily_loss = self.loss_since_open(account.equity);
        if daily_loss >= self.limits.max_daily_loss {
            error!(loss = %daily_loss, limit = %self.limits.max_daily_loss, "daily loss limit exceeded");
            return false;
        }

        true
    }

    /// Pre-trade validation of a single intent.
    pub fn validate_order(
        &mut self,
        intent: &OrderIntent,
        account: &Account,
        current_price: Option<Decimal>,
    ) -> RiskCheckResult {
        if self.emergency_stop {
            return RiskCheckResult::Rejected {
                reason: "emergency stop active".into(),
            };
        }

        if !self.daily_trade_limit_ok(&intent.symbol) {
            return RiskCheckResult::Rejected {
                reason: format!(
                    "Daily trade limit reached for {} ({}/day)",
                    intent.symbol, self.limits.max_daily_trades_per_symbol
                ),
            };
        }

        // Slippage gate only applies when both a limit price and a market
        // price are known; MARKET orders fill at whatever the venue gives.
        if intent.order_type != OrderType::Market {
            if let (Some(order_price), Some(market_price)) = (intent.price, current_price) {
                if market_price > Decimal::ZERO {
                    let slippage = ((order_price - market_price) / market_price).abs();
                    if slippage > self.limits.max_slippage {
                        return RiskCheckResult::Rejected {
                            reason: format!(
                                "slippage {slippage:.4} exceeds limit {}",
                                self.limits.max_slippage
                            ),
                        };
                    }
                }
            }
        }

        if intent.side == OrderSide::Buy {
            let price = intent.price.or(current_price).unwrap_or(Decimal::ZERO);
            let notional = Decimal::from(intent.quantity) * price;
            if notional > Decimal::ZERO && account.equity > Decimal::ZERO {
                let ratio = notional / account.equity;
                if ratio > self.limits.max_position_size {
                    return RiskCheckResult::Rejected {
                        reason: format!(
                            "position size {ratio:.4} exceeds limit {}",
                            self.limits.max_position_size
                        ),
                    };
                }
            }
        }

        RiskCheckResult::Approved
    }

    fn daily_trade_limit_ok(&self, symbol: &str) -> bool {
        let count = self
            .daily_trade_counts
            .get(symbol)
            .and_then(|per_date| per_date.get(&self.current_date))
            .copied()
            .unwrap_or(0);
        count < self.limits.max_daily_trades_per_symbol
    }

    /// Record a completed trade (called after a confirmed fill).
    pub fn record_trade(&mut self, symbol: &str, date: NaiveDate) {
        let count = self
            .daily_trade_counts
            .entry(symbol.to_string())
            .or_default()
            .entry(date)
            .or_insert(0);
        *count += 1;
        debug!(
            symbol,
            count = *count,
            limit = self.limits.max_daily_trades_per_symbol,
            "trade recorded"
        );
    }

    /// Returns `true` exactly once per transition into session end. The
    /// engine uses this to bulk-cancel open orders at the close.
    pub fn check_market_close_and_cancel_orders(&mut self, session_ended: bool) -> bool {
        if session_ended && !self.market_close_handled {
            self.market_close_handled = true;
            info!("session end observed; signalling open-order cancellation");
            return true;
        }
        false
    }

    // -- emergency stop -----------------------------------------------------

    pub fn trigger_emergency_stop(&mut self, reason: &str) {
        self.emergency_stop = true;
        error!(
            reason,
            mdd = %self.current_mdd,
            peak = %self.peak_equity,
            "EMERGENCY STOP TRIGGERED"
        );
    }

    pub fn reset_emergency_stop(&mut self) {
        self.emergency_stop = false;
        info!("emergency stop reset");
    }

    pub fn is_emergency_stopped(&self) -> bool {
        self.emergency_stop
    }

    // -- accessors ----------------------------------------------------------

    pub fn current_mdd(&self) -> Decimal {
        self.current_mdd
    }

    pub fn limits(&self) -> &RiskLimits {
        &self.limits
    }

    pub fn status(&self) -> RiskStatus {
        let today_trade_counts = self
            .daily_trade_counts
            .iter()
            .filter_map(|(symbol, per_date)| {
                per_date
                    .get(&self.current_date)
                    .map(|count| (symbol.clone(), *count))
            })
            .collect();

        RiskStatus {
            emergency_stop: self.emergency_stop,
            current_mdd: self.current_mdd,
            max_mdd: self.limits.max_mdd,
            daily_loss: self.daily_loss,
            max_daily_loss: self.limits.max_daily_loss,
            peak_equity: self.peak_equity,
            daily_start_equity: self.daily_start_equity,
            today_trade_counts,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 7, d).unwrap()
    }

    fn at(d: u32) -> NaiveDateTime {
        day(d).and_hms_opt(10, 0, 0).unwrap()
    }

    fn manager() -> RiskManager {
        RiskManager::new(RiskLimits::default(), dec!(10_000_000), day(1))
    }

    fn account(equity: Decimal) -> Account {
        let mut account = Account::new("test", equity);
        account.equity = equity;
        account
    }

    #[test]
    fn test_mdd_tracks_running_peak() {
        let mut rm = manager();
        rm.update_equity(dec!(11_000_000), at(1));
        rm.update_equity(dec!(9_900_000), at(1));

        // (11_000_000 - 9_900_000) / 11_000_000 = 0.1
        assert_eq!(rm.current_mdd(), dec!(0.1));
        assert!(!rm.is_emergency_stopped());
    }

    #[test]
    fn test_mdd_breach_sets_emergency_stop() {
        let mut rm = manager();
        rm.update_equity(dec!(12_000_000), at(1));

        // 9.5M from a 12M peak is a 20.8% drawdown.
        assert!(!rm.check_risk_limits(&account(dec!(9_500_000))));
        assert!(rm.is_emergency_stopped());

        // Latch holds even for a healthy account.
        assert!(!rm.check_risk_limits(&account(dec!(12_000_000))));
    }

    #[test]
    fn test_daily_loss_blocks_without_emergency() {
        let mut rm = manager();
        rm.update_equity(dec!(10_000_000), at(1));

        // 6% below the session-start equity, peak untouched enough for MDD.
        assert!(!rm.check_risk_limits(&account(dec!(9_400_000))));
        assert!(!rm.is_emergency_stopped());
    }

    #[test]
    fn test_position_cap() {
        let mut rm = manager();
        let account = account(dec!(10_000_000));

        let small = OrderIntent::limit("005930", OrderSide::Buy, 10, dec!(50_000));
        assert!(rm
            .validate_order(&small, &account, Some(dec!(50_000)))
            .is_approved());

        let large = OrderIntent::limit("005930", OrderSide::Buy, 30, dec!(50_000));
        assert!(!rm
            .validate_order(&large, &account, Some(dec!(50_000)))
            .is_approved());
    }

    #[test]
    fn test_sell_not_subject_to_position_cap() {
        let mut rm = manager();
        let account = account(dec!(10_000_000));
        let sell = OrderIntent::limit("005930", OrderSide::Sell, 1000, dec!(50_000));
        assert!(rm
            .validate_order(&sell, &account, Some(dec!(50_000)))
            .is_approved());
    }

    #[test]
    fn test_daily_trade_cap_resets_next_day() {
        let mut rm = manager();
        let account = account(dec!(100_000_000));
        let intent = OrderIntent::market("005930", OrderSide::Buy, 1);

        for _ in 0..10 {
            rm.record_trade("005930", day(1));
        }
        let result = rm.validate_order(&intent, &account, Some(dec!(70_000)));
        assert!(!result.is_approved());
        assert!(result.reason().unwrap().contains("Daily trade limit"));

        // Next day: counts no longer apply.
        rm.update_equity(dec!(100_000_000), at(2));
        assert!(rm
            .validate_order(&intent, &account, Some(dec!(70_000)))
            .is_approved());
    }

    #[test]
    fn test_slippage_gate() {
        let mut rm = manager();
        let account = account(dec!(100_000_000));

        // 1% away from market with a 0.5% limit.
        let wide = OrderIntent::limit("005930", OrderSide::Buy, 1, dec!(70_700));
        assert!(!rm
            .validate_order(&wide, &account, Some(dec!(70_000)))
            .is_approved());

        // Market orders bypass the slippage check entirely.
        let market = OrderIntent::market("005930", OrderSide::Buy, 1);
        assert!(rm
            .validate_order(&market, &account, Some(dec!(70_000)))
            .is_approved());
    }

    #[test]
    fn test_market_close_latch_fires_once() {
        let mut rm = manager();
        assert!(!rm.check_market_close_and_cancel_orders(false));
        assert!(rm.check_market_close_and_cancel_orders(true));
        assert!(!rm.check_market_close_and_cancel_orders(true));

        // New session: latch rearms.
        rm.update_equity(dec!(10_000_000), at(2));
        assert!(rm.check_market_close_and_cancel_orders(true));
    }

    #[test]
    fn test_trade_count_sweep_on_rollover() {
        let mut rm = manager();
        rm.record_trade("005930", day(1));
        // 31+ days later the old counts are swept.
        rm.update_equity(dec!(10_000_000), NaiveDate::from_ymd_opt(2025, 8, 15).unwrap().and_hms_opt(9, 0, 0).unwrap());
        assert!(rm.status().today_trade_counts.is_empty());
        assert!(rm.daily_trade_counts.is_empty());
    }

    #[test]
    fn test_emergency_reset() {
        let mut rm = manager();
        rm.trigger_emergency_stop("test");
        assert!(rm.is_emergency_stopped());
        rm.reset_emergency_stop();
        assert!(!rm.is_emergency_stopped());
    }
}
