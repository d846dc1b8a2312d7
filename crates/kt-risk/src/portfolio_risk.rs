//! Portfolio-level risk analytics.
//!
//! Where [`crate::manager::RiskManager`] gates individual orders, this
//! module answers the portfolio questions: historical VaR/CVaR, annualized
//! volatility, Sharpe/Sortino, beta against a market index, average
//! pairwise correlation, and concentration (normalized Herfindahl index),
//! rolled up into a coarse risk level. It also sizes positions against a
//! risk budget. Price history is fed in daily; statistics run on f64.

use std::collections::{BTreeMap, HashMap};

use chrono::NaiveDate;
use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use kt_types::Position;

/// Trading days per year for annualization.
const TRADING_DAYS: f64 = 252.0;
/// Assumed annual risk-free rate for Sharpe/Sortino.
const RISK_FREE_RATE: f64 = 0.02;
/// Fallback annualized volatility when a symbol has too little history.
const DEFAULT_VOLATILITY: f64 = 0.30;
/// Minimum overlapping observations before beta is trusted.
const MIN_BETA_OBSERVATIONS: usize = 30;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
    Critical,
}

/// Portfolio risk snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PortfolioRiskMetrics {
    /// Historical one-day VaR at the configured confidence, as a positive
    /// fraction of portfolio value.
    pub var: Decimal,
    /// Expected shortfall beyond the VaR threshold.
    pub cvar: Decimal,
    /// Annualized volatility of the weighted portfolio returns.
    pub volatility: Decimal,
    pub sharpe: Option<Decimal>,
    /// `None` when there were no downside observations.
    pub sortino: Option<Decimal>,
    /// Beta against the fed market index; 1 when unknown.
    pub beta: Decimal,
    /// Average pairwise correlation across held symbols.
    pub correlation_risk: Decimal,
    /// Normalized Herfindahl index over position weights (0 = even, 1 = one
    /// position).
    pub concentration_risk: Decimal,
    pub risk_level: RiskLevel,
}

impl PortfolioRiskMetrics {
    fn empty() -> Self {
        Self {
            var: Decimal::ZERO,
            cvar: Decimal::ZERO,
            volatility: Decimal::ZERO,
            sharpe: None,
            sortino: None,
            beta: Decimal::ONE,
            correlation_risk: Decimal::ZERO,
            concentration_risk: Decimal::ZERO,
            risk_level: RiskLevel::Low,
        }
    }
}

/// Rolling price store plus the statistics over it.
#[derive(Debug)]
pub struct PortfolioRiskAnalyzer {
    lookback_days: i64,
    confidence: f64,
    price_history: HashMap<String, BTreeMap<NaiveDate, Decimal>>,
    index_history: BTreeMap<NaiveDate, Decimal>,
}

impl Default for PortfolioRiskAnalyzer {
    fn default() -> Self {
        Self::new(252, 0.95)
    }
}

impl PortfolioRiskAnalyzer {
    pub fn new(lookback_days: i64, confidence: f64) -> Self {
        Self {
            lookback_days,
            confidence,
            price_history: HashMap::new(),
            index_history: BTreeMap::new(),
        }
    }

    /// Record one daily close for a symbol; history beyond the lookback
    /// window (plus slack) is dropped.
    pub fn update_price(&mut self, symbol: &str, date: NaiveDate, price: Decimal) {
        let history = self.price_history.entry(symbol.to_string()).or_default();
        history.insert(date, price);
        let cutoff = date - chrono::Duration::days(self.lookback_days + 30);
        history.retain(|d, _| *d >= cutoff);
    }

    /// Record one daily market-index value (for beta).
    pub fn update_market_index(&mut self, date: NaiveDate, value: Decimal) {
        self.index_history.insert(date, value);
        let cutoff = date - chrono::Duration::days(self.lookback_days + 30);
        self.index_history.retain(|d, _| *d >= cutoff);
    }

    /// Full portfolio analysis over the current positions.
    pub fn analyze(&self, positions: &[Position]) -> PortfolioRiskMetrics {
        let weights = position_weights(positions);
        if weights.is_empty() {
            return PortfolioRiskMetrics::empty();
        }

        let symbol_returns: HashMap<&str, BTreeMap<NaiveDate, f64>> = weights
            .keys()
            .filter_map(|symbol| {
                let returns = self.symbol_returns(symbol)?;
                Some((symbol.as_str(), returns))
            })
            .collect();

        let portfolio_returns = weighted_portfolio_returns(&weights, &symbol_returns);
        if portfolio_returns.is_empty() {
            // No usable history: only the weight-based metric is available.
            let concentration = concentration_risk(&weights);
            return PortfolioRiskMetrics {
                concentration_risk: to_decimal(concentration),
                risk_level: score_risk_level(0.0, 0.0, concentration, 0.0),
                ..PortfolioRiskMetrics::empty()
            };
        }

        let returns: Vec<f64> = portfolio_returns.values().copied().collect();
        let (var, cvar) = var_cvar(&returns, self.confidence);
        let volatility = std_dev(&returns) * TRADING_DAYS.sqrt();
        let sharpe = sharpe_ratio(&returns);
        let sortino = sortino_ratio(&returns);
        let beta = self.beta(&portfolio_returns);
        let correlation = average_pairwise_correlation(&symbol_returns);
        let concentration = concentration_risk(&weights);
        let mdd = return_series_max_drawdown(&returns);

        PortfolioRiskMetrics {
            var: to_decimal(var),
            cvar: to_decimal(cvar),
            volatility: to_decimal(volatility),
            sharpe: sharpe.map(to_decimal),
            sortino: sortino.map(to_decimal),
            beta: to_decimal(beta),
            correlation_risk: to_decimal(correlation),
            concentration_risk: to_decimal(concentration),
            risk_level: score_risk_level(var, mdd, concentration, correlation),
        }
    }

    /// Risk-budget position size: the smaller of the target-weight notional
    /// and `equity · risk_budget / volatility`, floored to whole shares at
    /// the latest known price.
    pub fn suggest_position_size(
        &self,
        symbol: &str,
        target_weight: f64,
        equity: Decimal,
        risk_budget: f64,
    ) -> i64 {
        let price = match self
            .price_history
            .get(symbol)
            .and_then(|history| history.values().last())
        {
            Some(price) if *price > Decimal::ZERO => *price,
            _ => return 0,
        };

        let mut volatility = self.symbol_volatility(symbol);
        if volatility == 0.0 {
            volatility = DEFAULT_VOLATILITY;
        }

        let equity_f = equity.to_f64().unwrap_or(0.0);
        let risk_adjusted = equity_f * risk_budget / volatility;
        let target = equity_f * target_weight;
        let value = risk_adjusted.min(target).max(0.0);

        let price_f = price.to_f64().unwrap_or(0.0);
        if price_f <= 0.0 {
            return 0;
        }
        (value / price_f).floor() as i64
    }

    /// Annualized volatility of one symbol; the conservative default below
    /// thirty observations.
    pub fn symbol_volatility(&self, symbol: &str) -> f64 {
        let Some(returns) = self.symbol_returns(symbol) else {
            return DEFAULT_VOLATILITY;
        };
        if returns.len() < 30 {
            return DEFAULT_VOLATILITY;
        }
        let values: Vec<f64> = returns.values().copied().collect();
        std_dev(&values) * TRADING_DAYS.sqrt()
    }

    fn symbol_returns(&self, symbol: &str) -> Option<BTreeMap<NaiveDate, f64>> {
        let history = self.price_history.get(symbol)?;
        if history.len() < 2 {
            return None;
        }
        let mut returns = BTreeMap::new();
        let mut prev: Option<(&NaiveDate, &Decimal)> = None;
        for (date, price) in history {
            if let Some((_, prev_price)) = prev {
                if *prev_price > Decimal::ZERO {
                    let change = (*price / *prev_price - Decimal::ONE)
                        .to_f64()
                        .unwrap_or(0.0);
                    returns.insert(*date, change);
                }
            }
            prev = Some((date, price));
        }
        Some(returns)
    }

    fn beta(&self, portfolio_returns: &BTreeMap<NaiveDate, f64>) -> f64 {
        if self.index_history.len() < 2 {
            return 1.0;
        }
        let mut index_returns = BTreeMap::new();
        let mut prev: Option<Decimal> = None;
        for (date, value) in &self.index_history {
            if let Some(prev_value) = prev {
                if prev_value > Decimal::ZERO {
                    index_returns.insert(
                        *date,
                        (*value / prev_value - Decimal::ONE).to_f64().unwrap_or(0.0),
                    );
                }
            }
            prev = Some(*value);
        }

        let common: Vec<(f64, f64)> = portfolio_returns
            .iter()
            .filter_map(|(date, r)| index_returns.get(date).map(|m| (*r, *m)))
            .collect();
        if common.len() < MIN_BETA_OBSERVATIONS {
            return 1.0;
        }

        let port: Vec<f64> = common.iter().map(|(p, _)| *p).collect();
        let market: Vec<f64> = common.iter().map(|(_, m)| *m).collect();
        let market_var = variance(&market);
        if market_var == 0.0 {
            return 1.0;
        }
        covariance(&port, &market) / market_var
    }
}

// -- statistics -------------------------------------------------------------

fn position_weights(positions: &[Position]) -> HashMap<String, f64> {
    let total: Decimal = positions
        .iter()
        .filter(|p| p.quantity > 0)
        .map(Position::total_value)
        .sum();
    if total <= Decimal::ZERO {
        return HashMap::new();
    }
    positions
        .iter()
        .filter(|p| p.quantity > 0)
        .map(|p| {
            let weight = (p.total_value() / total).to_f64().unwrap_or(0.0);
            (p.symbol.clone(), weight)
        })
        .collect()
}

/// Weighted sum of per-symbol returns over the dates every held symbol has.
fn weighted_portfolio_returns(
    weights: &HashMap<String, f64>,
    symbol_returns: &HashMap<&str, BTreeMap<NaiveDate, f64>>,
) -> BTreeMap<NaiveDate, f64> {
    let mut series: Vec<(&str, f64, &BTreeMap<NaiveDate, f64>)> = Vec::new();
    for (symbol, weight) in weights {
        if let Some(returns) = symbol_returns.get(symbol.as_str()) {
            series.push((symbol.as_str(), *weight, returns));
        }
    }
    let Some((_, _, first)) = series.first() else {
        return BTreeMap::new();
    };

    first
        .keys()
        .filter(|date| series.iter().all(|(_, _, returns)| returns.contains_key(date)))
        .map(|date| {
            let combined = series
                .iter()
                .map(|(_, weight, returns)| weight * returns[date])
                .sum();
            (*date, combined)
        })
        .collect()
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

fn variance(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let m = mean(values);
    values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / (values.len() - 1) as f64
}

fn std_dev(values: &[f64]) -> f64 {
    variance(values).sqrt()
}

fn covariance(a: &[f64], b: &[f64]) -> f64 {
    if a.len() != b.len() || a.len() < 2 {
        return 0.0;
    }
    let (ma, mb) = (mean(a), mean(b));
    a.iter()
        .zip(b)
        .map(|(x, y)| (x - ma) * (y - mb))
        .sum::<f64>()
        / (a.len() - 1) as f64
}

/// Linear-interpolated percentile of an unsorted sample, `q` in [0, 1].
fn percentile(values: &[f64], q: f64) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let rank = q.clamp(0.0, 1.0) * (sorted.len() - 1) as f64;
    let low = rank.floor() as usize;
    let high = rank.ceil() as usize;
    if low == high {
        sorted[low]
    } else {
        let fraction = rank - low as f64;
        sorted[low] + (sorted[high] - sorted[low]) * fraction
    }
}

/// Historical VaR and expected shortfall, both as positive fractions.
fn var_cvar(returns: &[f64], confidence: f64) -> (f64, f64) {
    if returns.is_empty() {
        return (0.0, 0.0);
    }
    let threshold = percentile(returns, 1.0 - confidence);
    let tail: Vec<f64> = returns.iter().copied().filter(|r| *r <= threshold).collect();
    let cvar = if tail.is_empty() {
        threshold
    } else {
        mean(&tail)
    };
    (threshold.abs(), cvar.abs())
}

fn sharpe_ratio(returns: &[f64]) -> Option<f64> {
    if returns.len() < 2 {
        return None;
    }
    let daily_rf = RISK_FREE_RATE / TRADING_DAYS;
    let excess: Vec<f64> = returns.iter().map(|r| r - daily_rf).collect();
    let sd = std_dev(&excess);
    if sd == 0.0 {
        return None;
    }
    Some(mean(&excess) * TRADING_DAYS / (sd * TRADING_DAYS.sqrt()))
}

fn sortino_ratio(returns: &[f64]) -> Option<f64> {
    if returns.len() < 2 {
        return None;
    }
    let daily_rf = RISK_FREE_RATE / TRADING_DAYS;
    let excess: Vec<f64> = returns.iter().map(|r| r - daily_rf).collect();
    let downside: Vec<f64> = excess.iter().copied().filter(|r| *r < 0.0).collect();
    if downside.is_empty() {
        return None;
    }
    let downside_deviation = std_dev(&downside) * TRADING_DAYS.sqrt();
    if downside_deviation == 0.0 {
        return None;
    }
    Some(mean(&excess) * TRADING_DAYS / downside_deviation)
}

/// Average off-diagonal correlation across the held symbols' return series,
/// pairwise-aligned on common dates.
fn average_pairwise_correlation(
    symbol_returns: &HashMap<&str, BTreeMap<NaiveDate, f64>>,
) -> f64 {
    let symbols: Vec<&&str> = symbol_returns.keys().collect();
    if symbols.len() < 2 {
        return 0.0;
    }

    let mut correlations = Vec::new();
    for i in 0..symbols.len() {
        for j in i + 1..symbols.len() {
            let a = &symbol_returns[*symbols[i]];
            let b = &symbol_returns[*symbols[j]];
            let common: Vec<(f64, f64)> = a
                .iter()
                .filter_map(|(date, x)| b.get(date).map(|y| (*x, *y)))
                .collect();
            if common.len() < 2 {
                continue;
            }
            let xs: Vec<f64> = common.iter().map(|(x, _)| *x).collect();
            let ys: Vec<f64> = common.iter().map(|(_, y)| *y).collect();
            let denominator = std_dev(&xs) * std_dev(&ys);
            if denominator > 0.0 {
                correlations.push(covariance(&xs, &ys) / denominator);
            }
        }
    }
    mean(&correlations)
}

/// Normalized Herfindahl-Hirschman index over weights: 0 for an evenly
/// spread book, 1 for a single position.
fn concentration_risk(weights: &HashMap<String, f64>) -> f64 {
    let n = weights.len();
    if n < 2 {
        return 0.0;
    }
    let hhi: f64 = weights.values().map(|w| w * w).sum();
    let floor = 1.0 / n as f64;
    (hhi - floor) / (1.0 - floor)
}

fn return_series_max_drawdown(returns: &[f64]) -> f64 {
    let mut cumulative = 1.0;
    let mut peak = 1.0;
    let mut mdd = 0.0f64;
    for r in returns {
        cumulative *= 1.0 + r;
        if cumulative > peak {
            peak = cumulative;
        }
        if peak > 0.0 {
            mdd = mdd.max((peak - cumulative) / peak);
        }
    }
    mdd
}

/// Coarse scoring of the headline metrics into a risk level.
fn score_risk_level(var: f64, mdd: f64, concentration: f64, correlation: f64) -> RiskLevel {
    let mut score = 0u32;

    score += match var {
        v if v > 0.10 => 3,
        v if v > 0.05 => 2,
        v if v > 0.03 => 1,
        _ => 0,
    };
    score += match mdd {
        m if m > 0.20 => 3,
        m if m > 0.15 => 2,
        m if m > 0.10 => 1,
        _ => 0,
    };
    score += match concentration {
        c if c > 0.80 => 3,
        c if c > 0.60 => 2,
        c if c > 0.40 => 1,
        _ => 0,
    };
    score += match correlation {
        c if c > 0.80 => 2,
        c if c > 0.60 => 1,
        _ => 0,
    };

    match score {
        s if s >= 8 => RiskLevel::Critical,
        s if s >= 5 => RiskLevel::High,
        s if s >= 3 => RiskLevel::Medium,
        _ => RiskLevel::Low,
    }
}

fn to_decimal(value: f64) -> Decimal {
    Decimal::from_f64(value).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn day(offset: i64) -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 1, 2).unwrap() + chrono::Duration::days(offset)
    }

    fn position(symbol: &str, quantity: i64, price: Decimal) -> Position {
        let mut position = Position::new(symbol);
        position.apply_buy(quantity, price);
        position
    }

    /// Feed a daily close series starting at day 0.
    fn feed(analyzer: &mut PortfolioRiskAnalyzer, symbol: &str, closes: &[f64]) {
        for (i, close) in closes.iter().enumerate() {
            analyzer.update_price(symbol, day(i as i64), to_decimal(*close));
        }
    }

    #[test]
    fn test_empty_positions_are_low_risk() {
        let analyzer = PortfolioRiskAnalyzer::default();
        let metrics = analyzer.analyze(&[]);
        assert_eq!(metrics.risk_level, RiskLevel::Low);
        assert_eq!(metrics.var, Decimal::ZERO);
        assert_eq!(metrics.beta, Decimal::ONE);
    }

    #[test]
    fn test_var_and_cvar_capture_the_tail() {
        // 19 flat days and one -10% crash.
        let mut returns = vec![0.0; 19];
        returns.push(-0.10);
        let (var, cvar) = var_cvar(&returns, 0.95);
        assert!(var > 0.0);
        assert!(cvar >= var);
        assert!(cvar <= 0.10 + 1e-9);
    }

    #[test]
    fn test_percentile_interpolates() {
        let values = vec![1.0, 2.0, 3.0, 4.0];
        assert!((percentile(&values, 0.0) - 1.0).abs() < 1e-12);
        assert!((percentile(&values, 1.0) - 4.0).abs() < 1e-12);
        assert!((percentile(&values, 0.5) - 2.5).abs() < 1e-12);
    }

    #[test]
    fn test_concentration_even_vs_dominant() {
        let mut even = HashMap::new();
        even.insert("005930".to_string(), 0.5);
        even.insert("000660".to_string(), 0.5);
        assert!(concentration_risk(&even).abs() < 1e-12);

        let mut dominant = HashMap::new();
        dominant.insert("005930".to_string(), 0.9);
        dominant.insert("000660".to_string(), 0.1);
        assert!((concentration_risk(&dominant) - 0.64).abs() < 1e-9);

        // A single position carries no spread to measure.
        let mut single = HashMap::new();
        single.insert("005930".to_string(), 1.0);
        assert_eq!(concentration_risk(&single), 0.0);
    }

    #[test]
    fn test_sortino_none_without_downside() {
        let returns = vec![0.01, 0.02, 0.01, 0.03];
        assert!(sortino_ratio(&returns).is_none());

        let mixed = vec![0.01, -0.02, 0.01, -0.03, 0.02];
        assert!(sortino_ratio(&mixed).is_some());
    }

    #[test]
    fn test_beta_defaults_to_one_without_index() {
        let mut analyzer = PortfolioRiskAnalyzer::default();
        feed(&mut analyzer, "005930", &[100.0, 101.0, 102.0, 101.5, 103.0]);

        let metrics = analyzer.analyze(&[position("005930", 10, dec!(70000))]);
        assert_eq!(metrics.beta, Decimal::ONE);
    }

    #[test]
    fn test_analyze_volatile_concentrated_book_scores_high() {
        let mut analyzer = PortfolioRiskAnalyzer::default();
        // Wild swings: ±12% daily.
        let mut closes = Vec::new();
        let mut price = 100.0;
        for i in 0..60 {
            price *= if i % 2 == 0 { 0.88 } else { 1.12 };
            closes.push(price);
        }
        feed(&mut analyzer, "005930", &closes);

        let metrics = analyzer.analyze(&[position("005930", 10, dec!(70000))]);
        assert!(metrics.var > dec!(0.05));
        assert!(metrics.volatility > dec!(0.5));
        assert!(matches!(
            metrics.risk_level,
            RiskLevel::Medium | RiskLevel::High | RiskLevel::Critical
        ));
    }

    #[test]
    fn test_correlated_pair_raises_correlation_risk() {
        let mut analyzer = PortfolioRiskAnalyzer::default();
        let closes: Vec<f64> = (0..40)
            .map(|i| 100.0 + (i as f64) + if i % 3 == 0 { 2.0 } else { -1.0 })
            .collect();
        // Identical series → correlation 1.
        feed(&mut analyzer, "005930", &closes);
        feed(&mut analyzer, "000660", &closes);

        let metrics = analyzer.analyze(&[
            position("005930", 10, dec!(70000)),
            position("000660", 10, dec!(180000)),
        ]);
        assert!(metrics.correlation_risk > dec!(0.99));
    }

    #[test]
    fn test_risk_level_scoring_thresholds() {
        assert_eq!(score_risk_level(0.01, 0.05, 0.1, 0.1), RiskLevel::Low);
        assert_eq!(score_risk_level(0.06, 0.12, 0.1, 0.1), RiskLevel::Medium);
        assert_eq!(score_risk_level(0.11, 0.16, 0.5, 0.7), RiskLevel::High);
        assert_eq!(score_risk_level(0.11, 0.25, 0.9, 0.9), RiskLevel::Critical);
    }

    #[test]
    fn test_suggest_position_size_respects_risk_budget() {
        let mut analyzer = PortfolioRiskAnalyzer::default();
        // Flat history: volatility 0 falls back to the 30% default.
        feed(&mut analyzer, "005930", &vec![70000.0; 40]);

        // 10M equity, 2% budget / 30% vol = 666_666 KRW, below the 10%
        // target notional of 1M.
        let quantity =
            analyzer.suggest_position_size("005930", 0.10, dec!(10_000_000), 0.02);
        assert_eq!(quantity, 9);

        // Unknown symbol: no price, no size.
        assert_eq!(
            analyzer.suggest_position_size("035420", 0.10, dec!(10_000_000), 0.02),
            0
        );
    }
}
