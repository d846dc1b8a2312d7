//! Performance metrics over an equity curve and closed-trade P&L list.

use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::Decimal;

/// Trading days per year used for Sharpe annualization.
const TRADING_DAYS: f64 = 252.0;

/// Maximum drawdown against the running peak, as a fraction in [0, 1].
pub fn max_drawdown(curve: &[Decimal]) -> Decimal {
    let mut peak = Decimal::ZERO;
    let mut mdd = Decimal::ZERO;
    for &equity in curve {
        if equity > peak {
            peak = equity;
        }
        if peak > Decimal::ZERO {
            let drawdown = (peak - equity) / peak;
            if drawdown > mdd {
                mdd = drawdown;
            }
        }
    }
    mdd
}

/// Annualized Sharpe ratio over per-bar returns derived from the curve.
/// `None` with fewer than three points or zero variance.
pub fn sharpe_ratio(curve: &[Decimal]) -> Option<Decimal> {
    if curve.len() < 3 {
        return None;
    }

    let returns: Vec<f64> = curve
        .windows(2)
        .filter_map(|w| {
            let prev = w[0].to_f64()?;
            let cur = w[1].to_f64()?;
            if prev != 0.0 {
                Some(cur / prev - 1.0)
            } else {
                None
            }
        })
        .collect();
    if returns.len() < 2 {
        return None;
    }

    let mean = returns.iter().sum::<f64>() / returns.len() as f64;
    let variance = returns
        .iter()
        .map(|r| (r - mean).powi(2))
        .sum::<f64>()
        / (returns.len() - 1) as f64;
    let std_dev = variance.sqrt();
    if std_dev == 0.0 {
        return None;
    }

    Decimal::from_f64(mean / std_dev * TRADING_DAYS.sqrt())
}

/// Fraction of closed trades with positive P&L. Zero when nothing closed.
pub fn win_rate(closed_pnls: &[Decimal]) -> Decimal {
    if closed_pnls.is_empty() {
        return Decimal::ZERO;
    }
    let wins = closed_pnls.iter().filter(|p| **p > Decimal::ZERO).count();
    Decimal::from(wins as u64) / Decimal::from(closed_pnls.len() as u64)
}

/// Gross wins over gross losses. `None` when there are no losing trades
/// (the ratio would be infinite).
pub fn profit_factor(closed_pnls: &[Decimal]) -> Option<Decimal> {
    let gross_win: Decimal = closed_pnls
        .iter()
        .filter(|p| **p > Decimal::ZERO)
        .copied()
        .sum();
    let gross_loss: Decimal = closed_pnls
        .iter()
        .filter(|p| **p < Decimal::ZERO)
        .map(|p| -*p)
        .sum();
    if gross_loss == Decimal::ZERO {
        return None;
    }
    Some(gross_win / gross_loss)
}
