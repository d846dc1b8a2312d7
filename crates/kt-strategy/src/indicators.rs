//! Indicator pre-pass.
//!
//! Computes named columns once per bar cycle; the declarative strategy's
//! condition tree only reads them. Column names follow the convention the
//! builder emits: `MA_20`, `EMA_12`, `RSI_14`, `MACD_12_26`, plus the ICT
//! columns `fvg_type`, `order_block_top`, `order_block_bottom`,
//! `liquidity_high`, `liquidity_low`, `mss_type`.

use std::collections::HashMap;

use rust_decimal::Decimal;

use crate::base::BarSeries;

/// Swing window used by the liquidity-pool and MSS columns.
const SWING_WINDOW: usize = 20;

/// Named indicator columns, one value per bar (None during warm-up).
#[derive(Debug, Default)]
pub struct IndicatorFrame {
    columns: HashMap<String, Vec<Option<Decimal>>>,
    len: usize,
}

impl IndicatorFrame {
    pub fn column(&self, name: &str) -> Option<&[Option<Decimal>]> {
        self.columns.get(name).map(Vec::as_slice)
    }

    /// Latest value of a column, if computed and warm.
    pub fn latest(&self, name: &str) -> Option<Decimal> {
        self.columns.get(name)?.last().copied().flatten()
    }

    pub fn insert(&mut self, name: impl Into<String>, values: Vec<Option<Decimal>>) {
        self.len = self.len.max(values.len());
        self.columns.insert(name.into(), values);
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

pub fn sma(closes: &[Decimal], period: usize) -> Vec<Option<Decimal>> {
    let mut out = vec![None; closes.len()];
    if period == 0 {
        return out;
    }
    let mut sum = Decimal::ZERO;
    for i in 0..closes.len() {
        sum += closes[i];
        if i >= period {
            sum -= closes[i - period];
        }
        if i + 1 >= period {
            out[i] = Some(sum / Decimal::from(period as u64));
        }
    }
    out
}

pub fn ema(closes: &[Decimal], period: usize) -> Vec<Option<Decimal>> {
    let mut out = vec![None; closes.len()];
    if period == 0 || closes.len() < period {
        return out;
    }
    let alpha = Decimal::from(2) / Decimal::from(period as u64 + 1);
    // Seed with the SMA of the first `period` closes.
    let seed: Decimal =
        closes[..period].iter().copied().sum::<Decimal>() / Decimal::from(period as u64);
    let mut prev = seed;
    out[period - 1] = Some(seed);
    for i in period..closes.len() {
        prev = alpha * closes[i] + (Decimal::ONE - alpha) * prev;
        out[i] = Some(prev);
    }
    out
}

/// Wilder-smoothed RSI.
pub fn rsi(closes: &[Decimal], period: usize) -> Vec<Option<Decimal>> {
    let mut out = vec![None; closes.len()];
    if period == 0 || closes.len() <= period {
        return out;
    }

    let hundred = Decimal::from(100);
    let p = Decimal::from(period as u64);
    let mut avg_gain = Decimal::ZERO;
    let mut avg_loss = Decimal::ZERO;

    for i in 1..=period {
        let change = closes[i] - closes[i - 1];
        if change > Decimal::ZERO {
            avg_gain += change;
        } else {
            avg_loss -= change;
        }
    }
    avg_gain /= p;
    avg_loss /= p;

    let to_rsi = |gain: Decimal, loss: Decimal| {
        if loss == Decimal::ZERO {
            hundred
        } else {
            hundred - hundred / (Decimal::ONE + gain / loss)
        }
    };
    out[period] = Some(to_rsi(avg_gain, avg_loss));

    for i in period + 1..closes.len() {
        let change = closes[i] - closes[i - 1];
        let (gain, loss) = if change > Decimal::ZERO {
            (change, Decimal::ZERO)
        } else {
            (Decimal::ZERO, -change)
        };
        avg_gain = (avg_gain * (p - Decimal::ONE) + gain) / p;
        avg_loss = (avg_loss * (p - Decimal::ONE) + loss) / p;
        out[i] = Some(to_rsi(avg_gain, avg_loss));
    }
    out
}

/// MACD line (fast EMA − slow EMA).
pub fn macd(closes: &[Decimal], fast: usize, slow: usize) -> Vec<Option<Decimal>> {
    let fast_ema = ema(closes, fast);
    let slow_ema = ema(closes, slow);
    fast_ema
        .into_iter()
        .zip(slow_ema)
        .map(|(f, s)| match (f, s) {
            (Some(f), Some(s)) => Some(f - s),
            _ => None,
        })
        .collect()
}

/// Compute every column an indicator reference set needs, plus the ICT
/// columns, in one pass over the series.
pub fn apply_indicators(bars: &BarSeries<'_>, refs: &[(String, usize)]) -> IndicatorFrame {
    let closes: Vec<Decimal> = bars.closes().collect();
    let mut frame = IndicatorFrame::default();

    for (name, period) in refs {
        let column_name = match name.as_str() {
            "MA" => {
                frame.insert(format!("MA_{period}"), sma(&closes, *period));
                continue;
            }
            "EMA" => {
                frame.insert(format!("EMA_{period}"), ema(&closes, *period));
                continue;
            }
            "RSI" => {
                frame.insert(format!("RSI_{period}"), rsi(&closes, *period));
                continue;
            }
            other => other,
        };
        // MACD refs arrive pre-rendered as "MACD_f_s".
        if let Some(rest) = column_name.strip_prefix("MACD_") {
            if let Some((f, s)) = rest.split_once('_') {
                if let (Ok(f), Ok(s)) = (f.parse::<usize>(), s.parse::<usize>()) {
                    frame.insert(column_name.to_string(), macd(&closes, f, s));
                }
            }
        }
    }

    apply_ict_columns(bars, &mut frame);
    frame
}

/// ICT pattern columns derived from raw price action.
///
/// Sign conventions: +1 bullish, -1 bearish, 0 none. The order-block columns
/// forward-fill the most recent block's bounds.
fn apply_ict_columns(bars: &BarSeries<'_>, frame: &mut IndicatorFrame) {
    let data = bars.bars();
    let n = data.len();

    let mut fvg = vec![None; n];
    let mut ob_top = vec![None; n];
    let mut ob_bottom = vec![None; n];
    let mut liq_high = vec![None; n];
    let mut liq_low = vec![None; n];
    let mut mss = vec![None; n];

    // Fair value gaps: a three-candle displacement leaving untraded space.
    for i in 2..n {
        if data[i].low > data[i - 2].high {
            fvg[i] = Some(Decimal::ONE);
        } else if data[i].high < data[i - 2].low {
            fvg[i] = Some(-Decimal::ONE);
        } else {
            fvg[i] = Some(Decimal::ZERO);
        }
    }

    // Order blocks: the last opposing candle before a displacement through
    // its range. Bounds forward-fill until replaced.
    let mut current_block: Option<(Decimal, Decimal)> = None;
    for i in 1..n {
        let prev = &data[i - 1];
        let cur = &data[i];
        let prev_bearish = prev.close < prev.open;
        let prev_bullish = prev.close > prev.open;
        if (prev_bearish && cur.close > prev.high) || (prev_bullish && cur.close < prev.low) {
            current_block = Some((prev.high, prev.low));
        }
        if let Some((top, bottom)) = current_block {
            ob_top[i] = Some(top);
            ob_bottom[i] = Some(bottom);
        }
    }

    // Liquidity pools: resting highs/lows over the swing window.
    for i in 0..n {
        if i + 1 >= SWING_WINDOW {
            let window = &data[i + 1 - SWING_WINDOW..=i];
            liq_high[i] = window.iter().map(|b| b.high).max();
            liq_low[i] = window.iter().map(|b| b.low).min();
        }
    }

    // Market structure shift / break of structure: close through the prior
    // swing extreme.
    for i in SWING_WINDOW..n {
        let window = &data[i - SWING_WINDOW..i];
        let swing_high = window.iter().map(|b| b.high).max().unwrap_or_default();
        let swing_low = window
            .iter()
            .map(|b| b.low)
            .min()
            .unwrap_or_default();
        mss[i] = Some(if data[i].close > swing_high {
            Decimal::ONE
        } else if data[i].close < swing_low {
            -Decimal::ONE
        } else {
            Decimal::ZERO
        });
    }

    frame.insert("fvg_type", fvg);
    frame.insert("order_block_top", ob_top);
    frame.insert("order_block_bottom", ob_bottom);
    frame.insert("liquidity_high", liq_high);
    frame.insert("liquidity_low", liq_low);
    frame.insert("mss_type", mss);
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
                    + chrono::Duration::minutes(i as i64);
                let close = Decimal::from(c);
                Ohlc::new(
                    "005930",
                    ts,
                    close,
                    close + dec!(1),
                    close - dec!(1),
                    close,
                    100,
                    None,
                )
                .unwrap()
            })
            .collect()
    }

    #[test]
    fn test_sma_warmup_and_values() {
        let closes = vec![dec!(100), dec!(101), dec!(102), dec!(103)];
        let out = sma(&closes, 2);
        assert_eq!(out[0], None);
        assert_eq!(out[1], Some(dec!(100.5)));
        assert_eq!(out[3], Some(dec!(102.5)));
    }

    #[test]
    fn test_rsi_all_gains_is_100() {
        let closes: Vec<Decimal> = (0..10).map(|i| Decimal::from(100 + i)).collect();
        let out = rsi(&closes, 5);
        assert_eq!(out[9], Some(dec!(100)));
    }

    #[test]
    fn test_rsi_mixed_between_0_and_100() {
        let closes = vec![
            dec!(100),
            dec!(102),
            dec!(101),
            dec!(103),
            dec!(102),
            dec!(104),
            dec!(103),
        ];
        let value = rsi(&closes, 3)[6].unwrap();
        assert!(value > Decimal::ZERO && value < dec!(100));
    }

    #[test]
    fn test_macd_sign_follows_trend() {
        let closes: Vec<Decimal> = (0..40).map(|i| Decimal::from(100 + i * 2)).collect();
        let out = macd(&closes, 5, 10);
        // Steady uptrend: fast EMA above slow EMA.
        assert!(out.last().unwrap().unwrap() > Decimal::ZERO);
    }

    #[test]
    fn test_apply_indicators_builds_named_columns() {
        let data = make_bars(&(0..30).map(|i| 100 + i).collect::<Vec<_>>());
        let series = BarSeries::new(&data);
        let frame = apply_indicators(
            &series,
            &[("MA".to_string(), 5), ("RSI".to_string(), 14)],
        );
        assert!(frame.latest("MA_5").is_some());
        assert!(frame.latest("RSI_14").is_some());
        assert!(frame.column("fvg_type").is_some());
        assert!(frame.column("mss_type").is_some());
    }

    #[test]
    fn test_fvg_detects_gap_up() {
        // Bar 2 low (109) above bar 0 high (101): bullish gap.
        let mut data = make_bars(&[100, 105, 110]);
        data[2].low = dec!(109);
        let series = BarSeries::new(&data);
        let frame = apply_indicators(&series, &[]);
        let fvg = frame.column("fvg_type").unwrap();
        assert_eq!(fvg[2], Some(Decimal::ONE));
    }

    #[test]
    fn test_mss_breaks_above_swing_high() {
        let mut closes: Vec<i64> = vec![100; SWING_WINDOW];
        closes.push(200); // clean break above the flat swing window
        let data = make_bars(&closes);
        let series = BarSeries::new(&data);
        let frame = apply_indicators(&series, &[]);
        let mss = frame.column("mss_type").unwrap();
        assert_eq!(mss[SWING_WINDOW], Some(Decimal::ONE));
    }
}
