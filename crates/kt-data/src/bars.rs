//! Tick-to-bar construction and data quality gates.
//!
//! The realtime engine feeds raw trade ticks through [`build_bars`], then
//! [`validate_bars`] and [`check_integrity`] before a strategy ever sees
//! them. A failed integrity check means the whole tick-to-bar cycle is
//! skipped for that update rather than trading on suspect data.

use std::collections::BTreeMap;

use chrono::{DateTime, Duration, NaiveDateTime};
use rust_decimal::Decimal;
use tracing::{debug, warn};

use kt_types::{DataError, Ohlc, Tick};

/// Fraction of bars allowed to violate OHLC relationships before the series
/// is declared corrupt.
const MAX_INVALID_OHLC_RATIO: f64 = 0.05;
/// Single-bar return treated as extreme.
const EXTREME_RETURN: f64 = 0.20;
/// Fraction of extreme-return bars tolerated.
const MAX_EXTREME_RATIO: f64 = 0.10;
/// Zero-volume bar ratio tolerated on sub-daily timeframes.
const MAX_ZERO_VOLUME_RATIO: f64 = 0.50;
/// Gap tolerance as a fraction of the timeframe.
const GAP_TOLERANCE: f64 = 0.10;

/// A hole in a bar series.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Gap {
    /// Last good bar before the hole.
    pub start: NaiveDateTime,
    /// First bar after the hole.
    pub end: NaiveDateTime,
    /// Approximate number of missing bars.
    pub missing: usize,
}

/// Resample ticks into OHLCV bars of `timeframe_secs`, keeping at most the
/// trailing `lookback` bars. Returns `None` when there is nothing to build.
pub fn build_bars(ticks: &[Tick], timeframe_secs: u64, lookback: usize) -> Option<Vec<Ohlc>> {
    if ticks.is_empty() || timeframe_secs == 0 {
        return None;
    }

    struct Accum {
        open: Decimal,
        high: Decimal,
        low: Decimal,
        close: Decimal,
        volume: i64,
        value: Decimal,
    }

    let symbol = ticks[0].symbol.clone();
    let step = timeframe_secs as i64;
    let mut buckets: BTreeMap<i64, Accum> = BTreeMap::new();

    for tick in ticks {
        let epoch = tick.timestamp.and_utc().timestamp();
        let bucket = epoch.div_euclid(step) * step;
        let value = tick.price * Decimal::from(tick.volume);

        buckets
            .entry(bucket)
            .and_modify(|acc| {
                acc.high = acc.high.max(tick.price);
                acc.low = acc.low.min(tick.price);
                acc.close = tick.price;
                acc.volume += tick.volume;
                acc.value += value;
            })
            .or_insert(Accum {
                open: tick.price,
                high: tick.price,
                low: tick.price,
                close: tick.price,
                volume: tick.volume,
                value,
            });
    }

    let mut bars: Vec<Ohlc> = buckets
        .into_iter()
        .filter_map(|(epoch, acc)| {
            let timestamp = DateTime::from_timestamp(epoch, 0)?.naive_utc();
            Ohlc::new(
                symbol.clone(),
                timestamp,
                acc.open,
                acc.high,
                acc.low,
                acc.close,
                acc.volume,
                Some(acc.value),
            )
            .ok()
        })
        .collect();

    if bars.len() > lookback {
        bars.drain(..bars.len() - lookback);
    }

    if bars.is_empty() {
        None
    } else {
        Some(bars)
    }
}

/// Repair obviously fixable defects: swap inverted high/low, drop bars with
/// negative prices. Returns the number of bars repaired or dropped.
pub fn validate_bars(bars: &mut Vec<Ohlc>, symbol: &str) -> usize {
    let mut touched = 0usize;

    for bar in bars.iter_mut() {
        if bar.high < bar.low {
            std::mem::swap(&mut bar.high, &mut bar.low);
            touched += 1;
        }
    }

    let before = bars.len();
    bars.retain(|b| {
        b.open >= Decimal::ZERO
            && b.high >= Decimal::ZERO
            && b.low >= Decimal::ZERO
            && b.close >= Decimal::ZERO
    });
    let dropped = before - bars.len();
    if touched + dropped > 0 {
        warn!(symbol, swapped = touched, dropped, "repaired bar series");
    }
    touched + dropped
}

/// Integrity gate before a strategy call.
///
/// Fails on duplicate timestamps, too many OHLC-relationship violations, a
/// majority of zero-volume bars on sub-daily timeframes, or widespread
/// extreme single-bar returns.
pub fn check_integrity(bars: &[Ohlc], timeframe_secs: u64, symbol: &str) -> Result<(), DataError> {
    if bars.is_empty() {
        return Err(DataError::InsufficientData {
            message: format!("no bars for {symbol}"),
        });
    }

    let n = bars.len() as f64;

    // 1) Duplicate timestamps are an immediate failure.
    for pair in bars.windows(2) {
        if pair[0].timestamp == pair[1].timestamp {
            return Err(DataError::Corruption {
                message: format!("duplicate timestamp {} for {symbol}", pair[0].timestamp),
            });
        }
    }

    // 2) OHLC relationship violations.
    let invalid = bars
        .iter()
        .filter(|b| b.high < b.low || b.high < b.close || b.low > b.close)
        .count();
    if invalid as f64 > n * MAX_INVALID_OHLC_RATIO {
        return Err(DataError::Corruption {
            message: format!("{invalid}/{} bars violate OHLC relationships for {symbol}", bars.len()),
        });
    }

    // 3) Zero-volume ratio, only meaningful below the daily timeframe.
    if timeframe_secs < 86_400 {
        let zero_volume = bars.iter().filter(|b| b.volume == 0).count();
        if zero_volume as f64 > n * MAX_ZERO_VOLUME_RATIO {
            return Err(DataError::InsufficientData {
                message: format!(
                    "{zero_volume}/{} zero-volume bars for {symbol}",
                    bars.len()
                ),
            });
        }
    }

    // 4) Extreme single-bar returns.
    let mut extreme = 0usize;
    for pair in bars.windows(2) {
        let prev = pair[0].close;
        if prev > Decimal::ZERO {
            let change = ((pair[1].close - prev) / prev).abs();
            if change > Decimal::try_from(EXTREME_RETURN).unwrap_or_default() {
                extreme += 1;
            }
        }
    }
    if extreme as f64 > n * MAX_EXTREME_RATIO {
        return Err(DataError::Corruption {
            message: format!(
                "{extreme}/{} bars with >20% single-bar returns for {symbol}",
                bars.len()
            ),
        });
    }

    debug!(symbol, bars = bars.len(), "integrity check passed");
    Ok(())
}

/// Locate holes where consecutive timestamps differ from the timeframe by
/// more than the tolerance.
pub fn find_gaps(bars: &[Ohlc], timeframe_secs: u64) -> Vec<Gap> {
    if bars.len() < 2 {
        return Vec::new();
    }

    let expected = Duration::seconds(timeframe_secs as i64);
    let tolerance =
        Duration::milliseconds((timeframe_secs as f64 * GAP_TOLERANCE * 1000.0) as i64);
    let mut gaps = Vec::new();

    for pair in bars.windows(2) {
        let actual = pair[1].timestamp - pair[0].timestamp;
        if actual > expected + tolerance {
            gaps.push(Gap {
                start: pair[0].timestamp,
                end: pair[1].timestamp,
                missing: (actual.num_seconds() / timeframe_secs as i64).max(1) as usize - 1,
            });
        }
    }
    gaps
}

/// Merge server-provided backfill into a local series. The server wins on
/// duplicate timestamps; the result is sorted ascending.
pub fn merge_server_bars(local: &[Ohlc], server: &[Ohlc]) -> Vec<Ohlc> {
    let mut merged: BTreeMap<NaiveDateTime, Ohlc> = local
        .iter()
        .map(|b| (b.timestamp, b.clone()))
        .collect();
    for bar in server {
        merged.insert(bar.timestamp, bar.clone());
    }
    merged.into_values().collect()
}

/// Keep only the prefix up to and including the last bar before the first
/// gap. Used when a backfill fails: reasoning over a hole is worse than
/// trading on a shorter, contiguous history.
pub fn truncate_at_gap(bars: &[Ohlc], gaps: &[Gap]) -> Vec<Ohlc> {
    let Some(first) = gaps.iter().map(|g| g.start).min() else {
        return bars.to_vec();
    };
    bars.iter()
        .filter(|b| b.timestamp <= first)
        .cloned()
        .collect()
}
