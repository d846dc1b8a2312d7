//! History collection into the parquet store.
//!
//! The pre-scan job and gap backfills use a [`DataCollector`] to snapshot
//! venue history. The source is a trait so the collector is testable without
//! a live broker connection.

use async_trait::async_trait;
use chrono::{Duration, NaiveDateTime};
use tracing::{info, warn};

use kt_types::kst::now_kst;
use kt_types::{Interval, KtResult, Ohlc};

use crate::storage::BarStore;

/// Venue row cap per chart request.
const MAX_ROWS_PER_REQUEST: u32 = 500;
/// Approximate regular-session minutes per trading day.
const SESSION_MINUTES_PER_DAY: u32 = 390;

/// Anything that can serve OHLC history (typically the broker's market-data
/// service).
#[async_trait]
pub trait OhlcSource: Send + Sync {
    async fn daily_ohlc(
        &self,
        symbol: &str,
        start: NaiveDateTime,
        end: NaiveDateTime,
    ) -> KtResult<Vec<Ohlc>>;

    async fn minute_ohlc(&self, symbol: &str, minutes: u32, count: u32) -> KtResult<Vec<Ohlc>>;
}

/// Outcome of a collection pass.
#[derive(Debug, Default)]
pub struct CollectReport {
    pub symbols_saved: usize,
    pub rows_saved: usize,
    pub failed: Vec<String>,
}

/// Pulls history from an [`OhlcSource`] and persists it.
pub struct DataCollector<S> {
    source: S,
    store: BarStore,
}

impl<S: OhlcSource> DataCollector<S> {
    pub fn new(source: S, store: BarStore) -> Self {
        Self { source, store }
    }

    /// Snapshot `days` of daily bars for each symbol.
    pub async fn collect_daily(&self, symbols: &[String], days: i64) -> KtResult<CollectReport> {
        let end = now_kst();
        let start = end - Duration::days(days);
        let mut report = CollectReport::default();

        for symbol in symbols {
            match self.source.daily_ohlc(symbol, start, end).await {
                Ok(bars) if !bars.is_empty() => {
                    let rows = self.store.save(symbol, Interval::D1, &bars)?;
                    report.symbols_saved += 1;
                    report.rows_saved += rows;
                }
                Ok(_) => {
                    warn!(symbol, "no daily bars returned");
                    report.failed.push(symbol.clone());
                }
                Err(e) => {
                    warn!(symbol, error = %e, "daily collection failed");
                    report.failed.push(symbol.clone());
                }
            }
        }

        info!(
            saved = report.symbols_saved,
            rows = report.rows_saved,
            failed = report.failed.len(),
            "daily collection pass complete"
        );
        Ok(report)
    }

    /// Snapshot `days` worth of minute bars at `interval` for each symbol.
    pub async fn collect_minute(
        &self,
        symbols: &[String],
        interval: Interval,
        days: u32,
    ) -> KtResult<CollectReport> {
        let Some(minutes) = interval.minutes() else {
            return self.collect_daily(symbols, i64::from(days)).await;
        };

        // Day range to an approximate row count, bounded by the venue cap.
        let count = (days * SESSION_MINUTES_PER_DAY / minutes).min(MAX_ROWS_PER_REQUEST);
        let mut report = CollectReport::default();

        for symbol in symbols {
            match self.source.minute_ohlc(symbol, minutes, count).await {
                Ok(bars) if !bars.is_empty() => {
                    let rows = self.store.save(symbol, interval, &bars)?;
                    report.symbols_saved += 1;
                    report.rows_saved += rows;
                }
                Ok(_) => {
                    warn!(symbol, "no minute bars returned");
                    report.failed.push(symbol.clone());
                }
                Err(e) => {
                    warn!(symbol, error = %e, "minute collection failed");
                    report.failed.push(symbol.clone());
                }
            }
        }

        info!(
            saved = report.symbols_saved,
            rows = report.rows_saved,
            failed = report.failed.len(),
            %interval,
            "minute collection pass complete"
        );
        Ok(report)
    }

    pub fn store(&self) -> &BarStore {
        &self.store
    }
}
