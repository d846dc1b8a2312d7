//! Append-only columnar OHLC store.
//!
//! One snappy-compressed Parquet file per `(symbol, interval)` at
//! `<base>/<symbol>/<symbol>_<interval>.parquet`. Saving merges with the
//! existing file (last write wins per timestamp), drops rows older than the
//! retention window, sorts ascending and rewrites the whole file. Files are
//! single-writer per key.

use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use arrow::array::{ArrayRef, Decimal128Array, Int64Array, RecordBatch, TimestampMillisecondArray};
use arrow::datatypes::{DataType, Field, Schema, TimeUnit};
use chrono::{DateTime, Duration, NaiveDateTime};
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use parquet::arrow::ArrowWriter;
use parquet::basic::Compression;
use parquet::file::properties::WriterProperties;
use parquet::file::statistics::Statistics;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use tracing::{debug, info, warn};

use kt_types::kst::now_kst;
use kt_types::{DataError, Interval, KtResult, Ohlc};

/// Default retention window for stored bars.
pub const RETENTION_DAYS: i64 = 365;

/// Price scale used in the Decimal128(18, 4) columns.
const PRICE_SCALE: u32 = 4;

/// File-backed OHLC store.
#[derive(Debug)]
pub struct BarStore {
    base_path: PathBuf,
    retention_days: i64,
}

impl BarStore {
    pub fn new<P: AsRef<Path>>(base_path: P) -> KtResult<Self> {
        let base_path = base_path.as_ref().to_path_buf();
        std::fs::create_dir_all(&base_path)?;
        Ok(Self {
            base_path,
            retention_days: RETENTION_DAYS,
        })
    }

    pub fn with_retention_days(mut self, days: i64) -> Self {
        self.retention_days = days;
        self
    }

    fn file_path(&self, symbol: &str, interval: Interval) -> PathBuf {
        self.base_path
            .join(symbol)
            .join(format!("{symbol}_{interval}.parquet"))
    }

    /// Merge `bars` into the file for `(symbol, interval)`.
    ///
    /// Returns the number of rows the file holds after the rewrite. Saving
    /// nothing (or only rows past retention) returns 0 without touching disk.
    pub fn save(&self, symbol: &str, interval: Interval, bars: &[Ohlc]) -> KtResult<usize> {
        if bars.is_empty() {
            return Ok(0);
        }

        let path = self.file_path(symbol, interval);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let mut merged: Vec<Ohlc> = if path.exists() {
            self.load(symbol, interval, None, None)?
        } else {
            Vec::new()
        };

        // Last write wins per timestamp.
        for bar in bars {
            match merged.iter_mut().find(|b| b.timestamp == bar.timestamp) {
                Some(existing) => *existing = bar.clone(),
                None => merged.push(bar.clone()),
            }
        }

        let cutoff = now_kst() - Duration::days(self.retention_days);
        merged.retain(|b| b.timestamp >= cutoff);

        if merged.is_empty() {
            warn!(symbol, %interval, "all rows older than retention, skipping save");
            return Ok(0);
        }

        merged.sort_by_key(|b| b.timestamp);

        let batch = bars_to_record_batch(&merged)?;
        let file = File::create(&path)?;
        let props = WriterProperties::builder()
            .set_compression(Compression::SNAPPY)
            .build();
        let mut writer = ArrowWriter::try_new(file, batch.schema(), Some(props))
            .map_err(|e| DataError::Parquet(e.to_string()))?;
        writer
            .write(&batch)
            .map_err(|e| DataError::Parquet(e.to_string()))?;
        writer
            .close()
            .map_err(|e| DataError::Parquet(e.to_string()))?;

        info!(symbol, %interval, rows = merged.len(), "saved bars");
        Ok(merged.len())
    }

    /// Load bars in `[start, end]` (both optional), ascending by timestamp.
    ///
    /// Row groups whose timestamp statistics fall entirely outside the range
    /// are skipped; the surviving rows are filtered in memory, which also
    /// covers files written without statistics.
    pub fn load(
        &self,
        symbol: &str,
        interval: Interval,
        start: Option<NaiveDateTime>,
        end: Option<NaiveDateTime>,
    ) -> KtResult<Vec<Ohlc>> {
        let path = self.file_path(symbol, interval);
        if !path.exists() {
            return Ok(Vec::new());
        }

        let file = File::open(&path)?;
        let builder = ParquetRecordBatchReaderBuilder::try_new(file)
            .map_err(|e| DataError::Parquet(e.to_string()))?;

        let start_ms = start.map(|t| t.and_utc().timestamp_millis());
        let end_ms = end.map(|t| t.and_utc().timestamp_millis());

        let row_groups = select_row_groups(builder.metadata().as_ref(), start_ms, end_ms);
        let reader = builder
            .with_row_groups(row_groups)
            .build()
            .map_err(|e| DataError::Parquet(e.to_string()))?;

        let mut bars = Vec::new();
        for batch in reader {
            let batch = batch.map_err(|e| DataError::Arrow(e.to_string()))?;
            record_batch_to_bars(&batch, symbol, &mut bars)?;
        }

        bars.retain(|b| {
            let ms = b.timestamp.and_utc().timestamp_millis();
            start_ms.map_or(true, |s| ms >= s) && end_ms.map_or(true, |e| ms <= e)
        });
        bars.sort_by_key(|b| b.timestamp);

        debug!(symbol, %interval, rows = bars.len(), "loaded bars");
        Ok(bars)
    }

    /// Delete a single interval file, or the symbol's whole directory.
    pub fn delete(&self, symbol: &str, interval: Option<Interval>) -> KtResult<bool> {
        match interval {
            Some(interval) => {
                let path = self.file_path(symbol, interval);
                if path.exists() {
                    std::fs::remove_file(&path)?;
                    info!(symbol, %interval, "deleted bar file");
                    return Ok(true);
                }
                Ok(false)
            }
            None => {
                let dir = self.base_path.join(symbol);
                if dir.exists() {
                    std::fs::remove_dir_all(&dir)?;
                    info!(symbol, "deleted symbol directory");
                    return Ok(true);
                }
                Ok(false)
            }
        }
    }

    pub fn list_symbols(&self) -> KtResult<Vec<String>> {
        let mut symbols = Vec::new();
        for entry in std::fs::read_dir(&self.base_path)? {
            let entry = entry?;
            if entry.path().is_dir() {
                if let Some(name) = entry.file_name().to_str() {
                    symbols.push(name.to_string());
                }
            }
        }
        symbols.sort();
        Ok(symbols)
    }

    /// Walk the store and delete any file whose newest row is older than the
    /// retention cutoff. Returns the number of deleted files.
    pub fn evict_old_data(&self) -> KtResult<usize> {
        let cutoff_ms = (now_kst() - Duration::days(self.retention_days))
            .and_utc()
            .timestamp_millis();
        let mut deleted = 0usize;

        for path in self.parquet_files()? {
            match max_timestamp_ms(&path) {
                Ok(Some(max_ms)) if max_ms < cutoff_ms => {
                    std::fs::remove_file(&path)?;
                    deleted += 1;
                    info!(?path, "evicted stale bar file");
                }
                Ok(_) => {}
                Err(e) => warn!(?path, error = %e, "failed to inspect file for eviction"),
            }
        }

        if deleted > 0 {
            info!(deleted, "eviction pass completed");
        }
        Ok(deleted)
    }

    pub fn storage_size(&self) -> KtResult<u64> {
        let mut total = 0u64;
        for path in self.parquet_files()? {
            total += std::fs::metadata(&path)?.len();
        }
        Ok(total)
    }

    fn parquet_files(&self) -> KtResult<Vec<PathBuf>> {
        let mut files = Vec::new();
        for entry in std::fs::read_dir(&self.base_path)? {
            let dir = entry?.path();
            if !dir.is_dir() {
                continue;
            }
            for entry in std::fs::read_dir(&dir)? {
                let path = entry?.path();
                if path.extension().and_then(|s| s.to_str()) == Some("parquet") {
                    files.push(path);
                }
            }
        }
        Ok(files)
    }
}

fn storage_schema() -> Arc<Schema> {
    Arc::new(Schema::new(vec![
        Field::new(
            "timestamp",
            DataType::Timestamp(TimeUnit::Millisecond, None),
            false,
        ),
        Field::new("open", DataType::Decimal128(18, PRICE_SCALE as i8), false),
        Field::new("high", DataType::Decimal128(18, PRICE_SCALE as i8), false),
        Field::new("low", DataType::Decimal128(18, PRICE_SCALE as i8), false),
        Field::new("close", DataType::Decimal128(18, PRICE_SCALE as i8), false),
        Field::new("volume", DataType::Int64, false),
    ]))
}

fn price_to_i128(d: Decimal) -> i128 {
    (d * Decimal::from(10i64.pow(PRICE_SCALE)))
        .round()
        .to_i128()
        .unwrap_or(0)
}

fn bars_to_record_batch(bars: &[Ohlc]) -> KtResult<RecordBatch> {
    let schema = storage_schema();

    let timestamps: Vec<i64> = bars
        .iter()
        .map(|b| b.timestamp.and_utc().timestamp_millis())
        .collect();
    let opens: Vec<i128> = bars.iter().map(|b| price_to_i128(b.open)).collect();
    let highs: Vec<i128> = bars.iter().map(|b| price_to_i128(b.high)).collect();
    let lows: Vec<i128> = bars.iter().map(|b| price_to_i128(b.low)).collect();
    let closes: Vec<i128> = bars.iter().map(|b| price_to_i128(b.close)).collect();
    let volumes: Vec<i64> = bars.iter().map(|b| b.volume).collect();

    let decimal = |values: Vec<i128>| -> KtResult<ArrayRef> {
        Ok(Arc::new(
            Decimal128Array::from(values)
                .with_precision_and_scale(18, PRICE_SCALE as i8)
                .map_err(|e| DataError::Arrow(e.to_string()))?,
        ))
    };

    let arrays: Vec<ArrayRef> = vec![
        Arc::new(TimestampMillisecondArray::from(timestamps)),
        decimal(opens)?,
        decimal(highs)?,
        decimal(lows)?,
        decimal(closes)?,
        Arc::new(Int64Array::from(volumes)),
    ];

    RecordBatch::try_new(schema, arrays)
        .map_err(|e| DataError::Arrow(e.to_string()).into())
}

fn record_batch_to_bars(batch: &RecordBatch, symbol: &str, out: &mut Vec<Ohlc>) -> KtResult<()> {
    let timestamps = batch
        .column(0)
        .as_any()
        .downcast_ref::<TimestampMillisecondArray>()
        .ok_or_else(|| DataError::Corruption {
            message: "invalid timestamp column".into(),
        })?;
    let decimal_col = |i: usize, name: &str| -> KtResult<&Decimal128Array> {
        batch
            .column(i)
            .as_any()
            .downcast_ref::<Decimal128Array>()
            .ok_or_else(|| {
                DataError::Corruption {
                    message: format!("invalid {name} column"),
                }
                .into()
            })
    };
    let opens = decimal_col(1, "open")?;
    let highs = decimal_col(2, "high")?;
    let lows = decimal_col(3, "low")?;
    let closes = decimal_col(4, "close")?;
    let volumes = batch
        .column(5)
        .as_any()
        .downcast_ref::<Int64Array>()
        .ok_or_else(|| DataError::Corruption {
            message: "invalid volume column".into(),
        })?;

    for i in 0..batch.num_rows() {
        let ts_ms = timestamps.value(i);
        let timestamp = DateTime::from_timestamp_millis(ts_ms)
            .map(|t| t.naive_utc())
            .ok_or_else(|| DataError::Corruption {
                message: format!("timestamp out of range: {ts_ms}"),
            })?;

        let bar = Ohlc::new(
            symbol,
            timestamp,
            Decimal::from_i128_with_scale(opens.value(i), PRICE_SCALE),
            Decimal::from_i128_with_scale(highs.value(i), PRICE_SCALE),
            Decimal::from_i128_with_scale(lows.value(i), PRICE_SCALE),
            Decimal::from_i128_with_scale(closes.value(i), PRICE_SCALE),
            volumes.value(i),
            None,
        )?;
        out.push(bar);
    }
    Ok(())
}

/// Indices of row groups whose timestamp statistics intersect the range.
/// Groups without statistics are always included.
fn select_row_groups(
    metadata: &parquet::file::metadata::ParquetMetaData,
    start_ms: Option<i64>,
    end_ms: Option<i64>,
) -> Vec<usize> {
    (0..metadata.num_row_groups())
        .filter(|&i| {
            let column = metadata.row_group(i).column(0);
            match column.statistics() {
                Some(Statistics::Int64(stats)) => {
                    let min = stats.min_opt().copied();
                    let max = stats.max_opt().copied();
                    match (min, max) {
                        (Some(min), Some(max)) => {
                            start_ms.map_or(true, |s| max >= s)
                                && end_ms.map_or(true, |e| min <= e)
                        }
                        _ => true,
                    }
                }
                _ => true,
            }
        })
        .collect()
}

/// Max timestamp of a file, read from row-group statistics only.
fn max_timestamp_ms(path: &Path) -> KtResult<Option<i64>> {
    let file = File::open(path)?;
    let builder = ParquetRecordBatchReaderBuilder::try_new(file)
        .map_err(|e| DataError::Parquet(e.to_string()))?;
    let metadata = builder.metadata();

    let mut max = None;
    for i in 0..metadata.num_row_groups() {
        if let Some(Statistics::Int64(stats)) = metadata.row_group(i).column(0).statistics() {
            if let Some(&group_max) = stats.max_opt() {
                max = Some(max.map_or(group_max, |m: i64| m.max(group_max)));
            }
        }
    }
    Ok(max)
}
