//! Market-data service.
//!
//! Wraps the quote, chart, ranked-list, financial and time TRs. The venue
//! enforces strict per-TR rate limits; paging loops sleep at least 1.1 s
//! between calls of the same TR, which is the documented caller contract.

use std::sync::Arc;
use std::time::Duration;

use chrono::{NaiveDate, NaiveDateTime};
use rust_decimal::Decimal;
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use kt_types::{Ohlc, Tick};

use crate::client::{field_decimal, field_i64, field_str, LsClient};
use crate::endpoints;
use crate::error::{BrokerError, BrokerResult};

/// Minimum spacing between consecutive calls of a paging TR.
const TR_PACING: Duration = Duration::from_millis(1100);
/// Days per daily-chart chunk (venue caps a call around 200 rows).
const DAILY_CHUNK_DAYS: i64 = 200;
/// Venue row cap per chart request.
const MAX_ROWS: u32 = 500;

/// Order book snapshot (10 levels).
#[derive(Debug, Clone, PartialEq)]
pub struct OrderBook {
    pub symbol: String,
    /// (price, remaining quantity), best first.
    pub asks: Vec<(Decimal, i64)>,
    pub bids: Vec<(Decimal, i64)>,
}

/// One row of a ranked list (top traded value / top change rate).
#[derive(Debug, Clone, PartialEq)]
pub struct RankedStock {
    pub symbol: String,
    pub name: String,
    pub price: Decimal,
    /// Previous-day traded value in KRW.
    pub traded_value: Decimal,
    pub volume: i64,
}

/// Financial summary from the investinfo TR.
#[derive(Debug, Clone, PartialEq)]
pub struct FinancialInfo {
    pub symbol: String,
    pub per: Option<Decimal>,
    pub pbr: Option<Decimal>,
    pub roe: Option<Decimal>,
}

/// Directory entry from the symbol-master TR.
#[derive(Debug, Clone, PartialEq)]
pub struct SymbolListing {
    pub symbol: String,
    pub name: String,
}

pub struct MarketDataService {
    client: Arc<LsClient>,
}

impl MarketDataService {
    pub fn new(client: Arc<LsClient>) -> Self {
        Self { client }
    }

    /// Current price (t1102).
    pub async fn get_current_price(&self, symbol: &str) -> BrokerResult<Decimal> {
        let response = self
            .client
            .request_retry(
                "t1102",
                endpoints::STOCK_MARKET,
                json!({ "t1102InBlock": { "shcode": symbol } }),
            )
            .await?;
        let output = &response["t1102OutBlock"];
        let price = field_decimal(output, "price");
        if price <= Decimal::ZERO {
            return Err(BrokerError::Parse {
                message: format!("no price for {symbol} in t1102 response"),
            });
        }
        Ok(price)
    }

    /// Ten-level order book (t1101).
    pub async fn get_orderbook(&self, symbol: &str) -> BrokerResult<OrderBook> {
        let response = self
            .client
            .request_retry(
                "t1101",
                endpoints::STOCK_MARKET,
                json!({ "t1101InBlock": { "shcode": symbol } }),
            )
            .await?;
        let output = &response["t1101OutBlock"];

        let mut asks = Vec::with_capacity(10);
        let mut bids = Vec::with_capacity(10);
        for i in 1..=10 {
            asks.push((
                field_decimal(output, &format!("offerho{i}")),
                field_i64(output, &format!("offerrem{i}")),
            ));
            bids.push((
                field_decimal(output, &format!("bidho{i}")),
                field_i64(output, &format!("bidrem{i}")),
            ));
        }

        Ok(OrderBook {
            symbol: symbol.to_string(),
            asks,
            bids,
        })
    }

    /// Daily bars over `[start, end]` (t8451).
    ///
    /// The venue caps one call at roughly 200 rows, so the window is sliced
    /// from `end` backwards in 200-day chunks with ≥ 1.1 s pacing. The
    /// result is merged, deduplicated across chunk boundaries and sorted
    /// ascending.
    pub async fn get_daily_ohlc(
        &self,
        symbol: &str,
        start: NaiveDateTime,
        end: NaiveDateTime,
    ) -> BrokerResult<Vec<Ohlc>> {
        info!(symbol, %start, %end, "fetching daily bars");

        let start_date = start.date();
        let mut all: Vec<Ohlc> = Vec::new();
        let mut current_end = end.date();
        let mut first_chunk = true;

        while current_end >= start_date {
            let current_start =
                std::cmp::max(current_end - chrono::Duration::days(DAILY_CHUNK_DAYS), start_date);

            if !first_chunk {
                tokio::time::sleep(TR_PACING).await;
            }
            first_chunk = false;

            debug!(symbol, %current_start, %current_end, "daily chunk");
            let response = self
                .client
                .request_retry(
                    "t8451",
                    endpoints::STOCK_CHART,
                    json!({
                        "t8451InBlock": {
                            "shcode": symbol,
                            "gubun": "2",
                            "qrycnt": MAX_ROWS,
                            "sdate": current_start.format("%Y%m%d").to_string(),
                            "edate": current_end.format("%Y%m%d").to_string(),
                            "cts_date": "",
                            "comp_yn": "N",
                            "sujung": "Y",
                            "exchgubun": "U"
                        }
                    }),
                )
                .await?;

            if let Some(items) = response["t8451OutBlock1"].as_array() {
                for item in items {
                    if let Some(bar) = parse_daily_bar(symbol, item) {
                        all.push(bar);
                    }
                }
            }

            if current_start <= start_date {
                break;
            }
            current_end = current_start - chrono::Duration::days(1);
        }

        all.sort_by_key(|b| b.timestamp);
        all.dedup_by_key(|b| b.timestamp);
        info!(symbol, rows = all.len(), "daily bars fetched");
        Ok(all)
    }

    /// N-minute bars (t8452), newest `count` rows.
    pub async fn get_minute_ohlc(
        &self,
        symbol: &str,
        minutes: u32,
        count: u32,
    ) -> BrokerResult<Vec<Ohlc>> {
        let response = self
            .client
            .request_retry(
                "t8452",
                endpoints::STOCK_CHART,
                json!({
                    "t8452InBlock": {
                        "shcode": symbol,
                        "ncnt": minutes,
                        "qrycnt": count.min(MAX_ROWS),
                        "nday": "1",
                        "sdate": "",
                        "stime": "",
                        "edate": "",
                        "etime": "",
                        "cts_date": "",
                        "cts_time": "",
                        "comp_yn": "N",
                        "exchgubun": "U"
                    }
                }),
            )
            .await?;

        let mut bars = Vec::new();
        if let Some(items) = response["t8452OutBlock1"].as_array() {
            for item in items {
                if let Some(bar) = parse_minute_bar(symbol, item) {
                    bars.push(bar);
                }
            }
        }
        bars.sort_by_key(|b| b.timestamp);
        bars.dedup_by_key(|b| b.timestamp);
        Ok(bars)
    }

    /// Previous-day traded-value ranking (t1463), `idx` continuation paging.
    pub async fn get_top_volume_stocks(&self, count: usize) -> BrokerResult<Vec<RankedStock>> {
        let mut stocks: Vec<RankedStock> = Vec::new();
        let mut idx: i64 = 0;

        loop {
            let response = self
                .client
                .request(
                    "t1463",
                    endpoints::STOCK_HIGH_ITEM,
                    json!({
                        "t1463InBlock": {
                            "gubun": "0",
                            "jnilgubun": "0",
                            // Exclude suspended, clearing-sale and unfaithful-
                            // disclosure issues, plus ETF/ETN wrappers.
                            "jc_num": 2_164_260_928i64,
                            "sprice": 0,
                            "eprice": 0,
                            "volume": 0,
                            "idx": idx,
                            "jc_num2": 15,
                            "exchgubun": "U"
                        }
                    }),
                    idx > 0,
                )
                .await?;

            let Some(items) = response["t1463OutBlock1"].as_array() else {
                break;
            };
            if items.is_empty() {
                break;
            }

            for item in items {
                if stocks.len() >= count {
                    break;
                }
                // jnilvalue arrives in millions of KRW.
                let traded_value =
                    field_decimal(item, "jnilvalue") * Decimal::from(1_000_000u64);
                stocks.push(RankedStock {
                    symbol: field_str(item, "shcode"),
                    name: field_str(item, "hname"),
                    price: field_decimal(item, "price"),
                    traded_value,
                    volume: field_i64(item, "jnilvolume"),
                });
            }

            if stocks.len() >= count {
                break;
            }

            let next_idx = field_i64(&response["t1463OutBlock"], "idx");
            if next_idx == 0 || next_idx == idx {
                break;
            }
            idx = next_idx;
            tokio::time::sleep(TR_PACING).await;
        }

        info!(rows = stocks.len(), "top traded-value list fetched");
        Ok(stocks)
    }

    /// Change-rate ranking (t1441). `rising` picks the direction.
    pub async fn get_top_change_stocks(
        &self,
        rising: bool,
        count: usize,
    ) -> BrokerResult<Vec<RankedStock>> {
        let mut stocks: Vec<RankedStock> = Vec::new();
        let mut idx: i64 = 0;

        loop {
            let response = self
                .client
                .request(
                    "t1441",
                    endpoints::STOCK_HIGH_ITEM,
                    json!({
                        "t1441InBlock": {
                            "gubun1": "0",
                            "gubun2": if rising { "0" } else { "1" },
                            "gubun3": "0",
                            "jc_num": 0,
                            "sprice": 0,
                            "eprice": 0,
                            "volume": 0,
                            "idx": idx,
                            "jc_num2": 0,
                            "exchgubun": "U"
                        }
                    }),
                    idx > 0,
                )
                .await?;

            let Some(items) = response["t1441OutBlock1"].as_array() else {
                break;
            };
            if items.is_empty() {
                break;
            }

            for item in items {
                if stocks.len() >= count {
                    break;
                }
                stocks.push(RankedStock {
                    symbol: field_str(item, "shcode"),
                    name: field_str(item, "hname"),
                    price: field_decimal(item, "price"),
                    traded_value: field_decimal(item, "value"),
                    volume: field_i64(item, "volume"),
                });
            }

            if stocks.len() >= count {
                break;
            }

            let next_idx = field_i64(&response["t1441OutBlock"], "idx");
            if next_idx == 0 || next_idx == idx {
                break;
            }
            idx = next_idx;
            tokio::time::sleep(TR_PACING).await;
        }

        Ok(stocks)
    }

    /// PER/PBR/ROE summary (t3320).
    pub async fn get_financial_info(&self, symbol: &str) -> BrokerResult<FinancialInfo> {
        let response = self
            .client
            .request_retry(
                "t3320",
                endpoints::STOCK_INVESTINFO,
                json!({ "t3320InBlock": { "gicode": symbol } }),
            )
            .await?;

        let output = &response["t3320OutBlock1"];
        let non_zero = |key: &str| {
            let value = field_decimal(output, key);
            (value != Decimal::ZERO).then_some(value)
        };

        Ok(FinancialInfo {
            symbol: symbol.to_string(),
            per: non_zero("per"),
            pbr: non_zero("pbr"),
            roe: non_zero("roe"),
        })
    }

    /// Full symbol directory (t8436). `market`: 0 all, 1 KOSPI, 2 KOSDAQ.
    pub async fn get_all_symbols(&self, market: &str) -> BrokerResult<Vec<SymbolListing>> {
        let response = self
            .client
            .request_retry(
                "t8436",
                endpoints::STOCK_ETC,
                json!({ "t8436InBlock": { "gubun": market } }),
            )
            .await?;

        let mut listings = Vec::new();
        if let Some(items) = response["t8436OutBlock"].as_array() {
            for item in items {
                let symbol = field_str(item, "shcode");
                if !symbol.is_empty() {
                    listings.push(SymbolListing {
                        symbol,
                        name: field_str(item, "hname"),
                    });
                }
            }
        }
        Ok(listings)
    }

    /// Server time (t0167) as exchange-local naive datetime.
    pub async fn get_server_time(&self) -> BrokerResult<NaiveDateTime> {
        let response = self
            .client
            .request_retry(
                "t0167",
                endpoints::ETC_TIME,
                json!({ "t0167InBlock": { "id": "" } }),
            )
            .await?;

        let output = &response["t0167OutBlock"];
        let date_str = field_str(output, "dt");
        let time_str = field_str(output, "time");
        parse_server_time(&date_str, &time_str).ok_or_else(|| BrokerError::Parse {
            message: format!("bad server time: dt={date_str} time={time_str}"),
        })
    }
}

fn parse_daily_bar(symbol: &str, item: &Value) -> Option<Ohlc> {
    let date = NaiveDate::parse_from_str(&field_str(item, "date"), "%Y%m%d").ok()?;
    let bar = Ohlc::new(
        symbol,
        date.and_hms_opt(0, 0, 0)?,
        field_decimal(item, "open"),
        field_decimal(item, "high"),
        field_decimal(item, "low"),
        field_decimal(item, "close"),
        field_i64(item, "jdiff_vol"),
        None,
    );
    match bar {
        Ok(bar) => Some(bar),
        Err(e) => {
            warn!(symbol, error = %e, "dropping malformed daily row");
            None
        }
    }
}

fn parse_minute_bar(symbol: &str, item: &Value) -> Option<Ohlc> {
    let date = field_str(item, "date");
    let time = field_str(item, "time");
    // `time` is a 10-char field; only HHMM is meaningful.
    let hhmm = if time.len() >= 4 { &time[..4] } else { "0000" };
    let timestamp =
        NaiveDateTime::parse_from_str(&format!("{date}{hhmm}"), "%Y%m%d%H%M").ok()?;
    Ohlc::new(
        symbol,
        timestamp,
        field_decimal(item, "open"),
        field_decimal(item, "high"),
        field_decimal(item, "low"),
        field_decimal(item, "close"),
        field_i64(item, "jdiff_vol"),
        None,
    )
    .ok()
}

fn parse_server_time(date_str: &str, time_str: &str) -> Option<NaiveDateTime> {
    if time_str.len() < 6 {
        return None;
    }
    let date = NaiveDate::parse_from_str(date_str, "%Y%m%d").ok()?;
    kt_types::kst::combine_hhmmss(date, &time_str[..6])
}

/// Build a tick from an S3_ frame body (shared with the realtime feed).
pub(crate) fn tick_from_s3(output: &Value, today: NaiveDate) -> Option<Tick> {
    let symbol = field_str(output, "MKSC_SHRN_ISCD");
    if symbol.is_empty() {
        return None;
    }
    let price = field_decimal(output, "STCK_PRPR");
    if price <= Decimal::ZERO {
        return None;
    }
    let volume = field_i64(output, "CNTG_VOL");
    let timestamp = kt_types::kst::combine_hhmmss(today, &field_str(output, "STCK_CNTG_HOUR"))
        .unwrap_or_else(|| kt_types::kst::now_kst());
    Some(Tick {
        symbol,
        price,
        volume,
        timestamp,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use serde_json::json;

    #[test]
    fn test_parse_daily_bar() {
        let item = json!({
            "date": "20250314",
            "open": "70000", "high": "70900", "low": "69800",
            "close": "70500", "jdiff_vol": "12345678"
        });
        let bar = parse_daily_bar("005930", &item).unwrap();
        assert_eq!(bar.close, dec!(70500));
        assert_eq!(bar.volume, 12_345_678);
        assert_eq!(bar.timestamp.date().to_string(), "2025-03-14");
        assert_eq!(bar.value, dec!(70500) * dec!(12345678));
    }

    #[test]
    fn test_parse_daily_bar_rejects_inverted_prices() {
        let item = json!({
            "date": "20250314",
            "open": "70000", "high": "69000", "low": "70500",
            "close": "70500", "jdiff_vol": "100"
        });
        assert!(parse_daily_bar("005930", &item).is_none());
    }

    #[test]
    fn test_parse_minute_bar_uses_hhmm_prefix() {
        let item = json!({
            "date": "20241130",
            "time": "0935000000",
            "open": "70000", "high": "70100", "low": "69900",
            "close": "70050", "jdiff_vol": "500"
        });
        let bar = parse_minute_bar("005930", &item).unwrap();
        assert_eq!(bar.timestamp.format("%H:%M").to_string(), "09:35");
    }

    #[test]
    fn test_parse_server_time() {
        let ts = parse_server_time("20250314", "143025999999").unwrap();
        assert_eq!(ts.format("%Y%m%d %H%M%S").to_string(), "20250314 143025");
        assert!(parse_server_time("2025", "143025").is_none());
    }

    #[test]
    fn test_tick_from_s3() {
        let output = json!({
            "MKSC_SHRN_ISCD": "005930",
            "STCK_PRPR": "70000",
            "CNTG_VOL": "120",
            "STCK_CNTG_HOUR": "143025"
        });
        let today = NaiveDate::from_ymd_opt(2025, 3, 14).unwrap();
        let tick = tick_from_s3(&output, today).unwrap();
        assert_eq!(tick.symbol, "005930");
        assert_eq!(tick.price, dec!(70000));
        assert_eq!(tick.volume, 120);
        assert_eq!(tick.timestamp.format("%H%M%S").to_string(), "143025");
    }

    #[test]
    fn test_tick_from_s3_rejects_empty_symbol_or_price() {
        let today = NaiveDate::from_ymd_opt(2025, 3, 14).unwrap();
        assert!(tick_from_s3(&json!({"STCK_PRPR": "70000"}), today).is_none());
        assert!(tick_from_s3(
            &json!({"MKSC_SHRN_ISCD": "005930", "STCK_PRPR": "0"}),
            today
        )
        .is_none());
    }
}
