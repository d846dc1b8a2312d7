use chrono::NaiveDateTime;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::errors::{DataError, KtResult};

/// A single OHLCV bar with traded value.
///
/// Timestamps are exchange-local (KST) naive datetimes. Bars are immutable
/// once constructed; the constructor enforces the price invariants and
/// derives `value` from `volume * close` when the venue omits it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ohlc {
    pub symbol: String,
    pub timestamp: NaiveDateTime,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub volume: i64,
    pub value: Decimal,
}

impl Ohlc {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        symbol: impl Into<String>,
        timestamp: NaiveDateTime,
        open: Decimal,
        high: Decimal,
        low: Decimal,
        close: Decimal,
        volume: i64,
        value: Option<Decimal>,
    ) -> KtResult<Self> {
        if high < low {
            return Err(DataError::InvalidFormat {
                message: format!("high {high} below low {low}"),
            }
            .into());
        }
        if open < Decimal::ZERO
            || high < Decimal::ZERO
            || low < Decimal::ZERO
            || close < Decimal::ZERO
        {
            return Err(DataError::InvalidFormat {
                message: "negative price".into(),
            }
            .into());
        }

        let value = value.unwrap_or_else(|| Decimal::from(volume) * close);

        Ok(Self {
            symbol: symbol.into(),
            timestamp,
            open,
            high,
            low,
            close,
            volume,
            value,
        })
    }

    /// Typical price (HLC/3), used by some indicators.
    pub fn typical_price(&self) -> Decimal {
        (self.high + self.low + self.close) / Decimal::from(3)
    }
}

/// A single trade tick from the realtime feed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tick {
    pub symbol: String,
    pub price: Decimal,
    pub volume: i64,
    pub timestamp: NaiveDateTime,
}

/// Time resolution of stored and requested bars.
///
/// `Display`/`FromStr` render the short form (`"1m"`, `"1d"`) used in
/// storage file names and venue interval parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Interval {
    M1,
    M5,
    M15,
    M30,
    H1,
    D1,
}

impl Interval {
    pub fn seconds(&self) -> u64 {
        match self {
            Interval::M1 => 60,
            Interval::M5 => 300,
            Interval::M15 => 900,
            Interval::M30 => 1800,
            Interval::H1 => 3600,
            Interval::D1 => 86400,
        }
    }

    pub fn from_seconds(secs: u64) -> Option<Self> {
        match secs {
            60 => Some(Interval::M1),
            300 => Some(Interval::M5),
            900 => Some(Interval::M15),
            1800 => Some(Interval::M30),
            3600 => Some(Interval::H1),
            86400 => Some(Interval::D1),
            _ => None,
        }
    }

    /// Minute count for the venue's N-minute chart TR; `None` for daily.
    pub fn minutes(&self) -> Option<u32> {
        match self {
            Interval::D1 => None,
            other => Some((other.seconds() / 60) as u32),
        }
    }

    pub fn is_intraday(&self) -> bool {
        !matches!(self, Interval::D1)
    }
}

impl fmt::Display for Interval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Interval::M1 => "1m",
            Interval::M5 => "5m",
            Interval::M15 => "15m",
            Interval::M30 => "30m",
            Interval::H1 => "1h",
            Interval::D1 => "1d",
        };
        write!(f, "{}", s)
    }
}

impl FromStr for Interval {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "1m" => Ok(Interval::M1),
            "5m" => Ok(Interval::M5),
            "15m" => Ok(Interval::M15),
            "30m" => Ok(Interval::M30),
            "1h" => Ok(Interval::H1),
            "1d" => Ok(Interval::D1),
            other => Err(format!("unknown interval: {other}")),
        }
    }
}

/// Trading venue for Korean equities.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Market {
    /// Primary exchange (KOSPI/KOSDAQ regular session).
    Krx,
    /// Nextrade, the alternative venue for pre-/post-session windows.
    Nxt,
}

impl Market {
    /// Venue tag as carried in order metadata and the order payload.
    pub fn as_str(&self) -> &'static str {
        match self {
            Market::Krx => "KRX",
            Market::Nxt => "NXT",
        }
    }
}

impl fmt::Display for Market {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
