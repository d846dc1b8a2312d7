//! In-memory bar cache in front of the parquet store.

use std::time::{Duration, Instant};

use chrono::NaiveDateTime;
use dashmap::DashMap;
use parking_lot::RwLock;

use kt_types::{Interval, Ohlc};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct CacheKey {
    symbol: String,
    interval: Interval,
}

#[derive(Debug)]
struct CacheEntry {
    bars: Vec<Ohlc>,
    inserted_at: Instant,
}

#[derive(Debug, Default, Clone, Copy)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
}

/// TTL-bounded cache keyed by `(symbol, interval)`.
///
/// An entry answers a range query only when it fully covers the requested
/// window; partial coverage is a miss so the caller goes to the store.
#[derive(Debug)]
pub struct BarCache {
    entries: DashMap<CacheKey, CacheEntry>,
    ttl: Duration,
    stats: RwLock<CacheStats>,
}

impl BarCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            ttl,
            stats: RwLock::new(CacheStats::default()),
        }
    }

    pub fn get(
        &self,
        symbol: &str,
        interval: Interval,
        start: NaiveDateTime,
        end: NaiveDateTime,
    ) -> Option<Vec<Ohlc>> {
        let key = CacheKey {
            symbol: symbol.to_string(),
            interval,
        };

        if let Some(entry) = self.entries.get(&key) {
            let fresh = entry.inserted_at.elapsed() < self.ttl;
            let covers = match (entry.bars.first(), entry.bars.last()) {
                (Some(first), Some(last)) => first.timestamp <= start && last.timestamp >= end,
                _ => false,
            };
            if fresh && covers {
                self.stats.write().hits += 1;
                return Some(
                    entry
                        .bars
                        .iter()
                        .filter(|b| b.timestamp >= start && b.timestamp <= end)
                        .cloned()
                        .collect(),
                );
            }
        }

        self.stats.write().misses += 1;
        None
    }

    pub fn put(&self, symbol: &str, interval: Interval, bars: Vec<Ohlc>) {
        let key = CacheKey {
            symbol: symbol.to_string(),
            interval,
        };
        self.entries.insert(
            key,
            CacheEntry {
                bars,
                inserted_at: Instant::now(),
            },
        );
    }

    pub fn invalidate(&self, symbol: &str, interval: Interval) {
        self.entries.remove(&CacheKey {
            symbol: symbol.to_string(),
            interval,
        });
    }

    pub fn stats(&self) -> CacheStats {
        *self.stats.read()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use rust_decimal_macros::dec;

    fn bar(day: u32) -> Ohlc {
        let ts = NaiveDate::from_ymd_opt(2025, 6, day)
            .unwrap()
            .and_hms_opt(15, 30, 0)
            .unwrap();
        Ohlc::new("005930", ts, dec!(100), dec!(110), dec!(90), dec!(105), 10, None).unwrap()
    }

    #[test]
    fn test_hit_requires_full_coverage() {
        let cache = BarCache::new(Duration::from_secs(60));
        cache.put("005930", Interval::D1, vec![bar(2), bar(3), bar(4)]);

        let inside = cache.get(
            "005930",
            Interval::D1,
            bar(2).timestamp,
            bar(3).timestamp,
        );
        assert_eq!(inside.unwrap().len(), 2);

        // Window extends past cached data: miss.
        let outside = cache.get(
            "005930",
            Interval::D1,
            bar(2).timestamp,
            bar(6).timestamp,
        );
        assert!(outside.is_none());

        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
    }

    #[test]
    fn test_expired_entry_is_a_miss() {
        let cache = BarCache::new(Duration::from_millis(0));
        cache.put("005930", Interval::D1, vec![bar(2), bar(3)]);
        assert!(cache
            .get("005930", Interval::D1, bar(2).timestamp, bar(3).timestamp)
            .is_none());
    }
}
