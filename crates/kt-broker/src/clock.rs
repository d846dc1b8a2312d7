//! Exchange-local clock.
//!
//! Preferred source is the broker server time, synchronized once at engine
//! start via the time TR; until then the OS clock with the fixed +9 h offset
//! stands in.

use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;

use chrono::{NaiveDateTime, Utc};

use kt_types::kst::now_kst;

#[derive(Debug, Default)]
struct ClockInner {
    /// Offset of exchange time from UTC in milliseconds (includes the +9 h).
    offset_ms: AtomicI64,
    synced: AtomicBool,
}

/// Cheaply cloneable handle to the shared clock.
#[derive(Debug, Clone, Default)]
pub struct ExchangeClock {
    inner: Arc<ClockInner>,
}

impl ExchangeClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the server's exchange-local wall clock.
    pub fn sync_to(&self, server_time: NaiveDateTime) {
        let offset = server_time - Utc::now().naive_utc();
        self.inner
            .offset_ms
            .store(offset.num_milliseconds(), Ordering::Relaxed);
        self.inner.synced.store(true, Ordering::Relaxed);
    }

    pub fn is_synced(&self) -> bool {
        self.inner.synced.load(Ordering::Relaxed)
    }

    /// Current exchange-local time.
    pub fn now(&self) -> NaiveDateTime {
        if self.is_synced() {
            Utc::now().naive_utc()
                + chrono::Duration::milliseconds(self.inner.offset_ms.load(Ordering::Relaxed))
        } else {
            now_kst()
        }
    }
}
