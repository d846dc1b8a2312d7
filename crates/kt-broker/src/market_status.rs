//! JIF market-state tracker.
//!
//! Single writer (the realtime feed parser), many readers (router, engine).
//! Consumers ask questions instead of touching fields; every accessor takes
//! one short read-lock.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use kt_types::Market;

/// Session-phase codes meaning "trading is on" (open through close).
const ACTIVE_MIN: i32 = 21;
const ACTIVE_MAX: i32 = 41;
/// Session-end sentinel.
pub const SESSION_END_STATUS: &str = "41";

const CIRCUIT_BREAKER_SET: [&str; 5] = ["61", "63", "68", "69", "71"];
const CIRCUIT_BREAKER_CLEAR: [&str; 2] = ["62", "70"];
const SIDECAR_SET: [&str; 2] = ["64", "66"];
const SIDECAR_CLEAR: [&str; 2] = ["65", "67"];

/// Snapshot of the whole-market session state.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MarketState {
    pub krx_status: Option<String>,
    pub nxt_status: Option<String>,
    pub krx_active: bool,
    pub nxt_active: bool,
    pub krx_circuit_breaker: bool,
    pub krx_sidecar: bool,
    pub nxt_circuit_breaker: bool,
    pub nxt_sidecar: bool,
}

impl MarketState {
    /// Whether any JIF frame has been seen for either venue.
    pub fn has_data(&self) -> bool {
        self.krx_status.is_some() || self.nxt_status.is_some()
    }
}

/// Concurrency-safe tracker fed by JIF frames.
#[derive(Debug, Default)]
pub struct MarketStatusTracker {
    state: RwLock<MarketState>,
}

impl MarketStatusTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply one JIF frame. `jangubun` 1/2 are the KRX boards, 6 is NXT;
    /// anything else is ignored.
    pub fn update_jif(&self, jangubun: &str, jstatus: &str) {
        let mut guard = self.state.write();
        let state = &mut *guard;

        let (status_slot, active_slot, cb_slot, sidecar_slot, venue) = match jangubun {
            "1" | "2" => (
                &mut state.krx_status,
                &mut state.krx_active,
                &mut state.krx_circuit_breaker,
                &mut state.krx_sidecar,
                Market::Krx,
            ),
            "6" => (
                &mut state.nxt_status,
                &mut state.nxt_active,
                &mut state.nxt_circuit_breaker,
                &mut state.nxt_sidecar,
                Market::Nxt,
            ),
            other => {
                debug!(jangubun = other, jstatus, "ignoring unknown venue class");
                return;
            }
        };

        *status_slot = Some(jstatus.to_string());

        // Active iff the phase code is numeric and inside [21, 41], except
        // that the end sentinel itself counts as closed. Non-numeric pre-/
        // after-market codes never count as active.
        *active_slot = jstatus != SESSION_END_STATUS
            && jstatus
                .parse::<i32>()
                .map(|code| (ACTIVE_MIN..=ACTIVE_MAX).contains(&code))
                .unwrap_or(false);

        if CIRCUIT_BREAKER_SET.contains(&jstatus) {
            *cb_slot = true;
            warn!(%venue, jstatus, "circuit breaker triggered");
        } else if CIRCUIT_BREAKER_CLEAR.contains(&jstatus) {
            *cb_slot = false;
            info!(%venue, jstatus, "circuit breaker cleared");
        }

        if SIDECAR_SET.contains(&jstatus) {
            *sidecar_slot = true;
            warn!(%venue, jstatus, "sidecar triggered");
        } else if SIDECAR_CLEAR.contains(&jstatus) {
            *sidecar_slot = false;
            info!(%venue, jstatus, "sidecar cleared");
        }

        if jstatus == SESSION_END_STATUS {
            info!(%venue, "session end");
        }
    }

    pub fn is_market_active(&self, market: Market) -> bool {
        let state = self.state.read();
        match market {
            Market::Krx => state.krx_active,
            Market::Nxt => state.nxt_active,
        }
    }

    pub fn is_circuit_breaker_active(&self, market: Market) -> bool {
        let state = self.state.read();
        match market {
            Market::Krx => state.krx_circuit_breaker,
            Market::Nxt => state.nxt_circuit_breaker,
        }
    }

    pub fn is_sidecar_active(&self, market: Market) -> bool {
        let state = self.state.read();
        match market {
            Market::Krx => state.krx_sidecar,
            Market::Nxt => state.nxt_sidecar,
        }
    }

    pub fn is_market_closed(&self, market: Market) -> bool {
        let state = self.state.read();
        let status = match market {
            Market::Krx => &state.krx_status,
            Market::Nxt => &state.nxt_status,
        };
        status.as_deref() == Some(SESSION_END_STATUS)
    }

    pub fn snapshot(&self) -> MarketState {
        self.state.read().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_open_then_close() {
        let tracker = MarketStatusTracker::new();
        tracker.update_jif("1", "21");
        assert!(tracker.is_market_active(Market::Krx));

        tracker.update_jif("1", "41");
        let state = tracker.snapshot();
        // The end sentinel closes the venue even though 41 is numerically
        // inside the active band.
        assert!(!state.krx_active);
        assert_eq!(state.krx_status.as_deref(), Some("41"));
        assert!(tracker.is_market_closed(Market::Krx));
    }

    #[test]
    fn test_non_numeric_status_is_inactive() {
        let tracker = MarketStatusTracker::new();
        tracker.update_jif("1", "A2");
        assert!(!tracker.is_market_active(Market::Krx));
        assert!(tracker.snapshot().has_data());
    }

    #[test]
    fn test_circuit_breaker_set_and_clear() {
        let tracker = MarketStatusTracker::new();
        tracker.update_jif("1", "61");
        assert!(tracker.is_circuit_breaker_active(Market::Krx));
        tracker.update_jif("1", "62");
        assert!(!tracker.is_circuit_breaker_active(Market::Krx));

        tracker.update_jif("1", "71");
        assert!(tracker.is_circuit_breaker_active(Market::Krx));
        tracker.update_jif("1", "70");
        assert!(!tracker.is_circuit_breaker_active(Market::Krx));
    }

    #[test]
    fn test_sidecar_set_and_clear() {
        let tracker = MarketStatusTracker::new();
        tracker.update_jif("2", "64");
        assert!(tracker.is_sidecar_active(Market::Krx));
        tracker.update_jif("2", "65");
        assert!(!tracker.is_sidecar_active(Market::Krx));
    }

    #[test]
    fn test_nxt_updates_only_touch_nxt_fields() {
        let tracker = MarketStatusTracker::new();
        tracker.update_jif("6", "21");

        let state = tracker.snapshot();
        assert!(state.nxt_active);
        assert!(!state.krx_active);
        assert!(state.krx_status.is_none());

        tracker.update_jif("6", "61");
        assert!(tracker.is_circuit_breaker_active(Market::Nxt));
        assert!(!tracker.is_circuit_breaker_active(Market::Krx));
    }

    #[test]
    fn test_unknown_jangubun_ignored() {
        let tracker = MarketStatusTracker::new();
        tracker.update_jif("9", "21");
        assert!(!tracker.snapshot().has_data());
    }
}
