//! Market router: which venue may receive an order right now.
//!
//! Strict precedence: the session-end sentinel dominates everything, then
//! the live JIF active flags, and only with no JIF data at all does the
//! wall-clock window fallback apply.

use std::sync::Arc;

use chrono::NaiveTime;
use tracing::{debug, warn};

use kt_broker::{ExchangeClock, MarketStatusTracker, SESSION_END_STATUS};
use kt_types::Market;

pub struct MarketRouter {
    status: Arc<MarketStatusTracker>,
    clock: ExchangeClock,
}

impl MarketRouter {
    pub fn new(status: Arc<MarketStatusTracker>, clock: ExchangeClock) -> Self {
        Self { status, clock }
    }

    /// Venue for a new order, or `None` when ordering is not allowed.
    pub fn determine_market(&self) -> Option<Market> {
        self.determine_market_at(self.clock.now().time())
    }

    /// Same decision against an explicit wall-clock time (testing, replay).
    pub fn determine_market_at(&self, now: NaiveTime) -> Option<Market> {
        let state = self.status.snapshot();
        let krx_closed = state.krx_status.as_deref() == Some(SESSION_END_STATUS);
        let nxt_closed = state.nxt_status.as_deref() == Some(SESSION_END_STATUS);

        // 1) Session-end sentinel dominates the clock.
        if krx_closed {
            warn!("KRX session-end sentinel set; never routing to KRX");
            if state.nxt_active && !nxt_closed {
                return Some(Market::Nxt);
            }
            return None;
        }
        if nxt_closed {
            warn!("NXT session-end sentinel set; never routing to NXT");
            if state.krx_active {
                return Some(Market::Krx);
            }
            return None;
        }

        // 2) Live JIF flags.
        if state.has_data() {
            return match (state.krx_active, state.nxt_active) {
                (true, true) => {
                    if in_regular_session(now) {
                        Some(Market::Krx)
                    } else {
                        Some(Market::Nxt)
                    }
                }
                (true, false) => Some(Market::Krx),
                (false, true) => Some(Market::Nxt),
                (false, false) => {
                    debug!(
                        krx_status = ?state.krx_status,
                        nxt_status = ?state.nxt_status,
                        "JIF says both venues inactive"
                    );
                    None
                }
            };
        }

        // 3) No JIF yet: wall-clock windows.
        let pre_session = NaiveTime::from_hms_opt(8, 0, 0).unwrap()
            ..NaiveTime::from_hms_opt(8, 50, 0).unwrap();
        let post_start = NaiveTime::from_hms_opt(15, 40, 0).unwrap();
        let post_end = NaiveTime::from_hms_opt(20, 0, 0).unwrap();

        if pre_session.contains(&now) {
            Some(Market::Nxt)
        } else if in_regular_session(now) {
            Some(Market::Krx)
        } else if now >= post_start && now <= post_end {
            Some(Market::Nxt)
        } else {
            debug!(%now, "outside all trading windows");
            None
        }
    }
}

fn in_regular_session(now: NaiveTime) -> bool {
    let open = NaiveTime::from_hms_opt(9, 0, 0).unwrap();
    let close = NaiveTime::from_hms_opt(15, 30, 0).unwrap();
    (open..=close).contains(&now)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn router() -> (Arc<MarketStatusTracker>, MarketRouter) {
        let status = Arc::new(MarketStatusTracker::new());
        let router = MarketRouter::new(Arc::clone(&status), ExchangeClock::new());
        (status, router)
    }

    fn at(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    #[test]
    fn test_fallback_windows_without_jif() {
        let (_, router) = router();
        assert_eq!(router.determine_market_at(at(8, 10)), Some(Market::Nxt));
        assert_eq!(router.determine_market_at(at(8, 55)), None);
        assert_eq!(router.determine_market_at(at(9, 15)), Some(Market::Krx));
        assert_eq!(router.determine_market_at(at(15, 30)), Some(Market::Krx));
        assert_eq!(router.determine_market_at(at(15, 45)), Some(Market::Nxt));
        assert_eq!(router.determine_market_at(at(20, 0)), Some(Market::Nxt));
        assert_eq!(router.determine_market_at(at(3, 0)), None);
        assert_eq!(router.determine_market_at(at(21, 30)), None);
    }

    #[test]
    fn test_session_end_sentinel_beats_the_clock() {
        let (status, router) = router();
        status.update_jif("1", "41");
        // 15:25 would normally route to KRX.
        assert_eq!(router.determine_market_at(at(15, 25)), None);

        // NXT active and not ended: falls through to NXT.
        status.update_jif("6", "31");
        assert_eq!(router.determine_market_at(at(15, 25)), Some(Market::Nxt));

        // Both ended: nothing.
        status.update_jif("6", "41");
        assert_eq!(router.determine_market_at(at(15, 25)), None);
    }

    #[test]
    fn test_jif_flags_pick_venue() {
        let (status, router) = router();
        status.update_jif("1", "21");
        assert_eq!(router.determine_market_at(at(10, 0)), Some(Market::Krx));

        // Both active: KRX only inside the regular session.
        status.update_jif("6", "21");
        assert_eq!(router.determine_market_at(at(10, 0)), Some(Market::Krx));
        assert_eq!(router.determine_market_at(at(16, 0)), Some(Market::Nxt));

        // Only NXT active.
        status.update_jif("1", "11");
        assert_eq!(router.determine_market_at(at(10, 0)), Some(Market::Nxt));
    }

    #[test]
    fn test_jif_both_inactive_blocks_orders() {
        let (status, router) = router();
        status.update_jif("1", "11");
        status.update_jif("6", "11");
        // JIF data exists, so the clock fallback must NOT apply.
        assert_eq!(router.determine_market_at(at(10, 0)), None);
    }

    #[test]
    fn test_nxt_session_end_with_krx_active() {
        let (status, router) = router();
        status.update_jif("6", "41");
        status.update_jif("1", "21");
        assert_eq!(router.determine_market_at(at(10, 0)), Some(Market::Krx));
    }
}
