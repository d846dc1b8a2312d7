//! LS Securities OpenAPI endpoint map.
//!
//! REST is served on port 8080 for both live and paper accounts (paper is
//! distinguished by the account, not the host). The WebSocket ports differ.

pub const BASE_URL: &str = "https://openapi.ls-sec.co.kr:8080";

pub const OAUTH_TOKEN: &str = "/oauth2/token";
pub const OAUTH_REVOKE: &str = "/oauth2/revoke";

/// Balance and order history TRs (t0424, t0425).
pub const STOCK_ACCOUNT: &str = "/stock/accno";
/// Spot order TRs (CSPAT00601/00701/00801).
pub const STOCK_ORDER: &str = "/stock/order";
/// Chart TRs (t8451 daily, t8452 N-minute).
pub const STOCK_CHART: &str = "/stock/chart";
/// Quote TRs (t1101 order book, t1102 current price).
pub const STOCK_MARKET: &str = "/stock/market-data";
/// Ranked lists (t1441 change rate, t1463 traded value).
pub const STOCK_HIGH_ITEM: &str = "/stock/high-item";
/// Financial summary (t3320).
pub const STOCK_INVESTINFO: &str = "/stock/investinfo";
/// Symbol directory (t8436).
pub const STOCK_ETC: &str = "/stock/etc";
/// Server time (t0167).
pub const ETC_TIME: &str = "/etc/time-search";

const WSS_URL: &str = "wss://openapi.ls-sec.co.kr:9443/websocket";
const WSS_URL_PAPER: &str = "wss://openapi.ls-sec.co.kr:29443/websocket";

pub fn wss_url(paper_trading: bool) -> &'static str {
    if paper_trading {
        WSS_URL_PAPER
    } else {
        WSS_URL
    }
}
