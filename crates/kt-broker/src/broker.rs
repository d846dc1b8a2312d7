//! Venue-agnostic broker capability set.
//!
//! Everything the strategy execution core needs from a venue, behind one
//! async trait so the realtime engine runs identically against the live
//! adapter and the mock.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::NaiveDateTime;
use rust_decimal::Decimal;

use kt_types::{Account, Interval, Ohlc, Order, Position};

use crate::error::BrokerResult;
use crate::market_status::MarketStatusTracker;
use crate::realtime::TickStream;

#[async_trait]
pub trait Broker: Send + Sync {
    /// Authenticate and prepare for use.
    async fn connect(&self) -> BrokerResult<()>;

    /// Release tokens/sockets.
    async fn disconnect(&self) -> BrokerResult<()>;

    /// Pin the exchange clock to venue time where the venue supports it.
    /// Called once at engine start; the default is a no-op.
    async fn sync_server_time(&self) -> BrokerResult<()> {
        Ok(())
    }

    // -- market data --------------------------------------------------------

    /// Bars over `[start, end]`, ascending, inclusive endpoints.
    async fn get_ohlc(
        &self,
        symbol: &str,
        interval: Interval,
        start: NaiveDateTime,
        end: NaiveDateTime,
    ) -> BrokerResult<Vec<Ohlc>>;

    async fn get_current_price(&self, symbol: &str) -> BrokerResult<Decimal>;

    // -- orders -------------------------------------------------------------

    /// Submit an order; the venue order id comes back. Metadata carries the
    /// routing tag (`mbr_no`).
    async fn place_order(&self, order: &Order) -> BrokerResult<String>;

    async fn cancel_order(&self, order_id: &str, symbol: &str, quantity: i64)
        -> BrokerResult<bool>;

    async fn amend_order(
        &self,
        order_id: &str,
        symbol: &str,
        quantity: i64,
        new_price: Decimal,
    ) -> BrokerResult<bool>;

    // -- account ------------------------------------------------------------

    async fn get_account(&self) -> BrokerResult<Account>;

    async fn get_positions(&self) -> BrokerResult<Vec<Position>>;

    /// Still-working orders only.
    async fn get_open_orders(&self) -> BrokerResult<Vec<Order>>;

    /// Including terminal orders within the venue's lookback.
    async fn get_orders(&self) -> BrokerResult<Vec<Order>>;

    // -- realtime -----------------------------------------------------------

    /// Start a restartable, cancellable tick stream. Per-symbol FIFO.
    async fn stream_realtime(&self, symbols: &[String]) -> BrokerResult<TickStream>;

    /// Shared market-session state fed by the realtime channel.
    fn market_status(&self) -> Arc<MarketStatusTracker>;
}
