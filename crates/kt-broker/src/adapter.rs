//! LS Securities broker adapter: composes the token store, REST transport
//! and services behind the [`Broker`] trait.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::NaiveDateTime;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::info;

use kt_types::{Account, Interval, Ohlc, Order, Position};

use crate::account::AccountOrderService;
use crate::broker::Broker;
use crate::client::LsClient;
use crate::clock::ExchangeClock;
use crate::endpoints;
use crate::error::{BrokerError, BrokerResult};
use crate::market::MarketDataService;
use crate::market_status::MarketStatusTracker;
use crate::oauth::TokenStore;
use crate::realtime::{RealtimeFeed, TickStream};

/// Venue row cap per chart request.
const MAX_MINUTE_ROWS: u32 = 500;
/// Approximate regular-session minutes per trading day.
const SESSION_MINUTES_PER_DAY: i64 = 390;

/// Credentials and connection settings for the LS adapter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LsConfig {
    pub appkey: String,
    pub appsecretkey: String,
    pub account_id: String,
    pub account_password: String,
    #[serde(default)]
    pub paper_trading: bool,
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_token_path")]
    pub token_path: PathBuf,
}

fn default_base_url() -> String {
    endpoints::BASE_URL.to_string()
}

fn default_token_path() -> PathBuf {
    PathBuf::from("data/ls_token.json")
}

/// Live venue adapter.
pub struct LsBroker {
    config: LsConfig,
    tokens: Arc<TokenStore>,
    pub market: MarketDataService,
    pub account: AccountOrderService,
    status: Arc<MarketStatusTracker>,
    clock: ExchangeClock,
    connected: AtomicBool,
}

impl LsBroker {
    pub fn new(config: LsConfig) -> BrokerResult<Self> {
        let tokens = Arc::new(
            TokenStore::new(&config.appkey, &config.appsecretkey, &config.token_path)?
                .with_base_url(&config.base_url),
        );
        let client = Arc::new(LsClient::new(&config.base_url, Arc::clone(&tokens))?);

        Ok(Self {
            market: MarketDataService::new(Arc::clone(&client)),
            account: AccountOrderService::new(
                Arc::clone(&client),
                &config.account_id,
                &config.account_password,
            ),
            tokens,
            status: Arc::new(MarketStatusTracker::new()),
            clock: ExchangeClock::new(),
            connected: AtomicBool::new(false),
            config,
        })
    }

    fn ensure_connected(&self) -> BrokerResult<()> {
        if self.connected.load(Ordering::Relaxed) {
            Ok(())
        } else {
            Err(BrokerError::NotConnected)
        }
    }

    /// Pull the venue clock once and pin the shared exchange clock to it.
    pub async fn sync_clock_from_server(&self) -> BrokerResult<NaiveDateTime> {
        let server_time = self.market.get_server_time().await?;
        self.clock.sync_to(server_time);
        info!(%server_time, "server time synchronized");
        Ok(server_time)
    }

    pub fn clock(&self) -> ExchangeClock {
        self.clock.clone()
    }
}

#[async_trait]
impl Broker for LsBroker {
    async fn connect(&self) -> BrokerResult<()> {
        self.tokens.initialize().await?;
        self.connected.store(true, Ordering::Relaxed);
        info!(account = %self.config.account_id, paper = self.config.paper_trading, "broker connected");
        Ok(())
    }

    async fn disconnect(&self) -> BrokerResult<()> {
        self.connected.store(false, Ordering::Relaxed);
        info!("broker disconnected");
        Ok(())
    }

    async fn sync_server_time(&self) -> BrokerResult<()> {
        self.ensure_connected()?;
        self.sync_clock_from_server().await?;
        Ok(())
    }

    async fn get_ohlc(
        &self,
        symbol: &str,
        interval: Interval,
        start: NaiveDateTime,
        end: NaiveDateTime,
    ) -> BrokerResult<Vec<Ohlc>> {
        self.ensure_connected()?;
        match interval.minutes() {
            None => self.market.get_daily_ohlc(symbol, start, end).await,
            Some(minutes) => {
                // Day range → row count, bounded by the venue cap.
                let days = (end - start).num_days().max(1);
                let count = (days * SESSION_MINUTES_PER_DAY / i64::from(minutes))
                    .clamp(1, i64::from(MAX_MINUTE_ROWS)) as u32;
                let bars = self.market.get_minute_ohlc(symbol, minutes, count).await?;
                Ok(bars
                    .into_iter()
                    .filter(|b| b.timestamp >= start && b.timestamp <= end)
                    .collect())
            }
        }
    }

    async fn get_current_price(&self, symbol: &str) -> BrokerResult<Decimal> {
        self.ensure_connected()?;
        self.market.get_current_price(symbol).await
    }

    async fn place_order(&self, order: &Order) -> BrokerResult<String> {
        self.ensure_connected()?;
        self.account.place_order(order).await
    }

    async fn cancel_order(
        &self,
        order_id: &str,
        symbol: &str,
        quantity: i64,
    ) -> BrokerResult<bool> {
        self.ensure_connected()?;
        self.account.cancel_order(order_id, symbol, quantity).await
    }

    async fn amend_order(
        &self,
        order_id: &str,
        symbol: &str,
        quantity: i64,
        new_price: Decimal,
    ) -> BrokerResult<bool> {
        self.ensure_connected()?;
        let new_id = self
            .account
            .modify_order(order_id, symbol, quantity, new_price)
            .await?;
        Ok(!new_id.is_empty())
    }

    async fn get_account(&self) -> BrokerResult<Account> {
        self.ensure_connected()?;
        self.account.get_account().await
    }

    async fn get_positions(&self) -> BrokerResult<Vec<Position>> {
        self.ensure_connected()?;
        self.account.get_positions().await
    }

    async fn get_open_orders(&self) -> BrokerResult<Vec<Order>> {
        self.ensure_connected()?;
        self.account.get_open_orders().await
    }

    async fn get_orders(&self) -> BrokerResult<Vec<Order>> {
        self.ensure_connected()?;
        self.account.get_orders().await
    }

    async fn stream_realtime(&self, symbols: &[String]) -> BrokerResult<TickStream> {
        self.ensure_connected()?;
        let token = self.tokens.get_valid_token().await?;
        let feed = RealtimeFeed::new(
            token,
            &self.config.appkey,
            self.config.paper_trading,
            Arc::clone(&self.status),
        );
        Ok(feed.spawn(symbols.to_vec()))
    }

    fn market_status(&self) -> Arc<MarketStatusTracker> {
        Arc::clone(&self.status)
    }
}
