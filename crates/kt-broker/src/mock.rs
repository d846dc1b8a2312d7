//! In-memory broker for tests and development.
//!
//! Scripted ticks go in through [`MockBroker::push_tick`]; fill behaviour is
//! selected per instance. Every accepted submission is recorded so tests can
//! assert that retry loops never duplicate a live order at the venue.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::NaiveDateTime;
use parking_lot::Mutex;
use rust_decimal::Decimal;
use tokio::sync::{mpsc, Notify};

use kt_types::kst::now_kst;
use kt_types::{Account, Interval, Ohlc, Order, OrderSide, OrderStatus, Position, Tick};

use crate::broker::Broker;
use crate::error::{BrokerError, BrokerResult};
use crate::market_status::MarketStatusTracker;
use crate::realtime::TickStream;

/// How the mock venue treats submitted orders.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FillMode {
    /// Fill instantly on submission.
    #[default]
    Immediate,
    /// Accept the order and leave it working forever (timeout testing).
    StayPending,
    /// Refuse every order with a venue error.
    Reject,
}

#[derive(Debug, Clone)]
pub struct MockConfig {
    pub initial_balance: Decimal,
    pub fill_mode: FillMode,
    /// Bars served by `get_ohlc` (gap-repair testing).
    pub ohlc: Vec<Ohlc>,
}

impl Default for MockConfig {
    fn default() -> Self {
        Self {
            initial_balance: Decimal::from(10_000_000),
            fill_mode: FillMode::Immediate,
            ohlc: Vec::new(),
        }
    }
}

#[derive(Debug)]
struct MockState {
    account: Account,
    positions: HashMap<String, Position>,
    orders: HashMap<String, Order>,
    /// Every order the venue accepted, in submission order.
    submissions: Vec<Order>,
    /// Client id → venue id, for submit idempotence.
    client_ids: HashMap<String, String>,
    cancelled: Vec<String>,
    prices: HashMap<String, Decimal>,
    next_order_id: u64,
    tick_tx: Option<mpsc::Sender<Tick>>,
}

/// Scriptable in-memory venue.
pub struct MockBroker {
    config: MockConfig,
    state: Mutex<MockState>,
    status: Arc<MarketStatusTracker>,
}

impl MockBroker {
    pub fn new(config: MockConfig) -> Self {
        let account = Account::new("MOCK-01", config.initial_balance);
        Self {
            config,
            state: Mutex::new(MockState {
                account,
                positions: HashMap::new(),
                orders: HashMap::new(),
                submissions: Vec::new(),
                client_ids: HashMap::new(),
                cancelled: Vec::new(),
                prices: HashMap::new(),
                next_order_id: 1,
                tick_tx: None,
            }),
            status: Arc::new(MarketStatusTracker::new()),
        }
    }

    pub fn with_defaults() -> Self {
        Self::new(MockConfig::default())
    }

    // -- test scripting -----------------------------------------------------

    /// Feed a tick into an open stream. Returns false when no stream is up.
    pub async fn push_tick(&self, tick: Tick) -> bool {
        let tx = self.state.lock().tick_tx.clone();
        match tx {
            Some(tx) => tx.send(tick).await.is_ok(),
            None => false,
        }
    }

    pub fn set_price(&self, symbol: &str, price: Decimal) {
        self.state.lock().prices.insert(symbol.to_string(), price);
    }

    pub fn set_position(&self, symbol: &str, quantity: i64, price: Decimal) {
        let mut position = Position::new(symbol);
        position.apply_buy(quantity, price);
        self.state
            .lock()
            .positions
            .insert(symbol.to_string(), position);
    }

    pub fn set_equity(&self, equity: Decimal) {
        self.state.lock().account.equity = equity;
    }

    /// All accepted submissions (for idempotence assertions).
    pub fn submissions(&self) -> Vec<Order> {
        self.state.lock().submissions.clone()
    }

    pub fn cancelled_ids(&self) -> Vec<String> {
        self.state.lock().cancelled.clone()
    }

    /// Mark a working order filled (simulates the venue's fill push).
    pub fn fill_order(&self, order_id: &str) -> bool {
        let mut state = self.state.lock();
        let Some(order) = state.orders.get_mut(order_id) else {
            return false;
        };
        order.filled_quantity = order.quantity;
        let _ = order.transition_to(OrderStatus::Filled, now_kst());
        let (symbol, side, quantity, price) = (
            order.symbol.clone(),
            order.side,
            order.quantity,
            order.price.unwrap_or_default(),
        );
        apply_fill(&mut state, &symbol, side, quantity, price);
        true
    }
}

fn apply_fill(
    state: &mut MockState,
    symbol: &str,
    side: OrderSide,
    quantity: i64,
    price: Decimal,
) {
    let position = state
        .positions
        .entry(symbol.to_string())
        .or_insert_with(|| Position::new(symbol));
    match side {
        OrderSide::Buy => {
            position.apply_buy(quantity, price);
            state.account.balance -= price * Decimal::from(quantity);
        }
        OrderSide::Sell => {
            position.apply_sell(quantity, price);
            state.account.balance += price * Decimal::from(quantity);
        }
    }
    if position.is_flat() {
        state.positions.remove(symbol);
    }
    let positions: Vec<Position> = state.positions.values().cloned().collect();
    state.account.mark(&positions);
}

#[async_trait]
impl Broker for MockBroker {
    async fn connect(&self) -> BrokerResult<()> {
        Ok(())
    }

    async fn disconnect(&self) -> BrokerResult<()> {
        Ok(())
    }

    async fn get_ohlc(
        &self,
        symbol: &str,
        _interval: Interval,
        start: NaiveDateTime,
        end: NaiveDateTime,
    ) -> BrokerResult<Vec<Ohlc>> {
        Ok(self
            .config
            .ohlc
            .iter()
            .filter(|b| b.symbol == symbol && b.timestamp >= start && b.timestamp <= end)
            .cloned()
            .collect())
    }

    async fn get_current_price(&self, symbol: &str) -> BrokerResult<Decimal> {
        self.state
            .lock()
            .prices
            .get(symbol)
            .copied()
            .ok_or_else(|| BrokerError::Parse {
                message: format!("no mock price for {symbol}"),
            })
    }

    async fn place_order(&self, order: &Order) -> BrokerResult<String> {
        if self.config.fill_mode == FillMode::Reject {
            return Err(BrokerError::OrderRejected {
                reason: "mock venue rejects all orders".into(),
            });
        }

        let mut state = self.state.lock();

        // Idempotence on the caller-supplied client id: a retried submission
        // must not create a second live order.
        if !order.order_id.is_empty() {
            if let Some(existing) = state.client_ids.get(&order.order_id) {
                return Ok(existing.clone());
            }
        }

        let order_id = format!("M{:06}", state.next_order_id);
        state.next_order_id += 1;
        if !order.order_id.is_empty() {
            state
                .client_ids
                .insert(order.order_id.clone(), order_id.clone());
        }

        let mut accepted = order.clone();
        accepted.order_id = order_id.clone();
        let _ = accepted.transition_to(OrderStatus::Submitted, now_kst());
        state.submissions.push(accepted.clone());

        match self.config.fill_mode {
            FillMode::Immediate => {
                accepted.filled_quantity = accepted.quantity;
                let _ = accepted.transition_to(OrderStatus::Filled, now_kst());
                let price = accepted
                    .price
                    .or_else(|| state.prices.get(&accepted.symbol).copied())
                    .unwrap_or_default();
                let (symbol, side, quantity) =
                    (accepted.symbol.clone(), accepted.side, accepted.quantity);
                state.orders.insert(order_id.clone(), accepted);
                apply_fill(&mut state, &symbol, side, quantity, price);
            }
            FillMode::StayPending => {
                state.orders.insert(order_id.clone(), accepted);
            }
            FillMode::Reject => unreachable!(),
        }

        Ok(order_id)
    }

    async fn cancel_order(
        &self,
        order_id: &str,
        _symbol: &str,
        _quantity: i64,
    ) -> BrokerResult<bool> {
        let mut state = self.state.lock();
        state.cancelled.push(order_id.to_string());
        if let Some(order) = state.orders.get_mut(order_id) {
            if order.is_active() {
                let _ = order.transition_to(OrderStatus::Cancelled, now_kst());
                return Ok(true);
            }
        }
        Ok(false)
    }

    async fn amend_order(
        &self,
        order_id: &str,
        _symbol: &str,
        quantity: i64,
        new_price: Decimal,
    ) -> BrokerResult<bool> {
        let mut state = self.state.lock();
        if let Some(order) = state.orders.get_mut(order_id) {
            if order.is_active() {
                order.quantity = quantity;
                order.price = Some(new_price);
                return Ok(true);
            }
        }
        Ok(false)
    }

    async fn get_account(&self) -> BrokerResult<Account> {
        Ok(self.state.lock().account.clone())
    }

    async fn get_positions(&self) -> BrokerResult<Vec<Position>> {
        let mut positions: Vec<Position> =
            self.state.lock().positions.values().cloned().collect();
        positions.sort_by(|a, b| a.symbol.cmp(&b.symbol));
        Ok(positions)
    }

    async fn get_open_orders(&self) -> BrokerResult<Vec<Order>> {
        Ok(self
            .state
            .lock()
            .orders
            .values()
            .filter(|o| o.is_active())
            .cloned()
            .collect())
    }

    async fn get_orders(&self) -> BrokerResult<Vec<Order>> {
        Ok(self.state.lock().orders.values().cloned().collect())
    }

    async fn stream_realtime(&self, _symbols: &[String]) -> BrokerResult<TickStream> {
        let (tx, rx) = mpsc::channel(256);
        self.state.lock().tick_tx = Some(tx);
        Ok(TickStream::from_parts(rx, Arc::new(Notify::new()), None))
    }

    fn market_status(&self) -> Arc<MarketStatusTracker> {
        Arc::clone(&self.status)
    }
}
