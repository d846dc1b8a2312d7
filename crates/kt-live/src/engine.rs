//! Realtime execution engine.
//!
//! Owns the top-level loop: ticks from the broker stream feed the per-symbol
//! history ring, bars are rebuilt and validated, the strategy runs, and every
//! intent passes risk and routing before submission. Fill confirmation races
//! a per-order event (signalled from the WebSocket fill path) against a
//! one-second status poll with a 30-second deadline.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use rust_decimal::Decimal;
use tokio::sync::Notify;
use tracing::{debug, error, info, warn};

use kt_broker::{Broker, ExchangeClock};
use kt_data::{
    build_bars, check_integrity, find_gaps, merge_server_bars, truncate_at_gap, validate_bars,
};
use kt_risk::RiskManager;
use kt_strategy::{BarSeries, Strategy};
use kt_types::{
    new_client_order_id, Account, Interval, Market, Ohlc, Order, OrderIntent, OrderSide,
    OrderStatus, Position, Tick,
};

use crate::notify::{Notification, Notifier};
use crate::router::MarketRouter;

/// Cap on retained ticks per symbol.
const MAX_TICKS_PER_SYMBOL: usize = 20_000;
/// Submit attempts per signal.
const SIGNAL_ATTEMPTS: u32 = 3;
/// Delay before a stream reconnect.
const RECONNECT_DELAY: Duration = Duration::from_secs(1);

/// Engine tuning knobs.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Bar timeframe in seconds.
    pub timeframe_secs: u64,
    /// Bars kept per symbol.
    pub lookback: usize,
    /// How long to wait for a fill before cancelling.
    pub fill_timeout: Duration,
    /// Status poll cadence while waiting for a fill.
    pub poll_interval: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            timeframe_secs: 60,
            lookback: 100,
            fill_timeout: Duration::from_secs(30),
            poll_interval: Duration::from_secs(1),
        }
    }
}

/// Cross-task handle that lets the WebSocket fill path signal a waiting
/// order. Safe against the engine removing the id concurrently: the lookup
/// and signal happen under one lock.
#[derive(Clone)]
pub struct FillNotifier {
    events: Arc<Mutex<HashMap<String, Arc<Notify>>>>,
}

impl FillNotifier {
    /// Signal a pending order as filled. Returns false when the engine is no
    /// longer waiting on that id.
    pub fn notify_order_filled(&self, order_id: &str) -> bool {
        let events = self.events.lock();
        match events.get(order_id) {
            Some(event) => {
                info!(order_id, "fill notification received");
                event.notify_one();
                true
            }
            None => false,
        }
    }
}

/// Stop handle for the running engine.
#[derive(Clone)]
pub struct EngineHandle {
    running: Arc<AtomicBool>,
    shutdown: Arc<Notify>,
}

impl EngineHandle {
    pub fn stop(&self) {
        self.running.store(false, Ordering::Relaxed);
        self.shutdown.notify_waiters();
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Relaxed)
    }
}

/// The realtime engine. One instance per trading session.
pub struct ExecutionEngine {
    broker: Arc<dyn Broker>,
    strategy: Box<dyn Strategy>,
    risk: RiskManager,
    router: MarketRouter,
    notifier: Arc<dyn Notifier>,
    clock: ExchangeClock,
    config: EngineConfig,
    running: Arc<AtomicBool>,
    shutdown: Arc<Notify>,
    price_history: HashMap<String, Vec<Tick>>,
    execution_events: Arc<Mutex<HashMap<String, Arc<Notify>>>>,
    market_close_cancelled: bool,
}

impl ExecutionEngine {
    pub fn new(
        broker: Arc<dyn Broker>,
        strategy: Box<dyn Strategy>,
        risk: RiskManager,
        notifier: Arc<dyn Notifier>,
        clock: ExchangeClock,
        config: EngineConfig,
    ) -> Self {
        let router = MarketRouter::new(broker.market_status(), clock.clone());
        Self {
            broker,
            strategy,
            risk,
            router,
            notifier,
            clock,
            config,
            running: Arc::new(AtomicBool::new(false)),
            shutdown: Arc::new(Notify::new()),
            price_history: HashMap::new(),
            execution_events: Arc::new(Mutex::new(HashMap::new())),
            market_close_cancelled: false,
        }
    }

    pub fn handle(&self) -> EngineHandle {
        EngineHandle {
            running: Arc::clone(&self.running),
            shutdown: Arc::clone(&self.shutdown),
        }
    }

    pub fn fill_notifier(&self) -> FillNotifier {
        FillNotifier {
            events: Arc::clone(&self.execution_events),
        }
    }

    /// Consume the realtime stream until stopped. Reconnects when the feed
    /// drops while the engine is still supposed to run.
    pub async fn start(&mut self, symbols: Vec<String>) -> Result<(), String> {
        if self.running.swap(true, Ordering::Relaxed) {
            warn!("engine already running");
            return Ok(());
        }

        self.notifier.notify(Notification::StrategyStarted {
            strategy: self.strategy.name().to_string(),
            symbols: symbols.clone(),
        });
        info!(
            strategy = self.strategy.name(),
            symbols = symbols.len(),
            "execution engine starting"
        );

        if let Err(e) = self.broker.sync_server_time().await {
            warn!(error = %e, "server time sync failed, using local clock");
        }

        let mut stop_reason = "stopped".to_string();

        'outer: while self.running.load(Ordering::Relaxed) {
            let mut stream = match self.broker.stream_realtime(&symbols).await {
                Ok(stream) => stream,
                Err(e) => {
                    error!(error = %e, "failed to start realtime stream");
                    self.notifier.notify(Notification::Error {
                        message: format!("realtime stream failed: {e}"),
                    });
                    stop_reason = "stream failure".to_string();
                    break;
                }
            };

            loop {
                let tick = tokio::select! {
                    _ = self.shutdown.notified() => {
                        stream.close();
                        break 'outer;
                    }
                    tick = stream.next() => tick,
                };

                match tick {
                    Some(tick) => {
                        if !self.running.load(Ordering::Relaxed) {
                            stream.close();
                            break 'outer;
                        }
                        if let Err(e) = self.process_tick(tick).await {
                            warn!(error = %e, "tick processing failed");
                        }
                    }
                    None => {
                        warn!("tick stream ended");
                        break;
                    }
                }
            }

            if self.running.load(Ordering::Relaxed) {
                info!("reconnecting realtime stream");
                tokio::time::sleep(RECONNECT_DELAY).await;
            }
        }

        self.running.store(false, Ordering::Relaxed);
        self.notifier.notify(Notification::StrategyStopped {
            strategy: self.strategy.name().to_string(),
            reason: stop_reason,
        });
        info!("execution engine stopped");
        Ok(())
    }

    // -- per-tick pipeline --------------------------------------------------

    async fn process_tick(&mut self, tick: Tick) -> Result<(), String> {
        let symbol = tick.symbol.clone();
        let current_price = tick.price;
        debug!(symbol, price = %current_price, "tick");

        {
            let history = self.price_history.entry(symbol.clone()).or_default();
            history.push(tick.clone());
            if history.len() > MAX_TICKS_PER_SYMBOL {
                let excess = history.len() - MAX_TICKS_PER_SYMBOL;
                history.drain(..excess);
            }
        }

        let account = self
            .broker
            .get_account()
            .await
            .map_err(|e| format!("account fetch failed: {e}"))?;
        let positions = self
            .broker
            .get_positions()
            .await
            .map_err(|e| format!("positions fetch failed: {e}"))?;

        self.risk.update_equity(account.equity, tick.timestamp);

        // One-shot bulk cancel at the first tick after session end.
        let session_ended = self.broker.market_status().is_market_closed(Market::Krx);
        if !self.market_close_cancelled
            && self.risk.check_market_close_and_cancel_orders(session_ended)
        {
            self.cancel_all_open_orders().await;
            self.market_close_cancelled = true;
        }
        if !session_ended {
            self.market_close_cancelled = false;
        }

        if !self.risk.check_risk_limits(&account) {
            let status = self.risk.status();
            self.notifier.notify(Notification::RiskLimit {
                kind: "drawdown/daily-loss".to_string(),
                current: status.current_mdd,
                limit: status.max_mdd,
            });
            if self.risk.is_emergency_stopped() {
                self.emergency_liquidate(&positions).await;
            }
            return Ok(());
        }

        let Some(bars) = self.build_validated_bars(&symbol).await else {
            return Ok(());
        };

        let intents = {
            let series = BarSeries::new(&bars);
            self.strategy.on_bar(&series, &positions, &account)
        };

        for intent in intents {
            self.execute_signal(intent, &account, &positions, Some(current_price))
                .await;
        }

        Ok(())
    }

    /// Bars for one symbol: resample → repair → gap handling → integrity.
    /// `None` means "do not run the strategy this cycle".
    async fn build_validated_bars(&mut self, symbol: &str) -> Option<Vec<Ohlc>> {
        let ticks = self.price_history.get(symbol)?;
        let mut bars = build_bars(ticks, self.config.timeframe_secs, self.config.lookback)?;
        validate_bars(&mut bars, symbol);
        if bars.is_empty() {
            return None;
        }

        let gaps = find_gaps(&bars, self.config.timeframe_secs);
        if !gaps.is_empty() {
            warn!(symbol, gaps = gaps.len(), "bar gaps detected, attempting backfill");
            let interval =
                Interval::from_seconds(self.config.timeframe_secs).unwrap_or(Interval::M1);
            let start = gaps.iter().map(|g| g.start).min()?;
            let end = gaps.iter().map(|g| g.end).max()?;

            bars = match self.broker.get_ohlc(symbol, interval, start, end).await {
                Ok(server) if !server.is_empty() => {
                    info!(symbol, rows = server.len(), "gap backfill succeeded");
                    merge_server_bars(&bars, &server)
                }
                Ok(_) | Err(_) => {
                    warn!(symbol, "gap backfill failed, truncating at first gap");
                    truncate_at_gap(&bars, &gaps)
                }
            };
        }
        if bars.is_empty() {
            return None;
        }

        if let Err(e) = check_integrity(&bars, self.config.timeframe_secs, symbol) {
            warn!(symbol, error = %e, "integrity check failed, skipping strategy cycle");
            return None;
        }
        Some(bars)
    }

    // -- signal execution ---------------------------------------------------

    async fn execute_signal(
        &mut self,
        intent: OrderIntent,
        account: &Account,
        positions: &[Position],
        current_price: Option<Decimal>,
    ) {
        // 1) Routing: no venue, no order.
        let Some(market) = self.router.determine_market() else {
            warn!(symbol = %intent.symbol, "no venue available, dropping signal");
            return;
        };

        // 2) Re-entry guard: never add to an existing long via a raw BUY.
        if intent.side == OrderSide::Buy {
            let held = positions
                .iter()
                .any(|p| p.symbol == intent.symbol && p.quantity > 0);
            if held {
                warn!(symbol = %intent.symbol, "duplicate entry blocked");
                return;
            }
        }

        // 3) Risk gate.
        let verdict = self.risk.validate_order(&intent, account, current_price);
        if let Some(reason) = verdict.reason() {
            warn!(symbol = %intent.symbol, reason, "risk rejected signal");
            return;
        }

        // 4) Submit with exponential backoff on transient failures only.
        // One client id per signal, reused across attempts, so the venue can
        // deduplicate a retried submission.
        let client_id = new_client_order_id("RT");
        let mut backoff = Duration::from_secs(1);
        for attempt in 1..=SIGNAL_ATTEMPTS {
            let mut order = intent
                .clone()
                .into_order(client_id.clone(), self.clock.now());
            order.set_mbr_no(market);

            match self.broker.place_order(&order).await {
                Ok(order_id) => {
                    info!(
                        order_id,
                        symbol = %intent.symbol,
                        side = ?intent.side,
                        quantity = intent.quantity,
                        venue = %market,
                        "order submitted"
                    );
                    order.order_id = order_id.clone();
                    let filled = self.wait_for_fill(&order_id, &order).await;
                    if filled {
                        self.risk
                            .record_trade(&intent.symbol, self.clock.now().date());
                    }
                    return;
                }
                Err(e) if transient(&e) && attempt < SIGNAL_ATTEMPTS => {
                    warn!(attempt, error = %e, "submit failed, backing off");
                    tokio::time::sleep(backoff).await;
                    backoff *= 2;
                }
                Err(e) => {
                    error!(symbol = %intent.symbol, error = %e, "order submission failed");
                    return;
                }
            }
        }
        error!(symbol = %intent.symbol, "order submission exhausted retries");
    }

    /// Wait for a fill via event or polling; cancel on deadline.
    async fn wait_for_fill(&mut self, order_id: &str, order: &Order) -> bool {
        let event = Arc::new(Notify::new());
        self.execution_events
            .lock()
            .insert(order_id.to_string(), Arc::clone(&event));

        let deadline = tokio::time::Instant::now() + self.config.fill_timeout;
        debug!(order_id, "waiting for fill");

        while tokio::time::Instant::now() < deadline {
            tokio::select! {
                _ = event.notified() => {
                    info!(order_id, "filled via event");
                    self.finalize_fill(order_id, order).await;
                    return true;
                }
                _ = tokio::time::sleep(self.config.poll_interval) => {
                    match self.poll_order_status(order_id).await {
                        OrderStatus::Filled => {
                            info!(order_id, "filled via polling");
                            self.finalize_fill(order_id, order).await;
                            return true;
                        }
                        OrderStatus::Cancelled | OrderStatus::Rejected => {
                            warn!(order_id, "order terminated without fill");
                            self.cleanup_order(order_id);
                            return false;
                        }
                        _ => {}
                    }
                }
            }
        }

        warn!(order_id, timeout = ?self.config.fill_timeout, "fill wait timed out, cancelling");
        let remaining = order.quantity - order.filled_quantity;
        if let Err(e) = self
            .broker
            .cancel_order(order_id, &order.symbol, remaining)
            .await
        {
            error!(order_id, error = %e, "cancel after timeout failed");
        }
        self.cleanup_order(order_id);
        false
    }

    /// Poll the open-order list. An id absent from the list is taken as
    /// filled; transport errors leave the order pending for the next poll.
    async fn poll_order_status(&self, order_id: &str) -> OrderStatus {
        match self.broker.get_open_orders().await {
            Ok(open) => open
                .iter()
                .find(|o| o.order_id == order_id)
                .map(|o| o.status)
                .unwrap_or(OrderStatus::Filled),
            Err(e) => {
                warn!(order_id, error = %e, "open-order poll failed");
                OrderStatus::Pending
            }
        }
    }

    async fn finalize_fill(&mut self, order_id: &str, order: &Order) {
        // Refresh state so the next strategy cycle sees the fill.
        match self.broker.get_account().await {
            Ok(account) => self.risk.update_equity(account.equity, self.clock.now()),
            Err(e) => warn!(error = %e, "account refresh after fill failed"),
        }
        let position = match self.broker.get_positions().await {
            Ok(positions) => positions.into_iter().find(|p| p.symbol == order.symbol),
            Err(e) => {
                warn!(error = %e, "position refresh after fill failed");
                None
            }
        };

        self.strategy.on_fill(order, position.as_ref());
        self.notifier.notify(Notification::OrderFilled {
            order_id: order_id.to_string(),
            symbol: order.symbol.clone(),
            side: format!("{:?}", order.side),
            quantity: order.quantity,
            price: order.price.unwrap_or_default(),
        });
        self.cleanup_order(order_id);
    }

    fn cleanup_order(&self, order_id: &str) {
        self.execution_events.lock().remove(order_id);
    }

    async fn cancel_all_open_orders(&self) {
        let open = match self.broker.get_open_orders().await {
            Ok(open) => open,
            Err(e) => {
                error!(error = %e, "open-order fetch for bulk cancel failed");
                return;
            }
        };
        if open.is_empty() {
            return;
        }

        info!(count = open.len(), "cancelling open orders at session end");
        for order in open {
            let remaining = order.quantity - order.filled_quantity;
            match self
                .broker
                .cancel_order(&order.order_id, &order.symbol, remaining)
                .await
            {
                Ok(true) => {
                    info!(order_id = %order.order_id, "order cancelled");
                    self.cleanup_order(&order.order_id);
                }
                Ok(false) => warn!(order_id = %order.order_id, "cancel declined"),
                Err(e) => error!(order_id = %order.order_id, error = %e, "cancel failed"),
            }
        }
    }

    /// Market-sell every long position. Invoked once the risk manager trips
    /// the emergency stop.
    async fn emergency_liquidate(&mut self, positions: &[Position]) {
        error!("EMERGENCY LIQUIDATION STARTED");
        let market = self.router.determine_market().unwrap_or(Market::Krx);

        for position in positions.iter().filter(|p| p.quantity > 0) {
            let intent = OrderIntent::market(
                position.symbol.clone(),
                OrderSide::Sell,
                position.quantity,
            );
            let client_id = new_client_order_id("EMG");
            let mut order = intent.into_order(client_id, self.clock.now());
            order.set_mbr_no(market);

            match self.broker.place_order(&order).await {
                Ok(order_id) => {
                    error!(
                        order_id,
                        symbol = %position.symbol,
                        quantity = position.quantity,
                        "emergency liquidation order placed"
                    );
                }
                Err(e) => {
                    error!(symbol = %position.symbol, error = %e, "emergency liquidation failed");
                }
            }
        }
        error!("EMERGENCY LIQUIDATION COMPLETED");
    }
}

fn transient(e: &kt_broker::BrokerError) -> bool {
    matches!(
        e,
        kt_broker::BrokerError::Timeout | kt_broker::BrokerError::Connection { .. }
    ) || matches!(e, kt_broker::BrokerError::Transport(inner) if inner.is_timeout() || inner.is_connect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use kt_broker::{FillMode, MockBroker, MockConfig};
    use kt_risk::{RiskLimits, RiskManager};
    use rust_decimal_macros::dec;

    /// Strategy that never trades; engine paths are driven directly.
    struct Idle;
    impl Strategy for Idle {
        fn name(&self) -> &str {
            "idle"
        }
        fn params(&self) -> serde_json::Value {
            serde_json::Value::Null
        }
        fn on_bar(
            &mut self,
            _bars: &BarSeries<'_>,
            _positions: &[Position],
            _account: &Account,
        ) -> Vec<OrderIntent> {
            Vec::new()
        }
    }

    fn today() -> NaiveDate {
        kt_types::kst::today_kst()
    }

    fn engine_with(broker: Arc<MockBroker>) -> ExecutionEngine {
        // KRX active so routing always resolves.
        broker.market_status().update_jif("1", "21");
        let risk = RiskManager::new(RiskLimits::default(), dec!(10_000_000), today());
        ExecutionEngine::new(
            broker,
            Box::new(Idle),
            risk,
            Arc::new(crate::notify::LogNotifier),
            ExchangeClock::new(),
            EngineConfig::default(),
        )
    }

    fn tick(symbol: &str, price: Decimal) -> Tick {
        Tick {
            symbol: symbol.to_string(),
            price,
            volume: 10,
            timestamp: kt_types::kst::now_kst(),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_daily_cap_blocks_eleventh_signal() {
        let broker = Arc::new(MockBroker::with_defaults());
        broker.set_price("005930", dec!(70000));
        let mut engine = engine_with(Arc::clone(&broker));

        let account = broker.get_account().await.unwrap();
        // Sells avoid the duplicate-entry guard and the position cap.
        for _ in 0..11 {
            let intent = OrderIntent::market("005930", OrderSide::Sell, 1);
            engine
                .execute_signal(intent, &account, &[], Some(dec!(70000)))
                .await;
        }

        assert_eq!(broker.submissions().len(), 10);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fill_timeout_cancels_order() {
        let broker = Arc::new(MockBroker::new(MockConfig {
            fill_mode: FillMode::StayPending,
            ..Default::default()
        }));
        broker.set_price("005930", dec!(70000));
        let mut engine = engine_with(Arc::clone(&broker));

        let account = broker.get_account().await.unwrap();
        let intent = OrderIntent::market("005930", OrderSide::Sell, 1);
        engine
            .execute_signal(intent, &account, &[], Some(dec!(70000)))
            .await;

        assert_eq!(broker.submissions().len(), 1);
        let order_id = broker.submissions()[0].order_id.clone();
        assert_eq!(broker.cancelled_ids(), vec![order_id]);
        // No trade recorded: the order never filled.
        assert!(engine.risk.status().today_trade_counts.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_fill_event_unblocks_wait() {
        let broker = Arc::new(MockBroker::new(MockConfig {
            fill_mode: FillMode::StayPending,
            ..Default::default()
        }));
        broker.set_price("005930", dec!(70000));
        let mut engine = engine_with(Arc::clone(&broker));
        let notifier = engine.fill_notifier();

        // The mock assigns deterministic ids.
        let broker_bg = Arc::clone(&broker);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(2)).await;
            broker_bg.fill_order("M000001");
            notifier.notify_order_filled("M000001");
        });

        let account = broker.get_account().await.unwrap();
        let intent = OrderIntent::market("005930", OrderSide::Sell, 1);
        engine
            .execute_signal(intent, &account, &[], Some(dec!(70000)))
            .await;

        // Filled, never cancelled, trade recorded.
        assert!(broker.cancelled_ids().is_empty());
        assert_eq!(
            engine.risk.status().today_trade_counts.get("005930"),
            Some(&1)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_duplicate_buy_guard() {
        let broker = Arc::new(MockBroker::with_defaults());
        broker.set_price("005930", dec!(70000));
        let mut engine = engine_with(Arc::clone(&broker));

        let mut position = Position::new("005930");
        position.apply_buy(10, dec!(70000));

        let account = broker.get_account().await.unwrap();
        let intent = OrderIntent::market("005930", OrderSide::Buy, 5);
        engine
            .execute_signal(intent, &account, &[position], Some(dec!(70000)))
            .await;

        assert!(broker.submissions().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_router_null_drops_signal() {
        let broker = Arc::new(MockBroker::with_defaults());
        broker.set_price("005930", dec!(70000));
        // Both venues reporting inactive: routing must answer None.
        broker.market_status().update_jif("1", "11");
        broker.market_status().update_jif("6", "11");

        let risk = RiskManager::new(RiskLimits::default(), dec!(10_000_000), today());
        let mut engine = ExecutionEngine::new(
            Arc::clone(&broker) as Arc<dyn Broker>,
            Box::new(Idle),
            risk,
            Arc::new(crate::notify::LogNotifier),
            ExchangeClock::new(),
            EngineConfig::default(),
        );

        let account = broker.get_account().await.unwrap();
        let intent = OrderIntent::market("005930", OrderSide::Sell, 1);
        engine
            .execute_signal(intent, &account, &[], Some(dec!(70000)))
            .await;

        assert!(broker.submissions().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_emergency_liquidation_on_drawdown() {
        let broker = Arc::new(MockBroker::with_defaults());
        broker.set_price("005930", dec!(70000));
        broker.set_position("005930", 10, dec!(70000));
        let mut engine = engine_with(Arc::clone(&broker));

        // Equity runs 10M → 12M → 9.5M; the last mark is a 20.8% drawdown.
        broker.set_equity(dec!(10_000_000));
        engine.process_tick(tick("005930", dec!(70000))).await.unwrap();
        broker.set_equity(dec!(12_000_000));
        engine.process_tick(tick("005930", dec!(71000))).await.unwrap();
        broker.set_equity(dec!(9_500_000));
        engine.process_tick(tick("005930", dec!(66000))).await.unwrap();

        assert!(engine.risk.is_emergency_stopped());
        let sells: Vec<Order> = broker
            .submissions()
            .into_iter()
            .filter(|o| o.side == OrderSide::Sell)
            .collect();
        assert_eq!(sells.len(), 1);
        assert_eq!(sells[0].quantity, 10);
        assert_eq!(sells[0].symbol, "005930");
    }

    #[tokio::test(start_paused = true)]
    async fn test_fill_notifier_unknown_id_is_noop() {
        let broker = Arc::new(MockBroker::with_defaults());
        let engine = engine_with(broker);
        let notifier = engine.fill_notifier();
        assert!(!notifier.notify_order_filled("nope"));
    }
}
