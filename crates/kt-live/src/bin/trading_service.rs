//! Daily trading service.
//!
//! Wires the broker adapter, strategy registry, risk manager, execution
//! engine and scheduler together, then runs the cron loop until SIGINT or
//! SIGTERM asks for a graceful shutdown (engine → broker → scheduler).

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use async_trait::async_trait;
use chrono::Datelike;
use parking_lot::Mutex;
use rust_decimal::Decimal;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use kt_broker::{Broker, ExchangeClock, LsBroker};
use kt_live::{
    AppConfig, DailyReport, DailyScheduler, EngineConfig, EngineHandle, ExecutionEngine,
    JobKind, JobRunner, JobSchedule, LogNotifier, Notification, Notifier, UniverseSnapshot,
};
use kt_risk::RiskManager;
use kt_strategy::StrategyRegistry;
use kt_types::{Interval, OrderStatus};

struct TradingApp {
    config: AppConfig,
    broker: Arc<LsBroker>,
    notifier: Arc<dyn Notifier>,
    registry: StrategyRegistry,
    clock: ExchangeClock,
    engine_handle: Mutex<Option<EngineHandle>>,
    last_settlement_equity: Mutex<Option<Decimal>>,
}

impl TradingApp {
    fn new(config: AppConfig, broker: Arc<LsBroker>) -> Self {
        let clock = broker.clock();
        Self {
            config,
            broker,
            notifier: Arc::new(LogNotifier),
            registry: StrategyRegistry::default(),
            clock,
            engine_handle: Mutex::new(None),
            last_settlement_equity: Mutex::new(None),
        }
    }

    /// 08:10 — liquidity scan into the day's universe snapshot.
    async fn scan_universe(&self) -> anyhow::Result<()> {
        let trading = &self.config.trading;
        let ranked = self
            .broker
            .market
            .get_top_volume_stocks(trading.universe_size * 3)
            .await
            .context("ranked list fetch failed")?;

        let floor = Decimal::from(trading.min_traded_value);
        let symbols: Vec<String> = ranked
            .into_iter()
            .filter(|stock| stock.traded_value >= floor)
            .take(trading.universe_size)
            .map(|stock| stock.symbol)
            .collect();

        if symbols.is_empty() {
            warn!("universe scan produced no symbols");
        }

        let snapshot = UniverseSnapshot {
            date: self.clock.now().date(),
            symbols,
        };
        snapshot.save(&self.config.universe_file)?;

        self.notifier.notify(Notification::Info {
            title: "universe scan".into(),
            message: format!("{} symbols selected", snapshot.symbols.len()),
        });
        Ok(())
    }

    /// 08:30 — bring up the realtime engine with the saved universe.
    async fn start_engine(&self) -> anyhow::Result<()> {
        if let Some(handle) = self.engine_handle.lock().as_ref() {
            if handle.is_running() {
                warn!("engine already running, skipping start");
                return Ok(());
            }
        }

        let today = self.clock.now().date();
        let symbols = UniverseSnapshot::load_for(&self.config.universe_file, today)
            .map(|snapshot| snapshot.symbols)
            .unwrap_or_else(|| self.config.trading.symbols.clone());
        if symbols.is_empty() {
            anyhow::bail!("no symbols to trade: empty universe and no fallback");
        }

        let strategy = self
            .registry
            .create(
                &self.config.trading.strategy,
                self.config.trading.strategy_params.clone(),
            )
            .map_err(|e| anyhow::anyhow!("strategy creation failed: {e}"))?;

        let account = self.broker.get_account().await?;
        let risk = RiskManager::new(self.config.risk.clone(), account.equity, today);

        let timeframe: Interval = self
            .config
            .trading
            .timeframe
            .parse()
            .map_err(|e| anyhow::anyhow!("bad timeframe: {e}"))?;
        let engine_config = EngineConfig {
            timeframe_secs: timeframe.seconds(),
            ..EngineConfig::default()
        };

        let mut engine = ExecutionEngine::new(
            Arc::clone(&self.broker) as Arc<dyn Broker>,
            strategy,
            risk,
            Arc::clone(&self.notifier),
            self.clock.clone(),
            engine_config,
        );
        *self.engine_handle.lock() = Some(engine.handle());

        tokio::spawn(async move {
            if let Err(e) = engine.start(symbols).await {
                error!(error = %e, "execution engine terminated abnormally");
            }
        });
        Ok(())
    }

    /// 15:30 — settle the day against the venue's own numbers.
    async fn settle(&self) -> anyhow::Result<()> {
        let account = self.broker.get_account().await?;
        let positions = self.broker.get_positions().await?;

        // The venue order history is the source of truth for today's fills.
        let today = self.clock.now().date();
        let mut trade_counts: HashMap<String, u32> = HashMap::new();
        match self.broker.get_orders().await {
            Ok(orders) => {
                for order in orders {
                    if order.status == OrderStatus::Filled && order.created_at.date() == today {
                        *trade_counts.entry(order.symbol).or_insert(0) += 1;
                    }
                }
            }
            Err(e) => warn!(error = %e, "order history unavailable for the report"),
        }

        let previous = self
            .last_settlement_equity
            .lock()
            .replace(account.equity)
            .unwrap_or(account.equity);

        let report = DailyReport {
            date: today,
            previous_equity: previous,
            current_equity: account.equity,
            positions,
            trade_counts,
        };
        let path = report.save(&self.config.reports_dir)?;

        self.notifier.notify(Notification::DailyReport {
            path: path.display().to_string(),
            daily_return: report.daily_return(),
        });
        Ok(())
    }

    fn stop_engine(&self) {
        if let Some(handle) = self.engine_handle.lock().take() {
            info!("stopping execution engine");
            handle.stop();
        }
    }
}

#[async_trait]
impl JobRunner for TradingApp {
    async fn run_job(&self, kind: JobKind) {
        let result = match kind {
            JobKind::UniverseScan => self.scan_universe().await,
            JobKind::EngineStart => self.start_engine().await,
            JobKind::MarketOpenNotice => {
                self.notifier.notify(Notification::Info {
                    title: "market open".into(),
                    message: format!(
                        "KRX regular session open ({})",
                        self.clock.now().weekday()
                    ),
                });
                Ok(())
            }
            JobKind::Settlement => self.settle().await,
        };

        if let Err(e) = result {
            error!(?kind, error = %e, "scheduled job failed");
            self.notifier.notify(Notification::Error {
                message: format!("job {kind:?} failed: {e}"),
            });
        }
    }
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        let mut sigterm =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                .expect("SIGTERM handler");
        tokio::select! {
            _ = ctrl_c => {}
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        let _ = ctrl_c.await;
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let config_path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("config.toml"));
    let config = AppConfig::load(&config_path)
        .with_context(|| format!("loading {}", config_path.display()))?;
    info!(config = %config_path.display(), "configuration loaded");

    let broker = Arc::new(LsBroker::new(config.broker.clone()).context("broker construction")?);
    broker.connect().await.context("broker connect")?;
    if let Err(e) = broker.sync_clock_from_server().await {
        warn!(error = %e, "initial server-time sync failed");
    }

    let app = Arc::new(TradingApp::new(config, Arc::clone(&broker)));
    let scheduler = DailyScheduler::new(JobSchedule::default(), broker.clock());
    let scheduler_handle = scheduler.handle();

    info!("trading service up");
    tokio::select! {
        _ = scheduler.run(Arc::clone(&app) as Arc<dyn JobRunner>) => {
            warn!("scheduler loop ended");
        }
        _ = shutdown_signal() => {
            info!("shutdown signal received");
        }
    }

    // Graceful teardown: engine → broker → scheduler → final notice.
    app.stop_engine();
    if let Err(e) = broker.disconnect().await {
        warn!(error = %e, "broker disconnect failed");
    }
    scheduler_handle.stop();
    app.notifier.notify(Notification::Info {
        title: "shutdown".into(),
        message: "trading service stopped".into(),
    });
    info!("trading service stopped");
    Ok(())
}
