//! Notification seam.
//!
//! External transports (messaging bots, chat webhooks) live outside this
//! workspace; the engine and scheduler only speak to this trait. The default
//! implementation routes everything through structured logs.

use rust_decimal::Decimal;
use tracing::{error, info, warn};

/// Events worth telling the operator about.
#[derive(Debug, Clone)]
pub enum Notification {
    StrategyStarted {
        strategy: String,
        symbols: Vec<String>,
    },
    StrategyStopped {
        strategy: String,
        reason: String,
    },
    OrderFilled {
        order_id: String,
        symbol: String,
        side: String,
        quantity: i64,
        price: Decimal,
    },
    RiskLimit {
        kind: String,
        current: Decimal,
        limit: Decimal,
    },
    DailyReport {
        path: String,
        daily_return: Decimal,
    },
    Error {
        message: String,
    },
    Info {
        title: String,
        message: String,
    },
}

pub trait Notifier: Send + Sync {
    fn notify(&self, notification: Notification);
}

/// Log-backed notifier.
#[derive(Debug, Default)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&self, notification: Notification) {
        match notification {
            Notification::StrategyStarted { strategy, symbols } => {
                info!(strategy, symbols = symbols.len(), "strategy started");
            }
            Notification::StrategyStopped { strategy, reason } => {
                info!(strategy, reason, "strategy stopped");
            }
            Notification::OrderFilled {
                order_id,
                symbol,
                side,
                quantity,
                price,
            } => {
                info!(order_id, symbol, side, quantity, %price, "order filled");
            }
            Notification::RiskLimit {
                kind,
                current,
                limit,
            } => {
                warn!(kind, %current, %limit, "risk limit breached");
            }
            Notification::DailyReport { path, daily_return } => {
                info!(path, %daily_return, "daily report written");
            }
            Notification::Error { message } => {
                error!(message, "engine error");
            }
            Notification::Info { title, message } => {
                info!(title, message, "notice");
            }
        }
    }
}

/// Test notifier that records everything it sees.
#[derive(Debug, Default)]
pub struct RecordingNotifier {
    pub events: parking_lot::Mutex<Vec<Notification>>,
}

impl Notifier for RecordingNotifier {
    fn notify(&self, notification: Notification) {
        self.events.lock().push(notification);
    }
}
