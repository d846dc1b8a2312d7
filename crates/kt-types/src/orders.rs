use chrono::NaiveDateTime;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

use crate::errors::{KtError, KtResult};

/// Direction of an order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderSide {
    Buy,
    Sell,
}

impl OrderSide {
    pub fn opposite(&self) -> OrderSide {
        match self {
            OrderSide::Buy => OrderSide::Sell,
            OrderSide::Sell => OrderSide::Buy,
        }
    }
}

/// Order types supported by the platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderType {
    Market,
    Limit,
    Stop,
    StopLimit,
}

/// Order lifecycle status. Transitions are one-way toward a terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    Pending,
    Submitted,
    PartialFilled,
    Filled,
    Cancelled,
    Rejected,
}

impl OrderStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OrderStatus::Filled | OrderStatus::Cancelled | OrderStatus::Rejected
        )
    }

    /// Rank in the one-way lifecycle; a transition may never decrease it.
    fn rank(&self) -> u8 {
        match self {
            OrderStatus::Pending => 0,
            OrderStatus::Submitted => 1,
            OrderStatus::PartialFilled => 2,
            OrderStatus::Filled | OrderStatus::Cancelled | OrderStatus::Rejected => 3,
        }
    }
}

/// An order as tracked by the platform.
///
/// `metadata` carries venue-specific tags; the market router stores the
/// routing decision under `"mbr_no"` (`"KRX"` or `"NXT"`) before submit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub order_id: String,
    pub symbol: String,
    pub side: OrderSide,
    pub order_type: OrderType,
    pub quantity: i64,
    pub price: Option<Decimal>,
    pub filled_quantity: i64,
    pub status: OrderStatus,
    pub created_at: NaiveDateTime,
    pub updated_at: Option<NaiveDateTime>,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

pub const MBR_NO_KEY: &str = "mbr_no";

/// Fresh client-side order id. The prefix tags the origin (`"RT"` realtime
/// signals, `"EMG"` emergency liquidation); a venue that deduplicates by
/// client id sees retried submissions of the same signal as one order.
pub fn new_client_order_id(prefix: &str) -> String {
    format!("{prefix}-{}", Uuid::new_v4())
}

impl Order {
    pub fn new(
        order_id: impl Into<String>,
        symbol: impl Into<String>,
        side: OrderSide,
        order_type: OrderType,
        quantity: i64,
        price: Option<Decimal>,
        created_at: NaiveDateTime,
    ) -> Self {
        Self {
            order_id: order_id.into(),
            symbol: symbol.into(),
            side,
            order_type,
            quantity,
            price,
            filled_quantity: 0,
            status: OrderStatus::Pending,
            created_at,
            updated_at: None,
            metadata: HashMap::new(),
        }
    }

    pub fn is_active(&self) -> bool {
        !self.status.is_terminal()
    }

    pub fn is_filled(&self) -> bool {
        self.status == OrderStatus::Filled
    }

    /// Venue routing tag stored by the market router.
    pub fn mbr_no(&self) -> Option<&str> {
        self.metadata.get(MBR_NO_KEY).map(String::as_str)
    }

    pub fn set_mbr_no(&mut self, market: crate::market::Market) {
        self.metadata
            .insert(MBR_NO_KEY.to_string(), market.as_str().to_string());
    }

    /// Move the order one-way along its lifecycle. Backward transitions and
    /// transitions out of a terminal state are rejected.
    pub fn transition_to(&mut self, status: OrderStatus, at: NaiveDateTime) -> KtResult<()> {
        if self.status.is_terminal() {
            return Err(KtError::Validation(format!(
                "order {} already terminal ({:?})",
                self.order_id, self.status
            )));
        }
        if status.rank() < self.status.rank() {
            return Err(KtError::Validation(format!(
                "order {} cannot move {:?} -> {:?}",
                self.order_id, self.status, status
            )));
        }
        self.status = status;
        self.updated_at = Some(at);
        Ok(())
    }
}

/// Immutable fill record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trade {
    pub trade_id: String,
    pub order_id: String,
    pub symbol: String,
    pub side: OrderSide,
    pub quantity: i64,
    pub price: Decimal,
    pub commission: Decimal,
    pub timestamp: NaiveDateTime,
}

impl Trade {
    /// Signed P&L contribution of a closing trade at `entry` average price.
    pub fn pnl_against(&self, entry: Decimal) -> Decimal {
        let diff = match self.side {
            OrderSide::Sell => self.price - entry,
            OrderSide::Buy => entry - self.price,
        };
        diff * Decimal::from(self.quantity) - self.commission
    }
}

/// What a strategy emits: an intent, not yet an order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderIntent {
    pub symbol: String,
    pub side: OrderSide,
    pub quantity: i64,
    pub order_type: OrderType,
    pub price: Option<Decimal>,
    pub stop_loss: Option<Decimal>,
    pub take_profit: Option<Decimal>,
}

impl OrderIntent {
    pub fn market(symbol: impl Into<String>, side: OrderSide, quantity: i64) -> Self {
        Self {
            symbol: symbol.into(),
            side,
            quantity,
            order_type: OrderType::Market,
            price: None,
            stop_loss: None,
            take_profit: None,
        }
    }

    pub fn limit(
        symbol: impl Into<String>,
        side: OrderSide,
        quantity: i64,
        price: Decimal,
    ) -> Self {
        Self {
            symbol: symbol.into(),
            side,
            quantity,
            order_type: OrderType::Limit,
            price: Some(price),
            stop_loss: None,
            take_profit: None,
        }
    }

    /// Materialize the intent into an order with a client-side id.
    pub fn into_order(self, order_id: impl Into<String>, at: NaiveDateTime) -> Order {
        Order::new(
            order_id,
            self.symbol,
            self.side,
            self.order_type,
            self.quantity,
            self.price,
            at,
        )
    }
}
