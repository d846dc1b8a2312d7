//! Account and order service.
//!
//! `place_order` is validate → retry-submit → parse-id: client-side
//! validation failures never retry, while connection resets, timeouts,
//! venue error codes and a missing order id get up to three attempts with a
//! half-second backoff. The order id is extracted tolerantly across the
//! response shapes the venue has been seen to produce.

use std::sync::Arc;
use std::time::Duration;

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use kt_types::kst::now_kst;
use kt_types::{Account, Order, OrderSide, OrderStatus, OrderType, Position};

use crate::client::{field_decimal, field_i64, field_str, LsClient};
use crate::endpoints;
use crate::error::{BrokerError, BrokerResult};

/// Submit attempts for one order.
const SUBMIT_ATTEMPTS: u32 = 3;
/// Backoff between submit attempts.
const SUBMIT_BACKOFF: Duration = Duration::from_millis(500);
/// Upper sanity bound for a limit price in KRW.
const MAX_LIMIT_PRICE: i64 = 100_000_000;

/// Venue order-type codes.
const ORDPRC_LIMIT: &str = "00";
const ORDPRC_MARKET: &str = "03";
/// NXT-only midpoint peg.
const ORDPRC_MIDPOINT: &str = "12";

/// Metadata key requesting the midpoint order type.
pub const MIDPOINT_KEY: &str = "ordprc_ptn";

pub struct AccountOrderService {
    client: Arc<LsClient>,
    account_id: String,
    account_password: String,
}

impl AccountOrderService {
    pub fn new(
        client: Arc<LsClient>,
        account_id: impl Into<String>,
        account_password: impl Into<String>,
    ) -> Self {
        Self {
            client,
            account_id: account_id.into(),
            account_password: account_password.into(),
        }
    }

    fn clean_account(&self) -> String {
        self.account_id.replace('-', "")
    }

    // -- balance & positions ------------------------------------------------

    /// Balance snapshot (t0424).
    pub async fn get_account(&self) -> BrokerResult<Account> {
        let response = self.balance_request().await?;
        let output = &response["t0424OutBlock"];

        let balance = field_decimal(output, "mamt");
        let equity = field_decimal(output, "sunamt");
        let margin_available = field_decimal(output, "sunamt1");

        Ok(Account {
            account_id: self.account_id.clone(),
            balance,
            equity,
            margin_used: (equity - margin_available).max(Decimal::ZERO),
            margin_available,
        })
    }

    /// Open positions (t0424 detail rows).
    pub async fn get_positions(&self) -> BrokerResult<Vec<Position>> {
        let response = self.balance_request().await?;

        let mut positions = Vec::new();
        if let Some(items) = response["t0424OutBlock1"].as_array() {
            for item in items {
                let quantity = field_i64(item, "janqty");
                if quantity == 0 {
                    continue;
                }
                let mut position = Position::new(field_str(item, "expcode"));
                position.quantity = quantity;
                position.avg_price = field_decimal(item, "pamt");
                position.update_current_price(field_decimal(item, "price"));
                positions.push(position);
            }
        }
        Ok(positions)
    }

    async fn balance_request(&self) -> BrokerResult<Value> {
        self.client
            .request_retry(
                "t0424",
                endpoints::STOCK_ACCOUNT,
                json!({
                    "t0424InBlock": {
                        "accno": self.clean_account(),
                        "passwd": self.account_password,
                        "prcgb": "",
                        "chegb": "",
                        "dangb": "",
                        "charge": "",
                        "cts_expcode": ""
                    }
                }),
            )
            .await
    }

    // -- orders -------------------------------------------------------------

    /// Submit a spot order (CSPAT00601). Returns the venue order id.
    pub async fn place_order(&self, order: &Order) -> BrokerResult<String> {
        self.validate(order)?;

        let payload = self.order_payload(order)?;
        let mut last_err: Option<BrokerError> = None;

        for attempt in 1..=SUBMIT_ATTEMPTS {
            match self.submit_once(&payload).await {
                Ok(order_id) => {
                    info!(
                        order_id,
                        symbol = %order.symbol,
                        side = ?order.side,
                        quantity = order.quantity,
                        mbr_no = order.mbr_no().unwrap_or("KRX"),
                        "order placed"
                    );
                    return Ok(order_id);
                }
                Err(e) if e.is_retryable() && attempt < SUBMIT_ATTEMPTS => {
                    warn!(attempt, error = %e, symbol = %order.symbol, "submit failed, retrying");
                    tokio::time::sleep(SUBMIT_BACKOFF).await;
                    last_err = Some(e);
                }
                Err(e) => return Err(e),
            }
        }

        Err(last_err.unwrap_or(BrokerError::Internal {
            message: "submit loop exhausted without an error".into(),
        }))
    }

    /// Client-side validation; failures are terminal, never retried.
    fn validate(&self, order: &Order) -> BrokerResult<()> {
        if order.quantity <= 0 {
            return Err(BrokerError::InvalidOrder {
                message: format!("quantity {} must be positive", order.quantity),
            });
        }
        if order.order_type == OrderType::Limit {
            let Some(price) = order.price else {
                return Err(BrokerError::InvalidOrder {
                    message: "limit order without a price".into(),
                });
            };
            if price <= Decimal::ZERO {
                return Err(BrokerError::InvalidOrder {
                    message: format!("limit price {price} must be positive"),
                });
            }
            if price > Decimal::from(MAX_LIMIT_PRICE) {
                return Err(BrokerError::InvalidOrder {
                    message: format!("limit price {price} above sanity bound"),
                });
            }
        }
        Ok(())
    }

    fn order_payload(&self, order: &Order) -> BrokerResult<Value> {
        // The routing tag is decided upstream (market router) and carried in
        // metadata; it goes into the payload unchanged.
        let mbr_no = match order.mbr_no() {
            Some(tag) => tag.to_string(),
            None => {
                warn!(symbol = %order.symbol, "order without mbr_no, defaulting to KRX");
                "KRX".to_string()
            }
        };

        let ordprc_ptn = match order.order_type {
            OrderType::Market => ORDPRC_MARKET,
            _ => {
                // Midpoint is an alternative-venue order type; only honour
                // the request when the order routes to NXT.
                if order.metadata.get(MIDPOINT_KEY).map(String::as_str) == Some(ORDPRC_MIDPOINT) {
                    if mbr_no == "NXT" {
                        ORDPRC_MIDPOINT
                    } else {
                        warn!(symbol = %order.symbol, "midpoint requested off NXT, using limit");
                        ORDPRC_LIMIT
                    }
                } else {
                    ORDPRC_LIMIT
                }
            }
        };

        let price: i64 = match order.order_type {
            OrderType::Market => 0,
            _ => order
                .price
                .and_then(|p| p.to_i64())
                .unwrap_or(0),
        };

        Ok(json!({
            "CSPAT00601InBlock1": {
                "AcntNo": self.clean_account(),
                "InptPwd": self.account_password,
                "IsuNo": order.symbol,
                "OrdQty": order.quantity,
                "OrdPrc": price,
                "BnsTpCode": side_code(order.side),
                "OrdprcPtnCode": ordprc_ptn,
                "MgntrnCode": "000",
                "LoanDt": "",
                "OrdCndiTpCode": "0",
                "MbrNo": mbr_no
            }
        }))
    }

    async fn submit_once(&self, payload: &Value) -> BrokerResult<String> {
        let response = self
            .client
            .request("CSPAT00601", endpoints::STOCK_ORDER, payload.clone(), false)
            .await?;
        extract_order_id(&response, "CSPAT00601")
    }

    /// Modify quantity/price of a live order (CSPAT00701). Returns the new
    /// order id; success means the venue echoed a non-empty one.
    pub async fn modify_order(
        &self,
        order_id: &str,
        symbol: &str,
        quantity: i64,
        price: Decimal,
    ) -> BrokerResult<String> {
        info!(order_id, symbol, quantity, %price, "modifying order");

        let response = self
            .client
            .request(
                "CSPAT00701",
                endpoints::STOCK_ORDER,
                json!({
                    "CSPAT00701InBlock1": {
                        "OrgOrdNo": order_id,
                        "IsuNo": symbol,
                        "OrdQty": quantity,
                        "OrdprcPtnCode": ORDPRC_LIMIT,
                        "OrdCndiTpCode": "0",
                        "OrdPrc": price.to_i64().unwrap_or(0)
                    }
                }),
                false,
            )
            .await?;

        extract_order_id(&response, "CSPAT00701")
    }

    /// Cancel a live order (CSPAT00801).
    pub async fn cancel_order(
        &self,
        order_id: &str,
        symbol: &str,
        quantity: i64,
    ) -> BrokerResult<bool> {
        info!(order_id, symbol, quantity, "cancelling order");

        let response = self
            .client
            .request(
                "CSPAT00801",
                endpoints::STOCK_ORDER,
                json!({
                    "CSPAT00801InBlock1": {
                        "OrgOrdNo": order_id,
                        "IsuNo": symbol,
                        "OrdQty": quantity
                    }
                }),
                false,
            )
            .await?;

        let cancelled = extract_order_id(&response, "CSPAT00801").is_ok();
        info!(order_id, cancelled, "cancel result");
        Ok(cancelled)
    }

    /// Full order history for the lookback the venue serves (t0425),
    /// normalized into the unified status model.
    pub async fn get_orders(&self) -> BrokerResult<Vec<Order>> {
        self.orders_request("0").await
    }

    /// Only still-working orders (t0425 with the unexecuted filter).
    pub async fn get_open_orders(&self) -> BrokerResult<Vec<Order>> {
        let orders = self.orders_request("2").await?;
        Ok(orders.into_iter().filter(Order::is_active).collect())
    }

    async fn orders_request(&self, chegb: &str) -> BrokerResult<Vec<Order>> {
        let response = self
            .client
            .request_retry(
                "t0425",
                endpoints::STOCK_ACCOUNT,
                json!({
                    "t0425InBlock": {
                        "expcode": "",
                        "chegb": chegb,
                        "medosu": "0",
                        "sortgb": "1",
                        "cts_ordno": ""
                    }
                }),
            )
            .await?;

        let mut orders = Vec::new();
        if let Some(items) = response["t0425OutBlock1"].as_array() {
            for item in items {
                orders.push(parse_order_row(item));
            }
        }
        debug!(count = orders.len(), chegb, "orders fetched");
        Ok(orders)
    }
}

fn side_code(side: OrderSide) -> &'static str {
    match side {
        OrderSide::Sell => "1",
        OrderSide::Buy => "2",
    }
}

/// Tolerant order-id extraction.
///
/// The venue nests the id in `…OutBlock2` normally, but `…OutBlock1`,
/// `output` and `…OutBlock` shapes (sometimes list-wrapped) have all been
/// observed. Absence is retryable: the order may not have been accepted.
fn extract_order_id(response: &Value, tr: &str) -> BrokerResult<String> {
    let candidates = [
        format!("{tr}OutBlock2"),
        format!("{tr}OutBlock1"),
        "output".to_string(),
        format!("{tr}OutBlock"),
    ];

    for key in &candidates {
        let Some(mut block) = response.get(key) else {
            continue;
        };
        // List-wrapped singleton.
        if let Some(first) = block.as_array().and_then(|a| a.first()) {
            block = first;
        }
        for id_key in ["OrdNo", "ODNO", "ordno", "ORDNO", "odno"] {
            let id = field_str(block, id_key);
            if !id.is_empty() && id != "0" {
                return Ok(id);
            }
        }
    }

    warn!(tr, response = %response, "order id missing from response");
    Err(BrokerError::OrderIdMissing {
        excerpt: response.to_string().chars().take(200).collect(),
    })
}

/// Normalize a t0425 row into the unified `Order`.
///
/// Fill-count rules win over the venue's own status code: a fully-filled
/// order is FILLED whatever `ordgb` says, a partially-filled one is
/// PARTIAL_FILLED.
fn parse_order_row(item: &Value) -> Order {
    let quantity = field_i64(item, "ordqty");
    let filled = field_i64(item, "cheqty");
    let price = field_decimal(item, "ordprc");

    let side = if field_str(item, "medosu") == "2" {
        OrderSide::Buy
    } else {
        OrderSide::Sell
    };
    let order_type = if price > Decimal::ZERO {
        OrderType::Limit
    } else {
        OrderType::Market
    };

    let status = if filled >= quantity && filled > 0 {
        OrderStatus::Filled
    } else if filled > 0 {
        OrderStatus::PartialFilled
    } else {
        match field_str(item, "ordgb").as_str() {
            "2" => OrderStatus::Filled,
            "3" => OrderStatus::Cancelled,
            "4" => OrderStatus::Rejected,
            "1" => OrderStatus::Submitted,
            _ => OrderStatus::Pending,
        }
    };

    let mut order = Order::new(
        field_str(item, "ordno"),
        field_str(item, "expcode"),
        side,
        order_type,
        quantity,
        (price > Decimal::ZERO).then_some(price),
        now_kst(),
    );
    order.filled_quantity = filled;
    order.status = status;
    order
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use serde_json::json;

    fn limit_order(price: Decimal) -> Order {
        Order::new(
            "client-1",
            "005930",
            OrderSide::Buy,
            OrderType::Limit,
            10,
            Some(price),
            now_kst(),
        )
    }

    fn service() -> AccountOrderService {
        let tokens = Arc::new(
            crate::oauth::TokenStore::new("k", "s", std::env::temp_dir().join("kt_test_token.json"))
                .unwrap(),
        );
        let client = Arc::new(LsClient::new(endpoints::BASE_URL, tokens).unwrap());
        AccountOrderService::new(client, "555044505-01", "0000")
    }

    #[test]
    fn test_validation_rejects_bad_orders() {
        let svc = service();

        let mut zero_qty = limit_order(dec!(70000));
        zero_qty.quantity = 0;
        assert!(matches!(
            svc.validate(&zero_qty),
            Err(BrokerError::InvalidOrder { .. })
        ));

        let mut no_price = limit_order(dec!(70000));
        no_price.price = None;
        assert!(svc.validate(&no_price).is_err());

        let absurd = limit_order(dec!(100_000_001));
        assert!(svc.validate(&absurd).is_err());

        assert!(svc.validate(&limit_order(dec!(70000))).is_ok());
    }

    #[test]
    fn test_payload_carries_mbr_no_from_metadata() {
        let svc = service();
        let mut order = limit_order(dec!(70000));
        order.set_mbr_no(kt_types::Market::Nxt);

        let payload = svc.order_payload(&order).unwrap();
        let block = &payload["CSPAT00601InBlock1"];
        assert_eq!(block["MbrNo"], "NXT");
        assert_eq!(block["BnsTpCode"], "2");
        assert_eq!(block["OrdprcPtnCode"], "00");
        assert_eq!(block["OrdPrc"], 70000);
        assert_eq!(block["AcntNo"], "55504450501");
    }

    #[test]
    fn test_market_order_has_zero_price() {
        let svc = service();
        let mut order = limit_order(dec!(70000));
        order.order_type = OrderType::Market;
        order.set_mbr_no(kt_types::Market::Krx);

        let payload = svc.order_payload(&order).unwrap();
        let block = &payload["CSPAT00601InBlock1"];
        assert_eq!(block["OrdprcPtnCode"], "03");
        assert_eq!(block["OrdPrc"], 0);
    }

    #[test]
    fn test_midpoint_only_on_nxt() {
        let svc = service();

        let mut nxt = limit_order(dec!(70000));
        nxt.set_mbr_no(kt_types::Market::Nxt);
        nxt.metadata
            .insert(MIDPOINT_KEY.to_string(), ORDPRC_MIDPOINT.to_string());
        let payload = svc.order_payload(&nxt).unwrap();
        assert_eq!(payload["CSPAT00601InBlock1"]["OrdprcPtnCode"], "12");

        let mut krx = limit_order(dec!(70000));
        krx.set_mbr_no(kt_types::Market::Krx);
        krx.metadata
            .insert(MIDPOINT_KEY.to_string(), ORDPRC_MIDPOINT.to_string());
        let payload = svc.order_payload(&krx).unwrap();
        assert_eq!(payload["CSPAT00601InBlock1"]["OrdprcPtnCode"], "00");
    }

    #[test]
    fn test_order_id_extraction_shapes() {
        let tr = "CSPAT00601";

        let nested = json!({"CSPAT00601OutBlock2": {"OrdNo": "12345"}});
        assert_eq!(extract_order_id(&nested, tr).unwrap(), "12345");

        let list_wrapped = json!({"CSPAT00601OutBlock1": [{"ordno": "67890"}]});
        assert_eq!(extract_order_id(&list_wrapped, tr).unwrap(), "67890");

        let generic = json!({"output": {"ODNO": "11111"}});
        assert_eq!(extract_order_id(&generic, tr).unwrap(), "11111");

        let missing = json!({"rsp_cd": "00000", "rsp_msg": "ok"});
        let err = extract_order_id(&missing, tr).unwrap_err();
        assert!(err.is_retryable());
    }

    #[test]
    fn test_order_row_status_normalization() {
        // Fully filled beats the venue code.
        let filled = parse_order_row(&json!({
            "ordno": "1", "expcode": "005930", "medosu": "2",
            "ordqty": 10, "cheqty": 10, "ordprc": 70000, "ordgb": "1"
        }));
        assert_eq!(filled.status, OrderStatus::Filled);

        let partial = parse_order_row(&json!({
            "ordno": "2", "expcode": "005930", "medosu": "2",
            "ordqty": 10, "cheqty": 4, "ordprc": 70000, "ordgb": "1"
        }));
        assert_eq!(partial.status, OrderStatus::PartialFilled);
        assert_eq!(partial.filled_quantity, 4);

        let cancelled = parse_order_row(&json!({
            "ordno": "3", "expcode": "005930", "medosu": "1",
            "ordqty": 10, "cheqty": 0, "ordprc": 0, "ordgb": "3"
        }));
        assert_eq!(cancelled.status, OrderStatus::Cancelled);
        assert_eq!(cancelled.side, OrderSide::Sell);
        assert_eq!(cancelled.order_type, OrderType::Market);
    }
}
