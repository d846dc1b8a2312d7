//! Authenticated REST transport.
//!
//! Every outbound call fetches a valid token from the store and carries the
//! venue's TR protocol headers. A payload `rsp_cd` other than `"00000"` is a
//! failure even under HTTP 200. Idempotent reads go through
//! [`LsClient::request_retry`]; order submission does its own retry loop in
//! the account service.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tracing::{debug, warn};

use crate::error::{BrokerError, BrokerResult};
use crate::oauth::TokenStore;

/// Venue success code.
const RSP_CD_OK: &str = "00000";
/// REST request timeout.
const REQUEST_TIMEOUT_SECS: u64 = 30;
/// Attempts for idempotent reads.
const READ_RETRIES: u32 = 3;
/// Fixed backoff between read retries.
const READ_BACKOFF: Duration = Duration::from_millis(500);

/// REST transport bound to one base URL and token store.
pub struct LsClient {
    http: reqwest::Client,
    base_url: String,
    tokens: Arc<TokenStore>,
}

impl LsClient {
    pub fn new(base_url: impl Into<String>, tokens: Arc<TokenStore>) -> BrokerResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()?;
        Ok(Self {
            http,
            base_url: base_url.into(),
            tokens,
        })
    }

    /// Single POST carrying the TR headers. `tr_cont` marks a continuation
    /// request in a paging loop.
    pub async fn request(
        &self,
        tr_cd: &str,
        endpoint: &str,
        body: Value,
        tr_cont: bool,
    ) -> BrokerResult<Value> {
        let token = self.tokens.get_valid_token().await?;
        let url = format!("{}{}", self.base_url, endpoint);

        debug!(tr_cd, endpoint, "rest request");

        let response = self
            .http
            .post(&url)
            .header("content-type", "application/json; charset=utf-8")
            .header("authorization", format!("Bearer {token}"))
            .header("tr_cd", tr_cd)
            .header("tr_cont", if tr_cont { "Y" } else { "N" })
            .header("tr_cont_key", "")
            .header("mac_address", "")
            .header("custtype", "P")
            .json(&body)
            .send()
            .await
            .map_err(classify_send_error)?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(BrokerError::Venue {
                code: status.as_str().to_string(),
                message: truncate(&text, 300),
            });
        }

        let payload: Value = response.json().await.map_err(|e| BrokerError::Parse {
            message: e.to_string(),
        })?;

        check_venue_code(&payload)?;
        Ok(payload)
    }

    /// Bounded-retry wrapper for idempotent reads: up to three attempts with
    /// a fixed half-second backoff over retryable failures.
    pub async fn request_retry(
        &self,
        tr_cd: &str,
        endpoint: &str,
        body: Value,
    ) -> BrokerResult<Value> {
        let mut last_err = None;
        for attempt in 1..=READ_RETRIES {
            match self.request(tr_cd, endpoint, body.clone(), false).await {
                Ok(payload) => return Ok(payload),
                Err(e) if e.is_retryable() && attempt < READ_RETRIES => {
                    warn!(tr_cd, attempt, error = %e, "read failed, retrying");
                    tokio::time::sleep(READ_BACKOFF).await;
                    last_err = Some(e);
                }
                Err(e) => return Err(e),
            }
        }
        Err(last_err.unwrap_or(BrokerError::Internal {
            message: "retry loop exhausted without an error".into(),
        }))
    }
}

fn classify_send_error(e: reqwest::Error) -> BrokerError {
    if e.is_timeout() {
        BrokerError::Timeout
    } else if e.is_connect() {
        BrokerError::Connection {
            message: e.to_string(),
        }
    } else {
        BrokerError::Transport(e)
    }
}

/// Venue payloads carry `rsp_cd`/`rsp_msg` even on HTTP 200.
fn check_venue_code(payload: &Value) -> BrokerResult<()> {
    let Some(code) = payload.get("rsp_cd").and_then(Value::as_str) else {
        return Ok(());
    };
    if code.is_empty() || code == RSP_CD_OK {
        return Ok(());
    }
    let message = payload
        .get("rsp_msg")
        .and_then(Value::as_str)
        .unwrap_or("unknown venue error")
        .to_string();
    Err(BrokerError::Venue {
        code: code.to_string(),
        message,
    })
}

fn truncate(text: &str, limit: usize) -> String {
    if text.len() <= limit {
        text.to_string()
    } else {
        let mut end = limit;
        while !text.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}…", &text[..end])
    }
}

// -- venue payload field helpers (values arrive as strings or numbers) ------

pub(crate) fn field_str(value: &Value, key: &str) -> String {
    match value.get(key) {
        Some(Value::String(s)) => s.trim().to_string(),
        Some(Value::Number(n)) => n.to_string(),
        _ => String::new(),
    }
}

pub(crate) fn field_decimal(value: &Value, key: &str) -> rust_decimal::Decimal {
    use std::str::FromStr;
    match value.get(key) {
        Some(Value::String(s)) => {
            rust_decimal::Decimal::from_str(s.trim()).unwrap_or_default()
        }
        Some(Value::Number(n)) => {
            rust_decimal::Decimal::from_str(&n.to_string()).unwrap_or_default()
        }
        _ => rust_decimal::Decimal::ZERO,
    }
}

pub(crate) fn field_i64(value: &Value, key: &str) -> i64 {
    match value.get(key) {
        Some(Value::String(s)) => s.trim().parse().unwrap_or(0),
        Some(Value::Number(n)) => n.as_i64().unwrap_or(0),
        _ => 0,
    }
}
