//! Realtime feed over the venue WebSocket.
//!
//! One connection per engine run. On connect the feed authorizes with the
//! bearer token, subscribes the whole-market JIF channel and then one S3_
//! trade channel per symbol (≥ 100 ms between subscribe frames). The receive
//! loop pings after 30 s of silence and tears down when the ping fails;
//! reconnection is the caller's decision. Closing a [`TickStream`] shuts the
//! socket down cleanly.

use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::sync::{mpsc, Notify};
use tokio::task::JoinHandle;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

use kt_types::kst::today_kst;
use kt_types::Tick;

use crate::endpoints;
use crate::error::{BrokerError, BrokerResult};
use crate::market::tick_from_s3;
use crate::market_status::MarketStatusTracker;

/// Receive timeout before a keep-alive ping.
const RECV_TIMEOUT: Duration = Duration::from_secs(30);
/// Pacing between subscribe frames.
const SUBSCRIBE_PACING: Duration = Duration::from_millis(100);
/// Tick channel depth; the engine consumes far faster than the venue emits.
const CHANNEL_CAPACITY: usize = 1024;

/// Lazy, cancellable sequence of trade ticks.
///
/// Per-symbol ordering is FIFO (a single feed task writes the channel);
/// cross-symbol ordering is whatever the venue interleaves.
pub struct TickStream {
    rx: mpsc::Receiver<Tick>,
    shutdown: Arc<Notify>,
    handle: Option<JoinHandle<()>>,
}

impl TickStream {
    pub fn from_parts(
        rx: mpsc::Receiver<Tick>,
        shutdown: Arc<Notify>,
        handle: Option<JoinHandle<()>>,
    ) -> Self {
        Self {
            rx,
            shutdown,
            handle,
        }
    }

    /// Next tick; `None` once the feed has terminated.
    pub async fn next(&mut self) -> Option<Tick> {
        self.rx.recv().await
    }

    /// Ask the feed to close its socket and end the sequence.
    pub fn close(&self) {
        self.shutdown.notify_waiters();
    }
}

impl Drop for TickStream {
    fn drop(&mut self) {
        self.shutdown.notify_waiters();
        if let Some(handle) = self.handle.take() {
            // The task exits on its own after the notify; nothing to join on
            // in a sync drop.
            drop(handle);
        }
    }
}

/// WebSocket feed factory bound to one set of credentials.
pub struct RealtimeFeed {
    access_token: String,
    appkey: String,
    paper_trading: bool,
    status: Arc<MarketStatusTracker>,
}

impl RealtimeFeed {
    pub fn new(
        access_token: impl Into<String>,
        appkey: impl Into<String>,
        paper_trading: bool,
        status: Arc<MarketStatusTracker>,
    ) -> Self {
        Self {
            access_token: access_token.into(),
            appkey: appkey.into(),
            paper_trading,
            status,
        }
    }

    /// Connect, subscribe and spawn the receive loop.
    pub fn spawn(self, symbols: Vec<String>) -> TickStream {
        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
        let shutdown = Arc::new(Notify::new());
        let shutdown_task = Arc::clone(&shutdown);

        let handle = tokio::spawn(async move {
            if let Err(e) = self.run(symbols, tx, shutdown_task).await {
                warn!(error = %e, "realtime feed terminated");
            }
        });

        TickStream::from_parts(rx, shutdown, Some(handle))
    }

    async fn run(
        self,
        symbols: Vec<String>,
        tx: mpsc::Sender<Tick>,
        shutdown: Arc<Notify>,
    ) -> BrokerResult<()> {
        let url = endpoints::wss_url(self.paper_trading);
        info!(url, symbols = symbols.len(), "connecting realtime feed");

        let mut request = url
            .into_client_request()
            .map_err(|e| BrokerError::WebSocket {
                message: e.to_string(),
            })?;
        let headers = request.headers_mut();
        let bearer = format!("Bearer {}", self.access_token);
        for (name, value) in [
            ("authorization", bearer.as_str()),
            ("appkey", self.appkey.as_str()),
            ("custtype", "P"),
        ] {
            headers.insert(
                name,
                value.parse().map_err(|_| BrokerError::WebSocket {
                    message: format!("bad header value for {name}"),
                })?,
            );
        }

        let (ws, _) = connect_async(request)
            .await
            .map_err(|e| BrokerError::WebSocket {
                message: e.to_string(),
            })?;
        let (mut write, mut read) = ws.split();
        info!("realtime feed connected");

        // Whole-market session state first, then the per-symbol trade
        // channels with pacing.
        let jif = json!({
            "header": { "token": self.access_token, "tr_type": "3" },
            "body": { "tr_cd": "JIF", "tr_key": "" }
        });
        write
            .send(Message::Text(jif.to_string()))
            .await
            .map_err(|e| BrokerError::WebSocket {
                message: e.to_string(),
            })?;
        tokio::time::sleep(SUBSCRIBE_PACING).await;

        for symbol in &symbols {
            let subscribe = json!({
                "header": { "token": self.access_token, "tr_type": "1", "custtype": "P" },
                "body": { "input": { "tr_id": "S3_", "tr_key": symbol } }
            });
            write
                .send(Message::Text(subscribe.to_string()))
                .await
                .map_err(|e| BrokerError::WebSocket {
                    message: e.to_string(),
                })?;
            debug!(symbol, "subscribed S3_");
            tokio::time::sleep(SUBSCRIBE_PACING).await;
        }
        info!(count = symbols.len(), "subscriptions sent");

        loop {
            let received = tokio::select! {
                _ = shutdown.notified() => {
                    info!("realtime feed cancelled");
                    let _ = write.send(Message::Close(None)).await;
                    break;
                }
                received = tokio::time::timeout(RECV_TIMEOUT, read.next()) => received,
            };

            match received {
                Err(_elapsed) => {
                    // Silence: keep the connection alive, or give up if even
                    // the ping cannot be written.
                    if let Err(e) = write.send(Message::Ping(Vec::new())).await {
                        warn!(error = %e, "ping failed, closing feed");
                        break;
                    }
                    debug!("ping sent after recv timeout");
                }
                Ok(None) => {
                    warn!("websocket closed by remote");
                    break;
                }
                Ok(Some(Err(e))) => {
                    warn!(error = %e, "websocket receive error");
                    break;
                }
                Ok(Some(Ok(message))) => {
                    let text = match message {
                        Message::Text(text) => text,
                        Message::Binary(bytes) => match String::from_utf8(bytes) {
                            Ok(text) => text,
                            Err(_) => {
                                debug!("skipping undecodable binary frame");
                                continue;
                            }
                        },
                        Message::Ping(payload) => {
                            let _ = write.send(Message::Pong(payload)).await;
                            continue;
                        }
                        Message::Close(_) => {
                            warn!("close frame received");
                            break;
                        }
                        _ => continue,
                    };

                    if let Some(tick) = handle_frame(&text, &self.status) {
                        if tx.send(tick).await.is_err() {
                            // Consumer dropped the stream.
                            break;
                        }
                    }
                }
            }
        }

        Ok(())
    }
}

/// Parse one frame. JIF frames update the tracker and yield nothing; S3_
/// frames yield a tick; anything else (including non-JSON) is skipped.
pub(crate) fn handle_frame(text: &str, status: &MarketStatusTracker) -> Option<Tick> {
    let data: Value = match serde_json::from_str(text) {
        Ok(data) => data,
        Err(_) => {
            debug!("skipping non-JSON frame");
            return None;
        }
    };

    let tr_cd = data["header"]["tr_cd"].as_str().unwrap_or_default();
    match tr_cd {
        "JIF" => {
            let body = &data["body"];
            let jangubun = body["jangubun"].as_str().unwrap_or_default();
            let jstatus = body["jstatus"].as_str().unwrap_or_default();
            if !jangubun.is_empty() && !jstatus.is_empty() {
                status.update_jif(jangubun, jstatus);
            }
            None
        }
        "S3_" => tick_from_s3(&data["body"]["output"], today_kst()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kt_types::Market;
    use rust_decimal_macros::dec;

    #[test]
    fn test_jif_frame_updates_tracker_and_yields_nothing() {
        let tracker = MarketStatusTracker::new();
        let frame = json!({
            "header": { "tr_cd": "JIF" },
            "body": { "jangubun": "1", "jstatus": "21" }
        })
        .to_string();

        assert!(handle_frame(&frame, &tracker).is_none());
        assert!(tracker.is_market_active(Market::Krx));
    }

    #[test]
    fn test_s3_frame_yields_tick() {
        let tracker = MarketStatusTracker::new();
        let frame = json!({
            "header": { "tr_cd": "S3_", "tr_key": "005930" },
            "body": { "output": {
                "MKSC_SHRN_ISCD": "005930",
                "STCK_PRPR": "70000",
                "CNTG_VOL": "55",
                "STCK_CNTG_HOUR": "101530"
            }}
        })
        .to_string();

        let tick = handle_frame(&frame, &tracker).unwrap();
        assert_eq!(tick.symbol, "005930");
        assert_eq!(tick.price, dec!(70000));
        assert_eq!(tick.volume, 55);
    }

    #[test]
    fn test_non_json_and_unknown_frames_skipped() {
        let tracker = MarketStatusTracker::new();
        assert!(handle_frame("BINARYGARBAGE", &tracker).is_none());
        let unknown = json!({"header": {"tr_cd": "H1_"}, "body": {}}).to_string();
        assert!(handle_frame(&unknown, &tracker).is_none());
    }

    #[tokio::test]
    async fn test_tick_stream_ends_when_sender_dropped() {
        let (tx, rx) = mpsc::channel(4);
        let mut stream = TickStream::from_parts(rx, Arc::new(Notify::new()), None);

        let tick = Tick {
            symbol: "005930".into(),
            price: dec!(70000),
            volume: 1,
            timestamp: kt_types::kst::now_kst(),
        };
        tx.send(tick.clone()).await.unwrap();
        drop(tx);

        assert_eq!(stream.next().await.unwrap().symbol, "005930");
        assert!(stream.next().await.is_none());
    }
}
