//! Orderbook Streamer — spec §4.E.
//!
//! One persistent WebSocket connection carrying Level-2 orderbook updates for
//! a fixed set of tickers. Reconnects on any drop with the teacher's
//! backoff-ladder pattern; the vendor's own client never pings, so neither do
//! we — we only answer pings the server sends.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use chrono::{DateTime, FixedOffset};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::Notify;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::header::{COOKIE, ORIGIN, USER_AGENT};
use tokio_tungstenite::tungstenite::protocol::WebSocketConfig;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::connect_async_with_config;
use tracing::{debug, error, info, warn};

use crate::clock::now_wib;
use crate::codec::{decode_message, encode_subscription, parse_orderbook_text};
use crate::config::{HEARTBEAT_INTERVAL_SECS, MAX_WS_FRAME_BYTES, RECONNECT_BACKOFF_MS, WS_ORIGIN, WS_USER_AGENT};
use crate::csv_sink::{OrderbookCsvSink, OrderbookRow};
use crate::error::{AppError, Result};
use crate::token::TokenStore;

#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionStatus {
    Connecting,
    Connected,
    Retrying(u32),
    Error(String),
    Stopped,
    Disconnected,
}

#[derive(Debug, Clone)]
pub struct StreamerStats {
    pub status: ConnectionStatus,
    pub tickers: Vec<String>,
    pub message_counts: HashMap<String, u64>,
    pub last_update: HashMap<String, DateTime<FixedOffset>>,
    pub connected_at: Option<DateTime<FixedOffset>>,
    pub reconnect_count: u64,
}

struct SharedStats {
    status: ConnectionStatus,
    message_counts: HashMap<String, u64>,
    last_update: HashMap<String, DateTime<FixedOffset>>,
    connected_at: Option<DateTime<FixedOffset>>,
    reconnect_count: u64,
}

pub struct OrderbookStreamer {
    ws_url: String,
    key_url: String,
    token: Arc<TokenStore>,
    http_client: reqwest::Client,
    tickers: Vec<String>,
    sink: Arc<OrderbookCsvSink>,
    stats: Mutex<SharedStats>,
    running: AtomicBool,
    stop_notify: Notify,
    heartbeat_notify: Notify,
    last_activity: Mutex<Instant>,
}

impl OrderbookStreamer {
    pub fn new(
        ws_url: String,
        key_url: String,
        token: Arc<TokenStore>,
        http_client: reqwest::Client,
        tickers: Vec<String>,
        sink: Arc<OrderbookCsvSink>,
    ) -> Self {
        Self {
            ws_url,
            key_url,
            token,
            http_client,
            tickers,
            sink,
            stats: Mutex::new(SharedStats {
                status: ConnectionStatus::Disconnected,
                message_counts: HashMap::new(),
                last_update: HashMap::new(),
                connected_at: None,
                reconnect_count: 0,
            }),
            running: AtomicBool::new(false),
            stop_notify: Notify::new(),
            heartbeat_notify: Notify::new(),
            last_activity: Mutex::new(Instant::now()),
        }
    }

    pub fn stats(&self) -> StreamerStats {
        let s = self.stats.lock().expect("streamer stats mutex poisoned");
        StreamerStats {
            status: s.status.clone(),
            tickers: self.tickers.clone(),
            message_counts: s.message_counts.clone(),
            last_update: s.last_update.clone(),
            connected_at: s.connected_at,
            reconnect_count: s.reconnect_count,
        }
    }

    fn set_status(&self, status: ConnectionStatus) {
        self.stats.lock().expect("streamer stats mutex poisoned").status = status;
    }

    /// Runs the reconnect loop until `stop()` is called. Returns once the
    /// connection has been torn down and all CSV handles flushed.
    pub async fn run(self: Arc<Self>) {
        self.running.store(true, Ordering::SeqCst);
        let mut backoff_idx = 0usize;
        let mut halted_for_auth = false;

        let heartbeat_handle = {
            let streamer = self.clone();
            tokio::spawn(async move { streamer.heartbeat_monitor().await })
        };

        while self.running.load(Ordering::SeqCst) {
            self.set_status(ConnectionStatus::Connecting);
            info!(tickers = ?self.tickers, "connecting orderbook stream");

            match self.connect_once().await {
                Ok(()) => {
                    info!("orderbook stream closed cleanly");
                    backoff_idx = 0;
                }
                Err(AppError::AuthInvalid(reason)) => {
                    // Unlike every other error here, an invalid token won't heal
                    // on its own — retrying just spins against the same 401.
                    // Halt until the Supervisor installs a fresh token and
                    // reconnects us.
                    error!("orderbook stream halted: authentication invalid: {reason}");
                    self.set_status(ConnectionStatus::Error(format!("authentication invalid: {reason}")));
                    self.running.store(false, Ordering::SeqCst);
                    halted_for_auth = true;
                }
                Err(e) => {
                    error!("orderbook stream error: {e}");
                    self.set_status(ConnectionStatus::Error(e.to_string()));
                }
            }

            if !self.running.load(Ordering::SeqCst) {
                break;
            }

            let delay_ms = RECONNECT_BACKOFF_MS
                .get(backoff_idx)
                .copied()
                .unwrap_or(*RECONNECT_BACKOFF_MS.last().unwrap());
            backoff_idx = (backoff_idx + 1).min(RECONNECT_BACKOFF_MS.len() - 1);
            {
                let mut stats = self.stats.lock().expect("streamer stats mutex poisoned");
                stats.reconnect_count += 1;
                stats.status = ConnectionStatus::Retrying(backoff_idx as u32);
            }
            warn!("orderbook stream reconnecting in {delay_ms}ms");

            tokio::select! {
                _ = tokio::time::sleep(std::time::Duration::from_millis(delay_ms)) => {}
                _ = self.stop_notify.notified() => break,
            }
        }

        heartbeat_handle.abort();
        self.sink.close_all();
        if !halted_for_auth {
            self.set_status(ConnectionStatus::Stopped);
        }
    }

    /// Watches for inbound silence independent of the supervisor's own health
    /// poll, which only samples `ConnectionStatus` on its own tick. The vendor
    /// feed is expected to push an update well inside this interval whenever a
    /// subscribed ticker trades; prolonged silence means the socket is dead
    /// even though no error has surfaced yet.
    async fn heartbeat_monitor(self: Arc<Self>) {
        let period = Duration::from_secs(HEARTBEAT_INTERVAL_SECS);
        let mut interval = tokio::time::interval(period);
        interval.tick().await;

        while self.running.load(Ordering::SeqCst) {
            interval.tick().await;
            let connected = self.stats.lock().expect("streamer stats mutex poisoned").status == ConnectionStatus::Connected;
            if !connected {
                continue;
            }
            let silent_for = self.last_activity.lock().expect("streamer last_activity mutex poisoned").elapsed();
            if silent_for >= period {
                warn!("no orderbook activity in {silent_for:?}, forcing reconnect");
                self.heartbeat_notify.notify_waiters();
            }
        }
    }

    fn touch_activity(&self) {
        *self.last_activity.lock().expect("streamer last_activity mutex poisoned") = Instant::now();
    }

    /// Idempotent: calling `stop()` more than once, or before `run()` starts,
    /// just leaves the loop exiting on its next wakeup.
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        self.stop_notify.notify_waiters();
    }

    async fn connect_once(&self) -> Result<()> {
        let user_id = self
            .token
            .get_user_id()
            .ok_or_else(|| AppError::AuthInvalid("no user id on file, call token set first".to_string()))?;
        let bearer = self
            .token
            .get_valid()
            .ok_or_else(|| AppError::AuthInvalid("no valid bearer token".to_string()))?;
        let trading_key = self
            .token
            .fetch_trading_key_or_none(&self.http_client, &self.key_url)
            .await
            .ok_or_else(|| AppError::AuthInvalid("could not obtain trading key".to_string()))?;

        let mut request = self.ws_url.clone().into_client_request()?;
        {
            let headers = request.headers_mut();
            headers.insert(USER_AGENT, WS_USER_AGENT.parse().unwrap());
            headers.insert(ORIGIN, WS_ORIGIN.parse().unwrap());
            if let Some(cookies) = self.token.get_cookies() {
                if let Ok(value) = cookies.parse() {
                    headers.insert(COOKIE, value);
                    info!("using session cookies on websocket handshake");
                }
            }
        }

        let ws_config = WebSocketConfig::default()
            .max_message_size(Some(MAX_WS_FRAME_BYTES))
            .max_frame_size(Some(MAX_WS_FRAME_BYTES));
        let (ws_stream, _) = connect_async_with_config(request, Some(ws_config), false).await?;
        let (mut write, mut read) = ws_stream.split();

        let sub_msg = encode_subscription(user_id, &self.tickers, &trading_key, &bearer);
        write.send(Message::Binary(sub_msg.into())).await?;
        info!(tickers = ?self.tickers, "subscription sent");

        self.set_status(ConnectionStatus::Connected);
        self.stats.lock().expect("streamer stats mutex poisoned").connected_at = Some(now_wib());
        self.touch_activity();

        loop {
            tokio::select! {
                msg = read.next() => {
                    match msg {
                        Some(Ok(Message::Binary(data))) => {
                            self.touch_activity();
                            self.handle_message(&data);
                        }
                        Some(Ok(Message::Ping(data))) => {
                            self.touch_activity();
                            write.send(Message::Pong(data)).await?;
                        }
                        Some(Ok(Message::Close(_))) | None => return Ok(()),
                        Some(Err(e)) => return Err(e.into()),
                        Some(Ok(_)) => {}
                    }
                }
                _ = self.heartbeat_notify.notified() => {
                    return Err(AppError::Stale(format!(
                        "no orderbook activity in {HEARTBEAT_INTERVAL_SECS}s"
                    )));
                }
                _ = self.stop_notify.notified() => {
                    let _ = write.send(Message::Close(None)).await;
                    return Ok(());
                }
            }
        }
    }

    fn handle_message(&self, data: &[u8]) {
        let frame = match decode_message(data) {
            Ok(Some(frame)) => frame,
            Ok(None) => return,
            Err(e) => {
                warn!("failed to decode orderbook message: {e}");
                return;
            }
        };

        let (side, levels) = match parse_orderbook_text(&frame.raw) {
            Ok(parsed) => parsed,
            Err(e) => {
                warn!("failed to parse orderbook text for {}: {e}", frame.ticker);
                return;
            }
        };

        let ts = now_wib();
        for level in &levels {
            let row = OrderbookRow {
                timestamp: ts,
                price: level.price_raw.clone(),
                lots: level.lots,
                total_value: level.total_value,
                side,
            };
            if let Err(e) = self.sink.write_level(&frame.ticker, &row) {
                error!("failed to write orderbook level for {}: {e}", frame.ticker);
            }
        }

        debug!(ticker = %frame.ticker, levels = levels.len(), "orderbook update processed");

        let mut stats = self.stats.lock().expect("streamer stats mutex poisoned");
        *stats.message_counts.entry(frame.ticker.clone()).or_insert(0) += 1;
        stats.last_update.insert(frame.ticker, ts);
    }
}
