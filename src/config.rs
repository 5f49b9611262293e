use crate::error::{AppError, Result};

pub const STOCKBIT_API_BASE: &str = "https://exodus.stockbit.com";
pub const WEBSOCKET_URL: &str = "wss://wss-jkt.trading.stockbit.com/ws";

/// Websocket-key endpoint used by the Token Store to fetch a per-connect trading key.
pub const WEBSOCKET_KEY_PATH: &str = "/auth/websocket/key";

/// Running-trade REST endpoint crawled by the Historical Crawl Engine.
pub const RUNNING_TRADE_PATH: &str = "/order-trade/running-trade";

/// Max WebSocket frame size accepted from the vendor.
pub const MAX_WS_FRAME_BYTES: usize = 10 * 1024 * 1024;

/// Supervisor scheduler tick.
pub const SUPERVISOR_TICK_SECS: u64 = 30;

/// Passive heartbeat monitor interval.
pub const HEARTBEAT_INTERVAL_SECS: u64 = 30;

/// Reconnect backoff ladder for the Orderbook Streamer. Index clamps at the last
/// entry rather than growing unbounded.
pub const RECONNECT_BACKOFF_MS: &[u64] = &[1_000, 2_000, 5_000, 10_000, 30_000];

/// Matches the desktop browser UA the vendor's own web client sends; an
/// unrecognized UA gets a different (stricter) response from the gateway.
pub const WS_USER_AGENT: &str =
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10.15; rv:147.0) Gecko/20100101 Firefox/147.0";
pub const WS_ORIGIN: &str = "https://stockbit.com";

/// Token expiry warning band (original `config.py TOKEN_WARNING_THRESHOLD`).
pub const TOKEN_WARNING_THRESHOLD_SECS: i64 = 600;

/// Fixed inter-page pacing inside a single crawl task (`stockbit_client.py` hardcodes
/// `time.sleep(0.5)`), distinct from the user-configurable `Job.delay_seconds` applied
/// between tasks.
pub const PAGE_PAUSE_SECS: f64 = 0.5;

/// Running-trade records at or before this wall-clock time bound pagination.
pub const SESSION_START_BOUND: &str = "09:00:00";

/// Running Trade Record CSV header, preserved verbatim from the original scraper's
/// `CSV_COLUMNS` (storage.py).
pub const TRADE_CSV_COLUMNS: &[&str] = &[
    "id",
    "date",
    "time",
    "action",
    "code",
    "price",
    "change",
    "lot",
    "buyer",
    "seller",
    "trade_number",
    "buyer_type",
    "seller_type",
    "market_board",
];

/// Orderbook CSV header.
pub const ORDERBOOK_CSV_COLUMNS: &[&str] = &["timestamp", "price", "lots", "total_value", "side"];

#[derive(Debug, Clone)]
pub struct Config {
    pub stockbit_api_base: String,
    pub websocket_url: String,
    pub log_level: String,
    pub data_dir: String,
    pub orderbook_dir: String,
    pub config_dir: String,
    pub default_delay_seconds: f64,
    pub default_page_limit: u32,
    pub default_retry_count: u32,
    pub retry_backoff_base_secs: u64,
    pub token_warning_threshold_secs: i64,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let cfg = Self {
            stockbit_api_base: std::env::var("STOCKBIT_API_BASE")
                .unwrap_or_else(|_| STOCKBIT_API_BASE.to_string()),
            websocket_url: std::env::var("STOCKBIT_WEBSOCKET_URL")
                .unwrap_or_else(|_| WEBSOCKET_URL.to_string()),
            log_level: std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            data_dir: std::env::var("DATA_DIR").unwrap_or_else(|_| "data".to_string()),
            orderbook_dir: std::env::var("ORDERBOOK_DIR")
                .unwrap_or_else(|_| "data/orderbook".to_string()),
            config_dir: std::env::var("CONFIG_DIR").unwrap_or_else(|_| "config_data".to_string()),
            default_delay_seconds: std::env::var("DEFAULT_DELAY_SECONDS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(3.0),
            default_page_limit: std::env::var("DEFAULT_PAGE_LIMIT")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(50),
            default_retry_count: std::env::var("DEFAULT_RETRY_COUNT")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(3),
            retry_backoff_base_secs: std::env::var("RETRY_BACKOFF_BASE_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(2),
            token_warning_threshold_secs: std::env::var("TOKEN_WARNING_THRESHOLD_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(TOKEN_WARNING_THRESHOLD_SECS),
        };

        if cfg.default_page_limit == 0 {
            return Err(AppError::ConfigInvalid(
                "DEFAULT_PAGE_LIMIT must be greater than zero".to_string(),
            ));
        }

        Ok(cfg)
    }

    pub fn running_trade_url(&self) -> String {
        format!("{}{}", self.stockbit_api_base, RUNNING_TRADE_PATH)
    }

    pub fn websocket_key_url(&self) -> String {
        format!("{}{}", self.stockbit_api_base, WEBSOCKET_KEY_PATH)
    }
}
