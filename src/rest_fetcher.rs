//! REST Fetcher — spec §4.G.
//!
//! Single-page running-trade GET with the vendor's retry/backoff policy.
//! Exposed behind the `TradeApi` trait so the Historical Crawl Engine can be
//! driven by a fake implementation in tests instead of a live HTTP client.

use std::time::Duration;

use serde_json::Value;
use tracing::warn;

use crate::config::Config;
use crate::error::Result;
use crate::token::TokenStore;

/// One vendor running-trade record, kept as a loosely-typed JSON object since
/// the vendor's schema is not contractually stable — callers pull the fields
/// they need and the CSV sink writes whatever is present, matching the
/// original scraper's `extrasaction='ignore'` DictWriter behavior.
#[derive(Debug, Clone)]
pub struct RunningTrade(pub Value);

impl RunningTrade {
    pub fn time(&self) -> Option<&str> {
        self.0.get("time").and_then(|v| v.as_str())
    }

    pub fn trade_number(&self) -> Option<i64> {
        self.0.get("trade_number").and_then(|v| v.as_i64())
    }

    /// Renders one field from `config::TRADE_CSV_COLUMNS`, cleaning the same
    /// two fields the original `CSVStorage.save_trades` cleaned: commas out of
    /// `price`, and `%`/`+` out of `change`.
    pub fn csv_field(&self, column: &str) -> String {
        let raw = match self.0.get(column) {
            Some(Value::String(s)) => s.clone(),
            Some(Value::Number(n)) => n.to_string(),
            Some(Value::Bool(b)) => b.to_string(),
            _ => String::new(),
        };
        match column {
            "price" => raw.replace(',', ""),
            "change" => raw.replace('%', "").replace('+', ""),
            _ => raw,
        }
    }
}

#[derive(Debug, Clone)]
pub struct PageResult {
    pub trades: Vec<RunningTrade>,
    pub is_open_market: bool,
}

/// Classification of a single page fetch, mirroring `_fetch_page`'s response
/// shapes exactly: 401 marks the token invalid and demands operator action,
/// 403 demands it without marking the token invalid (could be a captcha wall),
/// other 4xx is terminal for this task, 5xx and timeouts are retryable.
#[derive(Debug)]
pub enum PageOutcome {
    Success(PageResult),
    RequiresLogin { marked_invalid: bool },
    ClientError { status: u16 },
    ServerError { status: u16 },
    Timeout,
    NetworkError(String),
}

pub trait TradeApi: Send + Sync {
    fn fetch_page(
        &self,
        ticker: &str,
        date: &str,
        limit: u32,
        trade_number: Option<i64>,
    ) -> impl std::future::Future<Output = Result<PageOutcome>> + Send;
}

pub struct RestFetcher {
    client: reqwest::Client,
    base_url: String,
    token: std::sync::Arc<TokenStore>,
    retry_count: u32,
    retry_backoff_base_secs: u64,
}

impl RestFetcher {
    pub fn new(cfg: &Config, token: std::sync::Arc<TokenStore>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: cfg.running_trade_url(),
            token,
            retry_count: cfg.default_retry_count,
            retry_backoff_base_secs: cfg.retry_backoff_base_secs,
        }
    }
}

impl TradeApi for RestFetcher {
    async fn fetch_page(
        &self,
        ticker: &str,
        date: &str,
        limit: u32,
        trade_number: Option<i64>,
    ) -> Result<PageOutcome> {
        let Some(bearer) = self.token.get_valid() else {
            return Ok(PageOutcome::RequiresLogin { marked_invalid: false });
        };

        for attempt in 0..self.retry_count {
            let mut query = vec![
                ("sort", "DESC".to_string()),
                ("limit", limit.to_string()),
                ("order_by", "RUNNING_TRADE_ORDER_BY_TIME".to_string()),
                ("symbols[]", ticker.to_string()),
                ("date", date.to_string()),
            ];
            if let Some(tn) = trade_number {
                query.push(("trade_number", tn.to_string()));
            }

            let result = self
                .client
                .get(&self.base_url)
                .query(&query)
                .header("Authorization", format!("Bearer {bearer}"))
                .timeout(Duration::from_secs(30))
                .send()
                .await;

            let response = match result {
                Ok(r) => r,
                Err(e) if e.is_timeout() => {
                    if attempt + 1 < self.retry_count {
                        backoff_sleep(self.retry_backoff_base_secs, attempt).await;
                        continue;
                    }
                    return Ok(PageOutcome::Timeout);
                }
                Err(e) => {
                    if attempt + 1 < self.retry_count {
                        backoff_sleep(self.retry_backoff_base_secs, attempt).await;
                        continue;
                    }
                    return Ok(PageOutcome::NetworkError(e.to_string()));
                }
            };

            let status = response.status().as_u16();

            if status == 401 {
                self.token.mark_invalid();
                return Ok(PageOutcome::RequiresLogin { marked_invalid: true });
            }
            if status == 403 {
                return Ok(PageOutcome::RequiresLogin { marked_invalid: false });
            }
            if (400..500).contains(&status) {
                return Ok(PageOutcome::ClientError { status });
            }
            if status >= 500 {
                if attempt + 1 < self.retry_count {
                    backoff_sleep(self.retry_backoff_base_secs, attempt).await;
                    continue;
                }
                return Ok(PageOutcome::ServerError { status });
            }

            let body: Value = response.json().await?;
            return Ok(PageOutcome::Success(parse_running_trade_response(&body)));
        }

        warn!("{ticker} {date}: exhausted retries without a definitive response");
        Ok(PageOutcome::ServerError { status: 0 })
    }
}

async fn backoff_sleep(base_secs: u64, attempt: u32) {
    let wait = base_secs.saturating_pow(attempt);
    tokio::time::sleep(Duration::from_secs(wait)).await;
}

/// Accepts both `{"data": {"running_trade": [...], "is_open_market": bool}}`
/// and a flattened `{"running_trade": [...], ...}` shape, matching the
/// original client's fallback.
fn parse_running_trade_response(body: &Value) -> PageResult {
    let data = body.get("data").filter(|d| d.is_object()).unwrap_or(body);

    let trades = data
        .get("running_trade")
        .and_then(|v| v.as_array())
        .map(|arr| arr.iter().cloned().map(RunningTrade).collect())
        .unwrap_or_default();

    let is_open_market = data
        .get("is_open_market")
        .and_then(|v| v.as_bool())
        .unwrap_or(false);

    PageResult { trades, is_open_market }
}
