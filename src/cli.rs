//! Inbound control surface — spec §6.
//!
//! Each subcommand is a thin translation of the collaborator-facing methods
//! spec §6 describes (`set_token`, `get_status`, `set_tickers`, `create_job`,
//! ...) onto a process invocation, since this crate ships no HTTP/UI layer.
//! `run` is the long-lived daemon; every other subcommand mutates on-disk
//! state directly and exits.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing::info;

use crate::bus::NotificationBus;
use crate::config::Config;
use crate::crawl::{CrawlEngine, EngineEvent, JobStore, TradeCsvSink};
use crate::error::Result;
use crate::rest_fetcher::RestFetcher;
use crate::supervisor::{self, DaemonEvent, Supervisor};
use crate::token::TokenStore;

#[derive(Debug, Parser)]
#[command(name = "idx-tape", about = "IDX Level-2 capture daemon and historical crawler")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Bearer/cookie credential management.
    Token {
        #[command(subcommand)]
        action: TokenAction,
    },
    /// Ticker watchlist management (on-disk; picked up by `run` on its next tick).
    Watchlist {
        #[command(subcommand)]
        action: WatchlistAction,
    },
    /// Historical backfill job management.
    Jobs {
        #[command(subcommand)]
        action: JobsAction,
    },
    /// Runs the streaming daemon and the crawl worker together until interrupted.
    Run,
}

#[derive(Debug, Subcommand)]
pub enum TokenAction {
    /// Install a bearer token (and optional session cookies).
    Set {
        #[arg(long)]
        bearer: String,
        #[arg(long)]
        cookies: Option<String>,
    },
    /// Print validity/expiry status.
    Status,
}

#[derive(Debug, Subcommand)]
pub enum WatchlistAction {
    Show,
    Set { tickers: Vec<String> },
    Add { tickers: Vec<String> },
    Remove { tickers: Vec<String> },
}

#[derive(Debug, Subcommand)]
pub enum JobsAction {
    Create {
        #[arg(long, value_delimiter = ',')]
        tickers: Vec<String>,
        #[arg(long)]
        from_date: String,
        #[arg(long)]
        until_date: String,
        #[arg(long)]
        delay_seconds: Option<f64>,
        #[arg(long)]
        limit: Option<u32>,
        #[arg(long, default_value_t = 1)]
        parallel_workers: u32,
    },
    Get { job_id: String },
    List,
    Pause { job_id: String },
    Resume { job_id: String },
    Cancel { job_id: String },
    AutoResume,
}

fn watchlist_path(cfg: &Config) -> PathBuf {
    PathBuf::from(&cfg.config_dir).join("orderbook_watchlist.json")
}

fn token_path(cfg: &Config) -> PathBuf {
    PathBuf::from(&cfg.config_dir).join("token.json")
}

fn jobs_path(cfg: &Config) -> PathBuf {
    PathBuf::from(&cfg.data_dir).join("jobs.json")
}

pub async fn dispatch(cli: Cli, cfg: Config) -> Result<()> {
    match cli.command {
        Command::Token { action } => dispatch_token(action, &cfg),
        Command::Watchlist { action } => dispatch_watchlist(action, &cfg),
        Command::Jobs { action } => dispatch_jobs(action, &cfg).await,
        Command::Run => run_daemon(cfg).await,
    }
}

fn dispatch_token(action: TokenAction, cfg: &Config) -> Result<()> {
    let store = TokenStore::new(token_path(cfg), cfg.token_warning_threshold_secs);
    match action {
        TokenAction::Set { bearer, cookies } => {
            let exp = store.set(bearer, cookies)?;
            println!("token installed, exp={exp:?}");
        }
        TokenAction::Status => {
            println!("{:?}", store.status());
        }
    }
    Ok(())
}

fn dispatch_watchlist(action: WatchlistAction, cfg: &Config) -> Result<()> {
    let path = watchlist_path(cfg);
    match action {
        WatchlistAction::Show => {
            let tickers = supervisor::load_watchlist(&path).unwrap_or_default();
            println!("{tickers:?}");
        }
        WatchlistAction::Set { tickers } => {
            let normalized = supervisor::normalize_tickers(tickers);
            supervisor::save_watchlist_file(&path, normalized.clone())?;
            println!("watchlist set to {normalized:?}");
        }
        WatchlistAction::Add { tickers } => {
            let mut current = supervisor::load_watchlist(&path).unwrap_or_default();
            for t in supervisor::normalize_tickers(tickers) {
                if !current.contains(&t) {
                    current.push(t);
                }
            }
            supervisor::save_watchlist_file(&path, current.clone())?;
            println!("watchlist now {current:?}");
        }
        WatchlistAction::Remove { tickers } => {
            let mut current = supervisor::load_watchlist(&path).unwrap_or_default();
            let remove = supervisor::normalize_tickers(tickers);
            current.retain(|t| !remove.contains(t));
            supervisor::save_watchlist_file(&path, current.clone())?;
            println!("watchlist now {current:?}");
        }
    }
    Ok(())
}

fn build_engine(cfg: &Config) -> Result<Arc<CrawlEngine<RestFetcher>>> {
    let token = Arc::new(TokenStore::new(token_path(cfg), cfg.token_warning_threshold_secs));
    let client = Arc::new(RestFetcher::new(cfg, token));
    let store = Arc::new(JobStore::new(jobs_path(cfg))?);
    let sink = Arc::new(TradeCsvSink::new(PathBuf::from(&cfg.data_dir).join("trades"))?);
    let bus = Arc::new(NotificationBus::<EngineEvent>::new());
    Ok(Arc::new(CrawlEngine::new(client, store, sink, bus)))
}

async fn dispatch_jobs(action: JobsAction, cfg: &Config) -> Result<()> {
    let engine = build_engine(cfg)?;
    match action {
        JobsAction::Create {
            tickers,
            from_date,
            until_date,
            delay_seconds,
            limit,
            parallel_workers,
        } => {
            let delay_seconds = delay_seconds.unwrap_or(cfg.default_delay_seconds);
            let limit = limit.unwrap_or(cfg.default_page_limit);
            let job_id = engine.create_job(tickers, from_date, until_date, delay_seconds, limit, parallel_workers)?;
            println!("created job {job_id}");
        }
        JobsAction::Get { job_id } => match engine.get_job(&job_id) {
            Some(job) => println!("{job:#?}"),
            None => println!("no such job"),
        },
        JobsAction::List => {
            for job in engine.list_jobs() {
                println!("{} [{:?}] {:?} {}..{}", job.job_id, job.status, job.tickers, job.from_date, job.until_date);
            }
        }
        JobsAction::Pause { job_id } => engine.pause_job(&job_id),
        JobsAction::Resume { job_id } => engine.resume_job(&job_id),
        JobsAction::Cancel { job_id } => engine.cancel_job(&job_id),
        JobsAction::AutoResume => {
            let n = engine.auto_resume_paused_jobs();
            println!("resumed {n} job(s)");
        }
    }
    Ok(())
}

/// Boots the Supervisor and the Crawl Engine together, logs lifecycle events
/// from both buses, and blocks until Ctrl-C.
async fn run_daemon(cfg: Config) -> Result<()> {
    let token = Arc::new(TokenStore::new(token_path(&cfg), cfg.token_warning_threshold_secs));
    let http_client = reqwest::Client::new();

    let orderbook_sink = Arc::new(crate::csv_sink::OrderbookCsvSink::new(PathBuf::from(&cfg.orderbook_dir))?);
    let daemon_bus = Arc::new(NotificationBus::<DaemonEvent>::new());
    daemon_bus.subscribe(|event| info!(?event, "daemon event"));

    let supervisor = Arc::new(Supervisor::new(
        cfg.websocket_url.clone(),
        cfg.websocket_key_url(),
        token.clone(),
        http_client.clone(),
        orderbook_sink,
        watchlist_path(&cfg),
        daemon_bus,
    ));

    let trade_client = Arc::new(RestFetcher::new(&cfg, token.clone()));
    let job_store = Arc::new(JobStore::new(jobs_path(&cfg))?);
    let trade_sink = Arc::new(TradeCsvSink::new(PathBuf::from(&cfg.data_dir).join("trades"))?);
    let engine_bus = Arc::new(NotificationBus::<EngineEvent>::new());
    engine_bus.subscribe(|event| info!(?event, "crawl event"));
    let engine = Arc::new(CrawlEngine::new(trade_client, job_store, trade_sink, engine_bus));

    let supervisor_handle = {
        let s = supervisor.clone();
        tokio::spawn(async move { s.run().await })
    };
    let engine_handle = engine.start_worker();

    info!("idx-tape daemon running, press ctrl-c to stop");
    tokio::signal::ctrl_c().await.ok();
    info!("shutting down");

    supervisor.stop();
    engine.stop_worker();
    let _ = supervisor_handle.await;
    let _ = engine_handle.await;

    Ok(())
}
