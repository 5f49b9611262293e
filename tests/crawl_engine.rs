//! End-to-end coverage for the historical crawl engine, driven only through
//! its public surface (`create_job`/`start_worker`/`get_job`), matching how
//! the CLI actually drives it.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde_json::json;

use idx_tape::bus::NotificationBus;
use idx_tape::crawl::{CrawlEngine, JobStatus, JobStore, TaskStatus, TradeCsvSink};
use idx_tape::error::Result;
use idx_tape::rest_fetcher::{PageOutcome, PageResult, RunningTrade, TradeApi};

struct ScriptedApi {
    pages: std::sync::Mutex<Vec<PageOutcome>>,
    calls: AtomicUsize,
}

impl ScriptedApi {
    fn new(pages: Vec<PageOutcome>) -> Self {
        Self {
            pages: std::sync::Mutex::new(pages),
            calls: AtomicUsize::new(0),
        }
    }
}

impl TradeApi for ScriptedApi {
    async fn fetch_page(
        &self,
        _ticker: &str,
        _date: &str,
        _limit: u32,
        _trade_number: Option<i64>,
    ) -> Result<PageOutcome> {
        let idx = self.calls.fetch_add(1, Ordering::SeqCst);
        let mut pages = self.pages.lock().unwrap();
        if idx < pages.len() {
            Ok(std::mem::replace(&mut pages[idx], PageOutcome::Timeout))
        } else {
            Ok(PageOutcome::Success(PageResult { trades: vec![], is_open_market: false }))
        }
    }
}

fn trade(time: &str, trade_number: i64, price: &str) -> RunningTrade {
    RunningTrade(json!({"time": time, "trade_number": trade_number, "price": price}))
}

async fn wait_for_terminal(engine: &Arc<CrawlEngine<ScriptedApi>>, job_id: &str) -> idx_tape::crawl::Job {
    for _ in 0..200 {
        if let Some(job) = engine.get_job(job_id) {
            if matches!(job.status, JobStatus::Completed | JobStatus::Failed | JobStatus::Paused) {
                return job;
            }
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("job {job_id} did not reach a terminal state in time");
}

#[tokio::test]
async fn backfill_across_two_tickers_writes_every_page_to_csv() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(JobStore::new(dir.path().join("jobs.json")).unwrap());
    let sink = Arc::new(TradeCsvSink::new(dir.path().join("trades")).unwrap());
    let bus = Arc::new(NotificationBus::new());

    // BBCA: two pages (3 trades, then 1 short page) before hitting the limit boundary.
    // TLKM: a single page under the limit, completes immediately.
    let api = ScriptedApi::new(vec![
        PageOutcome::Success(PageResult {
            trades: vec![trade("10:00:00", 103, "9000"), trade("09:58:00", 102, "9010"), trade("09:57:00", 101, "9020")],
            is_open_market: true,
        }),
        PageOutcome::Success(PageResult {
            trades: vec![trade("09:56:00", 100, "9030")],
            is_open_market: true,
        }),
        PageOutcome::Success(PageResult {
            trades: vec![trade("10:05:00", 5, "3000")],
            is_open_market: true,
        }),
    ]);

    let engine = Arc::new(CrawlEngine::new(Arc::new(api), store, sink, bus));
    let job_id = engine
        .create_job(
            vec!["BBCA".to_string(), "TLKM".to_string()],
            "2025-01-06".to_string(),
            "2025-01-06".to_string(),
            0.0,
            3,
            1,
        )
        .unwrap();

    let handle = engine.start_worker();
    let job = wait_for_terminal(&engine, &job_id).await;
    engine.stop_worker();
    let _ = handle.await;

    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.tasks.len(), 2);
    assert!(job.tasks.iter().all(|t| t.status == TaskStatus::Completed));
    assert_eq!(job.total_records(), 5);

    let bbca_csv = dir.path().join("trades").join("BBCA_2025-01-06_2025-01-06.csv");
    let tlkm_csv = dir.path().join("trades").join("TLKM_2025-01-06_2025-01-06.csv");
    assert!(bbca_csv.exists());
    assert!(tlkm_csv.exists());

    let bbca_contents = std::fs::read_to_string(bbca_csv).unwrap();
    // header + 4 trade rows across both pages
    assert_eq!(bbca_contents.lines().count(), 5);
}

#[tokio::test]
async fn token_expiry_mid_job_pauses_without_duplicating_completed_tasks() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(JobStore::new(dir.path().join("jobs.json")).unwrap());
    let sink = Arc::new(TradeCsvSink::new(dir.path().join("trades")).unwrap());
    let bus = Arc::new(NotificationBus::new());

    // First ticker's task completes; second hits a RequiresLogin mid-crawl.
    let api = ScriptedApi::new(vec![
        PageOutcome::Success(PageResult { trades: vec![trade("10:00:00", 1, "100")], is_open_market: true }),
        PageOutcome::RequiresLogin { marked_invalid: true },
    ]);

    let engine = Arc::new(CrawlEngine::new(Arc::new(api), store.clone(), sink, bus));
    let job_id = engine
        .create_job(
            vec!["BBCA".to_string(), "TLKM".to_string()],
            "2025-01-06".to_string(),
            "2025-01-06".to_string(),
            0.0,
            50,
            1,
        )
        .unwrap();

    let handle = engine.start_worker();
    let job = wait_for_terminal(&engine, &job_id).await;
    engine.stop_worker();
    let _ = handle.await;

    assert_eq!(job.status, JobStatus::Paused);
    assert_eq!(job.tasks[0].status, TaskStatus::Completed);
    assert_eq!(job.tasks[0].records_fetched, 1);
    assert_eq!(job.tasks[1].status, TaskStatus::Pending);
    assert_eq!(job.tasks[1].error.as_deref(), Some("token expired - job paused"));

    // Paused jobs are flushed immediately — a fresh store load must see the same state.
    let reloaded = JobStore::new(dir.path().join("jobs.json")).unwrap();
    let persisted = reloaded.get(&job_id).unwrap();
    assert_eq!(persisted.status, JobStatus::Paused);
    assert_eq!(persisted.tasks[0].status, TaskStatus::Completed);

    // Resuming re-queues the job without re-running the already-completed task.
    engine.auto_resume_paused_jobs();
    assert_eq!(engine.get_job(&job_id).unwrap().status, JobStatus::Queued);
}

#[tokio::test]
async fn auth_pause_on_second_page_then_resume_writes_every_row_exactly_once() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(JobStore::new(dir.path().join("jobs.json")).unwrap());
    let sink = Arc::new(TradeCsvSink::new(dir.path().join("trades")).unwrap());
    let bus = Arc::new(NotificationBus::new());

    // First page is a full 50-row page; the second page 401s. Resuming then
    // lets the whole task run cleanly to 125 unique rows.
    let first_page: Vec<_> = (0i64..50).map(|i| trade("10:00:00", 200 - i, "9000")).collect();
    let second_page: Vec<_> = (0i64..75).map(|i| trade("09:30:00", 150 - i, "9000")).collect();
    let api = ScriptedApi::new(vec![
        PageOutcome::Success(PageResult { trades: first_page, is_open_market: true }),
        PageOutcome::RequiresLogin { marked_invalid: true },
        PageOutcome::Success(PageResult { trades: second_page, is_open_market: true }),
    ]);

    let engine = Arc::new(CrawlEngine::new(Arc::new(api), store, sink, bus));
    let job_id = engine
        .create_job(vec!["BBCA".to_string()], "2025-01-06".to_string(), "2025-01-06".to_string(), 0.0, 50, 1)
        .unwrap();

    let handle = engine.start_worker();
    let job = wait_for_terminal(&engine, &job_id).await;
    assert_eq!(job.status, JobStatus::Paused);
    assert_eq!(job.tasks[0].status, TaskStatus::Pending);

    engine.auto_resume_paused_jobs();
    let job = wait_for_terminal(&engine, &job_id).await;
    engine.stop_worker();
    let _ = handle.await;

    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.tasks[0].records_fetched, 75);

    let csv_path = dir.path().join("trades").join("BBCA_2025-01-06_2025-01-06.csv");
    let contents = std::fs::read_to_string(csv_path).unwrap();
    // header + 75 rows from the single post-resume pass, no duplicate first page.
    assert_eq!(contents.lines().count(), 76);
}
