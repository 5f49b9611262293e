//! Historical Crawl Engine — spec §4.H.
//!
//! One dispatcher picks the next `queued` job; a bounded worker pool processes
//! its tasks. Pause and cancel are cooperative, observed at task boundaries
//! rather than mid-fetch, matching the original daemon's thread-pool crawler.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::{Notify, Semaphore};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::bus::NotificationBus;
use crate::clock::now_wib;
use crate::config::{PAGE_PAUSE_SECS, SESSION_START_BOUND};
use crate::crawl::job::{Job, JobStatus, TaskStatus};
use crate::crawl::sink::TradeCsvSink;
use crate::crawl::store::JobStore;
use crate::error::Result;
use crate::rest_fetcher::{PageOutcome, RunningTrade, TradeApi};

const REHYDRATE_LIMIT: usize = 50;
const PERSIST_EVERY_N_COMPLETED: usize = 5;

#[derive(Debug, Clone)]
pub struct JobSummary {
    pub job_id: String,
    pub tickers: Vec<String>,
    pub from_date: String,
    pub until_date: String,
    pub total_tasks: usize,
    pub completed_tasks: Option<usize>,
    pub failed_tasks: Option<usize>,
    pub total_records: Option<u64>,
    pub reason: Option<String>,
}

#[derive(Debug, Clone)]
pub enum EngineEvent {
    JobStarted(JobSummary),
    JobProgress(JobSummary),
    JobCompleted(JobSummary),
    JobFailed(JobSummary),
    JobPaused(JobSummary),
}

fn summarize(job: &Job, reason: Option<String>) -> JobSummary {
    let progress = job.progress();
    JobSummary {
        job_id: job.job_id.clone(),
        tickers: job.tickers.clone(),
        from_date: job.from_date.clone(),
        until_date: job.until_date.clone(),
        total_tasks: progress.total,
        completed_tasks: Some(progress.completed),
        failed_tasks: Some(progress.failed),
        total_records: Some(job.total_records()),
        reason,
    }
}

pub struct CrawlEngine<A> {
    client: Arc<A>,
    store: Arc<JobStore>,
    sink: Arc<TradeCsvSink>,
    bus: Arc<NotificationBus<EngineEvent>>,
    jobs: Mutex<HashMap<String, Job>>,
    running: AtomicBool,
    stop_notify: Notify,
    current_job_id: Mutex<Option<String>>,
}

impl<A> CrawlEngine<A>
where
    A: TradeApi + Send + Sync + 'static,
{
    pub fn new(
        client: Arc<A>,
        store: Arc<JobStore>,
        sink: Arc<TradeCsvSink>,
        bus: Arc<NotificationBus<EngineEvent>>,
    ) -> Self {
        let rehydrated = store.load_active(REHYDRATE_LIMIT);
        info!(count = rehydrated.len(), "rehydrated crawl jobs from store");
        let jobs = rehydrated.into_iter().map(|j| (j.job_id.clone(), j)).collect();

        Self {
            client,
            store,
            sink,
            bus,
            jobs: Mutex::new(jobs),
            running: AtomicBool::new(false),
            stop_notify: Notify::new(),
            current_job_id: Mutex::new(None),
        }
    }

    pub fn create_job(
        &self,
        tickers: Vec<String>,
        from_date: String,
        until_date: String,
        delay_seconds: f64,
        limit: u32,
        parallel_workers: u32,
    ) -> Result<String> {
        let job_id = uuid::Uuid::new_v4().to_string();
        let job = Job::new(
            job_id.clone(),
            tickers,
            from_date,
            until_date,
            delay_seconds,
            limit,
            parallel_workers,
            now_wib().to_rfc3339(),
        )?;

        self.store.upsert(&job)?;
        info!(job_id = %job_id, tasks = job.tasks.len(), "created crawl job");
        self.jobs.lock().expect("crawl engine jobs mutex poisoned").insert(job_id.clone(), job);

        Ok(job_id)
    }

    pub fn get_job(&self, job_id: &str) -> Option<Job> {
        self.jobs.lock().expect("crawl engine jobs mutex poisoned").get(job_id).cloned()
    }

    pub fn list_jobs(&self) -> Vec<Job> {
        self.jobs.lock().expect("crawl engine jobs mutex poisoned").values().cloned().collect()
    }

    pub fn pause_job(&self, job_id: &str) {
        let mut jobs = self.jobs.lock().expect("crawl engine jobs mutex poisoned");
        if let Some(job) = jobs.get_mut(job_id) {
            if job.status == JobStatus::Running {
                job.status = JobStatus::Paused;
                info!(job_id, "job paused by operator");
            }
        }
    }

    pub fn resume_job(&self, job_id: &str) {
        let reactivated = {
            let mut jobs = self.jobs.lock().expect("crawl engine jobs mutex poisoned");
            match jobs.get_mut(job_id) {
                Some(job) if job.status == JobStatus::Paused => {
                    job.status = JobStatus::Queued;
                    let _ = self.store.upsert(job);
                    info!(job_id, "job resumed");
                    true
                }
                _ => false,
            }
        };
        if reactivated {
            self.stop_notify.notify_waiters();
        }
    }

    /// Resumes every paused job — called after a fresh token is installed.
    pub fn auto_resume_paused_jobs(&self) -> usize {
        let paused_ids: Vec<String> = {
            let jobs = self.jobs.lock().expect("crawl engine jobs mutex poisoned");
            jobs.values().filter(|j| j.status == JobStatus::Paused).map(|j| j.job_id.clone()).collect()
        };
        for id in &paused_ids {
            self.resume_job(id);
        }
        if !paused_ids.is_empty() {
            info!(count = paused_ids.len(), "auto-resumed paused jobs after token refresh");
        }
        paused_ids.len()
    }

    pub fn cancel_job(&self, job_id: &str) {
        let mut jobs = self.jobs.lock().expect("crawl engine jobs mutex poisoned");
        if let Some(job) = jobs.get_mut(job_id) {
            job.status = JobStatus::Failed;
            let _ = self.store.upsert(job);
            info!(job_id, "job cancelled");
        }
    }

    pub fn start_worker(self: &Arc<Self>) -> JoinHandle<()> {
        let engine = self.clone();
        tokio::spawn(async move { engine.run().await })
    }

    pub fn stop_worker(&self) {
        self.running.store(false, Ordering::SeqCst);
        self.stop_notify.notify_waiters();
    }

    async fn run(self: Arc<Self>) {
        self.running.store(true, Ordering::SeqCst);
        info!("crawl engine worker started");

        while self.running.load(Ordering::SeqCst) {
            let next_job_id = {
                let jobs = self.jobs.lock().expect("crawl engine jobs mutex poisoned");
                jobs.values().find(|j| j.status == JobStatus::Queued).map(|j| j.job_id.clone())
            };

            match next_job_id {
                Some(job_id) => self.clone().process_job(job_id).await,
                None => {
                    tokio::select! {
                        _ = tokio::time::sleep(Duration::from_secs(1)) => {}
                        _ = self.stop_notify.notified() => {}
                    }
                }
            }
        }
        info!("crawl engine worker stopped");
    }

    async fn process_job(self: Arc<Self>, job_id: String) {
        let (workers, total_tasks) = {
            let mut jobs = self.jobs.lock().expect("crawl engine jobs mutex poisoned");
            let Some(job) = jobs.get_mut(&job_id) else { return };
            job.status = JobStatus::Running;
            job.started_at = Some(now_wib().to_rfc3339());
            (job.parallel_workers, job.tasks.len())
        };
        *self.current_job_id.lock().expect("crawl engine current_job_id mutex poisoned") = Some(job_id.clone());
        info!(job_id = %job_id, workers, total_tasks, "starting crawl job");
        self.publish(&job_id, EngineEvent::JobStarted as fn(JobSummary) -> EngineEvent, None);

        let pending: Vec<usize> = {
            let jobs = self.jobs.lock().expect("crawl engine jobs mutex poisoned");
            let job = jobs.get(&job_id).expect("job exists, just set to running");
            job.tasks
                .iter()
                .enumerate()
                .filter(|(_, t)| !matches!(t.status, TaskStatus::Completed | TaskStatus::Skipped))
                .map(|(i, _)| i)
                .collect()
        };

        if workers <= 1 {
            self.process_sequential(&job_id, pending).await;
        } else {
            self.process_parallel(&job_id, pending, workers).await;
        }

        *self.current_job_id.lock().expect("crawl engine current_job_id mutex poisoned") = None;
        self.finalize_job(&job_id);
    }

    async fn process_sequential(self: &Arc<Self>, job_id: &str, pending: Vec<usize>) {
        for idx in pending {
            if !self.running.load(Ordering::SeqCst) || self.job_status(job_id) != Some(JobStatus::Running) {
                return;
            }
            self.process_task(job_id, idx).await;
            if self.job_status(job_id) != Some(JobStatus::Running) {
                return;
            }
            let delay = self.job_delay_seconds(job_id);
            if delay > 0.0 {
                tokio::time::sleep(Duration::from_secs_f64(delay)).await;
            }
        }
    }

    async fn process_parallel(self: &Arc<Self>, job_id: &str, pending: Vec<usize>, workers: u32) {
        let semaphore = Arc::new(Semaphore::new(workers as usize));
        let mut set = tokio::task::JoinSet::new();

        for idx in pending {
            if !self.running.load(Ordering::SeqCst) || self.job_status(job_id) != Some(JobStatus::Running) {
                break;
            }
            let permit = semaphore.clone().acquire_owned().await.expect("semaphore never closed");
            let engine = self.clone();
            let job_id_owned = job_id.to_string();
            set.spawn(async move {
                engine.process_task(&job_id_owned, idx).await;
                drop(permit);
            });

            let delay = self.job_delay_seconds(job_id);
            if delay > 0.0 {
                tokio::time::sleep(Duration::from_secs_f64(delay)).await;
            }
        }

        while let Some(result) = set.join_next().await {
            if let Err(e) = result {
                warn!("crawl task panicked: {e}");
            }
        }
    }

    async fn process_task(&self, job_id: &str, idx: usize) {
        let (ticker, date, limit, from_date, until_date) = {
            let mut jobs = self.jobs.lock().expect("crawl engine jobs mutex poisoned");
            let Some(job) = jobs.get_mut(job_id) else { return };
            let task = &mut job.tasks[idx];
            task.status = TaskStatus::Running;
            task.attempts += 1;
            task.current_page = 0;
            (
                task.ticker.clone(),
                task.date.clone(),
                job.limit,
                job.from_date.clone(),
                job.until_date.clone(),
            )
        };
        info!(job_id, ticker = %ticker, date = %date, "fetching task");

        // All pages for this task accumulate here and hit the CSV exactly once,
        // at task termination. A page-by-page write would leave already-persisted
        // rows stranded (and re-fetched) if the task later pauses for auth and
        // resumes from page 1.
        let mut buffer: Vec<RunningTrade> = Vec::new();
        let mut cursor: Option<i64> = None;
        let mut pages = 0u32;

        loop {
            let outcome = match self.client.fetch_page(&ticker, &date, limit, cursor).await {
                Ok(outcome) => outcome,
                Err(e) => {
                    self.finish_on_transport_error(
                        job_id, idx, &ticker, &date, &from_date, &until_date, buffer, pages, e.to_string(),
                    );
                    return;
                }
            };

            match outcome {
                PageOutcome::Success(page) => {
                    pages += 1;
                    let count = page.trades.len();
                    let hit_session_start = page
                        .trades
                        .iter()
                        .any(|t| t.time().is_some_and(|time| time <= SESSION_START_BOUND));
                    let next_cursor = page.trades.last().and_then(|t| t.trade_number());
                    buffer.extend(page.trades);

                    self.update_task_progress(job_id, idx, pages, buffer.len() as u64);

                    if count < limit as usize || hit_session_start {
                        self.finish_task(job_id, idx, &ticker, &from_date, &until_date, &date, buffer, pages, false);
                        return;
                    }

                    cursor = next_cursor;
                    if cursor.is_none() {
                        self.finish_task(job_id, idx, &ticker, &from_date, &until_date, &date, buffer, pages, false);
                        return;
                    }
                    tokio::time::sleep(Duration::from_secs_f64(PAGE_PAUSE_SECS)).await;
                }
                PageOutcome::RequiresLogin { marked_invalid } => {
                    // Buffer is discarded: the job pauses and the task re-runs
                    // from page 1 on resume, so nothing partial is written now.
                    self.pause_for_auth(job_id, idx, marked_invalid);
                    return;
                }
                PageOutcome::ClientError { status } => {
                    self.fail_task(job_id, idx, format!("client error {status}"));
                    return;
                }
                PageOutcome::ServerError { status } => {
                    self.finish_on_transport_error(
                        job_id, idx, &ticker, &date, &from_date, &until_date, buffer, pages,
                        format!("server error {status}"),
                    );
                    return;
                }
                PageOutcome::Timeout => {
                    self.finish_on_transport_error(
                        job_id, idx, &ticker, &date, &from_date, &until_date, buffer, pages,
                        "request timed out".to_string(),
                    );
                    return;
                }
                PageOutcome::NetworkError(msg) => {
                    self.finish_on_transport_error(
                        job_id, idx, &ticker, &date, &from_date, &until_date, buffer, pages, msg,
                    );
                    return;
                }
            }
        }
    }

    /// Writes the buffered pages to the sink in one call and marks the task
    /// completed, `partial` reflecting whether pagination ran to its natural end.
    #[allow(clippy::too_many_arguments)]
    fn finish_task(
        &self,
        job_id: &str,
        idx: usize,
        ticker: &str,
        from_date: &str,
        until_date: &str,
        date: &str,
        buffer: Vec<RunningTrade>,
        pages: u32,
        partial: bool,
    ) {
        let total_records = buffer.len() as u64;
        if let Err(e) = self.sink.append(ticker, from_date, until_date, date, &buffer) {
            error!(job_id, ticker = %ticker, date = %date, "failed to persist trade task: {e}");
            self.fail_task(job_id, idx, e.to_string());
            return;
        }
        self.complete_task(job_id, idx, total_records, pages, partial);
    }

    /// A transport error (timeout, 5xx, network failure) mid-task completes
    /// the task with whatever pages were already collected rather than
    /// discarding them, mirroring the original crawler. An empty buffer still
    /// fails the task outright since there is nothing to salvage.
    #[allow(clippy::too_many_arguments)]
    fn finish_on_transport_error(
        &self,
        job_id: &str,
        idx: usize,
        ticker: &str,
        date: &str,
        from_date: &str,
        until_date: &str,
        buffer: Vec<RunningTrade>,
        pages: u32,
        error: String,
    ) {
        if buffer.is_empty() {
            self.fail_task(job_id, idx, error);
        } else {
            warn!(job_id, ticker = %ticker, date = %date, "task completing partial after transport error: {error}");
            self.finish_task(job_id, idx, ticker, from_date, until_date, date, buffer, pages, true);
        }
    }

    fn job_status(&self, job_id: &str) -> Option<JobStatus> {
        self.jobs
            .lock()
            .expect("crawl engine jobs mutex poisoned")
            .get(job_id)
            .map(|j| j.status)
    }

    fn job_delay_seconds(&self, job_id: &str) -> f64 {
        self.jobs
            .lock()
            .expect("crawl engine jobs mutex poisoned")
            .get(job_id)
            .map(|j| j.delay_seconds)
            .unwrap_or(0.0)
    }

    fn update_task_progress(&self, job_id: &str, idx: usize, pages: u32, total_records: u64) {
        let mut jobs = self.jobs.lock().expect("crawl engine jobs mutex poisoned");
        if let Some(job) = jobs.get_mut(job_id) {
            let task = &mut job.tasks[idx];
            task.current_page = pages;
            task.records_fetched = total_records;
        }
    }

    fn complete_task(&self, job_id: &str, idx: usize, total_records: u64, pages: u32, partial: bool) {
        let should_persist = {
            let mut jobs = self.jobs.lock().expect("crawl engine jobs mutex poisoned");
            let Some(job) = jobs.get_mut(job_id) else { return };
            let task = &mut job.tasks[idx];
            task.status = TaskStatus::Completed;
            task.records_fetched = total_records;
            task.pages_fetched = pages;
            task.partial = partial;
            info!(job_id, ticker = %task.ticker, date = %task.date, total_records, pages, partial, "task completed");
            job.progress().completed % PERSIST_EVERY_N_COMPLETED == 0
        };
        if should_persist {
            self.persist(job_id);
        }
        self.publish(job_id, |s| EngineEvent::JobProgress(s), None);
    }

    fn fail_task(&self, job_id: &str, idx: usize, error: String) {
        {
            let mut jobs = self.jobs.lock().expect("crawl engine jobs mutex poisoned");
            let Some(job) = jobs.get_mut(job_id) else { return };
            let task = &mut job.tasks[idx];
            task.status = TaskStatus::Failed;
            task.error = Some(error.clone());
            warn!(job_id, ticker = %task.ticker, date = %task.date, "task failed: {error}");
        }
        self.publish(job_id, |s| EngineEvent::JobProgress(s), None);
    }

    fn pause_for_auth(&self, job_id: &str, idx: usize, marked_invalid: bool) {
        {
            let mut jobs = self.jobs.lock().expect("crawl engine jobs mutex poisoned");
            let Some(job) = jobs.get_mut(job_id) else { return };
            job.status = JobStatus::Paused;
            let task = &mut job.tasks[idx];
            task.status = TaskStatus::Pending;
            task.error = Some("token expired - job paused".to_string());
            task.current_page = 0;
            warn!(job_id, marked_invalid, "job paused: token requires operator action");
        }
        self.persist(job_id);
        self.publish(job_id, |s| EngineEvent::JobPaused(s), Some("token expired".to_string()));
    }

    fn finalize_job(&self, job_id: &str) {
        let (event, reason) = {
            let mut jobs = self.jobs.lock().expect("crawl engine jobs mutex poisoned");
            let Some(job) = jobs.get_mut(job_id) else { return };
            match job.status {
                JobStatus::Paused => return,
                _ => {}
            }
            let progress = job.progress();
            if progress.failed > 0 && progress.completed == 0 {
                job.status = JobStatus::Failed;
            } else {
                job.status = JobStatus::Completed;
            }
            job.completed_at = Some(now_wib().to_rfc3339());
            let reason = if job.status == JobStatus::Failed {
                Some("all tasks failed".to_string())
            } else {
                None
            };
            (
                if job.status == JobStatus::Failed {
                    EngineEvent::JobFailed as fn(JobSummary) -> EngineEvent
                } else {
                    EngineEvent::JobCompleted as fn(JobSummary) -> EngineEvent
                },
                reason,
            )
        };
        self.persist(job_id);
        self.publish(job_id, event, reason);
    }

    fn persist(&self, job_id: &str) {
        let job = {
            let jobs = self.jobs.lock().expect("crawl engine jobs mutex poisoned");
            jobs.get(job_id).cloned()
        };
        if let Some(job) = job {
            if let Err(e) = self.store.upsert(&job) {
                error!(job_id, "failed to persist job: {e}");
            }
        }
    }

    fn publish(&self, job_id: &str, ctor: impl Fn(JobSummary) -> EngineEvent, reason: Option<String>) {
        let job = {
            let jobs = self.jobs.lock().expect("crawl engine jobs mutex poisoned");
            jobs.get(job_id).cloned()
        };
        if let Some(job) = job {
            self.bus.publish(ctor(summarize(&job, reason)));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rest_fetcher::{PageResult, RunningTrade};
    use serde_json::json;
    use std::sync::atomic::AtomicUsize;

    struct FakeApi {
        pages_by_call: Mutex<Vec<PageOutcome>>,
        calls: AtomicUsize,
    }

    impl FakeApi {
        fn new(pages: Vec<PageOutcome>) -> Self {
            Self {
                pages_by_call: Mutex::new(pages),
                calls: AtomicUsize::new(0),
            }
        }
    }

    impl TradeApi for FakeApi {
        async fn fetch_page(
            &self,
            _ticker: &str,
            _date: &str,
            _limit: u32,
            _trade_number: Option<i64>,
        ) -> Result<PageOutcome> {
            let idx = self.calls.fetch_add(1, Ordering::SeqCst);
            let mut pages = self.pages_by_call.lock().unwrap();
            if idx < pages.len() {
                Ok(std::mem::replace(&mut pages[idx], PageOutcome::Timeout))
            } else {
                Ok(PageOutcome::Success(PageResult { trades: vec![], is_open_market: false }))
            }
        }
    }

    fn trade(time: &str, trade_number: i64) -> RunningTrade {
        RunningTrade(json!({"time": time, "trade_number": trade_number, "price": "100"}))
    }

    fn new_engine(client: FakeApi, dir: &std::path::Path) -> Arc<CrawlEngine<FakeApi>> {
        let store = Arc::new(JobStore::new(dir.join("jobs.json")).unwrap());
        let sink = Arc::new(TradeCsvSink::new(dir.join("trades")).unwrap());
        let bus = Arc::new(NotificationBus::new());
        Arc::new(CrawlEngine::new(Arc::new(client), store, sink, bus))
    }

    #[tokio::test]
    async fn single_page_under_limit_completes_task_immediately() {
        let dir = tempfile::tempdir().unwrap();
        let outcomes = vec![PageOutcome::Success(PageResult {
            trades: vec![trade("10:00:00", 5), trade("09:59:00", 4)],
            is_open_market: true,
        })];
        let engine = new_engine(FakeApi::new(outcomes), dir.path());

        let job_id = engine
            .create_job(vec!["BBCA".to_string()], "2025-01-06".to_string(), "2025-01-06".to_string(), 0.0, 50, 1)
            .unwrap();

        engine.clone().process_job(job_id.clone()).await;

        let job = engine.get_job(&job_id).unwrap();
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.tasks[0].status, TaskStatus::Completed);
        assert_eq!(job.tasks[0].records_fetched, 2);
    }

    #[tokio::test]
    async fn requires_login_pauses_job_and_resets_task_to_pending() {
        let dir = tempfile::tempdir().unwrap();
        let outcomes = vec![PageOutcome::RequiresLogin { marked_invalid: true }];
        let engine = new_engine(FakeApi::new(outcomes), dir.path());

        let job_id = engine
            .create_job(vec!["BBCA".to_string()], "2025-01-06".to_string(), "2025-01-06".to_string(), 0.0, 50, 1)
            .unwrap();
        engine.clone().process_job(job_id.clone()).await;

        let job = engine.get_job(&job_id).unwrap();
        assert_eq!(job.status, JobStatus::Paused);
        assert_eq!(job.tasks[0].status, TaskStatus::Pending);
    }

    #[tokio::test]
    async fn paginates_until_page_smaller_than_limit() {
        let dir = tempfile::tempdir().unwrap();
        let full_page: Vec<RunningTrade> = (0i64..3).map(|i| trade("10:00:00", 100 - i)).collect();
        let short_page: Vec<RunningTrade> = vec![trade("10:00:00", 50)];
        let outcomes = vec![
            PageOutcome::Success(PageResult { trades: full_page, is_open_market: true }),
            PageOutcome::Success(PageResult { trades: short_page, is_open_market: true }),
        ];
        let engine = new_engine(FakeApi::new(outcomes), dir.path());

        let job_id = engine
            .create_job(vec!["BBCA".to_string()], "2025-01-06".to_string(), "2025-01-06".to_string(), 0.0, 3, 1)
            .unwrap();
        engine.clone().process_job(job_id.clone()).await;

        let job = engine.get_job(&job_id).unwrap();
        assert_eq!(job.tasks[0].status, TaskStatus::Completed);
        assert_eq!(job.tasks[0].records_fetched, 4);
        assert_eq!(job.tasks[0].pages_fetched, 2);
    }

    #[tokio::test]
    async fn server_error_after_pages_collected_completes_task_as_partial() {
        let dir = tempfile::tempdir().unwrap();
        let full_page: Vec<RunningTrade> = (0i64..3).map(|i| trade("10:00:00", 100 - i)).collect();
        let outcomes = vec![
            PageOutcome::Success(PageResult { trades: full_page, is_open_market: true }),
            PageOutcome::ServerError { status: 503 },
        ];
        let engine = new_engine(FakeApi::new(outcomes), dir.path());

        let job_id = engine
            .create_job(vec!["BBCA".to_string()], "2025-01-06".to_string(), "2025-01-06".to_string(), 0.0, 3, 1)
            .unwrap();
        engine.clone().process_job(job_id.clone()).await;

        let job = engine.get_job(&job_id).unwrap();
        assert_eq!(job.tasks[0].status, TaskStatus::Completed);
        assert!(job.tasks[0].partial);
        assert_eq!(job.tasks[0].records_fetched, 3);
    }

    #[tokio::test]
    async fn server_error_with_nothing_collected_fails_task_outright() {
        let dir = tempfile::tempdir().unwrap();
        let outcomes = vec![PageOutcome::ServerError { status: 503 }];
        let engine = new_engine(FakeApi::new(outcomes), dir.path());

        let job_id = engine
            .create_job(vec!["BBCA".to_string()], "2025-01-06".to_string(), "2025-01-06".to_string(), 0.0, 50, 1)
            .unwrap();
        engine.clone().process_job(job_id.clone()).await;

        let job = engine.get_job(&job_id).unwrap();
        assert_eq!(job.tasks[0].status, TaskStatus::Failed);
        assert!(!job.tasks[0].partial);
    }

    #[test]
    fn auto_resume_reactivates_every_paused_job() {
        let dir = tempfile::tempdir().unwrap();
        let engine = new_engine(FakeApi::new(vec![]), dir.path());
        let job_id = engine
            .create_job(vec!["BBCA".to_string()], "2025-01-06".to_string(), "2025-01-06".to_string(), 0.0, 50, 1)
            .unwrap();
        engine.jobs.lock().unwrap().get_mut(&job_id).unwrap().status = JobStatus::Running;
        engine.pause_job(&job_id);
        assert_eq!(engine.get_job(&job_id).unwrap().status, JobStatus::Paused);

        let resumed = engine.auto_resume_paused_jobs();
        assert_eq!(resumed, 1);
        assert_eq!(engine.get_job(&job_id).unwrap().status, JobStatus::Queued);
    }
}
