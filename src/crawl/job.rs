//! Job/Task model for the Historical Crawl Engine — spec §4.H.
//!
//! A job expands to one task per ticker × calendar day in `[from_date, until_date]`
//! inclusive; the fetcher discovers non-trading days itself via empty pages, so task
//! expansion does not consult any trading calendar.

use chrono::{Duration, NaiveDate};
use serde::{Deserialize, Serialize};

use crate::error::{AppError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum JobStatus {
    Queued,
    Running,
    Paused,
    Completed,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TaskStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Skipped,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub ticker: String,
    pub date: String,
    pub status: TaskStatus,
    pub error: Option<String>,
    pub records_fetched: u64,
    pub pages_fetched: u32,
    pub current_page: u32,
    pub attempts: u32,
    /// Set when the task completed with whatever pages it had collected after
    /// a transport error mid-crawl, rather than reaching the natural end of
    /// pagination.
    #[serde(default)]
    pub partial: bool,
}

impl Task {
    fn new(ticker: String, date: String) -> Self {
        Self {
            ticker,
            date,
            status: TaskStatus::Pending,
            error: None,
            records_fetched: 0,
            pages_fetched: 0,
            current_page: 0,
            attempts: 0,
            partial: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobProgress {
    pub total: usize,
    pub completed: usize,
    pub failed: usize,
    pub running: usize,
    pub pending: usize,
    pub percentage: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub job_id: String,
    pub tickers: Vec<String>,
    pub from_date: String,
    pub until_date: String,
    pub delay_seconds: f64,
    pub limit: u32,
    pub parallel_workers: u32,
    pub status: JobStatus,
    pub created_at: String,
    pub started_at: Option<String>,
    pub completed_at: Option<String>,
    pub tasks: Vec<Task>,
}

impl Job {
    /// Builds a new job with one task per ticker × date, in the order the
    /// original scraper's `create_job` generates them: outer loop over
    /// tickers, inner loop over the date range.
    pub fn new(
        job_id: String,
        tickers: Vec<String>,
        from_date: String,
        until_date: String,
        delay_seconds: f64,
        limit: u32,
        parallel_workers: u32,
        created_at: String,
    ) -> Result<Self> {
        let dates = date_range(&from_date, &until_date)?;
        let mut tasks = Vec::with_capacity(tickers.len() * dates.len());
        for ticker in &tickers {
            for date in &dates {
                tasks.push(Task::new(ticker.clone(), date.clone()));
            }
        }

        Ok(Self {
            job_id,
            tickers,
            from_date,
            until_date,
            delay_seconds,
            limit,
            parallel_workers: parallel_workers.max(1),
            status: JobStatus::Queued,
            created_at,
            started_at: None,
            completed_at: None,
            tasks,
        })
    }

    pub fn progress(&self) -> JobProgress {
        let total = self.tasks.len();
        let completed = self
            .tasks
            .iter()
            .filter(|t| matches!(t.status, TaskStatus::Completed | TaskStatus::Skipped))
            .count();
        let failed = self.tasks.iter().filter(|t| t.status == TaskStatus::Failed).count();
        let running = self.tasks.iter().filter(|t| t.status == TaskStatus::Running).count();
        let pending = total.saturating_sub(completed).saturating_sub(failed).saturating_sub(running);
        let percentage = if total > 0 {
            (completed as f64 / total as f64 * 1000.0).round() / 10.0
        } else {
            0.0
        };

        JobProgress {
            total,
            completed,
            failed,
            running,
            pending,
            percentage,
        }
    }

    pub fn total_records(&self) -> u64 {
        self.tasks.iter().map(|t| t.records_fetched).sum()
    }
}

/// Inclusive day-by-day range, formatted `%Y-%m-%d`.
fn date_range(from_date: &str, until_date: &str) -> Result<Vec<String>> {
    let start = NaiveDate::parse_from_str(from_date, "%Y-%m-%d")
        .map_err(|e| AppError::LogicError(format!("invalid from_date {from_date:?}: {e}")))?;
    let end = NaiveDate::parse_from_str(until_date, "%Y-%m-%d")
        .map_err(|e| AppError::LogicError(format!("invalid until_date {until_date:?}: {e}")))?;

    let mut dates = Vec::new();
    let mut current = start;
    while current <= end {
        dates.push(current.format("%Y-%m-%d").to_string());
        current += Duration::days(1);
    }
    Ok(dates)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expands_one_task_per_ticker_per_day() {
        let job = Job::new(
            "job-1".to_string(),
            vec!["BBCA".to_string(), "TLKM".to_string()],
            "2025-01-06".to_string(),
            "2025-01-08".to_string(),
            3.0,
            50,
            1,
            "2025-01-05T00:00:00+07:00".to_string(),
        )
        .unwrap();

        assert_eq!(job.tasks.len(), 6);
        assert_eq!(job.tasks[0].ticker, "BBCA");
        assert_eq!(job.tasks[0].date, "2025-01-06");
        assert_eq!(job.tasks[2].date, "2025-01-08");
        assert_eq!(job.tasks[3].ticker, "TLKM");
    }

    #[test]
    fn single_day_range_is_one_task_per_ticker() {
        let job = Job::new(
            "job-2".to_string(),
            vec!["BBCA".to_string()],
            "2025-01-06".to_string(),
            "2025-01-06".to_string(),
            0.0,
            50,
            1,
            "2025-01-05T00:00:00+07:00".to_string(),
        )
        .unwrap();
        assert_eq!(job.tasks.len(), 1);
    }

    #[test]
    fn rejects_malformed_date() {
        let result = Job::new(
            "job-3".to_string(),
            vec!["BBCA".to_string()],
            "not-a-date".to_string(),
            "2025-01-06".to_string(),
            0.0,
            50,
            1,
            "2025-01-05T00:00:00+07:00".to_string(),
        );
        assert!(result.is_err());
    }

    #[test]
    fn progress_percentage_rounds_to_one_decimal() {
        let mut job = Job::new(
            "job-4".to_string(),
            vec!["BBCA".to_string()],
            "2025-01-01".to_string(),
            "2025-01-03".to_string(),
            0.0,
            50,
            1,
            "2025-01-01T00:00:00+07:00".to_string(),
        )
        .unwrap();
        job.tasks[0].status = TaskStatus::Completed;
        let progress = job.progress();
        assert_eq!(progress.total, 3);
        assert_eq!(progress.completed, 1);
        assert!((progress.percentage - 33.3).abs() < 0.05);
    }
}
