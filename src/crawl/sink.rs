//! Historical Trade CSV Sink — spec §4.H/§6.
//!
//! One file per job per ticker, named `<TICKER>_<FROM>_<UNTIL>.csv`; the
//! Engine is the sole writer, same single-writer-per-file discipline as the
//! Orderbook CSV Sink but keyed by job/ticker instead of by trading day.

use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::Write as _;
use std::path::PathBuf;
use std::sync::Mutex;

use tracing::info;

use crate::config::TRADE_CSV_COLUMNS;
use crate::error::{AppError, Result};
use crate::rest_fetcher::RunningTrade;

pub struct TradeCsvSink {
    dir: PathBuf,
    handles: Mutex<HashMap<String, File>>,
}

impl TradeCsvSink {
    pub fn new(dir: PathBuf) -> Result<Self> {
        std::fs::create_dir_all(&dir)?;
        Ok(Self {
            dir,
            handles: Mutex::new(HashMap::new()),
        })
    }

    /// Appends every trade in `trades` to the file for `ticker`/`from_date`/`until_date`,
    /// opening (and header-stamping) it on first use. Unknown fields in a trade are
    /// rendered blank rather than failing the write, matching the original
    /// `DictWriter(extrasaction='ignore')` tolerance for schema drift.
    pub fn append(
        &self,
        ticker: &str,
        from_date: &str,
        until_date: &str,
        task_date: &str,
        trades: &[RunningTrade],
    ) -> Result<()> {
        if trades.is_empty() {
            return Ok(());
        }

        let key = format!("{ticker}_{from_date}_{until_date}");
        let mut handles = self.handles.lock().expect("trade csv sink mutex poisoned");

        if !handles.contains_key(&key) {
            let file = self.open_for(&key)?;
            handles.insert(key.clone(), file);
        }
        let file = handles.get_mut(&key).expect("handle was just inserted");

        for trade in trades {
            let row = TRADE_CSV_COLUMNS
                .iter()
                .map(|col| {
                    if *col == "date" {
                        csv_escape(task_date)
                    } else {
                        csv_escape(&trade.csv_field(col))
                    }
                })
                .collect::<Vec<_>>()
                .join(",");
            writeln!(file, "{row}")
                .map_err(|e| AppError::StorageFailure(format!("trade csv write for {key}: {e}")))?;
        }
        file.flush()
            .map_err(|e| AppError::StorageFailure(format!("trade csv flush for {key}: {e}")))?;

        Ok(())
    }

    fn open_for(&self, key: &str) -> Result<File> {
        let path = self.dir.join(format!("{key}.csv"));
        let is_new = !path.exists();

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| AppError::StorageFailure(format!("open {}: {e}", path.display())))?;

        if is_new {
            writeln!(file, "{}", TRADE_CSV_COLUMNS.join(","))
                .map_err(|e| AppError::StorageFailure(format!("write header {}: {e}", path.display())))?;
            info!("opened new trade csv file {}", path.display());
        }

        Ok(file)
    }
}

fn csv_escape(field: &str) -> String {
    if field.contains(',') || field.contains('"') || field.contains('\n') {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn writes_header_once_and_appends_rows() {
        let dir = tempfile::tempdir().unwrap();
        let sink = TradeCsvSink::new(dir.path().to_path_buf()).unwrap();

        let trades = vec![
            RunningTrade(json!({"time": "09:30:00", "price": "1,200", "trade_number": 10})),
            RunningTrade(json!({"time": "09:31:00", "price": "1,210", "trade_number": 9})),
        ];
        sink.append("BBCA", "2025-01-06", "2025-01-06", "2025-01-06", &trades).unwrap();

        let path = dir.path().join("BBCA_2025-01-06_2025-01-06.csv");
        let contents = std::fs::read_to_string(path).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0], TRADE_CSV_COLUMNS.join(","));
    }

    #[test]
    fn empty_trade_batch_does_not_create_file() {
        let dir = tempfile::tempdir().unwrap();
        let sink = TradeCsvSink::new(dir.path().to_path_buf()).unwrap();
        sink.append("BBCA", "2025-01-06", "2025-01-06", "2025-01-06", &[]).unwrap();
        assert!(!dir.path().join("BBCA_2025-01-06_2025-01-06.csv").exists());
    }

    #[test]
    fn field_with_comma_is_quoted() {
        let dir = tempfile::tempdir().unwrap();
        let sink = TradeCsvSink::new(dir.path().to_path_buf()).unwrap();
        let trades = vec![RunningTrade(json!({"buyer": "A, B"}))];
        sink.append("BBCA", "2025-01-06", "2025-01-06", "2025-01-06", &trades).unwrap();
        let path = dir.path().join("BBCA_2025-01-06_2025-01-06.csv");
        let contents = std::fs::read_to_string(path).unwrap();
        assert!(contents.contains("\"A, B\""));
    }
}
