//! Orderbook CSV Sink — spec §4.C.
//!
//! One open file handle per ticker, rotated when the wall-clock date changes.
//! Mirrors the original scraper's per-ticker file dictionary, but keyed in a
//! single mutex-guarded map instead of a bare dict (this runs from multiple
//! async tasks, the original ran single-threaded).

use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::Write as _;
use std::path::PathBuf;
use std::sync::Mutex;

use chrono::NaiveDate;
use tracing::{info, warn};

use crate::config::ORDERBOOK_CSV_COLUMNS;
use crate::error::{AppError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Bid,
    Offer,
}

impl Side {
    fn as_str(&self) -> &'static str {
        match self {
            Side::Bid => "BID",
            Side::Offer => "OFFER",
        }
    }
}

#[derive(Debug, Clone)]
pub struct OrderbookRow {
    pub timestamp: chrono::DateTime<chrono::FixedOffset>,
    /// Written verbatim as it arrived on the wire, not reformatted through a
    /// parsed float.
    pub price: String,
    pub lots: i64,
    pub total_value: i64,
    pub side: Side,
}

struct TickerFile {
    date: NaiveDate,
    file: File,
}

pub struct OrderbookCsvSink {
    dir: PathBuf,
    handles: Mutex<HashMap<String, TickerFile>>,
}

impl OrderbookCsvSink {
    pub fn new(dir: PathBuf) -> Result<Self> {
        std::fs::create_dir_all(&dir)?;
        Ok(Self {
            dir,
            handles: Mutex::new(HashMap::new()),
        })
    }

    /// Appends a row to the ticker's current-day file, rotating (and writing a
    /// fresh header) if the date has changed since the handle was opened.
    pub fn write_level(&self, ticker: &str, row: &OrderbookRow) -> Result<()> {
        let today = row.timestamp.date_naive();
        let mut handles = self.handles.lock().expect("csv sink mutex poisoned");

        let needs_new_handle = match handles.get(ticker) {
            Some(tf) => tf.date != today,
            None => true,
        };

        if needs_new_handle {
            let file = self.open_for(ticker, today)?;
            handles.insert(ticker.to_string(), TickerFile { date: today, file });
        }

        let tf = handles
            .get_mut(ticker)
            .expect("handle was just inserted or already present");

        writeln!(
            tf.file,
            "{},{},{},{},{}",
            row.timestamp.to_rfc3339(),
            row.price,
            row.lots,
            row.total_value,
            row.side.as_str()
        )
        .map_err(|e| AppError::StorageFailure(format!("orderbook csv write for {ticker}: {e}")))?;
        tf.file
            .flush()
            .map_err(|e| AppError::StorageFailure(format!("orderbook csv flush for {ticker}: {e}")))?;

        Ok(())
    }

    fn open_for(&self, ticker: &str, date: NaiveDate) -> Result<File> {
        let path = self.dir.join(format!("{date}_{ticker}.csv"));
        let is_new = !path.exists();

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| AppError::StorageFailure(format!("open {}: {e}", path.display())))?;

        if is_new {
            writeln!(file, "{}", ORDERBOOK_CSV_COLUMNS.join(","))
                .map_err(|e| AppError::StorageFailure(format!("write header {}: {e}", path.display())))?;
            info!("opened new orderbook csv file {}", path.display());
        }

        Ok(file)
    }

    /// Drops every open handle, flushing pending writes. Called on shutdown.
    pub fn close_all(&self) {
        let mut handles = self.handles.lock().expect("csv sink mutex poisoned");
        for (ticker, tf) in handles.iter_mut() {
            if let Err(e) = tf.file.flush() {
                warn!("failed to flush orderbook csv for {ticker} on close: {e}");
            }
        }
        handles.clear();
    }

    pub fn open_ticker_count(&self) -> usize {
        self.handles.lock().expect("csv sink mutex poisoned").len()
    }
}
