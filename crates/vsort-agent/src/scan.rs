//! Top-level scan of the watch folder, at startup and periodically.
//!
//! Catches files that arrived while the agent was down and anything the
//! watcher missed. The processor's session set keeps repeats cheap.

use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use tokio::sync::mpsc;
use vsort_config::{log_watch_debug, log_watch_info, log_watch_warn};

use crate::ignore::IgnoreMatcher;
use crate::processor::EventSource;
use crate::watch::IngestEvent;

pub struct DirectoryScanner {
    root: PathBuf,
    ignore: IgnoreMatcher,
}

impl DirectoryScanner {
    pub fn new(root: PathBuf, ignore: IgnoreMatcher) -> Self {
        Self { root, ignore }
    }

    /// Regular, non-ignored files directly under the root, sorted by name.
    /// Subdirectories are not entered.
    pub fn scan(&self) -> Vec<PathBuf> {
        let entries = match fs::read_dir(&self.root) {
            Ok(e) => e,
            Err(e) => {
                log_watch_warn!("Failed to read directory", path = %self.root.display(), error = %e);
                return Vec::new();
            }
        };

        let mut files: Vec<PathBuf> = entries
            .flatten()
            .filter(|entry| entry.file_type().map(|t| t.is_file()).unwrap_or(false))
            .map(|entry| entry.path())
            .filter(|path| !self.ignore.ignores_name(path))
            .collect();
        files.sort();
        log_watch_debug!("Scan listed files", root = %self.root.display(), count = files.len());
        files
    }
}

/// Scan once and queue every file found.
pub async fn run_scan(root: PathBuf, ignore: IgnoreMatcher, tx: mpsc::Sender<IngestEvent>) -> usize {
    let scanner = DirectoryScanner::new(root, ignore);
    let files = match tokio::task::spawn_blocking(move || scanner.scan()).await {
        Ok(files) => files,
        Err(e) => {
            log_watch_warn!("Scan task failed", error = %e);
            return 0;
        }
    };

    let count = files.len();
    for path in files {
        let event = IngestEvent::FileChanged {
            path,
            source: EventSource::Scan,
        };
        if tx.send(event).await.is_err() {
            log_watch_warn!("Ingest channel closed during scan");
            break;
        }
    }
    count
}

/// Initial scan, then one every `interval`.
pub fn spawn_rescan_task(
    root: PathBuf,
    ignore: IgnoreMatcher,
    interval: Duration,
    tx: mpsc::Sender<IngestEvent>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let count = run_scan(root.clone(), ignore.clone(), tx.clone()).await;
        log_watch_info!("Initial scan queued files", count = count);

        let mut ticker = tokio::time::interval(interval.max(Duration::from_secs(1)));
        ticker.tick().await;
        loop {
            ticker.tick().await;
            if tx.is_closed() {
                return;
            }
            run_scan(root.clone(), ignore.clone(), tx.clone()).await;
        }
    })
}
