//! Long-running agent: producers feed one blocking consumer.

use std::time::Duration;

use anyhow::{bail, Context};
use tokio::sync::mpsc;
use vsort_config::{log_pipeline_info, log_watch_debug, Config};
use vsort_ledger::Ledger;

use crate::ignore::IgnoreMatcher;
use crate::pipeline::Pipeline;
use crate::processor::SessionStats;
use crate::scan::spawn_rescan_task;
use crate::watch::{spawn_watch_task, IngestEvent};

/// Bounded so a burst of arrivals applies backpressure to producers.
const INGEST_CHANNEL_CAPACITY: usize = 4096;

/// How often the consumer is asked to check for a UTC date change.
const REPORT_TICK_INTERVAL: Duration = Duration::from_secs(3600);

/// Process events until the channel closes, then flush the batch.
pub fn run_consumer(mut rx: mpsc::Receiver<IngestEvent>, mut pipeline: Pipeline) -> SessionStats {
    while let Some(event) = rx.blocking_recv() {
        match event {
            IngestEvent::FileChanged { path, source } => {
                pipeline.process(&path, source);
            }
            IngestEvent::ReportTick => pipeline.report_tick(),
        }
    }

    pipeline.flush();
    let stats = pipeline.stats();
    log_pipeline_info!(
        "Session finished",
        moved = stats.moved,
        duplicates = stats.duplicates,
        errors = stats.errors,
        ignored = stats.ignored
    );
    stats
}

fn spawn_report_timer(tx: mpsc::Sender<IngestEvent>) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(REPORT_TICK_INTERVAL);
        loop {
            ticker.tick().await;
            log_watch_debug!("Report tick");
            if tx.send(IngestEvent::ReportTick).await.is_err() {
                return;
            }
        }
    })
}

/// Run until Ctrl-C. The watch folder must exist.
pub async fn run_agent(config: Config) -> anyhow::Result<SessionStats> {
    let watch_folder = config.folders.watch_folder.clone();
    if !watch_folder.is_dir() {
        bail!("Watch folder does not exist: {}", watch_folder.display());
    }
    std::fs::read_dir(&watch_folder)
        .with_context(|| format!("Watch folder is not readable: {}", watch_folder.display()))?;

    let ledger = Ledger::open(&config.database.path)
        .with_context(|| format!("Failed to open ledger at {}", config.database.path.display()))?;
    let pipeline = Pipeline::from_config(&config, ledger)?;

    log_pipeline_info!(
        "Starting agent",
        watch = %watch_folder.display(),
        organized = %config.folders.organized_folder.display()
    );

    let (tx, rx) = mpsc::channel::<IngestEvent>(INGEST_CHANNEL_CAPACITY);

    // Consumer first, so nothing produced is lost.
    let mut consumer = tokio::task::spawn_blocking(move || run_consumer(rx, pipeline));

    let ignore = IgnoreMatcher::from_config(&config.ingest);
    let producers = [
        spawn_watch_task(watch_folder.clone(), ignore.clone(), tx.clone()),
        spawn_rescan_task(
            watch_folder,
            ignore,
            Duration::from_secs(config.ingest.scan_interval_secs),
            tx.clone(),
        ),
        spawn_report_timer(tx.clone()),
    ];
    drop(tx);

    tokio::select! {
        stats = &mut consumer => {
            log_pipeline_info!("Consumer exited");
            for handle in &producers {
                handle.abort();
            }
            return stats.context("consumer task failed");
        }
        _ = tokio::signal::ctrl_c() => {
            log_pipeline_info!("Received Ctrl-C, draining queue");
        }
    }

    for handle in producers {
        handle.abort();
        let _ = handle.await;
    }
    consumer.await.context("consumer task failed")
}

#[cfg(test)]
mod tests {
    use super::*;
    use vsort_config::testing::TestEnvironment;

    #[tokio::test]
    async fn test_missing_watch_folder_is_fatal() {
        let env = TestEnvironment::new().unwrap();
        let mut config = env.config();
        config.folders.watch_folder = env.watch_folder.join("does-not-exist");

        let err = run_agent(config).await.unwrap_err();
        assert!(err.to_string().contains("Watch folder does not exist"));
    }

    #[tokio::test]
    async fn test_consumer_drains_then_flushes() {
        let env = TestEnvironment::new().unwrap();
        let config = env.config();
        let ledger = Ledger::open(&config.database.path).unwrap();
        let pipeline = Pipeline::from_config(&config, ledger.clone()).unwrap();

        let a = env.create_file("a.txt", b"alpha").unwrap();
        let b = env.create_file("b.txt", b"alpha").unwrap();

        let (tx, rx) = mpsc::channel(8);
        for path in [a, b] {
            tx.send(IngestEvent::FileChanged {
                path,
                source: crate::processor::EventSource::Scan,
            })
            .await
            .unwrap();
        }
        tx.send(IngestEvent::ReportTick).await.unwrap();
        drop(tx);

        let stats = tokio::task::spawn_blocking(move || run_consumer(rx, pipeline))
            .await
            .unwrap();
        assert_eq!(stats.moved, 1);
        assert_eq!(stats.duplicates, 1);
        // Shutdown flush uploaded both completed actions.
        assert_eq!(ledger.pending_count().unwrap(), 0);
        assert_eq!(ledger.uploads().unwrap().len(), 1);
    }
}
