//! Filesystem watch on the download folder.
//!
//! Non-recursive: only files landing directly in the folder matter.
//! Creations and completed renames (browser `.crdownload` -> final name)
//! become ingest events.

use std::path::PathBuf;
use std::sync::mpsc::{self, Receiver};
use std::time::Duration;

use notify::event::{ModifyKind, RenameMode};
use notify::{Config, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc as tokio_mpsc;
use vsort_config::{log_watch_debug, log_watch_info, log_watch_warn};

use crate::ignore::IgnoreMatcher;
use crate::processor::EventSource;

/// Work item for the single consumer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IngestEvent {
    /// A file appeared or finished arriving
    FileChanged { path: PathBuf, source: EventSource },
    /// Periodic nudge to check for a UTC date rollover
    ReportTick,
}

pub struct FsWatch {
    ignore: IgnoreMatcher,
    _watcher: RecommendedWatcher,
    event_rx: Receiver<Result<Event, notify::Error>>,
}

impl FsWatch {
    pub fn new(root: PathBuf, ignore: IgnoreMatcher) -> notify::Result<Self> {
        let (tx, rx) = mpsc::channel();

        let watcher_config = Config::default()
            .with_poll_interval(Duration::from_secs(2))
            .with_compare_contents(false);

        let mut watcher = RecommendedWatcher::new(
            move |res| {
                let _ = tx.send(res);
            },
            watcher_config,
        )?;
        watcher.watch(&root, RecursiveMode::NonRecursive)?;

        log_watch_info!("Watching folder", path = %root.display());

        Ok(Self {
            ignore,
            _watcher: watcher,
            event_rx: rx,
        })
    }

    fn to_ingest_events(&self, event: Event) -> Vec<IngestEvent> {
        let paths: Vec<PathBuf> = match event.kind {
            EventKind::Create(_) => event.paths,
            // Both ends are reported; only the destination is a candidate.
            EventKind::Modify(ModifyKind::Name(RenameMode::Both)) => {
                event.paths.into_iter().skip(1).collect()
            }
            EventKind::Modify(ModifyKind::Name(RenameMode::To)) => event.paths,
            EventKind::Modify(ModifyKind::Name(_)) => Vec::new(),
            EventKind::Modify(_) => event.paths,
            _ => Vec::new(),
        };

        paths
            .into_iter()
            .filter(|path| !self.ignore.should_ignore(path))
            .map(|path| IngestEvent::FileChanged {
                path,
                source: EventSource::Watch,
            })
            .collect()
    }

    /// Drain pending notifications without blocking.
    pub fn poll(&self) -> Vec<IngestEvent> {
        let mut events = Vec::new();
        while let Ok(result) = self.event_rx.try_recv() {
            match result {
                Ok(event) => {
                    log_watch_debug!("FS event received", event = ?event);
                    events.extend(self.to_ingest_events(event));
                }
                Err(e) => log_watch_warn!("FS watch error", error = %e),
            }
        }
        events
    }
}

/// Spawn the watcher and forward its events to `tx`. The watcher is
/// created inside the task; failure to start is logged and the task ends.
pub fn spawn_watch_task(
    root: PathBuf,
    ignore: IgnoreMatcher,
    tx: tokio_mpsc::Sender<IngestEvent>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let watcher = match FsWatch::new(root, ignore) {
            Ok(w) => w,
            Err(e) => {
                log_watch_warn!("Failed to start FS watch", error = %e);
                return;
            }
        };

        loop {
            for event in watcher.poll() {
                if tx.send(event).await.is_err() {
                    return;
                }
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use notify::event::{CreateKind, DataChange};
    use std::path::Path;

    fn watch(root: &Path) -> FsWatch {
        FsWatch::new(
            root.to_path_buf(),
            IgnoreMatcher::with_patterns(&[".crdownload".to_string()]),
        )
        .unwrap()
    }

    fn paths(events: Vec<IngestEvent>) -> Vec<PathBuf> {
        events
            .into_iter()
            .filter_map(|e| match e {
                IngestEvent::FileChanged { path, .. } => Some(path),
                IngestEvent::ReportTick => None,
            })
            .collect()
    }

    #[test]
    fn test_rename_reports_destination_only() {
        let dir = tempfile::tempdir().unwrap();
        let fs_watch = watch(dir.path());
        let from = dir.path().join("movie.mp4.crdownload");
        let to = dir.path().join("movie.mp4");

        let event = Event::new(EventKind::Modify(ModifyKind::Name(RenameMode::Both)))
            .add_path(from)
            .add_path(to.clone());
        assert_eq!(paths(fs_watch.to_ingest_events(event)), vec![to]);
    }

    #[test]
    fn test_create_filters_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let fs_watch = watch(dir.path());
        let partial = dir.path().join("x.zip.crdownload");
        let done = dir.path().join("x.zip");
        std::fs::write(&done, "zip").unwrap();

        let event = Event::new(EventKind::Create(CreateKind::File))
            .add_path(partial)
            .add_path(done.clone());
        assert_eq!(paths(fs_watch.to_ingest_events(event)), vec![done.clone()]);

        let event = Event::new(EventKind::Modify(ModifyKind::Data(DataChange::Content))).add_path(done.clone());
        let events = fs_watch.to_ingest_events(event);
        assert_eq!(
            events,
            vec![IngestEvent::FileChanged {
                path: done,
                source: EventSource::Watch
            }]
        );
    }

    #[test]
    fn test_removals_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let fs_watch = watch(dir.path());
        let event = Event::new(EventKind::Remove(notify::event::RemoveKind::File))
            .add_path(dir.path().join("gone.txt"));
        assert!(fs_watch.to_ingest_events(event).is_empty());
    }

    #[tokio::test]
    async fn test_watch_task_sees_new_file() {
        let dir = tempfile::tempdir().unwrap();
        let (tx, mut rx) = tokio_mpsc::channel(64);
        let handle = spawn_watch_task(dir.path().to_path_buf(), IgnoreMatcher::default(), tx);
        tokio::time::sleep(Duration::from_millis(200)).await;

        let file = dir.path().join("arrived.txt");
        std::fs::write(&file, "hello").unwrap();

        let event = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .unwrap()
            .unwrap();
        match event {
            IngestEvent::FileChanged { path, source } => {
                assert_eq!(path.file_name(), file.file_name());
                assert_eq!(source, EventSource::Watch);
            }
            other => panic!("unexpected event {:?}", other),
        }
        handle.abort();
    }
}
