//! Per-file state machine: readiness, analysis, dedup, relocation.
//!
//! ```text
//! PENDING -> ANALYZING -> DUPLICATE
//!                      -> MOVING -> MOVED | ERROR
//! ```
//!
//! Analysis through move is retried as a whole, a fixed delay between
//! attempts. Exactly one ledger row is written per terminal state.

use std::collections::HashSet;
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::Local;
use serde::Serialize;
use thiserror::Error;
use tracing::instrument;
use vsort_config::{log_pipeline_debug, log_pipeline_error, log_pipeline_info, log_pipeline_warn, Config};
use vsort_ledger::{ActionKind, ActionLogEntry, Ledger, LedgerError};

use crate::classify::Classifier;
use crate::dedup::DedupLedger;
use crate::fingerprint::{check_readiness, Analyzer, FileRecord, Readiness};
use crate::ignore::IgnoreMatcher;
use crate::intel::{default_classifiers, smart_name, ContentClassifier};
use crate::planner::{FileMover, NoClobberMover, RelocationPlanner};

/// Category recorded for files that never made it through analysis.
const UNKNOWN_CATEGORY: &str = "Unknown";

#[derive(Error, Debug)]
pub enum ProcessError {
    #[error("analysis failed: {0}")]
    Analyze(#[source] io::Error),

    #[error("duplicate lookup failed: {0}")]
    Dedup(#[from] LedgerError),

    #[error("move failed: {0}")]
    Move(#[source] io::Error),
}

/// Where a path came from. Watch events wait out a too-young file once.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventSource {
    Watch,
    Scan,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileState {
    Pending,
    Analyzing,
    Duplicate,
    Moving,
    Moved,
    Error,
}

impl fmt::Display for FileState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FileState::Pending => "PENDING",
            FileState::Analyzing => "ANALYZING",
            FileState::Duplicate => "DUPLICATE",
            FileState::Moving => "MOVING",
            FileState::Moved => "MOVED",
            FileState::Error => "ERROR",
        };
        f.write_str(name)
    }
}

fn transition(path: &Path, state: FileState) {
    log_pipeline_debug!("State", path = %path.display(), state = %state);
}

/// Result of handing one path to the processor.
#[derive(Debug)]
pub enum Outcome {
    Ignored,
    AlreadyProcessed,
    NotReady(Readiness),
    Duplicate {
        record: FileRecord,
    },
    Moved {
        record: FileRecord,
        destination: PathBuf,
    },
    Failed {
        attempts: u32,
        error: String,
    },
}

impl Outcome {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Outcome::Duplicate { .. } | Outcome::Moved { .. } | Outcome::Failed { .. }
        )
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SessionStats {
    pub moved: u64,
    pub duplicates: u64,
    pub errors: u64,
    pub ignored: u64,
}

/// Session-scoped mutable state, owned by the single consumer.
#[derive(Debug, Default)]
pub struct PipelineContext {
    processed: HashSet<PathBuf>,
    /// MOVED actions since the last successful batch upload
    pub pending_uploads: usize,
    pub stats: SessionStats,
}

impl PipelineContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn was_processed(&self, path: &Path) -> bool {
        self.processed.contains(path)
    }

    pub fn processed_count(&self) -> usize {
        self.processed.len()
    }
}

enum Attempt {
    Duplicate(FileRecord),
    Moved(FileRecord, PathBuf),
}

pub struct Processor {
    ignore: IgnoreMatcher,
    analyzer: Analyzer,
    planner: RelocationPlanner,
    dedup: DedupLedger,
    ledger: Ledger,
    mover: Box<dyn FileMover>,
    min_age: Duration,
    retry_attempts: u32,
    retry_delay: Duration,
}

impl Processor {
    pub fn new(config: &Config, ledger: Ledger) -> Self {
        let ingest = &config.ingest;
        Self {
            ignore: IgnoreMatcher::from_config(ingest),
            analyzer: Analyzer::new(Classifier::from_map(&config.categories), default_classifiers()),
            planner: RelocationPlanner::new(
                config.folders.organized_folder.clone(),
                ingest.rename_pattern.clone(),
            ),
            dedup: DedupLedger::new(ledger.clone(), ingest.check_duplicates),
            ledger,
            mover: Box::new(NoClobberMover),
            min_age: Duration::from_secs(ingest.min_file_age_secs),
            retry_attempts: ingest.retry_attempts,
            retry_delay: Duration::from_secs(ingest.retry_delay_secs),
        }
    }

    pub fn with_mover(mut self, mover: Box<dyn FileMover>) -> Self {
        self.mover = mover;
        self
    }

    pub fn with_insights(mut self, insights: Vec<Box<dyn ContentClassifier>>) -> Self {
        self.analyzer = Analyzer::new(self.analyzer.classifier().clone(), insights);
        self
    }

    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    pub fn classifier(&self) -> &Classifier {
        self.analyzer.classifier()
    }

    pub fn ignore(&self) -> &IgnoreMatcher {
        &self.ignore
    }

    /// Drive one path to a terminal state, or report why it was not touched.
    #[instrument(skip(self, ctx), fields(path = %path.display()), level = "debug")]
    pub fn process(&self, ctx: &mut PipelineContext, path: &Path, source: EventSource) -> Outcome {
        if self.ignore.should_ignore(path) {
            ctx.stats.ignored += 1;
            return Outcome::Ignored;
        }
        if ctx.was_processed(path) {
            return Outcome::AlreadyProcessed;
        }

        let mut readiness = check_readiness(path, self.min_age);
        if let (Readiness::TooYoung(remaining), EventSource::Watch) = (readiness, source) {
            std::thread::sleep(remaining);
            readiness = check_readiness(path, self.min_age);
        }
        if readiness != Readiness::Ready {
            log_pipeline_debug!("Not ready", path = %path.display(), readiness = ?readiness);
            return Outcome::NotReady(readiness);
        }

        ctx.processed.insert(path.to_path_buf());
        transition(path, FileState::Pending);

        match self.run_with_retry(path) {
            Ok(Attempt::Duplicate(record)) => {
                self.record(
                    ActionLogEntry::new(ActionKind::DuplicateSkipped, path_str(path), &record.category)
                        .with_size(record.size)
                        .with_hash(record.hash.as_hex().map(String::from)),
                );
                ctx.stats.duplicates += 1;
                log_pipeline_info!("Duplicate skipped", path = %path.display(), hash = %record.hash);
                Outcome::Duplicate { record }
            }
            Ok(Attempt::Moved(record, destination)) => {
                self.record(
                    ActionLogEntry::new(ActionKind::Moved, path_str(path), &record.category)
                        .with_new_path(path_str(&destination))
                        .with_size(record.size)
                        .with_hash(record.hash.as_hex().map(String::from)),
                );
                ctx.stats.moved += 1;
                ctx.pending_uploads += 1;
                log_pipeline_info!(
                    "File organized",
                    from = %path.display(),
                    to = %destination.display(),
                    category = %record.category
                );
                Outcome::Moved {
                    record,
                    destination,
                }
            }
            Err((attempts, error)) => {
                transition(path, FileState::Error);
                let message = error.to_string();
                self.record(
                    ActionLogEntry::new(ActionKind::Error, path_str(path), UNKNOWN_CATEGORY)
                        .with_error(message.clone()),
                );
                ctx.stats.errors += 1;
                log_pipeline_error!(
                    "Giving up on file",
                    path = %path.display(),
                    attempts = attempts,
                    error = %message
                );
                Outcome::Failed {
                    attempts,
                    error: message,
                }
            }
        }
    }

    fn run_with_retry(&self, path: &Path) -> Result<Attempt, (u32, ProcessError)> {
        let attempts = self.retry_attempts.max(1);
        let mut attempt = 1;
        loop {
            match self.attempt(path) {
                Ok(done) => return Ok(done),
                Err(e) if attempt >= attempts => return Err((attempt, e)),
                Err(e) => {
                    log_pipeline_warn!(
                        "Attempt failed, retrying",
                        path = %path.display(),
                        attempt = attempt,
                        error = %e
                    );
                    std::thread::sleep(self.retry_delay);
                    attempt += 1;
                }
            }
        }
    }

    fn attempt(&self, path: &Path) -> Result<Attempt, ProcessError> {
        transition(path, FileState::Analyzing);
        let record = self.analyzer.analyze(path).map_err(ProcessError::Analyze)?;

        if self.dedup.is_duplicate(&record.hash)? {
            transition(path, FileState::Duplicate);
            return Ok(Attempt::Duplicate(record));
        }

        transition(path, FileState::Moving);
        let stem = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        let smart = smart_name(&stem, record.insight.as_ref());
        let destination = self
            .planner
            .relocate(
                path,
                &record.category,
                &smart,
                &Local::now().naive_local(),
                self.mover.as_ref(),
            )
            .map_err(ProcessError::Move)?;
        transition(path, FileState::Moved);
        Ok(Attempt::Moved(record, destination))
    }

    fn record(&self, entry: ActionLogEntry) {
        if let Err(e) = self.ledger.append_action(entry) {
            log_pipeline_error!("Failed to record action", error = %e);
        }
    }
}

fn path_str(path: &Path) -> String {
    path.display().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use vsort_config::testing::TestEnvironment;

    struct FailingMover {
        calls: Arc<AtomicUsize>,
    }

    impl FileMover for FailingMover {
        fn move_file(&self, _from: &Path, _to: &Path) -> io::Result<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(io::Error::new(io::ErrorKind::Other, "disk on fire"))
        }
    }

    fn processor(env: &TestEnvironment) -> (Processor, Ledger) {
        let ledger = Ledger::open(&env.ledger_dir).unwrap();
        let processor = Processor::new(&env.config(), ledger.clone()).with_insights(Vec::new());
        (processor, ledger)
    }

    #[test]
    fn test_permanent_move_failure_retries_then_records_one_error() {
        let env = TestEnvironment::new().unwrap();
        let mut config = env.config();
        config.ingest.retry_attempts = 4;
        let ledger = Ledger::open(&env.ledger_dir).unwrap();
        let calls = Arc::new(AtomicUsize::new(0));
        let processor = Processor::new(&config, ledger.clone())
            .with_insights(Vec::new())
            .with_mover(Box::new(FailingMover {
                calls: calls.clone(),
            }));

        let file = env.create_file("stuck.txt", b"payload").unwrap();
        let mut ctx = PipelineContext::new();
        let outcome = processor.process(&mut ctx, &file, EventSource::Scan);

        assert!(matches!(outcome, Outcome::Failed { attempts: 4, .. }));
        assert_eq!(calls.load(Ordering::SeqCst), 4);
        assert!(file.exists());

        let actions = ledger.recent_actions(10).unwrap();
        assert_eq!(actions.len(), 1);
        assert_eq!(actions[0].action, ActionKind::Error);
        assert_eq!(actions[0].category, UNKNOWN_CATEGORY);
        assert!(actions[0].error_message.as_deref().unwrap().contains("disk on fire"));
        assert_eq!(ctx.stats.errors, 1);
        assert_eq!(ctx.pending_uploads, 0);
    }

    #[test]
    fn test_zero_attempts_still_tries_once() {
        let env = TestEnvironment::new().unwrap();
        let mut config = env.config();
        config.ingest.retry_attempts = 0;
        let ledger = Ledger::open(&env.ledger_dir).unwrap();
        let calls = Arc::new(AtomicUsize::new(0));
        let processor = Processor::new(&config, ledger).with_mover(Box::new(FailingMover {
            calls: calls.clone(),
        }));

        let file = env.create_file("once.txt", b"x").unwrap();
        processor.process(&mut PipelineContext::new(), &file, EventSource::Scan);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_move_then_duplicate() {
        let env = TestEnvironment::new().unwrap();
        let (processor, ledger) = processor(&env);
        let mut ctx = PipelineContext::new();

        let first = env.create_file("photo.png", b"same bytes").unwrap();
        let second = env.create_file("photo copy.png", b"same bytes").unwrap();

        let outcome = processor.process(&mut ctx, &first, EventSource::Scan);
        let Outcome::Moved { destination, record } = outcome else {
            panic!("expected a move, got {:?}", outcome);
        };
        assert_eq!(record.category, "Images");
        assert!(destination.starts_with(env.organized_folder.join("Images")));
        assert!(destination.exists());
        assert!(!first.exists());

        let outcome = processor.process(&mut ctx, &second, EventSource::Scan);
        assert!(matches!(outcome, Outcome::Duplicate { .. }));
        assert!(second.exists());

        let kinds: Vec<ActionKind> = ledger
            .recent_actions(10)
            .unwrap()
            .into_iter()
            .map(|a| a.action)
            .collect();
        assert_eq!(kinds, vec![ActionKind::DuplicateSkipped, ActionKind::Moved]);
        assert_eq!(ctx.pending_uploads, 1);
        assert_eq!(ctx.stats.moved, 1);
        assert_eq!(ctx.stats.duplicates, 1);
    }

    #[test]
    fn test_session_idempotence() {
        let env = TestEnvironment::new().unwrap();
        let (processor, ledger) = processor(&env);
        let mut ctx = PipelineContext::new();

        let file = env.create_file("twice.txt", b"once only").unwrap();
        processor.process(&mut ctx, &file, EventSource::Scan);
        // Same path reappears with new content.
        std::fs::write(&file, b"different").unwrap();
        let outcome = processor.process(&mut ctx, &file, EventSource::Watch);

        assert!(matches!(outcome, Outcome::AlreadyProcessed));
        assert_eq!(ledger.recent_actions(10).unwrap().len(), 1);
    }

    #[test]
    fn test_ignored_and_not_ready() {
        let env = TestEnvironment::new().unwrap();
        let mut config = env.config();
        config.ingest.min_file_age_secs = 3600;
        let ledger = Ledger::open(&env.ledger_dir).unwrap();
        let processor = Processor::new(&config, ledger.clone());
        let mut ctx = PipelineContext::new();

        let partial = env.create_file("movie.mp4.crdownload", b"...").unwrap();
        assert!(matches!(
            processor.process(&mut ctx, &partial, EventSource::Scan),
            Outcome::Ignored
        ));

        let fresh = env.create_file("fresh.txt", b"new").unwrap();
        assert!(matches!(
            processor.process(&mut ctx, &fresh, EventSource::Scan),
            Outcome::NotReady(Readiness::TooYoung(_))
        ));
        assert!(!ctx.was_processed(&fresh));
        assert!(ledger.recent_actions(10).unwrap().is_empty());
    }

    #[test]
    fn test_duplicates_disabled_moves_both() {
        let env = TestEnvironment::new().unwrap();
        let mut config = env.config();
        config.ingest.check_duplicates = false;
        let ledger = Ledger::open(&env.ledger_dir).unwrap();
        let processor = Processor::new(&config, ledger).with_insights(Vec::new());
        let mut ctx = PipelineContext::new();

        let a = env.create_file("a.txt", b"dup").unwrap();
        let b = env.create_file("b.txt", b"dup").unwrap();
        assert!(matches!(processor.process(&mut ctx, &a, EventSource::Scan), Outcome::Moved { .. }));
        assert!(matches!(processor.process(&mut ctx, &b, EventSource::Scan), Outcome::Moved { .. }));
        assert_eq!(ctx.pending_uploads, 2);
    }
}
