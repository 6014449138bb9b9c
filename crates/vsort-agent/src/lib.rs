//! # vsort-agent
//!
//! Watches a download folder and organizes what lands there: fingerprint,
//! classify, drop duplicates, relocate under a category tree, then run
//! workflow rules (vault backup, unzip, image to PDF). Every outcome is
//! written to the ledger and periodically batched to the blob store.

pub mod archive;
pub mod batcher;
pub mod classify;
pub mod convert;
pub mod daemon;
pub mod dedup;
pub mod extract;
pub mod fingerprint;
pub mod ignore;
pub mod intel;
pub mod pipeline;
pub mod planner;
pub mod processor;
pub mod report;
pub mod scan;
pub mod watch;
pub mod workflow;

pub use archive::{ArchivedFile, VaultArchiver};
pub use batcher::UploadBatcher;
pub use classify::{Classifier, DEFAULT_CATEGORY};
pub use daemon::{run_agent, run_consumer};
pub use fingerprint::{Analyzer, FileRecord, Fingerprint, Readiness};
pub use pipeline::{Pipeline, Processed};
pub use processor::{EventSource, Outcome, PipelineContext, Processor, SessionStats};
pub use report::{Anchor, DailyReporter, LocalAnchor};
pub use watch::IngestEvent;
pub use workflow::{default_rules, ExecutionResult, WorkflowEngine};
