//! Processor, workflow engine, vault and batcher wired together.

use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use chrono::{NaiveDate, Utc};
use vsort_cas::{open_blob_store, BlobStore};
use vsort_config::{log_pipeline_info, log_pipeline_warn, Config};
use vsort_ledger::{DailyReportRecord, Ledger};

use crate::archive::VaultArchiver;
use crate::batcher::UploadBatcher;
use crate::processor::{EventSource, Outcome, PipelineContext, Processor, SessionStats};
use crate::report::{DailyReporter, LocalAnchor};
use crate::scan::DirectoryScanner;
use crate::workflow::{BackupHook, ExecutionResult, WorkflowEngine};

/// Everything that happened to one path.
#[derive(Debug)]
pub struct Processed {
    pub outcome: Outcome,
    pub workflow: Vec<ExecutionResult>,
    /// Set when this file tipped the batch over its threshold
    pub batch_blob: Option<String>,
}

pub struct Pipeline {
    processor: Processor,
    workflows: Option<WorkflowEngine>,
    archiver: Option<VaultArchiver>,
    batcher: UploadBatcher,
    reporter: DailyReporter,
    ledger: Ledger,
    ctx: PipelineContext,
}

impl Pipeline {
    /// Build from configuration. Category folders are created up front.
    pub fn from_config(config: &Config, ledger: Ledger) -> anyhow::Result<Self> {
        let processor = Processor::new(config, ledger.clone());
        processor
            .classifier()
            .ensure_folders(&config.folders.organized_folder)
            .with_context(|| {
                format!(
                    "creating category folders under {}",
                    config.folders.organized_folder.display()
                )
            })?;

        let store: Arc<dyn BlobStore> =
            Arc::from(open_blob_store(&config.blob_store).context("opening blob store")?);

        let archiver = if config.vault.enabled {
            Some(VaultArchiver::from_config(config, ledger.clone())?)
        } else {
            None
        };

        let workflows = if config.workflows.enabled {
            Some(WorkflowEngine::load(
                config.workflows.rules.clone(),
                config.folders.organized_folder.clone(),
                ledger.clone(),
            )?)
        } else {
            None
        };

        Ok(Self {
            processor,
            workflows,
            archiver,
            batcher: UploadBatcher::new(store.clone(), ledger.clone(), &config.batch),
            reporter: DailyReporter::new(ledger.clone(), store, Box::new(LocalAnchor::new(ledger.clone()))),
            ledger,
            ctx: PipelineContext::new(),
        })
    }

    pub fn with_processor(mut self, processor: Processor) -> Self {
        self.processor = processor;
        self
    }

    pub fn process(&mut self, path: &Path, source: EventSource) -> Processed {
        let outcome = self.processor.process(&mut self.ctx, path, source);

        let mut batch_blob = None;
        let mut workflow = Vec::new();
        if let Outcome::Moved { destination, .. } = &outcome {
            batch_blob = self.batcher.maybe_flush(&mut self.ctx);
            if let Some(engine) = self.workflows.as_mut() {
                let hook = self.archiver.as_ref().map(|a| a as &dyn BackupHook);
                workflow = engine.evaluate(destination, hook);
            }
        }

        Processed {
            outcome,
            workflow,
            batch_blob,
        }
    }

    /// Process every top-level entry of `dir`, then flush the batch.
    /// Returns how many files reached a terminal state.
    pub fn scan_once(&mut self, dir: &Path) -> usize {
        let paths = DirectoryScanner::new(dir.to_path_buf(), self.processor.ignore().clone()).scan();
        let mut handled = 0;
        for path in paths {
            if self.process(&path, EventSource::Scan).outcome.is_terminal() {
                handled += 1;
            }
        }
        self.flush();
        log_pipeline_info!("Scan complete", dir = %dir.display(), handled = handled);
        handled
    }

    /// Upload whatever is pending, regardless of the threshold.
    pub fn flush(&mut self) -> Option<String> {
        self.batcher.flush(&mut self.ctx)
    }

    /// Hand the current UTC date to the reporter; reports on rollover.
    pub fn report_tick(&mut self) {
        if let Err(e) = self.reporter.tick(Utc::now().date_naive()) {
            log_pipeline_warn!("Daily report failed", error = %format!("{:#}", e));
        }
    }

    pub fn generate_report(&self, date: NaiveDate) -> anyhow::Result<Option<DailyReportRecord>> {
        self.reporter.generate(date)
    }

    pub fn stats(&self) -> SessionStats {
        self.ctx.stats
    }

    pub fn context(&self) -> &PipelineContext {
        &self.ctx
    }

    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    pub fn workflows(&self) -> Option<&WorkflowEngine> {
        self.workflows.as_ref()
    }

    pub fn workflows_mut(&mut self) -> Option<&mut WorkflowEngine> {
        self.workflows.as_mut()
    }

    pub fn archiver(&self) -> Option<&VaultArchiver> {
        self.archiver.as_ref()
    }
}
