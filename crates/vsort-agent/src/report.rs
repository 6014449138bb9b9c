//! Daily summaries: upload, persist, and anchor their root hash.

use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::Context;
use chrono::{NaiveDate, Utc};
use serde_json::Value;
use sha2::{Digest, Sha256};
use vsort_cas::BlobStore;
use vsort_config::{log_batch_info, log_batch_warn};
use vsort_ledger::{AnchorRecord, DailyReportRecord, DailySummary, Ledger};

/// Source tag for anchors kept only in the local ledger.
pub const LOCAL_ANCHOR_SOURCE: &str = "local_ledger";

/// Records a report's root hash somewhere tamper-evident.
pub trait Anchor: Send + Sync {
    fn anchor(&self, date: NaiveDate, root_hash: &str) -> anyhow::Result<AnchorRecord>;

    /// True iff `root_hash` is what was anchored for `date`.
    fn verify(&self, date: NaiveDate, root_hash: &str) -> anyhow::Result<bool>;
}

/// Anchors into the ledger's anchor table. No external submission.
pub struct LocalAnchor {
    ledger: Ledger,
}

impl LocalAnchor {
    pub fn new(ledger: Ledger) -> Self {
        Self { ledger }
    }
}

impl Anchor for LocalAnchor {
    fn anchor(&self, date: NaiveDate, root_hash: &str) -> anyhow::Result<AnchorRecord> {
        let record = AnchorRecord {
            date,
            root_hash: root_hash.to_string(),
            tx_digest: None,
            source: LOCAL_ANCHOR_SOURCE.to_string(),
            anchored_at: Utc::now(),
        };
        self.ledger.save_anchor(&record).context("saving anchor")?;
        Ok(record)
    }

    fn verify(&self, date: NaiveDate, root_hash: &str) -> anyhow::Result<bool> {
        Ok(self
            .ledger
            .anchor(date)
            .context("reading anchor")?
            .is_some_and(|a| a.root_hash == root_hash))
    }
}

/// SHA-256 over the summary's compact JSON with keys sorted at every level.
pub fn report_root_hash(summary: &DailySummary) -> anyhow::Result<(String, Vec<u8>)> {
    let canonical = serde_json::to_vec(&sort_keys(serde_json::to_value(summary)?))?;
    Ok((hex::encode(Sha256::digest(&canonical)), canonical))
}

/// Rebuild objects in key order, whatever map type `serde_json` was built with.
fn sort_keys(value: Value) -> Value {
    match value {
        Value::Object(map) => {
            let sorted: BTreeMap<String, Value> =
                map.into_iter().map(|(k, v)| (k, sort_keys(v))).collect();
            Value::Object(sorted.into_iter().collect())
        }
        Value::Array(items) => Value::Array(items.into_iter().map(sort_keys).collect()),
        other => other,
    }
}

pub struct DailyReporter {
    ledger: Ledger,
    store: Arc<dyn BlobStore>,
    anchor: Box<dyn Anchor>,
    current_day: Option<NaiveDate>,
}

impl DailyReporter {
    pub fn new(ledger: Ledger, store: Arc<dyn BlobStore>, anchor: Box<dyn Anchor>) -> Self {
        Self {
            ledger,
            store,
            anchor,
            current_day: None,
        }
    }

    /// Summarize `date`. Days with no moved files produce no report.
    pub fn generate(&self, date: NaiveDate) -> anyhow::Result<Option<DailyReportRecord>> {
        let summary = self.ledger.daily_summary(date).context("summarizing day")?;
        if summary.total_files == 0 {
            return Ok(None);
        }

        let (root_hash, canonical) = report_root_hash(&summary)?;
        let blob_id = match self.store.put(&canonical) {
            Ok(id) => Some(id),
            Err(e) => {
                log_batch_warn!("Daily report upload failed", date = %date, error = %e);
                None
            }
        };

        let record = DailyReportRecord {
            summary,
            blob_id,
            root_hash,
            created_at: Utc::now(),
        };
        self.ledger
            .save_daily_report(&record)
            .context("saving daily report")?;
        self.anchor.anchor(date, &record.root_hash)?;

        log_batch_info!(
            "Daily report created",
            date = %date,
            files = record.summary.total_files,
            root_hash = %record.root_hash
        );
        Ok(Some(record))
    }

    /// Call periodically. When the UTC day changes, reports the day that
    /// just ended.
    pub fn tick(&mut self, today: NaiveDate) -> anyhow::Result<Option<DailyReportRecord>> {
        match self.current_day.replace(today) {
            Some(previous) if previous != today => self.generate(previous),
            _ => Ok(None),
        }
    }

    pub fn verify(&self, date: NaiveDate, root_hash: &str) -> anyhow::Result<bool> {
        self.anchor.verify(date, root_hash)
    }
}
