//! # vsort-ledger
//!
//! LMDB-backed, append-mostly ledger of everything the pipeline did.
//!
//! ## Databases
//!
//! | name | key | value |
//! |------|-----|-------|
//! | `actions` | id (u64 BE) | [`ActionLogEntry`] |
//! | `hashes` | content hash | id of first completed action |
//! | `pending` | id | () while awaiting batch upload |
//! | `uploads` | seq | [`UploadRecord`] |
//! | `reports` | `YYYY-MM-DD` | [`DailyReportRecord`] |
//! | `vault_files` | blob id | [`VaultFileRecord`] |
//! | `vault_folders` | seq | [`VaultFolderRecord`] |
//! | `rules` | rule name | `RuleSpec` (JSON) |
//! | `executions` | seq | [`ExecutionRecord`] |
//! | `anchors` | `YYYY-MM-DD` | [`AnchorRecord`] |

mod records;

pub use records::*;

use std::collections::BTreeMap;
use std::path::Path;

use chrono::{NaiveDate, Utc};
use heed::byteorder::BigEndian;
use heed::types::{DecodeIgnore, SerdeBincode, SerdeJson, Str, Unit, U64};
use heed::{Database, Env, EnvOpenOptions, RoTxn};
use thiserror::Error;
use tracing::debug;
use vsort_config::RuleSpec;

type Id = U64<BigEndian>;

#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("LMDB error: {0}")]
    Heed(#[from] heed::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Action not found: {0}")]
    NotFound(u64),
}

pub type Result<T> = std::result::Result<T, LedgerError>;

/// Shared handle; clones refer to the same environment.
#[derive(Clone)]
pub struct Ledger {
    env: Env,
    actions: Database<Id, SerdeBincode<ActionLogEntry>>,
    hashes: Database<Str, Id>,
    pending: Database<Id, Unit>,
    uploads: Database<Id, SerdeBincode<UploadRecord>>,
    reports: Database<Str, SerdeBincode<DailyReportRecord>>,
    vault_files: Database<Str, SerdeBincode<VaultFileRecord>>,
    vault_folders: Database<Id, SerdeBincode<VaultFolderRecord>>,
    rules: Database<Str, SerdeJson<RuleSpec>>,
    executions: Database<Id, SerdeBincode<ExecutionRecord>>,
    anchors: Database<Str, SerdeBincode<AnchorRecord>>,
}

impl Ledger {
    /// Default LMDB map size: 1GB (expandable)
    const DEFAULT_MAP_SIZE: usize = 1024 * 1024 * 1024;

    const MAX_DBS: u32 = 10;

    /// Open or create the ledger in the given directory.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        std::fs::create_dir_all(path)?;

        let env = unsafe {
            EnvOpenOptions::new()
                .map_size(Self::DEFAULT_MAP_SIZE)
                .max_dbs(Self::MAX_DBS)
                .open(path)?
        };

        let mut wtxn = env.write_txn()?;
        let actions = env.create_database(&mut wtxn, Some("actions"))?;
        let hashes = env.create_database(&mut wtxn, Some("hashes"))?;
        let pending = env.create_database(&mut wtxn, Some("pending"))?;
        let uploads = env.create_database(&mut wtxn, Some("uploads"))?;
        let reports = env.create_database(&mut wtxn, Some("reports"))?;
        let vault_files = env.create_database(&mut wtxn, Some("vault_files"))?;
        let vault_folders = env.create_database(&mut wtxn, Some("vault_folders"))?;
        let rules = env.create_database(&mut wtxn, Some("rules"))?;
        let executions = env.create_database(&mut wtxn, Some("executions"))?;
        let anchors = env.create_database(&mut wtxn, Some("anchors"))?;
        wtxn.commit()?;

        debug!("Opened ledger at {:?}", path);

        Ok(Self {
            env,
            actions,
            hashes,
            pending,
            uploads,
            reports,
            vault_files,
            vault_folders,
            rules,
            executions,
            anchors,
        })
    }

    fn next_id<T>(rtxn: &RoTxn, db: &Database<Id, T>) -> Result<u64> {
        let last = db.remap_data_type::<DecodeIgnore>().last(rtxn)?;
        Ok(last.map(|(id, ())| id + 1).unwrap_or(1))
    }

    // === Actions ===

    /// Append an action, assigning its id.
    ///
    /// Completed actions join the upload queue; completed actions with a
    /// content hash also feed duplicate detection.
    pub fn append_action(&self, mut entry: ActionLogEntry) -> Result<u64> {
        let mut wtxn = self.env.write_txn()?;
        let id = Self::next_id(&wtxn, &self.actions)?;
        entry.id = id;
        self.actions.put(&mut wtxn, &id, &entry)?;

        if entry.status == ActionStatus::Completed {
            self.pending.put(&mut wtxn, &id, &())?;
            if let Some(hash) = entry.content_hash.as_deref() {
                if self.hashes.get(&wtxn, hash)?.is_none() {
                    self.hashes.put(&mut wtxn, hash, &id)?;
                }
            }
        }
        wtxn.commit()?;

        vsort_config::log_ledger_debug!("Action recorded", id = id, action = %entry.action);
        Ok(id)
    }

    pub fn get_action(&self, id: u64) -> Result<Option<ActionLogEntry>> {
        let rtxn = self.env.read_txn()?;
        Ok(self.actions.get(&rtxn, &id)?)
    }

    /// True if a completed action already carries this content hash.
    pub fn hash_exists(&self, hash: &str) -> Result<bool> {
        if hash.is_empty() {
            return Ok(false);
        }
        let rtxn = self.env.read_txn()?;
        Ok(self.hashes.get(&rtxn, hash)?.is_some())
    }

    /// Oldest pending-for-upload actions first.
    pub fn pending_actions(&self, limit: usize) -> Result<Vec<ActionLogEntry>> {
        let rtxn = self.env.read_txn()?;
        let mut out = Vec::new();
        for item in self.pending.iter(&rtxn)? {
            if out.len() >= limit {
                break;
            }
            let (id, ()) = item?;
            if let Some(entry) = self.actions.get(&rtxn, &id)? {
                out.push(entry);
            }
        }
        Ok(out)
    }

    pub fn pending_count(&self) -> Result<u64> {
        let rtxn = self.env.read_txn()?;
        Ok(self.pending.len(&rtxn)?)
    }

    /// Backfill the blob reference and drop the ids from the upload queue.
    pub fn mark_uploaded(&self, ids: &[u64], blob_id: &str) -> Result<()> {
        let mut wtxn = self.env.write_txn()?;
        for id in ids {
            let mut entry = self
                .actions
                .get(&wtxn, id)?
                .ok_or(LedgerError::NotFound(*id))?;
            entry.remote_blob_id = Some(blob_id.to_string());
            self.actions.put(&mut wtxn, id, &entry)?;
            self.pending.delete(&mut wtxn, id)?;
        }

        let seq = Self::next_id(&wtxn, &self.uploads)?;
        let record = UploadRecord {
            blob_id: blob_id.to_string(),
            action_count: ids.len() as u64,
            uploaded_at: Utc::now(),
        };
        self.uploads.put(&mut wtxn, &seq, &record)?;
        wtxn.commit()?;
        Ok(())
    }

    /// Newest first.
    pub fn recent_actions(&self, limit: usize) -> Result<Vec<ActionLogEntry>> {
        let rtxn = self.env.read_txn()?;
        let mut out = Vec::with_capacity(limit);
        for item in self.actions.rev_iter(&rtxn)?.take(limit) {
            let (_, entry) = item?;
            out.push(entry);
        }
        Ok(out)
    }

    fn for_each_action<F: FnMut(ActionLogEntry)>(&self, mut f: F) -> Result<()> {
        let rtxn = self.env.read_txn()?;
        for item in self.actions.iter(&rtxn)? {
            let (_, entry) = item?;
            f(entry);
        }
        Ok(())
    }

    /// Moved files per category.
    pub fn category_breakdown(&self) -> Result<BTreeMap<String, CategoryStats>> {
        let mut out: BTreeMap<String, CategoryStats> = BTreeMap::new();
        self.for_each_action(|entry| {
            if entry.action == ActionKind::Moved {
                let stats = out.entry(entry.category).or_default();
                stats.count += 1;
                stats.size += entry.size;
            }
        })?;
        Ok(out)
    }

    /// Moved files for one UTC day.
    pub fn daily_summary(&self, date: NaiveDate) -> Result<DailySummary> {
        let mut summary = DailySummary {
            date,
            total_files: 0,
            total_size: 0,
            categories: BTreeMap::new(),
        };
        self.for_each_action(|entry| {
            if entry.action == ActionKind::Moved && entry.timestamp.date_naive() == date {
                summary.total_files += 1;
                summary.total_size += entry.size;
                *summary.categories.entry(entry.category).or_insert(0) += 1;
            }
        })?;
        Ok(summary)
    }

    pub fn statistics(&self) -> Result<Statistics> {
        let today = Utc::now().date_naive();
        let mut stats = Statistics::default();
        self.for_each_action(|entry| match entry.action {
            ActionKind::Moved => {
                stats.total_moved += 1;
                stats.total_size += entry.size;
                if entry.timestamp.date_naive() == today {
                    stats.moved_today += 1;
                }
            }
            ActionKind::DuplicateSkipped => stats.total_duplicates += 1,
            ActionKind::Error => stats.total_errors += 1,
        })?;

        let rtxn = self.env.read_txn()?;
        stats.uploads = self.uploads.len(&rtxn)?;
        stats.pending_upload = self.pending.len(&rtxn)?;
        Ok(stats)
    }

    pub fn uploads(&self) -> Result<Vec<UploadRecord>> {
        let rtxn = self.env.read_txn()?;
        let mut out = Vec::new();
        for item in self.uploads.iter(&rtxn)? {
            out.push(item?.1);
        }
        Ok(out)
    }

    // === Daily reports & anchors ===

    pub fn save_daily_report(&self, record: &DailyReportRecord) -> Result<()> {
        let key = record.summary.date.to_string();
        let mut wtxn = self.env.write_txn()?;
        self.reports.put(&mut wtxn, &key, record)?;
        wtxn.commit()?;
        Ok(())
    }

    pub fn daily_report(&self, date: NaiveDate) -> Result<Option<DailyReportRecord>> {
        let rtxn = self.env.read_txn()?;
        Ok(self.reports.get(&rtxn, &date.to_string())?)
    }

    pub fn save_anchor(&self, record: &AnchorRecord) -> Result<()> {
        let key = record.date.to_string();
        let mut wtxn = self.env.write_txn()?;
        self.anchors.put(&mut wtxn, &key, record)?;
        wtxn.commit()?;
        Ok(())
    }

    pub fn anchor(&self, date: NaiveDate) -> Result<Option<AnchorRecord>> {
        let rtxn = self.env.read_txn()?;
        Ok(self.anchors.get(&rtxn, &date.to_string())?)
    }

    // === Vault projections ===

    pub fn save_vault_file(&self, record: &VaultFileRecord) -> Result<()> {
        let mut wtxn = self.env.write_txn()?;
        self.vault_files.put(&mut wtxn, &record.blob_id, record)?;
        wtxn.commit()?;
        Ok(())
    }

    pub fn vault_file(&self, blob_id: &str) -> Result<Option<VaultFileRecord>> {
        let rtxn = self.env.read_txn()?;
        Ok(self.vault_files.get(&rtxn, blob_id)?)
    }

    pub fn vault_files(&self) -> Result<Vec<VaultFileRecord>> {
        let rtxn = self.env.read_txn()?;
        let mut out = Vec::new();
        for item in self.vault_files.iter(&rtxn)? {
            out.push(item?.1);
        }
        Ok(out)
    }

    pub fn save_vault_folder(&self, record: &VaultFolderRecord) -> Result<u64> {
        let mut wtxn = self.env.write_txn()?;
        let seq = Self::next_id(&wtxn, &self.vault_folders)?;
        self.vault_folders.put(&mut wtxn, &seq, record)?;
        wtxn.commit()?;
        Ok(seq)
    }

    pub fn vault_folders(&self) -> Result<Vec<VaultFolderRecord>> {
        let rtxn = self.env.read_txn()?;
        let mut out = Vec::new();
        for item in self.vault_folders.iter(&rtxn)? {
            out.push(item?.1);
        }
        Ok(out)
    }

    // === Workflow rules & executions ===

    /// Insert or replace by rule name.
    pub fn save_rule(&self, rule: &RuleSpec) -> Result<()> {
        let mut wtxn = self.env.write_txn()?;
        self.rules.put(&mut wtxn, &rule.name, rule)?;
        wtxn.commit()?;
        Ok(())
    }

    pub fn remove_rule(&self, name: &str) -> Result<bool> {
        let mut wtxn = self.env.write_txn()?;
        let removed = self.rules.delete(&mut wtxn, name)?;
        wtxn.commit()?;
        Ok(removed)
    }

    pub fn rules(&self) -> Result<Vec<RuleSpec>> {
        let rtxn = self.env.read_txn()?;
        let mut out = Vec::new();
        for item in self.rules.iter(&rtxn)? {
            out.push(item?.1);
        }
        Ok(out)
    }

    pub fn record_execution(&self, record: &ExecutionRecord) -> Result<u64> {
        let mut wtxn = self.env.write_txn()?;
        let seq = Self::next_id(&wtxn, &self.executions)?;
        self.executions.put(&mut wtxn, &seq, record)?;
        wtxn.commit()?;
        Ok(seq)
    }

    /// Newest first.
    pub fn recent_executions(&self, limit: usize) -> Result<Vec<ExecutionRecord>> {
        let rtxn = self.env.read_txn()?;
        let mut out = Vec::with_capacity(limit);
        for item in self.executions.rev_iter(&rtxn)?.take(limit) {
            out.push(item?.1);
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn moved(path: &str, category: &str, hash: &str, size: u64) -> ActionLogEntry {
        ActionLogEntry::new(ActionKind::Moved, path, category)
            .with_new_path(format!("/organized/{}", path))
            .with_size(size)
            .with_hash(Some(hash.to_string()))
    }

    #[test]
    fn test_append_assigns_increasing_ids() {
        let temp = TempDir::new().unwrap();
        let ledger = Ledger::open(temp.path()).unwrap();

        let a = ledger.append_action(moved("a", "Images", "h1", 1)).unwrap();
        let b = ledger.append_action(moved("b", "Images", "h2", 1)).unwrap();
        assert_eq!(a, 1);
        assert_eq!(b, 2);
        assert_eq!(ledger.get_action(b).unwrap().unwrap().original_path, "b");
    }

    #[test]
    fn test_hash_exists_only_for_completed() {
        let temp = TempDir::new().unwrap();
        let ledger = Ledger::open(temp.path()).unwrap();

        let failed = ActionLogEntry::new(ActionKind::Error, "x", "Other")
            .with_hash(Some("deadbeef".to_string()))
            .with_error("boom");
        ledger.append_action(failed).unwrap();
        assert!(!ledger.hash_exists("deadbeef").unwrap());

        ledger.append_action(moved("y", "Other", "deadbeef", 3)).unwrap();
        assert!(ledger.hash_exists("deadbeef").unwrap());
        assert!(!ledger.hash_exists("").unwrap());
    }

    #[test]
    fn test_pending_and_mark_uploaded() {
        let temp = TempDir::new().unwrap();
        let ledger = Ledger::open(temp.path()).unwrap();

        for i in 0..5 {
            ledger
                .append_action(moved(&format!("f{}", i), "Code", &format!("h{}", i), 10))
                .unwrap();
        }
        ledger
            .append_action(ActionLogEntry::new(ActionKind::Error, "bad", "Other"))
            .unwrap();
        assert_eq!(ledger.pending_count().unwrap(), 5);

        let batch = ledger.pending_actions(3).unwrap();
        assert_eq!(batch.len(), 3);
        let ids: Vec<u64> = batch.iter().map(|e| e.id).collect();
        ledger.mark_uploaded(&ids, "blob-1").unwrap();

        assert_eq!(ledger.pending_count().unwrap(), 2);
        assert_eq!(
            ledger.get_action(ids[0]).unwrap().unwrap().remote_blob_id.as_deref(),
            Some("blob-1")
        );
        assert_eq!(ledger.uploads().unwrap().len(), 1);
    }

    #[test]
    fn test_breakdown_and_daily_summary() {
        let temp = TempDir::new().unwrap();
        let ledger = Ledger::open(temp.path()).unwrap();

        ledger.append_action(moved("a", "Images", "h1", 100)).unwrap();
        ledger.append_action(moved("b", "Images", "h2", 50)).unwrap();
        ledger.append_action(moved("c", "Code", "h3", 7)).unwrap();
        ledger
            .append_action(ActionLogEntry::new(ActionKind::DuplicateSkipped, "d", "Code"))
            .unwrap();

        let breakdown = ledger.category_breakdown().unwrap();
        assert_eq!(breakdown["Images"], CategoryStats { count: 2, size: 150 });
        assert_eq!(breakdown["Code"].count, 1);

        let today = Utc::now().date_naive();
        let summary = ledger.daily_summary(today).unwrap();
        assert_eq!(summary.total_files, 3);
        assert_eq!(summary.total_size, 157);

        let stats = ledger.statistics().unwrap();
        assert_eq!(stats.total_moved, 3);
        assert_eq!(stats.total_duplicates, 1);
        assert_eq!(stats.moved_today, 3);
    }

    #[test]
    fn test_recent_actions_newest_first() {
        let temp = TempDir::new().unwrap();
        let ledger = Ledger::open(temp.path()).unwrap();

        for i in 0..4 {
            ledger
                .append_action(moved(&format!("f{}", i), "Other", &format!("h{}", i), 1))
                .unwrap();
        }
        let recent = ledger.recent_actions(2).unwrap();
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].original_path, "f3");
        assert_eq!(recent[1].original_path, "f2");
    }
}
