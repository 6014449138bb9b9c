//! Rows stored in the ledger.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// Terminal outcome of one pipeline run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ActionKind {
    Moved,
    DuplicateSkipped,
    Error,
}

impl ActionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionKind::Moved => "MOVED",
            ActionKind::DuplicateSkipped => "DUPLICATE_SKIPPED",
            ActionKind::Error => "ERROR",
        }
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionStatus {
    Completed,
    Failed,
}

/// One append-only ledger row. Only `remote_blob_id` is ever updated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionLogEntry {
    /// Assigned on append
    pub id: u64,
    pub timestamp: DateTime<Utc>,
    pub action: ActionKind,
    pub original_path: String,
    pub new_path: Option<String>,
    pub category: String,
    pub size: u64,
    pub content_hash: Option<String>,
    pub remote_blob_id: Option<String>,
    pub status: ActionStatus,
    pub error_message: Option<String>,
}

impl ActionLogEntry {
    pub fn new(action: ActionKind, original_path: impl Into<String>, category: impl Into<String>) -> Self {
        let status = match action {
            ActionKind::Error => ActionStatus::Failed,
            _ => ActionStatus::Completed,
        };
        Self {
            id: 0,
            timestamp: Utc::now(),
            action,
            original_path: original_path.into(),
            new_path: None,
            category: category.into(),
            size: 0,
            content_hash: None,
            remote_blob_id: None,
            status,
            error_message: None,
        }
    }

    pub fn with_new_path(mut self, path: impl Into<String>) -> Self {
        self.new_path = Some(path.into());
        self
    }

    pub fn with_size(mut self, size: u64) -> Self {
        self.size = size;
        self
    }

    pub fn with_hash(mut self, hash: Option<String>) -> Self {
        self.content_hash = hash;
        self
    }

    pub fn with_error(mut self, message: impl Into<String>) -> Self {
        self.error_message = Some(message.into());
        self
    }
}

/// One batch upload of pending actions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadRecord {
    pub blob_id: String,
    pub action_count: u64,
    pub uploaded_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoryStats {
    pub count: u64,
    pub size: u64,
}

/// Moved files for one UTC day.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DailySummary {
    pub date: NaiveDate,
    pub total_files: u64,
    pub total_size: u64,
    pub categories: BTreeMap<String, u64>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Statistics {
    pub total_moved: u64,
    pub total_duplicates: u64,
    pub total_errors: u64,
    pub total_size: u64,
    pub uploads: u64,
    pub pending_upload: u64,
    pub moved_today: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DailyReportRecord {
    pub summary: DailySummary,
    pub blob_id: Option<String>,
    pub root_hash: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VaultFileRecord {
    pub blob_id: String,
    pub filename: String,
    pub key_hex: String,
    pub nonce_hex: String,
    pub size: u64,
    pub encrypted_size: u64,
    pub mime: String,
    pub sha256: String,
    pub share_token: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VaultFolderRecord {
    pub folder_name: String,
    pub file_count: u64,
    pub root_hash: String,
    pub key_hex: String,
    pub manifest_blob_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Result of one workflow rule firing on one file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionRecord {
    pub rule_name: String,
    pub file_path: String,
    pub actions_executed: Vec<String>,
    pub errors: Vec<String>,
    pub success: bool,
    pub executed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnchorRecord {
    pub date: NaiveDate,
    pub root_hash: String,
    pub tx_digest: Option<String>,
    pub source: String,
    pub anchored_at: DateTime<Utc>,
}
