//! Per-file and per-folder vault descriptors.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Placeholder written over key material in audit copies.
pub const REDACTED: &str = "[REDACTED]";

/// Everything needed to fetch and decrypt one stored file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VaultManifest {
    pub blob_id: String,
    pub filename: String,
    pub key_hex: String,
    pub nonce_hex: String,
    /// SHA-256 of the plaintext
    pub sha256: String,
    pub size: u64,
    pub encrypted_size: u64,
    pub mime: String,
    pub created_at: DateTime<Utc>,
}

/// One file inside a folder upload. Exactly one of `manifest` / `error` is set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FolderEntry {
    /// Path relative to the folder root, `/`-separated
    pub relative_path: String,
    pub manifest: Option<VaultManifest>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FolderManifest {
    pub folder_name: String,
    /// Shared by every file in the folder
    pub key_hex: String,
    pub root_hash: String,
    pub file_count: usize,
    /// Sorted by `relative_path`
    pub entries: Vec<FolderEntry>,
    /// Blob holding the redacted copy, if that upload succeeded
    pub manifest_blob_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl FolderManifest {
    pub fn stored(&self) -> impl Iterator<Item = (&str, &VaultManifest)> {
        self.entries.iter().filter_map(|e| {
            e.manifest
                .as_ref()
                .map(|m| (e.relative_path.as_str(), m))
        })
    }

    pub fn failed(&self) -> impl Iterator<Item = &FolderEntry> {
        self.entries.iter().filter(|e| e.error.is_some())
    }

    /// Copy with every key replaced by [`REDACTED`]. Nonces stay: without
    /// the key they reveal nothing.
    pub fn redacted(&self) -> FolderManifest {
        let mut copy = self.clone();
        copy.key_hex = REDACTED.to_string();
        for entry in &mut copy.entries {
            if let Some(m) = entry.manifest.as_mut() {
                m.key_hex = REDACTED.to_string();
            }
        }
        copy
    }
}

/// Fold plaintext digests into one running SHA-256, in relative-path order.
///
/// Input order does not matter; the pairs are sorted first.
pub fn compute_root_hash<'a, I>(files: I) -> String
where
    I: IntoIterator<Item = (&'a str, &'a str)>,
{
    let mut files: Vec<(&str, &str)> = files.into_iter().collect();
    files.sort_by(|a, b| a.0.cmp(b.0));

    let mut hasher = Sha256::new();
    for (_, digest) in files {
        hasher.update(digest.as_bytes());
    }
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_root_hash_order_independent() {
        let forward = compute_root_hash([("a.txt", "aaaa"), ("b.txt", "bbbb")]);
        let reverse = compute_root_hash([("b.txt", "bbbb"), ("a.txt", "aaaa")]);
        assert_eq!(forward, reverse);
    }

    #[test]
    fn test_root_hash_depends_on_paths() {
        // Same digests bound to swapped names chain differently
        let one = compute_root_hash([("a.txt", "aaaa"), ("b.txt", "bbbb")]);
        let two = compute_root_hash([("a.txt", "bbbb"), ("b.txt", "aaaa")]);
        assert_ne!(one, two);
    }

    #[test]
    fn test_root_hash_empty_folder() {
        let empty: [(&str, &str); 0] = [];
        assert_eq!(
            compute_root_hash(empty),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }
}
