//! # vsort-cas
//!
//! Content-addressed blob storage for vaultsort.
//!
//! Two backends sit behind the [`BlobStore`] trait:
//! - [`CasStore`]: a local BLAKE3-addressed directory, used offline and in tests
//! - [`HttpBlobStore`]: a remote publisher/aggregator pair
//!
//! ## Local Directory Layout
//!
//! ```text
//! ~/.vsort/blobs/
//! └── blake3/
//!     └── ab/
//!         └── cd/
//!             └── abcd1234...efgh
//! ```

mod http;

pub use http::HttpBlobStore;

use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::instrument;
use vsort_config::{BlobBackend, BlobStoreConfig};

/// BLAKE3 hash type (32 bytes)
pub type Blake3Hash = [u8; 32];

/// Errors that can occur during blob store operations
#[derive(Error, Debug)]
pub enum CasError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Blob not found: {id}")]
    NotFound { id: String },

    #[error("Hash mismatch: expected {expected}, got {actual}")]
    HashMismatch { expected: String, actual: String },

    #[error("Invalid blob id: {0}")]
    InvalidId(String),

    #[error("Payload too large: {size} bytes exceeds limit of {limit} bytes")]
    PayloadTooLarge { size: usize, limit: usize },

    #[error("Blob store returned HTTP {code}: {body}")]
    Status { code: u16, body: String },

    #[error("Blob store unreachable: {0}")]
    Transport(String),

    #[error("Unexpected blob store response: {0}")]
    InvalidResponse(String),
}

pub type Result<T> = std::result::Result<T, CasError>;

/// A content-addressed store: bytes in, id out; id in, bytes out.
///
/// Storing identical content twice may return the same id.
pub trait BlobStore: Send + Sync {
    fn put(&self, data: &[u8]) -> Result<String>;

    fn get(&self, id: &str) -> Result<Vec<u8>>;

    /// Public location of a blob, for display and share pages.
    fn blob_url(&self, id: &str) -> String;
}

impl<T: BlobStore + ?Sized> BlobStore for Box<T> {
    fn put(&self, data: &[u8]) -> Result<String> {
        (**self).put(data)
    }

    fn get(&self, id: &str) -> Result<Vec<u8>> {
        (**self).get(id)
    }

    fn blob_url(&self, id: &str) -> String {
        (**self).blob_url(id)
    }
}

impl<T: BlobStore + ?Sized> BlobStore for std::sync::Arc<T> {
    fn put(&self, data: &[u8]) -> Result<String> {
        (**self).put(data)
    }

    fn get(&self, id: &str) -> Result<Vec<u8>> {
        (**self).get(id)
    }

    fn blob_url(&self, id: &str) -> String {
        (**self).blob_url(id)
    }
}

/// Build the configured backend.
pub fn open_blob_store(config: &BlobStoreConfig) -> Result<Box<dyn BlobStore>> {
    match config.backend {
        BlobBackend::Http => Ok(Box::new(HttpBlobStore::from_config(config))),
        BlobBackend::Local => Ok(Box::new(CasStore::new(&config.local_root)?)),
    }
}

/// Local content-addressable store
///
/// Stores blobs indexed by their BLAKE3 hash with a 2-level prefix fan-out.
#[derive(Debug, Clone)]
pub struct CasStore {
    root: PathBuf,
}

impl CasStore {
    /// Create a new CAS store at the given root directory.
    ///
    /// The directory will be created if it doesn't exist.
    pub fn new<P: AsRef<Path>>(root: P) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    /// Compute the BLAKE3 hash of the given bytes.
    #[inline]
    pub fn compute_hash(data: &[u8]) -> Blake3Hash {
        *blake3::hash(data).as_bytes()
    }

    /// Parse a hex id into a hash.
    pub fn parse_id(id: &str) -> Result<Blake3Hash> {
        let mut hash = [0u8; 32];
        hex::decode_to_slice(id, &mut hash).map_err(|_| CasError::InvalidId(id.to_string()))?;
        Ok(hash)
    }

    /// Layout: `blake3/ab/cd/<hex>`
    fn blob_path(&self, hex: &str) -> PathBuf {
        self.root
            .join("blake3")
            .join(&hex[..2])
            .join(&hex[2..4])
            .join(hex)
    }

    /// Store bytes, returning the hex content hash.
    ///
    /// If the content already exists, this is a no-op.
    #[instrument(skip(self, data), level = "debug")]
    pub fn store(&self, data: &[u8]) -> Result<String> {
        let hex = hex::encode(Self::compute_hash(data));
        let path = self.blob_path(&hex);

        if path.exists() {
            return Ok(hex);
        }

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        // Write atomically using temp file + rename
        let temp_path = path.with_file_name(format!(
            "{}.{}.{:?}.tmp",
            hex,
            std::process::id(),
            std::thread::current().id()
        ));
        let mut file = File::create(&temp_path)?;
        file.write_all(data)?;
        file.sync_all()?;

        if let Err(e) = fs::rename(&temp_path, &path) {
            let _ = fs::remove_file(&temp_path);
            // Lost a race against identical content
            if path.exists() {
                return Ok(hex);
            }
            return Err(CasError::Io(e));
        }

        Ok(hex)
    }

    /// Retrieve bytes by hex id, verifying the content hash.
    #[instrument(skip(self), level = "debug")]
    pub fn fetch(&self, id: &str) -> Result<Vec<u8>> {
        let expected = Self::parse_id(id)?;
        let hex = hex::encode(expected);
        let path = self.blob_path(&hex);
        if !path.exists() {
            return Err(CasError::NotFound { id: hex });
        }

        let data = fs::read(&path)?;

        let actual = Self::compute_hash(&data);
        if actual != expected {
            return Err(CasError::HashMismatch {
                expected: hex,
                actual: hex::encode(actual),
            });
        }

        Ok(data)
    }

    /// Check if a blob exists.
    pub fn exists(&self, id: &str) -> bool {
        match Self::parse_id(id) {
            Ok(hash) => self.blob_path(&hex::encode(hash)).exists(),
            Err(_) => false,
        }
    }

    /// Get the root path of the store.
    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl BlobStore for CasStore {
    fn put(&self, data: &[u8]) -> Result<String> {
        self.store(data)
    }

    fn get(&self, id: &str) -> Result<Vec<u8>> {
        self.fetch(id)
    }

    fn blob_url(&self, id: &str) -> String {
        match Self::parse_id(id) {
            Ok(hash) => format!("file://{}", self.blob_path(&hex::encode(hash)).display()),
            Err(_) => format!("file://{}/{}", self.root.display(), id),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_store_and_retrieve() {
        let temp = TempDir::new().unwrap();
        let cas = CasStore::new(temp.path()).unwrap();

        let data = b"Hello, vaultsort!";
        let id = cas.store(data).unwrap();

        assert_eq!(id.len(), 64);
        assert_eq!(cas.fetch(&id).unwrap(), data);
    }

    #[test]
    fn test_deduplication() {
        let temp = TempDir::new().unwrap();
        let cas = CasStore::new(temp.path()).unwrap();

        let id1 = cas.store(b"same bytes").unwrap();
        let id2 = cas.store(b"same bytes").unwrap();
        assert_eq!(id1, id2);
    }

    #[test]
    fn test_empty_blob() {
        let temp = TempDir::new().unwrap();
        let cas = CasStore::new(temp.path()).unwrap();

        let id = cas.put(b"").unwrap();
        assert!(cas.get(&id).unwrap().is_empty());
    }

    #[test]
    fn test_not_found() {
        let temp = TempDir::new().unwrap();
        let cas = CasStore::new(temp.path()).unwrap();

        let missing = hex::encode(CasStore::compute_hash(b"never stored"));
        assert!(matches!(cas.fetch(&missing), Err(CasError::NotFound { .. })));
        assert!(!cas.exists(&missing));
    }

    #[test]
    fn test_invalid_id() {
        let temp = TempDir::new().unwrap();
        let cas = CasStore::new(temp.path()).unwrap();
        assert!(matches!(cas.fetch("../etc"), Err(CasError::InvalidId(_))));
    }

    #[test]
    fn test_corruption_detected() {
        let temp = TempDir::new().unwrap();
        let cas = CasStore::new(temp.path()).unwrap();

        let id = cas.store(b"original").unwrap();
        fs::write(cas.blob_path(&id), b"tampered").unwrap();

        assert!(matches!(cas.fetch(&id), Err(CasError::HashMismatch { .. })));
    }

    #[test]
    fn test_layout() {
        let temp = TempDir::new().unwrap();
        let cas = CasStore::new(temp.path()).unwrap();

        let id = cas.store(b"layout").unwrap();
        let expected = temp
            .path()
            .join("blake3")
            .join(&id[..2])
            .join(&id[2..4])
            .join(&id);
        assert!(expected.exists());
        assert!(cas.blob_url(&id).starts_with("file://"));
    }
}
