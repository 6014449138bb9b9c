//! Test environment abstraction for isolated testing.
//!
//! Provides `TestEnvironment` to manage:
//! - An isolated watch folder and organized folder
//! - A temporary ledger directory
//! - A local blob store root
//!
//! # Usage
//!
//! ```ignore
//! use vsort_config::testing::TestEnvironment;
//!
//! #[test]
//! fn test_something() {
//!     let env = TestEnvironment::new().unwrap();
//!     let file = env.create_file("invoice.txt", b"Total due: 10").unwrap();
//!     let config = env.config();
//! }
//! ```

use crate::{BlobBackend, Config};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU32, Ordering};
use tempfile::TempDir;

/// Atomic counter for unique test IDs
static TEST_COUNTER: AtomicU32 = AtomicU32::new(0);

/// Isolated test environment with unique paths
pub struct TestEnvironment {
    /// Temporary directory (dropped on cleanup)
    _temp_dir: TempDir,
    /// Folder the pipeline watches
    pub watch_folder: PathBuf,
    /// Root of the category structure
    pub organized_folder: PathBuf,
    /// LMDB ledger directory
    pub ledger_dir: PathBuf,
    /// Local blob store root
    pub cas_root: PathBuf,
    /// Unique test ID
    pub test_id: u32,
}

impl TestEnvironment {
    /// Create a new isolated test environment
    pub fn new() -> anyhow::Result<Self> {
        let test_id = TEST_COUNTER.fetch_add(1, Ordering::Relaxed);
        let temp_dir = TempDir::new()?;
        let root = temp_dir.path();

        let watch_folder = root.join("incoming");
        let organized_folder = root.join("organized");
        let ledger_dir = root.join(format!("ledger-{}", test_id));
        let cas_root = root.join("cas");

        for dir in [&watch_folder, &organized_folder, &ledger_dir, &cas_root] {
            std::fs::create_dir_all(dir)?;
        }

        Ok(Self {
            _temp_dir: temp_dir,
            watch_folder,
            organized_folder,
            ledger_dir,
            cas_root,
            test_id,
        })
    }

    /// Create a file inside the watch folder
    pub fn create_file(&self, relative_path: &str, content: &[u8]) -> anyhow::Result<PathBuf> {
        let path = self.watch_folder.join(relative_path);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&path, content)?;
        Ok(path)
    }

    /// Create a directory inside the watch folder
    pub fn create_dir(&self, relative_path: &str) -> anyhow::Result<PathBuf> {
        let path = self.watch_folder.join(relative_path);
        std::fs::create_dir_all(&path)?;
        Ok(path)
    }

    /// Config pointing every path at this environment.
    ///
    /// Files are ready immediately, retries do not sleep, and uploads go to
    /// the local blob store.
    pub fn config(&self) -> Config {
        let mut cfg = Config::default();
        cfg.folders.watch_folder = self.watch_folder.clone();
        cfg.folders.organized_folder = self.organized_folder.clone();
        cfg.database.path = self.ledger_dir.clone();
        cfg.blob_store.backend = BlobBackend::Local;
        cfg.blob_store.local_root = self.cas_root.clone();
        cfg.ingest.min_file_age_secs = 0;
        cfg.ingest.retry_delay_secs = 0;
        cfg
    }
}

impl Default for TestEnvironment {
    fn default() -> Self {
        Self::new().expect("Failed to create test environment")
    }
}
