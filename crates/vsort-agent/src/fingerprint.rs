//! Readiness gate, streaming content hash, and file analysis.

use std::fmt;
use std::fs::File;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use tracing::instrument;
use vsort_config::log_pipeline_warn;

use crate::classify::Classifier;
use crate::intel::{ContentClassifier, Insight};

/// Content hash of a file, or the sentinel for "could not read it".
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Fingerprint {
    Sha256(String),
    Unavailable,
}

impl Fingerprint {
    pub fn as_hex(&self) -> Option<&str> {
        match self {
            Fingerprint::Sha256(hex) => Some(hex),
            Fingerprint::Unavailable => None,
        }
    }

    pub fn is_available(&self) -> bool {
        matches!(self, Fingerprint::Sha256(_))
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Fingerprint::Sha256(hex) => f.write_str(hex),
            Fingerprint::Unavailable => f.write_str("unavailable"),
        }
    }
}

/// Streaming SHA-256, 64 KiB at a time.
pub fn sha256_file(path: &Path) -> io::Result<String> {
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; 64 * 1024];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}

/// Hash a file; read errors produce [`Fingerprint::Unavailable`].
pub fn fingerprint(path: &Path) -> Fingerprint {
    match sha256_file(path) {
        Ok(hex) => Fingerprint::Sha256(hex),
        Err(e) => {
            log_pipeline_warn!("Hash unavailable", path = %path.display(), error = %e);
            Fingerprint::Unavailable
        }
    }
}

/// Result of the readiness gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Readiness {
    Ready,
    Missing,
    NotAFile,
    /// Modified too recently; the remaining wait
    TooYoung(Duration),
    /// Exists but cannot be opened and read (still being written, locked)
    Locked,
}

/// Ready iff: a regular file, untouched for `min_age`, and readable.
pub fn check_readiness(path: &Path, min_age: Duration) -> Readiness {
    let metadata = match std::fs::metadata(path) {
        Ok(m) => m,
        Err(_) => return Readiness::Missing,
    };
    if !metadata.is_file() {
        return Readiness::NotAFile;
    }

    let modified = metadata.modified().unwrap_or(SystemTime::UNIX_EPOCH);
    let age = SystemTime::now()
        .duration_since(modified)
        .unwrap_or(Duration::ZERO);
    if age < min_age {
        return Readiness::TooYoung(min_age - age);
    }

    let mut byte = [0u8; 1];
    match File::open(path).and_then(|mut f| f.read(&mut byte)) {
        Ok(_) => Readiness::Ready,
        Err(_) => Readiness::Locked,
    }
}

/// Everything the pipeline knows about one file.
#[derive(Debug, Clone)]
pub struct FileRecord {
    pub path: PathBuf,
    pub hash: Fingerprint,
    pub size: u64,
    pub category: String,
    pub insight: Option<Insight>,
    pub mime: String,
    pub discovered_at: DateTime<Utc>,
}

impl FileRecord {
    pub fn sub_category(&self) -> Option<&str> {
        self.insight.as_ref().map(|i| i.sub_category.as_str())
    }
}

/// Fingerprint + classification + content heuristics.
pub struct Analyzer {
    classifier: Classifier,
    insights: Vec<Box<dyn ContentClassifier>>,
}

impl Analyzer {
    pub fn new(classifier: Classifier, insights: Vec<Box<dyn ContentClassifier>>) -> Self {
        Self {
            classifier,
            insights,
        }
    }

    pub fn classifier(&self) -> &Classifier {
        &self.classifier
    }

    /// Analyze a file that already passed the readiness gate.
    ///
    /// Only a failing `stat` is an error; an unreadable body degrades the
    /// hash to [`Fingerprint::Unavailable`].
    #[instrument(skip(self), fields(path = %path.display()), level = "debug")]
    pub fn analyze(&self, path: &Path) -> io::Result<FileRecord> {
        let size = std::fs::metadata(path)?.len();
        let hash = fingerprint(path);
        let category = self.classifier.classify(path).to_string();
        let insight = self
            .insights
            .iter()
            .find_map(|c| c.classify(path, &category));

        Ok(FileRecord {
            path: path.to_path_buf(),
            hash,
            size,
            category,
            insight,
            mime: mime_guess::from_path(path)
                .first_or_octet_stream()
                .essence_str()
                .to_string(),
            discovered_at: Utc::now(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_deterministic_ten_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ten.bin");
        std::fs::write(&path, b"0123456789").unwrap();

        let first = fingerprint(&path);
        let second = fingerprint(&path);
        assert_eq!(first, second);
        assert_eq!(
            first.as_hex(),
            Some("84d89877f0d4041efb6bf91a16f0248f2fd573e6af05c19f96bedb9f882f7882")
        );
    }

    #[test]
    fn test_missing_file_unavailable() {
        let fp = fingerprint(Path::new("/definitely/not/here"));
        assert_eq!(fp, Fingerprint::Unavailable);
        assert_eq!(fp.to_string(), "unavailable");
    }

    #[test]
    fn test_readiness() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.txt");

        assert_eq!(check_readiness(&path, Duration::ZERO), Readiness::Missing);
        assert_eq!(check_readiness(dir.path(), Duration::ZERO), Readiness::NotAFile);

        std::fs::write(&path, b"x").unwrap();
        assert_eq!(check_readiness(&path, Duration::ZERO), Readiness::Ready);
        assert!(matches!(
            check_readiness(&path, Duration::from_secs(3600)),
            Readiness::TooYoung(_)
        ));
    }

    #[test]
    fn test_analyze() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("statement.txt");
        std::fs::write(&path, b"Bank statement for March").unwrap();

        let analyzer = Analyzer::new(
            Classifier::from_map(&vsort_config::default_categories()),
            crate::intel::default_classifiers(),
        );
        let record = analyzer.analyze(&path).unwrap();
        assert_eq!(record.category, "Documents");
        assert_eq!(record.size, 24);
        assert_eq!(record.mime, "text/plain");
        assert_eq!(record.sub_category(), Some("Financial"));
        assert!(record.hash.is_available());
    }
}
