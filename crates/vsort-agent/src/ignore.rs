//! Ignore filter for partial downloads and hidden files.

use std::path::Path;

use vsort_config::IngestConfig;

/// Name-based ignore matcher. Patterns match case-insensitively as substrings
/// of the file name.
#[derive(Debug, Clone, Default)]
pub struct IgnoreMatcher {
    patterns: Vec<String>,
}

impl IgnoreMatcher {
    /// Create a matcher with custom patterns
    pub fn with_patterns(patterns: &[String]) -> Self {
        Self {
            patterns: patterns
                .iter()
                .filter(|p| !p.is_empty())
                .map(|p| p.to_lowercase())
                .collect(),
        }
    }

    pub fn from_config(config: &IngestConfig) -> Self {
        Self::with_patterns(&config.ignore_patterns)
    }

    /// Check the name only; no filesystem access.
    pub fn ignores_name(&self, path: &Path) -> bool {
        let Some(name) = path.file_name() else {
            return true;
        };
        let name = name.to_string_lossy().to_lowercase();
        if name.starts_with('.') {
            return true;
        }
        self.patterns.iter().any(|p| name.contains(p.as_str()))
    }

    /// Check if a path should be skipped: hidden, matching a pattern, or a directory.
    pub fn should_ignore(&self, path: &Path) -> bool {
        self.ignores_name(path) || path.is_dir()
    }

    /// Get the patterns
    pub fn patterns(&self) -> &[String] {
        &self.patterns
    }
}
