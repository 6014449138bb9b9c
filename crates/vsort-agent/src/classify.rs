//! Extension → category lookup.

use std::collections::{BTreeMap, HashMap};
use std::path::Path;

/// Bucket for extensions no category claims.
pub const DEFAULT_CATEGORY: &str = "Other";

/// Exact, case-insensitive extension lookup (leading dot included).
#[derive(Debug, Clone)]
pub struct Classifier {
    by_extension: HashMap<String, String>,
    categories: Vec<String>,
}

impl Classifier {
    /// Build from a `{category: [ext, ...]}` map. When two categories claim
    /// the same extension the first in sort order wins.
    pub fn from_map(map: &BTreeMap<String, Vec<String>>) -> Self {
        let mut by_extension = HashMap::new();
        for (category, extensions) in map {
            for ext in extensions {
                let ext = normalize_extension(ext);
                by_extension
                    .entry(ext)
                    .or_insert_with(|| category.clone());
            }
        }

        let mut categories: Vec<String> = map.keys().cloned().collect();
        if !categories.iter().any(|c| c == DEFAULT_CATEGORY) {
            categories.push(DEFAULT_CATEGORY.to_string());
        }

        Self {
            by_extension,
            categories,
        }
    }

    pub fn classify(&self, path: &Path) -> &str {
        path.extension()
            .map(|ext| format!(".{}", ext.to_string_lossy().to_lowercase()))
            .and_then(|ext| self.by_extension.get(&ext))
            .map(String::as_str)
            .unwrap_or(DEFAULT_CATEGORY)
    }

    /// Every category folder name, default bucket included.
    pub fn categories(&self) -> &[String] {
        &self.categories
    }

    /// Create one folder per category under `root`.
    pub fn ensure_folders(&self, root: &Path) -> std::io::Result<()> {
        for category in &self.categories {
            std::fs::create_dir_all(root.join(category))?;
        }
        Ok(())
    }
}

/// `"PNG"` / `".PNG"` → `".png"`
pub fn normalize_extension(ext: &str) -> String {
    let ext = ext.trim().to_lowercase();
    if ext.starts_with('.') {
        ext
    } else {
        format!(".{}", ext)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn classifier() -> Classifier {
        Classifier::from_map(&vsort_config::default_categories())
    }

    #[test]
    fn test_known_extensions() {
        let c = classifier();
        assert_eq!(c.classify(&PathBuf::from("photo.jpg")), "Images");
        assert_eq!(c.classify(&PathBuf::from("invoice.pdf")), "Documents");
        assert_eq!(c.classify(&PathBuf::from("lib.rs")), "Code");
        assert_eq!(c.classify(&PathBuf::from("backup.tar.gz")), "Archives");
    }

    #[test]
    fn test_case_insensitive() {
        assert_eq!(classifier().classify(&PathBuf::from("IMG_001.JPEG")), "Images");
    }

    #[test]
    fn test_unknown_and_missing_extension() {
        let c = classifier();
        assert_eq!(c.classify(&PathBuf::from("weird.xyz")), DEFAULT_CATEGORY);
        assert_eq!(c.classify(&PathBuf::from("Makefile")), DEFAULT_CATEGORY);
    }

    #[test]
    fn test_custom_map_adds_default_bucket() {
        let mut map = BTreeMap::new();
        map.insert("Pics".to_string(), vec!["PNG".to_string()]);
        let c = Classifier::from_map(&map);
        assert_eq!(c.classify(&PathBuf::from("a.png")), "Pics");
        assert!(c.categories().iter().any(|n| n == DEFAULT_CATEGORY));
    }

    #[test]
    fn test_ensure_folders() {
        let dir = tempfile::tempdir().unwrap();
        classifier().ensure_folders(dir.path()).unwrap();
        assert!(dir.path().join("Images").is_dir());
        assert!(dir.path().join("Other").is_dir());
    }
}
