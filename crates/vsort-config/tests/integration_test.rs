//! Integration tests for vsort-config
//!
//! These tests verify the full config loading pipeline with real file system operations.

use std::path::PathBuf;
use tempfile::tempdir;
use vsort_config::{BlobBackend, Config, ConfigOverrides, ConfigSources};

fn sources(global: Option<PathBuf>, project: Option<PathBuf>) -> ConfigSources {
    ConfigSources {
        global,
        project,
        use_env: false,
        overrides: ConfigOverrides::default(),
    }
}

/// Test config hierarchy: project config overrides global
#[test]
fn test_config_hierarchy_project_overrides_global() {
    let temp = tempdir().unwrap();

    let global = temp.path().join("global.toml");
    std::fs::write(
        &global,
        r#"
[ingest]
retry_attempts = 9
min_file_age_secs = 30
ignore_patterns = [".tmp", ".part"]

[batch]
threshold = 10
"#,
    )
    .unwrap();

    let project = temp.path().join("vsort.toml");
    std::fs::write(
        &project,
        r#"
[ingest]
retry_attempts = 2
ignore_patterns = [".lock"]
"#,
    )
    .unwrap();

    let config = Config::load_with(&sources(Some(global), Some(project))).unwrap();

    // Project wins on the overlapping key
    assert_eq!(config.ingest.retry_attempts, 2);
    // Global survives where project is silent
    assert_eq!(config.ingest.min_file_age_secs, 30);
    assert_eq!(config.batch.threshold, 10);
    // Arrays replace rather than append
    assert_eq!(config.ingest.ignore_patterns, vec![".lock".to_string()]);
}

/// Missing files are skipped, built-in defaults apply
#[test]
fn test_missing_files_fall_back_to_defaults() {
    let temp = tempdir().unwrap();
    let config = Config::load_with(&sources(
        Some(temp.path().join("nope.toml")),
        Some(temp.path().join("also-nope.toml")),
    ))
    .unwrap();

    assert_eq!(config.ingest.retry_attempts, 3);
    assert_eq!(config.blob_store.max_payload_bytes, 10 * 1024 * 1024);
    assert_eq!(config.blob_store.backend, BlobBackend::Http);
}

/// The JSON classification map replaces the TOML categories
#[test]
fn test_categories_file_loaded() {
    let temp = tempdir().unwrap();
    let map = temp.path().join("categories.json");
    std::fs::write(&map, r#"{"Pictures": [".PNG", ".jpg"], "Other": []}"#).unwrap();

    let project = temp.path().join("vsort.toml");
    std::fs::write(
        &project,
        format!("[ingest]\ncategories_file = {:?}\n", map.display().to_string()),
    )
    .unwrap();

    let config = Config::load_with(&sources(None, Some(project))).unwrap();
    assert_eq!(config.categories.len(), 2);
    assert_eq!(config.categories["Pictures"], vec![".PNG", ".jpg"]);
}

/// A malformed classification map is a load error, not silently ignored
#[test]
fn test_bad_categories_file_is_error() {
    let temp = tempdir().unwrap();
    let map = temp.path().join("categories.json");
    std::fs::write(&map, "not json").unwrap();

    let project = temp.path().join("vsort.toml");
    std::fs::write(
        &project,
        format!("[ingest]\ncategories_file = {:?}\n", map.display().to_string()),
    )
    .unwrap();

    assert!(Config::load_with(&sources(None, Some(project))).is_err());
}

/// CLI-level overrides beat every file
#[test]
fn test_overrides_win() {
    let temp = tempdir().unwrap();
    let project = temp.path().join("vsort.toml");
    std::fs::write(
        &project,
        "[database]\npath = \"/file/ledger\"\n[logging]\nlevel = \"warn\"\n",
    )
    .unwrap();

    let mut src = sources(None, Some(project));
    src.overrides = ConfigOverrides {
        database_path: Some(PathBuf::from("/flag/ledger")),
        log_level: Some("debug".to_string()),
        ..Default::default()
    };

    let config = Config::load_with(&src).unwrap();
    assert_eq!(config.database.path, PathBuf::from("/flag/ledger"));
    assert_eq!(config.logging.level, "debug");
}

/// Rendered defaults parse back into an equivalent config
#[test]
fn test_default_toml_parses() {
    let rendered = Config::default_toml().unwrap();
    let parsed: Config = toml::from_str(&rendered).unwrap();
    assert_eq!(parsed.ingest.rename_pattern, "YYYYMMDD_HHMMSS");
    assert_eq!(parsed.vault.epochs, 10);
}
