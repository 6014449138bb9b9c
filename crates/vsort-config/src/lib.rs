//! # vsort-config
//!
//! Configuration management for vaultsort.
//!
//! Sources are layered, later layers win:
//! 1. Built-in defaults
//! 2. `~/.vsort/config.toml` (global)
//! 3. `./vsort.toml` or an explicit `--config` file (project)
//! 4. Environment variables (`VSORT_*`)
//! 5. Explicit overrides (CLI flags)
//!
//! Tables deep-merge. Arrays, the `[categories]` map and workflow `rules`
//! replace whatever the lower layer had.

pub mod logging;
pub mod testing;

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::debug;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("TOML render error: {0}")]
    TomlRender(#[from] toml::ser::Error),
    #[error("classification map {path}: {source}")]
    CategoriesFile {
        path: PathBuf,
        source: serde_json::Error,
    },
}

pub type Result<T> = std::result::Result<T, ConfigError>;

/// Keys whose values replace the lower layer instead of deep-merging.
const REPLACE_KEYS: &[&str] = &["categories", "rules"];

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub folders: FolderConfig,
    pub ingest: IngestConfig,
    pub categories: BTreeMap<String, Vec<String>>,
    pub blob_store: BlobStoreConfig,
    pub batch: BatchConfig,
    pub vault: VaultConfig,
    pub workflows: WorkflowConfig,
    pub database: DatabaseConfig,
    pub logging: LoggingConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            folders: FolderConfig::default(),
            ingest: IngestConfig::default(),
            categories: default_categories(),
            blob_store: BlobStoreConfig::default(),
            batch: BatchConfig::default(),
            vault: VaultConfig::default(),
            workflows: WorkflowConfig::default(),
            database: DatabaseConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

/// Where configuration comes from. `standard()` mirrors what the CLI uses.
#[derive(Debug, Clone, Default)]
pub struct ConfigSources {
    pub global: Option<PathBuf>,
    pub project: Option<PathBuf>,
    pub use_env: bool,
    pub overrides: ConfigOverrides,
}

impl ConfigSources {
    pub fn standard() -> Self {
        Self {
            global: Config::global_config_path(),
            project: Some(PathBuf::from("vsort.toml")),
            use_env: true,
            overrides: ConfigOverrides::default(),
        }
    }

    /// Standard sources with an explicit project file instead of `./vsort.toml`.
    pub fn with_project_file(path: impl Into<PathBuf>) -> Self {
        Self {
            project: Some(path.into()),
            ..Self::standard()
        }
    }
}

/// Highest-priority values, typically parsed from the command line.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub watch_folder: Option<PathBuf>,
    pub organized_folder: Option<PathBuf>,
    pub database_path: Option<PathBuf>,
    pub log_level: Option<String>,
    /// Force the local blob store backend.
    pub offline: bool,
}

impl Config {
    /// Load config from the standard locations
    pub fn load() -> Result<Self> {
        Self::load_with(&ConfigSources::standard())
    }

    /// Load config from explicit sources, applying the documented precedence.
    pub fn load_with(sources: &ConfigSources) -> Result<Self> {
        let mut merged = toml::Value::try_from(Config::default())?;

        for path in [&sources.global, &sources.project].into_iter().flatten() {
            if path.exists() {
                debug!("Loading config layer from {:?}", path);
                let contents = std::fs::read_to_string(path)?;
                let layer: toml::Value = toml::from_str(&contents)?;
                merge_value(&mut merged, layer);
            }
        }

        let mut config: Config = merged.try_into()?;

        if sources.use_env {
            config.apply_env_overrides();
        }
        config.apply_overrides(&sources.overrides);

        if let Some(path) = config.ingest.categories_file.clone() {
            config.categories = load_categories_file(&expand_tilde(&path))?;
        }

        config.expand_paths();
        Ok(config)
    }

    /// Global config path: ~/.vsort/config.toml
    pub fn global_config_path() -> Option<PathBuf> {
        dirs::home_dir().map(|h| h.join(".vsort/config.toml"))
    }

    /// Apply environment variable overrides
    fn apply_env_overrides(&mut self) {
        if let Ok(path) = std::env::var("VSORT_WATCH_FOLDER") {
            self.folders.watch_folder = PathBuf::from(path);
        }
        if let Ok(path) = std::env::var("VSORT_ORGANIZED_FOLDER") {
            self.folders.organized_folder = PathBuf::from(path);
        }
        if let Ok(path) = std::env::var("VSORT_DB_PATH") {
            self.database.path = PathBuf::from(path);
        }
        if let Ok(level) = std::env::var("VSORT_LOG") {
            self.logging.level = level;
        }
    }

    fn apply_overrides(&mut self, overrides: &ConfigOverrides) {
        if let Some(path) = &overrides.watch_folder {
            self.folders.watch_folder = path.clone();
        }
        if let Some(path) = &overrides.organized_folder {
            self.folders.organized_folder = path.clone();
        }
        if let Some(path) = &overrides.database_path {
            self.database.path = path.clone();
        }
        if let Some(level) = &overrides.log_level {
            self.logging.level = level.clone();
        }
        if overrides.offline {
            self.blob_store.backend = BlobBackend::Local;
        }
    }

    fn expand_paths(&mut self) {
        self.folders.watch_folder = expand_tilde(&self.folders.watch_folder);
        self.folders.organized_folder = expand_tilde(&self.folders.organized_folder);
        self.blob_store.local_root = expand_tilde(&self.blob_store.local_root);
        self.database.path = expand_tilde(&self.database.path);
    }

    /// Generate default config TOML string
    pub fn default_toml() -> Result<String> {
        Ok(toml::to_string_pretty(&Config::default())?)
    }
}

/// Deep-merge `overlay` into `base`.
fn merge_value(base: &mut toml::Value, overlay: toml::Value) {
    match (base, overlay) {
        (toml::Value::Table(base_table), toml::Value::Table(overlay_table)) => {
            for (key, value) in overlay_table {
                match base_table.get_mut(&key) {
                    Some(existing) if !REPLACE_KEYS.contains(&key.as_str()) => {
                        merge_value(existing, value)
                    }
                    _ => {
                        base_table.insert(key, value);
                    }
                }
            }
        }
        (base, overlay) => *base = overlay,
    }
}

/// Read a JSON classification map `{category: [ext, ...]}`.
pub fn load_categories_file(path: &Path) -> Result<BTreeMap<String, Vec<String>>> {
    let contents = std::fs::read_to_string(path)?;
    serde_json::from_str(&contents).map_err(|source| ConfigError::CategoriesFile {
        path: path.to_path_buf(),
        source,
    })
}

/// Expand a leading `~` to the user's home directory.
pub fn expand_tilde(path: &Path) -> PathBuf {
    match path.strip_prefix("~") {
        Ok(rest) => match dirs::home_dir() {
            Some(home) => home.join(rest),
            None => path.to_path_buf(),
        },
        Err(_) => path.to_path_buf(),
    }
}

/// Folder configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FolderConfig {
    /// Folder watched for new arrivals
    pub watch_folder: PathBuf,
    /// Root of the category structure
    pub organized_folder: PathBuf,
}

impl Default for FolderConfig {
    fn default() -> Self {
        Self {
            watch_folder: PathBuf::from("~/Downloads"),
            organized_folder: PathBuf::from("~/Downloads/Organized"),
        }
    }
}

/// Ingest configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestConfig {
    /// Minimum age (since last modification) before a file is touched
    pub min_file_age_secs: u64,
    /// Interval between compensating rescans of the watch folder
    pub scan_interval_secs: u64,
    /// Case-insensitive substrings of file names to skip
    pub ignore_patterns: Vec<String>,
    /// Skip files whose content hash was already processed
    pub check_duplicates: bool,
    /// Timestamp prefix pattern (tokens: YYYY MM DD HH mm SS)
    pub rename_pattern: String,
    /// Attempts per file before recording an error
    pub retry_attempts: u32,
    /// Fixed delay between attempts
    pub retry_delay_secs: u64,
    /// Optional JSON classification map replacing `[categories]`
    pub categories_file: Option<PathBuf>,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            min_file_age_secs: 5,
            scan_interval_secs: 60,
            ignore_patterns: vec![
                ".tmp".to_string(),
                ".crdownload".to_string(),
                ".partial".to_string(),
                "~$".to_string(),
                ".download".to_string(),
            ],
            check_duplicates: true,
            rename_pattern: "YYYYMMDD_HHMMSS".to_string(),
            retry_attempts: 3,
            retry_delay_secs: 5,
            categories_file: None,
        }
    }
}

/// Built-in extension map. `Other` is the default bucket.
pub fn default_categories() -> BTreeMap<String, Vec<String>> {
    let table: &[(&str, &[&str])] = &[
        (
            "Images",
            &[".jpg", ".jpeg", ".png", ".gif", ".webp", ".svg", ".bmp", ".ico", ".tiff"],
        ),
        (
            "Documents",
            &[
                ".pdf", ".docx", ".doc", ".txt", ".md", ".xlsx", ".xls", ".pptx", ".ppt", ".odt",
                ".rtf", ".csv",
            ],
        ),
        (
            "Videos",
            &[".mp4", ".avi", ".mov", ".mkv", ".wmv", ".flv", ".webm", ".m4v"],
        ),
        (
            "Audio",
            &[".mp3", ".wav", ".flac", ".aac", ".ogg", ".wma", ".m4a"],
        ),
        (
            "Code",
            &[
                ".py", ".js", ".ts", ".html", ".css", ".java", ".cpp", ".c", ".h", ".json", ".xml",
                ".yaml", ".yml", ".sol", ".move", ".rs",
            ],
        ),
        ("Archives", &[".zip", ".rar", ".tar", ".gz", ".7z", ".bz2"]),
        (
            "Executables",
            &[".exe", ".msi", ".bat", ".cmd", ".ps1", ".sh"],
        ),
        ("Other", &[]),
    ];

    table
        .iter()
        .map(|(name, exts)| {
            (
                name.to_string(),
                exts.iter().map(|e| e.to_string()).collect(),
            )
        })
        .collect()
}

/// Which blob store implementation backs the vault and the batcher
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlobBackend {
    /// Remote publisher/aggregator pair
    Http,
    /// Local content-addressed directory (offline mode)
    Local,
}

/// Remote blob store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BlobStoreConfig {
    pub backend: BlobBackend,
    pub publisher_url: String,
    pub aggregator_url: String,
    /// Storage epochs requested per upload
    pub epochs: u32,
    pub timeout_secs: u64,
    /// Uploads above this size fail with a distinct error
    pub max_payload_bytes: usize,
    /// Root of the local store when `backend = "local"`
    pub local_root: PathBuf,
}

impl Default for BlobStoreConfig {
    fn default() -> Self {
        Self {
            backend: BlobBackend::Http,
            publisher_url: "https://publisher.walrus-testnet.walrus.space".to_string(),
            aggregator_url: "https://aggregator.walrus-testnet.walrus.space".to_string(),
            epochs: 5,
            timeout_secs: 60,
            max_payload_bytes: 10 * 1024 * 1024,
            local_root: PathBuf::from("~/.vsort/blobs"),
        }
    }
}

/// Upload batching configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchConfig {
    /// Moved files that trigger a flush
    pub threshold: usize,
    /// Maximum actions packed into one payload
    pub limit: usize,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            threshold: 100,
            limit: 100,
        }
    }
}

/// Encrypted vault configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VaultConfig {
    pub enabled: bool,
    pub epochs: u32,
    /// Base URL used when rendering share links
    pub share_base_url: String,
}

impl Default for VaultConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            epochs: 10,
            share_base_url: "http://localhost:5050".to_string(),
        }
    }
}

/// Workflow engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkflowConfig {
    pub enabled: bool,
    /// Rules to load; `None` means the built-in set
    pub rules: Option<Vec<RuleSpec>>,
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            rules: None,
        }
    }
}

/// Serialized form of a workflow rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleSpec {
    pub name: String,
    pub trigger_type: TriggerKind,
    pub trigger_value: String,
    #[serde(default)]
    pub actions: Vec<ActionSpec>,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerKind {
    ContentMatch,
    ExtensionMatch,
    FilenameMatch,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ActionSpec {
    Move {
        #[serde(default = "default_move_destination")]
        destination: String,
    },
    Tag {
        #[serde(default)]
        value: String,
    },
    #[serde(alias = "walrus_backup")]
    VaultBackup,
    Unzip,
    ConvertToPdf,
}

fn default_move_destination() -> String {
    "Workflows".to_string()
}

impl ActionSpec {
    pub fn kind(&self) -> &'static str {
        match self {
            ActionSpec::Move { .. } => "move",
            ActionSpec::Tag { .. } => "tag",
            ActionSpec::VaultBackup => "vault_backup",
            ActionSpec::Unzip => "unzip",
            ActionSpec::ConvertToPdf => "convert_to_pdf",
        }
    }
}

/// Ledger configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// LMDB environment directory
    pub path: PathBuf,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("~/.vsort/ledger"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// error | warn | info | debug | trace
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}
