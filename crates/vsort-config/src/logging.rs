//! Structured logging utilities for vaultsort components.
//!
//! Provides consistent logging with component prefixes and structured fields.
//!
//! # Usage
//!
//! ```ignore
//! use vsort_config::log_pipeline_info;
//!
//! log_pipeline_info!("File moved", category = "Images");
//! ```

use std::str::FromStr;

/// Component identifiers for log filtering
pub struct Component;

impl Component {
    pub const PIPELINE: &'static str = "PIPELINE";
    pub const VAULT: &'static str = "VAULT";
    pub const WORKFLOW: &'static str = "WORKFLOW";
    pub const WATCH: &'static str = "WATCH";
    pub const BATCH: &'static str = "BATCH";
    pub const LEDGER: &'static str = "LEDGER";
    pub const CLI: &'static str = "CLI";
}

/// Log levels for runtime configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    pub fn as_filter(&self) -> &'static str {
        match self {
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
        }
    }
}

impl FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "error" => Ok(LogLevel::Error),
            "warn" | "warning" => Ok(LogLevel::Warn),
            "info" => Ok(LogLevel::Info),
            "debug" => Ok(LogLevel::Debug),
            "trace" => Ok(LogLevel::Trace),
            other => Err(format!("unknown log level: {}", other)),
        }
    }
}

// === PIPELINE logging macros ===

#[macro_export]
macro_rules! log_pipeline_error {
    ($msg:literal $(,)?) => {
        tracing::error!(component = "PIPELINE", $msg)
    };
    ($msg:literal, $($field:tt)+) => {
        tracing::error!(component = "PIPELINE", $($field)+, $msg)
    };
}

#[macro_export]
macro_rules! log_pipeline_warn {
    ($msg:literal $(,)?) => {
        tracing::warn!(component = "PIPELINE", $msg)
    };
    ($msg:literal, $($field:tt)+) => {
        tracing::warn!(component = "PIPELINE", $($field)+, $msg)
    };
}

#[macro_export]
macro_rules! log_pipeline_info {
    ($msg:literal $(,)?) => {
        tracing::info!(component = "PIPELINE", $msg)
    };
    ($msg:literal, $($field:tt)+) => {
        tracing::info!(component = "PIPELINE", $($field)+, $msg)
    };
}

#[macro_export]
macro_rules! log_pipeline_debug {
    ($msg:literal $(,)?) => {
        tracing::debug!(component = "PIPELINE", $msg)
    };
    ($msg:literal, $($field:tt)+) => {
        tracing::debug!(component = "PIPELINE", $($field)+, $msg)
    };
}

// === VAULT logging macros ===

#[macro_export]
macro_rules! log_vault_warn {
    ($msg:literal $(,)?) => {
        tracing::warn!(component = "VAULT", $msg)
    };
    ($msg:literal, $($field:tt)+) => {
        tracing::warn!(component = "VAULT", $($field)+, $msg)
    };
}

#[macro_export]
macro_rules! log_vault_info {
    ($msg:literal $(,)?) => {
        tracing::info!(component = "VAULT", $msg)
    };
    ($msg:literal, $($field:tt)+) => {
        tracing::info!(component = "VAULT", $($field)+, $msg)
    };
}

#[macro_export]
macro_rules! log_vault_debug {
    ($msg:literal $(,)?) => {
        tracing::debug!(component = "VAULT", $msg)
    };
    ($msg:literal, $($field:tt)+) => {
        tracing::debug!(component = "VAULT", $($field)+, $msg)
    };
}

// === WORKFLOW logging macros ===

#[macro_export]
macro_rules! log_workflow_warn {
    ($msg:literal $(,)?) => {
        tracing::warn!(component = "WORKFLOW", $msg)
    };
    ($msg:literal, $($field:tt)+) => {
        tracing::warn!(component = "WORKFLOW", $($field)+, $msg)
    };
}

#[macro_export]
macro_rules! log_workflow_info {
    ($msg:literal $(,)?) => {
        tracing::info!(component = "WORKFLOW", $msg)
    };
    ($msg:literal, $($field:tt)+) => {
        tracing::info!(component = "WORKFLOW", $($field)+, $msg)
    };
}

#[macro_export]
macro_rules! log_workflow_debug {
    ($msg:literal $(,)?) => {
        tracing::debug!(component = "WORKFLOW", $msg)
    };
    ($msg:literal, $($field:tt)+) => {
        tracing::debug!(component = "WORKFLOW", $($field)+, $msg)
    };
}

// === WATCH logging macros ===

#[macro_export]
macro_rules! log_watch_warn {
    ($msg:literal $(,)?) => {
        tracing::warn!(component = "WATCH", $msg)
    };
    ($msg:literal, $($field:tt)+) => {
        tracing::warn!(component = "WATCH", $($field)+, $msg)
    };
}

#[macro_export]
macro_rules! log_watch_info {
    ($msg:literal $(,)?) => {
        tracing::info!(component = "WATCH", $msg)
    };
    ($msg:literal, $($field:tt)+) => {
        tracing::info!(component = "WATCH", $($field)+, $msg)
    };
}

#[macro_export]
macro_rules! log_watch_debug {
    ($msg:literal $(,)?) => {
        tracing::debug!(component = "WATCH", $msg)
    };
    ($msg:literal, $($field:tt)+) => {
        tracing::debug!(component = "WATCH", $($field)+, $msg)
    };
}

// === BATCH logging macros ===

#[macro_export]
macro_rules! log_batch_warn {
    ($msg:literal $(,)?) => {
        tracing::warn!(component = "BATCH", $msg)
    };
    ($msg:literal, $($field:tt)+) => {
        tracing::warn!(component = "BATCH", $($field)+, $msg)
    };
}

#[macro_export]
macro_rules! log_batch_info {
    ($msg:literal $(,)?) => {
        tracing::info!(component = "BATCH", $msg)
    };
    ($msg:literal, $($field:tt)+) => {
        tracing::info!(component = "BATCH", $($field)+, $msg)
    };
}

// === LEDGER logging macros ===

#[macro_export]
macro_rules! log_ledger_debug {
    ($msg:literal $(,)?) => {
        tracing::debug!(component = "LEDGER", $msg)
    };
    ($msg:literal, $($field:tt)+) => {
        tracing::debug!(component = "LEDGER", $($field)+, $msg)
    };
}

// === CLI logging macros ===

#[macro_export]
macro_rules! log_cli_info {
    ($msg:literal $(,)?) => {
        tracing::info!(component = "CLI", $msg)
    };
    ($msg:literal, $($field:tt)+) => {
        tracing::info!(component = "CLI", $($field)+, $msg)
    };
}

/// Initialize logging with the given level filter.
/// Call this once at application startup. `RUST_LOG` takes precedence.
pub fn init_logging(level: LogLevel) {
    use tracing_subscriber::EnvFilter;

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.as_filter()));

    // A second call (tests, embedding) keeps the first subscriber.
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .try_init();
}
