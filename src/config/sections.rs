//! Config sections: bus, store, runtime, logging
//!
//! Each section comes in two shapes: the resolved struct the program uses,
//! and an all-`Option` `File*` struct as parsed from TOML. `from_file`
//! fills gaps from the defaults.

use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

use crate::bus::DEFAULT_LOG_CAPACITY;
use crate::handlers::DEFAULT_TOOL_GRACE;

// ─────────────────────────────────────────────────────────────────────────────
// Bus
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub struct BusConfig {
    /// Events kept in the rolling debug log (0 disables it)
    pub log_capacity: usize,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            log_capacity: DEFAULT_LOG_CAPACITY,
        }
    }
}

#[derive(Debug, Deserialize, Default)]
pub struct FileBus {
    pub log_capacity: Option<usize>,
}

impl BusConfig {
    pub fn from_file(file: Option<FileBus>) -> Self {
        let file = file.unwrap_or_default();
        let defaults = Self::default();
        Self {
            log_capacity: file.log_capacity.unwrap_or(defaults.log_capacity),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Store
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub struct StoreConfig {
    /// Delay before a finished tool call is evicted from the live map
    pub tool_grace: Duration,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            tool_grace: DEFAULT_TOOL_GRACE,
        }
    }
}

#[derive(Debug, Deserialize, Default)]
pub struct FileStore {
    pub tool_grace_ms: Option<u64>,
}

impl StoreConfig {
    pub fn from_file(file: Option<FileStore>) -> Self {
        let file = file.unwrap_or_default();
        Self {
            tool_grace: file
                .tool_grace_ms
                .map(Duration::from_millis)
                .unwrap_or(DEFAULT_TOOL_GRACE),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Runtime
// ─────────────────────────────────────────────────────────────────────────────

pub const DEFAULT_TICK_INTERVAL: Duration = Duration::from_millis(250);

#[derive(Debug, Clone, PartialEq)]
pub struct RuntimeConfig {
    /// How often the host drives deferred work
    pub tick_interval: Duration,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            tick_interval: DEFAULT_TICK_INTERVAL,
        }
    }
}

#[derive(Debug, Deserialize, Default)]
pub struct FileRuntime {
    pub tick_interval_ms: Option<u64>,
}

impl RuntimeConfig {
    pub fn from_file(file: Option<FileRuntime>) -> Self {
        let file = file.unwrap_or_default();
        Self {
            tick_interval: file
                .tick_interval_ms
                .filter(|ms| *ms > 0)
                .map(Duration::from_millis)
                .unwrap_or(DEFAULT_TICK_INTERVAL),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Logging
// ─────────────────────────────────────────────────────────────────────────────

/// Log file rotation strategy
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogRotation {
    Hourly,
    #[default]
    Daily,
    /// Single file, never rotated
    Never,
}

impl LogRotation {
    /// Unknown values fall back to daily
    pub fn parse(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "hourly" => Self::Hourly,
            "never" => Self::Never,
            _ => Self::Daily,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Hourly => "hourly",
            Self::Daily => "daily",
            Self::Never => "never",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct LoggingConfig {
    /// Filter directive used when RUST_LOG is unset ("info", "tether=debug", ...)
    pub level: String,
    /// Also write JSON logs to rolling files
    pub file_enabled: bool,
    pub file_dir: PathBuf,
    pub file_rotation: LogRotation,
    /// File name prefix ("tether" -> "tether.2026-10-18")
    pub file_prefix: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file_enabled: false,
            file_dir: PathBuf::from("./logs"),
            file_rotation: LogRotation::Daily,
            file_prefix: "tether".to_string(),
        }
    }
}

#[derive(Debug, Deserialize, Default)]
pub struct FileLogging {
    pub level: Option<String>,
    pub file_enabled: Option<bool>,
    pub file_dir: Option<String>,
    pub file_rotation: Option<String>,
    pub file_prefix: Option<String>,
}

impl LoggingConfig {
    pub fn from_file(file: Option<FileLogging>) -> Self {
        let file = file.unwrap_or_default();
        let defaults = Self::default();

        Self {
            level: file.level.unwrap_or(defaults.level),
            file_enabled: file.file_enabled.unwrap_or(defaults.file_enabled),
            file_dir: file
                .file_dir
                .map(PathBuf::from)
                .unwrap_or(defaults.file_dir),
            file_rotation: file
                .file_rotation
                .map(|s| LogRotation::parse(&s))
                .unwrap_or(defaults.file_rotation),
            file_prefix: file.file_prefix.unwrap_or(defaults.file_prefix),
        }
    }
}
